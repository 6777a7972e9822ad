//! Observer pattern for optimization monitoring.
//!
//! Observers registered with an optimizer are notified once per outer iteration:
//! first with the iteration metrics, then with the current estimate.
//!
//! ```text
//! optimizer ──set_iteration_metrics(error, λ, |δ|, ρ)──► observers
//!           ──notify(values, iteration)───────────────► observers
//! ```
//!
//! [`HistoryObserver`] records the metrics of every iteration and is the
//! building block for convergence plots and regression tests.
//!
//! ```no_run
//! use apex_hessian::core::{NonlinearFactorGraph, Values};
//! use apex_hessian::observers::HistoryObserver;
//! use apex_hessian::optimizer::{
//!     LevenbergMarquardtConfig, LevenbergMarquardtOptimizer, NonlinearOptimizer,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let graph = NonlinearFactorGraph::new();
//! # let initial = Values::new();
//! let history = HistoryObserver::new();
//! let mut optimizer =
//!     LevenbergMarquardtOptimizer::new(graph, initial, LevenbergMarquardtConfig::new())?;
//! optimizer.add_observer(history.clone());
//! optimizer.optimize()?;
//! for record in history.records()? {
//!     println!("{}: {:.3e}", record.iteration, record.error);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::error;

use crate::core::Values;

/// Observer-specific error types
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// A recording observer's lock was poisoned by a panicking writer
    #[error("Mutex poisoned in {context}: {reason}")]
    MutexPoisoned { context: String, reason: String },
}

impl ObserverError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for observer operations
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Receives progress notifications from an optimizer.
pub trait OptObserver: Send {
    /// Called after every outer iteration with the current estimate.
    fn on_step(&self, values: &Values, iteration: usize);

    /// Metrics of the iteration about to be reported through [`on_step`](Self::on_step).
    ///
    /// `lambda` and `model_fidelity` are `None` for undamped optimizers.
    fn set_iteration_metrics(
        &self,
        _error: f64,
        _lambda: Option<f64>,
        _step_norm: f64,
        _model_fidelity: Option<f64>,
    ) {
    }
}

/// The observers of one optimizer.
#[derive(Default)]
pub struct OptObserverVec {
    observers: Vec<Box<dyn OptObserver>>,
}

impl OptObserverVec {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: impl OptObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    #[inline]
    pub fn set_iteration_metrics(
        &self,
        error: f64,
        lambda: Option<f64>,
        step_norm: f64,
        model_fidelity: Option<f64>,
    ) {
        for observer in &self.observers {
            observer.set_iteration_metrics(error, lambda, step_norm, model_fidelity);
        }
    }

    #[inline]
    pub fn notify(&self, values: &Values, iteration: usize) {
        for observer in &self.observers {
            observer.on_step(values, iteration);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Metrics of one outer iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub error: f64,
    pub lambda: Option<f64>,
    pub step_norm: f64,
    pub model_fidelity: Option<f64>,
}

#[derive(Debug, Default)]
struct HistoryState {
    pending: Option<IterationRecord>,
    records: Vec<IterationRecord>,
}

/// Records every iteration's metrics. Clones share the same history.
#[derive(Debug, Clone, Default)]
pub struct HistoryObserver {
    state: Arc<Mutex<HistoryState>>,
}

impl HistoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far, in iteration order.
    pub fn records(&self) -> ObserverResult<Vec<IterationRecord>> {
        let guard = self.state.lock().map_err(|e| {
            ObserverError::MutexPoisoned {
                context: "HistoryObserver::records".to_string(),
                reason: e.to_string(),
            }
            .log()
        })?;
        Ok(guard.records.clone())
    }

    /// Lock for writers. A poisoned lock is logged and recovered.
    fn lock_recovering(&self, context: &str) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            let _ = ObserverError::MutexPoisoned {
                context: context.to_string(),
                reason: poisoned.to_string(),
            }
            .log();
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }
}

impl OptObserver for HistoryObserver {
    fn on_step(&self, _values: &Values, iteration: usize) {
        let mut guard = self.lock_recovering("HistoryObserver::on_step");
        let mut record = guard.pending.take().unwrap_or(IterationRecord {
            iteration,
            error: f64::NAN,
            lambda: None,
            step_norm: f64::NAN,
            model_fidelity: None,
        });
        record.iteration = iteration;
        guard.records.push(record);
    }

    fn set_iteration_metrics(
        &self,
        error: f64,
        lambda: Option<f64>,
        step_norm: f64,
        model_fidelity: Option<f64>,
    ) {
        let mut guard = self.lock_recovering("HistoryObserver::set_iteration_metrics");
        guard.pending = Some(IterationRecord {
            iteration: 0,
            error,
            lambda,
            step_norm,
            model_fidelity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestObserver {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl OptObserver for TestObserver {
        fn on_step(&self, _values: &Values, iteration: usize) {
            if let Ok(mut guard) = self.calls.lock() {
                guard.push(iteration);
            }
        }
    }

    #[test]
    fn test_empty_observers() {
        let observers = OptObserverVec::new();
        assert!(observers.is_empty());
        assert_eq!(observers.len(), 0);
        observers.notify(&Values::new(), 0);
    }

    #[test]
    fn test_multiple_observers() -> Result<(), Box<dyn std::error::Error>> {
        let calls1 = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::new(Mutex::new(Vec::new()));

        let mut observers = OptObserverVec::new();
        observers.add(TestObserver {
            calls: calls1.clone(),
        });
        observers.add(TestObserver {
            calls: calls2.clone(),
        });
        assert_eq!(observers.len(), 2);

        observers.notify(&Values::new(), 5);
        observers.notify(&Values::new(), 6);

        assert_eq!(*calls1.lock().map_err(|e| e.to_string())?, vec![5, 6]);
        assert_eq!(*calls2.lock().map_err(|e| e.to_string())?, vec![5, 6]);
        Ok(())
    }

    #[test]
    fn test_history_pairs_metrics_with_iteration() -> ObserverResult<()> {
        let history = HistoryObserver::new();
        let mut observers = OptObserverVec::new();
        observers.add(history.clone());

        observers.set_iteration_metrics(4.0, Some(1e-3), 0.5, Some(0.9));
        observers.notify(&Values::new(), 0);
        observers.notify(&Values::new(), 1);

        let records = history.records()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].error, 4.0);
        assert_eq!(records[0].lambda, Some(1e-3));
        assert_eq!(records[1].iteration, 1);
        assert!(records[1].error.is_nan());
        Ok(())
    }

    #[test]
    fn test_history_survives_poisoned_lock() -> ObserverResult<()> {
        let history = HistoryObserver::new();
        let writer = history.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = writer.state.lock();
            panic!("writer panicked while holding the history lock");
        })
        .join()
        .is_err();
        assert!(panicked);
        assert!(history.state.is_poisoned());

        history.set_iteration_metrics(2.0, None, 0.1, None);
        history.on_step(&Values::new(), 3);

        let records = history.records()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].iteration, 3);
        assert_eq!(records[0].error, 2.0);
        Ok(())
    }
}
