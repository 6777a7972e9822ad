//! Elimination driver.
//!
//! [`eliminate_cholesky`] performs one elimination step: scatter the factors that
//! touch the frontal variables into a private joint [`InformationFactor`], run the
//! partial Cholesky, and split off the conditionals. [`eliminate_sequential`]
//! repeats that step along an [`Ordering`], feeding each remainder factor back into
//! the pool, until the whole graph is a Bayes net.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};
use web_time::{Duration, Instant};

use super::{
    GaussianBayesNet, GaussianFactor, GaussianFactorGraph, InformationFactor, Key, LinearError,
    LinearResult, Ordering, Scatter,
};

/// Timing and size counters for elimination, passed in explicitly by the caller.
#[derive(Debug, Clone, Default)]
pub struct EliminationDiagnostics {
    pub allocate: Duration,
    pub zero: Duration,
    pub accumulate: Duration,
    pub factorize: Duration,
    pub extract: Duration,
    /// Elimination steps performed
    pub steps: usize,
    pub eliminated_variables: usize,
    /// Largest joint matrix dimension seen, constant row included
    pub max_joint_dim: usize,
}

impl EliminationDiagnostics {
    pub fn total(&self) -> Duration {
        self.allocate + self.zero + self.accumulate + self.factorize + self.extract
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn log_summary(&self) {
        debug!(
            "elimination: {} steps, {} variables, max joint dim {}, allocate {:.3}ms, zero {:.3}ms, accumulate {:.3}ms, factorize {:.3}ms, extract {:.3}ms",
            self.steps,
            self.eliminated_variables,
            self.max_joint_dim,
            self.allocate.as_secs_f64() * 1000.0,
            self.zero.as_secs_f64() * 1000.0,
            self.accumulate.as_secs_f64() * 1000.0,
            self.factorize.as_secs_f64() * 1000.0,
            self.extract.as_secs_f64() * 1000.0,
        );
    }
}

/// Accumulate `factors` into one zeroed joint factor laid out by `scatter`.
///
/// Measurement factors are converted to information form first; both paths share
/// [`InformationFactor::update`].
pub fn assemble_joint<'a>(
    factors: impl IntoIterator<Item = &'a GaussianFactor>,
    scatter: &Scatter,
    diagnostics: &mut EliminationDiagnostics,
) -> LinearResult<InformationFactor> {
    let allocate_start = Instant::now();
    let mut joint = InformationFactor::from_scatter(scatter)?;
    diagnostics.allocate += allocate_start.elapsed();

    let zero_start = Instant::now();
    joint.set_zero();
    diagnostics.zero += zero_start.elapsed();

    let accumulate_start = Instant::now();
    for factor in factors {
        let information = factor.to_information()?;
        joint.update(&information, scatter)?;
    }
    joint.assert_invariants()?;
    diagnostics.accumulate += accumulate_start.elapsed();
    diagnostics.max_joint_dim = diagnostics.max_joint_dim.max(scatter.matrix_dim());
    Ok(joint)
}

/// One elimination step.
///
/// Eliminates `frontal_keys` (in that order) from the joint factor of `factors`.
/// Separator slots follow `ordering` when given.
pub fn eliminate_cholesky(
    factors: &[&GaussianFactor],
    frontal_keys: &[Key],
    ordering: Option<&Ordering>,
    diagnostics: &mut EliminationDiagnostics,
) -> LinearResult<(GaussianBayesNet, Option<InformationFactor>)> {
    let scatter = Scatter::new(factors.iter().copied(), frontal_keys, ordering)?;
    trace!(
        "eliminating {:?} from {} factors over {} variables",
        frontal_keys,
        factors.len(),
        scatter.len()
    );
    let joint = assemble_joint(factors.iter().copied(), &scatter, diagnostics)?;
    diagnostics.steps += 1;
    joint.eliminate(frontal_keys.len(), diagnostics)
}

/// Eliminate every variable of `graph` along `ordering`.
///
/// Ordering keys touched by no factor are skipped. A graph variable missing from
/// the ordering is an error.
pub fn eliminate_sequential(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
    diagnostics: &mut EliminationDiagnostics,
) -> LinearResult<GaussianBayesNet> {
    let mut pool: Vec<Option<Arc<GaussianFactor>>> = Vec::with_capacity(graph.len());
    let mut index: BTreeMap<Key, BTreeSet<usize>> = BTreeMap::new();
    for factor in graph.iter() {
        if factor.keys().is_empty() {
            continue;
        }
        for &key in factor.keys() {
            if !ordering.contains(key) {
                return Err(LinearError::MissingKey(key).log());
            }
            index.entry(key).or_default().insert(pool.len());
        }
        pool.push(Some(Arc::clone(factor)));
    }

    let mut bayes_net = GaussianBayesNet::new();
    for key in ordering.iter() {
        let involved = index.remove(&key).unwrap_or_default();
        let mut taken = Vec::with_capacity(involved.len());
        for i in involved {
            if let Some(factor) = pool[i].take() {
                for other in factor.keys() {
                    if let Some(set) = index.get_mut(other) {
                        set.remove(&i);
                    }
                }
                taken.push(factor);
            }
        }
        if taken.is_empty() {
            trace!("variable {key} has no factors, skipping");
            continue;
        }

        let refs: Vec<&GaussianFactor> = taken.iter().map(|f| f.as_ref()).collect();
        let (conditionals, remainder) =
            eliminate_cholesky(&refs, &[key], Some(ordering), diagnostics)?;
        bayes_net.append(conditionals);

        if let Some(remainder) = remainder {
            let slot = pool.len();
            for &separator in remainder.keys() {
                index.entry(separator).or_default().insert(slot);
            }
            pool.push(Some(Arc::new(GaussianFactor::Information(remainder))));
        }
    }
    Ok(bayes_net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::{MeasurementFactor, NoiseModel, VectorValues};
    use nalgebra::{DMatrix, dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;
    const TOLERANCE: f64 = 1e-9;

    fn chain_graph() -> LinearResult<GaussianFactorGraph> {
        // prior x0 = 1, x1 - x0 = 2, x2 - x1 = 3
        let mut graph = GaussianFactorGraph::new();
        graph.add(MeasurementFactor::new(
            vec![(0, dmatrix![1.0])],
            dvector![1.0],
            NoiseModel::unit(1),
        )?);
        graph.add(MeasurementFactor::new(
            vec![(0, dmatrix![-1.0]), (1, dmatrix![1.0])],
            dvector![2.0],
            NoiseModel::unit(1),
        )?);
        graph.add(MeasurementFactor::new(
            vec![(1, dmatrix![-1.0]), (2, dmatrix![1.0])],
            dvector![3.0],
            NoiseModel::isotropic(1, 0.1)?,
        )?);
        Ok(graph)
    }

    #[test]
    fn test_sequential_solves_chain() -> TestResult {
        let graph = chain_graph()?;
        let mut diagnostics = EliminationDiagnostics::default();
        let bn = eliminate_sequential(&graph, &Ordering::natural([0, 1, 2]), &mut diagnostics)?;
        assert_eq!(bn.frontals(), vec![0, 1, 2]);
        let x = bn.optimize()?;
        let expected = [1.0, 3.0, 6.0];
        for (key, value) in expected.iter().enumerate() {
            let got = x.get(key).map(|v| v[0]).unwrap_or(f64::NAN);
            assert!((got - value).abs() < TOLERANCE, "x{key} = {got}");
        }
        assert_eq!(diagnostics.steps, 3);
        assert_eq!(diagnostics.eliminated_variables, 3);
        Ok(())
    }

    #[test]
    fn test_reverse_ordering_same_solution() -> TestResult {
        let graph = chain_graph()?;
        let mut diagnostics = EliminationDiagnostics::default();
        let forward = eliminate_sequential(&graph, &Ordering::natural([0, 1, 2]), &mut diagnostics)?
            .optimize()?;
        let reverse = eliminate_sequential(&graph, &Ordering::new(vec![2, 1, 0])?, &mut diagnostics)?
            .optimize()?;
        for key in 0..3 {
            let a = forward.get(key).map(|v| v[0]).unwrap_or(f64::NAN);
            let b = reverse.get(key).map(|v| v[0]).unwrap_or(f64::NAN);
            assert!((a - b).abs() < TOLERANCE);
        }
        Ok(())
    }

    #[test]
    fn test_variable_missing_from_ordering() -> TestResult {
        let graph = chain_graph()?;
        let mut diagnostics = EliminationDiagnostics::default();
        let result = eliminate_sequential(&graph, &Ordering::natural([0, 1]), &mut diagnostics);
        assert!(matches!(result, Err(LinearError::MissingKey(2))));
        Ok(())
    }

    #[test]
    fn test_ordering_key_without_factors_is_skipped() -> TestResult {
        let graph = chain_graph()?;
        let mut diagnostics = EliminationDiagnostics::default();
        let bn = eliminate_sequential(&graph, &Ordering::natural([0, 1, 2, 42]), &mut diagnostics)?;
        assert_eq!(bn.len(), 3);
        Ok(())
    }

    #[test]
    fn test_single_step_remainder_keys() -> TestResult {
        let graph = chain_graph()?;
        let refs: Vec<&GaussianFactor> = graph.iter().map(|f| f.as_ref()).collect();
        let mut diagnostics = EliminationDiagnostics::default();
        let (bn, remainder) = eliminate_cholesky(&refs, &[1], None, &mut diagnostics)?;
        assert_eq!(bn.len(), 1);
        let remainder = remainder.ok_or("expected a remainder factor")?;
        assert_eq!(remainder.keys(), &[0, 2]);
        assert_eq!(diagnostics.max_joint_dim, 4);
        Ok(())
    }

    #[test]
    fn test_underconstrained_graph_is_indeterminant() -> TestResult {
        // only a relative constraint: x0 and x1 float together
        let mut graph = GaussianFactorGraph::new();
        graph.add(MeasurementFactor::new(
            vec![(0, dmatrix![-1.0]), (1, dmatrix![1.0])],
            dvector![1.0],
            NoiseModel::unit(1),
        )?);
        let mut diagnostics = EliminationDiagnostics::default();
        let result = eliminate_sequential(&graph, &Ordering::natural([0, 1]), &mut diagnostics);
        assert!(matches!(
            result,
            Err(LinearError::IndeterminantSystem { key: Some(1) })
        ));
        Ok(())
    }

    #[test]
    fn test_solution_zero_for_zero_rhs() -> TestResult {
        let mut graph = GaussianFactorGraph::new();
        graph.add(MeasurementFactor::new(
            vec![(0, DMatrix::identity(2, 2)), (1, dmatrix![0.5, 0.0; 0.1, 1.0])],
            dvector![0.0, 0.0],
            NoiseModel::unit(2),
        )?);
        graph.add(MeasurementFactor::new(
            vec![(1, DMatrix::identity(2, 2))],
            dvector![0.0, 0.0],
            NoiseModel::unit(2),
        )?);
        let mut diagnostics = EliminationDiagnostics::default();
        let x = eliminate_sequential(&graph, &Ordering::natural([0, 1]), &mut diagnostics)?
            .optimize()?;
        assert!(x.norm() < TOLERANCE);
        assert_eq!(x, VectorValues::zeros([(0, 2), (1, 2)]));
        Ok(())
    }
}
