//! Elimination and optimizer benchmarks on synthetic planar chains.
//!
//! ## Usage
//!
//! ```bash
//! cargo bench --bench elimination
//! ```
//!
//! ## Groups
//!
//! - **linearize_eliminate**: one linearization followed by sequential elimination
//!   and back-substitution, for chains of increasing length
//! - **solve_backend**: the same damped system solved by sequential elimination
//!   and by the faer sparse Cholesky
//! - **levenberg_marquardt**: a full optimization from a perturbed start

use apex_hessian::core::{NonlinearFactorGraph, Values};
use apex_hessian::factors::{BetweenFactor, PriorFactor};
use apex_hessian::linalg::{LinearSolverType, SparseCholeskySolver};
use apex_hessian::linear::{EliminationDiagnostics, NoiseModel, Ordering};
use apex_hessian::optimizer::{
    LevenbergMarquardtConfig, LevenbergMarquardtOptimizer, NonlinearOptimizer,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::dvector;
use std::hint::black_box;

const CHAIN_LENGTHS: [usize; 3] = [100, 1_000, 5_000];

/// Planar chain with loop closures every 10 poses, and a perturbed start.
fn planar_problem(n: usize) -> (NonlinearFactorGraph, Values) {
    let mut graph = NonlinearFactorGraph::new();
    graph.add_residual_block(
        &[0],
        Box::new(PriorFactor {
            data: dvector![0.0, 0.0],
        }),
        NoiseModel::unit(2),
    );
    for i in 1..n {
        graph.add_residual_block(
            &[i - 1, i],
            Box::new(BetweenFactor::new(dvector![1.0, 0.0])),
            NoiseModel::unit(2),
        );
        if i >= 10 && i % 10 == 0 {
            graph.add_residual_block(
                &[i - 10, i],
                Box::new(BetweenFactor::new(dvector![10.0, 0.0])),
                NoiseModel::unit(2),
            );
        }
    }
    let initial = (0..n)
        .map(|i| {
            let t = i as f64;
            (i, dvector![t + 0.1 * (0.37 * t).sin(), 0.2 * (0.11 * t).cos()])
        })
        .collect();
    (graph, initial)
}

fn bench_linearize_eliminate(c: &mut Criterion) {
    let mut group = c.benchmark_group("linearize_eliminate");
    for n in CHAIN_LENGTHS {
        let (graph, initial) = planar_problem(n);
        let ordering = Ordering::natural(initial.keys());
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut diagnostics = EliminationDiagnostics::default();
                let linear = graph.linearize(&initial).ok();
                let solution =
                    linear.and_then(|l| l.optimize(&ordering, &mut diagnostics).ok());
                black_box(solution)
            })
        });
    }
    group.finish();
}

fn bench_solve_backend(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_backend");
    let (graph, initial) = planar_problem(1_000);
    let ordering = Ordering::natural(initial.keys());
    let Ok(linear) = graph.linearize(&initial) else {
        return;
    };

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut diagnostics = EliminationDiagnostics::default();
            black_box(linear.optimize(&ordering, &mut diagnostics).ok())
        })
    });
    group.bench_function("sparse", |b| {
        let mut solver = SparseCholeskySolver::new();
        b.iter(|| black_box(linear.optimize_sparse_cholesky(&ordering, &mut solver).ok()))
    });
    group.finish();
}

fn bench_levenberg_marquardt(c: &mut Criterion) {
    let mut group = c.benchmark_group("levenberg_marquardt");
    group.sample_size(10);
    for solver in [
        LinearSolverType::SequentialCholesky,
        LinearSolverType::SparseCholesky,
    ] {
        let (_, initial) = planar_problem(1_000);
        let config = LevenbergMarquardtConfig::new()
            .with_linear_solver_type(solver)
            .with_max_iterations(20);
        group.bench_function(solver.to_string(), |b| {
            b.iter_batched(
                || (planar_problem(1_000).0, initial.clone()),
                |(graph, initial)| {
                    LevenbergMarquardtOptimizer::new(graph, initial, config.clone())
                        .and_then(|mut optimizer| optimizer.optimize())
                        .ok()
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_linearize_eliminate,
    bench_solve_backend,
    bench_levenberg_marquardt
);
criterion_main!(benches);
