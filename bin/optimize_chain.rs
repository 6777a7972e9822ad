use web_time::Instant;

use apex_hessian::core::{NonlinearFactorGraph, Values};
use apex_hessian::factors::{BetweenFactor, PriorFactor};
use apex_hessian::init_logger;
use apex_hessian::linalg::LinearSolverType;
use apex_hessian::linear::NoiseModel;
use apex_hessian::observers::HistoryObserver;
use apex_hessian::optimizer::{
    GaussNewtonConfig, GaussNewtonOptimizer, LevenbergMarquardtConfig,
    LevenbergMarquardtOptimizer, NonlinearOptimizer, OptimizerType, SolverResult,
};
use apex_hessian::ApexHessianResult;
use clap::{Parser, ValueEnum};
use nalgebra::dvector;
use tracing::{error, info};

#[derive(Clone, Copy, ValueEnum)]
enum SolverArg {
    Sequential,
    Sparse,
}

#[derive(Clone, Copy, ValueEnum)]
enum OptimizerArg {
    /// Levenberg-Marquardt
    Lm,
    /// Gauss-Newton
    Gn,
}

#[derive(Parser)]
#[command(name = "optimize_chain")]
#[command(about = "Optimize a synthetic planar pose chain with loop closures")]
struct Args {
    /// Number of poses in the chain
    #[arg(short, long, default_value = "500")]
    poses: usize,

    /// Maximum number of optimization iterations
    #[arg(short, long, default_value = "100")]
    max_iterations: usize,

    /// Initial damping
    #[arg(long, default_value = "1e-5")]
    lambda_initial: f64,

    /// Initial damping multiplier
    #[arg(long, default_value = "10")]
    lambda_factor: f64,

    /// Keep the damping multiplier constant on rejections
    #[arg(long)]
    fixed_lambda_factor: bool,

    /// Scale the damping by the information diagonal
    #[arg(long)]
    diagonal_damping: bool,

    /// Linear solver backend
    #[arg(short, long, value_enum, default_value = "sequential")]
    solver: SolverArg,

    /// Optimization algorithm
    #[arg(short, long, value_enum, default_value = "lm")]
    optimizer: OptimizerArg,

    /// Amplitude of the deterministic perturbation applied to the ground truth
    #[arg(long, default_value = "0.5")]
    noise: f64,
}

/// Chain of 2D positions moving (1, 0.25) per step, with a loop closure every
/// 25 poses. Returns the graph, the perturbed start and the ground truth.
fn build_problem(args: &Args) -> ApexHessianResult<(NonlinearFactorGraph, Values, Values)> {
    let step = dvector![1.0, 0.25];
    let mut graph = NonlinearFactorGraph::new();
    graph.add_residual_block(
        &[0],
        Box::new(PriorFactor {
            data: dvector![0.0, 0.0],
        }),
        NoiseModel::isotropic(2, 0.01)?,
    );
    let odometry_noise = NoiseModel::diagonal(dvector![0.1, 0.05])?;
    let closure_noise = NoiseModel::isotropic(2, 0.2)?;
    for i in 1..args.poses {
        graph.add_residual_block(
            &[i - 1, i],
            Box::new(BetweenFactor::new(step.clone())),
            odometry_noise.clone(),
        );
        if i >= 25 && i % 25 == 0 {
            graph.add_residual_block(
                &[i - 25, i],
                Box::new(BetweenFactor::new(&step * 25.0)),
                closure_noise.clone(),
            );
        }
    }

    let truth: Values = (0..args.poses)
        .map(|i| (i, &step * i as f64))
        .collect();
    let initial = truth
        .iter()
        .map(|(key, value)| {
            let t = key as f64;
            let offset = dvector![(0.7 * t).sin(), (1.3 * t).cos()] * args.noise;
            (key, value + offset)
        })
        .collect();
    Ok((graph, initial, truth))
}

fn run(args: &Args) -> ApexHessianResult<SolverResult> {
    let (graph, initial, truth) = build_problem(args)?;
    let solver = match args.solver {
        SolverArg::Sequential => LinearSolverType::SequentialCholesky,
        SolverArg::Sparse => LinearSolverType::SparseCholesky,
    };
    let optimizer_type = match args.optimizer {
        OptimizerArg::Lm => OptimizerType::LevenbergMarquardt,
        OptimizerArg::Gn => OptimizerType::GaussNewton,
    };
    info!(
        "{} poses, {} factors, {} with {}",
        args.poses,
        graph.len(),
        optimizer_type,
        solver
    );

    let history = HistoryObserver::new();
    let start = Instant::now();
    let result = match optimizer_type {
        OptimizerType::LevenbergMarquardt => {
            let config = LevenbergMarquardtConfig::new()
                .with_max_iterations(args.max_iterations)
                .with_lambda_initial(args.lambda_initial)
                .with_lambda_factor(args.lambda_factor)
                .with_fixed_lambda_factor(args.fixed_lambda_factor)
                .with_diagonal_damping(args.diagonal_damping)
                .with_linear_solver_type(solver);
            let mut optimizer = LevenbergMarquardtOptimizer::new(graph, initial, config)?;
            optimizer.add_observer(history.clone());
            optimizer.optimize()?
        }
        OptimizerType::GaussNewton => {
            let config = GaussNewtonConfig::new()
                .with_max_iterations(args.max_iterations)
                .with_linear_solver_type(solver);
            let mut optimizer = GaussNewtonOptimizer::new(graph, initial, config)?;
            optimizer.add_observer(history.clone());
            optimizer.optimize()?
        }
    };
    let elapsed = start.elapsed();

    for record in history.records()? {
        let lambda = record
            .lambda
            .map_or_else(|| "-".to_string(), |l| format!("{l:.2e}"));
        info!(
            "iter {:>3}  error {:>12.6e}  lambda {:>9}  |delta| {:>9.2e}",
            record.iteration, record.error, lambda, record.step_norm
        );
    }

    let max_deviation = truth
        .iter()
        .filter_map(|(key, expected)| result.values.get(key).map(|v| (v - expected).norm()))
        .fold(0.0, f64::max);
    info!("status:           {}", result.status);
    info!(
        "error:            {:.6e} -> {:.6e}",
        result.initial_error, result.final_error
    );
    info!(
        "iterations:       {} outer, {} linear solves",
        result.iterations, result.inner_iterations
    );
    info!("max deviation:    {max_deviation:.3e}");
    info!("time:             {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    Ok(result)
}

fn main() {
    init_logger();
    let args = Args::parse();
    if args.poses < 2 {
        error!("need at least 2 poses, got {}", args.poses);
        std::process::exit(2);
    }
    if let Err(e) = run(&args) {
        error!("optimization failed: {}", e.chain_compact());
        std::process::exit(1);
    }
}
