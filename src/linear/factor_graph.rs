use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{
    EliminationDiagnostics, GaussianBayesNet, GaussianFactor, Key, LinearError, LinearResult,
    Ordering, VectorValues, eliminate_sequential,
};
use crate::linalg::{SparseCholeskySolver, SparseSymmetricSystem};

/// A collection of linear factors.
///
/// Factors are shared behind `Arc` so a damped copy of a linearized graph only
/// clones pointers.
#[derive(Debug, Clone, Default)]
pub struct GaussianFactorGraph {
    factors: Vec<Arc<GaussianFactor>>,
}

impl GaussianFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            factors: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, factor: impl Into<GaussianFactor>) {
        self.factors.push(Arc::new(factor.into()));
    }

    pub fn add_shared(&mut self, factor: Arc<GaussianFactor>) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GaussianFactor>> {
        self.factors.iter()
    }

    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .collect()
    }

    /// Dimension of every variable, checked for consistency across factors.
    pub fn key_dims(&self) -> LinearResult<BTreeMap<Key, usize>> {
        let mut dims = BTreeMap::new();
        for factor in &self.factors {
            for (&key, dim) in factor.keys().iter().zip(factor.dims()) {
                if let Some(known) = dims.insert(key, dim)
                    && known != dim
                {
                    return Err(LinearError::Dimension(format!(
                        "variable {key} has dimensions {known} and {dim}"
                    ))
                    .log());
                }
            }
        }
        Ok(dims)
    }

    /// Total cost at `x`.
    pub fn error(&self, x: &VectorValues) -> LinearResult<f64> {
        let mut total = 0.0;
        for factor in &self.factors {
            total += factor.error(x)?;
        }
        Ok(total)
    }

    /// Diagonal of the summed information matrix, per variable.
    pub fn hessian_diagonal(&self) -> LinearResult<VectorValues> {
        let mut diagonal: BTreeMap<Key, DVector<f64>> = BTreeMap::new();
        for factor in &self.factors {
            let information = factor.to_information()?;
            for (key, d) in information.hessian_diagonal() {
                match diagonal.get_mut(&key) {
                    Some(sum) if sum.len() == d.len() => *sum += d,
                    Some(sum) => {
                        return Err(LinearError::Dimension(format!(
                            "variable {key} has dimensions {} and {}",
                            sum.len(),
                            d.len()
                        ))
                        .log());
                    }
                    None => {
                        diagonal.insert(key, d);
                    }
                }
            }
        }
        Ok(diagonal.into_iter().collect())
    }

    fn layout(&self, ordering: &Ordering) -> LinearResult<Vec<(Key, usize)>> {
        let dims = self.key_dims()?;
        if let Some(&missing) = dims.keys().find(|k| !ordering.contains(**k)) {
            return Err(LinearError::MissingKey(missing).log());
        }
        Ok(ordering
            .iter()
            .filter_map(|k| dims.get(&k).map(|&d| (k, d)))
            .collect())
    }

    /// Sum of all factors as one sparse system `G x = g` laid out by `ordering`.
    pub fn sparse_system(
        &self,
        ordering: &Ordering,
    ) -> LinearResult<(SparseSymmetricSystem, Vec<(Key, usize)>)> {
        let layout = self.layout(ordering)?;
        let mut offsets = BTreeMap::new();
        let mut total = 0;
        for &(key, dim) in &layout {
            offsets.insert(key, total);
            total += dim;
        }

        let mut system = SparseSymmetricSystem::new(total);
        for factor in &self.factors {
            let information = factor.to_information()?;
            let matrix = information.matrix();
            let keys = information.keys();
            let constant = keys.len();
            for (i, ki) in keys.iter().enumerate() {
                let oi = offsets[ki];
                system.add_block(oi, oi, &matrix.symmetric_block(i, i).as_view())?;
                for (j, kj) in keys.iter().enumerate().skip(i + 1) {
                    system.add_block(oi, offsets[kj], &matrix.block(i, j))?;
                }
                let g: DVector<f64> = matrix.block(i, constant).column(0).into_owned();
                system.add_rhs(oi, &g)?;
            }
        }
        Ok((system, layout))
    }

    /// Dense `(G, g)` of the whole graph with variables stacked in `ordering`.
    pub fn joint_information(
        &self,
        ordering: &Ordering,
    ) -> LinearResult<(DMatrix<f64>, DVector<f64>)> {
        let (system, _) = self.sparse_system(ordering)?;
        Ok((system.to_dense(), system.rhs().clone()))
    }

    /// Eliminate along `ordering` into a Bayes net.
    pub fn eliminate(
        &self,
        ordering: &Ordering,
        diagnostics: &mut EliminationDiagnostics,
    ) -> LinearResult<GaussianBayesNet> {
        eliminate_sequential(self, ordering, diagnostics)
    }

    /// Minimizer of the total cost by sequential elimination and back-substitution.
    pub fn optimize(
        &self,
        ordering: &Ordering,
        diagnostics: &mut EliminationDiagnostics,
    ) -> LinearResult<VectorValues> {
        self.eliminate(ordering, diagnostics)?.optimize()
    }

    /// Minimizer of the total cost through one global sparse Cholesky solve.
    ///
    /// A non-positive-definite system is reported as indeterminant, like the
    /// sequential path.
    pub fn optimize_sparse_cholesky(
        &self,
        ordering: &Ordering,
        solver: &mut SparseCholeskySolver,
    ) -> LinearResult<VectorValues> {
        let (system, layout) = self.sparse_system(ordering)?;
        let solution = solver.solve(&system).map_err(|e| {
            if e.is_indefinite() {
                LinearError::IndeterminantSystem { key: None }
            } else {
                LinearError::from(e)
            }
        })?;
        VectorValues::from_vector(&layout, &solution)
    }
}

impl FromIterator<GaussianFactor> for GaussianFactorGraph {
    fn from_iter<I: IntoIterator<Item = GaussianFactor>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::{InformationFactor, MeasurementFactor, NoiseModel};
    use nalgebra::{dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;
    const TOLERANCE: f64 = 1e-9;

    fn mixed_graph() -> LinearResult<GaussianFactorGraph> {
        let mut graph = GaussianFactorGraph::new();
        graph.add(MeasurementFactor::new(
            vec![(0, DMatrix::identity(2, 2))],
            dvector![1.0, -2.0],
            NoiseModel::diagonal(dvector![0.5, 2.0])?,
        )?);
        graph.add(MeasurementFactor::new(
            vec![(0, dmatrix![-1.0, 0.0; 0.0, -1.0]), (1, dmatrix![1.0, 0.2; 0.0, 1.0])],
            dvector![0.3, 0.4],
            NoiseModel::unit(2),
        )?);
        graph.add(InformationFactor::binary(
            1,
            2,
            dmatrix![2.0, 0.1; 0.1, 1.0],
            dmatrix![0.3; -0.2],
            dmatrix![1.5],
            dvector![0.5, -0.5],
            dvector![1.0],
            2.0,
        )?);
        Ok(graph)
    }

    #[test]
    fn test_sparse_and_sequential_agree() -> TestResult {
        let graph = mixed_graph()?;
        let ordering = Ordering::natural(graph.keys());
        let mut diagnostics = EliminationDiagnostics::default();
        let sequential = graph.optimize(&ordering, &mut diagnostics)?;
        let mut solver = SparseCholeskySolver::new();
        let sparse = graph.optimize_sparse_cholesky(&ordering, &mut solver)?;
        for key in graph.keys() {
            let a = sequential.get(key).ok_or("missing in sequential")?;
            let b = sparse.get(key).ok_or("missing in sparse")?;
            assert!((a - b).norm() < TOLERANCE, "variable {key}: {a} vs {b}");
        }
        Ok(())
    }

    #[test]
    fn test_solution_minimizes_error() -> TestResult {
        let graph = mixed_graph()?;
        let ordering = Ordering::natural(graph.keys());
        let mut diagnostics = EliminationDiagnostics::default();
        let x = graph.optimize(&ordering, &mut diagnostics)?;
        let best = graph.error(&x)?;
        let mut nudge = VectorValues::zeros([(0, 2), (1, 2), (2, 1)]);
        nudge.insert(1, dvector![1e-3, -1e-3]);
        assert!(graph.error(&x.add(&nudge)?)? > best);
        Ok(())
    }

    #[test]
    fn test_hessian_diagonal_sums_factors() -> TestResult {
        let graph = mixed_graph()?;
        let diagonal = graph.hessian_diagonal()?;
        // 1/0.25 + 1 and 1/4 + 1 on x0
        let d0 = diagonal.get(0).ok_or("x0 missing")?;
        assert!((d0 - dvector![5.0, 1.25]).norm() < TOLERANCE);
        // 1 + 2 and 0.04 + 1 + 1 on x1
        let d1 = diagonal.get(1).ok_or("x1 missing")?;
        assert!((d1 - dvector![3.0, 2.04]).norm() < TOLERANCE);
        let d2 = diagonal.get(2).ok_or("x2 missing")?;
        assert!((d2 - dvector![1.5]).norm() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_joint_information_solution_matches() -> TestResult {
        let graph = mixed_graph()?;
        let ordering = Ordering::natural(graph.keys());
        let (g_mat, g_vec) = graph.joint_information(&ordering)?;
        assert_eq!(g_mat.nrows(), 5);
        assert!((&g_mat - g_mat.transpose()).abs().max() < TOLERANCE);
        let dense = g_mat.cholesky().ok_or("joint information not positive definite")?;
        let stacked = dense.solve(&g_vec);
        let mut diagnostics = EliminationDiagnostics::default();
        let x = graph.optimize(&ordering, &mut diagnostics)?;
        assert!((x.vector(ordering.keys())? - stacked).norm() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_key_dims_conflict() -> TestResult {
        let mut graph = GaussianFactorGraph::new();
        graph.add(InformationFactor::unary(0, dmatrix![1.0], dvector![0.0], 0.0)?);
        graph.add(InformationFactor::unary(0, DMatrix::identity(2, 2), dvector![0.0, 0.0], 0.0)?);
        assert!(matches!(graph.key_dims(), Err(LinearError::Dimension(_))));
        Ok(())
    }

    #[test]
    fn test_sparse_singular_is_indeterminant() -> TestResult {
        let mut graph = GaussianFactorGraph::new();
        graph.add(MeasurementFactor::new(
            vec![(0, dmatrix![1.0]), (1, dmatrix![-1.0])],
            dvector![0.0],
            NoiseModel::unit(1),
        )?);
        let mut solver = SparseCholeskySolver::new();
        let result = graph.optimize_sparse_cholesky(&Ordering::natural([0, 1]), &mut solver);
        assert!(matches!(
            result,
            Err(LinearError::IndeterminantSystem { key: None })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_ordering_key() -> TestResult {
        let graph = mixed_graph()?;
        let mut solver = SparseCholeskySolver::new();
        assert!(matches!(
            graph.optimize_sparse_cholesky(&Ordering::natural([0, 1]), &mut solver),
            Err(LinearError::MissingKey(2))
        ));
        Ok(())
    }
}
