//! Gaussian conditionals produced by elimination and the Bayes net that chains them.

use nalgebra::{DMatrix, DVector};

use super::{Key, LinearError, LinearResult, VectorValues};

/// `R·x_f + Σ Sₖ·xₖ = d` for one frontal variable `x_f` given its parents `xₖ`.
///
/// `R` is upper triangular. Parents are variables eliminated after the frontal
/// (or never eliminated), so a Bayes net can be solved back to front.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianConditional {
    frontal: Key,
    r: DMatrix<f64>,
    parents: Vec<(Key, DMatrix<f64>)>,
    d: DVector<f64>,
    sigmas: DVector<f64>,
}

impl GaussianConditional {
    pub fn new(
        frontal: Key,
        r: DMatrix<f64>,
        parents: Vec<(Key, DMatrix<f64>)>,
        d: DVector<f64>,
        sigmas: DVector<f64>,
    ) -> LinearResult<Self> {
        let n = r.nrows();
        if r.ncols() != n || d.len() != n || sigmas.len() != n {
            return Err(LinearError::Dimension(format!(
                "conditional on {frontal}: R is {}x{}, d has {} and sigmas {} entries",
                r.nrows(),
                r.ncols(),
                d.len(),
                sigmas.len()
            ))
            .log());
        }
        for (key, s) in &parents {
            if s.nrows() != n {
                return Err(LinearError::Dimension(format!(
                    "parent {key} of {frontal} has {} rows, expected {n}",
                    s.nrows()
                ))
                .log());
            }
        }
        Ok(Self {
            frontal,
            r,
            parents,
            d,
            sigmas,
        })
    }

    pub fn frontal(&self) -> Key {
        self.frontal
    }

    pub fn dim(&self) -> usize {
        self.d.len()
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn parents(&self) -> &[(Key, DMatrix<f64>)] {
        &self.parents
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Solve for the frontal given values of all parents.
    pub fn solve(&self, parents: &VectorValues) -> LinearResult<DVector<f64>> {
        let mut rhs = self.d.clone();
        for (key, s) in &self.parents {
            let xk = parents.get(*key).ok_or(LinearError::MissingKey(*key))?;
            if xk.len() != s.ncols() {
                return Err(LinearError::Dimension(format!(
                    "parent {key} has dimension {}, conditional expects {}",
                    xk.len(),
                    s.ncols()
                ))
                .log());
            }
            rhs -= s * xk;
        }
        self.r
            .solve_upper_triangular(&rhs)
            .filter(|x| x.iter().all(|v| v.is_finite()))
            .ok_or(LinearError::IndeterminantSystem {
                key: Some(self.frontal),
            })
    }
}

/// Conditionals in elimination order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
}

impl GaussianBayesNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conditional: GaussianConditional) {
        self.conditionals.push(conditional);
    }

    pub fn append(&mut self, other: GaussianBayesNet) {
        self.conditionals.extend(other.conditionals);
    }

    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GaussianConditional> {
        self.conditionals.iter()
    }

    /// Frontal keys in elimination order.
    pub fn frontals(&self) -> Vec<Key> {
        self.conditionals.iter().map(|c| c.frontal).collect()
    }

    /// Back-substitute from the last eliminated variable to the first.
    pub fn optimize(&self) -> LinearResult<VectorValues> {
        let mut solution = VectorValues::new();
        for conditional in self.conditionals.iter().rev() {
            let x = conditional.solve(&solution)?;
            solution.insert(conditional.frontal, x);
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;
    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_two_variable_chain() -> TestResult {
        // 2·x0 + 1·x1 = 4, 1·x1 = 2  ->  x1 = 2, x0 = 1
        let mut bn = GaussianBayesNet::new();
        bn.push(GaussianConditional::new(
            0,
            dmatrix![2.0],
            vec![(1, dmatrix![1.0])],
            dvector![4.0],
            dvector![1.0],
        )?);
        bn.push(GaussianConditional::new(
            1,
            dmatrix![1.0],
            vec![],
            dvector![2.0],
            dvector![1.0],
        )?);
        let x = bn.optimize()?;
        assert!((x.get(0).map(|v| v[0]).unwrap_or(f64::NAN) - 1.0).abs() < TOLERANCE);
        assert!((x.get(1).map(|v| v[0]).unwrap_or(f64::NAN) - 2.0).abs() < TOLERANCE);
        assert_eq!(bn.frontals(), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_zero_diagonal_is_indeterminant() -> TestResult {
        let c = GaussianConditional::new(
            3,
            dmatrix![1.0, 1.0; 0.0, 0.0],
            vec![],
            dvector![1.0, 1.0],
            dvector![1.0, 1.0],
        )?;
        assert!(matches!(
            c.solve(&VectorValues::new()),
            Err(LinearError::IndeterminantSystem { key: Some(3) })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_parent() -> TestResult {
        let c = GaussianConditional::new(
            0,
            dmatrix![1.0],
            vec![(5, dmatrix![1.0])],
            dvector![1.0],
            dvector![1.0],
        )?;
        assert!(matches!(
            c.solve(&VectorValues::new()),
            Err(LinearError::MissingKey(5))
        ));
        Ok(())
    }

    #[test]
    fn test_shape_validation() {
        let result = GaussianConditional::new(
            0,
            dmatrix![1.0, 0.0; 0.0, 1.0],
            vec![(1, dmatrix![1.0])],
            dvector![0.0, 0.0],
            dvector![1.0, 1.0],
        );
        assert!(matches!(result, Err(LinearError::Dimension(_))));
    }
}
