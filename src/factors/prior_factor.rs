use super::Factor;
use nalgebra::{DMatrix, DVector};

/// Unary factor pulling one variable towards a known value.
///
/// Anchors the gauge of a problem: a graph of relative factors alone leaves the
/// information matrix singular.
///
/// ```
/// use apex_hessian::factors::{Factor, PriorFactor};
/// use nalgebra::dvector;
///
/// let prior = PriorFactor { data: dvector![1.0, 2.0] };
/// let (residual, jacobian) = prior.linearize(&[dvector![1.5, 2.25]], true);
/// assert_eq!(residual, dvector![0.5, 0.25]);
/// assert!(jacobian.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct PriorFactor {
    pub data: DVector<f64>,
}

impl Factor for PriorFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let residual = &params[0] - &self.data;
        let n = residual.len();
        (residual, compute_jacobian.then(|| DMatrix::identity(n, n)))
    }

    fn get_dimension(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_residual_without_jacobian() {
        let prior = PriorFactor {
            data: dvector![3.0],
        };
        let (residual, jacobian) = prior.linearize(&[dvector![1.0]], false);
        assert_eq!(residual, dvector![-2.0]);
        assert!(jacobian.is_none());
        assert_eq!(prior.get_dimension(), 1);
    }
}
