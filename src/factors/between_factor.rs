use super::Factor;
use nalgebra::{DMatrix, DVector};

/// Relative measurement between two variables of the same dimension.
///
/// ```text
/// r = (x₂ − x₁) − z        J = [ −I  I ]
/// ```
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    pub measurement: DVector<f64>,
}

impl BetweenFactor {
    pub fn new(measurement: DVector<f64>) -> Self {
        Self { measurement }
    }
}

impl Factor for BetweenFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let residual = &params[1] - &params[0] - &self.measurement;
        let n = residual.len();
        let jacobian = compute_jacobian.then(|| {
            let mut j = DMatrix::zeros(n, 2 * n);
            j.view_mut((0, 0), (n, n)).fill_diagonal(-1.0);
            j.view_mut((0, n), (n, n)).fill_diagonal(1.0);
            j
        });
        (residual, jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.measurement.len()
    }
}
