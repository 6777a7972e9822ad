use std::collections::BTreeSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::{CoreResult, ResidualBlock, Values};
use crate::factors::Factor;
use crate::linear::{GaussianFactorGraph, Key, MeasurementFactor, NoiseModel};

/// The residual blocks of a nonlinear least-squares problem.
///
/// Cost is `Σ 0.5·‖rᵢ(x)‖²_Σᵢ`. Blocks are evaluated independently, in parallel
/// when the `parallel` feature is enabled.
#[derive(Default)]
pub struct NonlinearFactorGraph {
    residual_blocks: Vec<ResidualBlock>,
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a residual block and return its index.
    pub fn add_residual_block(
        &mut self,
        keys: &[Key],
        factor: Box<dyn Factor + Send + Sync>,
        noise_model: NoiseModel,
    ) -> usize {
        self.residual_blocks
            .push(ResidualBlock::new(keys, factor, noise_model));
        self.residual_blocks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.residual_blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residual_blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResidualBlock> {
        self.residual_blocks.iter()
    }

    pub fn keys(&self) -> BTreeSet<Key> {
        self.residual_blocks
            .iter()
            .flat_map(|b| b.keys.iter().copied())
            .collect()
    }

    /// Total cost at `values`.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        #[cfg(feature = "parallel")]
        let errors: CoreResult<Vec<f64>> = self
            .residual_blocks
            .par_iter()
            .map(|block| block.error(values))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let errors: CoreResult<Vec<f64>> = self
            .residual_blocks
            .iter()
            .map(|block| block.error(values))
            .collect();

        Ok(errors?.into_iter().sum())
    }

    /// Linearize every block at `values`, preserving block order.
    pub fn linearize(&self, values: &Values) -> CoreResult<GaussianFactorGraph> {
        #[cfg(feature = "parallel")]
        let factors: CoreResult<Vec<MeasurementFactor>> = self
            .residual_blocks
            .par_iter()
            .map(|block| block.linearize(values))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let factors: CoreResult<Vec<MeasurementFactor>> = self
            .residual_blocks
            .iter()
            .map(|block| block.linearize(values))
            .collect();

        let factors = factors?;
        let mut graph = GaussianFactorGraph::with_capacity(factors.len());
        for factor in factors {
            graph.add(factor);
        }
        Ok(graph)
    }
}
