//! Model components: embeddings, encoder blocks, heads and the composed models.

use burn::prelude::*;

pub mod attention;
pub mod config;
pub mod embeddings;
pub mod init;
pub mod layer;
pub mod mlp;
pub mod transformer;
pub mod wide;
pub mod wide_deep;

/// A model mapping a dense `[batch, columns]` batch to `[batch, output_dim]`.
pub trait TabularModel<B: Backend> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2>;

    fn output_dim(&self) -> usize;

    /// Minimum number of columns an input batch must carry.
    fn input_width(&self) -> usize;
}
