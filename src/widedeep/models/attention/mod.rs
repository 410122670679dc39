//! Attention layers used by the encoder blocks.

use burn::prelude::*;

/// Self-attention over the token axis of a `[batch, tokens, width]` tensor.
pub trait Attention<B: Backend> {
    /// Returns the attended tokens and the attention weights
    /// `[batch, heads, tokens, tokens]` taken before dropout.
    fn attend(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 4>);
}

pub mod full_attention;
