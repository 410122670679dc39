//! Standard scaled dot-product multi-head attention.

use burn::module::{Ignored, Module};
use burn::nn::{Dropout, DropoutConfig};
use burn::prelude::*;
use burn::tensor::activation;

use super::Attention;
use crate::widedeep::models::init::{RngContext, SeededLinear};

#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    q_proj: SeededLinear<B>,
    /// Keys and values stacked on the output axis, `[2 * width, width]`
    kv_proj: SeededLinear<B>,
    out_proj: SeededLinear<B>,
    dropout: Dropout,
    n_heads: Ignored<usize>,
}

impl<B: Backend> MultiHeadAttention<B> {
    /// `width` must be a multiple of `n_heads`.
    pub fn new(width: usize, n_heads: usize, dropout: f64, rng: &RngContext<B>) -> Self {
        debug_assert!(n_heads > 0 && width % n_heads == 0);
        Self {
            q_proj: rng.linear(width, width, true, 0),
            kv_proj: rng.linear(width, 2 * width, true, 1),
            out_proj: rng.linear(width, width, true, 2),
            dropout: DropoutConfig::new(dropout).init(),
            n_heads: Ignored(n_heads),
        }
    }

    pub fn n_heads(&self) -> usize {
        *self.n_heads
    }

    /// `[batch, tokens, width]` -> `[batch, heads, tokens, head_dim]`
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, tokens, width] = x.dims();
        let heads = self.n_heads();
        x.reshape([batch, tokens, heads, width / heads]).swap_dims(1, 2)
    }
}

impl<B: Backend> Attention<B> for MultiHeadAttention<B> {
    fn attend(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let [batch, tokens, width] = x.dims();
        let head_dim = width / self.n_heads();

        let q = self.split_heads(self.q_proj.forward(x.clone()));
        let kv = self.kv_proj.forward(x);
        let k = self.split_heads(kv.clone().narrow(2, 0, width));
        let v = self.split_heads(kv.narrow(2, width, width));

        let scores = q.matmul(k.swap_dims(2, 3)) * (1.0 / (head_dim as f64).sqrt());
        let weights = activation::softmax(scores, 3);

        let attended = self
            .dropout
            .forward(weights.clone())
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, width]);

        (self.out_proj.forward(attended), weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn input(batch: usize, tokens: usize, width: usize) -> Tensor<TestBackend, 3> {
        let data: Vec<f32> = (0..batch * tokens * width)
            .map(|i| (i as f32 * 0.01).sin())
            .collect();
        Tensor::from_data(TensorData::new(data, [batch, tokens, width]), &Default::default())
    }

    #[test]
    fn test_attention_shapes() {
        let rng = RngContext::<TestBackend>::new(42, Default::default());
        let attn = MultiHeadAttention::new(16, 4, 0.1, &rng);

        let (out, weights) = attn.attend(input(3, 5, 16));
        assert_eq!(out.dims(), [3, 5, 16]);
        assert_eq!(weights.dims(), [3, 4, 5, 5]);
        println!("✓ attention output and weight shapes");
    }

    #[test]
    fn test_attention_weights_are_distributions() {
        let rng = RngContext::<TestBackend>::new(42, Default::default());
        let attn = MultiHeadAttention::new(8, 2, 0.0, &rng);

        let (_, weights) = attn.attend(input(2, 4, 8));
        let row_sums: Vec<f32> = weights.sum_dim(3).into_data().to_vec().unwrap();
        for sum in row_sums {
            assert!((sum - 1.0).abs() < 1e-5, "softmax row sums to {sum}");
        }
    }
}
