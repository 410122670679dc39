//! Seeded parameter construction.
//!
//! Every trainable tensor in the crate is drawn from a [`RngContext`] so that
//! two models built from the same configuration and seed are identical.
//!
//! Each component draws from its own seed offset range. Ranges never overlap,
//! so no two components start from the same random stream:
//! - [`categorical_seed`]: two offsets per categorical column
//! - [`continuous_seed`]: one offset per continuous column
//! - [`block_seed`]: one `BLOCK_SEED_STRIDE` wide range per encoder block
//! - [`HEAD_SEED`]: output head layers, above every block range
//! - [`WIDE_SEED`], [`WIDE_DEEP_HEAD_SEED`]: wide component and the Wide & Deep head

use burn::{
    module::{Ignored, Module, Param},
    tensor::{Int, Tensor, TensorData, backend::Backend},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

pub const CATEGORICAL_SEED: u64 = 1 << 16;
pub const CONTINUOUS_SEED: u64 = 1 << 17;
pub const BLOCK_SEED_STRIDE: u64 = 1 << 20;
pub const HEAD_SEED: u64 = 1 << 40;
pub const WIDE_SEED: u64 = 1 << 41;
pub const WIDE_DEEP_HEAD_SEED: u64 = WIDE_SEED + BLOCK_SEED_STRIDE;

/// Offset of categorical column `column`; the column may use this offset and the next.
pub fn categorical_seed(column: usize) -> u64 {
    CATEGORICAL_SEED + 2 * column as u64
}

pub fn continuous_seed(column: usize) -> u64 {
    CONTINUOUS_SEED + column as u64
}

/// Start of encoder block `block`'s range.
pub fn block_seed(block: usize) -> u64 {
    BLOCK_SEED_STRIDE * (block as u64 + 1)
}

/// Linear layer whose weights are supplied at construction.
///
/// Weight layout is `[output_dim, input_dim]`.
#[derive(Module, Debug)]
pub struct SeededLinear<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> SeededLinear<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.val().dims()[0]
    }

    /// Applies the projection to the last dimension of `input`.
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let mut dims = input.dims();
        let input_dim = dims[D - 1];
        let rows: usize = dims[..D - 1].iter().product();

        let output = input
            .reshape([rows, input_dim])
            .matmul(self.weight.val().transpose());
        let output = match &self.bias {
            Some(bias) => output + bias.val().unsqueeze::<2>(),
            None => output,
        };

        dims[D - 1] = self.output_dim();
        output.reshape(dims)
    }
}

/// Lookup table with weights supplied at construction.
///
/// With a padding index, lookups of that row always return zeros and the row
/// receives no gradient.
#[derive(Module, Debug)]
pub struct SeededEmbedding<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    padding_idx: Ignored<Option<usize>>,
}

impl<B: Backend> SeededEmbedding<B> {
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            padding_idx: Ignored(None),
        }
    }

    pub fn with_padding_idx(mut self, padding_idx: usize) -> Self {
        self.padding_idx = Ignored(Some(padding_idx));
        self
    }

    pub fn padding_idx(&self) -> Option<usize> {
        *self.padding_idx
    }

    /// `[num_embeddings, embedding_dim]`
    pub fn dims(&self) -> [usize; 2] {
        self.weight.val().dims()
    }

    /// `[n]` indices to `[n, embedding_dim]` rows.
    pub fn forward(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let rows = self.weight.val().select(0, indices.clone());
        match *self.padding_idx {
            Some(pad) => {
                let keep = indices.not_equal_elem(pad as i64).float().unsqueeze_dim::<2>(1);
                rows * keep
            }
            None => rows,
        }
    }

    /// `[batch, cols]` indices to `[batch, cols, embedding_dim]`.
    pub fn forward_2d(&self, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, cols] = indices.dims();
        let [_, dim] = self.dims();
        self.forward(indices.reshape([batch * cols]))
            .reshape([batch, cols, dim])
    }
}

/// Seeded source of initial parameter values.
#[derive(Debug, Clone)]
pub struct RngContext<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> RngContext<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Context for a sub-component, seeded at `seed + offset`.
    pub fn fork(&self, offset: u64) -> Self {
        Self::new(self.seed.wrapping_add(offset), self.device.clone())
    }

    pub fn std_rng(&self, offset: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset))
    }

    /// Xavier-normal weights, small normal bias.
    pub fn linear(
        &self,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        offset: u64,
    ) -> SeededLinear<B> {
        let mut rng = self.std_rng(offset);
        let std = (2.0 / (input_dim + output_dim) as f32).sqrt();
        let weight = self.normal_tensor([output_dim, input_dim], &mut rng, 0.0, std);
        let bias = bias.then(|| self.normal_tensor([output_dim], &mut rng, 0.0, 0.01));
        SeededLinear::new(weight, bias)
    }

    /// Embedding table with padding index 0; the padding row starts at zero.
    pub fn padded_embedding(
        &self,
        num_embeddings: usize,
        embedding_dim: usize,
        offset: u64,
    ) -> SeededEmbedding<B> {
        let mut rng = self.std_rng(offset);
        let mut data: Vec<f32> = (0..num_embeddings * embedding_dim)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        data.iter_mut().take(embedding_dim).for_each(|v| *v = 0.0);

        SeededEmbedding::new(self.tensor_from_vec(data, [num_embeddings, embedding_dim])).with_padding_idx(0)
    }

    pub fn normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        mean: f32,
        std: f32,
    ) -> Tensor<B, D> {
        let total: usize = shape.iter().product();
        let data: Vec<f32> = (0..total)
            .map(|_| mean + std * rng.sample::<f32, _>(StandardNormal))
            .collect();
        self.tensor_from_vec(data, shape)
    }

    /// Uniform values in `[low, high)`.
    pub fn uniform_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        low: f32,
        high: f32,
    ) -> Tensor<B, D> {
        let total: usize = shape.iter().product();
        let data: Vec<f32> = (0..total).map(|_| rng.random_range(low..high)).collect();
        self.tensor_from_vec(data, shape)
    }

    fn tensor_from_vec<const D: usize>(&self, data: Vec<f32>, shape: [usize; D]) -> Tensor<B, D> {
        Tensor::from_data(TensorData::new(data, shape), &self.device)
    }
}
