//! Embedding bank: turns a dense batch into encoder tokens.
//!
//! Categorical codes are read from the batch as floats. A code `c` in
//! `0..cardinality` looks up row `c + 1`; anything else (negative, out of
//! range) looks up row 0, the zeroed padding row.

use burn::module::{Ignored, Module, Param};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, LayerNorm, LayerNormConfig,
};
use burn::prelude::*;
use burn::tensor::{Distribution, Int, activation};

use super::config::{
    CategoricalColumn, CategoricalStrategy, ContinuousNormKind, ContinuousStrategy,
    ModelConfiguration,
};
use super::init::{RngContext, SeededEmbedding, SeededLinear, categorical_seed, continuous_seed};

/// `[batch, 1]` float codes to `[batch]` table indices.
fn lookup_indices<B: Backend>(
    x: &Tensor<B, 2>,
    column: &CategoricalColumn,
) -> Tensor<B, 1, Int> {
    let [batch, _] = x.dims();
    let codes = x.clone().slice([0..batch, column.position..column.position + 1]);
    let out_of_range = codes.clone().greater_equal_elem(column.cardinality as f32);
    let negative = codes.clone().lower_elem(0.0);
    (codes + 1.0)
        .mask_fill(out_of_range, 0.0)
        .mask_fill(negative, 0.0)
        .reshape([batch])
        .int()
}

/// Drops whole column vectors, scaling survivors by `1 / (1 - p)`.
#[derive(Debug, Clone)]
pub struct FullEmbeddingDropout {
    prob: f64,
}

impl FullEmbeddingDropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    /// `x` is `[batch, cols, width]`. Inactive outside autodiff backends.
    pub fn forward<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        if !B::ad_enabled() || self.prob == 0.0 {
            return x;
        }
        let [_, cols, _] = x.dims();
        let keep = Tensor::<B, 2>::random(
            [cols, 1],
            Distribution::Bernoulli(1.0 - self.prob),
            &x.device(),
        );
        x * (keep / (1.0 - self.prob)).unsqueeze::<3>()
    }

    /// `x` is `[batch, width]` from a single column: the whole column is kept
    /// or dropped.
    pub fn forward_column<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if !B::ad_enabled() || self.prob == 0.0 {
            return x;
        }
        let keep = Tensor::<B, 2>::random([1, 1], Distribution::Bernoulli(1.0 - self.prob), &x.device());
        x * (keep / (1.0 - self.prob))
    }
}

#[derive(Debug, Clone)]
pub enum EmbeddingDropout {
    Elementwise(Dropout),
    FullEmbedding(FullEmbeddingDropout),
}

impl EmbeddingDropout {
    fn new(prob: f64, full_embedding: bool) -> Self {
        if full_embedding {
            EmbeddingDropout::FullEmbedding(FullEmbeddingDropout::new(prob))
        } else {
            EmbeddingDropout::Elementwise(DropoutConfig::new(prob).init())
        }
    }

    fn forward<B: Backend>(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            EmbeddingDropout::Elementwise(dropout) => dropout.forward(x),
            EmbeddingDropout::FullEmbedding(dropout) => dropout.forward(x),
        }
    }

    fn forward_column<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            EmbeddingDropout::Elementwise(dropout) => dropout.forward(x),
            EmbeddingDropout::FullEmbedding(dropout) => dropout.forward_column(x),
        }
    }
}

/// One table per column, dropout over the stacked embeddings.
#[derive(Module, Debug)]
pub struct IndependentEmbeddings<B: Backend> {
    tables: Vec<SeededEmbedding<B>>,
    dropout: Ignored<EmbeddingDropout>,
}

/// A column table combined with the column's shared vector.
#[derive(Module, Debug)]
pub struct SharedEmbedding<B: Backend> {
    table: SeededEmbedding<B>,
    /// `[1, width]` when added, `[1, width / frac]` when replacing
    shared: Param<Tensor<B, 2>>,
    add: Ignored<bool>,
}

impl<B: Backend> SharedEmbedding<B> {
    fn new(
        cardinality: usize,
        width: usize,
        add: bool,
        shared_dim: usize,
        rng: &RngContext<B>,
    ) -> Self {
        let table = rng.padded_embedding(cardinality + 1, width, 0);
        let clamped = table.weight.val().clamp(-2.0, 2.0).detach();
        let mut shared_rng = rng.std_rng(1);
        Self {
            table: SeededEmbedding::new(clamped).with_padding_idx(0),
            shared: Param::from_tensor(rng.uniform_tensor([1, shared_dim], &mut shared_rng, -1.0, 1.0)),
            add: Ignored(add),
        }
    }

    pub fn table_dims(&self) -> [usize; 2] {
        self.table.dims()
    }

    pub fn shared_dims(&self) -> [usize; 2] {
        self.shared.val().dims()
    }

    /// `[batch]` indices to `[batch, width]`.
    fn forward(&self, indices: Tensor<B, 1, Int>, dropout: &EmbeddingDropout) -> Tensor<B, 2> {
        let out = dropout.forward_column(self.table.forward(indices));
        let [batch, width] = out.dims();
        let shared = self.shared.val();
        let [_, shared_dim] = shared.dims();

        if *self.add {
            out + shared
        } else if shared_dim == width {
            shared.repeat_dim(0, batch)
        } else {
            let rest = out.slice([0..batch, shared_dim..width]);
            Tensor::cat(vec![shared.repeat_dim(0, batch), rest], 1)
        }
    }
}

#[derive(Module, Debug)]
pub struct SharedEmbeddings<B: Backend> {
    columns: Vec<SharedEmbedding<B>>,
    dropout: Ignored<EmbeddingDropout>,
}

/// Categorical embedding variant, chosen once at construction.
#[derive(Module, Debug)]
pub enum CategoricalEmbeddings<B: Backend> {
    Independent(IndependentEmbeddings<B>),
    Shared(SharedEmbeddings<B>),
}

impl<B: Backend> CategoricalEmbeddings<B> {
    pub fn new(
        columns: &[CategoricalColumn],
        strategy: CategoricalStrategy,
        width: usize,
        dropout: f64,
        rng: &RngContext<B>,
    ) -> Self {
        match strategy {
            CategoricalStrategy::Independent { full_embed_dropout } => {
                let tables = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| rng.padded_embedding(c.cardinality + 1, width, categorical_seed(i)))
                    .collect();
                CategoricalEmbeddings::Independent(IndependentEmbeddings {
                    tables,
                    dropout: Ignored(EmbeddingDropout::new(dropout, full_embed_dropout)),
                })
            }
            CategoricalStrategy::Shared {
                add,
                shared_dim,
                full_embed_dropout,
            } => {
                let columns = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        SharedEmbedding::new(c.cardinality, width, add, shared_dim, &rng.fork(categorical_seed(i)))
                    })
                    .collect();
                CategoricalEmbeddings::Shared(SharedEmbeddings {
                    columns,
                    dropout: Ignored(EmbeddingDropout::new(dropout, full_embed_dropout)),
                })
            }
        }
    }

    /// Dense batch to `[batch, n_categorical, width]`.
    pub fn embed(&self, x: &Tensor<B, 2>, columns: &[CategoricalColumn]) -> Tensor<B, 3> {
        match self {
            CategoricalEmbeddings::Independent(bank) => {
                let tokens = columns
                    .iter()
                    .zip(&bank.tables)
                    .map(|(column, table)| {
                        table.forward(lookup_indices(x, column)).unsqueeze_dim::<3>(1)
                    })
                    .collect();
                bank.dropout.forward(Tensor::cat(tokens, 1))
            }
            CategoricalEmbeddings::Shared(bank) => {
                let tokens = columns
                    .iter()
                    .zip(&bank.columns)
                    .map(|(column, embedding)| {
                        embedding
                            .forward(lookup_indices(x, column), &bank.dropout)
                            .unsqueeze_dim::<3>(1)
                    })
                    .collect();
                Tensor::cat(tokens, 1)
            }
        }
    }

    /// `[cardinality + 1, width]` per column.
    pub fn table_dims(&self) -> Vec<[usize; 2]> {
        match self {
            CategoricalEmbeddings::Independent(bank) => bank.tables.iter().map(|t| t.dims()).collect(),
            CategoricalEmbeddings::Shared(bank) => bank.columns.iter().map(|c| c.table_dims()).collect(),
        }
    }

    /// Shape of each column's shared vector, empty for independent tables.
    pub fn shared_dims(&self) -> Vec<[usize; 2]> {
        match self {
            CategoricalEmbeddings::Independent(_) => Vec::new(),
            CategoricalEmbeddings::Shared(bank) => bank.columns.iter().map(|c| c.shared_dims()).collect(),
        }
    }
}

/// One `Linear(1, width)` + ReLU per continuous column.
#[derive(Module, Debug)]
pub struct ContinuousEmbeddings<B: Backend> {
    projections: Vec<SeededLinear<B>>,
}

impl<B: Backend> ContinuousEmbeddings<B> {
    pub fn new(n_columns: usize, width: usize, rng: &RngContext<B>) -> Self {
        Self {
            projections: (0..n_columns)
                .map(|i| rng.linear(1, width, true, continuous_seed(i)))
                .collect(),
        }
    }

    /// `[batch, n_cont]` to `[batch, n_cont, width]`.
    pub fn embed(&self, x_cont: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = x_cont.dims();
        let tokens = self
            .projections
            .iter()
            .enumerate()
            .map(|(i, projection)| {
                let column = x_cont.clone().slice([0..batch, i..i + 1]);
                activation::relu(projection.forward(column)).unsqueeze_dim::<3>(1)
            })
            .collect();
        Tensor::cat(tokens, 1)
    }
}

#[derive(Module, Debug)]
pub enum ContinuousNorm<B: Backend> {
    Layer(LayerNorm<B>),
    Batch(BatchNorm<B, 1>),
}

impl<B: Backend> ContinuousNorm<B> {
    pub fn new(kind: ContinuousNormKind, n_columns: usize, device: &B::Device) -> Self {
        match kind {
            ContinuousNormKind::LayerNorm => ContinuousNorm::Layer(LayerNormConfig::new(n_columns).init(device)),
            ContinuousNormKind::BatchNorm => ContinuousNorm::Batch(BatchNormConfig::new(n_columns).init(device)),
        }
    }

    /// Normalises `[batch, n_cont]` as one block.
    pub fn forward(&self, x_cont: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            ContinuousNorm::Layer(norm) => norm.forward(x_cont),
            ContinuousNorm::Batch(norm) => {
                let [batch, n] = x_cont.dims();
                norm.forward(x_cont.reshape([batch, n, 1])).reshape([batch, n])
            }
        }
    }
}

#[derive(Module, Debug)]
pub enum ContinuousBank<B: Backend> {
    Embedded(ContinuousEmbeddings<B>),
    Normalized(ContinuousNorm<B>),
}

/// Output of the embedding bank.
pub struct EmbeddedBatch<B: Backend> {
    /// `[batch, tokens, width]`
    pub tokens: Tensor<B, 3>,
    /// Normalised continuous block to append after pooling
    pub continuous: Option<Tensor<B, 2>>,
}

#[derive(Module, Debug)]
pub struct EmbeddingBank<B: Backend> {
    categorical: Option<CategoricalEmbeddings<B>>,
    continuous: Option<ContinuousBank<B>>,
    categorical_columns: Ignored<Vec<CategoricalColumn>>,
    continuous_positions: Ignored<Vec<usize>>,
}

impl<B: Backend> EmbeddingBank<B> {
    pub fn new(
        resolved: &ModelConfiguration,
        width: usize,
        embed_dropout: f64,
        rng: &RngContext<B>,
    ) -> Self {
        let categorical = (!resolved.categorical.is_empty()).then(|| {
            CategoricalEmbeddings::new(
                &resolved.categorical,
                resolved.categorical_strategy,
                width,
                embed_dropout,
                rng,
            )
        });
        let n_cont = resolved.continuous.len();
        let continuous = match resolved.continuous_strategy {
            ContinuousStrategy::Absent => None,
            ContinuousStrategy::Embedded => {
                Some(ContinuousBank::Embedded(ContinuousEmbeddings::new(n_cont, width, rng)))
            }
            ContinuousStrategy::Normalized(kind) => {
                Some(ContinuousBank::Normalized(ContinuousNorm::new(kind, n_cont, rng.device())))
            }
        };

        Self {
            categorical,
            continuous,
            categorical_columns: Ignored(resolved.categorical.clone()),
            continuous_positions: Ignored(resolved.continuous.iter().map(|(_, p)| *p).collect()),
        }
    }

    pub fn categorical(&self) -> Option<&CategoricalEmbeddings<B>> {
        self.categorical.as_ref()
    }

    fn continuous_block(&self, x: &Tensor<B, 2>) -> Tensor<B, 2> {
        let positions: Vec<i64> = self.continuous_positions.iter().map(|p| *p as i64).collect();
        let n = positions.len();
        let index = Tensor::<B, 1, Int>::from_data(TensorData::new(positions, [n]), &x.device());
        x.clone().select(1, index)
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> EmbeddedBatch<B> {
        let mut tokens = Vec::with_capacity(2);
        if let Some(categorical) = &self.categorical {
            tokens.push(categorical.embed(&x, &self.categorical_columns));
        }

        let continuous = match &self.continuous {
            Some(ContinuousBank::Embedded(embeddings)) => {
                tokens.push(embeddings.embed(self.continuous_block(&x)));
                None
            }
            Some(ContinuousBank::Normalized(norm)) => Some(norm.forward(self.continuous_block(&x))),
            None => None,
        };

        EmbeddedBatch {
            tokens: Tensor::cat(tokens, 1),
            continuous,
        }
    }
}
