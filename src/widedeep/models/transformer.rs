//! Tabular transformer pipeline shared by TabTransformer and SAINT.
//!
//! `embedding bank -> encoder blocks -> pool -> [append continuous] -> head`
//!
//! The two models differ only in the encoder block. The pipeline receives an
//! [`EncoderBlockFactory`] and never branches on the block kind itself.

use burn::module::{Ignored, Module};
use burn::prelude::*;

use super::TabularModel;
use super::config::{BlockKind, ModelConfiguration, TabTransformerConfig};
use super::embeddings::{CategoricalEmbeddings, EmbeddingBank};
use super::init::{HEAD_SEED, RngContext};
use super::layer::{AttentionWeights, BlockSettings, EncoderBlock, EncoderBlockFactory, block_factory};
use super::mlp::{Mlp, MlpConfig};
use crate::widedeep::error::{Result, WideDeepError};

#[derive(Module, Debug)]
pub struct TabularTransformer<B: Backend> {
    embeddings: EmbeddingBank<B>,
    blocks: Vec<EncoderBlock<B>>,
    head: Mlp<B>,
    keep_attn_weights: Ignored<bool>,
    with_special_token: Ignored<bool>,
    pooled_width: Ignored<usize>,
    row_width: Ignored<usize>,
}

/// TabTransformer: standard self-attention blocks.
pub struct TabTransformer;

impl TabTransformer {
    pub fn new<B: Backend>(
        config: &TabTransformerConfig,
        device: &B::Device,
    ) -> Result<TabularTransformer<B>> {
        config
            .clone()
            .with_block_kind(BlockKind::Standard)
            .init(device)
    }
}

/// SAINT: row and inter-sample attention blocks.
pub struct Saint;

impl Saint {
    pub fn new<B: Backend>(
        config: &TabTransformerConfig,
        device: &B::Device,
    ) -> Result<TabularTransformer<B>> {
        config.clone().with_block_kind(BlockKind::Dual).init(device)
    }
}

impl TabTransformerConfig {
    /// Validate, then build the model with the block kind in `block_kind`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TabularTransformer<B>> {
        let resolved = self.validate()?;
        let factory = block_factory::<B>(self.block_kind, resolved.n_tokens);
        TabularTransformer::with_factory(self, &resolved, factory.as_ref(), device)
    }
}

impl<B: Backend> TabularTransformer<B> {
    /// Build from an already validated configuration and an explicit block factory.
    pub fn with_factory(
        config: &TabTransformerConfig,
        resolved: &ModelConfiguration,
        factory: &dyn EncoderBlockFactory<B>,
        device: &B::Device,
    ) -> Result<Self> {
        let rng = RngContext::<B>::new(config.seed, device.clone());

        let settings = BlockSettings {
            width: config.input_dim,
            n_heads: config.n_heads,
            ff_hidden_dim: config.ff_hidden_dim,
            dropout: config.dropout,
            activation: config.transformer_activation,
        };
        let blocks = factory.build_chain(&settings, config.n_blocks, &rng);

        let head = MlpConfig::new(resolved.mlp_hidden_dims.clone())
            .with_activation(config.mlp_activation)
            .with_dropout(config.mlp_dropout)
            .with_batchnorm(config.mlp_batchnorm)
            .with_batchnorm_last(config.mlp_batchnorm_last)
            .with_linear_first(config.mlp_linear_first)
            .init(&rng.fork(HEAD_SEED))?;

        log::debug!(
            "built {:?} tabular transformer: {} blocks, {} tokens of width {}, head {:?}",
            factory.kind(),
            blocks.len(),
            resolved.n_tokens,
            config.input_dim,
            resolved.mlp_hidden_dims
        );

        Ok(Self {
            embeddings: EmbeddingBank::new(resolved, config.input_dim, config.embed_dropout, &rng),
            blocks,
            head,
            keep_attn_weights: Ignored(config.keep_attn_weights),
            with_special_token: Ignored(resolved.with_special_token),
            pooled_width: Ignored(resolved.pooled_width),
            row_width: Ignored(resolved.row_width),
        })
    }

    pub fn block_kind(&self) -> Option<BlockKind> {
        self.blocks.first().map(EncoderBlock::kind)
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Width of the pooled representation fed to the head.
    pub fn pooled_width(&self) -> usize {
        *self.pooled_width
    }

    /// Minimum number of columns in an input batch.
    pub fn row_width(&self) -> usize {
        *self.row_width
    }

    pub fn categorical_embeddings(&self) -> Option<&CategoricalEmbeddings<B>> {
        self.embeddings.categorical()
    }

    /// Check that a batch carries every indexed column.
    pub fn check_input(&self, x: &Tensor<B, 2>) -> Result<()> {
        let [_, width] = x.dims();
        if width < self.row_width() {
            return Err(WideDeepError::shape("tabular transformer input", self.row_width(), width));
        }
        Ok(())
    }

    /// Embed, encode and pool. Returns the head input and, when recording,
    /// one attention entry per block.
    fn encode_inner(
        &self,
        x: Tensor<B, 2>,
        record: bool,
    ) -> (Tensor<B, 2>, Option<Vec<AttentionWeights<B>>>) {
        let embedded = self.embeddings.forward(x);

        let mut weights = record.then(|| Vec::with_capacity(self.blocks.len()));
        let mut tokens = embedded.tokens;
        for block in &self.blocks {
            let (out, block_weights) = block.forward(tokens);
            tokens = out;
            if let Some(weights) = weights.as_mut() {
                weights.push(block_weights);
            }
        }

        let [batch, n_tokens, width] = tokens.dims();
        let pooled = if *self.with_special_token {
            tokens.slice([0..batch, 0..1, 0..width]).reshape([batch, width])
        } else {
            tokens.reshape([batch, n_tokens * width])
        };

        let pooled = match embedded.continuous {
            Some(continuous) => Tensor::cat(vec![pooled, continuous], 1),
            None => pooled,
        };
        (pooled, weights)
    }

    /// Head input: pooled tokens plus any normalised continuous block.
    pub fn encode(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.encode_inner(x, false).0
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(self.encode(x))
    }

    /// Forward pass that also returns the attention weights of every block
    /// when `keep_attn_weights` was configured, `None` otherwise.
    pub fn forward_with_attention(
        &self,
        x: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Option<Vec<AttentionWeights<B>>>) {
        let (pooled, weights) = self.encode_inner(x, *self.keep_attn_weights);
        (self.head.forward(pooled), weights)
    }
}

impl<B: Backend> TabularModel<B> for TabularTransformer<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        TabularTransformer::forward(self, x)
    }

    fn output_dim(&self) -> usize {
        self.head.output_dim()
    }

    fn input_width(&self) -> usize {
        self.row_width()
    }
}
