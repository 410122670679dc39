//! Encoder blocks and the factory that builds a chain of them.
//!
//! The block kind is fixed once per model: every block in a chain is either a
//! [`TransformerEncoderBlock`] or a [`SaintEncoderBlock`].

use burn::module::{Ignored, Module};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig};
use burn::prelude::*;

use super::attention::{Attention, full_attention::MultiHeadAttention};
use super::config::BlockKind;
use super::init::{RngContext, SeededLinear, block_seed};
use super::mlp::Activation;

/// `LayerNorm(x + dropout(sublayer_out))`
#[derive(Module, Debug)]
pub struct AddNorm<B: Backend> {
    norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> AddNorm<B> {
    pub fn new(width: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(width).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, sublayer_out: Tensor<B, 3>) -> Tensor<B, 3> {
        self.norm.forward(x + self.dropout.forward(sublayer_out))
    }
}

/// Position-wise feed-forward: `w2(dropout(act(w1 x)))`.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    w1: SeededLinear<B>,
    w2: SeededLinear<B>,
    dropout: Dropout,
    activation: Ignored<Activation>,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(
        width: usize,
        hidden: usize,
        dropout: f64,
        activation: Activation,
        rng: &RngContext<B>,
    ) -> Self {
        // gated activations consume twice the hidden width
        let expanded = if activation.is_gated() { 2 * hidden } else { hidden };
        Self {
            w1: rng.linear(width, expanded, true, 10),
            w2: rng.linear(hidden, width, true, 11),
            dropout: DropoutConfig::new(dropout).init(),
            activation: Ignored(activation),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let h = self.activation.apply(self.w1.forward(x));
        self.w2.forward(self.dropout.forward(h))
    }
}

/// Hyperparameters shared by every block of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSettings {
    pub width: usize,
    pub n_heads: usize,
    pub ff_hidden_dim: usize,
    pub dropout: f64,
    pub activation: Activation,
}

/// Self-attention sublayer followed by a feed-forward sublayer.
#[derive(Module, Debug)]
pub struct TransformerEncoderBlock<B: Backend> {
    attn: MultiHeadAttention<B>,
    attn_addnorm: AddNorm<B>,
    ff: FeedForward<B>,
    ff_addnorm: AddNorm<B>,
}

impl<B: Backend> TransformerEncoderBlock<B> {
    pub fn new(settings: &BlockSettings, rng: &RngContext<B>) -> Self {
        let device = rng.device();
        Self {
            attn: MultiHeadAttention::new(settings.width, settings.n_heads, settings.dropout, rng),
            attn_addnorm: AddNorm::new(settings.width, settings.dropout, device),
            ff: FeedForward::new(
                settings.width,
                settings.ff_hidden_dim,
                settings.dropout,
                settings.activation,
                rng,
            ),
            ff_addnorm: AddNorm::new(settings.width, settings.dropout, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let (attended, weights) = self.attn.attend(x.clone());
        let x = self.attn_addnorm.forward(x, attended);
        let x = self.ff_addnorm.forward(x.clone(), self.ff.forward(x));
        (x, weights)
    }
}

/// Attention across the tokens of each row, then across the rows of the batch.
///
/// The second stage views the batch as a single sequence of `batch` tokens of
/// width `n_feats * width`.
#[derive(Module, Debug)]
pub struct SaintEncoderBlock<B: Backend> {
    feature_block: TransformerEncoderBlock<B>,
    sample_block: TransformerEncoderBlock<B>,
    n_feats: Ignored<usize>,
}

impl<B: Backend> SaintEncoderBlock<B> {
    pub fn new(settings: &BlockSettings, n_feats: usize, rng: &RngContext<B>) -> Self {
        let sample_settings = BlockSettings {
            width: n_feats * settings.width,
            ff_hidden_dim: n_feats * settings.ff_hidden_dim,
            ..settings.clone()
        };
        Self {
            feature_block: TransformerEncoderBlock::new(settings, &rng.fork(0)),
            sample_block: TransformerEncoderBlock::new(&sample_settings, &rng.fork(500)),
            n_feats: Ignored(n_feats),
        }
    }

    /// Returns `(output, row_weights, column_weights)` where row weights are
    /// `[batch, heads, n_feats, n_feats]` and column weights
    /// `[1, heads, batch, batch]`.
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, _, width] = x.dims();
        let n_feats = *self.n_feats;

        let (x, row_weights) = self.feature_block.forward(x);
        let x = x.reshape([1, batch, n_feats * width]);
        let (x, column_weights) = self.sample_block.forward(x);
        (x.reshape([batch, n_feats, width]), row_weights, column_weights)
    }
}

/// Attention weights captured from one block.
#[derive(Debug, Clone)]
pub enum AttentionWeights<B: Backend> {
    Single(Tensor<B, 4>),
    Dual {
        /// Attention across the tokens of a row
        row: Tensor<B, 4>,
        /// Attention across the rows of the batch
        column: Tensor<B, 4>,
    },
}

impl<B: Backend> AttentionWeights<B> {
    pub fn kind(&self) -> BlockKind {
        match self {
            AttentionWeights::Single(_) => BlockKind::Standard,
            AttentionWeights::Dual { .. } => BlockKind::Dual,
        }
    }
}

#[derive(Module, Debug)]
pub enum EncoderBlock<B: Backend> {
    Standard(TransformerEncoderBlock<B>),
    Dual(SaintEncoderBlock<B>),
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, AttentionWeights<B>) {
        match self {
            EncoderBlock::Standard(block) => {
                let (x, weights) = block.forward(x);
                (x, AttentionWeights::Single(weights))
            }
            EncoderBlock::Dual(block) => {
                let (x, row, column) = block.forward(x);
                (x, AttentionWeights::Dual { row, column })
            }
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            EncoderBlock::Standard(_) => BlockKind::Standard,
            EncoderBlock::Dual(_) => BlockKind::Dual,
        }
    }
}

/// Builds the blocks of an encoder chain.
pub trait EncoderBlockFactory<B: Backend> {
    fn kind(&self) -> BlockKind;

    fn build(&self, settings: &BlockSettings, rng: &RngContext<B>) -> EncoderBlock<B>;

    /// `n_blocks` blocks, block `i` seeded at [`block_seed`]`(i)`.
    fn build_chain(
        &self,
        settings: &BlockSettings,
        n_blocks: usize,
        rng: &RngContext<B>,
    ) -> Vec<EncoderBlock<B>> {
        (0..n_blocks)
            .map(|i| self.build(settings, &rng.fork(block_seed(i))))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBlockFactory;

impl<B: Backend> EncoderBlockFactory<B> for StandardBlockFactory {
    fn kind(&self) -> BlockKind {
        BlockKind::Standard
    }

    fn build(&self, settings: &BlockSettings, rng: &RngContext<B>) -> EncoderBlock<B> {
        EncoderBlock::Standard(TransformerEncoderBlock::new(settings, rng))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DualBlockFactory {
    /// Tokens per row entering the encoder
    pub n_feats: usize,
}

impl<B: Backend> EncoderBlockFactory<B> for DualBlockFactory {
    fn kind(&self) -> BlockKind {
        BlockKind::Dual
    }

    fn build(&self, settings: &BlockSettings, rng: &RngContext<B>) -> EncoderBlock<B> {
        EncoderBlock::Dual(SaintEncoderBlock::new(settings, self.n_feats, rng))
    }
}

/// Factory for `kind`, with `n_feats` tokens per row.
pub fn block_factory<B: Backend>(kind: BlockKind, n_feats: usize) -> Box<dyn EncoderBlockFactory<B>> {
    match kind {
        BlockKind::Standard => Box::new(StandardBlockFactory),
        BlockKind::Dual => Box::new(DualBlockFactory { n_feats }),
    }
}
