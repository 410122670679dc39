//! Output projection head: a stack of dense layers.

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig};
use burn::prelude::*;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};

use super::init::{RngContext, SeededLinear};
use crate::widedeep::error::{Result, WideDeepError};

/// Activation functions available to the encoder and the head.
///
/// The gated variants split the last dimension in two halves `[x, gates]`
/// and return `x * act(gates)`, halving the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    LeakyRelu,
    Tanh,
    Gelu,
    Geglu,
    Reglu,
}

impl Activation {
    pub fn is_gated(&self) -> bool {
        matches!(self, Activation::Geglu | Activation::Reglu)
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::LeakyRelu => activation::leaky_relu(x, 0.01),
            Activation::Tanh => activation::tanh(x),
            Activation::Gelu => activation::gelu(x),
            Activation::Geglu | Activation::Reglu => {
                let half = x.dims()[D - 1] / 2;
                let value = x.clone().narrow(D - 1, 0, half);
                let gates = x.narrow(D - 1, half, half);
                let gates = if *self == Activation::Geglu {
                    activation::gelu(gates)
                } else {
                    activation::relu(gates)
                };
                value * gates
            }
        }
    }
}

impl std::str::FromStr for Activation {
    type Err = WideDeepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "leaky_relu" => Ok(Activation::LeakyRelu),
            "tanh" => Ok(Activation::Tanh),
            "gelu" => Ok(Activation::Gelu),
            "geglu" => Ok(Activation::Geglu),
            "reglu" => Ok(Activation::Reglu),
            _ => Err(WideDeepError::configuration(format!(
                "Unknown activation function: {s}"
            ))),
        }
    }
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Widths from input to output, at least two entries
    pub hidden_dims: Vec<usize>,
    #[config(default = "Activation::Relu")]
    pub activation: Activation,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = false)]
    pub batchnorm: bool,
    #[config(default = false)]
    pub batchnorm_last: bool,
    /// `linear -> act -> bn -> dropout` when true, `bn -> dropout -> linear -> act` otherwise
    #[config(default = true)]
    pub linear_first: bool,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, rng: &RngContext<B>) -> Result<Mlp<B>> {
        if self.hidden_dims.len() < 2 {
            return Err(WideDeepError::configuration(
                "an MLP needs at least an input and an output width",
            ));
        }
        if self.activation.is_gated() {
            return Err(WideDeepError::configuration(format!(
                "{:?} cannot be used between dense layers",
                self.activation
            )));
        }

        let n_layers = self.hidden_dims.len() - 1;
        let layers = self
            .hidden_dims
            .windows(2)
            .enumerate()
            .map(|(i, dims)| {
                let is_last = i + 1 == n_layers;
                let batchnorm = self.batchnorm && (!is_last || self.batchnorm_last);
                self.dense_layer(dims[0], dims[1], batchnorm, rng, i as u64)
            })
            .collect();

        Ok(Mlp { layers })
    }

    fn dense_layer<B: Backend>(
        &self,
        input_dim: usize,
        output_dim: usize,
        batchnorm: bool,
        rng: &RngContext<B>,
        index: u64,
    ) -> DenseLayer<B> {
        let norm_dim = if self.linear_first { output_dim } else { input_dim };
        DenseLayer {
            linear: rng.linear(input_dim, output_dim, !batchnorm, index),
            norm: batchnorm.then(|| BatchNormConfig::new(norm_dim).init(rng.device())),
            dropout: (self.dropout > 0.0).then(|| DropoutConfig::new(self.dropout).init()),
            activation: Ignored(self.activation),
            linear_first: Ignored(self.linear_first),
        }
    }
}

#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    linear: SeededLinear<B>,
    norm: Option<BatchNorm<B, 1>>,
    dropout: Option<Dropout>,
    activation: Ignored<Activation>,
    linear_first: Ignored<bool>,
}

impl<B: Backend> DenseLayer<B> {
    fn regularize(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.norm {
            Some(norm) => {
                let [batch, features] = x.dims();
                norm.forward(x.reshape([batch, features, 1]))
                    .reshape([batch, features])
            }
            None => x,
        };
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if *self.linear_first {
            let x = self.activation.apply(self.linear.forward(x));
            self.regularize(x)
        } else {
            let x = self.regularize(x);
            self.activation.apply(self.linear.forward(x))
        }
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.linear.output_dim())
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn has_batchnorm(&self, layer: usize) -> bool {
        self.layers.get(layer).is_some_and(|l| l.norm.is_some())
    }
}
