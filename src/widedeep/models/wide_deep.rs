//! Wide & Deep combiner: `wide(x) + linear(deep(x))`.

use burn::module::{Ignored, Module};
use burn::prelude::*;

use super::TabularModel;
use super::init::{RngContext, SeededLinear, WIDE_DEEP_HEAD_SEED};
use super::transformer::TabularTransformer;
use super::wide::Wide;
use crate::widedeep::error::{Result, WideDeepError};

#[derive(Module, Debug)]
pub struct WideDeep<B: Backend> {
    wide: Option<Wide<B>>,
    deep: TabularTransformer<B>,
    /// Projects the deep output to `pred_dim`
    deep_head: SeededLinear<B>,
    pred_dim: Ignored<usize>,
}

impl<B: Backend> WideDeep<B> {
    /// `pred_dim` is 1 for regression and binary targets, the class count
    /// for multiclass targets.
    pub fn new(
        wide: Option<Wide<B>>,
        deep: TabularTransformer<B>,
        pred_dim: usize,
        seed: u64,
        device: &B::Device,
    ) -> Result<Self> {
        if pred_dim == 0 {
            return Err(WideDeepError::configuration("pred_dim must be positive"));
        }
        if let Some(wide) = &wide {
            if wide.pred_dim() != pred_dim {
                return Err(WideDeepError::configuration(format!(
                    "wide component predicts {} values but pred_dim is {pred_dim}",
                    wide.pred_dim()
                )));
            }
        }

        let rng = RngContext::<B>::new(seed, device.clone()).fork(WIDE_DEEP_HEAD_SEED);
        let deep_head = rng.linear(TabularModel::output_dim(&deep), pred_dim, true, 0);
        Ok(Self {
            wide,
            deep,
            deep_head,
            pred_dim: Ignored(pred_dim),
        })
    }

    pub fn deep(&self) -> &TabularTransformer<B> {
        &self.deep
    }

    pub fn has_wide(&self) -> bool {
        self.wide.is_some()
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let deep = self.deep_head.forward(self.deep.forward(x.clone()));
        match &self.wide {
            Some(wide) => wide.forward(x) + deep,
            None => deep,
        }
    }
}

impl<B: Backend> TabularModel<B> for WideDeep<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        WideDeep::forward(self, x)
    }

    fn output_dim(&self) -> usize {
        *self.pred_dim
    }

    fn input_width(&self) -> usize {
        let deep = TabularModel::input_width(&self.deep);
        self.wide
            .as_ref()
            .map_or(deep, |wide| deep.max(TabularModel::input_width(wide)))
    }
}
