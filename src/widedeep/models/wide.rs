//! Wide component: a linear model over integer-coded sparse columns.
//!
//! Each wide column holds an index into one shared table of `wide_dim + 1`
//! rows (row 0 is padding). The output is the sum of the looked-up rows plus
//! a bias, i.e. a linear model over one-hot features.

use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::Int;

use super::TabularModel;
use super::config::ColumnIndex;
use super::init::{RngContext, SeededEmbedding, WIDE_SEED};
use crate::widedeep::error::{Result, WideDeepError};

#[derive(Config, Debug)]
pub struct WideConfig {
    /// Columns holding wide indices
    pub wide_cols: Vec<String>,
    /// Number of distinct wide indices, excluding padding
    pub wide_dim: usize,
    #[config(default = 1)]
    pub pred_dim: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl WideConfig {
    pub fn init<B: Backend>(&self, column_idx: &ColumnIndex, device: &B::Device) -> Result<Wide<B>> {
        if self.wide_cols.is_empty() || self.wide_dim == 0 || self.pred_dim == 0 {
            return Err(WideDeepError::configuration(
                "wide component needs at least one column, wide_dim > 0 and pred_dim > 0",
            ));
        }
        let positions = self
            .wide_cols
            .iter()
            .map(|name| {
                column_idx.position(name).ok_or_else(|| {
                    WideDeepError::configuration(format!("wide column '{name}' is not in the column index"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rng = RngContext::<B>::new(self.seed, device.clone()).fork(WIDE_SEED);
        let table = rng.padded_embedding(self.wide_dim + 1, self.pred_dim, 0);
        // scale to a sensible starting point for a linear model
        let table = SeededEmbedding::new((table.weight.val() * (1.0 / (self.wide_dim as f64).sqrt())).detach())
            .with_padding_idx(0);

        Ok(Wide {
            table,
            bias: Param::from_tensor(Tensor::zeros([self.pred_dim], device)),
            positions: Ignored(positions),
            wide_dim: Ignored(self.wide_dim),
        })
    }
}

#[derive(Module, Debug)]
pub struct Wide<B: Backend> {
    table: SeededEmbedding<B>,
    bias: Param<Tensor<B, 1>>,
    positions: Ignored<Vec<usize>>,
    wide_dim: Ignored<usize>,
}

impl<B: Backend> Wide<B> {
    pub fn pred_dim(&self) -> usize {
        self.table.dims()[1]
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, _] = x.dims();
        let n_cols = self.positions.len();
        let positions: Vec<i64> = self.positions.iter().map(|p| *p as i64).collect();
        let index = Tensor::<B, 1, Int>::from_data(TensorData::new(positions, [n_cols]), &x.device());

        let codes = x.select(1, index);
        let invalid = codes.clone().lower_elem(0.0);
        let overflow = codes.clone().greater_elem(*self.wide_dim as f32);
        let indices = codes.mask_fill(invalid, 0.0).mask_fill(overflow, 0.0).int();

        let summed = self.table.forward_2d(indices).sum_dim(1);
        let pred_dim = self.pred_dim();
        summed.reshape([batch, pred_dim]) + self.bias.val().unsqueeze::<2>()
    }
}

impl<B: Backend> TabularModel<B> for Wide<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        Wide::forward(self, x)
    }

    fn output_dim(&self) -> usize {
        self.pred_dim()
    }

    fn input_width(&self) -> usize {
        self.positions.iter().max().map_or(0, |p| p + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_wide_sums_rows_and_ignores_padding() {
        let device = Default::default();
        let columns = ColumnIndex::from_names(["w1", "x", "w2"]).unwrap();
        let wide = WideConfig::new(vec!["w1".into(), "w2".into()], 5)
            .init::<TestBackend>(&columns, &device)
            .unwrap();
        assert_eq!(wide.pred_dim(), 1);

        let x = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 9.0, 3.0], [0.0, 9.0, 0.0], [1.0, -4.0, 0.0]],
            &device,
        );
        let out: Vec<f32> = wide.forward(x).into_data().to_vec().unwrap();
        let table: Vec<f32> = wide.table.weight.val().into_data().to_vec().unwrap();

        assert!((out[0] - (table[1] + table[3])).abs() < 1e-6);
        assert_eq!(out[1], 0.0, "all-padding row is just the zero bias");
        assert!((out[2] - table[1]).abs() < 1e-6);
    }

    #[test]
    fn test_wide_table_trains_except_padding() {
        type AdBackend = burn::backend::Autodiff<NdArray<f32>>;
        let device = Default::default();
        let columns = ColumnIndex::from_names(["w1", "w2"]).unwrap();
        let wide = WideConfig::new(vec!["w1".into(), "w2".into()], 4)
            .init::<AdBackend>(&columns, &device)
            .unwrap();
        assert_eq!(TabularModel::input_width(&wide), 2);

        let x = Tensor::<AdBackend, 2>::from_floats([[2.0, 0.0], [-3.0, 4.0]], &device);
        let grads = wide.forward(x).sum().backward();
        let grad: Vec<f32> = wide.table.weight.val().grad(&grads).unwrap().into_data().to_vec().unwrap();

        // rows 0 (padding, twice), 2 and 4 are looked up
        assert_eq!(grad, vec![0.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_wide_rejects_unknown_column() {
        let columns = ColumnIndex::from_names(["a"]).unwrap();
        let err = WideConfig::new(vec!["zz".into()], 3)
            .init::<TestBackend>(&columns, &Default::default())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
