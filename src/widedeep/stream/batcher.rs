//! Turns streamed rows into tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::dataset::StreamRow;

/// A batch ready for the model.
#[derive(Clone, Debug)]
pub struct TabularBatch<B: Backend> {
    /// `[batch, n_columns]`
    pub inputs: Tensor<B, 2>,
    /// Absolute source row of each batch entry
    pub indices: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct TabularBatcher {
    n_columns: usize,
}

impl TabularBatcher {
    pub fn new(n_columns: usize) -> Self {
        Self { n_columns }
    }
}

impl<B: Backend> Batcher<B, StreamRow, TabularBatch<B>> for TabularBatcher {
    fn batch(&self, items: Vec<StreamRow>, device: &B::Device) -> TabularBatch<B> {
        let n_rows = items.len();
        let mut values = Vec::with_capacity(n_rows * self.n_columns);
        let mut indices = Vec::with_capacity(n_rows);
        for row in items {
            debug_assert_eq!(row.values.len(), self.n_columns);
            values.extend(row.values);
            indices.push(row.index);
        }

        let inputs = Tensor::from_data(TensorData::new(values, [n_rows, self.n_columns]), device);
        TabularBatch { inputs, indices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_layout() {
        let rows = vec![
            StreamRow { index: 10, values: vec![1.0, 2.0] },
            StreamRow { index: 11, values: vec![3.0, 4.0] },
            StreamRow { index: 12, values: vec![5.0, 6.0] },
        ];
        let batch: TabularBatch<TestBackend> =
            TabularBatcher::new(2).batch(rows, &Default::default());

        assert_eq!(batch.inputs.dims(), [3, 2]);
        assert_eq!(batch.indices, vec![10, 11, 12]);
        let values: Vec<f32> = batch.inputs.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
