//! Epoch loop over a streamed source.
//!
//! Each epoch re-opens the source from the first record, turns every full
//! batch into a tensor and takes one optimiser step on it. Targets live in
//! memory and are looked up by the absolute row index of each batch entry.

use std::path::Path;
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;

use super::batcher::{TabularBatch, TabularBatcher};
use super::dataset::StreamingDatasetCursor;
use super::preprocessor::StreamPreprocessor;
use crate::widedeep::error::{Result, WideDeepError};
use crate::widedeep::models::TabularModel;
use crate::widedeep::settings::TrainingSettings;
use crate::widedeep::training::callbacks::{Callback, CallbackContainer, EpochLogs};
use crate::widedeep::training::loss_utils::{Objective, validate_loss};

#[derive(Config, Debug)]
pub struct StreamTrainerConfig {
    pub objective: Objective,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 0.9)]
    pub beta_1: f32,
    #[config(default = 0.999)]
    pub beta_2: f32,
    pub weight_decay: Option<f32>,
    /// Batches read ahead on a background thread; 0 reads inline.
    #[config(default = 2)]
    pub prefetch: usize,
}

impl StreamTrainerConfig {
    /// Take the learning rate from runtime settings.
    pub fn from_settings(objective: Objective, settings: &TrainingSettings) -> Self {
        Self::new(objective).with_learning_rate(settings.learning_rate)
    }

    fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_weight_decay(self.weight_decay.map(WeightDecayConfig::new))
    }
}

/// Outcome of [`StreamTrainer::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochLogs>,
    /// Optimiser steps taken by this call
    pub n_updates: usize,
    /// Passes opened over the source
    pub passes: usize,
}

impl TrainingHistory {
    pub fn epoch_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }
}

pub struct StreamTrainer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TabularModel<B>,
{
    model: M,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    config: StreamTrainerConfig,
    callbacks: CallbackContainer,
    device: B::Device,
    iteration: usize,
}

impl<B, M> StreamTrainer<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TabularModel<B>,
{
    /// Fails when the model output width does not fit the objective.
    pub fn new(model: M, config: StreamTrainerConfig, device: &B::Device) -> Result<Self> {
        let expected = config.objective.output_dim();
        if expected == 0 {
            return Err(WideDeepError::configuration(
                "multiclass objective needs at least one class",
            ));
        }
        if model.output_dim() != expected {
            return Err(WideDeepError::configuration(format!(
                "{:?} objective expects {} model outputs, model produces {}",
                config.objective,
                expected,
                model.output_dim()
            )));
        }
        if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
            return Err(WideDeepError::configuration("learning_rate must be positive"));
        }

        let optimizer = config.optimizer().init();
        Ok(Self {
            model,
            optimizer,
            config,
            callbacks: CallbackContainer::new(),
            device: device.clone(),
            iteration: 0,
        })
    }

    pub fn with_callback(mut self, callback: Box<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn config(&self) -> &StreamTrainerConfig {
        &self.config
    }

    /// Optimiser steps taken over the trainer's lifetime.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Train for `n_epochs` passes over the CSV source at `path`.
    ///
    /// `targets[i]` is the target of source row `i`. A row index past the end
    /// of `targets` is a [`WideDeepError::Shape`] error.
    pub fn fit<P>(
        &mut self,
        path: impl AsRef<Path>,
        targets: &[f32],
        preprocessor: Arc<P>,
        batch_size: usize,
        n_epochs: usize,
        chunk_size: usize,
    ) -> Result<TrainingHistory>
    where
        P: StreamPreprocessor + 'static,
    {
        if batch_size == 0 {
            return Err(WideDeepError::configuration("batch_size must be positive"));
        }
        if n_epochs == 0 {
            return Err(WideDeepError::configuration("n_epochs must be positive"));
        }
        let n_columns = preprocessor.n_columns();
        if n_columns < self.model.input_width() {
            return Err(WideDeepError::shape(
                "preprocessed columns",
                self.model.input_width(),
                n_columns,
            ));
        }
        let cursor = StreamingDatasetCursor::new(path, chunk_size, preprocessor)?;
        let batcher = TabularBatcher::new(n_columns);

        log::info!(
            "training on {} for {} epochs (batch {}, chunk {})",
            cursor.path().display(),
            n_epochs,
            batch_size,
            chunk_size
        );

        let mut epochs = Vec::with_capacity(n_epochs);
        let mut n_updates = 0;
        self.callbacks.on_train_begin();

        for epoch in 0..n_epochs {
            self.callbacks.on_epoch_begin(epoch);
            let mut running_loss = 0.0;
            let mut n_batches = 0;

            for (batch_idx, rows) in cursor
                .open_prefetched(batch_size, self.config.prefetch)?
                .enumerate()
            {
                let batch: TabularBatch<B> = batcher.batch(rows?, &self.device);
                let batch_targets = gather_targets(targets, &batch.indices)?;
                let loss = self.train_step(batch.inputs, &batch_targets, &batch.indices)?;

                n_batches += 1;
                n_updates += 1;
                running_loss += (loss - running_loss) / n_batches as f64;
                self.callbacks.on_batch_end(epoch, batch_idx, loss);
            }

            if n_batches == 0 {
                log::warn!("epoch {epoch}: source yielded no full batch of {batch_size} rows");
            }
            log::info!("epoch {}/{} loss: {:.6} ({} batches)", epoch + 1, n_epochs, running_loss, n_batches);

            let logs = EpochLogs {
                epoch,
                loss: running_loss,
                n_batches,
            };
            self.callbacks.on_epoch_end(&logs);
            epochs.push(logs);
        }

        self.callbacks.on_train_end(&epochs);
        Ok(TrainingHistory {
            epochs,
            n_updates,
            passes: cursor.passes(),
        })
    }

    /// One forward, backward and optimiser step. Returns the batch loss.
    pub fn train_step(&mut self, inputs: Tensor<B, 2>, targets: &[f32], rows: &[usize]) -> Result<f64> {
        let output = TabularModel::forward(&self.model, inputs);
        let loss = self.config.objective.loss(output, targets, rows, &self.device)?;
        let value = loss.clone().into_scalar().elem::<f64>();
        validate_loss(value, self.iteration)?;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(self.config.learning_rate, self.model.clone(), grads);
        self.iteration += 1;

        log::debug!("step {} loss {:.6}", self.iteration, value);
        Ok(value)
    }
}

fn gather_targets(targets: &[f32], indices: &[usize]) -> Result<Vec<f32>> {
    indices
        .iter()
        .map(|&i| {
            targets
                .get(i)
                .copied()
                .ok_or_else(|| WideDeepError::shape("targets", i + 1, targets.len()))
        })
        .collect()
}
