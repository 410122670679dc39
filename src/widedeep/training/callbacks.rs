//! Hooks invoked by the streaming trainer.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Summary of one finished epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub epoch: usize,
    /// Running mean of the batch losses of this epoch
    pub loss: f64,
    pub n_batches: usize,
}

/// Training event hooks. Every hook defaults to a no-op.
pub trait Callback: Send {
    fn on_train_begin(&mut self) {}

    fn on_epoch_begin(&mut self, _epoch: usize) {}

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, _loss: f64) {}

    fn on_epoch_end(&mut self, _logs: &EpochLogs) {}

    fn on_train_end(&mut self, _history: &[EpochLogs]) {}
}

/// Ordered set of callbacks, dispatched in insertion order.
#[derive(Default)]
pub struct CallbackContainer {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn on_train_begin(&mut self) {
        self.callbacks.iter_mut().for_each(|c| c.on_train_begin());
    }

    pub fn on_epoch_begin(&mut self, epoch: usize) {
        self.callbacks.iter_mut().for_each(|c| c.on_epoch_begin(epoch));
    }

    pub fn on_batch_end(&mut self, epoch: usize, batch: usize, loss: f64) {
        self.callbacks
            .iter_mut()
            .for_each(|c| c.on_batch_end(epoch, batch, loss));
    }

    pub fn on_epoch_end(&mut self, logs: &EpochLogs) {
        self.callbacks.iter_mut().for_each(|c| c.on_epoch_end(logs));
    }

    pub fn on_train_end(&mut self, history: &[EpochLogs]) {
        self.callbacks.iter_mut().for_each(|c| c.on_train_end(history));
    }
}

impl std::fmt::Debug for CallbackContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContainer")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

/// Records per-epoch logs and batch losses.
///
/// Clones share the same record, so keep one clone and hand the other to
/// the trainer.
#[derive(Debug, Clone, Default)]
pub struct History {
    inner: Arc<Mutex<HistoryRecord>>,
}

#[derive(Debug, Default)]
struct HistoryRecord {
    epochs: Vec<EpochLogs>,
    batch_losses: Vec<f64>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self) -> MutexGuard<'_, HistoryRecord> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epochs(&self) -> Vec<EpochLogs> {
        self.record().epochs.clone()
    }

    pub fn epoch_losses(&self) -> Vec<f64> {
        self.record().epochs.iter().map(|e| e.loss).collect()
    }

    pub fn batch_losses(&self) -> Vec<f64> {
        self.record().batch_losses.clone()
    }
}

impl Callback for History {
    fn on_train_begin(&mut self) {
        let mut record = self.record();
        record.epochs.clear();
        record.batch_losses.clear();
    }

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, loss: f64) {
        self.record().batch_losses.push(loss);
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs) {
        self.record().epochs.push(logs.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl Callback for EventLog {
        fn on_train_begin(&mut self) {
            self.0.lock().unwrap().push("train_begin".into());
        }
        fn on_epoch_begin(&mut self, epoch: usize) {
            self.0.lock().unwrap().push(format!("epoch_begin {epoch}"));
        }
        fn on_train_end(&mut self, history: &[EpochLogs]) {
            self.0.lock().unwrap().push(format!("train_end {}", history.len()));
        }
    }

    #[test]
    fn test_container_dispatch_order() {
        let log = EventLog::default();
        let mut container = CallbackContainer::new();
        container.push(Box::new(log.clone()));
        assert_eq!(container.len(), 1);

        container.on_train_begin();
        container.on_epoch_begin(0);
        container.on_batch_end(0, 0, 1.0);
        container.on_train_end(&[]);

        let events = log.0.lock().unwrap().clone();
        assert_eq!(events, vec!["train_begin", "epoch_begin 0", "train_end 0"]);
    }

    #[test]
    fn test_history_shares_record() {
        let history = History::new();
        let mut handle = history.clone();

        handle.on_train_begin();
        handle.on_batch_end(0, 0, 2.0);
        handle.on_batch_end(0, 1, 1.0);
        handle.on_epoch_end(&EpochLogs { epoch: 0, loss: 1.5, n_batches: 2 });

        assert_eq!(history.batch_losses(), vec![2.0, 1.0]);
        assert_eq!(history.epoch_losses(), vec![1.5]);
        assert_eq!(history.epochs()[0].n_batches, 2);
    }
}
