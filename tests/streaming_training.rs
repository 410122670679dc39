//! End-to-end training over CSV sources read in chunks from disk.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use csv::StringRecord;
use tempfile::NamedTempFile;

use tabular_widedeep::widedeep::error::{Result, WideDeepError};
use tabular_widedeep::widedeep::models::config::TabTransformerConfig;
use tabular_widedeep::widedeep::models::wide_deep::WideDeep;
use tabular_widedeep::widedeep::stream::dataset::StreamingDatasetCursor;
use tabular_widedeep::widedeep::stream::preprocessor::{StreamPreprocessor, TabularPreprocessor};
use tabular_widedeep::widedeep::stream::trainer::{StreamTrainer, StreamTrainerConfig};
use tabular_widedeep::widedeep::training::callbacks::{Callback, EpochLogs, History};
use tabular_widedeep::widedeep::training::loss_utils::Objective;

type TestBackend = Autodiff<NdArray<f32>>;

const COLORS: [&str; 3] = ["red", "green", "blue"];

fn write_source(rows: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "color,size,weight").unwrap();
    for i in 0..rows {
        writeln!(file, "{},{},{}", COLORS[i % 3], (i % 10) as f32 / 10.0, (i % 4) as f32).unwrap();
    }
    file.flush().unwrap();
    file
}

fn preprocessor() -> TabularPreprocessor {
    TabularPreprocessor::new()
        .categorical("color", COLORS)
        .continuous("size")
        .continuous("weight")
}

fn model(preprocessor: &TabularPreprocessor, pred_dim: usize, block: bool) -> WideDeep<TestBackend> {
    let device = Default::default();
    let config = TabTransformerConfig::new(preprocessor.column_index().unwrap(), preprocessor.embed_input())
        .with_continuous_cols(Some(preprocessor.continuous_cols()))
        .with_embed_continuous(block)
        .with_input_dim(8)
        .with_n_heads(2)
        .with_n_blocks(1)
        .with_ff_hidden_dim(16);
    let deep = config.init::<TestBackend>(&device).unwrap();
    WideDeep::new(None, deep, pred_dim, 42, &device).unwrap()
}

/// Counts every row handed to the wrapped preprocessor.
struct CountingPreprocessor {
    inner: TabularPreprocessor,
    rows: Arc<AtomicUsize>,
}

impl StreamPreprocessor for CountingPreprocessor {
    fn n_columns(&self) -> usize {
        self.inner.n_columns()
    }

    fn transform(&self, record: &StringRecord, row: usize) -> Result<Vec<f32>> {
        self.rows.fetch_add(1, Ordering::Relaxed);
        self.inner.transform(record, row)
    }
}

#[derive(Clone, Default)]
struct EventCounter {
    epochs_begun: Arc<AtomicUsize>,
    batches: Arc<AtomicUsize>,
    ended_with: Arc<Mutex<Option<usize>>>,
}

impl Callback for EventCounter {
    fn on_epoch_begin(&mut self, _epoch: usize) {
        self.epochs_begun.fetch_add(1, Ordering::Relaxed);
    }

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, loss: f64) {
        assert!(loss.is_finite());
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn on_train_end(&mut self, history: &[EpochLogs]) {
        *self.ended_with.lock().unwrap() = Some(history.len());
    }
}

#[test]
fn test_two_epochs_over_chunked_source() {
    let file = write_source(100);
    let targets: Vec<f32> = (0..100).map(|i| (i % 10) as f32 / 10.0).collect();
    let rows = Arc::new(AtomicUsize::new(0));
    let preprocessor = Arc::new(CountingPreprocessor {
        inner: preprocessor(),
        rows: Arc::clone(&rows),
    });

    let events = EventCounter::default();
    let history = History::new();
    let mut trainer = StreamTrainer::new(
        model(&preprocessor.inner, 1, false),
        StreamTrainerConfig::new(Objective::Regression),
        &Default::default(),
    )
    .unwrap()
    .with_callback(Box::new(events.clone()))
    .with_callback(Box::new(history.clone()));

    let result = trainer.fit(&file, &targets, preprocessor, 10, 2, 20).unwrap();

    assert_eq!(result.n_updates, 20);
    assert_eq!(result.epochs.len(), 2);
    assert_eq!(result.passes, 2);
    assert_eq!(rows.load(Ordering::Relaxed), 200, "every epoch re-reads the source");
    assert_eq!(events.epochs_begun.load(Ordering::Relaxed), 2);
    assert_eq!(events.batches.load(Ordering::Relaxed), 20);
    assert_eq!(*events.ended_with.lock().unwrap(), Some(2));

    assert_eq!(history.epoch_losses(), result.epoch_losses());
    let batch_losses = history.batch_losses();
    assert_eq!(batch_losses.len(), 20);
    let first_epoch_mean = batch_losses[..10].iter().sum::<f64>() / 10.0;
    assert!((first_epoch_mean - result.epochs[0].loss).abs() < 1e-9);
    println!("✓ epoch losses {:?}", result.epoch_losses());
}

#[test]
fn test_partial_final_batch_is_dropped() {
    let file = write_source(105);
    let targets = vec![0.5; 105];
    let preprocessor = Arc::new(preprocessor());
    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 1, false),
        StreamTrainerConfig::new(Objective::Regression),
        &Default::default(),
    )
    .unwrap();

    let result = trainer.fit(&file, &targets, preprocessor, 10, 1, 20).unwrap();
    assert_eq!(result.n_updates, 10);
    assert_eq!(result.epochs[0].n_batches, 10);
}

#[test]
fn test_batches_span_chunks_and_prefetch() {
    let file = write_source(60);
    let targets = vec![1.0; 60];
    let preprocessor = Arc::new(preprocessor());

    // chunk of 7 rows never lines up with batches of 10
    let cursor = StreamingDatasetCursor::new(file.path(), 7, Arc::clone(&preprocessor)).unwrap();
    let batches: Vec<_> = cursor.open(10).unwrap().collect::<Result<_>>().unwrap();
    assert_eq!(batches.len(), 6);
    let indices: Vec<usize> = batches.iter().flatten().map(|r| r.index).collect();
    assert_eq!(indices, (0..60).collect::<Vec<_>>());

    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 1, true),
        StreamTrainerConfig::new(Objective::Regression).with_prefetch(2),
        &Default::default(),
    )
    .unwrap();
    let result = trainer.fit(file.path(), &targets, preprocessor, 10, 3, 7).unwrap();
    assert_eq!(result.n_updates, 18);
    assert_eq!(result.passes, 3);
}

#[test]
fn test_classification_objectives() {
    let file = write_source(40);
    let preprocessor = Arc::new(preprocessor());

    let binary: Vec<f32> = (0..40).map(|i| (i % 2) as f32).collect();
    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 1, false),
        StreamTrainerConfig::new(Objective::Binary),
        &Default::default(),
    )
    .unwrap();
    let result = trainer.fit(file.path(), &binary, Arc::clone(&preprocessor), 8, 1, 16).unwrap();
    assert_eq!(result.n_updates, 5);

    let classes: Vec<f32> = (0..40).map(|i| (i % 3) as f32).collect();
    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 3, false),
        StreamTrainerConfig::new(Objective::Multiclass { n_classes: 3 }),
        &Default::default(),
    )
    .unwrap();
    let result = trainer.fit(file.path(), &classes, preprocessor, 8, 1, 16).unwrap();
    assert!(result.epochs[0].loss.is_finite());
}

#[test]
fn test_bad_row_stops_training() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "color,size,weight").unwrap();
    for i in 0..50 {
        if i == 35 {
            writeln!(file, "red,not-a-number,1").unwrap();
        } else {
            writeln!(file, "{},0.5,1", COLORS[i % 3]).unwrap();
        }
    }
    file.flush().unwrap();

    let preprocessor = Arc::new(preprocessor());
    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 1, false),
        StreamTrainerConfig::new(Objective::Regression),
        &Default::default(),
    )
    .unwrap();
    let err = trainer.fit(file.path(), &[0.0; 50], preprocessor, 10, 1, 20).unwrap_err();
    assert!(matches!(err, WideDeepError::Decode { row: 35, .. }), "unexpected error: {err}");
    assert_eq!(trainer.iteration(), 2);
}

#[test]
fn test_trained_model_is_returned() {
    let file = write_source(20);
    let preprocessor = Arc::new(preprocessor());
    let mut trainer = StreamTrainer::new(
        model(&preprocessor, 1, false),
        StreamTrainerConfig::new(Objective::Regression).with_learning_rate(1e-2),
        &Default::default(),
    )
    .unwrap();
    trainer.fit(file.path(), &vec![1.0; 20], preprocessor, 5, 1, 10).unwrap();

    let model = trainer.into_model();
    assert!(!model.has_wide());
}
