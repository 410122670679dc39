//! tabular-widedeep: Wide & Deep tabular models on Burn.
//!
//! The deep component is a stacked attention encoder over categorical and
//! continuous column embeddings (TabTransformer or SAINT blocks) followed by
//! an MLP head. Training streams a CSV source from disk in chunks.

pub mod widedeep;

pub use widedeep::error::{Result, WideDeepError};
pub use widedeep::models::TabularModel;
pub use widedeep::models::config::{BlockKind, ColumnIndex, ContinuousNormKind, TabTransformerConfig};
pub use widedeep::models::mlp::Activation;
pub use widedeep::models::transformer::{Saint, TabTransformer, TabularTransformer};
pub use widedeep::models::wide::{Wide, WideConfig};
pub use widedeep::models::wide_deep::WideDeep;
pub use widedeep::settings::Settings;
pub use widedeep::stream::preprocessor::{StreamPreprocessor, TabularPreprocessor};
pub use widedeep::stream::trainer::{StreamTrainer, StreamTrainerConfig, TrainingHistory};
pub use widedeep::training::callbacks::{Callback, EpochLogs, History};
pub use widedeep::training::loss_utils::Objective;
