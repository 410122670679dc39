//! Out-of-core training: chunked CSV reading, preprocessing and the trainer.

pub mod batcher;
pub mod dataset;
pub mod preprocessor;
pub mod trainer;
