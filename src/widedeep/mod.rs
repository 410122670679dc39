//! Wide & Deep models for tabular data with attention-based deep encoders.

pub mod error;
pub mod models;
pub mod settings;
pub mod stream;
pub mod training;
