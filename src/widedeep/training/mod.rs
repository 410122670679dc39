//! Losses and training callbacks.

pub mod callbacks;
pub mod loss_utils;
