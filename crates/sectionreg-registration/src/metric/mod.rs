//! Similarity metrics.

pub mod trait_;
pub mod mse;

pub use trait_::Metric;
pub use mse::MeanSquares;
