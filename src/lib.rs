//! UPI transaction fraud scoring: feature engineering over transaction batches,
//! gradient-boosted classification, cost-sensitive thresholds and an HTTP scorer.

pub mod config;
pub mod csv_reader;
pub mod error;
pub mod features;
pub mod generator;
pub mod heuristic;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod profiles;
pub mod scoring;
pub mod server;
pub mod threshold;
pub mod training;

#[cfg(test)]
mod tests;
