//! Training module
//!
//! - `config`: hyperparameters, paths and their defaults
//! - `trainer`: the epoch loop, evaluation and best-checkpoint policy

pub mod config;
pub mod trainer;

pub use config::TrainingConfig;
pub use trainer::{
    evaluate, train, train_with_observer, BestAccuracy, EpochMetrics, TrainingSummary,
};
