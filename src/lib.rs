//! # Plant Doctor
//!
//! Plant disease classification from leaf photos with the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: image-folder indexing, transforms and batching
//! - `model`: MobileNetV2 and single-file checkpoints
//! - `training`: supervised fine-tuning with best-checkpoint saving
//! - `inference`: prediction from raw image bytes plus care advice
//! - `backend`: CPU / CUDA backend selection
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_doctor::backend::{CpuBackend, CpuTrainingBackend};
//! use plant_doctor::inference::{AdviceTable, BurnClassifier, Predictor};
//! use plant_doctor::training::{train, TrainingConfig};
//!
//! let summary = train::<CpuTrainingBackend>(&TrainingConfig::default(), &Default::default())?;
//!
//! let classifier = BurnClassifier::<CpuBackend>::from_checkpoint(&summary.checkpoint_path, &Default::default())?;
//! let predictor = Predictor::new(classifier, AdviceTable::default());
//! let prediction = predictor.predict_bytes(&std::fs::read("leaf.jpg")?)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{ClassIndex, ImageFolder, ImageTransform};
pub use inference::{AdviceTable, Classifier, Prediction, Predictor};
pub use model::{CheckpointMetadata, MobileNetV2, MobileNetV2Config};
pub use training::{TrainingConfig, TrainingSummary};
pub use utils::error::{PlantDoctorError, Result};

/// Default side length of the square network input
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
