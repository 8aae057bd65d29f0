//! Inference module
//!
//! - `advice`: label -> care advice lookup with a fixed fallback
//! - `predictor`: checkpoint-backed (or stub) prediction from raw image bytes

pub mod advice;
pub mod predictor;

pub use advice::{AdviceTable, NO_ADVICE};
pub use predictor::{
    argmax, softmax, BurnClassifier, Classifier, Prediction, Predictor, StubClassifier,
};
