//! Application state for the prediction server
//!
//! Built once at startup and shared read-only between requests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use plant_doctor::backend::{self, ComputeDevice, CpuBackend};
use plant_doctor::inference::{AdviceTable, BurnClassifier, Predictor, StubClassifier};
use plant_doctor::model::load_metadata;
use plant_doctor::{ClassIndex, IMAGE_SIZE};
use tracing::{info, warn};

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Checkpoint bundle produced by `plant_doctor train`
    pub checkpoint: PathBuf,
    /// Optional JSON advice table replacing the built-in one
    pub advice: Option<PathBuf>,
    /// Serve random predictions instead of loading the model
    pub stub: bool,
    /// Skip GPU detection
    pub force_cpu: bool,
    /// Maximum accepted request body in bytes
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("model/model.pt"),
            advice: None,
            stub: false,
            force_cpu: false,
            body_limit: 10 * 1024 * 1024,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub predictor: Predictor,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(predictor: Predictor) -> Self {
        Self { predictor }
    }

    /// Load the advice table and the classifier described by `config`.
    ///
    /// A missing or invalid checkpoint is fatal unless `config.stub` is set.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let advice = match &config.advice {
            Some(path) => AdviceTable::from_file(path)?,
            None => AdviceTable::default(),
        };
        info!("Advice table: {} labels", advice.len());

        let predictor = if config.stub {
            Predictor::new(stub_classifier(config), advice)
        } else {
            model_predictor(config, advice)?
        };

        info!("Serving classes: {:?}", predictor.classes().names());
        Ok(Self::new(predictor))
    }
}

fn model_predictor(config: &ServerConfig, advice: AdviceTable) -> Result<Predictor> {
    let device = backend::select_device(config.force_cpu);
    info!("Loading checkpoint {:?} on {}", config.checkpoint, device);

    let predictor = match device {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => Predictor::new(
            BurnClassifier::<backend::GpuBackend>::from_checkpoint(
                &config.checkpoint,
                &backend::default_device::<backend::GpuBackend>(),
            )
            .with_context(|| format!("Failed to load checkpoint {:?}", config.checkpoint))?,
            advice,
        ),
        _ => Predictor::new(
            BurnClassifier::<CpuBackend>::from_checkpoint(
                &config.checkpoint,
                &backend::default_device::<CpuBackend>(),
            )
            .with_context(|| format!("Failed to load checkpoint {:?}", config.checkpoint))?,
            advice,
        ),
    };
    Ok(predictor)
}

/// Stub over the checkpoint's classes when its metadata is readable,
/// otherwise over the two default classes
fn stub_classifier(config: &ServerConfig) -> StubClassifier {
    match load_metadata(&config.checkpoint) {
        Ok(metadata) => StubClassifier::new(metadata.class_to_idx, metadata.image_size),
        Err(e) => {
            warn!("Stub mode without checkpoint metadata ({}), using default classes", e);
            StubClassifier::new(ClassIndex::from_names(["early_blight", "healthy"]), IMAGE_SIZE)
        }
    }
}
