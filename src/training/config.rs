//! Training configuration
//!
//! Defaults reproduce the reference recipe: 6 epochs, batch size 16,
//! Adam at 1e-4, 224x224 inputs, `images/train` and `images/test`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::Augmentation;
use crate::utils::error::{PlantDoctorError, Result, ResultExt};
use crate::IMAGE_SIZE;

pub const DEFAULT_EPOCHS: usize = 6;
pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;
pub const DEFAULT_DATA_DIR: &str = "images";
pub const DEFAULT_CHECKPOINT_PATH: &str = "model/model.pt";

/// Training hyperparameters and paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset root holding `train/` and `test/`
    pub data_dir: PathBuf,

    /// Where the best checkpoint is written
    pub checkpoint_path: PathBuf,

    /// Number of training epochs
    pub epochs: usize,

    /// Batch size for training and evaluation
    pub batch_size: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Side length of the square network input
    pub image_size: usize,

    /// MobileNetV2 width multiplier
    pub width_mult: f64,

    /// Dropout before the classifier
    pub dropout: f64,

    /// Pretrained ImageNet backbone record (named MessagePack)
    pub pretrained: Option<PathBuf>,

    /// Seed for dataset and epoch shuffles; unseeded when absent
    pub seed: Option<u64>,

    /// Training-time augmentation
    pub augmentation: Augmentation,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            image_size: IMAGE_SIZE,
            width_mult: 1.0,
            dropout: 0.2,
            pretrained: None,
            seed: None,
            augmentation: Augmentation::default(),
        }
    }
}

impl TrainingConfig {
    pub fn train_dir(&self) -> PathBuf {
        self.data_dir.join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.data_dir.join("test")
    }

    /// Reject values the training loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(PlantDoctorError::Config("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PlantDoctorError::Config("batch_size must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(PlantDoctorError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.image_size < 32 {
            return Err(PlantDoctorError::Config(format!(
                "image_size must be at least 32, got {}",
                self.image_size
            )));
        }
        if !(self.width_mult > 0.0) {
            return Err(PlantDoctorError::Config("width_mult must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(PlantDoctorError::Config("dropout must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context_as(PlantDoctorError::Config, || format!("cannot read {:?}", path))?;
        let config: Self = serde_json::from_str(&json)
            .with_context_as(PlantDoctorError::Config, || format!("invalid config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 6);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.train_dir(), PathBuf::from("images/train"));
        assert_eq!(config.test_dir(), PathBuf::from("images/test"));
        assert_eq!(config.checkpoint_path, PathBuf::from("model/model.pt"));
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            TrainingConfig { epochs: 0, ..Default::default() },
            TrainingConfig { batch_size: 0, ..Default::default() },
            TrainingConfig { learning_rate: 0.0, ..Default::default() },
            TrainingConfig { image_size: 8, ..Default::default() },
            TrainingConfig { dropout: 1.0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(PlantDoctorError::Config(_))));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"epochs": 2, "seed": 7}"#).unwrap();

        let config = TrainingConfig::load(&path).unwrap();
        assert_eq!(config.epochs, 2);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train.json");
        let config = TrainingConfig {
            pretrained: Some(PathBuf::from("weights/mobilenet_v2")),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(TrainingConfig::load(&path).unwrap(), config);
    }
}
