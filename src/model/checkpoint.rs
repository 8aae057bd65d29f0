//! Checkpoint bundle
//!
//! A checkpoint is one gzip-compressed tar file holding:
//!
//! - `metadata.json`: class map, network shape and training provenance
//! - `model.bin`: the network weights (Burn binary record, full precision)
//!
//! Writes go to a sibling temporary file that is renamed over the target,
//! so an interrupted save leaves the previous checkpoint in place.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};
use tracing::info;

use super::mobilenet::{MobileNetV2, MobileNetV2Config};
use crate::dataset::ClassIndex;
use crate::utils::error::{PlantDoctorError, Result, ResultExt};

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// Bundle layout version written into the metadata
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to rebuild the network besides its weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    /// Class name -> output index the weights were trained against
    pub class_to_idx: ClassIndex,
    /// Side length of the square network input
    pub image_size: usize,
    /// MobileNetV2 width multiplier
    pub width_mult: f64,
    /// 1-based epoch that produced these weights
    pub epoch: usize,
    /// Evaluation accuracy of these weights, in [0, 1]
    pub accuracy: f64,
    pub trained_at: DateTime<Utc>,
}

impl CheckpointMetadata {
    pub fn new(
        class_to_idx: ClassIndex,
        image_size: usize,
        width_mult: f64,
        epoch: usize,
        accuracy: f64,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            class_to_idx,
            image_size,
            width_mult,
            epoch,
            accuracy,
            trained_at: Utc::now(),
        }
    }

    /// Network configuration matching these weights (dropout is inert at inference)
    pub fn model_config(&self) -> MobileNetV2Config {
        MobileNetV2Config::new()
            .with_num_classes(self.class_to_idx.len())
            .with_width_mult(self.width_mult)
    }
}

/// Write `model` and `metadata` to `path`, replacing any existing checkpoint
pub fn save_checkpoint<B: Backend>(
    path: &Path,
    model: &MobileNetV2<B>,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    if model.num_classes() != metadata.class_to_idx.len() {
        return Err(PlantDoctorError::Checkpoint(format!(
            "model has {} outputs but the class map has {} entries",
            model.num_classes(),
            metadata.class_to_idx.len()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| PlantDoctorError::Checkpoint(format!("failed to encode weights: {:?}", e)))?;
    let metadata_json = serde_json::to_vec_pretty(metadata)?;

    let tmp_path = temporary_path(path);
    {
        let file = File::create(&tmp_path)?;
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut builder, METADATA_ENTRY, &metadata_json)?;
        append_entry(&mut builder, WEIGHTS_ENTRY, &weights)?;
        builder.into_inner()?.finish()?;
    }
    std::fs::rename(&tmp_path, path)?;

    info!(
        "Saved checkpoint to {:?} (epoch {}, accuracy {:.2}%)",
        path,
        metadata.epoch,
        metadata.accuracy * 100.0
    );
    Ok(())
}

/// Read only the metadata of a checkpoint
pub fn load_metadata(path: &Path) -> Result<CheckpointMetadata> {
    let (metadata, _) = read_bundle(path)?;
    Ok(metadata)
}

/// Load a checkpoint and rebuild the network it describes on `device`.
///
/// Fails when the stored class map disagrees with the width of the stored
/// classifier head.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(CheckpointMetadata, MobileNetV2<B>)> {
    let (metadata, weights) = read_bundle(path)?;

    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(weights, device)
        .map_err(|e| {
            PlantDoctorError::Checkpoint(format!("failed to decode weights in {:?}: {:?}", path, e))
        })?;
    let model = metadata
        .model_config()
        .init::<B>(device)
        .load_record(record);

    if model.num_classes() != metadata.class_to_idx.len() {
        return Err(PlantDoctorError::Checkpoint(format!(
            "classifier head has {} outputs but the class map has {} entries",
            model.num_classes(),
            metadata.class_to_idx.len()
        )));
    }

    info!(
        "Loaded checkpoint {:?}: {} classes, epoch {}, accuracy {:.2}%",
        path,
        metadata.class_to_idx.len(),
        metadata.epoch,
        metadata.accuracy * 100.0
    );
    Ok((metadata, model))
}

fn read_bundle(path: &Path) -> Result<(CheckpointMetadata, Vec<u8>)> {
    if !path.is_file() {
        return Err(PlantDoctorError::PathNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut metadata = None;
    let mut weights = None;

    let entries = archive.entries().with_context_as(PlantDoctorError::Checkpoint, || {
        format!("unreadable bundle {:?}", path)
    })?;
    for entry in entries {
        let mut entry = entry.context_as(PlantDoctorError::Checkpoint, "corrupt bundle entry")?;
        let name = entry
            .path()
            .context_as(PlantDoctorError::Checkpoint, "bad entry name")?
            .to_string_lossy()
            .into_owned();

        let mut buffer = Vec::new();
        entry
            .read_to_end(&mut buffer)
            .with_context_as(PlantDoctorError::Checkpoint, || format!("failed to read {}", name))?;

        match name.as_str() {
            METADATA_ENTRY => {
                let parsed: CheckpointMetadata = serde_json::from_slice(&buffer)
                    .context_as(PlantDoctorError::Checkpoint, "invalid metadata.json")?;
                metadata = Some(parsed);
            }
            WEIGHTS_ENTRY => weights = Some(buffer),
            _ => {}
        }
    }

    let metadata = metadata.with_context_as(PlantDoctorError::Checkpoint, || {
        format!("{} missing from {:?}", METADATA_ENTRY, path)
    })?;
    let weights = weights.with_context_as(PlantDoctorError::Checkpoint, || {
        format!("{} missing from {:?}", WEIGHTS_ENTRY, path)
    })?;

    if metadata.format_version != FORMAT_VERSION {
        return Err(PlantDoctorError::Checkpoint(format!(
            "unsupported checkpoint format version {}",
            metadata.format_version
        )));
    }

    Ok((metadata, weights))
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use burn::tensor::{Distribution, Tensor};
    use tempfile::TempDir;

    fn tiny_model(num_classes: usize) -> MobileNetV2<CpuBackend> {
        MobileNetV2Config::new()
            .with_num_classes(num_classes)
            .with_width_mult(0.25)
            .init(&Default::default())
    }

    fn metadata(classes: &[&str]) -> CheckpointMetadata {
        CheckpointMetadata::new(ClassIndex::from_names(classes.iter().copied()), 32, 0.25, 3, 0.8)
    }

    #[test]
    fn test_roundtrip_preserves_map_and_outputs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model").join("model.pt");
        let device = Default::default();

        let model = tiny_model(2);
        let meta = metadata(&["early_blight", "healthy"]);
        save_checkpoint(&path, &model, &meta).unwrap();

        let (loaded_meta, loaded) = load_checkpoint::<CpuBackend>(&path, &device).unwrap();
        assert_eq!(loaded_meta, meta);
        assert_eq!(loaded.num_classes(), 2);

        let input = Tensor::<CpuBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let before = logits(&model, input.clone());
        let after = logits(&loaded, input);
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.pt");
        let model = tiny_model(2);

        save_checkpoint(&path, &model, &metadata(&["a", "b"])).unwrap();
        let mut second = metadata(&["a", "b"]);
        second.epoch = 5;
        save_checkpoint(&path, &model, &second).unwrap();

        assert_eq!(load_metadata(&path).unwrap().epoch, 5);
        assert!(!temporary_path(&path).exists());
    }

    #[test]
    fn test_save_rejects_mismatched_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.pt");
        let err = save_checkpoint(&path, &tiny_model(3), &metadata(&["a", "b"])).unwrap_err();
        assert!(matches!(err, PlantDoctorError::Checkpoint(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_rejects_head_width_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.pt");
        let model = tiny_model(2);
        save_checkpoint(&path, &model, &metadata(&["a", "b"])).unwrap();

        // Rewrite the bundle with a three-class map over the two-class weights
        let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();
        let tampered = serde_json::to_vec(&metadata(&["a", "b", "c"])).unwrap();
        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut builder, METADATA_ENTRY, &tampered).unwrap();
        append_entry(&mut builder, WEIGHTS_ENTRY, &weights).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let result = load_checkpoint::<CpuBackend>(&path, &Default::default());
        assert!(matches!(result, Err(PlantDoctorError::Checkpoint(_))));
    }

    #[test]
    fn test_missing_checkpoint() {
        let path = Path::new("/nonexistent/model.pt");
        let result = load_checkpoint::<CpuBackend>(path, &Default::default());
        assert!(matches!(result, Err(PlantDoctorError::PathNotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_checkpoint_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.pt");
        std::fs::write(&path, b"not a tarball").unwrap();
        assert!(load_metadata(&path).is_err());
    }

    fn logits(model: &MobileNetV2<CpuBackend>, input: Tensor<CpuBackend, 4>) -> Vec<f32> {
        model.forward(input).into_data().to_vec::<f32>().unwrap()
    }
}
