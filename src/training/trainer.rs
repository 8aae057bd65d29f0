//! Supervised fine-tuning loop
//!
//! A plain Burn training loop rather than the high-level `Learner`:
//! one Adam step per mini-batch, evaluation in inference mode after every
//! epoch, and a checkpoint written only when evaluation accuracy strictly
//! improves on the best seen so far (starting from 0.0).

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::TrainingConfig;
use crate::dataset::{
    ClassIndex, ImageFolder, ImageTransform, PlantBatch, PlantBatcher, PlantItem,
};
use crate::model::{save_checkpoint, CheckpointMetadata, MobileNetV2, MobileNetV2Config};
use crate::utils::error::{PlantDoctorError, Result};
use crate::utils::logging::TrainingLogger;

/// Running best evaluation accuracy.
///
/// Starts at 0.0; only a strictly greater accuracy counts as an improvement,
/// so an epoch that merely ties the best never triggers a save.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestAccuracy {
    best: f64,
}

impl BestAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Record `accuracy`; returns true when it beats the previous best
    pub fn update(&mut self, accuracy: f64) -> bool {
        if accuracy > self.best {
            self.best = accuracy;
            true
        } else {
            false
        }
    }
}

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean cross-entropy over the epoch's batches
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_accuracy: f64,
    /// Whether this epoch overwrote the checkpoint
    pub saved: bool,
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub classes: ClassIndex,
    pub history: Vec<EpochMetrics>,
    pub best_accuracy: f64,
    pub checkpoint_path: PathBuf,
}

impl TrainingSummary {
    /// Epochs after which the checkpoint was written
    pub fn saved_epochs(&self) -> Vec<usize> {
        self.history
            .iter()
            .filter(|m| m.saved)
            .map(|m| m.epoch)
            .collect()
    }

    /// Epoch whose weights are in the checkpoint, if any was written
    pub fn best_epoch(&self) -> Option<usize> {
        self.saved_epochs().last().copied()
    }
}

/// Train a MobileNetV2 on `config.train_dir()`, evaluating on `config.test_dir()`.
///
/// Any error (unreadable image, failed save) aborts the run; checkpoints
/// already written stay on disk.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingSummary> {
    train_with_observer::<B, _>(config, device, |_| {})
}

/// [`train`], calling `on_epoch` once each epoch's evaluation and any
/// checkpoint write have finished
pub fn train_with_observer<B, F>(
    config: &TrainingConfig,
    device: &B::Device,
    mut on_epoch: F,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
    F: FnMut(&EpochMetrics),
{
    config.validate()?;

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let train_set = ImageFolder::scan_with_rng(
        config.train_dir(),
        ImageTransform::with_augmentation(config.image_size, config.augmentation.clone()),
        &mut rng,
    )?;
    let test_set = ImageFolder::scan_with_rng(
        config.test_dir(),
        ImageTransform::eval(config.image_size),
        &mut rng,
    )?;

    if train_set.classes() != test_set.classes() {
        return Err(PlantDoctorError::Training(format!(
            "train classes {:?} differ from test classes {:?}",
            train_set.classes().names(),
            test_set.classes().names()
        )));
    }
    let classes = train_set.classes().clone();

    info!(
        "Training on {} images, evaluating on {} images, {} classes: {:?}",
        train_set.len(),
        test_set.len(),
        classes.len(),
        classes.names()
    );

    let model_config = MobileNetV2Config::new()
        .with_num_classes(classes.len())
        .with_width_mult(config.width_mult)
        .with_dropout(config.dropout);
    let mut model: MobileNetV2<B> = match &config.pretrained {
        Some(path) => {
            info!("Loading pretrained backbone from {:?}", path);
            model_config.init_pretrained(path, device)?
        }
        None => {
            warn!(
                "No pretrained weights configured, training from random initialization \
                 (run `plant_doctor convert` on torchvision weights and pass --pretrained)"
            );
            model_config.init(device)
        }
    };

    let mut optimizer = AdamConfig::new().init();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let batcher = PlantBatcher::new();

    let mut best = BestAccuracy::new();
    let mut history = Vec::with_capacity(config.epochs);
    let mut logger = TrainingLogger::new(config.epochs);

    for epoch in 1..=config.epochs {
        logger.start_epoch(epoch);

        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        indices.shuffle(&mut rng);
        let num_batches = indices.len().div_ceil(config.batch_size);
        let progress = epoch_progress(epoch, config.epochs, num_batches);

        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for chunk in indices.chunks(config.batch_size) {
            let items = load_items(&train_set, chunk)?;
            let batch: PlantBatch<B> = batcher.batch(items, device);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss += loss_value;
            correct += count_correct(output, batch.targets);
            seen += chunk.len();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);

            progress.inc(1);
            progress.set_message(format!("loss {:.4}", loss_value));
        }
        progress.finish_and_clear();

        let train_loss = epoch_loss / num_batches.max(1) as f64;
        let train_accuracy = ratio(correct, seen);

        let valid_model = model.valid();
        let val_accuracy = evaluate(&valid_model, &test_set, config.batch_size)?;
        logger.end_epoch(train_loss, train_accuracy, val_accuracy);

        let previous = best.best();
        let saved = best.update(val_accuracy);
        if saved {
            let metadata = CheckpointMetadata::new(
                classes.clone(),
                config.image_size,
                config.width_mult,
                epoch,
                val_accuracy,
            );
            save_checkpoint(&config.checkpoint_path, &valid_model, &metadata)?;
            logger.log_new_best(val_accuracy, previous);
        } else {
            debug!(
                "Accuracy {:.4} does not beat best {:.4}, checkpoint kept",
                val_accuracy, previous
            );
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss,
            train_accuracy,
            val_accuracy,
            saved,
        };
        on_epoch(&metrics);
        history.push(metrics);
    }

    logger.log_complete(best.best());

    Ok(TrainingSummary {
        classes,
        history,
        best_accuracy: best.best(),
        checkpoint_path: config.checkpoint_path.clone(),
    })
}

/// Accuracy of `model` over `dataset`, in order, without augmentation or autodiff.
///
/// Returns 0.0 for an empty dataset.
pub fn evaluate<B: Backend>(
    model: &MobileNetV2<B>,
    dataset: &ImageFolder,
    batch_size: usize,
) -> Result<f64> {
    let device = model.devices().into_iter().next().unwrap_or_default();
    let batcher = PlantBatcher::new();
    let indices: Vec<usize> = (0..dataset.len()).collect();

    let mut correct = 0usize;
    for chunk in indices.chunks(batch_size.max(1)) {
        let items = load_items(dataset, chunk)?;
        let batch: PlantBatch<B> = batcher.batch(items, &device);
        let output = model.forward(batch.images);
        correct += count_correct(output, batch.targets);
    }

    Ok(ratio(correct, dataset.len()))
}

/// Load the given samples in parallel, failing on the first unreadable image
fn load_items(dataset: &ImageFolder, indices: &[usize]) -> Result<Vec<PlantItem>> {
    indices.par_iter().map(|&i| dataset.load(i)).collect()
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = output.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

fn epoch_progress(epoch: usize, total_epochs: usize, num_batches: usize) -> ProgressBar {
    let progress = ProgressBar::new(num_batches as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.set_prefix(format!("epoch {}/{}", epoch, total_epochs));
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, CpuTrainingBackend};
    use crate::model::{load_checkpoint, load_metadata};
    use image::{ImageBuffer, Rgb};
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_best_accuracy_strict_improvement() {
        let mut best = BestAccuracy::new();
        let saves: Vec<usize> = [0.70, 0.70, 0.80, 0.75]
            .iter()
            .enumerate()
            .filter_map(|(i, &acc)| best.update(acc).then_some(i + 1))
            .collect();

        assert_eq!(saves, vec![1, 3]);
        assert_eq!(best.best(), 0.80);
    }

    #[test]
    fn test_zero_accuracy_never_saves() {
        let mut best = BestAccuracy::new();
        assert!(!best.update(0.0));
        assert!(best.update(0.01));
    }

    #[test]
    fn test_summary_saved_epochs() {
        let metrics = |epoch, saved| EpochMetrics {
            epoch,
            train_loss: 1.0,
            train_accuracy: 0.5,
            val_accuracy: 0.5,
            saved,
        };
        let summary = TrainingSummary {
            classes: ClassIndex::from_names(["a", "b"]),
            history: vec![metrics(1, true), metrics(2, false), metrics(3, true)],
            best_accuracy: 0.5,
            checkpoint_path: PathBuf::from("model/model.pt"),
        };
        assert_eq!(summary.saved_epochs(), vec![1, 3]);
        assert_eq!(summary.best_epoch(), Some(3));
    }

    /// Solid red leaves for `early_blight`, solid green for `healthy`
    fn write_split(root: &Path, per_class: usize) {
        for (class, color) in [("early_blight", [200u8, 40, 40]), ("healthy", [40u8, 200, 40])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(40, 40, Rgb(color));
                img.save(dir.join(format!("{}_{}.png", class, i))).unwrap();
            }
        }
    }

    fn tiny_config(dir: &Path) -> TrainingConfig {
        TrainingConfig {
            data_dir: dir.join("images"),
            checkpoint_path: dir.join("model").join("model.pt"),
            epochs: 2,
            batch_size: 2,
            learning_rate: 1e-3,
            image_size: 32,
            width_mult: 0.25,
            seed: Some(11),
            ..Default::default()
        }
    }

    #[test]
    fn test_short_run_writes_loadable_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = tiny_config(dir.path());
        write_split(&config.train_dir(), 3);
        write_split(&config.test_dir(), 2);

        let device = Default::default();
        let summary = train::<CpuTrainingBackend>(&config, &device).unwrap();

        assert_eq!(summary.history.len(), 2);
        assert_eq!(summary.classes.names(), ["early_blight", "healthy"]);
        for m in &summary.history {
            assert!(m.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&m.val_accuracy));
        }

        // Checkpoint exists iff some epoch beat 0.0
        match summary.best_epoch() {
            Some(epoch) => {
                let (meta, model) =
                    load_checkpoint::<CpuBackend>(&config.checkpoint_path, &device).unwrap();
                assert_eq!(meta.class_to_idx, summary.classes);
                assert_eq!(meta.epoch, epoch);
                assert_eq!(meta.accuracy, summary.best_accuracy);
                assert_eq!(model.num_classes(), 2);
            }
            None => assert!(!config.checkpoint_path.exists()),
        }
    }

    #[test]
    fn test_checkpoint_rewritten_only_on_strict_improvement() {
        let dir = TempDir::new().unwrap();
        let config = TrainingConfig {
            epochs: 4,
            ..tiny_config(dir.path())
        };
        write_split(&config.train_dir(), 3);
        write_split(&config.test_dir(), 2);

        let mut running_best = 0.0f64;
        let mut last_saved: Option<usize> = None;
        let mut observed = Vec::new();

        let summary = train_with_observer::<CpuTrainingBackend, _>(
            &config,
            &Default::default(),
            |m| {
                assert_eq!(m.saved, m.val_accuracy > running_best, "epoch {}", m.epoch);
                if m.saved {
                    running_best = m.val_accuracy;
                    last_saved = Some(m.epoch);
                }

                // The file on disk always holds the last improving epoch
                match last_saved {
                    Some(epoch) => {
                        let meta = load_metadata(&config.checkpoint_path).unwrap();
                        assert_eq!(meta.epoch, epoch);
                        assert_eq!(meta.accuracy, running_best);
                    }
                    None => assert!(!config.checkpoint_path.exists()),
                }
                observed.push(m.epoch);
            },
        )
        .unwrap();

        assert_eq!(observed, vec![1, 2, 3, 4]);
        assert_eq!(summary.best_epoch(), last_saved);
        assert_eq!(summary.best_accuracy, running_best);
    }

    #[test]
    fn test_mismatched_splits_rejected() {
        let dir = TempDir::new().unwrap();
        let config = tiny_config(dir.path());
        write_split(&config.train_dir(), 1);
        write_split(&config.test_dir(), 1);
        std::fs::create_dir_all(config.test_dir().join("late_blight")).unwrap();
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 8, Rgb([1, 2, 3]));
        img.save(config.test_dir().join("late_blight").join("x.png")).unwrap();

        let result = train::<CpuTrainingBackend>(&config, &Default::default());
        assert!(matches!(result, Err(PlantDoctorError::Training(_))));
    }

    #[test]
    fn test_missing_data_dir_fails_before_training() {
        let dir = TempDir::new().unwrap();
        let config = tiny_config(dir.path());
        let result = train::<CpuTrainingBackend>(&config, &Default::default());
        assert!(matches!(result, Err(PlantDoctorError::PathNotFound(_))));
        assert!(!config.checkpoint_path.exists());
    }

    #[test]
    fn test_evaluate_empty_and_counts() {
        let dir = TempDir::new().unwrap();
        write_split(dir.path(), 2);
        let folder = ImageFolder::scan(dir.path(), ImageTransform::eval(32)).unwrap();
        let model = MobileNetV2Config::new()
            .with_width_mult(0.25)
            .init::<CpuBackend>(&Default::default());

        let accuracy = evaluate(&model, &folder, 3).unwrap();
        // Four samples, so accuracy is a multiple of a quarter
        assert!([0.0, 0.25, 0.5, 0.75, 1.0].contains(&accuracy));
        assert_eq!(ratio(0, 0), 0.0);
    }
}
