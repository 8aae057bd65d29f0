//! Inference Predictor Module
//!
//! A [`Predictor`] owns a [`Classifier`] (anything that maps a normalized
//! image to class logits) and an [`AdviceTable`]. Given raw image bytes it
//! decodes, applies the eval transform, runs the classifier, takes the
//! softmax arg-max and attaches the advice for the winning label.
//!
//! Two classifiers ship with the crate:
//! - [`BurnClassifier`]: a MobileNetV2 restored from a checkpoint
//! - [`StubClassifier`]: random predictions for offline mode and tests

use std::path::Path;
use std::sync::Mutex;

use burn::prelude::*;
use image::DynamicImage;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::advice::AdviceTable;
use crate::dataset::batcher::image_to_tensor;
use crate::dataset::{ClassIndex, ImageTensor, ImageTransform};
use crate::model::{load_checkpoint, CheckpointMetadata, MobileNetV2};
use crate::utils::error::{PlantDoctorError, Result};

/// Response of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class name
    pub prediction: String,
    /// Softmax probability of the predicted class
    pub confidence: f32,
    /// Care advice for the predicted class
    pub advice: Vec<String>,
}

/// Maps a normalized image to one logit per class
pub trait Classifier: Send + Sync {
    /// Class map the logits are ordered by
    fn classes(&self) -> &ClassIndex;

    /// Side length of the expected input
    fn image_size(&self) -> usize;

    /// Unnormalized scores, one per class index
    fn logits(&self, image: &ImageTensor) -> Result<Vec<f32>>;
}

/// MobileNetV2 restored from a checkpoint, on a non-autodiff backend
pub struct BurnClassifier<B: Backend> {
    // Burn modules are Send but not Sync; only held while cloning
    model: Mutex<MobileNetV2<B>>,
    metadata: CheckpointMetadata,
    device: B::Device,
}

impl<B: Backend> BurnClassifier<B> {
    /// Load the checkpoint at `path` onto `device`
    pub fn from_checkpoint(path: &Path, device: &B::Device) -> Result<Self> {
        let (metadata, model) = load_checkpoint::<B>(path, device)?;
        Ok(Self::new(model, metadata, device.clone()))
    }

    pub fn new(model: MobileNetV2<B>, metadata: CheckpointMetadata, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            metadata,
            device,
        }
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn classes(&self) -> &ClassIndex {
        &self.metadata.class_to_idx
    }

    fn image_size(&self) -> usize {
        self.metadata.image_size
    }

    fn logits(&self, image: &ImageTensor) -> Result<Vec<f32>> {
        if image.size != self.metadata.image_size {
            return Err(PlantDoctorError::Inference(format!(
                "expected {}x{} input, got {}x{}",
                self.metadata.image_size, self.metadata.image_size, image.size, image.size
            )));
        }

        // Parameters are reference counted, so the clone shares weights and
        // the lock is released before the forward pass
        let model = self
            .model
            .lock()
            .map_err(|_| PlantDoctorError::Inference("model lock poisoned".into()))?
            .clone();

        let input = image_to_tensor::<B>(image, &self.device);
        let output = model.forward(input);

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PlantDoctorError::Inference(format!("failed to read logits: {:?}", e)))
    }
}

/// Random classifier for running without a trained model.
///
/// Picks a class uniformly and gives it a probability drawn from
/// `[0.75, 0.95]` (three decimals); the rest is spread evenly over the
/// other classes.
pub struct StubClassifier {
    classes: ClassIndex,
    image_size: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl StubClassifier {
    pub fn new(classes: ClassIndex, image_size: usize) -> Self {
        Self::with_rng(classes, image_size, ChaCha8Rng::from_entropy())
    }

    pub fn seeded(classes: ClassIndex, image_size: usize, seed: u64) -> Self {
        Self::with_rng(classes, image_size, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(classes: ClassIndex, image_size: usize, rng: ChaCha8Rng) -> Self {
        Self {
            classes,
            image_size,
            rng: Mutex::new(rng),
        }
    }
}

impl Classifier for StubClassifier {
    fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    fn image_size(&self) -> usize {
        self.image_size
    }

    fn logits(&self, _image: &ImageTensor) -> Result<Vec<f32>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| PlantDoctorError::Inference("stub rng lock poisoned".into()))?;

        let n = self.classes.len();
        let indices: Vec<usize> = (0..n).collect();
        let winner = *indices
            .choose(&mut *rng)
            .ok_or_else(|| PlantDoctorError::Inference("no classes to choose from".into()))?;
        let confidence = (rng.gen_range(0.75f32..=0.95) * 1000.0).round() / 1000.0;

        // Log-probabilities: softmax of these gives back the probabilities
        let rest = if n > 1 {
            ((1.0 - confidence) / (n - 1) as f32).ln()
        } else {
            f32::NEG_INFINITY
        };
        Ok((0..n)
            .map(|i| if i == winner { confidence.ln() } else { rest })
            .collect())
    }
}

/// Image bytes in, label + confidence + advice out
pub struct Predictor {
    classifier: Box<dyn Classifier>,
    advice: AdviceTable,
    transform: ImageTransform,
}

impl Predictor {
    pub fn new<C: Classifier + 'static>(classifier: C, advice: AdviceTable) -> Self {
        let transform = ImageTransform::eval(classifier.image_size());
        Self {
            classifier: Box::new(classifier),
            advice,
            transform,
        }
    }

    pub fn classes(&self) -> &ClassIndex {
        self.classifier.classes()
    }

    pub fn advice(&self) -> &AdviceTable {
        &self.advice
    }

    /// Decode `bytes` as an image (any supported format) and predict
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| PlantDoctorError::ImageDecode(e.to_string()))?;
        self.predict_image(&img)
    }

    /// Load an image file and predict
    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let img = image::open(path)
            .map_err(|e| PlantDoctorError::ImageLoad(path.to_path_buf(), e.to_string()))?;
        self.predict_image(&img)
    }

    pub fn predict_image(&self, img: &DynamicImage) -> Result<Prediction> {
        let input = self.transform.apply(img);
        let logits = self.classifier.logits(&input)?;

        let classes = self.classifier.classes();
        if logits.len() != classes.len() {
            return Err(PlantDoctorError::Inference(format!(
                "classifier returned {} logits for {} classes",
                logits.len(),
                classes.len()
            )));
        }

        let probabilities = softmax(&logits);
        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| PlantDoctorError::Inference("empty class map".into()))?;
        let label = classes
            .name_of(index)
            .ok_or_else(|| PlantDoctorError::Inference(format!("no class for index {}", index)))?
            .to_string();

        debug!("Predicted '{}' with confidence {:.3}", label, confidence);

        Ok(Prediction {
            advice: self.advice.lookup(&label),
            prediction: label,
            confidence,
        })
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest element; the first one wins ties
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
