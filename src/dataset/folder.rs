//! Image-folder dataset indexer
//!
//! Indexes a directory tree of the form:
//!
//! ```text
//! root/
//! ├── early_blight/
//! │   ├── leaf_001.jpg
//! │   └── leaf_002.png
//! └── healthy/
//!     └── ...
//! ```
//!
//! Every immediate subdirectory is a class; its index is its position in
//! the sorted list of subdirectory names. Files directly under the root are
//! ignored. Within a class directory only `jpg`, `jpeg` and `png` files
//! (case-insensitive) are kept. The sample list is shuffled exactly once,
//! when the folder is scanned.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::ImageReader;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::batcher::PlantItem;
use super::classes::ClassIndex;
use super::transform::ImageTransform;
use crate::utils::error::{PlantDoctorError, Result};

/// File extensions accepted as images (compared lower-cased)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A single image file and its class label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Indexed image folder with an attached transform
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: ClassIndex,
    samples: Vec<Sample>,
    transform: ImageTransform,
}

impl ImageFolder {
    /// Scan `root` and shuffle the samples with the thread RNG
    pub fn scan<P: AsRef<Path>>(root: P, transform: ImageTransform) -> Result<Self> {
        Self::scan_with_rng(root, transform, &mut rand::thread_rng())
    }

    /// Scan `root` and shuffle the samples with `rng`
    pub fn scan_with_rng<P: AsRef<Path>, R: Rng + ?Sized>(
        root: P,
        transform: ImageTransform,
        rng: &mut R,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (classes, mut samples) = discover(&root)?;
        samples.shuffle(rng);

        info!(
            "Indexed {} images in {} classes under {:?}",
            samples.len(),
            classes.len(),
            root
        );

        Ok(Self {
            root,
            classes,
            samples,
            transform,
        })
    }

    /// Build from an already indexed sample list, kept in the given order.
    ///
    /// Every label must be a valid index into `classes`.
    pub fn from_parts(
        root: PathBuf,
        classes: ClassIndex,
        samples: Vec<Sample>,
        transform: ImageTransform,
    ) -> Result<Self> {
        if let Some(bad) = samples.iter().find(|s| s.label >= classes.len()) {
            return Err(PlantDoctorError::Dataset(format!(
                "sample {:?} has label {} but only {} classes exist",
                bad.path,
                bad.label,
                classes.len()
            )));
        }

        Ok(Self {
            root,
            classes,
            samples,
            transform,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    /// Samples in shuffled order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Load the `index`-th sample, decode it as RGB and apply the transform.
    ///
    /// An unreadable or corrupt image is an error.
    pub fn load(&self, index: usize) -> Result<PlantItem> {
        self.load_with_rng(index, &mut rand::thread_rng())
    }

    /// [`ImageFolder::load`] with an explicit random source for the transform
    pub fn load_with_rng<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<PlantItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            PlantDoctorError::Dataset(format!(
                "index {} out of range for dataset of {} samples",
                index,
                self.samples.len()
            ))
        })?;

        let img = ImageReader::open(&sample.path)
            .map_err(|e| PlantDoctorError::ImageLoad(sample.path.clone(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| PlantDoctorError::ImageLoad(sample.path.clone(), e.to_string()))?
            .decode()
            .map_err(|e| PlantDoctorError::ImageLoad(sample.path.clone(), e.to_string()))?;

        Ok(PlantItem {
            image: self.transform.apply_with_rng(&img, rng),
            label: sample.label,
            path: sample.path.clone(),
        })
    }

    /// Per-class sample counts
    pub fn stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            root: self.root.clone(),
            total_samples: self.samples.len(),
            class_names: self.classes.names().to_vec(),
            class_counts,
        }
    }
}

impl Dataset<PlantItem> for ImageFolder {
    fn get(&self, index: usize) -> Option<PlantItem> {
        match self.load(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Index `root` without shuffling.
///
/// Classes come back sorted; samples are grouped by class and sorted by file
/// name within a class.
pub fn discover(root: &Path) -> Result<(ClassIndex, Vec<Sample>)> {
    if !root.is_dir() {
        return Err(PlantDoctorError::PathNotFound(root.to_path_buf()));
    }

    let mut class_names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        // Follows symlinks so a linked class directory keeps its slot
        if !std::fs::metadata(entry.path())?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => class_names.push(name),
            Err(name) => warn!("Ignoring class directory with non UTF-8 name: {:?}", name),
        }
    }

    if class_names.is_empty() {
        return Err(PlantDoctorError::Dataset(format!(
            "no class directories found under {:?}",
            root
        )));
    }

    let classes = ClassIndex::from_names(class_names);
    let mut samples = Vec::new();

    for (label, class_name) in classes.names().iter().enumerate() {
        let class_dir = root.join(class_name);
        let before = samples.len();

        for entry in WalkDir::new(&class_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = entry.map_err(|e| {
                PlantDoctorError::Dataset(format!("failed to read {:?}: {}", class_dir, e))
            })?;
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                samples.push(Sample {
                    path: entry.into_path(),
                    label,
                });
            }
        }

        let count = samples.len() - before;
        if count == 0 {
            return Err(PlantDoctorError::Dataset(format!(
                "class '{}' has no jpg/jpeg/png images",
                class_name
            )));
        }
        debug!("Class '{}' (label {}): {} images", class_name, label, count);
    }

    Ok((classes, samples))
}

/// Whether `path` has an accepted image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Statistics about an indexed folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub root: PathBuf,
    pub total_samples: usize,
    /// Class names ordered by index
    pub class_names: Vec<String>,
    /// Sample count per class index
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Print statistics to console
    pub fn print(&self) {
        println!("\nDataset: {:?}", self.root);
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes());
        println!("\n  Samples per class:");

        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar_len = (*count as f32 / self.total_samples.max(1) as f32 * 40.0) as usize;
            println!("    {:3}. {:30} {:6} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}
