//! Dataset module for image-folder datasets
//!
//! - `classes`: stable class name <-> index mapping
//! - `folder`: directory indexer with per-sample loading
//! - `transform`: resize / augment / normalize pipeline
//! - `batcher`: Burn batcher stacking items into tensors

pub mod batcher;
pub mod classes;
pub mod folder;
pub mod transform;

pub use batcher::{PlantBatch, PlantBatcher, PlantItem};
pub use classes::ClassIndex;
pub use folder::{DatasetStats, ImageFolder, Sample};
pub use transform::{Augmentation, ImageTensor, ImageTransform, IMAGENET_MEAN, IMAGENET_STD};
