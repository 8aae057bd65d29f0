//! Burn batching for plant images
//!
//! Items arrive already resized and normalized by the transform pipeline;
//! the batcher only stacks them into device tensors.

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use super::transform::ImageTensor;

/// A single transformed image with its label
#[derive(Debug, Clone)]
pub struct PlantItem {
    /// Normalized CHW image
    pub image: ImageTensor,
    /// Class index
    pub label: usize,
    /// Source file, for logging
    pub path: PathBuf,
}

/// A batch of images for training or evaluation
#[derive(Clone, Debug)]
pub struct PlantBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`PlantItem`]s into a [`PlantBatch`]
#[derive(Clone, Debug, Default)]
pub struct PlantBatcher;

impl PlantBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, PlantItem, PlantBatch<B>> for PlantBatcher {
    fn batch(&self, items: Vec<PlantItem>, device: &B::Device) -> PlantBatch<B> {
        let batch_size = items.len();
        let size = items.first().map(|item| item.image.size).unwrap_or(0);

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.data.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        PlantBatch { images, targets }
    }
}

/// Stack a single image into a `[1, 3, S, S]` tensor
pub fn image_to_tensor<B: Backend>(image: &ImageTensor, device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 4>::from_data(
        TensorData::new(image.data.clone(), [1, 3, image.size, image.size]),
        device,
    )
}
