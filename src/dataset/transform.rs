//! Image Transform Pipeline
//!
//! Turns a decoded image into a normalized `3 x S x S` CHW float buffer.
//!
//! - **Eval**: resize to `S x S` (aspect ratio not kept), normalize.
//!   Deterministic.
//! - **Train**: resize, then horizontal flip (p = 0.5), rotation by an angle
//!   drawn from `[-10, +10]` degrees, brightness and contrast jitter with
//!   factors in `[0.9, 1.1]`, then normalize.
//!
//! Normalization uses the ImageNet channel statistics the pretrained
//! backbone was trained with.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// ImageNet per-channel mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalized image in CHW layout
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    /// `3 * size * size` values, channel-major
    pub data: Vec<f32>,
    /// Side length in pixels
    pub size: usize,
}

impl ImageTensor {
    pub fn shape(&self) -> [usize; 3] {
        [3, self.size, self.size]
    }
}

/// Random perturbations applied by the training transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    /// Probability of a horizontal flip
    pub flip_prob: f64,
    /// Rotation angle is drawn uniformly from `[-max, +max]` degrees
    pub max_rotation_degrees: f32,
    /// Brightness factor is drawn from `[1 - b, 1 + b]`
    pub brightness: f32,
    /// Contrast factor is drawn from `[1 - c, 1 + c]`
    pub contrast: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            max_rotation_degrees: 10.0,
            brightness: 0.1,
            contrast: 0.1,
        }
    }
}

/// Eval or train image transform
#[derive(Debug, Clone)]
pub struct ImageTransform {
    image_size: u32,
    augmentation: Option<Augmentation>,
}

impl ImageTransform {
    /// Deterministic transform used for evaluation and inference
    pub fn eval(image_size: usize) -> Self {
        Self {
            image_size: image_size as u32,
            augmentation: None,
        }
    }

    /// Training transform with the default augmentation
    pub fn train(image_size: usize) -> Self {
        Self::with_augmentation(image_size, Augmentation::default())
    }

    pub fn with_augmentation(image_size: usize, augmentation: Augmentation) -> Self {
        Self {
            image_size: image_size as u32,
            augmentation: Some(augmentation),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    pub fn is_train(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Apply the transform, drawing randomness from the thread RNG
    pub fn apply(&self, img: &DynamicImage) -> ImageTensor {
        self.apply_with_rng(img, &mut rand::thread_rng())
    }

    /// Apply the transform with an explicit random source.
    ///
    /// The eval transform never touches `rng`.
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> ImageTensor {
        let mut rgb = resize_rgb(img, self.image_size);

        if let Some(aug) = &self.augmentation {
            rgb = augment(rgb, aug, rng);
        }

        ImageTensor {
            data: normalize_chw(&rgb),
            size: self.image_size as usize,
        }
    }
}

/// Resize to `size x size` with a bilinear filter and convert to RGB
pub fn resize_rgb(img: &DynamicImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.to_rgb8();
    }
    img.resize_exact(size, size, FilterType::Triangle).to_rgb8()
}

/// Convert an RGB image to a CHW buffer normalized with ImageNet statistics
pub fn normalize_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            data[c * plane + offset] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    data
}

fn augment<R: Rng + ?Sized>(mut img: RgbImage, aug: &Augmentation, rng: &mut R) -> RgbImage {
    if rng.gen_bool(aug.flip_prob.clamp(0.0, 1.0)) {
        img = imageops::flip_horizontal(&img);
    }

    if aug.max_rotation_degrees > 0.0 {
        let angle = rng.gen_range(-aug.max_rotation_degrees..=aug.max_rotation_degrees);
        img = rotate_about_center(&img, angle);
    }

    if aug.brightness > 0.0 {
        let factor = rng.gen_range(1.0 - aug.brightness..=1.0 + aug.brightness);
        scale_brightness(&mut img, factor);
    }

    if aug.contrast > 0.0 {
        let factor = rng.gen_range(1.0 - aug.contrast..=1.0 + aug.contrast);
        scale_contrast(&mut img, factor);
    }

    img
}

/// Rotate counter-clockwise by `degrees` on a canvas of the same size.
///
/// Pixels whose source falls outside the image are black.
pub fn rotate_about_center(img: &RgbImage, degrees: f32) -> RgbImage {
    if degrees == 0.0 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = degrees.to_radians().sin_cos();

    ImageBuffer::from_fn(width, height, |x, y| {
        // Inverse mapping: find where this output pixel comes from
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a - dy * sin_a;
        let src_y = cy + dx * sin_a + dy * cos_a;
        sample_bilinear(img, src_x, src_y)
    })
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;

    if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn scale_brightness(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blend every pixel with the mean grey level of the image
fn scale_contrast(img: &mut RgbImage, factor: f32) {
    let count = (img.width() * img.height()).max(1) as f64;
    let mean = (img
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum::<f64>()
        / count) as f32;

    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = mean + factor * (pixel[c] as f32 - mean);
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}
