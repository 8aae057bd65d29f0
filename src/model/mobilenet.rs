//! MobileNetV2 for plant disease classification
//!
//! Standard MobileNetV2 topology (inverted residual blocks with linear
//! bottlenecks, ReLU6 activations) with a single linear classifier head.
//! The head width equals the number of classes, and can be swapped after
//! loading a backbone trained on a different label set.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::activation::softmax,
};
use std::path::Path;

use crate::utils::error::PlantDoctorError;

/// Inverted residual settings: (expansion t, output channels c, repeats n, first stride s)
pub(crate) const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// Number of classes of the ImageNet head shipped with pretrained backbones
pub const IMAGENET_CLASSES: usize = 1000;

/// Configuration for [`MobileNetV2`]
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// Output classes of the classifier head
    #[config(default = "2")]
    pub num_classes: usize,

    /// Channel width multiplier (1.0 is the reference network)
    #[config(default = "1.0")]
    pub width_mult: f64,

    /// Dropout before the classifier
    #[config(default = "0.2")]
    pub dropout: f64,
}

impl MobileNetV2Config {
    /// Initialize a randomly weighted network
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let stem_channels = make_divisible(STEM_CHANNELS as f64 * self.width_mult);
        let last_channels = make_divisible(LAST_CHANNELS as f64 * self.width_mult.max(1.0));

        let stem = ConvBnRelu6::new(3, stem_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = stem_channels;
        for (expand, channels, repeats, stride) in INVERTED_RESIDUAL_SETTINGS {
            let out_channels = make_divisible(channels as f64 * self.width_mult);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    stride,
                    expand,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        let head = ConvBnRelu6::new(in_channels, last_channels, 1, 1, 0, device);

        MobileNetV2 {
            stem,
            blocks,
            head,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(last_channels, self.num_classes).init(device),
        }
    }

    /// Initialize from a pretrained ImageNet record, then replace the head.
    ///
    /// The record at `path` must have been saved from a [`MobileNetV2`] with
    /// the same `width_mult` and a 1000-way head, using the named
    /// MessagePack recorder. [`convert_torchvision`](super::convert::convert_torchvision)
    /// produces one from torchvision's weights.
    pub fn init_pretrained<B: Backend>(
        &self,
        path: &Path,
        device: &B::Device,
    ) -> crate::utils::error::Result<MobileNetV2<B>> {
        let imagenet = self.clone().with_num_classes(IMAGENET_CLASSES);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let model = imagenet
            .init::<B>(device)
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                PlantDoctorError::Model(format!(
                    "failed to load pretrained weights from {:?}: {:?}",
                    path, e
                ))
            })?;

        Ok(model.replace_classifier(self.num_classes, device))
    }
}

/// Round channel counts to a multiple of 8, never dropping more than 10%
pub fn make_divisible(value: f64) -> usize {
    const DIVISOR: usize = 8;
    let rounded = ((value + DIVISOR as f64 / 2.0) as usize / DIVISOR * DIVISOR).max(DIVISOR);
    if (rounded as f64) < 0.9 * value {
        rounded + DIVISOR
    } else {
        rounded
    }
}

/// Conv -> BatchNorm -> ReLU6
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBnRelu6<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        Self::grouped(in_channels, out_channels, kernel_size, stride, padding, 1, device)
    }

    fn grouped(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        x.clamp(0.0, 6.0)
    }
}

/// 1x1 linear projection: Conv -> BatchNorm, no activation
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn pointwise(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Inverted residual block: expand (1x1) -> depthwise (3x3) -> project (1x1)
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnRelu6<B>>,
    depthwise: ConvBnRelu6<B>,
    project: ConvBn<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvBnRelu6::new(in_channels, hidden, 1, 1, 0, device));

        Self {
            expand,
            depthwise: ConvBnRelu6::grouped(hidden, hidden, 3, stride, 1, hidden, device),
            project: ConvBn::pointwise(hidden, out_channels, device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = match &self.expand {
            Some(expand) => expand.forward(x.clone()),
            None => x.clone(),
        };
        out = self.depthwise.forward(out);
        out = self.project.forward(out);

        if self.use_residual {
            out + x
        } else {
            out
        }
    }
}

/// MobileNetV2 classifier
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBnRelu6<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    /// Final linear layer; weight shape is `[features, num_classes]`
    pub classifier: Linear<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// Pooled feature vector of shape `[batch_size, features]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(self.head.forward(x));

        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Logits of shape `[batch_size, num_classes]` for input `[batch_size, 3, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Width of the classifier head
    pub fn num_classes(&self) -> usize {
        self.classifier.weight.val().dims()[1]
    }

    /// Width of the pooled feature vector
    pub fn num_features(&self) -> usize {
        self.classifier.weight.val().dims()[0]
    }

    /// Swap the classifier for a freshly initialized one of width `num_classes`
    pub fn replace_classifier(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.classifier = LinearConfig::new(self.num_features(), num_classes).init(device);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    fn tiny(num_classes: usize) -> MobileNetV2<CpuBackend> {
        MobileNetV2Config::new()
            .with_num_classes(num_classes)
            .with_width_mult(0.25)
            .init::<CpuBackend>(&Default::default())
    }

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(32.0), 32);
        assert_eq!(make_divisible(8.0), 8);
        assert_eq!(make_divisible(4.0), 8);
        assert_eq!(make_divisible(24.0 * 0.75), 24);
        assert_eq!(make_divisible(1280.0), 1280);
    }

    #[test]
    fn test_reference_topology() {
        let model = MobileNetV2Config::new().init::<CpuBackend>(&Default::default());
        assert_eq!(model.blocks.len(), 17);
        assert_eq!(model.num_features(), 1280);
        assert_eq!(model.num_classes(), 2);
        assert!(model.blocks[0].expand.is_none());
        assert!(model.blocks[2].use_residual);
        assert!(!model.blocks[1].use_residual);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = tiny(2);
        let input = Tensor::<CpuBackend, 4>::zeros([2, 3, 32, 32], &device);

        assert_eq!(model.forward(input).dims(), [2, 2]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = tiny(3);
        let input = Tensor::<CpuBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let probs = model.forward_softmax(input).into_data().to_vec::<f32>().unwrap();
        for row in probs.chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_replace_classifier() {
        let device = Default::default();
        let model = tiny(IMAGENET_CLASSES).replace_classifier(2, &device);
        assert_eq!(model.num_classes(), 2);
        assert_eq!(model.num_features(), 1280);
    }

    #[test]
    fn test_pretrained_keeps_backbone_and_replaces_head() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("imagenet");
        let device = Default::default();

        let imagenet = tiny(IMAGENET_CLASSES);
        let stem_weights = imagenet.stem.conv.weight.val().into_data();
        imagenet
            .save_file(
                path.clone(),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();

        let model = MobileNetV2Config::new()
            .with_num_classes(3)
            .with_width_mult(0.25)
            .init_pretrained::<CpuBackend>(&path, &device)
            .unwrap();

        assert_eq!(model.num_classes(), 3);
        model
            .stem
            .conv
            .weight
            .val()
            .into_data()
            .assert_eq(&stem_weights, true);
    }

    #[test]
    fn test_pretrained_missing_file() {
        let device = Default::default();
        let result = MobileNetV2Config::new()
            .with_width_mult(0.25)
            .init_pretrained::<CpuBackend>(Path::new("/nonexistent/mobilenet_v2"), &device);
        assert!(matches!(result, Err(PlantDoctorError::Model(_))));
    }
}
