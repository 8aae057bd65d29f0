//! Import of torchvision ImageNet weights
//!
//! torchvision's `mobilenet_v2` state dict names its layers positionally
//! (`features.N.conv.M.*`, `classifier.1.*`). [`convert_torchvision`] reads
//! such a `.pth` file with burn-import, renames every key into this crate's
//! module tree (`stem`, `blocks.N.{expand,depthwise,project}`, `head`,
//! `classifier`) and stores the result as a named MessagePack record that
//! [`MobileNetV2Config::init_pretrained`] accepts.
//!
//! BatchNorm `weight`/`bias` and the transposed Linear weight are adapted
//! by the PyTorch recorder itself.

use std::path::Path;

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::info;

use super::mobilenet::{
    MobileNetV2Config, MobileNetV2Record, IMAGENET_CLASSES, INVERTED_RESIDUAL_SETTINGS,
};
use crate::utils::error::{PlantDoctorError, Result};

/// `(torchvision prefix, local prefix)` pairs covering every parameter of
/// the reference (width 1.0) network
pub fn torchvision_prefixes() -> Vec<(String, String)> {
    let mut rules = vec![
        ("features.0.0.".to_string(), "stem.conv.".to_string()),
        ("features.0.1.".to_string(), "stem.bn.".to_string()),
    ];

    let expands = INVERTED_RESIDUAL_SETTINGS
        .iter()
        .flat_map(|&(t, _, n, _)| std::iter::repeat(t != 1).take(n));

    let mut num_blocks = 0;
    for (block, has_expand) in expands.enumerate() {
        let layers: &[(&str, &str)] = if has_expand {
            &[
                ("0.0.", "expand.conv."),
                ("0.1.", "expand.bn."),
                ("1.0.", "depthwise.conv."),
                ("1.1.", "depthwise.bn."),
                ("2.", "project.conv."),
                ("3.", "project.bn."),
            ]
        } else {
            &[
                ("0.0.", "depthwise.conv."),
                ("0.1.", "depthwise.bn."),
                ("1.", "project.conv."),
                ("2.", "project.bn."),
            ]
        };

        for (torch, local) in layers {
            rules.push((
                format!("features.{}.conv.{}", block + 1, torch),
                format!("blocks.{}.{}", block, local),
            ));
        }
        num_blocks += 1;
    }

    let head = num_blocks + 1;
    rules.push((format!("features.{}.0.", head), "head.conv.".to_string()));
    rules.push((format!("features.{}.1.", head), "head.bn.".to_string()));
    rules.push(("classifier.1.".to_string(), "classifier.".to_string()));
    rules
}

/// Anchored regex and replacement for one prefix rule
fn remap_rule(torch: &str, local: &str) -> (String, String) {
    (
        format!("^{}(.+)$", torch.replace('.', r"\.")),
        format!("{}${{1}}", local),
    )
}

/// Convert a torchvision `mobilenet_v2` ImageNet state dict at `input`
/// into a named MessagePack record at `output` (`.mpk` is appended).
pub fn convert_torchvision<B: Backend>(
    input: &Path,
    output: &Path,
    device: &B::Device,
) -> Result<()> {
    if !input.is_file() {
        return Err(PlantDoctorError::PathNotFound(input.to_path_buf()));
    }

    let load_args = torchvision_prefixes()
        .iter()
        .map(|(torch, local)| remap_rule(torch, local))
        .fold(LoadArgs::new(input.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        });

    let record: MobileNetV2Record<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, device)
        .map_err(|e| {
            PlantDoctorError::Model(format!(
                "failed to read torchvision weights from {:?}: {:?}",
                input, e
            ))
        })?;

    let model = MobileNetV2Config::new()
        .with_num_classes(IMAGENET_CLASSES)
        .init::<B>(device)
        .load_record(record);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    model
        .save_file(
            output.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| {
            PlantDoctorError::Model(format!("failed to write {:?}: {:?}", output, e))
        })?;

    info!("Converted {:?} into {:?}", input, output.with_extension("mpk"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::model::MobileNetV2;
    use burn::record::Record;
    use std::collections::BTreeSet;

    /// State dict keys of torchvision's `mobilenet_v2()`
    fn torchvision_keys() -> Vec<String> {
        let bn = |prefix: String| {
            ["weight", "bias", "running_mean", "running_var", "num_batches_tracked"]
                .into_iter()
                .map(move |p| format!("{}{}", prefix, p))
        };

        let mut keys = vec!["features.0.0.weight".to_string()];
        keys.extend(bn("features.0.1.".into()));

        keys.push("features.1.conv.0.0.weight".into());
        keys.extend(bn("features.1.conv.0.1.".into()));
        keys.push("features.1.conv.1.weight".into());
        keys.extend(bn("features.1.conv.2.".into()));

        for i in 2..=17 {
            keys.push(format!("features.{}.conv.0.0.weight", i));
            keys.extend(bn(format!("features.{}.conv.0.1.", i)));
            keys.push(format!("features.{}.conv.1.0.weight", i));
            keys.extend(bn(format!("features.{}.conv.1.1.", i)));
            keys.push(format!("features.{}.conv.2.weight", i));
            keys.extend(bn(format!("features.{}.conv.3.", i)));
        }

        keys.push("features.18.0.weight".into());
        keys.extend(bn("features.18.1.".into()));
        keys.push("classifier.1.weight".into());
        keys.push("classifier.1.bias".into());
        keys
    }

    /// Apply the prefix table and the BatchNorm renames the recorder performs
    fn local_key(key: &str) -> Option<String> {
        if key.ends_with("num_batches_tracked") {
            return None;
        }
        let renamed = torchvision_prefixes().into_iter().find_map(|(torch, local)| {
            key.strip_prefix(torch.as_str())
                .map(|rest| format!("{}{}", local, rest))
        })?;

        if renamed.contains(".bn.") {
            Some(
                renamed
                    .replace(".bn.weight", ".bn.gamma")
                    .replace(".bn.bias", ".bn.beta"),
            )
        } else {
            Some(renamed)
        }
    }

    /// Dotted paths of every parameter in a serialized record
    fn param_paths(value: &serde_json::Value, prefix: &str, out: &mut BTreeSet<String>) {
        match value {
            serde_json::Value::Object(map) if map.contains_key("id") && map.contains_key("param") => {
                out.insert(prefix.to_string());
            }
            serde_json::Value::Object(map) => {
                for (name, child) in map {
                    param_paths(child, &join(prefix, name), out);
                }
            }
            serde_json::Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    param_paths(child, &join(prefix, &i.to_string()), out);
                }
            }
            _ => {}
        }
    }

    fn join(prefix: &str, name: &str) -> String {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    }

    #[test]
    fn test_remap_rules_are_anchored_regexes() {
        let (pattern, replacement) = remap_rule("features.1.conv.0.0.", "blocks.0.depthwise.conv.");
        assert_eq!(pattern, r"^features\.1\.conv\.0\.0\.(.+)$");
        assert_eq!(replacement, "blocks.0.depthwise.conv.${1}");
    }

    #[test]
    fn test_torchvision_keys_cover_every_parameter() {
        // Key names do not depend on the width, so a narrow model keeps this fast
        let model: MobileNetV2<CpuBackend> = MobileNetV2Config::new()
            .with_num_classes(IMAGENET_CLASSES)
            .with_width_mult(0.1)
            .init(&Default::default());
        let item = model.into_record().into_item::<FullPrecisionSettings>();
        let json = serde_json::to_value(item).unwrap();

        let mut expected = BTreeSet::new();
        param_paths(&json, "", &mut expected);

        let mapped: BTreeSet<String> =
            torchvision_keys().iter().filter_map(|k| local_key(k)).collect();

        assert_eq!(expected.len(), 262);
        assert_eq!(mapped, expected);
    }

    #[test]
    fn test_every_torchvision_key_has_a_rule() {
        for key in torchvision_keys() {
            assert!(
                torchvision_prefixes()
                    .iter()
                    .any(|(torch, _)| key.starts_with(torch.as_str())),
                "no rule for {}",
                key
            );
        }
    }

    #[test]
    fn test_convert_missing_input() {
        let result = convert_torchvision::<CpuBackend>(
            Path::new("/nonexistent/mobilenet_v2.pth"),
            Path::new("/tmp/unused"),
            &Default::default(),
        );
        assert!(matches!(result, Err(PlantDoctorError::PathNotFound(_))));
    }
}
