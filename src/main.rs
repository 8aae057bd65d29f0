//! Plant Doctor CLI
//!
//! `train` fine-tunes MobileNetV2 on `<data>/train` and keeps the best
//! checkpoint by `<data>/test` accuracy; `infer` classifies images with a
//! checkpoint; `stats` summarizes a dataset folder; `convert` turns
//! torchvision ImageNet weights into a `--pretrained` record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use plant_doctor::backend::{self, ComputeDevice, CpuBackend, CpuTrainingBackend};
use plant_doctor::dataset::folder::is_image_file;
use plant_doctor::dataset::{ImageFolder, ImageTransform};
use plant_doctor::inference::{AdviceTable, BurnClassifier, Prediction, Predictor};
use plant_doctor::model::convert_torchvision;
use plant_doctor::training::{train, TrainingConfig, TrainingSummary};
use plant_doctor::utils::logging::{init_logging, LogConfig};

/// Plant disease classification with Burn
#[derive(Parser, Debug)]
#[command(name = "plant_doctor")]
#[command(version)]
#[command(about = "Train and run a MobileNetV2 plant disease classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run on the CPU even when a GPU is available
    #[arg(long)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fine-tune the classifier; every option defaults to the standard recipe
    Train {
        /// JSON training config; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Dataset root containing train/ and test/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Number of training epochs [default: 6]
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size [default: 16]
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Adam learning rate [default: 0.0001]
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Where to write the best checkpoint [default: model/model.pt]
        #[arg(short = 'o', long)]
        checkpoint: Option<PathBuf>,

        /// Pretrained ImageNet MobileNetV2 record written by `convert`
        #[arg(long)]
        pretrained: Option<PathBuf>,

        /// Seed for shuffling (unseeded by default)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Classify an image, or every image in a directory
    Infer {
        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Checkpoint to load
        #[arg(short, long, default_value = "model/model.pt")]
        model: PathBuf,

        /// JSON file mapping labels to advice lists
        #[arg(long)]
        advice: Option<PathBuf>,
    },

    /// Show class counts of a dataset folder
    Stats {
        /// Folder with one subdirectory per class
        #[arg(short, long, default_value = "images/train")]
        data_dir: PathBuf,
    },

    /// Import torchvision `mobilenet_v2` ImageNet weights for fine-tuning
    Convert {
        /// torchvision state dict (`.pth`)
        #[arg(short, long)]
        input: PathBuf,

        /// Output record path; `.mpk` is appended
        #[arg(short, long, default_value = "model/mobilenet_v2_imagenet")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    let device = backend::select_device(cli.cpu);
    info!("Backend: {}", device);

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            checkpoint,
            pretrained,
            seed,
        } => {
            let mut training = match config {
                Some(path) => TrainingConfig::load(&path)?,
                None => TrainingConfig::default(),
            };
            if let Some(v) = data_dir {
                training.data_dir = v;
            }
            if let Some(v) = epochs {
                training.epochs = v;
            }
            if let Some(v) = batch_size {
                training.batch_size = v;
            }
            if let Some(v) = learning_rate {
                training.learning_rate = v;
            }
            if let Some(v) = checkpoint {
                training.checkpoint_path = v;
            }
            if pretrained.is_some() {
                training.pretrained = pretrained;
            }
            if seed.is_some() {
                training.seed = seed;
            }

            cmd_train(&training, device)
        }
        Commands::Infer {
            input,
            model,
            advice,
        } => cmd_infer(&input, &model, advice.as_deref(), device),
        Commands::Stats { data_dir } => cmd_stats(&data_dir),
        Commands::Convert { input, output } => cmd_convert(&input, &output),
    }
}

fn cmd_train(config: &TrainingConfig, device: ComputeDevice) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data:          {:?}", config.data_dir);
    println!("  Checkpoint:    {:?}", config.checkpoint_path);
    println!("  Epochs:        {}", config.epochs);
    println!("  Batch size:    {}", config.batch_size);
    println!("  Learning rate: {}", config.learning_rate);
    println!("  Image size:    {}", config.image_size);
    println!("  Device:        {}", device);
    println!();

    let summary = match device {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => train::<backend::GpuTrainingBackend>(
            config,
            &backend::default_device::<backend::GpuBackend>(),
        )?,
        _ => train::<CpuTrainingBackend>(config, &backend::default_device::<CpuBackend>())?,
    };

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &TrainingSummary) {
    println!();
    println!("{}", "Training Complete!".green().bold());
    for m in &summary.history {
        println!(
            "  Epoch {:>2}: loss {:.4} | train {:.2}% | test {:.2}%{}",
            m.epoch,
            m.train_loss,
            m.train_accuracy * 100.0,
            m.val_accuracy * 100.0,
            if m.saved {
                " (saved)".green().to_string()
            } else {
                String::new()
            }
        );
    }

    match summary.best_epoch() {
        Some(epoch) => println!(
            "  Best test accuracy {:.2}% at epoch {}, checkpoint: {:?}",
            summary.best_accuracy * 100.0,
            epoch,
            summary.checkpoint_path
        ),
        None => println!(
            "  {} no epoch scored above 0%, no checkpoint written",
            "Warning:".yellow()
        ),
    }
}

fn cmd_infer(
    input: &Path,
    model: &Path,
    advice: Option<&Path>,
    device: ComputeDevice,
) -> Result<()> {
    let advice = match advice {
        Some(path) => AdviceTable::from_file(path)?,
        None => AdviceTable::default(),
    };

    let predictor = match device {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => Predictor::new(
            BurnClassifier::<backend::GpuBackend>::from_checkpoint(
                model,
                &backend::default_device::<backend::GpuBackend>(),
            )?,
            advice,
        ),
        _ => Predictor::new(
            BurnClassifier::<CpuBackend>::from_checkpoint(
                model,
                &backend::default_device::<CpuBackend>(),
            )?,
            advice,
        ),
    };

    let images: Vec<PathBuf> = if input.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(input)
            .with_context(|| format!("Failed to read {:?}", input))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();
        files
    } else {
        vec![input.to_path_buf()]
    };

    for path in images {
        let prediction = predictor.predict_path(&path)?;
        print_prediction(&path, &prediction);
    }

    Ok(())
}

fn print_prediction(path: &Path, prediction: &Prediction) {
    println!("{}", path.display().to_string().cyan().bold());
    println!(
        "  {} {} ({:.1}%)",
        "Prediction:".bold(),
        prediction.prediction.green(),
        prediction.confidence * 100.0
    );
    for line in &prediction.advice {
        println!("  - {}", line);
    }
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    let folder = ImageFolder::scan(data_dir, ImageTransform::eval(plant_doctor::IMAGE_SIZE))?;
    folder.stats().print();
    Ok(())
}

fn cmd_convert(input: &Path, output: &Path) -> Result<()> {
    convert_torchvision::<CpuBackend>(input, output, &backend::default_device::<CpuBackend>())
        .with_context(|| format!("Failed to convert {:?}", input))?;
    println!(
        "{} train with --pretrained {}",
        "Converted.".green().bold(),
        output.display()
    );
    Ok(())
}
