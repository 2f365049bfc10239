use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tch::Device;

#[derive(Debug, Parser)]
#[command(name = "breed-classifier", version, about = "Dog breed classification with a frozen VGG19 backbone")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train the classification head, predict the test set and save the model.
    Train(Config),
    /// Predict the test set with a previously saved model.
    Predict(PredictConfig),
}

fn select_device(cpu: bool) -> Device {
    if cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    }
}

#[derive(Debug, Clone, Args, Serialize)]
pub struct Config {
    #[command(flatten)]
    pub data: DataConfig,

    #[command(flatten)]
    pub model: ModelConfig,

    #[command(flatten)]
    pub train: TrainConfig,

    /// Run on the CPU even when CUDA is available.
    #[arg(long)]
    pub cpu: bool,
}

impl Config {
    pub fn device(&self) -> Device {
        select_device(self.cpu)
    }
}

/// Arguments of `predict`: everything else comes from the saved `model.json`.
#[derive(Debug, Clone, Args, Serialize)]
pub struct PredictConfig {
    #[command(flatten)]
    pub test: TestData,

    /// Directory holding `model.ot` and `model.json`.
    #[arg(long, default_value = ".")]
    pub model_dir: PathBuf,

    /// Pretrained VGG19 weights, overriding the path recorded at training time.
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Batch size used when running the frozen backbone.
    #[arg(long, default_value_t = 64)]
    pub feature_batch_size: usize,

    /// Run on the CPU even when CUDA is available.
    #[arg(long)]
    pub cpu: bool,
}

impl PredictConfig {
    pub fn device(&self) -> Device {
        select_device(self.cpu)
    }
}

/// Test set inputs and the submission output, shared by `train` and `predict`.
#[derive(Debug, Clone, Args, Serialize)]
pub struct TestData {
    /// CSV whose first column lists the test image ids.
    #[arg(long, default_value = "./sample_submission.csv")]
    pub test_ids: PathBuf,

    /// Directory holding `<id>.jpg` test images.
    #[arg(long, default_value = "./test")]
    pub test_dir: PathBuf,

    #[arg(long, default_value = "./submission.csv")]
    pub submission: PathBuf,
}

#[derive(Debug, Clone, Args, Serialize)]
pub struct DataConfig {
    /// CSV with `id,breed` rows for the training images.
    #[arg(long, default_value = "./labels.csv")]
    pub labels: PathBuf,

    /// Directory holding `<id>.jpg` training images.
    #[arg(long, default_value = "./train")]
    pub train_dir: PathBuf,

    #[command(flatten)]
    pub test: TestData,

    /// Pretrained VGG19 weights in the tch `.ot` format.
    #[arg(long, default_value = "./vgg19.ot")]
    pub weights: PathBuf,

    /// Directory receiving `model.ot` and `model.json`.
    #[arg(long, default_value = ".")]
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Args, Serialize)]
pub struct ModelConfig {
    /// Side of the square images fed to the network.
    #[arg(long, default_value_t = 120)]
    pub image_size: i64,

    /// Hidden layer widths of the classification head.
    #[arg(long, value_delimiter = ',', default_value = "1024,512,256")]
    pub hidden: Vec<i64>,
}

#[derive(Debug, Clone, Args, Serialize)]
pub struct TrainConfig {
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.3)]
    pub valid_fraction: f64,

    /// Epochs without validation accuracy improvement before stopping, 0 disables.
    #[arg(long, default_value_t = 3)]
    pub patience: usize,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Batch size used when running the frozen backbone.
    #[arg(long, default_value_t = 64)]
    pub feature_batch_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            valid_fraction: 0.3,
            patience: 3,
            seed: 1,
            feature_batch_size: 64,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { image_size: 120, hidden: vec![1024, 512, 256] }
    }
}
