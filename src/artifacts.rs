use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::transform_pipeline::Normalizer;

pub const MODEL_FILE: &str = "model.ot";
pub const META_FILE: &str = "model.json";

/// Everything besides the head weights needed to rebuild the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub image_size: i64,
    pub hidden: Vec<i64>,
    pub normalizer: Normalizer,
    pub classes: Vec<String>,
    /// Pretrained backbone weights the head was trained on top of.
    pub backbone_weights: PathBuf,
}

impl ModelMeta {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig { image_size: self.image_size, hidden: self.hidden.clone() }
    }
}

pub fn model_path(dir: &Path) -> PathBuf {
    dir.join(MODEL_FILE)
}

pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_FILE)
}

pub fn save_meta(dir: &Path, meta: &ModelMeta) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
    let path = meta_path(dir);
    let file = File::create(&path).with_context(|| format!("creating {path:?}"))?;
    serde_json::to_writer_pretty(file, meta).with_context(|| format!("writing {path:?}"))
}

pub fn load_meta(dir: &Path) -> Result<ModelMeta> {
    let path = meta_path(dir);
    let file = File::open(&path).with_context(|| format!("opening {path:?}"))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {path:?}"))
}
