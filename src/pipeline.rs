use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, info};
use tch::Tensor;

use crate::artifacts::{self, ModelMeta};
use crate::config::{Config, PredictConfig, TestData};
use crate::dataloader::load_images;
use crate::labels::{read_labels, read_test_ids, LabelEncoder};
use crate::model::TransferNet;
use crate::predict::predict_proba;
use crate::split::train_valid_split;
use crate::submission::save_submission;
use crate::train::Trainer;
use crate::transform_pipeline::{Normalizer, TransformPipeline};
use crate::utils::index_tensor;

fn select(xs: &Tensor, indices: &[usize]) -> Tensor {
    xs.index_select(0, &index_tensor(indices).to_device(xs.device()))
}

/// Loads the test images, predicts them and writes the submission file.
fn predict_test_set(
    net: &TransferNet,
    meta: &ModelMeta,
    test: &TestData,
    feature_batch_size: usize,
) -> Result<()> {
    let ids: Vec<String> = read_test_ids(&test.test_ids)?
        .into_iter()
        .map(|r| r.id)
        .collect();
    info!("predicting {} test images", ids.len());

    let pipeline = TransformPipeline::resize_to_float(meta.image_size);
    let xs = meta.normalizer.apply(&load_images(&test.test_dir, &ids, &pipeline)?);

    let features = net.features(&xs, feature_batch_size);
    let probs = predict_proba(net, &features, feature_batch_size);
    save_submission(&test.submission, &meta.classes, &ids, &probs)?;
    info!("wrote submission to {:?}", test.submission);
    Ok(())
}

pub fn run_train(config: &Config) -> Result<()> {
    let start = Instant::now();
    let device = config.device();
    tch::manual_seed(config.train.seed as i64);
    debug!("config: {}", serde_json::to_string(config)?);
    info!("using device {device:?}");

    let labels = read_labels(&config.data.labels)?;
    let encoder = LabelEncoder::fit(labels.iter().map(|r| r.breed.as_str()));
    let ys = encoder.one_hot_matrix(labels.iter().map(|r| r.breed.as_str()))?;
    info!("{} labeled images, {} classes", labels.len(), encoder.len());

    let pipeline = TransformPipeline::resize_to_float(config.model.image_size);
    let ids: Vec<&str> = labels.iter().map(|r| r.id.as_str()).collect();
    let xs = load_images(&config.data.train_dir, &ids, &pipeline)?;

    let normalizer = Normalizer::fit(&xs)?;
    let xs = normalizer.apply(&xs);
    info!(
        "images {:?}, labels {:?}, mean {:.3}, std {:.3}",
        xs.size(),
        ys.size(),
        normalizer.mean,
        normalizer.std
    );

    let split = train_valid_split(labels.len(), config.train.valid_fraction, config.train.seed)?;
    info!("{} training / {} validation samples", split.train.len(), split.valid.len());

    // Recorded in model.json, so it must not depend on the working directory.
    let weights = fs::canonicalize(&config.data.weights)
        .with_context(|| format!("resolving pretrained weights {:?}", config.data.weights))?;
    let mut net = TransferNet::new(&config.model, encoder.len() as i64, device);
    net.backbone.load(&weights)?;

    let features = net.features(&xs, config.train.feature_batch_size);
    drop(xs);
    let ys = ys.to_device(device);
    let report = Trainer::new(&net, &config.train).fit(
        &select(&features, &split.train),
        &select(&ys, &split.train),
        &select(&features, &split.valid),
        &select(&ys, &split.valid),
    )?;
    if let Some(last) = report.last() {
        info!(
            "trained {} epochs{}, final val_acc {:.2}%",
            last.epoch,
            if report.stopped_early { " (early stop)" } else { "" },
            100. * last.valid_accuracy
        );
    }

    let meta = ModelMeta {
        image_size: config.model.image_size,
        hidden: config.model.hidden.clone(),
        normalizer,
        classes: encoder.classes().to_vec(),
        backbone_weights: weights,
    };
    predict_test_set(&net, &meta, &config.data.test, config.train.feature_batch_size)?;

    artifacts::save_meta(&config.data.model_dir, &meta)?;
    let model_path = artifacts::model_path(&config.data.model_dir);
    net.save_head(&model_path)?;
    info!("saved model to {model_path:?}");
    info!("time elapsed: {:?}", start.elapsed());
    Ok(())
}

pub fn run_predict(config: &PredictConfig) -> Result<()> {
    let start = Instant::now();
    let device = config.device();
    let meta = artifacts::load_meta(&config.model_dir)?;
    info!("loaded model metadata: {} classes, image size {}", meta.classes.len(), meta.image_size);

    let weights = config.weights.as_ref().unwrap_or(&meta.backbone_weights);
    let mut net = TransferNet::new(&meta.model_config(), meta.classes.len() as i64, device);
    net.backbone.load(weights)?;
    net.load_head(&artifacts::model_path(&config.model_dir))?;

    predict_test_set(&net, &meta, &config.test, config.feature_batch_size)?;
    info!("time elapsed: {:?}", start.elapsed());
    Ok(())
}
