//! Frozen VGG19 feature extractor with a trainable dense head.
//!
//! Backbone variables are named like the `features` part of the published
//! `vgg19.ot` weights so that the file loads directly into [`Backbone`]:
//! <https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg19.ot>
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use tch::nn::{self, ModuleT};
use tch::{Device, Tensor};

use crate::config::ModelConfig;

// VGG19 ("E" configuration): each block is a list of 3x3 convolutions
// followed by a 2x2 max-pool.
fn vgg19_blocks() -> Vec<Vec<i64>> {
    vec![
        vec![64, 64],
        vec![128, 128],
        vec![256, 256, 256, 256],
        vec![512, 512, 512, 512],
        vec![512, 512, 512, 512],
    ]
}

const FEATURE_CHANNELS: i64 = 512;
const DOWNSAMPLING: i64 = 32;

fn conv2d(p: nn::Path, c_in: i64, c_out: i64) -> nn::Conv2D {
    let cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
    nn::conv2d(p, c_in, c_out, 3, cfg)
}

/// Number of flattened features produced for `image_size x image_size` inputs.
pub fn feature_dim(image_size: i64) -> i64 {
    let side = image_size / DOWNSAMPLING;
    FEATURE_CHANNELS * side * side
}

/// The convolutional part of VGG19, without its classifier.
#[derive(Debug)]
pub struct Backbone {
    vs: nn::VarStore,
    features: nn::SequentialT,
}

impl Backbone {
    pub fn new(device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let f = vs.root() / "features";
        let mut seq = nn::seq_t();
        let mut c_in = 3;
        for channels in vgg19_blocks() {
            for c_out in channels {
                // Layer indices count the activations too, as in the weight file.
                let l = seq.len();
                seq = seq.add(conv2d(&f / &l.to_string(), c_in, c_out));
                seq = seq.add_fn(|xs| xs.relu());
                c_in = c_out;
            }
            seq = seq.add_fn(|xs| xs.max_pool2d_default(2));
        }
        Self { vs, features: seq.add_fn(|xs| xs.flat_view()) }
    }

    /// Loads pretrained weights and freezes every backbone variable.
    pub fn load(&mut self, weights: &Path) -> Result<()> {
        self.vs
            .load(weights)
            .with_context(|| format!("loading pretrained weights from {weights:?}"))?;
        self.vs.freeze();
        info!("loaded and froze {} backbone variables", self.num_variables());
        Ok(())
    }

    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(self.vs.save(path)?)
    }

    pub fn num_variables(&self) -> usize {
        self.vs.variables().len()
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Flattened features of `xs`, computed in chunks of `batch_size` without
    /// tracking gradients. The result stays on the backbone device.
    pub fn extract(&self, xs: &Tensor, batch_size: usize) -> Tensor {
        let batch_size = batch_size.max(1) as i64;
        let chunks: Vec<Tensor> = tch::no_grad(|| {
            xs.split(batch_size, 0)
                .iter()
                .map(|chunk| chunk.to_device(self.device()).apply_t(&self.features, false))
                .collect()
        });
        Tensor::cat(&chunks, 0)
    }
}

/// Dense layers with sigmoid activations ending in raw class logits.
#[derive(Debug)]
pub struct Head {
    layers: Vec<nn::Linear>,
}

impl Head {
    pub fn new(p: &nn::Path, in_dim: i64, hidden: &[i64], num_classes: i64) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut d_in = in_dim;
        for (i, &d_out) in hidden.iter().chain(std::iter::once(&num_classes)).enumerate() {
            layers.push(nn::linear(p / format!("dense{i}"), d_in, d_out, Default::default()));
            d_in = d_out;
        }
        Self { layers }
    }
}

impl ModuleT for Head {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        let (last, hidden) = match self.layers.split_last() {
            Some(split) => split,
            None => return xs.shallow_clone(),
        };
        hidden
            .iter()
            .fold(xs.shallow_clone(), |xs, layer| xs.apply(layer).sigmoid())
            .apply(last)
    }
}

/// The full classifier: frozen backbone plus trainable head. The head owns
/// its own var store, which is what the optimizer updates and what gets saved.
#[derive(Debug)]
pub struct TransferNet {
    pub backbone: Backbone,
    pub head_vs: nn::VarStore,
    pub head: Head,
}

impl TransferNet {
    pub fn new(config: &ModelConfig, num_classes: i64, device: Device) -> Self {
        let backbone = Backbone::new(device);
        let head_vs = nn::VarStore::new(device);
        let head = Head::new(
            &(head_vs.root() / "head"),
            feature_dim(config.image_size),
            &config.hidden,
            num_classes,
        );
        Self { backbone, head_vs, head }
    }

    pub fn features(&self, xs: &Tensor, batch_size: usize) -> Tensor {
        self.backbone.extract(xs, batch_size)
    }

    pub fn head_t(&self, features: &Tensor, train: bool) -> Tensor {
        self.head.forward_t(features, train)
    }

    pub fn save_head(&self, path: &Path) -> Result<()> {
        self.head_vs
            .save(path)
            .with_context(|| format!("saving model to {path:?}"))
    }

    pub fn load_head(&mut self, path: &Path) -> Result<()> {
        self.head_vs
            .load(path)
            .with_context(|| format!("loading model from {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    #[test]
    fn feature_dim_matches_backbone_output() {
        assert_eq!(feature_dim(120), 512 * 3 * 3);
        assert_eq!(feature_dim(224), 512 * 7 * 7);

        let backbone = Backbone::new(Device::Cpu);
        let xs = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let features = backbone.extract(&xs, 1);
        assert_eq!(features.size(), [2, feature_dim(64)]);
        assert!(!features.requires_grad());
    }

    #[test]
    fn backbone_variable_names_follow_vgg19() {
        let backbone = Backbone::new(Device::Cpu);
        // 16 convolutions, each with a weight and a bias.
        assert_eq!(backbone.num_variables(), 32);
        let names = backbone.vs.variables();
        assert!(names.contains_key("features.0.weight"));
        assert!(names.contains_key("features.2.bias"));
        assert!(names.contains_key("features.34.weight"));
    }

    /// Writes a weight file with every backbone variable set to 0.5, minus `skip`,
    /// plus a classifier tensor the backbone does not use.
    fn write_weights(path: &Path, skip: Option<&str>) {
        let mut named: Vec<(String, Tensor)> = Backbone::new(Device::Cpu)
            .vs
            .variables()
            .into_iter()
            .filter(|(name, _)| Some(name.as_str()) != skip)
            .map(|(name, t)| (name, t.ones_like() * 0.5))
            .collect();
        named.push((
            "classifier.0.weight".to_string(),
            Tensor::zeros([4, 4], (Kind::Float, Device::Cpu)),
        ));
        Tensor::save_multi(&named, path).unwrap();
    }

    #[test]
    fn load_ignores_classifier_and_freezes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg19.ot");
        write_weights(&path, None);

        let mut backbone = Backbone::new(Device::Cpu);
        backbone.load(&path).unwrap();
        let vars = backbone.vs.variables();
        assert_eq!(vars.len(), 32);
        assert!(!vars.contains_key("classifier.0.weight"));
        for (name, var) in &vars {
            assert!(!var.requires_grad(), "{name} is trainable");
            let mean = var.mean(Kind::Float).double_value(&[]);
            assert!((mean - 0.5).abs() < 1e-6, "{name} mean {mean}");
        }
    }

    #[test]
    fn load_requires_every_backbone_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.ot");
        write_weights(&path, Some("features.34.weight"));

        let err = Backbone::new(Device::Cpu).load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("partial.ot"));
    }

    #[test]
    fn head_produces_class_logits() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = Head::new(&vs.root(), 20, &[16, 8], 5);
        assert_eq!(vs.variables().len(), 6);
        let xs = Tensor::randn([7, 20], (Kind::Float, Device::Cpu));
        assert_eq!(head.forward_t(&xs, true).size(), [7, 5]);
    }

    #[test]
    fn saved_head_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ot");
        let config = ModelConfig { image_size: 32, hidden: vec![4] };
        let net = TransferNet::new(&config, 3, Device::Cpu);
        net.save_head(&path).unwrap();

        let mut other = TransferNet::new(&config, 3, Device::Cpu);
        other.load_head(&path).unwrap();
        let xs = Tensor::randn([2, feature_dim(32)], (Kind::Float, Device::Cpu));
        assert!(net.head_t(&xs, false).allclose(&other.head_t(&xs, false), 1e-6, 1e-6, false));
    }
}
