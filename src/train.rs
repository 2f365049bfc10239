use anyhow::Result;
use log::{debug, info};
use tch::nn::{self, OptimizerConfig};
use tch::{Kind, Tensor};

use crate::config::TrainConfig;
use crate::dataloader::{progress_bar, BatchLoader};
use crate::early_stopping::{Decision, EarlyStopping};
use crate::model::TransferNet;

/// Mean categorical cross-entropy between logits and one-hot targets.
pub fn categorical_cross_entropy(logits: &Tensor, targets: &Tensor) -> Tensor {
    -(logits.log_softmax(-1, Kind::Float) * targets)
        .sum_dim_intlist(-1, false, Kind::Float)
        .mean(Kind::Float)
}

/// Fraction of rows whose highest logit is the hot target index.
pub fn categorical_accuracy(logits: &Tensor, targets: &Tensor) -> f64 {
    logits
        .argmax(-1, false)
        .eq_tensor(&targets.argmax(-1, false))
        .to_kind(Kind::Float)
        .mean(Kind::Float)
        .double_value(&[])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub history: Vec<EpochMetrics>,
    pub stopped_early: bool,
}

impl TrainReport {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

/// Trains the head of a [`TransferNet`] on precomputed backbone features.
pub struct Trainer<'a> {
    net: &'a TransferNet,
    config: &'a TrainConfig,
}

impl<'a> Trainer<'a> {
    pub fn new(net: &'a TransferNet, config: &'a TrainConfig) -> Self {
        Self { net, config }
    }

    pub fn evaluate(&self, xs: &Tensor, ys: &Tensor) -> (f64, f64) {
        tch::no_grad(|| {
            let logits = self.net.head_t(xs, false);
            (
                categorical_cross_entropy(&logits, ys).double_value(&[]),
                categorical_accuracy(&logits, ys),
            )
        })
    }

    pub fn fit(
        &self,
        train_xs: &Tensor,
        train_ys: &Tensor,
        valid_xs: &Tensor,
        valid_ys: &Tensor,
    ) -> Result<TrainReport> {
        let mut opt = nn::Adam::default().build(&self.net.head_vs, self.config.learning_rate)?;
        let mut early_stopping = EarlyStopping::new(self.config.patience);
        let mut history = Vec::with_capacity(self.config.epochs);
        let mut stopped_early = false;

        for epoch in 1..=self.config.epochs {
            let loader = BatchLoader::new(train_xs, train_ys, self.config.batch_size)?
                .shuffle(self.config.seed.wrapping_add(epoch as u64));
            let pb = progress_bar(loader.len() as u64, &format!("epoch {epoch}"));

            let mut loss_sum = 0.0;
            let mut correct = 0.0;
            let mut seen = 0usize;
            for batch in loader {
                let logits = self.net.head_t(&batch.images, true);
                let loss = categorical_cross_entropy(&logits, &batch.labels);
                opt.backward_step(&loss);

                let n = batch.images.size()[0] as usize;
                loss_sum += loss.double_value(&[]) * n as f64;
                correct += categorical_accuracy(&logits, &batch.labels) * n as f64;
                seen += n;
                pb.inc(n as u64);
                debug!("epoch {epoch} batch {} loss {:.4}", batch.index, loss.double_value(&[]));
            }
            pb.finish_and_clear();

            let (valid_loss, valid_accuracy) = self.evaluate(valid_xs, valid_ys);
            let metrics = EpochMetrics {
                epoch,
                loss: loss_sum / seen.max(1) as f64,
                accuracy: correct / seen.max(1) as f64,
                valid_loss,
                valid_accuracy,
            };
            info!(
                "epoch {epoch}/{}: loss {:.4} acc {:.2}% val_loss {:.4} val_acc {:.2}%",
                self.config.epochs,
                metrics.loss,
                100. * metrics.accuracy,
                metrics.valid_loss,
                100. * metrics.valid_accuracy,
            );
            history.push(metrics);

            if early_stopping.step(valid_accuracy) == Decision::Stop {
                info!(
                    "validation accuracy did not improve for {} epochs, stopping at epoch {epoch}",
                    self.config.patience
                );
                stopped_early = true;
                break;
            }
        }

        if let Some((epoch, acc)) = early_stopping.best() {
            info!("best validation accuracy {:.2}% at epoch {}", 100. * acc, epoch + 1);
        }
        Ok(TrainReport { history, stopped_early })
    }
}
