/// Outcome of one epoch as seen by [`EarlyStopping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Improved,
    Wait,
    Stop,
}

/// Stops training once a maximized metric has not strictly improved for
/// `patience` consecutive epochs. A patience of 0 never stops.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    epoch: usize,
}

impl EarlyStopping {
    /// `patience == 0` disables stopping, where Keras would stop at the first
    /// epoch without improvement.
    pub fn new(patience: usize) -> Self {
        Self { patience, best: f64::NEG_INFINITY, best_epoch: None, wait: 0, epoch: 0 }
    }

    pub fn step(&mut self, metric: f64) -> Decision {
        let epoch = self.epoch;
        self.epoch += 1;
        if metric > self.best {
            self.best = metric;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return Decision::Improved;
        }
        self.wait += 1;
        if self.patience > 0 && self.wait >= self.patience {
            Decision::Stop
        } else {
            Decision::Wait
        }
    }

    pub fn best(&self) -> Option<(usize, f64)> {
        self.best_epoch.map(|epoch| (epoch, self.best))
    }
}
