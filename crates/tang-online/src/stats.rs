//! Running statistics shared between the learner and its losses.

/// Range predictions are clamped to.
///
/// Starts at `[0, 1]` and widens to cover every label seen. Either end can be
/// pinned by configuration or by the loss; a pinned end never moves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelRange {
    pub min: f32,
    pub max: f32,
    pin_min: bool,
    pin_max: bool,
}

impl Default for LabelRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            pin_min: false,
            pin_max: false,
        }
    }
}

impl LabelRange {
    /// A range that labels never widen.
    pub fn fixed(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            pin_min: true,
            pin_max: true,
        }
    }

    /// Lower end pinned at `min`; the upper end starts at `max(min, 1)` and
    /// widens with labels.
    pub fn at_least(min: f32) -> Self {
        Self {
            min,
            max: min.max(1.0),
            pin_min: true,
            pin_max: false,
        }
    }

    /// Upper end pinned at `max`; the lower end starts at `min(max, 0)` and
    /// widens with labels.
    pub fn at_most(max: f32) -> Self {
        Self {
            min: max.min(0.0),
            max,
            pin_min: false,
            pin_max: true,
        }
    }

    /// Both ends pinned.
    pub fn is_fixed(&self) -> bool {
        self.pin_min && self.pin_max
    }

    pub fn observe(&mut self, label: f32) {
        if !label.is_finite() {
            return;
        }
        if !self.pin_min {
            self.min = self.min.min(label);
        }
        if !self.pin_max {
            self.max = self.max.max(label);
        }
    }

    pub fn clamp(&self, prediction: f32) -> f32 {
        prediction.max(self.min).min(self.max)
    }

    pub fn midpoint(&self) -> f32 {
        0.5 * (self.min + self.max)
    }
}

/// Per-run counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedData {
    /// Weighted count of labeled examples (plus `initial_t`).
    pub t: f64,
    pub weighted_examples: f64,
    pub weighted_unlabeled: f64,
    pub weighted_labels: f64,
    pub sum_loss: f64,
    pub examples: u64,
    pub total_features: u64,
    pub nan_predictions: u64,
    pub checkpoints: u64,
}

impl SharedData {
    pub fn new(initial_t: f32) -> Self {
        Self {
            t: initial_t as f64,
            ..Self::default()
        }
    }

    /// Account an example before it is predicted; returns its `example_t`.
    pub fn begin(&mut self, label: Option<f32>, importance: f32) -> f32 {
        match label {
            Some(_) => self.t += importance as f64,
            None => self.weighted_unlabeled += importance as f64,
        }
        self.t as f32
    }

    /// Account an example once its loss is known.
    pub fn finish(&mut self, label: Option<f32>, importance: f32, loss: f32, features: usize) {
        self.examples += 1;
        self.weighted_examples += importance as f64;
        self.total_features += features as u64;
        if let Some(y) = label {
            self.weighted_labels += (y * importance) as f64;
            self.sum_loss += loss as f64;
        }
    }

    /// Mean loss per unit of labeled weight.
    pub fn average_loss(&self) -> f64 {
        let labeled = self.weighted_examples - self.weighted_unlabeled;
        if labeled > 0.0 {
            self.sum_loss / labeled
        } else {
            0.0
        }
    }
}
