//! Learner configuration.

use serde::{Deserialize, Serialize};

use crate::error::LearnerError;
use crate::loss::LossKind;
use crate::regularizer::{REG_LAZY, REG_TRUNCATE};

/// Run configuration. Everything but `eta` stays fixed for the life of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Learning rate. Decays by `eta_decay_rate` at every pass boundary.
    pub eta: f32,
    pub eta_decay_rate: f32,
    /// Exponent of the per-example time decay `t^-power_t`.
    pub power_t: f32,
    pub initial_t: f32,
    /// Per-feature AdaGrad-style learning rates.
    pub adaptive: bool,
    /// Scale updates by each feature's observed range and the running
    /// average example norm.
    pub normalized_updates: bool,
    /// Use the loss's importance-invariant step instead of the plain gradient.
    pub invariant_updates: bool,
    /// Bit 0: truncate weights by gravity at predict time. Any bit: lazy
    /// regularization active.
    pub reg_mode: u8,
    pub l1_lambda: f32,
    pub l2_lambda: f32,
    /// log2 of the number of weight slots.
    pub num_bits: u32,
    /// Namespace pairs whose cross terms are learned.
    pub pairs: Vec<(u8, u8)>,
    pub active_learning: bool,
    pub save_per_pass: bool,
    /// Reduction group to average with. `None` means single worker.
    pub span_server: Option<String>,
    pub checkpoint_name: String,
    pub training: bool,
    pub audit: bool,
    pub min_prediction: Option<f32>,
    pub max_prediction: Option<f32>,
    pub loss: LossKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            eta: 0.5,
            eta_decay_rate: 1.0,
            power_t: 0.5,
            initial_t: 0.0,
            adaptive: false,
            normalized_updates: false,
            invariant_updates: false,
            reg_mode: 0,
            l1_lambda: 0.0,
            l2_lambda: 0.0,
            num_bits: 18,
            pairs: Vec::new(),
            active_learning: false,
            save_per_pass: false,
            span_server: None,
            checkpoint_name: "model".into(),
            training: true,
            audit: false,
            min_prediction: None,
            max_prediction: None,
            loss: LossKind::Squared,
        }
    }
}

impl Config {
    pub fn with_eta(mut self, eta: f32) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_decay(mut self, rate: f32) -> Self {
        self.eta_decay_rate = rate;
        self
    }

    pub fn with_power_t(mut self, power_t: f32) -> Self {
        self.power_t = power_t;
        self
    }

    pub fn with_initial_t(mut self, initial_t: f32) -> Self {
        self.initial_t = initial_t;
        self
    }

    pub fn with_adaptive(mut self, on: bool) -> Self {
        self.adaptive = on;
        self
    }

    pub fn with_normalized(mut self, on: bool) -> Self {
        self.normalized_updates = on;
        self
    }

    pub fn with_invariant(mut self, on: bool) -> Self {
        self.invariant_updates = on;
        self
    }

    /// L1 strength; a positive value turns on predict-time truncation.
    pub fn with_l1(mut self, lambda: f32) -> Self {
        self.l1_lambda = lambda;
        if lambda > 0.0 {
            self.reg_mode |= REG_TRUNCATE;
        }
        self
    }

    /// L2 strength; a positive value turns on lazy regularization.
    pub fn with_l2(mut self, lambda: f32) -> Self {
        self.l2_lambda = lambda;
        if lambda > 0.0 {
            self.reg_mode |= REG_LAZY;
        }
        self
    }

    pub fn with_reg_mode(mut self, mode: u8) -> Self {
        self.reg_mode = mode;
        self
    }

    pub fn with_bits(mut self, num_bits: u32) -> Self {
        self.num_bits = num_bits;
        self
    }

    pub fn with_pair(mut self, first: u8, second: u8) -> Self {
        self.pairs.push((first, second));
        self
    }

    pub fn with_active_learning(mut self, on: bool) -> Self {
        self.active_learning = on;
        self
    }

    pub fn with_save_per_pass(mut self, on: bool) -> Self {
        self.save_per_pass = on;
        self
    }

    pub fn with_span_server(mut self, endpoint: impl Into<String>) -> Self {
        self.span_server = Some(endpoint.into());
        self
    }

    pub fn with_checkpoint_name(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = name.into();
        self
    }

    pub fn with_training(mut self, on: bool) -> Self {
        self.training = on;
        self
    }

    pub fn with_audit(mut self, on: bool) -> Self {
        self.audit = on;
        self
    }

    pub fn with_prediction_range(mut self, min: f32, max: f32) -> Self {
        self.min_prediction = Some(min);
        self.max_prediction = Some(max);
        self
    }

    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    /// Cells per weight slot: weight, then the adaptive and normalization
    /// accumulators when enabled.
    pub fn stride(&self) -> usize {
        match (self.adaptive, self.normalized_updates) {
            (true, true) => 4,
            (true, false) | (false, true) => 2,
            (false, false) => 1,
        }
    }

    /// Cell holding the normalization accumulator.
    pub fn normalized_idx(&self) -> usize {
        if self.adaptive {
            2
        } else {
            1
        }
    }

    pub fn kernel(&self) -> KernelParams {
        KernelParams {
            adaptive: self.adaptive,
            normalized: self.normalized_updates,
            normalized_idx: self.normalized_idx(),
            power_t: self.power_t,
        }
    }

    pub fn validate(&self) -> Result<(), LearnerError> {
        let fail = |msg: String| -> Result<(), LearnerError> { Err(LearnerError::Config(msg)) };
        if !(self.eta.is_finite() && self.eta > 0.0) {
            return fail(format!("eta must be positive, got {}", self.eta));
        }
        if !(self.eta_decay_rate.is_finite() && self.eta_decay_rate > 0.0) {
            return fail(format!(
                "eta_decay_rate must be positive, got {}",
                self.eta_decay_rate
            ));
        }
        if !(self.power_t > 0.0 && self.power_t <= 1.0) {
            return fail(format!("power_t must be in (0, 1], got {}", self.power_t));
        }
        if self.initial_t < 0.0 {
            return fail(format!("initial_t must be non-negative, got {}", self.initial_t));
        }
        if self.reg_mode > (REG_TRUNCATE | REG_LAZY) {
            return fail(format!("reg_mode must be in 0..=3, got {}", self.reg_mode));
        }
        if self.l1_lambda < 0.0 || self.l2_lambda < 0.0 {
            return fail("regularization strengths must be non-negative".into());
        }
        if !(1..=31).contains(&self.num_bits) {
            return fail(format!("num_bits must be in 1..=31, got {}", self.num_bits));
        }
        if self.checkpoint_name.is_empty() {
            return fail("checkpoint_name must not be empty".into());
        }
        if let (Some(min), Some(max)) = (self.min_prediction, self.max_prediction) {
            if min >= max {
                return fail(format!("prediction range [{min}, {max}] is empty"));
            }
        }
        if let LossKind::Quantile { tau } = self.loss {
            if !(tau > 0.0 && tau < 1.0) {
                return fail(format!("quantile tau must be in (0, 1), got {tau}"));
            }
        }
        Ok(())
    }
}

/// The slice of configuration the per-term kernels need.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelParams {
    pub adaptive: bool,
    pub normalized: bool,
    pub normalized_idx: usize,
    pub power_t: f32,
}

impl KernelParams {
    /// `power_t == 0.5` takes the inverse-square-root kernels.
    pub fn fast(&self) -> bool {
        self.power_t == 0.5
    }

    /// Exponent applied to the normalization terms.
    pub fn power_t_norm(&self) -> f32 {
        if self.adaptive {
            1.0 - self.power_t
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.eta, 0.5);
        assert_eq!(c.power_t, 0.5);
        assert_eq!(c.num_bits, 18);
        assert_eq!(c.stride(), 1);
        assert_eq!(c.checkpoint_name, "model");
        assert!(c.training && !c.invariant_updates);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn stride_follows_accumulators() {
        let c = Config::default().with_adaptive(true);
        assert_eq!((c.stride(), c.normalized_idx()), (2, 2));
        let c = Config::default().with_normalized(true);
        assert_eq!((c.stride(), c.normalized_idx()), (2, 1));
        let c = Config::default().with_adaptive(true).with_normalized(true);
        assert_eq!((c.stride(), c.normalized_idx()), (4, 2));
    }

    #[test]
    fn regularizers_set_mode_bits() {
        assert_eq!(Config::default().with_l1(0.1).reg_mode, REG_TRUNCATE);
        assert_eq!(Config::default().with_l2(0.1).reg_mode, REG_LAZY);
        assert_eq!(Config::default().with_l1(0.1).with_l2(0.1).reg_mode, 3);
        assert_eq!(Config::default().with_l1(0.0).reg_mode, 0);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Config::default().with_eta(0.0).validate().is_err());
        assert!(Config::default().with_power_t(1.5).validate().is_err());
        assert!(Config::default().with_power_t(0.0).validate().is_err());
        assert!(Config::default().with_power_t(f32::NAN).validate().is_err());
        assert!(Config::default().with_power_t(1.0).validate().is_ok());
        assert!(Config::default().with_bits(0).validate().is_err());
        assert!(Config::default().with_bits(32).validate().is_err());
        assert!(Config::default().with_reg_mode(4).validate().is_err());
        assert!(Config::default().with_prediction_range(1.0, 1.0).validate().is_err());
        assert!(Config::default()
            .with_loss(LossKind::Quantile { tau: 1.0 })
            .validate()
            .is_err());
        assert!(Config::default().with_checkpoint_name("").validate().is_err());
    }

    #[test]
    fn power_t_norm_depends_on_adaptive() {
        let k = Config::default().with_power_t(0.3).kernel();
        assert_eq!(k.power_t_norm(), 1.0);
        assert!(!k.fast());
        let k = Config::default().with_power_t(0.3).with_adaptive(true).kernel();
        assert!((k.power_t_norm() - 0.7).abs() < 1e-7);
        assert!(Config::default().kernel().fast());
    }

    #[test]
    fn survives_serialization() {
        let config = Config::default()
            .with_pair(b'a', b'b')
            .with_span_server("group")
            .with_loss(LossKind::Quantile { tau: 0.25 });
        let bytes = postcard::to_allocvec(&config).unwrap();
        let back: Config = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, config);
    }
}
