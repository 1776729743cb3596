//! Loss functions consumed by the update kernel.
//!
//! The kernel never looks inside a loss. It asks for the loss value, the
//! update step for a given effective learning rate `eta_t` and norm, the
//! squared gradient (for adaptive accumulators), and the first derivative
//! (for lazy regularization).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::LabelRange;

/// Below this `eta_t` the invariant updates fall back to the linearized step.
const SMALL_ETA: f32 = 1e-6;

pub trait Loss: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Starting prediction for examples that don't carry one.
    fn initial(&self) -> f32 {
        0.0
    }

    fn loss(&self, range: &LabelRange, prediction: f32, label: f32) -> f32;

    /// Importance-invariant step: the result of integrating the gradient flow
    /// over `eta_t` instead of taking one linear step.
    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32;

    /// Plain gradient step, `-eta_t * dloss / norm`.
    fn unsafe_update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32;

    /// Importance weight that would move `prediction` to the decision boundary.
    fn reverting_weight(&self, range: &LabelRange, prediction: f32, eta_t: f32) -> f32;

    fn square_grad(&self, prediction: f32, label: f32) -> f32;

    fn first_derivative(&self, range: &LabelRange, prediction: f32, label: f32) -> f32;

    /// A prediction range that labels must not widen.
    fn fixed_range(&self) -> Option<(f32, f32)> {
        None
    }
}

/// Serializable choice of loss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    Squared,
    Logistic,
    Hinge,
    Quantile { tau: f32 },
}

impl LossKind {
    pub fn build(self) -> Box<dyn Loss> {
        match self {
            Self::Squared => Box::new(SquaredLoss),
            Self::Logistic => Box::new(LogisticLoss),
            Self::Hinge => Box::new(HingeLoss),
            Self::Quantile { tau } => Box::new(QuantileLoss { tau }),
        }
    }
}

/// `½(p − y)²`, linear outside the label range.
#[derive(Clone, Copy, Debug, Default)]
pub struct SquaredLoss;

impl Loss for SquaredLoss {
    fn name(&self) -> &'static str {
        "squared"
    }

    fn loss(&self, range: &LabelRange, prediction: f32, label: f32) -> f32 {
        if prediction >= range.min && prediction <= range.max {
            let d = prediction - label;
            0.5 * d * d
        } else if prediction < range.min {
            if label == range.min {
                return 0.0;
            }
            let d = label - range.min;
            0.5 * d * d + d * (range.min - prediction)
        } else {
            if label == range.max {
                return 0.0;
            }
            let d = range.max - label;
            0.5 * d * d + d * (prediction - range.max)
        }
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        if eta_t < SMALL_ETA {
            return self.unsafe_update(prediction, label, eta_t, norm);
        }
        (label - prediction) * (1.0 - (-eta_t).exp()) / norm
    }

    fn unsafe_update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        (label - prediction) * eta_t / norm
    }

    fn reverting_weight(&self, range: &LabelRange, prediction: f32, eta_t: f32) -> f32 {
        let t = range.midpoint();
        let alternative = if prediction > t { range.min } else { range.max };
        ((alternative - prediction) / (alternative - t)).ln() / eta_t
    }

    fn square_grad(&self, prediction: f32, label: f32) -> f32 {
        let d = prediction - label;
        d * d
    }

    fn first_derivative(&self, range: &LabelRange, prediction: f32, label: f32) -> f32 {
        range.clamp(prediction) - label
    }
}

/// `ln(1 + e^{−yp})` with labels in {−1, 1}. Labels are read by sign.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogisticLoss;

impl LogisticLoss {
    fn sign(label: f32) -> f32 {
        if label > 0.0 {
            1.0
        } else {
            -1.0
        }
    }
}

/// `W(e^x) − x`, with W the Lambert W function, to about 1e-6.
fn wexpmx(x: f32) -> f32 {
    let w = if x >= 1.0 {
        0.86 * x + 0.01
    } else {
        (0.8 * x - 0.65).exp()
    };
    let r = if x >= 1.0 {
        x - w.ln() - w
    } else {
        0.2 * x + 0.65 - w
    };
    let t = 1.0 + w;
    let u = 2.0 * t * (t + 2.0 * r / 3.0);
    w * (1.0 + r / t * (u - r) / (u - 2.0 * r)) - x
}

impl Loss for LogisticLoss {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn loss(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        (1.0 + (-Self::sign(label) * prediction).exp()).ln()
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let y = Self::sign(label);
        if eta_t < SMALL_ETA {
            return self.unsafe_update(prediction, y, eta_t, norm);
        }
        let d = (y * prediction).exp();
        let w = wexpmx(eta_t + y * prediction + d);
        -(y * w + prediction) / norm
    }

    fn unsafe_update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let y = Self::sign(label);
        y * eta_t / ((1.0 + (y * prediction).exp()) * norm)
    }

    fn reverting_weight(&self, _range: &LabelRange, prediction: f32, eta_t: f32) -> f32 {
        let z = -prediction.abs();
        (1.0 - z - z.exp()) / eta_t
    }

    fn square_grad(&self, prediction: f32, label: f32) -> f32 {
        let d = self.first_derivative(&LabelRange::default(), prediction, label);
        d * d
    }

    fn first_derivative(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        let y = Self::sign(label);
        -y / (1.0 + (y * prediction).exp())
    }

    fn fixed_range(&self) -> Option<(f32, f32)> {
        Some((-50.0, 50.0))
    }
}

/// `max(0, 1 − yp)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HingeLoss;

impl Loss for HingeLoss {
    fn name(&self) -> &'static str {
        "hinge"
    }

    fn loss(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        (1.0 - label * prediction).max(0.0)
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        if label * prediction >= label * label {
            return 0.0;
        }
        let err = (label * label - label * prediction) / (label * label);
        label * eta_t.min(err) / norm
    }

    fn unsafe_update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        if label * prediction >= label * label {
            return 0.0;
        }
        label * eta_t / norm
    }

    fn reverting_weight(&self, _range: &LabelRange, prediction: f32, eta_t: f32) -> f32 {
        prediction.abs() / eta_t
    }

    fn square_grad(&self, prediction: f32, label: f32) -> f32 {
        let d = self.first_derivative(&LabelRange::default(), prediction, label);
        d * d
    }

    fn first_derivative(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        if label * prediction >= label * label {
            0.0
        } else {
            -label
        }
    }
}

/// Pinball loss for the `tau` quantile.
#[derive(Clone, Copy, Debug)]
pub struct QuantileLoss {
    pub tau: f32,
}

impl Loss for QuantileLoss {
    fn name(&self) -> &'static str {
        "quantile"
    }

    fn loss(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        let e = label - prediction;
        if e > 0.0 {
            self.tau * e
        } else {
            -(1.0 - self.tau) * e
        }
    }

    fn update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let err = label - prediction;
        if err == 0.0 {
            return 0.0;
        }
        if err > 0.0 {
            let step = self.tau * eta_t;
            step.min(err) / norm
        } else {
            let step = -(1.0 - self.tau) * eta_t;
            step.max(err) / norm
        }
    }

    fn unsafe_update(&self, prediction: f32, label: f32, eta_t: f32, norm: f32) -> f32 {
        let err = label - prediction;
        if err == 0.0 {
            0.0
        } else if err > 0.0 {
            self.tau * eta_t / norm
        } else {
            -(1.0 - self.tau) * eta_t / norm
        }
    }

    fn reverting_weight(&self, range: &LabelRange, prediction: f32, eta_t: f32) -> f32 {
        let t = range.midpoint();
        let v = if prediction > t {
            -(1.0 - self.tau)
        } else {
            self.tau
        };
        (t - prediction) / (eta_t * v)
    }

    fn square_grad(&self, prediction: f32, label: f32) -> f32 {
        let d = self.first_derivative(&LabelRange::default(), prediction, label);
        d * d
    }

    fn first_derivative(&self, _range: &LabelRange, prediction: f32, label: f32) -> f32 {
        let e = label - prediction;
        if e == 0.0 {
            0.0
        } else if e > 0.0 {
            -self.tau
        } else {
            1.0 - self.tau
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide() -> LabelRange {
        LabelRange::fixed(-10.0, 10.0)
    }

    #[test]
    fn squared_unsafe_step_is_scaled_residual() {
        let l = SquaredLoss;
        assert_eq!(l.unsafe_update(0.0, 1.0, 0.5, 1.0), 0.5);
        assert_eq!(l.unsafe_update(0.0, 1.0, 0.5, 2.0), 0.25);
    }

    #[test]
    fn squared_invariant_step_never_overshoots() {
        let l = SquaredLoss;
        for eta_t in [1e-3f32, 0.5, 1.0, 10.0, 1000.0] {
            let step = l.update(0.0, 1.0, eta_t, 1.0);
            assert!(step > 0.0 && step <= 1.0, "eta_t={eta_t}: {step}");
        }
        let small = l.update(0.0, 1.0, 1e-7, 1.0);
        assert!((small - 1e-7).abs() < 1e-12);
    }

    #[test]
    fn squared_loss_is_linear_outside_range() {
        let r = LabelRange::default();
        let l = SquaredLoss;
        assert!((l.loss(&r, 0.5, 1.0) - 0.125).abs() < 1e-7);
        assert_eq!(l.loss(&r, 2.0, 1.0), 0.0);
        // label 0.5, prediction 2 clamps at max 1: ½·0.25 + 0.5·1
        assert!((l.loss(&r, 2.0, 0.5) - 0.625).abs() < 1e-6);
        assert_eq!(l.first_derivative(&r, 2.0, 0.5), 0.5);
    }

    #[test]
    fn squared_reverting_weight_reaches_midpoint() {
        let r = LabelRange::default();
        let l = SquaredLoss;
        let eta_t = 0.3;
        let h = l.reverting_weight(&r, 0.9, eta_t);
        // invariant trajectory toward the opposite end: p(h) = alt - (alt - p)e^{-eta_t h}
        let p = 0.0 - (0.0 - 0.9) * (-eta_t * h).exp();
        assert!((p - 0.5).abs() < 1e-5);
    }

    #[test]
    fn logistic_invariant_matches_small_steps() {
        let l = LogisticLoss;
        let (p, y) = (0.3f32, 1.0f32);
        let step = l.update(p, y, 1e-3, 1.0);
        let linear = l.unsafe_update(p, y, 1e-3, 1.0);
        assert!((step - linear).abs() < 1e-5, "{step} vs {linear}");
    }

    #[test]
    fn logistic_invariant_is_bounded() {
        let l = LogisticLoss;
        let step = l.update(0.0, 1.0, 100.0, 1.0);
        assert!(step > 0.0 && step.is_finite());
        assert!(step < 100.0 * 0.5);
    }

    #[test]
    fn logistic_labels_read_by_sign() {
        let l = LogisticLoss;
        assert_eq!(l.loss(&wide(), 0.2, 0.0), l.loss(&wide(), 0.2, -1.0));
        assert!((l.loss(&wide(), 0.0, 1.0) - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((l.first_derivative(&wide(), 0.0, 1.0) + 0.5).abs() < 1e-6);
        assert_eq!(l.fixed_range(), Some((-50.0, 50.0)));
    }

    #[test]
    fn hinge_is_zero_past_margin() {
        let l = HingeLoss;
        assert_eq!(l.loss(&wide(), 2.0, 1.0), 0.0);
        assert_eq!(l.update(2.0, 1.0, 0.5, 1.0), 0.0);
        assert_eq!(l.first_derivative(&wide(), 2.0, 1.0), 0.0);
        assert_eq!(l.loss(&wide(), 0.0, -1.0), 1.0);
        // invariant step capped by the margin error
        assert_eq!(l.update(0.5, 1.0, 5.0, 1.0), 0.5);
        assert_eq!(l.unsafe_update(0.5, 1.0, 5.0, 1.0), 5.0);
    }

    #[test]
    fn quantile_is_asymmetric() {
        let l = QuantileLoss { tau: 0.9 };
        assert!((l.loss(&wide(), 0.0, 1.0) - 0.9).abs() < 1e-6);
        assert!((l.loss(&wide(), 1.0, 0.0) - 0.1).abs() < 1e-6);
        assert!((l.unsafe_update(0.0, 1.0, 1.0, 1.0) - 0.9).abs() < 1e-6);
        assert!((l.unsafe_update(1.0, 0.0, 1.0, 1.0) + 0.1).abs() < 1e-6);
        assert!((l.update(0.0, 0.05, 1.0, 1.0) - 0.05).abs() < 1e-6);
        assert_eq!(l.first_derivative(&wide(), 1.0, 1.0), 0.0);
    }

    #[test]
    fn kinds_build_matching_losses() {
        assert_eq!(LossKind::Squared.build().name(), "squared");
        assert_eq!(LossKind::Logistic.build().name(), "logistic");
        assert_eq!(LossKind::Hinge.build().name(), "hinge");
        assert_eq!(LossKind::Quantile { tau: 0.5 }.build().name(), "quantile");
        assert_eq!(LossKind::default(), LossKind::Squared);
    }
}
