//! Lazy L1/L2 regularization.
//!
//! Instead of shrinking every weight after every example, the regularizer
//! keeps two scalars: `gravity`, an L1 distance every weight is owed toward
//! zero, and `contraction`, an L2 factor every weight is owed. The effective
//! weight of a stored `w` is `trunc_weight(w, gravity) * contraction`. They
//! are folded into the store only at sync points.

use crate::weights::WeightStore;

/// `reg_mode` bit: truncate by gravity at predict time.
pub const REG_TRUNCATE: u8 = 1;
/// `reg_mode` bit: lazy L2 shrinkage.
pub const REG_LAZY: u8 = 2;

const EPSILON: f64 = 1e-8;

/// Early materialization threshold for `contraction`.
const MIN_CONTRACTION: f64 = 1e-10;

/// Move `w` toward zero by `gravity`, stopping at zero.
#[inline]
pub fn trunc_weight(w: f32, gravity: f32) -> f32 {
    if gravity < w.abs() {
        w - gravity.copysign(w)
    } else {
        0.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Regularizer {
    mode: u8,
    l1: f64,
    l2: f64,
    gravity: f64,
    contraction: f64,
}

impl Regularizer {
    pub fn new(mode: u8, l1: f32, l2: f32) -> Self {
        Self {
            mode,
            l1: l1 as f64,
            l2: l2 as f64,
            gravity: 0.0,
            contraction: 1.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != 0
    }

    pub fn truncates(&self) -> bool {
        self.mode & REG_TRUNCATE != 0
    }

    pub fn gravity(&self) -> f32 {
        self.gravity as f32
    }

    pub fn contraction(&self) -> f32 {
        self.contraction as f32
    }

    /// Both scalars at their neutral values.
    pub fn is_neutral(&self) -> bool {
        self.gravity == 0.0 && self.contraction == 1.0
    }

    /// Owe the store the shrinkage of one training step.
    ///
    /// `step` is the update in stored-weight units, `derivative` the loss's
    /// first derivative at the prediction. A near-zero derivative leaves
    /// `contraction` alone, and with it `gravity` since `eta_bar` is zero.
    pub fn accumulate(&mut self, step: f32, derivative: f32, norm: f32) {
        let (step, derivative, norm) = (step as f64, derivative as f64, norm as f64);
        if !self.is_active() || step.abs() <= EPSILON {
            return;
        }
        let eta_bar = if derivative.abs() > EPSILON {
            -step / derivative
        } else {
            0.0
        };
        if derivative.abs() > EPSILON {
            self.contraction /= 1.0 + self.l2 * eta_bar * norm;
        }
        self.gravity += eta_bar * norm.sqrt() * self.l1;
    }

    pub fn needs_early_materialize(&self) -> bool {
        self.contraction < MIN_CONTRACTION
    }

    /// Effective weight of a stored weight.
    #[inline]
    pub fn effective(&self, w: f32) -> f32 {
        trunc_weight(w, self.gravity as f32) * self.contraction as f32
    }

    /// Fold the owed shrinkage into the store and reset to neutral.
    ///
    /// A no-op when already neutral, so calling it twice in a row changes
    /// nothing the second time.
    pub fn materialize(&mut self, store: &mut WeightStore) {
        if self.is_neutral() {
            return;
        }
        if self.is_active() {
            for slot in store.slots_mut() {
                slot[0] = self.effective(slot[0]);
            }
        }
        self.gravity = 0.0;
        self.contraction = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_stops_at_zero() {
        assert_eq!(trunc_weight(0.05, 0.1), 0.0);
        assert_eq!(trunc_weight(-0.05, 0.1), 0.0);
        assert!((trunc_weight(0.5, 0.1) - 0.4).abs() < 1e-7);
        assert!((trunc_weight(-0.5, 0.1) + 0.4).abs() < 1e-7);
        assert_eq!(trunc_weight(0.3, 0.0), 0.3);
    }

    #[test]
    fn accumulate_grows_gravity_and_shrinks_contraction() {
        let mut r = Regularizer::new(REG_TRUNCATE | REG_LAZY, 0.1, 0.1);
        // squared loss at p=0, y=1: derivative -1, step +0.5
        r.accumulate(0.5, -1.0, 1.0);
        assert!((r.gravity() - 0.05).abs() < 1e-7);
        assert!((r.contraction() - 1.0 / 1.05).abs() < 1e-6);
    }

    #[test]
    fn degenerate_derivative_is_skipped() {
        let mut r = Regularizer::new(REG_LAZY, 0.1, 0.1);
        r.accumulate(0.5, 1e-12, 1.0);
        assert!(r.is_neutral());
    }

    #[test]
    fn inactive_mode_accumulates_nothing() {
        let mut r = Regularizer::new(0, 0.1, 0.1);
        r.accumulate(0.5, -1.0, 1.0);
        assert!(r.is_neutral());
    }

    #[test]
    fn materialize_is_idempotent() {
        let mut store = WeightStore::new(2, 1);
        store.as_mut_slice().copy_from_slice(&[0.5, -0.05, 1.0, 0.0]);
        let mut r = Regularizer::new(REG_TRUNCATE | REG_LAZY, 0.1, 0.1);
        r.accumulate(0.5, -1.0, 1.0);

        r.materialize(&mut store);
        assert!(r.is_neutral());
        let once = store.as_slice().to_vec();
        assert_eq!(once[1], 0.0);
        assert!((once[0] - 0.45 / 1.05).abs() < 1e-6);

        r.materialize(&mut store);
        assert_eq!(store.as_slice(), &once[..]);
    }

    #[test]
    fn early_materialize_threshold() {
        let mut r = Regularizer::new(REG_LAZY, 0.0, 1e6);
        assert!(!r.needs_early_materialize());
        r.accumulate(1.0, -1.0, 1e6);
        assert!(r.needs_early_materialize());
    }
}
