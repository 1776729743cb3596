//! Prediction: the sparse dot product over an example's terms.
//!
//! One traversal, two orthogonal switches. [`Rescale`] decides whether a
//! term first updates its slot's feature range (normalized training only),
//! and `truncate` whether the weight is pulled toward zero by the pending
//! L1 gravity. The six combinations share [`Example::for_each_term`] and
//! differ only in [`Predictor::term`].

use crate::config::KernelParams;
use crate::example::Example;
use crate::fastmath::fast_pow;
use crate::regularizer::trunc_weight;
use crate::stats::LabelRange;
use crate::weights::WeightStore;

/// How a term adjusts its slot before contributing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rescale {
    /// Read-only.
    None,
    /// Normalized training with `power_t = 0.5`.
    Fast,
    /// Normalized training with any other `power_t`.
    General,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Predictor {
    pub rescale: Rescale,
    pub truncate: bool,
}

impl Predictor {
    /// Pick the variant for one example. `rescale` is whether this example
    /// will be trained on with normalized updates.
    pub fn select(params: &KernelParams, truncate: bool, rescale: bool) -> Self {
        let rescale = match (rescale && params.normalized, params.fast()) {
            (false, _) => Rescale::None,
            (true, true) => Rescale::Fast,
            (true, false) => Rescale::General,
        };
        Self { rescale, truncate }
    }

    /// Σ w·x over the example's terms (without the starting value or the
    /// pending contraction).
    ///
    /// With rescaling on, a term whose |x| exceeds its slot's recorded range
    /// shrinks the stored weight to keep its old contribution scale, then
    /// records the new range.
    pub fn predict(
        &self,
        store: &mut WeightStore,
        example: &Example,
        pairs: &[(u8, u8)],
        params: &KernelParams,
        gravity: f32,
    ) -> f32 {
        if self.rescale == Rescale::None {
            let g = if self.truncate { Some(gravity) } else { None };
            return dot(store, example, pairs, g);
        }
        let addressing = store.addressing();
        let mut sum = 0.0;
        example.for_each_term(addressing, pairs, |term| {
            sum += self.term(store.slot_mut(term.address), term.x, params, gravity);
        });
        sum
    }

    #[inline]
    fn term(&self, slot: &mut [f32], x: f32, params: &KernelParams, gravity: f32) -> f32 {
        let idx = params.normalized_idx;
        let x_abs = x.abs();
        if x_abs > slot[idx] {
            if slot[idx] > 0.0 {
                let ratio = slot[idx] / x_abs;
                slot[0] *= match self.rescale {
                    Rescale::Fast if params.adaptive => ratio,
                    Rescale::Fast => ratio * ratio,
                    Rescale::General => fast_pow(ratio * ratio, params.power_t_norm()),
                    Rescale::None => 1.0,
                };
            }
            slot[idx] = x_abs;
        }
        let w = if self.truncate {
            trunc_weight(slot[0], gravity)
        } else {
            slot[0]
        };
        w * x
    }
}

/// Read-only dot product. `gravity` truncates weights when given.
pub fn dot(store: &WeightStore, example: &Example, pairs: &[(u8, u8)], gravity: Option<f32>) -> f32 {
    let cells = store.as_slice();
    let mut sum = 0.0;
    example.for_each_term(store.addressing(), pairs, |term| {
        let w = cells[term.address];
        sum += match gravity {
            Some(g) => trunc_weight(w, g),
            None => w,
        } * term.x;
    });
    sum
}

/// Replace NaN with 0 (reporting it) and clamp into `range`.
pub fn finalize_prediction(raw: f32, range: &LabelRange) -> (f32, bool) {
    if raw.is_nan() {
        return (0.0, true);
    }
    (range.clamp(raw), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn store_with(config: &Config, entries: &[(u64, &[f32])]) -> WeightStore {
        let mut store = WeightStore::new(config.num_bits, config.stride());
        for &(index, cells) in entries {
            let address = store.addressing().address(index);
            store.slot_mut(address)[..cells.len()].copy_from_slice(cells);
        }
        store
    }

    #[test]
    fn selection_matrix() {
        let plain = Config::default().kernel();
        let norm = Config::default().with_normalized(true).kernel();
        let general = Config::default().with_normalized(true).with_power_t(0.3).kernel();
        assert_eq!(Predictor::select(&plain, true, true).rescale, Rescale::None);
        assert_eq!(Predictor::select(&norm, false, false).rescale, Rescale::None);
        assert_eq!(Predictor::select(&norm, false, true).rescale, Rescale::Fast);
        assert_eq!(Predictor::select(&general, true, true).rescale, Rescale::General);
        assert!(Predictor::select(&general, true, true).truncate);
    }

    #[test]
    fn plain_dot_product() {
        let config = Config::default().with_bits(8);
        let store = store_with(&config, &[(1, &[0.5]), (2, &[-2.0])]);
        let ex = Example::new().feature(b'a', 1, 2.0).feature(b'b', 2, 0.25);
        assert!((dot(&store, &ex, &[], None) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn truncation_zeroes_small_weights() {
        let config = Config::default().with_bits(8);
        let store = store_with(&config, &[(1, &[0.05]), (2, &[0.5])]);
        let ex = Example::new().feature(b'a', 1, 1.0).feature(b'a', 2, 1.0);
        let p = Predictor::select(&config.kernel(), true, false);
        let mut s = store.clone();
        let v = p.predict(&mut s, &ex, &[], &config.kernel(), 0.1);
        assert!((v - 0.4).abs() < 1e-6);
        assert_eq!(s, store);
    }

    #[test]
    fn pair_terms_use_interaction_slots() {
        let config = Config::default().with_bits(10);
        let q = crate::weights::Addressing::quadratic(3, 4);
        let store = store_with(&config, &[(q, &[2.0])]);
        let ex = Example::new().feature(b'a', 3, 0.5).feature(b'b', 4, 3.0);
        assert!((dot(&store, &ex, &[(b'a', b'b')], None) - 3.0).abs() < 1e-6);
        assert_eq!(dot(&store, &ex, &[(b'b', b'a')], None), 0.0);
    }

    #[test]
    fn fast_rescale_records_range_and_shrinks_weight() {
        let config = Config::default().with_bits(8).with_normalized(true);
        let k = config.kernel();
        let mut store = store_with(&config, &[(1, &[1.0, 0.5])]);
        let ex = Example::labeled(1.0).feature(b'a', 1, 2.0);
        let p = Predictor::select(&k, false, true);
        // ratio 0.25, non-adaptive squares it
        let v = p.predict(&mut store, &ex, &[], &k, 0.0);
        let slot = store.slot(store.addressing().address(1)).to_vec();
        assert!((slot[0] - 0.0625).abs() < 1e-7);
        assert_eq!(slot[1], 2.0);
        assert!((v - 0.125).abs() < 1e-7);
    }

    #[test]
    fn adaptive_rescale_is_linear_in_ratio() {
        let config = Config::default().with_bits(8).with_normalized(true).with_adaptive(true);
        let k = config.kernel();
        let mut store = store_with(&config, &[(1, &[1.0, 0.0, 0.5])]);
        let ex = Example::labeled(1.0).feature(b'a', 1, -2.0);
        Predictor::select(&k, false, true).predict(&mut store, &ex, &[], &k, 0.0);
        let slot = store.slot(store.addressing().address(1)).to_vec();
        assert!((slot[0] - 0.25).abs() < 1e-7);
        assert_eq!(slot[2], 2.0);
    }

    #[test]
    fn general_rescale_tracks_fast_at_half_power() {
        let config = Config::default().with_bits(8).with_normalized(true).with_adaptive(true);
        let fast = config.kernel();
        let general = KernelParams { power_t: 0.5000001, ..fast };
        let init: &[f32] = &[1.0, 0.0, 0.5];
        let ex = Example::labeled(1.0).feature(b'a', 1, 2.0);

        let mut a = store_with(&config, &[(1, init)]);
        Predictor::select(&fast, false, true).predict(&mut a, &ex, &[], &fast, 0.0);
        let mut b = store_with(&config, &[(1, init)]);
        let p = Predictor::select(&general, false, true);
        assert_eq!(p.rescale, Rescale::General);
        p.predict(&mut b, &ex, &[], &general, 0.0);

        let wa = a.weight(1);
        let wb = b.weight(1);
        assert!(((wa - wb) / wa).abs() < 5e-4, "{wa} vs {wb}");
    }

    #[test]
    fn first_sighting_sets_range_without_rescale() {
        let config = Config::default().with_bits(8).with_normalized(true);
        let k = config.kernel();
        let mut store = store_with(&config, &[(1, &[0.7, 0.0])]);
        let ex = Example::labeled(1.0).feature(b'a', 1, 3.0);
        Predictor::select(&k, false, true).predict(&mut store, &ex, &[], &k, 0.0);
        let slot = store.slot(store.addressing().address(1)).to_vec();
        assert_eq!(slot, vec![0.7, 3.0]);
    }

    #[test]
    fn finalize_replaces_nan_and_clamps() {
        let r = LabelRange::default();
        assert_eq!(finalize_prediction(f32::NAN, &r), (0.0, true));
        assert_eq!(finalize_prediction(3.0, &r), (1.0, false));
        assert_eq!(finalize_prediction(-3.0, &r), (0.0, false));
        assert_eq!(finalize_prediction(0.25, &r), (0.25, false));
    }
}
