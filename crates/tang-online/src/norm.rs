//! Per-example update norm.
//!
//! The normalizer walks the same terms as the updater and, when adaptive,
//! folds this example's squared gradient into each slot's accumulator
//! (`w[1] += g·x²`) before the updater reads it. It also owns the running
//! sum of normalized example norms that normalized updates scale against.

use crate::config::KernelParams;
use crate::example::Example;
use crate::fastmath::{fast_pow, inv_sqrt};
use crate::weights::WeightStore;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Normalizer {
    sum_norm_x: f64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sum_norm_x(&self) -> f64 {
        self.sum_norm_x
    }

    /// `sqrt` of the running mean normalized norm over `total_weight`.
    pub fn average_norm(&self, total_weight: f32) -> f32 {
        (self.sum_norm_x / total_weight as f64).sqrt() as f32
    }

    /// The norm the loss's step is divided by.
    ///
    /// `g` is the loss's squared gradient at the prediction; `importance` the
    /// example's weight; `total_weight` the weighted example count the running
    /// mean is taken over. A zero `g` returns 1 and touches nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        store: &mut WeightStore,
        example: &Example,
        pairs: &[(u8, u8)],
        params: &KernelParams,
        g: f32,
        importance: f32,
        total_weight: f32,
    ) -> f32 {
        if g == 0.0 {
            return 1.0;
        }
        let idx = params.normalized_idx;
        let fast = params.fast();
        let power_t_norm = params.power_t_norm();
        let addressing = store.addressing();

        let mut norm = 0.0f32;
        let mut norm_x = 0.0f32;
        example.for_each_term(addressing, pairs, |term| {
            let w = store.slot_mut(term.address);
            let x2 = term.x * term.x;
            let t = if fast {
                let mut inv_norm = 1.0;
                let mut inv_norm2 = 1.0;
                if params.normalized {
                    inv_norm = 1.0 / w[idx];
                    inv_norm2 = inv_norm * inv_norm;
                    norm_x += x2 * inv_norm2;
                }
                if params.adaptive {
                    w[1] += g * x2;
                    inv_sqrt(w[1]) * inv_norm
                } else {
                    inv_norm2
                }
            } else {
                let mut t = 1.0;
                if params.adaptive {
                    w[1] += g * x2;
                    t = fast_pow(w[1], -params.power_t);
                }
                if params.normalized {
                    let range2 = w[idx] * w[idx];
                    t *= fast_pow(range2, -power_t_norm);
                    norm_x += x2 / range2;
                }
                t
            };
            norm += x2 * t;
        });

        if params.normalized {
            self.sum_norm_x += (importance * norm_x) as f64;
            let avg_sq_norm = (self.sum_norm_x / total_weight as f64) as f32;
            if !fast {
                norm *= fast_pow(avg_sq_norm, -power_t_norm);
            } else if params.adaptive {
                norm /= avg_sq_norm.sqrt();
            } else {
                norm /= avg_sq_norm;
            }
        }
        norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn single(config: &Config, cells: &[f32]) -> (WeightStore, usize) {
        let mut store = WeightStore::new(config.num_bits, config.stride());
        let address = store.addressing().address(7);
        store.slot_mut(address)[..cells.len()].copy_from_slice(cells);
        (store, address)
    }

    #[test]
    fn zero_gradient_touches_nothing() {
        let config = Config::default().with_bits(6).with_adaptive(true).with_normalized(true);
        let (mut store, _) = single(&config, &[0.0, 0.0, 1.0]);
        let before = store.clone();
        let mut n = Normalizer::new();
        let ex = Example::labeled(1.0).feature(b'a', 7, 1.0);
        let norm = n.compute(&mut store, &ex, &[], &config.kernel(), 0.0, 1.0, 1.0);
        assert_eq!(norm, 1.0);
        assert_eq!(store, before);
        assert_eq!(n.sum_norm_x(), 0.0);
    }

    #[test]
    fn adaptive_accumulates_squared_gradient() {
        let config = Config::default().with_bits(6).with_adaptive(true);
        let (mut store, address) = single(&config, &[0.0, 0.0]);
        let mut n = Normalizer::new();
        let ex = Example::labeled(1.0).feature(b'a', 7, 2.0);
        // g = 1, x² = 4: w[1] = 4, t = 1/2, norm = 4·½
        let norm = n.compute(&mut store, &ex, &[], &config.kernel(), 1.0, 1.0, 1.0);
        assert_eq!(store.slot(address)[1], 4.0);
        assert!((norm - 2.0).abs() < 1e-2);
    }

    #[test]
    fn normalized_divides_by_running_average() {
        let config = Config::default().with_bits(6).with_normalized(true);
        let (mut store, _) = single(&config, &[0.0, 2.0]);
        let mut n = Normalizer::new();
        let ex = Example::labeled(1.0).feature(b'a', 7, 2.0);
        // x²/range² = 1 → norm 1, sum_norm_x 1, avg 1
        let norm = n.compute(&mut store, &ex, &[], &config.kernel(), 1.0, 1.0, 1.0);
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(n.sum_norm_x(), 1.0);
        // second example, total weight 2: sum 2, avg 1
        let norm = n.compute(&mut store, &ex, &[], &config.kernel(), 1.0, 1.0, 2.0);
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((n.average_norm(2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn general_path_agrees_with_fast_path_near_half() {
        let config = Config::default().with_bits(6).with_adaptive(true).with_normalized(true);
        let fast = config.kernel();
        let general = KernelParams { power_t: 0.5000001, ..fast };
        let ex = Example::labeled(1.0).feature(b'a', 7, 1.5).feature(b'b', 9, -0.5);
        let prep = |store: &mut WeightStore| {
            for index in [7u64, 9] {
                let a = store.addressing().address(index);
                store.slot_mut(a)[..3].copy_from_slice(&[0.1, 0.4, 2.0]);
            }
        };

        let mut a = WeightStore::new(6, 4);
        prep(&mut a);
        let na = Normalizer::new().compute(&mut a, &ex, &[], &fast, 0.8, 1.0, 3.0);
        let mut b = WeightStore::new(6, 4);
        prep(&mut b);
        let nb = Normalizer::new().compute(&mut b, &ex, &[], &general, 0.8, 1.0, 3.0);

        assert!(((na - nb) / na).abs() < 5e-3, "{na} vs {nb}");
        assert_eq!(a.as_slice(), b.as_slice());
    }
}
