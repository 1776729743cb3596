//! Weight update: `w += update · x · t` over the example's terms.

use crate::config::KernelParams;
use crate::example::Example;
use crate::fastmath::{fast_pow, inv_sqrt};
use crate::weights::WeightStore;

/// Apply `update` to every term of `example`.
///
/// `t` is 1 for plain SGD, the inverse square root (or `-power_t` power) of
/// the adaptive accumulator when adaptive, and the inverse squared feature
/// range scaled by `avg_norm` when normalized. The accumulators were already
/// advanced by the normalizer for this example.
pub fn apply_update(
    store: &mut WeightStore,
    example: &Example,
    pairs: &[(u8, u8)],
    params: &KernelParams,
    update: f32,
    avg_norm: f32,
) {
    if update == 0.0 {
        return;
    }
    let idx = params.normalized_idx;
    let fast = params.fast();
    let power_t_norm = params.power_t_norm();
    let addressing = store.addressing();

    example.for_each_term(addressing, pairs, |term| {
        let w = store.slot_mut(term.address);
        let t = if fast {
            let inv_norm = if params.normalized {
                1.0 / (w[idx] * avg_norm)
            } else {
                1.0
            };
            if params.adaptive {
                inv_sqrt(w[1]) * inv_norm
            } else {
                inv_norm * inv_norm
            }
        } else {
            let mut t = 1.0;
            if params.adaptive {
                t = fast_pow(w[1], -params.power_t);
            }
            if params.normalized {
                let n = w[idx] * avg_norm;
                t *= fast_pow(n * n, -power_t_norm);
            }
            t
        };
        w[0] += update * term.x * t;
    });
}
