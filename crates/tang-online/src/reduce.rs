//! Cross-worker averaging on top of a summing all-reduce.
//!
//! The collective itself lives outside this crate (see `tang-mesh`). All the
//! learner needs is an element-wise sum across every member of the group,
//! returned in place. Both averages are built from it.

use crate::error::LearnerError;
use crate::weights::WeightStore;

/// Element-wise sum across a group of workers.
///
/// Blocking: returns once every member has contributed, with `buffer`
/// replaced by the sum. Every member must call it the same number of times
/// with buffers of the same length.
pub trait AllReduce: Send {
    fn sum(&mut self, buffer: &mut [f32]) -> Result<(), LearnerError>;
}

/// Replace every weight by its mean across the group.
///
/// Only weights are exchanged. Accumulators stay local.
pub fn average(reducer: &mut dyn AllReduce, store: &mut WeightStore) -> Result<(), LearnerError> {
    let mut nodes = [1.0f32];
    reducer.sum(&mut nodes)?;

    let mut local: Vec<f32> = store.slots().map(|slot| slot[0]).collect();
    reducer.sum(&mut local)?;
    for (slot, total) in store.slots_mut().zip(&local) {
        slot[0] = total / nodes[0];
    }
    Ok(())
}

/// Average weighted by each worker's share of the adaptive accumulator.
///
/// Worker `i` holds `g_i` in a slot's accumulator; with `G = Σ g_i`, its
/// weight, accumulator and (with `normalized_idx`) range cell are scaled by
/// `g_i / G` before the whole table is summed. Slots no worker has touched
/// end at zero.
pub fn weighted_average(
    reducer: &mut dyn AllReduce,
    store: &mut WeightStore,
    normalized_idx: Option<usize>,
) -> Result<(), LearnerError> {
    if store.stride() < 2 {
        return Err(LearnerError::Config(
            "weighted averaging needs an adaptive accumulator".into(),
        ));
    }
    let mut totals: Vec<f32> = store.slots().map(|slot| slot[1]).collect();
    reducer.sum(&mut totals)?;

    for (slot, &total) in store.slots_mut().zip(&totals) {
        if total > 0.0 {
            let ratio = slot[1] / total;
            slot[0] *= ratio;
            slot[1] *= ratio;
            if let Some(idx) = normalized_idx {
                slot[idx] *= ratio;
            }
        } else {
            slot[0] = 0.0;
        }
    }
    reducer.sum(store.as_mut_slice())
}
