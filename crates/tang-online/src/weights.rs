//! Weight store: a flat table of fixed-stride slots addressed by masked hashes.
//!
//! Each logical feature owns `stride` consecutive cells:
//!
//! ```text
//! cell 0               weight
//! cell 1               squared-gradient accumulator (adaptive)
//! cell normalized_idx  largest |x| seen for the feature (normalized)
//! ```
//!
//! Feature indices are raw hashes. The store shifts them by `log2(stride)`
//! and masks with `2^num_bits * stride - 1`, so every address is the start of
//! a slot and no lookup can leave the table.

use std::slice::{ChunksExact, ChunksExactMut};

use crate::error::LearnerError;

/// Multiplicative salt applied to the first index of an interaction pair.
pub const QUADRATIC_CONSTANT: u64 = 27_942_141;

/// Hash of the constant (bias) feature.
pub const CONSTANT: u64 = 11_650_396;

/// Namespace holding the constant feature.
pub const CONSTANT_NAMESPACE: u8 = 128;

/// Index arithmetic shared by every traversal of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Addressing {
    stride_shift: u32,
    mask: u64,
}

impl Addressing {
    /// `stride` must be a power of two.
    pub fn new(num_bits: u32, stride: usize) -> Self {
        debug_assert!(stride.is_power_of_two());
        let stride_shift = stride.trailing_zeros();
        Self {
            stride_shift,
            mask: (1u64 << (num_bits + stride_shift)) - 1,
        }
    }

    /// Offset of the first cell of the slot owning `index`.
    #[inline]
    pub fn address(&self, index: u64) -> usize {
        ((index << self.stride_shift) & self.mask) as usize
    }

    /// Raw index of the interaction term between `first` and `second`.
    ///
    /// Not symmetric: `first` carries the salt.
    #[inline]
    pub fn quadratic(first: u64, second: u64) -> u64 {
        first.wrapping_mul(QUADRATIC_CONSTANT).wrapping_add(second)
    }

    pub fn stride(&self) -> usize {
        1 << self.stride_shift
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }
}

/// The model's weight table.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightStore {
    cells: Vec<f32>,
    num_bits: u32,
    addressing: Addressing,
}

impl WeightStore {
    /// Zero-initialized table of `2^num_bits` slots of `stride` cells.
    pub fn new(num_bits: u32, stride: usize) -> Self {
        let addressing = Addressing::new(num_bits, stride);
        Self {
            cells: vec![0.0; (1usize << num_bits) * stride],
            num_bits,
            addressing,
        }
    }

    /// Rebuild a table from raw cells (e.g. a restored checkpoint).
    pub fn from_cells(num_bits: u32, stride: usize, cells: Vec<f32>) -> Result<Self, LearnerError> {
        if !stride.is_power_of_two() {
            return Err(LearnerError::Config(format!(
                "stride {stride} is not a power of two"
            )));
        }
        let expected = (1usize << num_bits) * stride;
        if cells.len() != expected {
            return Err(LearnerError::ShapeMismatch {
                expected,
                got: cells.len(),
            });
        }
        Ok(Self {
            cells,
            num_bits,
            addressing: Addressing::new(num_bits, stride),
        })
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn stride(&self) -> usize {
        self.addressing.stride()
    }

    /// Number of logical feature slots.
    pub fn num_slots(&self) -> usize {
        1 << self.num_bits
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The slot starting at `address` (as returned by [`Addressing::address`]).
    #[inline]
    pub fn slot(&self, address: usize) -> &[f32] {
        let stride = self.stride();
        &self.cells[address..address + stride]
    }

    #[inline]
    pub fn slot_mut(&mut self, address: usize) -> &mut [f32] {
        let stride = self.stride();
        &mut self.cells[address..address + stride]
    }

    /// Stored (not regularized) weight for a raw feature index.
    pub fn weight(&self, index: u64) -> f32 {
        self.cells[self.addressing.address(index)]
    }

    pub fn set_weight(&mut self, index: u64, value: f32) {
        let address = self.addressing.address(index);
        self.cells[address] = value;
    }

    pub fn slots(&self) -> ChunksExact<'_, f32> {
        self.cells.chunks_exact(self.stride())
    }

    pub fn slots_mut(&mut self) -> ChunksExactMut<'_, f32> {
        let stride = self.stride();
        self.cells.chunks_exact_mut(stride)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    pub fn into_cells(self) -> Vec<f32> {
        self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_slot_aligned_and_in_range() {
        let store = WeightStore::new(4, 4);
        let a = store.addressing();
        for index in [0u64, 1, 15, 16, 17, u64::MAX, CONSTANT] {
            let address = a.address(index);
            assert_eq!(address % 4, 0);
            assert!(address + 4 <= store.len());
        }
    }

    #[test]
    fn address_wraps_on_num_bits() {
        let a = Addressing::new(4, 2);
        assert_eq!(a.address(3), 6);
        assert_eq!(a.address(16 + 3), 6);
        assert_eq!(a.mask(), 31);
    }

    #[test]
    fn quadratic_matches_strided_combination() {
        // (Q * (h1 << s) + (h2 << s)) & mask == ((Q * h1 + h2) << s) & mask
        let a = Addressing::new(10, 4);
        let (h1, h2) = (123_457u64, 98_765u64);
        let strided = (QUADRATIC_CONSTANT.wrapping_mul(h1 << 2)).wrapping_add(h2 << 2) & a.mask();
        assert_eq!(a.address(Addressing::quadratic(h1, h2)), strided as usize);
    }

    #[test]
    fn quadratic_is_ordered() {
        assert_ne!(Addressing::quadratic(1, 2), Addressing::quadratic(2, 1));
    }

    #[test]
    fn from_cells_checks_shape() {
        assert!(WeightStore::from_cells(3, 2, vec![0.0; 16]).is_ok());
        match WeightStore::from_cells(3, 2, vec![0.0; 15]) {
            Err(LearnerError::ShapeMismatch { expected, got }) => {
                assert_eq!((expected, got), (16, 15));
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
        assert!(WeightStore::from_cells(3, 3, vec![0.0; 24]).is_err());
    }

    #[test]
    fn set_and_read_weight() {
        let mut store = WeightStore::new(6, 2);
        store.set_weight(9, 0.25);
        assert_eq!(store.weight(9), 0.25);
        assert_eq!(store.weight(9 + 64), 0.25);
        assert_eq!(store.slot(store.addressing().address(9))[1], 0.0);
    }
}
