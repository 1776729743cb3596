//! Fast float approximations used on the update path.
//!
//! These trade accuracy for speed and are not IEEE-exact. Measured over
//! `x` in `[1e-4, 1e4]` and `p` in `[-1, 0]`:
//!
//! | function    | max error           |
//! |-------------|---------------------|
//! | `fast_log2` | 1.5e-4 absolute     |
//! | `fast_pow`  | 1.1e-4 relative     |
//! | `inv_sqrt`  | 1.8e-3 relative     |
//!
//! `fast_pow(1.0, p)` is about `1.0000229`, not `1.0`. Compare against
//! these with tolerances, never with `==`.

#![allow(clippy::excessive_precision)]

/// `1 / sqrt(x)`: bit-level initial guess refined by one Newton step.
#[inline]
pub fn inv_sqrt(x: f32) -> f32 {
    let half = 0.5 * x;
    let guess = f32::from_bits(0x5f37_59d5_u32.wrapping_sub(x.to_bits() >> 1));
    guess * (1.5 - half * guess * guess)
}

/// Base-2 logarithm from the exponent bits plus a rational fit of the mantissa.
#[inline]
pub fn fast_log2(x: f32) -> f32 {
    let bits = x.to_bits();
    let mantissa = f32::from_bits((bits & 0x007f_ffff) | 0x3f00_0000);
    let y = bits as f32 * 1.1920928955078125e-7;
    y - 124.22551499 - 1.498030302 * mantissa - 1.72587999 / (0.3520887068 + mantissa)
}

/// `2^p`, clipped below at `2^-126`.
#[inline]
pub fn fast_pow2(p: f32) -> f32 {
    let offset = if p < 0.0 { 1.0 } else { 0.0 };
    let clipped = if p < -126.0 { -126.0 } else { p };
    let whole = clipped as i32;
    let z = clipped - whole as f32 + offset;
    let bits = ((1u32 << 23) as f32
        * (clipped + 121.2740575 + 27.7280233 / (4.84252568 - z) - 1.49012907 * z))
        as u32;
    f32::from_bits(bits)
}

/// `x^p` for positive `x`, via `fast_pow2(p * fast_log2(x))`.
#[inline]
pub fn fast_pow(x: f32, p: f32) -> f32 {
    fast_pow2(p * fast_log2(x))
}
