//! Deterministic random generation and seed derivation.
//!
//! Projection matrices are never stored: they are regenerated on demand
//! from a seed, trading recomputation for memory. Everything here draws
//! from a private `ChaCha8Rng` stream constructed from the explicit seed
//! argument, so identical inputs are bit-reproducible across calls, runs,
//! and machines, and ambient/global randomness is never read or advanced.

use candle_core::{DType, Device, Tensor};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::Result;

/// Number of draws consumed by [`next_seed`] when rotating to a new
/// subspace seed.
pub const SEED_ADVANCE: usize = 15;

/// Seeds stay within the non-negative 64-bit signed range so they survive
/// serialization through systems that only carry `i64`.
const SEED_MASK: u64 = i64::MAX as u64;

/// Generate a standard-normal tensor from an explicit seed.
///
/// Entries are sampled in row-major order as `f32` and converted to the
/// requested dtype afterwards, so the stream of draws is independent of
/// the target dtype. The tensor is materialized directly on `device`.
///
/// # Errors
///
/// Returns an error if tensor creation or dtype conversion fails.
pub fn stable_randn(
    shape: &[usize],
    seed: u64,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let count: usize = shape.iter().product();
    let data: Vec<f32> = (0..count)
        .map(|_| StandardNormal.sample(&mut rng))
        .collect();
    let tensor = Tensor::from_vec(data, shape, device)?;
    if tensor.dtype() == dtype {
        Ok(tensor)
    } else {
        Ok(tensor.to_dtype(dtype)?)
    }
}

/// Derive a new, decorrelated seed from `seed`.
///
/// Draws [`SEED_ADVANCE`] pseudorandom non-negative integers from a stream
/// seeded by `seed` and returns the last one. Used to rotate compressed
/// momentum into a fresh projection subspace.
#[must_use]
pub fn next_seed(seed: u64) -> u64 {
    next_seed_with(seed, SEED_ADVANCE)
}

/// [`next_seed`] with an explicit advance count.
#[must_use]
pub fn next_seed_with(seed: u64, advance: usize) -> u64 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut last = 0;
    for _ in 0..advance {
        last = rng.next_u64() & SEED_MASK;
    }
    last
}

/// Split one seed into two independent seeds.
///
/// Draws exactly two non-negative integers from a stream seeded by `seed`.
/// The left and right projection matrices of one parameter are generated
/// from the two halves so they are statistically independent.
#[must_use]
pub fn split_seed(seed: u64) -> (u64, u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let left = rng.next_u64() & SEED_MASK;
    let right = rng.next_u64() & SEED_MASK;
    (left, right)
}
