//! Per-parameter optimizer state.

use candle_core::Tensor;

use crate::error::Result;
use crate::projection::{should_compress, ProjectionMode};

/// Compression settings frozen into a parameter's state at initialization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Compression {
    /// Rank of the compressed first-moment representation.
    pub rank: usize,
    /// Projection orientation, decided once from the first gradient shape.
    pub mode: ProjectionMode,
}

/// State held for one trainable parameter.
///
/// Created lazily on the first update that sees this parameter's gradient
/// and kept for the optimizer's lifetime. The compression decision and the
/// `exp_avg` shape are fixed here and never re-evaluated.
pub(crate) struct ParamState {
    /// Number of updates applied to this parameter.
    pub step: usize,
    /// Seed of the current projection subspace.
    pub seed: u64,
    /// First-moment estimate; compressed shape when `compression` is set.
    pub exp_avg: Tensor,
    /// Second-moment estimate; always the full parameter shape.
    pub exp_avg_sq: Tensor,
    /// `Some` iff this parameter takes the compressed path.
    pub compression: Option<Compression>,
}

impl ParamState {
    /// Initialize state for a parameter whose first gradient is `grad`.
    ///
    /// Evaluates the compression policy against the observed gradient
    /// shape, picks the projection orientation, and allocates zero-filled
    /// moment buffers on the gradient's device and dtype.
    pub fn init(rank: Option<usize>, seed: u64, grad: &Tensor) -> Result<Self> {
        let dims = grad.dims();
        let compression = match rank {
            Some(rank) if should_compress(Some(rank), dims) => Some(Compression {
                rank,
                mode: ProjectionMode::for_shape(dims),
            }),
            _ => None,
        };

        let exp_avg = match compression {
            Some(c) => Tensor::zeros(
                c.mode.compressed_shape(dims, c.rank),
                grad.dtype(),
                grad.device(),
            )?,
            None => grad.zeros_like()?,
        };
        let exp_avg_sq = grad.zeros_like()?;

        Ok(Self {
            step: 0,
            seed,
            exp_avg,
            exp_avg_sq,
            compression,
        })
    }
}
