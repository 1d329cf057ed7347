//! Compression policy and random-projection operators.
//!
//! A 2-D gradient eligible for compression is projected along its narrower
//! axis onto a `rank`-dimensional subspace spanned by a random Gaussian
//! matrix. The matrix is regenerated on demand from a seed (see
//! [`crate::rng::stable_randn`]), never stored. The `1/√rank` scaling
//! preserves the expected norm under projection; the component orthogonal
//! to the subspace is lost, which is the accepted approximation that buys
//! the memory savings.

use candle_core::Tensor;

use crate::error::{OptimError, Result};
use crate::rng::{split_seed, stable_randn};

/// Maximum `max(shape) / min(shape)` ratio for a matrix to be eligible for
/// compression. Rules out highly rectangular tensors such as embeddings,
/// where projecting the short axis saves little and loses much.
pub const MAX_ASPECT_RATIO: f64 = 4.0;

/// Decide whether a gradient of the given shape is eligible for low-rank
/// treatment under the given rank setting.
///
/// True iff a positive rank is configured, the shape is exactly 2-D,
/// `min(shape) >= rank`, and `max(shape) / min(shape) <=` 4. The decision
/// is made once per parameter, at state initialization, and never
/// re-evaluated.
#[must_use]
pub fn should_compress(rank: Option<usize>, shape: &[usize]) -> bool {
    let Some(rank) = rank else { return false };
    if rank == 0 || shape.len() != 2 {
        return false;
    }
    let min = shape[0].min(shape[1]);
    let max = shape[0].max(shape[1]);
    #[allow(clippy::cast_precision_loss)]
    let aspect = max as f64 / min as f64;
    min >= rank && aspect <= MAX_ASPECT_RATIO
}

/// Which side of a matrix the projection is applied to.
///
/// Decided once from the gradient shape at state initialization and stored
/// with the parameter state, so a later shape mutation cannot silently
/// flip the orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Wide matrix (`rows < cols`): multiply by `L ∈ ℝ^(rank×rows)` from
    /// the left, compressing the row axis.
    Left,
    /// Tall or square matrix: multiply by `R ∈ ℝ^(cols×rank)` from the
    /// right, compressing the column axis.
    Right,
}

impl ProjectionMode {
    /// Choose the mode for a 2-D shape: the narrower axis is projected.
    #[must_use]
    pub fn for_shape(shape: &[usize]) -> Self {
        if shape[0] < shape[shape.len() - 1] {
            Self::Left
        } else {
            Self::Right
        }
    }

    /// Shape of the compressed representation of a `shape`-sized tensor.
    #[must_use]
    pub fn compressed_shape(self, shape: &[usize], rank: usize) -> Vec<usize> {
        match self {
            Self::Left => vec![rank, shape[1]],
            Self::Right => vec![shape[0], rank],
        }
    }
}

fn require_2d(shape: &[usize]) -> Result<()> {
    if shape.len() == 2 {
        Ok(())
    } else {
        Err(OptimError::UnsupportedShape {
            shape: shape.to_vec(),
        })
    }
}

/// Materialize the projection matrix for the given mode.
///
/// `dim` is the length of the projected axis: `rows` for [`ProjectionMode::Left`],
/// `cols` for [`ProjectionMode::Right`]. The left and right streams come
/// from the two halves of [`split_seed`], so the matrix a parameter would
/// use on its other side is statistically independent.
fn projection_matrix(
    mode: ProjectionMode,
    seed: u64,
    rank: usize,
    dim: usize,
    like: &Tensor,
) -> Result<Tensor> {
    let (left_seed, right_seed) = split_seed(seed);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / (rank as f64).sqrt();
    let matrix = match mode {
        ProjectionMode::Left => stable_randn(
            &[rank, dim],
            left_seed,
            like.device(),
            like.dtype(),
        )?,
        ProjectionMode::Right => stable_randn(
            &[dim, rank],
            right_seed,
            like.device(),
            like.dtype(),
        )?,
    };
    Ok((matrix * scale)?)
}

/// Project a full-space 2-D tensor into the `rank`-dimensional subspace
/// determined by `seed`.
///
/// # Errors
///
/// Fails when the tensor is not 2-D or a tensor operation fails.
pub fn down_proj(seed: u64, rank: usize, mode: ProjectionMode, tensor: &Tensor) -> Result<Tensor> {
    let dims = tensor.dims();
    require_2d(dims)?;
    match mode {
        ProjectionMode::Left => {
            let left = projection_matrix(mode, seed, rank, dims[0], tensor)?;
            Ok(left.matmul(tensor)?)
        }
        ProjectionMode::Right => {
            let right = projection_matrix(mode, seed, rank, dims[1], tensor)?;
            Ok(tensor.matmul(&right)?)
        }
    }
}

/// Map a compressed tensor back to the full space of `shape`.
///
/// Uses the transpose of the same matrix [`down_proj`] generates for
/// `(seed, rank, mode)`, so a down/up round trip stays within the chosen
/// subspace.
///
/// # Errors
///
/// Fails when `shape` is not 2-D or a tensor operation fails.
pub fn up_proj(
    seed: u64,
    rank: usize,
    mode: ProjectionMode,
    shape: &[usize],
    compressed: &Tensor,
) -> Result<Tensor> {
    require_2d(shape)?;
    match mode {
        ProjectionMode::Left => {
            let left = projection_matrix(mode, seed, rank, shape[0], compressed)?;
            Ok(left.t()?.matmul(compressed)?)
        }
        ProjectionMode::Right => {
            let right = projection_matrix(mode, seed, rank, shape[1], compressed)?;
            Ok(compressed.matmul(&right.t()?)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    #[test]
    fn test_should_compress_boundary() {
        // Eligible: 2-D, min >= rank, aspect <= 4.
        assert!(should_compress(Some(8), &[256, 64]));
        assert!(should_compress(Some(8), &[64, 256]));
        assert!(should_compress(Some(16), &[16, 16]));

        // Aspect ratio 32 rules out embedding-like shapes.
        assert!(!should_compress(Some(8), &[4096, 128]));

        // Rank larger than the narrow axis.
        assert!(!should_compress(Some(128), &[64, 256]));

        // Only exactly-2-D shapes qualify.
        assert!(!should_compress(Some(8), &[256]));
        assert!(!should_compress(Some(8), &[16, 16, 16]));

        // No rank, no compression.
        assert!(!should_compress(None, &[256, 64]));
        assert!(!should_compress(Some(0), &[256, 64]));
    }

    #[test]
    fn test_mode_for_shape() {
        assert_eq!(ProjectionMode::for_shape(&[8, 16]), ProjectionMode::Left);
        assert_eq!(ProjectionMode::for_shape(&[16, 8]), ProjectionMode::Right);
        // Square counts as tall.
        assert_eq!(ProjectionMode::for_shape(&[16, 16]), ProjectionMode::Right);
    }

    #[test]
    fn test_compressed_shape() {
        assert_eq!(
            ProjectionMode::Left.compressed_shape(&[8, 16], 4),
            vec![4, 16]
        );
        assert_eq!(
            ProjectionMode::Right.compressed_shape(&[16, 8], 4),
            vec![16, 4]
        );
    }

    #[test]
    fn test_down_proj_shapes() {
        let device = Device::Cpu;
        let wide = Tensor::ones((8, 16), DType::F32, &device).unwrap();
        let down = down_proj(3, 4, ProjectionMode::Left, &wide).unwrap();
        assert_eq!(down.dims(), &[4, 16]);

        let tall = Tensor::ones((16, 8), DType::F32, &device).unwrap();
        let down = down_proj(3, 4, ProjectionMode::Right, &tall).unwrap();
        assert_eq!(down.dims(), &[16, 4]);
    }

    #[test]
    fn test_up_proj_restores_full_shape() {
        let device = Device::Cpu;
        let tall = Tensor::ones((16, 8), DType::F32, &device).unwrap();
        let down = down_proj(3, 4, ProjectionMode::Right, &tall).unwrap();
        let up = up_proj(3, 4, ProjectionMode::Right, &[16, 8], &down).unwrap();
        assert_eq!(up.dims(), &[16, 8]);
    }

    #[test]
    fn test_round_trip_is_deterministic() {
        let device = Device::Cpu;
        let t = crate::rng::stable_randn(&[12, 6], 11, &device, DType::F32).unwrap();

        let a = down_proj(5, 3, ProjectionMode::Right, &t).unwrap();
        let b = down_proj(5, 3, ProjectionMode::Right, &t).unwrap();
        let a: Vec<Vec<f32>> = a.to_vec2().unwrap();
        let b: Vec<Vec<f32>> = b.to_vec2().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_projection_preserves_expected_norm() {
        // With entries N(0,1)/sqrt(rank), E[|down(t)|^2] = |t|^2.
        let device = Device::Cpu;
        let t = crate::rng::stable_randn(&[64, 64], 21, &device, DType::F32).unwrap();
        let full_norm: f32 = t
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();

        let mut total = 0.0f32;
        let samples = 20u64;
        for seed in 0..samples {
            let down = down_proj(seed, 32, ProjectionMode::Right, &t).unwrap();
            total += down
                .sqr()
                .unwrap()
                .sum_all()
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = total / samples as f32;
        let ratio = mean / full_norm;
        assert!(
            (0.7..1.3).contains(&ratio),
            "norm ratio {ratio} outside tolerance"
        );
    }

    #[test]
    fn test_non_2d_is_rejected() {
        let device = Device::Cpu;
        let t = Tensor::ones(8, DType::F32, &device).unwrap();
        let err = down_proj(1, 4, ProjectionMode::Right, &t);
        assert!(matches!(err, Err(OptimError::UnsupportedShape { .. })));

        let c = Tensor::ones((4, 4), DType::F32, &device).unwrap();
        let err = up_proj(1, 4, ProjectionMode::Right, &[8], &c);
        assert!(matches!(err, Err(OptimError::UnsupportedShape { .. })));
    }
}
