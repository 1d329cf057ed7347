//! Configuration for the Flora optimizer.
//!
//! [`FloraConfig`] carries the hyperparameters of one parameter group:
//! the Adam parameters (`lr`, `betas`, `eps`) plus the compression knobs
//! (`rank`, `kappa`, `seed`). A `rank` of `None` disables compression and
//! the optimizer degenerates to standard Adam.

use serde::{Deserialize, Serialize};

use crate::error::{OptimError, Result};

/// Hyperparameters for one parameter group.
///
/// # Example
///
/// ```
/// use flora_optim_rs::FloraConfig;
///
/// let config = FloraConfig::new(1e-3)
///     .with_rank(Some(16))
///     .with_kappa(500)
///     .with_seed(42);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloraConfig {
    /// Learning rate. Must be finite and positive.
    pub lr: f64,

    /// Exponential decay rates for the first and second moment estimates.
    /// Each must lie in `[0, 1)`.
    pub betas: (f64, f64),

    /// Term added to the denominator for numerical stability.
    pub eps: f64,

    /// Target rank of the compressed first-moment state. `None` disables
    /// compression for the whole group.
    pub rank: Option<usize>,

    /// Number of steps between subspace rotations of compressed momentum.
    pub kappa: usize,

    /// Base seed for per-parameter projection streams.
    pub seed: u64,
}

impl Default for FloraConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            rank: None,
            kappa: 1000,
            seed: 0,
        }
    }
}

impl FloraConfig {
    /// Create a configuration with the given learning rate and defaults
    /// for everything else.
    #[must_use]
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            ..Self::default()
        }
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Set the moment decay rates.
    #[must_use]
    pub const fn with_betas(mut self, betas: (f64, f64)) -> Self {
        self.betas = betas;
        self
    }

    /// Set the denominator stability term.
    #[must_use]
    pub const fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set the compression rank. `None` disables compression.
    #[must_use]
    pub const fn with_rank(mut self, rank: Option<usize>) -> Self {
        self.rank = rank;
        self
    }

    /// Set the rotation interval.
    #[must_use]
    pub const fn with_kappa(mut self, kappa: usize) -> Self {
        self.kappa = kappa;
        self
    }

    /// Set the base seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check every hyperparameter against its admissible range.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::InvalidConfig`] when the learning rate is not
    /// finite and positive, a beta lies outside `[0, 1)`, `eps` is not
    /// positive, `rank` is `Some(0)`, or `kappa` is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(OptimError::InvalidConfig(format!(
                "lr must be finite and positive, got {}",
                self.lr
            )));
        }
        for (name, beta) in [("beta1", self.betas.0), ("beta2", self.betas.1)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(OptimError::InvalidConfig(format!(
                    "{name} must lie in [0, 1), got {beta}"
                )));
            }
        }
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(OptimError::InvalidConfig(format!(
                "eps must be finite and positive, got {}",
                self.eps
            )));
        }
        if self.rank == Some(0) {
            return Err(OptimError::InvalidConfig(
                "rank must be positive when set".to_string(),
            ));
        }
        if self.kappa == 0 {
            return Err(OptimError::InvalidConfig(
                "kappa must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FloraConfig::default();
        assert!((config.lr - 1e-3).abs() < 1e-12);
        assert!((config.betas.0 - 0.9).abs() < 1e-12);
        assert!((config.betas.1 - 0.999).abs() < 1e-12);
        assert_eq!(config.rank, None);
        assert_eq!(config.kappa, 1000);
        assert_eq!(config.seed, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FloraConfig::new(1e-4)
            .with_betas((0.8, 0.99))
            .with_eps(1e-6)
            .with_rank(Some(8))
            .with_kappa(250)
            .with_seed(7);

        assert!((config.lr - 1e-4).abs() < 1e-12);
        assert!((config.betas.0 - 0.8).abs() < 1e-12);
        assert_eq!(config.rank, Some(8));
        assert_eq!(config.kappa, 250);
        assert_eq!(config.seed, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_lr() {
        assert!(FloraConfig::new(0.0).validate().is_err());
        assert!(FloraConfig::new(-1.0).validate().is_err());
        assert!(FloraConfig::new(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_betas() {
        let config = FloraConfig::new(1e-3).with_betas((1.0, 0.999));
        assert!(config.validate().is_err());
        let config = FloraConfig::new(1e-3).with_betas((0.9, -0.1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rank_and_kappa() {
        assert!(FloraConfig::new(1e-3)
            .with_rank(Some(0))
            .validate()
            .is_err());
        assert!(FloraConfig::new(1e-3).with_kappa(0).validate().is_err());
    }

    #[test]
    fn test_beta_zero_is_valid() {
        // [0, 1) is half-open on the right only.
        let config = FloraConfig::new(1e-3).with_betas((0.0, 0.0));
        assert!(config.validate().is_ok());
    }
}
