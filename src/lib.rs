//! # flora-optim-rs
//!
//! Memory-efficient Adam for training large parametric models, with
//! optional compression of the first-moment (momentum) state via
//! structured random projections.
//!
//! ## Key Properties
//!
//! - **Deterministic**: projection subspaces are regenerated on demand
//!   from explicit seeds; identical inputs produce bit-identical matrices
//! - **Memory-efficient**: eligible 2-D parameters keep momentum at rank
//!   `r` instead of full shape, while the second moment stays exact
//! - **Self-correcting**: the compressed subspace is rotated every `kappa`
//!   steps so momentum is not confined to one random subspace forever
//! - **Drop-in**: without a `rank`, the update is standard bias-corrected
//!   Adam
//!
//! ## Quick Start
//!
//! ```no_run
//! use candle_core::{DType, Device, Var};
//! use flora_optim_rs::{FloraAdam, FloraConfig};
//!
//! # fn main() -> flora_optim_rs::Result<()> {
//! let device = Device::Cpu;
//! let weight = Var::zeros((256, 256), DType::F32, &device)?;
//!
//! let config = FloraConfig::new(1e-3).with_rank(Some(16)).with_kappa(500);
//! let mut optimizer = FloraAdam::new(vec![weight.clone()], config)?;
//!
//! for _step in 0..1_000 {
//!     let loss = optimizer.step_with_closure(|| {
//!         // recompute the loss with gradient tracking enabled
//!         weight.as_tensor().sqr()?.sum_all()
//!     })?;
//!     let _ = loss.to_scalar::<f32>()?;
//! }
//! println!("{}", optimizer.compression_report());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: hyperparameters, builders, and validation
//! - [`error`]: error types and result alias
//! - [`rng`]: deterministic random generation and seed derivation
//! - [`projection`]: compression policy and projection operators
//! - [`optimizer`]: the update engine
//!
//! ## Algorithm
//!
//! For an eligible parameter with gradient `G` and current seed `s`:
//!
//! ```text
//! c      = down_proj(s, G)                    project along the narrow axis
//! m_t    = β1·m_{t-1} + (1−β1)·c              momentum, compressed space
//! v_t    = β2·v_{t-1} + (1−β2)·G⊙G           second moment, full space
//! W     -= lr · up_proj(s, m_t/(1−β1ᵗ)) / (√(v_t/(1−β2ᵗ)) + ε)
//! ```
//!
//! and every `kappa` steps the momentum is carried into a freshly seeded
//! subspace: `m ← down_proj(s', up_proj(s, m)); s ← s'`.
//!
//! ## References
//!
//! - Kingma, D. & Ba, J. (2015). Adam: A Method for Stochastic Optimization
//! - Hao, Y. et al. (2024). Flora: Low-Rank Adapters Are Secretly
//!   Gradient Compressors
//! - Johnson, W. & Lindenstrauss, J. (1984). Extensions of Lipschitz
//!   mappings

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod optimizer;
pub mod projection;
pub mod rng;

// Re-export main types at crate root for convenience
pub use config::FloraConfig;
pub use error::{OptimError, Result};
pub use optimizer::{CompressionReport, FloraAdam};
pub use projection::{down_proj, should_compress, up_proj, ProjectionMode};
pub use rng::{next_seed, split_seed, stable_randn};
