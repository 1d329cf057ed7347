//! The Flora update engine.
//!
//! [`FloraAdam`] is Adam with an optional low-rank twist: when a parameter
//! group carries a `rank`, eligible 2-D gradients have their first-moment
//! state kept in a seeded random subspace (see [`crate::projection`]),
//! while the second moment stays full-shape so the per-element step scale
//! remains exact. Every `kappa` updates the subspace is rotated to a fresh
//! seed so momentum is not confined forever to one possibly-unlucky
//! subspace.
//!
//! Parameters are [`candle_core::Var`]s and gradients come from a
//! [`GradStore`] produced by `loss.backward()`. The optimizer mutates
//! parameters in place with `Var::set`; a parameter without a gradient in
//! a given invocation is skipped entirely.
//!
//! Parameter shapes must stay fixed for the optimizer's lifetime: the
//! projection orientation and moment-buffer shapes are frozen when a
//! parameter's state is first initialized.

mod state;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use tracing::debug;

use crate::config::FloraConfig;
use crate::error::{OptimError, Result};
use crate::projection::{down_proj, up_proj};
use crate::rng::next_seed;

use state::ParamState;

struct TrackedVar {
    /// 1-based ordinal of this parameter across all groups, used as the
    /// stable state key.
    handle: usize,
    /// Initial projection seed, `base_seed + handle`.
    seed: u64,
    var: Var,
}

struct Group {
    vars: Vec<TrackedVar>,
    config: FloraConfig,
}

/// Adam with optional random-projection compression of momentum state.
///
/// # Example
///
/// ```no_run
/// use candle_core::{DType, Device, Var};
/// use flora_optim_rs::{FloraAdam, FloraConfig};
///
/// # fn main() -> flora_optim_rs::Result<()> {
/// let device = Device::Cpu;
/// let w = Var::zeros((64, 64), DType::F32, &device)?;
/// let config = FloraConfig::new(1e-3).with_rank(Some(16));
/// let mut optimizer = FloraAdam::new(vec![w.clone()], config)?;
///
/// for _ in 0..100 {
///     let loss = optimizer.step_with_closure(|| {
///         // recompute the loss with gradient tracking
///         w.as_tensor().sqr()?.sum_all()
///     })?;
///     let _ = loss;
/// }
/// # Ok(())
/// # }
/// ```
pub struct FloraAdam {
    groups: Vec<Group>,
    states: HashMap<usize, ParamState>,
}

impl FloraAdam {
    /// Create an optimizer with a single parameter group.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::InvalidConfig`] when the config fails
    /// validation.
    pub fn new(vars: Vec<Var>, config: FloraConfig) -> Result<Self> {
        Self::new_with_groups(vec![(vars, config)])
    }

    /// Create an optimizer from ordered parameter groups, each with its
    /// own hyperparameter slice.
    ///
    /// Each parameter receives a distinct initial projection seed equal to
    /// the base seed plus its 1-based ordinal across all groups in
    /// iteration order. This is deterministic but order-sensitive:
    /// reordering groups or parameters changes the seeds. The base seed is
    /// the first group's `seed`; differing seeds in later groups are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::InvalidConfig`] when any group's config fails
    /// validation.
    pub fn new_with_groups(groups: Vec<(Vec<Var>, FloraConfig)>) -> Result<Self> {
        for (_, config) in &groups {
            config.validate()?;
        }
        let base_seed = groups.first().map_or(0, |(_, config)| config.seed);

        let mut slots = Vec::with_capacity(groups.len());
        let mut ordinal = 0usize;
        for (vars, config) in groups {
            if config.seed != base_seed {
                debug!(
                    group_seed = config.seed,
                    base_seed, "group seed differs from base seed, using base"
                );
            }
            let vars = vars
                .into_iter()
                .map(|var| {
                    ordinal += 1;
                    TrackedVar {
                        handle: ordinal,
                        seed: base_seed.wrapping_add(ordinal as u64),
                        var,
                    }
                })
                .collect();
            slots.push(Group { vars, config });
        }

        Ok(Self {
            groups: slots,
            states: HashMap::new(),
        })
    }

    /// Apply one optimization step from precomputed gradients.
    ///
    /// Every parameter with a gradient in `grads` is updated in place per
    /// its group's config; parameters without a gradient are skipped and
    /// their step counters stay untouched.
    ///
    /// # Errors
    ///
    /// Propagates tensor-operation failures.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        let states = &mut self.states;
        for group in &self.groups {
            let config = &group.config;
            for tracked in &group.vars {
                let Some(grad) = grads.get(tracked.var.as_tensor()) else {
                    continue;
                };
                let state = match states.entry(tracked.handle) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let state = ParamState::init(config.rank, tracked.seed, grad)?;
                        debug!(
                            handle = tracked.handle,
                            compressed = state.compression.is_some(),
                            "initialized parameter state"
                        );
                        entry.insert(state)
                    }
                };
                apply_update(config, state, &tracked.var, grad)?;
            }
        }
        Ok(())
    }

    /// Run `backward()` on a precomputed loss and apply the resulting
    /// gradients.
    ///
    /// # Errors
    ///
    /// Propagates backward-pass and tensor-operation failures.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Invoke `closure` exactly once to (re)compute the loss with gradient
    /// tracking enabled, apply the update, and return the loss it
    /// produced.
    ///
    /// # Errors
    ///
    /// Propagates closure, backward-pass, and tensor-operation failures.
    pub fn step_with_closure<F>(&mut self, closure: F) -> Result<Tensor>
    where
        F: FnOnce() -> candle_core::Result<Tensor>,
    {
        let loss = closure()?;
        self.backward_step(&loss)?;
        Ok(loss)
    }

    /// Learning rate of the first parameter group.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.groups.first().map_or(0.0, |group| group.config.lr)
    }

    /// Set the learning rate of every parameter group. Intended for an
    /// external learning-rate schedule running between invocations.
    pub fn set_learning_rate(&mut self, lr: f64) {
        for group in &mut self.groups {
            group.config.lr = lr;
        }
    }

    /// Set the learning rate of one parameter group.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::InvalidConfig`] when `group` is out of range.
    pub fn set_group_learning_rate(&mut self, group: usize, lr: f64) -> Result<()> {
        let count = self.groups.len();
        let slot = self.groups.get_mut(group).ok_or_else(|| {
            OptimError::InvalidConfig(format!("group index {group} out of range ({count} groups)"))
        })?;
        slot.config.lr = lr;
        Ok(())
    }

    /// Number of parameter groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of tracked parameters across all groups.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.groups.iter().map(|group| group.vars.len()).sum()
    }

    /// Update count of the parameter with the given 1-based handle, or
    /// `None` if its state has not been initialized yet.
    #[must_use]
    pub fn param_step(&self, handle: usize) -> Option<usize> {
        self.states.get(&handle).map(|state| state.step)
    }

    /// Current projection seed of the parameter with the given 1-based
    /// handle, or `None` if its state has not been initialized yet.
    #[must_use]
    pub fn param_seed(&self, handle: usize) -> Option<u64> {
        self.states.get(&handle).map(|state| state.seed)
    }

    /// Whether the parameter with the given 1-based handle took the
    /// compressed path, or `None` if its state has not been initialized
    /// yet.
    #[must_use]
    pub fn param_compressed(&self, handle: usize) -> Option<bool> {
        self.states
            .get(&handle)
            .map(|state| state.compression.is_some())
    }

    /// Summarize how much moment-state memory compression is saving.
    ///
    /// Only parameters whose state has been initialized contribute to the
    /// element counts.
    #[must_use]
    pub fn compression_report(&self) -> CompressionReport {
        let mut report = CompressionReport {
            params_total: self.param_count(),
            ..CompressionReport::default()
        };
        for group in &self.groups {
            for tracked in &group.vars {
                let Some(state) = self.states.get(&tracked.handle) else {
                    continue;
                };
                report.params_initialized += 1;
                if state.compression.is_some() {
                    report.params_compressed += 1;
                }
                report.moment_elems_full += 2 * tracked.var.elem_count();
                report.moment_elems_stored +=
                    state.exp_avg.elem_count() + state.exp_avg_sq.elem_count();
            }
        }
        report
    }
}

/// Apply one Adam update to a single parameter, compressed or full.
fn apply_update(
    config: &FloraConfig,
    state: &mut ParamState,
    var: &Var,
    grad: &Tensor,
) -> Result<()> {
    state.step += 1;
    let t = state.step;
    let (beta1, beta2) = config.betas;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let bc1 = 1.0 - beta1.powi(t as i32);
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let bc2 = 1.0 - beta2.powi(t as i32);

    // The second moment always lives in the full space, on the raw
    // gradient, so the per-element denominator keeps its exact scale.
    let exp_avg_sq = ((&state.exp_avg_sq * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;
    let corrected_avg_sq = (&exp_avg_sq / bc2)?;
    let denom = (corrected_avg_sq.sqrt()? + config.eps)?;

    if let Some(compression) = state.compression {
        let dims = grad.dims();
        let cgrad = down_proj(state.seed, compression.rank, compression.mode, grad)?;
        let mut exp_avg = ((&state.exp_avg * beta1)? + (cgrad * (1.0 - beta1))?)?;

        let corrected_avg = (&exp_avg / bc1)?;
        let update = up_proj(
            state.seed,
            compression.rank,
            compression.mode,
            dims,
            &corrected_avg,
        )?;
        let delta = ((update / denom)? * config.lr)?;
        var.set(&(var.as_tensor() - delta)?)?;

        if t % config.kappa == 0 {
            let rotated = next_seed(state.seed);
            let full = up_proj(state.seed, compression.rank, compression.mode, dims, &exp_avg)?;
            exp_avg = down_proj(rotated, compression.rank, compression.mode, &full)?;
            debug!(
                step = t,
                old_seed = state.seed,
                new_seed = rotated,
                "rotated momentum subspace"
            );
            state.seed = rotated;
        }
        state.exp_avg = exp_avg.detach();
    } else {
        let exp_avg = ((&state.exp_avg * beta1)? + (grad * (1.0 - beta1))?)?;
        let corrected_avg = (&exp_avg / bc1)?;
        let delta = ((corrected_avg / denom)? * config.lr)?;
        var.set(&(var.as_tensor() - delta)?)?;
        state.exp_avg = exp_avg.detach();
    }
    state.exp_avg_sq = exp_avg_sq.detach();
    Ok(())
}

/// Moment-state memory summary for one optimizer.
#[derive(Debug, Clone, Default)]
pub struct CompressionReport {
    /// Parameters tracked by the optimizer.
    pub params_total: usize,
    /// Parameters whose state has been initialized.
    pub params_initialized: usize,
    /// Initialized parameters on the compressed path.
    pub params_compressed: usize,
    /// Moment elements standard Adam would store for the initialized
    /// parameters.
    pub moment_elems_full: usize,
    /// Moment elements actually stored.
    pub moment_elems_stored: usize,
}

impl CompressionReport {
    /// Fraction of moment-state memory saved versus standard Adam.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn memory_saving(&self) -> f32 {
        if self.moment_elems_full == 0 {
            return 0.0;
        }
        1.0 - self.moment_elems_stored as f32 / self.moment_elems_full as f32
    }
}

impl fmt::Display for CompressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} params compressed, moment state {} → {} elems ({:.1}% saved)",
            self.params_compressed,
            self.params_initialized,
            self.moment_elems_full,
            self.moment_elems_stored,
            self.memory_saving() * 100.0
        )
    }
}
