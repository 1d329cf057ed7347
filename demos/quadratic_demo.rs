//! Fit a matrix to a random target with compressed momentum.
//!
//! Run with: cargo run --example quadratic_demo

use candle_core::{DType, Device, Var};
use flora_optim_rs::{stable_randn, FloraAdam, FloraConfig, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let device = Device::Cpu;
    let weight = Var::zeros((128, 64), DType::F32, &device)?;
    let target = stable_randn(&[128, 64], 1234, &device, DType::F32)?;

    let config = FloraConfig::new(5e-2)
        .with_rank(Some(16))
        .with_kappa(100)
        .with_seed(42);
    let mut optimizer = FloraAdam::new(vec![weight.clone()], config)?;

    for step in 0..=500 {
        let loss = optimizer.step_with_closure(|| {
            (weight.as_tensor() - &target)?.sqr()?.sum_all()
        })?;
        if step % 50 == 0 {
            println!("step {step:4}: loss {:.4}", loss.to_scalar::<f32>()?);
        }
    }

    println!("{}", optimizer.compression_report());
    Ok(())
}
