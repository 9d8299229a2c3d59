//! Score an exported policy over fresh simulation trials.
//!
//! Usage: evaluate [policy.json] (defaults to FITTEST_PATH)

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

use evotrader::cancel::CancelToken;
use evotrader::config::Config;
use evotrader::dataset::Dataset;
use evotrader::policy::MlpPolicy;
use evotrader::sim::SimTrialRunner;
use evotrader::trainer::TrialRunner;

fn main() -> Result<()> {
    let cfg = Config::from_env();
    let path = std::env::args().nth(1).unwrap_or_else(|| cfg.fittest_path.clone());
    let mut policy = MlpPolicy::load(Path::new(&path))?;
    if policy.inputs() != cfg.input_len() {
        anyhow::bail!(
            "policy expects {} inputs but HISTORY_STEPS implies {}",
            policy.inputs(),
            cfg.input_len()
        );
    }

    let ds = Dataset::load(&cfg.dataset_path)?;
    let mut runner =
        SimTrialRunner::new(ds, StdRng::seed_from_u64(cfg.seed), CancelToken::new(), cfg.clone())?;

    let mut scores = Vec::with_capacity(cfg.trials_per_candidate);
    for _ in 0..cfg.trials_per_candidate {
        scores.push(runner.run_trial(&mut policy)?);
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let min = scores.iter().cloned().fold(f64::MAX, f64::min);
    let max = scores.iter().cloned().fold(f64::MIN, f64::max);
    println!(
        "policy={} trials={} accuracy={:.4} min={:.4} max={:.4}",
        path,
        scores.len(),
        mean,
        min,
        max
    );
    Ok(())
}
