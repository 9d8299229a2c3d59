//! Decision policies. The trainer and simulator only see the `Policy`
//! capability; `MlpPolicy` is the evolvable concrete variant.

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A decision function over an observation vector. Output contract: a
/// scalar in [0, 1]. Implementations may be stochastic.
pub trait Policy {
    fn decide(&mut self, features: &[f64]) -> Result<f64>;
}

/// Standard normal draw via Box-Muller; keeps the RNG injectable without an
/// extra distribution crate.
pub(crate) fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Single-hidden-layer perceptron genome: tanh hidden units, sigmoid output.
/// Weights are flat vectors so crossover and mutation are per-gene.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlpPolicy {
    inputs: usize,
    hidden: usize,
    /// hidden * (inputs + 1) weights, bias last per unit
    w_hidden: Vec<f64>,
    /// hidden + 1 weights, bias last
    w_output: Vec<f64>,
}

impl MlpPolicy {
    pub fn random<R: Rng>(inputs: usize, hidden: usize, rng: &mut R) -> Self {
        let w_hidden = (0..hidden * (inputs + 1)).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let w_output = (0..hidden + 1).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self { inputs, hidden, w_hidden, w_output }
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    /// Uniform per-gene crossover. `None` when the parents' topologies differ.
    pub fn crossover<R: Rng>(&self, other: &Self, rng: &mut R) -> Option<Self> {
        if self.inputs != other.inputs || self.hidden != other.hidden {
            return None;
        }
        let mut child = self.clone();
        for (gene, theirs) in child.w_hidden.iter_mut().zip(&other.w_hidden) {
            if rng.gen::<f64>() < 0.5 {
                *gene = *theirs;
            }
        }
        for (gene, theirs) in child.w_output.iter_mut().zip(&other.w_output) {
            if rng.gen::<f64>() < 0.5 {
                *gene = *theirs;
            }
        }
        Some(child)
    }

    /// Per-gene gaussian perturbation with probability `rate`.
    pub fn mutate<R: Rng>(&mut self, rng: &mut R, rate: f64, scale: f64) {
        let sigma = scale.max(1e-5);
        for gene in self.w_hidden.iter_mut().chain(self.w_output.iter_mut()) {
            if rng.gen::<f64>() < rate {
                *gene += gaussian(rng) * sigma;
            }
        }
    }

    fn logistic(value: f64) -> f64 {
        1.0 / (1.0 + (-value).exp())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string(self)?;
        std::fs::write(path, body).with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    /// Import a serialized genome. Rejects documents whose weight vectors do
    /// not match the declared topology; callers keep their population intact.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let policy: MlpPolicy = serde_json::from_str(&body)
            .with_context(|| format!("malformed policy document {}", path.display()))?;
        if policy.w_hidden.len() != policy.hidden * (policy.inputs + 1) {
            bail!(
                "policy {}: hidden layer expects {} weights, found {}",
                path.display(),
                policy.hidden * (policy.inputs + 1),
                policy.w_hidden.len()
            );
        }
        if policy.w_output.len() != policy.hidden + 1 {
            bail!(
                "policy {}: output layer expects {} weights, found {}",
                path.display(),
                policy.hidden + 1,
                policy.w_output.len()
            );
        }
        Ok(policy)
    }
}

impl Policy for MlpPolicy {
    fn decide(&mut self, features: &[f64]) -> Result<f64> {
        if features.len() != self.inputs {
            bail!("expected {} features, got {}", self.inputs, features.len());
        }
        let mut acc_out = self.w_output[self.hidden];
        for h in 0..self.hidden {
            let base = h * (self.inputs + 1);
            let mut acc = self.w_hidden[base + self.inputs];
            for (i, x) in features.iter().enumerate() {
                acc += self.w_hidden[base + i] * x;
            }
            acc_out += self.w_output[h] * acc.tanh();
        }
        let out = Self::logistic(acc_out);
        if !out.is_finite() {
            bail!("policy produced a non-finite decision");
        }
        Ok(out)
    }
}

/// Fixed-output policy, used as a deterministic fixture. 0.5 is the neutral
/// trade signal.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPolicy(pub f64);

impl Policy for ConstantPolicy {
    fn decide(&mut self, _features: &[f64]) -> Result<f64> {
        Ok(self.0)
    }
}
