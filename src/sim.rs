//! Agent-based market simulation: one company, a crowd of partially-informed
//! investors, and a correctness score per recorded tick. Each run owns its
//! agents; nothing survives a run except the outcome sequence.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dataset::{Dataset, DayPosts, Post, PricePoint};
use crate::encoder::{encode, sign};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::policy::{gaussian, Policy};
use crate::trainer::TrialRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestorColor {
    Neutral,
    Buying,
    Selling,
}

#[derive(Debug, Clone)]
pub struct Investor {
    pub x: f64,
    pub y: f64,
    /// Uninvested capital units.
    pub cookies: f64,
    /// Capital committed to the company.
    pub cookies_invested: f64,
    pub visibility: f64,
    /// Recent posts observed by this investor, capped at history_steps.
    pub posts: Vec<Post>,
    /// Display color derived from the latest trade sign.
    pub color: InvestorColor,
}

#[derive(Debug, Clone)]
pub struct Company {
    /// Recent (value, change) observations, capped at history_steps.
    pub values: Vec<PricePoint>,
}

/// Per-investor, per-tick read-only snapshot. Recomputed every tick, never
/// persisted.
pub struct Vision<'a> {
    pub company: &'a Company,
    pub investors: Vec<&'a Investor>,
}

/// Distance normalized by the observed investor's visibility must fall below
/// the threshold; zero visibility is never seen.
fn visible(target: &Investor, other: &Investor, threshold: f64) -> bool {
    if other.visibility > 0.0 {
        let dx = target.x - other.x;
        let dy = target.y - other.y;
        (dx * dx + dy * dy).sqrt() / other.visibility < threshold
    } else {
        false
    }
}

/// Keep the last `n` entries.
fn cap<T>(history: &mut Vec<T>, n: usize) {
    if history.len() > n {
        let excess = history.len() - n;
        history.drain(..excess);
    }
}

pub struct Simulator<'a> {
    code: String,
    prices: &'a [PricePoint],
    post_days: &'a [DayPosts],
    policy: &'a mut dyn Policy,
    rng: &'a mut StdRng,
    stop: CancelToken,
    cfg: Config,
    company: Company,
    investors: Vec<Investor>,
    current_step: usize,
    results: Vec<f64>,
}

impl<'a> Simulator<'a> {
    /// Builds the agent population and synchronously fast-forwards the warmup
    /// ticks so history buffers are pre-seeded before the observable run.
    pub fn new(
        code: &str,
        dataset: &'a Dataset,
        policy: &'a mut dyn Policy,
        rng: &'a mut StdRng,
        stop: CancelToken,
        cfg: &Config,
    ) -> Result<Self> {
        let prices = dataset.series(code);
        let post_days = dataset.post_days(code);
        let first_value = prices.first().map(|p| p.value).unwrap_or(0.0);
        let company = Company {
            values: vec![PricePoint { value: first_value, change: Some(0.0) }],
        };

        let center_x = cfg.world_width / 2.0;
        let center_y = cfg.world_height / 2.0;
        let mean_visibility = (cfg.world_width + cfg.world_height) / 2.0 / 4.0;
        let mut investors = Vec::with_capacity(cfg.investor_count);
        for _ in 0..cfg.investor_count {
            investors.push(Investor {
                x: center_x + gaussian(rng) * (cfg.world_width / 8.0),
                y: center_y + gaussian(rng) * (cfg.world_height / 8.0),
                cookies: (100.0 + gaussian(rng) * 10.0).max(0.0),
                cookies_invested: 0.0,
                visibility: (mean_visibility + gaussian(rng) * (cfg.world_width / 4.0)).max(0.0),
                posts: Vec::new(),
                color: InvestorColor::Neutral,
            });
        }

        let mut sim = Self {
            code: code.to_string(),
            prices,
            post_days,
            policy,
            rng,
            stop,
            cfg: cfg.clone(),
            company,
            investors,
            current_step: 0,
            results: Vec::new(),
        };
        for _ in 0..sim.cfg.warmup_steps {
            sim.advance_one_step()?;
        }
        Ok(sim)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn investors(&self) -> &[Investor] {
        &self.investors
    }

    pub fn company(&self) -> &Company {
        &self.company
    }

    /// Recorded per-tick outcomes, one per tick past warmup.
    pub fn results(&self) -> &[f64] {
        &self.results
    }

    /// Mean outcome over the recorded ticks (0 when nothing was recorded).
    pub fn score(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.results.iter().sum::<f64>() / self.results.len() as f64
        }
    }

    pub fn total_invested(&self) -> f64 {
        self.investors.iter().map(|i| i.cookies_invested).sum()
    }

    fn vision_for(&self, target_idx: usize) -> Vision<'_> {
        let target = &self.investors[target_idx];
        let investors = self
            .investors
            .iter()
            .enumerate()
            .filter(|(j, other)| *j != target_idx && visible(target, other, self.cfg.vision_radius))
            .map(|(_, other)| other)
            .collect();
        Vision { company: &self.company, investors }
    }

    /// Advance exactly one tick. Order matters: inject the day's data, let
    /// every investor trade, then score the aggregate move against the
    /// actual price change (recording ticks only).
    pub fn advance_one_step(&mut self) -> Result<()> {
        let record = self.current_step >= self.cfg.warmup_steps;
        let invested_before = self.total_invested();

        // Each of the day's posts lands on one uniformly-random investor.
        if let Some(day) = self.post_days.get(self.current_step) {
            for post in &day.posts {
                let idx = self.rng.gen_range(0..self.investors.len());
                let investor = &mut self.investors[idx];
                investor.posts.push(post.clone());
                cap(&mut investor.posts, self.cfg.history_steps);
            }
        }
        // Days past the end of the series trade against a zero placeholder.
        let current = self
            .prices
            .get(self.current_step)
            .copied()
            .unwrap_or(PricePoint { value: 0.0, change: Some(0.0) });
        self.company.values.push(current);
        cap(&mut self.company.values, self.cfg.history_steps);

        // Decision phase: observe first, then apply all capital deltas.
        let mut deltas = vec![0.0; self.investors.len()];
        for (i, delta) in deltas.iter_mut().enumerate() {
            let features = {
                let vision = self.vision_for(i);
                encode(
                    &self.investors[i],
                    &self.company,
                    &vision,
                    self.cfg.history_steps,
                    self.cfg.max_count,
                )
            };
            let out = self.policy.decide(&features)?;
            if !out.is_finite() {
                bail!("policy returned a non-finite decision at step {}", self.current_step);
            }
            // Remap [0,1] to a [-1,1] trade signal; positive buys.
            *delta = (out * 2.0 - 1.0) * current.value;
        }
        for (investor, delta) in self.investors.iter_mut().zip(&deltas) {
            if *delta <= investor.cookies {
                investor.cookies -= delta;
                investor.cookies_invested += delta;
            }
            investor.color = match sign(*delta) as i8 {
                0 => InvestorColor::Neutral,
                1 => InvestorColor::Buying,
                _ => InvestorColor::Selling,
            };
        }

        let post_count: usize = self.investors.iter().map(|i| i.posts.len()).sum();
        log(
            Level::Trace,
            Domain::Sim,
            "tick",
            obj(&[
                ("code", v_str(&self.code)),
                ("step", v_num(self.current_step as f64)),
                ("value", v_num(current.value)),
                ("posts", v_num(post_count as f64)),
            ]),
        );

        if record {
            let invested_after = self.total_invested();
            let actual = current.change.unwrap_or(0.0);
            let outcome = if sign(invested_after - invested_before) == sign(actual) {
                1.0
            } else {
                0.0
            };
            self.results.push(outcome);
        }

        self.restore();
        self.current_step += 1;
        Ok(())
    }

    // Extension point for resetting transient per-tick state.
    fn restore(&mut self) {}

    /// Drive recording ticks to completion, honoring the stop token at each
    /// tick boundary. Callers read `results()` / `score()` afterwards.
    pub fn run(&mut self) -> Result<()> {
        while self.current_step < self.cfg.steps {
            if self.stop.is_cancelled() {
                log(
                    Level::Debug,
                    Domain::Sim,
                    "run_cancelled",
                    obj(&[("code", v_str(&self.code)), ("step", v_num(self.current_step as f64))]),
                );
                return Ok(());
            }
            self.advance_one_step()?;
        }
        Ok(())
    }
}

/// Production trial runner: every trial simulates a fresh agent population
/// against a uniformly-random tradable instrument.
pub struct SimTrialRunner {
    dataset: Dataset,
    codes: Vec<String>,
    rng: StdRng,
    stop: CancelToken,
    cfg: Config,
}

impl SimTrialRunner {
    pub fn new(dataset: Dataset, rng: StdRng, stop: CancelToken, cfg: Config) -> Result<Self> {
        let codes = dataset.codes();
        if codes.is_empty() {
            bail!("dataset has no tradable instruments (no code has a non-empty post day)");
        }
        Ok(Self { dataset, codes, rng, stop, cfg })
    }
}

impl TrialRunner for SimTrialRunner {
    fn run_trial(&mut self, policy: &mut dyn Policy) -> Result<f64> {
        let code = self.codes[self.rng.gen_range(0..self.codes.len())].clone();
        log(Level::Debug, Domain::Sim, "trial_start", obj(&[("code", v_str(&code))]));
        let mut sim =
            Simulator::new(&code, &self.dataset, policy, &mut self.rng, self.stop.clone(), &self.cfg)?;
        sim.run()?;
        Ok(sim.score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::dataset::{Dataset, DayPosts, Post, PostHistory, PricePoint, PriceSeries};
    use crate::policy::ConstantPolicy;
    use rand::SeedableRng;

    /// Six price days; changes 0 on even days, alternating sign otherwise.
    fn fixture_dataset(changes: &[f64]) -> Dataset {
        let mut ds = Dataset::default();
        let values: Vec<PricePoint> = changes
            .iter()
            .enumerate()
            .map(|(i, &c)| PricePoint { value: 10.0 + i as f64, change: Some(c) })
            .collect();
        ds.prices.insert("ABC".to_string(), PriceSeries { values });
        let day: Vec<DayPosts> = (0..changes.len())
            .map(|i| DayPosts {
                posts: if i % 2 == 0 {
                    vec![Post { favorite_count: 5.0, retweet_count: 2.0, text_sentiment: 0.4 }]
                } else {
                    vec![]
                },
            })
            .collect();
        ds.posts.insert("ABC".to_string(), PostHistory { day });
        ds
    }

    #[test]
    fn test_neutral_policy_matches_flat_days_only() {
        // Neutral signal means zero capital delta every tick, so the outcome
        // is 1 exactly when the day's actual change is 0.
        let changes = [0.5, -0.5, 0.0, 0.4, 0.0, -0.1];
        let ds = fixture_dataset(&changes);
        let cfg = test_config();
        let mut policy = ConstantPolicy(0.5);
        let mut rng = StdRng::seed_from_u64(7);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        assert_eq!(sim.results(), &[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(sim.score(), 0.5);
    }

    #[test]
    fn test_recorded_tick_count() {
        let ds = fixture_dataset(&[0.0; 6]);
        let cfg = test_config();
        let mut policy = ConstantPolicy(0.5);
        let mut rng = StdRng::seed_from_u64(1);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        assert_eq!(sim.current_step(), cfg.warmup_steps);
        assert!(sim.results().is_empty());
        sim.run().unwrap();
        assert_eq!(sim.results().len(), cfg.steps - cfg.warmup_steps);
    }

    #[test]
    fn test_cookies_never_negative() {
        // An always-buy policy pushes the full company value every tick;
        // trades exceeding uninvested capital are silently rejected.
        let ds = fixture_dataset(&[0.1, 0.2, -0.3, 0.4, 0.5, -0.6]);
        let mut cfg = test_config();
        cfg.investor_count = 10;
        let mut policy = ConstantPolicy(1.0);
        let mut rng = StdRng::seed_from_u64(2);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        for investor in sim.investors() {
            assert!(investor.cookies >= 0.0, "cookies went negative: {}", investor.cookies);
        }
    }

    #[test]
    fn test_sell_signal_releases_capital() {
        let ds = fixture_dataset(&[0.1; 6]);
        let cfg = test_config();
        let mut policy = ConstantPolicy(0.0); // full sell signal
        let mut rng = StdRng::seed_from_u64(3);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        // Selling always passes the capital check, so invested goes negative
        // and every investor shows a selling color.
        assert!(sim.total_invested() < 0.0);
        for investor in sim.investors() {
            assert_eq!(investor.color, InvestorColor::Selling);
        }
    }

    #[test]
    fn test_company_history_capped() {
        let ds = fixture_dataset(&[0.0; 6]);
        let mut cfg = test_config();
        cfg.history_steps = 3;
        let mut policy = ConstantPolicy(0.5);
        let mut rng = StdRng::seed_from_u64(4);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        assert!(sim.company().values.len() <= 3);
    }

    #[test]
    fn test_post_history_capped() {
        let mut ds = Dataset::default();
        ds.prices.insert(
            "ABC".to_string(),
            PriceSeries {
                values: (0..6).map(|i| PricePoint { value: 1.0 + i as f64, change: Some(0.0) }).collect(),
            },
        );
        // Flood one investor population with many posts per day.
        let day: Vec<DayPosts> = (0..6)
            .map(|_| DayPosts {
                posts: (0..40)
                    .map(|_| Post { favorite_count: 1.0, retweet_count: 1.0, text_sentiment: 0.1 })
                    .collect(),
            })
            .collect();
        ds.posts.insert("ABC".to_string(), PostHistory { day });
        let mut cfg = test_config();
        cfg.investor_count = 2;
        let mut policy = ConstantPolicy(0.5);
        let mut rng = StdRng::seed_from_u64(5);
        let mut sim =
            Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        for investor in sim.investors() {
            assert!(investor.posts.len() <= cfg.history_steps);
        }
    }

    #[test]
    fn test_missing_series_runs_on_placeholders() {
        // No price data at all: every day trades against value 0, change 0.
        let mut ds = Dataset::default();
        ds.posts.insert(
            "GHO".to_string(),
            PostHistory {
                day: vec![DayPosts {
                    posts: vec![Post { favorite_count: 1.0, retweet_count: 0.0, text_sentiment: 0.2 }],
                }],
            },
        );
        let cfg = test_config();
        let mut policy = ConstantPolicy(0.9);
        let mut rng = StdRng::seed_from_u64(6);
        let mut sim =
            Simulator::new("GHO", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
        sim.run().unwrap();
        // Zero value means zero delta; zero change means every tick matches.
        assert_eq!(sim.results(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_cancellation_stops_mid_run() {
        let ds = fixture_dataset(&[0.0; 6]);
        let cfg = test_config();
        let mut policy = ConstantPolicy(0.5);
        let mut rng = StdRng::seed_from_u64(8);
        let stop = CancelToken::new();
        let mut sim = Simulator::new("ABC", &ds, &mut policy, &mut rng, stop.clone(), &cfg).unwrap();
        stop.cancel();
        sim.run().unwrap();
        // Cancelled before the first recording tick: nothing recorded.
        assert!(sim.results().is_empty());
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let ds = fixture_dataset(&[0.1, -0.2, 0.0, 0.3, 0.0, -0.4]);
        let cfg = test_config();
        let run = |seed: u64| {
            let mut policy = ConstantPolicy(0.8);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut sim =
                Simulator::new("ABC", &ds, &mut policy, &mut rng, CancelToken::new(), &cfg).unwrap();
            sim.run().unwrap();
            (sim.results().to_vec(), sim.total_invested())
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_trial_runner_requires_tradable_codes() {
        let ds = Dataset::default();
        let cfg = test_config();
        let err = SimTrialRunner::new(ds, StdRng::seed_from_u64(0), CancelToken::new(), cfg)
            .err()
            .unwrap();
        assert!(err.to_string().contains("no tradable instruments"));
    }

    #[test]
    fn test_trial_runner_scores_in_unit_interval() {
        let ds = fixture_dataset(&[0.1, -0.2, 0.0, 0.3, 0.0, -0.4]);
        let cfg = test_config();
        let mut runner =
            SimTrialRunner::new(ds, StdRng::seed_from_u64(11), CancelToken::new(), cfg).unwrap();
        let mut policy = ConstantPolicy(0.5);
        let score = runner.run_trial(&mut policy).unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}
