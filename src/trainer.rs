//! Evolutionary orchestrator: owns the population, scores candidates through
//! an injected trial runner, and breeds the next generation with elitism.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::Rng;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::policy::{MlpPolicy, Policy};

/// One independent fitness trial for a candidate. The production runner
/// lives in `sim`; tests inject stubs.
pub trait TrialRunner {
    fn run_trial(&mut self, policy: &mut dyn Policy) -> Result<f64>;
}

/// Fire-and-forget progress notification. Fields mirror what the
/// presentation layer consumes; absent fields mean "unchanged".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Report {
    pub current_fitness: Option<f64>,
    pub fitness: Option<f64>,
    pub generation: Option<u64>,
}

pub trait ReportSink {
    fn report(&mut self, report: Report);
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn report(&mut self, report: Report) {
        (**self).report(report)
    }
}

/// Default sink: structured log lines, including the generation headline.
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&mut self, r: Report) {
        if let Some(fit) = r.current_fitness {
            log(
                Level::Debug,
                Domain::Evolve,
                "candidate_scored",
                obj(&[("current_fitness", v_num(fit))]),
            );
        }
        if let (Some(fitness), Some(generation)) = (r.fitness, r.generation) {
            log(
                Level::Info,
                Domain::Evolve,
                "generation",
                obj(&[
                    (
                        "msg",
                        v_str(&format!(
                            "Generation {}: {:.2}% accurate",
                            generation,
                            fitness * 100.0
                        )),
                    ),
                    ("generation", v_num(generation as f64)),
                    ("fitness", v_num(fitness)),
                ]),
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fittest {
    pub policy: MlpPolicy,
    pub score: f64,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

pub struct Trainer<R: TrialRunner, S: ReportSink> {
    cfg: Config,
    runner: R,
    sink: S,
    rng: StdRng,
    stop: CancelToken,
    population: Vec<MlpPolicy>,
    scores: Vec<f64>,
    generation: u64,
    last_mean_fitness: f64,
    fittest: Option<Fittest>,
}

impl<R: TrialRunner, S: ReportSink> Trainer<R, S> {
    /// Fails fast on configuration errors; a degenerate generation is never
    /// silently produced.
    pub fn new(cfg: Config, runner: R, sink: S, mut rng: StdRng, stop: CancelToken) -> Result<Self> {
        cfg.validate()?;
        let population = (0..cfg.population_size)
            .map(|_| MlpPolicy::random(cfg.input_len(), cfg.hidden_neurons, &mut rng))
            .collect();
        let scores = vec![0.0; cfg.population_size];
        Ok(Self {
            cfg,
            runner,
            sink,
            rng,
            stop,
            population,
            scores,
            generation: 0,
            last_mean_fitness: 0.0,
            fittest: None,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn population(&self) -> &[MlpPolicy] {
        &self.population
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Headline fitness of the most recently advanced generation.
    pub fn last_mean_fitness(&self) -> f64 {
        self.last_mean_fitness
    }

    pub fn fittest(&self) -> Option<&Fittest> {
        self.fittest.as_ref()
    }

    /// Score every candidate over independent trials; a trial whose runner
    /// fails scores 0 and never blocks the rest of the population.
    pub fn evaluate_generation(&mut self) {
        for idx in 0..self.population.len() {
            if self.stop.is_cancelled() {
                return;
            }
            let mut trial_scores = Vec::with_capacity(self.cfg.trials_per_candidate);
            for _ in 0..self.cfg.trials_per_candidate {
                let score = match self.runner.run_trial(&mut self.population[idx]) {
                    Ok(score) => score,
                    Err(err) => {
                        log(
                            Level::Warn,
                            Domain::Evolve,
                            "trial_failed",
                            obj(&[
                                ("candidate", v_num(idx as f64)),
                                ("error", v_str(&format!("{:#}", err))),
                            ]),
                        );
                        0.0
                    }
                };
                trial_scores.push(score);
            }
            let fitness = mean(&trial_scores);
            self.scores[idx] = fitness;
            let best_so_far = self.fittest.as_ref().map(|f| f.score).unwrap_or(0.0);
            if fitness > best_so_far {
                self.fittest = Some(Fittest { policy: self.population[idx].clone(), score: fitness });
            }
            self.sink.report(Report { current_fitness: Some(fitness), ..Default::default() });
        }
    }

    /// Tournament pick over the ranked population (index 0 is best).
    fn tournament_pick(&mut self) -> usize {
        let n = self.population.len();
        let mut best = self.rng.gen_range(0..n);
        for _ in 1..self.cfg.tournament_size {
            let challenger = self.rng.gen_range(0..n);
            if challenger < best {
                best = challenger;
            }
        }
        best
    }

    /// Retain the elites unchanged, breed the remainder, and replace the
    /// population atomically. The generation index advances first so the
    /// pre-advance fitness is reported against the post-advance index.
    pub fn advance_generation(&mut self) {
        self.last_mean_fitness = mean(&self.scores);
        self.generation += 1;
        self.sink.report(Report {
            fitness: Some(self.last_mean_fitness),
            generation: Some(self.generation),
            ..Default::default()
        });

        let mut order: Vec<usize> = (0..self.population.len()).collect();
        order.sort_by(|&a, &b| {
            self.scores[b].partial_cmp(&self.scores[a]).unwrap_or(std::cmp::Ordering::Equal)
        });
        let ranked: Vec<MlpPolicy> =
            order.iter().map(|&i| self.population[i].clone()).collect();

        let elites = self.cfg.elitism_count();
        let mut next = Vec::with_capacity(self.population.len());
        next.extend(ranked[..elites].iter().cloned());
        while next.len() < self.population.len() {
            let a = self.tournament_pick();
            let b = self.tournament_pick();
            let mut child = ranked[a]
                .crossover(&ranked[b], &mut self.rng)
                .unwrap_or_else(|| ranked[a].clone());
            // Offspring only: elites must survive the advance unchanged.
            child.mutate(&mut self.rng, self.cfg.mutation_rate, self.cfg.mutation_scale);
            next.push(child);
        }
        self.population = next;
        self.scores = vec![0.0; self.population.len()];
    }

    /// Evaluate-then-advance for the configured number of generations,
    /// honoring cancellation at every generation boundary. A partially
    /// evaluated generation is discarded, never advanced.
    pub fn train(&mut self) {
        for _ in 0..self.cfg.generations {
            if self.stop.is_cancelled() {
                break;
            }
            self.evaluate_generation();
            if self.stop.is_cancelled() {
                break;
            }
            self.advance_generation();
        }
    }

    /// Export the fittest genome; available once the first generation has
    /// completed.
    pub fn export_fittest(&self, path: &Path) -> Result<()> {
        anyhow::ensure!(
            self.generation >= 1,
            "fittest export is available after the first generation completes"
        );
        let fittest = self
            .fittest
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no candidate has scored above zero yet"))?;
        fittest.policy.save(path)?;
        log(
            Level::Info,
            Domain::Policy,
            "fittest_exported",
            obj(&[("path", v_str(&path.display().to_string())), ("score", v_num(fittest.score))]),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use rand::SeedableRng;

    /// Scores a candidate by its own deterministic decision on a zero
    /// observation; distinct genomes get distinct fitness.
    struct ProbeRunner {
        inputs: usize,
    }

    impl TrialRunner for ProbeRunner {
        fn run_trial(&mut self, policy: &mut dyn Policy) -> Result<f64> {
            policy.decide(&vec![0.0; self.inputs])
        }
    }

    struct FailingRunner;

    impl TrialRunner for FailingRunner {
        fn run_trial(&mut self, _policy: &mut dyn Policy) -> Result<f64> {
            anyhow::bail!("candidate exploded")
        }
    }

    #[derive(Default)]
    struct CollectSink(Vec<Report>);

    impl ReportSink for CollectSink {
        fn report(&mut self, report: Report) {
            self.0.push(report);
        }
    }

    fn probe_trainer(
        cfg: Config,
        sink: &mut CollectSink,
    ) -> Trainer<ProbeRunner, &mut CollectSink> {
        let inputs = cfg.input_len();
        Trainer::new(
            cfg,
            ProbeRunner { inputs },
            sink,
            StdRng::seed_from_u64(17),
            CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_rejects_bad_config() {
        let mut cfg = test_config();
        cfg.population_size = 0;
        let result = Trainer::new(
            cfg,
            FailingRunner,
            LogSink,
            StdRng::seed_from_u64(0),
            CancelToken::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_population_size_invariant() {
        let cfg = test_config();
        let mut sink = CollectSink::default();
        let mut trainer = probe_trainer(cfg.clone(), &mut sink);
        assert_eq!(trainer.population().len(), cfg.population_size);
        for _ in 0..3 {
            trainer.evaluate_generation();
            trainer.advance_generation();
            assert_eq!(trainer.population().len(), cfg.population_size);
        }
    }

    #[test]
    fn test_elites_survive_advance_unchanged() {
        let cfg = test_config(); // population 4, elitism 0.5 -> 2 elites
        let mut sink = CollectSink::default();
        let mut trainer = probe_trainer(cfg.clone(), &mut sink);
        trainer.evaluate_generation();

        let mut ranked: Vec<(f64, MlpPolicy)> = trainer
            .scores()
            .iter()
            .cloned()
            .zip(trainer.population().iter().cloned())
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        trainer.advance_generation();
        assert_eq!(cfg.elitism_count(), 2);
        assert_eq!(trainer.population()[0], ranked[0].1);
        assert_eq!(trainer.population()[1], ranked[1].1);
    }

    #[test]
    fn test_train_reports_each_generation_once() {
        let mut cfg = test_config();
        cfg.generations = 3;
        let mut sink = CollectSink::default();
        let mut trainer = probe_trainer(cfg.clone(), &mut sink);
        trainer.train();
        assert_eq!(trainer.generation(), 3);

        let generations: Vec<u64> = sink.0.iter().filter_map(|r| r.generation).collect();
        assert_eq!(generations, vec![1, 2, 3]);
        let candidate_reports = sink.0.iter().filter(|r| r.current_fitness.is_some()).count();
        assert_eq!(candidate_reports, cfg.population_size * 3);
    }

    #[test]
    fn test_fittest_tracks_best_candidate() {
        let cfg = test_config();
        let mut sink = CollectSink::default();
        let mut trainer = probe_trainer(cfg, &mut sink);
        trainer.evaluate_generation();
        let best = trainer.scores().iter().cloned().fold(f64::MIN, f64::max);
        let fittest = trainer.fittest().expect("probe scores are positive");
        assert_eq!(fittest.score, best);
    }

    #[test]
    fn test_failing_candidate_scores_zero_and_does_not_block() {
        let cfg = test_config();
        let mut trainer = Trainer::new(
            cfg.clone(),
            FailingRunner,
            LogSink,
            StdRng::seed_from_u64(3),
            CancelToken::new(),
        )
        .unwrap();
        trainer.evaluate_generation();
        assert!(trainer.scores().iter().all(|&s| s == 0.0));
        assert!(trainer.fittest().is_none());
        trainer.advance_generation();
        assert_eq!(trainer.population().len(), cfg.population_size);
    }

    #[test]
    fn test_cancellation_skips_remaining_generations() {
        let cfg = test_config();
        let stop = CancelToken::new();
        let mut sink = CollectSink::default();
        let inputs = cfg.input_len();
        let mut trainer = Trainer::new(
            cfg,
            ProbeRunner { inputs },
            &mut sink,
            StdRng::seed_from_u64(5),
            stop.clone(),
        )
        .unwrap();
        stop.cancel();
        trainer.train();
        assert_eq!(trainer.generation(), 0);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_export_gated_on_first_generation() {
        let cfg = test_config();
        let mut sink = CollectSink::default();
        let mut trainer = probe_trainer(cfg, &mut sink);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fittest.json");
        assert!(trainer.export_fittest(&path).is_err());

        trainer.evaluate_generation();
        trainer.advance_generation();
        trainer.export_fittest(&path).unwrap();
        assert!(MlpPolicy::load(&path).is_ok());
    }
}
