use anyhow::{bail, Result};

#[derive(Clone)]
pub struct Config {
    pub population_size: usize,
    pub elitism_fraction: f64,
    pub trials_per_candidate: usize,
    pub generations: usize,
    pub steps: usize,
    pub warmup_steps: usize,
    pub investor_count: usize,
    pub vision_radius: f64,
    pub history_steps: usize,
    pub max_count: f64,
    pub world_width: f64,
    pub world_height: f64,
    pub hidden_neurons: usize,
    pub mutation_rate: f64,
    pub mutation_scale: f64,
    pub tournament_size: usize,
    pub seed: u64,
    pub dataset_path: String,
    pub sqlite_path: String,
    pub fittest_path: String,
    pub kill_file: String,
    /// Fixed delay between generations in the driver loop (0 = full speed).
    pub speed_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            population_size: std::env::var("POPULATION").ok().and_then(|v| v.parse().ok()).unwrap_or(50),
            elitism_fraction: std::env::var("ELITISM_FRACTION").ok().and_then(|v| v.parse().ok()).unwrap_or(0.1),
            trials_per_candidate: std::env::var("TRIALS").ok().and_then(|v| v.parse().ok()).unwrap_or(11),
            generations: std::env::var("GENERATIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            steps: std::env::var("SIM_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(6),
            warmup_steps: std::env::var("WARMUP_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(2),
            investor_count: std::env::var("INVESTOR_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            vision_radius: std::env::var("VISION_RADIUS").ok().and_then(|v| v.parse().ok()).unwrap_or(0.2),
            history_steps: std::env::var("HISTORY_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            max_count: std::env::var("MAX_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(1000.0),
            world_width: std::env::var("WORLD_W").ok().and_then(|v| v.parse().ok()).unwrap_or(800.0),
            world_height: std::env::var("WORLD_H").ok().and_then(|v| v.parse().ok()).unwrap_or(800.0),
            hidden_neurons: std::env::var("HIDDEN_NEURONS").ok().and_then(|v| v.parse().ok()).unwrap_or(8),
            mutation_rate: std::env::var("MUTATION_RATE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.3),
            mutation_scale: std::env::var("MUTATION_SCALE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.5),
            tournament_size: std::env::var("TOURNAMENT").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            seed: std::env::var("SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(42),
            dataset_path: std::env::var("DATASET_PATH").unwrap_or_else(|_| "./data/dataset.json".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./evotrader.sqlite".to_string()),
            fittest_path: std::env::var("FITTEST_PATH").unwrap_or_else(|_| "./fittest.json".to_string()),
            kill_file: std::env::var("KILL_FILE").unwrap_or_else(|_| "/tmp/STOP".to_string()),
            speed_ms: std::env::var("SPEED_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(0),
        }
    }

    /// Number of top candidates carried over unchanged each generation.
    pub fn elitism_count(&self) -> usize {
        (self.elitism_fraction * self.population_size as f64).round() as usize
    }

    /// Observation vector length: self capital (2) + company change history
    /// + 3 post metrics for up to 3 visible investors.
    pub fn input_len(&self) -> usize {
        2 + 4 * self.history_steps
    }

    /// Configuration errors are surfaced at construction and never retried.
    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            bail!("population_size must be positive");
        }
        if !(0.0..=1.0).contains(&self.elitism_fraction) {
            bail!("elitism_fraction must be in [0, 1], got {}", self.elitism_fraction);
        }
        if self.elitism_count() >= self.population_size {
            bail!(
                "elitism_count {} leaves no slots to breed in a population of {}",
                self.elitism_count(),
                self.population_size
            );
        }
        if self.trials_per_candidate == 0 {
            bail!("trials_per_candidate must be positive");
        }
        if self.warmup_steps >= self.steps {
            bail!("warmup_steps {} must be below steps {}", self.warmup_steps, self.steps);
        }
        if self.history_steps == 0 {
            bail!("history_steps must be positive");
        }
        if self.investor_count == 0 {
            bail!("investor_count must be positive");
        }
        if self.tournament_size == 0 {
            bail!("tournament_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        population_size: 4,
        elitism_fraction: 0.5,
        trials_per_candidate: 2,
        generations: 3,
        steps: 6,
        warmup_steps: 2,
        investor_count: 5,
        vision_radius: 0.2,
        history_steps: 10,
        max_count: 1000.0,
        world_width: 800.0,
        world_height: 800.0,
        hidden_neurons: 4,
        mutation_rate: 0.3,
        mutation_scale: 0.5,
        tournament_size: 3,
        seed: 42,
        dataset_path: String::new(),
        sqlite_path: String::new(),
        fittest_path: String::new(),
        kill_file: String::new(),
        speed_ms: 0,
    }
}
