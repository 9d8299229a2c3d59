use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::thread::sleep;
use std::time::Duration;

use evotrader::cancel::CancelToken;
use evotrader::config::Config;
use evotrader::dataset::{self, Dataset};
use evotrader::logging::{json_log, obj, ts_epoch, v_num, v_str};
use evotrader::sim::SimTrialRunner;
use evotrader::storage::TrainingStore;
use evotrader::trainer::{LogSink, Trainer};

fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;
    json_log(
        "system",
        obj(&[
            ("event", v_str("startup")),
            ("seed", v_num(cfg.seed as f64)),
            ("population", v_num(cfg.population_size as f64)),
            ("generations", v_num(cfg.generations as f64)),
            ("trials", v_num(cfg.trials_per_candidate as f64)),
        ]),
    );

    let ds = Dataset::load(&cfg.dataset_path)?;
    let manifest = dataset::manifest(&cfg.dataset_path, &ds)?;
    dataset::write_manifest(&cfg.dataset_path, &manifest)?;
    json_log(
        "dataset",
        obj(&[
            ("path", v_str(&cfg.dataset_path)),
            ("hash", v_str(&manifest.hash_sha256)),
            ("codes", v_num(manifest.codes as f64)),
            ("price_points", v_num(manifest.price_points as f64)),
        ]),
    );

    let mut store = TrainingStore::new(&cfg.sqlite_path)?;
    store.init()?;

    let stop = CancelToken::with_kill_file(&cfg.kill_file);
    // Separate streams for trial scheduling and genome evolution keep a run
    // reproducible from its seed alone.
    let sim_rng = StdRng::seed_from_u64(cfg.seed);
    let evolve_rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(1));
    let runner = SimTrialRunner::new(ds, sim_rng, stop.clone(), cfg.clone())?;
    let mut trainer = Trainer::new(cfg.clone(), runner, LogSink, evolve_rng, stop.clone())?;

    for _ in 0..cfg.generations {
        if stop.is_cancelled() {
            json_log("system", obj(&[("event", v_str("cancelled"))]));
            break;
        }
        trainer.evaluate_generation();
        if stop.is_cancelled() {
            json_log("system", obj(&[("event", v_str("cancelled"))]));
            break;
        }
        trainer.advance_generation();
        store.persist_generation(
            ts_epoch(),
            trainer.generation(),
            trainer.last_mean_fitness(),
            trainer.fittest().map(|f| f.score).unwrap_or(0.0),
        )?;
        // Slow-motion pacing is observability only; the engine never sleeps.
        if cfg.speed_ms > 0 {
            sleep(Duration::from_millis(cfg.speed_ms));
        }
    }

    if trainer.generation() >= 1 {
        match trainer.export_fittest(cfg.fittest_path.as_ref()) {
            Ok(()) => {}
            Err(err) => json_log(
                "policy",
                obj(&[("event", v_str("export_skipped")), ("reason", v_str(&format!("{:#}", err)))]),
            ),
        }
    }

    json_log(
        "system",
        obj(&[
            ("event", v_str("shutdown")),
            ("generation", v_num(trainer.generation() as f64)),
            ("fitness", v_num(trainer.last_mean_fitness())),
            ("best", v_num(trainer.fittest().map(|f| f.score).unwrap_or(0.0))),
        ]),
    );
    Ok(())
}
