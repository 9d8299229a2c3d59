use anyhow::Result;
use rusqlite::{params, Connection};

pub struct TrainingStore {
    conn: Connection,
}

impl TrainingStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS generations (
                ts INTEGER NOT NULL,
                generation INTEGER NOT NULL,
                mean_fitness REAL NOT NULL,
                best_fitness REAL NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn persist_generation(
        &mut self,
        ts: u64,
        generation: u64,
        mean_fitness: f64,
        best_fitness: f64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO generations (ts, generation, mean_fitness, best_fitness)
             VALUES (?1, ?2, ?3, ?4)",
            params![ts as i64, generation as i64, mean_fitness, best_fitness],
        )?;
        Ok(())
    }

    pub fn generation_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn.query_row("SELECT COUNT(*) FROM generations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.sqlite");
        let mut store = TrainingStore::new(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        store.persist_generation(1000, 1, 0.42, 0.61).unwrap();
        store.persist_generation(1060, 2, 0.48, 0.66).unwrap();
        assert_eq!(store.generation_count().unwrap(), 2);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.sqlite");
        let mut store = TrainingStore::new(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        store.init().unwrap();
        assert_eq!(store.generation_count().unwrap(), 0);
    }
}
