//! Read-only historical dataset: per-instrument daily price series and
//! per-day social post batches. The core never mutates a loaded dataset.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// One daily price observation. `change` stays optional so the encoder can
/// distinguish an absent change from a flat day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct PricePoint {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub change: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub favorite_count: f64,
    #[serde(default)]
    pub retweet_count: f64,
    #[serde(default)]
    pub text_sentiment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DayPosts {
    #[serde(default)]
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostHistory {
    #[serde(default)]
    pub day: Vec<DayPosts>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PriceSeries {
    #[serde(default)]
    pub values: Vec<PricePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Dataset {
    #[serde(default)]
    pub prices: HashMap<String, PriceSeries>,
    #[serde(default)]
    pub posts: HashMap<String, PostHistory>,
}

impl Dataset {
    pub fn load(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open dataset {}", path))?;
        let dataset: Dataset = serde_json::from_reader(file)
            .with_context(|| format!("cannot decode dataset {}", path))?;
        Ok(dataset)
    }

    /// Instrument codes with at least one non-empty post day, sorted so trial
    /// selection is reproducible under a fixed seed.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .posts
            .iter()
            .filter(|(_, history)| history.day.iter().any(|d| !d.posts.is_empty()))
            .map(|(code, _)| code.clone())
            .collect();
        codes.sort();
        codes
    }

    /// Price series for a code; missing series are tolerated as empty.
    pub fn series(&self, code: &str) -> &[PricePoint] {
        self.prices.get(code).map(|s| s.values.as_slice()).unwrap_or(&[])
    }

    /// Daily post batches for a code; missing feeds are tolerated as empty.
    pub fn post_days(&self, code: &str) -> &[DayPosts] {
        self.posts.get(code).map(|p| p.day.as_slice()).unwrap_or(&[])
    }
}

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: String,
    pub hash_sha256: String,
    pub codes: usize,
    pub price_points: u64,
    pub post_days: u64,
    pub generated_at: String,
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn manifest(path: &str, dataset: &Dataset) -> Result<DatasetManifest> {
    let hash = file_sha256(Path::new(path))?;
    Ok(DatasetManifest {
        path: path.to_string(),
        hash_sha256: hash,
        codes: dataset.codes().len(),
        price_points: dataset.prices.values().map(|s| s.values.len() as u64).sum(),
        post_days: dataset.posts.values().map(|p| p.day.len() as u64).sum(),
        generated_at: crate::logging::ts_now(),
    })
}

/// Write `<dataset>.manifest.json` next to the dataset file.
pub fn write_manifest(dataset_path: &str, manifest: &DatasetManifest) -> Result<PathBuf> {
    let mut p = PathBuf::from(dataset_path);
    let fname = p
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string());
    p.set_file_name(format!("{}.manifest.json", fname));
    let body = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&p, body).with_context(|| format!("cannot write {}", p.display()))?;
    Ok(p)
}
