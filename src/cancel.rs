//! Cooperative cancellation, checked at tick and generation boundaries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    kill_file: Option<PathBuf>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat the presence of `path` on disk as a stop request, so an
    /// operator can halt a long run with `touch`.
    pub fn with_kill_file(path: &str) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            kill_file: if path.is_empty() { None } else { Some(PathBuf::from(path)) },
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.kill_file.as_ref().map(|p| p.exists()).unwrap_or(false)
    }
}
