//! Cooperative stop signal
//!
//! Set from outside the acquisition thread (Ctrl-C, a `TERM` line on stdin)
//! or by creating a sentinel file, and polled once per loop iteration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop request
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    sentinel: Option<PathBuf>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also stop once `path` exists
    pub fn with_sentinel(path: impl Into<PathBuf>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sentinel: Some(path.into()),
        }
    }

    pub fn sentinel(&self) -> Option<&Path> {
        self.sentinel.as_deref()
    }

    /// Request a stop. Every clone observes it.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_set(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match &self.sentinel {
            Some(path) if path.exists() => {
                tracing::info!("Stop sentinel {:?} found", path);
                self.flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_trigger_seen_by_clones() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_set());
        signal.trigger();
        assert!(observer.is_set());
    }

    #[test]
    fn test_sentinel_file() {
        let dir = tempdir().unwrap();
        let kill = dir.path().join("KILL");
        let signal = StopSignal::with_sentinel(&kill);
        assert!(!signal.is_set());

        std::fs::write(&kill, b"").unwrap();
        assert!(signal.is_set());

        // Latched even if the file goes away
        std::fs::remove_file(&kill).unwrap();
        assert!(signal.is_set());
    }
}
