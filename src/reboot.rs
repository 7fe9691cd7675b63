//! Deferred device restart
//!
//! Restarts (optionally preceded by a factory reset) must not happen on
//! the request-handling call stack. Requesting one records the intent
//! (action plus due time) in shared state; a dedicated executor task
//! performs it once due. The executor shares nothing mutable with the
//! loop beyond the intent cell and the immutable settings path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::RESTART_EXIT_CODE;
use crate::store::ConfigStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootKind {
    /// Plain restart; settings survive
    Restart,
    /// Wipe settings first, then restart onto defaults
    FactoryReset,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingReboot {
    pub kind: RebootKind,
    pub due: Instant,
}

#[derive(Clone)]
pub struct RebootScheduler {
    pending: Arc<Mutex<Option<PendingReboot>>>,
    settings_path: PathBuf,
}

impl RebootScheduler {
    pub fn new(settings_path: PathBuf) -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            settings_path,
        }
    }

    /// Record the intent. An already-pending reboot is not replaced.
    pub fn request(&self, kind: RebootKind, delay: Duration, now: Instant) {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return;
        }
        tracing::warn!("{:?} scheduled in {:?}", kind, delay);
        *pending = Some(PendingReboot {
            kind,
            due: now + delay,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn pending(&self) -> Option<PendingReboot> {
        *self.pending.lock()
    }

    /// The executor task: waits for a due intent and never returns.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let pending = match *self.pending.lock() {
                Some(p) if p.due <= Instant::now() => p,
                _ => continue,
            };
            if pending.kind == RebootKind::FactoryReset {
                tracing::warn!("Factory reset: wiping settings");
                ConfigStore::wipe(&self.settings_path);
            }
            tracing::warn!("Restarting device (exit code {})", RESTART_EXIT_CODE);
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_records_intent() {
        let scheduler = RebootScheduler::new(PathBuf::from("/tmp/x.toml"));
        assert!(!scheduler.is_pending());

        let now = Instant::now();
        scheduler.request(RebootKind::Restart, Duration::from_millis(600), now);
        let pending = scheduler.pending().unwrap();
        assert_eq!(pending.kind, RebootKind::Restart);
        assert_eq!(pending.due, now + Duration::from_millis(600));
    }

    #[test]
    fn test_first_request_wins() {
        let scheduler = RebootScheduler::new(PathBuf::from("/tmp/x.toml"));
        let now = Instant::now();
        scheduler.request(RebootKind::Restart, Duration::from_secs(1), now);
        scheduler.request(RebootKind::FactoryReset, Duration::ZERO, now);

        assert_eq!(scheduler.pending().unwrap().kind, RebootKind::Restart);
    }
}
