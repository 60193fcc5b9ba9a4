use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Duration;

use crate::checker;
use crate::outbound::ClientPool;
use crate::storage;

const MIN_INTERVAL_MS: i64 = 60_000;

/// Drives the periodic health sweep. The interval is re-read from settings
/// every round, so edits take effect on the next tick without a restart.
/// The handle is process-local; a restart simply starts a fresh cycle.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Idempotent: a second call while the loop is alive is a no-op.
    pub fn start(&self, clients: Arc<ClientPool>, db_path: PathBuf) {
        let Ok(mut handle) = self.handle.lock() else {
            return;
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        self.shutdown.send_replace(false);
        let mut rx = self.shutdown.subscribe();

        *handle = Some(tokio::spawn(async move {
            loop {
                let interval_ms = match storage::get_settings(db_path.clone()).await {
                    Ok(s) => s.check_interval_ms.max(MIN_INTERVAL_MS),
                    Err(e) => {
                        tracing::warn!(err = %e, "load settings failed");
                        storage::Settings::default().check_interval_ms
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms as u64)) => {
                        tracing::info!(interval_ms, "scheduled key check sweep");
                        if let Err(e) = checker::check_all_serial(&clients, db_path.clone()).await {
                            tracing::warn!(err = %e, "scheduled key check sweep failed");
                        }
                        // A stop issued mid-sweep lets the sweep finish but
                        // prevents the next one.
                        if *rx.borrow() {
                            break;
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Idempotent; in-flight probes run to completion, no new sweep starts.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
