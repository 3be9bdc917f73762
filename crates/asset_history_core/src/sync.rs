//! crates/asset_history_core/src/sync.rs
//!
//! One-way, best-effort replication of each partition's history to the remote mirror.
//!
//! Local mutations enqueue a full snapshot into an outbox; a background worker drains it,
//! keeping only the newest snapshot per user, and pushes with bounded exponential backoff.
//! Failures are logged and recorded in a per-user `SyncStatus`, never returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::HistoryItem;
use crate::ports::RemoteMirror;

/// Retry policy for mirror pushes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Last known replication state for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    /// No mirror is configured.
    Disabled,
    /// Nothing has been pushed for this user yet.
    Never,
    Pending,
    Succeeded { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, attempts: u32, error: String },
}

struct SyncJob {
    username: String,
    seq: u64,
    history: Vec<HistoryItem>,
}

#[derive(Default)]
struct SyncLedger {
    statuses: HashMap<String, SyncStatus>,
    /// Sequence number of the newest snapshot enqueued per user.
    queued: HashMap<String, u64>,
}

impl SyncLedger {
    /// Records a finished push unless a newer snapshot for the same user is queued.
    fn complete(&mut self, username: String, seq: u64, status: SyncStatus) {
        if self.queued.get(&username).copied().unwrap_or(0) == seq {
            self.statuses.insert(username, status);
        }
    }
}

/// Outbox in front of a `RemoteMirror`.
pub struct SyncGateway {
    outbox: Option<mpsc::UnboundedSender<SyncJob>>,
    ledger: Arc<RwLock<SyncLedger>>,
}

impl SyncGateway {
    /// A gateway with no mirror behind it. Pushes are dropped.
    pub fn disabled() -> Self {
        Self {
            outbox: None,
            ledger: Arc::new(RwLock::new(SyncLedger::default())),
        }
    }

    /// Starts the worker task. It runs until `cancel` fires or the gateway is dropped.
    pub fn spawn(
        mirror: Arc<dyn RemoteMirror>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(RwLock::new(SyncLedger::default()));
        let worker = tokio::spawn(run_worker(mirror, config, rx, ledger.clone(), cancel));
        (
            Self {
                outbox: Some(tx),
                ledger,
            },
            worker,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.outbox.is_some()
    }

    /// Enqueues the full history of `username` for replication. Never fails.
    pub async fn push(&self, username: &str, history: Vec<HistoryItem>) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        let mut ledger = self.ledger.write().await;
        let seq = ledger.queued.get(username).copied().unwrap_or(0) + 1;
        ledger.queued.insert(username.to_string(), seq);
        ledger
            .statuses
            .insert(username.to_string(), SyncStatus::Pending);
        let job = SyncJob {
            username: username.to_string(),
            seq,
            history,
        };
        if outbox.send(job).is_err() {
            warn!(username, "Sync worker has stopped; dropping history snapshot");
            ledger.statuses.insert(
                username.to_string(),
                SyncStatus::Failed {
                    at: Utc::now(),
                    attempts: 0,
                    error: "sync worker stopped".to_string(),
                },
            );
        }
    }

    pub async fn status(&self, username: &str) -> SyncStatus {
        if self.outbox.is_none() {
            return SyncStatus::Disabled;
        }
        self.ledger
            .read()
            .await
            .statuses
            .get(username)
            .cloned()
            .unwrap_or(SyncStatus::Never)
    }
}

async fn run_worker(
    mirror: Arc<dyn RemoteMirror>,
    config: SyncConfig,
    mut rx: mpsc::UnboundedReceiver<SyncJob>,
    ledger: Arc<RwLock<SyncLedger>>,
    cancel: CancellationToken,
) {
    info!("Sync worker started.");
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Coalesce whatever else is already queued; only the newest snapshot matters.
        let mut latest: HashMap<String, SyncJob> = HashMap::new();
        latest.insert(first.username.clone(), first);
        while let Ok(job) = rx.try_recv() {
            latest.insert(job.username.clone(), job);
        }

        for (username, job) in latest {
            let status = tokio::select! {
                _ = cancel.cancelled() => break,
                status = push_with_retry(mirror.as_ref(), &config, &username, &job.history) => status,
            };
            ledger.write().await.complete(username, job.seq, status);
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    info!("Sync worker stopped.");
}

async fn push_with_retry(
    mirror: &dyn RemoteMirror,
    config: &SyncConfig,
    username: &str,
    history: &[HistoryItem],
) -> SyncStatus {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match mirror.replace_history(username, history).await {
            Ok(()) => {
                debug!(username, attempt, items = history.len(), "History mirrored");
                return SyncStatus::Succeeded { at: Utc::now() };
            }
            Err(e) if attempt < max_attempts => {
                let delay = config.backoff_for(attempt);
                warn!(username, attempt, error = %e, ?delay, "Mirror push failed; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(username, attempt, error = %e, "Mirror push failed; giving up");
                return SyncStatus::Failed {
                    at: Utc::now(),
                    attempts: attempt,
                    error: e.to_string(),
                };
            }
        }
    }
}
