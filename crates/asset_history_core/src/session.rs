//! crates/asset_history_core/src/session.rs
//!
//! Binds a logged-in session to exactly one user's partition.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::migrate::migrate_records;
use crate::ports::{AccountDirectory, PortError, PortResult, RemoteMirror};
use crate::store::HistoryStore;

/// Proof of a successful login. Only `SessionManager` can create one, and every
/// store operation takes it, so a store call can only reach the session's partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    username: String,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

pub struct SessionManager {
    accounts: Arc<dyn AccountDirectory>,
    store: Arc<HistoryStore>,
    mirror: Option<Arc<dyn RemoteMirror>>,
    bindings: RwLock<HashMap<String, String>>,
}

impl SessionManager {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        store: Arc<HistoryStore>,
        mirror: Option<Arc<dyn RemoteMirror>>,
    ) -> Self {
        Self {
            accounts,
            store,
            mirror,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Verifies credentials, makes sure the user's partition exists (hydrating it from
    /// the mirror on first login), and binds a new session to it.
    ///
    /// Bad credentials fail with `Unauthorized` before any partition is touched.
    pub async fn login(&self, username: &str, password: &str) -> PortResult<Session> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || !self.accounts.verify_credentials(username, password).await? {
            warn!(username, "Rejected login");
            return Err(PortError::Unauthorized);
        }

        if self.store.ensure_partition(username).await? {
            self.hydrate(username).await?;
        }

        let session = Session {
            token: Uuid::new_v4().to_string(),
            username: username.to_string(),
        };
        self.bindings
            .write()
            .await
            .insert(session.token.clone(), session.username.clone());
        info!(username, "Session established");
        Ok(session)
    }

    /// Looks up a live session by its token.
    pub async fn resume(&self, token: &str) -> Option<Session> {
        self.bindings
            .read()
            .await
            .get(token)
            .map(|username| Session {
                token: token.to_string(),
                username: username.clone(),
            })
    }

    /// Drops the session binding. The partition itself stays on disk.
    pub async fn logout(&self, session: Session) {
        self.bindings.write().await.remove(&session.token);
        info!(username = %session.username, "Session ended");
    }

    /// Seeds an empty local partition from the mirror, once, then writes it back so
    /// that the local copy is authoritative from here on. Skipped if another session
    /// wrote to the partition while the mirror was being read.
    async fn hydrate(&self, username: &str) -> PortResult<()> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let records = match mirror.fetch_history(username).await {
            Ok(records) => records,
            Err(e) => {
                warn!(username, error = %e, "Hydration from mirror failed; starting empty");
                return Ok(());
            }
        };
        if records.is_empty() {
            return Ok(());
        }

        let (history, stats) = migrate_records(records);
        let items = history.len();
        if self.store.seed(username, history).await? {
            info!(
                username,
                items,
                skipped = stats.skipped,
                legacy = stats.legacy,
                "Hydrated partition from mirror"
            );
        } else {
            info!(username, "Partition was written during hydration; keeping local data");
        }
        Ok(())
    }
}
