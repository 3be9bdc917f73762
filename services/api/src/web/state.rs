//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-session asset selections.

use crate::config::Config;
use asset_history_core::{
    AccountDirectory, GenerationWorkflow, HistoryItem, HistoryStore, SelectionState,
    SessionManager, SyncGateway,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<HistoryStore>,
    pub workflow: Arc<GenerationWorkflow>,
    pub sync: Arc<SyncGateway>,
    pub accounts: Arc<dyn AccountDirectory>,
    /// Asset selections, keyed by session token. Never persisted.
    pub selections: Mutex<HashMap<String, SelectionState>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionManager>,
        store: Arc<HistoryStore>,
        workflow: Arc<GenerationWorkflow>,
        sync: Arc<SyncGateway>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            config,
            sessions,
            store,
            workflow,
            sync,
            accounts,
            selections: Mutex::new(HashMap::new()),
        }
    }

    /// A snapshot of the session's selection.
    pub async fn selection(&self, token: &str) -> SelectionState {
        self.selections
            .lock()
            .await
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    /// Runs `f` against the session's selection and returns the updated snapshot.
    pub async fn update_selection(
        &self,
        token: &str,
        f: impl FnOnce(&mut SelectionState),
    ) -> SelectionState {
        let mut selections = self.selections.lock().await;
        let selection = selections.entry(token.to_string()).or_default();
        f(selection);
        selection.clone()
    }

    /// Keeps the selection on the item a write just made the last active one.
    /// Assets are only cleared when that is a different item.
    pub async fn follow_active(&self, token: &str, item: &HistoryItem) {
        self.update_selection(token, |s| s.set_active(Some(item.id.as_str())))
            .await;
    }

    pub async fn drop_selection(&self, token: &str) {
        self.selections.lock().await.remove(token);
    }
}
