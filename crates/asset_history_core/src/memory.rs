//! crates/asset_history_core/src/memory.rs
//!
//! In-process implementations of the storage ports. Used by the test suites and
//! for running the service without a database or remote mirror.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::{Account, HistoryItem, UserData};
use crate::ports::{
    AccountDirectory, Clock, PartitionRepository, PortError, PortResult, RemoteMirror,
    StoredPartition,
};

fn to_records(history: &[HistoryItem]) -> PortResult<Vec<Value>> {
    history
        .iter()
        .map(|item| serde_json::to_value(item).map_err(|e| PortError::Unexpected(e.to_string())))
        .collect()
}

//=========================================================================================
// Partitions
//=========================================================================================

#[derive(Default)]
pub struct InMemoryPartitions {
    partitions: RwLock<HashMap<String, StoredPartition>>,
}

impl InMemoryPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a partition with raw records, e.g. legacy shapes.
    pub async fn insert_raw(&self, username: &str, records: Vec<Value>) {
        self.partitions.write().await.insert(
            username.to_string(),
            StoredPartition {
                username: username.to_string(),
                last_active_id: None,
                records,
            },
        );
    }

    pub async fn raw(&self, username: &str) -> Option<StoredPartition> {
        self.partitions.read().await.get(username).cloned()
    }
}

#[async_trait]
impl PartitionRepository for InMemoryPartitions {
    async fn load_partition(&self, username: &str) -> PortResult<Option<StoredPartition>> {
        Ok(self.partitions.read().await.get(username).cloned())
    }

    async fn save_partition(&self, data: &UserData) -> PortResult<()> {
        let stored = StoredPartition {
            username: data.username.clone(),
            last_active_id: data.last_active_id.clone(),
            records: to_records(&data.history)?,
        };
        self.partitions
            .write()
            .await
            .insert(data.username.clone(), stored);
        Ok(())
    }
}

//=========================================================================================
// Remote Mirror
//=========================================================================================

#[derive(Default)]
pub struct InMemoryMirror {
    histories: RwLock<HashMap<String, Vec<Value>>>,
    failures_remaining: AtomicU32,
    replace_calls: AtomicUsize,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` replace calls fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, username: &str, records: Vec<Value>) {
        self.histories
            .write()
            .await
            .insert(username.to_string(), records);
    }

    pub async fn history(&self, username: &str) -> Option<Vec<Value>> {
        self.histories.read().await.get(username).cloned()
    }
}

#[async_trait]
impl RemoteMirror for InMemoryMirror {
    async fn fetch_history(&self, username: &str) -> PortResult<Vec<Value>> {
        Ok(self
            .histories
            .read()
            .await
            .get(username)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_history(&self, username: &str, history: &[HistoryItem]) -> PortResult<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortError::Unexpected("mirror unavailable".to_string()));
        }
        let records = to_records(history)?;
        self.histories
            .write()
            .await
            .insert(username.to_string(), records);
        Ok(())
    }
}

//=========================================================================================
// Accounts
//=========================================================================================

/// Plain-text account list. Not for production use; the SQLite adapter hashes passwords.
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, String>>,
}

impl InMemoryAccounts {
    pub fn with_accounts<'a>(accounts: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|(u, p)| (u.to_string(), p.to_string()))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn verify_credentials(&self, username: &str, password: &str) -> PortResult<bool> {
        Ok(self
            .accounts
            .read()
            .await
            .get(username)
            .is_some_and(|p| p == password))
    }

    async fn list_accounts(&self) -> PortResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .await
            .keys()
            .map(|username| Account {
                username: username.clone(),
            })
            .collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    async fn add_account(&self, username: &str, password: &str) -> PortResult<()> {
        self.accounts
            .write()
            .await
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn remove_account(&self, username: &str) -> PortResult<()> {
        self.accounts
            .write()
            .await
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Account {} not found", username)))
    }
}

//=========================================================================================
// Clock
//=========================================================================================

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
