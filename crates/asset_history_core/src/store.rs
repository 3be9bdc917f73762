//! crates/asset_history_core/src/store.rs
//!
//! CRUD, soft delete, and trash expiry over the partition bound to a session.
//!
//! Every write is a read-modify-write of the authoritative stored copy performed under
//! one lock, followed by a fire-and-forget push to the sync gateway. Callers that hold a
//! stale copy of an item should use `apply` with an `ItemCommand` instead of `upsert`;
//! `upsert` rejects replaces based on an outdated `version`.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{HistoryItem, UserData};
use crate::migrate::migrate_records;
use crate::ports::{Clock, PartitionRepository, PortError, PortResult, SystemClock};
use crate::session::Session;
use crate::sync::SyncGateway;

/// How long an item stays in the trash before it is purged on the next load.
pub const TRASH_TTL_MS: i64 = 3 * 24 * 60 * 60 * 1000;

pub fn trash_ttl() -> Duration {
    Duration::milliseconds(TRASH_TTL_MS)
}

/// What happened while loading a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records that could not be migrated and were left out.
    pub skipped: usize,
    /// Trash items past their TTL that were removed.
    pub purged: usize,
    /// Records read in an older schema revision. The next write stores them migrated.
    pub legacy: usize,
}

/// A single item prepared for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemExport {
    /// `project-{pid}-{created millis}.json`
    pub file_name: String,
    /// Pretty-printed JSON of the item.
    pub json: String,
}

/// A targeted change to one item, applied against the stored copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCommand {
    AppendThreeView(String),
    AppendInteraction(String),
    ReplaceSellingPoints(Vec<String>),
    SetScript(String),
    AddCustomPoint(String),
    RemoveCustomPoint(String),
    TogglePoint(String),
}

impl ItemCommand {
    fn apply_to(self, item: &mut HistoryItem) -> PortResult<()> {
        match self {
            ItemCommand::AppendThreeView(image) => item.three_views.insert(0, image),
            ItemCommand::AppendInteraction(image) => item.interactions.insert(0, image),
            ItemCommand::ReplaceSellingPoints(points) => {
                // Keep custom points the user had selected; select all fresh AI points.
                let kept: Vec<String> = item
                    .selected_points
                    .drain(..)
                    .filter(|p| item.custom_points.contains(p) && !points.contains(p))
                    .collect();
                item.selected_points = points.iter().cloned().chain(kept).collect();
                item.selling_points = points;
            }
            ItemCommand::SetScript(script) => item.script = Some(script),
            ItemCommand::AddCustomPoint(point) => {
                let point = point.trim().to_string();
                if point.is_empty() {
                    return Err(PortError::Invalid("custom point is empty".to_string()));
                }
                if !item.custom_points.contains(&point) {
                    item.custom_points.push(point);
                }
            }
            // Selection is only checked when toggling, so a removed point may stay selected.
            ItemCommand::RemoveCustomPoint(point) => item.custom_points.retain(|p| *p != point),
            ItemCommand::TogglePoint(point) => {
                if let Some(pos) = item.selected_points.iter().position(|p| *p == point) {
                    item.selected_points.remove(pos);
                } else if item.has_point(&point) {
                    item.selected_points.push(point);
                } else {
                    return Err(PortError::Invalid(format!(
                        "'{}' is not a selling point of item {}",
                        point, item.id
                    )));
                }
            }
        }
        Ok(())
    }
}

enum Outcome<T> {
    Changed(T),
    Unchanged(T),
}

pub struct HistoryStore {
    partitions: Arc<dyn PartitionRepository>,
    sync: Arc<SyncGateway>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(partitions: Arc<dyn PartitionRepository>, sync: Arc<SyncGateway>) -> Self {
        Self {
            partitions,
            sync,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    /// The session's partition, normalized, with expired trash already purged.
    pub async fn get_current(&self, session: &Session) -> PortResult<Option<UserData>> {
        Ok(self.load(session).await?.map(|(data, _)| data))
    }

    /// Like `get_current`, also reporting skipped and purged records.
    pub async fn load(&self, session: &Session) -> PortResult<Option<(UserData, LoadReport)>> {
        let _guard = self.write_lock.lock().await;
        self.load_locked(session.username()).await
    }

    /// One item of the session's partition, trashed or not.
    pub async fn item(&self, session: &Session, id: &str) -> PortResult<HistoryItem> {
        self.get_current(session)
            .await?
            .and_then(|data| data.find(id).cloned())
            .ok_or_else(|| PortError::NotFound(format!("History item {} not found", id)))
    }

    /// A single item as a pretty-printed JSON file, for download.
    pub async fn export_item(&self, session: &Session, id: &str) -> PortResult<ItemExport> {
        let item = self.item(session, id).await?;
        let json =
            serde_json::to_string_pretty(&item).map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(ItemExport {
            file_name: format!(
                "project-{}-{}.json",
                item.product.pid,
                item.timestamp.timestamp_millis()
            ),
            json,
        })
    }

    //=====================================================================================
    // Writes
    //=====================================================================================

    /// Inserts `item`, or fully replaces the stored item with the same id.
    ///
    /// Replacing fails with `Conflict` if the stored item has been written since
    /// `item` was read, i.e. the versions differ.
    pub async fn upsert(&self, session: &Session, item: HistoryItem) -> PortResult<HistoryItem> {
        if item.id.trim().is_empty() {
            return Err(PortError::Invalid("history item id is empty".to_string()));
        }
        self.write(session, |data, _| {
            let mut item = item;
            // Stored as epoch millis; keep the returned copy equal to what later reads see.
            item.timestamp = item.timestamp.trunc_subsecs(3);
            item.deleted_at = item.deleted_at.map(|at| at.trunc_subsecs(3));
            let stored = match data.find_mut(&item.id) {
                Some(existing) if existing.version != item.version => {
                    return Err(PortError::Conflict(format!(
                        "item {} is at version {}, update was based on version {}",
                        item.id, existing.version, item.version
                    )));
                }
                Some(existing) => {
                    item.version += 1;
                    *existing = item;
                    existing.clone()
                }
                None => {
                    item.version += 1;
                    data.history.insert(0, item.clone());
                    item
                }
            };
            data.last_active_id = Some(stored.id.clone());
            Ok(Outcome::Changed(stored))
        })
        .await
    }

    /// Applies one command to the stored copy of item `id`.
    pub async fn apply(
        &self,
        session: &Session,
        id: &str,
        command: ItemCommand,
    ) -> PortResult<HistoryItem> {
        self.write(session, |data, _| {
            let item = data
                .find_mut(id)
                .ok_or_else(|| PortError::NotFound(format!("History item {} not found", id)))?;
            command.apply_to(item)?;
            item.version += 1;
            let updated = item.clone();
            data.last_active_id = Some(updated.id.clone());
            Ok(Outcome::Changed(updated))
        })
        .await
    }

    /// Moves an item to the trash. Returns false if it was missing or already there.
    pub async fn move_to_trash(&self, session: &Session, id: &str) -> PortResult<bool> {
        self.write(session, |data, now| match data.find_mut(id) {
            Some(item) if !item.is_trashed() => {
                item.deleted_at = Some(now);
                item.version += 1;
                Ok(Outcome::Changed(true))
            }
            _ => Ok(Outcome::Unchanged(false)),
        })
        .await
    }

    /// Takes an item out of the trash. Returns false if it was not in the trash.
    pub async fn restore(&self, session: &Session, id: &str) -> PortResult<bool> {
        self.write(session, |data, _| match data.find_mut(id) {
            Some(item) if item.is_trashed() => {
                item.deleted_at = None;
                item.version += 1;
                Ok(Outcome::Changed(true))
            }
            _ => Ok(Outcome::Unchanged(false)),
        })
        .await
    }

    /// Removes an item for good. Returns false if it did not exist.
    pub async fn permanent_delete(&self, session: &Session, id: &str) -> PortResult<bool> {
        self.write(session, |data, _| {
            let before = data.history.len();
            data.history.retain(|item| item.id != id);
            if data.history.len() == before {
                return Ok(Outcome::Unchanged(false));
            }
            clear_dangling_pointer(data);
            Ok(Outcome::Changed(true))
        })
        .await
    }

    /// Permanently deletes every trashed item. Returns how many were removed.
    pub async fn empty_trash(&self, session: &Session) -> PortResult<usize> {
        self.write(session, |data, _| {
            let before = data.history.len();
            data.history.retain(|item| !item.is_trashed());
            let removed = before - data.history.len();
            if removed == 0 {
                return Ok(Outcome::Unchanged(0));
            }
            clear_dangling_pointer(data);
            Ok(Outcome::Changed(removed))
        })
        .await
    }

    //=====================================================================================
    // Partition lifecycle (used by `SessionManager` before a session exists)
    //=====================================================================================

    /// Creates `username`'s partition if it does not exist yet.
    /// Returns whether the partition holds no records.
    pub(crate) async fn ensure_partition(&self, username: &str) -> PortResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.partitions.load_partition(username).await? {
            Some(partition) => Ok(partition.records.is_empty()),
            None => {
                self.partitions
                    .save_partition(&UserData::empty(username))
                    .await?;
                info!(username, "Created partition");
                Ok(true)
            }
        }
    }

    /// Seeds an empty partition with `history` and queues it for sync.
    /// Does nothing and returns false if the partition gained records meanwhile.
    pub(crate) async fn seed(&self, username: &str, history: Vec<HistoryItem>) -> PortResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.partitions.load_partition(username).await?;
        if current.is_some_and(|partition| !partition.records.is_empty()) {
            return Ok(false);
        }
        let data = UserData {
            username: username.to_string(),
            last_active_id: None,
            history,
        };
        self.partitions.save_partition(&data).await?;
        self.sync.push(username, data.history).await;
        Ok(true)
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    async fn load_locked(&self, username: &str) -> PortResult<Option<(UserData, LoadReport)>> {
        let Some(stored) = self.partitions.load_partition(username).await? else {
            return Ok(None);
        };
        let (history, stats) = migrate_records(stored.records);
        let mut data = UserData {
            username: username.to_string(),
            last_active_id: stored.last_active_id,
            history,
        };

        let purged = purge_expired(&mut data, self.clock.now());
        if purged > 0 {
            clear_dangling_pointer(&mut data);
            self.partitions.save_partition(&data).await?;
            info!(username, purged, "Purged expired trash");
        }
        Ok(Some((
            data,
            LoadReport {
                skipped: stats.skipped,
                purged,
                legacy: stats.legacy,
            },
        )))
    }

    async fn write<T, F>(&self, session: &Session, op: F) -> PortResult<T>
    where
        F: FnOnce(&mut UserData, DateTime<Utc>) -> PortResult<Outcome<T>>,
    {
        let username = session.username();
        let _guard = self.write_lock.lock().await;
        let mut data = match self.load_locked(username).await? {
            Some((data, _)) => data,
            None => UserData::empty(username),
        };

        match op(&mut data, self.clock.now())? {
            Outcome::Unchanged(value) => Ok(value),
            Outcome::Changed(value) => {
                self.partitions.save_partition(&data).await?;
                debug!(username, items = data.history.len(), "Partition written");
                self.sync.push(username, data.history).await;
                Ok(value)
            }
        }
    }
}

/// Drops trash items whose TTL has elapsed. Returns how many were dropped.
fn purge_expired(data: &mut UserData, now: DateTime<Utc>) -> usize {
    let ttl = trash_ttl();
    let before = data.history.len();
    data.history.retain(|item| match item.deleted_at {
        Some(deleted_at) => now - deleted_at < ttl,
        None => true,
    });
    before - data.history.len()
}

fn clear_dangling_pointer(data: &mut UserData) {
    let dangling = data
        .last_active_id
        .as_deref()
        .is_some_and(|id| data.find(id).is_none());
    if dangling {
        data.last_active_id = None;
    }
}
