//! crates/asset_history_core/src/domain.rs
//!
//! Defines the core data structures for a user's generated-asset history.
//! These are the current, normalized shapes; older persisted shapes are handled
//! by the `migrate` module before they ever reach these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an analyzed product. Immutable once the item is created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub introduction: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// One generation project for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Present if and only if the item is in the trash.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
    pub product: ProductInfo,
    /// Generated three-view images, most recent first.
    pub three_views: Vec<String>,
    /// Generated model images, most recent first.
    pub interactions: Vec<String>,
    pub selling_points: Vec<String>,
    pub custom_points: Vec<String>,
    pub selected_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Bumped on every successful write; used to reject stale whole-item replaces.
    #[serde(default)]
    pub version: u64,
}

impl HistoryItem {
    /// Creates a fresh item for a newly analyzed product.
    pub fn new(id: String, timestamp: DateTime<Utc>, product: ProductInfo) -> Self {
        Self {
            id,
            timestamp,
            deleted_at: None,
            product,
            three_views: Vec::new(),
            interactions: Vec::new(),
            selling_points: Vec::new(),
            custom_points: Vec::new(),
            selected_points: Vec::new(),
            script: None,
            version: 0,
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `point` is one of the item's AI-derived or user-authored points.
    pub fn has_point(&self, point: &str) -> bool {
        self.selling_points.iter().any(|p| p == point)
            || self.custom_points.iter().any(|p| p == point)
    }
}

/// One user's partition: the full history plus a weak pointer to the last touched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_id: Option<String>,
    pub history: Vec<HistoryItem>,
}

impl UserData {
    pub fn empty(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            last_active_id: None,
            history: Vec::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&HistoryItem> {
        self.history.iter().find(|item| item.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut HistoryItem> {
        self.history.iter_mut().find(|item| item.id == id)
    }

    /// Items not in the trash, newest first.
    pub fn active_items(&self) -> Vec<&HistoryItem> {
        let mut items: Vec<&HistoryItem> =
            self.history.iter().filter(|item| !item.is_trashed()).collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    /// Items in the trash, most recently deleted first.
    pub fn trash_items(&self) -> Vec<&HistoryItem> {
        let mut items: Vec<&HistoryItem> =
            self.history.iter().filter(|item| item.is_trashed()).collect();
        items.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        items
    }

    /// The last touched item, unless it has since been moved to the trash.
    pub fn active_item(&self) -> Option<&HistoryItem> {
        self.last_active_id
            .as_deref()
            .and_then(|id| self.find(id))
            .filter(|item| !item.is_trashed())
    }
}

/// Public view of an authorized account. The password hash never leaves the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
}
