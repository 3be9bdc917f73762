//! crates/asset_history_core/src/migrate.rs
//!
//! Normalizes persisted history records of any historical revision into the
//! current `HistoryItem` shape. Migration is pure: nothing here writes back.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::{HistoryItem, ProductInfo};

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record is malformed: {0}")]
    Malformed(String),
    #[error("timestamp {0} is out of range")]
    BadTimestamp(i64),
}

/// The on-disk shapes a record may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRevision {
    /// One `threeView` and one `interaction` image per item.
    Singular,
    /// Image lists, but no user-authored or selected points yet.
    Plural,
    /// The current shape.
    Current,
}

/// Every field any revision ever wrote, all optional except identity and product.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHistoryItem {
    id: String,
    timestamp: i64,
    #[serde(default)]
    deleted_at: Option<i64>,
    product: ProductInfo,
    #[serde(default)]
    three_view: Option<String>,
    #[serde(default)]
    interaction: Option<String>,
    #[serde(default)]
    three_views: Option<Vec<String>>,
    #[serde(default)]
    interactions: Option<Vec<String>>,
    #[serde(default)]
    selling_points: Option<Vec<String>>,
    #[serde(default)]
    custom_points: Option<Vec<String>>,
    #[serde(default)]
    selected_points: Option<Vec<String>>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    version: Option<u64>,
}

/// Classifies a stored record by the fields it carries.
pub fn detect_revision(record: &Value) -> SchemaRevision {
    let has = |key: &str| record.get(key).is_some_and(|v| !v.is_null());
    if has("threeView") || has("interaction") {
        SchemaRevision::Singular
    } else if has("selectedPoints") {
        SchemaRevision::Current
    } else {
        SchemaRevision::Plural
    }
}

/// Maps one stored record of any revision to the current shape.
pub fn migrate_record(record: Value) -> Result<HistoryItem, MigrationError> {
    if !record.is_object() {
        return Err(MigrationError::NotAnObject);
    }
    let raw: RawHistoryItem =
        serde_json::from_value(record).map_err(|e| MigrationError::Malformed(e.to_string()))?;
    normalize(raw)
}

/// What a batch migration did besides producing items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    /// Records that could not be migrated and were left out.
    pub skipped: usize,
    /// Records stored in an older revision; a write would rewrite them.
    pub legacy: usize,
}

/// Migrates a batch, skipping records that cannot be migrated.
pub fn migrate_records(records: Vec<Value>) -> (Vec<HistoryItem>, MigrationStats) {
    let mut items = Vec::with_capacity(records.len());
    let mut stats = MigrationStats::default();
    for record in records {
        let id = record.get("id").and_then(Value::as_str).map(str::to_owned);
        let revision = detect_revision(&record);
        match migrate_record(record) {
            Ok(item) => {
                if revision != SchemaRevision::Current {
                    stats.legacy += 1;
                }
                items.push(item);
            }
            Err(e) => {
                stats.skipped += 1;
                warn!(record_id = ?id, ?revision, error = %e, "Skipping unmigratable history record");
            }
        }
    }
    (items, stats)
}

fn normalize(raw: RawHistoryItem) -> Result<HistoryItem, MigrationError> {
    let three_views = promote(raw.three_view, raw.three_views);
    let interactions = promote(raw.interaction, raw.interactions);
    let selling_points = raw.selling_points.unwrap_or_default();
    // Before per-point selection existed, every selling point fed the script.
    let selected_points = raw
        .selected_points
        .unwrap_or_else(|| selling_points.clone());

    Ok(HistoryItem {
        id: raw.id,
        timestamp: millis(raw.timestamp)?,
        deleted_at: raw.deleted_at.map(millis).transpose()?,
        product: raw.product,
        three_views,
        interactions,
        selling_points,
        custom_points: raw.custom_points.unwrap_or_default(),
        selected_points,
        script: raw.script,
        version: raw.version.unwrap_or(0),
    })
}

/// Folds a legacy singular image into the list without dropping either.
fn promote(single: Option<String>, list: Option<Vec<String>>) -> Vec<String> {
    let mut list = list.unwrap_or_default();
    if let Some(single) = single {
        if !list.contains(&single) {
            list.insert(0, single);
        }
    }
    list
}

fn millis(ms: i64) -> Result<DateTime<Utc>, MigrationError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(MigrationError::BadTimestamp(ms))
}
