//! crates/asset_history_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the history core.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database, remote mirror, and AI provider.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use crate::domain::{Account, HistoryItem, ProductInfo, UserData};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port and store operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Shapes
//=========================================================================================

/// A partition as it sits on disk. Records are kept raw because they may be in
/// any historical shape; the store normalizes them on read.
#[derive(Debug, Clone, Default)]
pub struct StoredPartition {
    pub username: String,
    pub last_active_id: Option<String>,
    pub records: Vec<serde_json::Value>,
}

/// Inputs for model-image generation beyond the product itself.
#[derive(Debug, Clone, Default)]
pub struct InteractionRequest {
    pub custom_prompt: Option<String>,
    /// Optional reference photo of a model, as a data URL.
    pub model_image: Option<String>,
}

/// Inputs for script generation beyond the product itself.
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    pub points: Vec<String>,
    pub assets: Vec<String>,
    pub custom_prompt: Option<String>,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Local, authoritative storage of partitions, keyed by username.
#[async_trait]
pub trait PartitionRepository: Send + Sync {
    async fn load_partition(&self, username: &str) -> PortResult<Option<StoredPartition>>;

    /// Replaces the whole partition for `data.username`.
    async fn save_partition(&self, data: &UserData) -> PortResult<()>;
}

/// Remote, best-effort mirror of each user's history. Whole-array replace only.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn fetch_history(&self, username: &str) -> PortResult<Vec<serde_json::Value>>;

    async fn replace_history(&self, username: &str, history: &[HistoryItem]) -> PortResult<()>;
}

/// The list of accounts allowed to log in.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn verify_credentials(&self, username: &str, password: &str) -> PortResult<bool>;

    async fn list_accounts(&self) -> PortResult<Vec<Account>>;

    /// Adds an account, or replaces the password of an existing one.
    async fn add_account(&self, username: &str, password: &str) -> PortResult<()>;

    async fn remove_account(&self, username: &str) -> PortResult<()>;
}

/// The external AI service that produces product data, images, and text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn analyze_product(&self, pid: &str) -> PortResult<ProductInfo>;

    /// Returns a reference (URL or data URL) to a white-background three-view image.
    async fn generate_three_view(&self, product: &ProductInfo) -> PortResult<String>;

    /// Returns a reference to an image of a model using the product.
    async fn generate_interaction(
        &self,
        product: &ProductInfo,
        request: &InteractionRequest,
    ) -> PortResult<String>;

    async fn generate_selling_points(&self, product: &ProductInfo) -> PortResult<Vec<String>>;

    async fn generate_script(
        &self,
        product: &ProductInfo,
        request: &ScriptRequest,
    ) -> PortResult<String>;
}

/// Source of "now", so that trash expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time at the millisecond precision items are stored with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}
