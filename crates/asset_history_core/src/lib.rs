pub mod domain;
pub mod memory;
pub mod migrate;
pub mod ports;
pub mod selection;
pub mod session;
pub mod store;
pub mod sync;
pub mod workflow;

pub use domain::{Account, HistoryItem, ProductInfo, UserData};
pub use ports::{AccountDirectory, Clock, GenerationService, InteractionRequest, PartitionRepository,
    PortError, PortResult, RemoteMirror, ScriptRequest, StoredPartition, SystemClock};
pub use selection::SelectionState;
pub use session::{Session, SessionManager};
pub use migrate::MigrationStats;
pub use store::{HistoryStore, ItemCommand, ItemExport, LoadReport};
pub use sync::{SyncConfig, SyncGateway, SyncStatus};
pub use workflow::GenerationWorkflow;
