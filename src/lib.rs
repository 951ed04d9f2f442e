//! Vigil: Host Component Guardian
//!
//! Self-healing daemon core for host components (services, drivers, DCOM
//! classes). Classifies diagnostic events, attempts budgeted in-place
//! repairs, cascades isolation through declared dependencies, and records
//! restorable recovery checkpoints before destructive work.
//!
//! ## Architecture
//!
//! - **Ingest**: Polls an event source, drops irrelevant events early
//! - **Classifier**: Severity policy match + component extraction + category
//! - **Decision Engine**: Retry-budgeted repair or cascade isolation
//! - **Isolation Scheduler**: Priority queue draining into bounded actions
//! - **Recovery Store**: Append-only checkpoints with external backup refs

pub mod adapters;
pub mod classifier;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod graph;
pub mod ingest;
pub mod inventory;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod table;
pub mod types;

// Re-export configuration and policy surfaces
pub use config::{ConfigError, GuardianConfig, Policies, PolicyHandle};

// Re-export the daemon entrypoints
pub use daemon::{GuardianContext, TaskName};

// Re-export commonly used types
pub use types::{
    ClassifiedEvent, ComponentId, ComponentKind, ComponentRecord, ComponentStatus,
    EventCategory, IsolationAction, IsolationPriority, IsolationRequest, RawEvent,
    RecoveryPoint, RegistryIssue, Severity,
};

// Re-export component state and recovery storage
pub use storage::{RecoveryError, RecoveryStore, RetentionPolicy, StoreStats};
pub use table::ComponentTable;
