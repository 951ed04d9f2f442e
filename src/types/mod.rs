//! Shared data structures for the guardian pipeline.
//!
//! Flow: raw platform events (`RawEvent`) are filtered and classified
//! (`ClassifiedEvent`), drive component state (`ComponentRecord`), and may
//! produce isolation work (`IsolationRequest`) or rollback points
//! (`RecoveryPoint`). Inventory scans contribute `RegistryIssue` findings.

mod component;
mod event;
mod isolation;
mod recovery;

pub use component::*;
pub use event::*;
pub use isolation::*;
pub use recovery::*;
