//! Persistent state for the guardian.
//!
//! The only durable structure is the recovery point log: a sled tree keyed
//! by big-endian millisecond timestamps, holding the component table
//! snapshot and external backup reference taken before each destructive
//! action.

mod recovery;

pub use recovery::{RecoveryError, RecoveryStore, RetentionPolicy, StoreStats};
