//! Guardian Configuration Module
//!
//! One TOML document covers policy data (event patterns, failure-impact
//! edges, driver sources, component inventory) and tunables (retry budget,
//! queue capacities, recovery retention, loop cadences). Every field has a
//! default, so a missing file yields the stock policy.
//!
//! ## Loading Order
//!
//! 1. Explicit `--config` path (errors here are fatal)
//! 2. `VIGIL_CONFIG` environment variable (path to TOML file)
//! 3. `vigil.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The policy portion compiles into a [`Policies`] bundle held behind a
//! [`PolicyHandle`]; reloads swap the whole bundle atomically, so readers
//! never observe a half-updated policy.

mod guardian;
mod policies;
pub mod defaults;

pub use guardian::*;
pub use policies::{Policies, PolicyHandle};
