//! Isolation requests and registry scan findings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::ComponentId;

/// What the scheduler should do with a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationAction {
    /// Stop/remove/deregister and disable. One-way.
    Isolate,
    /// Replace the artifact from a known-good source and re-enable.
    Reinstall,
}

impl fmt::Display for IsolationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolate => f.write_str("isolate"),
            Self::Reinstall => f.write_str("reinstall"),
        }
    }
}

/// Request priority. Lower value drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationPriority {
    /// Cascading errors and registry corruption.
    Critical = 0,
    /// Warnings that exhausted their repair budget.
    Elevated = 1,
}

impl fmt::Display for IsolationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => f.write_str("critical"),
            Self::Elevated => f.write_str("elevated"),
        }
    }
}

/// A unit of isolation work handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationRequest {
    pub priority: IsolationPriority,
    pub component: ComponentId,
    /// Human-readable cause, cited in logs and notifications.
    pub reason: String,
    pub action: IsolationAction,
}

impl IsolationRequest {
    pub fn isolate(priority: IsolationPriority, component: ComponentId, reason: String) -> Self {
        Self { priority, component, reason, action: IsolationAction::Isolate }
    }

    pub fn reinstall(priority: IsolationPriority, component: ComponentId, reason: String) -> Self {
        Self { priority, component, reason, action: IsolationAction::Reinstall }
    }
}

/// Kind of inconsistency found by an inventory scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryIssueKind {
    /// A registered service points at a binary the filesystem lacks.
    MissingBinary,
    /// A registered driver's file is gone from its expected location.
    DriverMissing,
}

impl fmt::Display for RegistryIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBinary => f.write_str("missing_binary"),
            Self::DriverMissing => f.write_str("driver_missing"),
        }
    }
}

/// One finding from the registry/inventory scan.
#[derive(Debug, Clone)]
pub struct RegistryIssue {
    pub kind: RegistryIssueKind,
    pub component: ComponentId,
    /// Artifact path the registry references but the filesystem lacks.
    pub path: PathBuf,
}
