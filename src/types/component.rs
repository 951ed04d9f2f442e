//! Component identity and tracked state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of OS component the guardian tracks.
///
/// Closed set: repair and isolation dispatch match on it exhaustively, so a
/// new kind forces every action site to say what it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Service,
    Driver,
    DcomClass,
}

impl ComponentKind {
    /// Short prefix used in composite ids ("service:Spooler").
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Driver => "driver",
            Self::DcomClass => "dcom",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "service" => Some(Self::Service),
            "driver" => Some(Self::Driver),
            "dcom" => Some(Self::DcomClass),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Identity of a tracked component: kind plus the platform-facing name
/// (service name, driver name, or CLSID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId {
    pub kind: ComponentKind,
    pub name: String,
}

impl ComponentId {
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Service, name)
    }

    pub fn driver(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Driver, name)
    }

    pub fn dcom(name: impl Into<String>) -> Self {
        Self::new(ComponentKind::DcomClass, name)
    }

    /// Parse a composite id of the form "kind:name". The name part may
    /// itself contain colons (CLSIDs do not, but paths might).
    pub fn parse(composite: &str) -> Option<Self> {
        let (prefix, name) = composite.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        ComponentKind::from_prefix(prefix).map(|kind| Self::new(kind, name))
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Last-known health of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    /// A warning arrived and in-place repair has not (yet) cleared it.
    Degraded,
    /// Stopped/removed/deregistered. Terminal until an operator restore.
    Isolated,
    /// Seeded from inventory but not yet verified or seen in an event.
    Unknown,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Isolated => "isolated",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Tracked per-component record. Lives in the component table and is only
/// mutated through the table's methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: ComponentId,
    /// Resolved artifact path, when known (service binary, driver file).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Content hash of the artifact, when a collaborator supplied one.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Components this one's failure cascades to.
    #[serde(default)]
    pub impacts: Vec<ComponentId>,
    pub status: ComponentStatus,
}

impl ComponentRecord {
    /// Fresh record with no artifact metadata.
    pub fn new(id: ComponentId, status: ComponentStatus) -> Self {
        Self { id, path: None, content_hash: None, impacts: Vec::new(), status }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_round_trip() {
        let id = ComponentId::service("Spooler");
        assert_eq!(id.to_string(), "service:Spooler");
        assert_eq!(ComponentId::parse("service:Spooler"), Some(id));

        let id = ComponentId::dcom("4991D34B-80A1-4291-83B6-3328366B9097");
        assert_eq!(ComponentId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert_eq!(ComponentId::parse("Spooler"), None);
        assert_eq!(ComponentId::parse("service:"), None);
        assert_eq!(ComponentId::parse("process:init"), None);
    }
}
