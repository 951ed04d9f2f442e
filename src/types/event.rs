//! Raw platform events and their classified form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ComponentId;

/// Severity of a platform event, as reported by the feed itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Category assigned during classification. Drives log wording only; the
/// decision path dispatches on severity and component kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Error mentioning DCOM or a CLSID.
    CriticalCom,
    /// Error mentioning a driver.
    CriticalDriver,
    /// Any other error.
    SystemError,
    /// Warning mentioning a service.
    ServiceWarning,
    /// Any other warning.
    HardwareWarning,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CriticalCom => "critical_com",
            Self::CriticalDriver => "critical_driver",
            Self::SystemError => "system_error",
            Self::ServiceWarning => "service_warning",
            Self::HardwareWarning => "hardware_warning",
        };
        f.write_str(label)
    }
}

/// One platform log record as delivered by an event source.
///
/// Feeds ship these as JSON lines; anything that fails to parse is the
/// source's problem and never reaches the decision path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    /// Originating provider ("Service Control Manager", "DCOM", ...).
    pub source: String,
    pub event_id: u32,
    pub level: Severity,
    pub message: String,
}

/// Classified form of a relevant event. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub event_id: u32,
    pub severity: Severity,
    pub message: String,
    /// Extracted component id; `None` when no extraction rule matched.
    pub component: Option<ComponentId>,
    pub category: EventCategory,
}
