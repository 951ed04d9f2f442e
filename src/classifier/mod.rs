//! Event relevance filtering and classification.
//!
//! Pure over its inputs: the same raw event always classifies the same way
//! under a given policy. Extraction rules run in a fixed order and the
//! first match wins, so a message naming both a service and a driver
//! resolves deterministically.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::config::EventsConfig;
use crate::types::{
    ClassifiedEvent, ComponentId, ComponentKind, EventCategory, RawEvent, Severity,
};

// Extraction patterns, applied in declaration order.
const SERVICE_PATTERN: &str = r#"service\s+"(.+?)""#;
const DRIVER_PATTERN: &str = r#"driver\s+"(.+?)""#;
const CLSID_PATTERN: &str = r"CLSID\s+\{([A-F0-9-]+)\}";

/// Compiled relevance and classification policy.
pub struct Classifier {
    warning_sources: HashSet<String>,
    warning_ids: HashSet<u32>,
    error_sources: HashSet<String>,
    error_ids: HashSet<u32>,
    extraction_rules: Vec<(ComponentKind, Regex)>,
}

impl Classifier {
    /// Compile the classifier from the event policy section.
    pub fn new(events: &EventsConfig) -> Result<Self, regex::Error> {
        let case_insensitive = |pattern: &str| -> Result<Regex, regex::Error> {
            RegexBuilder::new(pattern).case_insensitive(true).build()
        };
        Ok(Self {
            warning_sources: events.warning_sources.iter().cloned().collect(),
            warning_ids: events.warning_ids.iter().copied().collect(),
            error_sources: events.error_sources.iter().cloned().collect(),
            error_ids: events.error_ids.iter().copied().collect(),
            extraction_rules: vec![
                (ComponentKind::Service, case_insensitive(SERVICE_PATTERN)?),
                (ComponentKind::Driver, case_insensitive(DRIVER_PATTERN)?),
                (ComponentKind::DcomClass, case_insensitive(CLSID_PATTERN)?),
            ],
        })
    }

    /// Ingestion filter: does this event match the configured source or id
    /// list for its own severity level?
    pub fn is_relevant(&self, event: &RawEvent) -> bool {
        match event.level {
            Severity::Warning => {
                self.warning_sources.contains(&event.source)
                    || self.warning_ids.contains(&event.event_id)
            }
            Severity::Error => {
                self.error_sources.contains(&event.source)
                    || self.error_ids.contains(&event.event_id)
            }
        }
    }

    /// Classify a raw event. Total: an event with no extractable component
    /// still comes back, with `component: None`.
    pub fn classify(&self, event: &RawEvent) -> ClassifiedEvent {
        ClassifiedEvent {
            timestamp: event.timestamp,
            source: event.source.clone(),
            event_id: event.event_id,
            severity: event.level,
            message: event.message.clone(),
            component: self.extract_component(&event.message),
            category: Self::categorize(event.level, &event.message),
        }
    }

    fn categorize(level: Severity, message: &str) -> EventCategory {
        match level {
            Severity::Error => {
                // DCOM and CLSID are checked as written; providers emit
                // them uppercase.
                if message.contains("DCOM") || message.contains("CLSID") {
                    EventCategory::CriticalCom
                } else if message.to_lowercase().contains("driver") {
                    EventCategory::CriticalDriver
                } else {
                    EventCategory::SystemError
                }
            }
            Severity::Warning => {
                if message.to_lowercase().contains("service") {
                    EventCategory::ServiceWarning
                } else {
                    EventCategory::HardwareWarning
                }
            }
        }
    }

    fn extract_component(&self, message: &str) -> Option<ComponentId> {
        for (kind, pattern) in &self.extraction_rules {
            if let Some(name) = pattern.captures(message).and_then(|caps| caps.get(1)) {
                return Some(ComponentId::new(*kind, name.as_str()));
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn classifier() -> Classifier {
        Classifier::new(&EventsConfig::default()).unwrap()
    }

    fn raw(source: &str, event_id: u32, level: Severity, message: &str) -> RawEvent {
        RawEvent {
            timestamp: Utc::now(),
            source: source.to_string(),
            event_id,
            level,
            message: message.to_string(),
        }
    }

    #[test]
    fn relevance_matches_source_or_id_per_level() {
        let c = classifier();

        // Warning source match, arbitrary id.
        assert!(c.is_relevant(&raw("Disk", 999, Severity::Warning, "slow io")));
        // Warning id match, arbitrary source.
        assert!(c.is_relevant(&raw("SomeProvider", 6062, Severity::Warning, "lso")));
        // Error id match.
        assert!(c.is_relevant(&raw("SomeProvider", 7009, Severity::Error, "timeout")));
        // Known error source does not make a warning relevant.
        assert!(!c.is_relevant(&raw("DriverFrameworks-UserMode", 42, Severity::Warning, "x")));
        // Unlisted source and id.
        assert!(!c.is_relevant(&raw("Firewall", 42, Severity::Warning, "x")));
    }

    #[test]
    fn shared_source_is_relevant_at_both_levels() {
        let c = classifier();
        let source = "Service Control Manager";
        assert!(c.is_relevant(&raw(source, 1, Severity::Warning, "x")));
        assert!(c.is_relevant(&raw(source, 1, Severity::Error, "x")));
    }

    #[test]
    fn extraction_order_prefers_service_over_driver() {
        let c = classifier();
        let event = raw(
            "Service Control Manager",
            7000,
            Severity::Error,
            r#"The service "Spooler" failed to load driver "usbxhci""#,
        );
        let classified = c.classify(&event);
        assert_eq!(classified.component, Some(ComponentId::service("Spooler")));
    }

    #[test]
    fn extraction_is_case_insensitive() {
        let c = classifier();
        let event = raw("Disk", 1001, Severity::Warning, r#"The SERVICE "wuauserv" hung"#);
        assert_eq!(c.classify(&event).component, Some(ComponentId::service("wuauserv")));
    }

    #[test]
    fn extracts_clsid_components() {
        let c = classifier();
        let event = raw(
            "DCOM",
            10005,
            Severity::Error,
            "DCOM got error from server CLSID {4991D34B-80A1-4291-83B6-3328366B9097}",
        );
        let classified = c.classify(&event);
        assert_eq!(
            classified.component,
            Some(ComponentId::dcom("4991D34B-80A1-4291-83B6-3328366B9097"))
        );
        assert_eq!(classified.category, EventCategory::CriticalCom);
    }

    #[test]
    fn message_without_component_classifies_with_none() {
        let c = classifier();
        let classified = c.classify(&raw("Disk", 6062, Severity::Warning, "controller reset"));
        assert_eq!(classified.component, None);
        assert_eq!(classified.category, EventCategory::HardwareWarning);
    }

    fn category_of(c: &Classifier, level: Severity, msg: &str) -> EventCategory {
        c.classify(&raw("Any", 0, level, msg)).category
    }

    #[test]
    fn error_category_table() {
        let c = classifier();
        assert_eq!(category_of(&c, Severity::Error, "DCOM server start failure"), EventCategory::CriticalCom);
        assert_eq!(category_of(&c, Severity::Error, "The Driver crashed"), EventCategory::CriticalDriver);
        assert_eq!(category_of(&c, Severity::Error, "unexpected termination"), EventCategory::SystemError);
    }

    #[test]
    fn warning_category_table() {
        let c = classifier();
        assert_eq!(
            category_of(&c, Severity::Warning, r#"the Service "x" hung"#),
            EventCategory::ServiceWarning
        );
        assert_eq!(
            category_of(&c, Severity::Warning, "bad sector remapped"),
            EventCategory::HardwareWarning
        );
    }
}
