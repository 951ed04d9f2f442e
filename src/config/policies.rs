//! Compiled policy bundle and its atomic swap handle.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{ConfigError, GuardianConfig};
use crate::classifier::Classifier;
use crate::graph::DependencyGraph;
use crate::types::ComponentId;

/// Everything hot-reloadable, compiled from one config document.
///
/// Swapped as a unit: an event never sees the new classifier with the old
/// graph, or vice versa.
pub struct Policies {
    pub classifier: Classifier,
    pub graph: DependencyGraph,
    /// Driver name -> reinstall source artifact.
    pub driver_map: HashMap<String, PathBuf>,
}

impl Policies {
    /// Compile the policy portion of a config document. Fails on malformed
    /// component ids or unbuildable patterns; the caller keeps whatever
    /// policy it already had.
    pub fn compile(config: &GuardianConfig) -> Result<Self, ConfigError> {
        let classifier = Classifier::new(&config.events)?;

        let mut edges: HashMap<ComponentId, Vec<ComponentId>> = HashMap::new();
        for (origin, targets) in &config.dependencies {
            let origin = ComponentId::parse(origin)
                .ok_or_else(|| ConfigError::ComponentId(origin.clone()))?;
            let mut impact = Vec::with_capacity(targets.len());
            for target in targets {
                impact.push(
                    ComponentId::parse(target)
                        .ok_or_else(|| ConfigError::ComponentId(target.clone()))?,
                );
            }
            edges.insert(origin, impact);
        }

        Ok(Self {
            classifier,
            graph: DependencyGraph::new(edges),
            driver_map: config.drivers.clone(),
        })
    }
}

/// Shared, atomically swappable policy bundle.
pub struct PolicyHandle {
    inner: ArcSwap<Policies>,
}

impl PolicyHandle {
    pub fn new(policies: Policies) -> Arc<Self> {
        Arc::new(Self { inner: ArcSwap::from_pointee(policies) })
    }

    /// Cheap read guard for the current bundle. Callers should finish with
    /// the guard inside one statement and not hold it across awaits.
    pub fn load(&self) -> arc_swap::Guard<Arc<Policies>> {
        self.inner.load()
    }

    /// Replace the whole bundle in one atomic store.
    pub fn swap(&self, policies: Policies) {
        let origins = policies.graph.origin_count();
        self.inner.store(Arc::new(policies));
        info!(dependency_origins = origins, "Policies reloaded");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::{RawEvent, Severity};

    fn raw_warning(source: &str) -> RawEvent {
        RawEvent {
            timestamp: Utc::now(),
            source: source.to_string(),
            event_id: 1,
            level: Severity::Warning,
            message: "x".to_string(),
        }
    }

    #[test]
    fn compile_builds_graph_and_driver_map() {
        let config: GuardianConfig = toml::from_str(
            r#"
            [dependencies]
            "service:AppHost" = ["service:Worker"]

            [drivers]
            netkvm = "/drivers/netkvm.inf"
            "#,
        )
        .unwrap();
        let policies = Policies::compile(&config).unwrap();

        let affected = policies.graph.affected_by(&ComponentId::service("AppHost"));
        assert!(affected.contains(&ComponentId::service("Worker")));
        assert_eq!(policies.driver_map["netkvm"], PathBuf::from("/drivers/netkvm.inf"));
    }

    #[test]
    fn compile_rejects_malformed_dependency_ids() {
        let config: GuardianConfig = toml::from_str(
            r#"
            [dependencies]
            "AppHost" = ["service:Worker"]
            "#,
        )
        .unwrap();
        assert!(matches!(
            Policies::compile(&config),
            Err(ConfigError::ComponentId(id)) if id == "AppHost"
        ));
    }

    #[test]
    fn swap_replaces_the_visible_bundle() {
        let stock = Policies::compile(&GuardianConfig::default()).unwrap();
        let handle = PolicyHandle::new(stock);
        assert!(handle.load().classifier.is_relevant(&raw_warning("Disk")));

        let narrowed: GuardianConfig = toml::from_str(
            r#"
            [events]
            warning_sources = ["OnlyThis"]
            warning_ids = []
            "#,
        )
        .unwrap();
        handle.swap(Policies::compile(&narrowed).unwrap());

        assert!(!handle.load().classifier.is_relevant(&raw_warning("Disk")));
        assert!(handle.load().classifier.is_relevant(&raw_warning("OnlyThis")));
    }
}
