//! Maps each resource kind to the connector that handles it.

use std::collections::HashMap;
use std::sync::Arc;

use silo_core::ResourceKind;
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::external::Connector;

/// Populated once at startup, read by every pass.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<ResourceKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn builder() -> ConnectorRegistryBuilder {
        ConnectorRegistryBuilder::default()
    }

    /// The connector for `kind`.
    pub fn get(&self, kind: ResourceKind) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or(ReconcileError::UnsupportedKind { kind })
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.connectors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

/// Builder for [`ConnectorRegistry`].
#[derive(Default)]
pub struct ConnectorRegistryBuilder {
    connectors: HashMap<ResourceKind, Arc<dyn Connector>>,
}

impl ConnectorRegistryBuilder {
    /// Register a connector under its own kind. A later registration for the
    /// same kind replaces the earlier one.
    #[must_use]
    pub fn register(mut self, connector: Arc<dyn Connector>) -> Self {
        let kind = connector.kind();
        if self.connectors.insert(kind, connector).is_some() {
            debug!(kind = %kind, "Replacing registered connector");
        }
        self
    }

    pub fn build(self) -> ConnectorRegistry {
        ConnectorRegistry {
            connectors: self.connectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, MemoryClientFactory, Profile, ProfileResolver};
    use crate::kinds::{KindSettings, register_all};
    use crate::remote::memory::InMemoryControlPlane;

    fn gateway() -> Arc<Gateway> {
        let resolver = ProfileResolver::single(Profile::new(
            "http://localhost:9000",
            "access",
            "secret",
        ));
        let factory = MemoryClientFactory::new(InMemoryControlPlane::new_arc());
        Arc::new(Gateway::new(Arc::new(resolver), Arc::new(factory)))
    }

    #[test]
    fn test_empty_registry_rejects_every_kind() {
        let registry = ConnectorRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(ResourceKind::Bucket),
            Err(ReconcileError::UnsupportedKind {
                kind: ResourceKind::Bucket
            })
        ));
    }

    #[test]
    fn test_register_all_covers_every_kind() {
        let registry =
            register_all(ConnectorRegistry::builder(), &gateway(), KindSettings::default()).build();
        assert_eq!(registry.len(), ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            assert!(registry.get(kind).is_ok_and(|c| c.kind() == kind));
        }
    }
}
