use std::sync::Arc;

use thiserror::Error;

use crate::{
    parser::ServiceProviderSet, source::ModificationMarker, EntityIdRef, Scope,
    ServiceProviderRecord,
};

/// A caller could not be authorized on behalf of a service provider
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// No record exists for the entity id
    #[error("unknown service provider")]
    UnknownServiceProvider,
    /// The service provider is not authorized for every requested scope token
    #[error("insufficient scope")]
    InsufficientScope,
}

/// The immutable, published view of the service-provider registry
#[derive(Debug)]
pub struct RegistrySnapshot {
    records: ServiceProviderSet,
    version: ModificationMarker,
}

impl RegistrySnapshot {
    pub(crate) fn new(records: ServiceProviderSet, version: ModificationMarker) -> Self {
        Self { records, version }
    }

    pub(crate) fn version(&self) -> &ModificationMarker {
        &self.version
    }

    /// Looks up a service provider by entity id
    #[inline]
    pub fn get(&self, id: &EntityIdRef) -> Option<&Arc<ServiceProviderRecord>> {
        self.records.get(id)
    }

    /// Whether a service provider with this entity id is known
    #[inline]
    pub fn contains(&self, id: &EntityIdRef) -> bool {
        self.records.get(id).is_some()
    }

    /// All service providers, ordered by entity id
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceProviderRecord>> {
        self.records.iter()
    }

    /// Number of service providers
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Checks that the service provider is known and granted all of `requested`
    pub fn authorize(
        &self,
        id: &EntityIdRef,
        requested: &Scope,
    ) -> Result<&Arc<ServiceProviderRecord>, AuthorizationError> {
        let record = self.get(id).ok_or_else(|| {
            tracing::debug!(entity_id = %id, "unknown service provider");
            AuthorizationError::UnknownServiceProvider
        })?;

        if record.scope().contains_all(requested) {
            Ok(record)
        } else {
            tracing::debug!(entity_id = %id, "service provider lacks requested scope");
            Err(AuthorizationError::InsufficientScope)
        }
    }
}
