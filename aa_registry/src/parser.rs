//! Turning raw metadata documents into service-provider records

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::{source::RawDocument, EntityId, EntityIdRef, ServiceProviderRecord};

/// A malformed metadata document
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not valid JSON or violates the record schema
    #[error("malformed metadata document")]
    Json(#[from] serde_json::Error),
    /// Two records share an entity id
    #[error("duplicate service provider entity id: {0}")]
    DuplicateEntityId(EntityId),
}

/// Parses a raw document into a set of records
///
/// Implementations must be pure: the same document always yields the same
/// set or the same error, and no partial set is ever returned.
pub trait MetadataParser: fmt::Debug + Send + Sync {
    /// Parses `document`
    fn parse(&self, document: &RawDocument) -> Result<ServiceProviderSet, ParseError>;
}

/// Parses JSON documents
///
/// Both a bare array of records and an object with a `serviceProviders`
/// array are accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMetadataParser;

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentDto {
    Bare(Vec<ServiceProviderRecord>),
    #[serde(rename_all = "camelCase")]
    Wrapped {
        service_providers: Vec<ServiceProviderRecord>,
    },
}

impl MetadataParser for JsonMetadataParser {
    fn parse(&self, document: &RawDocument) -> Result<ServiceProviderSet, ParseError> {
        let records = match serde_json::from_slice(document.body())? {
            DocumentDto::Bare(records) => records,
            DocumentDto::Wrapped { service_providers } => service_providers,
        };

        ServiceProviderSet::try_from_records(records)
    }
}

/// A set of service-provider records with unique entity ids
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceProviderSet(BTreeMap<EntityId, Arc<ServiceProviderRecord>>);

impl ServiceProviderSet {
    /// Collects records, rejecting duplicate entity ids
    pub fn try_from_records<I>(records: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = ServiceProviderRecord>,
    {
        let mut set = BTreeMap::new();
        for record in records {
            let id = record.entity_id().to_owned();
            if set.contains_key(&id) {
                return Err(ParseError::DuplicateEntityId(id));
            }
            set.insert(id, Arc::new(record));
        }
        Ok(Self(set))
    }

    /// Looks up a record by entity id
    #[inline]
    pub fn get(&self, id: &EntityIdRef) -> Option<&Arc<ServiceProviderRecord>> {
        self.0.get(id)
    }

    /// Number of records
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no records
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records ordered by entity id
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceProviderRecord>> {
        self.0.values()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::{source::ModificationMarker, test};

    fn document(body: &str) -> RawDocument {
        RawDocument::new(body.as_bytes().to_vec(), ModificationMarker::default())
    }

    #[test]
    fn parses_fixture() -> Result<()> {
        let set = JsonMetadataParser.parse(&document(test::SERVICE_PROVIDERS))?;

        assert_eq!(set.len(), 4);
        let ids: Vec<_> = set.iter().map(|r| r.entity_id().as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        Ok(())
    }

    #[test]
    fn parses_wrapped_document() -> Result<()> {
        let set = JsonMetadataParser.parse(&document(
            r#"{ "serviceProviders": [ { "entityId": "a" }, { "entityId": "b" } ] }"#,
        ))?;

        assert_eq!(set.len(), 2);
        assert!(set.get(EntityIdRef::from_str("b")?).is_some());
        Ok(())
    }

    #[test]
    fn empty_document_is_an_empty_set() -> Result<()> {
        let set = JsonMetadataParser.parse(&document("[]"))?;
        assert!(set.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_duplicates() {
        let result =
            JsonMetadataParser.parse(&document(r#"[ { "entityId": "a" }, { "entityId": "a" } ]"#));

        match result {
            Err(ParseError::DuplicateEntityId(id)) => assert_eq!(id.as_str(), "a"),
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for body in [
            "",
            "{",
            r#"{ "entityId": "not-a-list" }"#,
            r#"[ { "name": "no id" } ]"#,
            r#"[ { "entityId": "a", "scope": "bad\\token" } ]"#,
        ] {
            let result = JsonMetadataParser.parse(&document(body));
            assert!(
                matches!(result, Err(ParseError::Json(_))),
                "accepted {:?}",
                body
            );
        }
    }

    #[test]
    fn rejects_invalid_utf8() {
        let raw = RawDocument::new(vec![b'[', 0xff, b']'], ModificationMarker::default());
        assert!(matches!(
            JsonMetadataParser.parse(&raw),
            Err(ParseError::Json(_))
        ));
    }
}
