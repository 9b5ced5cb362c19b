use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{AttributeName, AttributeNameRef, EntityId, EntityIdRef, Scope};

/// Human-facing descriptive metadata of a service provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetadata {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Location of a logo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// A trusted relying party's metadata entry
///
/// Records are immutable once parsed. A refresh replaces the whole
/// registry rather than editing records in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderRecord {
    entity_id: EntityId,
    #[serde(flatten)]
    display: DisplayMetadata,
    #[serde(default)]
    attribute_aggregation_required: bool,
    #[serde(default)]
    allowed_attributes: BTreeSet<AttributeName>,
    #[serde(default)]
    scope: Scope,
}

impl ServiceProviderRecord {
    /// Constructs a record with no display metadata, attributes or scope
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            display: DisplayMetadata::default(),
            attribute_aggregation_required: false,
            allowed_attributes: BTreeSet::new(),
            scope: Scope::empty(),
        }
    }

    /// Sets the display metadata
    pub fn with_display(mut self, display: DisplayMetadata) -> Self {
        self.display = display;
        self
    }

    /// Sets the scope the provider is authorized to request
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Adds attributes the provider may receive
    pub fn with_allowed_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = AttributeName>,
    {
        self.allowed_attributes.extend(attributes);
        self
    }

    /// Marks whether attribute aggregation must run for this provider
    pub fn with_attribute_aggregation_required(mut self, required: bool) -> Self {
        self.attribute_aggregation_required = required;
        self
    }

    /// The provider's unique entity identifier
    #[inline]
    pub fn entity_id(&self) -> &EntityIdRef {
        &self.entity_id
    }

    /// Descriptive metadata
    #[inline]
    pub fn display(&self) -> &DisplayMetadata {
        &self.display
    }

    /// Whether attribute aggregation must run for this provider
    #[inline]
    pub fn attribute_aggregation_required(&self) -> bool {
        self.attribute_aggregation_required
    }

    /// The scope this provider is authorized to request
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Attribute names this provider may receive, in order
    #[inline]
    pub fn allowed_attributes(&self) -> impl Iterator<Item = &AttributeNameRef> {
        self.allowed_attributes.iter().map(|a| a.as_ref())
    }

    /// Whether `attribute` may be released to this provider
    #[inline]
    pub fn may_receive(&self, attribute: &AttributeNameRef) -> bool {
        self.allowed_attributes.contains(attribute)
    }
}
