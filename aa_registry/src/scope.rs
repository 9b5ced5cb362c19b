//! Scope a service provider is allowed to request
//!
//! Metadata documents list, per service provider, the scope tokens it may
//! ask the aggregation endpoints for. A request is authorized only if every
//! token it carries appears in the provider's list.

use std::{collections::hash_set, convert::Infallible, str::FromStr};

use ahash::AHashSet;
use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A scope token found in metadata or in a request that cannot be used
#[derive(Debug, Error)]
pub enum InvalidScopeToken {
    /// The token was empty
    #[error("scope token cannot be empty")]
    EmptyString,
    /// The token holds a byte outside the printable ASCII range, a space,
    /// a double quote or a backslash
    #[error("scope token has disallowed byte 0x{value:02x} at offset {position}")]
    InvalidByte {
        /// Offset of the offending byte
        position: usize,
        /// The offending byte
        value: u8,
    },
}

impl From<Infallible> for InvalidScopeToken {
    #[inline]
    fn from(x: Infallible) -> Self {
        match x {}
    }
}

/// One token of a service provider's scope, such as `attribute-aggregation`
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed [`ScopeToken`]"
)]
pub struct ScopeToken;

const fn allowed_in_scope_token(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x5B | 0x5D..=0x7E)
}

impl aliri_braid::Validator for ScopeToken {
    type Error = InvalidScopeToken;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            return Err(InvalidScopeToken::EmptyString);
        }

        match s.bytes().position(|b| !allowed_in_scope_token(b)) {
            Some(position) => Err(InvalidScopeToken::InvalidByte {
                position,
                value: s.as_bytes()[position],
            }),
            None => Ok(()),
        }
    }
}

/// Wire forms of a scope in metadata: `"a b c"` or `["a", "b", "c"]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopeDto {
    Delimited(String),
    Listed(Vec<ScopeToken>),
}

impl TryFrom<Option<ScopeDto>> for Scope {
    type Error = InvalidScopeToken;

    fn try_from(dto: Option<ScopeDto>) -> Result<Self, Self::Error> {
        match dto {
            Some(ScopeDto::Delimited(s)) => Self::try_from(s.as_str()),
            Some(ScopeDto::Listed(tokens)) => Ok(tokens.into_iter().collect()),
            None => Ok(Self::empty()),
        }
    }
}

impl From<Scope> for ScopeDto {
    fn from(s: Scope) -> Self {
        let mut tokens: Vec<_> = s.0.into_iter().map(ScopeToken::take).collect();
        tokens.sort_unstable();
        ScopeDto::Delimited(tokens.join(" "))
    }
}

/// The scope tokens granted to a service provider, or asked for by a caller
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Option<ScopeDto>", into = "ScopeDto")]
pub struct Scope(AHashSet<ScopeToken>);

impl Scope {
    /// A scope without tokens
    ///
    /// Granted to providers whose metadata lists no scope; as a request it
    /// is satisfied by every provider.
    #[inline]
    pub fn empty() -> Self {
        Self(AHashSet::new())
    }

    /// Whether there are no tokens
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct tokens
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The tokens, in no particular order
    #[inline]
    pub fn iter(&self) -> Tokens<'_> {
        Tokens(self.0.iter())
    }

    /// Whether every token of `requested` is also in this scope
    #[inline]
    pub fn contains_all(&self, requested: &Scope) -> bool {
        requested.0.is_subset(&self.0)
    }
}

/// Borrowed tokens of a [`Scope`]
#[derive(Clone, Debug)]
pub struct Tokens<'a>(hash_set::Iter<'a, ScopeToken>);

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a ScopeTokenRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|t| t.as_ref())
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> IntoIterator for &'a Scope {
    type Item = &'a ScopeTokenRef;
    type IntoIter = Tokens<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<ScopeToken> for Scope {
    #[inline]
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = ScopeToken>,
    {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<&'_ str> for Scope {
    type Error = InvalidScopeToken;

    #[inline]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.split_whitespace()
            .map(|t| ScopeToken::new(t.to_owned()))
            .collect()
    }
}

impl FromStr for Scope {
    type Err = InvalidScopeToken;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_delimited_scope() {
        let scope: Scope = "read   aggregate".parse().unwrap();
        assert_eq!(scope.len(), 2);
        assert!(scope.contains_all(&"aggregate".parse().unwrap()));
    }

    #[test]
    fn rejects_invalid_token() {
        let x = ScopeToken::new("attribute\"aggregation\"".to_owned());
        assert!(matches!(
            x,
            Err(InvalidScopeToken::InvalidByte {
                position: 9,
                value: b'"'
            })
        ));
    }

    #[test]
    fn empty_scope_is_subset_of_everything() {
        let granted: Scope = "read".parse().unwrap();
        assert!(granted.contains_all(&Scope::empty()));
        assert!(!Scope::empty().contains_all(&granted));
    }

    #[test]
    fn deserializes_string_array_and_null() {
        let from_string: Scope = serde_json::from_str(r#""b a""#).unwrap();
        let from_array: Scope = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        let from_null: Scope = serde_json::from_str("null").unwrap();

        assert_eq!(from_string, from_array);
        assert!(from_null.is_empty());
    }

    #[test]
    fn iterates_every_token_once() {
        let scope: Scope = "groups orcid groups".parse().unwrap();
        let mut tokens: Vec<_> = scope.iter().map(|t| t.as_str()).collect();
        tokens.sort_unstable();
        assert_eq!(tokens, ["groups", "orcid"]);
        assert_eq!((&scope).into_iter().count(), scope.len());
    }

    #[test]
    fn serializes_sorted_string() {
        let scope: Scope = "write read".parse().unwrap();
        assert_eq!(serde_json::to_string(&scope).unwrap(), r#""read write""#);
    }

    #[test]
    fn invalid_token_in_array_fails_to_deserialize() {
        let scope = serde_json::from_str::<Scope>(r#"["ok", ""]"#);
        assert!(scope.is_err());
    }
}
