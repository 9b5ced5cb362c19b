use std::{convert::Infallible, fmt};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An invalid service-provider entity identifier
#[derive(Debug, Error)]
pub enum InvalidEntityId {
    /// The identifier was the empty string
    #[error("entity id cannot be empty")]
    EmptyString,
    /// The identifier starts or ends with whitespace
    #[error("entity id cannot start or end with whitespace")]
    SurroundingWhitespace,
}

impl From<Infallible> for InvalidEntityId {
    #[inline]
    fn from(x: Infallible) -> Self {
        match x {}
    }
}

/// The entity identifier of a service provider
///
/// Usually the SAML entity ID or OAuth2 client ID of the relying party,
/// compared byte for byte.
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed reference to a service provider's [`EntityId`]"
)]
pub struct EntityId;

impl aliri_braid::Validator for EntityId {
    type Error = InvalidEntityId;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidEntityId::EmptyString)
        } else if s.trim() != s {
            Err(InvalidEntityId::SurroundingWhitespace)
        } else {
            Ok(())
        }
    }
}

/// The name of a user attribute a service provider may receive
#[braid(serde)]
pub struct AttributeName;

/// The user name presented to the metadata origin
#[braid(serde)]
pub struct Username;

/// The password presented to the metadata origin
///
/// Formatting never reveals the value unless the alternate flag is used,
/// and even then only a short prefix is shown by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    /// Wraps an owned password
    #[inline]
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    /// Wraps a static password
    #[inline]
    pub fn from_static(raw: &'static str) -> Self {
        Self(raw.to_owned())
    }

    /// The password in the clear
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Password {
    #[inline]
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&'_ str> for Password {
    #[inline]
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

limited_reveal!(Password: "PASSWORD", 3);
