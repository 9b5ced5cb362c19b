//! Configuration consumed by the registry

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::{Password, Username};

/// Default refresh period, in minutes
pub const DEFAULT_REFRESH_PERIOD_MINUTES: u64 = 10;

/// Default connect timeout, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default overall request timeout, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// A configuration value was rejected
#[derive(Debug, Error)]
#[error("invalid configuration for `{field}`: {reason}")]
pub struct ConfigError {
    /// The offending field
    pub field: &'static str,
    /// Why the value was rejected
    pub reason: &'static str,
}

/// Basic-authentication credentials presented to the metadata origin
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    /// User name
    pub username: Username,
    /// Password
    pub password: Password,
}

/// Settings for retrieving and refreshing the service-provider registry
#[derive(Clone, Debug, Deserialize)]
pub struct RegistryConfig {
    /// URL of the service-provider metadata document
    pub metadata_url: String,
    /// Credentials attached to every request to the origin
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Minutes between refresh cycles
    #[serde(default = "default_refresh_period_minutes")]
    pub refresh_period_minutes: u64,
    /// Seconds allowed for establishing a connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds allowed for a whole request, body included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_refresh_period_minutes() -> u64 {
    DEFAULT_REFRESH_PERIOD_MINUTES
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Converts a refresh period given in minutes, saturating on overflow
#[inline]
pub fn refresh_period_from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

impl RegistryConfig {
    /// Constructs a configuration with default period and timeouts
    pub fn new(metadata_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            credentials,
            refresh_period_minutes: DEFAULT_REFRESH_PERIOD_MINUTES,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// The refresh period
    #[inline]
    pub fn refresh_period(&self) -> Duration {
        refresh_period_from_minutes(self.refresh_period_minutes)
    }

    /// The connect timeout
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The overall request timeout
    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Checks the configuration for values the registry cannot work with
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        #[cfg(feature = "reqwest")]
        self.parsed_url()?;

        if self.credentials.username.as_str().is_empty() {
            return Err(ConfigError {
                field: "username",
                reason: "must not be empty",
            });
        }
        if self.refresh_period_minutes == 0 {
            return Err(ConfigError {
                field: "refresh_period_minutes",
                reason: "must be at least one minute",
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError {
                field: "connect_timeout_secs",
                reason: "must be greater than zero",
            });
        }
        if self.request_timeout_secs < self.connect_timeout_secs {
            return Err(ConfigError {
                field: "request_timeout_secs",
                reason: "must be at least the connect timeout",
            });
        }
        Ok(())
    }

    /// The metadata URL, which must use the `http` or `https` scheme
    #[cfg(feature = "reqwest")]
    fn parsed_url(&self) -> Result<reqwest::Url, ConfigError> {
        let url = reqwest::Url::parse(&self.metadata_url).map_err(|_| ConfigError {
            field: "metadata_url",
            reason: "is not a valid URL",
        })?;

        match url.scheme() {
            "http" | "https" if url.has_host() => Ok(url),
            _ => Err(ConfigError {
                field: "metadata_url",
                reason: "must be an http or https URL",
            }),
        }
    }

    /// Builds the HTTP metadata source described by this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the URL does not
    /// parse, or the HTTP client cannot be built.
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn url_source(&self) -> Result<crate::source::UrlMetadataSource, ConfigError> {
        use crate::source::{url, UrlMetadataSource};

        self.validate()?;
        let parsed = self.parsed_url()?;
        let client = url::build_client(self.connect_timeout(), self.request_timeout()).map_err(
            |err| {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "unable to build HTTP client");
                ConfigError {
                    field: "tls",
                    reason: "HTTP client could not be initialized",
                }
            },
        )?;

        Ok(UrlMetadataSource::with_client(
            client,
            parsed,
            self.credentials.clone(),
        ))
    }
}
