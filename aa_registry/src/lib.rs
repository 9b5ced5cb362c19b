//! A service-provider metadata registry that stays fresh on its own
//!
//! The registry is loaded from a metadata origin once at startup and then
//! kept current by a background task that asks the origin whether anything
//! changed (`HEAD` with `If-Modified-Since`) before downloading the full
//! document again. Readers always see one complete snapshot and are never
//! blocked by a refresh. A failed refresh leaves the previous snapshot in
//! place.
//!
//! ```no_run
//! use aa_registry::{Credentials, Password, Registry, RegistryBuilder, RegistryConfig, Username};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig::new(
//!     "https://metadata.example.org/service-providers.json",
//!     Credentials {
//!         username: Username::from_static("aa"),
//!         password: Password::new("secret".to_owned()),
//!     },
//! );
//!
//! let registry: Registry = RegistryBuilder::from_config(&config)?.load().await?;
//! let _refresh = registry.spawn_refresh();
//!
//! for sp in registry.service_providers() {
//!     println!("{}", sp.entity_id());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! The `reqwest` feature (on by default) provides the HTTP origin. This
//! crate does not enable TLS support in `reqwest` itself. If your
//! application already uses `reqwest` with some TLS settings, those are
//! picked up automatically. Otherwise enable the `default-tls` or
//! `rustls-tls` feature to be able to reach an HTTPS origin.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod config;
pub mod parser;
mod record;
mod refresher;
mod registry;
pub mod scope;
mod snapshot;
pub mod source;


pub use braids::*;
pub use config::{
    refresh_period_from_minutes, ConfigError, Credentials, RegistryConfig,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REFRESH_PERIOD_MINUTES, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use parser::{JsonMetadataParser, MetadataParser, ParseError, ServiceProviderSet};
pub use record::{DisplayMetadata, ServiceProviderRecord};
pub use refresher::RefreshTask;
pub use registry::{
    RefreshError, RefreshOutcome, Registry, RegistryBuilder, RegistryState, StartupError,
};
pub use scope::Scope;
pub use snapshot::{AuthorizationError, RegistrySnapshot};
pub use source::{FetchError, FetchState, MetadataSource, ModificationMarker, RawDocument};
