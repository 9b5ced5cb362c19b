use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    config::{refresh_period_from_minutes, DEFAULT_REFRESH_PERIOD_MINUTES},
    parser::{JsonMetadataParser, MetadataParser, ParseError},
    snapshot::{AuthorizationError, RegistrySnapshot},
    source::{FetchError, FetchState, MetadataSource},
    EntityIdRef, Scope, ServiceProviderRecord,
};

/// A refresh cycle failed
///
/// The previously published registry stays in place.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The metadata document could not be retrieved
    #[error("unable to fetch service-provider metadata")]
    Fetch(#[from] FetchError),
    /// The metadata document was retrieved but is not acceptable
    #[error("unable to parse service-provider metadata")]
    Parse(#[from] ParseError),
}

/// The initial registry load failed
///
/// A service that cannot obtain its registry at startup should not start.
#[derive(Debug, Error)]
#[error("unable to load the initial service-provider registry")]
pub struct StartupError(#[from] RefreshError);

impl StartupError {
    /// The failure of the initial refresh cycle
    #[inline]
    pub fn refresh_error(&self) -> &RefreshError {
        &self.0
    }
}

/// What a successful refresh cycle did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The origin reported no change, nothing was fetched
    NotModified,
    /// A document was fetched but carried the published version's marker
    Unchanged,
    /// A new snapshot was published
    Published {
        /// Number of records in the new snapshot
        records: usize,
    },
}

/// Whether a refresh cycle is currently running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryState {
    /// A snapshot is published and no cycle is running
    Ready,
    /// A snapshot is published and a cycle is running
    Refreshing,
}

struct Inner {
    current: ArcSwap<RegistrySnapshot>,
    source: Mutex<Box<dyn MetadataSource>>,
    parser: Box<dyn MetadataParser>,
    period: Duration,
    refreshing: AtomicBool,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Inner")
            .field("records", &self.current.load().len())
            .field("parser", &self.parser)
            .field("period", &self.period)
            .field("refreshing", &self.refreshing)
            .finish_non_exhaustive()
    }
}

/// The service-provider registry
///
/// Cloning is cheap and every clone observes the same published snapshot.
/// Readers never block: each lookup works against whichever snapshot was
/// current when it started, and a refresh replaces the snapshot as a
/// whole.
#[derive(Clone, Debug)]
#[must_use]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Configures a [`Registry`] before its initial load
#[derive(Debug)]
#[must_use]
pub struct RegistryBuilder {
    source: Box<dyn MetadataSource>,
    parser: Box<dyn MetadataParser>,
    period: Duration,
}

impl RegistryBuilder {
    /// Constructs a builder for a registry fed from `source`
    pub fn new<S>(source: S) -> Self
    where
        S: MetadataSource + 'static,
    {
        Self {
            source: Box::new(source),
            parser: Box::new(JsonMetadataParser),
            period: refresh_period_from_minutes(DEFAULT_REFRESH_PERIOD_MINUTES),
        }
    }

    /// Builds a registry fed from the HTTP origin described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn from_config(config: &crate::RegistryConfig) -> Result<Self, crate::ConfigError> {
        Ok(Self::new(config.url_source()?).with_refresh_period(config.refresh_period()))
    }

    /// Replaces the document parser
    pub fn with_parser<P>(mut self, parser: P) -> Self
    where
        P: MetadataParser + 'static,
    {
        self.parser = Box::new(parser);
        self
    }

    /// Sets the period between scheduled refresh cycles
    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Performs the initial load
    ///
    /// The origin is fetched unconditionally. The returned registry always
    /// holds a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or parsed.
    pub async fn load(self) -> Result<Registry, StartupError> {
        let Self {
            mut source,
            parser,
            period,
        } = self;

        let snapshot = match initial_snapshot(source.as_mut(), parser.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                source.record_failure();
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "initial service-provider registry load failed");
                return Err(err.into());
            }
        };

        tracing::info!(
            registry.records = snapshot.len(),
            "service-provider registry loaded"
        );

        Ok(Registry {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(snapshot),
                source: Mutex::new(source),
                parser,
                period,
                refreshing: AtomicBool::new(false),
            }),
        })
    }
}

async fn initial_snapshot(
    source: &mut dyn MetadataSource,
    parser: &dyn MetadataParser,
) -> Result<RegistrySnapshot, RefreshError> {
    let document = source.fetch().await?;
    let records = parser.parse(&document)?;
    source.commit(document.marker());
    Ok(RegistrySnapshot::new(records, document.marker().clone()))
}

/// Marks the registry as refreshing for as long as it is held
struct RefreshingGuard<'a>(&'a AtomicBool);

impl<'a> RefreshingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Registry {
    /// Constructs a builder for a registry fed from `source`
    pub fn builder<S>(source: S) -> RegistryBuilder
    where
        S: MetadataSource + 'static,
    {
        RegistryBuilder::new(source)
    }

    /// The currently published snapshot
    ///
    /// Holding on to the snapshot keeps it alive, even after a newer one has
    /// been published.
    #[inline]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.current.load_full()
    }

    /// Looks up a service provider by entity id
    pub fn get(&self, id: &EntityIdRef) -> Option<Arc<ServiceProviderRecord>> {
        self.inner.current.load().get(id).cloned()
    }

    /// Whether a service provider with this entity id is known
    pub fn contains(&self, id: &EntityIdRef) -> bool {
        self.inner.current.load().contains(id)
    }

    /// All currently known service providers, ordered by entity id
    pub fn service_providers(&self) -> Vec<Arc<ServiceProviderRecord>> {
        self.inner.current.load().iter().cloned().collect()
    }

    /// Number of currently known service providers
    pub fn len(&self) -> usize {
        self.inner.current.load().len()
    }

    /// Whether no service providers are currently known
    pub fn is_empty(&self) -> bool {
        self.inner.current.load().is_empty()
    }

    /// Checks that the service provider is known and granted all of `requested`
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown or lacks a requested
    /// scope token.
    pub fn authorize(
        &self,
        id: &EntityIdRef,
        requested: &Scope,
    ) -> Result<Arc<ServiceProviderRecord>, AuthorizationError> {
        self.inner
            .current
            .load()
            .authorize(id, requested)
            .map(Arc::clone)
    }

    /// Whether a refresh cycle is running
    pub fn state(&self) -> RegistryState {
        if self.inner.refreshing.load(Ordering::Acquire) {
            RegistryState::Refreshing
        } else {
            RegistryState::Ready
        }
    }

    /// The period between scheduled refresh cycles
    #[inline]
    pub fn refresh_period(&self) -> Duration {
        self.inner.period
    }

    /// A copy of the source's fetch bookkeeping
    ///
    /// Waits for an in-flight refresh cycle to finish.
    pub async fn fetch_state(&self) -> FetchState {
        self.inner.source.lock().await.fetch_state().clone()
    }

    /// Runs one refresh cycle now, skipping the fetch if the origin
    /// reports no change
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or parsed. The
    /// published snapshot is left in place.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, RefreshError> {
        self.run_cycle(true).await
    }

    /// Runs one refresh cycle now, fetching the document regardless of
    /// what the origin reports
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or parsed. The
    /// published snapshot is left in place.
    #[tracing::instrument(skip(self))]
    pub async fn reload(&self) -> Result<RefreshOutcome, RefreshError> {
        self.run_cycle(false).await
    }

    async fn run_cycle(&self, probe: bool) -> Result<RefreshOutcome, RefreshError> {
        let mut source = self.inner.source.lock().await;
        let _refreshing = RefreshingGuard::new(&self.inner.refreshing);

        if probe && !source.is_modified(self.inner.period).await {
            tracing::debug!("service-provider metadata not modified");
            return Ok(RefreshOutcome::NotModified);
        }

        let document = match source.fetch().await {
            Ok(document) => document,
            Err(err) => {
                source.record_failure();
                return Err(err.into());
            }
        };

        if document
            .marker()
            .identifies_same_version(self.inner.current.load().version())
        {
            source.commit(document.marker());
            tracing::debug!("fetched metadata matches the published version");
            return Ok(RefreshOutcome::Unchanged);
        }

        let records = match self.inner.parser.parse(&document) {
            Ok(records) => records,
            Err(err) => {
                source.record_failure();
                return Err(err.into());
            }
        };

        let count = records.len();
        self.inner.current.store(Arc::new(RegistrySnapshot::new(
            records,
            document.marker().clone(),
        )));
        source.commit(document.marker());

        tracing::info!(registry.records = count, "service-provider registry refreshed");
        Ok(RefreshOutcome::Published { records: count })
    }
}
