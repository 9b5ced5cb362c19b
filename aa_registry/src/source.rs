//! Origins of service-provider metadata documents

use std::{fmt, io, time::Duration};

use aa_clock::UnixTime;
use async_trait::async_trait;
use thiserror::Error;

pub mod file;
#[cfg(feature = "reqwest")]
pub mod url;

pub use file::FileMetadataSource;
#[cfg(feature = "reqwest")]
pub use url::UrlMetadataSource;

/// An error retrieving a metadata document
///
/// Authentication failures are reported the same way as any other
/// unsuccessful response.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Unable to send the request or receive a response, including timeouts
    #[cfg(feature = "reqwest")]
    #[error("error sending request to metadata origin")]
    Request(#[source] reqwest::Error),
    /// The origin answered with a non-success status
    #[error("metadata origin responded with status {status}")]
    Status {
        /// The HTTP status code
        status: u16,
    },
    /// Unable to read the response body
    #[cfg(feature = "reqwest")]
    #[error("error reading metadata response body")]
    Body(#[source] reqwest::Error),
    /// Unable to read a local metadata document
    #[error("error reading local metadata document")]
    Io(#[from] io::Error),
}

/// The version information an origin advertised for a document
///
/// Opaque to readers. It only decides whether a later fetch would be
/// redundant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModificationMarker {
    /// When the origin last changed the document
    pub last_modified: Option<UnixTime>,
    /// The origin's entity tag for the document
    pub etag: Option<String>,
}

impl ModificationMarker {
    /// Whether the origin advertised nothing at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_modified.is_none() && self.etag.is_none()
    }

    /// Whether both markers positively identify the same document version
    pub fn identifies_same_version(&self, other: &Self) -> bool {
        match (&self.etag, &other.etag) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.last_modified.is_some() && self.last_modified == other.last_modified,
            _ => false,
        }
    }
}

/// A raw metadata document and the marker it was served with
#[derive(Clone, Debug)]
pub struct RawDocument {
    body: Vec<u8>,
    marker: ModificationMarker,
}

impl RawDocument {
    /// Constructs a document from its body and version marker
    pub fn new(body: impl Into<Vec<u8>>, marker: ModificationMarker) -> Self {
        Self {
            body: body.into(),
            marker,
        }
    }

    /// The document body
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The version marker advertised with the body
    #[inline]
    pub fn marker(&self) -> &ModificationMarker {
        &self.marker
    }
}

/// Per-source bookkeeping of probe and fetch attempts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchState {
    last_attempt: Option<UnixTime>,
    last_success: Option<UnixTime>,
    marker: ModificationMarker,
    consecutive_failures: u32,
}

impl FetchState {
    /// Notes that a probe or fetch was started at `now`
    pub fn record_attempt(&mut self, now: UnixTime) {
        self.last_attempt = Some(now);
    }

    /// Notes that a document carrying `marker` was fetched, parsed and published
    ///
    /// The `last_modified` marker never moves backwards. An origin that
    /// stops sending an ETag keeps the previously recorded one until it
    /// sends a new one.
    pub fn record_success(&mut self, now: UnixTime, marker: &ModificationMarker) {
        self.last_attempt = Some(now);
        self.last_success = Some(now);
        self.consecutive_failures = 0;

        if marker.last_modified < self.marker.last_modified {
            tracing::debug!(
                recorded = ?self.marker.last_modified,
                offered = ?marker.last_modified,
                "origin did not advertise a newer modification time, keeping the recorded one"
            );
        } else {
            self.marker.last_modified = marker.last_modified;
        }

        if let Some(etag) = &marker.etag {
            self.marker.etag = Some(etag.clone());
        }
    }

    /// Notes a failed cycle, leaving the modification marker untouched
    pub fn record_failure(&mut self, now: UnixTime) {
        self.last_attempt = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// When the last probe or fetch was started
    #[inline]
    pub fn last_attempt(&self) -> Option<UnixTime> {
        self.last_attempt
    }

    /// When a document was last published from this source
    #[inline]
    pub fn last_success(&self) -> Option<UnixTime> {
        self.last_success
    }

    /// The marker of the last published document
    #[inline]
    pub fn marker(&self) -> &ModificationMarker {
        &self.marker
    }

    /// Failed cycles since the last success
    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// An origin of service-provider metadata documents
///
/// A source owns its [`FetchState`]. The registry reports the outcome of
/// each cycle back through [`commit`](Self::commit) and
/// [`record_failure`](Self::record_failure), so that the modification
/// marker only advances once a document has actually been published.
#[async_trait]
pub trait MetadataSource: fmt::Debug + Send + Sync {
    /// Cheaply checks whether the origin may hold a newer document
    ///
    /// Returns `true` when nothing has been published yet. Returns `false`
    /// only when the origin positively confirms the document is unchanged;
    /// a failed probe counts as modified. `max_age` is the refresh period,
    /// used when the origin never advertised a modification time.
    async fn is_modified(&mut self, max_age: Duration) -> bool;

    /// Retrieves the full document
    async fn fetch(&mut self) -> Result<RawDocument, FetchError>;

    /// Records that a document carrying `marker` was published
    fn commit(&mut self, marker: &ModificationMarker);

    /// Records that a cycle failed to fetch or parse a document
    fn record_failure(&mut self);

    /// The source's bookkeeping
    fn fetch_state(&self) -> &FetchState;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(last_modified: Option<u64>, etag: Option<&str>) -> ModificationMarker {
        ModificationMarker {
            last_modified: last_modified.map(UnixTime),
            etag: etag.map(str::to_owned),
        }
    }

    #[test]
    fn marker_only_moves_forward() {
        let mut state = FetchState::default();

        state.record_success(UnixTime(100), &marker(Some(50), None));
        state.record_success(UnixTime(200), &marker(Some(40), None));

        assert_eq!(state.marker().last_modified, Some(UnixTime(50)));
        assert_eq!(state.last_success(), Some(UnixTime(200)));
    }

    #[test]
    fn failure_keeps_marker_and_counts() {
        let mut state = FetchState::default();
        state.record_success(UnixTime(100), &marker(Some(50), Some("\"v1\"")));

        state.record_failure(UnixTime(160));
        state.record_failure(UnixTime(220));

        assert_eq!(state.consecutive_failures(), 2);
        assert_eq!(state.last_attempt(), Some(UnixTime(220)));
        assert_eq!(state.last_success(), Some(UnixTime(100)));
        assert_eq!(state.marker(), &marker(Some(50), Some("\"v1\"")));

        state.record_success(UnixTime(280), &marker(Some(60), None));
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.marker(), &marker(Some(60), Some("\"v1\"")));
    }

    #[test]
    fn same_version_needs_positive_identification() {
        assert!(marker(None, Some("a")).identifies_same_version(&marker(Some(1), Some("a"))));
        assert!(!marker(None, Some("a")).identifies_same_version(&marker(None, Some("b"))));
        assert!(marker(Some(5), None).identifies_same_version(&marker(Some(5), None)));
        assert!(!marker(None, None).identifies_same_version(&marker(None, None)));
        assert!(!marker(Some(5), Some("a")).identifies_same_version(&marker(Some(5), None)));
    }
}
