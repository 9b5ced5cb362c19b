//! A metadata source served over HTTP(S)

use std::time::Duration;

use aa_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode, Url};

use super::{FetchError, FetchState, MetadataSource, ModificationMarker, RawDocument};
use crate::Credentials;

/// Connect timeout applied by [`UrlMetadataSource::new`]
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall request timeout applied by [`UrlMetadataSource::new`]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a client with bounded connect and request timeouts
///
/// # Errors
///
/// Returns an error if the underlying TLS backend cannot be initialized.
pub fn build_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("aa_registry/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
}

/// A metadata source that retrieves the document from a remote URL
///
/// Every request carries the configured credentials as HTTP basic
/// authentication. The staleness probe is a `HEAD` request with
/// `If-Modified-Since` (and `If-None-Match` once an ETag is known).
#[derive(Debug)]
pub struct UrlMetadataSource<C = System> {
    client: Client,
    url: Url,
    credentials: Credentials,
    state: FetchState,
    clock: C,
}

impl UrlMetadataSource {
    /// Constructs a source using a client with the default timeouts
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, credentials: Credentials) -> Result<Self, reqwest::Error> {
        let client = build_client(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_client(client, url, credentials))
    }

    /// Constructs a source using an existing client
    ///
    /// The client should have been built with connect and request
    /// timeouts, see [`build_client`].
    pub fn with_client(client: Client, url: Url, credentials: Credentials) -> Self {
        Self {
            client,
            url,
            credentials,
            state: FetchState::default(),
            clock: System,
        }
    }
}

impl<C> UrlMetadataSource<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> UrlMetadataSource<D> {
        UrlMetadataSource {
            client: self.client,
            url: self.url,
            credentials: self.credentials,
            state: self.state,
            clock,
        }
    }

    /// The origin URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(
            self.credentials.username.as_str(),
            Some(self.credentials.password.as_str()),
        )
    }
}

fn marker_from_headers(headers: &header::HeaderMap) -> ModificationMarker {
    let last_modified = headers.get(header::LAST_MODIFIED).and_then(|v| {
        let parsed = v.to_str().ok().and_then(UnixTime::parse_http_date);
        if parsed.is_none() {
            tracing::warn!(last_modified = ?v, "ignoring unparseable Last-Modified header");
        }
        parsed
    });
    let etag = headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    ModificationMarker {
        last_modified,
        etag,
    }
}

#[async_trait]
impl<C: Clock + std::fmt::Debug + Send + Sync> MetadataSource for UrlMetadataSource<C> {
    #[tracing::instrument(skip(self), fields(metadata.url = %self.url))]
    async fn is_modified(&mut self, max_age: Duration) -> bool {
        let now = self.clock.now();
        self.state.record_attempt(now);

        if self.state.last_success().is_none() {
            tracing::debug!("nothing published yet, treating metadata as modified");
            return true;
        }

        let marker = self.state.marker();
        let since = marker
            .last_modified
            .unwrap_or_else(|| now.saturating_sub(max_age));

        let mut request = self
            .authorized(self.client.head(self.url.clone()))
            .header(header::IF_MODIFIED_SINCE, since.to_http_date());

        if let Some(etag) = &marker.etag {
            request = request.header(header::IF_NONE_MATCH, etag.as_str());
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::NOT_MODIFIED => {
                tracing::debug!("metadata not modified");
                false
            }
            Ok(response) if response.status().is_success() => {
                tracing::debug!(
                    http.status_code = response.status().as_u16(),
                    "metadata modified"
                );
                true
            }
            Ok(response) => {
                tracing::warn!(
                    http.status_code = response.status().as_u16(),
                    "unexpected status probing metadata, assuming modified"
                );
                true
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "metadata probe failed, assuming modified");
                true
            }
        }
    }

    #[tracing::instrument(skip(self), fields(metadata.url = %self.url))]
    async fn fetch(&mut self) -> Result<RawDocument, FetchError> {
        self.state.record_attempt(self.clock.now());
        tracing::debug!("fetching metadata");

        let response = self
            .authorized(self.client.get(self.url.clone()))
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                http.status_code = status.as_u16(),
                "metadata fetch failed, unexpected response status"
            );
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let marker = marker_from_headers(response.headers());
        let body = response.bytes().await.map_err(FetchError::Body)?;

        tracing::debug!(
            bytes = body.len(),
            last_modified = ?marker.last_modified,
            etag = ?marker.etag,
            "fetched metadata"
        );

        Ok(RawDocument::new(body.to_vec(), marker))
    }

    fn commit(&mut self, marker: &ModificationMarker) {
        self.state.record_success(self.clock.now(), marker);
    }

    fn record_failure(&mut self) {
        self.state.record_failure(self.clock.now());
    }

    fn fetch_state(&self) -> &FetchState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use aa_clock::TestClock;
    use color_eyre::Result;
    use tracing_test::traced_test;
    use wiremock::{
        matchers::{basic_auth, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{Password, Username};

    const LAST_MODIFIED: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
    const PERIOD: Duration = Duration::from_secs(10 * 60);

    fn credentials() -> Credentials {
        Credentials {
            username: Username::from_static("user"),
            password: Password::from_static("password"),
        }
    }

    fn source_for(server: &MockServer, clock: TestClock) -> Result<UrlMetadataSource<TestClock>> {
        let url = Url::parse(&format!("{}/sp", server.uri()))?;
        Ok(UrlMetadataSource::new(url, credentials())?.with_clock(clock))
    }

    /// The conditional headers of the most recent request
    async fn last_request(server: &MockServer) -> (Option<String>, Option<String>) {
        let requests = server.received_requests().await.unwrap_or_default();
        let Some(request) = requests.last() else {
            return (None, None);
        };
        let value = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        };
        (value("if-modified-since"), value("if-none-match"))
    }

    #[tokio::test]
    #[traced_test]
    async fn fetch_sends_credentials_and_captures_marker() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sp"))
            .and(basic_auth("user", "password"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .insert_header("Last-Modified", LAST_MODIFIED)
                    .insert_header("ETag", "\"v1\""),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut source = source_for(&server, TestClock::new(UnixTime(1_000_000_000)))?;
        let document = source.fetch().await?;

        assert_eq!(document.body(), b"[]");
        assert_eq!(document.marker().last_modified, Some(UnixTime(784_111_777)));
        assert_eq!(document.marker().etag.as_deref(), Some("\"v1\""));
        Ok(())
    }

    #[tokio::test]
    async fn obsolete_last_modified_form_is_echoed_on_the_next_check() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .insert_header("Last-Modified", "Sunday, 06-Nov-94 08:49:37 GMT"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/sp"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let mut source = source_for(&server, TestClock::new(UnixTime(1_000_000_000)))?;
        let document = source.fetch().await?;
        assert_eq!(document.marker().last_modified, Some(UnixTime(784_111_777)));

        source.commit(document.marker());
        assert!(!source.is_modified(PERIOD).await);

        let conditional = last_request(&server).await;
        assert_eq!(conditional.0.as_deref(), Some(LAST_MODIFIED));
        Ok(())
    }

    #[tokio::test]
    async fn first_probe_is_modified_without_a_request() -> Result<()> {
        let server = MockServer::start().await;
        let mut source = source_for(&server, TestClock::new(UnixTime(1_000_000_000)))?;

        assert!(source.is_modified(PERIOD).await);

        let requests = server.received_requests().await.unwrap_or_default();
        assert!(requests.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn probe_uses_recorded_marker_and_honors_not_modified() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/sp"))
            .and(basic_auth("user", "password"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = source_for(&server, TestClock::new(UnixTime(1_000_000_000)))?;
        source.commit(&ModificationMarker {
            last_modified: Some(UnixTime(784_111_777)),
            etag: Some("\"v1\"".to_owned()),
        });

        assert!(!source.is_modified(PERIOD).await);

        let conditional = last_request(&server).await;
        assert_eq!(conditional.0.as_deref(), Some(LAST_MODIFIED));
        assert_eq!(conditional.1.as_deref(), Some("\"v1\""));
        Ok(())
    }

    #[tokio::test]
    async fn probe_without_origin_marker_asks_about_the_last_period() -> Result<()> {
        let clock = TestClock::new(UnixTime(1_000_000_000));
        let since = UnixTime(1_000_000_000 - 600).to_http_date();

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/sp"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = source_for(&server, clock)?;
        source.commit(&ModificationMarker::default());

        assert!(source.is_modified(PERIOD).await);

        let conditional = last_request(&server).await;
        assert_eq!(conditional.0, Some(since));
        assert_eq!(conditional.1, None);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_probe_assumes_modified() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut source = source_for(&server, TestClock::default())?;
        source.commit(&ModificationMarker::default());
        assert!(source.is_modified(PERIOD).await);

        let url = Url::parse("http://127.0.0.1:9/sp")?;
        let mut unreachable = UrlMetadataSource::new(url, credentials())?;
        unreachable.commit(&ModificationMarker::default());
        assert!(unreachable.is_modified(PERIOD).await);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_credentials_are_a_status_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut source = source_for(&server, TestClock::default())?;
        let error = source.fetch().await.unwrap_err();

        assert!(matches!(error, FetchError::Status { status: 401 }));
        assert_eq!(source.fetch_state().last_success(), None);
        Ok(())
    }
}
