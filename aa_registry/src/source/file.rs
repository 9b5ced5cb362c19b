//! A metadata source backed by a local file

use std::{fmt, io, path::PathBuf, time::Duration};

use aa_clock::{Clock, System, UnixTime};
use async_trait::async_trait;

use super::{FetchError, FetchState, MetadataSource, ModificationMarker, RawDocument};

/// A metadata source that reads a document from the local filesystem
///
/// The file's modification time plays the role of `Last-Modified`.
#[derive(Debug)]
pub struct FileMetadataSource<C = System> {
    path: PathBuf,
    state: FetchState,
    clock: C,
}

impl FileMetadataSource {
    /// Constructs a new file metadata source
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: FetchState::default(),
            clock: System,
        }
    }
}

impl<C> FileMetadataSource<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> FileMetadataSource<D> {
        FileMetadataSource {
            path: self.path,
            state: self.state,
            clock,
        }
    }

    async fn modified_at(&self) -> io::Result<UnixTime> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(UnixTime::from(metadata.modified()?))
    }
}

#[async_trait]
impl<C: Clock + fmt::Debug + Send + Sync> MetadataSource for FileMetadataSource<C> {
    async fn is_modified(&mut self, _max_age: Duration) -> bool {
        self.state.record_attempt(self.clock.now());

        if self.state.last_success().is_none() {
            return true;
        }

        match self.modified_at().await {
            Ok(modified) => Some(modified) != self.state.marker().last_modified,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(
                    error,
                    path = %self.path.display(),
                    "unable to stat metadata document, assuming modified"
                );
                true
            }
        }
    }

    async fn fetch(&mut self) -> Result<RawDocument, FetchError> {
        self.state.record_attempt(self.clock.now());

        let last_modified = self.modified_at().await?;
        let body = tokio::fs::read(&self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = body.len(),
            "read local metadata document"
        );

        let marker = ModificationMarker {
            last_modified: Some(last_modified),
            etag: None,
        };

        Ok(RawDocument::new(body, marker))
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
    use color_eyre::Result;

    use super::*;

    #[tokio::test]
    async fn unchanged_file_is_not_modified_after_commit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("service-providers.json");
        tokio::fs::write(&path, b"[]").await?;

        let mut source = FileMetadataSource::new(path);
        assert!(source.is_modified(Duration::from_secs(60)).await);

        let document = source.fetch().await?;
        assert_eq!(document.body(), b"[]");
        source.commit(document.marker());

        assert!(!source.is_modified(Duration::from_secs(60)).await);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error_and_check_assumes_modified() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = FileMetadataSource::new(dir.path().join("absent.json"));

        let error = source.fetch().await.unwrap_err();
        assert!(matches!(error, FetchError::Io(_)));

        source.commit(&ModificationMarker::default());
        assert!(source.is_modified(Duration::from_secs(60)).await);
        Ok(())
    }
}
