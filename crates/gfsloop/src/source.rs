//! Boundary between the resolver and the upstream data service.
//!
//! The resolver only needs two things from upstream: "does this file
//! exist" and "give me its bytes". `ForecastSource` captures exactly that,
//! so the resolver can run against `HttpSource` in production and an
//! in-memory mock in tests.

use std::future::Future;
use std::time::Duration;

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors from probing or fetching a remote file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Remote existence check and retrieval.
pub trait ForecastSource: Send + Sync + 'static {
    /// Succeeds when the resource exists (HEAD returns a success status).
    fn probe(&self, url: &str) -> impl Future<Output = SourceResult<()>> + Send;

    /// Download the full body of the resource.
    fn fetch(&self, url: &str) -> impl Future<Output = SourceResult<Vec<u8>>> + Send;
}

// ── HttpSource: reqwest-backed implementation ────────────────────────

const USER_AGENT: &str = concat!("gfsloop/", env!("CARGO_PKG_VERSION"));

/// HTTP source with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn classify(url: &str, err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Http(err)
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> SourceResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SourceError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

impl ForecastSource for HttpSource {
    async fn probe(&self, url: &str) -> SourceResult<()> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        check_status(url, response.status())
    }

    async fn fetch(&self, url: &str) -> SourceResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        check_status(url, response.status())?;
        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        Ok(body.to_vec())
    }
}

// ── MockSource for testing ───────────────────────────────────────────

#[cfg(any(test, feature = "test-harness"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory source. Unknown URLs answer 404; every call is recorded.
    #[derive(Default)]
    pub struct MockSource {
        files: Mutex<HashMap<String, Vec<u8>>>,
        broken: Mutex<HashSet<String>>,
        probed: Mutex<Vec<String>>,
        fetched: Mutex<Vec<String>>,
    }

    impl MockSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `url` available with the given body.
        pub fn serve(&self, url: &str, body: &[u8]) {
            self.files
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_vec());
        }

        /// Stop serving `url`.
        pub fn withdraw(&self, url: &str) {
            self.files.lock().unwrap().remove(url);
        }

        /// Let `url` pass the probe but fail on download.
        pub fn break_download(&self, url: &str) {
            self.broken.lock().unwrap().insert(url.to_string());
        }

        pub fn probed_urls(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }

        pub fn fetched_urls(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }

        fn not_found(url: &str) -> SourceError {
            SourceError::Status {
                status: 404,
                url: url.to_string(),
            }
        }
    }

    impl ForecastSource for MockSource {
        async fn probe(&self, url: &str) -> SourceResult<()> {
            self.probed.lock().unwrap().push(url.to_string());
            if self.files.lock().unwrap().contains_key(url) {
                Ok(())
            } else {
                Err(Self::not_found(url))
            }
        }

        async fn fetch(&self, url: &str) -> SourceResult<Vec<u8>> {
            self.fetched.lock().unwrap().push(url.to_string());
            if self.broken.lock().unwrap().contains(url) {
                return Err(SourceError::Status {
                    status: 503,
                    url: url.to_string(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Self::not_found(url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSource;
    use super::*;

    #[test]
    fn success_status_passes() {
        assert!(check_status("u", reqwest::StatusCode::OK).is_ok());
        assert!(check_status("u", reqwest::StatusCode::NO_CONTENT).is_ok());
    }

    #[test]
    fn error_status_carries_code_and_url() {
        let err = check_status("http://x/f000", reqwest::StatusCode::NOT_FOUND).unwrap_err();
        match err {
            SourceError::Status { status, url } => {
                assert_eq!(status, 404);
                assert_eq!(url, "http://x/f000");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn http_source_builds() {
        assert!(HttpSource::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn mock_serves_known_urls_only() {
        let source = MockSource::new();
        source.serve("http://x/a", b"A");

        assert!(source.probe("http://x/a").await.is_ok());
        assert!(source.probe("http://x/b").await.is_err());
        assert_eq!(source.fetch("http://x/a").await.unwrap(), b"A");
        assert_eq!(source.probed_urls(), vec!["http://x/a", "http://x/b"]);
    }

    #[tokio::test]
    async fn mock_broken_download_still_probes() {
        let source = MockSource::new();
        source.serve("http://x/a", b"A");
        source.break_download("http://x/a");

        assert!(source.probe("http://x/a").await.is_ok());
        assert!(matches!(
            source.fetch("http://x/a").await,
            Err(SourceError::Status { status: 503, .. })
        ));
    }

    #[test]
    fn source_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SourceError>();
    }
}
