//! Manifest fetching: thread JSON in, file descriptors out

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, NamingMode};
use crate::error::{Error, Result};
use crate::naming::sanitize_file_name;
use crate::retry::retry_transient;
use crate::types::{FileDescriptor, ThreadRef};

/// Number of extra manifest requests after the first one fails
const MANIFEST_RETRIES: u32 = 1;

/// Thread JSON as served by the API; only the fields we use
#[derive(Debug, Deserialize)]
pub(crate) struct ThreadManifest {
    #[serde(default)]
    pub(crate) posts: Vec<Post>,
}

/// A post; attachment fields are absent on text-only posts
#[derive(Debug, Deserialize)]
pub(crate) struct Post {
    /// Server-side upload timestamp, used as the media filename
    pub(crate) tim: Option<u64>,
    /// Extension including the dot (".jpg")
    pub(crate) ext: Option<String>,
    /// Uploader's filename without extension
    pub(crate) filename: Option<String>,
    /// Base64-encoded MD5 of the file
    pub(crate) md5: Option<String>,
}

/// Retrieves a thread's manifest and turns it into [`FileDescriptor`]s
#[derive(Clone)]
pub struct ManifestFetcher {
    client: reqwest::Client,
    api_base: String,
    media_base: String,
    naming: NamingMode,
    timeout: Duration,
    retry_delay: Duration,
}

impl ManifestFetcher {
    /// Create a fetcher sharing the downloader's HTTP client
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.api_base().to_string(),
            media_base: config.media_base().to_string(),
            naming: config.naming,
            timeout: config.manifest_timeout,
            retry_delay: config.manifest_retry_delay,
        }
    }

    /// Manifest URL for a thread
    pub fn manifest_url(&self, thread: &ThreadRef) -> String {
        format!("{}/{}/thread/{}.json", self.api_base, thread.board, thread.thread)
    }

    /// Fetch the thread and list its attachments
    ///
    /// An empty list means the thread exists but has no attachments. A 404 is
    /// [`Error::ThreadNotFound`] and is never retried; any other failure is
    /// retried once after a fixed delay and then surfaces as
    /// [`Error::ManifestUnavailable`].
    pub async fn fetch(
        &self,
        thread: &ThreadRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileDescriptor>> {
        let url = self.manifest_url(thread);
        debug!(%url, "fetching thread manifest");

        let manifest = retry_transient(MANIFEST_RETRIES, self.retry_delay, cancel, || {
            self.request(thread, &url, cancel)
        })
        .await?;

        let descriptors =
            descriptors_from_manifest(&thread.board, &self.media_base, self.naming, manifest);
        info!(
            board = %thread.board,
            thread = thread.thread,
            files = descriptors.len(),
            "manifest fetched"
        );
        Ok(descriptors)
    }

    async fn request(
        &self,
        thread: &ThreadRef,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ThreadManifest> {
        let unavailable = |reason: String| Error::ManifestUnavailable {
            url: url.to_string(),
            reason,
        };

        let send = self.client.get(url).timeout(self.timeout).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response.map_err(|e| {
                if e.is_timeout() {
                    unavailable(format!("timed out after {} seconds", self.timeout.as_secs()))
                } else if e.is_connect() {
                    unavailable(format!("connection failed: {}", e))
                } else {
                    unavailable(e.to_string())
                }
            })?,
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ThreadNotFound {
                board: thread.board.clone(),
                thread: thread.thread,
            });
        }
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.bytes() => body.map_err(|e| unavailable(format!("failed to read body: {}", e)))?,
        };

        serde_json::from_slice(&body).map_err(|e| unavailable(format!("invalid manifest JSON: {}", e)))
    }
}

/// Map posts to descriptors, skipping posts without an attachment
pub(crate) fn descriptors_from_manifest(
    board: &str,
    media_base: &str,
    naming: NamingMode,
    manifest: ThreadManifest,
) -> Vec<FileDescriptor> {
    manifest
        .posts
        .into_iter()
        .filter_map(|post| {
            let (tim, ext) = match (post.tim, post.ext) {
                (Some(tim), Some(ext)) => (tim, ext),
                _ => return None,
            };
            let timestamp_name = format!("{}{}", tim, ext);
            let suggested_name = match (naming, post.filename) {
                (NamingMode::Original, Some(filename)) => {
                    sanitize_file_name(&format!("{}{}", filename, ext), &timestamp_name)
                }
                _ => timestamp_name,
            };

            Some(FileDescriptor {
                source_url: format!("{}/{}/{}{}", media_base, board, tim, ext),
                suggested_name,
                content_hash: post.md5.as_deref().and_then(decode_md5),
            })
        })
        .collect()
}

/// Decode the API's base64 MD5 into lowercase hex
fn decode_md5(encoded: &str) -> Option<String> {
    match BASE64.decode(encoded.trim()) {
        Ok(bytes) if bytes.len() == 16 => Some(hex::encode(bytes)),
        Ok(bytes) => {
            debug!(len = bytes.len(), "ignoring md5 with unexpected length");
            None
        }
        Err(e) => {
            debug!(error = %e, "ignoring undecodable md5");
            None
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r#"{
        "posts": [
            {"no": 1, "tim": 1700000000001, "ext": ".jpg", "filename": "sunset", "md5": "1B2M2Y8AsgTpgAmY7PhCfg=="},
            {"no": 2, "com": "nice"},
            {"no": 3, "tim": 1700000000002, "ext": ".webm", "filename": "clip"}
        ]
    }"#;

    fn manifest(json: &str) -> ThreadManifest {
        serde_json::from_str(json).unwrap()
    }

    fn thread() -> ThreadRef {
        ThreadRef::parse("https://boards.4chan.org/wg/thread/123").unwrap()
    }

    fn fetcher(server: &MockServer) -> ManifestFetcher {
        let config = Config {
            api_base_url: server.uri(),
            manifest_retry_delay: Duration::from_millis(10),
            ..Config::default()
        };
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap();
        ManifestFetcher::new(client, &config)
    }

    #[test]
    fn posts_without_attachment_are_skipped() {
        let descriptors = descriptors_from_manifest(
            "wg",
            "https://i.4cdn.org",
            NamingMode::Timestamp,
            manifest(SAMPLE),
        );

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].source_url, "https://i.4cdn.org/wg/1700000000001.jpg");
        assert_eq!(descriptors[0].suggested_name, "1700000000001.jpg");
        assert_eq!(descriptors[1].suggested_name, "1700000000002.webm");
    }

    #[test]
    fn md5_is_decoded_to_hex() {
        let descriptors = descriptors_from_manifest(
            "wg",
            "https://i.4cdn.org",
            NamingMode::Timestamp,
            manifest(SAMPLE),
        );

        assert_eq!(
            descriptors[0].content_hash.as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(descriptors[1].content_hash, None);
    }

    #[test]
    fn original_naming_uses_uploader_filename() {
        let descriptors = descriptors_from_manifest(
            "wg",
            "https://i.4cdn.org",
            NamingMode::Original,
            manifest(SAMPLE),
        );

        assert_eq!(descriptors[0].suggested_name, "sunset.jpg");
        assert_eq!(descriptors[1].suggested_name, "clip.webm");
        assert_eq!(
            descriptors[0].source_url, "https://i.4cdn.org/wg/1700000000001.jpg",
            "source URL is always timestamp based"
        );
    }

    #[test]
    fn original_naming_falls_back_to_timestamp_without_filename() {
        let json = r#"{"posts": [{"tim": 17, "ext": ".png"}]}"#;
        let descriptors =
            descriptors_from_manifest("g", "https://i.4cdn.org", NamingMode::Original, manifest(json));
        assert_eq!(descriptors[0].suggested_name, "17.png");
    }

    #[test]
    fn invalid_md5_is_dropped() {
        assert_eq!(decode_md5("not base64!"), None);
        assert_eq!(decode_md5("AAAA"), None, "wrong length");
    }

    #[test]
    fn manifest_without_posts_is_empty() {
        let descriptors =
            descriptors_from_manifest("g", "https://i.4cdn.org", NamingMode::Timestamp, manifest("{}"));
        assert!(descriptors.is_empty());
    }

    #[tokio::test]
    async fn fetch_sends_user_agent_and_parses_posts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .and(header("user-agent", "4chan Archiver"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .expect(1)
            .mount(&server)
            .await;

        let descriptors = fetcher(&server)
            .fetch(&thread(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(descriptors.len(), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&thread(), &CancellationToken::new()).await;

        match result {
            Err(Error::ThreadNotFound { board, thread }) => {
                assert_eq!(board, "wg");
                assert_eq!(thread, 123);
            }
            other => panic!("expected ThreadNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_retried_once_then_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&thread(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::ManifestUnavailable { .. })));
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&server)
            .await;

        let descriptors = fetcher(&server)
            .fetch(&thread(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(descriptors.len(), 2);
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let config = Config {
            api_base_url: "http://127.0.0.1:1".to_string(),
            manifest_retry_delay: Duration::from_millis(10),
            manifest_timeout: Duration::from_secs(2),
            ..Config::default()
        };
        let fetcher = ManifestFetcher::new(reqwest::Client::new(), &config);

        let result = fetcher.fetch(&thread(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::ManifestUnavailable { .. })));
    }

    #[tokio::test]
    async fn empty_thread_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wg/thread/123.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"posts": [{"no": 123}]}"#))
            .mount(&server)
            .await;

        let descriptors = fetcher(&server)
            .fetch(&thread(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(descriptors.is_empty());
    }
}
