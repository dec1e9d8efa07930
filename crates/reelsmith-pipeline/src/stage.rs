//! Staging scene videos onto local disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reelsmith_core::{Error, Result};
use tokio::io::AsyncWriteExt;

use crate::job::MediaSource;

/// A scene video ready for local processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedMedia {
    /// Caller-owned local file used in place. Never copied or deleted.
    Borrowed(PathBuf),
    /// Downloaded copy owned by the run.
    Fetched(PathBuf),
}

impl StagedMedia {
    pub fn path(&self) -> &Path {
        match self {
            StagedMedia::Borrowed(p) | StagedMedia::Fetched(p) => p,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, StagedMedia::Fetched(_))
    }
}

/// Resolves [`MediaSource`]s to local files.
#[derive(Debug, Clone)]
pub struct Stager {
    client: reqwest::Client,
}

impl Stager {
    /// Build a stager whose downloads give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reelsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Make `source` available locally.
    ///
    /// Local sources are checked for existence and returned as-is. Remote
    /// sources are streamed into `dest`, which the caller must already have
    /// registered for cleanup.
    ///
    /// # Errors
    ///
    /// [`Error::SourceNotFound`] for a missing local file, [`Error::Fetch`]
    /// for any network or HTTP failure, [`Error::Io`] if `dest` cannot be
    /// written.
    pub async fn stage(&self, source: &MediaSource, dest: &Path) -> Result<StagedMedia> {
        match source {
            MediaSource::Local(path) => {
                if tokio::fs::metadata(path).await.is_err() {
                    return Err(Error::SourceNotFound(path.clone()));
                }
                Ok(StagedMedia::Borrowed(path.clone()))
            }
            MediaSource::Remote(url) => {
                self.download(url, dest).await?;
                Ok(StagedMedia::Fetched(dest.to_path_buf()))
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        tracing::debug!(url, dest = %dest.display(), "Downloading scene video");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::fetch(url, e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(Error::fetch(url, "empty response body"));
        }

        tracing::debug!(url, bytes = written, "Download complete");
        Ok(())
    }
}

/// File name for a scene's staged video inside the run directory.
///
/// Keeps the remote file's extension when it has a short alphanumeric one.
pub fn staged_file_name(scene_index: usize, source: &MediaSource) -> String {
    let ext = match source {
        MediaSource::Remote(url) => reqwest::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_owned))
            })
            .and_then(|name| {
                Path::new(&name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase)
            })
            .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric())),
        MediaSource::Local(path) => path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase),
    };
    format!("scene_{scene_index:03}_source.{}", ext.as_deref().unwrap_or("mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stager() -> Stager {
        Stager::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn staged_names_keep_extension() {
        let remote = MediaSource::parse("https://cdn.example.com/a/b/clip.MOV?sig=abc");
        assert_eq!(staged_file_name(3, &remote), "scene_003_source.mov");

        let bare = MediaSource::parse("https://cdn.example.com/render/12345");
        assert_eq!(staged_file_name(0, &bare), "scene_000_source.mp4");

        let odd = MediaSource::parse("https://cdn.example.com/x.tar-gz-thing");
        assert_eq!(staged_file_name(1, &odd), "scene_001_source.mp4");
    }

    #[tokio::test]
    async fn local_source_is_borrowed() {
        let tmp = tempfile::tempdir().unwrap();
        let clip = tmp.path().join("clip.mp4");
        std::fs::write(&clip, b"video").unwrap();

        let staged = stager()
            .stage(&MediaSource::Local(clip.clone()), &tmp.path().join("unused.mp4"))
            .await
            .unwrap();
        assert_eq!(staged, StagedMedia::Borrowed(clip));
        assert!(!tmp.path().join("unused.mp4").exists());
    }

    #[tokio::test]
    async fn missing_local_source_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.mp4");
        let err = stager()
            .stage(&MediaSource::Local(missing.clone()), &tmp.path().join("d.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(p) if p == missing));
    }

    #[tokio::test]
    async fn remote_source_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clips/s1.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake-mp4-bytes".to_vec()))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("scene_000_source.mp4");
        let url = format!("{}/clips/s1.mp4", server.uri());

        let staged = stager()
            .stage(&MediaSource::Remote(url), &dest)
            .await
            .unwrap();
        assert!(staged.is_fetched());
        assert_eq!(std::fs::read(&dest).unwrap(), b"fake-mp4-bytes");
    }

    #[tokio::test]
    async fn http_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/gone.mp4", server.uri());
        let err = stager()
            .stage(&MediaSource::Remote(url.clone()), &tmp.path().join("d.mp4"))
            .await
            .unwrap_err();
        match err {
            Error::Fetch { source_ref, message } => {
                assert_eq!(source_ref, url);
                assert!(message.contains("404"), "got: {message}");
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/empty.mp4", server.uri());
        let err = stager()
            .stage(&MediaSource::Remote(url), &tmp.path().join("d.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let quick = Stager::new(Duration::from_millis(200)).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/slow.mp4", server.uri());
        let err = quick
            .stage(&MediaSource::Remote(url), &tmp.path().join("d.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }
}
