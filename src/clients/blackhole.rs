//! Watched-directory "backend": drops the NZB, .torrent or .magnet file where an
//! external downloader picks it up.

use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::{BlackholeConfig, Endpoint};
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, MediaKind};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;

/// Writes payloads into a directory; the file name is the task identifier
pub struct BlackholeClient {
    directory: PathBuf,
    media_kind: MediaKind,
    http: reqwest::Client,
}

impl BlackholeClient {
    /// Blackhole for usenet (`.nzb`) or torrent (`.torrent` / `.magnet`) payloads
    pub fn new(config: BlackholeConfig, media_kind: MediaKind) -> Result<Self> {
        let http = http::build_client(&Endpoint::new("localhost"))?;
        Ok(Self {
            directory: config.directory,
            media_kind,
            http,
        })
    }

    fn backend(&self) -> BackendKind {
        match self.media_kind {
            MediaKind::Usenet => BackendKind::UsenetBlackhole,
            MediaKind::Torrent => BackendKind::TorrentBlackhole,
        }
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> ClientError {
        ClientError::Transport {
            backend: self.backend(),
            message: format!("{} {}: {}", action, self.directory.display(), e),
        }
    }
}

/// File name safe on every platform the watched directory might be shared with
fn sanitize(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl DownloadClient for BlackholeClient {
    fn kind(&self) -> BackendKind {
        self.backend()
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::default()
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let backend = self.backend();
        let stem = sanitize(&request.title);
        let (file_name, bytes) = match (&request.source, self.media_kind) {
            (DownloadSource::Magnet(uri), MediaKind::Torrent) => {
                (format!("{}.magnet", stem), uri.as_bytes().to_vec())
            }
            (DownloadSource::Magnet(_), MediaKind::Usenet) => {
                return Err(ClientError::Rejected {
                    backend,
                    reason: "magnet links cannot be sent to a usenet blackhole".into(),
                });
            }
            (DownloadSource::Url(url), kind) => {
                let ext = if kind == MediaKind::Usenet { "nzb" } else { "torrent" };
                let bytes = http::fetch_bytes(backend, &self.http, url).await?;
                (format!("{}.{}", stem, ext), bytes)
            }
            (DownloadSource::Content { bytes, .. }, kind) => {
                let ext = if kind == MediaKind::Usenet { "nzb" } else { "torrent" };
                (format!("{}.{}", stem, ext), bytes.clone())
            }
        };
        if bytes.is_empty() {
            return Err(ClientError::Rejected {
                backend,
                reason: format!("empty payload for {}", request.title),
            });
        }

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| self.io_error("creating", e))?;
        let path = self.directory.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| self.io_error("writing into", e))?;

        tracing::info!(path = %path.display(), "saved to blackhole");
        Ok(Submission::with_id(file_name))
    }

    async fn status(&self, _external_id: &str) -> ClientResult<DownloadProgress> {
        Ok(DownloadProgress::pending())
    }

    async fn remove(&self, external_id: &str, _delete_data: bool) -> bool {
        tracing::warn!(
            file = external_id,
            backend = %self.backend(),
            "blackhole tasks cannot be removed; the external downloader owns them"
        );
        false
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match tokio::fs::metadata(&self.directory).await {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
                ConnectionTestResult::ok(
                    self.backend(),
                    started.elapsed(),
                    format!("{} is writable", self.directory.display()),
                )
            }
            Ok(_) => ConnectionTestResult::failed(
                self.backend(),
                format!("{} is not a writable directory", self.directory.display()),
            ),
            Err(e) => ConnectionTestResult::failed(
                self.backend(),
                format!("{}: {}", self.directory.display(), e),
            ),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(title: &str, source: DownloadSource, media_kind: MediaKind) -> SubmitRequest {
        SubmitRequest {
            title: title.to_string(),
            source,
            media_kind,
        }
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize("A/B: C?"), "A_B_ C_");
        assert_eq!(sanitize("  ..  "), "download");
    }

    #[tokio::test]
    async fn magnet_is_written_as_magnet_file() {
        let dir = TempDir::new().unwrap();
        let client = BlackholeClient::new(
            BlackholeConfig {
                directory: dir.path().to_path_buf(),
            },
            MediaKind::Torrent,
        )
        .unwrap();

        let uri = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
        let submission = client
            .submit(&request(
                "Some Book",
                DownloadSource::Magnet(uri.into()),
                MediaKind::Torrent,
            ))
            .await
            .unwrap();

        assert_eq!(submission.external_id.as_deref(), Some("Some Book.magnet"));
        let written = std::fs::read_to_string(dir.path().join("Some Book.magnet")).unwrap();
        assert_eq!(written, uri);
        assert_eq!(client.kind(), BackendKind::TorrentBlackhole);
    }

    #[tokio::test]
    async fn usenet_content_is_written_as_nzb() {
        let dir = TempDir::new().unwrap();
        let client = BlackholeClient::new(
            BlackholeConfig {
                directory: dir.path().join("watch"),
            },
            MediaKind::Usenet,
        )
        .unwrap();

        let submission = client
            .submit(&request(
                "Book",
                DownloadSource::Content {
                    file_name: "x.nzb".into(),
                    bytes: b"<nzb/>".to_vec(),
                    origin: None,
                },
                MediaKind::Usenet,
            ))
            .await
            .unwrap();

        assert_eq!(submission.external_id.as_deref(), Some("Book.nzb"));
        assert_eq!(
            std::fs::read(dir.path().join("watch").join("Book.nzb")).unwrap(),
            b"<nzb/>"
        );
    }

    #[tokio::test]
    async fn usenet_blackhole_rejects_magnets() {
        let dir = TempDir::new().unwrap();
        let client = BlackholeClient::new(
            BlackholeConfig {
                directory: dir.path().to_path_buf(),
            },
            MediaKind::Usenet,
        )
        .unwrap();

        let result = client
            .submit(&request(
                "Book",
                DownloadSource::Magnet("magnet:?xt=urn:btih:abc".into()),
                MediaKind::Usenet,
            ))
            .await;
        assert!(matches!(result, Err(ClientError::Rejected { .. })));
    }

    #[tokio::test]
    async fn no_progress_and_remove_only_warns() {
        let dir = TempDir::new().unwrap();
        let client = BlackholeClient::new(
            BlackholeConfig {
                directory: dir.path().to_path_buf(),
            },
            MediaKind::Torrent,
        )
        .unwrap();

        assert!(!client.capabilities().progress);
        assert_eq!(
            client.status("x.torrent").await.unwrap(),
            DownloadProgress::pending()
        );
        assert!(!client.remove("x.torrent", true).await);
        assert!(client.test_connection().await.success);
    }
}
