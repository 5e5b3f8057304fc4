//! qBittorrent Web API (v2) adapter.
//!
//! Authentication is a `SID` cookie from `auth/login`. An expired cookie is answered
//! with 403, which the shared session cache turns into one fresh login.

use super::session::SessionCache;
use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::QbittorrentConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;

const KIND: BackendKind = BackendKind::Qbittorrent;
const SESSION_COOKIE: &str = "SID";

/// qBittorrent client
pub struct QbittorrentClient {
    config: QbittorrentConfig,
    base_url: String,
    http: reqwest::Client,
    session: SessionCache<String>,
}

impl QbittorrentClient {
    /// Build a client; logs in on first use
    pub fn new(config: QbittorrentConfig) -> Result<Self> {
        let base_url = config.endpoint.base_url()?;
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            base_url,
            http,
            session: SessionCache::new(),
        })
    }

    fn api(&self, method: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, method)
    }

    async fn login(&self) -> ClientResult<String> {
        let endpoint = &self.config.endpoint;
        let request = self
            .http
            .post(self.api("auth/login"))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[
                ("username", endpoint.username.clone().unwrap_or_default()),
                ("password", endpoint.password.clone().unwrap_or_default()),
            ]);
        let response = http::send(KIND, request).await?;
        let sid = http::cookie(response.headers(), SESSION_COOKIE);
        let body = http::text(KIND, response).await?;
        if body.trim() != "Ok." {
            return Err(ClientError::AuthFailed {
                backend: KIND,
                message: format!("login refused: {}", body.trim()),
            });
        }
        let sid = sid.ok_or_else(|| {
            ClientError::protocol(KIND, "login set no SID cookie", body.clone())
        })?;
        tracing::debug!("qBittorrent session established");
        Ok(sid)
    }

    /// Send an authenticated request and return the body text
    async fn request<B>(&self, build: B) -> ClientResult<String>
    where
        B: Fn(&reqwest::Client) -> RequestBuilder,
    {
        self.session
            .run(
                || self.login(),
                |sid| {
                    let request = build(&self.http)
                        .header(reqwest::header::COOKIE, format!("{}={}", SESSION_COOKIE, sid));
                    async move {
                        let response = http::send(KIND, request).await?;
                        http::text(KIND, response).await
                    }
                },
            )
            .await
    }

    /// POST a form to a `torrents/*` command
    async fn command(&self, method: &str, form: &[(&str, String)]) -> ClientResult<String> {
        let url = self.api(method);
        self.request(|client| client.post(&url).form(form)).await
    }

    async fn command_ok(&self, method: &str, form: &[(&str, String)], hash: &str) -> bool {
        match self.command(method, form).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, method, hash, "qBittorrent command failed");
                false
            }
        }
    }

    async fn info(&self, hash: Option<&str>) -> ClientResult<Vec<Value>> {
        let url = self.api("torrents/info");
        let body = self
            .request(|client| match hash {
                Some(h) => client.get(&url).query(&[("hashes", h)]),
                None => client.get(&url),
            })
            .await?;
        let rows: Value = serde_json::from_str(&body).map_err(|e| {
            ClientError::protocol(KIND, format!("invalid JSON: {}", e), body.clone())
        })?;
        Ok(rows.as_array().cloned().unwrap_or_default())
    }

    async fn hashes(&self) -> ClientResult<HashSet<String>> {
        Ok(self
            .info(None)
            .await?
            .iter()
            .filter_map(|row| row["hash"].as_str().map(str::to_ascii_lowercase))
            .collect())
    }

    fn add_form(&self, source: &DownloadSource) -> Form {
        let form = match source {
            DownloadSource::Magnet(uri) | DownloadSource::Url(uri) => {
                Form::new().text("urls", uri.clone())
            }
            DownloadSource::Content {
                file_name, bytes, ..
            } => Form::new().part(
                "torrents",
                Part::bytes(bytes.clone()).file_name(file_name.clone()),
            ),
        };
        match self.config.download_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => form.text("savepath", dir.to_string()),
            None => form,
        }
    }
}

fn torrent_progress(row: &Value) -> DownloadProgress {
    let fraction = row["progress"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    let progress = (fraction * 100.0) as u8;
    match row["state"].as_str().unwrap_or_default() {
        "error" => DownloadProgress::failed("qBittorrent reports an error"),
        "missingFiles" => DownloadProgress::failed("qBittorrent reports missing files"),
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "forcedUP"
        | "checkingUP" => DownloadProgress::completed(),
        _ if fraction >= 1.0 => DownloadProgress::completed(),
        "metaDL" => DownloadProgress::pending(),
        "pausedDL" | "stoppedDL" | "queuedDL" => DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        },
        _ => DownloadProgress::downloading(progress),
    }
}

#[async_trait]
impl DownloadClient for QbittorrentClient {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            labels: true,
            seed_ratio: true,
            download_path: true,
            progress: true,
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let known = request.source.known_hash();
        let before = match known {
            Some(_) => HashSet::new(),
            None => self.hashes().await?,
        };

        let url = self.api("torrents/add");
        let body = self
            .request(|client| client.post(&url).multipart(self.add_form(&request.source)))
            .await?;
        if body.trim() != "Ok." {
            return Err(ClientError::Rejected {
                backend: KIND,
                reason: format!("torrents/add answered {}", body.trim()),
            });
        }
        tracing::info!(title = %request.title, "sent to qBittorrent");

        if let Some(hash) = known {
            return Ok(Submission::with_id(hash));
        }

        let added = match self.hashes().await {
            Ok(after) => {
                let mut new: Vec<String> = after.difference(&before).cloned().collect();
                (new.len() == 1).then(|| new.remove(0))
            }
            Err(e) => {
                tracing::warn!(error = %e, "qBittorrent list after add failed");
                None
            }
        };
        match added {
            Some(hash) => Ok(Submission::with_id(hash)),
            None => {
                let e = ClientError::IdentifierNotFound {
                    backend: KIND,
                    source_url: request.source_url().to_string(),
                };
                tracing::warn!(error = %e, "accepted without an identifier");
                Ok(Submission::without_id())
            }
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let hash = external_id.to_ascii_lowercase();
        Ok(match self.info(Some(hash.as_str())).await?.first() {
            Some(row) => torrent_progress(row),
            None => DownloadProgress::pending(),
        })
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        self.command_ok(
            "torrents/delete",
            &[
                ("hashes", external_id.to_string()),
                ("deleteFiles", delete_data.to_string()),
            ],
            external_id,
        )
        .await
    }

    async fn set_label(&self, external_id: &str, label: &str) -> bool {
        // 409 when the category already exists
        if let Err(e) = self
            .command("torrents/createCategory", &[("category", label.to_string())])
            .await
        {
            tracing::debug!(error = %e, label, "qBittorrent createCategory failed");
        }
        self.command_ok(
            "torrents/setCategory",
            &[
                ("hashes", external_id.to_string()),
                ("category", label.to_string()),
            ],
            external_id,
        )
        .await
    }

    async fn set_seed_ratio(&self, external_id: &str, ratio: f64) -> bool {
        self.command_ok(
            "torrents/setShareLimits",
            &[
                ("hashes", external_id.to_string()),
                ("ratioLimit", ratio.to_string()),
                ("seedingTimeLimit", "-2".to_string()),
                ("inactiveSeedingTimeLimit", "-2".to_string()),
            ],
            external_id,
        )
        .await
    }

    async fn set_download_path(&self, external_id: &str, path: &str) -> bool {
        self.command_ok(
            "torrents/setLocation",
            &[
                ("hashes", external_id.to_string()),
                ("location", path.to_string()),
            ],
            external_id,
        )
        .await
    }

    async fn task_name(&self, external_id: &str) -> Option<String> {
        let hash = external_id.to_ascii_lowercase();
        match self.info(Some(hash.as_str())).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row["name"].as_str())
                .map(str::to_string),
            Err(e) => {
                tracing::debug!(error = %e, hash = external_id, "qBittorrent name lookup failed");
                None
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        self.session.take().await;
        let url = self.api("app/version");
        match self.request(|client| client.get(&url)).await {
            Ok(version) => ConnectionTestResult::ok(
                KIND,
                started.elapsed(),
                format!("logged in, qBittorrent {}", version.trim()),
            ),
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }

    async fn close(&self) {
        self.session.take().await;
    }
}
