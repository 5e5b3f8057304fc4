//! uTorrent Web UI adapter.
//!
//! Every action needs the CSRF token from `gui/token.html` plus the `GUID` cookie that
//! came with it. An action answered with 400/401 means the token went stale.

use super::session::SessionCache;
use super::{ClientCapabilities, DownloadClient, SubmitRequest, Submission, http};
use crate::config::UtorrentConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Instant;

const KIND: BackendKind = BackendKind::Utorrent;

// Status bitfield of a list row
const STARTED: i64 = 1;
const ERROR: i64 = 16;
const PAUSED: i64 = 32;
const QUEUED: i64 = 64;

#[allow(clippy::expect_used)]
fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<div[^>]*id=['"]token['"][^>]*>([^<>]+)</div>"#)
            .expect("static regex is valid")
    })
}

#[derive(Clone, Debug, PartialEq)]
struct UtSession {
    token: String,
    guid: Option<String>,
}

/// uTorrent client
pub struct UtorrentClient {
    config: UtorrentConfig,
    base_url: String,
    http: reqwest::Client,
    session: SessionCache<UtSession>,
}

impl UtorrentClient {
    /// Build a client; the token is fetched on first use
    pub fn new(config: UtorrentConfig) -> Result<Self> {
        let base = config.endpoint.base_url()?;
        let base_url = base.trim_end_matches("/gui").to_string();
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            base_url,
            http,
            session: SessionCache::new(),
        })
    }

    async fn login(&self) -> ClientResult<UtSession> {
        let request = http::with_basic_auth(
            self.http.get(format!("{}/gui/token.html", self.base_url)),
            &self.config.endpoint,
        );
        let response = http::send(KIND, request).await?;
        let guid = http::cookie(response.headers(), "GUID");
        let body = http::text(KIND, response).await?;
        let token = token_pattern()
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| ClientError::protocol(KIND, "no token in token.html", body.clone()))?;
        tracing::debug!("uTorrent token obtained");
        Ok(UtSession { token, guid })
    }

    async fn action_with(
        &self,
        session: UtSession,
        params: &[(&str, String)],
    ) -> ClientResult<Value> {
        let mut request = http::with_basic_auth(
            self.http.get(format!("{}/gui/", self.base_url)),
            &self.config.endpoint,
        )
        .query(&[("token", session.token.as_str())])
        .query(params);
        if let Some(guid) = &session.guid {
            request = request.header(reqwest::header::COOKIE, format!("GUID={}", guid));
        }

        let response = http::send(KIND, request).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(ClientError::AuthFailed {
                backend: KIND,
                message: "token rejected".into(),
            });
        }
        let body = http::json(KIND, response).await?;
        if let Some(error) = body["error"].as_str() {
            return Err(ClientError::Rejected {
                backend: KIND,
                reason: error.to_string(),
            });
        }
        Ok(body)
    }

    async fn action(&self, params: &[(&str, String)]) -> ClientResult<Value> {
        self.session
            .run(|| self.login(), |s| self.action_with(s, params))
            .await
    }

    async fn list(&self) -> ClientResult<Vec<Value>> {
        let body = self.action(&[("list", "1".to_string())]).await?;
        Ok(body["torrents"].as_array().cloned().unwrap_or_default())
    }

    async fn hashes(&self) -> ClientResult<HashSet<String>> {
        Ok(self.list().await?.iter().filter_map(row_hash).collect())
    }

    async fn find_row(&self, hash: &str) -> ClientResult<Option<Value>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|row| row_hash(row).as_deref() == Some(hash)))
    }
}

fn row_hash(row: &Value) -> Option<String> {
    row[0].as_str().map(str::to_ascii_lowercase)
}

fn row_progress(row: &Value) -> DownloadProgress {
    let bits = row[1].as_i64().unwrap_or(0);
    let per_mille = row[4].as_i64().unwrap_or(0).clamp(0, 1000);
    let progress = (per_mille / 10) as u8;
    if bits & ERROR != 0 {
        let message = row[21].as_str().unwrap_or("uTorrent reports an error");
        return DownloadProgress::failed(message);
    }
    if per_mille >= 1000 {
        return DownloadProgress::completed();
    }
    if bits & PAUSED != 0 || (bits & QUEUED != 0 && bits & STARTED == 0) {
        return DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        };
    }
    DownloadProgress::downloading(progress)
}

#[async_trait]
impl DownloadClient for UtorrentClient {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            labels: true,
            progress: true,
            ..Default::default()
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let Some(url) = request.source.as_url().map(str::to_string) else {
            return Err(ClientError::Rejected {
                backend: KIND,
                reason: "uTorrent accepts torrent URLs and magnet links only".into(),
            });
        };

        let known = request.source.known_hash();
        let before = match known {
            Some(_) => HashSet::new(),
            None => self.hashes().await?,
        };

        self.action(&[("action", "add-url".to_string()), ("s", url.clone())])
            .await?;
        tracing::info!(title = %request.title, "sent to uTorrent");

        if let Some(hash) = known {
            return Ok(Submission::with_id(hash));
        }

        let added = match self.hashes().await {
            Ok(after) => {
                let mut new: Vec<String> = after.difference(&before).cloned().collect();
                (new.len() == 1).then(|| new.remove(0))
            }
            Err(e) => {
                tracing::warn!(error = %e, "uTorrent list after add failed");
                None
            }
        };
        match added {
            Some(hash) => Ok(Submission::with_id(hash)),
            None => {
                let e = ClientError::IdentifierNotFound {
                    backend: KIND,
                    source_url: url,
                };
                tracing::warn!(error = %e, "accepted without an identifier");
                Ok(Submission::without_id())
            }
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let hash = external_id.to_ascii_lowercase();
        Ok(match self.find_row(&hash).await? {
            Some(row) => row_progress(&row),
            None => DownloadProgress::pending(),
        })
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        let action = if delete_data { "removedata" } else { "remove" };
        let params = [
            ("action", action.to_string()),
            ("hash", external_id.to_string()),
        ];
        match self.action(&params).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, hash = external_id, "uTorrent remove failed");
                false
            }
        }
    }

    async fn set_label(&self, external_id: &str, label: &str) -> bool {
        let params = [
            ("action", "setprops".to_string()),
            ("hash", external_id.to_string()),
            ("s", "label".to_string()),
            ("v", label.to_string()),
        ];
        match self.action(&params).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, hash = external_id, label, "uTorrent setprops failed");
                false
            }
        }
    }

    async fn task_name(&self, external_id: &str) -> Option<String> {
        match self.find_row(&external_id.to_ascii_lowercase()).await {
            Ok(row) => row.and_then(|r| r[2].as_str().map(str::to_string)),
            Err(e) => {
                tracing::debug!(error = %e, hash = external_id, "uTorrent name lookup failed");
                None
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        self.session.take().await;
        match self.session.get_or_login(|| self.login()).await {
            Ok(_) => {
                // uTorrent only lists labels that have torrents, so the label cannot be checked
                let message = if self.config.label.as_deref().is_some_and(|l| !l.is_empty()) {
                    "login successful, label not checked"
                } else {
                    "login successful"
                };
                ConnectionTestResult::ok(KIND, started.elapsed(), message)
            }
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }

    async fn close(&self) {
        self.session.take().await;
    }
}
