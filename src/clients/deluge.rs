//! Deluge Web UI JSON-RPC adapter.

use super::session::SessionCache;
use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::DelugeConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const KIND: BackendKind = BackendKind::Deluge;
const SESSION_COOKIE: &str = "_session_id";
// Deluge's "Not authenticated" RPC error
const NOT_AUTHENTICATED: i64 = 1;

/// Deluge Web UI client
///
/// The web UI must be connected to a daemon; the first connected-or-connectable host is
/// used.
pub struct DelugeClient {
    config: DelugeConfig,
    rpc_url: String,
    http: reqwest::Client,
    session: SessionCache<String>,
    next_id: AtomicU64,
}

impl DelugeClient {
    /// Build a client; logs in on first use
    pub fn new(config: DelugeConfig) -> Result<Self> {
        let rpc_url = format!("{}/json", config.endpoint.base_url()?);
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            rpc_url,
            http,
            session: SessionCache::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// One JSON-RPC round trip; returns the response and its `result`
    async fn post(
        &self,
        cookie: Option<&str>,
        method: &str,
        params: Value,
    ) -> ClientResult<(reqwest::header::HeaderMap, Value)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = self
            .http
            .post(&self.rpc_url)
            .json(&json!({ "method": method, "params": params, "id": id }));
        if let Some(cookie) = cookie {
            request = request.header(
                reqwest::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, cookie),
            );
        }
        let response = http::send(KIND, request).await?;
        let headers = response.headers().clone();
        let body = http::json(KIND, response).await?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error["message"].as_str().unwrap_or("unknown error").to_string();
            if error["code"].as_i64() == Some(NOT_AUTHENTICATED) {
                return Err(ClientError::AuthFailed {
                    backend: KIND,
                    message,
                });
            }
            return Err(ClientError::Rejected {
                backend: KIND,
                reason: format!("{}: {}", method, message),
            });
        }
        Ok((headers, body["result"].clone()))
    }

    async fn login(&self) -> ClientResult<String> {
        let password = self.config.endpoint.password.clone().unwrap_or_default();
        let (headers, result) = self.post(None, "auth.login", json!([password])).await?;
        if result.as_bool() != Some(true) {
            return Err(ClientError::AuthFailed {
                backend: KIND,
                message: "auth.login refused the password".into(),
            });
        }
        let cookie = http::cookie(&headers, SESSION_COOKIE).ok_or_else(|| {
            ClientError::protocol(KIND, "auth.login set no session cookie", result.to_string())
        })?;

        self.ensure_connected(&cookie).await?;
        tracing::debug!("Deluge session established");
        Ok(cookie)
    }

    /// Connect the web UI to a daemon if it is not already
    async fn ensure_connected(&self, cookie: &str) -> ClientResult<()> {
        let (_, connected) = self.post(Some(cookie), "web.connected", json!([])).await?;
        if connected.as_bool() == Some(true) {
            return Ok(());
        }
        let (_, hosts) = self.post(Some(cookie), "web.get_hosts", json!([])).await?;
        let host_id = hosts
            .as_array()
            .and_then(|h| h.first())
            .and_then(|h| h[0].as_str())
            .ok_or_else(|| ClientError::Rejected {
                backend: KIND,
                reason: "the web UI knows no daemon to connect to".into(),
            })?
            .to_string();
        self.post(Some(cookie), "web.connect", json!([host_id])).await?;
        tracing::info!(host_id = %host_id, "Deluge web UI connected to daemon");
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> ClientResult<Value> {
        self.session
            .run(
                || self.login(),
                |cookie| {
                    let params = params.clone();
                    async move {
                        let (_, result) = self.post(Some(&cookie), method, params).await?;
                        Ok(result)
                    }
                },
            )
            .await
    }

    async fn call_ok(&self, method: &str, params: Value, hash: &str) -> bool {
        match self.call(method, params).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, method, hash, "Deluge call failed");
                false
            }
        }
    }
}

fn torrent_progress(status: &Value) -> DownloadProgress {
    if status.as_object().is_none_or(|s| s.is_empty()) {
        return DownloadProgress::pending();
    }
    let message = status["message"].as_str().unwrap_or("OK");
    if message != "OK" {
        return DownloadProgress::failed(message);
    }
    let percent = status["progress"].as_f64().unwrap_or(0.0).clamp(0.0, 100.0);
    let state = status["state"].as_str().unwrap_or_default();
    if state == "Error" {
        return DownloadProgress::failed("Deluge reports an error");
    }
    if percent >= 100.0 || state == "Seeding" {
        return DownloadProgress::completed();
    }
    let progress = percent as u8;
    match state {
        "Queued" | "Paused" => DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        },
        _ => DownloadProgress::downloading(progress),
    }
}

#[async_trait]
impl DownloadClient for DelugeClient {
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
        let (method, params) = match &request.source {
            DownloadSource::Magnet(uri) => ("core.add_torrent_magnet", json!([uri, {}])),
            DownloadSource::Url(url) => ("core.add_torrent_url", json!([url, {}])),
            DownloadSource::Content { file_name, bytes, .. } => (
                "core.add_torrent_file",
                json!([file_name, STANDARD.encode(bytes), {}]),
            ),
        };
        let result = self.call(method, params).await?;
        match result.as_str() {
            Some(hash) if !hash.is_empty() => {
                tracing::info!(title = %request.title, hash, "sent to Deluge");
                Ok(Submission::with_id(hash.to_ascii_lowercase()))
            }
            _ => Err(ClientError::Rejected {
                backend: KIND,
                reason: format!("{} returned no hash (already in session?)", method),
            }),
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let status = self
            .call(
                "web.get_torrent_status",
                json!([external_id, ["progress", "message", "state"]]),
            )
            .await?;
        Ok(torrent_progress(&status))
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        self.call_ok(
            "core.remove_torrent",
            json!([external_id, delete_data]),
            external_id,
        )
        .await
    }

    async fn set_label(&self, external_id: &str, label: &str) -> bool {
        // the label plugin only accepts lower case
        let label = label.to_lowercase();
        let known = match self.call("label.get_labels", json!([])).await {
            Ok(labels) => labels
                .as_array()
                .is_some_and(|l| l.iter().any(|v| v.as_str() == Some(label.as_str()))),
            Err(e) => {
                tracing::warn!(error = %e, "Deluge label plugin unavailable");
                return false;
            }
        };
        if !known && !self.call_ok("label.add", json!([label]), external_id).await {
            return false;
        }
        self.call_ok(
            "label.set_torrent",
            json!([external_id, label]),
            external_id,
        )
        .await
    }

    async fn set_seed_ratio(&self, external_id: &str, ratio: f64) -> bool {
        self.call_ok(
            "core.set_torrent_stop_at_ratio",
            json!([external_id, true]),
            external_id,
        )
        .await
            && self
                .call_ok(
                    "core.set_torrent_stop_ratio",
                    json!([external_id, ratio]),
                    external_id,
                )
                .await
    }

    async fn set_download_path(&self, external_id: &str, path: &str) -> bool {
        self.call_ok(
            "core.set_torrent_move_completed",
            json!([external_id, true]),
            external_id,
        )
        .await
            && self
                .call_ok(
                    "core.set_torrent_move_completed_path",
                    json!([external_id, path]),
                    external_id,
                )
                .await
    }

    async fn task_name(&self, external_id: &str) -> Option<String> {
        match self
            .call("web.get_torrent_status", json!([external_id, ["name"]]))
            .await
        {
            Ok(status) => status["name"].as_str().map(str::to_string),
            Err(e) => {
                tracing::debug!(error = %e, hash = external_id, "Deluge name lookup failed");
                None
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        self.session.take().await;
        match self.session.get_or_login(|| self.login()).await {
            Ok(_) => ConnectionTestResult::ok(
                KIND,
                started.elapsed(),
                "logged in and connected to daemon",
            ),
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }

    async fn close(&self) {
        self.session.take().await;
    }
}
