//! Transmission RPC adapter.

use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::TransmissionConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Instant;
use tokio::sync::Mutex;

const KIND: BackendKind = BackendKind::Transmission;
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

// torrent-get status codes
const STATUS_DOWNLOAD_WAIT: i64 = 3;

/// Transmission client
///
/// The CSRF session id is learned from the first 409 and re-sent on every request.
pub struct TransmissionClient {
    config: TransmissionConfig,
    rpc_url: String,
    http: reqwest::Client,
    session_id: Mutex<Option<String>>,
}

impl TransmissionClient {
    /// Build a client for the configured daemon
    pub fn new(config: TransmissionConfig) -> Result<Self> {
        let rpc_url = rpc_url(&config.endpoint.base_url()?);
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            rpc_url,
            http,
            session_id: Mutex::new(None),
        })
    }

    /// Call `method` and return its `arguments`
    async fn rpc(&self, method: &str, arguments: Value) -> ClientResult<Value> {
        let payload = json!({ "method": method, "arguments": arguments });
        let mut refreshed = false;
        loop {
            let session_id = self.session_id.lock().await.clone();
            let mut request = http::with_basic_auth(
                self.http.post(&self.rpc_url).json(&payload),
                &self.config.endpoint,
            );
            if let Some(id) = &session_id {
                request = request.header(SESSION_HEADER, id);
            }

            let response = http::send(KIND, request).await?;
            if response.status() == StatusCode::CONFLICT {
                let fresh = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if refreshed || fresh.is_none() {
                    return Err(ClientError::protocol(
                        KIND,
                        "session id rejected",
                        http::text(KIND, response).await.unwrap_or_default(),
                    ));
                }
                tracing::debug!("Transmission session id refreshed");
                *self.session_id.lock().await = fresh;
                refreshed = true;
                continue;
            }

            let body = http::json(KIND, response).await?;
            return match body["result"].as_str() {
                Some("success") => Ok(body["arguments"].clone()),
                Some(result) => Err(ClientError::Rejected {
                    backend: KIND,
                    reason: format!("{}: {}", method, result),
                }),
                None => Err(ClientError::protocol(
                    KIND,
                    format!("{} response has no result", method),
                    body.to_string(),
                )),
            };
        }
    }

    async fn torrent_set(&self, method: &str, arguments: Value, hash: &str) -> bool {
        match self.rpc(method, arguments).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, method, hash, "Transmission update failed");
                false
            }
        }
    }
}

/// `{base}/transmission/rpc`, whatever part of the path was configured
fn rpc_url(base: &str) -> String {
    if base.ends_with("/transmission/rpc") {
        base.to_string()
    } else if base.ends_with("/transmission") {
        format!("{}/rpc", base)
    } else {
        format!("{}/transmission/rpc", base)
    }
}

fn torrent_progress(torrent: &Value) -> DownloadProgress {
    let error = torrent["errorString"].as_str().unwrap_or_default();
    if !error.is_empty() {
        return DownloadProgress::failed(error);
    }
    if torrent["metadataPercentComplete"].as_f64().unwrap_or(1.0) < 1.0 {
        return DownloadProgress::pending();
    }
    let done = torrent["percentDone"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    if done >= 1.0 {
        return DownloadProgress::completed();
    }
    let progress = (done * 100.0) as u8;
    if torrent["status"].as_i64() == Some(STATUS_DOWNLOAD_WAIT) {
        return DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        };
    }
    DownloadProgress::downloading(progress)
}

#[async_trait]
impl DownloadClient for TransmissionClient {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            labels: false,
            seed_ratio: true,
            download_path: true,
            progress: true,
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let mut arguments = match &request.source {
            DownloadSource::Magnet(uri) | DownloadSource::Url(uri) => json!({ "filename": uri }),
            DownloadSource::Content { bytes, .. } => json!({ "metainfo": STANDARD.encode(bytes) }),
        };
        if let Some(dir) = self.config.download_dir.as_deref().filter(|d| !d.is_empty()) {
            arguments["download-dir"] = json!(dir);
        }

        let added = self.rpc("torrent-add", arguments).await?;
        if added.get("torrent-duplicate").is_some() {
            return Err(ClientError::Rejected {
                backend: KIND,
                reason: "torrent-duplicate".into(),
            });
        }
        match added["torrent-added"]["hashString"].as_str() {
            Some(hash) => {
                tracing::info!(title = %request.title, hash, "sent to Transmission");
                Ok(Submission::with_id(hash.to_ascii_lowercase()))
            }
            None => Err(ClientError::protocol(
                KIND,
                "torrent-add returned no hash",
                added.to_string(),
            )),
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let arguments = json!({
            "ids": [external_id],
            "fields": ["percentDone", "status", "errorString", "metadataPercentComplete"],
        });
        let result = self.rpc("torrent-get", arguments).await?;
        Ok(match result["torrents"].as_array().and_then(|t| t.first()) {
            Some(torrent) => torrent_progress(torrent),
            None => DownloadProgress::pending(),
        })
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        let arguments = json!({ "ids": [external_id], "delete-local-data": delete_data });
        self.torrent_set("torrent-remove", arguments, external_id)
            .await
    }

    async fn set_seed_ratio(&self, external_id: &str, ratio: f64) -> bool {
        // mode 1 honours the limit, mode 2 seeds forever
        let mode = if ratio == 0.0 { 2 } else { 1 };
        let arguments = json!({
            "ids": [external_id],
            "seedRatioLimit": ratio,
            "seedRatioMode": mode,
        });
        self.torrent_set("torrent-set", arguments, external_id).await
    }

    async fn set_download_path(&self, external_id: &str, path: &str) -> bool {
        let arguments = json!({ "ids": [external_id], "location": path, "move": true });
        self.torrent_set("torrent-set-location", arguments, external_id)
            .await
    }

    async fn task_name(&self, external_id: &str) -> Option<String> {
        let arguments = json!({ "ids": [external_id], "fields": ["name"] });
        match self.rpc("torrent-get", arguments).await {
            Ok(result) => result["torrents"][0]["name"].as_str().map(str::to_string),
            Err(e) => {
                tracing::debug!(error = %e, hash = external_id, "Transmission name lookup failed");
                None
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.rpc("session-stats", json!({})).await {
            Ok(_) => ConnectionTestResult::ok(KIND, started.elapsed(), "session-stats answered"),
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }
}
