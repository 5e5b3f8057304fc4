//! SABnzbd JSON API adapter.

use super::http;
use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission};
use crate::config::SabnzbdConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

const KIND: BackendKind = BackendKind::Sabnzbd;

/// Submits NZB URLs through `mode=addurl`
pub struct SabnzbdClient {
    config: SabnzbdConfig,
    base_url: String,
    http: reqwest::Client,
}

impl SabnzbdClient {
    /// Build a client for the configured server
    pub fn new(config: SabnzbdConfig) -> Result<Self> {
        let base_url = config.endpoint.base_url()?;
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            base_url,
            http,
        })
    }

    async fn api(&self, mode: &str, extra: &[(&str, String)]) -> ClientResult<Value> {
        let mut params: Vec<(&str, String)> = vec![
            ("mode", mode.to_string()),
            ("output", "json".to_string()),
            ("apikey", self.config.api_key.clone()),
        ];
        if let Some(user) = self.config.endpoint.username.as_deref().filter(|u| !u.is_empty()) {
            params.push(("ma_username", user.to_string()));
        }
        if let Some(pass) = self.config.endpoint.password.as_deref().filter(|p| !p.is_empty()) {
            params.push(("ma_password", pass.to_string()));
        }
        params.extend(extra.iter().cloned());

        let request = self
            .http
            .get(format!("{}/api", self.base_url))
            .query(&params);
        let response = http::send(KIND, request).await?;
        let body = http::json(KIND, response).await?;
        check_api_error(&body)?;
        Ok(body)
    }

    /// Queue slot or history slot for `nzo_id`
    async fn find_slot(&self, section: &str, nzo_id: &str) -> ClientResult<Option<Value>> {
        let body = self
            .api(section, &[("nzo_ids", nzo_id.to_string())])
            .await?;
        Ok(slots(&body, section)
            .iter()
            .find(|slot| slot["nzo_id"].as_str() == Some(nzo_id))
            .cloned())
    }

    /// Identifier of a queued NZB by its name, for servers that do not echo nzo_ids
    async fn find_by_name(&self, title: &str) -> ClientResult<Option<String>> {
        let body = self.api("queue", &[]).await?;
        Ok(slots(&body, "queue")
            .iter()
            .find(|slot| {
                slot["filename"]
                    .as_str()
                    .is_some_and(|name| name.eq_ignore_ascii_case(title))
            })
            .and_then(|slot| slot["nzo_id"].as_str())
            .map(str::to_string))
    }
}

/// `{status: false, error: "..."}` responses; key problems are auth failures
fn check_api_error(body: &Value) -> ClientResult<()> {
    let Some(error) = body["error"].as_str() else {
        return Ok(());
    };
    if body["status"].as_bool() == Some(true) {
        return Ok(());
    }
    let lower = error.to_ascii_lowercase();
    if lower.contains("api key") || lower.contains("apikey") || lower.contains("authentication") {
        Err(ClientError::AuthFailed {
            backend: KIND,
            message: error.to_string(),
        })
    } else {
        Err(ClientError::Rejected {
            backend: KIND,
            reason: error.to_string(),
        })
    }
}

fn slots<'a>(body: &'a Value, section: &str) -> &'a [Value] {
    body[section]["slots"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn queue_progress(slot: &Value) -> DownloadProgress {
    let percentage = match &slot["percentage"] {
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };
    let progress = percentage.clamp(0.0, 100.0) as u8;
    match slot["status"].as_str().unwrap_or_default() {
        "Queued" | "Paused" | "Grabbing" | "Fetching" => DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        },
        _ => DownloadProgress::downloading(progress),
    }
}

fn history_progress(slot: &Value) -> DownloadProgress {
    let fail_message = slot["fail_message"].as_str().unwrap_or_default();
    match slot["status"].as_str().unwrap_or_default() {
        "Completed" => DownloadProgress::completed(),
        "Failed" => DownloadProgress::failed(if fail_message.is_empty() {
            "SABnzbd reports the download failed"
        } else {
            fail_message
        }),
        _ if !fail_message.is_empty() => DownloadProgress::failed(fail_message),
        // Verifying, Repairing, Extracting, Moving, Running
        _ => DownloadProgress::downloading(99),
    }
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            progress: true,
            ..Default::default()
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let url = match &request.source {
            DownloadSource::Url(url) => url.clone(),
            DownloadSource::Magnet(_) => {
                return Err(ClientError::Rejected {
                    backend: KIND,
                    reason: "magnet links cannot be sent to a usenet downloader".into(),
                });
            }
            DownloadSource::Content { .. } => {
                return Err(ClientError::Rejected {
                    backend: KIND,
                    reason: "raw NZB content is only accepted by URL".into(),
                });
            }
        };

        let mut params = vec![("name", url.clone()), ("nzbname", request.title.clone())];
        if let Some(cat) = self.config.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(("cat", cat.to_string()));
        }
        if let Some(priority) = self.config.priority {
            params.push(("priority", priority.to_string()));
        }

        let body = self.api("addurl", &params).await?;
        if body["status"].as_bool() != Some(true) {
            return Err(ClientError::protocol(
                KIND,
                "addurl did not report success",
                body.to_string(),
            ));
        }
        tracing::info!(title = %request.title, "sent to SABnzbd");

        if let Some(id) = body["nzo_ids"]
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
        {
            return Ok(Submission::with_id(id));
        }

        // Old servers accept the NZB without echoing an id
        match self.find_by_name(&request.title).await {
            Ok(Some(id)) => Ok(Submission::with_id(id)),
            Ok(None) => {
                let e = ClientError::IdentifierNotFound {
                    backend: KIND,
                    source_url: url,
                };
                tracing::warn!(error = %e, "accepted without an identifier");
                Ok(Submission::without_id())
            }
            Err(e) => {
                tracing::warn!(error = %e, "queue scan for new NZB failed");
                Ok(Submission::without_id())
            }
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        if let Some(slot) = self.find_slot("queue", external_id).await? {
            return Ok(queue_progress(&slot));
        }
        if let Some(slot) = self.find_slot("history", external_id).await? {
            return Ok(history_progress(&slot));
        }
        Ok(DownloadProgress::pending())
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        let mut params = vec![
            ("name", "delete".to_string()),
            ("value", external_id.to_string()),
        ];
        if delete_data {
            params.push(("del_files", "1".to_string()));
        }
        let mut removed = false;
        for section in ["queue", "history"] {
            match self.api(section, &params).await {
                Ok(body) => removed |= body["status"].as_bool() == Some(true),
                Err(e) => {
                    tracing::warn!(error = %e, nzo_id = external_id, section, "SABnzbd delete failed")
                }
            }
        }
        removed
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let version = match self.api("version", &[]).await {
            Ok(body) => body["version"].as_str().unwrap_or("unknown").to_string(),
            Err(e) => {
                return ConnectionTestResult::failed(
                    KIND,
                    format!("unable to talk to SABnzbd, check host/port: {}", e),
                );
            }
        };

        let cats = match self.api("get_cats", &[]).await {
            Ok(body) => body,
            Err(e) => {
                return ConnectionTestResult::failed(
                    KIND,
                    format!("unable to talk to SABnzbd, check API key: {}", e),
                );
            }
        };

        if let Some(category) = self.config.category.as_deref().filter(|c| !c.is_empty()) {
            let known: Vec<&str> = cats["categories"]
                .as_array()
                .map(|c| c.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if known.is_empty() {
                return ConnectionTestResult::failed(KIND, "SABnzbd has no categories set");
            }
            if !known.contains(&category) {
                return ConnectionTestResult::failed(
                    KIND,
                    format!(
                        "unknown category [{}], valid categories: {}",
                        category,
                        known.join(", ")
                    ),
                );
            }
        }

        ConnectionTestResult::ok(KIND, started.elapsed(), format!("version {}", version))
    }
}
