//! NZBGet XML-RPC adapter.

use super::xmlrpc::{self, Value};
use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::NzbgetConfig;
use crate::error::{ClientError, ClientResult, Result};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::time::Instant;

const KIND: BackendKind = BackendKind::Nzbget;

/// Talks to NZBGet 13+ through the combined `append` method
pub struct NzbgetClient {
    config: NzbgetConfig,
    rpc_url: String,
    http: reqwest::Client,
}

impl NzbgetClient {
    /// Build a client for the configured server
    pub fn new(config: NzbgetConfig) -> Result<Self> {
        let rpc_url = format!("{}/xmlrpc", config.endpoint.base_url()?);
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            rpc_url,
            http,
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> ClientResult<Value> {
        let request = http::with_basic_auth(self.http.post(&self.rpc_url), &self.config.endpoint);
        xmlrpc::call(KIND, request, method, params).await
    }

    async fn find_group(&self, nzb_id: i64) -> ClientResult<Option<Value>> {
        let groups = self.call("listgroups", &[Value::Int(0)]).await?;
        Ok(groups
            .as_array()
            .unwrap_or_default()
            .iter()
            .find(|g| g.member("NZBID").and_then(Value::as_i64) == Some(nzb_id))
            .cloned())
    }

    async fn find_history(&self, nzb_id: i64) -> ClientResult<Option<Value>> {
        let history = self.call("history", &[Value::Bool(false)]).await?;
        Ok(history
            .as_array()
            .unwrap_or_default()
            .iter()
            .find(|h| h.member("NZBID").and_then(Value::as_i64) == Some(nzb_id))
            .cloned())
    }

    async fn find_by_name(&self, nzb_name: &str) -> ClientResult<Option<String>> {
        let groups = self.call("listgroups", &[Value::Int(0)]).await?;
        let stem = nzb_name.trim_end_matches(".nzb");
        Ok(groups
            .as_array()
            .unwrap_or_default()
            .iter()
            .find(|g| {
                ["NZBName", "NZBFilename"].iter().any(|field| {
                    g.member(field)
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.trim_end_matches(".nzb") == stem)
                })
            })
            .and_then(|g| g.member("NZBID").and_then(Value::as_i64))
            .map(|id| id.to_string()))
    }

    async fn edit_queue(&self, command: &str, nzb_id: i64) -> bool {
        let params = [
            Value::from(command),
            Value::Int(0),
            Value::from(""),
            Value::Array(vec![Value::Int(nzb_id)]),
        ];
        match self.call("editqueue", &params).await {
            Ok(Value::Bool(done)) => done,
            Ok(other) => {
                tracing::debug!(command, nzb_id, result = ?other, "unexpected editqueue reply");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, command, nzb_id, "editqueue failed");
                false
            }
        }
    }
}

/// 64-bit size from NZBGet's split Hi/Lo fields
fn split_size(group: &Value, prefix: &str) -> u64 {
    let part = |suffix: &str| {
        group
            .member(&format!("{}{}", prefix, suffix))
            .and_then(Value::as_i64)
            .unwrap_or(0) as u64
            & 0xffff_ffff
    };
    (part("Hi") << 32) | part("Lo")
}

fn group_progress(group: &Value) -> DownloadProgress {
    let total = split_size(group, "FileSize");
    let remaining = split_size(group, "RemainingSize");
    let progress = if total == 0 {
        0
    } else {
        (total.saturating_sub(remaining) * 100 / total) as u8
    };
    let status = group.member("Status").and_then(Value::as_str).unwrap_or("");
    match status {
        "QUEUED" | "PAUSED" => DownloadProgress {
            progress,
            state: DownloadState::Queued,
            message: None,
        },
        // PP_QUEUED, LOADING_PARS, VERIFYING_SOURCES, REPAIRING, UNPACKING, MOVING, ...
        s if !s.is_empty() && s != "DOWNLOADING" && s != "FETCHING" => {
            DownloadProgress::downloading(99)
        }
        _ => DownloadProgress::downloading(progress),
    }
}

fn history_progress(entry: &Value) -> DownloadProgress {
    let status = entry.member("Status").and_then(Value::as_str).unwrap_or("");
    if status.starts_with("SUCCESS") {
        DownloadProgress::completed()
    } else if status.starts_with("FAILURE") || status.starts_with("DELETED") {
        DownloadProgress::failed(format!("NZBGet reports {}", status))
    } else {
        // WARNING/* still counts as finished for NZBGet
        DownloadProgress::completed()
    }
}

fn parse_id(external_id: &str) -> ClientResult<i64> {
    external_id
        .parse()
        .map_err(|_| ClientError::Protocol {
            backend: KIND,
            message: format!("invalid NZBGet id '{}'", external_id),
            body: None,
        })
}

#[async_trait]
impl DownloadClient for NzbgetClient {
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
        let content = match &request.source {
            DownloadSource::Url(url) => url.clone(),
            DownloadSource::Content { bytes, .. } => STANDARD.encode(bytes),
            DownloadSource::Magnet(_) => {
                return Err(ClientError::Rejected {
                    backend: KIND,
                    reason: "magnet links cannot be sent to a usenet downloader".into(),
                });
            }
        };
        let nzb_name = format!("{}.nzb", request.title);
        let params = [
            Value::from(nzb_name.as_str()),
            Value::from(content),
            Value::from(self.config.category.clone().unwrap_or_default()),
            Value::Int(i64::from(self.config.priority)),
            Value::Bool(false),
            Value::Bool(false),
            Value::from(""),
            Value::Int(0),
            Value::from("SCORE"),
        ];

        match self.call("append", &params).await? {
            Value::Int(id) if id > 0 => {
                tracing::info!(title = %request.title, nzb_id = id, "sent to NZBGet");
                Ok(Submission::with_id(id.to_string()))
            }
            Value::Int(id) => Err(ClientError::Rejected {
                backend: KIND,
                reason: format!("append returned {}", id),
            }),
            Value::Bool(true) => {
                tracing::info!(title = %request.title, "sent to NZBGet, looking up id");
                match self.find_by_name(&nzb_name).await {
                    Ok(Some(id)) => Ok(Submission::with_id(id)),
                    Ok(None) => {
                        let e = ClientError::IdentifierNotFound {
                            backend: KIND,
                            source_url: request.source_url().to_string(),
                        };
                        tracing::warn!(error = %e, "accepted without an identifier");
                        Ok(Submission::without_id())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "listgroups scan for new NZB failed");
                        Ok(Submission::without_id())
                    }
                }
            }
            Value::Bool(false) => Err(ClientError::Rejected {
                backend: KIND,
                reason: "append returned false".into(),
            }),
            other => Err(ClientError::Protocol {
                backend: KIND,
                message: format!("unexpected append result {:?}", other),
                body: None,
            }),
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let nzb_id = parse_id(external_id)?;
        if let Some(group) = self.find_group(nzb_id).await? {
            return Ok(group_progress(&group));
        }
        if let Some(entry) = self.find_history(nzb_id).await? {
            return Ok(history_progress(&entry));
        }
        Ok(DownloadProgress::pending())
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        let Ok(nzb_id) = parse_id(external_id) else {
            return false;
        };
        let (queue_cmd, history_cmd) = if delete_data {
            ("GroupFinalDelete", "HistoryFinalDelete")
        } else {
            ("GroupDelete", "HistoryDelete")
        };
        if self.edit_queue(queue_cmd, nzb_id).await {
            return true;
        }
        self.edit_queue(history_cmd, nzb_id).await
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.call("version", &[]).await {
            Ok(version) => ConnectionTestResult::ok(
                KIND,
                started.elapsed(),
                format!("version {}", version.as_str().unwrap_or("unknown")),
            ),
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }
}
