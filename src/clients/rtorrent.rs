//! rTorrent XML-RPC adapter.

use super::xmlrpc::{self, Value};
use super::{ClientCapabilities, DownloadClient, DownloadSource, SubmitRequest, Submission, http};
use crate::config::{PollPolicy, RtorrentConfig};
use crate::error::{ClientError, ClientResult, Result};
use crate::retry::{Attempt, PollError, Sleeper, poll_until};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

const KIND: BackendKind = BackendKind::Rtorrent;

/// rTorrent client
///
/// rTorrent answers `load.*` with 0 whatever happens, so a hash that is not derivable
/// from the payload is found by diffing the main view before and after the load.
pub struct RtorrentClient {
    config: RtorrentConfig,
    rpc_url: String,
    http: reqwest::Client,
    lookup: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RtorrentClient {
    /// Build a client; `lookup` bounds the search for a freshly loaded torrent
    pub fn new(config: RtorrentConfig, lookup: PollPolicy, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let rpc_url = config.endpoint.base_url()?;
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            rpc_url,
            http,
            lookup,
            sleeper,
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> ClientResult<Value> {
        let request = http::with_basic_auth(self.http.post(&self.rpc_url), &self.config.endpoint);
        xmlrpc::call(KIND, request, method, params).await
    }

    async fn main_view(&self) -> ClientResult<HashSet<String>> {
        let list = self
            .call("download_list", &[Value::from(""), Value::from("main")])
            .await?;
        Ok(list
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_ascii_uppercase)
            .collect())
    }

    async fn hash_call(&self, method: &str, hash: &str, extra: Option<Value>) -> ClientResult<Value> {
        let mut params = vec![Value::from(hash)];
        params.extend(extra);
        self.call(method, &params).await
    }

    async fn hash_call_ok(&self, method: &str, hash: &str, extra: Option<Value>) -> bool {
        match self.hash_call(method, hash, extra).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, method, hash, "rTorrent call failed");
                false
            }
        }
    }

    /// Wait for a torrent not in `before` to show up in the main view
    async fn find_new(&self, before: &HashSet<String>) -> Option<String> {
        let found = poll_until(&self.lookup, self.sleeper.as_ref(), move |_| async move {
            let after = self.main_view().await?;
            Ok::<_, ClientError>(match after.difference(before).next() {
                Some(hash) => Attempt::Done(hash.clone()),
                None => Attempt::Again,
            })
        })
        .await;
        match found {
            Ok(hash) => Some(hash),
            Err(PollError::Exhausted { attempts, .. }) => {
                tracing::debug!(attempts, "no new torrent appeared in rTorrent");
                None
            }
            Err(PollError::Aborted(e)) => {
                tracing::warn!(error = %e, "rTorrent download_list failed");
                None
            }
        }
    }
}

#[async_trait]
impl DownloadClient for RtorrentClient {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            labels: true,
            seed_ratio: false,
            download_path: true,
            progress: true,
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let known = request.source.known_hash().map(|h| h.to_ascii_uppercase());
        let before = match known {
            Some(_) => HashSet::new(),
            None => self.main_view().await?,
        };

        let (method, payload) = match &request.source {
            DownloadSource::Magnet(uri) | DownloadSource::Url(uri) => {
                ("load.start", Value::from(uri.as_str()))
            }
            DownloadSource::Content { bytes, .. } => ("load.raw_start", Value::Base64(bytes.clone())),
        };
        match self.call(method, &[Value::from(""), payload]).await? {
            Value::Int(0) => {}
            other => {
                return Err(ClientError::Rejected {
                    backend: KIND,
                    reason: format!("{} returned {:?}", method, other),
                });
            }
        }
        tracing::info!(title = %request.title, "sent to rTorrent");

        if let Some(hash) = known {
            return Ok(Submission::with_id(hash));
        }
        match self.find_new(&before).await {
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
        let hash = external_id.to_ascii_uppercase();
        let complete = match self.hash_call("d.complete", &hash, None).await {
            Ok(v) => v.as_i64().unwrap_or(0),
            // unknown hash: not loaded yet
            Err(ClientError::Rejected { .. }) => return Ok(DownloadProgress::pending()),
            Err(e) => return Err(e),
        };
        if complete == 1 {
            return Ok(DownloadProgress::completed());
        }

        let done = self.hash_call("d.bytes_done", &hash, None).await?;
        let size = self.hash_call("d.size_bytes", &hash, None).await?;
        let message = self.hash_call("d.message", &hash, None).await?;

        let done = done.as_i64().unwrap_or(0).max(0) as u64;
        let size = size.as_i64().unwrap_or(0).max(0) as u64;
        let message = message.as_str().unwrap_or_default();

        if done == 0 && !message.is_empty() {
            return Ok(DownloadProgress::failed(message));
        }
        if size == 0 {
            // magnet metadata not resolved yet
            return Ok(DownloadProgress::pending());
        }
        Ok(DownloadProgress::downloading(
            (done.min(size) * 100 / size) as u8,
        ))
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        let hash = external_id.to_ascii_uppercase();
        if delete_data {
            tracing::debug!(hash = %hash, "rTorrent erases the task only; downloaded data stays");
        }
        self.hash_call_ok("d.erase", &hash, None).await
    }

    async fn set_label(&self, external_id: &str, label: &str) -> bool {
        let hash = external_id.to_ascii_uppercase();
        self.hash_call_ok("d.custom1.set", &hash, Some(Value::from(label)))
            .await
    }

    async fn set_download_path(&self, external_id: &str, path: &str) -> bool {
        let hash = external_id.to_ascii_uppercase();
        // the directory of a started download cannot change
        self.hash_call_ok("d.stop", &hash, None).await
            && self
                .hash_call_ok("d.directory.set", &hash, Some(Value::from(path)))
                .await
            && self.hash_call_ok("d.start", &hash, None).await
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.call("system.client_version", &[]).await {
            Ok(version) => ConnectionTestResult::ok(
                KIND,
                started.elapsed(),
                format!("version {}", version.as_str().unwrap_or("unknown")),
            ),
            Err(e) => ConnectionTestResult::failed(KIND, e.to_string()),
        }
    }
}
