//! Synology DownloadStation adapter (usenet and torrent).
//!
//! DownloadStation does not return an id from `create`; the new task is located by
//! listing tasks and matching the submitted URI.

use super::session::SessionCache;
use super::{ClientCapabilities, DownloadClient, SubmitRequest, Submission, http};
use crate::config::{PollPolicy, SynologyConfig};
use crate::error::{ClientError, ClientResult, Result};
use crate::retry::{Attempt, PollError, Sleeper, poll_until};
use crate::types::{BackendKind, ConnectionTestResult, DownloadProgress, DownloadState, MediaKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

const TASK_API: &str = "SYNO.DownloadStation.Task";
const AUTH_API: &str = "SYNO.API.Auth";
const SESSION_NAME: &str = "DownloadStation";

/// Error codes meaning the sid is no longer valid
const SESSION_ERRORS: [i64; 4] = [105, 106, 107, 119];

#[derive(Clone, Debug, PartialEq)]
struct SynoSession {
    auth_path: String,
    task_path: String,
    sid: String,
}

/// Which call an error code came from; codes 400+ mean different things per call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApiCall {
    Query,
    Login,
    Create,
    Other,
}

/// DownloadStation client
pub struct SynologyClient {
    config: SynologyConfig,
    media_kind: MediaKind,
    webapi_url: String,
    http: reqwest::Client,
    session: SessionCache<SynoSession>,
    lookup: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SynologyClient {
    /// Build a client for usenet or torrent tasks; `lookup` bounds the search for new tasks
    pub fn new(
        config: SynologyConfig,
        media_kind: MediaKind,
        lookup: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let webapi_url = format!("{}/webapi", config.endpoint.base_url()?);
        let http = http::build_client(&config.endpoint)?;
        Ok(Self {
            config,
            media_kind,
            webapi_url,
            http,
            session: SessionCache::new(),
            lookup,
            sleeper,
        })
    }

    fn backend(&self) -> BackendKind {
        match self.media_kind {
            MediaKind::Usenet => BackendKind::SynologyNzb,
            MediaKind::Torrent => BackendKind::SynologyTorrent,
        }
    }

    async fn get(&self, path: &str, params: &[(&str, String)], call: ApiCall) -> ClientResult<Value> {
        let backend = self.backend();
        let request = self
            .http
            .get(format!("{}/{}", self.webapi_url, path))
            .query(params);
        let response = http::send(backend, request).await?;
        let body = http::json(backend, response).await?;
        if body["success"].as_bool() == Some(true) {
            return Ok(body["data"].clone());
        }

        let code = body["error"]["code"].as_i64().unwrap_or(100);
        let message = error_message(code, call);
        if SESSION_ERRORS.contains(&code) || call == ApiCall::Login {
            Err(ClientError::AuthFailed { backend, message })
        } else {
            Err(ClientError::Rejected {
                backend,
                reason: message,
            })
        }
    }

    async fn login(&self) -> ClientResult<SynoSession> {
        let query = [
            ("api", "SYNO.API.Info".to_string()),
            ("version", "1".to_string()),
            ("method", "query".to_string()),
            ("query", format!("{},{}", AUTH_API, TASK_API)),
        ];
        let info = self.get("query.cgi", &query, ApiCall::Query).await?;
        let path_of = |api: &str| {
            info[api]["path"].as_str().map(str::to_string).ok_or_else(|| {
                ClientError::protocol(self.backend(), format!("no path for {}", api), info.to_string())
            })
        };
        let auth_path = path_of(AUTH_API)?;
        let task_path = path_of(TASK_API)?;

        let login = [
            ("api", AUTH_API.to_string()),
            ("version", "2".to_string()),
            ("method", "login".to_string()),
            ("account", self.config.endpoint.username.clone().unwrap_or_default()),
            ("passwd", self.config.endpoint.password.clone().unwrap_or_default()),
            ("session", SESSION_NAME.to_string()),
            ("format", "sid".to_string()),
        ];
        let data = self.get(&auth_path, &login, ApiCall::Login).await?;
        let sid = data["sid"].as_str().map(str::to_string).ok_or_else(|| {
            ClientError::protocol(self.backend(), "login returned no sid", data.to_string())
        })?;
        tracing::debug!(backend = %self.backend(), "Synology session established");
        Ok(SynoSession {
            auth_path,
            task_path,
            sid,
        })
    }

    async fn logout(&self, session: &SynoSession) {
        let params = [
            ("api", AUTH_API.to_string()),
            ("version", "1".to_string()),
            ("method", "logout".to_string()),
            ("session", SESSION_NAME.to_string()),
            ("_sid", session.sid.clone()),
        ];
        if let Err(e) = self.get(&session.auth_path, &params, ApiCall::Other).await {
            tracing::debug!(error = %e, "Synology logout failed");
        }
    }

    /// Call a DownloadStation.Task method with the cached session
    async fn task(&self, method: &str, extra: &[(&str, String)], call: ApiCall) -> ClientResult<Value> {
        self.session
            .run(
                || self.login(),
                |session| async move {
                    let mut params = vec![
                        ("api", TASK_API.to_string()),
                        ("version", "1".to_string()),
                        ("method", method.to_string()),
                        ("_sid", session.sid.clone()),
                    ];
                    params.extend(extra.iter().cloned());
                    self.get(&session.task_path, &params, call).await
                },
            )
            .await
    }

    async fn find_task_by_uri(&self, uri: &str) -> ClientResult<Option<String>> {
        let data = self
            .task("list", &[("additional", "detail".to_string())], ApiCall::Other)
            .await?;
        let tasks = data["tasks"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        for task in tasks {
            if task["status"].as_str() == Some("error") {
                tracing::warn!(
                    title = task["title"].as_str().unwrap_or_default(),
                    detail = task["status_extra"]["error_detail"].as_str().unwrap_or("no error details"),
                    "Synology task failed"
                );
                continue;
            }
            if task["additional"]["detail"]["uri"].as_str() == Some(uri) {
                return Ok(task["id"].as_str().map(str::to_string));
            }
        }
        Ok(None)
    }
}

/// DownloadStation error codes, per call
fn error_message(code: i64, call: ApiCall) -> String {
    let generic = match code {
        100 => Some("Unknown error"),
        101 => Some("Invalid parameter"),
        102 => Some("The requested API does not exist"),
        103 => Some("The requested method does not exist"),
        104 => Some("The requested version does not support the functionality"),
        105 => Some("The logged in session does not have permission"),
        106 => Some("Session timeout"),
        107 => Some("Session interrupted by duplicate login"),
        119 => Some("Session id not found"),
        _ => None,
    };
    let specific = match (call, code) {
        (ApiCall::Login, 400) => Some("No such account or incorrect password"),
        (ApiCall::Login, 401) => Some("Account disabled"),
        (ApiCall::Login, 402) => Some("Permission denied"),
        (ApiCall::Login, 403) => Some("2-step verification code required"),
        (ApiCall::Login, 404) => Some("Failed to authenticate 2-step verification code"),
        (ApiCall::Create, 400) => Some("File upload failed"),
        (ApiCall::Create, 401) => Some("Max number of tasks reached"),
        (ApiCall::Create, 402) => Some("Destination denied"),
        (ApiCall::Create, 403) => Some("Destination does not exist"),
        (ApiCall::Create, 404) => Some("Invalid task id"),
        (ApiCall::Create, 405) => Some("Invalid task action"),
        (ApiCall::Create, 406) => Some("No default destination"),
        (ApiCall::Create, 407) => Some("Set destination failed"),
        (ApiCall::Create, 408) => Some("File does not exist"),
        _ => None,
    };
    match specific.or(generic) {
        Some(message) => message.to_string(),
        None => format!("unknown error code {} ({:?})", code, call),
    }
}

fn task_progress(task: &Value) -> DownloadProgress {
    let status = task["status"].as_str().unwrap_or_default();
    match status {
        "finished" | "seeding" => DownloadProgress::completed(),
        "error" => DownloadProgress::failed(
            task["status_extra"]["error_detail"]
                .as_str()
                .unwrap_or("DownloadStation reports an error"),
        ),
        "waiting" => DownloadProgress::pending(),
        _ => {
            let size = task["size"].as_u64().unwrap_or(0);
            let done = task["additional"]["transfer"]["size_downloaded"]
                .as_u64()
                .unwrap_or(0);
            let progress = if size == 0 {
                0
            } else {
                (done.min(size) * 100 / size) as u8
            };
            match status {
                "paused" => DownloadProgress {
                    progress,
                    state: DownloadState::Queued,
                    message: None,
                },
                "finishing" | "hash_checking" | "extracting" => DownloadProgress::downloading(99),
                _ => DownloadProgress::downloading(progress),
            }
        }
    }
}

#[async_trait]
impl DownloadClient for SynologyClient {
    fn kind(&self) -> BackendKind {
        self.backend()
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            progress: true,
            ..Default::default()
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        let backend = self.backend();
        let Some(uri) = request.source.as_url().map(str::to_string) else {
            return Err(ClientError::Rejected {
                backend,
                reason: "DownloadStation accepts URIs only".into(),
            });
        };

        let mut params = vec![("uri", uri.clone())];
        if let Some(dir) = self.config.download_dir.as_deref().filter(|d| !d.is_empty()) {
            params.push(("destination", dir.to_string()));
        }
        self.task("create", &params, ApiCall::Create).await?;
        tracing::info!(title = %request.title, backend = %backend, "sent to DownloadStation");

        let found = poll_until(&self.lookup, self.sleeper.as_ref(), |_| {
            let uri = uri.clone();
            async move {
                Ok::<_, ClientError>(match self.find_task_by_uri(&uri).await? {
                    Some(id) => Attempt::Done(id),
                    None => Attempt::Again,
                })
            }
        })
        .await;

        match found {
            Ok(id) => Ok(Submission::with_id(id)),
            Err(PollError::Exhausted { .. }) => {
                let e = ClientError::IdentifierNotFound {
                    backend,
                    source_url: uri,
                };
                tracing::warn!(error = %e, "accepted without an identifier");
                Ok(Submission::without_id())
            }
            Err(PollError::Aborted(e)) => {
                tracing::warn!(error = %e, "DownloadStation task list failed after create");
                Ok(Submission::without_id())
            }
        }
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        let params = [
            ("id", external_id.to_string()),
            ("additional", "detail,transfer".to_string()),
        ];
        let data = self.task("getinfo", &params, ApiCall::Other).await?;
        Ok(match data["tasks"].as_array().and_then(|t| t.first()) {
            Some(task) => task_progress(task),
            None => DownloadProgress::pending(),
        })
    }

    async fn remove(&self, external_id: &str, _delete_data: bool) -> bool {
        let params = [
            ("id", external_id.to_string()),
            ("force_complete", "false".to_string()),
        ];
        match self.task("delete", &params, ApiCall::Other).await {
            Ok(data) => {
                let code = data
                    .as_array()
                    .and_then(|d| d.first())
                    .and_then(|d| d["error"].as_i64())
                    .unwrap_or(0);
                if code != 0 {
                    tracing::warn!(
                        task = external_id,
                        reason = %error_message(code, ApiCall::Other),
                        "DownloadStation delete refused"
                    );
                }
                code == 0
            }
            Err(e) => {
                tracing::warn!(error = %e, task = external_id, "DownloadStation delete failed");
                false
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.login().await {
            Ok(session) => {
                let latency = started.elapsed();
                self.logout(&session).await;
                ConnectionTestResult::ok(self.backend(), latency, "login successful")
            }
            Err(e) => ConnectionTestResult::failed(self.backend(), e.to_string()),
        }
    }

    async fn close(&self) {
        if let Some(session) = self.session.take().await {
            self.logout(&session).await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_codes_have_their_own_messages() {
        assert_eq!(
            error_message(400, ApiCall::Login),
            "No such account or incorrect password"
        );
        assert_eq!(error_message(400, ApiCall::Create), "File upload failed");
        assert_eq!(error_message(106, ApiCall::Other), "Session timeout");
        assert_eq!(error_message(105, ApiCall::Create), "The logged in session does not have permission");
        assert!(error_message(999, ApiCall::Other).contains("999"));
    }

    #[test]
    fn task_states_map_to_progress() {
        assert_eq!(
            task_progress(&json!({ "status": "waiting" })),
            DownloadProgress::pending()
        );
        assert_eq!(
            task_progress(&json!({ "status": "seeding" })).state,
            DownloadState::Completed
        );
        let failed = task_progress(
            &json!({ "status": "error", "status_extra": { "error_detail": "broken_link" } }),
        );
        assert_eq!(failed.message.as_deref(), Some("broken_link"));

        let downloading = task_progress(&json!({
            "status": "downloading",
            "size": 200,
            "additional": { "transfer": { "size_downloaded": 50 } }
        }));
        assert_eq!(downloading, DownloadProgress::downloading(25));
    }
}
