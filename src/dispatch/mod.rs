//! Hands one wanted item to the single backend configured for its media kind.

use crate::clients::{
    ActiveClient, ClientRegistry, DownloadSource, SubmitRequest, Submission, http, torrent,
};
use crate::config::ConfigReader;
use crate::db::Database;
use crate::error::{ClientError, ClientResult, Error, Result};
use crate::reconciler::Reconciler;
use crate::types::{BackendHandle, BackendKind, MediaKind, WantedId, WantedItem, WantedStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Upper bound for downloading a .torrent before submission
const TORRENT_FETCH_TIMEOUT: Duration = Duration::from_secs(90);

/// Result of a dispatch that reached a backend
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// The backend accepted the item
    Snatched(BackendHandle),
    /// The backend refused the item or could not be reached
    Failed {
        /// Reason stored on the wanted item
        reason: String,
    },
}

impl DispatchOutcome {
    /// Whether the item is now Snatched
    pub fn is_snatched(&self) -> bool {
        matches!(self, DispatchOutcome::Snatched(_))
    }
}

/// Submits wanted items and hands every outcome to the [`Reconciler`]
///
/// There is no fallback: an item goes to the active backend of its media kind or nowhere.
pub struct Dispatcher {
    db: Arc<Database>,
    registry: Arc<ClientRegistry>,
    reconciler: Arc<Reconciler>,
    config: ConfigReader,
    http: reqwest::Client,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts one running dispatch for [`Dispatcher::wait_idle`]
struct InFlight<'a>(&'a Dispatcher);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Dispatcher {
    /// Create a dispatcher sharing the coordinator's store, clients, reconciler and
    /// configuration
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ClientRegistry>,
        reconciler: Arc<Reconciler>,
        config: ConfigReader,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TORRENT_FETCH_TIMEOUT)
            .user_agent(concat!("librarian-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            db,
            registry,
            reconciler,
            config,
            http,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    /// Refuse every dispatch from now on
    pub fn begin_shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Whether new dispatches are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of dispatches currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no dispatch is running; false if `timeout` elapsed first
    ///
    /// Call after [`begin_shutdown`](Self::begin_shutdown) so no new dispatch can start.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    /// Submit a Wanted item to its backend
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown began
    /// - [`Error::NotFound`] if the item does not exist
    /// - [`Error::ConfigInvalid`] if no backend is enabled for the item's media kind; the
    ///   item stays Wanted
    /// - [`Error::DuplicateSubmission`] if this item or another item for the same book
    ///   is already Pending or Snatched
    /// - [`Error::Other`] if the item is Processed, Failed or Skipped
    ///
    /// A backend refusal is not an error: it is recorded on the item and returned as
    /// [`DispatchOutcome::Failed`]. So is a torrent whose backend name contains a reject
    /// word; the task is removed again.
    pub async fn dispatch(&self, id: WantedId) -> Result<DispatchOutcome> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(self);
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let item = self
            .db
            .get_wanted(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("wanted item {}", id)))?;

        match item.status {
            WantedStatus::Wanted => {}
            WantedStatus::Pending | WantedStatus::Snatched => {
                return Err(Error::DuplicateSubmission {
                    book_id: item.book_id.to_string(),
                });
            }
            other => {
                return Err(Error::Other(format!(
                    "wanted item {} is {}, not Wanted",
                    id, other
                )));
            }
        }

        let Some(active) = self.registry.client_for(item.media_kind).await else {
            tracing::warn!(
                wanted_id = id.0,
                media_kind = %item.media_kind,
                "No {} download method is enabled",
                item.media_kind
            );
            return Err(Error::config(
                format!("No {} download method is enabled", item.media_kind),
                match item.media_kind {
                    MediaKind::Usenet => "usenet",
                    MediaKind::Torrent => "torrent",
                },
            ));
        };

        if !self.db.claim_for_dispatch(id).await? {
            return Err(Error::DuplicateSubmission {
                book_id: item.book_id.to_string(),
            });
        }

        let kind = active.client.kind();
        tracing::info!(
            wanted_id = id.0,
            book_id = %item.book_id,
            backend = %kind,
            "Sending {} to {}",
            item.title,
            kind
        );
        let request = self.submit_request(&item, kind).await;
        let (item, result) = match active.client.submit(&request).await {
            Ok(submission) => self.check_task_name(&active, item, submission).await?,
            Err(e) => (item, Err(e)),
        };
        let outcome = self.reconciler.on_submit_result(&item, kind, result).await?;

        if let DispatchOutcome::Snatched(handle) = &outcome
            && let Some(external_id) = handle.external_id.as_deref()
        {
            apply_settings(&active, external_id).await;
        }

        Ok(outcome)
    }

    /// Request for an item; a torrent URL is fetched so its info hash is known up front
    ///
    /// When the fetch fails or the body is not a torrent, the URL is submitted as is and
    /// the backend has to find the task in its list.
    async fn submit_request(&self, item: &WantedItem, backend: BackendKind) -> SubmitRequest {
        let mut request = SubmitRequest::for_item(item);
        if item.media_kind != MediaKind::Torrent {
            return request;
        }
        let DownloadSource::Url(raw) = &request.source else {
            return request;
        };

        let url = torrent::clean_torrent_url(raw);
        request.source = match http::fetch_bytes(backend, &self.http, &url).await {
            Ok(bytes) if torrent::info_hash(&bytes).is_some() => DownloadSource::Content {
                file_name: format!("{}.torrent", item.title),
                bytes,
                origin: Some(url),
            },
            Ok(bytes) => {
                tracing::warn!(
                    wanted_id = item.id.0,
                    url = %url,
                    size = bytes.len(),
                    "Fetched file is not a torrent, sending the URL"
                );
                DownloadSource::Url(url)
            }
            Err(e) => {
                tracing::warn!(
                    wanted_id = item.id.0,
                    url = %url,
                    error = %e,
                    "Could not fetch torrent, sending the URL"
                );
                DownloadSource::Url(url)
            }
        };
        request
    }

    /// Re-check the name a torrent backend gave the task against the reject words
    ///
    /// A rejected name removes the task with its data and turns the submission into a
    /// refusal. An accepted name replaces the item's title.
    async fn check_task_name(
        &self,
        active: &ActiveClient,
        mut item: WantedItem,
        submission: Submission,
    ) -> Result<(WantedItem, ClientResult<Submission>)> {
        if item.media_kind != MediaKind::Torrent {
            return Ok((item, Ok(submission)));
        }
        let Some(external_id) = submission.external_id.clone() else {
            return Ok((item, Ok(submission)));
        };
        let Some(name) = active
            .client
            .task_name(&external_id)
            .await
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && *n != item.title)
        else {
            return Ok((item, Ok(submission)));
        };

        let backend = active.client.kind();
        if name
            .to_ascii_uppercase()
            .contains(&external_id.to_ascii_uppercase())
        {
            tracing::warn!(
                backend = %backend,
                external_id = %external_id,
                "{}: name contains hash, probably unresolved magnet",
                backend
            );
            return Ok((item, Ok(submission)));
        }

        let config = self.config.snapshot();
        if let Some(word) = config.reject_words.matching(item.library, &name) {
            tracing::info!(
                wanted_id = item.id.0,
                backend = %backend,
                name = %name,
                word,
                "Rejecting torrent name {}, contains {}",
                name,
                word
            );
            if !active.client.remove(&external_id, true).await {
                tracing::warn!(
                    backend = %backend,
                    external_id = %external_id,
                    "Could not remove rejected task"
                );
            }
            let reason = format!("task name {} contains rejected word {}", name, word);
            return Ok((item, Err(ClientError::Rejected { backend, reason })));
        }

        if self.db.set_pending_title(item.id, &name).await? {
            tracing::debug!(
                wanted_id = item.id.0,
                backend = %backend,
                "Setting torrent name to [{}]",
                name
            );
            item.title = name;
        }
        Ok((item, Ok(submission)))
    }
}

/// Label, seed ratio and download path, each only where the backend supports it
async fn apply_settings(active: &ActiveClient, external_id: &str) {
    let capabilities = active.client.capabilities();
    let settings = &active.settings;
    let backend = active.client.kind();

    if let Some(label) = settings.label.as_deref()
        && capabilities.labels
        && !active.client.set_label(external_id, label).await
    {
        tracing::warn!(backend = %backend, external_id, label, "Could not set label");
    }
    if let Some(ratio) = settings.seed_ratio
        && capabilities.seed_ratio
        && !active.client.set_seed_ratio(external_id, ratio).await
    {
        tracing::warn!(backend = %backend, external_id, ratio, "Could not set seed ratio");
    }
    if let Some(path) = settings.download_dir.as_deref()
        && capabilities.download_path
        && !active.client.set_download_path(external_id, path).await
    {
        tracing::warn!(backend = %backend, external_id, path, "Could not set download path");
    }
}
