//! Reconciliation of wanted items with what the backends report.
//!
//! The reconciler is the only writer of post-submission state:
//!
//! - [`Reconciler::on_submit_result`] records the outcome of a dispatch (Pending to
//!   Snatched or Failed) and mirrors it onto the book.
//! - [`Reconciler::on_post_process_confirmed`] turns a Snatched row into Processed once
//!   the imported file exists.
//! - [`Reconciler::on_reconcile_sweep`] walks every Snatched row, aborts tasks that are
//!   too old and fails tasks the backend reports as failed or that never make progress.
//!
//! Every write is a compare-and-set, so a sweep racing a confirmation can never move a
//! row twice. Notifications are fired after the write and never affect it.

use crate::clients::{ActiveClient, ClientRegistry, DownloadClient, Submission};
use crate::config::{ConfigReader, PollPolicy};
use crate::db::Database;
use crate::dispatch::DispatchOutcome;
use crate::error::{ClientError, ClientResult, Result};
use crate::notify::NotificationDispatcher;
use crate::retry::{Attempt, PollError, Sleeper, poll_until};
use crate::types::{
    BackendHandle, BackendKind, BookId, BookStatus, DownloadProgress, DownloadState, Event,
    WantedId, WantedItem, WantedStatus,
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Result of confirming a post-processed file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The book is not in the record store; nothing was changed
    UnknownBook,
    /// The imported file does not exist; the item stays Snatched
    FileMissing,
    /// No wanted item for the book is Snatched
    NotSnatched,
    /// The item was already confirmed
    AlreadyProcessed,
    /// The item moved to Processed
    Processed(WantedId),
}

/// What one reconcile sweep did with each Snatched item
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Backend reports progress or a queued task
    pub active: Vec<WantedId>,
    /// Backend reports completion; waiting for post-processing to confirm
    pub completed: Vec<WantedId>,
    /// Older than the configured task age; failed and removed from the backend
    pub aborted: Vec<WantedId>,
    /// Failed by the backend or without progress after every poll
    pub failed: Vec<WantedId>,
    /// Unknown book, unconfigured backend, or a backend that refused our credentials
    pub skipped: Vec<WantedId>,
    /// No identifier or no progress reporting; nothing to check
    pub left: Vec<WantedId>,
}

impl SweepReport {
    /// Number of items the sweep looked at
    pub fn total(&self) -> usize {
        self.active.len()
            + self.completed.len()
            + self.aborted.len()
            + self.failed.len()
            + self.skipped.len()
            + self.left.len()
    }
}

enum Verdict {
    Active(DownloadProgress),
    Completed,
    Failed(String),
}

/// Writes outcomes to the record store, sweeps in-flight handles and fires notifications
pub struct Reconciler {
    db: Arc<Database>,
    config: ConfigReader,
    registry: Arc<ClientRegistry>,
    notifications: RwLock<NotificationDispatcher>,
    event_tx: broadcast::Sender<Event>,
    sleeper: Arc<dyn Sleeper>,
}

impl Reconciler {
    /// Create a reconciler over the shared store and client registry
    pub fn new(
        db: Arc<Database>,
        config: ConfigReader,
        registry: Arc<ClientRegistry>,
        notifications: NotificationDispatcher,
        event_tx: broadcast::Sender<Event>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            db,
            config,
            registry,
            notifications: RwLock::new(notifications),
            event_tx,
            sleeper,
        }
    }

    /// Swap the notifiers after a configuration change
    pub async fn set_notifications(&self, notifications: NotificationDispatcher) {
        *self.notifications.write().await = notifications;
    }

    /// Record the outcome of submitting a Pending item to `kind`
    ///
    /// Accepted: Pending to Snatched with a fresh handle, book to Snatched, snatch
    /// notification. Refused: Pending to Failed with the failure reason.
    pub async fn on_submit_result(
        &self,
        item: &WantedItem,
        kind: BackendKind,
        result: ClientResult<Submission>,
    ) -> Result<DispatchOutcome> {
        let submission = match result {
            Ok(submission) => submission,
            Err(e) => {
                let reason = e.failure_reason();
                tracing::warn!(
                    wanted_id = item.id.0,
                    backend = %kind,
                    title = %item.title,
                    error = %e,
                    "Submission failed"
                );
                if self
                    .db
                    .mark_failed(item.id, &[WantedStatus::Pending], &reason)
                    .await?
                {
                    self.event_tx
                        .send(Event::SubmissionFailed {
                            id: item.id,
                            title: item.title.clone(),
                            reason: reason.clone(),
                        })
                        .ok();
                }
                return Ok(DispatchOutcome::Failed { reason });
            }
        };

        let handle = BackendHandle {
            kind,
            external_id: submission.external_id,
            submitted_at: Utc::now(),
        };

        if !self.db.mark_snatched(item.id, &handle).await? {
            let reason = format!("{} left Pending before {} confirmed it", item.title, kind);
            tracing::warn!(wanted_id = item.id.0, backend = %kind, "{}", reason);
            return Ok(DispatchOutcome::Failed { reason });
        }

        self.db
            .set_book_status(&item.book_id, item.library, BookStatus::Snatched, None)
            .await?;

        tracing::info!(
            wanted_id = item.id.0,
            book_id = %item.book_id,
            backend = %kind,
            external_id = handle.external_id.as_deref().unwrap_or("-"),
            "{} snatched",
            item.title
        );
        if handle.external_id.is_none() {
            tracing::warn!(
                wanted_id = item.id.0,
                backend = %kind,
                "Backend accepted the item but no identifier was found; progress cannot be checked"
            );
        }

        self.event_tx
            .send(Event::Snatched {
                id: item.id,
                title: item.title.clone(),
                handle: handle.clone(),
            })
            .ok();
        self.notifications.read().await.snatch(&item.title);

        Ok(DispatchOutcome::Snatched(handle))
    }

    /// Confirm that post-processing imported `file_path` for `book_id`
    ///
    /// Safe to call repeatedly: only the first call for a Snatched item changes anything
    /// or notifies.
    pub async fn on_post_process_confirmed(
        &self,
        book_id: &BookId,
        file_path: &Path,
    ) -> Result<ConfirmOutcome> {
        if !self.db.book_exists(book_id).await? {
            tracing::warn!(book_id = %book_id, "Post-processed file for unknown book, skipping");
            return Ok(ConfirmOutcome::UnknownBook);
        }

        if !tokio::fs::try_exists(file_path).await.unwrap_or(false) {
            tracing::warn!(
                book_id = %book_id,
                path = %file_path.display(),
                "Post-processed file is missing"
            );
            return Ok(ConfirmOutcome::FileMissing);
        }

        let rows = self.db.list_wanted_for_book(book_id).await?;
        let Some(item) = rows.iter().find(|r| r.status == WantedStatus::Snatched) else {
            return Ok(
                if rows.iter().any(|r| r.status == WantedStatus::Processed) {
                    ConfirmOutcome::AlreadyProcessed
                } else {
                    ConfirmOutcome::NotSnatched
                },
            );
        };

        if !self.db.mark_processed(item.id).await? {
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        self.db
            .set_book_status(book_id, item.library, BookStatus::Open, None)
            .await?;

        tracing::info!(
            wanted_id = item.id.0,
            book_id = %book_id,
            path = %file_path.display(),
            "{} processed",
            item.title
        );
        self.event_tx
            .send(Event::Processed {
                id: item.id,
                book_id: book_id.clone(),
                title: item.title.clone(),
            })
            .ok();
        self.notifications.read().await.download(&item.title);

        Ok(ConfirmOutcome::Processed(item.id))
    }

    /// Check every Snatched item against its backend
    pub async fn on_reconcile_sweep(&self) -> Result<SweepReport> {
        let config = self.config.snapshot();
        let reconcile = &config.reconcile;
        let mut report = SweepReport::default();
        let mut unauthorized: HashSet<BackendKind> = HashSet::new();

        for item in self.db.list_wanted_by_status(WantedStatus::Snatched).await? {
            if !self.db.book_exists(&item.book_id).await? {
                tracing::debug!(
                    wanted_id = item.id.0,
                    book_id = %item.book_id,
                    "Snatched item for unknown book, skipping"
                );
                report.skipped.push(item.id);
                continue;
            }

            let Some(handle) = item.handle.clone() else {
                report.left.push(item.id);
                continue;
            };
            let active = self.registry.client_of_kind(handle.kind).await;

            if let Some(hours) = age_in_hours(&handle, reconcile.task_age_hours) {
                let reason = format!(
                    "{} was sent to {} {} hours ago",
                    item.title, handle.kind, hours
                );
                if self
                    .fail_in_flight(&item, &handle, active.as_ref(), &reason, reconcile.remove_data_on_abort)
                    .await?
                {
                    report.aborted.push(item.id);
                } else {
                    report.skipped.push(item.id);
                }
                continue;
            }

            let Some(active) = active else {
                tracing::debug!(
                    wanted_id = item.id.0,
                    backend = %handle.kind,
                    "Backend is no longer configured, skipping"
                );
                report.skipped.push(item.id);
                continue;
            };
            if unauthorized.contains(&handle.kind) {
                report.skipped.push(item.id);
                continue;
            }
            let Some(external_id) = handle.external_id.as_deref() else {
                report.left.push(item.id);
                continue;
            };
            if !active.client.capabilities().progress {
                report.left.push(item.id);
                continue;
            }

            match self
                .poll_progress(active.client.as_ref(), external_id, &reconcile.poll)
                .await
            {
                Ok(Verdict::Active(progress)) => {
                    tracing::debug!(
                        wanted_id = item.id.0,
                        backend = %handle.kind,
                        progress = progress.progress,
                        state = ?progress.state,
                        "Task is active"
                    );
                    report.active.push(item.id);
                }
                Ok(Verdict::Completed) => {
                    tracing::debug!(
                        wanted_id = item.id.0,
                        backend = %handle.kind,
                        "Task completed, waiting for post-processing"
                    );
                    report.completed.push(item.id);
                }
                Ok(Verdict::Failed(message)) => {
                    let changed = self
                        .fail_in_flight(&item, &handle, Some(&active), &message, reconcile.remove_data_on_abort)
                        .await?;
                    push_failed(&mut report, item.id, changed);
                }
                Err(PollError::Exhausted { attempts, .. }) => {
                    let reason = format!("{}: no progress after {} polls", item.title, attempts);
                    let changed = self
                        .fail_in_flight(&item, &handle, Some(&active), &reason, reconcile.remove_data_on_abort)
                        .await?;
                    push_failed(&mut report, item.id, changed);
                }
                Err(PollError::Aborted(e)) => {
                    tracing::warn!(
                        backend = %handle.kind,
                        error = %e,
                        "Backend refused status checks, skipping it for this sweep"
                    );
                    unauthorized.insert(handle.kind);
                    report.skipped.push(item.id);
                }
            }
        }

        tracing::debug!(
            checked = report.total(),
            active = report.active.len(),
            completed = report.completed.len(),
            aborted = report.aborted.len(),
            failed = report.failed.len(),
            "Reconcile sweep finished"
        );
        Ok(report)
    }

    async fn poll_progress(
        &self,
        client: &dyn DownloadClient,
        external_id: &str,
        policy: &PollPolicy,
    ) -> std::result::Result<Verdict, PollError<ClientError>> {
        poll_until(policy, self.sleeper.as_ref(), move |attempt| async move {
            match client.status(external_id).await {
                Ok(progress) => Ok(match progress.state {
                    DownloadState::Failed => Attempt::Done(Verdict::Failed(
                        progress
                            .message
                            .unwrap_or_else(|| "download failed".to_string()),
                    )),
                    DownloadState::Completed => Attempt::Done(Verdict::Completed),
                    DownloadState::Queued => Attempt::Done(Verdict::Active(progress)),
                    _ if progress.progress > 0 => Attempt::Done(Verdict::Active(progress)),
                    _ => Attempt::Again,
                }),
                Err(e) if e.is_auth() => Err(e),
                Err(e) => {
                    tracing::debug!(external_id, attempt, error = %e, "Status check failed");
                    Ok(Attempt::Again)
                }
            }
        })
        .await
    }

    /// Snatched to Failed, book back to Wanted, task removed from the backend
    async fn fail_in_flight(
        &self,
        item: &WantedItem,
        handle: &BackendHandle,
        active: Option<&ActiveClient>,
        reason: &str,
        delete_data: bool,
    ) -> Result<bool> {
        if !self
            .db
            .mark_failed(item.id, &[WantedStatus::Snatched], reason)
            .await?
        {
            tracing::debug!(wanted_id = item.id.0, "Item is no longer snatched");
            return Ok(false);
        }

        self.db
            .set_book_status(
                &item.book_id,
                item.library,
                BookStatus::Wanted,
                Some(BookStatus::Snatched),
            )
            .await?;

        if let (Some(active), Some(external_id)) = (active, handle.external_id.as_deref())
            && !active.client.remove(external_id, delete_data).await
        {
            tracing::warn!(
                wanted_id = item.id.0,
                backend = %handle.kind,
                external_id,
                "Could not remove task from backend"
            );
        }

        tracing::warn!(wanted_id = item.id.0, backend = %handle.kind, "{}", reason);
        self.event_tx
            .send(Event::TaskAborted {
                id: item.id,
                title: item.title.clone(),
                reason: reason.to_string(),
            })
            .ok();
        Ok(true)
    }
}

fn push_failed(report: &mut SweepReport, id: WantedId, changed: bool) {
    if changed {
        report.failed.push(id);
    } else {
        report.skipped.push(id);
    }
}

/// Hours since submission when the task is past `limit_hours` (0 disables)
fn age_in_hours(handle: &BackendHandle, limit_hours: u32) -> Option<i64> {
    if limit_hours == 0 {
        return None;
    }
    let hours = (Utc::now() - handle.submitted_at).num_hours();
    (hours >= i64::from(limit_hours)).then_some(hours)
}
