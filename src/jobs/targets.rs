//! Built-in job targets and the collaborator traits they drive

use super::{JobContext, JobId, JobTarget};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{BookId, NewWantedItem, WantedStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// A file that post-processing imported into the library
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedFile {
    /// Book the file belongs to
    pub book_id: BookId,
    /// Where the file ended up
    pub path: PathBuf,
}

/// Moves finished downloads into the library
#[async_trait]
pub trait PostProcessHook: Send + Sync {
    /// Import whatever is ready; returns the imported files
    async fn process(&self, config: &Config) -> Result<Vec<ProcessedFile>>;
}

/// Searches providers for wanted items
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Candidates found for the search job `job`
    async fn candidates(&self, job: JobId, config: &Config) -> Result<Vec<NewWantedItem>>;
}

/// Confirms imported files, sweeps in-flight tasks and unschedules itself when idle
pub struct PostProcessJob {
    hook: Option<Arc<dyn PostProcessHook>>,
}

impl PostProcessJob {
    /// Post-processor driving `hook`
    pub fn new(hook: Arc<dyn PostProcessHook>) -> Self {
        Self { hook: Some(hook) }
    }

    /// Post-processor that only sweeps
    pub fn sweep_only() -> Self {
        Self { hook: None }
    }
}

#[async_trait]
impl JobTarget for PostProcessJob {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        let config = ctx.config();

        if let Some(hook) = &self.hook {
            match hook.process(&config).await {
                Ok(files) => {
                    for file in files {
                        match ctx
                            .reconciler
                            .on_post_process_confirmed(&file.book_id, &file.path)
                            .await
                        {
                            Ok(outcome) => tracing::debug!(
                                book_id = %file.book_id,
                                outcome = ?outcome,
                                "post-processed file confirmed"
                            ),
                            Err(e) => tracing::warn!(
                                book_id = %file.book_id,
                                error = %e,
                                "Could not confirm post-processed file"
                            ),
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Post-processing failed"),
            }
        }

        let report = ctx.reconciler.on_reconcile_sweep().await?;
        tracing::debug!(checked = report.total(), "post-processor sweep done");

        if ctx.db.count_by_status(WantedStatus::Snatched).await? == 0 {
            tracing::info!("No books are snatched, stopping the post-processor");
            ctx.stop_job(ctx.job).await;
        }
        Ok(())
    }
}

/// Feeds candidates from a [`CandidateSource`] through the dispatch policy
pub struct SearchJob {
    source: Arc<dyn CandidateSource>,
}

impl SearchJob {
    /// Search job over `source`
    pub fn new(source: Arc<dyn CandidateSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl JobTarget for SearchJob {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        let config = ctx.config();
        let candidates = self.source.candidates(ctx.job, &config).await?;
        let found = candidates.len();
        let mut snatched = 0usize;

        for candidate in candidates {
            let (id, status) = ctx.db.insert_candidate(&candidate).await?;
            if status != WantedStatus::Wanted {
                tracing::debug!(
                    wanted_id = id.0,
                    status = %status,
                    "Candidate already known, not dispatching"
                );
                continue;
            }

            match ctx.dispatcher.dispatch(id).await {
                Ok(outcome) if outcome.is_snatched() => snatched += 1,
                Ok(_) => {}
                Err(Error::DuplicateSubmission { book_id }) => {
                    tracing::debug!(wanted_id = id.0, book_id = %book_id, "Book already in flight");
                }
                Err(Error::ShuttingDown) => break,
                Err(e) => {
                    tracing::warn!(wanted_id = id.0, error = %e, "Could not dispatch candidate");
                }
            }
        }

        tracing::info!(job = ctx.job.name(), found, snatched, "search finished");
        if snatched > 0 {
            ctx.start_job(JobId::PostProcessor).await;
        }
        Ok(())
    }
}
