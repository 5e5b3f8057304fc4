//! Starting, stopping and reporting recurring jobs.

use crate::error::Result;
use crate::jobs::{JobId, JobInfo, JobTarget};
use crate::types::WantedStatus;
use std::sync::Arc;

use super::Coordinator;

impl Coordinator {
    /// Schedule every job that should be running right now
    pub async fn start(&self) -> Result<()> {
        self.check_running_jobs().await?;
        for id in [JobId::VersionCheck, JobId::AuthorUpdate] {
            self.scheduler.start(id).await;
        }
        Ok(())
    }

    /// Bring the live jobs in line with the record store and configuration
    ///
    /// The post-processor runs only while something is Snatched. Each search job runs
    /// exactly when its provider and backend predicate holds. Other jobs are left as
    /// they are.
    pub async fn check_running_jobs(&self) -> Result<()> {
        let snatched = self.db.count_by_status(WantedStatus::Snatched).await?;
        if snatched > 0 {
            self.scheduler.start(JobId::PostProcessor).await;
        } else {
            self.scheduler.stop(JobId::PostProcessor).await;
        }

        let config = self.config();
        for id in JobId::SEARCHES {
            if id.is_enabled(&config) {
                self.scheduler.start(id).await;
            } else {
                self.scheduler.stop(id).await;
            }
        }

        tracing::debug!(snatched, "Checked running jobs");
        Ok(())
    }

    /// Install the work for a job, replacing any previous target
    ///
    /// A running instance keeps its old target until the job is restarted.
    pub async fn register_job(&self, id: JobId, target: Arc<dyn JobTarget>) {
        self.scheduler.register(id, target).await;
    }

    /// Live jobs with their next run time
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.list_jobs().await
    }

    /// One "label: Next run in ..." line per live job
    pub async fn show_jobs(&self) -> Vec<String> {
        self.scheduler.show_jobs().await
    }
}
