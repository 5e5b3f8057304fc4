//! Named recurring jobs.
//!
//! Every job is identified by a [`JobId`]; the [`JobScheduler`] keeps at most one live
//! instance per id and never lets two runs of the same job overlap. What a job does is
//! supplied by a [`JobTarget`]: the crate provides the post-processor
//! ([`PostProcessJob`]) and the search jobs ([`SearchJob`]); version checks and author
//! refreshes are registered by the embedding application.

mod scheduler;
mod targets;

pub use scheduler::{JobContext, JobInfo, JobScheduler};
pub use targets::{CandidateSource, PostProcessHook, PostProcessJob, ProcessedFile, SearchJob};

use crate::config::{Config, JobsConfig};
use crate::error::Result;
use crate::types::MediaKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable identity of a recurring job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobId {
    /// Confirms finished downloads and sweeps in-flight tasks
    PostProcessor,
    /// Searches NZB providers for wanted books
    SearchNzbBook,
    /// Searches torrent providers for wanted books
    SearchTorBook,
    /// Searches RSS feeds for wanted books
    SearchRssBook,
    /// Searches providers for wanted magazine issues
    SearchMagazines,
    /// Checks for a newer release of the application
    VersionCheck,
    /// Refreshes author metadata
    AuthorUpdate,
}

impl JobId {
    /// Every job, in display order
    pub const ALL: [JobId; 7] = [
        JobId::PostProcessor,
        JobId::SearchNzbBook,
        JobId::SearchTorBook,
        JobId::SearchRssBook,
        JobId::SearchMagazines,
        JobId::VersionCheck,
        JobId::AuthorUpdate,
    ];

    /// Jobs driven by a [`CandidateSource`]
    pub const SEARCHES: [JobId; 4] = [
        JobId::SearchNzbBook,
        JobId::SearchTorBook,
        JobId::SearchRssBook,
        JobId::SearchMagazines,
    ];

    /// Stable machine name
    pub fn name(&self) -> &'static str {
        match self {
            JobId::PostProcessor => "post_processor",
            JobId::SearchNzbBook => "search_nzb_book",
            JobId::SearchTorBook => "search_tor_book",
            JobId::SearchRssBook => "search_rss_book",
            JobId::SearchMagazines => "search_magazines",
            JobId::VersionCheck => "version_check",
            JobId::AuthorUpdate => "author_update",
        }
    }

    /// Human label used by [`JobScheduler::show_jobs`]
    pub fn label(&self) -> &'static str {
        match self {
            JobId::PostProcessor => "Post-processor",
            JobId::SearchNzbBook => "Book search",
            JobId::SearchTorBook => "Torrent book search",
            JobId::SearchRssBook => "RSS book search",
            JobId::SearchMagazines => "Magazine search",
            JobId::VersionCheck => "Version check",
            JobId::AuthorUpdate => "Author update",
        }
    }

    /// Look a job up by its stable name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    /// Interval configured for this job
    pub fn interval(&self, jobs: &JobsConfig) -> JobInterval {
        match self {
            JobId::PostProcessor => JobInterval::minutes(jobs.post_processor_minutes),
            JobId::SearchNzbBook | JobId::SearchTorBook => {
                JobInterval::minutes(jobs.search_book_minutes)
            }
            JobId::SearchRssBook => JobInterval::minutes(jobs.search_rss_minutes),
            JobId::SearchMagazines => JobInterval::minutes(jobs.search_magazines_minutes),
            JobId::VersionCheck => JobInterval::hours(jobs.version_check_hours),
            JobId::AuthorUpdate => JobInterval::hours(jobs.author_update_hours),
        }
    }

    /// Whether the configuration allows this job to run at all
    ///
    /// Search jobs need both a provider and a backend that can take what the provider
    /// finds. The interval is checked separately.
    pub fn is_enabled(&self, config: &Config) -> bool {
        let providers = &config.providers;
        match self {
            JobId::PostProcessor | JobId::VersionCheck | JobId::AuthorUpdate => true,
            JobId::SearchNzbBook => providers.nzb && config.has_backend(MediaKind::Usenet),
            JobId::SearchTorBook => providers.torrent && config.has_backend(MediaKind::Torrent),
            JobId::SearchRssBook => providers.rss && config.has_backend(MediaKind::Torrent),
            JobId::SearchMagazines => {
                providers.any()
                    && (config.has_backend(MediaKind::Usenet)
                        || config.has_backend(MediaKind::Torrent))
            }
        }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Unit of a [`JobInterval`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    /// Minutes
    Minutes,
    /// Hours
    Hours,
}

/// How often a job runs; a value of 0 disables the job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInterval {
    /// Unit of `value`
    pub unit: IntervalUnit,
    /// Number of units between runs
    pub value: u32,
}

impl JobInterval {
    /// Every `value` minutes
    pub fn minutes(value: u32) -> Self {
        Self {
            unit: IntervalUnit::Minutes,
            value,
        }
    }

    /// Every `value` hours
    pub fn hours(value: u32) -> Self {
        Self {
            unit: IntervalUnit::Hours,
            value,
        }
    }

    /// Whether the job is switched off
    pub fn is_disabled(&self) -> bool {
        self.value == 0
    }

    /// Time between runs
    pub fn as_duration(&self) -> Duration {
        let unit_secs = match self.unit {
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3600,
        };
        Duration::from_secs(u64::from(self.value) * unit_secs)
    }
}

impl std::fmt::Display for JobInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match (self.unit, self.value) {
            (IntervalUnit::Minutes, 1) => "minute",
            (IntervalUnit::Minutes, _) => "minutes",
            (IntervalUnit::Hours, 1) => "hour",
            (IntervalUnit::Hours, _) => "hours",
        };
        write!(f, "{} {}", self.value, unit)
    }
}

/// Work performed by a job on every run
///
/// Errors are logged by the scheduler and never stop the job; the next run happens on
/// schedule.
#[async_trait]
pub trait JobTarget: Send + Sync {
    /// Run once to completion
    async fn run(&self, ctx: &JobContext) -> Result<()>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
