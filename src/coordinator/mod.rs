//! Coordinator: owns the configuration snapshot and every long-lived component
//!
//! The coordinator is the single owner of configuration reloads. Components receive a
//! [`ConfigReader`](crate::config::ConfigReader) at construction and never read ad hoc
//! globals; [`Coordinator::reload_config`] swaps the snapshot atomically and rebuilds
//! the client registry.
//!
//! ```no_run
//! use librarian_dl::{Config, Coordinator};
//!
//! # async fn example() -> librarian_dl::Result<()> {
//! let coordinator = Coordinator::new(Config::default()).await?;
//! coordinator.start().await?;
//! for line in coordinator.show_jobs().await {
//!     println!("{}", line);
//! }
//! coordinator.shutdown().await
//! # }
//! ```

use crate::clients::ClientRegistry;
use crate::config::{Config, ConfigHandle};
use crate::db::Database;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::jobs::{CandidateSource, JobId, JobScheduler, PostProcessHook, PostProcessJob, SearchJob};
use crate::notify::NotificationDispatcher;
use crate::reconciler::Reconciler;
use crate::retry::{Sleeper, TokioSleeper};
use crate::types::{Event, MediaKind, WantedId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

mod config_ops;
mod job_control;
mod lifecycle;

/// Reason recorded on Pending rows left behind by an unclean shutdown
pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// Persists the active configuration when the coordinator shuts down
#[async_trait]
pub trait ConfigSink: Send + Sync {
    /// Write `config` wherever the host keeps it
    async fn persist(&self, config: &Config) -> Result<()>;
}

/// Optional collaborators wired in at boot
#[derive(Default)]
pub struct CoordinatorBuilder {
    post_process_hook: Option<Arc<dyn PostProcessHook>>,
    candidate_source: Option<Arc<dyn CandidateSource>>,
    config_sink: Option<Arc<dyn ConfigSink>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    registry: Option<Arc<ClientRegistry>>,
}

impl CoordinatorBuilder {
    /// Library scan run by the post-processor before each sweep
    pub fn post_process_hook(mut self, hook: Arc<dyn PostProcessHook>) -> Self {
        self.post_process_hook = Some(hook);
        self
    }

    /// Provider search feeding the search jobs
    pub fn candidate_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.candidate_source = Some(source);
        self
    }

    /// Where the configuration is persisted at shutdown
    pub fn config_sink(mut self, sink: Arc<dyn ConfigSink>) -> Self {
        self.config_sink = Some(sink);
        self
    }

    /// Sleeper used by the bounded polling loops
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Use these clients instead of building them from the configuration
    pub fn registry(mut self, registry: Arc<ClientRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Open the record store and wire every component together
    ///
    /// Pending rows left by the previous run are failed with [`INTERRUPTED_REASON`] so
    /// their books can be dispatched again.
    pub async fn build(self, config: Config) -> Result<Coordinator> {
        let config = Arc::new(ConfigHandle::new(config)?);
        let snapshot = config.snapshot();

        let db = Arc::new(Database::new(&snapshot.persistence.database_path).await?);
        let unclean = db.was_unclean_shutdown().await?;
        let failed = db.fail_interrupted_pending(INTERRUPTED_REASON).await?;
        if failed > 0 {
            tracing::warn!(
                failed,
                unclean,
                "Failed {} submission(s) interrupted by the previous run",
                failed
            );
        }
        db.set_clean_start().await?;

        // 1000 events buffer; slow subscribers see Lagged rather than block dispatch
        let (event_tx, _rx) = broadcast::channel(1000);

        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ClientRegistry::from_config_with_sleeper(
                &snapshot,
                sleeper.clone(),
            )?),
        };

        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            config.reader(),
            registry.clone(),
            NotificationDispatcher::from_config(&snapshot.notifications),
            event_tx.clone(),
            sleeper,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            registry.clone(),
            reconciler.clone(),
            config.reader(),
        )?);
        let scheduler = JobScheduler::new(
            db.clone(),
            dispatcher.clone(),
            reconciler.clone(),
            config.reader(),
            event_tx.clone(),
        );

        let post_processor = match self.post_process_hook {
            Some(hook) => PostProcessJob::new(hook),
            None => PostProcessJob::sweep_only(),
        };
        scheduler
            .register(JobId::PostProcessor, Arc::new(post_processor))
            .await;
        if let Some(source) = self.candidate_source {
            let search = Arc::new(SearchJob::new(source));
            for id in JobId::SEARCHES {
                scheduler.register(id, search.clone()).await;
            }
        }

        let usenet = registry.client_for(MediaKind::Usenet).await;
        let torrent = registry.client_for(MediaKind::Torrent).await;
        tracing::info!(
            database = %snapshot.persistence.database_path.display(),
            usenet = ?usenet.map(|active| active.client.kind()),
            torrent = ?torrent.map(|active| active.client.kind()),
            "Coordinator ready"
        );

        Ok(Coordinator {
            db,
            config,
            registry,
            dispatcher,
            reconciler,
            scheduler,
            event_tx,
            config_sink: self.config_sink,
        })
    }
}

/// Job coordinator and download dispatch front door (cloneable; all fields are shared)
#[derive(Clone)]
pub struct Coordinator {
    /// Record store, public so hosts and tests can inspect wanted rows
    pub db: Arc<Database>,
    pub(crate) config: Arc<ConfigHandle>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) reconciler: Arc<Reconciler>,
    pub(crate) scheduler: Arc<JobScheduler>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) config_sink: Option<Arc<dyn ConfigSink>>,
}

impl Coordinator {
    /// Boot with no collaborators: the post-processor only sweeps and no search runs
    pub async fn new(config: Config) -> Result<Self> {
        Self::builder().build(config).await
    }

    /// Builder for wiring collaborators before boot
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Active configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    /// Subscribe to coordinator events
    ///
    /// Each subscriber receives every event sent after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Submit a Wanted item to the backend for its media kind
    ///
    /// A snatch starts the post-processor so the new task is monitored.
    pub async fn dispatch(&self, id: WantedId) -> Result<DispatchOutcome> {
        let outcome = self.dispatcher.dispatch(id).await?;
        if outcome.is_snatched() && self.scheduler.start(JobId::PostProcessor).await {
            tracing::debug!(wanted_id = id.0, "Started the post-processor after a snatch");
        }
        Ok(outcome)
    }

    /// Dispatch policy, shared with jobs
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// State reconciler, for hosts that confirm post-processing themselves
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Job scheduler
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
