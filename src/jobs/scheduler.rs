//! Live job registry and the per-job run loop

use super::{JobId, JobInterval, JobTarget};
use crate::config::{Config, ConfigReader};
use crate::db::Database;
use crate::dispatch::Dispatcher;
use crate::reconciler::Reconciler;
use crate::types::Event;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a running job can reach
#[derive(Clone)]
pub struct JobContext {
    /// Job this context belongs to
    pub job: JobId,
    /// Record store
    pub db: Arc<Database>,
    /// Dispatch policy
    pub dispatcher: Arc<Dispatcher>,
    /// State reconciler
    pub reconciler: Arc<Reconciler>,
    config: ConfigReader,
    scheduler: Weak<JobScheduler>,
}

impl JobContext {
    /// Current configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    /// Schedule another job (or this one); see [`JobScheduler::start`]
    pub async fn start_job(&self, id: JobId) -> bool {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.start(id).await,
            None => false,
        }
    }

    /// Unschedule a job (or this one); see [`JobScheduler::stop`]
    ///
    /// A job unscheduling itself finishes its current run.
    pub async fn stop_job(&self, id: JobId) -> bool {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.stop(id).await,
            None => false,
        }
    }
}

/// Snapshot of one live job
#[derive(Clone, Debug, PartialEq)]
pub struct JobInfo {
    /// Job identity
    pub id: JobId,
    /// Stable name
    pub name: &'static str,
    /// Human label
    pub label: &'static str,
    /// Interval the instance was started with
    pub interval: JobInterval,
    /// When the next run is due
    pub next_run_at: Option<DateTime<Utc>>,
    /// Whether the current configuration still enables the job
    pub enabled: bool,
}

struct LiveJob {
    interval: JobInterval,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    next_run_ms: Arc<AtomicI64>,
}

/// Registry of recurring jobs keyed by [`JobId`]
///
/// The live map is the single source of truth: a job is scheduled exactly when it has
/// an entry. Start, stop and restart each hold the map lock for their whole critical
/// section, so no observer ever sees a job twice or a restarted job missing.
pub struct JobScheduler {
    live: Mutex<HashMap<JobId, LiveJob>>,
    targets: RwLock<HashMap<JobId, Arc<dyn JobTarget>>>,
    run_locks: HashMap<JobId, Arc<Mutex<()>>>,
    db: Arc<Database>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    config: ConfigReader,
    event_tx: broadcast::Sender<Event>,
    accepting: AtomicBool,
    me: Weak<JobScheduler>,
}

impl JobScheduler {
    /// Create an empty scheduler; register targets before starting jobs
    pub fn new(
        db: Arc<Database>,
        dispatcher: Arc<Dispatcher>,
        reconciler: Arc<Reconciler>,
        config: ConfigReader,
        event_tx: broadcast::Sender<Event>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            live: Mutex::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            run_locks: JobId::ALL
                .into_iter()
                .map(|id| (id, Arc::new(Mutex::new(()))))
                .collect(),
            db,
            dispatcher,
            reconciler,
            config,
            event_tx,
            accepting: AtomicBool::new(true),
            me: me.clone(),
        })
    }

    /// Set the work a job performs; takes effect at its next start
    pub async fn register(&self, id: JobId, target: Arc<dyn JobTarget>) {
        self.targets.write().await.insert(id, target);
    }

    /// Whether a target is registered for `id`
    pub async fn is_registered(&self, id: JobId) -> bool {
        self.targets.read().await.contains_key(&id)
    }

    /// Context handed to `id`'s target
    pub fn context(&self, id: JobId) -> JobContext {
        JobContext {
            job: id,
            db: self.db.clone(),
            dispatcher: self.dispatcher.clone(),
            reconciler: self.reconciler.clone(),
            config: self.config.clone(),
            scheduler: self.me.clone(),
        }
    }

    /// Schedule `id` unless it is already live
    ///
    /// Nothing happens while shutting down, without a registered target, with a zero
    /// interval, or when the configuration disables the job. Returns whether a new
    /// instance was scheduled.
    pub async fn start(&self, id: JobId) -> bool {
        let mut live = self.live.lock().await;
        self.start_locked(&mut live, id).await
    }

    /// Unschedule `id`; returns whether it was live
    pub async fn stop(&self, id: JobId) -> bool {
        let mut live = self.live.lock().await;
        self.stop_locked(&mut live, id)
    }

    /// Stop and start `id` as one step; returns whether it is live afterwards
    pub async fn restart(&self, id: JobId) -> bool {
        let mut live = self.live.lock().await;
        self.stop_locked(&mut live, id);
        self.start_locked(&mut live, id).await
    }

    /// Start every job; returns the ids that were newly scheduled
    pub async fn start_all(&self) -> Vec<JobId> {
        let mut live = self.live.lock().await;
        let mut started = Vec::new();
        for id in JobId::ALL {
            if self.start_locked(&mut live, id).await {
                started.push(id);
            }
        }
        started
    }

    /// Restart every job, picking up a new configuration
    pub async fn restart_all(&self) -> Vec<JobId> {
        let mut live = self.live.lock().await;
        let mut started = Vec::new();
        for id in JobId::ALL {
            self.stop_locked(&mut live, id);
            if self.start_locked(&mut live, id).await {
                started.push(id);
            }
        }
        started
    }

    /// Whether `id` has a live instance
    pub async fn is_running(&self, id: JobId) -> bool {
        self.live.lock().await.contains_key(&id)
    }

    /// Live jobs in [`JobId::ALL`] order
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let config = self.config.snapshot();
        let live = self.live.lock().await;
        JobId::ALL
            .into_iter()
            .filter_map(|id| {
                live.get(&id).map(|job| JobInfo {
                    id,
                    name: id.name(),
                    label: id.label(),
                    interval: job.interval,
                    next_run_at: Utc
                        .timestamp_millis_opt(job.next_run_ms.load(Ordering::SeqCst))
                        .single(),
                    enabled: id.is_enabled(&config),
                })
            })
            .collect()
    }

    /// One line per live job, e.g. "Book search: Next run in 5 minutes"
    pub async fn show_jobs(&self) -> Vec<String> {
        let now = Utc::now();
        self.list_jobs()
            .await
            .into_iter()
            .map(|job| match job.next_run_at {
                Some(at) => format!(
                    "{}: Next run in {}",
                    job.label,
                    countdown((at - now).num_milliseconds())
                ),
                None => format!("{}: Not scheduled", job.label),
            })
            .collect()
    }

    /// Refuse new starts, cancel every job and wait up to `timeout` for running targets
    pub async fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);

        let jobs: Vec<(JobId, LiveJob)> = self.live.lock().await.drain().collect();
        let mut handles = Vec::with_capacity(jobs.len());
        for (id, job) in jobs {
            job.cancel.cancel();
            self.event_tx
                .send(Event::JobUnscheduled {
                    name: id.name().to_string(),
                })
                .ok();
            handles.push((id, job.handle));
        }

        let aborts: Vec<_> = handles
            .iter()
            .map(|(id, handle)| (*id, handle.abort_handle()))
            .collect();
        let all = futures::future::join_all(handles.into_iter().map(|(_, handle)| handle));

        if tokio::time::timeout(timeout, all).await.is_err() {
            for (id, abort) in aborts {
                if !abort.is_finished() {
                    tracing::warn!(job = id.name(), "Job did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
        tracing::info!("job scheduler stopped");
    }

    async fn start_locked(&self, live: &mut HashMap<JobId, LiveJob>, id: JobId) -> bool {
        if live.contains_key(&id) || !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        let Some(target) = self.targets.read().await.get(&id).cloned() else {
            tracing::debug!(job = id.name(), "No target registered, not scheduling");
            return false;
        };

        let config = self.config.snapshot();
        let interval = id.interval(&config.jobs);
        if interval.is_disabled() {
            tracing::debug!(job = id.name(), "Interval is 0, not scheduling");
            return false;
        }
        if !id.is_enabled(&config) {
            tracing::debug!(job = id.name(), "Disabled by configuration, not scheduling");
            return false;
        }

        let cancel = CancellationToken::new();
        let next_run_ms = Arc::new(AtomicI64::new(next_run_after(interval.as_duration())));
        let run_lock = self
            .run_locks
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())));
        let handle = tokio::spawn(job_loop(
            id,
            interval.as_duration(),
            target,
            self.context(id),
            run_lock,
            cancel.clone(),
            next_run_ms.clone(),
        ));

        live.insert(
            id,
            LiveJob {
                interval,
                cancel,
                handle,
                next_run_ms,
            },
        );
        tracing::info!(job = id.name(), interval = %interval, "{} scheduled", id.label());
        self.event_tx
            .send(Event::JobScheduled {
                name: id.name().to_string(),
            })
            .ok();
        true
    }

    fn stop_locked(&self, live: &mut HashMap<JobId, LiveJob>, id: JobId) -> bool {
        let Some(job) = live.remove(&id) else {
            return false;
        };
        job.cancel.cancel();
        tracing::info!(job = id.name(), "{} unscheduled", id.label());
        self.event_tx
            .send(Event::JobUnscheduled {
                name: id.name().to_string(),
            })
            .ok();
        true
    }
}

/// Wait, run, repeat until cancelled
///
/// The run lock is shared by every instance of the same job, so an instance started by
/// a restart waits for its predecessor's run to finish.
async fn job_loop(
    id: JobId,
    interval: Duration,
    target: Arc<dyn JobTarget>,
    ctx: JobContext,
    run_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
    next_run_ms: Arc<AtomicI64>,
) {
    loop {
        next_run_ms.store(next_run_after(interval), Ordering::SeqCst);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let _running = tokio::select! {
            _ = cancel.cancelled() => break,
            guard = run_lock.lock() => guard,
        };

        tracing::debug!(job = id.name(), "job run starting");
        let started = Instant::now();
        let run_target = target.clone();
        let run_ctx = ctx.clone();
        match tokio::spawn(async move { run_target.run(&run_ctx).await }).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    job = id.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job run finished"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(job = id.name(), error = %e, "job run failed");
            }
            Err(e) if e.is_panic() => {
                tracing::error!(job = id.name(), "job run panicked");
            }
            Err(e) => {
                tracing::warn!(job = id.name(), error = %e, "job run was cancelled");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    tracing::debug!(job = id.name(), "job loop exited");
}

fn next_run_after(interval: Duration) -> i64 {
    let step = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() + step).timestamp_millis()
}

/// "5 minutes", "1 hour 30 minutes", "less than a minute"
fn countdown(remaining_ms: i64) -> String {
    let minutes = (remaining_ms.max(0) + 59_999) / 60_000;
    if minutes == 0 {
        return "less than a minute".to_string();
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    match (hours, minutes) {
        (0, m) => plural(m, "minute"),
        (h, 0) => plural(h, "hour"),
        (h, m) => format!("{} {}", plural(h, "hour"), plural(m, "minute")),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
