use super::*;
use crate::clients::ActiveClient;
use crate::config::{BlackholeConfig, Endpoint, SabnzbdConfig, TorrentBackend, UsenetBackend};
use crate::db::BookRecord;
use crate::error::Error;
use crate::jobs::{JobContext, JobInterval, JobTarget};
use crate::retry::RecordingSleeper;
use crate::test_helpers::{FakeClient, candidate, test_config};
use crate::types::{BackendKind, BookId, BookStatus, WantedStatus};
use std::sync::Mutex;
use std::time::Duration;

mod lifecycle;

struct Noop;

#[async_trait]
impl JobTarget for Noop {
    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }
}

/// Records every configuration it is asked to persist; optionally refuses
#[derive(Default)]
struct RecordingSink {
    persisted: Mutex<Vec<Duration>>,
    fail: bool,
}

#[async_trait]
impl ConfigSink for RecordingSink {
    async fn persist(&self, config: &Config) -> Result<()> {
        if self.fail {
            return Err(Error::Other("config file is read-only".into()));
        }
        self.persisted.lock().unwrap().push(config.shutdown_timeout);
        Ok(())
    }
}

struct Harness {
    coordinator: Coordinator,
    usenet: Arc<FakeClient>,
    torrent: Arc<FakeClient>,
    dir: tempfile::TempDir,
}

fn config_in(dir: &tempfile::TempDir) -> Config {
    let mut config = test_config();
    config.persistence.database_path = dir.path().join("librarian.db");
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

async fn boot_with(config: Config, dir: tempfile::TempDir, builder: CoordinatorBuilder) -> Harness {
    boot_with_clients(
        config,
        dir,
        builder,
        FakeClient::new(BackendKind::Sabnzbd),
        FakeClient::new(BackendKind::Deluge),
    )
    .await
}

async fn boot_with_clients(
    config: Config,
    dir: tempfile::TempDir,
    builder: CoordinatorBuilder,
    usenet: FakeClient,
    torrent: FakeClient,
) -> Harness {
    let usenet = Arc::new(usenet);
    let torrent = Arc::new(torrent);
    let registry = Arc::new(ClientRegistry::with_clients(
        Some(ActiveClient::new(usenet.clone())),
        Some(ActiveClient::new(torrent.clone())),
    ));
    let coordinator = builder
        .registry(registry)
        .sleeper(Arc::new(RecordingSleeper::default()))
        .build(config)
        .await
        .unwrap();
    Harness {
        coordinator,
        usenet,
        torrent,
        dir,
    }
}

async fn boot() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    boot_with(config, dir, Coordinator::builder()).await
}

async fn add_book(coordinator: &Coordinator, book_id: &str) {
    coordinator
        .db
        .upsert_book(&BookRecord::new(
            book_id,
            format!("Title of {}", book_id),
            "Some Author",
            BookStatus::Wanted,
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_boot_fails_submissions_interrupted_by_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let id = {
        let db = Database::new(&config.persistence.database_path).await.unwrap();
        db.set_clean_start().await.unwrap();
        let (id, _) = db
            .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
            .await
            .unwrap();
        assert!(db.claim_for_dispatch(id).await.unwrap());
        db.close().await;
        id
    };

    let h = boot_with(config, dir, Coordinator::builder()).await;
    let row = h.coordinator.db.get_wanted(id).await.unwrap().unwrap();
    assert_eq!(row.status, WantedStatus::Failed);
    assert_eq!(row.result.as_deref(), Some(INTERRUPTED_REASON));
    assert!(h.coordinator.db.was_unclean_shutdown().await.unwrap());
}

#[tokio::test]
async fn test_dispatch_and_check_running_jobs_track_the_post_processor() {
    let h = boot().await;
    let coordinator = &h.coordinator;
    add_book(coordinator, "b1").await;
    let (id, _) = coordinator
        .db
        .insert_candidate(&candidate("b1", "magnet:?xt=urn:btih:aaaa", MediaKind::Torrent))
        .await
        .unwrap();

    coordinator.check_running_jobs().await.unwrap();
    assert!(!coordinator.scheduler().is_running(JobId::PostProcessor).await);

    let outcome = coordinator.dispatch(id).await.unwrap();
    assert!(outcome.is_snatched());
    assert_eq!(h.torrent.count("submit"), 1);

    coordinator.check_running_jobs().await.unwrap();
    assert!(coordinator.scheduler().is_running(JobId::PostProcessor).await);

    let file = tempfile::NamedTempFile::new().unwrap();
    coordinator
        .reconciler()
        .on_post_process_confirmed(&BookId::from("b1"), file.path())
        .await
        .unwrap();
    coordinator.check_running_jobs().await.unwrap();
    assert!(!coordinator.scheduler().is_running(JobId::PostProcessor).await);
}

#[tokio::test]
async fn test_snatch_starts_the_post_processor_without_a_job_check() {
    let h = boot().await;
    let coordinator = &h.coordinator;
    coordinator.start().await.unwrap();
    assert!(!coordinator.scheduler().is_running(JobId::PostProcessor).await);

    add_book(coordinator, "b1").await;
    let (id, _) = coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
        .await
        .unwrap();
    assert!(coordinator.dispatch(id).await.unwrap().is_snatched());

    assert!(coordinator.scheduler().is_running(JobId::PostProcessor).await);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_dispatch_does_not_start_the_post_processor() {
    let h = boot().await;
    let coordinator = &h.coordinator;
    coordinator.start().await.unwrap();
    h.usenet.push_submit(Err(crate::error::ClientError::Rejected {
        backend: BackendKind::Sabnzbd,
        reason: "bad nzb".into(),
    }));

    add_book(coordinator, "b1").await;
    let (id, _) = coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
        .await
        .unwrap();
    assert!(!coordinator.dispatch(id).await.unwrap().is_snatched());

    assert!(!coordinator.scheduler().is_running(JobId::PostProcessor).await);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_check_running_jobs_follows_search_predicates() {
    struct Nothing;

    #[async_trait]
    impl CandidateSource for Nothing {
        async fn candidates(
            &self,
            _job: JobId,
            _config: &Config,
        ) -> Result<Vec<crate::types::NewWantedItem>> {
            Ok(Vec::new())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.providers.nzb = true;
    config.usenet = UsenetBackend::Blackhole(BlackholeConfig {
        directory: dir.path().to_path_buf(),
    });
    let h = boot_with(
        config,
        dir,
        Coordinator::builder().candidate_source(Arc::new(Nothing)),
    )
    .await;

    h.coordinator.start().await.unwrap();
    let scheduler = h.coordinator.scheduler();
    assert!(scheduler.is_running(JobId::SearchNzbBook).await);
    assert!(scheduler.is_running(JobId::SearchMagazines).await);
    assert!(!scheduler.is_running(JobId::SearchTorBook).await);
    assert!(!scheduler.is_running(JobId::SearchRssBook).await);
    assert!(scheduler.is_registered(JobId::SearchRssBook).await);
    assert!(!scheduler.is_running(JobId::PostProcessor).await);

    let mut without_providers = (*h.coordinator.config()).clone();
    without_providers.providers.nzb = false;
    h.coordinator.reload_config(without_providers).await.unwrap();
    assert!(!scheduler.is_running(JobId::SearchNzbBook).await);
    assert!(!scheduler.is_running(JobId::SearchMagazines).await);
    h.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_swaps_snapshot_clients_and_intervals() {
    let h = boot().await;
    let coordinator = &h.coordinator;
    coordinator.register_job(JobId::VersionCheck, Arc::new(Noop)).await;
    coordinator.start().await.unwrap();
    let mut events = coordinator.subscribe();

    let mut next = (*coordinator.config()).clone();
    next.jobs.version_check_hours = 6;
    next.torrent = TorrentBackend::Blackhole(BlackholeConfig {
        directory: h.dir.path().to_path_buf(),
    });
    coordinator.reload_config(next).await.unwrap();

    assert_eq!(coordinator.config().jobs.version_check_hours, 6);
    let jobs = coordinator.list_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].interval, JobInterval::hours(6));

    let torrent = coordinator.registry.client_for(MediaKind::Torrent).await.unwrap();
    assert_eq!(torrent.client.kind(), BackendKind::TorrentBlackhole);
    assert!(coordinator.registry.client_for(MediaKind::Usenet).await.is_none());
    assert_eq!(h.usenet.count("close"), 1);
    assert_eq!(h.torrent.count("close"), 1);

    let mut reloaded = false;
    while let Ok(event) = events.try_recv() {
        reloaded |= matches!(event, Event::ConfigReloaded);
    }
    assert!(reloaded);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_reload_keeps_previous_snapshot() {
    let h = boot().await;
    let coordinator = &h.coordinator;

    let mut broken = (*coordinator.config()).clone();
    broken.usenet = UsenetBackend::Sabnzbd(SabnzbdConfig {
        endpoint: Endpoint::new("sab.local:8080"),
        api_key: "  ".into(),
        category: None,
        priority: None,
    });
    let err = coordinator.reload_config(broken).await.unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid { .. }));

    assert!(matches!(coordinator.config().usenet, UsenetBackend::None));
    let usenet = coordinator.registry.client_for(MediaKind::Usenet).await.unwrap();
    assert_eq!(usenet.client.kind(), BackendKind::Sabnzbd);
    assert_eq!(h.usenet.count("close"), 0);
}

#[tokio::test]
async fn test_connection_check_uses_the_active_backend() {
    let h = boot().await;
    let result = h.coordinator.test_connection(MediaKind::Usenet).await.unwrap();
    assert!(result.success);
    assert_eq!(result.backend, BackendKind::Sabnzbd);
    assert_eq!(h.usenet.count("test_connection"), 1);
    assert_eq!(h.torrent.count("test_connection"), 0);
}

#[tokio::test]
async fn test_connection_check_without_backend_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let usenet = Arc::new(FakeClient::new(BackendKind::Nzbget));
    let coordinator = Coordinator::builder()
        .registry(Arc::new(ClientRegistry::with_clients(
            Some(ActiveClient::new(usenet)),
            None,
        )))
        .build(config)
        .await
        .unwrap();

    match coordinator.test_connection(MediaKind::Torrent).await {
        Err(Error::ConfigInvalid { message, key }) => {
            assert_eq!(message, "No torrent download method is enabled");
            assert_eq!(key.as_deref(), Some("torrent"));
        }
        other => panic!("expected a config error, got {:?}", other.map(|r| r.to_string())),
    }
}
