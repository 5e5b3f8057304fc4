//! Shared test helpers: a scripted download client and a wired-up reconciler/dispatcher.

use crate::clients::{
    ActiveClient, ClientCapabilities, ClientRegistry, DownloadClient, DownloadSource, Submission,
    SubmitRequest,
};
use crate::config::{Config, ConfigHandle, PollPolicy, PostSubmitSettings};
use crate::db::{BookRecord, Database};
use crate::dispatch::Dispatcher;
use crate::error::ClientResult;
use crate::notify::NotificationDispatcher;
use crate::reconciler::Reconciler;
use crate::retry::RecordingSleeper;
use crate::types::{
    BackendHandle, BackendKind, BookId, BookStatus, ConnectionTestResult, DownloadProgress, Event,
    Library, MediaKind, NewWantedItem, WantedId, WantedStatus,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Download client whose answers are scripted by the test
///
/// Submissions without a scripted result are accepted as `ext-<n>`. Status checks pop
/// the scripted queue for the id and keep repeating its last entry; an id with nothing
/// scripted reports pending. Task names are whatever was scripted, otherwise unknown.
pub(crate) struct FakeClient {
    kind: BackendKind,
    capabilities: ClientCapabilities,
    submit_delay: Option<Duration>,
    submits: Mutex<VecDeque<ClientResult<Submission>>>,
    statuses: Mutex<HashMap<String, VecDeque<ClientResult<DownloadProgress>>>>,
    names: Mutex<HashMap<String, String>>,
    sources: Mutex<Vec<DownloadSource>>,
    calls: Mutex<Vec<String>>,
}

impl FakeClient {
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            capabilities: ClientCapabilities {
                labels: true,
                seed_ratio: true,
                download_path: true,
                progress: true,
            },
            submit_delay: None,
            submits: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
            sources: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend that takes `delay` to answer a submission
    pub(crate) fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub(crate) fn set_task_name(&self, external_id: &str, name: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(external_id.to_string(), name.to_string());
    }

    /// Payload of every submission so far
    pub(crate) fn sources(&self) -> Vec<DownloadSource> {
        self.sources.lock().unwrap().clone()
    }

    pub(crate) fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub(crate) fn push_submit(&self, result: ClientResult<Submission>) {
        self.submits.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_status(&self, external_id: &str, result: ClientResult<DownloadProgress>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push_back(result);
    }

    /// Every call so far, as `op:arg[:arg]`
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DownloadClient for FakeClient {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.capabilities
    }

    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission> {
        self.record(format!("submit:{}", request.title));
        self.sources.lock().unwrap().push(request.source.clone());
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.submits.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(Submission::with_id(format!("ext-{}", self.count("submit")))))
    }

    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress> {
        self.record(format!("status:{}", external_id));
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(external_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Ok(DownloadProgress::pending()),
        }
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> bool {
        self.record(format!("remove:{}:{}", external_id, delete_data));
        true
    }

    async fn set_label(&self, external_id: &str, label: &str) -> bool {
        self.record(format!("label:{}:{}", external_id, label));
        true
    }

    async fn set_seed_ratio(&self, external_id: &str, ratio: f64) -> bool {
        self.record(format!("ratio:{}:{}", external_id, ratio));
        true
    }

    async fn set_download_path(&self, external_id: &str, path: &str) -> bool {
        self.record(format!("path:{}:{}", external_id, path));
        true
    }

    async fn task_name(&self, external_id: &str) -> Option<String> {
        self.record(format!("task_name:{}", external_id));
        self.names.lock().unwrap().get(external_id).cloned()
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        self.record("test_connection:".to_string());
        ConnectionTestResult::ok(self.kind, Duration::from_millis(1), "fake backend")
    }

    async fn close(&self) {
        self.record("close:".to_string());
    }
}

/// Config used by the fixtures: three quick polls, no task age limit
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.reconcile.poll = PollPolicy::fixed(3, Duration::from_secs(5));
    config
}

/// Reconciler and dispatcher over a temp database and two fake clients
pub(crate) struct Fixture {
    pub db: Arc<Database>,
    pub config: ConfigHandle,
    pub registry: Arc<ClientRegistry>,
    pub usenet: Arc<FakeClient>,
    pub torrent: Arc<FakeClient>,
    pub sleeper: Arc<RecordingSleeper>,
    pub reconciler: Arc<Reconciler>,
    pub dispatcher: Arc<Dispatcher>,
    pub event_tx: broadcast::Sender<Event>,
    pub events: broadcast::Receiver<Event>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub(crate) async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub(crate) async fn with_config(config: Config) -> Self {
        Self::with_clients(
            config,
            FakeClient::new(BackendKind::Sabnzbd),
            FakeClient::new(BackendKind::Deluge),
        )
        .await
    }

    pub(crate) async fn with_clients(config: Config, usenet: FakeClient, torrent: FakeClient) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("test.db")).await.unwrap());
        let config = ConfigHandle::new(config).unwrap();

        let usenet = Arc::new(usenet);
        let torrent = Arc::new(torrent);
        let registry = Arc::new(ClientRegistry::with_clients(
            Some(ActiveClient::new(usenet.clone())),
            Some(
                ActiveClient::new(torrent.clone()).with_settings(PostSubmitSettings {
                    label: Some("Books".to_string()),
                    seed_ratio: Some(1.5),
                    download_dir: Some("/books".to_string()),
                }),
            ),
        ));

        let (event_tx, events) = broadcast::channel(1000);
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            config.reader(),
            registry.clone(),
            NotificationDispatcher::new(),
            event_tx.clone(),
            sleeper.clone(),
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(db.clone(), registry.clone(), reconciler.clone(), config.reader())
                .unwrap(),
        );

        Self {
            db,
            config,
            registry,
            usenet,
            torrent,
            sleeper,
            reconciler,
            dispatcher,
            event_tx,
            events,
            _dir: dir,
        }
    }

    /// Book in the record store with both editions Wanted
    pub(crate) async fn add_book(&self, book_id: &str) {
        self.db
            .upsert_book(&BookRecord::new(
                book_id,
                format!("Title of {}", book_id),
                "Some Author",
                BookStatus::Wanted,
            ))
            .await
            .unwrap();
    }

    /// Wanted row for `book_id` from `url`
    pub(crate) async fn add_wanted(&self, book_id: &str, url: &str, media_kind: MediaKind) -> WantedId {
        let (id, status) = self
            .db
            .insert_candidate(&candidate(book_id, url, media_kind))
            .await
            .unwrap();
        assert_eq!(status, WantedStatus::Wanted);
        id
    }

    /// Row forced straight into Snatched with the given handle
    pub(crate) async fn add_snatched(&self, book_id: &str, url: &str, handle: BackendHandle) -> WantedId {
        let media_kind = handle.kind.media_kind();
        let id = self.add_wanted(book_id, url, media_kind).await;
        assert!(self.db.claim_for_dispatch(id).await.unwrap());
        assert!(self.db.mark_snatched(id, &handle).await.unwrap());
        self.db
            .set_book_status(&BookId::from(book_id), Library::Ebook, BookStatus::Snatched, None)
            .await
            .unwrap();
        id
    }

    pub(crate) async fn book_status(&self, book_id: &str) -> BookStatus {
        self.db
            .get_book(&BookId::from(book_id))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    pub(crate) async fn wanted_status(&self, id: WantedId) -> WantedStatus {
        self.db.get_wanted(id).await.unwrap().unwrap().status
    }

    /// Events received so far, without waiting
    pub(crate) fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub(crate) fn candidate(book_id: &str, url: &str, media_kind: MediaKind) -> NewWantedItem {
    NewWantedItem {
        book_id: BookId::from(book_id),
        source_url: url.to_string(),
        title: format!("Release of {}", book_id),
        size_bytes: Some(2 * 1024 * 1024),
        provider: "indexer".to_string(),
        aux_info: None,
        library: Library::Ebook,
        media_kind,
    }
}

pub(crate) fn handle(kind: BackendKind, external_id: Option<&str>, hours_ago: i64) -> BackendHandle {
    BackendHandle {
        kind,
        external_id: external_id.map(str::to_string),
        submitted_at: chrono::Utc::now() - chrono::Duration::hours(hours_ago),
    }
}
