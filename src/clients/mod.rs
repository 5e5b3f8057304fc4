//! Download client adapters
//!
//! Every external downloader sits behind the [`DownloadClient`] trait. Adapters own their
//! wire protocol, credentials and session; callers only see [`Submission`]s,
//! [`DownloadProgress`] and [`ClientError`]s.
//!
//! Capabilities differ between backends (a blackhole cannot report progress, uTorrent has
//! no seed-ratio call). Missing capabilities are reported through [`ClientCapabilities`]
//! and the corresponding trait methods are no-ops returning `true`.

use crate::config::{Config, PollPolicy, PostSubmitSettings, TorrentBackend, UsenetBackend};
use crate::error::{ClientResult, Result};
use crate::retry::{Sleeper, TokioSleeper};
use crate::types::{
    BackendKind, ConnectionTestResult, DownloadProgress, MediaKind, WantedItem,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod blackhole;
pub mod deluge;
pub(crate) mod http;
pub mod nzbget;
pub mod qbittorrent;
pub mod rtorrent;
pub mod sabnzbd;
pub(crate) mod session;
pub mod synology;
pub mod torrent;
pub mod transmission;
pub mod utorrent;
pub(crate) mod xmlrpc;

pub use blackhole::BlackholeClient;
pub use deluge::DelugeClient;
pub use nzbget::NzbgetClient;
pub use qbittorrent::QbittorrentClient;
pub use rtorrent::RtorrentClient;
pub use sabnzbd::SabnzbdClient;
pub use synology::SynologyClient;
pub use transmission::TransmissionClient;
pub use utorrent::UtorrentClient;

/// Where the payload of a submission comes from
#[derive(Clone, Debug, PartialEq)]
pub enum DownloadSource {
    /// Magnet URI
    Magnet(String),
    /// HTTP(S) URL of an NZB or .torrent file
    Url(String),
    /// Raw file content, already fetched
    Content {
        /// File name to present to the backend
        file_name: String,
        /// File bytes
        bytes: Vec<u8>,
        /// URL the content was fetched from, for backends that only take URLs
        origin: Option<String>,
    },
}

impl DownloadSource {
    /// Classify a source URL
    pub fn from_url(url: &str) -> Self {
        if url.trim_start().to_ascii_lowercase().starts_with("magnet:") {
            DownloadSource::Magnet(url.trim().to_string())
        } else {
            DownloadSource::Url(url.trim().to_string())
        }
    }

    /// URL or magnet URI; for fetched content, the URL it came from
    pub fn as_url(&self) -> Option<&str> {
        match self {
            DownloadSource::Magnet(uri) | DownloadSource::Url(uri) => Some(uri),
            DownloadSource::Content { origin, .. } => origin.as_deref(),
        }
    }

    /// Info hash known before submission (magnet btih or .torrent info dictionary)
    pub fn known_hash(&self) -> Option<String> {
        match self {
            DownloadSource::Magnet(uri) => torrent::magnet_hash(uri),
            DownloadSource::Content { bytes, .. } => torrent::info_hash(bytes),
            DownloadSource::Url(_) => None,
        }
    }
}

/// A request to hand one wanted item to a backend
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    /// Release title, used as the NZB/task name
    pub title: String,
    /// Payload
    pub source: DownloadSource,
    /// Media kind of the payload
    pub media_kind: MediaKind,
}

impl SubmitRequest {
    /// Build the request for a wanted item
    pub fn for_item(item: &WantedItem) -> Self {
        Self {
            title: item.title.clone(),
            source: DownloadSource::from_url(&item.source_url),
            media_kind: item.media_kind,
        }
    }

    /// Source URL used to find the task in a backend listing
    pub(crate) fn source_url(&self) -> &str {
        self.source.as_url().unwrap_or(&self.title)
    }
}

/// Backend acceptance of a submission
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    /// Backend-native identifier; `None` when the backend confirmed receipt but no
    /// identifier could be found
    pub external_id: Option<String>,
}

impl Submission {
    /// Accepted with a known identifier
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            external_id: Some(id.into()),
        }
    }

    /// Accepted, identifier unknown
    pub fn without_id() -> Self {
        Self { external_id: None }
    }
}

/// Optional operations a backend supports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// Can label/categorise an existing task
    pub labels: bool,
    /// Can set a seed ratio on an existing task
    pub seed_ratio: bool,
    /// Can move an existing task's download path
    pub download_path: bool,
    /// Can report task progress
    pub progress: bool,
}

/// Uniform interface over every download backend
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Optional operations this backend supports
    fn capabilities(&self) -> ClientCapabilities;

    /// Hand a payload to the backend
    ///
    /// Returns `Ok` once the backend confirmed receipt, even if no identifier could be
    /// determined.
    async fn submit(&self, request: &SubmitRequest) -> ClientResult<Submission>;

    /// Progress of a task
    ///
    /// A task the backend does not know yet (metadata still resolving) reports
    /// `Pending` with zero progress rather than an error.
    async fn status(&self, external_id: &str) -> ClientResult<DownloadProgress>;

    /// Remove a task, optionally with its data. Best effort.
    async fn remove(&self, external_id: &str, delete_data: bool) -> bool;

    /// Label a task
    async fn set_label(&self, _external_id: &str, _label: &str) -> bool {
        true
    }

    /// Set a task's seed ratio
    async fn set_seed_ratio(&self, _external_id: &str, _ratio: f64) -> bool {
        true
    }

    /// Move a task's download path
    async fn set_download_path(&self, _external_id: &str, _path: &str) -> bool {
        true
    }

    /// Check connectivity and credentials
    async fn test_connection(&self) -> ConnectionTestResult;

    /// Name the backend gave a task, once it knows one
    ///
    /// Backends that cannot report names return `None`.
    async fn task_name(&self, _external_id: &str) -> Option<String> {
        None
    }

    /// Release any cached session
    async fn close(&self) {}
}

/// A configured client plus the settings applied after each accepted submission
#[derive(Clone)]
pub struct ActiveClient {
    /// The adapter
    pub client: Arc<dyn DownloadClient>,
    /// Label / seed ratio / path to apply post-submit
    pub settings: PostSubmitSettings,
}

impl ActiveClient {
    /// Wrap a client with no post-submit settings
    pub fn new(client: Arc<dyn DownloadClient>) -> Self {
        Self {
            client,
            settings: PostSubmitSettings::default(),
        }
    }

    /// Attach post-submit settings
    pub fn with_settings(mut self, settings: PostSubmitSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Clone, Default)]
struct ActiveClients {
    usenet: Option<ActiveClient>,
    torrent: Option<ActiveClient>,
}

/// The clients built from the active configuration snapshot
///
/// Rebuilt whenever the configuration is replaced; callers resolve a client per
/// operation and never keep one across snapshots.
pub struct ClientRegistry {
    active: RwLock<ActiveClients>,
    sleeper: Arc<dyn Sleeper>,
}

impl ClientRegistry {
    /// Build clients for the backends selected in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_sleeper(config, Arc::new(TokioSleeper))
    }

    /// Build clients with a custom sleeper for their polling loops
    pub fn from_config_with_sleeper(config: &Config, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let active = build_clients(config, sleeper.clone())?;
        Ok(Self {
            active: RwLock::new(active),
            sleeper,
        })
    }

    /// Registry with explicitly supplied clients
    pub fn with_clients(usenet: Option<ActiveClient>, torrent: Option<ActiveClient>) -> Self {
        Self {
            active: RwLock::new(ActiveClients { usenet, torrent }),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Active client for a media kind
    pub async fn client_for(&self, media_kind: MediaKind) -> Option<ActiveClient> {
        let active = self.active.read().await;
        match media_kind {
            MediaKind::Usenet => active.usenet.clone(),
            MediaKind::Torrent => active.torrent.clone(),
        }
    }

    /// Active client of a specific backend kind, if that backend is still selected
    pub async fn client_of_kind(&self, kind: BackendKind) -> Option<ActiveClient> {
        self.client_for(kind.media_kind())
            .await
            .filter(|active| active.client.kind() == kind)
    }

    /// Replace the clients after a configuration change, closing the old ones
    pub async fn rebuild(&self, config: &Config) -> Result<()> {
        let fresh = build_clients(config, self.sleeper.clone())?;
        let old = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, fresh)
        };
        close_clients(old).await;
        Ok(())
    }

    /// Swap in explicitly supplied clients
    pub async fn replace(&self, usenet: Option<ActiveClient>, torrent: Option<ActiveClient>) {
        let old = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, ActiveClients { usenet, torrent })
        };
        close_clients(old).await;
    }

    /// Close every client's session
    pub async fn close_all(&self) {
        let active = self.active.read().await.clone();
        close_clients(active).await;
    }
}

async fn close_clients(clients: ActiveClients) {
    for active in [clients.usenet, clients.torrent].into_iter().flatten() {
        active.client.close().await;
    }
}

fn build_clients(config: &Config, sleeper: Arc<dyn Sleeper>) -> Result<ActiveClients> {
    let lookup = config.reconcile.identifier_lookup.clone();
    Ok(ActiveClients {
        usenet: build_usenet(&config.usenet, &lookup, sleeper.clone())?,
        torrent: build_torrent(&config.torrent, &lookup, sleeper)?,
    })
}

fn build_usenet(
    backend: &UsenetBackend,
    lookup: &PollPolicy,
    sleeper: Arc<dyn Sleeper>,
) -> Result<Option<ActiveClient>> {
    let client: Arc<dyn DownloadClient> = match backend {
        UsenetBackend::None => return Ok(None),
        UsenetBackend::Sabnzbd(c) => Arc::new(SabnzbdClient::new(c.clone())?),
        UsenetBackend::Nzbget(c) => Arc::new(NzbgetClient::new(c.clone())?),
        UsenetBackend::Synology(c) => Arc::new(SynologyClient::new(
            c.clone(),
            MediaKind::Usenet,
            lookup.clone(),
            sleeper,
        )?),
        UsenetBackend::Blackhole(c) => {
            Arc::new(BlackholeClient::new(c.clone(), MediaKind::Usenet)?)
        }
    };
    Ok(Some(ActiveClient::new(client)))
}

fn build_torrent(
    backend: &TorrentBackend,
    lookup: &PollPolicy,
    sleeper: Arc<dyn Sleeper>,
) -> Result<Option<ActiveClient>> {
    let client: Arc<dyn DownloadClient> = match backend {
        TorrentBackend::None => return Ok(None),
        TorrentBackend::Blackhole(c) => {
            Arc::new(BlackholeClient::new(c.clone(), MediaKind::Torrent)?)
        }
        TorrentBackend::Utorrent(c) => Arc::new(UtorrentClient::new(c.clone())?),
        TorrentBackend::Rtorrent(c) => {
            Arc::new(RtorrentClient::new(c.clone(), lookup.clone(), sleeper)?)
        }
        TorrentBackend::Transmission(c) => Arc::new(TransmissionClient::new(c.clone())?),
        TorrentBackend::Deluge(c) => Arc::new(DelugeClient::new(c.clone())?),
        TorrentBackend::Qbittorrent(c) => Arc::new(QbittorrentClient::new(c.clone())?),
        TorrentBackend::Synology(c) => Arc::new(SynologyClient::new(
            c.clone(),
            MediaKind::Torrent,
            lookup.clone(),
            sleeper,
        )?),
    };
    Ok(Some(
        ActiveClient::new(client).with_settings(backend.post_submit_settings()),
    ))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
