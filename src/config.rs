//! Configuration types for librarian-dl
//!
//! A [`Config`] is an immutable snapshot. [`ConfigHandle`] is its single owner and swaps
//! in a validated replacement atomically; every component reads through a
//! [`ConfigReader`] and never holds on to a snapshot longer than one operation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Main configuration for the coordinator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Record store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Active usenet downloader (at most one)
    #[serde(default)]
    pub usenet: UsenetBackend,

    /// Active torrent client (at most one)
    #[serde(default)]
    pub torrent: TorrentBackend,

    /// Which indexer families are in use (gates the search jobs)
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Recurring job intervals
    #[serde(default)]
    pub jobs: JobsConfig,

    /// In-flight task reconciliation
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Notification targets
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Words that disqualify a release name
    #[serde(default)]
    pub reject_words: RejectWords,

    /// How long shutdown waits for running jobs (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            usenet: UsenetBackend::default(),
            torrent: TorrentBackend::default(),
            providers: ProviderConfig::default(),
            jobs: JobsConfig::default(),
            reconcile: ReconcileConfig::default(),
            notifications: NotificationConfig::default(),
            reject_words: RejectWords::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Check every enabled backend for the settings it cannot work without
    pub fn validate(&self) -> Result<()> {
        self.usenet.validate()?;
        self.torrent.validate()?;
        self.reconcile.poll.validate("reconcile.poll")?;
        self.reconcile
            .identifier_lookup
            .validate("reconcile.identifier_lookup")?;
        for (i, webhook) in self.notifications.webhooks.iter().enumerate() {
            if url::Url::parse(&webhook.url).is_err() {
                return Err(Error::config(
                    format!("invalid webhook URL '{}'", webhook.url),
                    format!("notifications.webhooks[{}].url", i),
                ));
            }
        }
        Ok(())
    }

    /// Whether a backend of the given media kind is configured
    pub fn has_backend(&self, kind: crate::types::MediaKind) -> bool {
        match kind {
            crate::types::MediaKind::Usenet => !matches!(self.usenet, UsenetBackend::None),
            crate::types::MediaKind::Torrent => !matches!(self.torrent, TorrentBackend::None),
        }
    }
}

/// Record store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "librarian.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Network location and credentials of a download client
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or URL (scheme optional, defaults to http)
    pub host: String,

    /// Port, when not part of `host`
    #[serde(default)]
    pub port: Option<u16>,

    /// Path prefix the client is served under (reverse proxies)
    #[serde(default)]
    pub base_path: Option<String>,

    /// Username
    #[serde(default)]
    pub username: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Endpoint {
    /// Endpoint with just a host, defaults elsewhere
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            base_path: None,
            username: None,
            password: None,
            timeout: default_request_timeout(),
        }
    }

    /// Normalized base URL without a trailing slash
    pub fn base_url(&self) -> Result<String> {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(Error::ConfigInvalid {
                message: "host is required".into(),
                key: None,
            });
        }
        let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        let mut url = url::Url::parse(&with_scheme).map_err(|e| Error::ConfigInvalid {
            message: format!("invalid host '{}': {}", self.host, e),
            key: None,
        })?;
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|_| Error::ConfigInvalid {
                message: format!("cannot set port on '{}'", self.host),
                key: None,
            })?;
        }
        if let Some(path) = &self.base_path {
            let trimmed = path.trim_matches('/');
            if !trimmed.is_empty() {
                url.set_path(&format!("/{}", trimmed));
            }
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn validate(&self, key: &str) -> Result<()> {
        self.base_url().map_err(|e| match e {
            Error::ConfigInvalid { message, .. } => Error::config(message, format!("{}.host", key)),
            other => other,
        })?;
        Ok(())
    }

    fn require_credentials(&self, key: &str) -> Result<()> {
        if self.username.as_deref().is_none_or(str::is_empty) {
            return Err(Error::config(
                "username is required",
                format!("{}.username", key),
            ));
        }
        self.require_password(key)
    }

    fn require_password(&self, key: &str) -> Result<()> {
        if self.password.as_deref().is_none_or(str::is_empty) {
            return Err(Error::config(
                "password is required",
                format!("{}.password", key),
            ));
        }
        Ok(())
    }
}

/// SABnzbd settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SabnzbdConfig {
    /// Location and optional web credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// API key
    pub api_key: String,
    /// Category assigned to submitted NZBs
    #[serde(default)]
    pub category: Option<String>,
    /// SABnzbd priority (-1 low .. 2 force)
    #[serde(default)]
    pub priority: Option<i32>,
}

/// NZBGet settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NzbgetConfig {
    /// Location and control credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Category assigned to submitted NZBs
    #[serde(default)]
    pub category: Option<String>,
    /// NZBGet priority
    #[serde(default)]
    pub priority: i32,
}

/// Synology DownloadStation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynologyConfig {
    /// Location and DSM account
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Shared-folder destination for new tasks
    #[serde(default)]
    pub download_dir: Option<String>,
}

/// Watched directory settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlackholeConfig {
    /// Directory the files are dropped into
    pub directory: PathBuf,
}

/// uTorrent settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UtorrentConfig {
    /// Location and Web UI credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Label applied to submitted torrents
    #[serde(default)]
    pub label: Option<String>,
}

/// rTorrent settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtorrentConfig {
    /// XML-RPC location (including the RPC path) and optional credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Label stored in custom1
    #[serde(default)]
    pub label: Option<String>,
    /// Directory new downloads are moved to
    #[serde(default)]
    pub download_dir: Option<String>,
}

/// Transmission settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransmissionConfig {
    /// Location and RPC credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Download directory for new torrents
    #[serde(default)]
    pub download_dir: Option<String>,
    /// Seed ratio limit (0 = seed forever)
    #[serde(default)]
    pub seed_ratio: Option<f64>,
}

/// Deluge Web UI settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelugeConfig {
    /// Location and Web UI password
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Label applied to submitted torrents (label plugin)
    #[serde(default)]
    pub label: Option<String>,
    /// Move-completed path
    #[serde(default)]
    pub download_dir: Option<String>,
    /// Stop seeding at this ratio
    #[serde(default)]
    pub seed_ratio: Option<f64>,
}

/// qBittorrent Web API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QbittorrentConfig {
    /// Location and Web UI credentials
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Category applied to submitted torrents
    #[serde(default)]
    pub label: Option<String>,
    /// Save path for new torrents
    #[serde(default)]
    pub download_dir: Option<String>,
    /// Stop seeding at this ratio
    #[serde(default)]
    pub seed_ratio: Option<f64>,
}

/// The single usenet downloader in use
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "UsenetSelection", into = "UsenetSelection")]
pub enum UsenetBackend {
    /// No usenet downloader; NZB dispatch is disabled
    #[default]
    None,
    /// SABnzbd
    Sabnzbd(SabnzbdConfig),
    /// NZBGet
    Nzbget(NzbgetConfig),
    /// Synology DownloadStation
    Synology(SynologyConfig),
    /// Watched directory
    Blackhole(BlackholeConfig),
}

impl UsenetBackend {
    fn validate(&self) -> Result<()> {
        match self {
            UsenetBackend::None => Ok(()),
            UsenetBackend::Sabnzbd(c) => {
                c.endpoint.validate("usenet.sabnzbd")?;
                if c.api_key.trim().is_empty() {
                    return Err(Error::config(
                        "SABnzbd API key is required",
                        "usenet.sabnzbd.api_key",
                    ));
                }
                Ok(())
            }
            UsenetBackend::Nzbget(c) => c.endpoint.validate("usenet.nzbget"),
            UsenetBackend::Synology(c) => {
                c.endpoint.validate("usenet.synology")?;
                c.endpoint.require_credentials("usenet.synology")
            }
            UsenetBackend::Blackhole(c) => {
                validate_directory(&c.directory, "usenet.blackhole.directory")
            }
        }
    }
}

/// The single torrent client in use
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "TorrentSelection", into = "TorrentSelection")]
pub enum TorrentBackend {
    /// No torrent client; torrent dispatch is disabled
    #[default]
    None,
    /// Watched directory
    Blackhole(BlackholeConfig),
    /// uTorrent
    Utorrent(UtorrentConfig),
    /// rTorrent
    Rtorrent(RtorrentConfig),
    /// Transmission
    Transmission(TransmissionConfig),
    /// Deluge Web UI
    Deluge(DelugeConfig),
    /// qBittorrent Web API
    Qbittorrent(QbittorrentConfig),
    /// Synology DownloadStation
    Synology(SynologyConfig),
}

impl TorrentBackend {
    fn validate(&self) -> Result<()> {
        let ratio = match self {
            TorrentBackend::None => return Ok(()),
            TorrentBackend::Blackhole(c) => {
                return validate_directory(&c.directory, "torrent.blackhole.directory");
            }
            TorrentBackend::Utorrent(c) => {
                c.endpoint.validate("torrent.utorrent")?;
                None
            }
            TorrentBackend::Rtorrent(c) => {
                c.endpoint.validate("torrent.rtorrent")?;
                None
            }
            TorrentBackend::Transmission(c) => {
                c.endpoint.validate("torrent.transmission")?;
                c.seed_ratio
            }
            TorrentBackend::Deluge(c) => {
                c.endpoint.validate("torrent.deluge")?;
                c.endpoint.require_password("torrent.deluge")?;
                c.seed_ratio
            }
            TorrentBackend::Qbittorrent(c) => {
                c.endpoint.validate("torrent.qbittorrent")?;
                c.seed_ratio
            }
            TorrentBackend::Synology(c) => {
                c.endpoint.validate("torrent.synology")?;
                c.endpoint.require_credentials("torrent.synology")?;
                None
            }
        };
        if let Some(r) = ratio
            && !(r.is_finite() && r >= 0.0)
        {
            return Err(Error::config(
                format!("seed ratio must be a non-negative number, got {}", r),
                "torrent.seed_ratio",
            ));
        }
        Ok(())
    }

    /// Settings applied to a torrent after it was accepted
    pub fn post_submit_settings(&self) -> PostSubmitSettings {
        match self {
            TorrentBackend::Utorrent(c) => PostSubmitSettings {
                label: c.label.clone(),
                ..Default::default()
            },
            TorrentBackend::Rtorrent(c) => PostSubmitSettings {
                label: c.label.clone(),
                download_dir: c.download_dir.clone(),
                seed_ratio: None,
            },
            TorrentBackend::Transmission(c) => PostSubmitSettings {
                label: None,
                // download-dir is sent with torrent-add
                download_dir: None,
                seed_ratio: c.seed_ratio,
            },
            TorrentBackend::Deluge(c) => PostSubmitSettings {
                label: c.label.clone(),
                download_dir: c.download_dir.clone(),
                seed_ratio: c.seed_ratio,
            },
            TorrentBackend::Qbittorrent(c) => PostSubmitSettings {
                label: c.label.clone(),
                // savepath is sent with the add request
                download_dir: None,
                seed_ratio: c.seed_ratio,
            },
            TorrentBackend::None | TorrentBackend::Blackhole(_) | TorrentBackend::Synology(_) => {
                PostSubmitSettings::default()
            }
        }
    }
}

/// Label / seed ratio / path issued once per accepted submission
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PostSubmitSettings {
    /// Label to set
    pub label: Option<String>,
    /// Seed ratio to set
    pub seed_ratio: Option<f64>,
    /// Download path to set
    pub download_dir: Option<String>,
}

fn validate_directory(dir: &std::path::Path, key: &str) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(Error::config("blackhole directory is required", key));
    }
    Ok(())
}

/// Wire shape of the usenet selection: one optional table per backend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UsenetSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sabnzbd: Option<SabnzbdConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nzbget: Option<NzbgetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synology: Option<SynologyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blackhole: Option<BlackholeConfig>,
}

impl TryFrom<UsenetSelection> for UsenetBackend {
    type Error = String;

    fn try_from(raw: UsenetSelection) -> std::result::Result<Self, Self::Error> {
        let mut enabled = Vec::new();
        if let Some(c) = raw.sabnzbd {
            enabled.push(("sabnzbd", UsenetBackend::Sabnzbd(c)));
        }
        if let Some(c) = raw.nzbget {
            enabled.push(("nzbget", UsenetBackend::Nzbget(c)));
        }
        if let Some(c) = raw.synology {
            enabled.push(("synology", UsenetBackend::Synology(c)));
        }
        if let Some(c) = raw.blackhole {
            enabled.push(("blackhole", UsenetBackend::Blackhole(c)));
        }
        single_selection("usenet", enabled, UsenetBackend::None)
    }
}

impl From<UsenetBackend> for UsenetSelection {
    fn from(backend: UsenetBackend) -> Self {
        let mut raw = UsenetSelection::default();
        match backend {
            UsenetBackend::None => {}
            UsenetBackend::Sabnzbd(c) => raw.sabnzbd = Some(c),
            UsenetBackend::Nzbget(c) => raw.nzbget = Some(c),
            UsenetBackend::Synology(c) => raw.synology = Some(c),
            UsenetBackend::Blackhole(c) => raw.blackhole = Some(c),
        }
        raw
    }
}

/// Wire shape of the torrent selection: one optional table per backend
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TorrentSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blackhole: Option<BlackholeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utorrent: Option<UtorrentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rtorrent: Option<RtorrentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transmission: Option<TransmissionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deluge: Option<DelugeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qbittorrent: Option<QbittorrentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synology: Option<SynologyConfig>,
}

impl TryFrom<TorrentSelection> for TorrentBackend {
    type Error = String;

    fn try_from(raw: TorrentSelection) -> std::result::Result<Self, Self::Error> {
        let mut enabled = Vec::new();
        if let Some(c) = raw.blackhole {
            enabled.push(("blackhole", TorrentBackend::Blackhole(c)));
        }
        if let Some(c) = raw.utorrent {
            enabled.push(("utorrent", TorrentBackend::Utorrent(c)));
        }
        if let Some(c) = raw.rtorrent {
            enabled.push(("rtorrent", TorrentBackend::Rtorrent(c)));
        }
        if let Some(c) = raw.transmission {
            enabled.push(("transmission", TorrentBackend::Transmission(c)));
        }
        if let Some(c) = raw.deluge {
            enabled.push(("deluge", TorrentBackend::Deluge(c)));
        }
        if let Some(c) = raw.qbittorrent {
            enabled.push(("qbittorrent", TorrentBackend::Qbittorrent(c)));
        }
        if let Some(c) = raw.synology {
            enabled.push(("synology", TorrentBackend::Synology(c)));
        }
        single_selection("torrent", enabled, TorrentBackend::None)
    }
}

impl From<TorrentBackend> for TorrentSelection {
    fn from(backend: TorrentBackend) -> Self {
        let mut raw = TorrentSelection::default();
        match backend {
            TorrentBackend::None => {}
            TorrentBackend::Blackhole(c) => raw.blackhole = Some(c),
            TorrentBackend::Utorrent(c) => raw.utorrent = Some(c),
            TorrentBackend::Rtorrent(c) => raw.rtorrent = Some(c),
            TorrentBackend::Transmission(c) => raw.transmission = Some(c),
            TorrentBackend::Deluge(c) => raw.deluge = Some(c),
            TorrentBackend::Qbittorrent(c) => raw.qbittorrent = Some(c),
            TorrentBackend::Synology(c) => raw.synology = Some(c),
        }
        raw
    }
}

fn single_selection<T>(
    media: &str,
    mut enabled: Vec<(&'static str, T)>,
    none: T,
) -> std::result::Result<T, String> {
    match enabled.len() {
        0 => Ok(none),
        1 => Ok(enabled.remove(0).1),
        _ => {
            let names: Vec<&str> = enabled.iter().map(|(name, _)| *name).collect();
            Err(format!(
                "only one {} backend may be enabled, found: {}",
                media,
                names.join(", ")
            ))
        }
    }
}

/// Which indexer families are configured
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Newznab-style NZB indexers
    #[serde(default)]
    pub nzb: bool,
    /// Torznab / torrent indexers
    #[serde(default)]
    pub torrent: bool,
    /// RSS feeds
    #[serde(default)]
    pub rss: bool,
}

impl ProviderConfig {
    /// Whether any provider is configured
    pub fn any(&self) -> bool {
        self.nzb || self.torrent || self.rss
    }
}

/// Recurring job intervals (0 disables a job)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Post-processor / library scan, minutes (default: 10)
    #[serde(default = "default_post_processor_interval")]
    pub post_processor_minutes: u32,
    /// NZB and torrent book searches, minutes (default: 360)
    #[serde(default = "default_search_book_interval")]
    pub search_book_minutes: u32,
    /// RSS book search, minutes (default: 20)
    #[serde(default = "default_search_rss_interval")]
    pub search_rss_minutes: u32,
    /// Magazine search, minutes (default: 360)
    #[serde(default = "default_search_book_interval")]
    pub search_magazines_minutes: u32,
    /// Version check, hours (default: 24)
    #[serde(default = "default_hourly_interval")]
    pub version_check_hours: u32,
    /// Author metadata refresh, hours (default: 24)
    #[serde(default = "default_hourly_interval")]
    pub author_update_hours: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            post_processor_minutes: default_post_processor_interval(),
            search_book_minutes: default_search_book_interval(),
            search_rss_minutes: default_search_rss_interval(),
            search_magazines_minutes: default_search_book_interval(),
            version_check_hours: default_hourly_interval(),
            author_update_hours: default_hourly_interval(),
        }
    }
}

/// Bounded polling with a fixed or growing delay
///
/// Used wherever a backend needs a moment before it can answer: metadata resolution,
/// a task appearing in a list after submission, progress checks during a sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum number of attempts, including the first (default: 10)
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts (default: 5 seconds)
    #[serde(default = "default_poll_delay", with = "duration_serde")]
    pub delay: Duration,

    /// Maximum delay once backoff applies (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Delay multiplier per attempt (default: 1.0, i.e. fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            delay: default_poll_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl PollPolicy {
    /// Fixed delay policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    fn validate(&self, key: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be at least 1",
                format!("{}.max_attempts", key),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(Error::config(
                "backoff_multiplier must be >= 1.0",
                format!("{}.backoff_multiplier", key),
            ));
        }
        Ok(())
    }
}

/// Reconcile sweep settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Progress polling per in-flight task (default: 10 attempts, 5 seconds apart)
    #[serde(default)]
    pub poll: PollPolicy,

    /// Lookup of a task that was accepted without an identifier
    #[serde(default = "default_identifier_lookup")]
    pub identifier_lookup: PollPolicy,

    /// Abort tasks still snatched after this many hours (0 disables, default: 0)
    #[serde(default)]
    pub task_age_hours: u32,

    /// Delete downloaded data when a task is aborted (default: true)
    #[serde(default = "default_true")]
    pub remove_data_on_abort: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            identifier_lookup: default_identifier_lookup(),
            task_age_hours: 0,
            remove_data_on_abort: true,
        }
    }
}

/// Reject words per edition, matched case-insensitively against release names
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RejectWords {
    /// Words that disqualify an ebook release
    #[serde(default)]
    pub ebook: Vec<String>,
    /// Words that disqualify an audiobook release
    #[serde(default)]
    pub audiobook: Vec<String>,
}

impl RejectWords {
    /// First reject word for `library` contained in `name`
    pub fn matching(&self, library: crate::types::Library, name: &str) -> Option<&str> {
        let words = match library {
            crate::types::Library::Ebook => &self.ebook,
            crate::types::Library::Audiobook => &self.audiobook,
        };
        let name = name.to_lowercase();
        words
            .iter()
            .map(|w| w.trim())
            .find(|w| !w.is_empty() && name.contains(&w.to_lowercase()))
    }
}

/// Notification targets
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhooks called on snatch/download
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Webhook configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Events that trigger this webhook
    pub events: Vec<NotifyEvent>,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for webhook requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Notification trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A download was handed to a backend
    Snatch,
    /// A download was imported into the library
    Download,
}

/// Single owner of the active configuration snapshot
///
/// Replacing the snapshot validates first; readers never observe a half-applied or
/// invalid configuration.
pub struct ConfigHandle {
    tx: watch::Sender<Arc<Config>>,
}

impl ConfigHandle {
    /// Validate and take ownership of the initial configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(Self { tx })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    /// Validate and atomically swap in a new snapshot
    ///
    /// On validation failure the previous snapshot stays active.
    pub fn replace(&self, config: Config) -> Result<Arc<Config>> {
        config.validate()?;
        let config = Arc::new(config);
        self.tx.send_replace(config.clone());
        tracing::info!("configuration snapshot replaced");
        Ok(config)
    }

    /// Read-only view for components
    pub fn reader(&self) -> ConfigReader {
        ConfigReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only access to the active configuration snapshot
#[derive(Clone)]
pub struct ConfigReader {
    rx: watch::Receiver<Arc<Config>>,
}

impl ConfigReader {
    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Config> {
        self.rx.borrow().clone()
    }
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("librarian.db")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_post_processor_interval() -> u32 {
    10
}

fn default_search_book_interval() -> u32 {
    360
}

fn default_search_rss_interval() -> u32 {
    20
}

fn default_hourly_interval() -> u32 {
    24
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_identifier_lookup() -> PollPolicy {
    PollPolicy::fixed(5, Duration::from_secs(2))
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !(secs.is_finite() && secs >= 0.0) {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
