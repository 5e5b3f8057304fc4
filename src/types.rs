//! Core types for librarian-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a row in the wanted table
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WantedId(pub i64);

impl WantedId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for WantedId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<WantedId> for i64 {
    fn from(id: WantedId) -> Self {
        id.0
    }
}

impl std::fmt::Display for WantedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WantedId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for WantedId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for WantedId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for WantedId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifier of a bibliographic record (the BookID of the metadata store)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub String);

impl BookId {
    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BookId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BookId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a wanted item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WantedStatus {
    /// Found but not selected for download
    Skipped,
    /// Candidate waiting to be dispatched
    Wanted,
    /// Claimed by a dispatch, submission in progress
    Pending,
    /// Accepted by a backend, not yet imported
    Snatched,
    /// File confirmed in the library
    Processed,
    /// Submission or download failed
    Failed,
}

impl WantedStatus {
    /// Convert integer status code to WantedStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => WantedStatus::Skipped,
            1 => WantedStatus::Wanted,
            2 => WantedStatus::Pending,
            3 => WantedStatus::Snatched,
            4 => WantedStatus::Processed,
            _ => WantedStatus::Failed,
        }
    }

    /// Convert WantedStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            WantedStatus::Skipped => 0,
            WantedStatus::Wanted => 1,
            WantedStatus::Pending => 2,
            WantedStatus::Snatched => 3,
            WantedStatus::Processed => 4,
            WantedStatus::Failed => 5,
        }
    }

    /// Whether a backend task may still be running for this status
    pub fn is_in_flight(&self) -> bool {
        matches!(self, WantedStatus::Pending | WantedStatus::Snatched)
    }
}

impl std::fmt::Display for WantedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WantedStatus::Skipped => "Skipped",
            WantedStatus::Wanted => "Wanted",
            WantedStatus::Pending => "Pending",
            WantedStatus::Snatched => "Snatched",
            WantedStatus::Processed => "Processed",
            WantedStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Status of a book (or its audiobook edition) in the bibliographic store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookStatus {
    /// Not wanted
    Skipped,
    /// Wanted, searches will look for it
    Wanted,
    /// A download was handed to a backend
    Snatched,
    /// In the library but not opened by the post-processor
    Have,
    /// Imported into the library
    Open,
    /// Explicitly ignored by the user
    Ignored,
}

impl BookStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Skipped => "Skipped",
            BookStatus::Wanted => "Wanted",
            BookStatus::Snatched => "Snatched",
            BookStatus::Have => "Have",
            BookStatus::Open => "Open",
            BookStatus::Ignored => "Ignored",
        }
    }

    /// Parse the storage representation; unknown values read as Skipped
    pub fn parse(value: &str) -> Self {
        match value {
            "Wanted" => BookStatus::Wanted,
            "Snatched" => BookStatus::Snatched,
            "Have" => BookStatus::Have,
            "Open" => BookStatus::Open,
            "Ignored" => BookStatus::Ignored,
            _ => BookStatus::Skipped,
        }
    }
}

/// Which edition of a book a wanted item belongs to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    /// Electronic book
    #[default]
    Ebook,
    /// Audiobook
    Audiobook,
}

impl Library {
    /// Convert integer code to Library
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Library::Audiobook,
            _ => Library::Ebook,
        }
    }

    /// Convert Library to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            Library::Ebook => 0,
            Library::Audiobook => 1,
        }
    }

    /// Column of the books table holding the status for this edition
    pub(crate) fn status_column(&self) -> &'static str {
        match self {
            Library::Ebook => "status",
            Library::Audiobook => "audio_status",
        }
    }
}

/// Class of download backend an item needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// NZB handed to a usenet downloader
    Usenet,
    /// Magnet or torrent handed to a torrent client
    Torrent,
}

impl MediaKind {
    /// Convert integer code to MediaKind
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => MediaKind::Torrent,
            _ => MediaKind::Usenet,
        }
    }

    /// Convert MediaKind to integer code
    pub fn to_i32(&self) -> i32 {
        match self {
            MediaKind::Usenet => 0,
            MediaKind::Torrent => 1,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Usenet => f.write_str("NZB"),
            MediaKind::Torrent => f.write_str("torrent"),
        }
    }
}

/// Supported download backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// SABnzbd
    Sabnzbd,
    /// NZBGet
    Nzbget,
    /// Synology DownloadStation receiving NZBs
    SynologyNzb,
    /// NZB files dropped into a watched directory
    UsenetBlackhole,
    /// Torrent or magnet files dropped into a watched directory
    TorrentBlackhole,
    /// uTorrent Web UI
    Utorrent,
    /// rTorrent XML-RPC
    Rtorrent,
    /// Transmission RPC
    Transmission,
    /// Deluge Web UI JSON-RPC
    Deluge,
    /// qBittorrent Web API
    Qbittorrent,
    /// Synology DownloadStation receiving torrents
    SynologyTorrent,
}

impl BackendKind {
    /// All backend kinds
    pub const ALL: [BackendKind; 11] = [
        BackendKind::Sabnzbd,
        BackendKind::Nzbget,
        BackendKind::SynologyNzb,
        BackendKind::UsenetBlackhole,
        BackendKind::TorrentBlackhole,
        BackendKind::Utorrent,
        BackendKind::Rtorrent,
        BackendKind::Transmission,
        BackendKind::Deluge,
        BackendKind::Qbittorrent,
        BackendKind::SynologyTorrent,
    ];

    /// Storage representation (the `Source` recorded on a wanted item)
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sabnzbd => "SABNZBD",
            BackendKind::Nzbget => "NZBGET",
            BackendKind::SynologyNzb => "SYNOLOGY_NZB",
            BackendKind::UsenetBlackhole => "BLACKHOLE",
            BackendKind::TorrentBlackhole => "TOR_BLACKHOLE",
            BackendKind::Utorrent => "UTORRENT",
            BackendKind::Rtorrent => "RTORRENT",
            BackendKind::Transmission => "TRANSMISSION",
            BackendKind::Deluge => "DELUGEWEBUI",
            BackendKind::Qbittorrent => "QBITTORRENT",
            BackendKind::SynologyTorrent => "SYNOLOGY_TOR",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Media kind this backend serves
    pub fn media_kind(&self) -> MediaKind {
        match self {
            BackendKind::Sabnzbd
            | BackendKind::Nzbget
            | BackendKind::SynologyNzb
            | BackendKind::UsenetBlackhole => MediaKind::Usenet,
            _ => MediaKind::Torrent,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Sabnzbd => "SABnzbd",
            BackendKind::Nzbget => "NZBGet",
            BackendKind::SynologyNzb => "Synology (NZB)",
            BackendKind::UsenetBlackhole => "NZB blackhole",
            BackendKind::TorrentBlackhole => "torrent blackhole",
            BackendKind::Utorrent => "uTorrent",
            BackendKind::Rtorrent => "rTorrent",
            BackendKind::Transmission => "Transmission",
            BackendKind::Deluge => "Deluge",
            BackendKind::Qbittorrent => "qBittorrent",
            BackendKind::SynologyTorrent => "Synology (torrent)",
        };
        f.write_str(s)
    }
}

/// Reference to a task held by a download backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandle {
    /// Backend that owns the task
    pub kind: BackendKind,
    /// Backend-native identifier (hash, numeric id, task id, file name)
    ///
    /// `None` when the backend confirmed receipt but the task could not be located.
    pub external_id: Option<String>,
    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
}

/// A wanted item as stored in the record store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WantedItem {
    /// Row identifier
    pub id: WantedId,
    /// Bibliographic record this download is for
    pub book_id: BookId,
    /// Magnet link, NZB/torrent URL, or raw content
    pub source_url: String,
    /// Display title (release name)
    pub title: String,
    /// Size reported by the indexer
    pub size_bytes: Option<u64>,
    /// Indexer that produced the candidate
    pub provider: String,
    /// Backend-specific hint (the indexer's aux info)
    pub aux_info: Option<String>,
    /// Edition this download is for
    pub library: Library,
    /// Usenet or torrent
    pub media_kind: MediaKind,
    /// Current lifecycle status
    pub status: WantedStatus,
    /// Backend task, once submitted
    pub handle: Option<BackendHandle>,
    /// Last failure or abort reason
    pub result: Option<String>,
    /// When the candidate was first recorded
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Candidate produced by a search, before it is stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewWantedItem {
    /// Bibliographic record this download is for
    pub book_id: BookId,
    /// Magnet link, NZB/torrent URL, or raw content
    pub source_url: String,
    /// Display title (release name)
    pub title: String,
    /// Size reported by the indexer
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Indexer that produced the candidate
    pub provider: String,
    /// Backend-specific hint
    #[serde(default)]
    pub aux_info: Option<String>,
    /// Edition this download is for
    #[serde(default)]
    pub library: Library,
    /// Usenet or torrent
    pub media_kind: MediaKind,
}

/// Coarse state of a backend task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Accepted, metadata not yet available (magnet resolving, task not listed yet)
    Pending,
    /// Waiting in the backend's queue
    Queued,
    /// Transferring
    Downloading,
    /// Transfer finished (may still be seeding or post-processing)
    Completed,
    /// The backend reports an error for this task
    Failed,
}

/// Progress report from a backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Percentage complete (0-100)
    pub progress: u8,
    /// Normalized state
    pub state: DownloadState,
    /// Backend message (error text for failed tasks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DownloadProgress {
    /// Task accepted but not yet visible or resolved
    pub fn pending() -> Self {
        Self {
            progress: 0,
            state: DownloadState::Pending,
            message: None,
        }
    }

    /// Task transferring at the given percentage
    pub fn downloading(progress: u8) -> Self {
        Self {
            progress: progress.min(100),
            state: if progress >= 100 {
                DownloadState::Completed
            } else {
                DownloadState::Downloading
            },
            message: None,
        }
    }

    /// Task finished
    pub fn completed() -> Self {
        Self {
            progress: 100,
            state: DownloadState::Completed,
            message: None,
        }
    }

    /// Task failed with the backend's message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            progress: 0,
            state: DownloadState::Failed,
            message: Some(message.into()),
        }
    }

    /// No bytes moved yet and the backend has nothing better to report
    pub fn is_stalled(&self) -> bool {
        self.progress == 0 && matches!(self.state, DownloadState::Pending | DownloadState::Downloading)
    }
}

/// Result of a "test connection" check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    /// Backend that was tested
    pub backend: BackendKind,

    /// Whether the test was successful
    pub success: bool,

    /// Round trip time of the check (if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,

    /// Human-readable outcome
    pub message: String,
}

impl ConnectionTestResult {
    /// Successful check
    pub fn ok(backend: BackendKind, latency: Duration, message: impl Into<String>) -> Self {
        Self {
            backend,
            success: true,
            latency: Some(latency),
            message: message.into(),
        }
    }

    /// Failed check
    pub fn failed(backend: BackendKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            success: false,
            latency: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConnectionTestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(f, "{} connection successful: {}", self.backend, self.message)
        } else {
            write!(f, "{} connection failed: {}", self.backend, self.message)
        }
    }
}

/// Event emitted by the coordinator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A wanted item was accepted by a backend
    Snatched {
        /// Wanted row
        id: WantedId,
        /// Release title
        title: String,
        /// Backend task
        handle: BackendHandle,
    },

    /// Submitting a wanted item failed
    SubmissionFailed {
        /// Wanted row
        id: WantedId,
        /// Release title
        title: String,
        /// Failure reason
        reason: String,
    },

    /// A download was confirmed in the library
    Processed {
        /// Wanted row
        id: WantedId,
        /// Book the file belongs to
        book_id: BookId,
        /// Release title
        title: String,
    },

    /// An in-flight task was failed by the reconcile sweep
    TaskAborted {
        /// Wanted row
        id: WantedId,
        /// Release title
        title: String,
        /// Why the task was given up
        reason: String,
    },

    /// A job instance was scheduled
    JobScheduled {
        /// Stable job name
        name: String,
    },

    /// A job instance was unscheduled
    JobUnscheduled {
        /// Stable job name
        name: String,
    },

    /// A new configuration snapshot is active
    ConfigReloaded,

    /// Coordinator shut down
    Shutdown,
}
