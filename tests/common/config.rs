//! Test configuration helpers for booting a coordinator against a temp database

use librarian_dl::config::{BlackholeConfig, Endpoint};
use librarian_dl::db::BookRecord;
use librarian_dl::{
    BookId, BookStatus, Config, Coordinator, Library, MediaKind, NewWantedItem, SabnzbdConfig,
    TorrentBackend, UsenetBackend, WantedId, WantedStatus,
};
use std::time::Duration;
use tempfile::TempDir;

/// Config with its database inside `dir` and a short shutdown timeout
pub fn temp_config(dir: &TempDir) -> Config {
    Config {
        persistence: librarian_dl::config::PersistenceConfig {
            database_path: dir.path().join("librarian.db"),
        },
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// SABnzbd at `uri` (a mock server) with the key "secret"
pub fn sabnzbd_backend(uri: &str) -> UsenetBackend {
    UsenetBackend::Sabnzbd(SabnzbdConfig {
        endpoint: Endpoint::new(uri),
        api_key: "secret".to_string(),
        category: Some("books".to_string()),
        priority: None,
    })
}

/// Torrent blackhole writing into `dir`
pub fn torrent_blackhole(dir: &std::path::Path) -> TorrentBackend {
    TorrentBackend::Blackhole(BlackholeConfig {
        directory: dir.to_path_buf(),
    })
}

/// Boot a coordinator for `config`; panics if boot fails
pub async fn boot(config: Config) -> Coordinator {
    Coordinator::new(config)
        .await
        .unwrap_or_else(|e| panic!("coordinator failed to boot: {}", e))
}

/// Add a Wanted ebook to the record store
pub async fn add_book(coordinator: &Coordinator, book_id: &str) {
    coordinator
        .db
        .upsert_book(&BookRecord::new(
            book_id,
            format!("Title of {}", book_id),
            "Some Author",
            BookStatus::Wanted,
        ))
        .await
        .unwrap_or_else(|e| panic!("failed to add book {}: {}", book_id, e));
}

/// Insert a candidate release for `book_id`; panics unless it is new
pub async fn add_candidate(
    coordinator: &Coordinator,
    book_id: &str,
    url: &str,
    media_kind: MediaKind,
) -> WantedId {
    let item = NewWantedItem {
        book_id: BookId::from(book_id),
        source_url: url.to_string(),
        title: format!("Release of {}", book_id),
        size_bytes: Some(3 * 1024 * 1024),
        provider: "indexer".to_string(),
        aux_info: None,
        library: Library::Ebook,
        media_kind,
    };
    let (id, status) = coordinator
        .db
        .insert_candidate(&item)
        .await
        .unwrap_or_else(|e| panic!("failed to insert candidate: {}", e));
    assert_eq!(status, WantedStatus::Wanted, "candidate {} already known", url);
    id
}
