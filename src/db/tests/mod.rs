use crate::db::Database;
use crate::types::{BookId, Library, MediaKind, NewWantedItem};
use tempfile::NamedTempFile;

mod books;

/// Fresh database on a temp file; keep the file alive for the test's duration
async fn open_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn candidate(book_id: &str, url: &str) -> NewWantedItem {
    NewWantedItem {
        book_id: BookId::from(book_id),
        source_url: url.to_string(),
        title: format!("Release for {}", book_id),
        size_bytes: Some(1024 * 1024),
        provider: "indexer".to_string(),
        aux_info: None,
        library: Library::Ebook,
        media_kind: MediaKind::Torrent,
    }
}
