//! Custom test assertions for integration tests

use librarian_dl::{BookId, BookStatus, Coordinator, Event, Library, WantedId, WantedStatus};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for the first event matching `predicate`, or `None` on timeout
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert a wanted row's status and return its recorded result text
pub async fn assert_wanted_status(
    coordinator: &Coordinator,
    id: WantedId,
    expected: WantedStatus,
) -> Option<String> {
    let item = coordinator
        .db
        .get_wanted(id)
        .await
        .unwrap_or_else(|e| panic!("failed to read wanted row {}: {}", id, e))
        .unwrap_or_else(|| panic!("wanted row {} is missing", id));
    assert_eq!(
        item.status, expected,
        "wanted row {} is {:?}, expected {:?}",
        id, item.status, expected
    );
    item.result
}

/// Assert a book's ebook status
pub async fn assert_book_status(coordinator: &Coordinator, book_id: &str, expected: BookStatus) {
    let book = coordinator
        .db
        .get_book(&BookId::from(book_id))
        .await
        .unwrap_or_else(|e| panic!("failed to read book {}: {}", book_id, e))
        .unwrap_or_else(|| panic!("book {} is missing", book_id));
    assert_eq!(
        book.status_for(Library::Ebook),
        expected,
        "book {} has unexpected status",
        book_id
    );
}
