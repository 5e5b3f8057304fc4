use super::open_db;
use crate::db::{BookRecord, UpsertOutcome};
use crate::types::{BookId, BookStatus, Library};

#[tokio::test]
async fn test_upsert_and_get_book() {
    let (db, _file) = open_db().await;
    let book = BookRecord::new("B1", "Dune", "Frank Herbert", BookStatus::Wanted);

    assert_eq!(db.upsert_book(&book).await.unwrap(), UpsertOutcome::Inserted);
    assert!(db.book_exists(&BookId::from("B1")).await.unwrap());
    assert!(!db.book_exists(&BookId::from("B2")).await.unwrap());

    let mut renamed = book.clone();
    renamed.title = "Dune (Deluxe)".to_string();
    assert_eq!(db.upsert_book(&renamed).await.unwrap(), UpsertOutcome::Updated);

    let stored = db.get_book(&BookId::from("B1")).await.unwrap().unwrap();
    assert_eq!(stored, renamed);

    db.close().await;
}

#[tokio::test]
async fn test_set_book_status_targets_edition() {
    let (db, _file) = open_db().await;
    let id = BookId::from("B1");
    db.upsert_book(&BookRecord::new("B1", "Dune", "Frank Herbert", BookStatus::Wanted))
        .await
        .unwrap();

    assert!(
        db.set_book_status(&id, Library::Audiobook, BookStatus::Snatched, None)
            .await
            .unwrap()
    );

    let stored = db.get_book(&id).await.unwrap().unwrap();
    assert_eq!(stored.status_for(Library::Ebook), BookStatus::Wanted);
    assert_eq!(stored.status_for(Library::Audiobook), BookStatus::Snatched);

    db.close().await;
}

#[tokio::test]
async fn test_set_book_status_guard() {
    let (db, _file) = open_db().await;
    let id = BookId::from("B1");
    db.upsert_book(&BookRecord::new("B1", "Dune", "Frank Herbert", BookStatus::Open))
        .await
        .unwrap();

    // Only revert to Wanted while still Snatched
    let changed = db
        .set_book_status(&id, Library::Ebook, BookStatus::Wanted, Some(BookStatus::Snatched))
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(
        db.get_book(&id).await.unwrap().unwrap().status,
        BookStatus::Open
    );

    // Unknown book changes nothing
    assert!(
        !db.set_book_status(&BookId::from("nope"), Library::Ebook, BookStatus::Open, None)
            .await
            .unwrap()
    );

    db.close().await;
}
