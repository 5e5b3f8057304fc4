use super::*;

#[tokio::test]
async fn test_shutdown_runs_every_step_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let sink = Arc::new(RecordingSink::default());
    let h = boot_with(config, dir, Coordinator::builder().config_sink(sink.clone())).await;
    let coordinator = &h.coordinator;
    coordinator.register_job(JobId::VersionCheck, Arc::new(Noop)).await;
    coordinator.start().await.unwrap();
    add_book(coordinator, "b1").await;
    let (id, _) = coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
        .await
        .unwrap();
    let mut events = coordinator.subscribe();

    coordinator.shutdown().await.unwrap();

    assert!(coordinator.list_jobs().await.is_empty());
    assert_eq!(h.usenet.count("close"), 1);
    assert_eq!(h.torrent.count("close"), 1);
    assert_eq!(*sink.persisted.lock().unwrap(), vec![Duration::from_secs(2)]);
    assert!(!coordinator.db.was_unclean_shutdown().await.unwrap());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&Event::JobUnscheduled {
        name: "version_check".to_string()
    }));
    assert_eq!(seen.last(), Some(&Event::Shutdown));

    assert!(matches!(
        coordinator.dispatch(id).await,
        Err(Error::ShuttingDown)
    ));
    assert_eq!(h.usenet.count("submit"), 0);
    assert_eq!(
        coordinator.db.get_wanted(id).await.unwrap().unwrap().status,
        WantedStatus::Wanted
    );
}

#[tokio::test]
async fn test_shutdown_still_marks_clean_when_persisting_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..RecordingSink::default()
    });
    let h = boot_with(config, dir, Coordinator::builder().config_sink(sink)).await;
    let mut events = h.coordinator.subscribe();

    let err = h.coordinator.shutdown().await.unwrap_err();
    assert!(err.to_string().contains("config file is read-only"));
    assert!(!h.coordinator.db.was_unclean_shutdown().await.unwrap());
    assert_eq!(events.try_recv().unwrap(), Event::Shutdown);
}

#[tokio::test]
async fn test_shutdown_waits_for_a_dispatch_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let slow = FakeClient::new(BackendKind::Sabnzbd).with_submit_delay(Duration::from_millis(500));
    let h = boot_with_clients(
        config,
        dir,
        Coordinator::builder(),
        slow,
        FakeClient::new(BackendKind::Deluge),
    )
    .await;
    add_book(&h.coordinator, "b1").await;
    let (id, _) = h
        .coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
        .await
        .unwrap();

    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.dispatch(id).await });
    while h.usenet.count("submit") == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.coordinator.shutdown().await.unwrap();

    assert_eq!(
        h.coordinator.db.get_wanted(id).await.unwrap().unwrap().status,
        WantedStatus::Snatched
    );
    assert!(running.await.unwrap().unwrap().is_snatched());
    let close_after_submit = h.usenet.calls().last().cloned();
    assert_eq!(close_after_submit.as_deref(), Some("close:"));
}

#[tokio::test]
async fn test_pending_row_left_at_shutdown_is_failed_on_next_boot() {
    let h = boot().await;
    add_book(&h.coordinator, "b1").await;
    let (stranded, _) = h
        .coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/1.nzb", MediaKind::Usenet))
        .await
        .unwrap();
    h.coordinator.shutdown().await.unwrap();
    // claimed after the clean mark, as a dispatch outliving the shutdown timeout would
    assert!(h.coordinator.db.claim_for_dispatch(stranded).await.unwrap());

    let config = (*h.coordinator.config()).clone();
    let Harness { coordinator, dir, .. } = h;
    drop(coordinator);

    let again = boot_with(config, dir, Coordinator::builder()).await;
    let row = again.coordinator.db.get_wanted(stranded).await.unwrap().unwrap();
    assert_eq!(row.status, WantedStatus::Failed);
    assert_eq!(row.result.as_deref(), Some(INTERRUPTED_REASON));

    let (next, _) = again
        .coordinator
        .db
        .insert_candidate(&candidate("b1", "https://indexer/2.nzb", MediaKind::Usenet))
        .await
        .unwrap();
    assert!(again.coordinator.dispatch(next).await.unwrap().is_snatched());
}
