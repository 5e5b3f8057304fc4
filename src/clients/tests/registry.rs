use super::*;
use crate::clients::{ActiveClient, BlackholeClient, ClientRegistry};
use crate::config::{
    BlackholeConfig, Config, DelugeConfig, QbittorrentConfig, SabnzbdConfig, TorrentBackend,
    UsenetBackend,
};
use crate::types::BackendKind;
use std::sync::Arc;

fn configured() -> Config {
    let mut deluge = Endpoint::new("localhost:8112");
    deluge.password = Some("deluge".into());
    Config {
        usenet: UsenetBackend::Sabnzbd(SabnzbdConfig {
            endpoint: Endpoint::new("localhost:8080"),
            api_key: "key".into(),
            category: None,
            priority: None,
        }),
        torrent: TorrentBackend::Deluge(DelugeConfig {
            endpoint: deluge,
            label: Some("Books".into()),
            download_dir: None,
            seed_ratio: Some(1.0),
        }),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_from_config_builds_one_client_per_media_kind() {
    let registry = ClientRegistry::from_config(&configured()).unwrap();

    let usenet = registry.client_for(MediaKind::Usenet).await.unwrap();
    assert_eq!(usenet.client.kind(), BackendKind::Sabnzbd);
    assert_eq!(usenet.settings.label, None);

    let torrent = registry.client_for(MediaKind::Torrent).await.unwrap();
    assert_eq!(torrent.client.kind(), BackendKind::Deluge);
    assert_eq!(torrent.settings.label.as_deref(), Some("Books"));
    assert_eq!(torrent.settings.seed_ratio, Some(1.0));
}

#[tokio::test]
async fn test_client_of_kind_requires_the_same_backend() {
    let registry = ClientRegistry::from_config(&configured()).unwrap();
    assert!(registry.client_of_kind(BackendKind::Sabnzbd).await.is_some());
    assert!(registry.client_of_kind(BackendKind::Nzbget).await.is_none());
    assert!(registry.client_of_kind(BackendKind::Transmission).await.is_none());
}

#[tokio::test]
async fn test_rebuild_drops_unconfigured_backends() {
    let registry = ClientRegistry::from_config(&configured()).unwrap();
    registry.rebuild(&Config::default()).await.unwrap();
    assert!(registry.client_for(MediaKind::Usenet).await.is_none());
    assert!(registry.client_for(MediaKind::Torrent).await.is_none());
}

#[tokio::test]
async fn test_rebuild_switches_backend_kind() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ClientRegistry::from_config(&configured()).unwrap();

    let mut next = configured();
    next.torrent = TorrentBackend::Blackhole(BlackholeConfig {
        directory: dir.path().to_path_buf(),
    });
    registry.rebuild(&next).await.unwrap();

    assert!(registry.client_of_kind(BackendKind::Deluge).await.is_none());
    let torrent = registry.client_for(MediaKind::Torrent).await.unwrap();
    assert_eq!(torrent.client.kind(), BackendKind::TorrentBlackhole);
}

#[tokio::test]
async fn test_rebuild_selects_qbittorrent_with_its_category() {
    let registry = ClientRegistry::from_config(&configured()).unwrap();

    let mut next = configured();
    next.torrent = TorrentBackend::Qbittorrent(QbittorrentConfig {
        endpoint: Endpoint::new("localhost:8080"),
        label: Some("books".into()),
        download_dir: Some("/downloads/books".into()),
        seed_ratio: None,
    });
    registry.rebuild(&next).await.unwrap();

    let torrent = registry.client_for(MediaKind::Torrent).await.unwrap();
    assert_eq!(torrent.client.kind(), BackendKind::Qbittorrent);
    assert_eq!(torrent.settings.label.as_deref(), Some("books"));
    assert_eq!(torrent.settings.download_dir, None);
}

#[tokio::test]
async fn test_replace_installs_explicit_clients() {
    let dir = tempfile::tempdir().unwrap();
    let blackhole = BlackholeClient::new(
        BlackholeConfig {
            directory: dir.path().to_path_buf(),
        },
        MediaKind::Usenet,
    )
    .unwrap();
    let registry = ClientRegistry::with_clients(None, None);
    assert!(registry.client_for(MediaKind::Usenet).await.is_none());

    registry
        .replace(Some(ActiveClient::new(Arc::new(blackhole))), None)
        .await;
    let usenet = registry.client_for(MediaKind::Usenet).await.unwrap();
    assert_eq!(usenet.client.kind(), BackendKind::UsenetBlackhole);
}
