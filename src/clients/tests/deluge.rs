use super::*;
use crate::clients::{DelugeClient, DownloadClient};
use crate::config::DelugeConfig;
use crate::error::ClientError;
use crate::types::DownloadProgress;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::Mock;

fn client(server: &MockServer) -> DelugeClient {
    let mut endpoint = endpoint(server);
    endpoint.password = Some("deluge".into());
    DelugeClient::new(DelugeConfig {
        endpoint,
        label: None,
        download_dir: None,
        seed_ratio: None,
    })
    .unwrap()
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "result": result, "error": null, "id": 1 }))
}

fn rpc_method(name: &'static str) -> impl wiremock::Match {
    body_partial_json(json!({ "method": name }))
}

/// auth.login handing out `sid`, and a web UI already connected to its daemon
async fn mount_login(server: &MockServer, sid: &str) {
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(rpc_method("auth.login"))
        .respond_with(
            rpc_result(json!(true))
                .insert_header("Set-Cookie", format!("_session_id={}; Path=/json", sid).as_str()),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(rpc_method("web.connected"))
        .respond_with(rpc_result(json!(true)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_then_add_magnet() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(rpc_method("core.add_torrent_magnet"))
        .and(header("Cookie", "_session_id=sid-1"))
        .respond_with(rpc_result(json!(HASH)))
        .expect(1)
        .mount(&server)
        .await;

    let submission = client(&server)
        .submit(&magnet_request("The Book"))
        .await
        .unwrap();
    assert_eq!(submission.external_id.as_deref(), Some(HASH));
}

#[tokio::test]
async fn test_disconnected_web_ui_connects_to_first_host() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(rpc_method("auth.login"))
        .respond_with(rpc_result(json!(true)).insert_header("Set-Cookie", "_session_id=sid-1"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_method("web.connected"))
        .respond_with(rpc_result(json!(false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_method("web.get_hosts"))
        .respond_with(rpc_result(json!([["host-a", "127.0.0.1", 58846, "Online"]])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "web.connect", "params": ["host-a"] })))
        .respond_with(rpc_result(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).test_connection().await;
    assert!(result.success, "{}", result);
}

#[tokio::test]
async fn test_refused_password_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(rpc_method("auth.login"))
        .respond_with(rpc_result(json!(false)))
        .mount(&server)
        .await;

    let result = client(&server).submit(&magnet_request("Book")).await;
    assert!(matches!(result, Err(ClientError::AuthFailed { .. })));
}

#[tokio::test]
async fn test_expired_session_logs_in_again() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(rpc_method("auth.login"))
        .respond_with(rpc_result(json!(true)).insert_header("Set-Cookie", "_session_id=sid-1"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_method("web.connected"))
        .respond_with(rpc_result(json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_method("web.get_torrent_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error": { "code": 1, "message": "Not authenticated" },
            "id": 1
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_method("web.get_torrent_status"))
        .respond_with(rpc_result(json!({
            "progress": 64.2,
            "message": "OK",
            "state": "Downloading"
        })))
        .mount(&server)
        .await;

    let progress = client(&server).status(HASH).await.unwrap();
    assert_eq!(progress, DownloadProgress::downloading(64));
}

#[tokio::test]
async fn test_null_add_result_is_rejected() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("POST"))
        .and(rpc_method("core.add_torrent_url"))
        .respond_with(rpc_result(json!(null)))
        .mount(&server)
        .await;

    let result = client(&server)
        .submit(&url_request(
            "Book",
            "https://tracker/1.torrent",
            MediaKind::Torrent,
        ))
        .await;
    assert!(matches!(result, Err(ClientError::Rejected { .. })));
}

#[tokio::test]
async fn test_label_is_created_lowercase_when_missing() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("POST"))
        .and(rpc_method("label.get_labels"))
        .respond_with(rpc_result(json!(["tv"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "label.add", "params": ["books"] })))
        .respond_with(rpc_result(json!(null)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "label.set_torrent", "params": [HASH, "books"] })))
        .respond_with(rpc_result(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).set_label(HASH, "Books").await);
}

#[tokio::test]
async fn test_task_name_comes_from_torrent_status() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_partial_json(json!({
            "method": "web.get_torrent_status",
            "params": [HASH, ["name"]]
        })))
        .respond_with(rpc_result(json!({ "name": "Author - Book [retail]" })))
        .mount(&server)
        .await;

    assert_eq!(
        client(&server).task_name(HASH).await.as_deref(),
        Some("Author - Book [retail]")
    );
}
