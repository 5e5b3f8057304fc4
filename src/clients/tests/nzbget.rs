use super::*;
use crate::clients::{DownloadClient, NzbgetClient};
use crate::config::NzbgetConfig;
use crate::error::ClientError;
use crate::types::{DownloadProgress, DownloadState};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::Mock;

fn client(server: &MockServer) -> NzbgetClient {
    let mut endpoint = endpoint(server);
    endpoint.username = Some("nzbget".into());
    endpoint.password = Some("tegbzn6789".into());
    NzbgetClient::new(NzbgetConfig {
        endpoint,
        category: Some("Books".into()),
        priority: 0,
    })
    .unwrap()
}

fn group(id: i64, name: &str, status: &str, size_lo: i64, remaining_lo: i64) -> String {
    format!(
        "<value><struct>\
         <member><name>NZBID</name><value><i4>{id}</i4></value></member>\
         <member><name>NZBName</name><value><string>{name}</string></value></member>\
         <member><name>Status</name><value><string>{status}</string></value></member>\
         <member><name>FileSizeHi</name><value><i4>0</i4></value></member>\
         <member><name>FileSizeLo</name><value><i4>{size_lo}</i4></value></member>\
         <member><name>RemainingSizeHi</name><value><i4>0</i4></value></member>\
         <member><name>RemainingSizeLo</name><value><i4>{remaining_lo}</i4></value></member>\
         </struct></value>"
    )
}

fn array(items: &[String]) -> String {
    format!("<array><data>{}</data></array>", items.concat())
}

#[tokio::test]
async fn test_append_returns_numeric_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xmlrpc"))
        .and(method_name("append"))
        .and(body_string_contains("The Book.nzb"))
        .and(body_string_contains("https://indexer/get/1"))
        .respond_with(xml_response("<i4>42</i4>"))
        .expect(1)
        .mount(&server)
        .await;

    let submission = client(&server)
        .submit(&url_request(
            "The Book",
            "https://indexer/get/1",
            MediaKind::Usenet,
        ))
        .await
        .unwrap();
    assert_eq!(submission.external_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_append_true_looks_up_id_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(method_name("append"))
        .respond_with(xml_response("<boolean>1</boolean>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(method_name("listgroups"))
        .respond_with(xml_response(&array(&[
            group(7, "Another Book", "DOWNLOADING", 1000, 500),
            group(8, "The Book", "QUEUED", 1000, 1000),
        ])))
        .mount(&server)
        .await;

    let submission = client(&server)
        .submit(&url_request("The Book", "https://indexer/get/1", MediaKind::Usenet))
        .await
        .unwrap();
    assert_eq!(submission.external_id.as_deref(), Some("8"));
}

#[tokio::test]
async fn test_append_zero_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(method_name("append"))
        .respond_with(xml_response("<i4>0</i4>"))
        .mount(&server)
        .await;

    let result = client(&server)
        .submit(&url_request("Book", "https://indexer/get/1", MediaKind::Usenet))
        .await;
    assert!(matches!(result, Err(ClientError::Rejected { .. })));
}

#[tokio::test]
async fn test_unauthorized_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client(&server)
        .submit(&url_request("Book", "https://indexer/get/1", MediaKind::Usenet))
        .await;
    assert!(matches!(result, Err(ClientError::AuthFailed { .. })));
}

#[tokio::test]
async fn test_status_from_queue_size_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(method_name("listgroups"))
        .respond_with(xml_response(&array(&[group(
            9,
            "The Book",
            "DOWNLOADING",
            1000,
            250,
        )])))
        .mount(&server)
        .await;

    let progress = client(&server).status("9").await.unwrap();
    assert_eq!(progress, DownloadProgress::downloading(75));
}

#[tokio::test]
async fn test_status_falls_back_to_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(method_name("listgroups"))
        .respond_with(xml_response(&array(&[])))
        .mount(&server)
        .await;
    let history = |id: i64, status: &str| {
        format!(
            "<value><struct>\
             <member><name>NZBID</name><value><i4>{id}</i4></value></member>\
             <member><name>Status</name><value><string>{status}</string></value></member>\
             </struct></value>"
        )
    };
    Mock::given(method("POST"))
        .and(method_name("history"))
        .respond_with(xml_response(&array(&[
            history(11, "SUCCESS/ALL"),
            history(12, "FAILURE/PAR"),
        ])))
        .mount(&server)
        .await;

    let nzbget = client(&server);
    assert_eq!(
        nzbget.status("11").await.unwrap(),
        DownloadProgress::completed()
    );
    let failed = nzbget.status("12").await.unwrap();
    assert_eq!(failed.state, DownloadState::Failed);
    assert!(failed.message.unwrap().contains("FAILURE/PAR"));
    assert_eq!(
        nzbget.status("13").await.unwrap(),
        DownloadProgress::pending()
    );
}

#[tokio::test]
async fn test_remove_tries_queue_then_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(method_name("editqueue"))
        .and(body_string_contains("GroupFinalDelete"))
        .respond_with(xml_response("<boolean>0</boolean>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(method_name("editqueue"))
        .and(body_string_contains("HistoryFinalDelete"))
        .respond_with(xml_response("<boolean>1</boolean>"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).remove("14", true).await);
}
