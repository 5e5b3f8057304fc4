//! Shared HTTP plumbing for the adapters.

use crate::config::Endpoint;
use crate::error::{ClientError, ClientResult, Error, Result};
use crate::types::BackendKind;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};

/// HTTP client honouring the endpoint timeout
pub(crate) fn build_client(endpoint: &Endpoint) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(endpoint.timeout)
        .user_agent(concat!("librarian-dl/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::Network)
}

/// Attach basic auth when a username is configured
pub(crate) fn with_basic_auth(request: RequestBuilder, endpoint: &Endpoint) -> RequestBuilder {
    match endpoint.username.as_deref().filter(|u| !u.is_empty()) {
        Some(user) => request.basic_auth(user, endpoint.password.as_deref()),
        None => request,
    }
}

/// Send a request, classifying transport failures and auth status codes
pub(crate) async fn send(backend: BackendKind, request: RequestBuilder) -> ClientResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest(backend, e))?;

    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::AuthFailed {
            backend,
            message: format!("HTTP {}", response.status()),
        }),
        _ => Ok(response),
    }
}

/// Read a successful response body as text
pub(crate) async fn text(backend: BackendKind, response: Response) -> ClientResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest(backend, e))?;
    if !status.is_success() {
        return Err(ClientError::protocol(
            backend,
            format!("HTTP {}", status),
            body,
        ));
    }
    Ok(body)
}

/// Read a successful response body as JSON
pub(crate) async fn json(
    backend: BackendKind,
    response: Response,
) -> ClientResult<serde_json::Value> {
    let body = text(backend, response).await?;
    serde_json::from_str(&body)
        .map_err(|e| ClientError::protocol(backend, format!("invalid JSON: {}", e), body))
}

/// Fetch a remote NZB or .torrent file
pub(crate) async fn fetch_bytes(
    backend: BackendKind,
    client: &reqwest::Client,
    url: &str,
) -> ClientResult<Vec<u8>> {
    let response = send(backend, client.get(url)).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Transport {
            backend,
            message: format!("fetching {} returned HTTP {}", url, status),
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::from_reqwest(backend, e))?;
    Ok(bytes.to_vec())
}

/// Value of a named cookie in a response's Set-Cookie headers
pub(crate) fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn unauthorized_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = send(BackendKind::Transmission, client.get(server.uri())).await;
        assert!(matches!(result, Err(ClientError::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn server_error_keeps_body_as_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("kaboom"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = send(BackendKind::Sabnzbd, client.get(server.uri()))
            .await
            .unwrap();
        match text(BackendKind::Sabnzbd, response).await {
            Err(ClientError::Protocol { body, .. }) => assert_eq!(body.as_deref(), Some("kaboom")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let client = reqwest::Client::new();
        // Port 9 (discard) is essentially never open on test hosts
        let result = send(BackendKind::Deluge, client.get("http://127.0.0.1:9/")).await;
        assert!(matches!(
            result,
            Err(ClientError::Transport { .. }) | Err(ClientError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn cookie_is_read_from_set_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("Set-Cookie", "GUID=abc123; path=/")
                    .append_header("Set-Cookie", "_session_id=s3ss; Max-Age=3600"),
            )
            .mount(&server)
            .await;

        let response = reqwest::get(format!("{}/login", server.uri())).await.unwrap();
        assert_eq!(cookie(response.headers(), "GUID").as_deref(), Some("abc123"));
        assert_eq!(cookie(response.headers(), "_session_id").as_deref(), Some("s3ss"));
        assert_eq!(cookie(response.headers(), "missing"), None);
    }
}
