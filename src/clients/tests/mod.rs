use crate::clients::{DownloadSource, SubmitRequest};
use crate::config::Endpoint;
use crate::types::MediaKind;
use wiremock::{MockServer, ResponseTemplate};

mod deluge;
mod nzbget;
mod registry;

const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

fn endpoint(server: &MockServer) -> Endpoint {
    Endpoint::new(server.uri())
}

fn magnet_request(title: &str) -> SubmitRequest {
    SubmitRequest {
        title: title.to_string(),
        source: DownloadSource::Magnet(format!("magnet:?xt=urn:btih:{}&dn=book", HASH)),
        media_kind: MediaKind::Torrent,
    }
}

fn url_request(title: &str, url: &str, media_kind: MediaKind) -> SubmitRequest {
    SubmitRequest {
        title: title.to_string(),
        source: DownloadSource::Url(url.to_string()),
        media_kind,
    }
}

/// Minimal single-file .torrent
fn torrent_file() -> Vec<u8> {
    b"d8:announce14:http://tracker4:infod6:lengthi1024e4:name9:book.epub12:piece lengthi16384eee"
        .to_vec()
}

/// A .torrent already fetched from `origin`
fn content_request(title: &str, origin: &str) -> SubmitRequest {
    SubmitRequest {
        title: title.to_string(),
        source: DownloadSource::Content {
            file_name: format!("{}.torrent", title),
            bytes: torrent_file(),
            origin: Some(origin.to_string()),
        },
        media_kind: MediaKind::Torrent,
    }
}

/// XML-RPC methodResponse around a single `<value>` body
fn xml_response(inner: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        "<?xml version=\"1.0\"?><methodResponse><params><param><value>{}</value></param></params></methodResponse>",
        inner
    ))
}

fn method_name(name: &'static str) -> impl wiremock::Match {
    wiremock::matchers::body_string_contains(format!("<methodName>{}</methodName>", name))
}
