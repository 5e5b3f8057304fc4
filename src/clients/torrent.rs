//! Torrent identity helpers.
//!
//! Backends identify torrents by their info hash. When the hash is known before
//! submission (magnet link, fetched .torrent) there is no need to scan the backend's
//! task list for the new entry.

use regex::Regex;
use sha1::{Digest, Sha1};
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn btih_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)urn:btih:([a-z0-9]+)").expect("static regex is valid"))
}

/// Lower-case hex info hash from a magnet URI
///
/// Accepts the 40 character hex form and the 32 character base32 form.
pub fn magnet_hash(uri: &str) -> Option<String> {
    let raw = btih_pattern().captures(uri)?.get(1)?.as_str();
    match raw.len() {
        40 if raw.chars().all(|c| c.is_ascii_hexdigit()) => Some(raw.to_ascii_lowercase()),
        32 => base32_decode(raw).map(hex::encode),
        _ => None,
    }
}

/// RFC 4648 base32 without padding
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    for c in input.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

/// Torrent URL as it should be fetched
///
/// Indexers hand out HTML-escaped ampersands, and some append parameters after the
/// `.torrent` file name. The host part is never cut.
pub fn clean_torrent_url(url: &str) -> String {
    const SUFFIX: &str = ".torrent";
    let url = url.trim().replace("&amp;", "&");
    let path_start = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|host| url[host..].find('/').map(|p| host + p))
        .unwrap_or(0);
    match url[path_start..].find(SUFFIX) {
        Some(i) => url[..path_start + i + SUFFIX.len()].to_string(),
        None => url,
    }
}

/// SHA-1 of the bencoded `info` dictionary of a .torrent file, lower-case hex
pub fn info_hash(torrent: &[u8]) -> Option<String> {
    if torrent.first() != Some(&b'd') {
        return None;
    }
    let mut pos = 1;
    while torrent.get(pos)? != &b'e' {
        let (key, value_start) = read_bytes(torrent, pos)?;
        let value_end = skip_value(torrent, value_start, 0)?;
        if key == b"info" {
            let digest = Sha1::digest(&torrent[value_start..value_end]);
            return Some(hex::encode(digest));
        }
        pos = value_end;
    }
    None
}

/// Parse a bencoded byte string at `pos`; returns the bytes and the position after them
fn read_bytes(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let colon = pos + data.get(pos..)?.iter().position(|&b| b == b':')?;
    let len: usize = std::str::from_utf8(&data[pos..colon]).ok()?.parse().ok()?;
    let start = colon + 1;
    let end = start.checked_add(len)?;
    Some((data.get(start..end)?, end))
}

/// Deepest list/dictionary nesting accepted in a .torrent
const MAX_DEPTH: usize = 64;

/// Position just after the bencoded value starting at `pos`
fn skip_value(data: &[u8], pos: usize, depth: usize) -> Option<usize> {
    match data.get(pos)? {
        b'i' => {
            let end = pos + data.get(pos..)?.iter().position(|&b| b == b'e')?;
            Some(end + 1)
        }
        b'l' | b'd' => {
            if depth >= MAX_DEPTH {
                return None;
            }
            let mut cursor = pos + 1;
            while data.get(cursor)? != &b'e' {
                cursor = skip_value(data, cursor, depth + 1)?;
            }
            Some(cursor + 1)
        }
        b'0'..=b'9' => read_bytes(data, pos).map(|(_, end)| end),
        _ => None,
    }
}
