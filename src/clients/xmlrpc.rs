//! Minimal XML-RPC codec (NZBGet, rTorrent).

use super::http;
use crate::error::{ClientError, ClientResult};
use crate::types::BackendKind;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

/// An XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Member of a struct value
    pub(crate) fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Why a response could not be turned into a value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum XmlRpcError {
    /// The server answered with a `<fault>`
    Fault { code: i64, message: String },
    /// The body is not a well-formed methodResponse
    Malformed(String),
}

impl std::fmt::Display for XmlRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmlRpcError::Fault { code, message } => write!(f, "fault {}: {}", code, message),
            XmlRpcError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

/// Serialize a method call
pub(crate) fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            if i32::try_from(*i).is_ok() {
                out.push_str(&format!("<i4>{}</i4>", i));
            } else {
                out.push_str(&format!("<i8>{}</i8>", i));
            }
        }
        Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&STANDARD.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn parse_tree(body: &str) -> Result<Node, XmlRpcError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut stack: Vec<Node> = vec![Node::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Ok(Event::Empty(e)) => {
                let node = Node {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| XmlRpcError::Malformed(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| XmlRpcError::Malformed("unbalanced tags".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(XmlRpcError::Malformed("unbalanced tags".into())),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(XmlRpcError::Malformed(e.to_string())),
        }
    }

    if stack.len() != 1 {
        return Err(XmlRpcError::Malformed("unexpected end of document".into()));
    }
    stack
        .pop()
        .ok_or_else(|| XmlRpcError::Malformed("empty document".into()))
}

fn decode_value(node: &Node) -> Result<Value, XmlRpcError> {
    let Some(typed) = node.children.first() else {
        // Untyped <value> is a string
        return Ok(Value::String(node.text.clone()));
    };
    let text = typed.text.trim();
    let bad = |kind: &str| XmlRpcError::Malformed(format!("invalid {} '{}'", kind, text));

    Ok(match typed.name.as_str() {
        "i4" | "int" | "i8" => Value::Int(text.parse().map_err(|_| bad("integer"))?),
        "boolean" => Value::Bool(text == "1" || text.eq_ignore_ascii_case("true")),
        "double" => Value::Double(text.parse().map_err(|_| bad("double"))?),
        "string" => Value::String(typed.text.clone()),
        "base64" => Value::Base64(STANDARD.decode(text).map_err(|_| bad("base64"))?),
        "nil" => Value::Nil,
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| XmlRpcError::Malformed("array without data".into()))?;
            Value::Array(
                data.children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(decode_value)
                    .collect::<Result<_, _>>()?,
            )
        }
        "struct" => {
            let mut members = Vec::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member
                    .child("name")
                    .map(|n| n.text.clone())
                    .ok_or_else(|| XmlRpcError::Malformed("member without name".into()))?;
                let value = member
                    .child("value")
                    .ok_or_else(|| XmlRpcError::Malformed("member without value".into()))?;
                members.push((name, decode_value(value)?));
            }
            Value::Struct(members)
        }
        other => return Err(XmlRpcError::Malformed(format!("unknown type <{}>", other))),
    })
}

/// Parse a methodResponse into its single return value
pub(crate) fn decode_response(body: &str) -> Result<Value, XmlRpcError> {
    let root = parse_tree(body)?;
    let response = root
        .child("methodResponse")
        .ok_or_else(|| XmlRpcError::Malformed("missing methodResponse".into()))?;

    if let Some(fault) = response.child("fault") {
        let value = fault
            .child("value")
            .map(decode_value)
            .transpose()?
            .unwrap_or(Value::Nil);
        return Err(XmlRpcError::Fault {
            code: value.member("faultCode").and_then(Value::as_i64).unwrap_or(0),
            message: value
                .member("faultString")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        });
    }

    let value = response
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| XmlRpcError::Malformed("missing params".into()))?;
    decode_value(value)
}

/// POST a method call and decode the reply
///
/// Faults become `Rejected`, unparseable bodies `Protocol`.
pub(crate) async fn call(
    backend: BackendKind,
    request: reqwest::RequestBuilder,
    method: &str,
    params: &[Value],
) -> ClientResult<Value> {
    let request = request
        .header(reqwest::header::CONTENT_TYPE, "text/xml")
        .body(encode_call(method, params));
    let response = http::send(backend, request).await?;
    let body = http::text(backend, response).await?;
    decode_response(&body).map_err(|e| match e {
        XmlRpcError::Fault { .. } => ClientError::Rejected {
            backend,
            reason: format!("{} {}", method, e),
        },
        XmlRpcError::Malformed(msg) => {
            ClientError::protocol(backend, format!("{}: {}", method, msg), body)
        }
    })
}
