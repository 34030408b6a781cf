//! HTTP exchange types carried through the tunnel client.
//!
//! Requests arrive from the tunnel as [`HttpRequestData`] and leave as
//! [`HttpResponseData`]. Responses can be rendered to, and parsed from, raw
//! HTTP/1.1 bytes so they can be handed to the request log unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a request passing through the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Options => write!(f, "OPTIONS"),
            HttpMethod::Connect => write!(f, "CONNECT"),
            HttpMethod::Trace => write!(f, "TRACE"),
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "CONNECT" => Ok(HttpMethod::Connect),
            "TRACE" => Ok(HttpMethod::Trace),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

/// HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1 (default)
    #[default]
    Http11,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2"),
            HttpVersion::H3 => write!(f, "HTTP/3"),
        }
    }
}

impl HttpVersion {
    fn from_status_line(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            "HTTP/2" | "HTTP/2.0" => Some(HttpVersion::H2),
            "HTTP/3" | "HTTP/3.0" => Some(HttpVersion::H3),
            _ => None,
        }
    }
}

/// An HTTP request as received from the tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestData {
    pub method: HttpMethod,
    /// Path plus optional `?query`.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub version: HttpVersion,
}

impl HttpRequestData {
    /// Create a request without headers or body.
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
            version: HttpVersion::Http11,
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The path component of the URI (always starts with `/`).
    pub fn path(&self) -> &str {
        let path = self.uri.split(['?', '#']).next().unwrap_or("");
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }

    /// The query string without the leading `?`, if non-empty.
    pub fn query(&self) -> Option<&str> {
        let (_, rest) = self.uri.split_once('?')?;
        let query = rest.split('#').next().unwrap_or("");
        if query.is_empty() {
            None
        } else {
            Some(query)
        }
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Set a header, replacing any existing values of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Decode the body as `application/x-www-form-urlencoded` fields.
    pub fn form_fields(&self) -> HashMap<String, String> {
        parse_form(&self.body)
    }

    /// Parse the `Cookie` header and return the value of `name`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie").and_then(|header| cookie_value(header, name))
    }
}

/// An HTTP response returned to the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub version: HttpVersion,
}

/// Failure to parse a raw HTTP response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RawResponseError {
    #[error("Missing header terminator")]
    Incomplete,
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),
    #[error("Invalid header line: {0}")]
    InvalidHeader(String),
}

impl HttpResponseData {
    /// Create an empty HTTP/1.1 response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            version: HttpVersion::Http11,
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Render as raw HTTP/1.x bytes.
    ///
    /// Headers whose name or value contains CR or LF are left out, so no
    /// header can smuggle additional lines into the response.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = format!(
            "{} {} {}\r\n",
            self.version,
            self.status,
            reason_phrase(self.status)
        );
        let headers = self
            .headers
            .iter()
            .filter(|(name, value)| is_single_line(name) && is_single_line(value));
        for (name, value) in headers {
            raw.push_str(name);
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");

        let mut bytes = raw.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Parse raw HTTP response bytes produced by [`HttpResponseData::to_raw`]
    /// or any HTTP/1.x server.
    pub fn from_raw(raw: &[u8]) -> Result<Self, RawResponseError> {
        let (head_end, body_start) = find_head_end(raw).ok_or(RawResponseError::Incomplete)?;
        let head = String::from_utf8_lossy(&raw[..head_end]);
        let mut lines = head.lines();

        let status_line = lines.next().unwrap_or("");
        let mut parts = status_line.splitn(3, ' ');
        let version = parts
            .next()
            .and_then(HttpVersion::from_status_line)
            .ok_or_else(|| RawResponseError::InvalidStatusLine(status_line.to_string()))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RawResponseError::InvalidStatusLine(status_line.to_string()))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RawResponseError::InvalidHeader(line.to_string()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            status,
            headers,
            body: raw[body_start..].to_vec(),
            version,
        })
    }
}

fn find_head_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    raw.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

fn is_single_line(text: &str) -> bool {
    !text.contains(['\r', '\n'])
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Canonical reason phrase for the status codes the client produces.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Decode an `application/x-www-form-urlencoded` body. Later fields win.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Look up a cookie in a `Cookie` header value.
///
/// Pairs without `=` are ignored; names and values are trimmed.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
        .last()
}

/// Base64 encoding of byte vectors in serde.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let req = HttpRequestData::new(HttpMethod::Get, "/protected?tab=2&x=1");
        assert_eq!(req.path(), "/protected");
        assert_eq!(req.query(), Some("tab=2&x=1"));

        let bare = HttpRequestData::new(HttpMethod::Get, "/plain?");
        assert_eq!(bare.path(), "/plain");
        assert_eq!(bare.query(), None);

        let empty = HttpRequestData::new(HttpMethod::Get, "");
        assert_eq!(empty.path(), "/");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = HttpRequestData::new(HttpMethod::Get, "/")
            .with_header("X-Expose-Request-Id", "abc");
        assert_eq!(req.header("x-expose-request-id"), Some("abc"));

        req.set_header("x-expose-request-id", "def");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("X-EXPOSE-REQUEST-ID"), Some("def"));
    }

    #[test]
    fn test_form_fields() {
        let req = HttpRequestData::new(HttpMethod::Post, "/login")
            .with_body("email=user%40example.com&redirect_url=%2Fdash");
        let form = req.form_fields();
        assert_eq!(form.get("email").map(String::as_str), Some("user@example.com"));
        assert_eq!(form.get("redirect_url").map(String::as_str), Some("/dash"));
    }

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; expose_magic_auth=abc==; broken; other=1";
        assert_eq!(cookie_value(header, "expose_magic_auth"), Some("abc==".to_string()));
        assert_eq!(cookie_value(header, "theme"), Some("dark".to_string()));
        assert_eq!(cookie_value(header, "broken"), None);
        assert_eq!(cookie_value("", "theme"), None);
    }

    #[test]
    fn test_raw_response_roundtrip() {
        let response = HttpResponseData::new(302)
            .with_header("Location", "/dash")
            .with_header("Content-Length", "0");
        let raw = response.to_raw();
        assert!(raw.starts_with(b"HTTP/1.1 302 Found\r\n"));

        let parsed = HttpResponseData::from_raw(&raw).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_raw_response_rejects_garbage() {
        assert_eq!(
            HttpResponseData::from_raw(b"not http"),
            Err(RawResponseError::Incomplete)
        );
        assert!(matches!(
            HttpResponseData::from_raw(b"SPDY 200 OK\r\n\r\n"),
            Err(RawResponseError::InvalidStatusLine(_))
        ));
    }

    #[test]
    fn test_raw_response_drops_multiline_headers() {
        let response = HttpResponseData::new(302)
            .with_header("Location", "/dash\r\nSet-Cookie: evil=1")
            .with_header("X-Bad\nName", "v")
            .with_header("Content-Length", "0");

        let parsed = HttpResponseData::from_raw(&response.to_raw()).unwrap();
        assert_eq!(parsed.headers, vec![("Content-Length".to_string(), "0".to_string())]);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("post".parse::<HttpMethod>(), Ok(HttpMethod::Post));
        assert!("BREW".parse::<HttpMethod>().is_err());
    }
}
