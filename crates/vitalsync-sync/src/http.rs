// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 message layer operating purely on byte buffers.
//
// The sync protocol needs exactly one request and one response per TLS
// connection, so a full HTTP server is unnecessary overhead on mobile
// devices.  This module parses requests and responses from complete byte
// buffers and serializes them back; it never touches a socket.  Framing
// (reading until a complete message has arrived) is the caller's job,
// helped by [`message_length`].

use std::collections::HashMap;

use serde::Serialize;
use serde_json::json;

/// Terminator between the head (request/status line + headers) and body.
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string, e.g. "/api/v1/records".
    pub path: String,
    /// Decoded query parameters; a repeated key keeps the last value.
    pub query: HashMap<String, String>,
    /// Headers in arrival order, names preserved as sent.
    pub headers: Vec<(String, String)>,
    /// `None` when the request carried no body bytes at all; `Some` with
    /// exactly the bytes that followed the head otherwise.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Parse a complete request from raw bytes.
    ///
    /// Returns `None` on any structural violation: no head terminator, a
    /// request line with fewer than two tokens, or a header line without a
    /// colon.  Unknown methods and paths parse fine; routing rejects them.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (head, body) = split_head(raw)?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_owned();
        let target = parts.next()?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), parse_query(query)),
            None => (target.to_owned(), HashMap::new()),
        };

        let headers = parse_headers(lines)?;

        Some(Self {
            method,
            path,
            query,
            headers,
            body,
        })
    }

    /// Serialize the request with a computed `Content-Length` header.
    pub fn serialize(&self) -> Vec<u8> {
        let target = if self.query.is_empty() {
            self.path.clone()
        } else {
            let mut pairs: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            pairs.sort();
            format!("{}?{}", self.path, pairs.join("&"))
        };

        let body = self.body.as_deref().unwrap_or(&[]);
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, target).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Look up a header value, case-insensitively on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Extract the token from an `Authorization: Bearer <token>` header.
    ///
    /// Any other authorization scheme yields `None`.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("Authorization")?;
        let token = value.strip_prefix("Bearer ")?.trim();
        if token.is_empty() { None } else { Some(token) }
    }
}

/// An HTTP/1.1 response, parseable and serializable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Bodyless 200.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 200 response carrying a JSON body.
    pub fn json_ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self::ok().with_json_body(body),
            Err(e) => Self::json_error(500, &format!("response encoding failed: {e}")),
        }
    }

    /// Error response with a `{"success": false, "error": ...}` body.
    pub fn json_error(status: u16, message: &str) -> Self {
        let reason = reason_phrase(status);
        let body = serde_json::to_vec(&json!({
            "success": false,
            "error": message,
        }))
        .unwrap_or_default();
        Self::new(status, reason).with_json_body(body)
    }

    fn with_json_body(mut self, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".into(), "application/json".into()));
        self.body = Some(body);
        self
    }

    /// Serialize with computed `Content-Length` and `Connection: close`.
    ///
    /// The server answers exactly one request per connection, so every
    /// response announces the close.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.body.as_deref().unwrap_or(&[]);
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(
            format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()).as_bytes(),
        );
        out.extend_from_slice(body);
        out
    }

    /// Parse a complete response from raw bytes.  `None` on structural
    /// violations, mirroring [`HttpRequest::parse`].
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (head, body) = split_head(raw)?;
        let mut lines = head.split("\r\n");

        // Status line: HTTP/1.1 <code> <reason...>
        let status_line = lines.next()?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next()?;
        if !version.starts_with("HTTP/1.") {
            return None;
        }
        let status: u16 = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or("").to_owned();

        let headers = parse_headers(lines)?;

        Some(Self {
            status,
            reason,
            headers,
            body,
        })
    }

    /// Look up a header value, case-insensitively on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decode the body as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(self.body.as_deref()?).ok()
    }
}

/// Total byte length of the complete message at the front of `buf`, once
/// enough of it has arrived: head, terminator, plus `Content-Length` body
/// bytes (zero when the header is absent).  `None` until then.
pub fn message_length(buf: &[u8]) -> Option<usize> {
    let head_end = find_subsequence(buf, HEAD_TERMINATOR)?;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?;

    let content_length = head
        .split("\r\n")
        .skip(1)
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|val| val.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let total = head_end + HEAD_TERMINATOR.len() + content_length;
    (buf.len() >= total).then_some(total)
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split a raw message into its UTF-8 head and optional body bytes.
fn split_head(raw: &[u8]) -> Option<(&str, Option<Vec<u8>>)> {
    let head_end = find_subsequence(raw, HEAD_TERMINATOR)?;
    let head = std::str::from_utf8(&raw[..head_end]).ok()?;
    let body_bytes = &raw[head_end + HEAD_TERMINATOR.len()..];
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes.to_vec())
    };
    Some((head, body))
}

/// Parse "Name: value" lines, preserving name case and arrival order.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Option<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }
    Some(headers)
}

/// Parse "a=1&b=2" into a map; a repeated key keeps the last value.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => map.insert(key.to_owned(), value.to_owned()),
            None => map.insert(pair.to_owned(), String::new()),
        };
    }
    map
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
