//! Structured HTTP messages.
//!
//! # Responsibilities
//! - Hold a start line, ordered headers (duplicates allowed) and a body
//! - Serialize back to wire bytes
//! - Convert to and from the persisted record shape
//!
//! # Design Decisions
//! - Header order is preserved exactly; no map semantics
//! - Names are compared case-insensitively, values verbatim
//! - The persisted shape keeps line terminators, the in-memory shape does not

use serde::{Deserialize, Serialize};

const CRLF: &[u8] = b"\r\n";

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `"Key: value"` line. Trailing CR/LF is ignored.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (name, value) = line.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value.trim_start()))
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Components of a request start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub protocol: &'a str,
}

impl<'a> RequestLine<'a> {
    /// Split `METHOD TARGET PROTOCOL`.
    pub fn parse(line: &'a str) -> Option<Self> {
        let mut parts = line.trim_end_matches(['\r', '\n']).split(' ');
        let method = parts.next().filter(|s| !s.is_empty())?;
        let target = parts.next().filter(|s| !s.is_empty())?;
        let protocol = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            method,
            target,
            protocol,
        })
    }

    /// The target without its query string.
    pub fn path(&self) -> &'a str {
        self.target.split_once('?').map_or(self.target, |(path, _)| path)
    }

    pub fn has_query(&self) -> bool {
        self.target.contains('?')
    }
}

/// An HTTP request or response.
///
/// Requests and responses share a shape; the start line decides which it is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "StoredMessage", into = "StoredMessage")]
pub struct HttpMessage {
    first_line: String,
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl HttpMessage {
    pub fn new(first_line: impl Into<String>, headers: Vec<Header>, body: Vec<u8>) -> Self {
        let mut first_line = first_line.into();
        let trimmed = first_line.trim_end_matches(['\r', '\n']).len();
        first_line.truncate(trimmed);
        Self {
            first_line,
            headers,
            body,
        }
    }

    /// Start line without its terminator.
    pub fn first_line(&self) -> &str {
        &self.first_line
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    pub fn request_line(&self) -> Option<RequestLine<'_>> {
        RequestLine::parse(&self.first_line)
    }

    /// Status code of a response start line.
    pub fn status_code(&self) -> Option<u16> {
        let mut parts = self.first_line.split(' ');
        let protocol = parts.next()?;
        if !protocol.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }

    /// Number of bytes `write_to` produces.
    pub fn wire_len(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|h| h.name.len() + 2 + h.value.len() + 2)
            .sum();
        self.first_line.len() + 2 + headers + 2 + self.body.len()
    }

    /// Append the wire form to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(self.wire_len());
        out.extend_from_slice(self.first_line.as_bytes());
        out.extend_from_slice(CRLF);
        for header in &self.headers {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }
}

/// Persisted form: terminators kept on the start line and every header.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    first_line: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl From<StoredMessage> for HttpMessage {
    fn from(stored: StoredMessage) -> Self {
        let headers = stored
            .headers
            .iter()
            .filter_map(|line| Header::parse_line(line))
            .collect();
        HttpMessage::new(stored.first_line, headers, stored.body)
    }
}

impl From<HttpMessage> for StoredMessage {
    fn from(message: HttpMessage) -> Self {
        StoredMessage {
            first_line: format!("{}\r\n", message.first_line),
            headers: message
                .headers
                .into_iter()
                .map(|h| format!("{}: {}\r\n", h.name, h.value))
                .collect(),
            body: message.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(target: &str) -> HttpMessage {
        HttpMessage::new(
            format!("GET {target} HTTP/1.1"),
            vec![Header::new("Host", "x"), Header::new("Accept", "*/*")],
            Vec::new(),
        )
    }

    #[test]
    fn serializes_in_order() {
        let msg = get("/a");
        assert_eq!(
            msg.to_bytes(),
            b"GET /a HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n".to_vec()
        );
        assert_eq!(msg.wire_len(), msg.to_bytes().len());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = get("/a");
        assert_eq!(msg.header("host"), Some("x"));
        assert_eq!(msg.header("cookie"), None);
    }

    #[test]
    fn request_line_parts() {
        let msg = get("/x?y=1");
        let line = msg.request_line().unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path(), "/x");
        assert!(line.has_query());
        assert_eq!(line.protocol, "HTTP/1.1");
        assert!(RequestLine::parse("GET /x").is_none());
    }

    #[test]
    fn status_code_of_response() {
        let resp = HttpMessage::new("HTTP/1.1 204 No Content\r\n", vec![], vec![]);
        assert_eq!(resp.first_line(), "HTTP/1.1 204 No Content");
        assert_eq!(resp.status_code(), Some(204));
        assert_eq!(get("/").status_code(), None);
    }

    #[test]
    fn persisted_shape_keeps_terminators() {
        let msg = get("/a");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["first_line"], "GET /a HTTP/1.1\r\n");
        assert_eq!(json["headers"][0], "Host: x\r\n");

        let back: HttpMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
