//! Incremental HTTP/1.x request and response parsers.
//!
//! # Responsibilities
//! - Accumulate raw bytes read from a leg
//! - Yield complete messages in arrival order
//! - Pair each response with the forwarded request it answers
//! - Stream the in-flight response's bytes to the client as they arrive
//!
//! # Design Decisions
//! - Heads are validated with `httparse`; the raw start line is kept as-is
//! - Chunked bodies are kept verbatim so relayed bytes match the origin's
//! - A response arriving with nothing awaiting it is a protocol error

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::http::framing::{self, BodyLength, ChunkScanner};
use crate::http::message::{Header, HttpMessage};
use crate::net::buffer::OutboundBuffer;

const MAX_HEADERS: usize = 128;

/// Malformed or unexpected data on a leg.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed message head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("invalid chunked encoding")]
    InvalidChunk,

    #[error("response received with no request awaiting it")]
    Unsolicited,

    #[error("connection closed in the middle of a message")]
    Truncated,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Request,
    Response,
}

struct Head {
    first_line: String,
    headers: Vec<Header>,
    len: usize,
}

fn skip_blank_lines(buf: &mut BytesMut) {
    let blank = buf
        .iter()
        .take_while(|b| **b == b'\r' || **b == b'\n')
        .count();
    if blank > 0 {
        let _ = buf.split_to(blank);
    }
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| Header::new(h.name, String::from_utf8_lossy(h.value)))
        .collect()
}

fn parse_head(buf: &[u8], kind: Kind, max_head: usize) -> Result<Option<Head>, ParseError> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let (status, headers) = match kind {
        Kind::Request => {
            let mut req = httparse::Request::new(&mut slots);
            let status = req.parse(buf)?;
            (status, collect_headers(req.headers))
        }
        Kind::Response => {
            let mut resp = httparse::Response::new(&mut slots);
            let status = resp.parse(buf)?;
            (status, collect_headers(resp.headers))
        }
    };

    let len = match status {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial if buf.len() > max_head => {
            return Err(ParseError::HeadTooLarge(max_head));
        }
        httparse::Status::Partial => return Ok(None),
    };

    let line_end = buf.iter().position(|b| *b == b'\n').unwrap_or(len);
    let first_line = String::from_utf8_lossy(&buf[..line_end])
        .trim_end_matches('\r')
        .to_string();

    Ok(Some(Head {
        first_line,
        headers,
        len,
    }))
}

/// Total length of head plus body, or `None` while incomplete.
fn message_len(
    buf: &[u8],
    head_len: usize,
    body: BodyLength,
    chunks: &mut ChunkScanner,
) -> Result<Option<usize>, ParseError> {
    Ok(match body {
        BodyLength::Empty => Some(head_len),
        BodyLength::Fixed(n) => {
            let total = head_len
                .checked_add(n)
                .ok_or_else(|| ParseError::InvalidContentLength(n.to_string()))?;
            (buf.len() >= total).then_some(total)
        }
        BodyLength::Chunked => match chunks.scan(&buf[head_len..])? {
            Some(n) => Some(head_len.checked_add(n).ok_or(ParseError::InvalidChunk)?),
            None => None,
        },
        BodyLength::UntilClose => None,
    })
}

/// Parses the client-to-origin byte stream into requests.
#[derive(Debug)]
pub struct RequestParser {
    buffer: BytesMut,
    max_head: usize,
    chunks: ChunkScanner,
    complete: VecDeque<HttpMessage>,
}

impl RequestParser {
    pub fn new(max_head: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_head,
            chunks: ChunkScanner::default(),
            complete: VecDeque::new(),
        }
    }

    /// Feed bytes; every request they complete is queued.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        self.buffer.extend_from_slice(bytes);
        loop {
            skip_blank_lines(&mut self.buffer);
            let Some(head) = parse_head(&self.buffer, Kind::Request, self.max_head)? else {
                return Ok(());
            };
            let body = framing::request_body(&head.headers)?;
            let Some(total) = message_len(&self.buffer, head.len, body, &mut self.chunks)? else {
                return Ok(());
            };
            self.chunks = ChunkScanner::default();
            let raw = self.buffer.split_to(total);
            let request = HttpMessage::new(head.first_line, head.headers, raw[head.len..].to_vec());
            self.complete.push_back(request);
        }
    }

    pub fn front(&self) -> Option<&HttpMessage> {
        self.complete.front()
    }

    pub fn pop(&mut self) -> Option<HttpMessage> {
        self.complete.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.complete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.complete.len()
    }

    /// Discard queued requests and any partial one.
    pub fn clear(&mut self) {
        self.complete.clear();
        self.buffer.clear();
        self.chunks = ChunkScanner::default();
    }
}

/// A forwarded request and its archive slot.
#[derive(Debug, Clone)]
pub struct Forwarded {
    pub request: HttpMessage,
    pub index: usize,
}

/// A response completed by the origin.
#[derive(Debug)]
pub struct ParsedResponse {
    pub message: HttpMessage,
    /// Exact bytes received from the origin.
    pub wire: Bytes,
    /// Prefix of `wire` already pushed to the outbound buffer.
    pub streamed: usize,
    /// The request this answers; `None` for interim (1xx) responses.
    pub answers: Option<Forwarded>,
}

impl ParsedResponse {
    /// Bytes still owed to the client.
    pub fn remaining(&self) -> &[u8] {
        &self.wire[self.streamed.min(self.wire.len())..]
    }
}

/// Parses the origin-to-client byte stream into responses.
#[derive(Debug)]
pub struct ResponseParser {
    buffer: BytesMut,
    max_head: usize,
    chunks: ChunkScanner,
    awaiting: VecDeque<Forwarded>,
    streamed: usize,
}

impl ResponseParser {
    pub fn new(max_head: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_head,
            chunks: ChunkScanner::default(),
            awaiting: VecDeque::new(),
            streamed: 0,
        }
    }

    /// Register a request that was forwarded and now awaits its response.
    pub fn expect(&mut self, request: HttpMessage, index: usize) {
        self.awaiting.push_back(Forwarded { request, index });
    }

    /// Number of forwarded requests without a complete response.
    pub fn outstanding(&self) -> usize {
        self.awaiting.len()
    }

    /// Archive indices of the forwarded requests still unanswered.
    pub fn awaiting_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.awaiting.iter().map(|f| f.index)
    }

    /// Feed origin bytes; returns every response completed by them.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<Vec<ParsedResponse>, ParseError> {
        self.buffer.extend_from_slice(bytes);
        let mut done = Vec::new();

        while !self.buffer.is_empty() {
            let method = match self.awaiting.front() {
                Some(f) => f.request.request_line().map_or("GET", |l| l.method).to_string(),
                None => return Err(ParseError::Unsolicited),
            };
            let Some(head) = parse_head(&self.buffer, Kind::Response, self.max_head)? else {
                break;
            };
            let status = head_status(&head.first_line)?;
            let body = framing::response_body(&method, status, &head.headers)?;
            let Some(total) = message_len(&self.buffer, head.len, body, &mut self.chunks)? else {
                break;
            };
            done.push(self.complete(head, total, status));
        }
        Ok(done)
    }

    /// The origin closed: complete a read-until-close response.
    pub fn finish(&mut self) -> Result<Option<ParsedResponse>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.awaiting.is_empty() {
            return Err(ParseError::Unsolicited);
        }
        let Some(head) = parse_head(&self.buffer, Kind::Response, self.max_head)? else {
            return Err(ParseError::Truncated);
        };
        let status = head_status(&head.first_line)?;
        let method = self
            .awaiting
            .front()
            .and_then(|f| f.request.request_line().map(|l| l.method.to_string()))
            .unwrap_or_default();
        match framing::response_body(&method, status, &head.headers)? {
            BodyLength::UntilClose => {
                let total = self.buffer.len();
                Ok(Some(self.complete(head, total, status)))
            }
            _ => Err(ParseError::Truncated),
        }
    }

    fn complete(&mut self, head: Head, total: usize, status: u16) -> ParsedResponse {
        self.chunks = ChunkScanner::default();
        let wire = self.buffer.split_to(total).freeze();
        let streamed = std::mem::take(&mut self.streamed).min(total);
        let interim = (100..200).contains(&status) && status != 101;
        let answers = if interim {
            None
        } else {
            self.awaiting.pop_front()
        };
        let message = HttpMessage::new(head.first_line, head.headers, wire[head.len..].to_vec());
        ParsedResponse {
            message,
            wire,
            streamed,
            answers,
        }
    }

    /// Push received bytes of the response still in flight to `outbound`,
    /// as space allows. Only call while no completed response is queued
    /// ahead of it, or the client would see interleaved bytes.
    pub fn stream_partial(&mut self, outbound: &mut OutboundBuffer) -> usize {
        if self.awaiting.is_empty() || self.buffer.len() <= self.streamed {
            return 0;
        }
        let pushed = outbound.push(&self.buffer[self.streamed..]);
        self.streamed += pushed;
        pushed
    }
}

fn head_status(first_line: &str) -> Result<u16, ParseError> {
    first_line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or(ParseError::Malformed(httparse::Error::Status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(target: &str) -> HttpMessage {
        HttpMessage::new(format!("GET {target} HTTP/1.1"), vec![Header::new("Host", "x")], vec![])
    }

    #[test]
    fn requests_split_across_reads() {
        let mut parser = RequestParser::new(1024);
        parser.parse(b"GET /a HTTP/1.1\r\nHo").unwrap();
        assert!(parser.is_empty());
        parser.parse(b"st: x\r\n\r\nPOST /b HTTP/1.1\r\nContent-Length: 3\r\n\r\nab").unwrap();
        assert_eq!(parser.len(), 1);
        parser.parse(b"c").unwrap();
        assert_eq!(parser.len(), 2);

        let first = parser.pop().unwrap();
        assert_eq!(first, get("/a"));
        let second = parser.pop().unwrap();
        assert_eq!(second.first_line(), "POST /b HTTP/1.1");
        assert_eq!(second.body(), b"abc");
    }

    #[test]
    fn overflowing_content_length_is_rejected() {
        let mut parser = RequestParser::new(1024);
        let err = parser
            .parse(b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength(_)));
    }

    #[test]
    fn chunked_request_across_reads() {
        let mut parser = RequestParser::new(1024);
        parser
            .parse(b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi")
            .unwrap();
        parser.parse(b"ki\r\n0\r\n").unwrap();
        assert!(parser.is_empty());
        parser.parse(b"\r\nGET /next HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(parser.len(), 2);
        assert_eq!(parser.pop().unwrap().body(), b"4\r\nWiki\r\n0\r\n\r\n");
        assert_eq!(parser.pop().unwrap(), get("/next"));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut parser = RequestParser::new(16);
        let err = parser.parse(b"GET /aaaaaaaaaaaaaaaaaaaaaaaa HTTP/1.1\r\n").unwrap_err();
        assert!(matches!(err, ParseError::HeadTooLarge(16)));
    }

    #[test]
    fn response_paired_with_request() {
        let mut parser = ResponseParser::new(1024);
        let mut out = OutboundBuffer::new(1024);
        parser.expect(get("/a"), 7);

        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        let done = parser.parse(wire).unwrap();
        assert_eq!(parser.stream_partial(&mut out), 0);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].answers.as_ref().unwrap().index, 7);
        assert_eq!(&done[0].wire[..], wire);
        assert_eq!(done[0].remaining(), wire);
        assert_eq!(done[0].message.body(), b"hi");
        assert!(out.is_empty());
        assert_eq!(parser.outstanding(), 0);
    }

    #[test]
    fn partial_response_streams_through() {
        let mut parser = ResponseParser::new(1024);
        let mut out = OutboundBuffer::new(1024);
        parser.expect(get("/big"), 0);

        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabc";
        assert!(parser.parse(head).unwrap().is_empty());
        assert_eq!(parser.stream_partial(&mut out), head.len());
        assert_eq!(out.as_slice(), head);
        assert_eq!(parser.stream_partial(&mut out), 0);

        let done = parser.parse(b"def").unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].streamed, head.len());
        assert_eq!(done[0].remaining(), b"def");
    }

    #[test]
    fn head_request_has_no_body() {
        let mut parser = ResponseParser::new(1024);
        parser.expect(HttpMessage::new("HEAD / HTTP/1.1", vec![], vec![]), 0);
        let done = parser
            .parse(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\n")
            .unwrap();
        assert_eq!(done.len(), 1);
        assert!(done[0].message.body().is_empty());
    }

    #[test]
    fn interim_response_keeps_request_waiting() {
        let mut parser = ResponseParser::new(1024);
        parser.expect(get("/a"), 3);
        let done = parser
            .parse(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n")
            .unwrap();
        assert_eq!(done.len(), 2);
        assert!(done[0].answers.is_none());
        assert_eq!(done[1].answers.as_ref().unwrap().index, 3);
    }

    #[test]
    fn close_delimited_response_completes_on_finish() {
        let mut parser = ResponseParser::new(1024);
        let mut out = OutboundBuffer::new(4);
        parser.expect(get("/a"), 1);
        assert!(parser.parse(b"HTTP/1.0 200 OK\r\n\r\nbody").unwrap().is_empty());
        parser.stream_partial(&mut out);
        let done = parser.finish().unwrap().unwrap();
        assert_eq!(done.streamed, 4);
        assert_eq!(done.message.body(), b"body");
        assert_eq!(done.remaining(), b"/1.0 200 OK\r\n\r\nbody");
    }

    #[test]
    fn unsolicited_response_is_an_error() {
        let mut parser = ResponseParser::new(1024);
        let err = parser.parse(b"HTTP/1.1 200 OK\r\n").unwrap_err();
        assert!(matches!(err, ParseError::Unsolicited));
    }
}
