//! Message body framing.
//!
//! Decides where a message body ends: chunked transfer coding, an explicit
//! Content-Length, no body at all, or "until the connection closes".

use crate::http::message::Header;
use crate::http::parser::ParseError;

/// How the body following a parsed head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes.
    Fixed(usize),
    /// Chunked transfer coding; the body is kept verbatim.
    Chunked,
    /// Everything until the peer closes.
    UntilClose,
}

fn is_chunked(headers: &[Header]) -> bool {
    headers
        .iter()
        .filter(|h| h.is("transfer-encoding"))
        .flat_map(|h| h.value.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &[Header]) -> Result<Option<usize>, ParseError> {
    let mut found: Option<usize> = None;
    for header in headers.iter().filter(|h| h.is("content-length")) {
        let value = header
            .value
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength(header.value.clone()))?;
        match found {
            Some(previous) if previous != value => {
                return Err(ParseError::InvalidContentLength(header.value.clone()));
            }
            _ => found = Some(value),
        }
    }
    Ok(found)
}

/// Body framing of a request.
pub fn request_body(headers: &[Header]) -> Result<BodyLength, ParseError> {
    if is_chunked(headers) {
        return Ok(BodyLength::Chunked);
    }
    Ok(match content_length(headers)? {
        Some(0) | None => BodyLength::Empty,
        Some(n) => BodyLength::Fixed(n),
    })
}

/// Body framing of a response to a request made with `request_method`.
pub fn response_body(
    request_method: &str,
    status: u16,
    headers: &[Header],
) -> Result<BodyLength, ParseError> {
    if request_method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&status)
        || status == 204
        || status == 304
    {
        return Ok(BodyLength::Empty);
    }
    if is_chunked(headers) {
        return Ok(BodyLength::Chunked);
    }
    Ok(match content_length(headers)? {
        Some(0) => BodyLength::Empty,
        Some(n) => BodyLength::Fixed(n),
        None => BodyLength::UntilClose,
    })
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

/// Resumable scan for the end of a chunked body.
///
/// Offsets are relative to the first body byte. Chunks already verified
/// are not scanned again when more bytes arrive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkScanner {
    pos: usize,
    trailers: bool,
}

impl ChunkScanner {
    /// Length of the complete chunked body at the start of `body`,
    /// trailers included, or `None` if more bytes are needed. `body` must
    /// extend the bytes seen by earlier calls.
    pub fn scan(&mut self, body: &[u8]) -> Result<Option<usize>, ParseError> {
        loop {
            let Some(line_end) = find_crlf(body, self.pos) else {
                return Ok(None);
            };
            let next = line_end + 2;

            if self.trailers {
                // trailer section ends with an empty line
                let empty = line_end == self.pos;
                self.pos = next;
                if empty {
                    return Ok(Some(next));
                }
                continue;
            }

            let line = std::str::from_utf8(&body[self.pos..line_end])
                .map_err(|_| ParseError::InvalidChunk)?;
            let size_field = line.split(';').next().unwrap_or_default().trim();
            let size =
                usize::from_str_radix(size_field, 16).map_err(|_| ParseError::InvalidChunk)?;

            if size == 0 {
                self.pos = next;
                self.trailers = true;
                continue;
            }

            let data_end = next.checked_add(size).ok_or(ParseError::InvalidChunk)?;
            let chunk_end = data_end.checked_add(2).ok_or(ParseError::InvalidChunk)?;
            if body.len() < chunk_end {
                return Ok(None);
            }
            if &body[data_end..chunk_end] != b"\r\n" {
                return Err(ParseError::InvalidChunk);
            }
            self.pos = chunk_end;
        }
    }
}
