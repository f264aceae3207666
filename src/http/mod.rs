//! HTTP/1.x wire handling.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → parser.rs RequestParser (framed requests, FIFO)
//!     → [pipeline classifies against the archive]
//!     → message.rs HttpMessage::to_bytes (forwarded verbatim)
//! origin bytes
//!     → parser.rs ResponseParser (paired with forwarded requests)
//!     → framing.rs (body length per message)
//! ```

pub mod framing;
pub mod message;
pub mod parser;

pub use message::{Header, HttpMessage, RequestLine};
pub use parser::{Forwarded, ParseError, ParsedResponse, RequestParser, ResponseParser};
