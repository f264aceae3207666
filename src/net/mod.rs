//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Redirected TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → destination.rs (where the client meant to go)
//!     → transport.rs + tls.rs (dial origin, wrap both legs)
//!     → connection.rs (lifecycle tracking)
//!     → Hand off to the proxy pipeline
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is chosen once per connection, by destination port

pub mod buffer;
pub mod connection;
pub mod destination;
pub mod listener;
pub mod tls;
pub mod transport;

pub use destination::{DestinationResolver, FixedDestination, OriginalDestination};
pub use listener::{Listener, ListenerError};
pub use tls::{TlsContext, TlsError};
pub use transport::{Transport, TransportError};
