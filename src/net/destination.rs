//! Where an intercepted connection was headed.
//!
//! Traffic reaches the proxy through a NAT redirect, so the address the
//! client dialled is only known to the kernel. `OriginalDestination` asks
//! for it; `FixedDestination` pins every connection to one origin.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Recovers the origin address of an accepted client connection.
pub trait DestinationResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, client: &TcpStream) -> io::Result<SocketAddr>;
}

/// Reads the pre-NAT destination with `SO_ORIGINAL_DST`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OriginalDestination;

impl DestinationResolver for OriginalDestination {
    #[cfg(target_os = "linux")]
    fn resolve(&self, client: &TcpStream) -> io::Result<SocketAddr> {
        use std::net::Ipv4Addr;

        use nix::sys::socket::{getsockopt, sockopt::OriginalDst};

        let raw = getsockopt(client, OriginalDst).map_err(io::Error::from)?;
        let ip = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));
        let destination = SocketAddr::from((ip, u16::from_be(raw.sin_port)));

        // Without a redirect rule the kernel reports our own address.
        if client.local_addr()? == destination {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "connection was not redirected to the proxy",
            ));
        }
        Ok(destination)
    }

    #[cfg(not(target_os = "linux"))]
    fn resolve(&self, _client: &TcpStream) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "original destination lookup needs Linux netfilter",
        ))
    }
}

/// Sends every connection to the same origin.
#[derive(Debug, Clone, Copy)]
pub struct FixedDestination(pub SocketAddr);

impl DestinationResolver for FixedDestination {
    fn resolve(&self, _client: &TcpStream) -> io::Result<SocketAddr> {
        Ok(self.0)
    }
}
