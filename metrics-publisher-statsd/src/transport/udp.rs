use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use crate::endpoint::EndpointResolver;

use super::Transport;

/// A transport that sends each payload as a single UDP datagram.
///
/// The transport owns one socket for its whole lifetime. Every send goes to whatever address the endpoint resolver
/// currently holds, so a refreshed DNS entry is picked up on the next send without reconnecting.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    endpoint: EndpointResolver,
}

impl UdpTransport {
    /// Creates a new `UdpTransport` sending to the given endpoint.
    ///
    /// # Errors
    ///
    /// If the local socket cannot be bound, an error is returned.
    pub fn new(endpoint: EndpointResolver) -> io::Result<Self> {
        Self::with_write_timeout(endpoint, None)
    }

    /// Creates a new `UdpTransport` whose sends give up after `write_timeout`.
    ///
    /// A timeout of `None`, or of zero, blocks until the operating system accepts the datagram.
    ///
    /// # Errors
    ///
    /// If the local socket cannot be bound or configured, an error is returned.
    pub fn with_write_timeout(endpoint: EndpointResolver, write_timeout: Option<Duration>) -> io::Result<Self> {
        // Bind to an ephemeral port in the same address family as the endpoint.
        let local_addr = match endpoint.current() {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let socket = UdpSocket::bind(local_addr)?;
        socket.set_write_timeout(write_timeout.filter(|timeout| !timeout.is_zero()))?;

        Ok(Self { socket, endpoint })
    }

    /// Returns the endpoint resolver used to address each datagram.
    pub fn endpoint(&self) -> &EndpointResolver {
        &self.endpoint
    }

    /// Returns the local address the socket is bound to.
    ///
    /// # Errors
    ///
    /// If the socket's local address cannot be queried, an error is returned.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.endpoint.current()).map(|_| ())
    }
}
