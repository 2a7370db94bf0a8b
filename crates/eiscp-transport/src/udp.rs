use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{is_timeout, Result, TransportError};

/// UDP socket used to broadcast discovery probes and collect answers.
///
/// Probes and answers share one socket so that receivers reply to the port
/// the probe came from.
#[derive(Debug)]
pub struct DiscoverySocket {
    socket: UdpSocket,
    broadcast: SocketAddr,
}

impl DiscoverySocket {
    /// Bind to `bind_addr` and target `broadcast` for probes.
    pub fn bind(bind_addr: SocketAddr, broadcast: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).map_err(|e| TransportError::Bind {
            addr: bind_addr,
            source: e,
        })?;
        socket.set_broadcast(true)?;
        info!(local = %socket.local_addr()?, %broadcast, "discovery socket bound");
        Ok(Self { socket, broadcast })
    }

    /// Send a packet to the broadcast address.
    pub fn broadcast(&self, packet: &[u8]) -> Result<usize> {
        let sent = self.socket.send_to(packet, self.broadcast)?;
        debug!(bytes = sent, target = %self.broadcast, "broadcast probe");
        Ok(sent)
    }

    /// Receive one datagram, waiting no later than `deadline`.
    ///
    /// Returns `Ok(None)` once the deadline passes without a datagram.
    pub fn recv_until(
        &self,
        buf: &mut [u8],
        deadline: Instant,
    ) -> Result<Option<(usize, SocketAddr)>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        // A zero timeout means "block forever" to the OS.
        self.socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(err) if is_timeout(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Address probes are sent to.
    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast
    }
}
