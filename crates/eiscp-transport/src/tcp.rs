use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected control stream to a receiver. Implements `Read` and `Write`.
///
/// Clones made with [`DeviceStream::try_clone`] share one socket, so a
/// receive loop and a writer can own separate handles and
/// [`DeviceStream::shutdown`] on any of them unblocks both.
pub struct DeviceStream {
    inner: TcpStream,
    peer: SocketAddr,
}

impl DeviceStream {
    /// Connect to a receiver's control port (blocking, bounded by `timeout`).
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| TransportError::Connect {
                addr,
                source: e,
            })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to device");
        Ok(Self {
            inner: stream,
            peer: addr,
        })
    }

    /// Remote address of the receiver.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            inner: self.inner.try_clone()?,
            peer: self.peer,
        })
    }

    /// Close both directions of the connection for every clone.
    ///
    /// A stream the peer already closed is not an error.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => {
                debug!(peer = %self.peer, "device stream shut down");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("peer", &self.peer)
            .finish()
    }
}
