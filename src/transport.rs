//! TCP transport layer for the block-transfer link.
//!
//! This module provides the [`Transport`] trait and its production
//! implementation [`TcpTransport`]. The transport layer is completely
//! separated from the protocol layer: it only knows about sockets and bytes,
//! never about block geometry or checker tables.
//!
//! # Design
//!
//! - **Protocol agnostic** - byte transmission only, no block knowledge
//! - **Synchronous** - blocking send/receive with bounded readiness polling
//! - **Swappable** - [`BlockChannel`](crate::BlockChannel) takes any
//!   `Box<dyn Transport>`, so tests drive the protocol with scripted frames
//!
//! # Constants
//!
//! - [`DEFAULT_PLC_PORT`] - default PLC listener port (2000)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - default connect timeout (2 seconds)
//! - [`READ_POLL_STEP`] - readiness polling step (100 ms)

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::{PlcError, Result};

/// Default TCP port the injector PLCs listen on.
pub const DEFAULT_PLC_PORT: u16 = 2000;

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Step used when polling the socket for readability.
pub const READ_POLL_STEP: Duration = Duration::from_millis(100);

/// Byte transport for one PLC link.
///
/// Implementations must map timeouts to `Ok(false)` from [`readable`] or
/// `PlcError::Timeout` from [`recv`], and a peer close to `Ok(0)` from
/// [`recv`], so the protocol layer can classify failures.
///
/// [`readable`]: Transport::readable
/// [`recv`]: Transport::recv
pub trait Transport: Send {
    /// Waits up to `timeout` for the link to become readable.
    fn readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Receives up to `buf.len()` bytes. Returns `Ok(0)` when the peer has
    /// closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Sends the whole of `data`, blocking until written out.
    fn send_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Blocking TCP transport for the block-transfer protocol.
///
/// # Example
///
/// ```no_run
/// use plc_mirror::transport::TcpTransport;
///
/// let transport = TcpTransport::connect("10.0.5.12:2000".parse().unwrap()).unwrap();
/// ```
pub struct TcpTransport {
    stream: TcpStream,
    remote_addr: SocketAddr,
}

impl TcpTransport {
    /// Connects to the PLC with the default connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::Connection` if the TCP connection cannot be
    /// established or configured.
    pub fn connect(plc_addr: SocketAddr) -> Result<Self> {
        Self::connect_timeout(plc_addr, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Connects to the PLC with a custom connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::Connection` if the TCP connection cannot be
    /// established or configured.
    pub fn connect_timeout(plc_addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&plc_addr, timeout)
            .map_err(|e| PlcError::connection(format!("connect {plc_addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| PlcError::connection(format!("set_nodelay: {e}")))?;
        debug!(%plc_addr, "plc link established");
        Ok(Self {
            stream,
            remote_addr: plc_addr,
        })
    }

    /// Returns the remote PLC address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Transport for TcpTransport {
    fn readable(&mut self, timeout: Duration) -> Result<bool> {
        // A one-byte peek under a read timeout doubles as a readiness probe
        // without consuming stream data.
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(PlcError::Io)?;
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(PlcError::Io(e)),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(PlcError::Timeout)
            }
            Err(e) => Err(PlcError::Io(e)),
        }
    }

    fn send_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).map_err(PlcError::Io)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_PLC_PORT, 2000);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(2));
        assert_eq!(READ_POLL_STEP, Duration::from_millis(100));
    }

    #[test]
    fn test_connect_and_debug() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect_timeout(addr, Duration::from_millis(200)).unwrap();
        assert_eq!(transport.remote_addr(), addr);

        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("TcpTransport"));
        assert!(debug_str.contains("127.0.0.1"));
    }

    #[test]
    fn test_connect_refused() {
        // Port 1 on localhost is almost certainly closed.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = TcpTransport::connect_timeout(addr, Duration::from_millis(200));
        assert!(matches!(result, Err(PlcError::Connection { .. })));
    }

    #[test]
    fn test_readable_timeout_on_idle_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport =
            TcpTransport::connect_timeout(addr, Duration::from_millis(200)).unwrap();
        let _peer = listener.accept().unwrap();

        // Nothing has been sent, so the link must report not-readable.
        assert!(!transport.readable(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn test_send_recv_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport =
            TcpTransport::connect_timeout(addr, Duration::from_millis(200)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        transport.send_all(&[1, 2, 3]).unwrap();
        let mut got = [0u8; 3];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(got, [1, 2, 3]);

        peer.write_all(&[9, 8]).unwrap();
        assert!(transport.readable(Duration::from_millis(200)).unwrap());
        let mut buf = [0u8; 8];
        let n = transport.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9, 8]);
    }
}
