use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{ConnectOptions, LinkStatus, Transport, TransportError};
use crate::wire::{
    decode_inbound_line, drain_complete_lines, encode_line_payload, InboundEvent,
};

const READ_CHUNK_BYTES: usize = 4096;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Newline-delimited JSON over TCP. The socket stays in blocking mode with a
/// short read timeout, so each poll waits at most `poll_interval`.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    read_buf: Vec<u8>,
    ready_lines: Vec<String>,
    connected: bool,
}

impl TcpTransport {
    pub fn connect(address: &str, options: ConnectOptions) -> Result<Self, TransportError> {
        let socket_addr = resolve_address(address)?;
        let stream = TcpStream::connect_timeout(&socket_addr, options.timeout).map_err(|source| {
            TransportError::Connect {
                address: address.to_string(),
                source,
            }
        })?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "transport_nodelay_failed");
        }

        let mut transport = Self {
            stream,
            read_buf: Vec::new(),
            ready_lines: Vec::new(),
            connected: true,
        };
        transport.wait_for_handshake(address, Instant::now() + options.timeout)?;
        transport
            .stream
            .set_read_timeout(Some(options.poll_interval.max(MIN_READ_TIMEOUT)))?;
        Ok(transport)
    }

    fn wait_for_handshake(&mut self, address: &str, deadline: Instant) -> Result<(), TransportError> {
        let handshake_error = |reason: String| TransportError::Handshake {
            address: address.to_string(),
            reason,
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(handshake_error("timed out waiting for connect".to_string()));
            }
            self.stream
                .set_read_timeout(Some((deadline - now).max(MIN_READ_TIMEOUT)))?;

            let mut lines = Vec::new();
            match self.read_available(&mut lines) {
                LinkStatus::Open => {}
                LinkStatus::Closed => {
                    return Err(handshake_error("server closed the link".to_string()))
                }
            }

            let mut lines = lines.into_iter();
            while let Some(line) = lines.next() {
                match decode_inbound_line(&line) {
                    Ok(InboundEvent::Connected) => {
                        // Anything sent right after the handshake belongs to the session.
                        self.ready_lines.extend(lines);
                        return Ok(());
                    }
                    Ok(InboundEvent::ForceDisconnected { reason }) => {
                        return Err(handshake_error(format!("rejected: {reason}")))
                    }
                    Ok(other) => debug!(event = ?other.kind(), "transport_pre_handshake_event_ignored"),
                    Err(error) => warn!(error = %error, "transport_pre_handshake_line_dropped"),
                }
            }
        }
    }

    fn read_available(&mut self, out: &mut Vec<String>) -> LinkStatus {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.connected = false;
                    break;
                }
                Ok(bytes_read) => {
                    self.read_buf.extend_from_slice(&chunk[..bytes_read]);
                    drain_complete_lines(&mut self.read_buf, out);
                    if bytes_read < chunk.len() {
                        break;
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "transport_read_failed");
                    self.connected = false;
                    break;
                }
            }
        }

        if self.connected {
            LinkStatus::Open
        } else {
            LinkStatus::Closed
        }
    }
}

impl Transport for TcpTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let result = self
            .stream
            .write_all(&encode_line_payload(line))
            .and_then(|()| self.stream.flush());
        if let Err(error) = result {
            self.connected = false;
            return Err(TransportError::Io(error));
        }
        Ok(())
    }

    fn poll_lines(&mut self, out: &mut Vec<String>) -> LinkStatus {
        out.append(&mut self.ready_lines);
        if !self.connected {
            return LinkStatus::Closed;
        }
        self.read_available(out)
    }

    fn close(&mut self) {
        if self.connected {
            if let Err(err) = self.stream.shutdown(Shutdown::Both) {
                debug!(error = %err, "transport_shutdown_failed");
            }
        }
        self.connected = false;
        self.ready_lines.clear();
        self.read_buf.clear();
    }
}

fn resolve_address(address: &str) -> Result<SocketAddr, TransportError> {
    let address_error = |source| TransportError::Address {
        address: address.to_string(),
        source,
    };
    address
        .to_socket_addrs()
        .map_err(address_error)?
        .next()
        .ok_or_else(|| {
            address_error(io::Error::new(
                io::ErrorKind::NotFound,
                "address resolved to nothing",
            ))
        })
}
