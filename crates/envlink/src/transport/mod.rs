mod loopback;
mod tcp;

use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::keymap::Action;
use crate::observers::{Observers, SubscriptionId};
use crate::observation::NO_STEP;
use crate::wire::{decode_inbound_line, encode_outbound_line, EventKind, InboundEvent, OutboundCommand};

pub use loopback::LoopbackTransport;
pub use tcp::TcpTransport;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_MS: u64 = 10;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub timeout: Duration,
    /// Longest a single `pump` waits for inbound data.
    pub poll_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Open,
    Closed,
}

/// Line-oriented link to the backend.
pub trait Transport {
    fn is_connected(&self) -> bool;
    fn send_line(&mut self, line: &str) -> Result<(), TransportError>;
    /// Appends every complete inbound line received so far to `out`.
    fn poll_lines(&mut self, out: &mut Vec<String>) -> LinkStatus;
    fn close(&mut self);
}

/// Event-level channel over a [`Transport`]: decodes inbound lines, fans
/// them out to subscribers and stamps outgoing actions with the step counter.
pub struct EnvChannel<T: Transport> {
    transport: T,
    subscribers: Observers<EventKind, InboundEvent>,
    step_iter: i64,
    pending: Vec<InboundEvent>,
    disconnect_reported: bool,
    destroyed: bool,
    dropped_sends: u64,
}

impl EnvChannel<TcpTransport> {
    /// Opens a TCP link and waits for the server's handshake. The returned
    /// channel yields `connected` as its first event.
    pub fn connect(address: &str, options: ConnectOptions) -> Result<Self, TransportError> {
        let transport = TcpTransport::connect(address, options)?;
        info!(address, "transport_connected");
        let mut channel = Self::new(transport);
        channel.pending.push(InboundEvent::Connected);
        Ok(channel)
    }
}

impl<T: Transport> EnvChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            subscribers: Observers::default(),
            step_iter: NO_STEP,
            pending: Vec::new(),
            disconnect_reported: false,
            destroyed: false,
            dropped_sends: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        !self.destroyed && self.transport.is_connected()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn step_iter(&self) -> i64 {
        self.step_iter
    }

    pub fn set_step_iter(&mut self, step_iter: i64) {
        self.step_iter = step_iter;
    }

    pub fn dropped_sends(&self) -> u64 {
        self.dropped_sends
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&InboundEvent) + 'static,
    {
        self.subscribers.subscribe(kind, handler)
    }

    pub fn subscribe_any<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&InboundEvent) + 'static,
    {
        self.subscribers.subscribe_any(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Fire-and-forget send. Nothing is queued: while disconnected the
    /// message is dropped and counted.
    pub fn push(&mut self, event: &str, args: &[Value]) {
        if !self.is_connected() {
            self.dropped_sends = self.dropped_sends.saturating_add(1);
            warn!(
                event,
                dropped_sends = self.dropped_sends,
                "transport_send_dropped_disconnected"
            );
            return;
        }
        let line = encode_outbound_line(event, args);
        if let Err(error) = self.transport.send_line(&line) {
            self.dropped_sends = self.dropped_sends.saturating_add(1);
            warn!(event, error = %error, "transport_send_failed");
        }
    }

    pub fn send(&mut self, command: &OutboundCommand) {
        debug!(event = command.wire_name(), "transport_send");
        self.push(command.wire_name(), &command.args());
    }

    /// Sends `action` for `agent_key`, stamped with the current step counter.
    pub fn send_action(&mut self, instance_id: &str, agent_key: &str, action: &Action) {
        let command = OutboundCommand::Action {
            instance_id: instance_id.to_string(),
            agent_key: agent_key.to_string(),
            step_iter: self.step_iter,
            action: action.for_agent(agent_key),
        };
        self.send(&command);
    }

    /// Reads whatever has arrived, in arrival order. Subscribers see each
    /// event before it is returned. A link close produces one `disconnect`.
    pub fn pump(&mut self) -> Vec<InboundEvent> {
        if self.destroyed {
            return Vec::new();
        }

        let mut events = std::mem::take(&mut self.pending);
        let mut lines = Vec::new();
        let status = self.transport.poll_lines(&mut lines);
        for line in lines {
            match decode_inbound_line(&line) {
                Ok(event) => events.push(event),
                Err(error) => warn!(error = %error, line = %line, "transport_line_dropped"),
            }
        }
        if status == LinkStatus::Closed && !self.disconnect_reported {
            self.disconnect_reported = true;
            info!("transport_link_closed");
            events.push(InboundEvent::Disconnected {
                reason: "transport closed".to_string(),
            });
        }

        for event in &events {
            self.subscribers.emit(event.kind(), event);
        }
        events
    }

    /// Detaches every subscriber and closes the link. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.subscribers.clear();
        self.pending.clear();
        self.transport.close();
        info!("transport_destroyed");
    }
}

impl<T: Transport> Drop for EnvChannel<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}
