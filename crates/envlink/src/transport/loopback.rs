use std::collections::VecDeque;

use super::{LinkStatus, Transport, TransportError};

/// In-process transport: inbound lines are pushed by the embedder, outbound
/// lines are collected for inspection.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    connected: bool,
    inbound: VecDeque<String>,
    sent: Vec<String>,
    close_calls: u32,
}

impl LoopbackTransport {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn push_inbound(&mut self, line: impl Into<String>) {
        self.inbound.push_back(line.into());
    }

    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }
}

impl Transport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.sent.push(line.to_string());
        Ok(())
    }

    fn poll_lines(&mut self, out: &mut Vec<String>) -> LinkStatus {
        out.extend(self.inbound.drain(..));
        if self.connected {
            LinkStatus::Open
        } else {
            LinkStatus::Closed
        }
    }

    fn close(&mut self) {
        self.connected = false;
        self.inbound.clear();
        self.close_calls = self.close_calls.saturating_add(1);
    }
}
