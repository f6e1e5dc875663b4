//! Development backend that speaks the environment wire protocol.
//!
//! Each accepted client gets one scripted instance: handshake, countdown on
//! `user_ready`, a fixed number of steps per episode after `start`, then
//! `done`. The link is closed once the last episode ends.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use envlink::{
    drain_complete_lines, encode_line_payload, Action, InboundEvent, OutboundCommand, WireError,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:47001";
pub const DEFAULT_STEPS_PER_EPISODE: u32 = 20;
pub const DEFAULT_STEP_MS: u64 = 100;
const READ_POLL: Duration = Duration::from_millis(10);
const READ_CHUNK_BYTES: usize = 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StubError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("client connection failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Countdown sent in reply to `user_ready`; 0 means start immediately.
    pub countdown_seconds: u32,
    pub play_sound: bool,
    pub steps_per_episode: u32,
    pub episodes: u32,
    pub step_interval: Duration,
    /// Force-disconnect the client right after `setup_user`.
    pub reject_reason: Option<String>,
    pub idle_timeout: Duration,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            countdown_seconds: 0,
            play_sound: false,
            steps_per_episode: DEFAULT_STEPS_PER_EPISODE,
            episodes: 1,
            step_interval: Duration::from_millis(DEFAULT_STEP_MS),
            reject_reason: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// What one client did during its scripted instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub setup_users: Vec<(String, String)>,
    pub ready_users: Vec<(String, String)>,
    pub starts: u32,
    pub actions: Vec<(i64, Action)>,
    pub episodes_completed: u32,
    pub rejected: bool,
    pub malformed_lines: u32,
}

pub struct StubBackend {
    listener: TcpListener,
    options: ScriptOptions,
}

impl StubBackend {
    pub fn bind(address: &str, options: ScriptOptions) -> Result<Self, StubError> {
        let listener = TcpListener::bind(address).map_err(|source| StubError::Bind {
            address: address.to_string(),
            source,
        })?;
        Ok(Self { listener, options })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StubError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one client and runs its instance to completion.
    pub fn serve_one(&self) -> Result<SessionReport, StubError> {
        let (stream, peer) = self.listener.accept()?;
        info!(peer = %peer, "stub_client_accepted");
        let report = ScriptedInstance::new(stream, &self.options)?.run()?;
        info!(
            peer = %peer,
            starts = report.starts,
            actions = report.actions.len(),
            episodes = report.episodes_completed,
            "stub_client_finished"
        );
        Ok(report)
    }

    pub fn serve_forever(&self) -> Result<(), StubError> {
        loop {
            if let Err(err) = self.serve_one() {
                warn!(error = %err, "stub_client_failed");
            }
        }
    }
}

#[derive(Debug)]
enum Phase {
    AwaitingStart,
    Streaming { next_step: u32, next_at: Instant },
    Finished,
}

struct ScriptedInstance<'a> {
    stream: TcpStream,
    read_buf: Vec<u8>,
    options: &'a ScriptOptions,
    report: SessionReport,
    phase: Phase,
    last_activity: Instant,
}

impl<'a> ScriptedInstance<'a> {
    fn new(stream: TcpStream, options: &'a ScriptOptions) -> Result<Self, StubError> {
        stream.set_read_timeout(Some(READ_POLL))?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "stub_client_nodelay_failed");
        }
        Ok(Self {
            stream,
            read_buf: Vec::new(),
            options,
            report: SessionReport::default(),
            phase: Phase::AwaitingStart,
            last_activity: Instant::now(),
        })
    }

    fn run(mut self) -> Result<SessionReport, StubError> {
        self.send(&InboundEvent::Connected)?;

        let mut lines = Vec::new();
        loop {
            let open = self.read_lines(&mut lines)?;
            for line in lines.drain(..) {
                self.last_activity = Instant::now();
                self.handle_line(&line)?;
            }
            if matches!(self.phase, Phase::Finished) {
                break;
            }
            if !open {
                info!("stub_client_left");
                break;
            }
            self.advance_episode(Instant::now())?;
            if matches!(self.phase, Phase::AwaitingStart)
                && self.last_activity.elapsed() >= self.options.idle_timeout
            {
                warn!(
                    idle_ms = self.options.idle_timeout.as_millis() as u64,
                    "stub_client_idle_closing"
                );
                break;
            }
        }

        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = %err, "stub_shutdown_failed");
        }
        Ok(self.report)
    }

    fn handle_line(&mut self, line: &str) -> Result<(), StubError> {
        let command = match OutboundCommand::decode_line(line) {
            Ok(command) => command,
            Err(err) => return self.reply_error(line, &err),
        };
        debug!(event = command.wire_name(), "stub_command_received");

        match command {
            OutboundCommand::SetupUser {
                instance_id,
                agent_key,
            } => {
                info!(instance_id = %instance_id, agent_key = %agent_key, "stub_setup_user");
                self.report.setup_users.push((instance_id, agent_key));
                if let Some(reason) = self.options.reject_reason.clone() {
                    self.report.rejected = true;
                    self.phase = Phase::Finished;
                    return self.send(&InboundEvent::ForceDisconnected { reason });
                }
                self.send(&InboundEvent::CanStart)
            }
            OutboundCommand::UserReady {
                instance_id,
                agent_key,
            } => {
                self.report.ready_users.push((instance_id, agent_key));
                self.send(&InboundEvent::CountdownStart {
                    time: self.options.countdown_seconds,
                    play_sound: self.options.play_sound,
                })
            }
            OutboundCommand::Start { instance_id } => {
                if !matches!(self.phase, Phase::AwaitingStart) {
                    warn!(instance_id = %instance_id, "stub_start_while_running_ignored");
                    return Ok(());
                }
                self.report.starts += 1;
                let game_id = Some(format!("game-{}", self.report.starts));
                self.send(&InboundEvent::Starting {
                    game_id: game_id.clone(),
                })?;
                self.send(&InboundEvent::Started { game_id })?;
                self.phase = Phase::Streaming {
                    next_step: 0,
                    next_at: Instant::now(),
                };
                Ok(())
            }
            OutboundCommand::Action {
                step_iter, action, ..
            } => {
                debug!(step_iter, ?action, "stub_action");
                self.report.actions.push((step_iter, action));
                Ok(())
            }
        }
    }

    fn advance_episode(&mut self, now: Instant) -> Result<(), StubError> {
        let Phase::Streaming { next_step, next_at } = self.phase else {
            return Ok(());
        };
        if now < next_at {
            return Ok(());
        }

        if next_step < self.options.steps_per_episode {
            let line = step_line(next_step, self.options.steps_per_episode);
            self.send_line(&line)?;
            self.phase = Phase::Streaming {
                next_step: next_step + 1,
                next_at: now + self.options.step_interval,
            };
            return Ok(());
        }

        self.send(&InboundEvent::Done)?;
        self.report.episodes_completed += 1;
        self.phase = if self.report.episodes_completed >= self.options.episodes {
            Phase::Finished
        } else {
            Phase::AwaitingStart
        };
        info!(episodes = self.report.episodes_completed, "stub_episode_done");
        Ok(())
    }

    fn reply_error(&mut self, line: &str, err: &WireError) -> Result<(), StubError> {
        warn!(error = %err, line = %line, "stub_malformed_command");
        self.report.malformed_lines += 1;
        self.send(&InboundEvent::Error(json!({ "message": err.to_string() })))
    }

    fn send(&mut self, event: &InboundEvent) -> Result<(), StubError> {
        self.send_line(&event.to_wire_line())
    }

    fn send_line(&mut self, line: &str) -> Result<(), StubError> {
        self.stream.write_all(&encode_line_payload(line))?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_lines(&mut self, out: &mut Vec<String>) -> Result<bool, StubError> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(bytes_read) => {
                    self.read_buf.extend_from_slice(&chunk[..bytes_read]);
                    drain_complete_lines(&mut self.read_buf, out);
                    if bytes_read < chunk.len() {
                        return Ok(true);
                    }
                }
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(true)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => return Ok(false),
                Err(err) => return Err(StubError::Io(err)),
            }
        }
    }
}

/// Step payload shaped like the production backend's, including its habit of
/// sending progress fields as formatted strings.
fn step_line(step: u32, steps_per_episode: u32) -> String {
    let fraction = f64::from(step + 1) / f64::from(steps_per_episode.max(1));
    let percent = (fraction * 100.0).round();
    let data: Value = json!({
        "step_iter": step,
        "obs": format!("frame {step}"),
        "reward": 1.0,
        "done": false,
        "score": step + 1,
        "task_complete": format!("{fraction:.2}"),
        "task_bonus": format!("{:.2}", fraction * 0.5),
        "task_info": [
            {
                "name": "Overall task completion",
                "state": format!("{percent}%"),
                "required": "100%",
            }
        ],
    });
    json!({ "event": "step", "data": data }).to_string()
}
