//! Newline-delimited JSON framing shared by the client and the stub backend.
//!
//! Inbound lines are `{"event": <name>, "data": <payload>}`; outbound lines are
//! `{"event": <name>, "args": [...]}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::keymap::Action;
use crate::observation::ObservationFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Step,
    Done,
    Error,
    CanStart,
    Starting,
    Started,
    ForceDisconnected,
    CountdownStart,
}

impl EventKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::Connected => "connect",
            EventKind::Disconnected => "disconnect",
            EventKind::Step => "step",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::CanStart => "can_start",
            EventKind::Starting => "starting",
            EventKind::Started => "started",
            EventKind::ForceDisconnected => "force_disconnected",
            EventKind::CountdownStart => "countdown_start",
        }
    }

    fn from_wire_name(name: &str) -> Option<Self> {
        let kind = match name {
            "connect" => EventKind::Connected,
            "disconnect" => EventKind::Disconnected,
            "step" => EventKind::Step,
            "done" => EventKind::Done,
            "error" => EventKind::Error,
            "can_start" => EventKind::CanStart,
            "starting" => EventKind::Starting,
            "started" => EventKind::Started,
            "force_disconnected" => EventKind::ForceDisconnected,
            "countdown_start" => EventKind::CountdownStart,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Disconnected { reason: String },
    Step(Box<ObservationFrame>),
    Done,
    Error(Value),
    CanStart,
    Starting { game_id: Option<String> },
    Started { game_id: Option<String> },
    ForceDisconnected { reason: String },
    CountdownStart { time: u32, play_sound: bool },
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Connected => EventKind::Connected,
            InboundEvent::Disconnected { .. } => EventKind::Disconnected,
            InboundEvent::Step(_) => EventKind::Step,
            InboundEvent::Done => EventKind::Done,
            InboundEvent::Error(_) => EventKind::Error,
            InboundEvent::CanStart => EventKind::CanStart,
            InboundEvent::Starting { .. } => EventKind::Starting,
            InboundEvent::Started { .. } => EventKind::Started,
            InboundEvent::ForceDisconnected { .. } => EventKind::ForceDisconnected,
            InboundEvent::CountdownStart { .. } => EventKind::CountdownStart,
        }
    }

    /// Encodes the event as a server would send it.
    pub fn to_wire_line(&self) -> String {
        let data = match self {
            InboundEvent::Connected | InboundEvent::Done | InboundEvent::CanStart => Value::Null,
            InboundEvent::Disconnected { reason } | InboundEvent::ForceDisconnected { reason } => {
                json!({ "reason": reason })
            }
            InboundEvent::Step(frame) => json!(frame),
            InboundEvent::Error(payload) => payload.clone(),
            InboundEvent::Starting { game_id } | InboundEvent::Started { game_id } => json!(game_id),
            InboundEvent::CountdownStart { time, play_sound } => {
                json!({ "time": time, "play_sound": play_sound })
            }
        };
        let mut message = json!({ "event": self.kind().wire_name() });
        if !data.is_null() {
            message["data"] = data;
        }
        message.to_string()
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed wire line: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("invalid payload for event '{event}': {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("outbound event '{0}' is missing its arguments")]
    MissingArgs(String),
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ReasonPayload {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct CountdownPayload {
    time: u32,
    #[serde(default)]
    play_sound: bool,
}

pub fn decode_inbound_line(raw: &str) -> Result<InboundEvent, WireError> {
    let message: InboundMessage =
        serde_json::from_str(raw.trim_end_matches(['\r', '\n'])).map_err(WireError::Malformed)?;
    let kind = EventKind::from_wire_name(&message.event)
        .ok_or_else(|| WireError::UnknownEvent(message.event.clone()))?;
    let payload_error = |source| WireError::Payload {
        event: kind.wire_name(),
        source,
    };

    let event = match kind {
        EventKind::Connected => InboundEvent::Connected,
        EventKind::Disconnected => {
            let payload: ReasonPayload = reason_payload(message.data).map_err(payload_error)?;
            InboundEvent::Disconnected {
                reason: payload.reason,
            }
        }
        EventKind::Step => {
            let frame = serde_json::from_value(message.data).map_err(payload_error)?;
            InboundEvent::Step(Box::new(frame))
        }
        EventKind::Done => InboundEvent::Done,
        EventKind::Error => InboundEvent::Error(message.data),
        EventKind::CanStart => InboundEvent::CanStart,
        EventKind::Starting => InboundEvent::Starting {
            game_id: game_id_of(&message.data),
        },
        EventKind::Started => InboundEvent::Started {
            game_id: game_id_of(&message.data),
        },
        EventKind::ForceDisconnected => {
            let payload: ReasonPayload = reason_payload(message.data).map_err(payload_error)?;
            InboundEvent::ForceDisconnected {
                reason: payload.reason,
            }
        }
        EventKind::CountdownStart => {
            let payload: CountdownPayload =
                serde_json::from_value(message.data).map_err(payload_error)?;
            InboundEvent::CountdownStart {
                time: payload.time,
                play_sound: payload.play_sound,
            }
        }
    };
    Ok(event)
}

fn reason_payload(data: Value) -> Result<ReasonPayload, serde_json::Error> {
    if data.is_null() {
        return Ok(ReasonPayload {
            reason: String::new(),
        });
    }
    serde_json::from_value(data)
}

fn game_id_of(data: &Value) -> Option<String> {
    match data {
        Value::Null => None,
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

/// Commands the client issues upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutboundCommand {
    SetupUser {
        instance_id: String,
        agent_key: String,
    },
    UserReady {
        instance_id: String,
        agent_key: String,
    },
    Start {
        instance_id: String,
    },
    Action {
        instance_id: String,
        agent_key: String,
        step_iter: i64,
        action: Action,
    },
}

impl OutboundCommand {
    pub fn wire_name(&self) -> &'static str {
        match self {
            OutboundCommand::SetupUser { .. } => "setup_user",
            OutboundCommand::UserReady { .. } => "user_ready",
            OutboundCommand::Start { .. } => "start",
            OutboundCommand::Action { .. } => "action",
        }
    }

    pub fn args(&self) -> Vec<Value> {
        match self {
            OutboundCommand::SetupUser {
                instance_id,
                agent_key,
            }
            | OutboundCommand::UserReady {
                instance_id,
                agent_key,
            } => vec![json!(instance_id), json!(agent_key)],
            OutboundCommand::Start { instance_id } => vec![json!(instance_id)],
            OutboundCommand::Action {
                instance_id,
                agent_key,
                step_iter,
                action,
            } => vec![
                json!(instance_id),
                json!(agent_key),
                json!(step_iter),
                json!(action),
            ],
        }
    }

    /// Parses a client line back into a typed command, as the backend does.
    pub fn decode_line(raw: &str) -> Result<Self, WireError> {
        let (event, args) = decode_outbound_line(raw)?;
        let missing = || WireError::MissingArgs(event.clone());
        let text = |index: usize| -> Result<String, WireError> {
            args.get(index)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(missing)
        };
        let command = match event.as_str() {
            "setup_user" => OutboundCommand::SetupUser {
                instance_id: text(0)?,
                agent_key: text(1)?,
            },
            "user_ready" => OutboundCommand::UserReady {
                instance_id: text(0)?,
                agent_key: text(1)?,
            },
            "start" => OutboundCommand::Start {
                instance_id: text(0)?,
            },
            "action" => {
                let step_iter = args.get(2).and_then(Value::as_i64).ok_or_else(missing)?;
                let action = args.get(3).cloned().ok_or_else(missing)?;
                OutboundCommand::Action {
                    instance_id: text(0)?,
                    agent_key: text(1)?,
                    step_iter,
                    action: serde_json::from_value(action).map_err(|source| {
                        WireError::Payload {
                            event: "action",
                            source,
                        }
                    })?,
                }
            }
            _ => return Err(WireError::UnknownEvent(event.clone())),
        };
        Ok(command)
    }
}

pub fn encode_outbound_line(event: &str, args: &[Value]) -> String {
    json!({ "event": event, "args": args }).to_string()
}

#[derive(Debug, Deserialize)]
struct OutboundMessage {
    event: String,
    #[serde(default)]
    args: Vec<Value>,
}

pub fn decode_outbound_line(raw: &str) -> Result<(String, Vec<Value>), WireError> {
    let message: OutboundMessage =
        serde_json::from_str(raw.trim_end_matches(['\r', '\n'])).map_err(WireError::Malformed)?;
    Ok((message.event, message.args))
}

/// Moves every complete line out of `buffer`, leaving a partial tail behind.
pub fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop(); // newline
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        if line_bytes.is_empty() {
            continue;
        }

        match String::from_utf8(line_bytes) {
            Ok(line) => out.push(line),
            Err(err) => warn!(error = %err, "wire_invalid_utf8_line_dropped"),
        }
    }
}

pub fn encode_line_payload(line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_complete_lines_handles_crlf_and_partial_tail() {
        let mut buffer = b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\"".to_vec();
        let mut out = Vec::new();
        drain_complete_lines(&mut buffer, &mut out);
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(buffer, b"{\"c\"".to_vec());
    }

    #[test]
    fn decodes_every_inbound_event_name() {
        let cases = [
            (r#"{"event":"connect"}"#, EventKind::Connected),
            (r#"{"event":"done"}"#, EventKind::Done),
            (r#"{"event":"can_start"}"#, EventKind::CanStart),
            (r#"{"event":"starting","data":"g-1"}"#, EventKind::Starting),
            (r#"{"event":"started","data":"g-1"}"#, EventKind::Started),
            (r#"{"event":"error","data":{"error":"WrongAction"}}"#, EventKind::Error),
            (r#"{"event":"step","data":{"step_iter":3}}"#, EventKind::Step),
            (
                r#"{"event":"force_disconnected","data":{"reason":"duplicate"}}"#,
                EventKind::ForceDisconnected,
            ),
            (
                r#"{"event":"countdown_start","data":{"time":5,"play_sound":true}}"#,
                EventKind::CountdownStart,
            ),
        ];
        for (line, kind) in cases {
            let event = decode_inbound_line(line).expect(line);
            assert_eq!(event.kind(), kind, "{line}");
        }
    }

    #[test]
    fn payloads_are_carried_through() {
        assert_eq!(
            decode_inbound_line("{\"event\":\"started\",\"data\":\"abc\"}\r\n").expect("started"),
            InboundEvent::Started {
                game_id: Some("abc".to_string())
            }
        );
        assert_eq!(
            decode_inbound_line(r#"{"event":"countdown_start","data":{"time":0}}"#)
                .expect("countdown"),
            InboundEvent::CountdownStart {
                time: 0,
                play_sound: false
            }
        );
        assert_eq!(
            decode_inbound_line(r#"{"event":"force_disconnected","data":{"reason":"policy"}}"#)
                .expect("fault"),
            InboundEvent::ForceDisconnected {
                reason: "policy".to_string()
            }
        );
    }

    #[test]
    fn rejects_garbage_unknown_and_bad_payloads() {
        assert!(matches!(
            decode_inbound_line("not json"),
            Err(WireError::Malformed(_))
        ));
        assert!(matches!(
            decode_inbound_line(r#"{"event":"change_agents"}"#),
            Err(WireError::UnknownEvent(name)) if name == "change_agents"
        ));
        assert!(matches!(
            decode_inbound_line(r#"{"event":"countdown_start","data":{"time":-2}}"#),
            Err(WireError::Payload { event: "countdown_start", .. })
        ));
    }

    #[test]
    fn server_encoding_decodes_back() {
        let events = [
            InboundEvent::Connected,
            InboundEvent::Done,
            InboundEvent::Starting { game_id: None },
            InboundEvent::CountdownStart {
                time: 3,
                play_sound: true,
            },
            InboundEvent::ForceDisconnected {
                reason: "duplicate session".to_string(),
            },
        ];
        for event in events {
            assert_eq!(decode_inbound_line(&event.to_wire_line()).expect("decode"), event);
        }
    }

    #[test]
    fn outbound_action_line_has_positional_args() {
        let command = OutboundCommand::Action {
            instance_id: "inst-1".to_string(),
            agent_key: "game_0>player_0".to_string(),
            step_iter: 17,
            action: Action::Discrete(4),
        };
        let line = encode_outbound_line(command.wire_name(), &command.args());
        assert_eq!(
            line,
            r#"{"args":["inst-1","game_0>player_0",17,4],"event":"action"}"#
        );
        assert_eq!(OutboundCommand::decode_line(&line).expect("decode"), command);
    }

    #[test]
    fn outbound_decode_reports_missing_args() {
        let line = encode_outbound_line("user_ready", &[json!("inst-1")]);
        assert!(matches!(
            OutboundCommand::decode_line(&line),
            Err(WireError::MissingArgs(event)) if event == "user_ready"
        ));
    }
}
