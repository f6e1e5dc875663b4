use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use envlink::{KeyCode, StickPosition};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConsoleCommand {
    Press(KeyCode),
    Release(KeyCode),
    /// Press then release.
    Tap(KeyCode),
    Ready,
    Joystick(StickPosition),
    JoystickStop,
    Status,
    Quit,
}

/// Parses one console line. Blank lines and `#` comments yield `Ok(None)`.
pub(crate) fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
    let rest = parts.collect::<Vec<_>>();
    let key_arg = |name: &str| -> Result<KeyCode, String> {
        match rest.as_slice() {
            [code] => code
                .parse::<KeyCode>()
                .map_err(|_| format!("invalid key code '{code}' for {name}")),
            _ => Err(format!("{name} takes exactly one key code")),
        }
    };
    let no_args = |command: ConsoleCommand| -> Result<ConsoleCommand, String> {
        if rest.is_empty() {
            Ok(command)
        } else {
            Err(format!("{verb} takes no arguments"))
        }
    };

    let command = match verb.as_str() {
        "press" | "down" => ConsoleCommand::Press(key_arg("press")?),
        "release" | "up" => ConsoleCommand::Release(key_arg("release")?),
        "tap" => ConsoleCommand::Tap(key_arg("tap")?),
        "joy" => match rest.as_slice() {
            [x, y] => ConsoleCommand::Joystick(StickPosition {
                x: x.parse::<f64>()
                    .map_err(|_| format!("invalid joystick x '{x}'"))?,
                y: y.parse::<f64>()
                    .map_err(|_| format!("invalid joystick y '{y}'"))?,
            }),
            _ => return Err("joy takes <x> <y>".to_string()),
        },
        "stop" => no_args(ConsoleCommand::JoystickStop)?,
        "ready" => no_args(ConsoleCommand::Ready)?,
        "status" => no_args(ConsoleCommand::Status)?,
        "quit" | "exit" => no_args(ConsoleCommand::Quit)?,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

/// Console lines forwarded from a reader thread. The thread only moves text;
/// parsing happens on the loop thread.
pub(crate) struct ConsoleInput {
    receiver: Receiver<String>,
    closed: bool,
}

impl ConsoleInput {
    pub(crate) fn spawn_stdin() -> Self {
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if sender.send(line).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "console_read_failed");
                            break;
                        }
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "console_thread_spawn_failed");
        }
        Self::from_receiver(receiver)
    }

    pub(crate) fn from_receiver(receiver: Receiver<String>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    /// Appends every command typed since the last call.
    pub(crate) fn drain(&mut self, out: &mut Vec<ConsoleCommand>) {
        if self.closed {
            return;
        }
        loop {
            match self.receiver.try_recv() {
                Ok(line) => match parse_console_command(&line) {
                    Ok(Some(command)) => out.push(command),
                    Ok(None) => {}
                    Err(message) => warn!(line = %line, message = %message, "console_command_rejected"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("console_input_closed");
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_and_session_commands() {
        assert_eq!(
            parse_console_command("press 32"),
            Ok(Some(ConsoleCommand::Press(32)))
        );
        assert_eq!(
            parse_console_command("  UP 39 "),
            Ok(Some(ConsoleCommand::Release(39)))
        );
        assert_eq!(parse_console_command("tap 37"), Ok(Some(ConsoleCommand::Tap(37))));
        assert_eq!(parse_console_command("ready"), Ok(Some(ConsoleCommand::Ready)));
        assert_eq!(
            parse_console_command("joy 30 -5.5"),
            Ok(Some(ConsoleCommand::Joystick(StickPosition { x: 30.0, y: -5.5 })))
        );
        assert_eq!(parse_console_command("# comment"), Ok(None));
        assert_eq!(parse_console_command(""), Ok(None));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_console_command("press").is_err());
        assert!(parse_console_command("press 99999").is_err());
        assert!(parse_console_command("ready now").is_err());
        assert!(parse_console_command("joy 1").is_err());
        assert!(parse_console_command("warp 9").is_err());
    }

    #[test]
    fn drain_skips_bad_lines_and_notices_close() {
        let (sender, receiver) = mpsc::channel();
        let mut input = ConsoleInput::from_receiver(receiver);
        sender.send("press 32".to_string()).expect("send");
        sender.send("bogus".to_string()).expect("send");
        sender.send("quit".to_string()).expect("send");
        drop(sender);

        let mut commands = Vec::new();
        input.drain(&mut commands);
        assert_eq!(commands, vec![ConsoleCommand::Press(32), ConsoleCommand::Quit]);
        assert!(input.closed);
        input.drain(&mut commands);
        assert_eq!(commands.len(), 2);
    }
}
