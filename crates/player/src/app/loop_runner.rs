use std::cell::RefCell;
use std::io::{self, Write};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Instant;

use envlink::{
    EnvChannel, EnvironmentSession, EnvironmentState, InboundEvent, KeyEdge, KeymapRegistry,
    SessionSetupDetails, SessionSignal, Transport,
};
use tracing::{debug, error, info, warn};

use super::bootstrap::{AppWiring, PlayerConfig, PlayerError};
use super::console_input::{ConsoleCommand, ConsoleInput};
use super::controls::Controls;
use super::status::{render_signal, render_view, StatusFormat};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunOutcome {
    pub(crate) final_state: EnvironmentState,
    pub(crate) steps_seen: u64,
    pub(crate) actions_sent: u64,
    pub(crate) episodes: u32,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let console = ConsoleInput::spawn_stdin();
    let mut stdout = io::stdout();
    match run_session(app, console, &mut stdout) {
        Ok(outcome) if outcome.final_state == EnvironmentState::Fault => {
            warn!(steps = outcome.steps_seen, "player_ended_in_fault");
            ExitCode::FAILURE
        }
        Ok(outcome) => {
            info!(
                state = %outcome.final_state,
                steps = outcome.steps_seen,
                actions = outcome.actions_sent,
                episodes = outcome.episodes,
                "player_finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "player_failed");
            ExitCode::FAILURE
        }
    }
}

/// Drives one session until the instance ends, faults or the user quits.
/// The context is saved however the session exits.
pub(crate) fn run_session<W: Write>(
    app: AppWiring,
    console: ConsoleInput,
    out: &mut W,
) -> Result<RunOutcome, PlayerError> {
    let AppWiring {
        config,
        setup,
        context,
        registry,
    } = app;
    let result = drive_session(&config, &setup, registry, console, out);
    if let Some(path) = &config.context_file {
        if let Err(err) = context.save(path) {
            warn!(error = %err, "player_context_save_failed");
        }
    }
    result
}

/// Each pass pumps the channel (which waits at most the poll interval), feeds
/// every event to the session, polls the countdown and applies console
/// commands, all on this thread.
fn drive_session<W: Write>(
    config: &PlayerConfig,
    setup: &SessionSetupDetails,
    registry: KeymapRegistry,
    mut console: ConsoleInput,
    out: &mut W,
) -> Result<RunOutcome, PlayerError> {
    let mut controls = Controls::new(registry, setup)?;
    if let Some(message) = &setup.initial_message {
        writeln!(out, "{message}")?;
    }

    let mut channel = EnvChannel::connect(&config.server_addr, config.connect)?;
    let mut session = EnvironmentSession::new(setup.env.clone());
    let signals = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&signals);
    session.subscribe_any(move |signal: &SessionSignal| sink.borrow_mut().push(signal.clone()));

    let mut outcome = RunOutcome {
        final_state: session.state(),
        steps_seen: 0,
        actions_sent: 0,
        episodes: 0,
    };
    let mut commands = Vec::new();

    'session: loop {
        for event in channel.pump() {
            match &event {
                InboundEvent::Step(_) => outcome.steps_seen += 1,
                InboundEvent::Done if session.state() == EnvironmentState::Started => {
                    outcome.episodes += 1
                }
                _ => {}
            }
            session.handle_event(&event, &mut channel, Instant::now());
            if config.auto_ready && event == InboundEvent::Connected {
                session.press_ready(&mut channel);
            }
        }
        session.poll_countdown(Instant::now(), &mut channel);

        console.drain(&mut commands);
        for command in commands.drain(..) {
            if command == ConsoleCommand::Quit {
                info!("player_quit_requested");
                break 'session;
            }
            if apply_command(command, &mut controls, &mut session, &mut channel) {
                outcome.actions_sent += 1;
            }
            if command == ConsoleCommand::Status {
                writeln!(out, "{}", render_view(&session.snapshot(), config.status_format))?;
            }
        }

        let pending = std::mem::take(&mut *signals.borrow_mut());
        write_signals(out, &pending, &session, config.status_format)?;

        if session.state().is_finished() {
            break;
        }
    }

    outcome.final_state = session.state();
    controls.shutdown();
    channel.destroy();
    Ok(outcome)
}

/// Applies one console command. Returns true when an action went upstream.
fn apply_command<T: Transport>(
    command: ConsoleCommand,
    controls: &mut Controls,
    session: &mut EnvironmentSession,
    channel: &mut EnvChannel<T>,
) -> bool {
    let actions = match command {
        ConsoleCommand::Press(code) => vec![controls.key_edge(KeyEdge::Pressed(code))],
        ConsoleCommand::Release(code) => vec![controls.key_edge(KeyEdge::Released(code))],
        ConsoleCommand::Tap(code) => vec![
            controls.key_edge(KeyEdge::Pressed(code)),
            controls.key_edge(KeyEdge::Released(code)),
        ],
        ConsoleCommand::Joystick(stick) => vec![controls.joystick_move(stick)],
        ConsoleCommand::JoystickStop => vec![controls.joystick_stop()],
        ConsoleCommand::Ready => {
            session.press_ready(channel);
            return false;
        }
        ConsoleCommand::Status | ConsoleCommand::Quit => return false,
    };

    let mut sent = false;
    for action in actions.into_iter().flatten() {
        sent |= session.submit_action(&action, channel);
    }
    if !sent {
        debug!(?command, state = %session.state(), "player_command_produced_no_action");
    }
    sent
}

fn write_signals<W: Write>(
    out: &mut W,
    signals: &[SessionSignal],
    session: &EnvironmentSession,
    format: StatusFormat,
) -> io::Result<()> {
    let mut state_changed = false;
    for signal in signals {
        if matches!(signal, SessionSignal::StateChanged { .. }) {
            state_changed = true;
        } else if let Some(line) = render_signal(signal, format) {
            writeln!(out, "{line}")?;
        }
    }
    if state_changed {
        writeln!(out, "{}", render_view(&session.snapshot(), format))?;
    }
    Ok(())
}
