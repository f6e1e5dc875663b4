use std::fmt;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::countdown::{Countdown, CountdownPoll, BETWEEN_ROUNDS_SECONDS};
use crate::keymap::Action;
use crate::observation::ObservationFrame;
use crate::observers::{Observers, SubscriptionId};
use crate::setup::EnvironmentInstance;
use crate::transport::{EnvChannel, Transport};
use crate::wire::{InboundEvent, OutboundCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentState {
    NotReady,
    Ready,
    Countdown,
    CountdownDone,
    Starting,
    Started,
    EpisodeEnded,
    InstanceEnded,
    Fault,
}

impl EnvironmentState {
    /// Only Fault absorbs every later event.
    pub fn is_terminal(self) -> bool {
        self == EnvironmentState::Fault
    }

    /// No further episodes will run: the instance ended or faulted.
    pub fn is_finished(self) -> bool {
        matches!(self, EnvironmentState::Fault | EnvironmentState::InstanceEnded)
    }

    pub fn accepts_input(self) -> bool {
        self == EnvironmentState::Started
    }

    pub fn label(self) -> &'static str {
        match self {
            EnvironmentState::NotReady => "not_ready",
            EnvironmentState::Ready => "ready",
            EnvironmentState::Countdown => "countdown",
            EnvironmentState::CountdownDone => "countdown_done",
            EnvironmentState::Starting => "starting",
            EnvironmentState::Started => "started",
            EnvironmentState::EpisodeEnded => "episode_ended",
            EnvironmentState::InstanceEnded => "instance_ended",
            EnvironmentState::Fault => "fault",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    StateChanged,
    TaskDone,
    CountdownStarted,
    CountdownTick,
    PlaySound,
    Fault,
    ServerError,
}

/// Lifecycle notifications published by the session to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    StateChanged {
        from: EnvironmentState,
        to: EnvironmentState,
    },
    TaskDone,
    CountdownStarted {
        seconds: u32,
    },
    CountdownTick {
        remaining: u32,
    },
    PlaySound,
    Fault {
        reason: String,
    },
    ServerError(Value),
}

impl SessionSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            SessionSignal::StateChanged { .. } => SignalKind::StateChanged,
            SessionSignal::TaskDone => SignalKind::TaskDone,
            SessionSignal::CountdownStarted { .. } => SignalKind::CountdownStarted,
            SessionSignal::CountdownTick { .. } => SignalKind::CountdownTick,
            SessionSignal::PlaySound => SignalKind::PlaySound,
            SessionSignal::Fault { .. } => SignalKind::Fault,
            SessionSignal::ServerError(_) => SignalKind::ServerError,
        }
    }
}

/// Read-only view handed to the rendering layer.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub state: EnvironmentState,
    pub frame: &'a ObservationFrame,
    pub countdown: Option<u32>,
}

/// Lifecycle of one environment instance as seen by one agent.
///
/// Owns the current state, the latest observation frame and the between-round
/// countdown. Commands go out through the [`EnvChannel`] passed to each call;
/// the session never touches connection state itself.
pub struct EnvironmentSession {
    instance: EnvironmentInstance,
    state: EnvironmentState,
    frame: ObservationFrame,
    countdown: Countdown,
    game_id: Option<String>,
    signals: Observers<SignalKind, SessionSignal>,
}

impl EnvironmentSession {
    pub fn new(instance: EnvironmentInstance) -> Self {
        Self {
            instance,
            state: EnvironmentState::NotReady,
            frame: ObservationFrame::placeholder(),
            countdown: Countdown::default(),
            game_id: None,
            signals: Observers::default(),
        }
    }

    pub fn instance(&self) -> &EnvironmentInstance {
        &self.instance
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    pub fn frame(&self) -> &ObservationFrame {
        &self.frame
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    pub fn snapshot(&self) -> SessionView<'_> {
        SessionView {
            state: self.state,
            frame: &self.frame,
            countdown: self.countdown.remaining(),
        }
    }

    pub fn subscribe<F>(&mut self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionSignal) + 'static,
    {
        self.signals.subscribe(kind, handler)
    }

    pub fn subscribe_any<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionSignal) + 'static,
    {
        self.signals.subscribe_any(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.signals.unsubscribe(id)
    }

    pub fn handle_event<T: Transport>(
        &mut self,
        event: &InboundEvent,
        channel: &mut EnvChannel<T>,
        now: Instant,
    ) {
        if self.state.is_terminal() {
            debug!(state = %self.state, event = ?event.kind(), "session_event_after_terminal_ignored");
            return;
        }
        if self.state == EnvironmentState::InstanceEnded
            && !matches!(event, InboundEvent::ForceDisconnected { .. })
        {
            debug!(event = ?event.kind(), "session_event_after_instance_end_ignored");
            return;
        }

        match event {
            InboundEvent::Connected => {
                channel.send(&OutboundCommand::SetupUser {
                    instance_id: self.instance.instance_id.clone(),
                    agent_key: self.instance.agent_key.clone(),
                });
                info!(
                    instance_id = %self.instance.instance_id,
                    agent_key = %self.instance.agent_key,
                    "session_setup_user_sent"
                );
            }
            InboundEvent::Starting { game_id } => {
                self.game_id = game_id.clone();
                self.countdown.cancel();
                self.transition(EnvironmentState::Starting);
            }
            InboundEvent::Started { game_id } => {
                if self.state != EnvironmentState::Starting {
                    debug!(state = %self.state, "session_started_outside_starting_ignored");
                    return;
                }
                if game_id.is_some() {
                    self.game_id = game_id.clone();
                }
                info!(game_id = ?self.game_id, "session_episode_started");
                self.transition(EnvironmentState::Started);
            }
            InboundEvent::Step(frame) => {
                if self.state != EnvironmentState::Started {
                    debug!(state = %self.state, step_iter = frame.step_iter, "session_stale_step_dropped");
                    return;
                }
                self.frame = (**frame).clone();
                channel.set_step_iter(self.frame.step_iter);
                if self.frame.task_done() {
                    self.signal(SessionSignal::TaskDone);
                }
            }
            InboundEvent::Done => {
                if self.state != EnvironmentState::Started {
                    debug!(state = %self.state, "session_done_outside_episode_ignored");
                    return;
                }
                info!(score = ?self.frame.score, "session_episode_done");
                self.frame = self.frame.carried_forward();
                self.transition(EnvironmentState::Countdown);
                self.begin_countdown(BETWEEN_ROUNDS_SECONDS, now);
            }
            InboundEvent::CountdownStart { time, play_sound } => {
                if *play_sound {
                    self.signal(SessionSignal::PlaySound);
                }
                if *time > 0 {
                    self.transition(EnvironmentState::Countdown);
                    self.begin_countdown(*time, now);
                } else {
                    self.countdown.cancel();
                    self.transition(EnvironmentState::CountdownDone);
                    self.start(channel);
                }
            }
            InboundEvent::ForceDisconnected { reason } => {
                warn!(reason = %reason, "session_force_disconnected");
                self.countdown.cancel();
                self.transition(EnvironmentState::Fault);
                self.signal(SessionSignal::Fault {
                    reason: reason.clone(),
                });
                self.signal(SessionSignal::TaskDone);
            }
            InboundEvent::Disconnected { reason } => {
                info!(reason = %reason, "session_link_closed");
                self.countdown.cancel();
                self.transition(EnvironmentState::InstanceEnded);
            }
            InboundEvent::Error(payload) => {
                warn!(payload = %payload, "session_server_error");
                self.signal(SessionSignal::ServerError(payload.clone()));
            }
            InboundEvent::CanStart => debug!("session_can_start"),
        }
    }

    /// The user's ready control. Only meaningful before setup completes.
    pub fn press_ready<T: Transport>(&mut self, channel: &mut EnvChannel<T>) -> bool {
        if self.state != EnvironmentState::NotReady {
            debug!(state = %self.state, "session_ready_ignored");
            return false;
        }
        channel.send(&OutboundCommand::UserReady {
            instance_id: self.instance.instance_id.clone(),
            agent_key: self.instance.agent_key.clone(),
        });
        self.transition(EnvironmentState::Ready);
        true
    }

    /// Asks the backend to start the next episode.
    pub fn start<T: Transport>(&mut self, channel: &mut EnvChannel<T>) {
        info!(instance_id = %self.instance.instance_id, "session_start_sent");
        channel.send(&OutboundCommand::Start {
            instance_id: self.instance.instance_id.clone(),
        });
    }

    /// Sends `action` if an episode is running; otherwise drops it.
    pub fn submit_action<T: Transport>(
        &mut self,
        action: &Action,
        channel: &mut EnvChannel<T>,
    ) -> bool {
        if !self.state.accepts_input() {
            debug!(state = %self.state, "session_action_outside_episode_dropped");
            return false;
        }
        channel.send_action(&self.instance.instance_id, &self.instance.agent_key, action);
        true
    }

    pub fn poll_countdown<T: Transport>(&mut self, now: Instant, channel: &mut EnvChannel<T>) {
        match self.countdown.poll(now) {
            CountdownPoll::Idle => {}
            CountdownPoll::Ticked(remaining) => {
                self.signal(SessionSignal::CountdownTick { remaining });
            }
            CountdownPoll::Elapsed => {
                if self.state != EnvironmentState::Countdown {
                    debug!(state = %self.state, "session_countdown_elapsed_outside_countdown");
                    return;
                }
                self.transition(EnvironmentState::CountdownDone);
                self.start(channel);
            }
        }
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.remaining()
    }

    fn begin_countdown(&mut self, seconds: u32, now: Instant) {
        self.countdown.arm(seconds, now);
        self.signal(SessionSignal::CountdownStarted { seconds });
    }

    fn transition(&mut self, to: EnvironmentState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(from = %from, to = %to, "session_state_changed");
        self.signal(SessionSignal::StateChanged { from, to });
    }

    fn signal(&mut self, signal: SessionSignal) {
        self.signals.emit(signal.kind(), &signal);
    }
}
