mod atomic_io;
pub mod countdown;
pub mod input;
pub mod joystick;
pub mod keymap;
pub mod observation;
pub mod observers;
pub mod session;
pub mod setup;
pub mod transport;
pub mod wire;

pub use countdown::{Countdown, CountdownPoll, BETWEEN_ROUNDS_SECONDS, COUNTDOWN_TICK};
pub use input::{ActiveKeySet, KeyCatcher, KeyCode, KeyEdge};
pub use joystick::{JoystickMapping, StickPosition};
pub use keymap::{map_keys, Action, KeyCombo, Keymap, KeymapError, KeymapRegistry, DEFAULT_KEYMAP_ID};
pub use observation::{ObservationFrame, TaskInfoEntry, NO_STEP};
pub use observers::{Observers, SubscriptionId};
pub use session::{EnvironmentSession, EnvironmentState, SessionSignal, SessionView, SignalKind};
pub use setup::{
    ContextOverrides, EnvironmentInstance, SessionContext, SessionSetupDetails, SetupError,
    UiLayoutOptions,
};
pub use transport::{
    ConnectOptions, EnvChannel, LinkStatus, LoopbackTransport, TcpTransport, Transport,
    TransportError, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_MS,
};
pub use wire::{
    decode_inbound_line, decode_outbound_line, drain_complete_lines, encode_line_payload,
    encode_outbound_line, EventKind, InboundEvent, OutboundCommand, WireError,
};
