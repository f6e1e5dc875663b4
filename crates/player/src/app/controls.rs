use envlink::{
    map_keys, Action, JoystickMapping, KeyCatcher, KeyEdge, KeymapError, KeymapRegistry,
    SessionSetupDetails, StickPosition,
};
use tracing::{debug, info};

/// Turns raw key edges and joystick moves into actions for the configured
/// keymap and layout.
pub(crate) struct Controls {
    catcher: KeyCatcher,
    registry: KeymapRegistry,
    keymap_id: String,
    joystick: Option<JoystickMapping>,
}

impl Controls {
    pub(crate) fn new(
        registry: KeymapRegistry,
        setup: &SessionSetupDetails,
    ) -> Result<Self, KeymapError> {
        let keymap_id = setup.keymap_id().to_string();
        registry.require(&keymap_id)?;
        let joystick = JoystickMapping::for_layout(&setup.ui_layout);
        info!(keymap = %keymap_id, joystick = ?joystick, "controls_ready");

        let mut catcher = KeyCatcher::new();
        catcher.install_handlers();
        Ok(Self {
            catcher,
            registry,
            keymap_id,
            joystick,
        })
    }

    pub(crate) fn key_edge(&mut self, edge: KeyEdge) -> Option<Action> {
        let keys = self.catcher.handle_edge(edge)?;
        map_keys(keys, &self.keymap_id, &self.registry)
    }

    pub(crate) fn joystick_move(&self, stick: StickPosition) -> Option<Action> {
        match self.joystick {
            Some(mapping) => Some(mapping.on_move(stick)),
            None => {
                debug!("joystick_input_without_joystick_layout");
                None
            }
        }
    }

    pub(crate) fn joystick_stop(&self) -> Option<Action> {
        self.joystick.map(|mapping| mapping.on_stop())
    }

    pub(crate) fn shutdown(&mut self) {
        self.catcher.destroy();
    }
}
