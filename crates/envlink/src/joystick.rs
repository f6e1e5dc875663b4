use crate::keymap::Action;

/// Stick travel below this, per axis, counts as centered.
pub const DISCRETE_DEAD_ZONE: f64 = 20.0;
pub const CONTINUOUS_GAIN: f64 = 0.02;

const NOOP: i64 = 0;
const UP: i64 = 1;
const RIGHT: i64 = 2;
const LEFT: i64 = 3;

/// Stick offset from center; `y` grows upward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoystickMapping {
    /// Atari-style four-way stick.
    Discrete { dead_zone: f64 },
    /// Single continuous torque axis.
    Continuous { gain: f64 },
}

impl JoystickMapping {
    /// Picks the mapping for the first joystick layout in `ui_layout`.
    pub fn for_layout<S: AsRef<str>>(ui_layout: &[S]) -> Option<Self> {
        ui_layout.iter().find_map(|layout| match layout.as_ref() {
            "atari_joystick" => Some(JoystickMapping::Discrete {
                dead_zone: DISCRETE_DEAD_ZONE,
            }),
            "pendulum" => Some(JoystickMapping::Continuous {
                gain: CONTINUOUS_GAIN,
            }),
            _ => None,
        })
    }

    pub fn on_move(&self, stick: StickPosition) -> Action {
        match *self {
            JoystickMapping::Discrete { dead_zone } => {
                // Later checks win, so a dominant upward push beats sideways.
                let mut code = NOOP;
                if stick.x > dead_zone && stick.x > stick.y {
                    code = RIGHT;
                }
                if stick.x < -dead_zone && -stick.x > stick.y {
                    code = LEFT;
                }
                if stick.y > dead_zone && stick.y > stick.x.abs() {
                    code = UP;
                }
                Action::Discrete(code)
            }
            JoystickMapping::Continuous { gain } => Action::Continuous(vec![gain * stick.x]),
        }
    }

    pub fn on_stop(&self) -> Action {
        match self {
            JoystickMapping::Discrete { .. } => Action::Discrete(NOOP),
            JoystickMapping::Continuous { .. } => Action::Continuous(vec![0.0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stick(x: f64, y: f64) -> StickPosition {
        StickPosition { x, y }
    }

    #[test]
    fn layout_selects_mapping() {
        assert_eq!(
            JoystickMapping::for_layout(&["atari", "keycatcher"]),
            None
        );
        assert!(matches!(
            JoystickMapping::for_layout(&["atari_joystick"]),
            Some(JoystickMapping::Discrete { .. })
        ));
        assert!(matches!(
            JoystickMapping::for_layout(&["pendulum".to_string()]),
            Some(JoystickMapping::Continuous { .. })
        ));
    }

    #[test]
    fn discrete_directions_and_dead_zone() {
        let mapping = JoystickMapping::for_layout(&["atari_joystick"]).expect("mapping");
        assert_eq!(mapping.on_move(stick(50.0, 0.0)), Action::Discrete(RIGHT));
        assert_eq!(mapping.on_move(stick(-50.0, 10.0)), Action::Discrete(LEFT));
        assert_eq!(mapping.on_move(stick(10.0, 60.0)), Action::Discrete(UP));
        assert_eq!(mapping.on_move(stick(40.0, 45.0)), Action::Discrete(UP));
        assert_eq!(mapping.on_move(stick(15.0, -15.0)), Action::Discrete(NOOP));
        assert_eq!(mapping.on_move(stick(0.0, -80.0)), Action::Discrete(NOOP));
        assert_eq!(mapping.on_stop(), Action::Discrete(NOOP));
    }

    #[test]
    fn continuous_scales_horizontal_axis() {
        let mapping = JoystickMapping::Continuous { gain: 0.5 };
        assert_eq!(mapping.on_move(stick(4.0, 99.0)), Action::Continuous(vec![2.0]));
        assert_eq!(mapping.on_stop(), Action::Continuous(vec![0.0]));
    }
}
