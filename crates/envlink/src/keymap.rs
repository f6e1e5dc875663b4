use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::input::{ActiveKeySet, KeyCode};

pub const DEFAULT_KEYMAP_ID: &str = "default";

const KEY_SPACE: KeyCode = 32;
const KEY_LEFT: KeyCode = 37;
const KEY_UP: KeyCode = 38;
const KEY_RIGHT: KeyCode = 39;
const KEY_DOWN: KeyCode = 40;
const KEY_A: KeyCode = 65;
const KEY_Q: KeyCode = 81;
/// Field name the multi-agent Atari environments expect inside each agent's
/// dict action.
const GAME_ACTION_KEY: &str = "game";

/// Canonical, order-independent key combination: ascending and deduplicated.
/// Serialized as comma-separated codes, `""` for the empty combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombo(Vec<KeyCode>);

impl KeyCombo {
    pub fn new<I: IntoIterator<Item = KeyCode>>(codes: I) -> Self {
        let set: BTreeSet<KeyCode> = codes.into_iter().collect();
        Self(set.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn codes(&self) -> &[KeyCode] {
        &self.0
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, code) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{code}")?;
        }
        Ok(())
    }
}

impl FromStr for KeyCombo {
    type Err = KeymapError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let mut codes = Vec::new();
        for part in trimmed.split(',') {
            let code = part
                .trim()
                .parse::<KeyCode>()
                .map_err(|_| KeymapError::InvalidCombo {
                    raw: raw.to_string(),
                })?;
            codes.push(code);
        }
        Ok(Self::new(codes))
    }
}

impl TryFrom<String> for KeyCombo {
    type Error = KeymapError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<KeyCombo> for String {
    fn from(combo: KeyCombo) -> Self {
        combo.to_string()
    }
}

/// An action as the backend's `env.step()` expects it for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    Discrete(i64),
    Continuous(Vec<f64>),
    Record(BTreeMap<String, i64>),
}

impl Action {
    /// Selects what to send for `agent_key`. A record holding an entry for the
    /// agent yields that entry; any other record is the agent's own dict
    /// action and is sent whole.
    pub fn for_agent(&self, agent_key: &str) -> Action {
        match self {
            Action::Record(entries) => match entries.get(agent_key) {
                Some(value) => Action::Discrete(*value),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeymapError {
    #[error("invalid key combination '{raw}' (expected comma-separated key codes)")]
    InvalidCombo { raw: String },
    #[error("keymap '{keymap}' maps combination '{combo}' containing key {code} outside its relevant keys")]
    ComboOutsideRelevantKeys {
        keymap: String,
        combo: KeyCombo,
        code: KeyCode,
    },
    #[error("unknown keymap '{0}'")]
    UnknownKeymap(String),
    #[error("failed to read keymap file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse keymap file {path} at {field}: {message}")]
    Parse {
        path: PathBuf,
        field: String,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawKeymap {
    relevant_keys: Vec<KeyCode>,
    combos: BTreeMap<KeyCombo, Action>,
}

/// One environment's combination table plus the allow-list of keys it reacts to.
#[derive(Debug, Clone, PartialEq)]
pub struct Keymap {
    relevant_keys: BTreeSet<KeyCode>,
    combos: BTreeMap<KeyCombo, Action>,
}

impl Keymap {
    pub fn new(
        id: &str,
        relevant_keys: impl IntoIterator<Item = KeyCode>,
        combos: BTreeMap<KeyCombo, Action>,
    ) -> Result<Self, KeymapError> {
        let relevant_keys: BTreeSet<KeyCode> = relevant_keys.into_iter().collect();
        for combo in combos.keys() {
            if let Some(code) = combo
                .codes()
                .iter()
                .copied()
                .find(|code| !relevant_keys.contains(code))
            {
                return Err(KeymapError::ComboOutsideRelevantKeys {
                    keymap: id.to_string(),
                    combo: combo.clone(),
                    code,
                });
            }
        }
        Ok(Self {
            relevant_keys,
            combos,
        })
    }

    pub fn relevant_keys(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.relevant_keys.iter().copied()
    }

    pub fn combo_for(&self, active: &ActiveKeySet) -> KeyCombo {
        KeyCombo::new(active.iter().filter(|code| self.relevant_keys.contains(code)))
    }

    /// Exact-match lookup of the relevant part of `active`; no partial or
    /// nearest match.
    pub fn action_for(&self, active: &ActiveKeySet) -> Option<&Action> {
        self.combos.get(&self.combo_for(active))
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeymapRegistry {
    keymaps: BTreeMap<String, Keymap>,
}

impl KeymapRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for (id, relevant, entries) in builtin_tables() {
            let combos = entries
                .into_iter()
                .map(|(codes, action)| (KeyCombo::new(codes.iter().copied()), action))
                .collect();
            match Keymap::new(id, relevant.iter().copied(), combos) {
                Ok(keymap) => {
                    registry.keymaps.insert(id.to_string(), keymap);
                }
                Err(error) => warn!(keymap = id, error = %error, "builtin_keymap_rejected"),
            }
        }
        registry
    }

    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, KeymapError> {
        let deserializer = &mut serde_json::Deserializer::from_str(raw);
        let parsed: BTreeMap<String, RawKeymap> = serde_path_to_error::deserialize(deserializer)
            .map_err(|error| KeymapError::Parse {
                path: origin.to_path_buf(),
                field: error.path().to_string(),
                message: error.inner().to_string(),
            })?;

        let mut registry = Self::default();
        for (id, raw_keymap) in parsed {
            let keymap = Keymap::new(&id, raw_keymap.relevant_keys, raw_keymap.combos)?;
            registry.keymaps.insert(id, keymap);
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, KeymapError> {
        let raw = fs::read_to_string(path).map_err(|source| KeymapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, path)
    }

    /// Adds or replaces keymaps from `other`.
    pub fn merge(&mut self, other: KeymapRegistry) {
        for (id, keymap) in other.keymaps {
            debug!(keymap = %id, "keymap_registered");
            self.keymaps.insert(id, keymap);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Keymap> {
        self.keymaps.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&Keymap, KeymapError> {
        self.get(id)
            .ok_or_else(|| KeymapError::UnknownKeymap(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.keymaps.keys().map(String::as_str)
    }
}

/// Maps the active keys to an action with the keymap named `keymap_id`.
/// `None` means nothing should be sent.
pub fn map_keys(
    active: &ActiveKeySet,
    keymap_id: &str,
    registry: &KeymapRegistry,
) -> Option<Action> {
    let Some(keymap) = registry.get(keymap_id) else {
        warn!(keymap = keymap_id, "keymap_unknown_input_dropped");
        return None;
    };
    let action = keymap.action_for(active).cloned();
    if action.is_none() {
        debug!(
            keymap = keymap_id,
            combo = %keymap.combo_for(active),
            "key_combo_unmapped"
        );
    }
    action
}

type BuiltinTable = (&'static str, &'static [KeyCode], Vec<(&'static [KeyCode], Action)>);

fn discrete(entries: &[(&'static [KeyCode], i64)]) -> Vec<(&'static [KeyCode], Action)> {
    entries
        .iter()
        .map(|(codes, value)| (*codes, Action::Discrete(*value)))
        .collect()
}

fn game_records(entries: &[(&'static [KeyCode], i64)]) -> Vec<(&'static [KeyCode], Action)> {
    entries
        .iter()
        .map(|(codes, value)| {
            let record = BTreeMap::from([(GAME_ACTION_KEY.to_string(), *value)]);
            (*codes, Action::Record(record))
        })
        .collect()
}

const LEFT_RIGHT_FIRE: &[(&[KeyCode], i64)] = &[
    (&[KEY_SPACE], 1),
    (&[KEY_RIGHT], 2),
    (&[KEY_LEFT], 3),
    (&[KEY_SPACE, KEY_RIGHT], 4),
    (&[KEY_SPACE, KEY_LEFT], 5),
    (&[], 0),
];

const UP_DOWN_LEFT_RIGHT_FIRE: &[(&[KeyCode], i64)] = &[
    (&[KEY_SPACE], 1),
    (&[KEY_UP], 2),
    (&[KEY_RIGHT], 3),
    (&[KEY_LEFT], 4),
    (&[KEY_DOWN], 5),
    (&[KEY_UP, KEY_RIGHT], 6),
    (&[KEY_LEFT, KEY_UP], 7),
    (&[KEY_RIGHT, KEY_DOWN], 8),
    (&[KEY_LEFT, KEY_DOWN], 9),
    (&[KEY_SPACE, KEY_UP], 10),
    (&[KEY_SPACE, KEY_RIGHT], 11),
    (&[KEY_SPACE, KEY_LEFT], 12),
    (&[KEY_SPACE, KEY_DOWN], 13),
    (&[KEY_SPACE, KEY_UP, KEY_RIGHT], 14),
    (&[KEY_SPACE, KEY_LEFT, KEY_UP], 15),
    (&[KEY_SPACE, KEY_RIGHT, KEY_DOWN], 16),
    (&[KEY_SPACE, KEY_LEFT, KEY_DOWN], 17),
    (&[], 0),
];

// No empty-combination entry: releasing every key sends nothing.
const UP_DOWN_LEFT_RIGHT: &[(&[KeyCode], i64)] = &[
    (&[KEY_UP], 1),
    (&[KEY_RIGHT], 2),
    (&[KEY_LEFT], 3),
    (&[KEY_DOWN], 4),
    (&[KEY_UP, KEY_RIGHT], 5),
    (&[KEY_LEFT, KEY_UP], 6),
    (&[KEY_RIGHT, KEY_DOWN], 7),
    (&[KEY_LEFT, KEY_DOWN], 8),
];

const TAXI: &[(&[KeyCode], i64)] = &[
    (&[KEY_LEFT], 3),
    (&[KEY_UP], 1),
    (&[KEY_RIGHT], 2),
    (&[KEY_DOWN], 0),
    (&[KEY_Q], 4),
    (&[KEY_A], 5),
];

// Spacebar advances one frame.
const FRAME_ADVANCE: &[(&[KeyCode], i64)] = &[(&[KEY_SPACE], 0)];

const SPACE_ONLY: &[KeyCode] = &[KEY_SPACE];
const ARROWS_FIRE: &[KeyCode] = &[KEY_SPACE, KEY_LEFT, KEY_UP, KEY_RIGHT, KEY_DOWN];
const ARROWS: &[KeyCode] = &[KEY_LEFT, KEY_UP, KEY_RIGHT, KEY_DOWN];
const LEFT_RIGHT_SPACE: &[KeyCode] = &[KEY_SPACE, KEY_LEFT, KEY_RIGHT];
const TAXI_KEYS: &[KeyCode] = &[KEY_LEFT, KEY_UP, KEY_RIGHT, KEY_DOWN, KEY_Q, KEY_A];

fn builtin_tables() -> Vec<BuiltinTable> {
    let mut taxi_waitforkey = discrete(TAXI);
    // -1 tells the backend every key has been released (turn-based envs).
    taxi_waitforkey.push((&[], Action::Discrete(-1)));

    vec![
        (DEFAULT_KEYMAP_ID, SPACE_ONLY, discrete(FRAME_ADVANCE)),
        ("taxi", TAXI_KEYS, discrete(TAXI)),
        ("taxi_waitforkey", TAXI_KEYS, taxi_waitforkey),
        ("atari_leftrightfire", LEFT_RIGHT_SPACE, discrete(LEFT_RIGHT_FIRE)),
        (
            "atari_updownleftrightfire",
            ARROWS_FIRE,
            discrete(UP_DOWN_LEFT_RIGHT_FIRE),
        ),
        ("atari_updownleftright", ARROWS, discrete(UP_DOWN_LEFT_RIGHT)),
        (
            "multiagent_atari_leftrightfire",
            LEFT_RIGHT_SPACE,
            game_records(LEFT_RIGHT_FIRE),
        ),
        (
            "multiagent_atari_updownleftrightfire",
            ARROWS_FIRE,
            game_records(UP_DOWN_LEFT_RIGHT_FIRE),
        ),
        (
            "multiagent_atari_updownleftright",
            ARROWS,
            game_records(UP_DOWN_LEFT_RIGHT),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(codes: &[KeyCode]) -> ActiveKeySet {
        codes.iter().copied().collect()
    }

    #[test]
    fn leftrightfire_scenarios() {
        let registry = KeymapRegistry::builtin();
        let id = "atari_leftrightfire";

        assert_eq!(
            map_keys(&keys(&[32, 39]), id, &registry),
            Some(Action::Discrete(4))
        );
        assert_eq!(map_keys(&keys(&[]), id, &registry), Some(Action::Discrete(0)));
        assert_eq!(map_keys(&keys(&[39, 37]), id, &registry), None);
    }

    #[test]
    fn irrelevant_keys_are_filtered_before_lookup() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(
            map_keys(&keys(&[16, 39, 90]), "atari_leftrightfire", &registry),
            Some(Action::Discrete(2))
        );
        assert_eq!(
            map_keys(&keys(&[16]), "atari_leftrightfire", &registry),
            Some(Action::Discrete(0))
        );
    }

    #[test]
    fn mapping_is_independent_of_call_history() {
        let registry = KeymapRegistry::builtin();
        let probe = keys(&[38, 39, 32]);
        let first = map_keys(&probe, "atari_updownleftrightfire", &registry);
        for other in [&[37][..], &[], &[40, 32]] {
            map_keys(&keys(other), "atari_updownleftrightfire", &registry);
        }
        let again = map_keys(&probe, "atari_updownleftrightfire", &registry);
        assert_eq!(first, Some(Action::Discrete(14)));
        assert_eq!(first, again);
    }

    #[test]
    fn keymaps_without_empty_entry_send_nothing_on_release() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(map_keys(&keys(&[]), "atari_updownleftright", &registry), None);
        assert_eq!(map_keys(&keys(&[]), "taxi", &registry), None);
        assert_eq!(
            map_keys(&keys(&[]), "taxi_waitforkey", &registry),
            Some(Action::Discrete(-1))
        );
    }

    #[test]
    fn unknown_keymap_yields_no_action() {
        let registry = KeymapRegistry::builtin();
        assert_eq!(map_keys(&keys(&[32]), "no_such_keymap", &registry), None);
        assert!(matches!(
            registry.require("no_such_keymap"),
            Err(KeymapError::UnknownKeymap(_))
        ));
    }

    #[test]
    fn multiagent_records_select_agent_or_pass_through() {
        let registry = KeymapRegistry::builtin();
        let action = map_keys(&keys(&[32, 37]), "multiagent_atari_leftrightfire", &registry)
            .expect("mapped");
        let expected = BTreeMap::from([("game".to_string(), 5)]);
        assert_eq!(action, Action::Record(expected.clone()));
        assert_eq!(action.for_agent("game_0>player_0"), Action::Record(expected));

        let per_agent = Action::Record(BTreeMap::from([
            ("player_0".to_string(), 3),
            ("player_1".to_string(), 2),
        ]));
        assert_eq!(per_agent.for_agent("player_1"), Action::Discrete(2));
        assert_eq!(Action::Discrete(4).for_agent("player_1"), Action::Discrete(4));
    }

    #[test]
    fn combo_text_is_canonical() {
        let combo: KeyCombo = "39, 32,39".parse().expect("combo");
        assert_eq!(combo.to_string(), "32,39");
        assert_eq!("".parse::<KeyCombo>().expect("empty"), KeyCombo::empty());
        assert!("32,x".parse::<KeyCombo>().is_err());
    }

    #[test]
    fn json_keymaps_load_and_merge_over_builtins() {
        let raw = r#"{
            "atari_leftrightfire": {
                "relevant_keys": [32, 37, 39],
                "combos": { "": 0, "39,32": 9 }
            },
            "pinball": {
                "relevant_keys": [90, 77],
                "combos": { "90": 1, "77": 2, "77,90": { "player_0": 3 } }
            }
        }"#;
        let loaded = KeymapRegistry::from_json_str(raw, Path::new("keymaps.json")).expect("load");
        let mut registry = KeymapRegistry::builtin();
        registry.merge(loaded);

        assert_eq!(
            map_keys(&keys(&[32, 39]), "atari_leftrightfire", &registry),
            Some(Action::Discrete(9))
        );
        assert_eq!(
            map_keys(&keys(&[90, 77]), "pinball", &registry).map(|a| a.for_agent("player_0")),
            Some(Action::Discrete(3))
        );
    }

    #[test]
    fn json_keymap_with_foreign_key_is_rejected() {
        let raw = r#"{ "broken": { "relevant_keys": [32], "combos": { "32,40": 1 } } }"#;
        let error = KeymapRegistry::from_json_str(raw, Path::new("k.json")).expect_err("reject");
        assert!(matches!(
            error,
            KeymapError::ComboOutsideRelevantKeys { code: 40, .. }
        ));
    }

    #[test]
    fn json_parse_errors_name_the_field() {
        let raw = r#"{ "broken": { "relevant_keys": ["space"], "combos": {} } }"#;
        let error = KeymapRegistry::from_json_str(raw, Path::new("k.json")).expect_err("reject");
        match error {
            KeymapError::Parse { field, .. } => assert!(field.starts_with("broken.relevant_keys")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
