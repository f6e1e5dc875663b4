use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::atomic_io::write_json_atomic;
use crate::keymap::DEFAULT_KEYMAP_ID;

pub const DEFAULT_HIT_ID: &str = "nohit";
pub const DEFAULT_TASK_ID: &str = "default";
pub const DEFAULT_USER_TYPE: &str = "local";

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path} at {field}: {message}")]
    Parse {
        path: PathBuf,
        field: String,
        message: String,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The environment instance and the agent this client controls in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInstance {
    pub instance_id: String,
    pub agent_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiLayoutOptions {
    #[serde(default = "default_keymap_id")]
    pub keymap: String,
}

impl Default for UiLayoutOptions {
    fn default() -> Self {
        Self {
            keymap: default_keymap_id(),
        }
    }
}

fn default_keymap_id() -> String {
    DEFAULT_KEYMAP_ID.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutField {
    One(String),
    Many(Vec<String>),
}

fn deserialize_layout<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match LayoutField::deserialize(deserializer)? {
        LayoutField::One(name) => vec![name],
        LayoutField::Many(names) => names,
    })
}

/// Server-provided description of the session, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetupDetails {
    pub env: EnvironmentInstance,
    #[serde(default, deserialize_with = "deserialize_layout")]
    pub ui_layout: Vec<String>,
    #[serde(default)]
    pub ui_layout_options: UiLayoutOptions,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub visit_id: Option<String>,
}

impl SessionSetupDetails {
    /// Minimal setup for a single agent with the default keymap.
    pub fn local(instance_id: &str, agent_key: &str) -> Self {
        Self {
            env: EnvironmentInstance {
                instance_id: instance_id.to_string(),
                agent_key: agent_key.to_string(),
            },
            ui_layout: Vec::new(),
            ui_layout_options: UiLayoutOptions::default(),
            initial_message: None,
            user_type: None,
            task_id: None,
            visit_id: None,
        }
    }

    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, SetupError> {
        parse_json(raw, origin)
    }

    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let raw = read_file(path)?;
        let details = Self::from_json_str(&raw, path)?;
        info!(
            path = %path.display(),
            instance_id = %details.env.instance_id,
            keymap = %details.keymap_id(),
            "session_setup_loaded"
        );
        Ok(details)
    }

    pub fn keymap_id(&self) -> &str {
        &self.ui_layout_options.keymap
    }
}

/// Command-line values that take precedence over the persisted context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOverrides {
    pub assignment_id: Option<String>,
    pub worker_id: Option<String>,
    pub hit_id: Option<String>,
    pub task_id: Option<String>,
    pub environment_id: Option<String>,
    pub user_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoredContext {
    assignment_id: Option<String>,
    worker_id: Option<String>,
    hit_id: Option<String>,
    task_id: Option<String>,
    environment_id: Option<String>,
    user_type: Option<String>,
}

/// Participant identity carried across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub assignment_id: String,
    pub worker_id: String,
    pub hit_id: String,
    pub task_id: String,
    pub environment_id: String,
    pub user_type: String,
}

impl SessionContext {
    /// Reads `path` if it exists, applies `overrides` and fills in anything
    /// still missing. A missing file is not an error.
    pub fn load(path: Option<&Path>, overrides: &ContextOverrides) -> Result<Self, SetupError> {
        let stored = match path {
            Some(path) if path.exists() => {
                let raw = read_file(path)?;
                parse_json::<StoredContext>(&raw, path)?
            }
            Some(path) => {
                debug!(path = %path.display(), "session_context_file_absent");
                StoredContext::default()
            }
            None => StoredContext::default(),
        };
        Ok(Self::resolve(stored, overrides))
    }

    fn resolve(stored: StoredContext, overrides: &ContextOverrides) -> Self {
        let present = |value: &String| !value.trim().is_empty();
        let pick = |over: &Option<String>, stored: Option<String>| {
            over.clone().filter(present).or(stored.filter(present))
        };
        Self {
            assignment_id: pick(&overrides.assignment_id, stored.assignment_id)
                .unwrap_or_else(generated_id),
            worker_id: pick(&overrides.worker_id, stored.worker_id).unwrap_or_else(generated_id),
            hit_id: pick(&overrides.hit_id, stored.hit_id)
                .unwrap_or_else(|| DEFAULT_HIT_ID.to_string()),
            task_id: pick(&overrides.task_id, stored.task_id)
                .unwrap_or_else(|| DEFAULT_TASK_ID.to_string()),
            environment_id: pick(&overrides.environment_id, stored.environment_id)
                .unwrap_or_else(generated_id),
            user_type: pick(&overrides.user_type, stored.user_type)
                .unwrap_or_else(|| DEFAULT_USER_TYPE.to_string()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SetupError> {
        write_json_atomic(path, self).map_err(|source| SetupError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "session_context_saved");
        Ok(())
    }
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

fn read_file(path: &Path) -> Result<String, SetupError> {
    fs::read_to_string(path).map_err(|source| SetupError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_json<T: DeserializeOwned>(raw: &str, origin: &Path) -> Result<T, SetupError> {
    let deserializer = &mut serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(deserializer).map_err(|error| SetupError::Parse {
        path: origin.to_path_buf(),
        field: error.path().to_string(),
        message: error.inner().to_string(),
    })
}
