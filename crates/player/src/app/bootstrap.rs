use std::io;
use std::path::PathBuf;
use std::time::Duration;

use envlink::{
    ConnectOptions, KeymapError, KeymapRegistry, SessionContext, SessionSetupDetails, SetupError,
    TransportError, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_MS,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::cli::CliOptions;
use super::status::StatusFormat;

const SERVER_ADDR_ENV_VAR: &str = "PLAYER_SERVER_ADDR";
const CONNECT_TIMEOUT_ENV_VAR: &str = "PLAYER_CONNECT_TIMEOUT_MS";
const POLL_MS_ENV_VAR: &str = "PLAYER_POLL_MS";
const SETUP_FILE_ENV_VAR: &str = "PLAYER_SETUP_FILE";
const CONTEXT_FILE_ENV_VAR: &str = "PLAYER_CONTEXT_FILE";
const KEYMAPS_FILE_ENV_VAR: &str = "PLAYER_KEYMAPS_FILE";

pub(crate) const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:47001";
const DEFAULT_INSTANCE_ID: &str = "local";
const DEFAULT_AGENT_KEY: &str = "agent_0";

#[derive(Debug, Error)]
pub(crate) enum PlayerError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Keymap(#[from] KeymapError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to write status output: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct PlayerConfig {
    pub(crate) server_addr: String,
    pub(crate) connect: ConnectOptions,
    pub(crate) setup_file: Option<PathBuf>,
    pub(crate) context_file: Option<PathBuf>,
    pub(crate) keymaps_file: Option<PathBuf>,
    pub(crate) auto_ready: bool,
    pub(crate) status_format: StatusFormat,
}

impl PlayerConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let millis = |name: &'static str, fallback: u64| match non_empty(name) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!(var = name, value = %value, fallback, "player_invalid_env_using_default");
                    fallback
                }
            },
            None => fallback,
        };

        Self {
            server_addr: non_empty(SERVER_ADDR_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            connect: ConnectOptions {
                timeout: Duration::from_millis(millis(
                    CONNECT_TIMEOUT_ENV_VAR,
                    DEFAULT_CONNECT_TIMEOUT_MS,
                )),
                poll_interval: Duration::from_millis(millis(POLL_MS_ENV_VAR, DEFAULT_POLL_MS)),
            },
            setup_file: non_empty(SETUP_FILE_ENV_VAR).map(PathBuf::from),
            context_file: non_empty(CONTEXT_FILE_ENV_VAR).map(PathBuf::from),
            keymaps_file: non_empty(KEYMAPS_FILE_ENV_VAR).map(PathBuf::from),
            auto_ready: false,
            status_format: StatusFormat::Text,
        }
    }

    fn apply_cli(&mut self, cli: &CliOptions) {
        if let Some(server_addr) = &cli.server_addr {
            self.server_addr = server_addr.clone();
        }
        if let Some(timeout_ms) = cli.connect_timeout_ms {
            self.connect.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(poll_ms) = cli.poll_ms {
            self.connect.poll_interval = Duration::from_millis(poll_ms);
        }
        if cli.setup_file.is_some() {
            self.setup_file = cli.setup_file.clone();
        }
        if cli.context_file.is_some() {
            self.context_file = cli.context_file.clone();
        }
        if cli.keymaps_file.is_some() {
            self.keymaps_file = cli.keymaps_file.clone();
        }
        self.auto_ready |= cli.auto_ready;
        if let Some(format) = cli.status_format {
            self.status_format = format;
        }
    }
}

pub(crate) struct AppWiring {
    pub(crate) config: PlayerConfig,
    pub(crate) setup: SessionSetupDetails,
    pub(crate) context: SessionContext,
    pub(crate) registry: KeymapRegistry,
}

pub(crate) fn build_app(cli: &CliOptions) -> Result<AppWiring, PlayerError> {
    init_tracing();
    info!("=== player startup ===");
    wire_app(PlayerConfig::from_env(), cli)
}

pub(crate) fn wire_app(mut config: PlayerConfig, cli: &CliOptions) -> Result<AppWiring, PlayerError> {
    config.apply_cli(cli);

    let mut registry = KeymapRegistry::builtin();
    if let Some(path) = &config.keymaps_file {
        let extra = KeymapRegistry::load(path)?;
        info!(path = %path.display(), keymaps = extra.ids().count(), "player_keymaps_loaded");
        registry.merge(extra);
    }

    let mut setup = match &config.setup_file {
        Some(path) => SessionSetupDetails::load(path)?,
        None => SessionSetupDetails::local(DEFAULT_INSTANCE_ID, DEFAULT_AGENT_KEY),
    };
    if let Some(instance_id) = &cli.instance_id {
        setup.env.instance_id = instance_id.clone();
    }
    if let Some(agent_key) = &cli.agent_key {
        setup.env.agent_key = agent_key.clone();
    }
    registry.require(setup.keymap_id())?;

    let context = SessionContext::load(config.context_file.as_deref(), &cli.context)?;
    info!(
        server = %config.server_addr,
        instance_id = %setup.env.instance_id,
        agent_key = %setup.env.agent_key,
        worker_id = %context.worker_id,
        assignment_id = %context.assignment_id,
        "player_configured"
    );

    Ok(AppWiring {
        config,
        setup,
        context,
        registry,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> PlayerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        PlayerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn env_defaults_and_invalid_numbers_fall_back() {
        let config = config_from(&[(POLL_MS_ENV_VAR, "fast"), (CONNECT_TIMEOUT_ENV_VAR, "250")]);
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR);
        assert_eq!(config.connect.poll_interval, Duration::from_millis(DEFAULT_POLL_MS));
        assert_eq!(config.connect.timeout, Duration::from_millis(250));
        assert_eq!(config.setup_file, None);
        assert_eq!(config.status_format, StatusFormat::Text);
    }

    #[test]
    fn cli_overrides_env() {
        let mut config = config_from(&[
            (SERVER_ADDR_ENV_VAR, "10.1.1.1:1"),
            (SETUP_FILE_ENV_VAR, "env_setup.json"),
        ]);
        config.apply_cli(&CliOptions {
            server_addr: Some("127.0.0.1:9".to_string()),
            poll_ms: Some(3),
            auto_ready: true,
            ..CliOptions::default()
        });
        assert_eq!(config.server_addr, "127.0.0.1:9");
        assert_eq!(config.setup_file, Some(PathBuf::from("env_setup.json")));
        assert_eq!(config.connect.poll_interval, Duration::from_millis(3));
        assert!(config.auto_ready);
    }

    #[test]
    fn wiring_loads_setup_keymaps_and_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let setup_path = dir.path().join("setup.json");
        fs::write(
            &setup_path,
            r#"{"env": {"instance_id": "i-5", "agent_key": "p1"},
                "ui_layout_options": {"keymap": "arcade"}}"#,
        )
        .expect("setup");
        let keymaps_path = dir.path().join("keymaps.json");
        fs::write(
            &keymaps_path,
            r#"{"arcade": {"relevant_keys": [65], "combos": {"65": 7, "": 0}}}"#,
        )
        .expect("keymaps");

        let mut config = config_from(&[]);
        config.setup_file = Some(setup_path);
        config.keymaps_file = Some(keymaps_path);
        config.context_file = Some(dir.path().join("context.json"));
        let cli = CliOptions {
            agent_key: Some("p2".to_string()),
            ..CliOptions::default()
        };

        let app = wire_app(config, &cli).expect("wire");
        assert_eq!(app.setup.env.instance_id, "i-5");
        assert_eq!(app.setup.env.agent_key, "p2");
        assert!(app.registry.get("arcade").is_some());
        assert!(app.registry.get("taxi").is_some());
        assert_eq!(app.context.hit_id, "nohit");
    }

    #[test]
    fn wiring_rejects_unknown_keymap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let setup_path = dir.path().join("setup.json");
        fs::write(
            &setup_path,
            r#"{"env": {"instance_id": "i", "agent_key": "a"}, "ui_layout_options": {"keymap": "nope"}}"#,
        )
        .expect("setup");
        let mut config = config_from(&[]);
        config.setup_file = Some(setup_path);
        assert!(matches!(
            wire_app(config, &CliOptions::default()),
            Err(PlayerError::Keymap(KeymapError::UnknownKeymap(_)))
        ));
    }
}
