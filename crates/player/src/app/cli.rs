use std::path::PathBuf;

use envlink::ContextOverrides;

use super::status::StatusFormat;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CliOptions {
    pub(crate) server_addr: Option<String>,
    pub(crate) connect_timeout_ms: Option<u64>,
    pub(crate) poll_ms: Option<u64>,
    pub(crate) setup_file: Option<PathBuf>,
    pub(crate) context_file: Option<PathBuf>,
    pub(crate) keymaps_file: Option<PathBuf>,
    pub(crate) instance_id: Option<String>,
    pub(crate) agent_key: Option<String>,
    pub(crate) context: ContextOverrides,
    pub(crate) auto_ready: bool,
    pub(crate) status_format: Option<StatusFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CliRequest {
    Help,
    Run(CliOptions),
}

pub(crate) fn parse_args(args: &[String]) -> Result<CliRequest, String> {
    let mut options = CliOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "-h" | "--help" => return Ok(CliRequest::Help),
            "--auto-ready" => {
                options.auto_ready = true;
                index += 1;
                continue;
            }
            _ => {}
        }

        let value = args
            .get(index + 1)
            .ok_or_else(|| format!("missing value for {flag}"))?
            .clone();
        match flag {
            "--server" => options.server_addr = Some(value),
            "--connect-timeout-ms" => {
                options.connect_timeout_ms = Some(value.parse::<u64>().map_err(|_| {
                    format!("invalid --connect-timeout-ms value '{value}' (expected u64)")
                })?)
            }
            "--poll-ms" => {
                options.poll_ms = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid --poll-ms value '{value}' (expected u64)"))?,
                )
            }
            "--setup" => options.setup_file = Some(PathBuf::from(value)),
            "--context" => options.context_file = Some(PathBuf::from(value)),
            "--keymaps" => options.keymaps_file = Some(PathBuf::from(value)),
            "--instance" => options.instance_id = Some(value),
            "--agent" => options.agent_key = Some(value),
            "--assignment-id" => options.context.assignment_id = Some(value),
            "--worker-id" => options.context.worker_id = Some(value),
            "--hit-id" => options.context.hit_id = Some(value),
            "--task-id" => options.context.task_id = Some(value),
            "--environment-id" => options.context.environment_id = Some(value),
            "--user-type" => options.context.user_type = Some(value),
            "--status" => {
                options.status_format = Some(StatusFormat::parse(&value).ok_or_else(|| {
                    format!("invalid --status value '{value}' (expected text or json)")
                })?)
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
        index += 2;
    }
    Ok(CliRequest::Run(options))
}

pub(crate) fn usage_text() -> String {
    [
        "player - headless environment session client",
        "",
        "Usage:",
        "  player [--server <host:port>] [--setup <file>] [--instance <id>] [--agent <key>]",
        "         [--keymaps <file>] [--context <file>] [--auto-ready] [--status text|json]",
        "         [--connect-timeout-ms <u64>] [--poll-ms <u64>]",
        "         [--assignment-id <id>] [--worker-id <id>] [--hit-id <id>]",
        "         [--task-id <id>] [--environment-id <id>] [--user-type <type>]",
        "",
        "Console commands (stdin):",
        "  press <code> | release <code> | tap <code> | joy <x> <y> | stop",
        "  ready | status | quit",
        "",
        "Environment:",
        "  PLAYER_SERVER_ADDR, PLAYER_CONNECT_TIMEOUT_MS, PLAYER_POLL_MS,",
        "  PLAYER_SETUP_FILE, PLAYER_CONTEXT_FILE, PLAYER_KEYMAPS_FILE",
    ]
    .join("\n")
}
