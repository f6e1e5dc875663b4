use std::env;
use std::process::ExitCode;
use std::time::Duration;

use stub_backend::{ScriptOptions, StubBackend, DEFAULT_BIND_ADDR};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct StubCli {
    bind: String,
    once: bool,
    options: ScriptOptions,
}

fn main() -> ExitCode {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        println!("{}", usage_text());
        return ExitCode::SUCCESS;
    }
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}\n\n{}", usage_text());
            return ExitCode::from(2);
        }
    };

    init_tracing();
    let backend = match StubBackend::bind(&cli.bind, cli.options) {
        Ok(backend) => backend,
        Err(err) => {
            error!(error = %err, "stub_startup_failed");
            return ExitCode::FAILURE;
        }
    };
    match backend.local_addr() {
        Ok(address) => info!(address = %address, "stub_listening"),
        Err(err) => error!(error = %err, "stub_local_addr_failed"),
    }

    let result = if cli.once {
        backend.serve_one().map(|_| ())
    } else {
        backend.serve_forever()
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "stub_failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<StubCli, String> {
    let mut cli = StubCli {
        bind: DEFAULT_BIND_ADDR.to_string(),
        once: false,
        options: ScriptOptions::default(),
    };

    let mut index = 0usize;
    while index < args.len() {
        let flag = args[index].as_str();
        if flag == "--once" {
            cli.once = true;
            index += 1;
            continue;
        }
        if flag == "--play-sound" {
            cli.options.play_sound = true;
            index += 1;
            continue;
        }

        let value = args
            .get(index + 1)
            .ok_or_else(|| format!("missing value for {flag}"))?;
        match flag {
            "--bind" => cli.bind = value.clone(),
            "--countdown" => cli.options.countdown_seconds = parse_number(flag, value)?,
            "--steps" => cli.options.steps_per_episode = parse_number(flag, value)?,
            "--episodes" => cli.options.episodes = parse_number(flag, value)?,
            "--step-ms" => {
                cli.options.step_interval = Duration::from_millis(parse_number(flag, value)?)
            }
            "--reject" => cli.options.reject_reason = Some(value.clone()),
            other => return Err(format!("unknown argument '{other}'")),
        }
        index += 2;
    }
    Ok(cli)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}' (expected a non-negative integer)"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn usage_text() -> String {
    [
        "stub_backend - scripted environment backend for local runs",
        "",
        "Usage:",
        "  stub_backend [--bind <addr>] [--countdown <secs>] [--play-sound] [--steps <n>]",
        "               [--episodes <n>] [--step-ms <ms>] [--reject <reason>] [--once]",
        "",
        "Defaults:",
        "  --bind 127.0.0.1:47001",
        "  --countdown 0",
        "  --steps 20",
        "  --episodes 1",
        "  --step-ms 100",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_script_flags() {
        let cli = parse_args(&args(&[
            "--countdown",
            "5",
            "--play-sound",
            "--steps",
            "3",
            "--reject",
            "full",
            "--once",
        ]))
        .expect("parse");
        assert!(cli.once);
        assert_eq!(cli.bind, DEFAULT_BIND_ADDR);
        assert_eq!(cli.options.countdown_seconds, 5);
        assert!(cli.options.play_sound);
        assert_eq!(cli.options.steps_per_episode, 3);
        assert_eq!(cli.options.reject_reason.as_deref(), Some("full"));
    }

    #[test]
    fn rejects_bad_values_and_unknown_flags() {
        assert!(parse_args(&args(&["--steps", "many"])).is_err());
        assert!(parse_args(&args(&["--steps"])).is_err());
        assert!(parse_args(&args(&["--teleport", "1"])).is_err());
    }
}
