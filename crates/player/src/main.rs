use std::env;
use std::process::ExitCode;

use tracing::error;

mod app;

use app::CliRequest;

fn main() -> ExitCode {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let cli = match app::parse_args(&args) {
        Ok(CliRequest::Help) => {
            println!("{}", app::usage_text());
            return ExitCode::SUCCESS;
        }
        Ok(CliRequest::Run(cli)) => cli,
        Err(message) => {
            eprintln!("{message}\n\n{}", app::usage_text());
            return ExitCode::from(2);
        }
    };

    match app::build_app(&cli) {
        Ok(wiring) => app::run(wiring),
        Err(err) => {
            error!(error = %err, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
