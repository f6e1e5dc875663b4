mod bootstrap;
mod cli;
mod console_input;
mod controls;
mod loop_runner;
mod status;

pub(crate) use bootstrap::build_app;
pub(crate) use cli::{parse_args, usage_text, CliRequest};
pub(crate) use loop_runner::run;
