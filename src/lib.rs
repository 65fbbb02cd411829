pub mod app;
pub mod config;
pub mod dispatch;
pub mod jobs;
pub mod logging;
pub mod process_manager;
pub mod stacking;
pub mod state;
pub mod theme;
pub mod transport;
pub mod ui;

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError, DEFAULT_BIND};
use crate::dispatch::Request;
use crate::jobs::Job;
use crate::state::{Region, RenderTarget};
use crate::ui::{KeyValue, Renderer, TableSpec, UiResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunArgs),
    Check(RunArgs),
    Send(SendArgs),
    Help,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    pub request: Request,
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliParseError {
    MissingValue(&'static str),
    MissingSendCommand,
    UnknownCommand(String),
    UnknownArgument(String),
}

impl std::fmt::Display for CliParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliParseError::MissingValue(flag) => write!(f, "{flag} requires a value"),
            CliParseError::MissingSendCommand => write!(f, "send requires a command name"),
            CliParseError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            CliParseError::UnknownArgument(arg) => write!(f, "unknown argument: {arg}"),
        }
    }
}

impl std::error::Error for CliParseError {}

/// With no command, or only `--config`, the supervisor runs.
pub fn parse_command<I>(args: I) -> Result<Command, CliParseError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let Some(first) = args.peek().cloned() else {
        return Ok(Command::Run(RunArgs::default()));
    };

    match first.as_str() {
        "--help" | "-h" | "help" => Ok(Command::Help),
        "run" => {
            args.next();
            parse_run_args(args).map(|parsed| parsed.map_or(Command::Help, Command::Run))
        }
        "check" => {
            args.next();
            parse_run_args(args).map(|parsed| parsed.map_or(Command::Help, Command::Check))
        }
        "send" => {
            args.next();
            parse_send(args)
        }
        flag if flag.starts_with('-') => {
            parse_run_args(args).map(|parsed| parsed.map_or(Command::Help, Command::Run))
        }
        other => Err(CliParseError::UnknownCommand(other.to_owned())),
    }
}

/// `None` means help was requested.
fn parse_run_args<I>(args: I) -> Result<Option<RunArgs>, CliParseError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut parsed = RunArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    return Err(CliParseError::MissingValue("--config"));
                };
                parsed.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(CliParseError::UnknownArgument(other.to_owned())),
        }
    }
    Ok(Some(parsed))
}

fn parse_send<I>(args: I) -> Result<Command, CliParseError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut cmd: Option<String> = None;
    let mut key: Option<String> = None;
    let mut val: Option<String> = None;
    let mut addr = DEFAULT_BIND.to_owned();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--key" | "-k" => {
                key = Some(args.next().ok_or(CliParseError::MissingValue("--key"))?);
            }
            "--val" | "-v" => {
                val = Some(args.next().ok_or(CliParseError::MissingValue("--val"))?);
            }
            "--addr" | "-a" => {
                addr = args.next().ok_or(CliParseError::MissingValue("--addr"))?;
            }
            "--help" | "-h" => return Ok(Command::Help),
            other if other.starts_with('-') || cmd.is_some() => {
                return Err(CliParseError::UnknownArgument(other.to_owned()));
            }
            _ => cmd = Some(arg),
        }
    }

    let Some(cmd) = cmd else {
        return Err(CliParseError::MissingSendCommand);
    };
    Ok(Command::Send(SendArgs {
        request: Request { cmd, key, val },
        addr,
    }))
}

/// Resolves the config location and loads it.
pub fn load_config(override_path: Option<&Path>) -> Result<(PathBuf, Config), ConfigError> {
    let path = config::resolve_config_path(override_path)?;
    let config = config::load(&path)?;
    Ok((path, config))
}

/// Summary printed by `barkeep check`. Placeholders are shown unresolved.
pub fn render_check_report<R: Renderer>(
    renderer: &mut R,
    path: &Path,
    config: &Config,
    target: &RenderTarget,
) -> UiResult<()> {
    renderer.section("Configuration")?;
    renderer.key_values(&[
        KeyValue::new("file", path.display().to_string()),
        KeyValue::new("listen", config.transport.bind.clone()),
        KeyValue::new("wallpaper", target.theme().image_path().display().to_string()),
        KeyValue::new("alpha", target.theme().alpha()),
        KeyValue::new(
            "palette",
            if config.theme.palette.is_some() {
                "static".to_owned()
            } else {
                format!("`{}`", config.theme.wal)
            },
        ),
        KeyValue::new(
            "stacking",
            match config.stacker() {
                Some(_) => format!(
                    "{} above `{}`",
                    config.stacking.render_window, config.stacking.background_window
                ),
                None => "off".to_owned(),
            },
        ),
    ])?;

    renderer.section("Render command")?;
    let argv = target
        .render_argv(|value| Ok::<_, Infallible>(value.to_owned()))
        .unwrap_or_else(|never| match never {});
    renderer.text(&display_argv(&argv))?;

    renderer.section("Modules")?;
    let mut rows = Vec::new();
    for region in Region::ALL {
        if let Some(modules) = target.modules(region) {
            for (id, value) in modules {
                rows.push(vec![region.name().to_owned(), id.clone(), value.clone()]);
            }
        }
    }
    renderer.table(&TableSpec::new(
        vec!["region".to_owned(), "module".to_owned(), "text".to_owned()],
        rows,
    ))?;

    renderer.section("Jobs")?;
    let rows = config
        .jobs()
        .iter()
        .map(|job| match job {
            Job::Periodic(job) => vec![
                format!("every {}s", job.interval.as_secs()),
                job.command.join(" "),
            ],
            Job::Reactive(job) => vec![
                format!("on `{}`", job.trigger.join(" ")),
                job.response.join(" "),
            ],
        })
        .collect();
    renderer.table(&TableSpec::new(
        vec!["when".to_owned(), "command".to_owned()],
        rows,
    ))?;

    renderer.success("configuration is valid")
}

fn display_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn print_usage() {
    eprintln!(
        "barkeep\n\nUSAGE:\n  barkeep [run] [--config <PATH>]\n  barkeep check [--config <PATH>]\n  barkeep send <cmd> [--key <KEY>] [--val <VALUE>] [--addr <HOST:PORT>]\n\nCOMMANDS:\n  run               Supervise the bar and serve remote commands (default)\n  check             Validate the config and print what would be launched\n  send              Send one command to a running supervisor and print the reply\n\nOPTIONS:\n  -c, --config <PATH>   Config file (default: $BARKEEP_CONFIG, then ~/.config/barkeep/config.toml)\n  -k, --key <KEY>       Request key (option flag or module id)\n  -v, --val <VALUE>     Request value\n  -a, --addr <ADDR>     Supervisor address (default: {DEFAULT_BIND})\n  -h, --help            Print help\n\nENVIRONMENT:\n  BARKEEP_LOG           Log filter, e.g. `barkeep=debug` (falls back to RUST_LOG)\n  BARKEEP_COLOR         auto | always | never\n  NO_COLOR              Disable colored output\n"
    );
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
