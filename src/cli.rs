use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

const USAGE: &str = "usage: ratelord-ask [--config <path>] [--intent <path>|-]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// `None` means "use ./ratelord.jsonc when it exists, defaults otherwise".
    pub config_path: Option<PathBuf>,
    pub intent: IntentSource,
}

pub fn args_from_env() -> Result<CliArgs> {
    parse_args(env::args().skip(1))
}

pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut intent = IntentSource::Stdin;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --config"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--intent" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --intent"))?;
                intent = if value == "-" {
                    IntentSource::Stdin
                } else {
                    IntentSource::File(PathBuf::from(value))
                };
            }
            other => {
                return Err(anyhow!("unknown argument: {other}. {USAGE}"));
            }
        }
    }

    Ok(CliArgs {
        config_path,
        intent,
    })
}
