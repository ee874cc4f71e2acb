use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use ratelord::{
    Intent, NegotiationClient,
    cli::{IntentSource, args_from_env},
    config::Config,
    logging::init_tracing,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = args_from_env()?;
    let config = match &args.config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let default_path = PathBuf::from("./ratelord.jsonc");
            if default_path.exists() {
                Config::load(&default_path).with_context(|| {
                    format!("failed to load config from {}", default_path.display())
                })?
            } else {
                Config::default()
            }
        }
    };

    let logging_guard = init_tracing(&config.logging)?;

    let intent = read_intent(&args.intent).await?;
    let client = NegotiationClient::new(config.negotiation.clone())
        .context("failed to construct negotiation client")?;

    let decision = client.ask(&intent).await?;
    tracing::info!(
        target: "ratelord_ask",
        run_id = logging_guard.run_id(),
        intent_id = decision.intent_id(),
        allowed = decision.allowed(),
        "ask_completed"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&decision).context("failed to encode decision")?
    );

    Ok(if decision.allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn read_intent(source: &IntentSource) -> Result<Intent> {
    let raw = match source {
        IntentSource::Stdin => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read intent from stdin")?;
            buf
        }
        IntentSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read intent from {}", path.display()))?,
    };

    serde_json::from_str(&raw).context("failed to parse intent json")
}
