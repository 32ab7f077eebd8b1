//! llmctl: command-line front end for `llm-core`.

mod commands;
mod config;
mod weather;

use clap::{Parser, Subcommand};
use llm_core::{CompletionRequest, LlmClient, Provider};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "llmctl", version, about = "Talk to OpenAI and Anthropic completion APIs")]
struct Cli {
    /// TOML config file with [client] and [retry] sections.
    #[arg(long, env = "LLMCTL_CONFIG")]
    config: Option<PathBuf>,
    /// openai or anthropic. Defaults to the file, then to the model name.
    #[arg(long)]
    provider: Option<Provider>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one prompt and print the completion.
    Chat {
        prompt: String,
        /// Print fragments as they arrive.
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Stop sequence; repeatable.
        #[arg(long = "stop")]
        stop: Vec<String>,
    },
    /// Tool-calling round-trip with a mock get_weather function.
    Weather {
        #[arg(long, default_value = "London")]
        location: String,
        #[arg(long, value_enum, default_value = "C")]
        unit: weather::Unit,
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(anyhow::anyhow!("load .env: {e}"));
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => config::FileConfig::load(path).await?,
        None => config::FileConfig::default(),
    };
    let settings = config::Settings::resolve(
        &file,
        config::Overrides {
            provider: cli.provider,
            model: cli.model,
            base_url: cli.base_url,
            openai_api_key: cli.openai_api_key,
            anthropic_api_key: cli.anthropic_api_key,
        },
    )?;
    tracing::debug!(config = ?settings.client, model = %settings.model, "resolved client config");

    let client = LlmClient::new(settings.client)?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Chat {
            prompt,
            stream,
            max_tokens,
            temperature,
            stop,
        } => {
            let mut request = CompletionRequest::new(settings.model, prompt).with_stop(stop);
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            if let Some(temperature) = temperature {
                request = request.with_temperature(temperature);
            }
            commands::chat(&client, &request, stream, &cancel, &mut stdout).await
        }
        Command::Weather {
            location,
            unit,
            stream,
        } => {
            weather::run(
                &client,
                &settings.model,
                &location,
                unit,
                stream,
                &cancel,
                &mut stdout,
            )
            .await
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => tracing::warn!("received ctrl-c; cancelling in-flight request"),
                Err(e) => {
                    tracing::error!(error = %e, "failed to await ctrl-c signal");
                    return;
                }
            }
            cancel.cancel();
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,llmctl=debug,llm_core=debug"),
    };
    let log_format = std::env::var("LLMCTL_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr so completions on stdout stay clean.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported LLMCTL_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
