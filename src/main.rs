use std::process::ExitCode;

use clap::Parser;
use tokio::signal;

use gatebot::commands::ping;
use gatebot::{Client, Config, StopHandle};

#[derive(Parser)]
#[command(name = "gatebot")]
#[command(about = "Gateway bot client")]
#[command(version)]
struct Cli {
    /// Gateway WebSocket URL (overrides GATEBOT_GATEWAY_URL)
    #[arg(long)]
    gateway_url: Option<String>,

    /// HTTP API base URL (overrides GATEBOT_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Comma separated intents (overrides GATEBOT_INTENTS)
    #[arg(long)]
    intents: Option<String>,

    /// Drop queued outbound requests on shutdown instead of flushing them
    #[arg(long)]
    no_drain: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatebot=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    print_banner(&config);

    let client = match Client::builder(config).commands_from(ping::register) {
        Ok(builder) => builder.build(),
        Err(e) => {
            tracing::error!("failed to register commands: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(stop_on_signal(client.stop_handle()));

    match client.start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn load_config(cli: Cli) -> Result<Config, gatebot::error::ConfigError> {
    let mut config = Config::from_env()?;
    if let Some(url) = cli.gateway_url {
        config.gateway_url = url;
    }
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(list) = cli.intents {
        config.subscriptions = gatebot::gateway::intents::Subscriptions::parse(&list)?;
    }
    if cli.no_drain {
        config.drain_on_shutdown = false;
    }
    Ok(config)
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("GATEBOT_GIT_SHA");
    let intents = config.subscriptions.to_vec().join(", ");

    eprintln!();
    eprintln!("  \x1b[1;36mgatebot\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mgateway\x1b[0m      {}", config.gateway_url);
    eprintln!("  \x1b[2mapi\x1b[0m          {}", config.api_url);
    eprintln!("  \x1b[2mintents\x1b[0m      {intents}");
    if let Some(ref app) = config.application_id {
        eprintln!("  \x1b[2mapplication\x1b[0m  {app}");
    }
    eprintln!(
        "  \x1b[2mrate\x1b[0m         {} per {:?}",
        config.rate_limit.capacity, config.rate_limit.refill_period
    );

    let privileged = config.subscriptions.privileged();
    if !privileged.is_empty() {
        eprintln!();
        eprintln!(
            "  \x1b[33m! privileged intents requested: {}\x1b[0m",
            privileged.join(", ")
        );
    }

    eprintln!();
}

async fn stop_on_signal(stop: StopHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
    stop.stop();
}
