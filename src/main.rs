// src/main.rs

use agent_factory::{
    cli::{Cli, Commands, ConfigCommands, KeyCommands},
    run, setup_configuration,
    storage::JsonFileStore,
    AppConfig, AppError, KeyManager,
};
use axum::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!(signal = "Ctrl+C", "Received signal. Initiating graceful shutdown...") },
        () = terminate => { info!(signal = "Terminate", "Received signal. Initiating graceful shutdown...") },
    }
}

fn init_tracing(json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn serve_gateway(cli: &Cli, port_override: Option<u16>) -> Result<(), AppError> {
    let (app, config) = run(cli.config.clone()).await.map_err(|e| {
        eprintln!("Application setup error: {e:?}");
        e
    })?;

    let host: std::net::IpAddr = config.server.host.parse().map_err(|e| {
        AppError::Config(format!("Invalid server.host '{}': {e}", config.server.host))
    })?;
    let addr = SocketAddr::new(host, port_override.unwrap_or(config.server.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(server.address = %addr, error = ?e, "Failed to bind to address. Exiting.");
        AppError::from(e)
    })?;
    info!(server.address = %addr, "Server listening");

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = ?e, "Server run loop encountered an error. Exiting.");
            AppError::from(e)
        })?;

    info!("Server shut down gracefully.");
    Ok(())
}

async fn load_key_manager(config: &AppConfig) -> Result<KeyManager, AppError> {
    let store = Arc::new(JsonFileStore::new(&config.status_file));
    KeyManager::load(&config.credential_slots, store, config.rotation.clone()).await
}

async fn handle_keys(cli: &Cli, action: &KeyCommands) -> Result<(), AppError> {
    let config = setup_configuration(cli.config.clone())?;
    let manager = load_key_manager(&config).await?;

    match action {
        KeyCommands::List => {
            let status = manager.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if status.available_keys == 0 {
                warn!("No API key is currently available");
            }
        }
        KeyCommands::Reset { key_id } => {
            manager.reset_key(key_id).await?;
            println!("Reset {key_id}");
        }
    }
    Ok(())
}

fn check_config(cli: &Cli) -> Result<(), AppError> {
    let config = setup_configuration(cli.config.clone())?;
    let usable = config
        .credential_slots
        .iter()
        .filter(|slot| slot.usable_value().is_some())
        .count();

    println!("Configuration OK");
    println!("  listen:        {}:{}", config.server.host, config.server.port);
    println!("  upstream:      {}", config.upstream.base_url);
    println!("  model:         {}", config.upstream.model);
    println!("  status file:   {}", config.status_file.display());
    println!("  key slots set: {usable}");
    println!(
        "  retries:       {} attempts, {}s apart",
        config.rotation.max_attempts, config.rotation.retry_delay_secs
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse_args();
    init_tracing(cli.json_logs);

    match &cli.command {
        None => serve_gateway(&cli, None).await,
        Some(Commands::Serve { port }) => serve_gateway(&cli, *port).await,
        Some(Commands::Keys { action }) => handle_keys(&cli, action).await,
        Some(Commands::Config {
            action: ConfigCommands::Check,
        }) => check_config(&cli),
    }
}
