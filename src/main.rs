mod api;
mod gateway;
mod registry;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wagate_core::config::{self, shellexpand, Config};
use wagate_store::Store;

#[derive(Parser)]
#[command(
    name = "wagate",
    version,
    about = "wagate: multi-tenant WhatsApp gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and its HTTP API.
    Start,
    /// Show the effective configuration and check the database.
    Status,
    /// List persisted sessions.
    Sessions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _guard = init_logging(&cfg);

    match cli.command {
        Commands::Start => {
            let shutdown = CancellationToken::new();
            let gw = gateway::Gateway::new(cfg, shutdown.clone()).await?;

            tokio::spawn(async move {
                wait_for_signal().await;
                info!("shutdown signal received");
                shutdown.cancel();
            });

            gw.run().await?;
        }
        Commands::Status => {
            println!("wagate status\n");
            println!("Config: {}", cli.config);
            println!("  name:      {}", cfg.gateway.name);
            println!("  api:       {}:{}", cfg.api.host, cfg.api.port);
            println!(
                "  auth:      {}",
                if cfg.api.api_key.is_empty() {
                    "disabled"
                } else {
                    "api key"
                }
            );
            println!("  database:  {}", cfg.database.url);
            println!(
                "  storage:   {} (bucket {})",
                cfg.storage.backend, cfg.storage.bucket
            );
            println!(
                "  media:     {}",
                if cfg.media.auto_download {
                    "auto download"
                } else {
                    "on demand"
                }
            );
            println!(
                "  backend:   {}",
                if cfg!(feature = "whatsapp-web") {
                    "whatsapp-web"
                } else {
                    "unavailable (built without whatsapp-web)"
                }
            );
            println!();

            let store = Store::new(&cfg).await?;
            match store.ping().await {
                Ok(()) => println!("  database reachable"),
                Err(e) => println!("  database error: {e}"),
            }
        }
        Commands::Sessions => {
            let store = Store::new(&cfg).await?;
            let sessions = store.list_sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                println!(
                    "{:<24} {:<14} {:<28} {}",
                    s.name,
                    s.status,
                    s.device_jid.as_deref().unwrap_or("-"),
                    s.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
    }

    Ok(())
}

/// Stdout logging plus an optional daily-rotated file under `gateway.log_dir`.
/// `RUST_LOG` overrides `gateway.log_level`.
fn init_logging(cfg: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.gateway.log_level));

    let (file_layer, guard) = if cfg.gateway.log_dir.is_empty() {
        (None, None)
    } else {
        let dir = shellexpand(&cfg.gateway.log_dir);
        let appender = tracing_appender::rolling::daily(dir, "wagate.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
