use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redirector::server::{self, Redirector};

#[derive(Parser)]
#[command(
    name = "redirector",
    version,
    about = "Geo-aware HTTP redirector for mirror networks",
    long_about = None
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.debug);

    let config_path = cli.config.unwrap_or_else(default_config_path);

    tracing::info!(config = %config_path.display(), "Reading configuration");

    // Startup errors are fatal; later reload errors keep the old state
    let app = Redirector::new(config_path).await?;

    app.start_health_loop();

    let mut serve_task = tokio::spawn(server::serve(app.clone()));

    tracing::info!("Ready");

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                if let Err(e) = app.reload().await {
                    tracing::warn!(error = %e, "Did not reload configuration due to error");
                }
            }
            _ = terminate.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
            result = &mut serve_task => {
                result??;
                break;
            }
        }
    }

    tracing::info!("Shutting down");

    Ok(())
}

/// The first configuration file that exists, preferring the working
/// directory over the system path
fn default_config_path() -> PathBuf {
    for candidate in ["dlrouter.yaml", "/etc/dlrouter/dlrouter.yaml"] {
        let path = PathBuf::from(candidate);

        if path.exists() {
            return path;
        }
    }

    PathBuf::from("dlrouter.yaml")
}

fn setup_tracing(format: &str, debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("redirector=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("redirector=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
