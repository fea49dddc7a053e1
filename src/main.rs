use streamgate::{config::Config, server, tunnel};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("🚀 Starting Streamgate - HLS media proxy and tunnel");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });
    if !config.allow_private_targets {
        info!("Private-address targets are blocked on the media proxy");
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    // A listener that fails to start takes the other one down with it
    let media = {
        let shutdown = shutdown.clone();
        let config = config.clone();
        async move {
            let result = server::start(config, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    };
    let tunnel = {
        let shutdown = shutdown.clone();
        async move {
            let result = tunnel::start(config, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    };

    let (media, tunnel) = tokio::join!(media, tunnel);

    let mut failed = false;
    if let Err(e) = media {
        error!("Media proxy failed: {}", e);
        failed = true;
    }
    if let Err(e) = tunnel {
        error!("Tunnel proxy failed: {}", e);
        failed = true;
    }
    if failed {
        std::process::exit(1);
    }
}
