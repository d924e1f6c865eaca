//! HEIC to JPG converter - HTTP service
//!
//! Serves the conversion engine over a small JSON/multipart API.

use heic2jpg::config::Config;
use heic2jpg::router::create_router;
use heic2jpg::state::AppState;

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heic2jpg=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HEIC to JPG converter...");

    let config = Arc::new(Config::from_env());
    info!("Configuration loaded: {:?}", config);

    let app_state = Arc::new(AppState::new(config.clone()));
    info!(
        workers = app_state.worker_pool.workers(),
        hevc = cfg!(feature = "hevc"),
        "Worker pool initialized"
    );

    let app = create_router(app_state);

    let port = config.server_port;
    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind");
            std::process::exit(1);
        }
    };

    info!(port = port, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down...");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
