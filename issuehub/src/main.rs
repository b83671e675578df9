//! Issuehub - Issue Tracking Web Application
//!
//! Users register, sign in, create repositories and file issues against them.
//!
//! ## Architecture
//!
//! - **Users**: Own repositories and author issues
//! - **Repositories**: Named containers, one owner each
//! - **Issues**: Tagged with one status and one category
//! - **Sessions**: Server-side, identified by an opaque cookie

use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = issuehub::Config::from_env()?;

    info!(
        database = config.database_url.as_str(),
        bind_address = config.bind_address.as_str(),
        "Starting Issuehub service"
    );

    let db = issuehub::Database::new(&config.database_url).await?;
    if config.seed_defaults {
        db.seed_defaults().await?;
    }

    let state = issuehub::AppState::new(db, &config);
    let app = issuehub::app(state);

    info!("Listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(signal())
        .await?;

    Ok(())
}

async fn signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        return std::future::pending().await;
    }
    info!("Shutdown signal received, terminating...");
}
