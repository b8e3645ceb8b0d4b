use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use civicpulse::auth::SqliteIdentity;
use civicpulse::config::{Cli, Config};
use civicpulse::db;
use civicpulse::db::models::Role;
use civicpulse::routes;
use civicpulse::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    if let Some(ref email) = cli.grant_admin {
        let identity = SqliteIdentity::new(pool.clone(), config.auth.session_hours);
        if identity.set_role(email, Role::Admin)? {
            tracing::info!("Granted admin role to {}", email);
        } else {
            anyhow::bail!("No account registered for {}", email);
        }
        return Ok(());
    }

    let state = AppState::from_config(pool, config.clone());
    if state.mailer.is_none() {
        tracing::warn!("Mail integration not configured; contact form will return errors");
    }
    if state.geocoder.is_none() {
        tracing::info!("No Mapbox token; addresses fall back to coordinates");
    }

    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
