use diesel_migrations::MigrationHarness;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use petromonitor::alerts::notifier::Mailer;
use petromonitor::alerts::AlertScheduler;
use petromonitor::api_router::configure_api_routes;
use petromonitor::config::AppConfig;
use petromonitor::shared::state::AppState;
use petromonitor::shared::utils::create_conn;
use petromonitor::MIGRATIONS;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env().expect("Failed to load config from env");

    let pool = match create_conn() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("Database pool creation failed: {}", e),
            ));
        }
    };

    {
        let mut conn = pool.get().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("Database connection failed: {}", e),
            )
        })?;
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Migrations failed: {}", e),
            )
        })?;
    }

    let mailer = Arc::new(Mailer::from_config(&config.email));
    let app_state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        mailer,
    });

    AlertScheduler::new(app_state.clone()).start();

    let app = configure_api_routes()
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
