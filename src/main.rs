use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod aggregate;
mod chat;
mod config;
mod db;
mod forecast;
mod gemini;
mod http;
mod models;

use config::AppConfig;
use gemini::GeminiClient;
use http::AppState;

#[derive(Parser)]
#[command(name = "roxydental-insight")]
#[command(about = "Forecasting and assistant service for RoxyDental Clinic", long_about = None)]
struct Cli {
    /// Address to serve the HTTP API on
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!("database connection established");

    let gemini = GeminiClient::new(&config)?;
    let state = AppState { pool, gemini };

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    info!(addr = %cli.bind, "serving the clinic insight API");

    axum::serve(listener, http::router(state)).await?;
    Ok(())
}
