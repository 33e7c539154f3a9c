use lmsr_markets::api::{self, AppState};
use lmsr_markets::config::Config;
use lmsr_markets::settlement::SettlementEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG may come from .env, so load it before the subscriber
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lmsr_markets=debug")),
        )
        .init();

    info!("starting LMSR market engine");
    let config = Config::from_env();
    config.log_config();

    let engine = SettlementEngine::with_system_clock(config.engine_settings()?);
    let state = AppState::new(engine, config.default_liquidity_units()?);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
