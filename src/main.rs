use std::sync::Arc;

use motorchat::{
    auth::IdentityResolver, config::GatewayConfig, logging, router, store::SqliteChatStore,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_tracing(dotenv::var("APP_ENV").is_ok_and(|env| env.eq_ignore_ascii_case("production")));

    let config = GatewayConfig::from_env();

    let store = SqliteChatStore::connect(&config.database_url).await?;
    let resolver = IdentityResolver::from_config(&config);
    if !resolver.is_strict() {
        tracing::warn!("STRICT_AUTH is off, unverifiable tokens connect as guests");
    }

    let state = AppState::new(Arc::new(store), Arc::new(resolver), config.max_message_length);
    let app = router(state, &config.client_url);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    tracing::info!(addr = %config.http_addr, env = %config.app_env, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}
