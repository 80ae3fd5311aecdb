/// Identity Core bootstrap
///
/// Loads configuration, prepares the database schema and verifies that the
/// service can be wired together. Transport shells embed the library.
use identity_core::{
    config::{IdentityConfig, LogFormat},
    IdentityContext, IdentityResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> IdentityResult<()> {
    // Load configuration
    let config = IdentityConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Identity Core v{}", env!("CARGO_PKG_VERSION"));

    let ctx = IdentityContext::new(config).await?;

    let pending = ctx.store.pending_outbox_events(1000).await?.len();
    tracing::info!(pending_outbox_events = pending, "Schema ready");

    ctx.db.close().await;

    Ok(())
}
