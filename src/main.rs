use clap::Parser;
use llm_gateway::{build_router, AppState, GatewayConfig, ModelRouter, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-gateway",
    about = "Unified LLM gateway — one canonical API routed across OpenAI, Anthropic, and Azure OpenAI",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    let registry = Arc::new(ProviderRegistry::new(config.clone(), client));
    let router = Arc::new(ModelRouter::new(
        registry.clone(),
        config.model_mapping.clone(),
    ));

    info!("llm-gateway v{}", env!("CARGO_PKG_VERSION"));
    for (name, enabled) in registry.list_enabled() {
        info!(
            "  provider {:<7} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
    }
    info!("  mapped models: {}", config.model_mapping.len());

    let state = AppState {
        registry: registry.clone(),
        router,
    };

    let app = build_router(state);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.close().await;
    info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
