use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use oxidized_analyst::{
    config::Config, llm::SambaNovaConnector, routes::create_router, utils::init_logger, AppState,
};

#[derive(Parser, Debug)]
#[command(name = "oxidized-analyst", about = "Ask questions about CSV and Excel files in plain language")]
struct Cli {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    info!(
        host = %config.server.host,
        port = config.server.port,
        llm_base_url = %config.llm.base_url,
        model = %config.llm.model,
        "Configuration loaded"
    );

    let connector = Arc::new(SambaNovaConnector::new(config.llm.clone()));
    let state = AppState::new(config.clone(), connector);

    let ttl = Duration::from_secs(config.server.session_ttl_secs);
    state.sessions.spawn_sweeper(ttl, ttl.clamp(Duration::from_secs(1), Duration::from_secs(60)));
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
