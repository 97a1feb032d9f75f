use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tunnel_relay::state::{AppState, RelayConfig, DEFAULT_REQUEST_TIMEOUT};

#[derive(Parser, Debug)]
#[command(name = "tunnel-relay", version, about = "Subdomain-routing relay server for HTTP tunnels")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TUNNEL_RELAY_PORT", default_value_t = 8000)]
    port: u16,

    /// Externally visible domain suffix for tunnel URLs
    #[arg(short, long, env = "TUNNEL_RELAY_DOMAIN", default_value = "localhost:8000")]
    domain: String,

    /// Seconds a proxied request may wait for the agent's response
    #[arg(long, env = "TUNNEL_RELAY_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_relay=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let state = AppState::new(RelayConfig {
        port: cli.port,
        domain: cli.domain,
        request_timeout: Duration::from_secs(cli.request_timeout),
    });
    let app = tunnel_relay::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(
        "Tunnel relay listening on {} (domain: {})",
        addr, state.config.domain
    );

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
