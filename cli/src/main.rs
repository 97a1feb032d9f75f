use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tunnel_cli::agent::{AgentConfig, TunnelAgent};
use tunnel_cli::config::{Config, DEFAULT_LOCAL_HOST, DEFAULT_LOCAL_PORT, DEFAULT_SERVER_URL};

#[derive(Parser, Debug)]
#[command(name = "tunnel", version, about = "Expose your local service to the internet")]
struct Cli {
    /// Local port to forward
    #[arg(short, long, env = "TUNNEL_PORT")]
    port: Option<u16>,

    /// Local host to forward
    #[arg(short = 'H', long, env = "TUNNEL_HOST")]
    host: Option<String>,

    /// Tunnel server URL
    #[arg(short, long, env = "TUNNEL_SERVER")]
    server: Option<String>,

    /// Custom subdomain to request
    #[arg(short = 'd', long)]
    subdomain: Option<String>,

    /// Save these settings as defaults
    #[arg(long)]
    save: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "tunnel_cli=debug" } else { "tunnel_cli=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // Effective config: flag > saved file > built-in default.
    let saved = Config::load().unwrap_or_else(|e| {
        warn!("Could not load config file, using defaults: {}", e);
        Config::default()
    });
    let config = AgentConfig {
        server_url: cli
            .server
            .or(saved.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
        local_host: cli
            .host
            .or(saved.local_host)
            .unwrap_or_else(|| DEFAULT_LOCAL_HOST.to_string()),
        local_port: cli.port.or(saved.local_port).unwrap_or(DEFAULT_LOCAL_PORT),
        subdomain: cli.subdomain,
    };

    if cli.save {
        let new_config = Config {
            server_url: Some(config.server_url.clone()),
            local_host: Some(config.local_host.clone()),
            local_port: Some(config.local_port),
        };
        match new_config.save() {
            Ok(()) => println!("Configuration saved"),
            Err(e) => warn!("Could not save config file: {}", e),
        }
    }

    let agent = TunnelAgent::new(config.clone());

    println!("Establishing tunnel connection...");
    let (session, url) = agent
        .connect()
        .await
        .context("Failed to establish tunnel")?;

    println!("Your local service is now available at: {url}");
    println!(
        "Forwarding requests to: http://{}:{}",
        config.local_host, config.local_port
    );

    tokio::select! {
        result = agent.run(session) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nDisconnecting tunnel...");
        }
    }

    Ok(())
}
