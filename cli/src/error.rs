use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    /// The relay rejected the handshake (e.g. subdomain conflict) or
    /// closed the channel before confirming it.
    #[error("Tunnel error: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// All automatic reconnect attempts were used up.
    #[error("Gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
