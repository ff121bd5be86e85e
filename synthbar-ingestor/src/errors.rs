use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode subscribe command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("websocket stream ended")]
    StreamEnded,
}
