/// Errors from the client side of the delivery layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway error: {0}")]
    Gateway(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("gateway handshake failed: {0}")]
    Handshake(String),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Gateway(Box::new(e))
    }
}
