pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol state: {0}")]
    ProtocolState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ticket request failed with HTTP status {status}")]
    TicketHttp { status: u16 },

    #[error("ticket protocol error: {0}")]
    TicketProtocol(String),

    #[error("content length mismatch: expected {expected}, received {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("fetch worker did not terminate within the timeout")]
    Termination,

    #[error("pairing invariant violated for read {0}")]
    PairingInvariant(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
