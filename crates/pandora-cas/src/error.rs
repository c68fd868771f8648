//! Client error types for the Pandora SDK

/// Error type for Pandora Online client operations
#[derive(Debug, thiserror::Error)]
pub enum PandoraError {
    /// The server described the failure with a status text
    #[error("API error: {0}")]
    Api(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("invalid access token: {0}")]
    InvalidAccessToken(String),

    #[error("access token not available")]
    MissingAccessToken,

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("device {0} is busy executing command")]
    DeviceBusy(u64),

    #[error("state update is required")]
    StateUnavailable,

    #[error("command {0} was not confirmed in time")]
    CommandTimeout(u32),

    #[error("error while executing command: {0}")]
    CommandFailed(String),

    #[error("unknown device {0}")]
    UnknownDevice(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("WebSocket read timed out")]
    ReadTimeout,

    #[error("WebSocket closed prematurely")]
    WsClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PandoraError {
    /// Whether the error belongs to the authentication family.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed(_)
                | Self::SessionExpired(_)
                | Self::InvalidAccessToken(_)
                | Self::MissingAccessToken
        )
    }

    /// Whether the error is a temporary network condition worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::WebSocket(_) | Self::ReadTimeout | Self::WsClosed => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PandoraError>;
