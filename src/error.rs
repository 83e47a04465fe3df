use thiserror::Error;

/// Failure to turn wire bytes into playable samples.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("PCM16 payload length must be even, got {0} bytes")]
    OddLength(usize),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported audio MIME type: {0}")]
    UnsupportedMime(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio/video device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("The operation was cancelled")]
    Cancelled,

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,
}

impl Error {
    /// Only device and transport failures surface to the user; everything else
    /// is recovered locally with a diagnostic.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::Transport(_)
                | Self::WebSocket(_)
                | Self::Url(_)
                | Self::ConnectionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_and_transport_errors_are_user_visible() {
        assert!(Error::DeviceUnavailable("mic".into()).is_user_visible());
        assert!(Error::Transport("reset".into()).is_user_visible());
        assert!(Error::ConnectionClosed.is_user_visible());
        assert!(!Error::Decode(DecodeError::OddLength(3)).is_user_visible());
        assert!(!Error::MalformedToolCall("sentiment".into()).is_user_visible());
    }
}
