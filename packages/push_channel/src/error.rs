/// Errors that can occur on a push channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Connection drop or network failure. Recoverable by reconnecting.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single frame could not be parsed; only that frame is dropped.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The retry budget ran out and the channel stays closed.
    #[error("gave up after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },

    /// The channel was disposed by its owner.
    #[error("channel disposed")]
    Disposed,
}

impl ChannelError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ChannelError::Transport(err.to_string())
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        ChannelError::Malformed(err.to_string())
    }

    /// Whether the reconnect path should handle this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed_message",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::Disposed => "disposed",
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Malformed(err.to_string())
    }
}
