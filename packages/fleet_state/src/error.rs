use push_channel::ChannelError;

/// A message payload that a processor could not turn into state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing field \"{0}\"")]
    MissingField(&'static str),

    #[error("invalid field \"{field}\": {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    pub fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        DecodeError::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

impl From<DecodeError> for ChannelError {
    fn from(err: DecodeError) -> Self {
        ChannelError::malformed(err)
    }
}
