use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ComputerError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid base64 image payload: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Command '{command}' failed: {cause}")]
    CommandFailed { command: String, cause: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("{provider} does not support {operation}")]
    Unsupported { operation: String, provider: String },

    #[error("Session failed to start: {cause}")]
    SessionStartFailed { cause: Box<ComputerError> },

    #[error("Session not started; call start() first")]
    NotStarted,

    #[error("Channel was force-closed")]
    ChannelClosed,

    #[error("Could not parse config file")]
    ConfigParseError(#[from] Box<figment::Error>),
}

impl ComputerError {
    pub fn command_failed(command: impl Into<String>, cause: impl ToString) -> Self {
        Self::CommandFailed {
            command: command.into(),
            cause: cause.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// True for a bounded wait that ran out, including one that aborted a
    /// session start.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::SessionStartFailed { cause } => cause.is_timeout(),
            _ => false,
        }
    }

    /// Conditions that waiting longer may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout { .. } | Self::IOError(_)
        ) || matches!(self, Self::RequestError(e) if e.is_connect() || e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, ComputerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_visible_through_start_failure() {
        let err = ComputerError::SessionStartFailed {
            cause: Box::new(ComputerError::timeout("control server", Duration::from_secs(60))),
        };
        assert!(err.is_timeout());

        let err = ComputerError::SessionStartFailed {
            cause: Box::new(ComputerError::Provider("bad storage path".into())),
        };
        assert!(!err.is_timeout());
    }

    #[test]
    fn command_failures_are_not_transient() {
        assert!(!ComputerError::command_failed("left_click", "boom").is_transient());
        assert!(ComputerError::Connection("refused".into()).is_transient());
    }
}
