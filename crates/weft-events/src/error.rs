/// Errors produced by the event layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// A subject contained an empty token, whitespace or a wildcard.
    #[error("invalid subject `{subject}`: {reason}")]
    InvalidSubject { subject: String, reason: String },

    /// A pattern used `>` anywhere but the last token.
    #[error("invalid subject pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// An inbound message body could not be decoded.
    #[error("cannot decode message on `{subject}`: {reason}")]
    Decode { subject: String, reason: String },

    /// Serialization failure while hashing or encoding an event.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the events crate.
pub type EventResult<T> = Result<T, EventError>;
