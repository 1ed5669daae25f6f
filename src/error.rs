use crate::core::{MalformedHeaderError, StateMachineError, UnsupportedTypeError};
use crate::sip::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedTypeError),
    #[error(transparent)]
    Malformed(#[from] MalformedHeaderError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Heartbeat interval {0} ms out of range, expected 0 or 1000..=20000 ms")]
    HeartbeatIntervalOutOfRange(u64),
    #[error("Invalid URI {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] StateMachineError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Message was discarded before it could be sent")]
    Discarded,
}

impl From<MalformedHeaderError> for ConversationError {
    fn from(err: MalformedHeaderError) -> Self {
        ConversationError::Namespace(err.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Inbound message matches no known namespace")]
    IncompatibleNamespace,
    #[error("Inbound message carries no call id")]
    MissingCallId,
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging is not initialized")]
    NotInitialized,
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },
    #[error("Unable to apply log filter: {0}")]
    Reload(String),
}
