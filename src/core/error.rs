//! Error taxonomy shared by the interpreter, the actors and the session loop.
//!
//! Every kind here is recoverable: the session loop reports it as a single line
//! and hands control back to the operator. Contract violations between the
//! loop and its actors are assertions and never show up as values of these
//! types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A malformed command or argument in operator input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    /// Byte offset into the chunk being parsed.
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Failures while reading or writing a typed reference.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("unsupported reference schema '{0}'")]
    UnsupportedSchema(String),

    #[error("reference '{0}' is read-only")]
    ReadOnly(String),

    #[error("required a reference to a buffer, not '{0}'")]
    NotABuffer(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReferenceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ReferenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures surfaced at the conversation layer, including wrapped provider
/// failures.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("No model is active, use /model first")]
    NoActiveModel,

    #[error("Unsupported provider '{0}'")]
    UnknownProvider(String),

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("No context: {0}")]
    NoContext(String),

    #[error("stream mixes text and binary content")]
    MixedContent,

    #[error("stream has already been consumed and keeps no recording")]
    StreamConsumed,

    #[error("binary stream has no file name to save to, try /set terminal rawbin on")]
    NoFileName,

    #[error("interrupted")]
    Interrupted,

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConversationError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ConversationError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by the command interpreter for a single command. None of
/// them stop the interpretation of the remaining input.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error("{0}")]
    Usage(String),
}

impl From<io::Error> for ReplError {
    fn from(err: io::Error) -> Self {
        ReplError::Conversation(ConversationError::Io(err))
    }
}
