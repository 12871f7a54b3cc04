//! Error taxonomy for the core engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by engine operations.
///
/// `Credential` is fatal to the operation and never retried with the same
/// key. `Connection` may be retried at the caller's discretion. `Protocol`
/// failures skip the offending item and continue the batch. `Validation`
/// is bad caller input, surfaced immediately.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Encrypt/decrypt failure
    #[error("Credential error: {0}")]
    Credential(String),

    /// Auth, network, or timeout failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed server response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bad caller input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Cache/storage failure
    #[error("Database error: {0}")]
    Database(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    /// Draft not found
    #[error("Draft not found: {0}")]
    DraftNotFound(i64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<mailweave_imap::ImapError> for EngineError {
    fn from(e: mailweave_imap::ImapError) -> Self {
        use mailweave_imap::ImapError;
        match e {
            ImapError::ConnectionFailed(_)
            | ImapError::AuthenticationFailed(_)
            | ImapError::TlsError(_)
            | ImapError::Timeout
            | ImapError::NotConnected => EngineError::Connection(e.to_string()),
            ImapError::IoError(_) => EngineError::Connection(e.to_string()),
            ImapError::ServerError(_)
            | ImapError::ParseError(_)
            | ImapError::FolderNotFound(_)
            | ImapError::MessageNotFound(_) => EngineError::Protocol(e.to_string()),
        }
    }
}

impl From<mailweave_smtp::SmtpError> for EngineError {
    fn from(e: mailweave_smtp::SmtpError) -> Self {
        use mailweave_smtp::SmtpError;
        match e {
            SmtpError::InvalidAddress(_) | SmtpError::MessageBuildError(_) => {
                EngineError::Validation(e.to_string())
            }
            SmtpError::ConnectionFailed(_)
            | SmtpError::AuthenticationFailed(_)
            | SmtpError::SendFailed(_) => EngineError::Connection(e.to_string()),
        }
    }
}
