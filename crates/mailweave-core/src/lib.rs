//! Core engine for Mailweave
//!
//! Mirrors remote IMAP mailboxes into a local SQLite cache, reconciles
//! flag state bidirectionally, reconstructs conversation threads, and
//! composes and sends outgoing mail. The HTTP/API layer consumes this
//! crate through [`SyncEngine`], [`BodyLoader`], [`Mailer`],
//! [`AccountService`], and the [`Database`] read operations.

mod account;
mod accounts;
mod body;
mod compose;
mod database;
mod error;
mod headers;
mod store;
mod sync;
mod vault;

pub use account::{Account, EncryptedSecret, ServerConfig};
pub use accounts::{AccountService, NewAccountRequest, OutboundVerifier, SmtpVerifier};
pub use body::{BodyLoader, LoadedBody};
pub use compose::{create_forward, create_reply, ComposedEmail, Mailer};
pub use database::{
    Database, DraftPayload, NewAttachment, NewMessage, StoredAttachment, StoredDraft,
    StoredMessage,
};
pub use error::{EngineError, EngineResult};
pub use headers::{parse_header, thread_id, ParsedAddress, ParsedHeader, RawHeader};
pub use store::{ImapConnector, MailboxConnector, RemoteHeader, RemoteMailbox};
pub use sync::{FolderError, SyncEngine, SyncOptions, SyncReport};
pub use vault::SecretVault;
