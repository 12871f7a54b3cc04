//! IMAP protocol adapter for Mailweave
//!
//! A thin, stateless-per-call wrapper over async-imap. Sessions are opened
//! and closed per logical operation; retry policy belongs to the caller.

mod client;
mod error;
mod folder;
mod message;

pub use client::ImapClient;
pub use error::{ImapError, ImapResult};
pub use folder::{Folder, FolderType};
pub use message::{parse_references, EmailAddress, Envelope, MessageFlags, MessageHeader};
