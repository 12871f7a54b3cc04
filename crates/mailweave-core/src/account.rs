//! Account model and provider presets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encrypted credential material as stored in the cache.
/// All three fields are base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// AES-256-GCM ciphertext, tag split off
    pub ciphertext: String,
    /// 12-byte initialization vector, fresh per encryption
    pub iv: String,
    /// 16-byte authentication tag
    pub auth_tag: String,
}

/// IMAP/SMTP server endpoints for an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IMAP server hostname
    pub imap_host: String,
    /// IMAP server port
    pub imap_port: u16,
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
}

impl ServerConfig {
    pub fn new(
        imap_host: impl Into<String>,
        imap_port: u16,
        smtp_host: impl Into<String>,
        smtp_port: u16,
    ) -> Self {
        Self {
            imap_host: imap_host.into(),
            imap_port,
            smtp_host: smtp_host.into(),
            smtp_port,
        }
    }

    /// Gmail configuration
    pub fn gmail() -> Self {
        Self::new("imap.gmail.com", 993, "smtp.gmail.com", 587)
    }

    /// iCloud configuration
    pub fn icloud() -> Self {
        Self::new("imap.mail.me.com", 993, "smtp.mail.me.com", 587)
    }

    /// Fastmail configuration
    pub fn fastmail() -> Self {
        Self::new("imap.fastmail.com", 993, "smtp.fastmail.com", 587)
    }
}

/// A remote mailbox owner mirrored into the local cache.
///
/// Credentials are held only as [`EncryptedSecret`]; plaintext passwords
/// never reach storage or logs.
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique identifier
    pub id: String,
    /// Email address
    pub email: String,
    /// Display name
    pub display_name: Option<String>,
    /// Provider identifier (e.g., "gmail")
    pub provider: String,
    /// Server endpoints
    pub config: ServerConfig,
    /// Encrypted password
    pub secret: EncryptedSecret,
    /// Whether the account participates in sync
    pub active: bool,
    /// Timestamp of the last sync attempt
    pub last_sync: Option<DateTime<Utc>>,
    /// "success" or "error"
    pub last_sync_status: Option<String>,
    /// Error message from the last failed sync
    pub sync_error: Option<String>,
}
