//! IMAP message types

/// Flags attached to a remote message
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFlags {
    /// Message has been read
    pub seen: bool,
    /// Message has been answered
    pub answered: bool,
    /// Message is flagged/starred
    pub flagged: bool,
    /// Message is marked for deletion
    pub deleted: bool,
    /// Message is a draft
    pub draft: bool,
}

/// Email address with optional display name
#[derive(Debug, Clone)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub address: String,
}

impl EmailAddress {
    pub fn new(name: Option<String>, address: String) -> Self {
        Self { name, address }
    }

    /// Format as "Name <address>" or just "address"
    pub fn to_display_string(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Envelope data from an IMAP FETCH, plus the References header which the
/// ENVELOPE item does not carry.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Message-ID, angle brackets stripped
    pub message_id: Option<String>,
    /// Subject line
    pub subject: Option<String>,
    /// From addresses
    pub from: Vec<EmailAddress>,
    /// To addresses
    pub to: Vec<EmailAddress>,
    /// CC addresses
    pub cc: Vec<EmailAddress>,
    /// Raw RFC 2822 date string
    pub date: Option<String>,
    /// In-Reply-To message id, angle brackets stripped
    pub in_reply_to: Option<String>,
    /// References chain, oldest first, angle brackets stripped
    pub references: Vec<String>,
}

/// Header-level view of a remote message
#[derive(Debug, Clone)]
pub struct MessageHeader {
    /// Server-assigned UID
    pub uid: u32,
    /// Envelope data
    pub envelope: Envelope,
    /// Message flags
    pub flags: MessageFlags,
    /// Size in bytes
    pub size: u32,
    /// Derived from BODYSTRUCTURE
    pub has_attachments: bool,
}

/// Parse a raw `References:` header slice into a list of message ids.
/// Continuation lines are unfolded; angle brackets are stripped.
pub fn parse_references(header_text: &str) -> Vec<String> {
    let unfolded: String = header_text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ");

    let value = match unfolded.to_lowercase().find("references:") {
        Some(idx) => &unfolded[idx + "references:".len()..],
        None => unfolded.as_str(),
    };

    value
        .split_whitespace()
        .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|id| !id.is_empty())
        .collect()
}
