//! Header normalization and thread identifier derivation

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Reply/forward/ack markers stripped from subjects before hashing
const SUBJECT_PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "aw:", "ack:"];

/// A parsed mailbox address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Display name, if the header carried one
    pub name: Option<String>,
    /// Bare address
    pub address: String,
}

/// Raw header fields as returned by the protocol adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct RawHeader<'a> {
    pub message_id: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub from: Option<&'a str>,
    pub to: Option<&'a str>,
    pub cc: Option<&'a str>,
    pub date: Option<&'a str>,
    pub in_reply_to: Option<&'a str>,
    pub references: Option<&'a str>,
}

/// Normalized header record. Missing headers are `None`/empty rather than
/// runtime surprises.
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<ParsedAddress>,
    pub to: Vec<ParsedAddress>,
    pub cc: Vec<ParsedAddress>,
    pub date: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

/// Normalize raw protocol headers into a [`ParsedHeader`]
pub fn parse_header(raw: &RawHeader<'_>) -> ParsedHeader {
    ParsedHeader {
        message_id: raw.message_id.and_then(clean_message_id),
        subject: raw
            .subject
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        from: parse_address_list(raw.from.unwrap_or("")),
        to: parse_address_list(raw.to.unwrap_or("")),
        cc: parse_address_list(raw.cc.unwrap_or("")),
        date: parse_date(raw.date),
        in_reply_to: raw.in_reply_to.and_then(clean_message_id),
        references: raw
            .references
            .map(|r| {
                r.split_whitespace()
                    .filter_map(clean_message_id)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn clean_message_id(raw: &str) -> Option<String> {
    let id = raw.trim().trim_matches(|c| c == '<' || c == '>').to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Split an address header on commas, extracting angle-bracket addresses
/// with their display names.
pub fn parse_address_list(raw: &str) -> Vec<ParsedAddress> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            if let (Some(open), Some(close)) = (part.find('<'), part.rfind('>')) {
                if open < close {
                    let address = part[open + 1..close].trim().to_string();
                    if address.is_empty() {
                        return None;
                    }
                    let name = part[..open].trim().trim_matches('"').trim();
                    return Some(ParsedAddress {
                        name: if name.is_empty() {
                            None
                        } else {
                            Some(name.to_string())
                        },
                        address,
                    });
                }
            }
            Some(ParsedAddress {
                name: None,
                address: part.to_string(),
            })
        })
        .collect()
}

/// Parse an RFC 2822 date, falling back to now on malformed input.
/// Trailing timezone comments and doubled spaces are stripped first, as
/// some servers emit them.
pub fn parse_date(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };

    let mut s = raw.trim().to_string();
    if let Some(paren) = s.rfind('(') {
        s.truncate(paren);
        s = s.trim_end().to_string();
    }
    while s.contains("  ") {
        s = s.replace("  ", " ");
    }
    s = s.replace(" ,", ",");

    DateTime::parse_from_rfc2822(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Derive the conversation identifier for a message.
///
/// Priority: In-Reply-To, then the first References entry, then the
/// normalized subject. A true reply therefore always joins its parent's
/// thread even when the subject was edited.
pub fn thread_id(header: &ParsedHeader) -> String {
    if let Some(parent) = &header.in_reply_to {
        return digest16(parent);
    }
    if let Some(root) = header.references.first() {
        return digest16(root);
    }
    digest16(&normalize_subject(header.subject.as_deref().unwrap_or("")))
}

/// Lower-case a subject with leading reply/forward prefixes removed.
/// The strip pass runs twice to catch doubled prefixes ("Re: Fwd: x").
pub fn normalize_subject(subject: &str) -> String {
    let mut out = subject.trim();
    for _ in 0..2 {
        for prefix in SUBJECT_PREFIXES {
            if let Some(head) = out.get(..prefix.len()) {
                if head.eq_ignore_ascii_case(prefix) {
                    out = out[prefix.len()..].trim_start();
                }
            }
        }
    }
    out.to_lowercase()
}

/// Stable 16-hex-character digest. Collision resistance beyond
/// deduplication is not required.
fn digest16(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}
