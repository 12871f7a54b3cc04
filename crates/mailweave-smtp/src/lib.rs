//! SMTP adapter for Mailweave
//!
//! Verifies connections and transmits composed messages over a STARTTLS
//! relay. Send failures propagate fully; there is no silent fallback.

mod client;
mod error;

pub use client::{OutgoingMessage, SmtpClient};
pub use error::{SmtpError, SmtpResult};
