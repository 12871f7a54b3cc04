//! SMTP client implementation

use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;
use uuid::Uuid;

use crate::{SmtpError, SmtpResult};

/// Email message to send
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// From address
    pub from: String,
    /// From display name
    pub from_name: Option<String>,
    /// To addresses
    pub to: Vec<String>,
    /// CC addresses
    pub cc: Vec<String>,
    /// BCC addresses
    pub bcc: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub text_body: Option<String>,
    /// HTML body
    pub html_body: Option<String>,
    /// In-Reply-To message id (bare, no angle brackets)
    pub in_reply_to: Option<String>,
    /// References chain (bare ids, oldest first)
    pub references: Vec<String>,
}

impl OutgoingMessage {
    /// Create a new message builder
    pub fn new(from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            from_name: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            text_body: None,
            html_body: None,
            in_reply_to: None,
            references: Vec::new(),
        }
    }

    /// Set the from display name
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// Add a To recipient
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Add a CC recipient
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Add a BCC recipient
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    /// Set the plain text body
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Set the HTML body
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Set the In-Reply-To header
    pub fn reply_to_message(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    /// Append a message id to the References chain
    pub fn reference(mut self, message_id: impl Into<String>) -> Self {
        self.references.push(message_id.into());
        self
    }
}

/// SMTP client for sending emails
pub struct SmtpClient {
    host: String,
    port: u16,
}

impl SmtpClient {
    /// Create a new SMTP client
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn transport(
        &self,
        email: &str,
        password: &str,
    ) -> SmtpResult<AsyncSmtpTransport<Tokio1Executor>> {
        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?
                .port(self.port)
                .credentials(Credentials::new(email.to_string(), password.to_string()))
                .authentication(vec![Mechanism::Plain, Mechanism::Login])
                .build(),
        )
    }

    /// Verify that the server accepts a connection with these credentials
    pub async fn verify_password(&self, email: &str, password: &str) -> SmtpResult<()> {
        let transport = self.transport(email, password)?;
        let ok = transport
            .test_connection()
            .await
            .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?;
        if !ok {
            return Err(SmtpError::AuthenticationFailed(format!(
                "server {} rejected the connection test",
                self.host
            )));
        }
        Ok(())
    }

    /// Transmit a message with password authentication.
    /// Returns the Message-ID assigned to the outgoing message.
    pub async fn send_password(
        &self,
        email: &str,
        password: &str,
        message: OutgoingMessage,
    ) -> SmtpResult<String> {
        let (lettre_message, message_id) = build_lettre_message(&message)?;

        info!("Sending email via {}:{}", self.host, self.port);
        let transport = self.transport(email, password)?;
        transport
            .send(lettre_message)
            .await
            .map_err(|e| SmtpError::SendFailed(e.to_string()))?;

        info!("Email sent, message id {}", message_id);
        Ok(message_id)
    }
}

/// Build a lettre Message from an OutgoingMessage.
/// Returns the message together with its generated Message-ID.
pub fn build_lettre_message(msg: &OutgoingMessage) -> SmtpResult<(Message, String)> {
    let from_address = msg
        .from
        .parse()
        .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", msg.from, e)))?;
    let from_mailbox = Mailbox::new(msg.from_name.clone(), from_address);

    let domain = msg.from.split('@').nth(1).unwrap_or("localhost");
    let message_id = format!("{}@{}", Uuid::new_v4(), domain);

    let mut builder = Message::builder()
        .from(from_mailbox)
        .subject(&msg.subject)
        .message_id(Some(format!("<{}>", message_id)));

    for to in &msg.to {
        let mailbox = Mailbox::new(
            None,
            to.parse()
                .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", to, e)))?,
        );
        builder = builder.to(mailbox);
    }

    for cc in &msg.cc {
        let mailbox = Mailbox::new(
            None,
            cc.parse()
                .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", cc, e)))?,
        );
        builder = builder.cc(mailbox);
    }

    for bcc in &msg.bcc {
        let mailbox = Mailbox::new(
            None,
            bcc.parse()
                .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", bcc, e)))?,
        );
        builder = builder.bcc(mailbox);
    }

    if let Some(reply_to) = &msg.in_reply_to {
        builder = builder.in_reply_to(format!("<{}>", reply_to));
    }

    if !msg.references.is_empty() {
        let chain: Vec<String> = msg.references.iter().map(|r| format!("<{}>", r)).collect();
        builder = builder.references(chain.join(" "));
    }

    let body_part = match (&msg.text_body, &msg.html_body) {
        (Some(text), Some(html)) => MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
        (Some(text), None) => MultiPart::alternative().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone()),
        ),
        (None, Some(html)) => MultiPart::alternative().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html.clone()),
        ),
        (None, None) => MultiPart::alternative().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(String::new()),
        ),
    };

    let message = builder
        .multipart(body_part)
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))?;

    Ok((message, message_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_message_with_reply_headers() {
        let msg = OutgoingMessage::new("me@example.com", "Re: Hello")
            .to("you@example.com")
            .text("hi")
            .reply_to_message("orig@example.com")
            .reference("root@example.com")
            .reference("orig@example.com");

        let (built, message_id) = build_lettre_message(&msg).expect("message should build");
        assert!(message_id.ends_with("@example.com"));

        let rendered = String::from_utf8(built.formatted()).expect("utf8");
        assert!(rendered.contains("In-Reply-To: <orig@example.com>"));
        assert!(rendered.contains("<root@example.com> <orig@example.com>"));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let msg = OutgoingMessage::new("me@example.com", "Hello").to("not-an-address");
        assert!(matches!(
            build_lettre_message(&msg),
            Err(SmtpError::InvalidAddress(_))
        ));
    }

    #[test]
    fn empty_bodies_still_build() {
        let msg = OutgoingMessage::new("me@example.com", "Hello").to("you@example.com");
        assert!(build_lettre_message(&msg).is_ok());
    }
}
