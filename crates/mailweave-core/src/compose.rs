//! Reply/forward composition and outbound sending

use std::sync::Arc;

use tracing::info;

use mailweave_smtp::{OutgoingMessage, SmtpClient};

use crate::account::Account;
use crate::database::{Database, DraftPayload, NewMessage, StoredMessage};
use crate::headers::{parse_header, thread_id, RawHeader};
use crate::vault::SecretVault;
use crate::{EngineError, EngineResult};

/// A composed email ready to edit or send
#[derive(Debug, Clone, Default)]
pub struct ComposedEmail {
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Bare message id of the message being replied to
    pub in_reply_to: Option<String>,
    /// Bare ids, oldest first
    pub references: Vec<String>,
}

/// Build a reply to a cached message.
///
/// Plain reply addresses the original sender. Reply-all additionally
/// carries the original To and Cc recipients, minus the sender (already
/// in To) and minus `own_address`, deduplicated case-insensitively.
pub fn create_reply(
    original: &StoredMessage,
    body: &str,
    reply_all: bool,
    own_address: &str,
) -> ComposedEmail {
    let sender = original.from_address.clone().unwrap_or_default();

    let mut to = Vec::new();
    if !sender.is_empty() {
        to.push(sender.clone());
    }

    let mut cc = Vec::new();
    if reply_all {
        for addr in original.to_list().into_iter().chain(original.cc_list()) {
            let is_self = addr.eq_ignore_ascii_case(own_address);
            let is_sender = addr.eq_ignore_ascii_case(&sender);
            let dup = to.iter().chain(cc.iter()).any(|a: &String| a.eq_ignore_ascii_case(&addr));
            if !is_self && !is_sender && !dup {
                cc.push(addr);
            }
        }
    }

    let subject = reply_subject(original.subject.as_deref().unwrap_or(""));

    let mut references = original.references_list();
    if let Some(id) = &original.message_id {
        if !references.iter().any(|r| r == id) {
            references.push(id.clone());
        }
    }

    ComposedEmail {
        from: own_address.to_string(),
        to,
        cc,
        subject,
        body_text: Some(format!("{}\n\n{}", body, quote_body(original))),
        in_reply_to: original.message_id.clone(),
        references,
        ..Default::default()
    }
}

/// Build a forward of a cached message. Recipients are supplied by the
/// caller; no reply threading headers are attached.
pub fn create_forward(
    original: &StoredMessage,
    body: &str,
    to: Vec<String>,
    own_address: &str,
) -> ComposedEmail {
    let subject = original.subject.as_deref().unwrap_or("").trim();
    let subject = match subject.get(..4) {
        Some(head) if head.eq_ignore_ascii_case("fwd:") => subject.to_string(),
        _ => format!("Fwd: {}", subject),
    };

    ComposedEmail {
        from: own_address.to_string(),
        to,
        subject,
        body_text: Some(format!("{}\n\n{}", body, quote_body(original))),
        ..Default::default()
    }
}

fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    match trimmed.get(..3) {
        Some(head) if head.eq_ignore_ascii_case("re:") => trimmed.to_string(),
        _ => format!("Re: {}", trimmed),
    }
}

/// Original text quoted with a "> " prefix under an attribution line
fn quote_body(original: &StoredMessage) -> String {
    let sender = original
        .from_name
        .clone()
        .or_else(|| original.from_address.clone())
        .unwrap_or_else(|| "unknown sender".to_string());
    let date = original.date().format("%a, %d %b %Y %H:%M");

    let quoted_source = original
        .body_text
        .as_deref()
        .or(original.snippet.as_deref())
        .unwrap_or("");
    let quoted: String = quoted_source
        .lines()
        .map(|line| format!("> {}\n", line))
        .collect();

    format!("On {}, {} wrote:\n{}", date, sender, quoted)
}

/// Sends drafts over SMTP and records the sent copy.
///
/// The wire send happens first; only a successful transmission is
/// recorded in the Sent folder and removes the draft. A failed send
/// leaves the draft untouched for retry.
pub struct Mailer {
    db: Arc<Database>,
    vault: Arc<SecretVault>,
}

impl Mailer {
    pub fn new(db: Arc<Database>, vault: Arc<SecretVault>) -> Self {
        Self { db, vault }
    }

    /// Persist a reply to a cached message as a draft
    pub async fn create_reply_draft(
        &self,
        original_row_id: i64,
        body: &str,
        reply_all: bool,
    ) -> EngineResult<i64> {
        let original = self.db.get_message(original_row_id).await?;
        let account = self.db.get_account(&original.account_id).await?;

        let composed = create_reply(&original, body, reply_all, &account.email);

        self.db
            .create_draft(&DraftPayload {
                account_id: Some(account.id),
                to: composed.to,
                cc: composed.cc,
                bcc: composed.bcc,
                subject: Some(composed.subject),
                body_text: composed.body_text,
                body_html: composed.body_html,
                in_reply_to_id: Some(original_row_id),
            })
            .await
    }

    /// Send a draft and record the sent copy.
    /// Returns the local row id of the Sent-folder record.
    pub async fn send_draft(&self, draft_id: i64) -> EngineResult<i64> {
        let draft = self.db.get_draft(draft_id).await?;

        let account_id = draft.account_id.clone().ok_or_else(|| {
            EngineError::Validation("draft has no sending account".to_string())
        })?;
        let account = self.db.get_account(&account_id).await?;

        let to = draft.to_list();
        let cc = draft.cc_list();
        let bcc = draft.bcc_list();
        if to.is_empty() && cc.is_empty() && bcc.is_empty() {
            return Err(EngineError::Validation(
                "draft has no recipients".to_string(),
            ));
        }

        // A decryption failure aborts before anything touches the wire
        let password = self.vault.decrypt(&account.secret)?;

        let (in_reply_to, references) = match draft.in_reply_to_id {
            Some(row_id) => match self.db.get_message(row_id).await {
                Ok(original) => {
                    let composed = create_reply(&original, "", false, &account.email);
                    (composed.in_reply_to, composed.references)
                }
                // The original may have been deleted since the draft was
                // created; send without threading headers.
                Err(EngineError::MessageNotFound(_)) => (None, Vec::new()),
                Err(e) => return Err(e),
            },
            None => (None, Vec::new()),
        };

        let mut outgoing = OutgoingMessage::new(
            account.email.clone(),
            draft.subject.clone().unwrap_or_default(),
        );
        if let Some(name) = &account.display_name {
            outgoing = outgoing.from_name(name.clone());
        }
        for addr in &to {
            outgoing = outgoing.to(addr.clone());
        }
        for addr in &cc {
            outgoing = outgoing.cc(addr.clone());
        }
        for addr in &bcc {
            outgoing = outgoing.bcc(addr.clone());
        }
        if let Some(text) = &draft.body_text {
            outgoing = outgoing.text(text.clone());
        }
        if let Some(html) = &draft.body_html {
            outgoing = outgoing.html(html.clone());
        }
        if let Some(id) = &in_reply_to {
            outgoing = outgoing.reply_to_message(id.clone());
        }
        for id in &references {
            outgoing = outgoing.reference(id.clone());
        }

        let smtp = SmtpClient::new(&account.config.smtp_host, account.config.smtp_port);
        let message_id = smtp
            .send_password(&account.email, &password, outgoing)
            .await?;

        let sent_row = self
            .record_sent(&account, &draft, &message_id, in_reply_to, references)
            .await?;
        self.db.delete_draft(draft_id).await?;

        info!(account = %account.email, "draft {} sent as {}", draft_id, message_id);
        Ok(sent_row)
    }

    async fn record_sent(
        &self,
        account: &Account,
        draft: &crate::database::StoredDraft,
        message_id: &str,
        in_reply_to: Option<String>,
        references: Vec<String>,
    ) -> EngineResult<i64> {
        let refs_joined = references.join(" ");
        let raw = RawHeader {
            message_id: Some(message_id),
            subject: draft.subject.as_deref(),
            in_reply_to: in_reply_to.as_deref(),
            references: if refs_joined.is_empty() {
                None
            } else {
                Some(&refs_joined)
            },
            ..Default::default()
        };
        let parsed = parse_header(&raw);

        let record = NewMessage {
            uid: None,
            message_id: Some(message_id.to_string()),
            thread_id: thread_id(&parsed),
            folder: "Sent".to_string(),
            from_address: Some(account.email.clone()),
            from_name: account.display_name.clone(),
            to: draft.to_list(),
            cc: draft.cc_list(),
            subject: draft.subject.clone(),
            snippet: draft.body_text.as_deref().map(crate::body::make_snippet),
            body_text: draft.body_text.clone(),
            body_html: draft.body_html.clone(),
            date_epoch: chrono::Utc::now().timestamp(),
            is_read: true,
            is_starred: false,
            has_attachments: false,
            in_reply_to,
            references,
            category: None,
        };

        self.db.insert_sent_copy(&account.id, &record).await
    }
}
