//! IMAP client implementation

use std::time::Duration;

use async_imap::types::{Fetch, Flag, NameAttribute};
use async_imap::Session;
use futures::TryStreamExt;
use imap_proto::types::BodyStructure;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;
use tracing::{debug, info};

use crate::message::{parse_references, EmailAddress, Envelope, MessageFlags, MessageHeader};
use crate::{Folder, ImapError, ImapResult};

type ImapStream = TlsStream<TcpStream>;

const HEADER_FETCH_ITEMS: &str = "(UID FLAGS ENVELOPE RFC822.SIZE BODYSTRUCTURE)";
const REFERENCES_FETCH_ITEMS: &str = "(UID BODY.PEEK[HEADER.FIELDS (References)])";

/// IMAP client for mailbox operations.
///
/// One client owns at most one session. Callers open a session per logical
/// operation and close it on every exit path; no retries happen here.
pub struct ImapClient {
    session: Option<Session<ImapStream>>,
    host: String,
    port: u16,
    connect_timeout: Duration,
    selected: Option<String>,
}

impl ImapClient {
    /// Create a new IMAP client
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            session: None,
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(30),
            selected: None,
        }
    }

    /// Override the connect/auth timeout
    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connect over TLS and authenticate with LOGIN.
    /// TCP connect, TLS handshake, and LOGIN each run under the configured
    /// timeout.
    pub async fn connect_login(&mut self, username: &str, password: &str) -> ImapResult<()> {
        info!("Connecting to {}:{}", self.host, self.port);

        let tcp_stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ImapError::Timeout)?
        .map_err(|e| ImapError::ConnectionFailed(e.to_string()))?;

        let connector = tokio_native_tls::native_tls::TlsConnector::new()
            .map_err(|e| ImapError::TlsError(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let tls_stream = timeout(self.connect_timeout, connector.connect(&self.host, tcp_stream))
            .await
            .map_err(|_| ImapError::Timeout)?
            .map_err(|e| ImapError::TlsError(e.to_string()))?;

        debug!("TLS connection established");

        let client = async_imap::Client::new(tls_stream);

        let session = timeout(self.connect_timeout, client.login(username, password))
            .await
            .map_err(|_| ImapError::Timeout)?
            .map_err(|(e, _)| ImapError::AuthenticationFailed(e.to_string()))?;

        self.session = Some(session);
        info!("LOGIN authentication successful for {}", username);
        Ok(())
    }

    fn session_mut(&mut self) -> ImapResult<&mut Session<ImapStream>> {
        self.session.as_mut().ok_or(ImapError::NotConnected)
    }

    /// List all folders/mailboxes
    pub async fn list_folders(&mut self) -> ImapResult<Vec<Folder>> {
        let session = self.session_mut()?;

        let mut stream = session
            .list(None, Some("*"))
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        let mut folders = Vec::new();
        while let Some(mailbox) = stream
            .try_next()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
        {
            let delim_str = mailbox.delimiter().unwrap_or("/");
            let delim_char = delim_str.chars().next();

            let name = mailbox
                .name()
                .split(delim_str)
                .last()
                .unwrap_or(mailbox.name())
                .to_string();

            let attributes: Vec<String> = mailbox
                .attributes()
                .iter()
                .map(|a| match a {
                    NameAttribute::Extension(s) => s.to_string(),
                    other => format!("\\{:?}", other),
                })
                .collect();

            folders.push(Folder::new(
                name,
                mailbox.name().to_string(),
                delim_char,
                attributes,
            ));
        }

        debug!("Found {} folders", folders.len());
        Ok(folders)
    }

    /// Select a folder if it is not already the active one
    pub async fn ensure_selected(&mut self, folder: &str) -> ImapResult<()> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }

        let session = self.session_mut()?;
        session
            .select(folder)
            .await
            .map_err(|e| ImapError::FolderNotFound(format!("{}: {}", folder, e)))?;

        self.selected = Some(folder.to_string());
        debug!("Selected folder {}", folder);
        Ok(())
    }

    /// Search the selected folder for message headers.
    ///
    /// Without a watermark the search criteria default to ALL. The result is
    /// a bounded window: UIDs above `since_uid_exclusive`, sorted descending,
    /// truncated to `limit`.
    pub async fn search_headers(
        &mut self,
        folder: &str,
        since_uid_exclusive: Option<u32>,
        limit: usize,
    ) -> ImapResult<Vec<MessageHeader>> {
        self.ensure_selected(folder).await?;
        let session = self.session_mut()?;

        let query = match since_uid_exclusive {
            Some(uid) => format!("UID {}:*", uid.saturating_add(1)),
            None => "ALL".to_string(),
        };

        let uid_set = session
            .uid_search(&query)
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        // A "n:*" range always matches the highest UID even when n exceeds
        // it, so the watermark filter is applied again here.
        let mut uids: Vec<u32> = uid_set
            .into_iter()
            .filter(|u| since_uid_exclusive.map_or(true, |w| *u > w))
            .collect();
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.truncate(limit);

        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_list: String = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let fetches: Vec<Fetch> = session
            .uid_fetch(&uid_list, HEADER_FETCH_ITEMS)
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| ImapError::ParseError(e.to_string()))?;

        let mut headers = Vec::new();
        for fetch in &fetches {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };

            let envelope = fetch.envelope().map(parse_envelope).unwrap_or_default();
            let flags = parse_flags(fetch.flags());
            let has_attachments = fetch
                .bodystructure()
                .map(structure_has_attachments)
                .unwrap_or(false);

            headers.push(MessageHeader {
                uid,
                envelope,
                flags,
                size: fetch.size.unwrap_or(0),
                has_attachments,
            });
        }

        // Second round trip: References is not part of ENVELOPE.
        let ref_fetches: Vec<Fetch> = session
            .uid_fetch(&uid_list, REFERENCES_FETCH_ITEMS)
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| ImapError::ParseError(e.to_string()))?;

        for fetch in &ref_fetches {
            if let (Some(uid), Some(raw)) = (fetch.uid, fetch.header()) {
                let refs = parse_references(&String::from_utf8_lossy(raw));
                if let Some(header) = headers.iter_mut().find(|h| h.uid == uid) {
                    header.envelope.references = refs;
                }
            }
        }

        headers.sort_unstable_by(|a, b| b.uid.cmp(&a.uid));
        debug!("Fetched {} message headers from {}", headers.len(), folder);
        Ok(headers)
    }

    /// Fetch a complete raw message without setting \Seen
    pub async fn fetch_body(&mut self, folder: &str, uid: u32) -> ImapResult<Vec<u8>> {
        self.ensure_selected(folder).await?;
        let session = self.session_mut()?;

        let mut stream = session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        while let Some(fetch) = stream
            .try_next()
            .await
            .map_err(|e| ImapError::ParseError(e.to_string()))?
        {
            if let Some(body) = fetch.body() {
                return Ok(body.to_vec());
            }
        }

        Err(ImapError::MessageNotFound(uid))
    }

    /// Add flags to a message
    pub async fn set_flags(&mut self, folder: &str, uid: u32, flags: &[&str]) -> ImapResult<()> {
        self.ensure_selected(folder).await?;
        let session = self.session_mut()?;

        session
            .uid_store(uid.to_string(), format!("+FLAGS ({})", flags.join(" ")))
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        Ok(())
    }

    /// Remove flags from a message
    pub async fn remove_flags(&mut self, folder: &str, uid: u32, flags: &[&str]) -> ImapResult<()> {
        self.ensure_selected(folder).await?;
        let session = self.session_mut()?;

        session
            .uid_store(uid.to_string(), format!("-FLAGS ({})", flags.join(" ")))
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        Ok(())
    }

    /// Mark a message as read
    pub async fn mark_read(&mut self, folder: &str, uid: u32) -> ImapResult<()> {
        self.set_flags(folder, uid, &["\\Seen"]).await
    }

    /// Mark a message as unread
    pub async fn mark_unread(&mut self, folder: &str, uid: u32) -> ImapResult<()> {
        self.remove_flags(folder, uid, &["\\Seen"]).await
    }

    /// Star a message
    pub async fn set_starred(&mut self, folder: &str, uid: u32) -> ImapResult<()> {
        self.set_flags(folder, uid, &["\\Flagged"]).await
    }

    /// Unstar a message
    pub async fn clear_starred(&mut self, folder: &str, uid: u32) -> ImapResult<()> {
        self.remove_flags(folder, uid, &["\\Flagged"]).await
    }

    /// Move a message to another folder (COPY, \Deleted, EXPUNGE)
    pub async fn move_message(
        &mut self,
        from_folder: &str,
        to_folder: &str,
        uid: u32,
    ) -> ImapResult<()> {
        self.ensure_selected(from_folder).await?;
        {
            let session = self.session_mut()?;
            session
                .uid_copy(uid.to_string(), to_folder)
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?;
        }

        self.delete_message(from_folder, uid).await
    }

    /// Flag a message \Deleted and expunge it
    pub async fn delete_message(&mut self, folder: &str, uid: u32) -> ImapResult<()> {
        self.set_flags(folder, uid, &["\\Deleted"]).await?;

        let session = self.session_mut()?;
        session
            .expunge()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        Ok(())
    }

    /// Close the connection
    pub async fn logout(&mut self) -> ImapResult<()> {
        self.selected = None;
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?;
        }
        Ok(())
    }
}

fn parse_flags<'a>(flags: impl Iterator<Item = Flag<'a>>) -> MessageFlags {
    let mut result = MessageFlags::default();
    for flag in flags {
        match flag {
            Flag::Seen => result.seen = true,
            Flag::Answered => result.answered = true,
            Flag::Flagged => result.flagged = true,
            Flag::Deleted => result.deleted = true,
            Flag::Draft => result.draft = true,
            _ => {}
        }
    }
    result
}

fn parse_envelope(env: &imap_proto::types::Envelope<'_>) -> Envelope {
    let strip_id = |raw: &std::borrow::Cow<'_, [u8]>| {
        let s = String::from_utf8_lossy(raw);
        let trimmed = s.trim().trim_matches(|c| c == '<' || c == '>').to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    };

    Envelope {
        message_id: env.message_id.as_ref().and_then(strip_id),
        subject: env
            .subject
            .as_ref()
            .map(|s| String::from_utf8_lossy(s).to_string()),
        from: parse_addresses(env.from.as_ref()),
        to: parse_addresses(env.to.as_ref()),
        cc: parse_addresses(env.cc.as_ref()),
        date: env
            .date
            .as_ref()
            .map(|s| String::from_utf8_lossy(s).to_string()),
        in_reply_to: env.in_reply_to.as_ref().and_then(strip_id),
        references: Vec::new(),
    }
}

fn parse_addresses(addrs: Option<&Vec<imap_proto::types::Address<'_>>>) -> Vec<EmailAddress> {
    addrs
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let mailbox = a
                        .mailbox
                        .as_ref()
                        .map(|s| String::from_utf8_lossy(s).to_string())
                        .unwrap_or_default();
                    if mailbox.is_empty() {
                        return None;
                    }
                    let host = a
                        .host
                        .as_ref()
                        .map(|s| String::from_utf8_lossy(s).to_string())
                        .unwrap_or_default();
                    let address = if host.is_empty() {
                        mailbox
                    } else {
                        format!("{}@{}", mailbox, host)
                    };
                    let name = a
                        .name
                        .as_ref()
                        .map(|s| String::from_utf8_lossy(s).to_string());
                    Some(EmailAddress::new(name, address))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Attachment presence from BODYSTRUCTURE: any part with an attachment
/// disposition, or any non-text basic part.
fn structure_has_attachments(body: &BodyStructure<'_>) -> bool {
    match body {
        BodyStructure::Basic { common, .. } => {
            if let Some(disposition) = &common.disposition {
                if disposition.ty.eq_ignore_ascii_case("attachment") {
                    return true;
                }
            }
            !common.ty.ty.eq_ignore_ascii_case("text")
        }
        BodyStructure::Text { .. } => false,
        BodyStructure::Message { body, .. } => structure_has_attachments(body),
        BodyStructure::Multipart { bodies, .. } => bodies.iter().any(structure_has_attachments),
    }
}
