//! Remote mailbox trait seam and the IMAP-backed implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use mailweave_imap::{Folder, ImapClient, MessageHeader};

use crate::account::Account;
use crate::headers::RawHeader;
use crate::vault::SecretVault;
use crate::EngineResult;

/// Header summary of one remote message, protocol-agnostic
#[derive(Debug, Clone, Default)]
pub struct RemoteHeader {
    pub uid: u32,
    pub seen: bool,
    pub flagged: bool,
    pub has_attachments: bool,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub date: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

impl RemoteHeader {
    /// Borrowed view for the header parser
    pub fn raw_header(&self) -> RawHeader<'_> {
        RawHeader {
            message_id: self.message_id.as_deref(),
            subject: self.subject.as_deref(),
            from: self.from.as_deref(),
            to: self.to.as_deref(),
            cc: self.cc.as_deref(),
            date: self.date.as_deref(),
            in_reply_to: self.in_reply_to.as_deref(),
            references: self.references.as_deref(),
        }
    }
}

/// One authenticated session against a remote mailbox.
///
/// Implementations hold an open connection; `close` must be called on
/// every exit path.
#[async_trait]
pub trait RemoteMailbox: Send {
    async fn list_folders(&mut self) -> EngineResult<Vec<Folder>>;

    /// Headers above the UID watermark, newest first, at most `limit`
    async fn search_headers(
        &mut self,
        folder: &str,
        since_uid_exclusive: Option<u32>,
        limit: usize,
    ) -> EngineResult<Vec<RemoteHeader>>;

    /// Raw RFC 822 bytes, without marking the message read
    async fn fetch_body(&mut self, folder: &str, uid: u32) -> EngineResult<Vec<u8>>;

    async fn set_seen(&mut self, folder: &str, uid: u32, seen: bool) -> EngineResult<()>;

    async fn set_flagged(&mut self, folder: &str, uid: u32, flagged: bool) -> EngineResult<()>;

    async fn move_message(&mut self, from: &str, to: &str, uid: u32) -> EngineResult<()>;

    async fn delete_message(&mut self, folder: &str, uid: u32) -> EngineResult<()>;

    async fn close(&mut self) -> EngineResult<()>;
}

/// Factory for [`RemoteMailbox`] sessions
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, account: &Account) -> EngineResult<Box<dyn RemoteMailbox>>;
}

/// Connector that decrypts the account secret and opens a TLS IMAP session
pub struct ImapConnector {
    vault: Arc<SecretVault>,
    connect_timeout: Duration,
}

impl ImapConnector {
    pub fn new(vault: Arc<SecretVault>) -> Self {
        Self {
            vault,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, account: &Account) -> EngineResult<Box<dyn RemoteMailbox>> {
        let password = self.vault.decrypt(&account.secret)?;

        let mut client = ImapClient::new(&account.config.imap_host, account.config.imap_port)
            .with_timeout(self.connect_timeout);
        client.connect_login(&account.email, &password).await?;

        debug!(account = %account.email, "opened imap session");
        Ok(Box::new(ImapMailbox { client }))
    }
}

struct ImapMailbox {
    client: ImapClient,
}

fn to_remote_header(h: MessageHeader) -> RemoteHeader {
    let join = |addrs: &[mailweave_imap::EmailAddress]| {
        if addrs.is_empty() {
            None
        } else {
            Some(
                addrs
                    .iter()
                    .map(|a| a.to_display_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }
    };

    RemoteHeader {
        uid: h.uid,
        seen: h.flags.seen,
        flagged: h.flags.flagged,
        has_attachments: h.has_attachments,
        message_id: h.envelope.message_id,
        subject: h.envelope.subject,
        from: join(&h.envelope.from),
        to: join(&h.envelope.to),
        cc: join(&h.envelope.cc),
        date: h.envelope.date,
        in_reply_to: h.envelope.in_reply_to,
        references: if h.envelope.references.is_empty() {
            None
        } else {
            Some(h.envelope.references.join(" "))
        },
    }
}

#[async_trait]
impl RemoteMailbox for ImapMailbox {
    async fn list_folders(&mut self) -> EngineResult<Vec<Folder>> {
        Ok(self.client.list_folders().await?)
    }

    async fn search_headers(
        &mut self,
        folder: &str,
        since_uid_exclusive: Option<u32>,
        limit: usize,
    ) -> EngineResult<Vec<RemoteHeader>> {
        let headers = self
            .client
            .search_headers(folder, since_uid_exclusive, limit)
            .await?;
        Ok(headers.into_iter().map(to_remote_header).collect())
    }

    async fn fetch_body(&mut self, folder: &str, uid: u32) -> EngineResult<Vec<u8>> {
        Ok(self.client.fetch_body(folder, uid).await?)
    }

    async fn set_seen(&mut self, folder: &str, uid: u32, seen: bool) -> EngineResult<()> {
        if seen {
            self.client.mark_read(folder, uid).await?;
        } else {
            self.client.mark_unread(folder, uid).await?;
        }
        Ok(())
    }

    async fn set_flagged(&mut self, folder: &str, uid: u32, flagged: bool) -> EngineResult<()> {
        if flagged {
            self.client.set_starred(folder, uid).await?;
        } else {
            self.client.clear_starred(folder, uid).await?;
        }
        Ok(())
    }

    async fn move_message(&mut self, from: &str, to: &str, uid: u32) -> EngineResult<()> {
        Ok(self.client.move_message(from, to, uid).await?)
    }

    async fn delete_message(&mut self, folder: &str, uid: u32) -> EngineResult<()> {
        Ok(self.client.delete_message(folder, uid).await?)
    }

    async fn close(&mut self) -> EngineResult<()> {
        Ok(self.client.logout().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::EngineError;

    /// Shared scripted state for the mock connector and its sessions
    #[derive(Default)]
    pub struct MockState {
        pub folders: Vec<Folder>,
        pub headers: HashMap<String, Vec<RemoteHeader>>,
        pub bodies: HashMap<(String, u32), Vec<u8>>,
        pub fail_folders: Vec<String>,
        pub fail_connect: bool,
        pub fetch_delay: Option<Duration>,
        pub connects: usize,
        pub seen_calls: Vec<(String, u32, bool)>,
        pub flagged_calls: Vec<(String, u32, bool)>,
    }

    #[derive(Clone)]
    pub struct MockConnector {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockConnector {
        pub fn new(state: MockState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }
    }

    #[async_trait]
    impl MailboxConnector for MockConnector {
        async fn connect(&self, _account: &Account) -> EngineResult<Box<dyn RemoteMailbox>> {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.fail_connect {
                return Err(EngineError::Connection("mock connect refused".to_string()));
            }
            Ok(Box::new(MockMailbox {
                state: Arc::clone(&self.state),
            }))
        }
    }

    pub struct MockMailbox {
        state: Arc<Mutex<MockState>>,
    }

    #[async_trait]
    impl RemoteMailbox for MockMailbox {
        async fn list_folders(&mut self) -> EngineResult<Vec<Folder>> {
            Ok(self.state.lock().unwrap().folders.clone())
        }

        async fn search_headers(
            &mut self,
            folder: &str,
            since_uid_exclusive: Option<u32>,
            limit: usize,
        ) -> EngineResult<Vec<RemoteHeader>> {
            let state = self.state.lock().unwrap();
            if state.fail_folders.iter().any(|f| f == folder) {
                return Err(EngineError::Protocol(format!(
                    "mock failure for folder {}",
                    folder
                )));
            }
            let mut headers: Vec<RemoteHeader> = state
                .headers
                .get(folder)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|h| since_uid_exclusive.map_or(true, |w| h.uid > w))
                .collect();
            headers.sort_unstable_by(|a, b| b.uid.cmp(&a.uid));
            headers.truncate(limit);
            Ok(headers)
        }

        async fn fetch_body(&mut self, folder: &str, uid: u32) -> EngineResult<Vec<u8>> {
            let delay = self.state.lock().unwrap().fetch_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.state
                .lock()
                .unwrap()
                .bodies
                .get(&(folder.to_string(), uid))
                .cloned()
                .ok_or(EngineError::MessageNotFound(uid as i64))
        }

        async fn set_seen(&mut self, folder: &str, uid: u32, seen: bool) -> EngineResult<()> {
            self.state
                .lock()
                .unwrap()
                .seen_calls
                .push((folder.to_string(), uid, seen));
            Ok(())
        }

        async fn set_flagged(&mut self, folder: &str, uid: u32, flagged: bool) -> EngineResult<()> {
            self.state
                .lock()
                .unwrap()
                .flagged_calls
                .push((folder.to_string(), uid, flagged));
            Ok(())
        }

        async fn move_message(&mut self, _from: &str, _to: &str, _uid: u32) -> EngineResult<()> {
            Ok(())
        }

        async fn delete_message(&mut self, _folder: &str, _uid: u32) -> EngineResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }
}
