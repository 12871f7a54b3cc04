//! Lazy message body loading

use std::sync::Arc;
use std::time::Duration;

use mail_parser::{MessageParser, MimeHeaders};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::database::{Database, NewAttachment, StoredAttachment};
use crate::store::MailboxConnector;
use crate::{EngineError, EngineResult};

const SNIPPET_LEN: usize = 200;

/// Result of a body load. `degraded` marks a remote failure where only
/// cached data (usually the snippet) is available.
#[derive(Debug, Clone, Default)]
pub struct LoadedBody {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<StoredAttachment>,
    pub degraded: bool,
}

/// Fetches, parses, and caches message bodies on demand.
///
/// Bodies are loaded remotely at most once; afterwards the cached copy is
/// served without opening a session.
pub struct BodyLoader {
    db: Arc<Database>,
    connector: Arc<dyn MailboxConnector>,
    fetch_timeout: Duration,
}

impl BodyLoader {
    pub fn new(db: Arc<Database>, connector: Arc<dyn MailboxConnector>) -> Self {
        Self {
            db,
            connector,
            fetch_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Load the body for a cached message.
    ///
    /// An unknown row id is an error; a remote failure is not. The latter
    /// returns a degraded result carrying whatever the cache holds.
    pub async fn load_body(&self, row_id: i64) -> EngineResult<LoadedBody> {
        let msg = self.db.get_message(row_id).await?;

        if msg.body_text.is_some() || msg.body_html.is_some() {
            debug!(row_id, "serving cached body");
            return Ok(LoadedBody {
                text: msg.body_text,
                html: msg.body_html,
                attachments: self.db.get_attachments(row_id).await?,
                degraded: false,
            });
        }

        let Some(uid) = msg.uid else {
            // Local-only row with no cached body; nothing to fetch
            return Ok(LoadedBody {
                text: msg.snippet,
                degraded: true,
                ..Default::default()
            });
        };

        match self
            .fetch_remote(&msg.account_id, &msg.folder, uid as u32)
            .await
        {
            Ok(raw) => {
                let parsed = parse_mime(&raw);
                let snippet = msg
                    .snippet
                    .is_none()
                    .then(|| parsed.text.as_deref().map(make_snippet))
                    .flatten();

                self.db
                    .save_body(
                        row_id,
                        parsed.text.as_deref(),
                        parsed.html.as_deref(),
                        snippet.as_deref(),
                    )
                    .await?;
                self.db
                    .insert_attachments(row_id, &parsed.attachments)
                    .await?;

                Ok(LoadedBody {
                    text: parsed.text,
                    html: parsed.html,
                    attachments: self.db.get_attachments(row_id).await?,
                    degraded: false,
                })
            }
            Err(e) => {
                warn!(row_id, "body fetch failed, serving degraded view: {}", e);
                Ok(LoadedBody {
                    text: msg.snippet,
                    degraded: true,
                    ..Default::default()
                })
            }
        }
    }

    async fn fetch_remote(
        &self,
        account_id: &str,
        folder: &str,
        uid: u32,
    ) -> EngineResult<Vec<u8>> {
        let account = self.db.get_account(account_id).await?;

        let mut remote = timeout(self.fetch_timeout, self.connector.connect(&account))
            .await
            .map_err(|_| EngineError::Connection("body fetch timed out".to_string()))??;

        let result = timeout(self.fetch_timeout, remote.fetch_body(folder, uid))
            .await
            .map_err(|_| EngineError::Connection("body fetch timed out".to_string()))
            .and_then(|r| r);

        if let Err(e) = remote.close().await {
            warn!("error closing session after body fetch: {}", e);
        }
        result
    }
}

struct ParsedMime {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<NewAttachment>,
}

/// Extract bodies and attachment metadata from raw RFC 822 bytes.
/// Unparseable input yields an empty result rather than an error.
fn parse_mime(raw: &[u8]) -> ParsedMime {
    let Some(message) = MessageParser::default().parse(raw) else {
        return ParsedMime {
            text: None,
            html: None,
            attachments: Vec::new(),
        };
    };

    let attachments = message
        .attachments()
        .map(|att| {
            let content_type = att.content_type().map(|ct| {
                let ctype = ct.ctype();
                match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ctype, subtype),
                    None => ctype.to_string(),
                }
            });

            NewAttachment {
                filename: att.attachment_name().map(|s| s.to_string()),
                content_type,
                size: att.len() as i64,
                content_id: att.content_id().map(|s| s.to_string()),
                is_inline: att.content_disposition().is_some_and(|cd| cd.is_inline()),
            }
        })
        .collect();

    // body_html synthesizes an HTML rendition for text-only mail; only a
    // real text/html part counts as an HTML body.
    let html = if message.html_body_count() > 0 {
        message.body_html(0).map(|s| s.to_string())
    } else {
        None
    };

    ParsedMime {
        text: message.body_text(0).map(|s| s.to_string()),
        html,
        attachments,
    }
}

/// Whitespace-collapsed preview of the text body
pub(crate) fn make_snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_LEN {
        collapsed
    } else {
        let head: String = collapsed.chars().take(SNIPPET_LEN).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, ServerConfig};
    use crate::database::NewMessage;
    use crate::store::testing::{MockConnector, MockState};
    use crate::vault::SecretVault;

    const SIMPLE_MESSAGE: &str = "From: alice@example.com\r\n\
        To: me@example.com\r\n\
        Subject: hi\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        Hello there,\r\nthis is the body.\r\n";

    async fn seed(db: &Database, uid: Option<i64>) -> i64 {
        let vault = SecretVault::from_key_material(None).unwrap();
        let account = Account {
            id: "a1".to_string(),
            email: "me@example.com".to_string(),
            display_name: None,
            provider: "custom".to_string(),
            config: ServerConfig::new("imap.example.com", 993, "smtp.example.com", 587),
            secret: vault.encrypt("hunter2").unwrap(),
            active: true,
            last_sync: None,
            last_sync_status: None,
            sync_error: None,
        };
        db.insert_account(&account).await.unwrap();

        db.insert_message(
            "a1",
            &NewMessage {
                uid,
                thread_id: "t".to_string(),
                folder: "INBOX".to_string(),
                snippet: Some("cached snippet".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn cached_body_skips_the_network() {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let row_id = seed(&db, Some(1)).await;
        db.save_body(row_id, Some("hello"), None, None).await.unwrap();

        let connector = MockConnector::new(MockState::default());
        let loader = BodyLoader::new(Arc::clone(&db), Arc::new(connector.clone()));

        let body = loader.load_body(row_id).await.unwrap();
        assert_eq!(body.text.as_deref(), Some("hello"));
        assert!(!body.degraded);
        assert_eq!(connector.state.lock().unwrap().connects, 0);
    }

    #[tokio::test]
    async fn fetched_body_is_cached_for_next_time() {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let row_id = seed(&db, Some(7)).await;

        let mut state = MockState::default();
        state.bodies.insert(
            ("INBOX".to_string(), 7),
            SIMPLE_MESSAGE.as_bytes().to_vec(),
        );
        let connector = MockConnector::new(state);
        let loader = BodyLoader::new(Arc::clone(&db), Arc::new(connector.clone()));

        let body = loader.load_body(row_id).await.unwrap();
        assert!(body.text.as_deref().unwrap().contains("Hello there"));
        assert!(!body.degraded);
        assert_eq!(connector.state.lock().unwrap().connects, 1);

        // Second load is served from the cache
        loader.load_body(row_id).await.unwrap();
        assert_eq!(connector.state.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn slow_fetch_degrades_to_snippet() {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let row_id = seed(&db, Some(7)).await;

        let mut state = MockState::default();
        state.fetch_delay = Some(Duration::from_secs(5));
        state.bodies.insert(
            ("INBOX".to_string(), 7),
            SIMPLE_MESSAGE.as_bytes().to_vec(),
        );
        let connector = MockConnector::new(state);
        let loader = BodyLoader::new(Arc::clone(&db), Arc::new(connector))
            .with_timeout(Duration::from_millis(20));

        let body = loader.load_body(row_id).await.unwrap();
        assert!(body.degraded);
        assert_eq!(body.text.as_deref(), Some("cached snippet"));
    }

    #[tokio::test]
    async fn missing_remote_body_degrades() {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let row_id = seed(&db, Some(7)).await;

        let connector = MockConnector::new(MockState::default());
        let loader = BodyLoader::new(Arc::clone(&db), Arc::new(connector));

        let body = loader.load_body(row_id).await.unwrap();
        assert!(body.degraded);
    }

    #[tokio::test]
    async fn unknown_row_is_an_error() {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let connector = MockConnector::new(MockState::default());
        let loader = BodyLoader::new(Arc::clone(&db), Arc::new(connector));

        assert!(matches!(
            loader.load_body(999).await,
            Err(EngineError::MessageNotFound(999))
        ));
    }

    #[test]
    fn snippet_collapses_whitespace_and_truncates() {
        assert_eq!(make_snippet("a  b\n\nc"), "a b c");

        let long = "word ".repeat(100);
        let snippet = make_snippet(&long);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), SNIPPET_LEN + 3);
    }

    #[test]
    fn parse_mime_extracts_text_body() {
        let parsed = parse_mime(SIMPLE_MESSAGE.as_bytes());
        assert!(parsed.text.unwrap().contains("this is the body"));
        assert!(parsed.html.is_none());
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn parse_mime_keeps_a_real_html_part() {
        let raw = "From: alice@example.com\r\n\
            To: me@example.com\r\n\
            Subject: hi\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>Hello <b>there</b></p>\r\n";

        let parsed = parse_mime(raw.as_bytes());
        assert!(parsed.html.unwrap().contains("<b>there</b>"));
    }

    #[test]
    fn parse_mime_reports_attachment_metadata() {
        let raw = "From: alice@example.com\r\n\
            To: me@example.com\r\n\
            Subject: report\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"b\"\r\n\
            \r\n\
            --b\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            See attached.\r\n\
            --b\r\n\
            Content-Type: application/pdf; name=\"report.pdf\"\r\n\
            Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
            \r\n\
            %PDF-1.4 fake\r\n\
            --b--\r\n";

        let parsed = parse_mime(raw.as_bytes());
        assert_eq!(parsed.attachments.len(), 1);
        let att = &parsed.attachments[0];
        assert_eq!(att.filename.as_deref(), Some("report.pdf"));
        assert_eq!(att.content_type.as_deref(), Some("application/pdf"));
        assert!(!att.is_inline);
    }

    #[test]
    fn garbage_input_parses_to_empty() {
        let parsed = parse_mime(b"\xff\xfe not mail at all");
        assert!(parsed.attachments.is_empty());
    }
}
