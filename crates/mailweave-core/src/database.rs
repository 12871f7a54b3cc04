//! Local message cache using SQLite

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::account::{Account, EncryptedSecret, ServerConfig};
use crate::{EngineError, EngineResult};

/// Cached message record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub account_id: String,
    /// Remote UID; NULL for locally recorded sent copies
    pub uid: Option<i64>,
    pub message_id: Option<String>,
    pub thread_id: String,
    pub folder: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    /// JSON array of recipient addresses
    pub to_json: String,
    pub cc_json: String,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Unix timestamp for date sorting
    pub date_epoch: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub in_reply_to: Option<String>,
    pub references_json: String,
    pub category: Option<String>,
}

impl StoredMessage {
    pub fn date(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.date_epoch, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn to_list(&self) -> Vec<String> {
        serde_json::from_str(&self.to_json).unwrap_or_default()
    }

    pub fn cc_list(&self) -> Vec<String> {
        serde_json::from_str(&self.cc_json).unwrap_or_default()
    }

    pub fn references_list(&self) -> Vec<String> {
        serde_json::from_str(&self.references_json).unwrap_or_default()
    }
}

/// New message row for insertion
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub uid: Option<i64>,
    pub message_id: Option<String>,
    pub thread_id: String,
    pub folder: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub date_epoch: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub category: Option<String>,
}

/// Cached attachment metadata
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAttachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: i64,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

/// New attachment metadata for insertion
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: i64,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

/// Stored draft record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDraft {
    pub id: i64,
    pub account_id: Option<String>,
    pub to_json: String,
    pub cc_json: String,
    pub bcc_json: String,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Local row id of the message being replied to, if any
    pub in_reply_to_id: Option<i64>,
}

impl StoredDraft {
    pub fn to_list(&self) -> Vec<String> {
        serde_json::from_str(&self.to_json).unwrap_or_default()
    }

    pub fn cc_list(&self) -> Vec<String> {
        serde_json::from_str(&self.cc_json).unwrap_or_default()
    }

    pub fn bcc_list(&self) -> Vec<String> {
        serde_json::from_str(&self.bcc_json).unwrap_or_default()
    }
}

/// Draft contents for create/update
#[derive(Debug, Clone, Default)]
pub struct DraftPayload {
    pub account_id: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub in_reply_to_id: Option<i64>,
}

/// Database connection pool
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open or create a database at the given path
    pub async fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub async fn open_memory() -> EngineResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize the database schema
    async fn initialize(&self) -> EngineResult<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email_address TEXT NOT NULL UNIQUE,
                display_name TEXT,
                provider TEXT NOT NULL,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                secret_ciphertext TEXT NOT NULL,
                secret_iv TEXT NOT NULL,
                secret_tag TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_sync TEXT,
                last_sync_status TEXT,
                sync_error TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                uid INTEGER,
                message_id TEXT,
                thread_id TEXT NOT NULL,
                folder TEXT NOT NULL,
                from_address TEXT,
                from_name TEXT,
                to_json TEXT NOT NULL DEFAULT '[]',
                cc_json TEXT NOT NULL DEFAULT '[]',
                subject TEXT,
                snippet TEXT,
                body_text TEXT,
                body_html TEXT,
                date_epoch INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                in_reply_to TEXT,
                references_json TEXT NOT NULL DEFAULT '[]',
                category TEXT,
                created_at TEXT DEFAULT (datetime('now')),
                UNIQUE(account_id, folder, uid)
            );

            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                filename TEXT,
                content_type TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                content_id TEXT,
                is_inline INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS drafts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT REFERENCES accounts(id) ON DELETE CASCADE,
                to_json TEXT NOT NULL DEFAULT '[]',
                cc_json TEXT NOT NULL DEFAULT '[]',
                bcc_json TEXT NOT NULL DEFAULT '[]',
                subject TEXT,
                body_text TEXT,
                body_html TEXT,
                in_reply_to_id INTEGER,
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_messages_account_folder
                ON messages(account_id, folder);
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
            CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date_epoch DESC);
            CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    // -- accounts --------------------------------------------------------

    /// Insert a new account
    pub async fn insert_account(&self, account: &Account) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, email_address, display_name, provider,
                imap_host, imap_port, smtp_host, smtp_port,
                secret_ciphertext, secret_iv, secret_tag, active
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.provider)
        .bind(&account.config.imap_host)
        .bind(account.config.imap_port)
        .bind(&account.config.smtp_host)
        .bind(account.config.smtp_port)
        .bind(&account.secret.ciphertext)
        .bind(&account.secret.iv)
        .bind(&account.secret.auth_tag)
        .bind(account.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get an account by id
    pub async fn get_account(&self, account_id: &str) -> EngineResult<Account> {
        let row = sqlx::query(
            r#"
            SELECT id, email_address, display_name, provider,
                   imap_host, imap_port, smtp_host, smtp_port,
                   secret_ciphertext, secret_iv, secret_tag, active,
                   last_sync, last_sync_status, sync_error
            FROM accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::AccountNotFound(account_id.to_string()))?;

        Ok(account_from_row(&row))
    }

    /// Get all accounts
    pub async fn get_accounts(&self) -> EngineResult<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, email_address, display_name, provider,
                   imap_host, imap_port, smtp_host, smtp_port,
                   secret_ciphertext, secret_iv, secret_tag, active,
                   last_sync, last_sync_status, sync_error
            FROM accounts ORDER BY email_address
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Replace an account's encrypted secret
    pub async fn update_account_secret(
        &self,
        account_id: &str,
        secret: &EncryptedSecret,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET secret_ciphertext = ?, secret_iv = ?, secret_tag = ? WHERE id = ?",
        )
        .bind(&secret.ciphertext)
        .bind(&secret.iv)
        .bind(&secret.auth_tag)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    /// Enable or disable sync participation
    pub async fn set_account_active(&self, account_id: &str, active: bool) -> EngineResult<()> {
        sqlx::query("UPDATE accounts SET active = ? WHERE id = ?")
            .bind(active)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of a sync attempt
    pub async fn record_sync_status(
        &self,
        account_id: &str,
        error: Option<&str>,
    ) -> EngineResult<()> {
        let status = if error.is_some() { "error" } else { "success" };
        sqlx::query(
            r#"
            UPDATE accounts
            SET last_sync = datetime('now'), last_sync_status = ?, sync_error = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an account and, via cascade, its cached messages
    pub async fn delete_account(&self, account_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        info!("Deleted account {}", account_id);
        Ok(())
    }

    // -- messages --------------------------------------------------------

    /// Insert a message row
    pub async fn insert_message(&self, account_id: &str, msg: &NewMessage) -> EngineResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                account_id, uid, message_id, thread_id, folder,
                from_address, from_name, to_json, cc_json, subject, snippet,
                body_text, body_html, date_epoch, is_read, is_starred,
                has_attachments, in_reply_to, references_json, category
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(msg.uid)
        .bind(&msg.message_id)
        .bind(&msg.thread_id)
        .bind(&msg.folder)
        .bind(&msg.from_address)
        .bind(&msg.from_name)
        .bind(json!(msg.to).to_string())
        .bind(json!(msg.cc).to_string())
        .bind(&msg.subject)
        .bind(&msg.snippet)
        .bind(&msg.body_text)
        .bind(&msg.body_html)
        .bind(msg.date_epoch)
        .bind(msg.is_read)
        .bind(msg.is_starred)
        .bind(msg.has_attachments)
        .bind(&msg.in_reply_to)
        .bind(json!(msg.references).to_string())
        .bind(&msg.category)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.get::<i64, _>("id"))
    }

    /// Local row id for a remote UID, if cached
    pub async fn message_row_id(
        &self,
        account_id: &str,
        folder: &str,
        uid: u32,
    ) -> EngineResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM messages WHERE account_id = ? AND folder = ? AND uid = ?",
        )
        .bind(account_id)
        .bind(folder)
        .bind(uid as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Overwrite the read flag from the remote state.
    /// The starred flag is deliberately left alone; local stars win.
    pub async fn reconcile_read(&self, row_id: i64, is_read: bool) -> EngineResult<()> {
        sqlx::query("UPDATE messages SET is_read = ? WHERE id = ?")
            .bind(is_read)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the local read flag
    pub async fn set_read(&self, row_id: i64, is_read: bool) -> EngineResult<()> {
        sqlx::query("UPDATE messages SET is_read = ? WHERE id = ?")
            .bind(is_read)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the local starred flag
    pub async fn set_starred(&self, row_id: i64, is_starred: bool) -> EngineResult<()> {
        sqlx::query("UPDATE messages SET is_starred = ? WHERE id = ?")
            .bind(is_starred)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reassign a message to another folder.
    /// The remote UID is invalid in the target folder and is cleared; the
    /// next sync of the target folder re-adopts the message under its new
    /// UID.
    pub async fn move_message_local(&self, row_id: i64, folder: &str) -> EngineResult<()> {
        sqlx::query("UPDATE messages SET folder = ?, uid = NULL WHERE id = ?")
            .bind(folder)
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a cached message
    pub async fn delete_message(&self, row_id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Attach a remote UID to a UID-less row carrying the same message id
    /// in the same folder. Locally recorded sent copies and locally moved
    /// messages are adopted this way once the server copy shows up.
    /// Returns the adopted row id, if any.
    pub async fn adopt_uid(
        &self,
        account_id: &str,
        folder: &str,
        message_id: &str,
        uid: u32,
    ) -> EngineResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            UPDATE messages SET uid = ?
            WHERE id = (
                SELECT id FROM messages
                WHERE account_id = ? AND folder = ? AND uid IS NULL AND message_id = ?
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(uid as i64)
        .bind(account_id)
        .bind(folder)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Highest cached UID for a folder (the sync watermark)
    pub async fn max_uid(&self, account_id: &str, folder: &str) -> EngineResult<Option<u32>> {
        let row = sqlx::query(
            "SELECT MAX(uid) AS max_uid FROM messages WHERE account_id = ? AND folder = ?",
        )
        .bind(account_id)
        .bind(folder)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("max_uid").map(|u| u as u32))
    }

    /// Get a message by local row id
    pub async fn get_message(&self, row_id: i64) -> EngineResult<StoredMessage> {
        sqlx::query_as::<_, StoredMessage>("SELECT * FROM messages WHERE id = ?")
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::MessageNotFound(row_id))
    }

    /// List messages in a folder, newest first
    pub async fn get_messages(
        &self,
        account_id: &str,
        folder: &str,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<StoredMessage>> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT * FROM messages
            WHERE account_id = ? AND folder = ?
            ORDER BY date_epoch DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(account_id)
        .bind(folder)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// All messages in a conversation, oldest first
    pub async fn get_thread(
        &self,
        account_id: &str,
        thread_id: &str,
    ) -> EngineResult<Vec<StoredMessage>> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT * FROM messages
            WHERE account_id = ? AND thread_id = ?
            ORDER BY date_epoch ASC, id ASC
            "#,
        )
        .bind(account_id)
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Substring search over subject, sender, recipients, and snippet
    pub async fn search(
        &self,
        account_id: &str,
        query: &str,
        limit: i64,
    ) -> EngineResult<Vec<StoredMessage>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);

        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT * FROM messages
            WHERE account_id = ?
              AND (subject LIKE ? ESCAPE '\'
                   OR from_address LIKE ? ESCAPE '\'
                   OR from_name LIKE ? ESCAPE '\'
                   OR to_json LIKE ? ESCAPE '\'
                   OR snippet LIKE ? ESCAPE '\')
            ORDER BY date_epoch DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Cache a fetched body and derived snippet
    pub async fn save_body(
        &self,
        row_id: i64,
        body_text: Option<&str>,
        body_html: Option<&str>,
        snippet: Option<&str>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET body_text = ?, body_html = ?,
                snippet = COALESCE(?, snippet)
            WHERE id = ?
            "#,
        )
        .bind(body_text)
        .bind(body_html)
        .bind(snippet)
        .bind(row_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a locally sent message. The row carries no UID; the next
    /// Sent-folder sync adopts the server copy.
    pub async fn insert_sent_copy(&self, account_id: &str, msg: &NewMessage) -> EngineResult<i64> {
        let mut copy = msg.clone();
        copy.uid = None;
        copy.is_read = true;
        self.insert_message(account_id, &copy).await
    }

    // -- attachments -----------------------------------------------------

    /// Replace attachment metadata for a message
    pub async fn insert_attachments(
        &self,
        row_id: i64,
        attachments: &[NewAttachment],
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attachments WHERE message_id = ?")
            .bind(row_id)
            .execute(&mut *tx)
            .await?;

        for att in attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (message_id, filename, content_type, size, content_id, is_inline)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row_id)
            .bind(&att.filename)
            .bind(&att.content_type)
            .bind(att.size)
            .bind(&att.content_id)
            .bind(att.is_inline)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Attachment metadata for a message
    pub async fn get_attachments(&self, row_id: i64) -> EngineResult<Vec<StoredAttachment>> {
        let attachments = sqlx::query_as::<_, StoredAttachment>(
            "SELECT * FROM attachments WHERE message_id = ? ORDER BY id",
        )
        .bind(row_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attachments)
    }

    // -- drafts ----------------------------------------------------------

    /// Create a draft
    pub async fn create_draft(&self, draft: &DraftPayload) -> EngineResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO drafts (account_id, to_json, cc_json, bcc_json, subject,
                                body_text, body_html, in_reply_to_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&draft.account_id)
        .bind(json!(draft.to).to_string())
        .bind(json!(draft.cc).to_string())
        .bind(json!(draft.bcc).to_string())
        .bind(&draft.subject)
        .bind(&draft.body_text)
        .bind(&draft.body_html)
        .bind(draft.in_reply_to_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.get::<i64, _>("id"))
    }

    /// Overwrite a draft's contents
    pub async fn update_draft(&self, draft_id: i64, draft: &DraftPayload) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE drafts
            SET account_id = ?, to_json = ?, cc_json = ?, bcc_json = ?,
                subject = ?, body_text = ?, body_html = ?, in_reply_to_id = ?,
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(&draft.account_id)
        .bind(json!(draft.to).to_string())
        .bind(json!(draft.cc).to_string())
        .bind(json!(draft.bcc).to_string())
        .bind(&draft.subject)
        .bind(&draft.body_text)
        .bind(&draft.body_html)
        .bind(draft.in_reply_to_id)
        .bind(draft_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::DraftNotFound(draft_id));
        }
        Ok(())
    }

    /// Get a draft by id
    pub async fn get_draft(&self, draft_id: i64) -> EngineResult<StoredDraft> {
        sqlx::query_as::<_, StoredDraft>(
            "SELECT id, account_id, to_json, cc_json, bcc_json, subject, body_text, body_html, in_reply_to_id FROM drafts WHERE id = ?",
        )
        .bind(draft_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngineError::DraftNotFound(draft_id))
    }

    /// Delete a draft
    pub async fn delete_draft(&self, draft_id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM drafts WHERE id = ?")
            .bind(draft_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Account {
    let last_sync = row
        .get::<Option<String>, _>("last_sync")
        .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok())
        .map(|naive| naive.and_utc());

    Account {
        id: row.get("id"),
        email: row.get("email_address"),
        display_name: row.get("display_name"),
        provider: row.get("provider"),
        config: ServerConfig {
            imap_host: row.get("imap_host"),
            imap_port: row.get::<i64, _>("imap_port") as u16,
            smtp_host: row.get("smtp_host"),
            smtp_port: row.get::<i64, _>("smtp_port") as u16,
        },
        secret: EncryptedSecret {
            ciphertext: row.get("secret_ciphertext"),
            iv: row.get("secret_iv"),
            auth_tag: row.get("secret_tag"),
        },
        active: row.get("active"),
        last_sync,
        last_sync_status: row.get("last_sync_status"),
        sync_error: row.get("sync_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::SecretVault;

    async fn test_account(db: &Database, id: &str) -> Account {
        let vault = SecretVault::from_key_material(None).unwrap();
        let account = Account {
            id: id.to_string(),
            email: format!("{}@example.com", id),
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
        account
    }

    fn message(folder: &str, uid: Option<i64>) -> NewMessage {
        NewMessage {
            uid,
            thread_id: "abcd1234abcd1234".to_string(),
            folder: folder.to_string(),
            subject: Some("hello".to_string()),
            date_epoch: 1_700_000_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn deleting_account_cascades_to_messages() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let row_id = db
            .insert_message("a1", &message("INBOX", Some(7)))
            .await
            .unwrap();
        db.insert_attachments(
            row_id,
            &[NewAttachment {
                filename: Some("report.pdf".to_string()),
                content_type: Some("application/pdf".to_string()),
                size: 1024,
                content_id: None,
                is_inline: false,
            }],
        )
        .await
        .unwrap();
        let draft_id = db
            .create_draft(&DraftPayload {
                account_id: Some("a1".to_string()),
                to: vec!["bob@x.com".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(db.get_message(row_id).await.is_ok());

        db.delete_account("a1").await.unwrap();
        assert!(matches!(
            db.get_message(row_id).await,
            Err(EngineError::MessageNotFound(_))
        ));
        assert!(db.get_attachments(row_id).await.unwrap().is_empty());
        assert!(matches!(
            db.get_draft(draft_id).await,
            Err(EngineError::DraftNotFound(_))
        ));
    }

    #[tokio::test]
    async fn max_uid_ignores_uidless_rows() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        assert_eq!(db.max_uid("a1", "INBOX").await.unwrap(), None);

        db.insert_message("a1", &message("INBOX", Some(3)))
            .await
            .unwrap();
        db.insert_message("a1", &message("INBOX", Some(9)))
            .await
            .unwrap();
        db.insert_message("a1", &message("INBOX", None))
            .await
            .unwrap();

        assert_eq!(db.max_uid("a1", "INBOX").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn multiple_uidless_sent_copies_coexist() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        // NULL uids are distinct under the UNIQUE constraint
        db.insert_sent_copy("a1", &message("Sent", None))
            .await
            .unwrap();
        db.insert_sent_copy("a1", &message("Sent", None))
            .await
            .unwrap();

        let sent = db.get_messages("a1", "Sent", 10, 0).await.unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.is_read));
    }

    #[tokio::test]
    async fn adopt_uid_matches_only_uidless_rows_in_the_folder() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let mut local = message("Sent", None);
        local.message_id = Some("sent@x.com".to_string());
        let row_id = db.insert_message("a1", &local).await.unwrap();

        let mut other = message("Archive", None);
        other.message_id = Some("archived@x.com".to_string());
        db.insert_message("a1", &other).await.unwrap();

        // Wrong folder or wrong message id adopts nothing
        assert_eq!(
            db.adopt_uid("a1", "Sent", "archived@x.com", 5).await.unwrap(),
            None
        );
        assert_eq!(
            db.adopt_uid("a1", "INBOX", "sent@x.com", 5).await.unwrap(),
            None
        );

        assert_eq!(
            db.adopt_uid("a1", "Sent", "sent@x.com", 5).await.unwrap(),
            Some(row_id)
        );
        assert_eq!(db.get_message(row_id).await.unwrap().uid, Some(5));

        // Once the row carries a UID it is no longer a candidate
        assert_eq!(
            db.adopt_uid("a1", "Sent", "sent@x.com", 6).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn duplicate_uid_in_folder_is_rejected() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        db.insert_message("a1", &message("INBOX", Some(5)))
            .await
            .unwrap();
        assert!(db
            .insert_message("a1", &message("INBOX", Some(5)))
            .await
            .is_err());
        // Same uid in another folder is fine
        db.insert_message("a1", &message("Archive", Some(5)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn search_escapes_like_wildcards() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let mut a = message("INBOX", Some(1));
        a.subject = Some("100% complete".to_string());
        let mut b = message("INBOX", Some(2));
        b.subject = Some("100 degrees".to_string());
        db.insert_message("a1", &a).await.unwrap();
        db.insert_message("a1", &b).await.unwrap();

        let hits = db.search("a1", "100%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject.as_deref(), Some("100% complete"));
    }

    #[tokio::test]
    async fn search_matches_recipient_addresses() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let mut sent = message("Sent", Some(1));
        sent.subject = Some("quarterly numbers".to_string());
        sent.to = vec!["finance@example.com".to_string()];
        let mut other = message("Sent", Some(2));
        other.to = vec!["ops@example.com".to_string()];
        db.insert_message("a1", &sent).await.unwrap();
        db.insert_message("a1", &other).await.unwrap();

        let hits = db.search("a1", "finance@example.com", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject.as_deref(), Some("quarterly numbers"));
    }

    #[tokio::test]
    async fn thread_ordering_is_oldest_first() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let mut newer = message("INBOX", Some(2));
        newer.date_epoch = 1_700_000_100;
        let older = message("INBOX", Some(1));
        db.insert_message("a1", &newer).await.unwrap();
        db.insert_message("a1", &older).await.unwrap();

        let thread = db.get_thread("a1", "abcd1234abcd1234").await.unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread[0].date_epoch <= thread[1].date_epoch);
    }

    #[tokio::test]
    async fn local_move_clears_uid() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let row_id = db
            .insert_message("a1", &message("INBOX", Some(4)))
            .await
            .unwrap();
        db.move_message_local(row_id, "Archive").await.unwrap();

        let moved = db.get_message(row_id).await.unwrap();
        assert_eq!(moved.folder, "Archive");
        assert_eq!(moved.uid, None);
    }

    #[tokio::test]
    async fn draft_round_trip() {
        let db = Database::open_memory().await.unwrap();
        test_account(&db, "a1").await;

        let draft_id = db
            .create_draft(&DraftPayload {
                account_id: Some("a1".to_string()),
                to: vec!["x@example.com".to_string()],
                subject: Some("wip".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = db.get_draft(draft_id).await.unwrap();
        assert_eq!(stored.to_list(), vec!["x@example.com"]);

        db.delete_draft(draft_id).await.unwrap();
        assert!(matches!(
            db.get_draft(draft_id).await,
            Err(EngineError::DraftNotFound(_))
        ));
    }
}
