//! Mailbox synchronization and flag propagation

use std::sync::Arc;

use tracing::{debug, info, warn};

use mailweave_imap::FolderType;

use crate::database::{Database, NewMessage};
use crate::headers::{parse_header, thread_id};
use crate::store::{MailboxConnector, RemoteHeader, RemoteMailbox};
use crate::{EngineError, EngineResult};

/// Per-run sync tuning
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ignore the UID watermark and re-fetch the whole window. This is
    /// also what reconciles read flags on already-cached messages.
    pub full: bool,
    /// Maximum headers fetched per folder
    pub limit: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full: false,
            limit: 100,
        }
    }
}

/// A folder that failed during an otherwise successful run
#[derive(Debug, Clone)]
pub struct FolderError {
    pub folder: String,
    pub error: String,
}

/// Outcome of one account sync
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Newly cached messages across all folders
    pub synced: usize,
    /// Folders skipped due to errors
    pub errors: Vec<FolderError>,
}

/// Flag change queued for remote propagation
#[derive(Debug, Clone)]
enum FlagAction {
    Seen { folder: String, uid: u32, seen: bool },
    Flagged { folder: String, uid: u32, flagged: bool },
    Move { from: String, to: String, uid: u32 },
    Delete { folder: String, uid: u32 },
}

/// Synchronizes remote mailboxes into the local cache.
///
/// Flag mutations are local-first: the cache row is updated before the
/// remote store, and remote propagation runs in a background task whose
/// failure never rolls back the local change.
pub struct SyncEngine {
    db: Arc<Database>,
    connector: Arc<dyn MailboxConnector>,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, connector: Arc<dyn MailboxConnector>) -> Self {
        Self { db, connector }
    }

    /// Sync an account's inbox and sent folder.
    ///
    /// The outcome, success or the connection error, is recorded on the
    /// account row either way. Per-folder failures do not abort the run;
    /// they are collected in the report and recorded as an error status.
    pub async fn sync_account(
        &self,
        account_id: &str,
        options: &SyncOptions,
    ) -> EngineResult<SyncReport> {
        let account = self.db.get_account(account_id).await?;
        if !account.active {
            return Err(EngineError::Validation(format!(
                "account {} is disabled",
                account.email
            )));
        }
        info!(account = %account.email, "starting sync");

        let mut remote = match self.connector.connect(&account).await {
            Ok(remote) => remote,
            Err(e) => {
                self.db
                    .record_sync_status(account_id, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        let outcome = self
            .sync_folders(account_id, remote.as_mut(), options)
            .await;

        if let Err(e) = remote.close().await {
            warn!(account = %account.email, "error closing session: {}", e);
        }

        match outcome {
            Ok(report) => {
                if report.errors.is_empty() {
                    self.db.record_sync_status(account_id, None).await?;
                } else {
                    let summary = report
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.folder, e.error))
                        .collect::<Vec<_>>()
                        .join("; ");
                    self.db
                        .record_sync_status(account_id, Some(&summary))
                        .await?;
                }
                info!(
                    account = %account.email,
                    synced = report.synced,
                    failed_folders = report.errors.len(),
                    "sync finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.db
                    .record_sync_status(account_id, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn sync_folders(
        &self,
        account_id: &str,
        remote: &mut dyn RemoteMailbox,
        options: &SyncOptions,
    ) -> EngineResult<SyncReport> {
        let mut folders = vec!["INBOX".to_string()];

        // Folder discovery failing only costs us the sent folder
        match remote.list_folders().await {
            Ok(listed) => {
                if let Some(sent) = listed
                    .iter()
                    .find(|f| f.folder_type == FolderType::Sent && f.is_selectable())
                {
                    folders.push(sent.full_path.clone());
                }
            }
            Err(e) => warn!("folder listing failed, syncing INBOX only: {}", e),
        }

        let mut report = SyncReport::default();
        for folder in &folders {
            match self.sync_folder(account_id, remote, folder, options).await {
                Ok(count) => report.synced += count,
                Err(e) => {
                    warn!(folder = %folder, "folder sync failed: {}", e);
                    report.errors.push(FolderError {
                        folder: folder.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Sync one folder; returns the number of newly cached messages
    async fn sync_folder(
        &self,
        account_id: &str,
        remote: &mut dyn RemoteMailbox,
        folder: &str,
        options: &SyncOptions,
    ) -> EngineResult<usize> {
        let watermark = if options.full {
            None
        } else {
            self.db.max_uid(account_id, folder).await?
        };

        let headers = remote
            .search_headers(folder, watermark, options.limit)
            .await?;
        debug!(folder = %folder, count = headers.len(), "fetched headers");

        let mut inserted = 0;
        for header in &headers {
            if let Some(row_id) = self
                .db
                .message_row_id(account_id, folder, header.uid)
                .await?
            {
                // Remote owns the read flag. Stars are local-authoritative
                // and never overwritten here.
                self.db.reconcile_read(row_id, header.seen).await?;
                continue;
            }

            // A sent copy or locally moved message already sits in this
            // folder without a UID; attach the server's UID to it instead
            // of caching the message twice.
            if let Some(message_id) = &header.message_id {
                if let Some(row_id) = self
                    .db
                    .adopt_uid(account_id, folder, message_id, header.uid)
                    .await?
                {
                    debug!(folder = %folder, uid = header.uid, "adopted local copy");
                    self.db.reconcile_read(row_id, header.seen).await?;
                    continue;
                }
            }

            let record = build_record(folder, header);
            match self.db.insert_message(account_id, &record).await {
                Ok(_) => inserted += 1,
                Err(e) => {
                    warn!(folder = %folder, uid = header.uid, "skipping message: {}", e);
                }
            }
        }

        Ok(inserted)
    }

    /// Set the read flag locally and propagate in the background
    pub async fn set_read(&self, row_id: i64, is_read: bool) -> EngineResult<()> {
        let msg = self.db.get_message(row_id).await?;
        self.db.set_read(row_id, is_read).await?;

        if let Some(uid) = msg.uid {
            self.propagate(
                msg.account_id,
                FlagAction::Seen {
                    folder: msg.folder,
                    uid: uid as u32,
                    seen: is_read,
                },
            );
        }
        Ok(())
    }

    /// Set the starred flag locally and propagate in the background
    pub async fn set_starred(&self, row_id: i64, is_starred: bool) -> EngineResult<()> {
        let msg = self.db.get_message(row_id).await?;
        self.db.set_starred(row_id, is_starred).await?;

        if let Some(uid) = msg.uid {
            self.propagate(
                msg.account_id,
                FlagAction::Flagged {
                    folder: msg.folder,
                    uid: uid as u32,
                    flagged: is_starred,
                },
            );
        }
        Ok(())
    }

    /// Move a message to another folder locally and propagate in the
    /// background. The local row loses its UID until the target folder is
    /// synced again.
    pub async fn move_message(&self, row_id: i64, to_folder: &str) -> EngineResult<()> {
        let msg = self.db.get_message(row_id).await?;
        self.db.move_message_local(row_id, to_folder).await?;

        if let Some(uid) = msg.uid {
            self.propagate(
                msg.account_id,
                FlagAction::Move {
                    from: msg.folder,
                    to: to_folder.to_string(),
                    uid: uid as u32,
                },
            );
        }
        Ok(())
    }

    /// Delete a message locally and propagate in the background
    pub async fn delete_message(&self, row_id: i64) -> EngineResult<()> {
        let msg = self.db.get_message(row_id).await?;
        self.db.delete_message(row_id).await?;

        if let Some(uid) = msg.uid {
            self.propagate(
                msg.account_id,
                FlagAction::Delete {
                    folder: msg.folder,
                    uid: uid as u32,
                },
            );
        }
        Ok(())
    }

    fn propagate(&self, account_id: String, action: FlagAction) {
        let db = Arc::clone(&self.db);
        let connector = Arc::clone(&self.connector);

        tokio::spawn(async move {
            if let Err(e) = apply_remote(&db, connector.as_ref(), &account_id, &action).await {
                warn!(account = %account_id, "flag propagation failed: {}", e);
            }
        });
    }
}

async fn apply_remote(
    db: &Database,
    connector: &dyn MailboxConnector,
    account_id: &str,
    action: &FlagAction,
) -> EngineResult<()> {
    let account = db.get_account(account_id).await?;
    let mut remote = connector.connect(&account).await?;

    let result = match action {
        FlagAction::Seen { folder, uid, seen } => remote.set_seen(folder, *uid, *seen).await,
        FlagAction::Flagged {
            folder,
            uid,
            flagged,
        } => remote.set_flagged(folder, *uid, *flagged).await,
        FlagAction::Move { from, to, uid } => remote.move_message(from, to, *uid).await,
        FlagAction::Delete { folder, uid } => remote.delete_message(folder, *uid).await,
    };

    if let Err(e) = remote.close().await {
        warn!("error closing session after propagation: {}", e);
    }
    result
}

fn build_record(folder: &str, header: &RemoteHeader) -> NewMessage {
    let parsed = parse_header(&header.raw_header());
    let thread = thread_id(&parsed);

    NewMessage {
        uid: Some(header.uid as i64),
        message_id: parsed.message_id,
        thread_id: thread,
        folder: folder.to_string(),
        from_address: parsed.from.first().map(|a| a.address.clone()),
        from_name: parsed.from.first().and_then(|a| a.name.clone()),
        to: parsed.to.iter().map(|a| a.address.clone()).collect(),
        cc: parsed.cc.iter().map(|a| a.address.clone()).collect(),
        subject: parsed.subject,
        snippet: None,
        body_text: None,
        body_html: None,
        date_epoch: parsed.date.timestamp(),
        is_read: header.seen,
        is_starred: header.flagged,
        has_attachments: header.has_attachments,
        in_reply_to: parsed.in_reply_to,
        references: parsed.references,
        category: None,
    }
}
