//! Autosave session
//!
//! One session per open document per tab. [`AutosaveSession::open`] fetches
//! the document, checks the local backup and spawns a single task that owns
//! the scheduler, the coordinator (and through it the version ledger). All
//! events are handled on that task:
//! - commands from the editing surface (edit, flush, resolve, close)
//! - completions of the one outstanding remote call
//! - debounce deadlines for saves and backups
//! - connectivity transitions
//! - notices from sibling sessions
//!
//! Remote calls run on spawned tasks and report back over a channel, so
//! editing never waits on the network.

use crate::backup::BackupStore;
use crate::client::PersistenceClient;
use crate::config::AutosaveConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::{Applied, Dispatch, Resolution, SaveCoordinator};
use crate::error::{AutosaveError, RemoteError};
use crate::notifier::{NoticeKind, SessionChannel, SessionHub, SiblingNotice};
use crate::remote::RemoteStore;
use crate::scheduler::SaveScheduler;
use crate::types::{
    normalize_text, AuthorId, BackupRecord, Document, DocumentId, EditEvent, SaveRequest,
    SaveResult, SaveStatus, SessionId, Version,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared collaborators injected into every session
#[derive(Clone)]
pub struct SessionContext {
    /// Timing and retry configuration
    pub config: AutosaveConfig,
    /// Remote document store
    pub remote: Arc<dyn RemoteStore>,
    /// Local backup store
    pub backup: Arc<dyn BackupStore>,
    /// Cross-session notifier
    pub hub: SessionHub,
    /// Connectivity monitor
    pub connectivity: ConnectivityMonitor,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Create context with a fresh hub and an online monitor
    #[must_use]
    pub fn new(
        config: AutosaveConfig,
        remote: Arc<dyn RemoteStore>,
        backup: Arc<dyn BackupStore>,
    ) -> Self {
        let hub = SessionHub::new(config.notifier_capacity);
        Self {
            config,
            remote,
            backup,
            hub,
            connectivity: ConnectivityMonitor::default(),
        }
    }

    /// Share a hub with other contexts
    #[inline]
    #[must_use]
    pub fn with_hub(mut self, hub: SessionHub) -> Self {
        self.hub = hub;
        self
    }

    /// Use an externally driven connectivity monitor
    #[inline]
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }
}

/// Local backup newer than the server copy, found at open.
///
/// Offered once; to accept it, feed `record.text` to
/// [`AutosaveSession::on_edit`]. To reject it, call
/// [`AutosaveSession::discard_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOffer {
    /// The backup found
    pub record: BackupRecord,
    /// Server version at open
    pub server_version: Version,
    /// Server modification time at open
    pub server_updated_at: DateTime<Utc>,
}

/// Notifications for the editing surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Another session opened this document
    SiblingEditing {
        /// Sibling session
        from: SessionId,
    },
    /// Another session saved this document
    SiblingSaved {
        /// Sibling session
        from: SessionId,
        /// Version it confirmed
        version: Version,
    },
    /// Saving stopped on a version conflict
    Conflict {
        /// Current server copy, when known
        server: Option<Box<Document>>,
    },
    /// A save was confirmed
    Saved {
        /// Sequence of the confirmed edit
        sequence: u64,
        /// New version
        version: Version,
    },
    /// Retries were exhausted; the text is kept locally
    Failed {
        /// Cause of the last failure
        reason: String,
    },
}

/// Result of opening a session
#[derive(Debug)]
pub struct OpenedSession {
    /// Session handle
    pub session: AutosaveSession,
    /// Document as fetched at open
    pub document: Document,
    /// One-shot recovery signal
    pub recovery: Option<RecoveryOffer>,
}

type ResolveReply = oneshot::Sender<Result<String, AutosaveError>>;

enum Command {
    Edit(String),
    Flush(oneshot::Sender<()>),
    Resolve(Resolution, ResolveReply),
    DiscardBackup(oneshot::Sender<Result<(), AutosaveError>>),
    Close(oneshot::Sender<SaveStatus>),
}

enum Completed {
    Save(SaveResult),
    Refetch(Result<Document, RemoteError>),
}

/// Handle to a running session
#[derive(Debug)]
pub struct AutosaveSession {
    id: SessionId,
    document: DocumentId,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SaveStatus>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl AutosaveSession {
    /// Fetch `document`, check the local backup and start the session task.
    ///
    /// # Errors
    /// - `AutosaveError::Config` if the configuration is invalid
    /// - `AutosaveError::Remote` if the initial fetch fails
    pub async fn open(
        ctx: SessionContext,
        document: DocumentId,
        author: AuthorId,
    ) -> Result<OpenedSession, AutosaveError> {
        ctx.config.validate()?;
        let client = PersistenceClient::from_config(Arc::clone(&ctx.remote), &ctx.config);
        let server = client.fetch(&document).await?;
        let recovery = check_backup(ctx.backup.as_ref(), &server).await;

        let id = SessionId::new();
        let channel = ctx.hub.join(&document, id);
        channel.announce(NoticeKind::EditingStarted);

        let (commands_tx, commands_rx) = mpsc::channel(ctx.config.command_buffer);
        let (completions_tx, completions_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);
        let (events_tx, _) = broadcast::channel(ctx.config.notifier_capacity);

        tracing::info!(
            document = %document,
            session = %id,
            version = %server.version,
            recovery = recovery.is_some(),
            "session opened"
        );

        let actor = SessionActor {
            document: document.clone(),
            author,
            client,
            backup: ctx.backup,
            scheduler: SaveScheduler::from_config(&ctx.config),
            coordinator: SaveCoordinator::new(&server, ctx.connectivity.is_online()),
            channel,
            siblings_open: true,
            connectivity: ctx.connectivity.subscribe(),
            connectivity_open: true,
            commands: commands_rx,
            commands_open: true,
            completions_tx,
            completions_rx,
            status: status_tx,
            events: events_tx.clone(),
            resolving: None,
            closing: false,
            close_reply: None,
        };
        let task = tokio::spawn(actor.run());

        Ok(OpenedSession {
            session: Self {
                id,
                document,
                commands: commands_tx,
                status: status_rx,
                events: events_tx,
                task,
            },
            document: server,
            recovery,
        })
    }

    /// Session ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Document this session edits
    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document
    }

    /// Record an edit carrying the full current text
    pub async fn on_edit(&self, text: impl Into<String>) -> Result<(), AutosaveError> {
        self.send(Command::Edit(text.into())).await
    }

    /// Skip the quiet period and save the latest text now.
    ///
    /// Returns once the save is dispatched or queued, not when it completes.
    pub async fn flush_now(&self) -> Result<(), AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx)).await?;
        rx.await.map_err(|_| AutosaveError::SessionClosed)
    }

    /// Current save status
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    /// Observe status transitions
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Leave the conflict state; returns the text the editor should show
    ///
    /// # Errors
    /// - `AutosaveError::NotInConflict` if no conflict is outstanding
    /// - `AutosaveError::Remote` if the server copy could not be fetched
    pub async fn resolve_conflict(&self, resolution: Resolution) -> Result<String, AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Resolve(resolution, tx)).await?;
        rx.await.map_err(|_| AutosaveError::SessionClosed)?
    }

    /// Drop the local backup (recovery offer declined)
    pub async fn discard_backup(&self) -> Result<(), AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::DiscardBackup(tx)).await?;
        rx.await.map_err(|_| AutosaveError::SessionClosed)?
    }

    /// Flush, wait until no request can make progress and stop the task.
    ///
    /// Returns the final status; unsaved text is left in the backup store.
    pub async fn close(self) -> Result<SaveStatus, AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx)).await?;
        let status = rx.await.map_err(|_| AutosaveError::SessionClosed)?;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "session task ended abnormally");
        }
        Ok(status)
    }

    async fn send(&self, command: Command) -> Result<(), AutosaveError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AutosaveError::SessionClosed)
    }
}

async fn check_backup(backup: &dyn BackupStore, server: &Document) -> Option<RecoveryOffer> {
    match backup.read(&server.id).await {
        Ok(Some(record)) if record.supersedes(server) => Some(RecoveryOffer {
            record,
            server_version: server.version,
            server_updated_at: server.updated_at,
        }),
        Ok(Some(_)) => {
            tracing::debug!(document = %server.id, "clearing backup already covered by server copy");
            if let Err(e) = backup.clear(&server.id).await {
                tracing::warn!(document = %server.id, error = %e, "failed to clear stale backup");
            }
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(document = %server.id, error = %e, "failed to read backup");
            None
        }
    }
}

struct SessionActor {
    document: DocumentId,
    author: AuthorId,
    client: PersistenceClient,
    backup: Arc<dyn BackupStore>,
    scheduler: SaveScheduler,
    coordinator: SaveCoordinator,
    channel: SessionChannel,
    siblings_open: bool,
    connectivity: watch::Receiver<bool>,
    connectivity_open: bool,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    completions_tx: mpsc::Sender<Completed>,
    completions_rx: mpsc::Receiver<Completed>,
    status: watch::Sender<SaveStatus>,
    events: broadcast::Sender<SessionEvent>,
    resolving: Option<ResolveReply>,
    closing: bool,
    close_reply: Option<oneshot::Sender<SaveStatus>>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        // Handle dropped without close.
                        self.commands_open = false;
                        self.begin_close().await;
                    }
                },
                Some(done) = self.completions_rx.recv() => self.on_completed(done).await,
                () = sleep_until(deadline) => self.on_deadline().await,
                changed = self.connectivity.changed(), if self.connectivity_open => match changed {
                    Ok(()) => {
                        let online = *self.connectivity.borrow_and_update();
                        if let Some(dispatch) = self.coordinator.set_online(online) {
                            self.dispatch(dispatch);
                        }
                    }
                    Err(_) => self.connectivity_open = false,
                },
                notice = self.channel.recv(), if self.siblings_open => match notice {
                    Some(notice) => self.on_sibling(notice),
                    None => self.siblings_open = false,
                },
            }

            self.publish_status();
            if self.closing && self.coordinator.is_quiescent() {
                self.finish().await;
                break;
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Edit(text) => {
                self.scheduler.on_edit(text, Instant::now());
                // Edits during a call ride along as the trailing save.
                if self.coordinator.is_in_flight() {
                    if let Some(edit) = self.scheduler.flush_now() {
                        self.enqueue(&edit);
                    }
                }
            }
            Command::Flush(reply) => {
                self.flush().await;
                self.publish_status();
                let _ = reply.send(());
            }
            Command::Resolve(resolution, reply) => match self.coordinator.resolve(resolution) {
                Ok(dispatch) => {
                    self.resolving = Some(reply);
                    self.dispatch(dispatch);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::DiscardBackup(reply) => {
                let result = self
                    .backup
                    .clear(&self.document)
                    .await
                    .map_err(AutosaveError::from);
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                self.close_reply = Some(reply);
                self.begin_close().await;
            }
        }
    }

    async fn on_completed(&mut self, done: Completed) {
        let completion = match done {
            Completed::Save(result) => self.coordinator.on_save_result(result),
            Completed::Refetch(result) => {
                if let (Err(e), Some(reply)) = (&result, self.resolving.take()) {
                    let _ = reply.send(Err(AutosaveError::Remote(e.clone())));
                }
                self.coordinator.on_refetch(result)
            }
        };
        self.apply(completion.applied).await;
        if let Some(next) = completion.next {
            self.dispatch(next);
        }
    }

    async fn apply(&mut self, applied: Applied) {
        match applied {
            Applied::Saved {
                sequence, version, ..
            } => {
                self.channel.announce(NoticeKind::Saved { version });
                self.emit(SessionEvent::Saved { sequence, version });
                if sequence == self.scheduler.last_sequence() {
                    self.scheduler.cancel_backup_through(sequence);
                    self.clear_backup().await;
                }
            }
            Applied::Stale { .. } | Applied::Requeued => {}
            Applied::Rebased { version } => {
                tracing::debug!(document = %self.document, %version, "ledger rebased on server copy");
            }
            Applied::Conflict { server } => {
                self.emit(SessionEvent::Conflict { server });
            }
            Applied::Failed { reason } => {
                self.emit(SessionEvent::Failed { reason });
            }
            Applied::Resolved { resolution, server } => {
                let text = match resolution {
                    Resolution::KeepLocal => self.keep_local(&server),
                    Resolution::TakeServer => {
                        let text = server.text();
                        self.scheduler.reset_text(text.clone(), Instant::now());
                        self.clear_backup().await;
                        text
                    }
                };
                self.publish_status();
                if let Some(reply) = self.resolving.take() {
                    let _ = reply.send(Ok(text));
                }
            }
        }
    }

    fn keep_local(&mut self, server: &Document) -> String {
        let edit = self
            .scheduler
            .flush_now()
            .or_else(|| self.scheduler.latest().cloned());
        match edit {
            Some(edit) => {
                let text = edit.text.clone();
                if normalize_text(&text) != server.text() {
                    self.enqueue(&edit);
                }
                text
            }
            None => server.text(),
        }
    }

    fn on_sibling(&mut self, notice: SiblingNotice) {
        match notice.kind {
            NoticeKind::EditingStarted => {
                tracing::info!(document = %self.document, sibling = %notice.from, "sibling session editing");
                self.emit(SessionEvent::SiblingEditing { from: notice.from });
            }
            NoticeKind::Saved { version } => {
                if self.coordinator.on_sibling_saved(version) {
                    tracing::debug!(document = %self.document, %version, "sibling saved; refetch before next save");
                }
                self.emit(SessionEvent::SiblingSaved {
                    from: notice.from,
                    version,
                });
            }
        }
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        if let Some(edit) = self.scheduler.take_due_backup(now) {
            self.write_backup(&edit.text).await;
        }
        if let Some(edit) = self.scheduler.take_due_save(now) {
            self.enqueue(&edit);
        }
    }

    async fn flush(&mut self) {
        if let Some(edit) = self.scheduler.take_backup_now() {
            self.write_backup(&edit.text).await;
        }
        if let Some(edit) = self.scheduler.flush_now() {
            self.enqueue(&edit);
        } else if let Some(edit) = self.unsaved_edit() {
            // A failed save left the latest text behind; try it again.
            self.enqueue(&edit);
        }
    }

    async fn begin_close(&mut self) {
        if !self.closing {
            tracing::debug!(document = %self.document, "session closing");
            self.closing = true;
            self.flush().await;
        }
    }

    async fn finish(&mut self) {
        if let Some(edit) = self.unsaved_edit() {
            self.write_backup(&edit.text).await;
        }
        let status = *self.status.borrow();
        tracing::info!(document = %self.document, %status, "session closed");
        if let Some(reply) = self.close_reply.take() {
            let _ = reply.send(status);
        }
    }

    fn unsaved_edit(&self) -> Option<EditEvent> {
        let edit = self.scheduler.latest()?;
        (self.coordinator.is_unsaved(edit.sequence)
            && normalize_text(&edit.text) != self.coordinator.confirmed_text())
            .then(|| edit.clone())
    }

    fn enqueue(&mut self, edit: &EditEvent) {
        let request = SaveRequest::from_edit(edit, self.coordinator.ledger().current());
        if let Some(dispatch) = self.coordinator.enqueue(request) {
            self.dispatch(dispatch);
        }
    }

    fn dispatch(&self, dispatch: Dispatch) {
        let client = self.client.clone();
        let document = self.document.clone();
        let tx = self.completions_tx.clone();
        match dispatch {
            Dispatch::Save(request) => {
                let author = self.author.clone();
                tokio::spawn(async move {
                    let result = client.send(&document, &author, &request).await;
                    let _ = tx.send(Completed::Save(result)).await;
                });
            }
            Dispatch::Refetch => {
                tokio::spawn(async move {
                    let result = client.fetch(&document).await;
                    let _ = tx.send(Completed::Refetch(result)).await;
                });
            }
        }
    }

    async fn write_backup(&self, text: &str) {
        match self.backup.write(&self.document, text).await {
            Ok(record) => {
                tracing::trace!(document = %self.document, at = %record.timestamp, "backup written");
            }
            Err(e) => {
                tracing::error!(document = %self.document, error = %e, "backup write failed");
            }
        }
    }

    async fn clear_backup(&self) {
        if let Err(e) = self.backup.clear(&self.document).await {
            tracing::warn!(document = %self.document, error = %e, "backup clear failed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let next = self.coordinator.status(self.scheduler.is_armed());
        let document = &self.document;
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(document = %document, from = %current, to = %next, "status changed");
                *current = next;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
