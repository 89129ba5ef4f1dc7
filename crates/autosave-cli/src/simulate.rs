//! Scripted editing session
//!
//! Types a short memo into a session backed by the in-memory remote store
//! and a file backup directory, with optional latency, injected failures, a
//! foreign write that forces a conflict, and a temporary network outage.

use anyhow::{bail, Context};
use autosave_core::{
    AuthorId, AutosaveConfig, AutosaveSession, BackupStore, ConnectivityMonitor, Document,
    DocumentId, FileBackupStore, InMemoryRemoteStore, Resolution, SaveStatus, SessionContext, Version,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

const DOCUMENT: &str = "shopping-list";
const KEYSTROKE: Duration = Duration::from_millis(60);
const OUTAGE: Duration = Duration::from_secs(3);

/// Simulation knobs
#[derive(Debug, Clone)]
pub(crate) struct SimulationOptions {
    pub(crate) config: AutosaveConfig,
    pub(crate) latency: Duration,
    pub(crate) failures: u32,
    pub(crate) conflict: bool,
    pub(crate) offline_at: Option<Duration>,
    pub(crate) backup_dir: PathBuf,
}

/// What happened
#[derive(Debug)]
pub(crate) struct SimulationReport {
    pub(crate) transitions: Vec<(Duration, SaveStatus)>,
    pub(crate) final_status: SaveStatus,
    pub(crate) expected_text: String,
    pub(crate) server: Document,
    pub(crate) updates: usize,
    pub(crate) fetches: usize,
    pub(crate) max_concurrent_updates: usize,
    pub(crate) backup_left: bool,
}

pub(crate) async fn run(options: SimulationOptions) -> anyhow::Result<SimulationReport> {
    let document = DocumentId::new(DOCUMENT);
    let remote = Arc::new(InMemoryRemoteStore::with_document(Document::from_text(
        document.clone(),
        "Shopping list",
        Version(0),
        Utc::now(),
    )));
    remote.set_latency(options.latency);

    let backup = Arc::new(
        FileBackupStore::open(&options.backup_dir)
            .await
            .with_context(|| format!("opening backup dir {}", options.backup_dir.display()))?,
    );
    let connectivity = ConnectivityMonitor::new(true);
    let ctx = SessionContext::new(options.config.clone(), remote.clone(), backup.clone())
        .with_connectivity(connectivity.clone());

    let opened = AutosaveSession::open(ctx, document.clone(), AuthorId::new("cli")).await?;
    if let Some(offer) = &opened.recovery {
        tracing::info!(saved_at = %offer.record.timestamp, "discarding leftover backup from an earlier run");
        opened.session.discard_backup().await?;
    }
    let session = opened.session;
    remote.fail_next(options.failures);

    let started = Instant::now();
    let recorder = tokio::spawn(record_transitions(session.watch_status(), started));
    if let Some(at) = options.offline_at {
        tokio::spawn(outage(connectivity, at));
    }

    let wait_limit = options.config.request_timeout() * options.config.max_attempts * 2
        + options.config.quiet_period() * 4;
    let mut text = String::from("Shopping list");

    type_line(&session, &mut text, "\nmilk").await?;
    type_line(&session, &mut text, "\neggs").await?;
    wait_until(&session, wait_limit, |s| {
        matches!(s, SaveStatus::Saved | SaveStatus::Error | SaveStatus::OfflineQueued)
    })
    .await?;

    if options.conflict {
        remote.external_write(&document, "Shopping list\nbought by someone else");
        type_line(&session, &mut text, "\nbread").await?;
        wait_until(&session, wait_limit, |s| s == SaveStatus::Conflict).await?;
        let shown = session.resolve_conflict(Resolution::KeepLocal).await?;
        if shown != text {
            bail!("resolution showed unexpected text {shown:?}");
        }
    } else {
        type_line(&session, &mut text, "\nbread").await?;
    }

    type_line(&session, &mut text, "\ncoffee").await?;
    session.flush_now().await?;
    let final_status = session.close().await?;
    let transitions = recorder.await?;

    let server = remote.get(&document).context("document vanished")?;
    Ok(SimulationReport {
        transitions,
        final_status,
        expected_text: text,
        server,
        updates: remote.update_count(),
        fetches: remote.fetch_count(),
        max_concurrent_updates: remote.max_concurrent_updates(),
        backup_left: backup.read(&document).await?.is_some(),
    })
}

async fn type_line(session: &AutosaveSession, text: &mut String, line: &str) -> anyhow::Result<()> {
    for ch in line.chars() {
        text.push(ch);
        session.on_edit(text.clone()).await?;
        sleep(KEYSTROKE).await;
    }
    Ok(())
}

async fn wait_until<F>(session: &AutosaveSession, limit: Duration, mut done: F) -> anyhow::Result<()>
where
    F: FnMut(SaveStatus) -> bool,
{
    let mut rx = session.watch_status();
    timeout(limit, rx.wait_for(|s| done(*s)))
        .await
        .with_context(|| format!("stuck in {}", session.status()))??;
    Ok(())
}

async fn record_transitions(
    mut rx: watch::Receiver<SaveStatus>,
    started: Instant,
) -> Vec<(Duration, SaveStatus)> {
    let mut seen = vec![(Duration::ZERO, *rx.borrow_and_update())];
    while rx.changed().await.is_ok() {
        seen.push((started.elapsed(), *rx.borrow_and_update()));
    }
    seen
}

async fn outage(connectivity: ConnectivityMonitor, at: Duration) {
    sleep(at).await;
    connectivity.set_online(false);
    sleep(OUTAGE).await;
    connectivity.set_online(true);
}

impl SimulationReport {
    /// Whether the server ended up with every keystroke
    pub(crate) fn converged(&self) -> bool {
        self.server.text() == self.expected_text && !self.backup_left
    }

    pub(crate) fn print(&self) -> anyhow::Result<()> {
        println!("status transitions:");
        for (at, status) in &self.transitions {
            println!("  {:>7}ms  {status}", at.as_millis());
        }
        println!();
        println!("final status:           {}", self.final_status);
        println!("update calls:           {}", self.updates);
        println!("fetch calls:            {}", self.fetches);
        println!("max concurrent updates: {}", self.max_concurrent_updates);
        println!("backup left on disk:    {}", self.backup_left);
        println!("server document:");
        println!("{}", serde_json::to_string_pretty(&self.server)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &tempfile::TempDir) -> SimulationOptions {
        SimulationOptions {
            config: AutosaveConfig::default(),
            latency: Duration::from_millis(150),
            failures: 0,
            conflict: false,
            offline_at: None,
            backup_dir: dir.path().to_path_buf(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plain_run_converges() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(options(&dir)).await.unwrap();

        assert_eq!(report.final_status, SaveStatus::Saved);
        assert!(report.converged());
        assert_eq!(report.max_concurrent_updates, 1);
        assert_eq!(report.server.title, "Shopping list");
        assert!(report.server.body.ends_with("coffee"));
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_run_keeps_local_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.conflict = true;
        let report = run(opts).await.unwrap();

        assert!(report.transitions.iter().any(|(_, s)| *s == SaveStatus::Conflict));
        assert_eq!(report.final_status, SaveStatus::Saved);
        assert!(report.converged());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir);
        opts.failures = 2;
        let report = run(opts).await.unwrap();

        assert_eq!(report.final_status, SaveStatus::Saved);
        assert!(report.converged());
    }
}
