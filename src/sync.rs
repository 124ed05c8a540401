// ABOUTME: The relay loop: poll a batch, translate, apply, commit, acknowledge, wait, repeat
// ABOUTME: Tears down the source and destination exactly once on shutdown or error

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::apply::apply;
use crate::destination::Destination;
use crate::primary_keys::PrimaryKeyMap;
use crate::source::ChangeStreamSource;
use crate::sql::SqlStatement;
use crate::translate::EntryTranslator;

/// Source of the wait between iterations, replaceable in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Polling,
    Translating,
    Applying,
    Committing,
    Sleeping,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub interval: Duration,
    /// Print every statement and its parameters to stdout.
    pub verbose: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_timeout: Duration::from_secs(1),
            interval: Duration::from_millis(500),
            verbose: false,
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batch_id: Option<i64>,
    pub records: usize,
    /// Transaction boundaries and heartbeats.
    pub skipped: usize,
    /// Records or rows that failed translation.
    pub rejected: usize,
    pub statements: usize,
    pub applied: usize,
    pub failed: usize,
    pub committed: bool,
    pub acked: bool,
    pub rolled_back: bool,
}

/// Totals across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub iterations: u64,
    pub records: u64,
    pub statements: u64,
    pub applied: u64,
    pub failed: u64,
    pub rejected: u64,
    pub rolled_back: u64,
}

impl SyncStats {
    pub fn record(&mut self, batch: &BatchStats) {
        self.iterations += 1;
        self.records += batch.records as u64;
        self.statements += batch.statements as u64;
        self.applied += batch.applied as u64;
        self.failed += batch.failed as u64;
        self.rejected += batch.rejected as u64;
        if batch.rolled_back {
            self.rolled_back += 1;
        }
    }
}

pub struct SyncLoop {
    source: Box<dyn ChangeStreamSource>,
    destination: Option<Box<dyn Destination>>,
    keys: PrimaryKeyMap,
    translator: EntryTranslator,
    options: SyncOptions,
    clock: Box<dyn Clock>,
    phase: Phase,
    stats: SyncStats,
}

impl SyncLoop {
    /// Without a destination the loop only consumes and acknowledges.
    pub fn new(
        source: Box<dyn ChangeStreamSource>,
        destination: Option<Box<dyn Destination>>,
        keys: PrimaryKeyMap,
        translator: EntryTranslator,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            destination,
            keys,
            translator,
            options,
            clock: Box::new(TokioClock),
            phase: Phase::Polling,
            stats: SyncStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn is_writing(&self) -> bool {
        self.destination.is_some()
    }

    /// Run one iteration. Errors come only from the source.
    pub async fn step(&mut self) -> Result<BatchStats> {
        self.phase = Phase::Polling;
        let batch = self
            .source
            .poll(self.options.batch_size, self.options.poll_timeout)
            .await?;
        let mut stats = BatchStats {
            batch_id: batch.id,
            records: batch.records.len(),
            ..Default::default()
        };

        self.phase = Phase::Translating;
        let mut statements: Vec<SqlStatement> = Vec::new();
        for record in &batch.records {
            // schema selection is left to the subscription filter
            if !record.header.entry_kind.carries_rows() {
                stats.skipped += 1;
                continue;
            }
            match self.translator.translate(record, &self.keys) {
                Ok(translation) => {
                    for rejected in &translation.rejected {
                        tracing::warn!("{}", rejected);
                    }
                    stats.rejected += translation.rejected.len();
                    statements.extend(translation.statements);
                }
                Err(e) => {
                    tracing::error!("Skipping change record: {}", e);
                    stats.rejected += 1;
                }
            }
        }
        stats.statements = statements.len();

        if self.options.verbose {
            for statement in &statements {
                println!("{}", statement.verbose_line());
            }
        }

        let mut commit_failed = false;
        if let Some(destination) = self.destination.as_mut() {
            self.phase = Phase::Applying;
            let report = apply(&statements, &mut **destination).await;
            for (statement, err) in report.failures() {
                tracing::error!(
                    "SQL execute failed on {}: {} sql=[{}] params={}",
                    statement.table,
                    err,
                    statement.sql,
                    statement.params_json()
                );
            }
            stats.applied = report.applied();
            stats.failed = report.failed();

            self.phase = Phase::Committing;
            match destination.commit().await {
                Ok(()) => stats.committed = true,
                Err(e) => {
                    tracing::error!("Commit failed, batch will be redelivered: {}", e);
                    commit_failed = true;
                }
            }
        }

        if let Some(id) = batch.id {
            if commit_failed {
                self.source.rollback(id).await?;
                stats.rolled_back = true;
            } else {
                self.source.ack(id).await?;
                stats.acked = true;
            }
        }

        if stats.records > 0 {
            tracing::debug!(
                "Batch {:?}: {} records, {} statements, {} failed, {} rejected",
                stats.batch_id,
                stats.records,
                stats.statements,
                stats.failed,
                stats.rejected
            );
        }
        Ok(stats)
    }

    /// Repeat `step` until shutdown is signalled or the source fails.
    ///
    /// A batch already polled always completes. Both connections are closed
    /// before returning on every path.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<SyncStats> {
        tracing::info!(
            "Starting relay loop (batch size {}, interval {:?}, {})",
            self.options.batch_size,
            self.options.interval,
            if self.is_writing() { "writing" } else { "dry run" }
        );
        let result = self.run_until_shutdown(&mut shutdown).await;
        self.teardown().await;
        match result {
            Ok(()) => Ok(self.stats),
            Err(e) => {
                tracing::error!("Relay loop stopped: {:#}", e);
                Err(e)
            }
        }
    }

    async fn run_until_shutdown(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<()> {
        loop {
            if shutdown_requested(shutdown) {
                tracing::info!("Shutdown signal received, stopping relay loop");
                return Ok(());
            }

            let batch = self.step().await?;
            self.stats.record(&batch);

            self.phase = Phase::Sleeping;
            tokio::select! {
                biased; // Check shutdown first
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping relay loop");
                    return Ok(());
                }
                _ = self.clock.sleep(self.options.interval) => {}
            }
        }
    }

    async fn teardown(&mut self) {
        if self.phase == Phase::Disconnected {
            return;
        }
        if let Err(e) = self.source.disconnect().await {
            tracing::warn!("Error disconnecting change stream: {:#}", e);
        }
        if let Some(mut destination) = self.destination.take() {
            if let Err(e) = destination.close().await {
                tracing::warn!("Error closing destination: {:#}", e);
            }
        }
        self.phase = Phase::Disconnected;
        tracing::info!(
            "Relay stopped after {} iterations: {} records, {} statements, {} failed",
            self.stats.iterations,
            self.stats.records,
            self.stats.statements,
            self.stats.failed
        );
    }
}

/// A closed or lagged channel counts as a shutdown request.
fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_signal_is_detected() {
        let (tx, mut rx) = broadcast::channel::<()>(1);
        assert!(!shutdown_requested(&mut rx));
        tx.send(()).unwrap();
        assert!(shutdown_requested(&mut rx));
    }

    #[test]
    fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = broadcast::channel::<()>(1);
        drop(tx);
        assert!(shutdown_requested(&mut rx));
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = SyncStats::default();
        stats.record(&BatchStats {
            records: 3,
            statements: 2,
            applied: 1,
            failed: 1,
            rolled_back: true,
            ..Default::default()
        });
        stats.record(&BatchStats::default());
        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rolled_back, 1);
    }
}
