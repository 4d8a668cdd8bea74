// ABOUTME: Top-level catch-up driver: which file next, when to poll, when to stop
// ABOUTME: Also owns sentinel coordination and replication origin setup

use crate::apply::context::{ApplyContext, CdcPaths, PrefetchContext};
use crate::apply::replay;
use crate::lsn::Lsn;
use crate::postgres::target::ApplyTarget;
use crate::sentinel::SentinelStore;
use crate::shutdown::ShutdownFlag;
use anyhow::{bail, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default pacing for all three suspension points: missing-file wait,
/// end-of-latest-file wait, and the sentinel wait-for-enable poll.
pub const CATCHUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Whether the engine consumes files produced by a concurrent prefetch
/// process (and therefore waits for the sentinel to enable applying), or
/// replays an already-materialized directory directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ApplyMode {
    Prefetch,
    Direct,
}

/// Configuration for one catch-up run.
#[derive(Debug, Clone)]
pub struct CatchupConfig {
    pub mode: ApplyMode,
    pub origin: String,
    /// Stop position from the command line; `Lsn::INVALID` when unset.
    /// Takes precedence over the sentinel's endpos at startup.
    pub endpos: Lsn,
    pub poll_interval: Duration,
}

impl CatchupConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            mode: ApplyMode::Prefetch,
            origin: origin.into(),
            endpos: Lsn::INVALID,
            poll_interval: CATCHUP_POLL_INTERVAL,
        }
    }
}

enum WaitOutcome {
    Enabled,
    Shutdown,
}

/// The apply engine: one sequential loop replaying prefetched SQL files in
/// WAL order against the target, with progress tracked in the target's
/// replication origin and coordinated through the source-side sentinel.
pub struct ApplyEngine<T, S> {
    context: ApplyContext,
    target: T,
    sentinel: S,
    config: CatchupConfig,
    shutdown: ShutdownFlag,
}

impl<T: ApplyTarget, S: SentinelStore> ApplyEngine<T, S> {
    pub fn new(
        prefetch: &PrefetchContext,
        paths: CdcPaths,
        config: CatchupConfig,
        target: T,
        sentinel: S,
        shutdown: ShutdownFlag,
    ) -> Self {
        let context = ApplyContext::new(prefetch, paths, config.origin.clone());
        Self {
            context,
            target,
            sentinel,
            config,
            shutdown,
        }
    }

    pub fn context(&self) -> &ApplyContext {
        &self.context
    }

    /// Run the catch-up loop until the end position is reached or a
    /// shutdown is requested; both are clean exits.
    pub async fn run(&mut self) -> Result<()> {
        debug!(
            "Source database wal_segment_size is {}",
            self.context.wal_segment_size
        );
        debug!(
            "Source database timeline is {}",
            self.context.system.timeline
        );

        if self.config.mode == ApplyMode::Prefetch {
            if let WaitOutcome::Shutdown = self.wait_for_apply_enabled().await {
                return Ok(());
            }
        }

        self.setup_replication_origin().await?;

        info!(
            "Catching up from LSN {} in {:?}",
            self.context.previous_lsn, self.context.sql_file_name
        );

        if self.context.endpos.is_valid() {
            info!("Stopping at endpos LSN {}", self.context.endpos);
        }

        loop {
            let current_file = self.context.sql_file_name.clone();

            if self.shutdown.is_set() {
                break;
            }

            // the expected file may not exist yet: keep looping until the
            // concurrent prefetch process has created it
            if !self.context.sql_file_exists() {
                debug!(
                    "File {:?} does not exist yet, retrying in {:?}",
                    current_file, self.config.poll_interval
                );
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            replay::apply_file(&mut self.context, &mut self.target).await?;

            // report progress and fetch fresh sentinel values; failure is a
            // warning, the next sync may succeed
            self.sync_sentinel().await;

            // the sync may have brought a new endpos that we already passed
            if !self.context.reached_end_pos
                && self.context.endpos.is_valid()
                && self.context.endpos <= self.context.previous_lsn
            {
                self.context.reached_end_pos = true;
                info!(
                    "Applied reached end position {} at {}",
                    self.context.endpos, self.context.previous_lsn
                );
            }

            if self.context.reached_end_pos {
                break;
            }

            self.context.compute_sql_file_name();

            if self.context.sql_file_name == current_file {
                debug!(
                    "Reached end of file {:?} at {}",
                    current_file, self.context.previous_lsn
                );

                // the prefetch process may still be appending to this file
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Ok(())
    }

    /// Poll the sentinel until its apply flag is enabled. Query failures
    /// are transient: warn and retry on the next interval.
    async fn wait_for_apply_enabled(&mut self) -> WaitOutcome {
        let mut first_loop = true;

        loop {
            if self.shutdown.is_set() {
                info!(
                    "Apply process received a shutdown signal \
                     while waiting for apply mode, quitting now"
                );
                return WaitOutcome::Shutdown;
            }

            // reconnects on each iteration, every poll interval
            match self.sentinel.get().await {
                Ok(sentinel) => {
                    debug!(
                        "startpos {} endpos {} apply {}",
                        sentinel.startpos,
                        sentinel.endpos,
                        if sentinel.apply { "enabled" } else { "disabled" }
                    );

                    if sentinel.apply {
                        self.context.startpos = sentinel.startpos;
                        self.context.endpos = sentinel.endpos;
                        self.context.apply = true;

                        info!("The sentinel has enabled applying changes");
                        return WaitOutcome::Enabled;
                    }

                    if first_loop {
                        first_loop = false;
                        info!("Waiting until the sentinel apply mode is enabled");
                    }
                }
                Err(e) => {
                    warn!(
                        "Retrying to fetch sentinel values in {:?}: {:#}",
                        self.config.poll_interval, e
                    );
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One-time setup on the target: resolve the origin (it must have been
    /// created by provisioning), seed `previous_lsn` from its durable
    /// progress, and attach the origin to this session.
    async fn setup_replication_origin(&mut self) -> Result<()> {
        // both --endpos and the sentinel endpos may be set; the command
        // line option wins
        if self.config.endpos.is_valid() {
            if self.context.endpos.is_valid() && self.context.endpos != self.config.endpos {
                warn!(
                    "Option --endpos {} is used, even when the sentinel endpos is set to {}",
                    self.config.endpos, self.context.endpos
                );
            }
            self.context.endpos = self.config.endpos;
        }

        let origin = self.context.origin.clone();

        let oid = self.target.origin_oid(&origin).await?;
        debug!("setup_replication_origin: oid == {:?}", oid);

        if oid.unwrap_or(0) == 0 {
            bail!(
                "Failed to fetch progress for replication origin \"{}\": \
                 replication origin not found on target database",
                origin
            );
        }

        self.context.previous_lsn = self.target.origin_progress(&origin, true).await?;
        self.context.compute_sql_file_name();

        debug!(
            "setup_replication_origin: replication origin \"{}\" found at {}, \
             expected in file {:?}",
            origin, self.context.previous_lsn, self.context.sql_file_name
        );

        self.target.origin_session_setup(&origin).await?;

        Ok(())
    }

    async fn sync_sentinel(&mut self) {
        match self.sentinel.sync_apply(self.context.previous_lsn).await {
            Ok(sentinel) => {
                self.context.apply = sentinel.apply;
                self.context.endpos = sentinel.endpos;
                self.context.startpos = sentinel.startpos;
            }
            Err(e) => {
                // keep the previous snapshot, the next sync may succeed
                warn!("Failed to sync progress with the sentinel: {:#}", e);
            }
        }
    }
}
