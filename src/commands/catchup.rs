// ABOUTME: The catchup command: wires config, connections and the apply engine
// ABOUTME: Exit is clean on reached endpos or shutdown, an error on anything fatal

use crate::apply::{ApplyEngine, ApplyMode, CatchupConfig, CdcPaths, PrefetchContext};
use crate::lsn::Lsn;
use crate::postgres::{self, target::PgTarget};
use crate::sentinel::PgSentinelStore;
use crate::shutdown::{self, ShutdownFlag};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Clone)]
pub struct CatchupArgs {
    /// Source database connection string (sentinel side)
    #[arg(long)]
    pub source: String,
    /// Target database connection string
    #[arg(long)]
    pub target: String,
    /// Directory holding the prefetched SQL files
    #[arg(long)]
    pub dir: PathBuf,
    /// Replication origin name on the target database
    #[arg(long)]
    pub origin: String,
    /// Stop position; overrides the sentinel endpos
    #[arg(long)]
    pub endpos: Option<Lsn>,
    /// Whether a concurrent prefetch process produces the files
    #[arg(long, value_enum, default_value = "prefetch")]
    pub mode: ApplyMode,
    /// Seconds between polls when waiting on files or the sentinel
    #[arg(long, default_value_t = 10)]
    pub poll_interval: u64,
}

pub async fn catchup(args: CatchupArgs) -> Result<()> {
    postgres::validate_connection_string(&args.source)?;
    postgres::validate_connection_string(&args.target)?;

    tracing::info!(
        "Catching up changes from {} into {}",
        postgres::sanitize_url(&args.source),
        postgres::sanitize_url(&args.target)
    );

    let paths = CdcPaths::new(args.dir);
    let prefetch = PrefetchContext::load(&paths).await?;

    let mut config = CatchupConfig::new(args.origin);
    config.mode = args.mode;
    config.endpos = args.endpos.unwrap_or(Lsn::INVALID);
    config.poll_interval = Duration::from_secs(args.poll_interval);

    let target = PgTarget::connect(&args.target).await?;
    let sentinel = PgSentinelStore::new(&args.source);

    let flag = ShutdownFlag::new();
    shutdown::listen_for_signals(flag.clone());

    let mut engine = ApplyEngine::new(&prefetch, paths, config, target, sentinel, flag);
    engine.run().await?;

    tracing::info!(
        "Done applying changes, replayed up to {}",
        engine.context().previous_lsn
    );

    Ok(())
}
