// ABOUTME: Sentinel control row on the source database gating the apply engine
// ABOUTME: Short-lived connections read/update startpos, endpos, apply and replay_lsn

use crate::lsn::Lsn;
use crate::postgres;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::types::PgLsn;
use tokio_postgres::Row;

/// A snapshot of the sentinel row.
///
/// `startpos` is advisory history; `endpos` is the current stop position
/// (`Lsn::INVALID` means run forever, and it may move while the engine
/// runs); `apply` gates whether replay may proceed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sentinel {
    pub startpos: Lsn,
    pub endpos: Lsn,
    pub apply: bool,
}

/// Access to the shared sentinel record.
///
/// The engine only ever needs two operations: a plain read (used while
/// waiting for apply mode) and the combined progress-report-and-read used
/// at each file boundary.
#[async_trait]
pub trait SentinelStore {
    async fn get(&self) -> Result<Sentinel>;

    /// Publish the engine's replay position and read back the current
    /// snapshot in one round trip.
    async fn sync_apply(&self, replay_lsn: Lsn) -> Result<Sentinel>;
}

/// Sentinel access against the source database. Every call opens a fresh
/// short-lived connection; the sentinel is shared with operator tooling
/// and holding a connection open across the poll interval would serve no
/// one.
pub struct PgSentinelStore {
    source_uri: String,
}

impl PgSentinelStore {
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
        }
    }

    /// Create the sentinel schema, table and its singleton row.
    pub async fn create(&self) -> Result<Sentinel> {
        let client = postgres::connect(&self.source_uri).await?;
        client
            .batch_execute(
                "CREATE SCHEMA IF NOT EXISTS cdc_replay;
                 CREATE TABLE IF NOT EXISTS cdc_replay.sentinel (
                     startpos pg_lsn NOT NULL DEFAULT '0/0',
                     endpos pg_lsn NOT NULL DEFAULT '0/0',
                     apply bool NOT NULL DEFAULT false,
                     replay_lsn pg_lsn NOT NULL DEFAULT '0/0'
                 );
                 INSERT INTO cdc_replay.sentinel (startpos, endpos, apply, replay_lsn)
                 SELECT '0/0', '0/0', false, '0/0'
                 WHERE NOT EXISTS (SELECT 1 FROM cdc_replay.sentinel);",
            )
            .await
            .context("Failed to create the sentinel table")?;

        get_with(&client).await
    }

    /// Update the stop position.
    pub async fn set_endpos(&self, endpos: Lsn) -> Result<Sentinel> {
        let client = postgres::connect(&self.source_uri).await?;
        let row = client
            .query_one(
                "UPDATE cdc_replay.sentinel SET endpos = $1 \
                 RETURNING startpos, endpos, apply",
                &[&PgLsn::from(endpos)],
            )
            .await
            .context("Failed to update the sentinel endpos")?;
        sentinel_from_row(&row)
    }

    /// Enable or disable applying.
    pub async fn set_apply(&self, apply: bool) -> Result<Sentinel> {
        let client = postgres::connect(&self.source_uri).await?;
        let row = client
            .query_one(
                "UPDATE cdc_replay.sentinel SET apply = $1 \
                 RETURNING startpos, endpos, apply",
                &[&apply],
            )
            .await
            .context("Failed to update the sentinel apply flag")?;
        sentinel_from_row(&row)
    }
}

#[async_trait]
impl SentinelStore for PgSentinelStore {
    async fn get(&self) -> Result<Sentinel> {
        let client = postgres::connect(&self.source_uri).await?;
        get_with(&client).await
    }

    async fn sync_apply(&self, replay_lsn: Lsn) -> Result<Sentinel> {
        let client = postgres::connect(&self.source_uri).await?;
        let row = client
            .query_one(
                "UPDATE cdc_replay.sentinel SET replay_lsn = $1 \
                 RETURNING startpos, endpos, apply",
                &[&PgLsn::from(replay_lsn)],
            )
            .await
            .context("Failed to sync the sentinel replay position")?;
        sentinel_from_row(&row)
    }
}

async fn get_with(client: &tokio_postgres::Client) -> Result<Sentinel> {
    let row = client
        .query_one("SELECT startpos, endpos, apply FROM cdc_replay.sentinel", &[])
        .await
        .context("Failed to query the sentinel")?;
    sentinel_from_row(&row)
}

fn sentinel_from_row(row: &Row) -> Result<Sentinel> {
    let startpos: PgLsn = row.try_get(0).context("Failed to read sentinel startpos")?;
    let endpos: PgLsn = row.try_get(1).context("Failed to read sentinel endpos")?;
    let apply: bool = row.try_get(2).context("Failed to read sentinel apply")?;

    Ok(Sentinel {
        startpos: startpos.into(),
        endpos: endpos.into(),
        apply,
    })
}
