// ABOUTME: Target-side connection handle used by the replay engine
// ABOUTME: Exposes begin/execute and the replication origin functions behind a trait

use crate::lsn::Lsn;
use crate::postgres;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::Client;

/// The target database handle the replay engine drives.
///
/// There is intentionally no commit helper here: the engine executes the
/// literal `COMMIT` string through `execute` so the connection stays open
/// across transactions. A driver-level commit would finalize more
/// connection state than the engine wants.
#[async_trait]
pub trait ApplyTarget {
    /// Open a transaction on the target connection.
    async fn begin(&mut self) -> Result<()>;

    /// Execute one SQL statement on the target connection.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Look up the oid of a replication origin; `None` when it does not exist.
    async fn origin_oid(&mut self, origin: &str) -> Result<Option<u32>>;

    /// Read the durable replay progress recorded for the origin.
    async fn origin_progress(&mut self, origin: &str, flush: bool) -> Result<Lsn>;

    /// Associate this session with the origin, so transaction commits
    /// advance the origin's progress.
    async fn origin_session_setup(&mut self, origin: &str) -> Result<()>;

    /// Mark the current transaction as replaying the source transaction
    /// committed at `lsn`/`timestamp`.
    async fn origin_xact_setup(&mut self, lsn: Lsn, timestamp: &str) -> Result<()>;
}

/// `ApplyTarget` over a long-lived tokio-postgres connection.
///
/// Replayed statements go through the simple-query protocol so the
/// connection behaves like a multi-statement session: `BEGIN`, the
/// replayed DML, and the literal `COMMIT` all share one transaction.
pub struct PgTarget {
    client: Client,
}

impl PgTarget {
    /// Connect the long-lived target session.
    pub async fn connect(target_uri: &str) -> Result<Self> {
        let client = postgres::connect_with_retry(target_uri)
            .await
            .context("Failed to open the target connection")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ApplyTarget for PgTarget {
    async fn begin(&mut self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .context("Failed to open a transaction on the target")?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .with_context(|| format!("Failed to execute SQL: {sql}"))?;
        Ok(())
    }

    async fn origin_oid(&mut self, origin: &str) -> Result<Option<u32>> {
        let row = self
            .client
            .query_one("SELECT pg_replication_origin_oid($1)", &[&origin])
            .await
            .context("Failed to query replication origin oid")?;
        let oid: Option<u32> = row
            .try_get(0)
            .context("Failed to read replication origin oid")?;
        Ok(oid)
    }

    async fn origin_progress(&mut self, origin: &str, flush: bool) -> Result<Lsn> {
        let row = self
            .client
            .query_one(
                "SELECT pg_replication_origin_progress($1, $2)",
                &[&origin, &flush],
            )
            .await
            .context("Failed to query replication origin progress")?;
        let lsn: Option<tokio_postgres::types::PgLsn> = row
            .try_get(0)
            .context("Failed to read replication origin progress")?;
        Ok(lsn.map(Lsn::from).unwrap_or(Lsn::INVALID))
    }

    async fn origin_session_setup(&mut self, origin: &str) -> Result<()> {
        self.client
            .execute("SELECT pg_replication_origin_session_setup($1)", &[&origin])
            .await
            .with_context(|| format!("Failed to set up origin session for \"{origin}\""))?;
        Ok(())
    }

    async fn origin_xact_setup(&mut self, lsn: Lsn, timestamp: &str) -> Result<()> {
        let lsn = lsn.to_string();
        self.client
            .execute(
                "SELECT pg_replication_origin_xact_setup($1::pg_lsn, $2::timestamptz)",
                &[&lsn, &timestamp],
            )
            .await
            .with_context(|| format!("Failed to set up origin tracking at {lsn}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercising PgTarget needs a real target database; see the TEST_TARGET_URL
    // integration tests. The replay semantics over the trait are covered by
    // tests/replay_test.rs with an in-memory target.

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_origin_roundtrip() {
        let url = std::env::var("TEST_TARGET_URL").expect("TEST_TARGET_URL not set");
        let mut target = PgTarget::connect(&url).await.unwrap();

        // an origin that was never created reports no oid
        let oid = target.origin_oid("cdc_replay_test_missing").await.unwrap();
        assert_eq!(oid, None);
    }
}
