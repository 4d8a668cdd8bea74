// ABOUTME: Live state of the apply engine and the on-disk prefetch context file
// ABOUTME: Owns the previousLSN to SQL-file-name derivation

use crate::apply::wal;
use crate::lsn::Lsn;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Identity of the source cluster, captured by the prefetch stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSystem {
    pub system_identifier: u64,
    pub timeline: u32,
    /// WAL insert position at the time prefetch connected.
    pub xlogpos: Lsn,
}

/// On-disk layout of the CDC directory: prefetched SQL files named
/// `<wal_segment_name>.sql` plus the prefetch context file.
#[derive(Debug, Clone)]
pub struct CdcPaths {
    pub dir: PathBuf,
}

impl CdcPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn sql_file(&self, wal: &str) -> PathBuf {
        self.dir.join(format!("{wal}.sql"))
    }

    pub fn context_file(&self) -> PathBuf {
        self.dir.join(PrefetchContext::FILE_NAME)
    }
}

/// Context captured by the prefetch stage, persisted in the CDC directory
/// and read once by the apply engine at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchContext {
    pub system: SourceSystem,
    pub wal_segment_size: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl PrefetchContext {
    pub const FILE_NAME: &'static str = "prefetch-context.json";

    pub fn new(system: SourceSystem, wal_segment_size: u32) -> Self {
        Self {
            system,
            wal_segment_size,
            captured_at: chrono::Utc::now(),
        }
    }

    /// Read and validate the context file from the CDC directory.
    pub async fn load(paths: &CdcPaths) -> Result<Self> {
        let path = paths.context_file();
        let contents = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read prefetch context from {:?}", path))?;
        let context: PrefetchContext = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse prefetch context from {:?}", path))?;

        wal::validate_wal_segment_size(context.wal_segment_size)
            .with_context(|| format!("Invalid prefetch context in {:?}", path))?;

        Ok(context)
    }

    /// Write the context file, creating the CDC directory if needed.
    pub async fn save(&self, paths: &CdcPaths) -> Result<()> {
        fs::create_dir_all(&paths.dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", paths.dir))?;

        let path = paths.context_file();
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize prefetch context")?;
        fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write prefetch context to {:?}", path))?;
        Ok(())
    }
}

/// Live state of the apply engine for one catch-up run.
///
/// `previous_lsn` is the highest LSN durably committed on the target via
/// the replication origin; it only moves forward. `wal` and
/// `sql_file_name` are derived from it and refreshed by
/// `compute_sql_file_name` after every change.
#[derive(Debug)]
pub struct ApplyContext {
    pub system: SourceSystem,
    pub wal_segment_size: u32,
    pub paths: CdcPaths,
    pub origin: String,

    pub previous_lsn: Lsn,

    /// Last-seen sentinel snapshot.
    pub startpos: Lsn,
    pub endpos: Lsn,
    pub apply: bool,

    /// WAL segment name containing `previous_lsn`, and its SQL file path.
    pub wal: String,
    pub sql_file_name: PathBuf,

    /// Terminal latch: once set it never clears.
    pub reached_end_pos: bool,
}

impl ApplyContext {
    pub fn new(prefetch: &PrefetchContext, paths: CdcPaths, origin: impl Into<String>) -> Self {
        let mut context = Self {
            system: prefetch.system.clone(),
            wal_segment_size: prefetch.wal_segment_size,
            paths,
            origin: origin.into(),
            previous_lsn: Lsn::INVALID,
            startpos: Lsn::INVALID,
            endpos: Lsn::INVALID,
            apply: false,
            wal: String::new(),
            sql_file_name: PathBuf::new(),
            reached_end_pos: false,
        };
        context.compute_sql_file_name();
        context
    }

    /// Refresh `wal` and `sql_file_name` from `previous_lsn`. Must run
    /// after every assignment to `previous_lsn`.
    pub fn compute_sql_file_name(&mut self) {
        self.wal = wal::wal_segment_name(
            self.system.timeline,
            self.previous_lsn,
            self.wal_segment_size,
        );
        self.sql_file_name = self.paths.sql_file(&self.wal);

        tracing::debug!(
            "compute_sql_file_name: {} {:?}",
            self.previous_lsn,
            self.sql_file_name
        );
    }

    pub fn sql_file_exists(&self) -> bool {
        self.sql_file_name.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_system() -> SourceSystem {
        SourceSystem {
            system_identifier: 7113809450641410559,
            timeline: 1,
            xlogpos: "0/1500000".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_prefetch_context_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CdcPaths::new(dir.path());

        let context = PrefetchContext::new(test_system(), 0x0100_0000);
        context.save(&paths).await.unwrap();

        let loaded = PrefetchContext::load(&paths).await.unwrap();
        assert_eq!(loaded.wal_segment_size, 0x0100_0000);
        assert_eq!(loaded.system.timeline, 1);
        assert_eq!(loaded.system.system_identifier, 7113809450641410559);
        assert_eq!(loaded.system.xlogpos, "0/1500000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_prefetch_context_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CdcPaths::new(dir.path());
        assert!(PrefetchContext::load(&paths).await.is_err());
    }

    #[tokio::test]
    async fn test_prefetch_context_rejects_bad_segment_size() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CdcPaths::new(dir.path());

        let context = PrefetchContext::new(test_system(), 12345);
        context.save(&paths).await.unwrap();
        assert!(PrefetchContext::load(&paths).await.is_err());
    }

    #[test]
    fn test_sql_file_name_tracks_previous_lsn() {
        let prefetch = PrefetchContext::new(test_system(), 0x0100_0000);
        let paths = CdcPaths::new("/t");
        let mut context = ApplyContext::new(&prefetch, paths, "replay_origin");

        context.previous_lsn = "0/1500000".parse().unwrap();
        context.compute_sql_file_name();
        assert_eq!(context.wal, "000000010000000000000001");
        assert_eq!(
            context.sql_file_name,
            PathBuf::from("/t/000000010000000000000001.sql")
        );

        // advancing over a segment boundary names a different file
        context.previous_lsn = "0/2000000".parse().unwrap();
        context.compute_sql_file_name();
        assert_eq!(
            context.sql_file_name,
            PathBuf::from("/t/000000010000000000000002.sql")
        );
    }
}
