// ABOUTME: The logical-change apply engine and its supporting pieces
// ABOUTME: Exports the catch-up driver, file replayer, parser and WAL naming

pub mod catchup;
pub mod context;
pub mod parser;
pub mod replay;
pub mod wal;

pub use catchup::{ApplyEngine, ApplyMode, CatchupConfig, CATCHUP_POLL_INTERVAL};
pub use context::{ApplyContext, CdcPaths, PrefetchContext, SourceSystem};
pub use parser::{parse_action, MessageMetadata, StreamAction};
