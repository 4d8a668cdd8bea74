// ABOUTME: Classifies prefetched SQL file lines into stream actions
// ABOUTME: Parses the JSON metadata payload of BEGIN/COMMIT/SWITCH/KEEPALIVE lines

use crate::lsn::Lsn;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Control-line prefixes written by the prefetch stage. Each is followed by
/// a single-line JSON object carrying the record's metadata.
pub const OUTPUT_BEGIN: &str = "BEGIN ";
pub const OUTPUT_COMMIT: &str = "COMMIT ";
pub const OUTPUT_SWITCHWAL: &str = "SWITCH WAL ";
pub const OUTPUT_KEEPALIVE: &str = "KEEPALIVE ";

/// The kind of record a single SQL file line encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Begin,
    Commit,
    Switch,
    Keepalive,
    Insert,
    Update,
    Delete,
    Truncate,
    Unknown,
}

/// Metadata parsed from the JSON payload of a control line.
///
/// `lsn` and `timestamp` are required by the replayer for BEGIN and
/// KEEPALIVE records; a payload missing them parses to `Lsn::INVALID` and
/// an empty string, and the replayer rejects those during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub action: StreamAction,
    pub xid: Option<u32>,
    pub lsn: Lsn,
    pub timestamp: String,
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    xid: Option<u32>,
    #[serde(default)]
    lsn: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Classify one line of a prefetched SQL file.
///
/// Control lines are recognized by their fixed prefix and return the parsed
/// metadata alongside the action. Everything else is matched as a DML
/// statement by substring, first match winning. An empty or unrecognizable
/// line is `Unknown`, which the replayer treats as fatal.
///
/// A malformed JSON payload after a recognized prefix is an error: the file
/// cannot be replayed past it.
pub fn parse_action(line: &str) -> Result<(StreamAction, Option<MessageMetadata>)> {
    if line.is_empty() {
        return Ok((StreamAction::Unknown, None));
    }

    let control = [
        (OUTPUT_BEGIN, StreamAction::Begin),
        (OUTPUT_COMMIT, StreamAction::Commit),
        (OUTPUT_SWITCHWAL, StreamAction::Switch),
        (OUTPUT_KEEPALIVE, StreamAction::Keepalive),
    ];

    for (prefix, action) in control {
        if let Some(payload) = line.strip_prefix(prefix) {
            let metadata = parse_metadata(action, payload)
                .with_context(|| format!("Failed to parse metadata in line {:?}", line))?;
            return Ok((action, Some(metadata)));
        }
    }

    let action = if line.contains("INSERT INTO") {
        StreamAction::Insert
    } else if line.contains("UPDATE ") {
        StreamAction::Update
    } else if line.contains("DELETE FROM ") {
        StreamAction::Delete
    } else if line.contains("TRUNCATE ") {
        StreamAction::Truncate
    } else {
        StreamAction::Unknown
    };

    Ok((action, None))
}

fn parse_metadata(action: StreamAction, payload: &str) -> Result<MessageMetadata> {
    let raw: RawMetadata = serde_json::from_str(payload).context("Invalid JSON payload")?;

    let lsn = match raw.lsn {
        Some(text) => text
            .parse()
            .with_context(|| format!("Invalid lsn value {:?}", text))?,
        None => Lsn::INVALID,
    };

    Ok(MessageMetadata {
        action,
        xid: raw.xid,
        lsn,
        timestamp: raw.timestamp.unwrap_or_default(),
    })
}
