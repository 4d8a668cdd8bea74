// ABOUTME: Replays one prefetched SQL file line by line against the target
// ABOUTME: Owns transaction state, skip-until, endpos latching and origin bookkeeping

use crate::apply::context::ApplyContext;
use crate::apply::parser::{self, StreamAction};
use crate::postgres::target::ApplyTarget;
use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// Replay the SQL file named by `context.sql_file_name`.
///
/// Preconditions: the file exists, `context.previous_lsn` is the durable
/// replay point, and no target transaction is open. On every non-error
/// return no transaction is left open: each path that opens one commits it
/// or latches the end position right after the commit.
///
/// The skip-until rule makes this safe to call on a file whose first
/// transactions were already committed durably: replay only starts at the
/// first BEGIN or KEEPALIVE whose LSN is past `previous_lsn`.
pub async fn apply_file<T: ApplyTarget>(context: &mut ApplyContext, target: &mut T) -> Result<()> {
    let path = context.sql_file_name.clone();
    let buffer = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read SQL file {:?}", path))?;

    let mut lines: Vec<&str> = buffer.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    let count = lines.len();

    info!("Replaying changes from file {:?}", path);
    debug!("Read {} lines in file {:?}", count, path);

    let mut reached_starting_position = false;

    for (i, &line) in lines.iter().enumerate() {
        if context.reached_end_pos {
            break;
        }

        match parser::parse_action(line)? {
            (StreamAction::Switch, Some(metadata)) => {
                // the SWITCH WAL record is always the last line of its file
                if i != count - 1 {
                    bail!(
                        "SWITCH WAL found in line {}, before last line {}",
                        i + 1,
                        count
                    );
                }

                debug!(
                    "apply: SWITCH from {} to {}",
                    context.previous_lsn, metadata.lsn
                );

                context.previous_lsn = metadata.lsn;
            }

            (StreamAction::Begin, Some(metadata)) => {
                if !reached_starting_position {
                    reached_starting_position = context.previous_lsn < metadata.lsn;
                }

                debug!(
                    "BEGIN {} LSN {} @{}, previous LSN {} {}",
                    metadata.xid.unwrap_or(0),
                    metadata.lsn,
                    metadata.timestamp,
                    context.previous_lsn,
                    if reached_starting_position {
                        ""
                    } else {
                        "[skipping]"
                    }
                );

                if !metadata.lsn.is_valid() || metadata.timestamp.is_empty() {
                    bail!("Failed to parse BEGIN message: {:?}", line);
                }

                if context.endpos.is_valid() && context.endpos <= metadata.lsn {
                    context.reached_end_pos = true;
                    info!(
                        "Apply reached end position {} at {}",
                        context.endpos, metadata.lsn
                    );
                    break;
                }

                if !reached_starting_position {
                    continue;
                }

                target.begin().await?;
                target
                    .origin_xact_setup(metadata.lsn, &metadata.timestamp)
                    .await?;
            }

            (StreamAction::Commit, Some(metadata)) => {
                if !reached_starting_position {
                    continue;
                }

                debug!("COMMIT {} LSN {}", metadata.xid.unwrap_or(0), metadata.lsn);

                // a driver-level commit would finish the connection, so the
                // engine sends the literal statement instead
                target.execute("COMMIT").await?;

                context.previous_lsn = metadata.lsn;

                // the endpos check belongs at COMMIT record time: this
                // record might be the last entry of the file
                if context.endpos.is_valid() && context.endpos <= context.previous_lsn {
                    context.reached_end_pos = true;
                    info!(
                        "Applied reached end position {} at {}",
                        context.endpos, context.previous_lsn
                    );
                    break;
                }
            }

            // A KEEPALIVE is replayed as its own transaction whose only
            // effect is advancing the replication origin on the target.
            (StreamAction::Keepalive, Some(metadata)) => {
                if !reached_starting_position {
                    reached_starting_position = context.previous_lsn < metadata.lsn;
                }

                debug!(
                    "KEEPALIVE LSN {} @{}, previous LSN {} {}",
                    metadata.lsn,
                    metadata.timestamp,
                    context.previous_lsn,
                    if reached_starting_position {
                        ""
                    } else {
                        "[skipping]"
                    }
                );

                if !metadata.lsn.is_valid() || metadata.timestamp.is_empty() {
                    bail!("Failed to parse KEEPALIVE message: {:?}", line);
                }

                // strict comparison: a keepalive sitting exactly at endpos is
                // still applied, so the origin lands exactly on endpos
                if context.endpos.is_valid() && context.endpos < metadata.lsn {
                    context.reached_end_pos = true;
                    info!(
                        "Apply reached end position {} at {}",
                        context.endpos, metadata.lsn
                    );
                    break;
                }

                if !reached_starting_position {
                    continue;
                }

                target.begin().await?;
                target
                    .origin_xact_setup(metadata.lsn, &metadata.timestamp)
                    .await?;
                target.execute("COMMIT").await?;

                context.previous_lsn = metadata.lsn;

                if context.endpos.is_valid() && context.endpos <= context.previous_lsn {
                    context.reached_end_pos = true;
                    info!(
                        "Applied reached end position {} at {}",
                        context.endpos, context.previous_lsn
                    );
                    break;
                }
            }

            (
                StreamAction::Insert
                | StreamAction::Update
                | StreamAction::Delete
                | StreamAction::Truncate,
                _,
            ) => {
                if !reached_starting_position {
                    continue;
                }

                // chomp the final semicolon the prefetch stage added
                let sql = line.strip_suffix(';').unwrap_or(line);
                target.execute(sql).await?;
            }

            _ => {
                bail!("Failed to parse SQL query {:?}", line);
            }
        }
    }

    Ok(())
}
