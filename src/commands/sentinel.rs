// ABOUTME: Operator surface over the sentinel control row on the source
// ABOUTME: Create, inspect, move the stop position, or toggle apply mode

use crate::lsn::Lsn;
use crate::postgres;
use crate::sentinel::{PgSentinelStore, Sentinel, SentinelStore};
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args, Clone)]
pub struct SentinelArgs {
    /// Source database connection string
    #[arg(long)]
    pub source: String,
    #[command(subcommand)]
    pub command: SentinelCommand,
}

#[derive(Subcommand, Clone)]
pub enum SentinelCommand {
    /// Create the sentinel table and its singleton row
    Create,
    /// Show the current sentinel values
    Get,
    /// Set the stop position the apply engine halts at
    SetEndpos { endpos: Lsn },
    /// Enable applying changes
    Enable,
    /// Disable applying changes
    Disable,
}

pub async fn sentinel(args: SentinelArgs) -> Result<()> {
    postgres::validate_connection_string(&args.source)?;

    let store = PgSentinelStore::new(&args.source);

    let sentinel = match args.command {
        SentinelCommand::Create => {
            let sentinel = store.create().await?;
            println!("Sentinel created");
            sentinel
        }
        SentinelCommand::Get => store.get().await?,
        SentinelCommand::SetEndpos { endpos } => store.set_endpos(endpos).await?,
        SentinelCommand::Enable => store.set_apply(true).await?,
        SentinelCommand::Disable => store.set_apply(false).await?,
    };

    print_sentinel(&sentinel);
    Ok(())
}

fn print_sentinel(sentinel: &Sentinel) {
    println!("startpos: {}", sentinel.startpos);
    println!("endpos:   {}", sentinel.endpos);
    println!(
        "apply:    {}",
        if sentinel.apply { "enabled" } else { "disabled" }
    );
}
