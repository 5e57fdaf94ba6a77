//! # music
//!
//! Thin binary over the `music` library: parses arguments, sets up logging and
//! routes each subcommand.
//!
//! ## Usage
//!
//! ```bash
//! # Scrobble whatever vlc plays, sampling every 10 seconds
//! music watch
//!
//! # Resubmit plays last.fm never confirmed
//! music import
//!
//! # Audit the ledger
//! music plays --pending
//!
//! # What last.fm has
//! music recent -l 10
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::debug;

use music::cli::{self, Command};
use music::config::{self, Config, WatchSettings};
use music::{completion, db, recent, reconcile, watch};

/// Logging is `info` by default, `debug` with `--debug` or `"debug": true`.
/// `RUST_LOG` always wins, e.g. `RUST_LOG=music::play_loss=error`.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config = Config::load()?;
    init_logging(args.debug || config.debug);
    debug!("loaded config: {config:?}");

    match args.command {
        Command::Watch(watch_args) => {
            let mut settings = WatchSettings::from_config(&config)?;
            watch_args.apply(&mut settings);
            watch::run_watch(&settings)?;
        }
        Command::Import {
            page_size,
            dry_run,
            db,
        } => {
            let db_path = resolve_db_path(&config, db)?;
            reconcile::run_import(&db_path, page_size, dry_run)?;
        }
        Command::Plays { pending, limit, db } => {
            let db_path = resolve_db_path(&config, db)?;
            db::list_plays(&db_path, limit, pending)?;
        }
        Command::Recent {
            username,
            limit,
            json,
        } => {
            recent::run_recent(username, limit, json)?;
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
    }

    Ok(())
}

fn resolve_db_path(config: &Config, flag: Option<std::path::PathBuf>) -> Result<std::path::PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None if !config.lastfm.log_db_file.is_empty() => Ok(config.lastfm.log_db_file.clone().into()),
        None => config::get_db_path(),
    }
}
