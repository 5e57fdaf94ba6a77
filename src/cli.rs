//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `music` binary.
//!
//! ## Commands
//!
//! - `watch`: Track what the player is playing and scrobble it to last.fm
//! - `import`: Resubmit plays the ledger still has pending
//! - `plays`: Show the play ledger
//! - `recent`: Show the latest scrobbles on last.fm
//! - `completion`: Print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! music watch -i 5 --debug
//! music import --dry-run
//! music plays --pending --limit 50
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::WatchSettings;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser, Debug)]
#[command(name = "music")]
#[command(about = "Scrobble what your media player plays to last.fm, without losing a play")]
#[command(version)]
pub struct Args {
    /// Enable debug logging (same as "debug": true in the config file)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the player and scrobble tracks to last.fm
    ///
    /// Polls the player through playerctl on a fixed interval. A play is scrobbled once
    /// more than half of the track was heard uniquely or the minimum listen time
    /// passed. Every play is written to the local ledger first, so nothing is lost
    /// when last.fm cannot be reached. Stop with Ctrl-C; the current track is flushed.
    Watch(WatchArgs),

    /// Resubmit pending plays from the ledger
    ///
    /// Pending plays are sent in batches. Each batch is listed and must be confirmed
    /// before it is sent; it is marked done only if last.fm accepted all of it.
    Import {
        /// Plays per batch (1 to 50)
        #[arg(long, default_value_t = 50)]
        page_size: usize,

        /// List what would be sent without sending anything
        #[arg(long)]
        dry_run: bool,

        /// Ledger database to read instead of the configured one
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        db: Option<PathBuf>,
    },

    /// Show recorded plays, newest first
    Plays {
        /// Only plays that still need to be scrobbled
        #[arg(long)]
        pending: bool,

        /// Number of plays to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Ledger database to read instead of the configured one
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        db: Option<PathBuf>,
    },

    /// Show the latest scrobbles recorded on last.fm
    Recent {
        /// last.fm user to look up (defaults to username= in the credentials file)
        #[arg(short, long)]
        username: Option<String>,

        /// Number of tracks to get
        #[arg(short, long, default_value_t = 50)]
        limit: u32,

        /// Print the raw JSON response
        #[arg(short, long)]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: music completion bash > ~/.local/share/bash-completion/completions/music
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Flags of `music watch`; each overrides the config file.
#[derive(clap::Args, Debug, Default, Clone, PartialEq)]
pub struct WatchArgs {
    /// Seconds between player samples
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Ledger database to write to
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Label stored with every play (defaults to the player name)
    #[arg(long)]
    pub source: Option<String>,

    /// MPRIS player name passed to playerctl -p
    #[arg(long)]
    pub player: Option<String>,

    /// Tracks shorter than this many seconds are never scrobbled
    #[arg(long)]
    pub min_track_length: Option<f64>,

    /// Seconds of listening after which a track always counts
    #[arg(long)]
    pub min_listen_time: Option<f64>,
}

impl WatchArgs {
    pub fn apply(&self, settings: &mut WatchSettings) {
        if let Some(interval) = self.interval {
            settings.interval = std::time::Duration::from_secs(interval);
        }
        if let Some(db) = &self.db {
            settings.db_path = db.clone();
        }
        if let Some(source) = &self.source {
            settings.source = source.clone();
        }
        if let Some(player) = &self.player {
            settings.player = player.clone();
        }
        if let Some(min_track_length) = self.min_track_length {
            settings.session.min_track_length = min_track_length;
        }
        if let Some(min_listen_time) = self.min_listen_time {
            settings.policy.min_listen_time = min_listen_time;
        }
    }
}
