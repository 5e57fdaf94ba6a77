//! # Configuration Module
//!
//! Loads the optional JSON config file and resolves the settings the watch loop and
//! importer run with.
//!
//! ## Locations
//!
//! - Config: `<config_dir>/music/config.json` (`~/.config/music/config.json` on Linux).
//!   A missing file means defaults.
//! - Ledger: `<data_dir>/music/plays.db` unless `lastfm.log_db_file` or `--db` says
//!   otherwise.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "debug": false,
//!   "lastfm": {
//!     "interval": 10,
//!     "min_track_length": 30,
//!     "min_listen_time": 240,
//!     "log_db_file": "",
//!     "source": "",
//!     "player": "vlc",
//!     "drift_tolerance": 1.5,
//!     "seek_tolerance": 8,
//!     "session_reset_threshold": 90,
//!     "real_time_error_margin": 10,
//!     "sampler_timeout": 3
//!   }
//! }
//! ```
//!
//! Every key is optional. Command-line flags are applied on top of the resolved
//! [`WatchSettings`].

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::eligibility::EligibilityPolicy;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub lastfm: LastFmConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    /// Seconds between samples.
    pub interval: u64,
    pub min_track_length: f64,
    pub min_listen_time: f64,
    /// Ledger location; empty means the default.
    pub log_db_file: String,
    /// Recorded with every play; empty means the player name.
    pub source: String,
    pub player: String,
    pub drift_tolerance: f64,
    pub seek_tolerance: f64,
    pub session_reset_threshold: f64,
    pub real_time_error_margin: f64,
    /// Seconds a single `playerctl` call may take.
    pub sampler_timeout: u64,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        let policy = EligibilityPolicy::default();
        Self {
            interval: 10,
            min_track_length: session.min_track_length,
            min_listen_time: policy.min_listen_time,
            log_db_file: String::new(),
            source: String::new(),
            player: "vlc".to_string(),
            drift_tolerance: session.drift_tolerance,
            seek_tolerance: session.seek_tolerance,
            session_reset_threshold: session.session_reset_threshold,
            real_time_error_margin: policy.real_time_error_margin,
            sampler_timeout: 3,
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        anyhow!("Could not determine system config directory. Please ensure your platform supports standard config directories.")
    })?;
    Ok(config_dir.join("music").join("config.json"))
}

/// Default ledger location, creating the `music` data directory if needed.
pub fn get_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow!("Could not determine system data directory. Please ensure your platform supports standard data directories.")
    })?;
    let music_dir = data_dir.join("music");
    fs::create_dir_all(&music_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            music_dir.display()
        )
    })?;
    Ok(music_dir.join("plays.db"))
}

impl Config {
    /// Reads the config at the standard location.
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("could not open config path ({})", path.display()))
            }
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("could not parse config file ({})", path.display()))
    }
}

/// Everything `music watch` runs with, after config and flags are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    pub interval: Duration,
    pub db_path: PathBuf,
    pub source: String,
    pub player: String,
    pub sampler_timeout: Duration,
    pub session: SessionConfig,
    pub policy: EligibilityPolicy,
}

impl WatchSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let lastfm = &config.lastfm;
        let db_path = if lastfm.log_db_file.is_empty() {
            get_db_path()?
        } else {
            PathBuf::from(&lastfm.log_db_file)
        };
        let settings = Self {
            interval: Duration::from_secs(lastfm.interval),
            db_path,
            source: lastfm.source.clone(),
            player: lastfm.player.clone(),
            sampler_timeout: Duration::from_secs(lastfm.sampler_timeout),
            session: SessionConfig {
                min_track_length: lastfm.min_track_length,
                drift_tolerance: lastfm.drift_tolerance,
                seek_tolerance: lastfm.seek_tolerance,
                session_reset_threshold: lastfm.session_reset_threshold,
            },
            policy: EligibilityPolicy::new(lastfm.min_listen_time, lastfm.real_time_error_margin),
        };
        Ok(settings)
    }

    /// Source recorded with each play.
    pub fn source_label(&self) -> &str {
        if self.source.is_empty() {
            &self.player
        } else {
            &self.source
        }
    }

    /// Rejects values that would make the loop spin or never classify anything.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("interval must be at least one second");
        }
        if self.sampler_timeout.is_zero() {
            bail!("sampler_timeout must be at least one second");
        }
        if self.player.trim().is_empty() {
            bail!("player must not be empty");
        }
        let session = &self.session;
        if session.seek_tolerance > session.session_reset_threshold {
            bail!(
                "seek_tolerance ({}) must not exceed session_reset_threshold ({})",
                session.seek_tolerance,
                session.session_reset_threshold
            );
        }
        if session.drift_tolerance <= 0.0 {
            bail!("drift_tolerance must be positive");
        }
        Ok(())
    }
}
