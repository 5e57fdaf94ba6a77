//! # Play Ledger
//!
//! Durable record of every play the watch loop closed, scrobbled or not. Rows are
//! appended by `music watch` and only ever mutated by `music import`, which flips
//! `fulfilled` once last.fm confirms them. Nothing deletes rows.
//!
//! ## Storage
//!
//! SQLite through `rusqlite`, one `plays` table. The schema is versioned by
//! [`migrations`]; opening a ledger always migrates it first.

pub mod migrations;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::trace;
use rusqlite::{params, Connection, Row};

use crate::scrobbler::{Scrobble, MAX_SCROBBLES_PER_REQUEST};
use crate::session::ListenSummary;

pub use migrations::{run_migrations, CURRENT_SCHEMA_VERSION};

/// A play about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlay {
    pub scrobbable: bool,
    pub fulfilled: bool,
    pub album: String,
    pub artist: String,
    pub title: String,
    pub duration: f64,
    pub listen_time: f64,
    pub wall_time: f64,
    pub max_position: f64,
    pub unique_coverage: f64,
    pub seek_count: u32,
    pub started_at: DateTime<Utc>,
    pub source: String,
}

impl NewPlay {
    pub fn from_summary(summary: &ListenSummary, scrobbable: bool, fulfilled: bool, source: &str) -> Self {
        Self {
            scrobbable,
            fulfilled,
            album: summary.track.album.clone(),
            artist: summary.track.artist.clone(),
            title: summary.track.title.clone(),
            duration: summary.duration,
            listen_time: summary.listened,
            wall_time: summary.wall_seconds,
            max_position: summary.coverage.max_position,
            unique_coverage: summary.coverage.unique_seconds,
            seek_count: summary.seek_count,
            started_at: summary.started_at,
            source: source.to_string(),
        }
    }
}

/// A stored play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRecord {
    pub id: i64,
    pub scrobbable: bool,
    pub fulfilled: bool,
    pub album: String,
    pub artist: String,
    pub title: String,
    pub duration: f64,
    pub listen_time: f64,
    pub wall_time: f64,
    pub max_position: f64,
    pub unique_coverage: f64,
    pub seek_count: u32,
    pub started_at: DateTime<Utc>,
    pub source: String,
}

impl PlayRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let started_at: i64 = row.get("started_at")?;
        Ok(Self {
            id: row.get("id")?,
            scrobbable: row.get("scrobbable")?,
            fulfilled: row.get("fulfilled")?,
            album: row.get::<_, Option<String>>("album")?.unwrap_or_default(),
            artist: row.get("artist")?,
            title: row.get("title")?,
            duration: row.get("duration")?,
            listen_time: row.get("listen_time")?,
            wall_time: row.get("wall_time")?,
            max_position: row.get("max_position")?,
            unique_coverage: row.get("unique_coverage")?,
            seek_count: row.get("seek_count")?,
            started_at: DateTime::from_timestamp(started_at, 0).unwrap_or_default(),
            source: row.get::<_, Option<String>>("source")?.unwrap_or_default(),
        })
    }

    pub fn to_scrobble(&self) -> Scrobble {
        Scrobble {
            artist: self.artist.clone(),
            title: self.title.clone(),
            album: Some(self.album.clone()).filter(|album| !album.is_empty()),
            started_at: self.started_at,
            duration: Some(self.duration.round() as u32).filter(|duration| *duration > 0),
        }
    }
}

const SELECT_PLAYS: &str = "select id, scrobbable, fulfilled, album, artist, title, duration, \
     listen_time, wall_time, max_position, unique_coverage, seek_count, started_at, source from plays";

pub struct PlayLedger {
    conn: Connection,
}

impl PlayLedger {
    /// Opens (creating if needed) the ledger at `path` and migrates it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open play ledger at {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory ledger")?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn).context("Failed to migrate play ledger")?;
        Ok(Self { conn })
    }

    pub fn insert(&self, play: &NewPlay) -> Result<i64> {
        self.conn
            .execute(
                "insert into plays (scrobbable, fulfilled, album, artist, title, duration,
                     listen_time, wall_time, max_position, unique_coverage, seek_count,
                     started_at, source)
                 values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    play.scrobbable,
                    play.fulfilled,
                    play.album,
                    play.artist,
                    play.title,
                    play.duration,
                    play.listen_time,
                    play.wall_time,
                    play.max_position,
                    play.unique_coverage,
                    play.seek_count,
                    play.started_at.timestamp(),
                    play.source,
                ],
            )
            .with_context(|| format!("Failed to insert play {} - {}", play.artist, play.title))?;
        let id = self.conn.last_insert_rowid();
        trace!("inserted play {id}");
        Ok(id)
    }

    /// First page of scrobbable, unfulfilled plays, oldest first.
    pub fn list_pending(&self) -> Result<Vec<PlayRecord>> {
        self.list_pending_after(None, MAX_SCROBBLES_PER_REQUEST)
    }

    /// Pending plays with `id > after`, oldest first, at most `limit` of them.
    pub fn list_pending_after(&self, after: Option<i64>, limit: usize) -> Result<Vec<PlayRecord>> {
        let sql = format!(
            "{SELECT_PLAYS} where scrobbable = 1 and fulfilled = 0 and id > ?1 order by id limit ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![after.unwrap_or(0), limit as i64], PlayRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read pending plays")?;
        Ok(records)
    }

    pub fn count_pending(&self) -> Result<i64> {
        self.conn
            .query_row(
                "select count(*) from plays where scrobbable = 1 and fulfilled = 0",
                [],
                |row| row.get(0),
            )
            .context("Failed to count pending plays")
    }

    /// Newest plays first, for the audit listing.
    pub fn list_recent(&self, limit: usize, pending_only: bool) -> Result<Vec<PlayRecord>> {
        let filter = if pending_only {
            " where scrobbable = 1 and fulfilled = 0"
        } else {
            ""
        };
        let sql = format!("{SELECT_PLAYS}{filter} order by id desc limit ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([limit as i64], PlayRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read plays")?;
        Ok(records)
    }

    /// Marks every id fulfilled in a single transaction.
    pub fn mark_fulfilled(&mut self, ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("update plays set fulfilled = 1 where id = ?1")?;
            for id in ids {
                stmt.execute([id])
                    .with_context(|| format!("Failed to mark play {id} fulfilled"))?;
            }
        }
        tx.commit().context("Commiting fulfilled plays failed")?;
        Ok(())
    }
}

/// `music plays`: prints the newest plays with their scrobble state.
pub fn list_plays(path: &Path, limit: usize, pending_only: bool) -> Result<()> {
    let ledger = PlayLedger::open(path)?;
    let plays = ledger.list_recent(limit, pending_only)?;
    if plays.is_empty() {
        println!("No plays recorded in {}", path.display());
        return Ok(());
    }

    println!(
        "{:<6} {:<19} {:<9} {:>8} {:>8} {:>6}  Track",
        "ID", "Started", "State", "Unique", "Length", "Seeks"
    );
    for play in plays {
        let state = match (play.scrobbable, play.fulfilled) {
            (false, _) => "skipped",
            (true, true) => "scrobbled",
            (true, false) => "pending",
        };
        println!(
            "{:<6} {:<19} {:<9} {:>8.1} {:>8.1} {:>6}  {} - {}",
            play.id,
            play.started_at.format("%Y-%m-%d %H:%M:%S"),
            state,
            play.unique_coverage,
            play.duration,
            play.seek_count,
            play.artist,
            play.title
        );
    }
    Ok(())
}
