//! # Integration Tests for music
//!
//! Drives the watch loop and the reconciler end to end with scripted players, a
//! manual clock and fake last.fm endpoints, against real SQLite ledgers on disk.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use music::config::WatchSettings;
use music::db::{NewPlay, PlayLedger, CURRENT_SCHEMA_VERSION};
use music::reconcile::Reconciler;
use music::sampler::{PositionSampler, Sample, SamplerError, Track};
use music::scrobbler::{Scrobble, Scrobbler, SubmitError, SubmitOutcome};
use music::watch::{Clock, WatchLoop};

/// Advances on every sleep and requests shutdown after `stop_after` sleeps.
struct ManualClock {
    now: Cell<DateTime<Utc>>,
    sleeps: Cell<usize>,
    stop_after: usize,
}

impl ManualClock {
    fn new(stop_after: usize) -> Self {
        Self {
            now: Cell::new(Utc.with_ymd_and_hms(2024, 11, 24, 15, 45, 0).unwrap()),
            sleeps: Cell::new(0),
            stop_after,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration, stop: &AtomicBool) {
        self.now
            .set(self.now.get() + ChronoDuration::from_std(duration).unwrap());
        self.sleeps.set(self.sleeps.get() + 1);
        if self.sleeps.get() >= self.stop_after {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Plays back a fixed list of samples, then reports that no player is running.
struct ScriptedPlayer(VecDeque<Result<Sample, SamplerError>>);

impl PositionSampler for ScriptedPlayer {
    fn sample(&mut self) -> Result<Sample, SamplerError> {
        self.0.pop_front().unwrap_or(Err(SamplerError::NoPlayer))
    }
}

/// Accepts up to `accept` entries of every submission and keeps what it received.
struct FakeLastFm {
    accept: u32,
    received: RefCell<Vec<Vec<Scrobble>>>,
}

impl FakeLastFm {
    fn accepting(accept: u32) -> Self {
        Self {
            accept,
            received: RefCell::new(Vec::new()),
        }
    }
}

impl Scrobbler for FakeLastFm {
    fn submit(&self, scrobbles: &[Scrobble]) -> Result<SubmitOutcome, SubmitError> {
        self.received.borrow_mut().push(scrobbles.to_vec());
        let accepted = self.accept.min(scrobbles.len() as u32);
        Ok(SubmitOutcome {
            accepted,
            ignored: scrobbles.len() as u32 - accepted,
            ignored_messages: Vec::new(),
        })
    }
}

fn human(position: f64) -> Result<Sample, SamplerError> {
    Ok(Sample {
        track: Track {
            artist: "Christina Perri".to_string(),
            title: "human".to_string(),
            album: "head or heart".to_string(),
        },
        position,
        duration: Some(200.0),
    })
}

fn watch_settings(db_path: PathBuf, interval: u64) -> WatchSettings {
    WatchSettings {
        interval: Duration::from_secs(interval),
        db_path,
        source: "integration".to_string(),
        player: "vlc".to_string(),
        sampler_timeout: Duration::from_secs(3),
        session: Default::default(),
        policy: Default::default(),
    }
}

fn temp_ledger() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("plays.db");
    Ok((temp_dir, db_path))
}

#[cfg(test)]
mod watch_tests {
    use super::*;

    #[test]
    fn test_natural_playback_scrobbles_exactly_once() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let settings = watch_settings(db_path.clone(), 12);

        // 10 natural ticks cover 0..120 of a 200s track (60%), then the player closes.
        let mut script: Vec<_> = (0..=10).map(|tick| human(tick as f64 * 12.0)).collect();
        script.push(Err(SamplerError::NoPlayer));

        let clock = ManualClock::new(20);
        let lastfm = FakeLastFm::accepting(50);
        let stop = AtomicBool::new(false);
        let mut watch = WatchLoop::new(
            ScriptedPlayer(script.into()),
            &clock,
            &lastfm,
            PlayLedger::open(&db_path)?,
            &settings,
        );
        watch.run(&stop);

        let received = lastfm.received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].len(), 1);
        assert_eq!(received[0][0].title, "human");
        assert_eq!(received[0][0].album.as_deref(), Some("head or heart"));
        assert_eq!(received[0][0].started_at, Utc.with_ymd_and_hms(2024, 11, 24, 15, 45, 0).unwrap());

        let plays = watch.ledger().list_recent(10, false)?;
        assert_eq!(plays.len(), 1);
        assert!(plays[0].scrobbable);
        assert!(plays[0].fulfilled);
        assert_eq!(plays[0].unique_coverage, 120.0);
        assert_eq!(plays[0].source, "integration");
        Ok(())
    }

    #[test]
    fn test_shutdown_mid_track_writes_one_play() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let settings = watch_settings(db_path.clone(), 10);

        // Still playing when the stop request arrives at 110s (55% covered).
        let script: Vec<_> = (0..=11).map(|tick| human(tick as f64 * 10.0)).collect();
        let clock = ManualClock::new(12);
        let lastfm = FakeLastFm::accepting(50);
        let stop = AtomicBool::new(false);
        let mut watch = WatchLoop::new(
            ScriptedPlayer(script.into()),
            &clock,
            &lastfm,
            PlayLedger::open(&db_path)?,
            &settings,
        );
        watch.run(&stop);
        drop(watch);

        let ledger = PlayLedger::open(&db_path)?;
        let plays = ledger.list_recent(10, false)?;
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].unique_coverage, 110.0);
        assert!(plays[0].scrobbable);
        assert_eq!(lastfm.received.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn test_track_change_and_skip_are_both_recorded() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let settings = watch_settings(db_path.clone(), 10);

        let mut script: Vec<_> = (0..=3).map(|tick| human(tick as f64 * 10.0)).collect();
        script.push(Ok(Sample {
            track: Track {
                artist: "Kendrick Lamar".to_string(),
                title: "Swimming Pools (Drank)".to_string(),
                album: String::new(),
            },
            position: 0.0,
            duration: Some(313.0),
        }));
        let clock = ManualClock::new(6);
        let lastfm = FakeLastFm::accepting(50);
        let stop = AtomicBool::new(false);
        let mut watch = WatchLoop::new(
            ScriptedPlayer(script.into()),
            &clock,
            &lastfm,
            PlayLedger::open(&db_path)?,
            &settings,
        );
        watch.run(&stop);

        // Neither play passed, so nothing was sent, but both are in the ledger.
        assert!(lastfm.received.borrow().is_empty());
        let plays = watch.ledger().list_recent(10, false)?;
        assert_eq!(plays.len(), 2);
        assert!(plays.iter().all(|play| !play.scrobbable));
        assert_eq!(plays[1].title, "human");
        assert_eq!(plays[1].listen_time, 30.0);
        Ok(())
    }
}

#[cfg(test)]
mod reconcile_tests {
    use super::*;

    fn seed(ledger: &PlayLedger, count: usize) -> Result<()> {
        for n in 0..count {
            ledger.insert(&NewPlay {
                scrobbable: true,
                fulfilled: false,
                album: "good kid, m.A.A.d city".to_string(),
                artist: "Kendrick Lamar".to_string(),
                title: format!("track {n}"),
                duration: 313.0,
                listen_time: 250.0,
                wall_time: 251.0,
                max_position: 250.0,
                unique_coverage: 250.0,
                seek_count: 0,
                started_at: Utc.with_ymd_and_hms(2024, 11, 24, 16, 24, 20).unwrap()
                    + ChronoDuration::minutes(n as i64 * 6),
                source: "vlc".to_string(),
            })?;
        }
        Ok(())
    }

    #[test]
    fn test_full_acceptance_marks_page_fulfilled() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let mut ledger = PlayLedger::open(&db_path)?;
        seed(&ledger, 3)?;

        let lastfm = FakeLastFm::accepting(3);
        let report = Reconciler::new(&mut ledger, &lastfm, 50).run(|_| Ok(true))?;

        assert_eq!(report.fulfilled, 3);
        assert_eq!(ledger.count_pending()?, 0);
        let received = lastfm.received.borrow();
        assert_eq!(received[0].len(), 3);
        assert_eq!(received[0][2].title, "track 2");
        Ok(())
    }

    #[test]
    fn test_partial_acceptance_leaves_page_pending() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let mut ledger = PlayLedger::open(&db_path)?;
        seed(&ledger, 3)?;

        let lastfm = FakeLastFm::accepting(2);
        let report = Reconciler::new(&mut ledger, &lastfm, 50).run(|_| Ok(true))?;

        assert_eq!(report.fulfilled, 0);
        assert_eq!(report.mismatched, 3);
        assert_eq!(ledger.count_pending()?, 3);
        // Not retried within the same run.
        assert_eq!(lastfm.received.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn test_only_confirmed_pages_are_sent() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let mut ledger = PlayLedger::open(&db_path)?;
        seed(&ledger, 3)?;

        let lastfm = FakeLastFm::accepting(50);
        let report = Reconciler::new(&mut ledger, &lastfm, 50).run(|_| Ok(false))?;

        assert_eq!(report.declined, 3);
        assert!(lastfm.received.borrow().is_empty());
        assert_eq!(ledger.count_pending()?, 3);
        Ok(())
    }
}

#[cfg(test)]
mod ledger_tests {
    use super::*;

    #[test]
    fn test_upgrades_version_three_ledger() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        {
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.execute_batch(
                "create table schema_migrations (version integer primary key);
                 insert into schema_migrations (version) values (1), (2), (3);
                 create table plays (
                     id integer primary key autoincrement,
                     fulfilled boolean not null,
                     album text,
                     artist text not null,
                     title text not null,
                     time timestamp not null,
                     playedFor integer not null,
                     length integer not null,
                     source text
                 );
                 insert into plays (fulfilled, album, artist, title, time, playedFor, length, source)
                 values (0, 'head or heart', 'Christina Perri', 'human', '2024-11-24 15:45:00', 167, 161, NULL),
                        (1, NULL, 'Kendrick Lamar', 'Swimming Pools (Drank)', '2024-11-24 15:45:40', 246, 248, 'vlc');",
            )?;
        }

        let ledger = PlayLedger::open(&db_path)?;
        let pending = ledger.list_pending()?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "human");
        assert_eq!(pending[0].listen_time, 167.0);
        assert_eq!(pending[0].started_at.timestamp(), 1_732_463_100);
        assert_eq!(pending[0].source, "");
        assert_eq!(ledger.list_recent(10, false)?.len(), 2);

        let conn = rusqlite::Connection::open(&db_path)?;
        let version: i64 = conn.query_row("select max(version) from schema_migrations", [], |row| row.get(0))?;
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn test_rejects_ledger_from_newer_binary() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        drop(PlayLedger::open(&db_path)?);
        {
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.execute(
                "insert into schema_migrations (version) values (?1)",
                [CURRENT_SCHEMA_VERSION + 1],
            )?;
        }
        let err = PlayLedger::open(&db_path).err().expect("newer schema must be rejected");
        assert!(format!("{err:#}").contains("newer than supported"));
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::Parser;
    use music::cli::{Args, Command as Subcommand};

    #[test]
    fn test_watch_flags_override_settings() -> Result<()> {
        let args = Args::try_parse_from([
            "music", "watch", "-i", "5", "--debug", "--player", "mpv", "--min-listen-time", "120",
        ])?;
        assert!(args.debug);
        let Subcommand::Watch(watch_args) = args.command else {
            panic!("expected watch");
        };
        let mut settings = watch_settings(PathBuf::from("plays.db"), 10);
        watch_args.apply(&mut settings);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.player, "mpv");
        assert_eq!(settings.policy.min_listen_time, 120.0);
        assert_eq!(settings.session.min_track_length, 30.0);
        Ok(())
    }

    #[test]
    fn test_import_and_plays_defaults() -> Result<()> {
        let args = Args::try_parse_from(["music", "import", "--dry-run"])?;
        assert!(matches!(
            args.command,
            Subcommand::Import { page_size: 50, dry_run: true, db: None }
        ));

        let args = Args::try_parse_from(["music", "plays", "--pending"])?;
        assert!(matches!(
            args.command,
            Subcommand::Plays { pending: true, limit: 20, db: None }
        ));
        assert!(Args::try_parse_from(["music", "dance"]).is_err());
        Ok(())
    }

    #[test]
    fn test_recent_flags() -> Result<()> {
        let args = Args::try_parse_from(["music", "recent"])?;
        assert!(matches!(
            args.command,
            Subcommand::Recent { username: None, limit: 50, json: false }
        ));

        let args = Args::try_parse_from(["music", "recent", "-u", "kitesi", "-l", "5", "--json"])?;
        let Subcommand::Recent { username, limit, json } = args.command else {
            panic!("expected recent");
        };
        assert_eq!(username.as_deref(), Some("kitesi"));
        assert_eq!(limit, 5);
        assert!(json);
        Ok(())
    }

    #[test]
    fn test_binary_help_and_completion() {
        let output = Command::new(env!("CARGO_BIN_EXE_music"))
            .arg("--help")
            .output()
            .expect("Failed to run help command");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("watch"));
        assert!(stdout.contains("import"));

        let output = Command::new(env!("CARGO_BIN_EXE_music"))
            .args(["completion", "bash"])
            .output()
            .expect("Failed to run completion command");
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("music"));
    }

    #[test]
    fn test_binary_lists_plays() -> Result<()> {
        let (_dir, db_path) = temp_ledger()?;
        let output = Command::new(env!("CARGO_BIN_EXE_music"))
            .args(["plays", "--db"])
            .arg(&db_path)
            .output()?;
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("No plays recorded"));
        Ok(())
    }
}
