//! # Watch Loop
//!
//! Polls the player on a fixed interval, feeds every sample through the
//! [`TrackSession`] and, whenever a session closes, decides eligibility, submits
//! eligible plays and records every play in the ledger.
//!
//! ## Scheduling
//!
//! One tick at a time on the calling thread: sample, classify, optionally submit,
//! optionally write. The sleep between ticks is sliced so a shutdown request is seen
//! within a fraction of a second. Once the stop flag is set no further tick starts and
//! [`WatchLoop::flush`] closes the in-flight track on the same thread.
//!
//! ## Failure handling
//!
//! - A sampler failure that means nothing is playing closes the open session with the
//!   last good data. Other sampler failures are logged and retried next tick.
//! - A failed submission is logged; the play is still written, unfulfilled, so
//!   `music import` can pick it up later.
//! - A failed ledger write is logged on the `music::play_loss` target and the loop
//!   carries on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};

use crate::config::WatchSettings;
use crate::credentials::{default_credentials_path, load_credentials};
use crate::db::{NewPlay, PlayLedger};
use crate::eligibility::EligibilityPolicy;
use crate::lock::{default_lock_path, InstanceLock};
use crate::sampler::{ensure_player_tool, PlayerctlSampler, PositionSampler};
use crate::scrobbler::{LastFmClient, Scrobble, Scrobbler};
use crate::session::{ListenSummary, Movement, TrackSession};
use crate::signals::install_shutdown_handler;

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Wall clock plus an interruptible sleep.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    /// Sleeps for `duration` or until `stop` is set, whichever comes first.
    fn sleep(&self, duration: Duration, stop: &AtomicBool);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration, stop: &AtomicBool) {
        (**self).sleep(duration, stop)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration, stop: &AtomicBool) {
        let mut remaining = duration;
        while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

pub struct WatchLoop<S, C, B> {
    sampler: S,
    clock: C,
    scrobbler: B,
    ledger: PlayLedger,
    session: TrackSession,
    policy: EligibilityPolicy,
    interval: Duration,
    source: String,
}

impl<S, C, B> WatchLoop<S, C, B>
where
    S: PositionSampler,
    C: Clock,
    B: Scrobbler,
{
    pub fn new(sampler: S, clock: C, scrobbler: B, ledger: PlayLedger, settings: &WatchSettings) -> Self {
        Self {
            sampler,
            clock,
            scrobbler,
            ledger,
            session: TrackSession::new(settings.session),
            policy: settings.policy,
            interval: settings.interval,
            source: settings.source_label().to_string(),
        }
    }

    pub fn ledger(&self) -> &PlayLedger {
        &self.ledger
    }

    pub fn session(&self) -> &TrackSession {
        &self.session
    }

    /// Ticks until `stop` is set, then flushes the current track.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            if stop.load(Ordering::SeqCst) {
                break;
            }
            self.clock.sleep(self.interval, stop);
        }
        info!("shutting down");
        self.flush();
    }

    pub fn tick(&mut self) {
        let now = self.clock.now();
        let sample = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(err) if err.ends_playback() => {
                debug!("{err}");
                if let Some(track) = self.session.current_track() {
                    info!("playback stopped - {track}");
                }
                if let Some(summary) = self.session.finish(now) {
                    self.record(summary);
                }
                return;
            }
            Err(err) => {
                debug!("{err}");
                return;
            }
        };

        let (movement, closed) = self.session.observe(&sample, now);
        if let Some(summary) = closed {
            self.record(summary);
        }
        match movement {
            Movement::NewTrack => {
                info!("new song detected - {}", sample.track);
                if self.session.is_disqualified() {
                    info!("└── skipping track because it is too short or has no length");
                }
            }
            Movement::SessionReset => info!("replay detected, starting over - {}", sample.track),
            Movement::Seek => debug!(
                "seek to {:.2} ({} seeks)",
                sample.position,
                self.session.seek_count()
            ),
            Movement::Natural => trace!(
                "playing at {:.2}, listened {:.2}",
                sample.position,
                self.session.listened()
            ),
            Movement::Noise => trace!("position noise at {:.2}", sample.position),
        }
    }

    /// Closes the in-flight session as if the track had changed, after taking one last
    /// best-effort sample for the final position.
    pub fn flush(&mut self) {
        if !self.session.is_tracking() {
            return;
        }
        let now = self.clock.now();
        match self.sampler.sample() {
            Ok(sample) if self.session.current_track() == Some(&sample.track) => {
                let (movement, closed) = self.session.observe(&sample, now);
                if let Some(summary) = closed {
                    self.record(summary);
                }
                // The reset already closed the session; the restarted one heard nothing.
                if movement == Movement::SessionReset {
                    self.session.discard();
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => debug!("final sample failed, using last known position: {err}"),
        }
        if let Some(summary) = self.session.finish(now) {
            self.record(summary);
        }
    }

    fn record(&mut self, summary: ListenSummary) {
        let metrics = summary.metrics();
        let verdict = self.policy.evaluate(&metrics);
        info!("finished - {}", summary.track);
        debug!("└── {}", self.policy.describe(&metrics));

        let fulfilled = if verdict.eligible {
            info!("└── scrobbling because {}", verdict.reason);
            self.submit(&summary)
        } else {
            info!("└── not scrobbling because {}", verdict.reason);
            false
        };

        let play = NewPlay::from_summary(&summary, verdict.eligible, fulfilled, &self.source);
        if let Err(err) = self.ledger.insert(&play) {
            error!(
                target: "music::play_loss",
                "play lost: {} started at {}: {err:#}",
                summary.track,
                summary.started_at
            );
        }
    }

    fn submit(&self, summary: &ListenSummary) -> bool {
        let scrobble = Scrobble {
            artist: summary.track.artist.clone(),
            title: summary.track.title.clone(),
            album: Some(summary.track.album.clone()).filter(|album| !album.is_empty()),
            started_at: summary.started_at,
            duration: Some(summary.duration.round() as u32),
        };
        match self.scrobbler.submit(std::slice::from_ref(&scrobble)) {
            Ok(outcome) => {
                for message in &outcome.ignored_messages {
                    warn!("└── last.fm ignored the scrobble: {message}");
                }
                if outcome.accepted >= 1 {
                    info!("└── scrobbled");
                    true
                } else {
                    warn!("└── last.fm accepted nothing ({} ignored), left for import", outcome.ignored);
                    false
                }
            }
            Err(err) => {
                error!("└── failed to scrobble {}: {err}", summary.track);
                false
            }
        }
    }
}

/// `music watch`: start-up checks, then the loop until SIGINT/SIGTERM.
pub fn run_watch(settings: &WatchSettings) -> Result<()> {
    settings.validate()?;
    ensure_player_tool()?;
    let _lock = InstanceLock::acquire(&default_lock_path())?;
    let stop = install_shutdown_handler()?;
    let credentials = load_credentials(&default_credentials_path()?)?;
    let ledger = PlayLedger::open(&settings.db_path)?;
    let client = LastFmClient::new(&credentials)?;
    let sampler = PlayerctlSampler::new(settings.player.clone(), settings.sampler_timeout);

    info!(
        "watching {} every {}s, logging plays to {}",
        settings.player,
        settings.interval.as_secs(),
        settings.db_path.display()
    );
    let mut watch = WatchLoop::new(sampler, SystemClock, client, ledger, settings);
    watch.run(stop);
    Ok(())
}
