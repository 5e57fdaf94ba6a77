//! # Track Session State Machine
//!
//! Owns the metrics for the track currently being watched and classifies every new
//! [`Sample`] as one of:
//!
//! - **Track change**: a different artist/title/album. The old session closes and a new
//!   one starts.
//! - **Natural playback**: the position moved forward by about as much wall-clock time
//!   as passed (within the drift tolerance). Listened time accumulates and the open
//!   interval extends.
//! - **Session reset**: a jump larger than the reset threshold on the same track
//!   (player restarted, track replayed). The session closes and restarts with the same
//!   identity.
//! - **Seek**: a jump between the seek tolerance and the reset threshold. Counted,
//!   not listened.
//! - **Noise**: anything smaller. Only the last position moves.
//!
//! Closing a session is the only thing that produces a [`ListenSummary`], and only
//! for tracks whose duration qualified them for scoring.
//!
//! ```text
//!            sample (new identity)
//!   Idle ───────────────────────────▶ Tracking ──┐ natural / seek / noise
//!    ▲                                   │  ▲    │
//!    │ finish()                          │  └────┘
//!    └───────────────────────────────────┘  reset / track change: close + restart
//! ```

use chrono::{DateTime, Utc};

use crate::coverage::{self, Coverage, Interval};
use crate::eligibility::ListenMetrics;
use crate::sampler::{Sample, Track};

/// Thresholds for classifying position movement, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Tracks shorter than this are tracked for identity but never scored.
    pub min_track_length: f64,
    /// Allowed disagreement between the player clock and the wall clock for a tick
    /// to count as natural playback.
    pub drift_tolerance: f64,
    /// Jumps up to this size are treated as sampling noise.
    pub seek_tolerance: f64,
    /// Jumps beyond this size restart the listening session.
    pub session_reset_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_track_length: 30.0,
            drift_tolerance: 1.5,
            seek_tolerance: 8.0,
            session_reset_threshold: 90.0,
        }
    }
}

/// How a sample related to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    NewTrack,
    Natural,
    Seek,
    SessionReset,
    Noise,
}

/// Metrics of a closed listening session.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenSummary {
    pub track: Track,
    pub duration: f64,
    pub started_at: DateTime<Utc>,
    pub listened: f64,
    pub wall_seconds: f64,
    pub coverage: Coverage,
    pub seek_count: u32,
}

impl ListenSummary {
    pub fn metrics(&self) -> ListenMetrics {
        ListenMetrics {
            duration: self.duration,
            unique_coverage: self.coverage.unique_seconds,
            listened: self.listened,
            wall_seconds: self.wall_seconds,
        }
    }
}

#[derive(Debug, Clone)]
struct Tracking {
    track: Track,
    /// `None` disqualifies the track from scoring.
    duration: Option<f64>,
    started_at: DateTime<Utc>,
    last_position: f64,
    last_sample_at: DateTime<Utc>,
    listened: f64,
    intervals: Vec<Interval>,
    seek_count: u32,
    /// `(start, end)` of the run of natural ticks in progress.
    open_range: Option<(f64, f64)>,
}

impl Tracking {
    fn start(track: Track, duration: Option<f64>, position: f64, now: DateTime<Utc>) -> Self {
        Self {
            track,
            duration,
            started_at: now,
            last_position: position,
            last_sample_at: now,
            listened: 0.0,
            intervals: Vec::new(),
            seek_count: 0,
            open_range: None,
        }
    }

    fn close_range(&mut self) {
        if let Some((start, end)) = self.open_range.take() {
            let end = match self.duration {
                Some(duration) => end.min(duration),
                None => end,
            };
            self.intervals.extend(Interval::new(start, end));
        }
    }

    /// Finalizes the open range and builds the summary; `None` for disqualified tracks.
    fn summarize(&mut self, now: DateTime<Utc>) -> Option<ListenSummary> {
        self.close_range();
        let duration = self.duration?;
        Some(ListenSummary {
            track: self.track.clone(),
            duration,
            started_at: self.started_at,
            listened: self.listened,
            wall_seconds: seconds_between(self.started_at, now),
            coverage: coverage::calculate(&self.intervals),
            seek_count: self.seek_count,
        })
    }
}

/// The single live session of the watch loop. Not shared, so no locking.
#[derive(Debug, Clone)]
pub struct TrackSession {
    config: SessionConfig,
    state: Option<Tracking>,
}

impl TrackSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.state.is_some()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.state.as_ref().map(|state| &state.track)
    }

    pub fn seek_count(&self) -> u32 {
        self.state.as_ref().map_or(0, |state| state.seek_count)
    }

    pub fn listened(&self) -> f64 {
        self.state.as_ref().map_or(0.0, |state| state.listened)
    }

    /// Applies one sample, returning the classification and the summary of any session
    /// that closed because of it.
    pub fn observe(
        &mut self,
        sample: &Sample,
        now: DateTime<Utc>,
    ) -> (Movement, Option<ListenSummary>) {
        let Some(state) = self.state.as_mut().filter(|state| state.track == sample.track) else {
            let closed = self.finish(now);
            self.state = Some(Tracking::start(
                sample.track.clone(),
                self.qualify(sample.duration),
                sample.position,
                now,
            ));
            return (Movement::NewTrack, closed);
        };

        let config = self.config;
        let delta_position = sample.position - state.last_position;
        let delta_time = seconds_between(state.last_sample_at, now);
        let expected = state.last_position + delta_time;

        if delta_position > 0.0 && (sample.position - expected).abs() < config.drift_tolerance {
            state.listened += delta_time;
            state.open_range = match state.open_range {
                Some((start, _)) => Some((start, sample.position)),
                None => Some((state.last_position, sample.position)),
            };
            state.last_position = sample.position;
            state.last_sample_at = now;
            return (Movement::Natural, None);
        }

        if delta_position.abs() > config.session_reset_threshold {
            let closed = state.summarize(now);
            let duration = state.duration;
            *state = Tracking::start(sample.track.clone(), duration, sample.position, now);
            return (Movement::SessionReset, closed);
        }

        state.close_range();
        state.last_position = sample.position;
        state.last_sample_at = now;
        if delta_position.abs() > config.seek_tolerance {
            state.seek_count += 1;
            (Movement::Seek, None)
        } else {
            (Movement::Noise, None)
        }
    }

    /// Closes the open session, if any, returning to idle.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<ListenSummary> {
        self.state.take().and_then(|mut state| state.summarize(now))
    }

    /// Drops the open session without summarizing it.
    pub fn discard(&mut self) {
        self.state = None;
    }

    fn qualify(&self, duration: Option<f64>) -> Option<f64> {
        duration.filter(|length| *length >= self.config.min_track_length)
    }

    /// Whether the current track was disqualified by its length.
    pub fn is_disqualified(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.duration.is_none())
    }
}

pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
