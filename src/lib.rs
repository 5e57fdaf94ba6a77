//! Scrobbles what an MPRIS media player plays to last.fm, without losing plays.
//!
//! The player is never asked for help: `music watch` samples its position on a fixed
//! interval and works out from those samples alone whether a track was really listened
//! to. Every closed listening session is written to a local SQLite ledger before
//! anything else, and `music import` later resubmits whatever last.fm never confirmed.
//!
//! ## Core modules
//!
//! - [`sampler`] - Player observations through `playerctl`
//! - [`session`] - Per-track state machine: natural playback, seeks, replays, track changes
//! - [`coverage`] - Unique listened seconds from played ranges
//! - [`eligibility`] - last.fm's half-track / minimum-listen-time rule
//! - [`scrobbler`] - Signed `track.scrobble` requests
//! - [`db`] - The play ledger and its schema migrations
//! - [`watch`] - The polling loop and its graceful shutdown
//! - [`reconcile`] - Operator-confirmed batch resubmission
//! - [`recent`] - The user's latest scrobbles as last.fm sees them
//!
//! ### Supporting Modules
//!
//! - [`config`] - Config file and resolved settings
//! - [`credentials`] - last.fm API key and session lookup
//! - [`lock`] - Single-instance lock file
//! - [`signals`] - SIGINT/SIGTERM flag
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use music::eligibility::EligibilityPolicy;
//! use music::sampler::{Sample, Track};
//! use music::session::{SessionConfig, TrackSession};
//!
//! let start = Utc.with_ymd_and_hms(2024, 11, 24, 15, 45, 0).unwrap();
//! let track = Track {
//!     artist: "Christina Perri".to_string(),
//!     title: "human".to_string(),
//!     album: String::new(),
//! };
//!
//! let mut session = TrackSession::new(SessionConfig::default());
//! for tick in 0..=12 {
//!     let sample = Sample { track: track.clone(), position: tick as f64 * 10.0, duration: Some(200.0) };
//!     session.observe(&sample, start + chrono::Duration::seconds(tick * 10));
//! }
//!
//! let summary = session.finish(start + chrono::Duration::seconds(120)).unwrap();
//! let verdict = EligibilityPolicy::default().evaluate(&summary.metrics());
//! assert!(verdict.eligible);
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return `anyhow::Result` with context. The sampler and the
//! submitter have typed errors ([`sampler::SamplerError`], [`scrobbler::SubmitError`])
//! because the watch loop reacts differently to each kind.

pub mod cli;
pub mod completion;
pub mod config;
pub mod coverage;
pub mod credentials;
pub mod db;
pub mod eligibility;
pub mod lock;
pub mod reconcile;
pub mod recent;
pub mod sampler;
pub mod scrobbler;
pub mod session;
pub mod signals;
pub mod watch;
