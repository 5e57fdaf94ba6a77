//! # Position Sampler
//!
//! Queries the external player once per tick for "what is playing right now".
//!
//! The production implementation shells out to `playerctl`, the same way the rest of
//! the tool drives external binaries: one `playerctl -p <player> position` call for the
//! position and one `playerctl -p <player> metadata` call for the line-oriented
//! key/value blob, e.g.
//!
//! ```text
//! vlc xesam:artist     Christina Perri
//! vlc xesam:title      human
//! vlc xesam:album      head or heart
//! vlc mpris:length     250000000
//! vlc vlc:time         250
//! ```
//!
//! Every command is bounded by a timeout; a hung `playerctl` is killed and reported as
//! [`SamplerError::Timeout`].

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::trace;
use thiserror::Error;

/// Identity of a track as reported by the player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Track {
    pub artist: String,
    pub title: String,
    /// Empty when the player does not report one.
    pub album: String,
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// One observation of the player.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub track: Track,
    pub position: f64,
    /// `None` when the player reported a length that could not be parsed.
    pub duration: Option<f64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplerError {
    #[error("playerctl - no player could handle this command")]
    NoPlayer,
    #[error("playerctl - could not get metadata ({0})")]
    NoMetadata(String),
    #[error("playerctl - could not parse position ({0:?})")]
    UnparsablePosition(String),
    #[error("playerctl - timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} is not installed, this program only works on linux")]
    ToolMissing(String),
}

impl SamplerError {
    /// Whether this failure means nothing is playing, which closes an open session.
    pub fn ends_playback(&self) -> bool {
        matches!(self, SamplerError::NoPlayer | SamplerError::NoMetadata(_))
    }
}

/// Source of player observations.
pub trait PositionSampler {
    fn sample(&mut self) -> Result<Sample, SamplerError>;
}

const PLAYERCTL: &str = "playerctl";

/// Samples a single MPRIS player through `playerctl`.
#[derive(Debug, Clone)]
pub struct PlayerctlSampler {
    player: String,
    timeout: Duration,
}

impl PlayerctlSampler {
    pub fn new(player: impl Into<String>, timeout: Duration) -> Self {
        Self {
            player: player.into(),
            timeout,
        }
    }

    fn query(&self, what: &str) -> Result<String, SamplerError> {
        let output = run_bounded(PLAYERCTL, &["-p", &self.player, what], self.timeout)?;
        match output {
            Some(stdout) if !stdout.contains("No player could handle this command") => Ok(stdout),
            _ => Err(SamplerError::NoPlayer),
        }
    }
}

impl PositionSampler for PlayerctlSampler {
    fn sample(&mut self) -> Result<Sample, SamplerError> {
        let position = parse_position(&self.query("position")?)?;
        let metadata = self.query("metadata").map_err(|err| match err {
            SamplerError::NoPlayer => SamplerError::NoMetadata("no output".to_string()),
            other => other,
        })?;
        let (track, duration) = parse_metadata(&metadata)?;
        trace!("sampled {track} at {position:.2}/{duration:?}");
        Ok(Sample {
            track,
            position,
            duration,
        })
    }
}

/// Fails with [`SamplerError::ToolMissing`] when `playerctl` cannot be executed at all.
pub fn ensure_player_tool() -> Result<(), SamplerError> {
    match Command::new(PLAYERCTL)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(SamplerError::ToolMissing(PLAYERCTL.to_string()))
        }
        _ => Ok(()),
    }
}

pub fn parse_position(raw: &str) -> Result<f64, SamplerError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(position) if position.is_finite() && position >= 0.0 => Ok(position),
        _ => Err(SamplerError::UnparsablePosition(trimmed.to_string())),
    }
}

/// Parses `playerctl metadata` output into a track identity and duration in seconds.
///
/// Artist, title and some length field are required. The length comes from
/// `mpris:length` (microseconds) when present, else `vlc:time` (seconds); a present
/// but unparsable length yields `None` rather than an error.
pub fn parse_metadata(raw: &str) -> Result<(Track, Option<f64>), SamplerError> {
    let mut fields: HashMap<&str, String> = HashMap::new();
    for line in raw.lines() {
        // "<player> <key> <value...>"
        let mut sections = line.split_whitespace();
        let (Some(_player), Some(key)) = (sections.next(), sections.next()) else {
            continue;
        };
        let value = sections.collect::<Vec<_>>().join(" ");
        if !value.is_empty() {
            fields.insert(key, value);
        }
    }

    let artist = fields.remove("xesam:artist");
    let title = fields.remove("xesam:title");
    let length = fields
        .get("mpris:length")
        .map(|raw| (raw.clone(), 1_000_000.0))
        .or_else(|| fields.get("vlc:time").map(|raw| (raw.clone(), 1.0)));

    let (Some(artist), Some(title), Some((length, scale))) = (artist, title, length) else {
        return Err(SamplerError::NoMetadata(
            "could get metadata but not the necessary fields".to_string(),
        ));
    };

    let duration = length
        .trim()
        .parse::<f64>()
        .ok()
        .map(|value| value / scale)
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0);

    let track = Track {
        artist,
        title,
        album: fields.remove("xesam:album").unwrap_or_default(),
    };
    Ok((track, duration))
}

/// Runs a command and returns its stdout, or `None` when it exited unsuccessfully.
/// The child is killed once `timeout` elapses.
///
/// Stdout is drained on its own thread while the child runs; otherwise a child that
/// writes more than the pipe buffer (a `data:` artUrl, embedded lyrics) blocks forever.
fn run_bounded(program: &str, args: &[&str], timeout: Duration) -> Result<Option<String>, SamplerError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => SamplerError::ToolMissing(program.to_string()),
            _ => SamplerError::NoPlayer,
        })?;

    let pipe = child.stdout.take();
    let reader = thread::spawn(move || -> std::io::Result<String> {
        let mut stdout = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut stdout)?;
        }
        Ok(stdout)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SamplerError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(Duration::from_millis(10)),
            Err(_) => return Err(SamplerError::NoPlayer),
        }
    };

    let stdout = match reader.join() {
        Ok(Ok(stdout)) => stdout,
        _ => return Err(SamplerError::NoPlayer),
    };
    if !status.success() {
        return Ok(None);
    }
    Ok(Some(stdout))
}
