//! # Recent Scrobbles
//!
//! `music recent` lists what last.fm has recorded for a user, newest first, through
//! `user.getRecentTracks`. Handy for checking that `watch` and `import` actually landed.
//!
//! ```bash
//! music recent -l 10
//! music recent -u someone --json
//! ```

use std::fmt;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::credentials::{default_credentials_path, load_credentials};
use crate::scrobbler::{api_error, deserialize_u32_string_or_number, sign_params, LastFmClient, SubmitError};

/// One entry of a user's listening history.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentTrack {
    pub artist: String,
    pub title: String,
    pub album: String,
    /// `None` for the track that is playing right now.
    pub played_at: Option<DateTime<Utc>>,
}

impl fmt::Display for RecentTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.played_at {
            Some(played_at) => write!(
                f,
                "{} - {} - {}",
                self.artist,
                self.title,
                played_at.format("%d %b %Y, %H:%M")
            ),
            None => write!(f, "{} - {} - now playing", self.artist, self.title),
        }
    }
}

/// Request parameters for `user.getRecentTracks`, signed, with `format=json` appended.
pub fn build_recent_params(user: &str, api_key: &str, api_secret: &str, limit: u32) -> Vec<(String, String)> {
    let mut params = vec![
        ("method".to_string(), "user.getRecentTracks".to_string()),
        ("user".to_string(), user.to_string()),
        ("api_key".to_string(), api_key.to_string()),
        ("limit".to_string(), limit.to_string()),
    ];
    let api_sig = sign_params(&params, api_secret);
    params.push(("api_sig".to_string(), api_sig));
    params.push(("format".to_string(), "json".to_string()));
    params
}

pub fn parse_recent_tracks(payload: &str) -> Result<Vec<RecentTrack>, SubmitError> {
    if let Some(err) = api_error(payload) {
        return Err(err);
    }
    let parsed: RecentTracksResponse =
        serde_json::from_str(payload).map_err(|err| SubmitError::Malformed(err.to_string()))?;
    let entries = match parsed.recenttracks.track {
        Some(TrackEntries::One(entry)) => vec![entry],
        Some(TrackEntries::Many(entries)) => entries,
        None => Vec::new(),
    };
    Ok(entries
        .into_iter()
        .map(|entry| {
            let now_playing = entry
                .attr
                .is_some_and(|attr| attr.nowplaying.eq_ignore_ascii_case("true"));
            RecentTrack {
                artist: entry.artist.text,
                title: entry.name,
                album: entry.album.map(|album| album.text).unwrap_or_default(),
                played_at: entry
                    .date
                    .filter(|_| !now_playing)
                    .and_then(|date| DateTime::from_timestamp(i64::from(date.uts), 0)),
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: Option<TrackEntries>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrackEntries {
    One(TrackEntry),
    Many(Vec<TrackEntry>),
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    artist: TextField,
    name: String,
    #[serde(default)]
    album: Option<TextField>,
    #[serde(default)]
    date: Option<PlayedDate>,
    #[serde(rename = "@attr")]
    #[serde(default)]
    attr: Option<TrackAttr>,
}

#[derive(Debug, Deserialize)]
struct TextField {
    #[serde(rename = "#text")]
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PlayedDate {
    #[serde(deserialize_with = "deserialize_u32_string_or_number")]
    uts: u32,
}

#[derive(Debug, Deserialize)]
struct TrackAttr {
    #[serde(default)]
    nowplaying: String,
}

/// `music recent`: prints the latest scrobbles of `username`, or of the credentials'
/// user when none is given. `json` prints the raw response instead.
pub fn run_recent(username: Option<String>, limit: u32, json: bool) -> Result<()> {
    let path = default_credentials_path()?;
    let credentials = load_credentials(&path)?;
    let user = username
        .or_else(|| credentials.username.clone())
        .ok_or_else(|| {
            anyhow!(
                "no last.fm username - pass --username or add username=... to {}",
                path.display()
            )
        })?;

    let client = LastFmClient::new(&credentials)?;
    let body = client
        .recent_tracks(&user, limit)
        .with_context(|| format!("Failed fetching recent tracks of {user}"))?;
    if json {
        println!("{body}");
        return Ok(());
    }
    for track in parse_recent_tracks(&body)? {
        println!("{track}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_params_are_signed() {
        let params = build_recent_params("kitesi", "key", "secret", 20);
        let unsigned: Vec<_> = params
            .iter()
            .filter(|(key, _)| key != "api_sig")
            .cloned()
            .collect();
        let api_sig = params.iter().find(|(key, _)| key == "api_sig").map(|(_, v)| v.clone());
        assert_eq!(api_sig, Some(sign_params(&unsigned, "secret")));
        assert!(params.contains(&("limit".to_string(), "20".to_string())));
        assert!(params.contains(&("user".to_string(), "kitesi".to_string())));
    }

    #[test]
    fn test_parse_recent_with_now_playing() {
        let payload = r##"{"recenttracks":{"track":[
            {"artist":{"mbid":"","#text":"Kendrick Lamar"},"name":"m.A.A.d city",
             "album":{"#text":"good kid, m.A.A.d city"},"@attr":{"nowplaying":"true"}},
            {"artist":{"#text":"Christina Perri"},"name":"human","album":{"#text":""},
             "date":{"uts":"1732463100","#text":"24 Nov 2024, 15:45"}}],
            "@attr":{"user":"kitesi","total":"2"}}}"##;
        let tracks = parse_recent_tracks(payload).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].played_at, None);
        assert_eq!(tracks[0].to_string(), "Kendrick Lamar - m.A.A.d city - now playing");
        assert_eq!(tracks[1].played_at.map(|at| at.timestamp()), Some(1_732_463_100));
        assert_eq!(tracks[1].to_string(), "Christina Perri - human - 24 Nov 2024, 15:45");
    }

    #[test]
    fn test_parse_recent_single_and_empty() {
        let single = r##"{"recenttracks":{"track":{"artist":{"#text":"A"},"name":"T","date":{"uts":1}}}}"##;
        let tracks = parse_recent_tracks(single).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].album, "");

        let empty = r#"{"recenttracks":{"track":[],"@attr":{"total":"0"}}}"#;
        assert!(parse_recent_tracks(empty).unwrap().is_empty());
    }

    #[test]
    fn test_parse_recent_api_error() {
        let payload = r#"{"error":6,"message":"User not found"}"#;
        assert!(matches!(
            parse_recent_tracks(payload),
            Err(SubmitError::Api { code: 6, .. })
        ));
    }
}
