//! # Scrobble Submission
//!
//! Builds signed `track.scrobble` requests for last.fm and interprets the response.
//! One call submits one play or a batch of up to [`MAX_SCROBBLES_PER_REQUEST`]. The
//! submitter never retries; the caller decides what a failure means.
//!
//! The same client also serves the read-only `user.getRecentTracks` call behind
//! `music recent` (see [`crate::recent`]).

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::credentials::Credentials;
use crate::recent::build_recent_params;

pub const API_END_POINT: &str = "https://ws.audioscrobbler.com/2.0/";
/// Upper bound last.fm accepts in a single batched `track.scrobble`.
pub const MAX_SCROBBLES_PER_REQUEST: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One play to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct Scrobble {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub accepted: u32,
    pub ignored: u32,
    pub ignored_messages: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed sending request to last.fm: {0}")]
    Transport(String),
    #[error("last.fm request failed with HTTP {0}")]
    Status(u16),
    #[error("last.fm api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed last.fm response: {0}")]
    Malformed(String),
}

/// Remote service that records plays.
pub trait Scrobbler {
    fn submit(&self, scrobbles: &[Scrobble]) -> Result<SubmitOutcome, SubmitError>;
}

impl<T: Scrobbler + ?Sized> Scrobbler for &T {
    fn submit(&self, scrobbles: &[Scrobble]) -> Result<SubmitOutcome, SubmitError> {
        (**self).submit(scrobbles)
    }
}

pub struct LastFmClient {
    api_key: String,
    api_secret: String,
    session_key: String,
    endpoint: String,
    http: Client,
}

impl LastFmClient {
    pub fn new(credentials: &Credentials) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| anyhow::anyhow!("Failed building HTTP client: {err}"))?;
        Ok(Self {
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            session_key: credentials.session_key.clone(),
            endpoint: API_END_POINT.to_string(),
            http,
        })
    }

    /// Points the client somewhere other than the public API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Raw JSON of `user.getRecentTracks` for `user`, newest first.
    pub fn recent_tracks(&self, user: &str, limit: u32) -> Result<String, SubmitError> {
        let params = build_recent_params(user, &self.api_key, &self.api_secret, limit);
        self.post(&params)
    }

    /// Posts a signed form and returns the body of a successful response.
    fn post(&self, params: &[(String, String)]) -> Result<String, SubmitError> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(params)
            .send()
            .map_err(|err| SubmitError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| SubmitError::Transport(err.to_string()))?;
        debug!("last.fm response ({status}): {text}");
        if status.as_u16() >= 300 {
            // last.fm reports API errors with 4xx codes and a JSON body.
            return match api_error(&text) {
                Some(err) => Err(err),
                None => Err(SubmitError::Status(status.as_u16())),
            };
        }
        Ok(text)
    }
}

impl Scrobbler for LastFmClient {
    fn submit(&self, scrobbles: &[Scrobble]) -> Result<SubmitOutcome, SubmitError> {
        let params = build_scrobble_params(
            scrobbles,
            &self.api_key,
            &self.session_key,
            &self.api_secret,
        );
        let text = self.post(&params)?;
        parse_submit_response(&text)
    }
}

/// Request parameters for `track.scrobble`, signed, with `format=json` appended.
pub fn build_scrobble_params(
    scrobbles: &[Scrobble],
    api_key: &str,
    session_key: &str,
    api_secret: &str,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("method".to_string(), "track.scrobble".to_string()),
        ("api_key".to_string(), api_key.to_string()),
        ("sk".to_string(), session_key.to_string()),
    ];
    let batched = scrobbles.len() > 1;
    for (index, scrobble) in scrobbles.iter().enumerate() {
        let key = |name: &str| {
            if batched {
                format!("{name}[{index}]")
            } else {
                name.to_string()
            }
        };
        params.push((key("artist"), scrobble.artist.clone()));
        params.push((key("track"), scrobble.title.clone()));
        params.push((key("timestamp"), scrobble.started_at.timestamp().to_string()));
        if let Some(album) = scrobble.album.as_ref().filter(|album| !album.is_empty()) {
            params.push((key("album"), album.clone()));
        }
        if let Some(duration) = scrobble.duration.filter(|duration| *duration > 0) {
            params.push((key("duration"), duration.to_string()));
        }
    }
    let api_sig = sign_params(&params, api_secret);
    params.push(("api_sig".to_string(), api_sig));
    params.push(("format".to_string(), "json".to_string()));
    params
}

/// last.fm signature: every `key` + `value` sorted by key, then the secret, md5 hex.
/// `format` and `callback` are never part of the signature.
pub fn sign_params(params: &[(String, String)], secret: &str) -> String {
    let mut sorted: Vec<_> = params
        .iter()
        .filter(|(key, _)| key != "format" && key != "callback")
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut signature = String::new();
    for (key, value) in sorted {
        signature.push_str(key);
        signature.push_str(value);
    }
    signature.push_str(secret);
    format!("{:x}", md5::compute(signature))
}

pub(crate) fn api_error(payload: &str) -> Option<SubmitError> {
    let json: Value = serde_json::from_str(payload).ok()?;
    let code = json.get("error")?;
    let message = json
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("API error")
        .to_string();
    Some(SubmitError::Api {
        code: code.as_i64().unwrap_or(-1),
        message,
    })
}

pub fn parse_submit_response(payload: &str) -> Result<SubmitOutcome, SubmitError> {
    if let Some(err) = api_error(payload) {
        return Err(err);
    }
    let parsed: ScrobbleResponse =
        serde_json::from_str(payload).map_err(|err| SubmitError::Malformed(err.to_string()))?;
    let attr = parsed.scrobbles.attr;
    let ignored_messages = parsed
        .scrobbles
        .scrobble
        .map(ScrobbleEntries::into_vec)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| entry.ignored_message)
        .filter_map(IgnoredMessageField::into_text)
        .collect();
    Ok(SubmitOutcome {
        accepted: attr.accepted,
        ignored: attr.ignored,
        ignored_messages,
    })
}

#[derive(Debug, Deserialize)]
struct ScrobbleResponse {
    scrobbles: Scrobbles,
}

#[derive(Debug, Deserialize)]
struct Scrobbles {
    #[serde(rename = "@attr")]
    attr: ScrobbleAttr,
    #[serde(default)]
    scrobble: Option<ScrobbleEntries>,
}

#[derive(Debug, Deserialize)]
struct ScrobbleAttr {
    #[serde(deserialize_with = "deserialize_u32_string_or_number")]
    accepted: u32,
    #[serde(deserialize_with = "deserialize_u32_string_or_number")]
    ignored: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScrobbleEntries {
    One(ScrobbleEntry),
    Many(Vec<ScrobbleEntry>),
}

impl ScrobbleEntries {
    fn into_vec(self) -> Vec<ScrobbleEntry> {
        match self {
            ScrobbleEntries::One(entry) => vec![entry],
            ScrobbleEntries::Many(entries) => entries,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrobbleEntry {
    #[serde(rename = "ignoredMessage")]
    #[serde(default)]
    ignored_message: Option<IgnoredMessageField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IgnoredMessageField {
    Object(IgnoredMessage),
    Text(String),
    Number(u32),
}

impl IgnoredMessageField {
    /// Code "0" with no text means "not ignored".
    fn into_text(self) -> Option<String> {
        match self {
            IgnoredMessageField::Object(message) => {
                let code = message.code.map(MessageCode::into_string).unwrap_or_default();
                let text = message.text.unwrap_or_default();
                if (code.is_empty() || code == "0") && text.is_empty() {
                    None
                } else {
                    Some(format!("(code {code}) {text}"))
                }
            }
            IgnoredMessageField::Text(text) if text.is_empty() => None,
            IgnoredMessageField::Text(text) => Some(text),
            IgnoredMessageField::Number(0) => None,
            IgnoredMessageField::Number(code) => Some(format!("(code {code})")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IgnoredMessage {
    #[serde(rename = "#text")]
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    code: Option<MessageCode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageCode {
    Text(String),
    Number(u32),
}

impl MessageCode {
    fn into_string(self) -> String {
        match self {
            MessageCode::Text(code) => code,
            MessageCode::Number(code) => code.to_string(),
        }
    }
}

pub(crate) fn deserialize_u32_string_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU32 {
        String(String),
        Number(u32),
    }
    match StringOrU32::deserialize(deserializer)? {
        StringOrU32::String(value) => value.parse::<u32>().map_err(serde::de::Error::custom),
        StringOrU32::Number(value) => Ok(value),
    }
}
