//! last.fm credential lookup.
//!
//! Credentials live in `<cache_dir>/.lastfm-credentials`, one `key=value` per line:
//!
//! ```text
//! api_key=...
//! api_secret=...
//! session_key=...
//! username=...
//! ```
//!
//! Only a lookup: obtaining a session key is done elsewhere.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub session_key: String,
    pub username: Option<String>,
}

// Keeps secrets out of debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub fn default_credentials_path() -> Result<PathBuf> {
    let cache_dir =
        dirs::cache_dir().ok_or_else(|| anyhow!("Could not determine system cache directory"))?;
    Ok(cache_dir.join(".lastfm-credentials"))
}

pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!(
            "Could not read last.fm credentials at {} - create it with api_key, api_secret and session_key",
            path.display()
        )
    })?;
    parse_credentials(&contents).with_context(|| format!("Invalid credentials file {}", path.display()))
}

pub fn parse_credentials(contents: &str) -> Result<Credentials> {
    let mut credentials = Credentials::default();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("line {} is not a key=value pair", number + 1);
        };
        let value = value.trim().to_string();
        match key.trim() {
            "api_key" => credentials.api_key = value,
            "api_secret" => credentials.api_secret = value,
            "session_key" => credentials.session_key = value,
            "username" => credentials.username = Some(value).filter(|name| !name.is_empty()),
            other => bail!("unknown key {other:?} on line {}", number + 1),
        }
    }

    for (name, value) in [
        ("api_key", &credentials.api_key),
        ("api_secret", &credentials.api_secret),
        ("session_key", &credentials.session_key),
    ] {
        if value.is_empty() {
            bail!("missing {name}");
        }
    }
    Ok(credentials)
}
