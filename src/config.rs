//! Configuration loader for the Airtable→Wavespeed relay.
use reqwest::Url;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WAVESPEED_API_BASE: &str = "https://api.wavespeed.ai/api/v3/";
pub const DEFAULT_AIRTABLE_API_BASE: &str = "https://api.airtable.com/";
pub const DEFAULT_RECREATOR_TABLE: &str = "Pinterest Recreator";
pub const DEFAULT_POSES_TABLE: &str = "Pose Variations";

const CALLBACK_PATH: &str = "/wavespeed/callback";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Immutable process configuration, built once in `main` and handed to each
/// client constructor.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Publicly reachable base URL; the callback URL is derived from it.
    pub public_base_url: String,
    pub wavespeed: Wavespeed,
    pub airtable: Airtable,
}

/// Job provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Wavespeed {
    pub api_key: String,
    pub api_base: Url,
}

/// Record store settings and table names.
#[derive(Clone, PartialEq, Eq)]
pub struct Airtable {
    pub token: String,
    pub base_id: String,
    pub api_base: Url,
    pub tables: Tables,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub recreator: String,
    pub poses: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("public_base_url", &self.public_base_url)
            .field("wavespeed", &self.wavespeed)
            .field("airtable", &self.airtable)
            .finish()
    }
}

impl fmt::Debug for Wavespeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wavespeed")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Airtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Airtable")
            .field("base_id", &self.base_id)
            .field("api_base", &self.api_base.as_str())
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unset required values become empty strings so the process can still
    /// start; see [`Config::missing_required`]. Values that are present but
    /// malformed are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::Invalid {
                name: "PORT",
                reason: err.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let wavespeed_base = get("WAVESPEED_API_BASE")
            .unwrap_or_else(|| DEFAULT_WAVESPEED_API_BASE.to_string());
        let airtable_base =
            get("AIRTABLE_API_BASE").unwrap_or_else(|| DEFAULT_AIRTABLE_API_BASE.to_string());

        Ok(Self {
            port,
            public_base_url: get("PUBLIC_BASE_URL").unwrap_or_default(),
            wavespeed: Wavespeed {
                api_key: get("WAVESPEED_API_KEY").unwrap_or_default(),
                api_base: parse_base_url("WAVESPEED_API_BASE", &wavespeed_base)?,
            },
            airtable: Airtable {
                token: get("AIRTABLE_TOKEN").unwrap_or_default(),
                base_id: get("AIRTABLE_BASE_ID").unwrap_or_default(),
                api_base: parse_base_url("AIRTABLE_API_BASE", &airtable_base)?,
                tables: Tables {
                    recreator: get("AIRTABLE_RECREATOR_TABLE")
                        .unwrap_or_else(|| DEFAULT_RECREATOR_TABLE.to_string()),
                    poses: get("AIRTABLE_POSES_TABLE")
                        .unwrap_or_else(|| DEFAULT_POSES_TABLE.to_string()),
                },
            },
        })
    }

    /// Names of required variables that were not provided.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let required = [
            ("PUBLIC_BASE_URL", &self.public_base_url),
            ("WAVESPEED_API_KEY", &self.wavespeed.api_key),
            ("AIRTABLE_TOKEN", &self.airtable.token),
            ("AIRTABLE_BASE_ID", &self.airtable.base_id),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// URL embedded in every job payload for the provider to call back.
    pub fn callback_url(&self) -> String {
        format!(
            "{}{}",
            self.public_base_url.trim_end_matches('/'),
            CALLBACK_PATH
        )
    }
}

/// Load variables from an env file into the process environment.
/// - If `path` is None, looks for `.env` in the current directory and its
///   parents; a missing default file is not an error.
pub fn load_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        },
    }
    Ok(())
}

fn parse_base_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
    })
}

/// Example env file covering every variable the relay reads.
pub fn example() -> &'static str {
    r#"PORT=3000
PUBLIC_BASE_URL=https://relay.example.com
WAVESPEED_API_KEY=YOUR_WAVESPEED_API_KEY
WAVESPEED_API_BASE=https://api.wavespeed.ai/api/v3/
AIRTABLE_TOKEN=YOUR_AIRTABLE_TOKEN
AIRTABLE_BASE_ID=appXXXXXXXXXXXXXX
AIRTABLE_RECREATOR_TABLE=Pinterest Recreator
AIRTABLE_POSES_TABLE=Pose Variations
"#
}
