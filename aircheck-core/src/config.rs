use std::env;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::clock::StationClock;
use crate::error::{ConfigError, Result};

pub const ACCESS_KEY_VAR: &str = "IA_ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "IA_SECRET_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AircheckConfig {
    pub station: StationSection,
    pub paths: PathsSection,
    pub capture: CaptureSection,
    pub filter: FilterSection,
    pub upload: UploadSection,
}

impl AircheckConfig {
    /// Builds the station clock from the configured offset and cutoff.
    pub fn station_clock(&self) -> Result<StationClock> {
        StationClock::new(self.station.utc_offset_hours, &self.station.cutoff)
    }

    pub fn stream_url(&self) -> Result<Url> {
        Url::parse(&self.station.stream_url).map_err(|err| ConfigError::Invalid {
            field: "station.stream_url",
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationSection {
    pub name: String,
    pub stream_url: String,
    pub utc_offset_hours: i32,
    /// Daily capture cutoff in station-local time, "HH:MM".
    pub cutoff: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub recordings_dir: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    pub file_prefix: String,
    pub artist: String,
    pub poll_interval_seconds: u64,
    pub stop_grace_seconds: u64,
    pub network_timeout_us: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterSection {
    pub enabled: bool,
    pub loudnorm_i: f64,
    pub loudnorm_tp: f64,
    pub loudnorm_lra: f64,
    pub denoise: bool,
    pub highpass_hz: Option<u32>,
    pub lowpass_hz: Option<u32>,
    pub codec: String,
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    pub endpoint: String,
    pub item_prefix: String,
    pub creator: String,
    pub mediatype: String,
    pub collection: Option<String>,
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
}

/// Archive credentials, read once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// Reads both secrets from the process environment. Either one missing
    /// or empty is fatal: nothing the recorder produces can be archived
    /// without them.
    pub fn from_env() -> Result<Self> {
        let access_key = read_secret(ACCESS_KEY_VAR)?;
        let secret_key = read_secret(SECRET_KEY_VAR)?;
        Ok(Self {
            access_key,
            secret_key,
        })
    }
}

fn read_secret(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential(name)),
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AircheckConfig> {
    let config: AircheckConfig = load_toml(path)?;
    config.station_clock()?;
    config.stream_url()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
