//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned recursively for `*.mid` songs.
    /// Default: ~/.local/share/carillon/songs
    #[serde(default = "PathsConfig::default_songs_dir")]
    pub songs_dir: PathBuf,

    /// Downloaded Direktorium years, one JSON file per calendar and year.
    /// Default: ~/.cache/carillon
    #[serde(default = "PathsConfig::default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl PathsConfig {
    fn default_songs_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/carillon/songs"))
            .unwrap_or_else(|| PathBuf::from(".local/share/carillon/songs"))
    }

    fn default_cache_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.cache_dir().join("carillon"))
            .unwrap_or_else(|| PathBuf::from(".cache/carillon"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            songs_dir: Self::default_songs_dir(),
            cache_dir: Self::default_cache_dir(),
        }
    }
}

/// MIDI output towards the instrument (GrandOrgue or a real carillon console).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Substring matched against output port names. Empty picks the first port.
    /// Default: ""
    #[serde(default)]
    pub port: String,

    /// Client name announced to the MIDI subsystem.
    /// Default: carillon
    #[serde(default = "MidiConfig::default_client_name")]
    pub client_name: String,

    /// Lowest note the instrument has a bell for.
    /// Default: 34
    #[serde(default = "MidiConfig::default_lowest_note")]
    pub lowest_note: u8,

    /// Highest note the instrument has a bell for.
    /// Default: 89
    #[serde(default = "MidiConfig::default_highest_note")]
    pub highest_note: u8,

    /// Log strikes instead of sending them.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

impl MidiConfig {
    fn default_client_name() -> String {
        "carillon".to_string()
    }

    fn default_lowest_note() -> u8 {
        34
    }

    fn default_highest_note() -> u8 {
        89
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            client_name: Self::default_client_name(),
            lowest_note: Self::default_lowest_note(),
            highest_note: Self::default_highest_note(),
            dry_run: false,
        }
    }
}

/// Operator HTTP interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address.
    /// Default: 0.0.0.0
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,

    /// HTTP port.
    /// Default: 8090
    #[serde(default = "HttpConfig::default_port")]
    pub port: u16,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8090
    }

    /// `bind:port` as accepted by `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            port: Self::default_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub midi: MidiConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
