//! Minimal configuration loading for the carillon daemon.
//!
//! # Layout
//!
//! Two halves, flattened into one TOML document:
//!
//! - **Infrastructure** (`InfraConfig`): things fixed for the process
//!   lifetime - song directory, MIDI port, HTTP bind, log level.
//!
//! - **Bootstrap** (`BootstrapConfig`): values that seed the ringing policy
//!   (bell notes, rule thresholds, melody titles, silent days). Some of them,
//!   like the silent days, are changed at runtime afterwards.
//!
//! # Sources
//!
//! Merged in this order, later values winning:
//! 1. `/etc/carillon/config.toml` (system)
//! 2. `~/.config/carillon/config.toml` (user)
//! 3. `./carillon.toml` (local override, or the `--config` path)
//! 4. Environment variables (`CARILLON_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! songs_dir = "~/carillon/songs"
//!
//! [midi]
//! port = "GrandOrgue"
//!
//! [rules]
//! solemn_rank = "memorial"
//!
//! [melodies]
//! noon = "Lourdes Lied"
//!
//! [melodies.marian]
//! ordinary = "Salve Regina"
//! advent = "Alma Redemptoris Mater"
//!
//! [calendar]
//! source = "direktorium"
//! kalender = "deutschland"
//!
//! [silence]
//! dates = ["2026-12-24"]
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{
    BellsConfig, BootstrapConfig, CalendarConfig, CalendarSource, CelebrationConfig,
    MelodiesConfig, RulesConfig, SilenceConfig,
};
pub use infra::{HttpConfig, InfraConfig, MidiConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading, parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete carillon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CarillonConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl CarillonConfig {
    /// Load from the standard locations and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./carillon.toml`.
    ///
    /// System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Carillon Configuration\n\n");

        let paths = &self.infra.paths;
        output.push_str("[paths]\n");
        output.push_str(&format!("songs_dir = {}\n", quoted(&paths.songs_dir.display().to_string())));
        output.push_str(&format!("cache_dir = {}\n", quoted(&paths.cache_dir.display().to_string())));

        let midi = &self.infra.midi;
        output.push_str("\n[midi]\n");
        output.push_str(&format!("port = {}\n", quoted(&midi.port)));
        output.push_str(&format!("client_name = {}\n", quoted(&midi.client_name)));
        output.push_str(&format!("lowest_note = {}\n", midi.lowest_note));
        output.push_str(&format!("highest_note = {}\n", midi.highest_note));
        output.push_str(&format!("dry_run = {}\n", midi.dry_run));

        output.push_str("\n[http]\n");
        output.push_str(&format!("bind = {}\n", quoted(&self.infra.http.bind)));
        output.push_str(&format!("port = {}\n", self.infra.http.port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = {}\n",
            quoted(&self.infra.telemetry.log_level)
        ));

        let bells = &self.bootstrap.bells;
        output.push_str("\n[bells]\n");
        output.push_str(&format!("trinitatis = {}\n", bells.trinitatis));
        output.push_str(&format!("apostel = {}\n", bells.apostel));
        output.push_str(&format!("bernhard = {}\n", bells.bernhard));
        output.push_str(&format!("engel = {}\n", bells.engel));

        let rules = &self.bootstrap.rules;
        output.push_str("\n[rules]\n");
        output.push_str(&format!("solemn_rank = {}\n", quoted(&rules.solemn_rank)));
        output.push_str(&format!("chime_before_hour = {}\n", rules.chime_before_hour));

        let melodies = &self.bootstrap.melodies;
        output.push_str("\n[melodies]\n");
        output.push_str(&format!("noon = {}\n", quoted(&melodies.noon)));
        output.push_str(&format!("transpose = {}\n", melodies.transpose));
        output.push_str(&format!("tempo = {}\n", toml::Value::Float(melodies.tempo)));
        output.push_str("\n[melodies.marian]\n");
        for (season, title) in &melodies.marian {
            output.push_str(&format!("{} = {}\n", season, quoted(title)));
        }

        let calendar = &self.bootstrap.calendar;
        output.push_str("\n[calendar]\n");
        output.push_str(&format!("source = {}\n", quoted(calendar.source.as_str())));
        output.push_str(&format!("kalender = {}\n", quoted(&calendar.kalender)));
        for celebration in &calendar.celebrations {
            output.push_str("\n[[calendar.celebrations]]\n");
            output.push_str(&format!("date = {}\n", quoted(&celebration.date)));
            output.push_str(&format!("rank = {}\n", quoted(&celebration.rank)));
            output.push_str(&format!("title = {}\n", quoted(&celebration.title)));
        }

        output.push_str("\n[silence]\n");
        output.push_str("dates = [\n");
        for date in &self.bootstrap.silence.dates {
            output.push_str(&format!("    {},\n", quoted(date)));
        }
        output.push_str("]\n");

        output
    }
}

/// A TOML basic string with quotes and backslashes escaped.
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CarillonConfig::default();
        assert_eq!(config.infra.http.port, 8090);
        assert_eq!(config.infra.midi.lowest_note, 34);
        assert_eq!(config.infra.midi.highest_note, 89);
        assert_eq!(config.bootstrap.melodies.noon, "Lourdes Lied");
        assert_eq!(config.bootstrap.melodies.marian.len(), 4);
    }

    #[test]
    fn test_to_toml() {
        let config = CarillonConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[midi]"));
        assert!(toml.contains("[melodies.marian]"));
        assert!(toml.contains("Regina caeli laetare"));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = CarillonConfig::default();
        config.bootstrap.silence.dates.push("2026-12-24".to_string());
        config.bootstrap.calendar.celebrations.push(CelebrationConfig {
            date: "10-15".to_string(),
            rank: "memorial".to_string(),
            title: "Teresa of Avila".to_string(),
        });

        let table: toml::Table = config.to_toml().parse().unwrap();
        let parsed = loader::from_table(table).unwrap();

        assert_eq!(parsed.bootstrap.silence.dates, vec!["2026-12-24"]);
        assert_eq!(parsed.bootstrap.calendar.celebrations.len(), 1);
        assert_eq!(parsed.bootstrap.bells.engel, config.bootstrap.bells.engel);
        assert_eq!(parsed.bootstrap.calendar.kalender, "deutschland");
        assert_eq!(parsed.bootstrap.melodies.tempo, 1.0);
    }

    #[test]
    fn test_to_toml_escapes_strings() {
        let mut config = CarillonConfig::default();
        config.bootstrap.melodies.noon = r#"Lied "Maria" \ Lourdes"#.to_string();
        config.bootstrap.calendar.celebrations.push(CelebrationConfig {
            date: "08-20".to_string(),
            rank: "feast".to_string(),
            title: r#"Hl. Bernhard "von Clairvaux""#.to_string(),
        });
        config.infra.paths.cache_dir = PathBuf::from(r"C:\carillon\cache");
        config.bootstrap.calendar.source = CalendarSource::Computed;

        let table: toml::Table = config.to_toml().parse().unwrap();
        let parsed = loader::from_table(table).unwrap();

        assert_eq!(parsed.bootstrap.melodies.noon, config.bootstrap.melodies.noon);
        assert_eq!(
            parsed.bootstrap.calendar.celebrations[0].title,
            r#"Hl. Bernhard "von Clairvaux""#
        );
        assert_eq!(parsed.infra.paths.cache_dir, PathBuf::from(r"C:\carillon\cache"));
        assert_eq!(parsed.bootstrap.calendar.source, CalendarSource::Computed);
    }
}
