//! Config file discovery, loading, and environment variable overlay.

use crate::{CarillonConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

const SYSTEM_CONFIG: &str = "/etc/carillon/config.toml";
const LOCAL_CONFIG: &str = "carillon.toml";

/// Existing config files in load order: system, user, local.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], with `cli_path` standing in for the
/// local file when it exists.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|d| d.config_dir().join("carillon/config.toml"));
    let local = match cli_path {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => PathBuf::from(LOCAL_CONFIG),
    };

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key, every
/// other value (including arrays) is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Build a config from a merged table, on top of the compiled defaults.
///
/// The defaults are merged in first so a file that names only one season
/// under `[melodies.marian]` keeps the other default antiphons.
pub fn from_table(table: toml::Table) -> Result<CarillonConfig, ConfigError> {
    let mut merged = defaults_table()?;
    merge_tables(&mut merged, table);

    let mut config: CarillonConfig = toml::Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;

    let paths = &mut config.infra.paths;
    paths.songs_dir = expand_path(&paths.songs_dir.to_string_lossy());
    paths.cache_dir = expand_path(&paths.cache_dir.to_string_lossy());

    Ok(config)
}

fn defaults_table() -> Result<toml::Table, ConfigError> {
    match toml::Value::try_from(CarillonConfig::default()) {
        Ok(toml::Value::Table(table)) => Ok(table),
        Ok(_) => Err(ConfigError::Invalid(
            "default configuration is not a table".to_string(),
        )),
        Err(e) => Err(ConfigError::Invalid(e.to_string())),
    }
}

/// Overlay `CARILLON_*` variables, then `RUST_LOG`, onto `config`.
pub fn apply_env_overrides(config: &mut CarillonConfig, sources: &mut ConfigSources) {
    let mut var = |name: &str| {
        let value = env::var(name).ok()?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    if let Some(dir) = var("CARILLON_SONGS_DIR") {
        config.infra.paths.songs_dir = expand_path(&dir);
    }
    if let Some(dir) = var("CARILLON_CACHE_DIR") {
        config.infra.paths.cache_dir = expand_path(&dir);
    }
    if let Some(port) = var("CARILLON_MIDI_PORT") {
        config.infra.midi.port = port;
    }
    if let Some(level) = var("CARILLON_LOG_LEVEL") {
        config.infra.telemetry.log_level = level;
    }
    if let Some(filter) = var("RUST_LOG") {
        config.infra.telemetry.log_level = filter;
    }
    // Ignored unless it parses as a port
    if let Some(port) = env::var("CARILLON_HTTP_PORT").ok().and_then(|v| v.parse().ok()) {
        config.infra.http.port = port;
        sources.env_overrides.push("CARILLON_HTTP_PORT".to_string());
    }
}

/// Expand a leading `~/` or `$VAR` in a path. Unknown variables are left as written.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(path),
        };
    }

    if let Some(var) = path.strip_prefix('$') {
        let (name, rest) = var.split_once('/').unwrap_or((var, ""));
        if let Ok(value) = env::var(name) {
            let base = PathBuf::from(value);
            return if rest.is_empty() { base } else { base.join(rest) };
        }
    }

    PathBuf::from(path)
}
