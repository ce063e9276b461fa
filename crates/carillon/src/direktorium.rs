//! Liturgical days from the Direktorium at eucharistiefeier.de
//!
//! The service publishes one year of celebrations per regional calendar
//! (`kal=deutschland`, `kal=freiburg`, ...) as JSON. A year is fetched once,
//! kept on disk under the cache directory and read from there afterwards.
//! While a year cannot be had the computed calendar answers, and the fetch
//! is tried again after [`RETRY_AFTER`]. Season and Easter always come from
//! the computus.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use tracing::{debug, info, warn};

use carillonconf::{CalendarConfig, PathsConfig};

use crate::calendar::{CalendarError, CalendarFacts, CalendarProvider, ComputedCalendar, Rank};

pub const API_URL: &str = "http://www.eucharistiefeier.de/lk/api.php";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Pause before a failed year is requested again.
pub const RETRY_AFTER: Duration = Duration::from_secs(30 * 60);

/// Raw JSON for one calendar year.
pub trait YearSource: Send + Sync {
    fn fetch_year(&self, kalender: &str, year: i32) -> Result<String, CalendarError>;
}

/// Fetches years over HTTP.
#[derive(Debug, Clone)]
pub struct HttpYearSource {
    url: String,
    timeout: Duration,
}

impl HttpYearSource {
    pub fn new() -> Self {
        Self::with_url(API_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: FETCH_TIMEOUT,
        }
    }
}

impl Default for HttpYearSource {
    fn default() -> Self {
        Self::new()
    }
}

impl YearSource for HttpYearSource {
    /// Blocking request. Must not be called from inside an async task.
    fn fetch_year(&self, kalender: &str, year: i32) -> Result<String, CalendarError> {
        let fetch_error = |e: reqwest::Error| CalendarError::Fetch(e.to_string());

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(fetch_error)?;

        let year = year.to_string();
        debug!("GET {} kal={} jahr={}", self.url, kalender, year);
        client
            .get(&self.url)
            .query(&[
                ("format", "json"),
                ("info", "wdtrgflu"),
                ("dup", "e"),
                ("bahn", "j"),
                ("kal", kalender),
                ("jahr", year.as_str()),
            ])
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(fetch_error)
    }
}

#[derive(Debug, Deserialize)]
struct Zelebration {
    #[serde(rename = "Datum")]
    date: String,
    #[serde(rename = "Titel", default)]
    title: String,
    #[serde(rename = "Rang", default)]
    rank: String,
}

/// Best celebration per date.
pub type YearTable = HashMap<NaiveDate, (Rank, String)>;

/// Rank from a Direktorium `Rang` field: letter codes or German terms.
/// Anything unrecognised counts as a weekday.
pub fn rank_of(code: &str) -> Rank {
    let code = code.trim();
    match code {
        "H" => return Rank::Solemnity,
        "F" => return Rank::Feast,
        "G" => return Rank::Memorial,
        "g" => return Rank::OptionalMemorial,
        "" => return Rank::Ferial,
        _ => {}
    }

    let lower = code.to_lowercase();
    if lower.contains("hochfest") {
        Rank::Solemnity
    } else if lower.contains("gedenktag") && lower.contains("nicht") {
        Rank::OptionalMemorial
    } else if lower.contains("gedenktag") {
        Rank::Memorial
    } else if lower.contains("fest") {
        Rank::Feast
    } else {
        code.parse().unwrap_or_else(|_| {
            debug!("Unknown Direktorium rank {:?}", code);
            Rank::Ferial
        })
    }
}

/// Parse a year response. `Zelebrationen` may be an object keyed by id or
/// an array; entries without a usable date are skipped.
pub fn parse_year(json: &str) -> Result<YearTable, CalendarError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| CalendarError::Parse(e.to_string()))?;

    let entries: Vec<serde_json::Value> = match value.get("Zelebrationen") {
        Some(serde_json::Value::Object(map)) => map.values().cloned().collect(),
        Some(serde_json::Value::Array(list)) => list.clone(),
        _ => return Err(CalendarError::Parse("no Zelebrationen".to_string())),
    };

    let mut table = YearTable::new();
    for entry in entries {
        let Ok(celebration) = serde_json::from_value::<Zelebration>(entry) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(celebration.date.trim(), "%Y-%m-%d") else {
            debug!("Skipping Direktorium entry dated {:?}", celebration.date);
            continue;
        };

        let mut rank = rank_of(&celebration.rank);
        if date.weekday() == Weekday::Sun {
            rank = rank.max(Rank::Feast);
        }
        match table.get(&date) {
            Some((best, _)) if *best >= rank => {}
            _ => {
                table.insert(date, (rank, celebration.title.trim().to_string()));
            }
        }
    }

    if table.is_empty() {
        return Err(CalendarError::Parse("no celebrations listed".to_string()));
    }
    Ok(table)
}

enum YearState {
    Loaded(Arc<YearTable>),
    Failed(Instant),
}

/// Calendar backed by the online Direktorium, with the computed calendar
/// standing in while it is unreachable.
pub struct DirektoriumCalendar {
    kalender: String,
    cache_dir: Option<PathBuf>,
    source: Arc<dyn YearSource>,
    fallback: ComputedCalendar,
    retry_after: Duration,
    years: Mutex<HashMap<i32, YearState>>,
}

impl DirektoriumCalendar {
    /// Without a cache directory every year is fetched once per process.
    pub fn new(
        kalender: impl Into<String>,
        fallback: ComputedCalendar,
        source: Arc<dyn YearSource>,
    ) -> Self {
        Self {
            kalender: kalender.into(),
            cache_dir: None,
            source,
            fallback,
            retry_after: RETRY_AFTER,
            years: Mutex::new(HashMap::new()),
        }
    }

    /// HTTP source, `[calendar]` celebrations and the `[paths]` cache.
    pub fn from_config(paths: &PathsConfig, config: &CalendarConfig) -> Result<Self, CalendarError> {
        let fallback = ComputedCalendar::from_config(config)?;
        Ok(Self::new(&config.kalender, fallback, Arc::new(HttpYearSource::new()))
            .with_cache_dir(paths.cache_dir.clone()))
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = after;
        self
    }

    /// `<cache_dir>/direktorium/<kalender>/<year>.json`
    pub fn cache_path(&self, year: i32) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join("direktorium")
                .join(&self.kalender)
                .join(format!("{}.json", year))
        })
    }

    fn year(&self, year: i32) -> Option<Arc<YearTable>> {
        let mut years = self.years.lock().unwrap_or_else(PoisonError::into_inner);
        match years.get(&year) {
            Some(YearState::Loaded(table)) => return Some(Arc::clone(table)),
            Some(YearState::Failed(at)) if at.elapsed() < self.retry_after => return None,
            _ => {}
        }

        match self.load_year(year) {
            Ok(table) => {
                info!(
                    "Direktorium {} {}: {} days",
                    self.kalender,
                    year,
                    table.len()
                );
                let table = Arc::new(table);
                years.insert(year, YearState::Loaded(Arc::clone(&table)));
                Some(table)
            }
            Err(e) => {
                warn!(
                    "Direktorium {} {} unavailable, using the computed calendar: {}",
                    self.kalender, year, e
                );
                years.insert(year, YearState::Failed(Instant::now()));
                None
            }
        }
    }

    fn load_year(&self, year: i32) -> Result<YearTable, CalendarError> {
        let cache = self.cache_path(year);

        if let Some(path) = cache.as_deref().filter(|path| path.exists()) {
            match read_cache(path) {
                Ok(table) => {
                    debug!("Direktorium {} from {}", year, path.display());
                    return Ok(table);
                }
                Err(e) => warn!("Ignoring cached Direktorium: {}", e),
            }
        }

        let json = self.source.fetch_year(&self.kalender, year)?;
        let table = parse_year(&json)?;

        if let Some(path) = cache {
            if let Err(e) = write_cache(&path, &json) {
                warn!("{}", e);
            }
        }
        Ok(table)
    }
}

fn read_cache(path: &Path) -> Result<YearTable, CalendarError> {
    let json = fs::read_to_string(path).map_err(|source| CalendarError::Cache {
        path: path.to_path_buf(),
        source,
    })?;
    parse_year(&json)
}

fn write_cache(path: &Path, json: &str) -> Result<(), CalendarError> {
    let cache_error = |source| CalendarError::Cache {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(cache_error)?;
    }
    fs::write(path, json).map_err(cache_error)
}

impl CalendarProvider for DirektoriumCalendar {
    fn facts_for(&self, date: NaiveDate) -> CalendarFacts {
        let computed = self.fallback.facts_for(date);
        let Some(table) = self.year(date.year()) else {
            return computed;
        };

        let mut facts = CalendarFacts {
            rank: Rank::Ferial,
            title: None,
            ..computed
        };
        if let Some((rank, title)) = table.get(&date) {
            facts.rank = *rank;
            facts.title = (!title.is_empty()).then(|| title.clone());
        }
        if let Some((rank, title)) = self.fallback.local_celebration(date) {
            if rank > facts.rank {
                facts.rank = rank;
                facts.title = Some(title.to_string());
            }
        }
        facts
    }
}
