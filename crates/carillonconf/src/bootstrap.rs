//! Bootstrap configuration - seeds the ringing policy at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MIDI notes of the individual bells.
///
/// Names follow the dedications of the bells in the tower.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BellsConfig {
    /// Hour bell (A#1).
    pub trinitatis: u8,
    /// F#2, last note of the festive quarter.
    pub apostel: u8,
    /// G#2, middle note of the festive quarter.
    pub bernhard: u8,
    /// A#2, the plain quarter bell and first note of the festive quarter.
    pub engel: u8,
}

impl Default for BellsConfig {
    fn default() -> Self {
        Self {
            trinitatis: 0x22,
            apostel: 0x2A,
            bernhard: 0x2C,
            engel: 0x2E,
        }
    }
}

/// Rule engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Lowest rank that switches quarters to the festive pattern
    /// (ferial, optional_memorial, memorial, feast, solemnity).
    pub solemn_rank: String,

    /// Precede the plain full-hour strike with a four-quarter chime.
    pub chime_before_hour: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            solemn_rank: "memorial".to_string(),
            chime_before_hour: false,
        }
    }
}

/// Titles of the songs played by the automatic rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MelodiesConfig {
    /// Played after the noon strike.
    #[serde(default = "MelodiesConfig::default_noon")]
    pub noon: String,

    /// Evening antiphon per liturgical season (ordinary, advent, christmas,
    /// lent, easter). Seasons without an entry are a configuration error at
    /// the evening ring.
    #[serde(default = "MelodiesConfig::default_marian")]
    pub marian: BTreeMap<String, String>,

    /// Semitones added to every note of the rule melodies.
    #[serde(default)]
    pub transpose: i8,

    /// Playback speed of the rule melodies relative to the files (0.25..=4).
    #[serde(default = "MelodiesConfig::default_tempo")]
    pub tempo: f64,
}

impl MelodiesConfig {
    fn default_noon() -> String {
        "Lourdes Lied".to_string()
    }

    fn default_marian() -> BTreeMap<String, String> {
        let mut marian = BTreeMap::new();
        marian.insert("ordinary".to_string(), "Salve Regina".to_string());
        marian.insert("christmas".to_string(), "Alma Redemptoris Mater".to_string());
        marian.insert("lent".to_string(), "Ave Regina caelorum".to_string());
        marian.insert("easter".to_string(), "Regina caeli laetare".to_string());
        marian
    }

    fn default_tempo() -> f64 {
        1.0
    }
}

impl Default for MelodiesConfig {
    fn default() -> Self {
        Self {
            noon: Self::default_noon(),
            marian: Self::default_marian(),
            transpose: 0,
            tempo: Self::default_tempo(),
        }
    }
}

/// An additional celebration not in the general calendar (patronal feast,
/// dedication of the church, local saints).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CelebrationConfig {
    /// `MM-DD` for every year, or `YYYY-MM-DD` for one date.
    pub date: String,
    pub rank: String,
    #[serde(default)]
    pub title: String,
}

/// Where the liturgical day comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalendarSource {
    /// General calendar computed locally.
    Computed,
    /// Online Direktorium (eucharistiefeier.de), computed when unreachable.
    #[default]
    Direktorium,
}

impl CalendarSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarSource::Computed => "computed",
            CalendarSource::Direktorium => "direktorium",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub source: CalendarSource,
    /// Regional Direktorium, e.g. "deutschland" or "freiburg".
    pub kalender: String,
    pub celebrations: Vec<CelebrationConfig>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            source: CalendarSource::default(),
            kalender: "deutschland".to_string(),
            celebrations: Vec::new(),
        }
    }
}

/// Days on which the tower stays silent (`YYYY-MM-DD`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SilenceConfig {
    pub dates: Vec<String>,
}

/// All bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub bells: BellsConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub melodies: MelodiesConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub silence: SilenceConfig,
}
