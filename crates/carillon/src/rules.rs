//! Ringing rules: (tick, calendar facts, date) to a ring plan
//!
//! Pure decision logic. Rules are checked in order and the first match wins:
//! night silence, paschal silence (Good Friday and Holy Saturday), the noon
//! Angelus melody, the evening Marian antiphon, then plain quarters and
//! hours. Chimes switch to the festive pattern on days ranked at or above
//! the configured threshold.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use carillonconf::{MelodiesConfig, RulesConfig};

use crate::calendar::{CalendarError, CalendarFacts, Rank, Season};
use crate::plan::{ChimePattern, RingPlan, RingUnit};
use crate::song::{CatalogError, Song, SongCatalog};
use crate::tick::{twelve_hour, Tick};

/// First hour rung in the morning.
pub const FIRST_HOUR: u8 = 8;
/// 21:30 is the last tick that rings.
pub const EVENING_HOUR: u8 = 21;
pub const EVENING_QUARTER: u8 = 2;

/// Error type for rule evaluation and setup
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("No Marian antiphon configured for the {0} season")]
    UnknownSeason(Season),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

/// Songs the rules can ask for, resolved once at startup.
#[derive(Debug, Clone)]
pub struct MelodyBook {
    noon: Arc<Song>,
    marian: HashMap<Season, Arc<Song>>,
}

impl MelodyBook {
    pub fn new(noon: Arc<Song>, marian: HashMap<Season, Arc<Song>>) -> Self {
        Self { noon, marian }
    }

    /// Look up every configured title in the catalog and apply the
    /// configured transposition and tempo. A title that is not there is a
    /// startup error.
    pub fn from_catalog(catalog: &SongCatalog, config: &MelodiesConfig) -> Result<Self, RuleError> {
        let resolve = |title: &str| -> Result<Arc<Song>, RuleError> {
            let song = catalog.require(title)?;
            if config.transpose == 0 && config.tempo == 1.0 {
                return Ok(song);
            }
            Ok(Arc::new(song.arranged(config.transpose, config.tempo)?))
        };

        let noon = resolve(&config.noon)?;

        let mut marian = HashMap::new();
        for (season, title) in &config.marian {
            let season: Season = season.parse()?;
            marian.insert(season, resolve(title)?);
        }

        Ok(Self { noon, marian })
    }

    pub fn noon(&self) -> &Arc<Song> {
        &self.noon
    }

    pub fn marian(&self, season: Season) -> Option<&Arc<Song>> {
        self.marian.get(&season)
    }
}

/// The tower's ringing policy.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    melodies: MelodyBook,
    solemn_rank: Rank,
    chime_before_hour: bool,
}

impl RuleEngine {
    pub fn new(melodies: MelodyBook) -> Self {
        Self {
            melodies,
            solemn_rank: Rank::Memorial,
            chime_before_hour: false,
        }
    }

    pub fn from_config(melodies: MelodyBook, config: &RulesConfig) -> Result<Self, RuleError> {
        Ok(Self {
            melodies,
            solemn_rank: config.solemn_rank.parse()?,
            chime_before_hour: config.chime_before_hour,
        })
    }

    pub fn with_solemn_rank(mut self, rank: Rank) -> Self {
        self.solemn_rank = rank;
        self
    }

    pub fn with_chime_before_hour(mut self, enabled: bool) -> Self {
        self.chime_before_hour = enabled;
        self
    }

    pub fn melodies(&self) -> &MelodyBook {
        &self.melodies
    }

    /// Decide what to ring for `tick` on `today`.
    pub fn decide(
        &self,
        tick: Tick,
        facts: &CalendarFacts,
        today: NaiveDate,
    ) -> Result<RingPlan, RuleError> {
        let (hour, quarter) = (tick.hour(), tick.quarter());

        if is_night(hour, quarter) {
            return Ok(RingPlan::silent());
        }

        if is_paschal_silence(today, facts.easter) {
            debug!("Paschal silence on {}", today);
            return Ok(RingPlan::silent());
        }

        let pattern = if facts.rank >= self.solemn_rank {
            ChimePattern::Festive
        } else {
            ChimePattern::Plain
        };
        let chime = |count| RingUnit::QuarterChime { count, pattern };

        let units = match (hour, quarter) {
            (12, 0) => vec![
                chime(4),
                RingUnit::HourStrike { hours: 12 },
                RingUnit::Melody(Arc::clone(&self.melodies.noon)),
            ],
            (EVENING_HOUR, EVENING_QUARTER) => {
                let antiphon = self
                    .melodies
                    .marian(facts.season)
                    .ok_or(RuleError::UnknownSeason(facts.season))?;
                vec![chime(2), RingUnit::Melody(Arc::clone(antiphon))]
            }
            (_, 0) => {
                let strike = RingUnit::HourStrike {
                    hours: twelve_hour(hour),
                };
                if self.chime_before_hour {
                    vec![chime(4), strike]
                } else {
                    vec![strike]
                }
            }
            (_, q) => vec![chime(q)],
        };

        Ok(RingPlan::new(units))
    }
}

/// After 21:30 and before 8:00 the tower is silent.
pub fn is_night(hour: u8, quarter: u8) -> bool {
    hour > EVENING_HOUR || (hour == EVENING_HOUR && quarter > EVENING_QUARTER) || hour < FIRST_HOUR
}

/// Good Friday and Holy Saturday.
pub fn is_paschal_silence(today: NaiveDate, easter: NaiveDate) -> bool {
    today == easter - Duration::days(1) || today == easter - Duration::days(2)
}
