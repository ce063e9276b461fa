//! Liturgical calendar facts for the ringing rules
//!
//! The rules only need three things about a day: how high its celebration
//! ranks, which season it falls in, and when Easter is that year.
//! [`ComputedCalendar`] derives all three offline from the Gregorian
//! computus and the general Roman calendar, plus locally configured
//! celebrations such as the patronal feast. The online Direktorium lives in
//! [`crate::direktorium`] and falls back to this calendar.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use tracing::debug;

use carillonconf::CalendarConfig;

/// Error type for calendar configuration
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Unknown rank: {0}")]
    UnknownRank(String),

    #[error("Unknown season: {0}")]
    UnknownSeason(String),

    #[error("Invalid date {0:?} (expected MM-DD or YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Direktorium request failed: {0}")]
    Fetch(String),

    #[error("Unreadable Direktorium response: {0}")]
    Parse(String),

    #[error("Direktorium cache {path}: {source}")]
    Cache {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Severity of a day's celebration, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Ferial,
    OptionalMemorial,
    Memorial,
    Feast,
    Solemnity,
}

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Ferial => "ferial",
            Rank::OptionalMemorial => "optional_memorial",
            Rank::Memorial => "memorial",
            Rank::Feast => "feast",
            Rank::Solemnity => "solemnity",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = CalendarError;

    /// Accepts the English names and the German Direktorium terms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "ferial" | "ferie" | "wochentag" => Ok(Rank::Ferial),
            "optional_memorial" | "nicht_geboten" | "nichtgebotener_gedenktag" => {
                Ok(Rank::OptionalMemorial)
            }
            "memorial" | "geboten" | "gebotener_gedenktag" => Ok(Rank::Memorial),
            "feast" | "fest" => Ok(Rank::Feast),
            "solemnity" | "hochfest" => Ok(Rank::Solemnity),
            _ => Err(CalendarError::UnknownRank(s.to_string())),
        }
    }
}

/// Liturgical season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Ordinary,
    Advent,
    Christmas,
    Lent,
    Easter,
}

impl Season {
    pub const ALL: [Season; 5] = [
        Season::Ordinary,
        Season::Advent,
        Season::Christmas,
        Season::Lent,
        Season::Easter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Ordinary => "ordinary",
            Season::Advent => "advent",
            Season::Christmas => "christmas",
            Season::Lent => "lent",
            Season::Easter => "easter",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Season::ALL
            .into_iter()
            .find(|season| season.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CalendarError::UnknownSeason(s.to_string()))
    }
}

/// What the rules know about one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarFacts {
    pub rank: Rank,
    pub season: Season,
    /// Easter Sunday of the same year
    pub easter: NaiveDate,
    /// Name of the celebration, if any
    pub title: Option<String>,
}

/// Source of calendar facts. Lookups never fail; a provider that cannot
/// answer falls back to its own defaults.
pub trait CalendarProvider: Send + Sync {
    fn facts_for(&self, date: NaiveDate) -> CalendarFacts;
}

/// Easter Sunday by the anonymous Gregorian computus.
pub fn easter(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;

    // month is 3 or 4 and day 1..=31 for every year
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap_or_default()
}

/// First Sunday of Advent: four Sundays before Christmas.
pub fn first_advent(year: i32) -> NaiveDate {
    let christmas_eve = ymd(year, 12, 24);
    let fourth = christmas_eve
        - Duration::days(christmas_eve.weekday().num_days_from_sunday() as i64);
    fourth - Duration::weeks(3)
}

/// Baptism of the Lord: the Sunday after Epiphany (6 January).
pub fn baptism_of_the_lord(year: i32) -> NaiveDate {
    let epiphany = ymd(year, 1, 6);
    epiphany + Duration::days(7 - epiphany.weekday().num_days_from_sunday() as i64)
}

/// Season a date falls in.
pub fn season_of(date: NaiveDate) -> Season {
    let year = date.year();
    if date >= ymd(year, 12, 25) || date <= baptism_of_the_lord(year) {
        return Season::Christmas;
    }
    if date >= first_advent(year) {
        return Season::Advent;
    }

    let easter = easter(year);
    if date >= easter - Duration::days(46) && date < easter {
        Season::Lent
    } else if date >= easter && date <= easter + Duration::days(49) {
        Season::Easter
    } else {
        Season::Ordinary
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    // Only called with fixed valid month/day pairs
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

type Fixed = (u32, u32, &'static str);

const FIXED_SOLEMNITIES: &[Fixed] = &[
    (1, 1, "Mary, Mother of God"),
    (1, 6, "Epiphany of the Lord"),
    (3, 19, "Saint Joseph"),
    (3, 25, "Annunciation of the Lord"),
    (6, 24, "Nativity of Saint John the Baptist"),
    (6, 29, "Saints Peter and Paul"),
    (8, 15, "Assumption of Mary"),
    (11, 1, "All Saints"),
    (12, 8, "Immaculate Conception"),
    (12, 25, "Nativity of the Lord"),
];

const FIXED_FEASTS: &[Fixed] = &[
    (1, 25, "Conversion of Saint Paul"),
    (2, 2, "Presentation of the Lord"),
    (2, 22, "Chair of Saint Peter"),
    (4, 25, "Saint Mark"),
    (5, 3, "Saints Philip and James"),
    (5, 14, "Saint Matthias"),
    (5, 31, "Visitation of Mary"),
    (7, 3, "Saint Thomas"),
    (7, 11, "Saint Benedict"),
    (7, 22, "Saint Mary Magdalene"),
    (7, 25, "Saint James"),
    (8, 6, "Transfiguration of the Lord"),
    (8, 10, "Saint Lawrence"),
    (8, 24, "Saint Bartholomew"),
    (9, 8, "Nativity of Mary"),
    (9, 14, "Exaltation of the Holy Cross"),
    (9, 21, "Saint Matthew"),
    (9, 29, "Saints Michael, Gabriel and Raphael"),
    (10, 18, "Saint Luke"),
    (10, 28, "Saints Simon and Jude"),
    (11, 9, "Dedication of the Lateran Basilica"),
    (11, 30, "Saint Andrew"),
    (12, 26, "Saint Stephen"),
    (12, 27, "Saint John"),
    (12, 28, "Holy Innocents"),
];

const FIXED_MEMORIALS: &[Fixed] = &[
    (1, 17, "Saint Anthony"),
    (1, 21, "Saint Agnes"),
    (1, 24, "Saint Francis de Sales"),
    (1, 28, "Saint Thomas Aquinas"),
    (1, 31, "Saint John Bosco"),
    (2, 5, "Saint Agatha"),
    (2, 10, "Saint Scholastica"),
    (2, 23, "Saint Polycarp"),
    (3, 7, "Saints Perpetua and Felicity"),
    (4, 29, "Saint Catherine of Siena"),
    (5, 2, "Saint Athanasius"),
    (6, 1, "Saint Justin"),
    (6, 13, "Saint Anthony of Padua"),
    (7, 29, "Saints Martha, Mary and Lazarus"),
    (7, 31, "Saint Ignatius of Loyola"),
    (8, 1, "Saint Alphonsus Liguori"),
    (8, 4, "Saint John Vianney"),
    (8, 8, "Saint Dominic"),
    (8, 11, "Saint Clare"),
    (8, 20, "Saint Bernard"),
    (8, 22, "Queenship of Mary"),
    (8, 27, "Saint Monica"),
    (8, 28, "Saint Augustine"),
    (8, 29, "Passion of Saint John the Baptist"),
    (9, 3, "Saint Gregory the Great"),
    (9, 13, "Saint John Chrysostom"),
    (9, 15, "Our Lady of Sorrows"),
    (9, 27, "Saint Vincent de Paul"),
    (9, 30, "Saint Jerome"),
    (10, 1, "Saint Thérèse of the Child Jesus"),
    (10, 2, "Holy Guardian Angels"),
    (10, 4, "Saint Francis of Assisi"),
    (10, 7, "Our Lady of the Rosary"),
    (10, 15, "Saint Teresa of Jesus"),
    (10, 17, "Saint Ignatius of Antioch"),
    (11, 4, "Saint Charles Borromeo"),
    (11, 10, "Saint Leo the Great"),
    (11, 11, "Saint Martin of Tours"),
    (11, 21, "Presentation of Mary"),
    (11, 22, "Saint Cecilia"),
    (12, 3, "Saint Francis Xavier"),
    (12, 7, "Saint Ambrose"),
    (12, 13, "Saint Lucy"),
    (12, 14, "Saint John of the Cross"),
];

/// A celebration pinned to a month/day, or to one date only.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Celebration {
    year: Option<i32>,
    month: u32,
    day: u32,
    rank: Rank,
    title: String,
}

impl Celebration {
    fn falls_on(&self, date: NaiveDate) -> bool {
        self.year.map_or(true, |y| y == date.year())
            && self.month == date.month()
            && self.day == date.day()
    }
}

/// Parse `MM-DD` or `YYYY-MM-DD` into (year, month, day).
fn parse_month_day(s: &str) -> Result<(Option<i32>, u32, u32), CalendarError> {
    let invalid = || CalendarError::InvalidDate(s.to_string());
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok((Some(date.year()), date.month(), date.day()));
    }

    let (month, day) = s.split_once('-').ok_or_else(invalid)?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;
    // 2024 is a leap year, so 02-29 is accepted
    NaiveDate::from_ymd_opt(2024, month, day).ok_or_else(invalid)?;
    Ok((None, month, day))
}

/// Offline calendar from the computus and a fixed table of celebrations.
#[derive(Debug, Default)]
pub struct ComputedCalendar {
    extra: Vec<Celebration>,
    memo: Mutex<Option<(NaiveDate, CalendarFacts)>>,
}

impl ComputedCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// General calendar plus the configured local celebrations.
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let mut calendar = Self::new();
        for entry in &config.celebrations {
            let (year, month, day) = parse_month_day(&entry.date)?;
            calendar.extra.push(Celebration {
                year,
                month,
                day,
                rank: entry.rank.parse()?,
                title: entry.title.clone(),
            });
        }
        Ok(calendar)
    }

    /// Highest-ranked configured celebration on `date`.
    pub fn local_celebration(&self, date: NaiveDate) -> Option<(Rank, &str)> {
        self.extra
            .iter()
            .filter(|c| c.falls_on(date))
            .fold(None, |best: Option<&Celebration>, c| match best {
                Some(b) if b.rank >= c.rank => Some(b),
                _ => Some(c),
            })
            .map(|c| (c.rank, c.title.as_str()))
    }

    fn compute(&self, date: NaiveDate) -> CalendarFacts {
        let year = date.year();
        let easter = easter(year);
        let season = season_of(date);

        let mut best: (Rank, Option<String>) = (Rank::Ferial, None);
        let mut consider = |rank: Rank, title: &str| {
            if rank > best.0 {
                best = (rank, Some(title.to_string()));
            }
        };

        for (offset, title) in movable_solemnities(easter, first_advent(year)) {
            if date == offset {
                consider(Rank::Solemnity, title);
            }
        }
        if date > easter && date <= easter + Duration::days(7) {
            consider(Rank::Solemnity, "Octave of Easter");
        }
        table_lookup(FIXED_SOLEMNITIES, date, Rank::Solemnity, &mut consider);

        if date == baptism_of_the_lord(year) {
            consider(Rank::Feast, "Baptism of the Lord");
        }
        if date == holy_family(year) {
            consider(Rank::Feast, "Holy Family");
        }
        table_lookup(FIXED_FEASTS, date, Rank::Feast, &mut consider);
        if date.weekday() == Weekday::Sun {
            consider(Rank::Feast, "Sunday");
        }

        // Memorials falling in Lent are only commemorated
        let memorial = if season == Season::Lent {
            Rank::OptionalMemorial
        } else {
            Rank::Memorial
        };
        table_lookup(FIXED_MEMORIALS, date, memorial, &mut consider);
        if date == easter + Duration::days(50) {
            consider(memorial, "Mary, Mother of the Church");
        }
        if date == easter + Duration::days(69) {
            consider(memorial, "Immaculate Heart of Mary");
        }

        for celebration in self.extra.iter().filter(|c| c.falls_on(date)) {
            consider(celebration.rank, &celebration.title);
        }

        CalendarFacts {
            rank: best.0,
            season,
            easter,
            title: best.1,
        }
    }
}

fn table_lookup(table: &[Fixed], date: NaiveDate, rank: Rank, consider: &mut impl FnMut(Rank, &str)) {
    for (month, day, title) in table {
        if date.month() == *month && date.day() == *day {
            consider(rank, title);
        }
    }
}

fn movable_solemnities(easter: NaiveDate, advent: NaiveDate) -> [(NaiveDate, &'static str); 7] {
    [
        (easter, "Easter Sunday"),
        (easter + Duration::days(39), "Ascension of the Lord"),
        (easter + Duration::days(49), "Pentecost"),
        (easter + Duration::days(56), "Most Holy Trinity"),
        (easter + Duration::days(60), "Corpus Christi"),
        (easter + Duration::days(68), "Sacred Heart of Jesus"),
        (advent - Duration::weeks(1), "Christ the King"),
    ]
}

/// Sunday within the Christmas octave, or 30 December when there is none.
fn holy_family(year: i32) -> NaiveDate {
    (26..=31)
        .map(|day| ymd(year, 12, day))
        .find(|d| d.weekday() == Weekday::Sun)
        .unwrap_or_else(|| ymd(year, 12, 30))
}

impl CalendarProvider for ComputedCalendar {
    fn facts_for(&self, date: NaiveDate) -> CalendarFacts {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached, facts)) = memo.as_ref() {
            if *cached == date {
                return facts.clone();
            }
        }

        let facts = self.compute(date);
        debug!(
            "Calendar {}: {} in {} ({:?})",
            date, facts.rank, facts.season, facts.title
        );
        *memo = Some((date, facts.clone()));
        facts
    }
}

/// Same facts for every date. Lets tests and the `plan` command pin a day.
#[derive(Debug, Clone)]
pub struct FixedCalendar(pub CalendarFacts);

impl CalendarProvider for FixedCalendar {
    fn facts_for(&self, _date: NaiveDate) -> CalendarFacts {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carillonconf::CelebrationConfig;
    use pretty_assertions::assert_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_easter_dates() {
        assert_eq!(easter(2019), d(2019, 4, 21));
        assert_eq!(easter(2024), d(2024, 3, 31));
        assert_eq!(easter(2025), d(2025, 4, 20));
        assert_eq!(easter(2026), d(2026, 4, 5));
        assert_eq!(easter(2038), d(2038, 4, 25));
    }

    #[test]
    fn test_advent_and_baptism() {
        assert_eq!(first_advent(2026), d(2026, 11, 29));
        assert_eq!(first_advent(2025), d(2025, 11, 30));
        assert_eq!(baptism_of_the_lord(2027), d(2027, 1, 10));
    }

    #[test]
    fn test_seasons() {
        assert_eq!(season_of(d(2026, 2, 17)), Season::Ordinary);
        assert_eq!(season_of(d(2026, 2, 18)), Season::Lent);
        assert_eq!(season_of(d(2026, 4, 4)), Season::Lent);
        assert_eq!(season_of(d(2026, 4, 5)), Season::Easter);
        assert_eq!(season_of(d(2026, 5, 24)), Season::Easter);
        assert_eq!(season_of(d(2026, 5, 25)), Season::Ordinary);
        assert_eq!(season_of(d(2026, 11, 28)), Season::Ordinary);
        assert_eq!(season_of(d(2026, 11, 29)), Season::Advent);
        assert_eq!(season_of(d(2026, 12, 24)), Season::Advent);
        assert_eq!(season_of(d(2026, 12, 25)), Season::Christmas);
        assert_eq!(season_of(d(2027, 1, 10)), Season::Christmas);
        assert_eq!(season_of(d(2027, 1, 11)), Season::Ordinary);
    }

    #[test]
    fn test_ranks() {
        let calendar = ComputedCalendar::new();
        let rank = |date| calendar.facts_for(date).rank;

        assert_eq!(rank(d(2026, 10, 13)), Rank::Ferial);
        assert_eq!(rank(d(2026, 10, 15)), Rank::Memorial);
        assert_eq!(rank(d(2026, 10, 18)), Rank::Feast);
        assert_eq!(rank(d(2026, 8, 15)), Rank::Solemnity);
        assert_eq!(rank(d(2026, 6, 4)), Rank::Solemnity);
        assert_eq!(rank(d(2026, 11, 22)), Rank::Solemnity);
        assert_eq!(rank(d(2026, 4, 8)), Rank::Solemnity);
        // Lenten Saturday: memorial reduced
        assert_eq!(rank(d(2026, 3, 7)), Rank::OptionalMemorial);
    }

    #[test]
    fn test_facts_carry_easter_and_title() {
        let facts = ComputedCalendar::new().facts_for(d(2026, 11, 22));
        assert_eq!(facts.easter, d(2026, 4, 5));
        assert_eq!(facts.season, Season::Ordinary);
        assert_eq!(facts.title.as_deref(), Some("Christ the King"));
    }

    #[test]
    fn test_configured_celebrations() {
        let config = CalendarConfig {
            celebrations: vec![
                CelebrationConfig {
                    date: "10-14".to_string(),
                    rank: "hochfest".to_string(),
                    title: "Kirchweih".to_string(),
                },
                CelebrationConfig {
                    date: "2026-10-13".to_string(),
                    rank: "feast".to_string(),
                    title: "Jubilee".to_string(),
                },
            ],
            ..CalendarConfig::default()
        };
        let calendar = ComputedCalendar::from_config(&config).unwrap();

        let kirchweih = calendar.facts_for(d(2027, 10, 14));
        assert_eq!(kirchweih.rank, Rank::Solemnity);
        assert_eq!(kirchweih.title.as_deref(), Some("Kirchweih"));

        assert_eq!(calendar.facts_for(d(2026, 10, 13)).rank, Rank::Feast);
        // One-off celebration does not repeat
        assert_eq!(calendar.facts_for(d(2025, 10, 13)).rank, Rank::Ferial);

        assert_eq!(calendar.local_celebration(d(2026, 10, 14)), Some((Rank::Solemnity, "Kirchweih")));
        assert_eq!(calendar.local_celebration(d(2026, 10, 15)), None);
    }

    #[test]
    fn test_invalid_celebration_config() {
        let bad_date = CalendarConfig {
            celebrations: vec![CelebrationConfig {
                date: "13-01".to_string(),
                rank: "feast".to_string(),
                title: String::new(),
            }],
            ..CalendarConfig::default()
        };
        assert!(matches!(
            ComputedCalendar::from_config(&bad_date),
            Err(CalendarError::InvalidDate(_))
        ));

        let bad_rank = CalendarConfig {
            celebrations: vec![CelebrationConfig {
                date: "02-29".to_string(),
                rank: "very important".to_string(),
                title: String::new(),
            }],
            ..CalendarConfig::default()
        };
        assert!(matches!(
            ComputedCalendar::from_config(&bad_rank),
            Err(CalendarError::UnknownRank(_))
        ));
    }

    #[test]
    fn test_rank_parsing() {
        assert_eq!("memorial".parse::<Rank>().unwrap(), Rank::Memorial);
        assert_eq!("Geboten".parse::<Rank>().unwrap(), Rank::Memorial);
        assert_eq!("optional-memorial".parse::<Rank>().unwrap(), Rank::OptionalMemorial);
        assert_eq!("Hochfest".parse::<Rank>().unwrap(), Rank::Solemnity);
        assert!(Rank::Ferial < Rank::OptionalMemorial);
        assert!(Rank::Feast < Rank::Solemnity);
    }

    #[test]
    fn test_season_parsing() {
        assert_eq!("Easter".parse::<Season>().unwrap(), Season::Easter);
        assert!("summer".parse::<Season>().is_err());
    }
}
