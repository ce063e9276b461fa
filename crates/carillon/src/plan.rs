//! Ring plans: what the tower sounds for one tick

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::song::Song;
use crate::tick::twelve_hour;

/// How each quarter of a chime is struck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChimePattern {
    /// One bell per quarter
    Plain,
    /// Three descending bells per quarter, for feast days
    Festive,
}

/// One step of a ring plan.
#[derive(Debug, Clone, PartialEq)]
pub enum RingUnit {
    QuarterChime { count: u8, pattern: ChimePattern },
    HourStrike { hours: u8 },
    Melody(Arc<Song>),
}

impl fmt::Display for RingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingUnit::QuarterChime { count, pattern } => {
                let pattern = match pattern {
                    ChimePattern::Plain => "plain",
                    ChimePattern::Festive => "festive",
                };
                write!(f, "chime({}, {})", count, pattern)
            }
            RingUnit::HourStrike { hours } => write!(f, "strike({})", hours),
            RingUnit::Melody(song) => write!(f, "melody({})", song.title),
        }
    }
}

/// Ordered ring units for one tick. An empty plan keeps the tower silent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RingPlan {
    pub units: Vec<RingUnit>,
}

impl RingPlan {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn new(units: Vec<RingUnit>) -> Self {
        Self { units }
    }

    pub fn is_silent(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of bell strikes or melody events the plan will sound.
    pub fn action_count(&self) -> usize {
        self.units
            .iter()
            .map(|unit| match unit {
                RingUnit::QuarterChime { count, pattern } => {
                    let per_quarter = match pattern {
                        ChimePattern::Plain => 1,
                        ChimePattern::Festive => 3,
                    };
                    *count as usize * per_quarter
                }
                RingUnit::HourStrike { hours } => twelve_hour(*hours) as usize,
                RingUnit::Melody(song) => song.events.len(),
            })
            .sum()
    }
}

impl fmt::Display for RingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.units.is_empty() {
            return f.write_str("silence");
        }
        for (i, unit) in self.units.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_display() {
        let song = Arc::new(Song {
            title: "Lourdes Lied".to_string(),
            number: None,
            path: PathBuf::from("Lourdes Lied.mid"),
            events: Vec::new(),
        });
        let plan = RingPlan::new(vec![
            RingUnit::QuarterChime {
                count: 4,
                pattern: ChimePattern::Festive,
            },
            RingUnit::HourStrike { hours: 12 },
            RingUnit::Melody(song),
        ]);

        assert_eq!(
            plan.to_string(),
            "chime(4, festive) strike(12) melody(Lourdes Lied)"
        );
        assert_eq!(RingPlan::silent().to_string(), "silence");
    }

    #[test]
    fn test_action_count() {
        let plan = RingPlan::new(vec![
            RingUnit::QuarterChime {
                count: 2,
                pattern: ChimePattern::Festive,
            },
            RingUnit::QuarterChime {
                count: 3,
                pattern: ChimePattern::Plain,
            },
            RingUnit::HourStrike { hours: 7 },
        ]);
        assert_eq!(plan.action_count(), 6 + 3 + 7);
    }

    #[test]
    fn test_action_count_follows_the_dial() {
        let afternoon = RingPlan::new(vec![RingUnit::HourStrike { hours: 13 }]);
        assert_eq!(afternoon.action_count(), 1);

        let midnight = RingPlan::new(vec![RingUnit::HourStrike { hours: 0 }]);
        assert_eq!(midnight.action_count(), 12);
    }
}
