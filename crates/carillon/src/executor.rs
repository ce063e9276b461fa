//! Ring executor: sounds a ring plan on the instrument
//!
//! Runs inside a gate ring session and checks the mute before every atomic
//! action (one bell hit or one melody event). Once the mute is seen the
//! rest of the plan is abandoned; an action already started always finishes,
//! so a note-on never goes out without its note-off.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use carillonconf::BellsConfig;

use crate::gate::{PlaybackGate, RingSession};
use crate::instrument::{InstrumentError, Pacer};
use crate::plan::{ChimePattern, RingPlan, RingUnit};
use crate::song::Song;
use crate::tick::twelve_hour;

/// Pauses after the three notes of a festive quarter.
pub const FESTIVE_PAUSES: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(500),
    Duration::from_millis(1500),
];
/// Pause after a plain quarter.
pub const PLAIN_PAUSE: Duration = Duration::from_millis(2000);
/// Pause after each hour stroke.
pub const HOUR_PAUSE: Duration = Duration::from_millis(2500);

/// Notes of the bells the automatic rings use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BellSet {
    /// Trinitatis, struck for the hours
    pub hour: u8,
    /// Engel, the plain quarter bell
    pub angel: u8,
    pub bernhard: u8,
    /// Apostel
    pub apostle: u8,
}

impl From<&BellsConfig> for BellSet {
    fn from(config: &BellsConfig) -> Self {
        Self {
            hour: config.trinitatis,
            angel: config.engel,
            bernhard: config.bernhard,
            apostle: config.apostel,
        }
    }
}

impl Default for BellSet {
    fn default() -> Self {
        Self::from(&BellsConfig::default())
    }
}

/// How a ring ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RingOutcome {
    Completed { actions: usize },
    /// Stopped by manual playback after `actions` actions
    Preempted { actions: usize },
}

impl RingOutcome {
    pub fn actions(&self) -> usize {
        match self {
            RingOutcome::Completed { actions } | RingOutcome::Preempted { actions } => *actions,
        }
    }

    pub fn was_preempted(&self) -> bool {
        matches!(self, RingOutcome::Preempted { .. })
    }
}

struct Preempted;

/// Drives the instrument through the playback gate.
pub struct RingExecutor {
    gate: Arc<PlaybackGate>,
    bells: BellSet,
    pacer: Arc<dyn Pacer>,
}

impl RingExecutor {
    pub fn new(gate: Arc<PlaybackGate>, bells: BellSet, pacer: Arc<dyn Pacer>) -> Self {
        Self { gate, bells, pacer }
    }

    pub fn gate(&self) -> &Arc<PlaybackGate> {
        &self.gate
    }

    /// Sound `plan` as an automatic ring. Silent plans return at once
    /// without waiting for the instrument.
    pub fn execute(&self, plan: &RingPlan) -> RingOutcome {
        if plan.is_silent() {
            return RingOutcome::Completed { actions: 0 };
        }

        let outcome = self.gate.ring(|session| {
            let mut actions = 0;
            match self.run_units(session, plan, &mut actions) {
                Ok(()) => RingOutcome::Completed { actions },
                Err(Preempted) => RingOutcome::Preempted { actions },
            }
        });

        match outcome {
            RingOutcome::Completed { actions } => debug!("Rang {} ({} actions)", plan, actions),
            RingOutcome::Preempted { actions } => info!(
                "Ring {} preempted after {} of {} actions",
                plan,
                actions,
                plan.action_count()
            ),
        }
        outcome
    }

    /// Play a song with exclusive use of the instrument, cancelling any
    /// automatic ring in progress.
    pub fn play_exclusive(&self, song: &Song) -> Result<(), InstrumentError> {
        info!("Manual playback of {:?}", song.title);
        self.gate
            .run_exclusive(|instrument| instrument.play(&song.events, self.pacer.as_ref()))
    }

    fn run_units(
        &self,
        session: &RingSession<'_>,
        plan: &RingPlan,
        actions: &mut usize,
    ) -> Result<(), Preempted> {
        for unit in &plan.units {
            match unit {
                RingUnit::QuarterChime { count, pattern } => {
                    for _ in 0..*count {
                        match pattern {
                            ChimePattern::Festive => {
                                let notes = [self.bells.angel, self.bells.bernhard, self.bells.apostle];
                                for (note, pause) in notes.into_iter().zip(FESTIVE_PAUSES) {
                                    self.strike(session, note, pause, actions)?;
                                }
                            }
                            ChimePattern::Plain => {
                                self.strike(session, self.bells.angel, PLAIN_PAUSE, actions)?;
                            }
                        }
                    }
                }
                RingUnit::HourStrike { hours } => {
                    for _ in 0..twelve_hour(*hours) {
                        self.strike(session, self.bells.hour, HOUR_PAUSE, actions)?;
                    }
                }
                RingUnit::Melody(song) => {
                    for event in &song.events {
                        if session.is_muted() {
                            return Err(Preempted);
                        }
                        if let Err(e) = session
                            .instrument()
                            .play(std::slice::from_ref(event), self.pacer.as_ref())
                        {
                            warn!("Melody {:?}: {}", song.title, e);
                        }
                        *actions += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// One bell hit followed by its pause.
    fn strike(
        &self,
        session: &RingSession<'_>,
        note: u8,
        pause: Duration,
        actions: &mut usize,
    ) -> Result<(), Preempted> {
        if session.is_muted() {
            return Err(Preempted);
        }
        if let Err(e) = session.instrument().hit(note) {
            warn!("Skipping note {}: {}", note, e);
        }
        *actions += 1;
        self.pacer.pause(pause);
        Ok(())
    }
}
