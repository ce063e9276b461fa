//! CarillonDaemon - the assembled tower
//!
//! Wires the instrument, gate, executor, rules and observers together and
//! owns the quarter clock. The HTTP surface and the CLI both work through
//! this type.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use carillonconf::{CalendarSource, CarillonConfig, MidiConfig};

use crate::calendar::{CalendarError, CalendarFacts, CalendarProvider, ComputedCalendar};
use crate::chain::{ChainError, NotificationChain, Observer};
use crate::clock::{ClockError, QuarterClock, WallClock};
use crate::direktorium::DirektoriumCalendar;
use crate::executor::{BellSet, RingExecutor};
use crate::gate::PlaybackGate;
use crate::instrument::{
    DryRunInstrument, Instrument, InstrumentError, MidiCarillon, NoteRange, Pacer,
};
use crate::plan::RingPlan;
use crate::rules::{MelodyBook, RuleEngine, RuleError};
use crate::song::{Song, SongCatalog};
use crate::striker::{LastRing, SilentDays, Striker};
use crate::tick::Tick;

/// Priority of the silent-day override; the striker sits below it.
pub const SILENT_DAYS_PRIORITY: i64 = 10;

/// Error type for assembling the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Open the configured instrument: MIDI, or a logger in dry-run mode.
pub fn open_instrument(config: &MidiConfig) -> Result<Arc<dyn Instrument>, InstrumentError> {
    let range = NoteRange::new(config.lowest_note, config.highest_note);
    if config.dry_run {
        info!("Dry run: strikes are logged, not sent");
        return Ok(Arc::new(DryRunInstrument::new(range)));
    }
    Ok(Arc::new(MidiCarillon::open(&config.port, &config.client_name, range)?))
}

/// Build the `[calendar]` source. Nothing is fetched until the first lookup.
pub fn open_calendar(config: &CarillonConfig) -> Result<Arc<dyn CalendarProvider>, CalendarError> {
    let calendar = &config.bootstrap.calendar;
    match calendar.source {
        CalendarSource::Computed => Ok(Arc::new(ComputedCalendar::from_config(calendar)?)),
        CalendarSource::Direktorium => {
            info!(
                "Calendar: Direktorium {}, cached in {}",
                calendar.kalender,
                config.infra.paths.cache_dir.display()
            );
            Ok(Arc::new(DirektoriumCalendar::from_config(
                &config.infra.paths,
                calendar,
            )?))
        }
    }
}

/// Collaborators the daemon is built from.
pub struct DaemonParts {
    pub instrument: Arc<dyn Instrument>,
    pub catalog: SongCatalog,
    pub calendar: Arc<dyn CalendarProvider>,
    pub clock: Arc<dyn WallClock>,
    pub pacer: Arc<dyn Pacer>,
}

/// What the rules would ring at a given moment
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub tick: Tick,
    pub date: NaiveDate,
    pub facts: CalendarFacts,
    pub silent_day: bool,
    pub plan: String,
    pub actions: usize,
}

/// Liveness summary for `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub instrument: String,
    pub muted: bool,
    pub clock_running: bool,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub skipped_boundaries: u64,
    pub strikes: u64,
    pub songs: usize,
    pub last_ring: Option<LastRing>,
}

pub struct CarillonDaemon {
    chain: Arc<NotificationChain>,
    executor: Arc<RingExecutor>,
    striker: Arc<Striker>,
    silent_days: Arc<SilentDays>,
    rules: Arc<RuleEngine>,
    calendar: Arc<dyn CalendarProvider>,
    catalog: Arc<SongCatalog>,
    clock: Arc<dyn WallClock>,
    quarter_clock: Mutex<Option<QuarterClock>>,
}

impl CarillonDaemon {
    /// Resolve melodies, build the rules and register the observers.
    /// The clock is not started.
    pub fn build(config: &CarillonConfig, parts: DaemonParts) -> Result<Self, DaemonError> {
        let bootstrap = &config.bootstrap;

        let melodies = MelodyBook::from_catalog(&parts.catalog, &bootstrap.melodies)?;
        let rules = Arc::new(RuleEngine::from_config(melodies, &bootstrap.rules)?);

        let gate = Arc::new(PlaybackGate::new(parts.instrument));
        let executor = Arc::new(RingExecutor::new(
            gate,
            BellSet::from(&bootstrap.bells),
            parts.pacer,
        ));

        let striker = Arc::new(Striker::new(
            Arc::clone(&rules),
            Arc::clone(&parts.calendar),
            Arc::clone(&parts.clock),
            Arc::clone(&executor),
        ));
        let silent_days = Arc::new(SilentDays::from_config(
            &bootstrap.silence,
            Arc::clone(&parts.clock),
        )?);

        let chain = Arc::new(NotificationChain::new());
        chain.attach(
            Arc::clone(&silent_days) as Arc<dyn Observer>,
            Some(SILENT_DAYS_PRIORITY),
        )?;
        chain.attach(Arc::clone(&striker) as Arc<dyn Observer>, None)?;

        info!(
            "Carillon ready: {} songs, instrument {}",
            parts.catalog.len(),
            executor.gate().instrument_name()
        );

        Ok(Self {
            chain,
            executor,
            striker,
            silent_days,
            rules,
            calendar: parts.calendar,
            catalog: Arc::new(parts.catalog),
            clock: parts.clock,
            quarter_clock: Mutex::new(None),
        })
    }

    /// Start ticking. A second call is a no-op.
    pub fn start_clock(&self) -> Result<(), DaemonError> {
        let mut slot = self.quarter_clock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Quarter clock already running");
            return Ok(());
        }
        *slot = Some(QuarterClock::start(
            Arc::clone(&self.clock),
            Arc::clone(&self.chain),
        )?);
        Ok(())
    }

    pub fn stop_clock(&self) {
        if let Some(mut clock) = self
            .quarter_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            clock.stop();
        }
    }

    pub fn chain(&self) -> &Arc<NotificationChain> {
        &self.chain
    }

    pub fn executor(&self) -> &Arc<RingExecutor> {
        &self.executor
    }

    pub fn catalog(&self) -> &Arc<SongCatalog> {
        &self.catalog
    }

    pub fn silent_days(&self) -> &Arc<SilentDays> {
        &self.silent_days
    }

    pub fn last_ring(&self) -> Option<LastRing> {
        self.striker.last_ring()
    }

    /// What the tower would ring at `at`, without ringing it.
    pub fn preview(&self, at: NaiveDateTime) -> Result<PlanPreview, RuleError> {
        let tick = Tick::at(at);
        let date = at.date();
        let facts = self.calendar.facts_for(date);
        let silent_day = self.silent_days.contains(date);

        let plan = if silent_day {
            RingPlan::silent()
        } else {
            self.rules.decide(tick, &facts, date)?
        };

        Ok(PlanPreview {
            tick,
            date,
            facts,
            silent_day,
            plan: plan.to_string(),
            actions: plan.action_count(),
        })
    }

    /// Play a song now, cutting off any automatic ring. Blocks until done.
    pub fn play(&self, song: &Song) -> Result<(), InstrumentError> {
        self.executor.play_exclusive(song)
    }

    pub fn health(&self) -> HealthReport {
        let gate = self.executor.gate();
        let (clock_running, cycles, failed_cycles, skipped_boundaries) = match self
            .quarter_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(clock) => {
                let stats = clock.stats();
                (
                    clock.is_running(),
                    stats.cycles.load(Ordering::Relaxed),
                    stats.failures.load(Ordering::Relaxed),
                    stats.skipped.load(Ordering::Relaxed),
                )
            }
            None => (false, 0, 0, 0),
        };

        HealthReport {
            instrument: gate.instrument_name().to_string(),
            muted: gate.is_muted(),
            clock_running,
            cycles,
            failed_cycles,
            skipped_boundaries,
            strikes: gate.instrument_strikes(),
            songs: self.catalog.len(),
            last_ring: self.last_ring(),
        }
    }
}

impl Drop for CarillonDaemon {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedCalendar;
    use crate::calendar::{Rank, Season};
    use crate::song::MelodyEvent;
    use std::path::PathBuf;
    use std::time::Duration;

    struct StillClock(NaiveDateTime);

    impl WallClock for StillClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
        fn sleep(&self, duration: Duration) {
            std::thread::sleep(duration);
        }
    }

    struct NoPause;

    impl Pacer for NoPause {
        fn pause(&self, _duration: Duration) {}
    }

    fn song(title: &str) -> Song {
        Song {
            title: title.to_string(),
            number: None,
            path: PathBuf::from(format!("{}.mid", title)),
            events: vec![MelodyEvent {
                note: 60,
                velocity: 80,
                delay: Duration::ZERO,
            }],
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn daemon(config: &CarillonConfig) -> Result<CarillonDaemon, DaemonError> {
        let catalog = SongCatalog::from_songs(vec![
            song("Lourdes Lied"),
            song("Salve Regina"),
            song("Alma Redemptoris Mater"),
            song("Ave Regina caelorum"),
            song("Regina caeli laetare"),
        ]);
        CarillonDaemon::build(
            config,
            DaemonParts {
                instrument: Arc::new(DryRunInstrument::new(NoteRange::default())),
                catalog,
                calendar: Arc::new(FixedCalendar(CalendarFacts {
                    rank: Rank::Ferial,
                    season: Season::Ordinary,
                    easter: NaiveDate::from_ymd_opt(2026, 4, 5).unwrap(),
                    title: None,
                })),
                clock: Arc::new(StillClock(at(2026, 10, 14, 10, 3))),
                pacer: Arc::new(NoPause),
            },
        )
    }

    #[test]
    fn test_build_registers_observers() {
        let daemon = daemon(&CarillonConfig::default()).unwrap();
        assert_eq!(daemon.chain().priorities(), vec![SILENT_DAYS_PRIORITY, SILENT_DAYS_PRIORITY - 1]);
        assert_eq!(daemon.catalog().len(), 5);
    }

    #[test]
    fn test_build_fails_on_missing_melody() {
        let mut config = CarillonConfig::default();
        config.bootstrap.melodies.noon = "Großer Gott".to_string();
        assert!(matches!(daemon(&config), Err(DaemonError::Rule(_))));
    }

    #[test]
    fn test_preview() {
        let mut config = CarillonConfig::default();
        config.bootstrap.silence.dates.push("2026-12-24".to_string());
        let daemon = daemon(&config).unwrap();

        let noon = daemon.preview(at(2026, 10, 14, 12, 0)).unwrap();
        assert_eq!(noon.plan, "chime(4, plain) strike(12) melody(Lourdes Lied)");
        assert_eq!(noon.actions, 4 + 12 + 1);
        assert!(!noon.silent_day);

        let silent = daemon.preview(at(2026, 12, 24, 12, 0)).unwrap();
        assert!(silent.silent_day);
        assert_eq!(silent.plan, "silence");
        assert_eq!(silent.actions, 0);
    }

    #[test]
    fn test_health_before_start() {
        let daemon = daemon(&CarillonConfig::default()).unwrap();
        let health = daemon.health();
        assert_eq!(health.instrument, "dry-run");
        assert!(!health.clock_running);
        assert_eq!(health.skipped_boundaries, 0);
        assert_eq!(health.strikes, 0);
        assert!(!health.muted);
        assert!(health.last_ring.is_none());
    }

    #[test]
    fn test_open_calendar_rejects_bad_celebrations() {
        let mut config = CarillonConfig::default();
        config.bootstrap.calendar.celebrations.push(carillonconf::CelebrationConfig {
            date: "13-40".to_string(),
            rank: "feast".to_string(),
            title: String::new(),
        });
        for source in [CalendarSource::Computed, CalendarSource::Direktorium] {
            config.bootstrap.calendar.source = source;
            assert!(matches!(open_calendar(&config), Err(CalendarError::InvalidDate(_))));
        }
    }

    #[test]
    fn test_open_computed_calendar() {
        let mut config = CarillonConfig::default();
        config.bootstrap.calendar.source = CalendarSource::Computed;
        let calendar = open_calendar(&config).unwrap();
        let facts = calendar.facts_for(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert_eq!(facts.rank, Rank::Memorial);
    }

    #[test]
    fn test_start_and_stop_clock() {
        let daemon = daemon(&CarillonConfig::default()).unwrap();
        daemon.start_clock().unwrap();
        daemon.start_clock().unwrap();
        assert!(daemon.health().clock_running);
        daemon.stop_clock();
        assert!(!daemon.health().clock_running);
    }
}
