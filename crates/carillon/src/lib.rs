//! Carillon: quarter-hour striking for a MIDI carillon
//!
//! A background clock fires once per quarter hour and hands a [`Tick`] to a
//! prioritized chain of observers. The default observer asks the ringing
//! rules for a [`RingPlan`] given the liturgical day, and the executor plays
//! it through the playback gate:
//!
//! - **Tick source** (`clock`): wall-clock sampling with a lookahead offset
//! - **Notification chain** (`chain`): priority-ordered, halt-capable dispatch
//! - **Playback gate** (`gate`): one ring at a time, manual playback preempts
//! - **Ring executor** (`executor`): chimes, hour strikes and melodies
//! - **Rule engine** (`rules`): what to ring for a tick on a given day
//!
//! Calendar facts come from the online Direktorium (`direktorium`) with the
//! offline computus (`calendar`) behind it.

pub mod calendar;
pub mod chain;
pub mod clock;
pub mod daemon;
pub mod direktorium;
pub mod executor;
pub mod gate;
pub mod http;
pub mod instrument;
pub mod plan;
pub mod rules;
pub mod song;
pub mod striker;
pub mod tick;

pub use calendar::{CalendarError, CalendarFacts, CalendarProvider, ComputedCalendar, FixedCalendar, Rank, Season};
pub use chain::{ChainError, DispatchReport, NotificationChain, Observer};
pub use clock::{ClockError, CycleFailure, QuarterClock, SystemClock, WallClock};
pub use daemon::{CarillonDaemon, DaemonError, DaemonParts, HealthReport, PlanPreview};
pub use direktorium::{DirektoriumCalendar, HttpYearSource, YearSource};
pub use executor::{BellSet, RingExecutor, RingOutcome};
pub use gate::{PlaybackGate, RingSession};
pub use instrument::{
    DryRunInstrument, Instrument, InstrumentError, MidiCarillon, NoteRange, Pacer, ThreadPacer,
};
pub use plan::{ChimePattern, RingPlan, RingUnit};
pub use rules::{MelodyBook, RuleEngine, RuleError};
pub use song::{CatalogError, MelodyEvent, Song, SongCatalog, SongSummary};
pub use striker::{LastRing, SilentDays, Striker};
pub use tick::Tick;
