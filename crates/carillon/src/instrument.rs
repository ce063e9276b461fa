//! Bell instrument drivers
//!
//! The carillon console (or GrandOrgue standing in for it) is reached over
//! MIDI through midir. A hit is a note-on immediately followed by its
//! note-off, sent under one lock so two hits never interleave.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use midir::{MidiOutput, MidiOutputConnection};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::song::MelodyEvent;

/// Velocity used for every strike. The console ignores dynamics.
pub const STRIKE_VELOCITY: u8 = 64;

/// Error type for instrument operations
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("Note {note} outside the instrument range {range}")]
    UnsupportedNote { note: u8, range: NoteRange },

    #[error("Failed to initialize MIDI: {0}")]
    InitFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Inclusive range of notes the instrument has bells for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoteRange {
    pub low: u8,
    pub high: u8,
}

impl NoteRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, note: u8) -> bool {
        (self.low..=self.high).contains(&note)
    }

    pub fn check(&self, note: u8) -> Result<(), InstrumentError> {
        if self.contains(note) {
            Ok(())
        } else {
            Err(InstrumentError::UnsupportedNote { note, range: *self })
        }
    }
}

impl Default for NoteRange {
    fn default() -> Self {
        Self::new(34, 89)
    }
}

impl fmt::Display for NoteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.low, self.high)
    }
}

/// Blocking wait between ring actions. Injected so tests can assert pauses
/// without sleeping through them.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Real-time pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// A bell instrument.
///
/// Calls are synchronous and never queue; the caller serializes access
/// through the playback gate.
pub trait Instrument: Send + Sync {
    /// Strike one bell: note-on followed by note-off.
    fn hit(&self, note: u8) -> Result<(), InstrumentError>;

    /// Play a flattened event sequence, waiting each event's delay first.
    /// Note-off events only advance time, since a hit already releases.
    /// Notes outside the range are skipped with a warning.
    fn play(&self, events: &[MelodyEvent], pacer: &dyn Pacer) -> Result<(), InstrumentError> {
        for event in events {
            pacer.pause(event.delay);
            if !event.is_strike() {
                continue;
            }
            match self.hit(event.note) {
                Ok(()) => {}
                Err(e @ InstrumentError::UnsupportedNote { .. }) => warn!("{}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str;

    /// Bells struck since the instrument was opened.
    fn strikes(&self) -> u64;
}

/// Information about a discovered MIDI output port
#[derive(Debug, Clone, Serialize)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// List available MIDI output ports
pub fn list_output_ports(client_name: &str) -> Result<Vec<MidiPortInfo>, InstrumentError> {
    let midi_out =
        MidiOutput::new(client_name).map_err(|e| InstrumentError::InitFailed(e.to_string()))?;

    let ports = midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index: i, name })
        })
        .collect();

    Ok(ports)
}

/// The carillon behind a MIDI output port.
pub struct MidiCarillon {
    connection: Mutex<Option<MidiOutputConnection>>,
    port_name: String,
    range: NoteRange,
    strikes: AtomicU64,
}

impl MidiCarillon {
    /// Open the first output port whose name contains `port_pattern`.
    /// An empty pattern takes the first port.
    pub fn open(
        port_pattern: &str,
        client_name: &str,
        range: NoteRange,
    ) -> Result<Self, InstrumentError> {
        let midi_out =
            MidiOutput::new(client_name).map_err(|e| InstrumentError::InitFailed(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| n.contains(port_pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| InstrumentError::PortNotFound(port_pattern.to_string()))?;

        let port_name = midi_out
            .port_name(port)
            .map_err(|e| InstrumentError::ConnectionFailed(e.to_string()))?;

        let connection = midi_out
            .connect(port, &format!("{}-bells", client_name))
            .map_err(|e| InstrumentError::ConnectionFailed(e.to_string()))?;

        info!("Opened MIDI output: {} (notes {})", port_name, range);

        Ok(Self {
            connection: Mutex::new(Some(connection)),
            port_name,
            range,
            strikes: AtomicU64::new(0),
        })
    }

    pub fn close(&self) {
        let mut guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = guard.take() {
            conn.close();
            info!(
                "Closed MIDI output: {} after {} strikes",
                self.port_name,
                self.strikes()
            );
        }
    }
}

impl Instrument for MidiCarillon {
    fn hit(&self, note: u8) -> Result<(), InstrumentError> {
        self.range.check(note)?;

        let mut guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_mut()
            .ok_or_else(|| InstrumentError::SendFailed("Connection closed".to_string()))?;

        conn.send(&[0x90, note, STRIKE_VELOCITY])
            .map_err(|e| InstrumentError::SendFailed(e.to_string()))?;
        conn.send(&[0x80, note, 0])
            .map_err(|e| InstrumentError::SendFailed(e.to_string()))?;

        self.strikes.fetch_add(1, Ordering::Relaxed);
        debug!("Hit note {}", note);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.port_name
    }

    fn strikes(&self) -> u64 {
        self.strikes.load(Ordering::Relaxed)
    }
}

impl Drop for MidiCarillon {
    fn drop(&mut self) {
        self.close();
    }
}

/// How many hits a dry-run instrument remembers.
const DRY_RUN_HISTORY: usize = 256;

/// Logs strikes instead of sending them. Used without MIDI hardware.
pub struct DryRunInstrument {
    range: NoteRange,
    recent: Mutex<VecDeque<u8>>,
    hits: AtomicU64,
}

impl DryRunInstrument {
    pub fn new(range: NoteRange) -> Self {
        Self {
            range,
            recent: Mutex::new(VecDeque::with_capacity(DRY_RUN_HISTORY)),
            hits: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Most recent notes struck, oldest first.
    pub fn recent(&self) -> Vec<u8> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl Instrument for DryRunInstrument {
    fn hit(&self, note: u8) -> Result<(), InstrumentError> {
        self.range.check(note)?;

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == DRY_RUN_HISTORY {
            recent.pop_front();
        }
        recent.push_back(note);
        self.hits.fetch_add(1, Ordering::Relaxed);

        info!("(dry run) hit note {}", note);
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }

    fn strikes(&self) -> u64 {
        self.hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingPacer {
        pauses: Mutex<Vec<Duration>>,
    }

    impl Pacer for CountingPacer {
        fn pause(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
        }
    }

    fn event(note: u8, velocity: u8, delay_ms: u64) -> MelodyEvent {
        MelodyEvent {
            note,
            velocity,
            delay: Duration::from_millis(delay_ms),
        }
    }

    #[test]
    fn test_note_range() {
        let range = NoteRange::default();
        assert!(range.contains(34));
        assert!(range.contains(89));
        assert!(!range.contains(33));
        assert!(!range.contains(90));
        assert!(matches!(
            range.check(90),
            Err(InstrumentError::UnsupportedNote { note: 90, .. })
        ));
    }

    #[test]
    fn test_dry_run_rejects_out_of_range() {
        let instrument = DryRunInstrument::new(NoteRange::default());
        instrument.hit(0x2E).unwrap();
        assert!(instrument.hit(20).is_err());
        assert_eq!(instrument.recent(), vec![0x2E]);
        assert_eq!(instrument.hits(), 1);
    }

    #[test]
    fn test_dry_run_history_is_bounded() {
        let instrument = DryRunInstrument::new(NoteRange::default());
        for _ in 0..DRY_RUN_HISTORY + 10 {
            instrument.hit(40).unwrap();
        }
        instrument.hit(41).unwrap();
        let recent = instrument.recent();
        assert_eq!(recent.len(), DRY_RUN_HISTORY);
        assert_eq!(recent.last(), Some(&41));
    }

    #[test]
    fn test_play_waits_every_delay_and_strikes_note_ons() {
        let instrument = DryRunInstrument::new(NoteRange::default());
        let pacer = CountingPacer::default();
        let events = vec![
            event(60, 90, 0),
            event(60, 0, 250),
            event(95, 70, 5),
            event(62, 80, 10),
        ];

        instrument.play(&events, &pacer).unwrap();

        // 95 is out of range and skipped, the melody carries on
        assert_eq!(instrument.recent(), vec![60, 62]);
        assert_eq!(
            *pacer.pauses.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(5),
                Duration::from_millis(10)
            ]
        );
    }
}
