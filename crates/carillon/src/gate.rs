//! Playback gate: one body drives the instrument at a time
//!
//! Automatic ringing enters through [`PlaybackGate::ring`] and polls
//! [`RingSession::is_muted`] between atomic actions. Manual playback enters
//! through [`PlaybackGate::run_exclusive`], which raises the mute *before*
//! waiting for the instrument so an in-flight ring stops at its next action
//! instead of finishing first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::instrument::Instrument;

/// Shared instrument access with cooperative preemption.
pub struct PlaybackGate {
    instrument: Arc<dyn Instrument>,
    lock: Mutex<()>,
    /// Number of exclusive sections requested or running.
    mutes: AtomicUsize,
}

/// Holds one mute request for the lifetime of an exclusive section.
/// Dropping restores the count even if the section panics.
struct MuteGuard<'a> {
    mutes: &'a AtomicUsize,
}

impl<'a> MuteGuard<'a> {
    fn raise(mutes: &'a AtomicUsize) -> Self {
        mutes.fetch_add(1, Ordering::SeqCst);
        Self { mutes }
    }
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        self.mutes.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handed to an automatic ring while it holds the instrument.
pub struct RingSession<'a> {
    gate: &'a PlaybackGate,
}

impl RingSession<'_> {
    /// True once any exclusive section has been requested. The ring must
    /// stop before its next action.
    pub fn is_muted(&self) -> bool {
        self.gate.is_muted()
    }

    pub fn instrument(&self) -> &dyn Instrument {
        self.gate.instrument.as_ref()
    }
}

impl PlaybackGate {
    pub fn new(instrument: Arc<dyn Instrument>) -> Self {
        Self {
            instrument,
            lock: Mutex::new(()),
            mutes: AtomicUsize::new(0),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.mutes.load(Ordering::SeqCst) > 0
    }

    /// Exclusive sections requested or running right now.
    pub fn pending_exclusive(&self) -> usize {
        self.mutes.load(Ordering::SeqCst)
    }

    pub fn instrument_name(&self) -> &str {
        self.instrument.name()
    }

    pub fn instrument_strikes(&self) -> u64 {
        self.instrument.strikes()
    }

    /// Run `action` with sole use of the instrument, preempting any
    /// automatic ring in progress.
    ///
    /// The mute is visible as soon as this is called. It is lowered again
    /// before the instrument is released, so a ring queued behind this
    /// section starts unmuted. Concurrent sections each hold their own mute,
    /// and the gate stays muted until the last of them finishes.
    pub fn run_exclusive<R>(&self, action: impl FnOnce(&dyn Instrument) -> R) -> R {
        let mute = MuteGuard::raise(&self.mutes);
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Exclusive playback on {}", self.instrument.name());

        let result = action(self.instrument.as_ref());

        drop(mute);
        drop(lock);
        result
    }

    /// Run an automatic ring. Blocks while another body holds the
    /// instrument; never touches the mute.
    pub fn ring<R>(&self, action: impl FnOnce(&RingSession<'_>) -> R) -> R {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let session = RingSession { gate: self };
        action(&session)
    }
}
