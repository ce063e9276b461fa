//! Quarter-hour tick source
//!
//! Owns a named background thread that waits for the next :00/:15/:30/:45
//! boundary on the wall clock and dispatches the notification chain. Each
//! wait is computed from the absolute boundary, so a long cycle skips the
//! boundaries it overran instead of firing them late. The same holds for a
//! wake-up far past its boundary (suspend, clock step): that boundary is
//! dropped and the loop waits for the next one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tracing::{debug, error, info, warn};

use crate::chain::{DispatchReport, NotificationChain};
use crate::tick::{next_boundary, Tick, QUARTER_SECS};

/// Longest single wait, so `stop` is observed promptly.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How far past its boundary a tick may still fire, in seconds.
pub const MAX_LATENESS_SECS: i64 = 120;

/// Source of wall-clock time. Injected so tests can run on virtual time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn sleep(&self, duration: Duration);

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local time of the machine running the tower.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// One notification cycle that did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CycleFailure {
    #[error("Cycle at {tick} failed: {error:#}")]
    Observer { tick: Tick, error: anyhow::Error },

    #[error("Cycle at {tick} panicked: {message}")]
    Panicked { tick: Tick, message: String },
}

/// Error type for starting the tick source
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("Thread spawn failed: {0}")]
    ThreadFailed(#[from] std::io::Error),
}

/// Dispatch one tick, turning errors and panics into a `CycleFailure`.
pub fn run_cycle(chain: &NotificationChain, tick: Tick) -> Result<DispatchReport, CycleFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| chain.dispatch(tick))) {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(error)) => Err(CycleFailure::Observer { tick, error }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(CycleFailure::Panicked { tick, message })
        }
    }
}

/// Counters exposed for health reporting
#[derive(Debug, Default)]
pub struct ClockStats {
    pub cycles: AtomicU64,
    pub failures: AtomicU64,
    pub skipped: AtomicU64,
}

/// Handle to the running tick source. Dropping it stops the thread.
pub struct QuarterClock {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<ClockStats>,
}

impl QuarterClock {
    /// Spawn the tick thread. The first tick fires at the next boundary.
    pub fn start(
        clock: Arc<dyn WallClock>,
        chain: Arc<NotificationChain>,
    ) -> Result<Self, ClockError> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ClockStats::default());

        let running_clone = Arc::clone(&running);
        let stats_clone = Arc::clone(&stats);

        let thread_handle = thread::Builder::new()
            .name("carillon-quarter-clock".to_string())
            .spawn(move || run_clock_loop(clock, chain, running_clone, stats_clone))?;

        info!("Started quarter clock");

        Ok(Self {
            running,
            thread_handle: Some(thread_handle),
            stats,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<ClockStats> {
        &self.stats
    }

    /// Stop the thread and wait for it. A ring in progress finishes first.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Quarter clock thread panicked");
            }
            info!("Stopped quarter clock");
        }
    }
}

impl Drop for QuarterClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_clock_loop(
    clock: Arc<dyn WallClock>,
    chain: Arc<NotificationChain>,
    running: Arc<AtomicBool>,
    stats: Arc<ClockStats>,
) {
    let mut boundary = next_boundary(clock.now());
    debug!("First boundary at {}", boundary);

    while running.load(Ordering::SeqCst) {
        let now = clock.now();
        if now < boundary {
            let remaining = (boundary - now).to_std().unwrap_or(Duration::ZERO);
            clock.sleep(remaining.min(POLL_INTERVAL));
            continue;
        }

        let late = (now - boundary).num_seconds();
        if late > MAX_LATENESS_SECS {
            let missed = late / QUARTER_SECS + 1;
            stats.skipped.fetch_add(missed as u64, Ordering::Relaxed);
            warn!(
                "Woke {}s after the {} boundary, skipping {} boundaries",
                late,
                boundary.format("%H:%M"),
                missed
            );
            boundary = next_boundary(now);
            continue;
        }

        let tick = Tick::at(now);
        info!("Tick {} (fired at {})", tick, now.format("%H:%M:%S"));
        stats.cycles.fetch_add(1, Ordering::Relaxed);

        match run_cycle(&chain, tick) {
            Ok(report) => debug!(
                "Cycle {} ran {} observers, halted by {:?}",
                tick, report.invoked, report.halted_by
            ),
            Err(failure) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                error!("{}", failure);
            }
        }

        let next = next_boundary(clock.now());
        let skipped = (next - boundary).num_seconds() / QUARTER_SECS - 1;
        if skipped > 0 {
            stats.skipped.fetch_add(skipped as u64, Ordering::Relaxed);
            warn!("Cycle at {} overran, skipping {} boundaries", tick, skipped);
        }
        boundary = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Observer;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Virtual clock: every sleep advances one minute regardless of the
    /// requested duration, except an optional first oversleep.
    struct FakeClock {
        now: Mutex<NaiveDateTime>,
        first_sleep: Mutex<Option<chrono::Duration>>,
    }

    impl FakeClock {
        fn at(h: u32, m: u32, s: u32) -> Arc<Self> {
            Self::oversleeping(h, m, s, None)
        }

        fn oversleeping(h: u32, m: u32, s: u32, first: Option<chrono::Duration>) -> Arc<Self> {
            let start = NaiveDate::from_ymd_opt(2026, 10, 14)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap();
            Arc::new(Self {
                now: Mutex::new(start),
                first_sleep: Mutex::new(first),
            })
        }

        fn advance(&self, by: chrono::Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl WallClock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, _duration: Duration) {
            let by = self
                .first_sleep
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| chrono::Duration::minutes(1));
            self.advance(by);
            thread::sleep(Duration::from_micros(200));
        }
    }

    struct Recorder {
        ticks: Mutex<Vec<Tick>>,
        clock: Arc<FakeClock>,
        panic_first: bool,
        overrun_first: Option<chrono::Duration>,
    }

    impl Recorder {
        fn new(clock: &Arc<FakeClock>) -> Self {
            Self {
                ticks: Mutex::new(Vec::new()),
                clock: Arc::clone(clock),
                panic_first: false,
                overrun_first: None,
            }
        }

        fn ticks(&self) -> Vec<Tick> {
            self.ticks.lock().unwrap().clone()
        }
    }

    impl Observer for Recorder {
        fn on_tick(&self, tick: Tick) -> anyhow::Result<bool> {
            let first = {
                let mut ticks = self.ticks.lock().unwrap();
                ticks.push(tick);
                ticks.len() == 1
            };
            if first {
                if let Some(by) = self.overrun_first {
                    self.clock.advance(by);
                }
                if self.panic_first {
                    panic!("clapper fell off");
                }
            }
            Ok(true)
        }
    }

    fn wait_for(recorder: &Recorder, count: usize) -> Vec<Tick> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while recorder.ticks().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        recorder.ticks()
    }

    fn run_until(
        recorder: Arc<Recorder>,
        clock: Arc<FakeClock>,
        count: usize,
    ) -> (Vec<Tick>, Arc<ClockStats>) {
        let chain = Arc::new(NotificationChain::new());
        chain.attach(Arc::clone(&recorder) as Arc<dyn Observer>, None).unwrap();

        let mut quarter_clock = QuarterClock::start(clock, chain).unwrap();
        let ticks = wait_for(&recorder, count);
        quarter_clock.stop();
        (ticks, Arc::clone(quarter_clock.stats()))
    }

    #[test]
    fn test_fires_on_quarter_boundaries() {
        let clock = FakeClock::at(13, 52, 45);
        let recorder = Arc::new(Recorder::new(&clock));

        let (ticks, _) = run_until(Arc::clone(&recorder), clock, 3);

        assert_eq!(
            ticks[..3],
            [
                Tick::new(14, 0).unwrap(),
                Tick::new(14, 1).unwrap(),
                Tick::new(14, 2).unwrap(),
            ]
        );
    }

    #[test]
    fn test_panicking_cycle_does_not_stop_clock() {
        let clock = FakeClock::at(9, 58, 0);
        let mut recorder = Recorder::new(&clock);
        recorder.panic_first = true;
        let recorder = Arc::new(recorder);

        let (ticks, stats) = run_until(Arc::clone(&recorder), clock, 2);

        assert_eq!(ticks[..2], [Tick::new(10, 0).unwrap(), Tick::new(10, 1).unwrap()]);
        assert!(stats.failures.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_overrun_skips_missed_boundaries() {
        let clock = FakeClock::at(13, 52, 45);
        let mut recorder = Recorder::new(&clock);
        recorder.overrun_first = Some(chrono::Duration::minutes(40));
        let recorder = Arc::new(recorder);

        let (ticks, _) = run_until(Arc::clone(&recorder), clock, 2);

        // 14:15 and 14:30 passed during the first cycle and are not replayed
        assert_eq!(ticks[..2], [Tick::new(14, 0).unwrap(), Tick::new(14, 3).unwrap()]);
    }

    #[test]
    fn test_late_wake_drops_the_boundary() {
        // Asleep from 09:59 until 10:09, well past the 10:00 boundary
        let clock = FakeClock::oversleeping(9, 59, 0, Some(chrono::Duration::minutes(10)));
        let recorder = Arc::new(Recorder::new(&clock));

        let (ticks, stats) = run_until(Arc::clone(&recorder), clock, 2);

        // 10:00 is neither rung late nor replayed as the 10:15 tick
        assert_eq!(ticks[..2], [Tick::new(10, 1).unwrap(), Tick::new(10, 2).unwrap()]);
        let mut distinct = ticks.clone();
        distinct.dedup();
        assert_eq!(distinct, ticks);
        assert!(stats.skipped.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_slightly_late_wake_still_fires() {
        let clock = FakeClock::oversleeping(9, 59, 0, Some(chrono::Duration::seconds(150)));
        let recorder = Arc::new(Recorder::new(&clock));

        let (ticks, stats) = run_until(Arc::clone(&recorder), clock, 1);

        assert_eq!(ticks[0], Tick::new(10, 0).unwrap());
        assert_eq!(stats.skipped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_run_cycle_reports_observer_error() {
        struct Broken;
        impl Observer for Broken {
            fn on_tick(&self, _tick: Tick) -> anyhow::Result<bool> {
                anyhow::bail!("no bells")
            }
        }

        let chain = NotificationChain::new();
        chain.attach(Arc::new(Broken), None).unwrap();

        let failure = run_cycle(&chain, Tick::new(11, 2).unwrap()).unwrap_err();
        assert!(matches!(failure, CycleFailure::Observer { .. }));
        assert!(failure.to_string().contains("11:30"));
    }

    #[test]
    fn test_stop_is_prompt_between_boundaries() {
        struct IdleClock;
        impl WallClock for IdleClock {
            fn now(&self) -> NaiveDateTime {
                NaiveDate::from_ymd_opt(2026, 10, 14)
                    .unwrap()
                    .and_hms_opt(10, 1, 0)
                    .unwrap()
            }
            fn sleep(&self, duration: Duration) {
                thread::sleep(duration);
            }
        }

        let chain = Arc::new(NotificationChain::new());
        let mut quarter_clock = QuarterClock::start(Arc::new(IdleClock), chain).unwrap();
        assert!(quarter_clock.is_running());

        let started = Instant::now();
        quarter_clock.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!quarter_clock.is_running());
    }
}
