//! Tick observers: the default striker and the silent-day override

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use carillonconf::SilenceConfig;

use crate::calendar::{CalendarError, CalendarProvider};
use crate::chain::Observer;
use crate::clock::WallClock;
use crate::executor::{RingExecutor, RingOutcome};
use crate::rules::RuleEngine;
use crate::tick::Tick;

/// Record of the most recent automatic ring
#[derive(Debug, Clone, Serialize)]
pub struct LastRing {
    pub tick: Tick,
    pub at: NaiveDateTime,
    pub plan: String,
    #[serde(flatten)]
    pub outcome: RingOutcome,
}

/// Asks the rules what to ring for each tick and rings it.
pub struct Striker {
    rules: Arc<RuleEngine>,
    calendar: Arc<dyn CalendarProvider>,
    clock: Arc<dyn WallClock>,
    executor: Arc<RingExecutor>,
    last: Mutex<Option<LastRing>>,
}

impl Striker {
    pub fn new(
        rules: Arc<RuleEngine>,
        calendar: Arc<dyn CalendarProvider>,
        clock: Arc<dyn WallClock>,
        executor: Arc<RingExecutor>,
    ) -> Self {
        Self {
            rules,
            calendar,
            clock,
            executor,
            last: Mutex::new(None),
        }
    }

    pub fn last_ring(&self) -> Option<LastRing> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Observer for Striker {
    fn on_tick(&self, tick: Tick) -> anyhow::Result<bool> {
        let today = self.clock.today();
        // One lookup per tick; every rule sees the same facts
        let facts = self.calendar.facts_for(today);

        let plan = self
            .rules
            .decide(tick, &facts, today)
            .with_context(|| format!("No ring plan for {} on {}", tick, today))?;

        if plan.is_silent() {
            debug!("{}: silent", tick);
            return Ok(true);
        }

        info!("{} ({} in {}): {}", tick, facts.rank, facts.season, plan);
        let outcome = self.executor.execute(&plan);

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastRing {
            tick,
            at: self.clock.now(),
            plan: plan.to_string(),
            outcome,
        });
        Ok(true)
    }

    fn name(&self) -> &str {
        "striker"
    }
}

/// Keeps the tower silent on listed dates by halting the chain.
pub struct SilentDays {
    dates: RwLock<BTreeSet<NaiveDate>>,
    clock: Arc<dyn WallClock>,
}

impl SilentDays {
    pub fn new(clock: Arc<dyn WallClock>) -> Self {
        Self {
            dates: RwLock::new(BTreeSet::new()),
            clock,
        }
    }

    pub fn from_config(config: &SilenceConfig, clock: Arc<dyn WallClock>) -> Result<Self, CalendarError> {
        let silent = Self::new(clock);
        for date in &config.dates {
            let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .map_err(|_| CalendarError::InvalidDate(date.clone()))?;
            silent.insert(parsed);
        }
        Ok(silent)
    }

    /// Returns false if the date was already silent.
    pub fn insert(&self, date: NaiveDate) -> bool {
        self.dates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(date)
    }

    /// Returns false if the date was not silent.
    pub fn remove(&self, date: NaiveDate) -> bool {
        self.dates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&date)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.dates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl Observer for SilentDays {
    fn on_tick(&self, tick: Tick) -> anyhow::Result<bool> {
        let today = self.clock.today();
        if self.contains(today) {
            info!("{} on {}: silent day, holding the bells", tick, today);
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "silent-days"
    }
}
