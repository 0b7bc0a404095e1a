//! Interval timer registry
//!
//! A `Stopwatch` holds sections of named, categorized timers. Each timer
//! (`StopwatchEvent`) can be started several times, nested (re-entrant) or
//! lapped; every stop closes a `StopwatchPeriod` carrying its start, end and
//! the memory usage observed at that point.
//!
//! All times are milliseconds. A section's origin is measured from the
//! stopwatch epoch, period times are measured from their event's origin.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Pid, ProcessExt, System, SystemExt};

use crate::error::{InspectorError, Result};

/// Id of the section that always exists
pub const ROOT_SECTION: &str = "__root__";

/// Category assigned when none is given
pub const DEFAULT_CATEGORY: &str = "default";

/// Time and memory source for the stopwatch
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds elapsed since the clock epoch
    fn now_ms(&self) -> f64;

    /// Current memory usage of the process in bytes
    fn memory_bytes(&self) -> u64;
}

/// Monotonic clock backed by `Instant`, epoch at construction. Memory is the
/// resident set size of the current process as reported by `sysinfo`.
pub struct SystemClock {
    epoch: Instant,
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock")
            .field("epoch", &self.epoch)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    fn memory_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };

        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|process| process.memory()).unwrap_or(0)
    }
}

/// One closed interval of a timer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopwatchPeriod {
    start: f64,
    end: f64,
    memory: u64,
}

impl StopwatchPeriod {
    pub fn new(start: f64, end: f64, memory: u64) -> Self {
        Self { start, end, memory }
    }

    pub fn start_time(&self) -> f64 {
        self.start
    }

    pub fn end_time(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }
}

/// A named timer inside a section
#[derive(Debug, Clone)]
pub struct StopwatchEvent {
    clock: Arc<dyn Clock>,
    category: String,
    origin: f64,
    /// Start times of the intervals currently running, innermost last
    started: Vec<f64>,
    periods: Vec<StopwatchPeriod>,
}

impl StopwatchEvent {
    fn new(clock: Arc<dyn Clock>, origin: f64, category: &str) -> Self {
        Self {
            clock,
            category: category.to_string(),
            origin,
            started: Vec::new(),
            periods: Vec::new(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Start a new interval; intervals nest when the timer is already running
    pub fn start(&mut self) -> &mut Self {
        let now = self.now();
        self.started.push(now);
        self
    }

    /// Close the innermost running interval
    pub fn stop(&mut self, name: &str) -> Result<&mut Self> {
        let start = self
            .started
            .pop()
            .ok_or_else(|| InspectorError::TimerNotStarted(name.to_string()))?;
        let end = self.now();
        self.periods
            .push(StopwatchPeriod::new(start, end, self.clock.memory_bytes()));
        Ok(self)
    }

    /// Close the current interval and immediately open the next one
    pub fn lap(&mut self, name: &str) -> Result<&mut Self> {
        self.stop(name)?;
        Ok(self.start())
    }

    /// Close every running interval
    pub fn ensure_stopped(&mut self, name: &str) -> Result<()> {
        while !self.started.is_empty() {
            self.stop(name)?;
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        !self.started.is_empty()
    }

    pub fn periods(&self) -> &[StopwatchPeriod] {
        &self.periods
    }

    /// Start of the first period, or of the first running interval
    pub fn start_time(&self) -> f64 {
        if let Some(first) = self.periods.first() {
            return first.start_time();
        }
        self.started.first().copied().unwrap_or(0.0)
    }

    pub fn end_time(&self) -> f64 {
        self.periods.last().map(|p| p.end_time()).unwrap_or(0.0)
    }

    /// Total time of all periods, running intervals counted up to now
    pub fn duration(&self) -> f64 {
        let closed: f64 = self.periods.iter().map(|p| p.duration()).sum();
        if self.started.is_empty() {
            return closed;
        }

        let now = self.now();
        closed + self.started.iter().map(|start| now - start).sum::<f64>()
    }

    /// Highest memory usage seen across periods
    pub fn memory(&self) -> u64 {
        self.periods.iter().map(|p| p.memory()).max().unwrap_or(0)
    }

    fn now(&self) -> f64 {
        self.clock.now_ms() - self.origin
    }
}

/// A group of timers sharing an origin
#[derive(Debug, Clone)]
pub struct Section {
    id: Option<String>,
    origin: f64,
    events: IndexMap<String, StopwatchEvent>,
}

impl Section {
    fn new(id: Option<String>, origin: f64) -> Self {
        Self {
            id,
            origin,
            events: IndexMap::new(),
        }
    }

    /// Section id; anonymous sections only get one when they are stopped
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Timers in the order they were first started
    pub fn events(&self) -> impl Iterator<Item = (&str, &StopwatchEvent)> {
        self.events.iter().map(|(name, event)| (name.as_str(), event))
    }

    pub fn event(&self, name: &str) -> Option<&StopwatchEvent> {
        self.events.get(name)
    }
}

/// Timer registry for one request
#[derive(Debug, Clone)]
pub struct Stopwatch {
    clock: Arc<dyn Clock>,
    /// Every section ever opened, in opening order; index 0 is the root
    sections: Vec<Section>,
    /// Indices into `sections`, innermost last
    active: Vec<usize>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let root = Section::new(Some(ROOT_SECTION.to_string()), clock.now_ms());
        Self {
            clock,
            sections: vec![root],
            active: vec![0],
        }
    }

    /// Open a child section, or re-open the stopped section with that id
    pub fn open_section(&mut self, id: Option<&str>) {
        let existing = id.and_then(|id| {
            self.sections
                .iter()
                .position(|section| section.id() == Some(id))
        });

        let index = match existing {
            Some(index) => index,
            None => {
                let section = Section::new(id.map(str::to_string), self.clock.now_ms());
                self.sections.push(section);
                self.sections.len() - 1
            }
        };

        tracing::trace!(section = ?id, "Opened stopwatch section");
        self.active.push(index);
    }

    /// Close the innermost section and name it `id`
    pub fn stop_section(&mut self, id: &str) -> Result<()> {
        if self.active.len() <= 1 {
            return Err(InspectorError::NoStartedSection);
        }

        if let Some(index) = self.active.pop() {
            self.sections[index].id = Some(id.to_string());
        }
        Ok(())
    }

    /// Start (or re-enter) a timer in the current section
    pub fn start(&mut self, name: &str, category: Option<&str>) -> &mut StopwatchEvent {
        let clock = self.clock.clone();
        let section = self.current_section_mut();
        let origin = section.origin;

        section
            .events
            .entry(name.to_string())
            .or_insert_with(|| {
                StopwatchEvent::new(clock, origin, category.unwrap_or(DEFAULT_CATEGORY))
            })
            .start()
    }

    pub fn stop(&mut self, name: &str) -> Result<&mut StopwatchEvent> {
        self.current_event_mut(name)?.stop(name)
    }

    pub fn lap(&mut self, name: &str) -> Result<&mut StopwatchEvent> {
        self.current_event_mut(name)?.lap(name)
    }

    /// Start and immediately stop a timer, marking an instant on the timeline
    pub fn mark(&mut self, name: &str, category: Option<&str>) -> Result<&mut StopwatchEvent> {
        self.start(name, category).stop(name)
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.current_section()
            .event(name)
            .map(StopwatchEvent::is_started)
            .unwrap_or(false)
    }

    /// Timer in the current section
    pub fn event(&self, name: &str) -> Option<&StopwatchEvent> {
        self.current_section().event(name)
    }

    /// Sections carrying an id, in opening order
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|section| section.id.is_some())
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.id() == Some(id))
    }

    /// Drop all sections and timers, restarting the root at the current time
    pub fn reset(&mut self) {
        *self = Self::with_clock(self.clock.clone());
    }

    fn current_section(&self) -> &Section {
        let index = self.active.last().copied().unwrap_or(0);
        &self.sections[index]
    }

    fn current_section_mut(&mut self) -> &mut Section {
        let index = self.active.last().copied().unwrap_or(0);
        &mut self.sections[index]
    }

    fn current_event_mut(&mut self, name: &str) -> Result<&mut StopwatchEvent> {
        self.current_section_mut()
            .events
            .get_mut(name)
            .ok_or_else(|| InspectorError::TimerNotStarted(name.to_string()))
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
