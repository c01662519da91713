//! Structured event stream.
//!
//! Every grant, block, release, finish, abort, detected cycle and chosen victim
//! is reported as an [`Event`]. The manager emits events while holding its lock,
//! so the order in which a sink receives them is the order of the underlying
//! state transitions.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::types::{Mode, ProcessId};

/// One observable occurrence in a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A request was granted atomically.
    Granted {
        /// Strategy that granted it.
        mode: Mode,
        /// Requesting process.
        pid: ProcessId,
        /// Granted units.
        request: Vec<u32>,
        /// Allocation of `pid` after the grant.
        allocation: Vec<u32>,
        /// Free units after the grant.
        available: Vec<u32>,
    },
    /// A request could not be granted and the caller started waiting.
    Blocked {
        /// Strategy that denied it.
        mode: Mode,
        /// Requesting process.
        pid: ProcessId,
        /// Requested units.
        request: Vec<u32>,
        /// Remaining need of `pid`.
        need: Vec<u32>,
        /// Free units at the time of the denial.
        available: Vec<u32>,
    },
    /// The wait bound of a request elapsed without a grant.
    TimedOut {
        /// Requesting process.
        pid: ProcessId,
        /// Requested units.
        request: Vec<u32>,
    },
    /// A request failed validation; nothing changed.
    Rejected {
        /// Requesting process.
        pid: ProcessId,
        /// Rejected units.
        request: Vec<u32>,
        /// Remaining need of `pid`.
        need: Vec<u32>,
    },
    /// A process voluntarily returned everything it held.
    Released {
        /// Releasing process.
        pid: ProcessId,
        /// Units returned.
        released: Vec<u32>,
        /// Free units after the release.
        available: Vec<u32>,
    },
    /// A process exhausted its need and was marked finished.
    Finished {
        /// Finished process.
        pid: ProcessId,
    },
    /// A process was forcibly terminated and its units reclaimed.
    Aborted {
        /// Victim.
        pid: ProcessId,
        /// Units reclaimed.
        released: Vec<u32>,
        /// Free units after the abort.
        available: Vec<u32>,
    },
    /// The detector found a cycle in the wait-for graph.
    CycleDetected {
        /// Cycle members in path order.
        cycle: Vec<ProcessId>,
    },
    /// The detector picked a victim to break a cycle.
    VictimChosen {
        /// Victim.
        pid: ProcessId,
        /// Victim's total allocation when chosen.
        allocation: u64,
    },
    /// Processes still unfinished at the join deadline are being aborted.
    FinalSweep {
        /// Processes being aborted.
        pids: Vec<ProcessId>,
    },
}

impl Event {
    /// The process this event is about, if it concerns a single one.
    #[must_use]
    pub fn pid(&self) -> Option<ProcessId> {
        match self {
            Self::Granted { pid, .. }
            | Self::Blocked { pid, .. }
            | Self::TimedOut { pid, .. }
            | Self::Rejected { pid, .. }
            | Self::Released { pid, .. }
            | Self::Finished { pid }
            | Self::Aborted { pid, .. }
            | Self::VictimChosen { pid, .. } => Some(*pid),
            Self::CycleDetected { .. } | Self::FinalSweep { .. } => None,
        }
    }

    /// Short tag used in trace lines and counters.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Granted { .. } => "grant",
            Self::Blocked { .. } => "block",
            Self::TimedOut { .. } => "timeout",
            Self::Rejected { .. } => "invalid",
            Self::Released { .. } => "release",
            Self::Finished { .. } => "finish",
            Self::Aborted { .. } => "abort",
            Self::CycleDetected { .. } => "cycle",
            Self::VictimChosen { .. } => "victim",
            Self::FinalSweep { .. } => "final",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted { mode, pid, request, allocation, available } => write!(
                f,
                "[{mode}][grant] P{pid} req={request:?} alloc={allocation:?} avail={available:?}"
            ),
            Self::Blocked { mode, pid, request, need, available } => write!(
                f,
                "[{mode}][block] P{pid} req={request:?} need={need:?} avail={available:?}"
            ),
            Self::TimedOut { pid, request } => write!(f, "[timeout] P{pid} req={request:?}"),
            Self::Rejected { pid, request, need } => {
                write!(f, "[invalid] P{pid} req={request:?} need={need:?}")
            }
            Self::Released { pid, released, available } => {
                write!(f, "[release] P{pid} released={released:?} avail={available:?}")
            }
            Self::Finished { pid } => write!(f, "[finish] P{pid}"),
            Self::Aborted { pid, released, available } => {
                write!(f, "[abort] P{pid} released={released:?} avail={available:?}")
            }
            Self::CycleDetected { cycle } => write!(f, "[detect] cycle {cycle:?}"),
            Self::VictimChosen { pid, allocation } => {
                write!(f, "[resolve] victim P{pid} (allocation {allocation})")
            }
            Self::FinalSweep { pids } => write!(f, "[final] forcing abort of {pids:?}"),
        }
    }
}

/// Receiver of simulation events.
///
/// Implementations are called with the manager lock held and must not call back
/// into the manager. Every grant and release waits for `record` to return, so a
/// slow sink (terminal or file I/O) slows the whole run down in exchange for an
/// exact event order.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: Event) {}
}

/// Forwards events to the diagnostic log.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugSink;

impl EventSink for DebugSink {
    fn record(&self, event: Event) {
        match event {
            Event::Aborted { .. } | Event::CycleDetected { .. } | Event::FinalSweep { .. } => {
                crate::warn!("events", "{event}");
            }
            Event::Rejected { .. } => crate::error!("events", "{event}"),
            _ => crate::debug!("events", "{event}"),
        }
    }
}

/// Writes each event's trace line to a writer (stdout in the CLI).
///
/// The write happens under the manager lock; wrap `out` in a
/// [`std::io::BufWriter`] when throughput matters more than live output.
pub struct TraceSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> TraceSink<W> {
    /// Creates a sink writing one line per event to `out`.
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl<W: Write + Send> EventSink for TraceSink<W> {
    fn record(&self, event: Event) {
        let _ = writeln!(self.out.lock(), "{event}");
    }
}

/// Sends every event to each of several sinks, in order.
#[derive(Default, Clone)]
pub struct Tee {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Tee {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Tee {
    fn record(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

/// An event with its position in the run's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedEvent {
    /// 0-based sequence number.
    pub seq: u64,
    /// Milliseconds since the log was created.
    pub elapsed_ms: u64,
    /// The event itself.
    #[serde(flatten)]
    pub event: Event,
}

/// In-memory, sequence-numbered event recorder.
pub struct EventLog {
    start: Instant,
    events: Mutex<Vec<TimedEvent>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Creates an empty log; timestamps are relative to now.
    #[must_use]
    pub fn new() -> Self {
        Self { start: Instant::now(), events: Mutex::new(Vec::new()) }
    }

    /// Copy of everything recorded so far, in order.
    #[must_use]
    pub fn timeline(&self) -> Vec<TimedEvent> {
        self.events.lock().clone()
    }

    /// Recorded events without timing information.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|t| t.event.clone()).collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of recorded events with the given [`Event::tag`].
    #[must_use]
    pub fn count(&self, tag: &str) -> usize {
        self.events.lock().iter().filter(|t| t.event.tag() == tag).count()
    }

    /// Serializes the timeline as a YAML sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.timeline())?)
    }

    /// Writes the timeline as YAML to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

impl EventSink for EventLog {
    fn record(&self, event: Event) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        let mut events = self.events.lock();
        let seq = events.len() as u64;
        events.push(TimedEvent { seq, elapsed_ms, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(pid: ProcessId) -> Event {
        Event::Granted {
            mode: Mode::Avoidance,
            pid,
            request: vec![1, 0],
            allocation: vec![1, 0],
            available: vec![0, 1],
        }
    }

    #[test]
    fn test_event_log_sequences_in_order() {
        let log = EventLog::new();
        log.record(grant(0));
        log.record(Event::Finished { pid: 0 });
        let timeline = log.timeline();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].seq, 0);
        assert_eq!(timeline[1].seq, 1);
        assert_eq!(timeline[1].event, Event::Finished { pid: 0 });
        assert_eq!(log.count("grant"), 1);
    }

    #[test]
    fn test_display_trace_line() {
        let line = grant(2).to_string();
        assert_eq!(line, "[avoidance][grant] P2 req=[1, 0] alloc=[1, 0] avail=[0, 1]");
        assert_eq!(Event::CycleDetected { cycle: vec![0, 1] }.to_string(), "[detect] cycle [0, 1]");
    }

    #[test]
    fn test_pid_accessor() {
        assert_eq!(grant(3).pid(), Some(3));
        assert_eq!(Event::FinalSweep { pids: vec![1] }.pid(), None);
    }

    #[test]
    fn test_yaml_export_is_tagged() {
        let log = EventLog::new();
        log.record(Event::VictimChosen { pid: 1, allocation: 4 });
        let yaml = log.to_yaml().unwrap();
        assert!(yaml.contains("kind: victim_chosen"), "{yaml}");
        assert!(yaml.contains("seq: 0"), "{yaml}");
    }

    #[test]
    fn test_tee_fans_out() {
        let a = Arc::new(EventLog::new());
        let b = Arc::new(EventLog::new());
        let tee = Tee::new().with(a.clone()).with(b.clone());
        tee.record(Event::Finished { pid: 1 });
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_trace_sink_writes_lines() {
        let sink = TraceSink::new(Vec::new());
        sink.record(Event::Finished { pid: 4 });
        let out = String::from_utf8(sink.out.into_inner()).unwrap();
        assert_eq!(out, "[finish] P4\n");
    }

    #[test]
    fn test_trace_sink_over_buffered_writer() {
        let sink = TraceSink::new(std::io::BufWriter::new(Vec::new()));
        sink.record(Event::Finished { pid: 1 });
        sink.record(Event::Finished { pid: 2 });
        let out = sink.out.into_inner().into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[finish] P1\n[finish] P2\n");
    }

    #[test]
    fn test_sinks_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventLog>();
        assert_send_sync::<Tee>();
        assert_send_sync::<TraceSink<std::io::Stdout>>();
    }
}
