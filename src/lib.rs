//! # deadlock-sim
//!
//! Concurrent multi-resource allocation simulator comparing two deadlock
//! strategies over the same scenario:
//!
//! - **Avoidance**: every grant is checked with the Banker's Algorithm and only
//!   issued if the resulting state is safe.
//! - **Detection**: grants are issued whenever units are free; a periodic
//!   detector builds a wait-for graph, finds cycles and aborts a victim.
//!
//! Each simulated process runs on its own thread against a shared
//! [`ResourceManager`](manager::ResourceManager); every state transition is
//! reported as a structured [`Event`](events::Event).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deadlock_sim::prelude::*;
//!
//! let config = Config { mode: Mode::Detection, ..Config::default() };
//! let log = std::sync::Arc::new(EventLog::new());
//! let report = Simulation::new(config)?.run(log.clone())?;
//! assert!(report.fully_reclaimed());
//! ```
//!
//! ## Building blocks
//!
//! The pieces are usable on their own: [`safety::is_safe`] on any
//! [`SystemState`](state::SystemState), [`graph::WaitForGraph::find_cycle`] on
//! any graph, and the manager without workers for scripted scenarios.

#![warn(missing_docs)]
// Allow unwrap() in tests only
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Core Modules
// ============================================================================

/// Process ids, modes and unit-vector helpers.
pub mod types;

/// The allocation state model and its invariant checks.
pub mod state;

/// Banker's Algorithm safety check.
pub mod safety;

/// Wait-for graph and cycle detection.
pub mod graph;

// ============================================================================
// Concurrency Modules
// ============================================================================

/// Structured event stream and sinks.
pub mod events;

/// Thread-safe resource manager.
pub mod manager;

/// Per-process worker loop.
pub mod worker;

/// Periodic deadlock detector and resolver.
pub mod detector;

/// End-to-end simulation runner.
pub mod simulation;

// ============================================================================
// Scenario Modules
// ============================================================================

/// Seedable random source.
pub mod rng;

/// Demand generation and request sizing.
pub mod scenario;

/// YAML configuration with environment overrides.
pub mod config;

// ============================================================================
// Diagnostics & Errors
// ============================================================================

/// Component-tagged diagnostic logging.
pub mod debug;

/// Error types for deadlock-sim operations.
pub mod error;

pub use error::{Error, Result};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types and traits for convenient imports.
///
/// ```rust,ignore
/// use deadlock_sim::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::detector::{Detector, DetectorReport, DetectorSettings};
    pub use crate::error::{Error, Result};
    pub use crate::events::{DebugSink, Event, EventLog, EventSink, NullSink, Tee, TraceSink};
    pub use crate::graph::WaitForGraph;
    pub use crate::manager::{RequestOutcome, ResourceManager};
    pub use crate::simulation::{RunReport, Simulation};
    pub use crate::state::SystemState;
    pub use crate::types::{Mode, ProcessId, ProcessStatus};
    pub use crate::worker::{Worker, WorkerOutcome, WorkerSettings};
}

// ============================================================================
// Tests
// ============================================================================
