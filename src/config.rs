//! Configuration for simulation runs.
//!
//! Supports YAML configuration with precedence: CLI > ENV > file > defaults.
//! The CLI layer lives in the binary; this module covers the other three.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detector::DetectorSettings;
use crate::error::{Error, Result};
use crate::types::{parse_units, Mode};
use crate::worker::WorkerSettings;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "DEADLOCK_SIM_";

/// Worker loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Upper bound on units of one type per request.
    #[serde(default = "default_step_cap")]
    pub step_cap: u32,

    /// Think time range `[min, max]` in milliseconds.
    #[serde(default = "default_think_time_ms")]
    pub think_time_ms: [u64; 2],

    /// Wait bound per request in milliseconds. Mode dependent when unset.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

fn default_step_cap() -> u32 {
    2
}
fn default_think_time_ms() -> [u64; 2] {
    [20, 60]
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            step_cap: default_step_cap(),
            think_time_ms: default_think_time_ms(),
            request_timeout_ms: None,
        }
    }
}

/// Detector loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Polling interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Scan budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_interval_ms() -> u64 {
    500
}
fn default_max_iterations() -> usize {
    200
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { interval_ms: default_interval_ms(), max_iterations: default_max_iterations() }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Deadlock handling strategy.
    #[serde(default)]
    pub mode: Mode,

    /// Total units per resource type.
    #[serde(default = "default_resources")]
    pub resources: Vec<u32>,

    /// Number of processes when demands are generated.
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Seed for demand generation and worker randomness.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Explicit demand matrix; overrides generation (and `processes`).
    #[serde(default)]
    pub max_demand: Option<Vec<Vec<u32>>>,

    /// Worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Detector settings.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// How long to wait for workers before the final sweep, in milliseconds.
    #[serde(default = "default_join_deadline_ms")]
    pub join_deadline_ms: u64,
}

fn default_version() -> u32 {
    1
}
fn default_resources() -> Vec<u32> {
    vec![3, 3, 2]
}
fn default_processes() -> usize {
    5
}
fn default_seed() -> u64 {
    123
}
fn default_join_deadline_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            mode: Mode::default(),
            resources: default_resources(),
            processes: default_processes(),
            seed: default_seed(),
            max_demand: None,
            worker: WorkerConfig::default(),
            detector: DetectorConfig::default(),
            join_deadline_ms: default_join_deadline_ms(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .map_err(|_| Error::ConfigNotFound(path.display().to_string()))?;

        crate::debug!("config", "loaded {}", path.display());
        Self::parse(&content)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error with line number if parsing fails.
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            let line = e.location().map(|l| l.line()).unwrap_or(0);
            Error::ConfigParse { line, message: e.to_string() }
        })
    }

    /// Default location: `<config dir>/deadlock-sim/config.yaml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("deadlock-sim").join("config.yaml"))
    }

    /// Loads configuration with fallback to defaults.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Applies `DEADLOCK_SIM_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the variable whose value does not parse.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_vars(std::env::vars())
    }

    /// Applies overrides from an explicit variable list.
    ///
    /// Recognised: `DEADLOCK_SIM_MODE`, `DEADLOCK_SIM_SEED`,
    /// `DEADLOCK_SIM_PROCESSES`, `DEADLOCK_SIM_RESOURCES` (comma separated).
    /// Anything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the variable whose value does not parse.
    pub fn apply_env_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "MODE" => self.mode = parse_env(key, value)?,
                "SEED" => self.seed = parse_env(key, value)?,
                "PROCESSES" => self.processes = parse_env(key, value)?,
                "RESOURCES" => {
                    self.resources = parse_units(value)
                        .map_err(|message| Error::ConfigInvalid { key: key.to_string(), message })?;
                }
                _ => continue,
            }
            crate::debug!("config", "{key}={value} from environment");
        }
        Ok(())
    }

    /// Checks values that serde cannot.
    ///
    /// Shape problems in `resources` / `max_demand` are left to state
    /// construction, which reports them with process and resource indices.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(Error::ConfigInvalid { key: key.to_string(), message: message.to_string() })
        };
        if self.max_demand.is_none() && self.processes == 0 {
            return invalid("processes", "must be at least 1");
        }
        if self.worker.step_cap == 0 {
            return invalid("worker.step_cap", "must be at least 1");
        }
        let [lo, hi] = self.worker.think_time_ms;
        if lo > hi {
            return invalid("worker.think_time_ms", "min must not exceed max");
        }
        if self.detector.interval_ms == 0 {
            return invalid("detector.interval_ms", "must be positive");
        }
        if self.detector.max_iterations == 0 {
            return invalid("detector.max_iterations", "must be at least 1");
        }
        Ok(())
    }

    /// Wait bound per request: explicit value, else 500 ms for avoidance and
    /// 200 ms for detection.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        let ms = self.worker.request_timeout_ms.unwrap_or(match self.mode {
            Mode::Avoidance => 500,
            Mode::Detection => 200,
        });
        Duration::from_millis(ms)
    }

    /// Deadline for collecting worker outcomes.
    #[must_use]
    pub fn join_deadline(&self) -> Duration {
        Duration::from_millis(self.join_deadline_ms)
    }

    /// Worker settings derived from this configuration.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        let [lo, hi] = self.worker.think_time_ms;
        WorkerSettings {
            step_cap: self.worker.step_cap,
            request_timeout: self.request_timeout(),
            think_time: (Duration::from_millis(lo), Duration::from_millis(hi)),
            publish_waiting: self.mode == Mode::Detection,
        }
    }

    /// Detector settings derived from this configuration.
    #[must_use]
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            interval: Duration::from_millis(self.detector.interval_ms),
            max_iterations: self.detector.max_iterations,
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| Error::ConfigInvalid { key: key.to_string(), message: e.to_string() })
}
