//! Core types shared across the simulator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a simulated process (its row in the demand matrices).
pub type ProcessId = usize;

/// Deadlock handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Banker's Algorithm: grant only when the resulting state is safe.
    #[default]
    Avoidance,
    /// Grant whenever units are available; break cycles by aborting a victim.
    Detection,
}

impl Mode {
    /// Short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avoidance => "avoidance",
            Self::Detection => "detection",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avoidance" | "avoid" | "banker" => Ok(Self::Avoidance),
            "detection" | "detect" => Ok(Self::Detection),
            other => Err(format!("unknown mode '{other}' (expected avoidance or detection)")),
        }
    }
}

/// Lifecycle status of a process as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Alive and not finished.
    Active,
    /// Need exhausted and resources released voluntarily.
    Finished,
    /// Forcibly terminated; terminal.
    Aborted,
}

impl ProcessStatus {
    /// Returns true while the process may still hold or request resources.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Returns true if every component is zero.
#[inline]
#[must_use]
pub fn is_zero(v: &[u32]) -> bool {
    v.iter().all(|&x| x == 0)
}

/// Returns true if `req[k] <= limit[k]` for all k.
///
/// Vectors of different lengths never fit.
#[inline]
#[must_use]
pub fn fits(req: &[u32], limit: &[u32]) -> bool {
    req.len() == limit.len() && req.iter().zip(limit).all(|(r, l)| r <= l)
}

/// Sum of all components, widened so it cannot overflow.
#[inline]
#[must_use]
pub fn total_units(v: &[u32]) -> u64 {
    v.iter().map(|&x| u64::from(x)).sum()
}

/// Parses a comma-separated list of unit counts, e.g. `"3,3,2"`.
///
/// # Errors
///
/// Returns a message naming the first entry that is not a non-negative integer.
pub fn parse_units(s: &str) -> Result<Vec<u32>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().map_err(|e| format!("'{part}': {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("avoidance".parse::<Mode>(), Ok(Mode::Avoidance));
        assert_eq!("Detection".parse::<Mode>(), Ok(Mode::Detection));
        assert_eq!(" detect ".parse::<Mode>(), Ok(Mode::Detection));
        assert!("optimistic".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_display_roundtrips_through_from_str() {
        for mode in [Mode::Avoidance, Mode::Detection] {
            assert_eq!(mode.to_string().parse::<Mode>(), Ok(mode));
        }
    }

    #[test]
    fn test_fits() {
        assert!(fits(&[1, 2], &[1, 2]));
        assert!(fits(&[0, 0], &[0, 0]));
        assert!(!fits(&[2, 0], &[1, 5]));
        assert!(!fits(&[1], &[1, 1]));
    }

    #[test]
    fn test_is_zero_and_total_units() {
        assert!(is_zero(&[0, 0, 0]));
        assert!(!is_zero(&[0, 1]));
        assert_eq!(total_units(&[u32::MAX, u32::MAX]), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("3,3,2"), Ok(vec![3, 3, 2]));
        assert_eq!(parse_units(" 1 , 0 ,"), Ok(vec![1, 0]));
        assert!(parse_units("3,-1").is_err());
        assert!(parse_units("a").is_err());
    }

    #[test]
    fn test_status_is_active() {
        assert!(ProcessStatus::Active.is_active());
        assert!(!ProcessStatus::Finished.is_active());
        assert!(!ProcessStatus::Aborted.is_active());
    }
}
