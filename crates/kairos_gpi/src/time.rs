//! Simulation time units and tick conversion.
//!
//! The GPI reports time as a 64-bit tick count together with a precision
//! exponent (ticks per second as a power of ten). [`TimeUnit`] carries the
//! unit vocabulary the GPI understands and converts user-facing delays into
//! native tick counts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A time unit understood by the simulator gateway.
///
/// Each unit maps to the power-of-ten exponent the GPI encodes it as.
/// `Step` is the simulator's native tick and bypasses conversion entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Femtoseconds (exponent -15).
    Fs,
    /// Picoseconds (exponent -12).
    Ps,
    /// Nanoseconds (exponent -9).
    Ns,
    /// Microseconds (exponent -6).
    Us,
    /// Milliseconds (exponent -3).
    Ms,
    /// Seconds (exponent 1, as the GPI encodes it).
    Sec,
    /// Native simulator ticks (exponent 0).
    Step,
}

impl TimeUnit {
    /// Returns the power-of-ten exponent the GPI uses for this unit.
    pub fn exponent(self) -> i32 {
        match self {
            TimeUnit::Fs => -15,
            TimeUnit::Ps => -12,
            TimeUnit::Ns => -9,
            TimeUnit::Us => -6,
            TimeUnit::Ms => -3,
            TimeUnit::Sec => 1,
            TimeUnit::Step => 0,
        }
    }

    /// Looks up the unit whose exponent matches a GPI precision value.
    pub fn from_exponent(exponent: i32) -> Option<Self> {
        match exponent {
            -15 => Some(TimeUnit::Fs),
            -12 => Some(TimeUnit::Ps),
            -9 => Some(TimeUnit::Ns),
            -6 => Some(TimeUnit::Us),
            -3 => Some(TimeUnit::Ms),
            1 => Some(TimeUnit::Sec),
            0 => Some(TimeUnit::Step),
            _ => None,
        }
    }

    /// Converts a delay expressed in this unit into native simulator ticks.
    ///
    /// `precision` is the simulator's precision exponent. The scale factor
    /// is `10^(unit_exponent - precision)`; results are rounded toward zero
    /// and saturate instead of overflowing.
    pub fn to_ticks(self, delay: u64, precision: i32) -> u64 {
        if self == TimeUnit::Step {
            return delay;
        }
        let diff = self.exponent() - precision;
        if diff >= 0 {
            delay.saturating_mul(pow10(diff as u32))
        } else {
            delay / pow10((-diff) as u32)
        }
    }
}

fn pow10(exp: u32) -> u64 {
    10u64.saturating_pow(exp)
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::Sec => "sec",
            TimeUnit::Step => "step",
        };
        f.write_str(s)
    }
}

/// Error type for parsing time unit names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeUnitError {
    /// The input string that failed to parse.
    pub input: String,
}

impl fmt::Display for ParseTimeUnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time unit: '{}'", self.input)
    }
}

impl std::error::Error for ParseTimeUnitError {}

impl FromStr for TimeUnit {
    type Err = ParseTimeUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "sec" => Ok(TimeUnit::Sec),
            "step" => Ok(TimeUnit::Step),
            _ => Err(ParseTimeUnitError {
                input: s.to_string(),
            }),
        }
    }
}
