//! Hashrate measurement type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hashrate measurement in hashes per second.
///
/// The miner reports fractional rates ("80.00 h/s"), so this wraps an `f64`
/// rather than an integer count.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
pub struct HashRate(pub f64);

impl HashRate {
    pub const ZERO: HashRate = HashRate(0.0);

    /// Create from a value and an SI unit prefix as printed by the miner.
    ///
    /// The prefix is the letter preceding `h/s` (`"k"`, `"M"`, ...), or
    /// empty for plain hashes per second. Returns `None` for prefixes the
    /// miner never prints.
    pub fn from_prefixed(value: f64, prefix: &str) -> Option<Self> {
        let multiplier = match prefix.trim() {
            "" => 1.0,
            "k" | "K" => 1e3,
            "m" | "M" => 1e6,
            "g" | "G" => 1e9,
            _ => return None,
        };
        Some(Self(value * multiplier))
    }

    /// Create from kilohashes per second
    pub fn from_kilohashes(kh: f64) -> Self {
        Self(kh * 1e3)
    }

    /// Create from megahashes per second
    pub fn from_megahashes(mh: f64) -> Self {
        Self(mh * 1e6)
    }

    /// Get value as hashes per second
    pub fn as_hashes(&self) -> f64 {
        self.0
    }

    /// Get value as kilohashes per second
    pub fn as_kilohashes(&self) -> f64 {
        self.0 / 1e3
    }

    /// Get value as megahashes per second
    pub fn as_megahashes(&self) -> f64 {
        self.0 / 1e6
    }

    /// Get value as gigahashes per second
    pub fn as_gigahashes(&self) -> f64 {
        self.0 / 1e9
    }

    /// Returns true if the hashrate is zero or negative.
    pub fn is_zero(&self) -> bool {
        self.0 <= 0.0
    }

    /// Expected number of hashes in the given duration.
    pub fn hashes_in(&self, duration: Duration) -> f64 {
        self.0 * duration.as_secs_f64()
    }

    /// Format as human-readable string with appropriate units
    pub fn to_human_readable(&self) -> String {
        if self.0 >= 1e9 {
            format!("{:.2} GH/s", self.as_gigahashes())
        } else if self.0 >= 1e6 {
            format!("{:.2} MH/s", self.as_megahashes())
        } else if self.0 >= 1e3 {
            format!("{:.2} kH/s", self.as_kilohashes())
        } else {
            format!("{:.2} H/s", self.0)
        }
    }
}

impl std::fmt::Display for HashRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_multipliers() {
        assert_eq!(HashRate::from_prefixed(80.0, ""), Some(HashRate(80.0)));
        assert_eq!(HashRate::from_prefixed(2.5, "k"), Some(HashRate(2_500.0)));
        assert_eq!(HashRate::from_prefixed(2.5, "K"), Some(HashRate(2_500.0)));
        assert_eq!(HashRate::from_prefixed(13.16, "M"), Some(HashRate(13.16 * 1e6)));
        assert_eq!(HashRate::from_prefixed(1.0, "g"), Some(HashRate(1e9)));
        assert_eq!(HashRate::from_prefixed(1.0, "T"), None);
    }

    #[test]
    fn test_human_readable() {
        assert_eq!(HashRate(80.0).to_human_readable(), "80.00 H/s");
        assert_eq!(HashRate::from_kilohashes(12.5).to_human_readable(), "12.50 kH/s");
        assert_eq!(HashRate::from_megahashes(13.16).to_human_readable(), "13.16 MH/s");
        assert_eq!(HashRate(2.5e9).to_human_readable(), "2.50 GH/s");
    }

    #[test]
    fn test_hashes_in_duration() {
        let rate = HashRate::from_kilohashes(1.0);
        assert_eq!(rate.hashes_in(Duration::from_millis(1500)), 1_500.0);
        assert!(HashRate::ZERO.is_zero());
    }
}
