//! Numeric log levels used by guest handlers.

use serde::{Deserialize, Serialize};

/// Log level a guest passes to `log`.
///
/// The numbering follows the host logger: `0` is the most verbose, `6`
/// disables output for the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestLogLevel {
    /// Trace (0)
    Trace,
    /// Debug (1)
    Debug,
    /// Info (2)
    Info,
    /// Warn (3)
    Warn,
    /// Error (4)
    Error,
    /// Critical (5), logged at error with a `critical` marker
    Critical,
    /// Off (6), the line is discarded
    Off,
}

impl GuestLogLevel {
    /// Decode a numeric level. Returns `None` for anything above `6`.
    #[must_use]
    pub fn from_u32(level: u32) -> Option<Self> {
        match level {
            0 => Some(Self::Trace),
            1 => Some(Self::Debug),
            2 => Some(Self::Info),
            3 => Some(Self::Warn),
            4 => Some(Self::Error),
            5 => Some(Self::Critical),
            6 => Some(Self::Off),
            _ => None,
        }
    }

    /// The numeric value of this level.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Trace => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Warn => 3,
            Self::Error => 4,
            Self::Critical => 5,
            Self::Off => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels() {
        assert_eq!(GuestLogLevel::from_u32(0), Some(GuestLogLevel::Trace));
        assert_eq!(GuestLogLevel::from_u32(3), Some(GuestLogLevel::Warn));
        assert_eq!(GuestLogLevel::from_u32(5), Some(GuestLogLevel::Critical));
        assert_eq!(GuestLogLevel::from_u32(6), Some(GuestLogLevel::Off));
        for level in 0..=6 {
            assert_eq!(GuestLogLevel::from_u32(level).unwrap().as_u32(), level);
        }
    }

    #[test]
    fn unknown_levels() {
        assert_eq!(GuestLogLevel::from_u32(7), None);
        assert_eq!(GuestLogLevel::from_u32(u32::MAX), None);
    }

    #[test]
    fn ordering_follows_verbosity() {
        assert!(GuestLogLevel::Trace < GuestLogLevel::Info);
        assert!(GuestLogLevel::Critical < GuestLogLevel::Off);
    }
}
