//! Assume-role duration policy.
//!
//! | Class | Min | Max | Default |
//! |-------|-----|-----|---------|
//! | restricted (`pci`) | 15m | 15m | 15m |
//! | standard (`nonpci`) | 15m | 12h | 1h |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::class::EnvironmentClass;

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
const TWELVE_HOURS: Duration = Duration::from_secs(12 * 60 * 60);

/// Bounds on the lifetime of an assumed-role session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPolicy {
    /// Shortest session that may be requested.
    #[serde(with = "crate::humantime_serde")]
    pub min: Duration,
    /// Longest session that may be requested.
    #[serde(with = "crate::humantime_serde")]
    pub max: Duration,
    /// Used when the caller does not ask for a specific duration.
    #[serde(with = "crate::humantime_serde")]
    pub default: Duration,
}

/// A requested duration outside the policy bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    /// Below [`DurationPolicy::min`].
    #[error("Minimum assume-role duration is: ({}) duration requested: ({})", format_duration(*min), format_duration(*requested))]
    TooShort {
        /// Policy minimum.
        min: Duration,
        /// What was asked for.
        requested: Duration,
    },
    /// Above [`DurationPolicy::max`].
    #[error("Maximum assume-role duration is: ({}) duration requested: ({})", format_duration(*max), format_duration(*requested))]
    TooLong {
        /// Policy maximum.
        max: Duration,
        /// What was asked for.
        requested: Duration,
    },
}

impl DurationPolicy {
    /// Policy for restricted sessions: fixed at 15 minutes.
    #[must_use]
    pub const fn restricted() -> Self {
        Self {
            min: FIFTEEN_MINUTES,
            max: FIFTEEN_MINUTES,
            default: FIFTEEN_MINUTES,
        }
    }

    /// Policy for standard sessions: 15 minutes to 12 hours, 1 hour by default.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            min: FIFTEEN_MINUTES,
            max: TWELVE_HOURS,
            default: ONE_HOUR,
        }
    }

    /// Built-in policy for `class`.
    #[must_use]
    pub const fn for_class(class: EnvironmentClass) -> Self {
        match class {
            EnvironmentClass::Restricted => Self::restricted(),
            EnvironmentClass::Standard => Self::standard(),
        }
    }

    /// Check that `requested` lies within `[min, max]`.
    pub fn check(&self, requested: Duration) -> Result<Duration, DurationError> {
        if requested < self.min {
            Err(DurationError::TooShort {
                min: self.min,
                requested,
            })
        } else if requested > self.max {
            Err(DurationError::TooLong {
                max: self.max,
                requested,
            })
        } else {
            Ok(requested)
        }
    }

    /// Resolve an optional request: `None` or zero means [`Self::default`].
    pub fn resolve(&self, requested: Option<Duration>) -> Result<Duration, DurationError> {
        match requested {
            Some(d) if !d.is_zero() => self.check(d),
            _ => Ok(self.default),
        }
    }
}

/// Format a duration compactly: `1h30m`, `15m`, `45s`, `250ms`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        let ms = d.subsec_millis();
        return if ms == 0 { "0s".to_string() } else { format!("{ms}ms") };
    }

    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 {
        out.push_str(&format!("{s}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_are_ordered() {
        for class in EnvironmentClass::ALL {
            let p = DurationPolicy::for_class(class);
            assert!(p.min <= p.default, "{class}: min > default");
            assert!(p.default <= p.max, "{class}: default > max");
            assert!(p.check(p.default).is_ok());
        }
    }

    #[test]
    fn restricted_is_fixed_at_fifteen_minutes() {
        let p = DurationPolicy::restricted();
        assert!(p.check(Duration::from_secs(900)).is_ok());
        assert!(matches!(
            p.check(Duration::from_secs(901)),
            Err(DurationError::TooLong { .. })
        ));
        assert!(matches!(
            p.check(Duration::from_secs(899)),
            Err(DurationError::TooShort { .. })
        ));
    }

    #[test]
    fn standard_bounds() {
        let p = DurationPolicy::standard();
        assert!(p.check(Duration::from_secs(15 * 60)).is_ok());
        assert!(p.check(Duration::from_secs(12 * 3600)).is_ok());
        assert!(p.check(Duration::from_secs(12 * 3600 + 1)).is_err());
        assert!(p.check(Duration::from_secs(60)).is_err());
    }

    #[test]
    fn resolve_uses_default_when_unset() {
        let p = DurationPolicy::standard();
        assert_eq!(p.resolve(None), Ok(ONE_HOUR));
        assert_eq!(p.resolve(Some(Duration::ZERO)), Ok(ONE_HOUR));
        assert_eq!(p.resolve(Some(TWELVE_HOURS)), Ok(TWELVE_HOURS));
    }

    #[test]
    fn error_messages_name_the_bound() {
        let err = DurationPolicy::standard()
            .check(Duration::from_secs(13 * 3600))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Maximum assume-role duration is: (12h) duration requested: (13h)"
        );
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(900)), "15m");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
