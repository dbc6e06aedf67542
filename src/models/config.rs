//! Configuration models for llm-throttle.
//!
//! `LimitConfig` is the loose, serde-facing shape (every field optional, as a
//! user would write it). `Policy` is the validated form the manager runs on.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Longest dispatch interval a rate policy may have.
///
/// Anything slower than one call per day is treated as a typo.
pub const MAX_RATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration file.
///
/// ```toml
/// [limits]
/// rps = 2.0
/// max_in_flight = 4
///
/// [simulation]
/// calls = 20
/// latency_ms = 250
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Admission policy
    pub limits: LimitConfig,

    /// Synthetic workload used by the `simulate` command
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            source: e,
        })
    }
}

/// Admission limits as written by the user.
///
/// Exactly one of `rps` and `concurrency` must be set. `max_in_flight` is an
/// optional cap layered after the rate gate and is only valid with `rps`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitConfig {
    /// Requests released per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rps: Option<f64>,

    /// Maximum concurrent downstream calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Concurrency cap applied after the rate gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

impl LimitConfig {
    /// Fixed-rate limits.
    pub fn rps(rps: f64) -> Self {
        Self {
            rps: Some(rps),
            ..Self::default()
        }
    }

    /// Fixed-concurrency limits.
    pub fn concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
            ..Self::default()
        }
    }

    /// Add an in-flight cap on top of a rate limit.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Validate into a [`Policy`].
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        let policy = match (self.rps, self.concurrency) {
            (None, None) => return Err(ConfigError::NoPolicy),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingPolicies),
            (Some(rps), None) => Policy::rate(rps)?,
            (None, Some(concurrency)) => Policy::concurrency(concurrency)?,
        };

        match self.max_in_flight {
            Some(cap) => policy.with_max_in_flight(cap),
            None => Ok(policy),
        }
    }
}

impl TryFrom<LimitConfig> for Policy {
    type Error = ConfigError;

    fn try_from(config: LimitConfig) -> Result<Self, Self::Error> {
        config.policy()
    }
}

/// Validated admission policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// At most N downstream calls in flight
    Concurrency(NonZeroUsize),
    /// Steady release of `rps` calls per second, optionally capped
    Rate {
        rps: f64,
        max_in_flight: Option<NonZeroUsize>,
    },
}

impl Policy {
    /// Fixed-concurrency policy.
    pub fn concurrency(limit: usize) -> Result<Self, ConfigError> {
        Ok(Self::Concurrency(permit_count("concurrency", limit)?))
    }

    /// Fixed-rate policy with no in-flight cap.
    pub fn rate(rps: f64) -> Result<Self, ConfigError> {
        rate_interval(rps)?;
        Ok(Self::Rate {
            rps,
            max_in_flight: None,
        })
    }

    /// Layer an in-flight cap on a rate policy.
    pub fn with_max_in_flight(self, cap: usize) -> Result<Self, ConfigError> {
        match self {
            Self::Rate { rps, .. } => Ok(Self::Rate {
                rps,
                max_in_flight: Some(permit_count("max_in_flight", cap)?),
            }),
            Self::Concurrency(_) => Err(ConfigError::CapWithoutRate),
        }
    }

    /// Number of admission tokens, if this policy uses any.
    pub fn permits(&self) -> Option<NonZeroUsize> {
        match self {
            Self::Concurrency(n) => Some(*n),
            Self::Rate { max_in_flight, .. } => *max_in_flight,
        }
    }

    /// Gap between consecutive rate slots, if this is a rate policy.
    ///
    /// Fails for a hand-built `Rate` whose `rps` is out of range.
    pub fn interval(&self) -> Result<Option<Duration>, ConfigError> {
        match self {
            Self::Concurrency(_) => Ok(None),
            Self::Rate { rps, .. } => rate_interval(*rps).map(Some),
        }
    }

    /// Re-check every bound the constructors enforce.
    ///
    /// The variants are public, so a policy built by hand skips the checks
    /// in [`Policy::rate`] and [`Policy::concurrency`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Concurrency(n) => {
                permit_count("concurrency", n.get())?;
            }
            Self::Rate { rps, max_in_flight } => {
                rate_interval(*rps)?;
                if let Some(cap) = max_in_flight {
                    permit_count("max_in_flight", cap.get())?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Concurrency(n) => write!(f, "concurrency={n}"),
            Policy::Rate {
                rps,
                max_in_flight: None,
            } => write!(f, "rps={rps}"),
            Policy::Rate {
                rps,
                max_in_flight: Some(cap),
            } => write!(f, "rps={rps} max_in_flight={cap}"),
        }
    }
}

/// Convert a rate into the spacing between slots.
pub(crate) fn rate_interval(rps: f64) -> Result<Duration, ConfigError> {
    if !rps.is_finite() || rps <= 0.0 {
        return Err(ConfigError::InvalidRate(rps));
    }

    let too_low = || ConfigError::RateTooLow {
        rps,
        max_interval_secs: MAX_RATE_INTERVAL.as_secs(),
    };

    let interval = Duration::try_from_secs_f64(1.0 / rps).map_err(|_| too_low())?;
    if interval > MAX_RATE_INTERVAL {
        return Err(too_low());
    }
    Ok(interval)
}

fn permit_count(field: &'static str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    if value > Semaphore::MAX_PERMITS {
        return Err(ConfigError::LimitTooLarge {
            field,
            value,
            max: Semaphore::MAX_PERMITS,
        });
    }
    NonZeroUsize::new(value).ok_or(ConfigError::ZeroLimit { field })
}

/// Synthetic workload settings for the `simulate` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of calls to issue at once
    #[serde(default = "default_calls")]
    pub calls: u64,

    /// Latency of each simulated downstream call
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Make every n-th call fail (1-based)
    #[serde(default)]
    pub fail_every: Option<u64>,
}

fn default_calls() -> u64 {
    20
}

fn default_latency_ms() -> u64 {
    250
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            calls: default_calls(),
            latency_ms: default_latency_ms(),
            fail_every: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_neither_or_both_rejected() {
        assert!(matches!(
            LimitConfig::default().policy(),
            Err(ConfigError::NoPolicy)
        ));

        let both = LimitConfig {
            rps: Some(5.0),
            concurrency: Some(2),
            max_in_flight: None,
        };
        assert!(matches!(
            both.policy(),
            Err(ConfigError::ConflictingPolicies)
        ));
    }

    #[test]
    fn test_non_positive_values_rejected() {
        for rps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(LimitConfig::rps(rps).policy(), Err(ConfigError::InvalidRate(_))),
                "rps {rps} should be rejected"
            );
        }

        assert!(matches!(
            LimitConfig::concurrency(0).policy(),
            Err(ConfigError::ZeroLimit {
                field: "concurrency"
            })
        ));
        assert!(matches!(
            LimitConfig::rps(1.0).with_max_in_flight(0).policy(),
            Err(ConfigError::ZeroLimit {
                field: "max_in_flight"
            })
        ));
    }

    #[test]
    fn test_extreme_values_rejected() {
        assert!(matches!(
            Policy::rate(1e-9),
            Err(ConfigError::RateTooLow { .. })
        ));
        assert!(matches!(
            Policy::concurrency(usize::MAX),
            Err(ConfigError::LimitTooLarge { .. })
        ));
    }

    #[test]
    fn test_cap_requires_rate() {
        let config = LimitConfig::concurrency(4).with_max_in_flight(2);
        assert!(matches!(config.policy(), Err(ConfigError::CapWithoutRate)));

        let only_cap = LimitConfig {
            max_in_flight: Some(2),
            ..LimitConfig::default()
        };
        assert!(matches!(only_cap.policy(), Err(ConfigError::NoPolicy)));
    }

    #[test]
    fn test_valid_policies() {
        let policy = LimitConfig::concurrency(3).policy().unwrap();
        assert_eq!(policy, Policy::Concurrency(NonZeroUsize::new(3).unwrap()));
        assert_eq!(policy.interval().unwrap(), None);
        assert_eq!(policy.to_string(), "concurrency=3");

        let policy = LimitConfig::rps(4.0).with_max_in_flight(2).policy().unwrap();
        assert_eq!(policy.interval().unwrap(), Some(Duration::from_millis(250)));
        assert_eq!(policy.permits(), NonZeroUsize::new(2));
        assert_eq!(policy.to_string(), "rps=4 max_in_flight=2");
        assert!(policy.validate().is_ok());

        let policy: Policy = LimitConfig::rps(0.5).try_into().unwrap();
        assert_eq!(policy.interval().unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(policy.permits(), None);
    }

    #[test]
    fn test_hand_built_policies_validated() {
        let zero_rate = Policy::Rate {
            rps: 0.0,
            max_in_flight: None,
        };
        assert!(matches!(zero_rate.interval(), Err(ConfigError::InvalidRate(_))));
        assert!(matches!(zero_rate.validate(), Err(ConfigError::InvalidRate(_))));

        let huge = NonZeroUsize::new(usize::MAX).unwrap();
        assert!(matches!(
            Policy::Concurrency(huge).validate(),
            Err(ConfigError::LimitTooLarge {
                field: "concurrency",
                ..
            })
        ));

        let huge_cap = Policy::Rate {
            rps: 10.0,
            max_in_flight: Some(huge),
        };
        assert!(matches!(
            huge_cap.validate(),
            Err(ConfigError::LimitTooLarge {
                field: "max_in_flight",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            [limits]
            rps = 2.5
            max_in_flight = 8

            [simulation]
            calls = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.rps, Some(2.5));
        assert_eq!(config.limits.max_in_flight, Some(8));
        assert_eq!(config.limits.concurrency, None);
        assert_eq!(config.simulation.calls, 5);
        assert_eq!(config.simulation.latency_ms, 250);
        assert!(config.limits.policy().is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let result = Config::from_toml_str("[limits]\nrate = 3.0\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nconcurrency = 5").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.limits, LimitConfig::concurrency(5));
        assert_eq!(config.simulation, SimulationConfig::default());
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
