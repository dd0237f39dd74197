use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Smallest memory ceiling the container backend accepts.
pub const MIN_MEMORY_BYTES: u64 = 6 * 1024 * 1024;

/// Smallest CPU share the backend can schedule (1ms per 100ms period).
pub const MIN_CPU_QUOTA: f64 = 0.01;

// =============================================================================
// Resource Limits
// =============================================================================

/// Fully populated resource envelope applied to one sandbox.
///
/// Never partially set: either taken from the process-wide defaults or
/// resolved from a caller override on top of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes (swap is disabled).
    pub memory_bytes: u64,

    /// CPU quota as a fraction of one core.
    pub cpu_quota: f64,

    /// Maximum number of processes and threads.
    pub pids_limit: u32,

    /// Wall-clock timeout, measured from sandbox start.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024, // 256MB
            cpu_quota: 0.5,
            pids_limit: 64,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ResourceLimits {
    /// Upper bounds a caller override may reach by default.
    pub fn default_ceiling() -> Self {
        Self {
            memory_bytes: 1024 * 1024 * 1024, // 1GB
            cpu_quota: 2.0,
            pids_limit: 256,
            timeout: Duration::from_secs(60),
        }
    }

    /// Merge an optional override onto `defaults` and check the result
    /// against backend minimums and the configured `ceiling`.
    pub fn resolve(
        defaults: &ResourceLimits,
        overrides: Option<&ResourceLimitsOverride>,
        ceiling: &ResourceLimits,
    ) -> Result<ResourceLimits> {
        let mut limits = *defaults;
        if let Some(o) = overrides {
            if let Some(memory) = o.memory_bytes {
                limits.memory_bytes = memory;
            }
            if let Some(cpu) = o.cpu_quota {
                limits.cpu_quota = cpu;
            }
            if let Some(pids) = o.pids_limit {
                limits.pids_limit = pids;
            }
            if let Some(ms) = o.timeout_ms {
                limits.timeout = Duration::from_millis(ms);
            }
        }
        limits.check_within(ceiling)?;
        Ok(limits)
    }

    /// Check backend minimums and that no field exceeds `ceiling`.
    pub fn check_within(&self, ceiling: &ResourceLimits) -> Result<()> {
        self.check_minimums()?;
        if self.memory_bytes > ceiling.memory_bytes {
            return Err(Error::invalid_request(format!(
                "memory limit {} exceeds maximum {}",
                self.memory_bytes, ceiling.memory_bytes
            )));
        }
        if self.cpu_quota > ceiling.cpu_quota {
            return Err(Error::invalid_request(format!(
                "cpu quota {} exceeds maximum {}",
                self.cpu_quota, ceiling.cpu_quota
            )));
        }
        if self.pids_limit > ceiling.pids_limit {
            return Err(Error::invalid_request(format!(
                "pids limit {} exceeds maximum {}",
                self.pids_limit, ceiling.pids_limit
            )));
        }
        if self.timeout > ceiling.timeout {
            return Err(Error::invalid_request(format!(
                "timeout {}ms exceeds maximum {}ms",
                self.timeout.as_millis(),
                ceiling.timeout.as_millis()
            )));
        }
        Ok(())
    }

    /// Check the values the container backend refuses outright.
    pub fn check_minimums(&self) -> Result<()> {
        if self.memory_bytes < MIN_MEMORY_BYTES {
            return Err(Error::invalid_request(format!(
                "memory limit must be at least {} bytes",
                MIN_MEMORY_BYTES
            )));
        }
        if !self.cpu_quota.is_finite() || self.cpu_quota < MIN_CPU_QUOTA {
            return Err(Error::invalid_request(format!(
                "cpu quota must be at least {}",
                MIN_CPU_QUOTA
            )));
        }
        if self.pids_limit == 0 {
            return Err(Error::invalid_request("pids limit must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_request("timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Caller-supplied override; unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimitsOverride {
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_quota: Option<f64>,
    #[serde(default)]
    pub pids_limit: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_override_returns_defaults() {
        let defaults = ResourceLimits::default();
        let limits =
            ResourceLimits::resolve(&defaults, None, &ResourceLimits::default_ceiling()).unwrap();
        assert_eq!(limits, defaults);
    }

    #[test]
    fn test_resolve_applies_each_field() {
        let overrides = ResourceLimitsOverride {
            memory_bytes: Some(64 * 1024 * 1024),
            cpu_quota: Some(0.25),
            pids_limit: None,
            timeout_ms: Some(2500),
        };
        let limits = ResourceLimits::resolve(
            &ResourceLimits::default(),
            Some(&overrides),
            &ResourceLimits::default_ceiling(),
        )
        .unwrap();
        assert_eq!(limits.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(limits.cpu_quota, 0.25);
        assert_eq!(limits.pids_limit, ResourceLimits::default().pids_limit);
        assert_eq!(limits.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_resolve_rejects_above_ceiling() {
        let overrides = ResourceLimitsOverride {
            timeout_ms: Some(10 * 60 * 1000),
            ..Default::default()
        };
        let err = ResourceLimits::resolve(
            &ResourceLimits::default(),
            Some(&overrides),
            &ResourceLimits::default_ceiling(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_resolve_rejects_below_backend_minimum() {
        for overrides in [
            ResourceLimitsOverride {
                memory_bytes: Some(1024),
                ..Default::default()
            },
            ResourceLimitsOverride {
                cpu_quota: Some(0.0),
                ..Default::default()
            },
            ResourceLimitsOverride {
                cpu_quota: Some(f64::NAN),
                ..Default::default()
            },
            ResourceLimitsOverride {
                pids_limit: Some(0),
                ..Default::default()
            },
            ResourceLimitsOverride {
                timeout_ms: Some(0),
                ..Default::default()
            },
        ] {
            let result = ResourceLimits::resolve(
                &ResourceLimits::default(),
                Some(&overrides),
                &ResourceLimits::default_ceiling(),
            );
            assert!(result.is_err(), "{:?} should be rejected", overrides);
        }
    }

    #[test]
    fn test_timeout_serializes_as_millis() {
        let json = serde_json::to_value(ResourceLimits::default()).unwrap();
        assert_eq!(json["timeout_ms"], 10_000);
        let back: ResourceLimits = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(10));
    }
}
