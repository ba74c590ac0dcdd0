use std::fmt;
use std::time::Duration;

use crate::error::{ElectionError, Result};

/// Identifies one logical election: a lock `name` inside a `namespace`.
///
/// Two descriptors that differ in either field are unrelated elections with
/// independent state, even when they share a process and a lock store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElectionDescriptor {
    pub name: String,
    pub namespace: String,
}

impl ElectionDescriptor {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "election name must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "election namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ElectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Timing configuration for the lease protocol.
///
/// Durations must satisfy `retry_period < renew_deadline < lease_duration`.
/// A lease that has not been renewed for `lease_duration` may be taken over
/// by another candidate; the holder gives up after `renew_deadline` of
/// failed renewals, which leaves a safety margin before anyone else can
/// acquire.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionConfig {
    /// How long an unrenewed lease stays valid for non-holders.
    pub lease_duration: Duration,
    /// How long the holder keeps retrying a renewal before conceding.
    pub renew_deadline: Duration,
    /// Interval between acquisition and renewal attempts.
    pub retry_period: Duration,
    /// Clear the holder identity when the run loop is cancelled while leading.
    pub release_on_cancel: bool,
    /// Extra random fraction of `retry_period` added to each standby wait.
    /// Zero disables jitter.
    pub retry_jitter: f64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            release_on_cancel: true,
            retry_jitter: 0.0,
        }
    }
}

impl ElectionConfig {
    pub fn new(lease_duration: Duration, renew_deadline: Duration, retry_period: Duration) -> Self {
        Self {
            lease_duration,
            renew_deadline,
            retry_period,
            ..Default::default()
        }
    }

    pub fn with_release_on_cancel(mut self, release: bool) -> Self {
        self.release_on_cancel = release;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Check the duration ordering. Called before any election is started.
    pub fn validate(&self) -> Result<()> {
        if self.retry_period.is_zero() {
            return Err(invalid("retry_period must be non-zero"));
        }
        if self.renew_deadline.is_zero() {
            return Err(invalid("renew_deadline must be non-zero"));
        }
        if self.lease_duration.is_zero() {
            return Err(invalid("lease_duration must be non-zero"));
        }
        if !self.retry_jitter.is_finite() || self.retry_jitter < 0.0 {
            return Err(invalid("retry_jitter must be a finite, non-negative factor"));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(invalid("lease_duration must be greater than renew_deadline"));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(invalid("renew_deadline must be greater than retry_period"));
        }
        let max_wait = self.retry_period.mul_f64(1.0 + self.retry_jitter);
        if self.renew_deadline <= max_wait {
            return Err(invalid(
                "renew_deadline must be greater than retry_period including jitter",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ElectionError {
    ElectionError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_config_default() {
        let cfg = ElectionConfig::default();
        assert_eq!(cfg.lease_duration, Duration::from_secs(15));
        assert_eq!(cfg.renew_deadline, Duration::from_secs(10));
        assert_eq!(cfg.retry_period, Duration::from_secs(2));
        assert!(cfg.release_on_cancel);
        assert_eq!(cfg.retry_jitter, 0.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn election_config_new_keeps_release_default() {
        let cfg = ElectionConfig::new(
            Duration::from_millis(1500),
            Duration::from_millis(1000),
            Duration::from_millis(200),
        );
        assert!(cfg.release_on_cancel);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn lease_must_exceed_renew_deadline() {
        let cfg = ElectionConfig::new(
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("lease_duration"));
    }

    #[test]
    fn renew_deadline_must_exceed_retry_period() {
        let cfg = ElectionConfig::new(
            Duration::from_secs(15),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("renew_deadline"));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let cfg = ElectionConfig::new(Duration::from_secs(15), Duration::from_secs(10), Duration::ZERO);
        assert!(cfg.validate().is_err());

        let cfg = ElectionConfig::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn jitter_counts_against_renew_deadline() {
        let cfg = ElectionConfig::default().with_retry_jitter(1.2);
        assert!(cfg.validate().is_ok());

        let cfg = ElectionConfig::default().with_retry_jitter(4.0);
        assert!(cfg.validate().is_err());

        let cfg = ElectionConfig::default().with_retry_jitter(-0.5);
        assert!(cfg.validate().is_err());

        let cfg = ElectionConfig::default().with_retry_jitter(f64::NAN);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn descriptor_display_and_validation() {
        let desc = ElectionDescriptor::new("scheduler", "default");
        assert_eq!(desc.to_string(), "default/scheduler");
        assert!(desc.validate().is_ok());

        assert!(ElectionDescriptor::new("", "default").validate().is_err());
        assert!(ElectionDescriptor::new("scheduler", "").validate().is_err());
    }
}
