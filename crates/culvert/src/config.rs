//! Runtime configuration.

use std::time::Duration;

pub const CALL_TIMEOUT_VAR: &str = "CULVERT_CALL_TIMEOUT_MS";
pub const SWEEP_INTERVAL_VAR: &str = "CULVERT_SWEEP_INTERVAL_MS";
pub const LIVENESS_INTERVAL_VAR: &str = "CULVERT_LIVENESS_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Environment { var: &'static str, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Environment { var, value } => {
                write!(f, "{} must be a whole number of milliseconds, got '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long an outbound call may wait for its callback.
    pub call_timeout: Duration,
    /// Period of the expiry sweep over pending calls.
    pub sweep_interval: Duration,
    /// Period of the client's transport liveness check.
    pub liveness_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(30_000),
            sweep_interval: Duration::from_millis(500),
            liveness_interval: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Defaults overlaid with any `CULVERT_*_MS` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = millis(&lookup, CALL_TIMEOUT_VAR)? {
            config.call_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, SWEEP_INTERVAL_VAR)? {
            config.sweep_interval = ms;
        }
        if let Some(ms) = millis(&lookup, LIVENESS_INTERVAL_VAR)? {
            config.liveness_interval = ms;
        }
        Ok(config)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<Duration>> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(Error::Environment { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_millis(500));
        assert_eq!(config.liveness_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_lookup_overlays_defaults() {
        let config = Config::from_lookup(|var| match var {
            CALL_TIMEOUT_VAR => Some("1500".into()),
            _ => None,
        })
        .expect("valid config");
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.sweep_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_unparsable_value_is_rejected() {
        let err = Config::from_lookup(|var| match var {
            SWEEP_INTERVAL_VAR => Some("soon".into()),
            _ => None,
        })
        .expect_err("invalid config");
        assert_eq!(err, Error::Environment { var: SWEEP_INTERVAL_VAR, value: "soon".into() });
    }

    #[test]
    fn test_largest_timeout_still_registers_calls() {
        let config = Config::from_lookup(|var| (var == CALL_TIMEOUT_VAR).then(|| u64::MAX.to_string()))
            .expect("valid config");
        assert_eq!(config.call_timeout, Duration::from_millis(u64::MAX));

        let callbacks = crate::callback::CallbackRegistry::new(config.call_timeout);
        let id = crate::ids::CorrelationId::new();
        let _completion = callbacks.register_call(id, None).expect("register");
        assert_eq!(callbacks.clear_expired(), 0);
        callbacks.resolve(id, None, None).expect("resolve");
    }

    #[test]
    fn test_zero_is_rejected() {
        assert!(Config::from_lookup(|var| (var == LIVENESS_INTERVAL_VAR).then(|| "0".to_string())).is_err());
    }
}
