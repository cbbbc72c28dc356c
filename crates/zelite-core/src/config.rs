use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Shape of the simulated device stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub device_count: u32,
    /// `0` means devices are not partitioned.
    pub subdevices_per_device: u32,
    pub device_memory_bytes: u64,
    pub host_memory_bytes: u64,
    pub compute_queues: u32,
    /// `0` removes the copy-only queue group.
    pub copy_queues: u32,
    /// Slice used by queue workers while blocked on events, so they notice
    /// shutdown.
    pub wait_poll_interval_us: u64,
    pub timer_resolution_ns: u64,
    pub device_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_count: 2,
            subdevices_per_device: 0,
            device_memory_bytes: 256 * MIB,
            host_memory_bytes: 256 * MIB,
            compute_queues: 4,
            copy_queues: 2,
            wait_poll_interval_us: 500,
            timer_resolution_ns: 1,
            device_name: "zelite simulated device".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),

    #[error("invalid config: {0}")]
    Invalid(&'static str),

    #[error("malformed config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverConfig {
    /// Reads `ZELITE_*` overrides on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`DriverConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match lookup(var) {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnv(var)),
                None => Ok(default),
            }
        }

        let d = Self::default();
        let config = Self {
            device_count: parse(&lookup, "ZELITE_DEVICE_COUNT", d.device_count)?,
            subdevices_per_device: parse(&lookup, "ZELITE_SUBDEVICES", d.subdevices_per_device)?,
            device_memory_bytes: parse(
                &lookup,
                "ZELITE_DEVICE_MEMORY_BYTES",
                d.device_memory_bytes,
            )?,
            host_memory_bytes: parse(&lookup, "ZELITE_HOST_MEMORY_BYTES", d.host_memory_bytes)?,
            compute_queues: parse(&lookup, "ZELITE_COMPUTE_QUEUES", d.compute_queues)?,
            copy_queues: parse(&lookup, "ZELITE_COPY_QUEUES", d.copy_queues)?,
            wait_poll_interval_us: parse(&lookup, "ZELITE_WAIT_POLL_US", d.wait_poll_interval_us)?,
            timer_resolution_ns: d.timer_resolution_ns,
            device_name: d.device_name,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_count == 0 {
            return Err(ConfigError::Invalid("device_count must be at least 1"));
        }
        if self.compute_queues == 0 {
            return Err(ConfigError::Invalid("compute_queues must be at least 1"));
        }
        if self.device_memory_bytes == 0 || self.host_memory_bytes == 0 {
            return Err(ConfigError::Invalid("memory sizes must be non-zero"));
        }
        if self.wait_poll_interval_us == 0 {
            return Err(ConfigError::Invalid("wait_poll_interval_us must be non-zero"));
        }
        if self.timer_resolution_ns == 0 {
            return Err(ConfigError::Invalid("timer_resolution_ns must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = DriverConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn env_overrides_are_parsed() {
        let config = DriverConfig::from_lookup(lookup(&[
            ("ZELITE_DEVICE_COUNT", "3"),
            ("ZELITE_SUBDEVICES", "2"),
            ("ZELITE_COPY_QUEUES", " 0 "),
        ]))
        .unwrap();
        assert_eq!(config.device_count, 3);
        assert_eq!(config.subdevices_per_device, 2);
        assert_eq!(config.copy_queues, 0);
    }

    #[test]
    fn unparsable_env_names_the_variable() {
        let err = DriverConfig::from_lookup(lookup(&[("ZELITE_WAIT_POLL_US", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv("ZELITE_WAIT_POLL_US")));
    }

    #[test]
    fn zero_devices_are_rejected() {
        let err = DriverConfig::from_lookup(lookup(&[("ZELITE_DEVICE_COUNT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = DriverConfig::from_json(r#"{ "device_count": 1, "copy_queues": 1 }"#).unwrap();
        assert_eq!(config.device_count, 1);
        assert_eq!(config.copy_queues, 1);
        assert_eq!(config.compute_queues, DriverConfig::default().compute_queues);
    }

    #[test]
    fn json_rejects_unknown_fields() {
        assert!(matches!(
            DriverConfig::from_json(r#"{ "devices": 1 }"#),
            Err(ConfigError::Json(_))
        ));
    }
}
