//! Executor configuration.

use kiln_core::Device;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable selecting the default device (`cpu`, `cuda`, `cuda:N`).
pub const DEVICE_VAR: &str = "KILN_DEVICE";
/// Environment variable enabling a context sync after every operator.
pub const SYNC_VAR: &str = "KILN_SYNC_EACH_OP";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Device for operators whose definition names none.
    pub device: Device,
    /// Call `Operator::synchronize` after each operator, so device errors
    /// are attributed to the operator that caused them.
    pub sync_after_each_op: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            sync_after_each_op: false,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by `KILN_DEVICE` and `KILN_SYNC_EACH_OP`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(device) = lookup(DEVICE_VAR) {
            config.device = device.trim().parse()?;
        }
        if let Some(sync) = lookup(SYNC_VAR) {
            config.sync_after_each_op = parse_flag(SYNC_VAR, &sync)?;
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_sync_after_each_op(mut self, sync: bool) -> Self {
        self.sync_after_each_op = sync;
        self
    }
}

fn parse_flag(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{var}: expected a boolean, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ExecutorConfig::default());
        assert_eq!(config.device, Device::Cpu);
        assert!(!config.sync_after_each_op);
    }

    #[test]
    fn test_env_overrides() {
        let config =
            ExecutorConfig::from_lookup(lookup(&[(DEVICE_VAR, "cuda:1"), (SYNC_VAR, "true")]))
                .unwrap();
        assert_eq!(config.device, Device::Cuda(1));
        assert!(config.sync_after_each_op);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ExecutorConfig::from_lookup(lookup(&[(DEVICE_VAR, "tpu")])),
            Err(Error::Core(_))
        ));
        assert!(matches!(
            ExecutorConfig::from_lookup(lookup(&[(SYNC_VAR, "maybe")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json() {
        let config = ExecutorConfig::from_json(r#"{"sync_after_each_op": true}"#).unwrap();
        assert_eq!(config.device, Device::Cpu);
        assert!(config.sync_after_each_op);
    }
}
