//! Runtime configuration
//!
//! [`RuntimeConfig`] is read from JSON (every field optional) and can be
//! overridden from `FILAMENT_*` environment variables.
//!
//! ```json
//! {
//!   "maxOpsBeforeYield": 2048,
//!   "schedulingPriority": 0,
//!   "maxNextTickBeforeTimer": 2048,
//!   "microtaskBudget": 10000
//! }
//! ```

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fiber_refs::{DEFAULT_MAX_OPS_BEFORE_YIELD, DEFAULT_SCHEDULING_PRIORITY};
use crate::scheduler::Priority;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FILAMENT_";

/// Settings a [`Runtime`](crate::runtime::Runtime) is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Op budget of root fibers before `should_yield` fires
    pub max_ops_before_yield: u32,
    /// Priority root fibers are rescheduled at
    pub scheduling_priority: Priority,
    /// Consecutive microtask drain cycles before the scheduler moves to a
    /// timer
    pub max_next_tick_before_timer: u32,
    /// Microtasks the event loop runs per tick
    pub microtask_budget: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_ops_before_yield: DEFAULT_MAX_OPS_BEFORE_YIELD,
            scheduling_priority: DEFAULT_SCHEDULING_PRIORITY,
            max_next_tick_before_timer: 2048,
            microtask_budget: 10_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse from a JSON string; missing fields take their defaults
    pub fn load(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading runtime config");
        Self::load(&content)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `FILAMENT_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a full variable name such
    /// as `FILAMENT_MICROTASK_BUDGET` to its value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        override_field(&lookup, "MAX_OPS_BEFORE_YIELD", &mut self.max_ops_before_yield)?;
        override_field(&lookup, "SCHEDULING_PRIORITY", &mut self.scheduling_priority)?;
        override_field(
            &lookup,
            "MAX_NEXT_TICK_BEFORE_TIMER",
            &mut self.max_next_tick_before_timer,
        )?;
        override_field(&lookup, "MICROTASK_BUDGET", &mut self.microtask_budget)?;
        self.validate()?;
        Ok(self)
    }

    /// Reject values that would stop the runtime from making progress
    pub fn validate(&self) -> Result<()> {
        if self.max_ops_before_yield == 0 {
            return Err(Error::config("maxOpsBeforeYield must be at least 1"));
        }
        if self.max_next_tick_before_timer == 0 {
            return Err(Error::config("maxNextTickBeforeTimer must be at least 1"));
        }
        if self.microtask_budget == 0 {
            return Err(Error::config("microtaskBudget must be at least 1"));
        }
        Ok(())
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn override_field<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    field: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(raw) = lookup(&key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{key}={raw:?}: {e}")))?;
        tracing::debug!(%key, "config override from environment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_ops_before_yield, 2048);
        assert_eq!(config.scheduling_priority, 0);
        assert_eq!(config.max_next_tick_before_timer, 2048);
        assert_eq!(config.microtask_budget, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let config = RuntimeConfig::load(r#"{ "maxOpsBeforeYield": 64 }"#).unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                max_ops_before_yield: 64,
                ..RuntimeConfig::default()
            }
        );
    }

    #[test]
    fn test_load_rejects_zero_budget() {
        let err = RuntimeConfig::load(r#"{ "microtaskBudget": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_malformed_json() {
        let err = RuntimeConfig::load("{ not json").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "schedulingPriority": -3 }}"#).unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.scheduling_priority, -3);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::ConfigIo { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::default()
            .with_overrides(|key| match key {
                "FILAMENT_MAX_OPS_BEFORE_YIELD" => Some("10".into()),
                "FILAMENT_SCHEDULING_PRIORITY" => Some(" -1 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_ops_before_yield, 10);
        assert_eq!(config.scheduling_priority, -1);
        assert_eq!(config.microtask_budget, 10_000);
    }

    #[test]
    fn test_override_parse_error() {
        let err = RuntimeConfig::default()
            .with_overrides(|key| (key == "FILAMENT_MICROTASK_BUDGET").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FILAMENT_MICROTASK_BUDGET"));
    }

    #[test]
    fn test_json_roundtrip_uses_camel_case() {
        let json = RuntimeConfig::default().to_json().unwrap();
        assert!(json.contains("\"maxNextTickBeforeTimer\": 2048"));
    }
}
