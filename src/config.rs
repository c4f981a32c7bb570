//! Runtime configuration

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Default number of user data slots per runtime
pub const DEFAULT_USER_DATA_SLOTS: usize = 8;

/// Settings of one runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Byte cap enforced by the default allocator. `None` means unlimited.
    pub memory_limit: Option<usize>,
    /// Number of host-owned root slots.
    pub user_data_slots: usize,
    /// Run one last collection when the runtime is dropped.
    pub collect_on_drop: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            user_data_slots: DEFAULT_USER_DATA_SLOTS,
            collect_on_drop: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn with_user_data_slots(mut self, slots: usize) -> Self {
        self.user_data_slots = slots;
        self
    }

    pub fn with_collect_on_drop(mut self, enabled: bool) -> Self {
        self.collect_on_drop = enabled;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(text).map_err(|e| RuntimeError::InvalidConfig(e.to_string()))
    }

    /// Read overrides from `CELLVM_MEMORY_LIMIT`, `CELLVM_USER_DATA_SLOTS`
    /// and `CELLVM_COLLECT_ON_DROP`, starting from the defaults.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeError> {
        let mut config = Self::default();
        if let Some(value) = get("CELLVM_MEMORY_LIMIT") {
            config.memory_limit = Some(parse_var("CELLVM_MEMORY_LIMIT", &value)?);
        }
        if let Some(value) = get("CELLVM_USER_DATA_SLOTS") {
            config.user_data_slots = parse_var("CELLVM_USER_DATA_SLOTS", &value)?;
        }
        if let Some(value) = get("CELLVM_COLLECT_ON_DROP") {
            config.collect_on_drop = match value.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(RuntimeError::InvalidConfig(format!(
                        "CELLVM_COLLECT_ON_DROP: expected a boolean, got '{}'",
                        other
                    )));
                }
            };
        }
        Ok(config)
    }
}

fn parse_var(key: &str, value: &str) -> Result<usize, RuntimeError> {
    value
        .trim()
        .parse()
        .map_err(|e| RuntimeError::InvalidConfig(format!("{}: {}", key, e)))
}
