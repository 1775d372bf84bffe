use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use thiserror::Error;

pub const INCREMENTAL_ENV_VAR: &str = "GRIDSTORE_INCREMENTAL";
pub const ENTITIES_PER_TICK_ENV_VAR: &str = "GRIDSTORE_ENTITIES_PER_TICK";
pub const TILES_PER_TICK_ENV_VAR: &str = "GRIDSTORE_TILES_PER_TICK";
pub const TICK_BUDGET_MS_ENV_VAR: &str = "GRIDSTORE_TICK_BUDGET_MS";
pub const PROTECTED_SLOTS_ENV_VAR: &str = "GRIDSTORE_PROTECTED_SLOTS";

/// Per-tick limits for one incremental load job. Whichever limit is hit
/// first ends the job's work for that tick.
#[derive(Debug, Clone)]
pub struct LoadBudgets {
    pub entities_per_tick: usize,
    pub tiles_per_tick: usize,
    pub max_tick_time: Duration,
}

impl Default for LoadBudgets {
    fn default() -> Self {
        Self {
            entities_per_tick: 50,
            tiles_per_tick: 400,
            max_tick_time: Duration::from_millis(4),
        }
    }
}

impl LoadBudgets {
    pub fn unlimited() -> Self {
        Self {
            entities_per_tick: usize::MAX,
            tiles_per_tick: usize::MAX,
            max_tick_time: Duration::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Spread loads across scheduler ticks. When false every load runs to
    /// completion inside the call that starts it.
    pub incremental_loading: bool,
    pub decals_enabled: bool,
    pub budgets: LoadBudgets,
    /// Container slots whose default contents survive reconstruction.
    pub protected_slots: BTreeSet<String>,
    pub position_decimals: u32,
    pub empty_tile_type: String,
    /// Written to `metadata.authorId` of saved documents.
    pub author_id: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            incremental_loading: true,
            decals_enabled: true,
            budgets: LoadBudgets::default(),
            protected_slots: BTreeSet::new(),
            position_decimals: 3,
            empty_tile_type: "Space".to_string(),
            author_id: "gridstore".to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl PersistConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|var| env::var(var).ok())
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// [`PersistConfig::from_env`]). Unset variables keep the current value.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(INCREMENTAL_ENV_VAR) {
            self.incremental_loading = parse_bool(INCREMENTAL_ENV_VAR, &raw)?;
        }
        if let Some(raw) = lookup(ENTITIES_PER_TICK_ENV_VAR) {
            self.budgets.entities_per_tick = parse_positive(ENTITIES_PER_TICK_ENV_VAR, &raw)?;
        }
        if let Some(raw) = lookup(TILES_PER_TICK_ENV_VAR) {
            self.budgets.tiles_per_tick = parse_positive(TILES_PER_TICK_ENV_VAR, &raw)?;
        }
        if let Some(raw) = lookup(TICK_BUDGET_MS_ENV_VAR) {
            let millis = parse_positive(TICK_BUDGET_MS_ENV_VAR, &raw)?;
            self.budgets.max_tick_time = Duration::from_millis(millis as u64);
        }
        if let Some(raw) = lookup(PROTECTED_SLOTS_ENV_VAR) {
            self.protected_slots = raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        Ok(self)
    }

    pub fn is_protected_slot(&self, slot: &str) -> bool {
        self.protected_slots.contains(slot)
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            expected: "a boolean (true/false/1/0)",
        }),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            expected: "a positive integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect::<HashMap<_, _>>();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn overrides_apply_to_defaults() {
        let config = PersistConfig::default()
            .with_overrides(lookup_from(&[
                (INCREMENTAL_ENV_VAR, "off"),
                (ENTITIES_PER_TICK_ENV_VAR, "8"),
                (TICK_BUDGET_MS_ENV_VAR, "12"),
                (PROTECTED_SLOTS_ENV_VAR, "cell_slot, brain ,"),
            ]))
            .expect("config");
        assert!(!config.incremental_loading);
        assert_eq!(config.budgets.entities_per_tick, 8);
        assert_eq!(config.budgets.max_tick_time, Duration::from_millis(12));
        assert!(config.is_protected_slot("cell_slot"));
        assert!(config.is_protected_slot("brain"));
        assert_eq!(config.protected_slots.len(), 2);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = PersistConfig::default()
            .with_overrides(lookup_from(&[(TILES_PER_TICK_ENV_VAR, "0")]))
            .expect_err("zero");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: TILES_PER_TICK_ENV_VAR,
                ..
            }
        ));
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = PersistConfig::default()
            .with_overrides(|_| None)
            .expect("config");
        assert!(config.incremental_loading);
        assert_eq!(config.empty_tile_type, "Space");
    }
}
