//! Run settings.
//!
//! The host process hands a run its project, stack, mode and configuration
//! through environment variables:
//!
//! | Variable | Contents |
//! |----------|----------|
//! | `STRATA_PROJECT` | Project name (required) |
//! | `STRATA_STACK` | Stack name (required) |
//! | `STRATA_DRY_RUN` | `true`/`false`/`1`/`0`, default `false` |
//! | `STRATA_CONFIG` | JSON object of `"namespace:key"` to string |
//! | `STRATA_CONFIG_SECRET_KEYS` | JSON array of keys whose values are secret |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Variable holding the project name.
pub const PROJECT_VAR: &str = "STRATA_PROJECT";
/// Variable holding the stack name.
pub const STACK_VAR: &str = "STRATA_STACK";
/// Variable selecting a preview run.
pub const DRY_RUN_VAR: &str = "STRATA_DRY_RUN";
/// Variable holding the configuration map as JSON.
pub const CONFIG_VAR: &str = "STRATA_CONFIG";
/// Variable listing the secret configuration keys as a JSON array.
pub const SECRET_KEYS_VAR: &str = "STRATA_CONFIG_SECRET_KEYS";

/// Everything a deployment run needs to know about where it is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Project name; also the default configuration namespace.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// `true` during a preview: computed outputs stay unknown.
    #[serde(default)]
    pub dry_run: bool,
    /// Configuration values keyed by `namespace:key`.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Keys in [`RunSettings::config`] whose values are secret.
    #[serde(default)]
    pub secret_keys: BTreeSet<String>,
}

impl RunSettings {
    /// Settings for `project`/`stack` with no configuration.
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            dry_run: false,
            config: BTreeMap::new(),
            secret_keys: BTreeSet::new(),
        }
    }

    /// Returns the settings with `dry_run` set.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the settings with one more configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Returns the settings with one more secret configuration value.
    #[must_use]
    pub fn with_secret_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.secret_keys.insert(key.clone());
        self.config.insert(key, value.into());
        self
    }

    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |variable: &str| {
            lookup(variable)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingSetting {
                    variable: variable.to_string(),
                })
        };

        let project = required(PROJECT_VAR)?;
        let stack = required(STACK_VAR)?;
        let dry_run = match lookup(DRY_RUN_VAR) {
            Some(raw) => parse_bool(DRY_RUN_VAR, &raw)?,
            None => false,
        };
        let config = match lookup(CONFIG_VAR) {
            Some(raw) => parse_json(CONFIG_VAR, &raw)?,
            None => BTreeMap::new(),
        };
        let secret_keys = match lookup(SECRET_KEYS_VAR) {
            Some(raw) => parse_json(SECRET_KEYS_VAR, &raw)?,
            None => BTreeSet::new(),
        };

        tracing::debug!(
            project = %project,
            stack = %stack,
            dry_run,
            config_keys = config.len(),
            "Loaded run settings"
        );

        Ok(Self {
            project,
            stack,
            dry_run,
            config,
            secret_keys,
        })
    }
}

fn parse_bool(variable: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(ConfigError::InvalidSetting {
            variable: variable.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(variable: &str, raw: &str) -> Result<T, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::InvalidSetting {
        variable: variable.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn reads_all_settings() {
        let config = r#"{"web:region":"eu-west-1","web:dbPassword":"hunter2"}"#;
        let settings = RunSettings::from_lookup(lookup(&[
            (PROJECT_VAR, "web"),
            (STACK_VAR, "dev"),
            (DRY_RUN_VAR, "1"),
            (CONFIG_VAR, config),
            (SECRET_KEYS_VAR, r#"["web:dbPassword"]"#),
        ]))
        .unwrap();

        assert_eq!(settings.project, "web");
        assert_eq!(settings.stack, "dev");
        assert!(settings.dry_run);
        assert_eq!(settings.config["web:region"], "eu-west-1");
        assert!(settings.secret_keys.contains("web:dbPassword"));
    }

    #[test]
    fn missing_project_is_reported() {
        let err = RunSettings::from_lookup(lookup(&[(STACK_VAR, "dev")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingSetting {
                variable: PROJECT_VAR.to_string()
            }
        );
    }

    #[test]
    fn malformed_dry_run_is_reported() {
        let err = RunSettings::from_lookup(lookup(&[
            (PROJECT_VAR, "web"),
            (STACK_VAR, "dev"),
            (DRY_RUN_VAR, "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { variable, .. } if variable == DRY_RUN_VAR
        ));
    }

    #[test]
    fn malformed_config_json_is_reported() {
        let err = RunSettings::from_lookup(lookup(&[
            (PROJECT_VAR, "web"),
            (STACK_VAR, "dev"),
            (CONFIG_VAR, "{not json"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { variable, .. } if variable == CONFIG_VAR
        ));
    }

    #[test]
    fn defaults_to_update_with_no_config() {
        let settings =
            RunSettings::from_lookup(lookup(&[(PROJECT_VAR, "web"), (STACK_VAR, "prod")])).unwrap();
        assert_eq!(settings, RunSettings::new("web", "prod"));
    }
}
