//! Plugins that patch the options before the server starts.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DevOptions;
use crate::error::DevError;

/// When a plugin runs relative to the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforce {
    Pre,
    #[default]
    Normal,
    Post,
}

/// Options hooks.
///
/// Each hook sees the options as merged so far and may return a JSON patch,
/// which is deep-merged into them. A patch must not carry a `plugins` key.
pub trait Plugin: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn enforce(&self) -> Enforce {
        Enforce::Normal
    }

    fn config(&self, _options: &DevOptions) -> Option<Value> {
        None
    }

    fn config_resolved(&self, _options: &DevOptions) -> Option<Value> {
        None
    }
}

/// A plugin whose hooks return fixed patches, as declared in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticPlugin {
    pub name: String,
    pub enforce: Enforce,
    pub config: Option<Value>,
    pub config_resolved: Option<Value>,
}

impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn enforce(&self) -> Enforce {
        self.enforce
    }

    fn config(&self, _options: &DevOptions) -> Option<Value> {
        self.config.clone()
    }

    fn config_resolved(&self, _options: &DevOptions) -> Option<Value> {
        self.config_resolved.clone()
    }
}

/// Orders plugins `pre`, then normal, then `post`, keeping declaration order within a phase.
pub fn sort_plugins(plugins: &mut [Box<dyn Plugin>]) {
    plugins.sort_by_key(|plugin| plugin.enforce());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Config,
    ConfigResolved,
}

impl Hook {
    pub fn name(self) -> &'static str {
        match self {
            Hook::Config => "config",
            Hook::ConfigResolved => "configResolved",
        }
    }
}

/// Runs `hook` of every plugin in order, merging each returned patch into `options`.
pub fn run_hook(hook: Hook, plugins: &[Box<dyn Plugin>], options: DevOptions) -> Result<DevOptions, DevError> {
    let mut options = options;
    for plugin in plugins {
        let patch = match hook {
            Hook::Config => plugin.config(&options),
            Hook::ConfigResolved => plugin.config_resolved(&options),
        };
        let Some(patch) = patch else {
            continue;
        };

        if patch.get("plugins").is_some() {
            return Err(DevError::config_load(
                plugin.name(),
                format!("In plugin {}: Plugin method \"{}()\" must not return a \"plugins\" property.", plugin.name(), hook.name()),
            ));
        }
        options = apply_patch(&options, patch).map_err(|e| DevError::config_load(plugin.name(), e))?;
    }
    Ok(options)
}

/// Deep-merges `patch` into a copy of `options`.
pub fn apply_patch(options: &DevOptions, patch: Value) -> Result<DevOptions, serde_json::Error> {
    let mut merged = serde_json::to_value(options)?;
    merge_config(&mut merged, patch);
    serde_json::from_value(merged)
}

/// Merges `patch` into `base`: `null` values are skipped, arrays concatenate,
/// objects merge key by key, anything else replaces.
pub fn merge_config(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => merge_objects(base, patch),
        (Value::Array(base), Value::Array(items)) => base.extend(items),
        (_, Value::Null) => {}
        (base, patch) => *base = patch,
    }
}

fn merge_objects(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            continue;
        }
        match base.get_mut(&key) {
            Some(existing) => merge_config(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
