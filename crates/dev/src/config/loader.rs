//! Config file loading.

use std::io;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::plugin::{Plugin, StaticPlugin};
use crate::error::DevError;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE: &str = "trs.config.json";

/// What a config file contributes.
#[derive(Debug, Default)]
pub struct LoadedConfig {
    /// Merged into the options before any plugin hook runs.
    pub patch: Option<Value>,
    pub plugins: Vec<Box<dyn Plugin>>,
}

/// Finds and reads the project config for `cwd`.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigLoader: Send + Sync {
    fn load(&self, cwd: &Path) -> Result<LoadedConfig, DevError>;
}

/// Reads [`CONFIG_FILE`].
///
/// The file holds either an array of plugins, or an object whose `plugins` key
/// lists plugins and whose other keys patch the options. A missing file yields
/// an empty config.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfigLoader;

impl ConfigLoader for JsonConfigLoader {
    fn load(&self, cwd: &Path) -> Result<LoadedConfig, DevError> {
        let path = cwd.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadedConfig::default()),
            Err(e) => return Err(DevError::config_load(&path, e)),
        };

        let value: Value = serde_json::from_str(&content).map_err(|e| DevError::config_load(&path, e))?;
        let config = match value {
            Value::Array(plugins) => LoadedConfig { patch: None, plugins: parse_plugins(&path, plugins)? },
            Value::Object(mut object) => {
                let plugins = match object.remove("plugins") {
                    Some(Value::Array(plugins)) => parse_plugins(&path, plugins)?,
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => return Err(DevError::config_load(&path, "\"plugins\" must be an array")),
                };
                let patch = if object.is_empty() { None } else { Some(Value::Object(object)) };
                LoadedConfig { patch, plugins }
            }
            _ => return Err(DevError::config_load(&path, "expected an object or an array of plugins")),
        };

        debug!(path = %path.display(), plugins = config.plugins.len(), "loaded config file");
        Ok(config)
    }
}

fn parse_plugins(path: &Path, plugins: Vec<Value>) -> Result<Vec<Box<dyn Plugin>>, DevError> {
    plugins
        .into_iter()
        .filter(|plugin| !plugin.is_null())
        .map(|plugin| {
            let plugin: StaticPlugin = serde_json::from_value(plugin).map_err(|e| DevError::config_load(path, e))?;
            Ok(Box::new(plugin) as Box<dyn Plugin>)
        })
        .collect()
}
