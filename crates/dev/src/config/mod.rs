//! Dev server options.
//!
//! Options come from the command line, then pass through [`normalize_options`]:
//! `.env` files are read, `HOST` and `DEBUG` are applied, the config file found by a
//! [`ConfigLoader`] is merged in, and every plugin's `config` and `configResolved`
//! hooks patch the result in `enforce` order.

pub mod env;
pub mod loader;
pub mod plugin;

pub use loader::{CONFIG_FILE, ConfigLoader, JsonConfigLoader, LoadedConfig};
pub use plugin::{Enforce, Plugin, StaticPlugin};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compression::CompressionConfig;
use crate::error::DevError;
use plugin::{Hook, apply_patch, run_hook, sort_plugins};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_THRESHOLD: u64 = 1024;

/// Serving mode. Only `dev` starts a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Dev,
    Build,
}

impl Mode {
    /// `NODE_ENV` used when none is set.
    pub fn default_node_env(self) -> &'static str {
        match self {
            Mode::Dev => "development",
            Mode::Build => "production",
        }
    }
}

/// `compress` option: on/off, or on with a custom threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Compress {
    Enabled(bool),
    Threshold(u64),
}

impl Default for Compress {
    fn default() -> Self {
        Compress::Enabled(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevOptions {
    /// Project directory; config and `.env` files are read from here.
    pub cwd: PathBuf,
    /// Directory served at `/`.
    pub root: PathBuf,
    /// Public directory, relative to `cwd`. When it exists it becomes the root.
    pub public: String,
    /// Generated files, consulted before `root`.
    pub overlay_dir: Option<PathBuf>,
    pub host: String,
    pub port: Option<u16>,
    pub compress: Compress,
    pub brotli: bool,
    pub level: i32,
    pub env: BTreeMap<String, String>,
    pub debug: bool,
    pub mode: Mode,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            root: PathBuf::from("."),
            public: "public".to_string(),
            overlay_dir: None,
            host: DEFAULT_HOST.to_string(),
            port: None,
            compress: Compress::default(),
            brotli: true,
            level: 4,
            env: BTreeMap::new(),
            debug: false,
            mode: Mode::Dev,
        }
    }
}

impl DevOptions {
    /// Defaults for a project in `cwd`, serving `cwd` with `.cache` as overlay.
    pub fn for_dir<P: Into<PathBuf>>(cwd: P) -> Self {
        let cwd = cwd.into();
        Self { root: cwd.clone(), overlay_dir: Some(cwd.join(".cache")), cwd, ..Self::default() }
    }

    /// Response compression settings, `None` when compression is off.
    pub fn compression(&self) -> Option<CompressionConfig> {
        let threshold = match self.compress {
            Compress::Enabled(false) | Compress::Threshold(0) => return None,
            Compress::Enabled(true) => DEFAULT_THRESHOLD,
            Compress::Threshold(threshold) => threshold,
        };
        Some(CompressionConfig::dev(threshold).with_brotli(self.brotli).with_level(self.level))
    }

    fn public_root(&self) -> Option<PathBuf> {
        if self.public == "." {
            return None;
        }
        let dir = self.cwd.join(&self.public);
        dir.is_dir().then_some(dir)
    }
}

/// Whether a `DEBUG` environment value turns debug output on.
pub fn debug_from_env(value: Option<&str>) -> bool {
    matches!(value, Some("true" | "1"))
}

/// Completes `options` for serving.
///
/// `lookup` reads environment variables, normally `|key| std::env::var(key).ok()`.
pub async fn normalize_options<L, F>(options: DevOptions, loader: &L, lookup: F) -> Result<DevOptions, DevError>
where
    L: ConfigLoader + ?Sized,
    F: Fn(&str) -> Option<String>,
{
    let mut options = options;

    let node_env = lookup("NODE_ENV").unwrap_or_else(|| options.mode.default_node_env().to_string());
    let mut env = env::read_env_files(&options.cwd, &env::env_file_names(&node_env)).await;
    env.append(&mut options.env);
    options.env = env;

    if let Some(host) = lookup("HOST").filter(|host| !host.is_empty()) {
        options.host = host;
    }
    if let Some(root) = options.public_root() {
        options.root = root;
    }
    let public = options.public.clone();

    let LoadedConfig { patch, mut plugins } = loader.load(&options.cwd)?;
    if let Some(patch) = patch {
        options = apply_patch(&options, patch).map_err(|e| DevError::config_load(options.cwd.join(CONFIG_FILE), e))?;
    }

    sort_plugins(&mut plugins);
    options = run_hook(Hook::Config, &plugins, options)?;
    options = run_hook(Hook::ConfigResolved, &plugins, options)?;

    if options.public != public
        && let Some(root) = options.public_root()
    {
        options.root = root;
    }

    if debug_from_env(lookup("DEBUG").as_deref()) {
        options.debug = true;
    }

    debug!(?options, plugins = plugins.len(), "options resolved");
    Ok(options)
}
