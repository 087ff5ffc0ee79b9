//! `.env` files.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// Parses `KEY=value` lines.
///
/// Lines starting with `#` are skipped and the first blank line ends the file.
/// Values keep any further `=` and lose one pair of surrounding `"` or `'`.
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    for line in content.split(['\n', '\r']) {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        env.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    env
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// The env files read for `node_env`, lowest precedence first.
pub fn env_file_names(node_env: &str) -> [String; 4] {
    [".env".to_string(), ".env.local".to_string(), format!(".env.{node_env}"), format!(".env.{node_env}.local")]
}

/// Reads `files` under `dir` and merges them, later files winning. Missing files
/// are skipped.
pub async fn read_env_files<S: AsRef<str>>(dir: &Path, files: &[S]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    for file in files {
        let path = dir.join(file.as_ref());
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let parsed = parse_env_file(&content);
                debug!(path = %path.display(), vars = parsed.len(), "loaded env file");
                env.extend(parsed);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(cause = %e, path = %path.display(), "can't read env file, skipping"),
        }
    }

    env
}
