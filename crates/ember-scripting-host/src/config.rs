use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Whether scripts are loaded at all (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Root directory searched for `.lua` files (default: <data dir>/lua_scripts)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Subdirectory of the script root holding extensions, loaded before the
    /// scripts that use them
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: String,

    /// Whether hot reload is enabled (default: false)
    #[serde(default)]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds (default: 1000ms)
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,

    /// Per-script settings keyed by file stem; `enabled = false` skips the script
    #[serde(default)]
    pub scripts: HashMap<String, toml::Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_extensions_dir() -> String {
    "extensions".to_string()
}

fn default_hot_reload_interval() -> u64 {
    1000
}

fn expand_home(path: PathBuf) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => BaseDirs::new().map(|dirs| dirs.home_dir().join(rest)),
        Err(_) => None,
    };
    expanded.unwrap_or(path)
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            extensions_dir: default_extensions_dir(),
            scripts: HashMap::new(),
            hot_reload: false,
            hot_reload_interval_ms: default_hot_reload_interval(),
        }
    }
}

impl ScriptingConfig {
    /// Get the script directory path (use provided or default)
    ///
    /// A leading `~` is expanded to the user's home directory.
    pub fn script_dir(&self) -> PathBuf {
        match &self.script_dir {
            Some(dir) => expand_home(dir.clone()),
            None => ProjectDirs::from("", "", "ember")
                .map(|dirs| dirs.data_dir().join("lua_scripts"))
                .unwrap_or_else(|| PathBuf::from("lua_scripts")),
        }
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.script_dir().join(&self.extensions_dir)
    }

    pub fn hot_reload_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload_interval_ms)
    }

    /// Whether the script with this file stem should be loaded
    pub fn is_script_enabled(&self, id: &str) -> bool {
        self.scripts
            .get(id)
            .and_then(|settings| settings.get("enabled"))
            .and_then(toml::Value::as_bool)
            .unwrap_or(true)
    }
}
