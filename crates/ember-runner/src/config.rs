use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use ember_events::EntityKind;
use ember_scripting_host::{InMemoryCatalogue, PartitionId, ScriptingConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to determine the config directory")]
    NoConfigDir,

    #[error("IO error on config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmberConfig {
    #[serde(default)]
    pub scripting: ScriptingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub world: WorldConfig,

    /// Templates scripts may bind entry events to
    #[serde(default)]
    pub catalogue: CatalogueConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to <data dir>/logs/<component>.log
    #[serde(default)]
    pub file: bool,

    /// Filter directive used when RUST_LOG is unset (default: "info")
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Time between world ticks in milliseconds (default: 100ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Partition this process hosts
    #[serde(default)]
    pub partition: u32,
}

fn default_tick_interval() -> u64 {
    100
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            partition: 0,
        }
    }
}

impl WorldConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn partition(&self) -> PartitionId {
        PartitionId(self.partition)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    #[serde(default)]
    pub creatures: Vec<u32>,
    #[serde(default)]
    pub gameobjects: Vec<u32>,
    #[serde(default)]
    pub items: Vec<u32>,
    /// Opcodes below this value can carry packet bindings
    #[serde(default = "default_opcode_count")]
    pub opcode_count: u32,
}

fn default_opcode_count() -> u32 {
    0x51F
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            creatures: Vec::new(),
            gameobjects: Vec::new(),
            items: Vec::new(),
            opcode_count: default_opcode_count(),
        }
    }
}

impl CatalogueConfig {
    pub fn build(&self) -> InMemoryCatalogue {
        let catalogue = InMemoryCatalogue::with_opcode_count(self.opcode_count);
        catalogue.add_all(EntityKind::Creature, self.creatures.iter().copied());
        catalogue.add_all(EntityKind::GameObject, self.gameobjects.iter().copied());
        catalogue.add_all(EntityKind::Item, self.items.iter().copied());
        catalogue
    }
}

impl EmberConfig {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ember").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        let io_error = |source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_error)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_scripting_host::EntityCatalogue;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: EmberConfig = toml::from_str("").unwrap();

        assert!(config.scripting.enabled);
        assert!(!config.logging.file);
        assert_eq!(config.world.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.world.partition(), PartitionId::DEFAULT);
        assert_eq!(config.catalogue.opcode_count, 0x51F);
    }

    #[test]
    fn test_catalogue_from_config() {
        let config: EmberConfig = toml::from_str(
            r#"
            [catalogue]
            creatures = [448, 3100]
            items = [25]
            opcode_count = 16
            "#,
        )
        .unwrap();
        let catalogue = config.catalogue.build();

        assert!(catalogue.exists(EntityKind::Creature, 448));
        assert!(!catalogue.exists(EntityKind::Creature, 25));
        assert!(catalogue.exists(EntityKind::Item, 25));
        assert!(catalogue.exists(EntityKind::Opcode, 15));
        assert!(!catalogue.exists(EntityKind::Opcode, 16));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = EmberConfig::default();
        config.world.partition = 3;
        config.scripting.hot_reload = true;
        config.save_to(&path).unwrap();

        let loaded = EmberConfig::load_from(&path).unwrap();
        assert_eq!(loaded.world.partition, 3);
        assert!(loaded.scripting.hot_reload);
    }

    #[test]
    fn test_load_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            EmberConfig::load_from(&missing),
            Err(ConfigLoadError::NotFound(_))
        ));

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "[world\ntick_interval_ms = ").unwrap();
        assert!(matches!(
            EmberConfig::load_from(&broken),
            Err(ConfigLoadError::Parse { .. })
        ));
    }
}
