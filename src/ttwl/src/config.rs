//! Catalog location settings
//!
//! Stored as TOML at `<config dir>/ttwl/config.toml`. Every field is
//! optional; a missing file means "use the defaults".

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};


/// Environment variable that overrides the configured data directory
pub const DATA_DIR_ENV: &str = "TTWL_DATA_DIR";

/// Errors that can occur while reading or writing the config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory; set TTWL_DATA_DIR")]
    NoDataDir,
}

const DEFAULT_SERIAL_DB: &str = "inventoryserialdb.json.gz";
const DEFAULT_BALANCE_NAMES: &str = "balance_name_mapping.json.gz";
const DEFAULT_PART_KEYS: &str = "balance_to_inv_key.json.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding the catalog files
    pub data_dir: Option<PathBuf>,
    /// Serial database, relative to `data_dir` unless absolute
    pub serial_db: PathBuf,
    /// Balance -> English name map; `None` disables display names
    pub balance_names: Option<PathBuf>,
    /// Balance -> part category map; `None` leaves every item header-only
    pub part_keys: Option<PathBuf>,
    /// Inventory types that accept enchantments; `None` allows all
    pub enchantable_types: Option<Vec<String>>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            serial_db: PathBuf::from(DEFAULT_SERIAL_DB),
            balance_names: Some(PathBuf::from(DEFAULT_BALANCE_NAMES)),
            part_keys: Some(PathBuf::from(DEFAULT_PART_KEYS)),
            enchantable_types: None,
        }
    }
}

impl CatalogConfig {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("ttwl");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the user's configuration, or the defaults if there is none
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(toml::from_str(&contents)?)
    }

    /// Save to the user's config file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)
    }

    /// Resolve the data directory: `TTWL_DATA_DIR`, then the configured
    /// directory, then `<data dir>/ttwl`
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        self.resolve_data_dir(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
    }

    fn resolve_data_dir(&self, env_override: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = env_override.filter(|d| !d.as_os_str().is_empty()) {
            return Ok(dir);
        }
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("ttwl"))
            .ok_or(ConfigError::NoDataDir)
    }

    pub fn serial_db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.serial_db))
    }

    pub fn balance_names_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        self.optional_path(self.balance_names.as_deref())
    }

    pub fn part_keys_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        self.optional_path(self.part_keys.as_deref())
    }

    fn optional_path(&self, file: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        match file {
            Some(file) => Ok(Some(self.data_dir()?.join(file))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, PartsCatalog, SerialDb};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CatalogConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CatalogConfig::default());
    }

    #[test]
    fn test_save_and_reload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.toml");

        let config = CatalogConfig {
            data_dir: Some(PathBuf::from("/srv/ttwl")),
            enchantable_types: Some(vec!["InvData_Ring".to_string()]),
            ..CatalogConfig::default()
        };
        config.save_to(&path)?;

        assert_eq!(CatalogConfig::load_from(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "data_dir = \"/opt/catalog\"\n").unwrap();

        let config = CatalogConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/opt/catalog")));
        assert_eq!(config.serial_db, PathBuf::from(DEFAULT_SERIAL_DB));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "data_dir = [").unwrap();

        assert!(matches!(
            CatalogConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_config_errors_surface_through_catalog_loading() {
        let err = CatalogError::from(ConfigError::NoDataDir);
        assert!(matches!(err, CatalogError::Config(ConfigError::NoDataDir)));
        assert_eq!(err.to_string(), ConfigError::NoDataDir.to_string());
    }

    #[test]
    fn test_env_override_wins() {
        let config = CatalogConfig {
            data_dir: Some(PathBuf::from("/configured")),
            ..CatalogConfig::default()
        };
        assert_eq!(
            config.resolve_data_dir(Some(PathBuf::from("/from-env"))).unwrap(),
            PathBuf::from("/from-env")
        );
        assert_eq!(
            config.resolve_data_dir(Some(PathBuf::new())).unwrap(),
            PathBuf::from("/configured")
        );
        assert_eq!(
            config.resolve_data_dir(None).unwrap(),
            PathBuf::from("/configured")
        );
    }

    #[test]
    fn test_loads_catalog_from_configured_files() {
        let dir = tempfile::tempdir().unwrap();
        let testdata = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata");
        let config = CatalogConfig {
            data_dir: Some(dir.path().to_path_buf()),
            serial_db: testdata.join("inventoryserialdb.json"),
            balance_names: Some(testdata.join("balance_name_mapping.json")),
            part_keys: Some(testdata.join("balance_to_inv_key.json")),
            enchantable_types: Some(vec!["/Game/Gear/Rings/_Shared/_Design/InvData_Ring".into()]),
        };

        let db = SerialDb::load(&config).unwrap();
        assert_eq!(db.max_version(), 3);
        assert!(db
            .part_key("/Game/Gear/Weapons/Pistols/Dahl/_Shared/_Design/Balance/Balance_PS_DAL_01_Common")
            .is_some());
        assert!(!db.is_enchantable("/Game/Gear/Amulets/_Shared/_Design/InvData_Amulet"));
    }
}
