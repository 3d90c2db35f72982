//! Parts catalog lookups used by the serial codec.
//!
//! Every field of a serial past the schema version is an index into one of
//! the catalog's categories, written with a bit width that depends on the
//! schema version. The catalog answers three questions: how wide a category
//! is at a version, which asset an index names, and which part category a
//! balance uses for its part list.
//!
//! [`SerialDb`] is the JSON-backed implementation. It is built once, then
//! shared read-only (usually behind an `Arc`) by every serial.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::config::{CatalogConfig, ConfigError};

/// Balance (item archetype) category
pub const BALANCE_CATEGORY: &str = "InventoryBalanceData";
/// Inventory data (item sub type) category
pub const SUB_TYPE_CATEGORY: &str = "InventoryData";
/// Manufacturer category
pub const SOURCE_CATEGORY: &str = "ManufacturerData";
/// Generic parts, which is where enchantments live
pub const ENCHANTMENT_CATEGORY: &str = "InventoryGenericPartData";

/// Schema versions are stored in 7 bits
pub const MAX_SCHEMA_VERSION: u8 = 0x7F;

/// Widest index field a category may declare
pub const MAX_INDEX_BITS: u8 = 32;

/// Errors that can occur while loading a catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Catalog contains no categories")]
    Empty,

    #[error("Category {0} has no bit widths")]
    NoVersions(String),

    #[error("Category {category} lists version {version}, above the 7-bit maximum")]
    VersionTooLarge { category: String, version: u8 },

    #[error("Category {category} declares {bits}-bit indices at version {version}, above the 32-bit maximum")]
    WidthTooLarge {
        category: String,
        version: u8,
        bits: u8,
    },
}

/// Read-only lookups the serial codec depends on
pub trait PartsCatalog: Send + Sync + fmt::Debug {
    /// Highest schema version any category knows about
    fn max_version(&self) -> u8;

    /// Bit width of `category` indices at `version`, or `None` if the
    /// category is unknown
    fn bits_for(&self, category: &str, version: u8) -> Option<u8>;

    /// Asset name at a 1-based `index`; `0` never names anything
    fn part_name(&self, category: &str, index: u32) -> Option<&str>;

    /// Inverse of [`PartsCatalog::part_name`]
    fn part_index(&self, category: &str, name: &str) -> Option<u32>;

    /// Part category holding the part list for a balance
    fn part_key(&self, balance: &str) -> Option<&str>;

    /// English name for a balance
    fn display_name(&self, _balance: &str) -> Option<&str> {
        None
    }

    /// Whether items of this sub type may carry enchantments
    fn is_enchantable(&self, _sub_type: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct VersionWidth {
    version: u8,
    bits: u8,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    versions: Vec<VersionWidth>,
    #[serde(default)]
    assets: Vec<String>,
}

#[derive(Debug, Clone)]
struct CategoryTable {
    /// Sorted by version
    versions: Vec<VersionWidth>,
    assets: Vec<String>,
    index_by_name: HashMap<String, u32>,
}

impl CategoryTable {
    fn new(name: &str, mut versions: Vec<VersionWidth>, assets: Vec<String>) -> Result<Self, CatalogError> {
        if versions.is_empty() {
            return Err(CatalogError::NoVersions(name.to_string()));
        }
        if let Some(bad) = versions.iter().find(|v| v.version > MAX_SCHEMA_VERSION) {
            return Err(CatalogError::VersionTooLarge {
                category: name.to_string(),
                version: bad.version,
            });
        }
        if let Some(bad) = versions.iter().find(|v| v.bits > MAX_INDEX_BITS) {
            return Err(CatalogError::WidthTooLarge {
                category: name.to_string(),
                version: bad.version,
                bits: bad.bits,
            });
        }
        versions.sort_by_key(|v| v.version);

        // First occurrence wins for duplicated asset names
        let mut index_by_name = HashMap::with_capacity(assets.len());
        for (i, asset) in assets.iter().enumerate() {
            index_by_name.entry(asset.clone()).or_insert(i as u32 + 1);
        }

        Ok(Self {
            versions,
            assets,
            index_by_name,
        })
    }

    fn bits_for(&self, version: u8) -> u8 {
        let mut bits = self.versions[0].bits;
        for entry in &self.versions {
            if entry.version > version {
                break;
            }
            bits = entry.bits;
        }
        bits
    }

    fn max_version(&self) -> u8 {
        self.versions.last().map_or(0, |v| v.version)
    }
}

/// Catalog loaded from the serial database and its companion name maps
#[derive(Debug, Clone, Default)]
pub struct SerialDb {
    categories: HashMap<String, CategoryTable>,
    max_version: u8,
    /// Lower-cased balance path (no object suffix) -> English name
    display_names: HashMap<String, String>,
    /// Lower-cased `path.Object` balance -> part category
    part_keys: HashMap<String, String>,
    /// Lower-cased sub types allowed to carry enchantments; `None` allows all
    enchantable: Option<HashSet<String>>,
}

fn open_data_file(path: &Path) -> Result<Box<dyn Read>, CatalogError> {
    let file = File::open(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let reader = open_data_file(path)?;
    Ok(serde_json::from_reader(reader)?)
}

/// Key used by the balance -> part category map
fn part_key_lookup(balance: &str) -> String {
    if balance.contains('.') {
        balance.to_lowercase()
    } else {
        let object = balance.rsplit('/').next().unwrap_or(balance);
        format!("{}.{}", balance, object).to_lowercase()
    }
}

/// Key used by the balance -> English name map
fn display_name_lookup(balance: &str) -> String {
    balance
        .rsplit_once('.')
        .map_or(balance, |(path, _)| path)
        .to_lowercase()
}

fn lowercase_keys(map: HashMap<String, String>) -> HashMap<String, String> {
    map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

impl SerialDb {
    /// Start building a catalog programmatically
    pub fn builder() -> SerialDbBuilder {
        SerialDbBuilder::default()
    }

    fn from_raw(raw: HashMap<String, RawCategory>) -> Result<Self, CatalogError> {
        if raw.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut categories = HashMap::with_capacity(raw.len());
        for (name, category) in raw {
            let table = CategoryTable::new(&name, category.versions, category.assets)?;
            categories.insert(name, table);
        }
        let max_version = categories
            .values()
            .map(CategoryTable::max_version)
            .max()
            .unwrap_or(0);

        Ok(Self {
            categories,
            max_version,
            ..Self::default()
        })
    }

    /// Parse the serial database JSON
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::from_raw(serde_json::from_str(json)?)
    }

    /// Load the serial database from a `.json` or `.json.gz` file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        Self::from_raw(read_json_file(path)?)
    }

    /// Load everything a config points at
    pub fn load(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut db = Self::from_file(&config.serial_db_path()?)?;
        if let Some(path) = config.balance_names_path()? {
            db = db.with_display_names(read_json_file(&path)?);
        }
        if let Some(path) = config.part_keys_path()? {
            db = db.with_part_keys(read_json_file(&path)?);
        }
        if let Some(types) = &config.enchantable_types {
            db = db.with_enchantable(types.iter().cloned());
        }

        tracing::info!(
            categories = db.categories.len(),
            max_version = db.max_version,
            part_keys = db.part_keys.len(),
            "loaded serial catalog"
        );
        Ok(db)
    }

    /// Attach the balance -> English name map
    pub fn with_display_names(mut self, names: HashMap<String, String>) -> Self {
        self.display_names = lowercase_keys(names);
        self
    }

    /// Attach the balance -> part category map
    pub fn with_part_keys(mut self, keys: HashMap<String, String>) -> Self {
        self.part_keys = lowercase_keys(keys);
        self
    }

    /// Restrict enchantments to the given sub types
    pub fn with_enchantable<I, S>(mut self, sub_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.enchantable = Some(
            sub_types
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    /// Names of all categories
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Number of assets in a category
    pub fn asset_count(&self, category: &str) -> Option<usize> {
        self.categories.get(category).map(|t| t.assets.len())
    }
}

impl PartsCatalog for SerialDb {
    fn max_version(&self) -> u8 {
        self.max_version
    }

    fn bits_for(&self, category: &str, version: u8) -> Option<u8> {
        self.categories.get(category).map(|t| t.bits_for(version))
    }

    fn part_name(&self, category: &str, index: u32) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.categories
            .get(category)?
            .assets
            .get(index as usize - 1)
            .map(String::as_str)
    }

    fn part_index(&self, category: &str, name: &str) -> Option<u32> {
        self.categories
            .get(category)?
            .index_by_name
            .get(name)
            .copied()
    }

    fn part_key(&self, balance: &str) -> Option<&str> {
        self.part_keys
            .get(&part_key_lookup(balance))
            .map(String::as_str)
    }

    fn display_name(&self, balance: &str) -> Option<&str> {
        self.display_names
            .get(&display_name_lookup(balance))
            .map(String::as_str)
    }

    fn is_enchantable(&self, sub_type: &str) -> bool {
        self.enchantable
            .as_ref()
            .map_or(true, |types| types.contains(&sub_type.to_lowercase()))
    }
}

/// Programmatic [`SerialDb`] construction
#[derive(Debug, Default)]
pub struct SerialDbBuilder {
    categories: HashMap<String, RawCategory>,
    display_names: HashMap<String, String>,
    part_keys: HashMap<String, String>,
    enchantable: Option<Vec<String>>,
}

impl SerialDbBuilder {
    /// Register a category with `(version, bits)` pairs and its assets in index order
    pub fn category<I, S>(mut self, name: &str, versions: &[(u8, u8)], assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let versions = versions
            .iter()
            .map(|&(version, bits)| VersionWidth { version, bits })
            .collect();
        self.categories.insert(
            name.to_string(),
            RawCategory {
                versions,
                assets: assets.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn part_key(mut self, balance: &str, key: &str) -> Self {
        self.part_keys
            .insert(part_key_lookup(balance), key.to_string());
        self
    }

    pub fn display_name(mut self, balance: &str, name: &str) -> Self {
        self.display_names
            .insert(display_name_lookup(balance), name.to_string());
        self
    }

    pub fn enchantable(mut self, sub_type: &str) -> Self {
        self.enchantable
            .get_or_insert_with(Vec::new)
            .push(sub_type.to_string());
        self
    }

    pub fn build(self) -> Result<SerialDb, CatalogError> {
        let mut db = SerialDb::from_raw(self.categories)?
            .with_display_names(self.display_names)
            .with_part_keys(self.part_keys);
        if let Some(types) = self.enchantable {
            db = db.with_enchantable(types);
        }
        Ok(db)
    }
}
