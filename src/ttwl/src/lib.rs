//! # ttwl
//!
//! Tiny Tina's Wonderlands item serial library - decoding, editing, and
//! re-encoding.
//!
//! This library provides functionality to:
//! - Unwrap `WL(...)` item codes and verify their checksums
//! - Decode serials into balance, manufacturer, level, parts and enchantments
//! - Edit levels, parts, enchantments and chaos tiers, then re-encode
//! - Apply edits to whole inventories in parallel
//!
//! The part catalog is loaded once and shared by every serial.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ttwl::{CatalogConfig, ItemSerial, PartsCatalog, Seed, SerialDb};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog: Arc<dyn PartsCatalog> = Arc::new(SerialDb::load(&CatalogConfig::load()?)?);
//!
//! let mut serial = ItemSerial::decode("WL(BQAAAABXNIA7ORppgmool0p50WCcRx0zrBU6hAAAAAAAAGdAACAA)", catalog)?;
//! println!("{:?}: {:?}", serial.display_name(), serial.level_description());
//!
//! serial.set_level(40)?;
//! println!("{}", serial.to_text(Seed::Zero)?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod catalog;
pub mod config;
pub mod item;
pub mod reference;
pub mod serial;

#[doc(inline)]
pub use batch::BatchReport;
#[doc(inline)]
pub use catalog::{CatalogError, PartsCatalog, SerialDb, SerialDbBuilder};
#[doc(inline)]
pub use config::{CatalogConfig, ConfigError};
#[doc(inline)]
pub use item::{InventoryItem, ItemFlags};
#[doc(inline)]
pub use reference::{chaos_tier_by_label, chaos_tier_by_value, ChaosTier, ChaosTierInfo, CHAOS_TIERS};
#[doc(inline)]
pub use serial::{
    Classified, Header, ItemSerial, PartData, Seed, SerialError, SerialSource, SerialState,
    SerialSummary,
};
