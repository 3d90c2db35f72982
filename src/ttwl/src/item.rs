//! Inventory item records
//!
//! A save stores each item as its binary serial plus a little bookkeeping.
//! [`InventoryItem`] models that record so a serial can be built from it and
//! written back after editing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::PartsCatalog;
use crate::serial::{self, ItemSerial, SerialError};

/// Item marker flags.
///
/// # Example
/// ```
/// use ttwl::ItemFlags;
///
/// let flags = ItemFlags::seen().with_favorite();
/// assert!(flags.is_favorite());
/// assert!(!flags.with_trash().is_favorite());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFlags(pub u32);

impl ItemFlags {
    const SEEN: u32 = 0x1;
    const FAVORITE: u32 = 0x2;
    const TRASH: u32 = 0x4;

    // Favorite and trash are mutually exclusive
    const MARKS: u32 = Self::FAVORITE | Self::TRASH;

    /// Flags for an item the player has already looked at
    pub fn seen() -> Self {
        Self(Self::SEEN)
    }

    pub fn from_raw(bits: u32) -> Self {
        Self(bits)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn with_seen(mut self) -> Self {
        self.0 |= Self::SEEN;
        self
    }

    /// Mark as favorite (clears trash)
    pub fn with_favorite(mut self) -> Self {
        self.0 = (self.0 & !Self::MARKS) | Self::FAVORITE;
        self
    }

    /// Mark as trash (clears favorite)
    pub fn with_trash(mut self) -> Self {
        self.0 = (self.0 & !Self::MARKS) | Self::TRASH;
        self
    }

    pub fn with_no_mark(mut self) -> Self {
        self.0 &= !Self::MARKS;
        self
    }

    pub fn is_seen(self) -> bool {
        self.0 & Self::SEEN != 0
    }

    pub fn is_favorite(self) -> bool {
        self.0 & Self::FAVORITE != 0
    }

    pub fn is_trash(self) -> bool {
        self.0 & Self::TRASH != 0
    }

    pub fn set_favorite(&mut self, value: bool) {
        *self = if value {
            self.with_favorite()
        } else {
            Self(self.0 & !Self::FAVORITE)
        };
    }

    pub fn set_trash(&mut self, value: bool) {
        *self = if value {
            self.with_trash()
        } else {
            Self(self.0 & !Self::TRASH)
        };
    }
}

impl From<u32> for ItemFlags {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<ItemFlags> for u32 {
    fn from(f: ItemFlags) -> Self {
        f.0
    }
}

/// One inventory entry: a binary serial with its pickup order and flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub serial: Vec<u8>,
    pub pickup_order_index: u32,
    pub flags: ItemFlags,
}

impl InventoryItem {
    /// Build a record around a donor serial
    pub fn create(serial: Vec<u8>, pickup_order_index: u32, flags: ItemFlags) -> Self {
        Self {
            serial,
            pickup_order_index,
            flags,
        }
    }

    /// Build a record from a `WL(...)` token
    pub fn from_text(
        text: &str,
        pickup_order_index: u32,
        flags: ItemFlags,
    ) -> Result<Self, SerialError> {
        Ok(Self::create(
            serial::decode_text(text)?,
            pickup_order_index,
            flags,
        ))
    }

    /// Pickup order for an item added after `items`
    pub fn next_pickup_order(items: &[InventoryItem]) -> u32 {
        items
            .iter()
            .map(|item| item.pickup_order_index)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Decode this record's serial
    pub fn item_serial(&self, catalog: Arc<dyn PartsCatalog>) -> Result<ItemSerial, SerialError> {
        ItemSerial::decode(self, catalog)
    }

    /// Edit the serial and store the re-encoded token.
    ///
    /// The record is left unchanged if the edit fails.
    pub fn with_serial<F>(&mut self, catalog: Arc<dyn PartsCatalog>, edit: F) -> Result<(), SerialError>
    where
        F: FnOnce(&mut ItemSerial) -> Result<(), SerialError>,
    {
        let mut serial = ItemSerial::new(&*self, catalog)?;
        edit(&mut serial)?;
        self.serial = serial.token().to_vec();
        Ok(())
    }

    pub fn to_text(&self) -> String {
        serial::encode_text(&self.serial)
    }
}
