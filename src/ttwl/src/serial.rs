//! Item serial decoding, editing and re-encoding
//!
//! A serial moves through an explicit set of states. It starts `Encoded`
//! (raw token only), `decode_header` verifies the checksum and reads the
//! classification fields, and `decode_parts` reads the part lists when the
//! catalog knows the item's part layout. Every mutator re-encodes on the
//! spot, so [`ItemSerial::token`] is always current.
//!
//! Editing the header (level) reuses the undecoded tail of the payload bit
//! for bit. Editing anything in the tail (parts, enchantments, reroll count,
//! chaos tier) re-encodes the whole payload at the catalog's newest schema
//! version, because indices and widths are only meaningful relative to the
//! version they were written at.

pub mod bitstream;
pub mod obfuscation;
pub mod text;

pub use bitstream::{BitStream, BitstreamError};
pub use text::{decode_text, encode_text};

use serde::Serialize;
use std::sync::Arc;

use crate::catalog::{
    PartsCatalog, BALANCE_CATEGORY, ENCHANTMENT_CATEGORY, SOURCE_CATEGORY, SUB_TYPE_CATEGORY,
};
use crate::item::InventoryItem;
use crate::reference::{chaos_tier_by_value, ChaosTierInfo};
use obfuscation::{CHECKSUM_LEN, HEADER_LEN};

/// The only token format this codec can parse
pub const FORMAT_VERSION: u8 = 5;

/// First byte of every payload
pub const SENTINEL: u64 = 0x80;

/// Highest level the 7-bit field can hold
pub const MAX_LEVEL: u8 = 127;

const SENTINEL_BITS: u8 = 8;
const VERSION_BITS: u8 = 7;
const LEVEL_BITS: u8 = 7;
const PART_COUNT_BITS: u8 = 6;
const ENCHANTMENT_COUNT_BITS: u8 = 4;
const TRAILER_COUNT_BITS: u8 = 8;
const TRAILER_BYTE_BITS: u8 = 8;
const CUSTOM_COUNT_BITS: u8 = 4;
const REROLL_BITS: u8 = 8;
const CHAOS_TIER_BITS: u8 = 7;

/// Leftover bits allowed after the chaos tier (byte padding)
const MAX_PADDING_BITS: usize = 7;

/// Errors that can occur while decoding or editing a serial
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerialError {
    #[error("Invalid item token: {0}")]
    InvalidToken(String),

    #[error("Serial too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unsupported serial format version {0}")]
    UnsupportedFormat(u8),

    #[error("Checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    #[error("Expected payload sentinel 0x80, found {0:#04x}")]
    BadSentinel(u64),

    #[error("Schema version {version} is newer than the catalog maximum {max}")]
    UnsupportedSchemaVersion { version: u8, max: u8 },

    #[error("Catalog has no bit widths for category {0}")]
    MissingCategory(String),

    #[error("Malformed bit layout: {0}")]
    MalformedLayout(#[from] BitstreamError),

    #[error("No part category registered for {0}")]
    UnknownPartCategory(String),

    #[error("Item carries {0} customizations, which cannot be parsed")]
    CustomizationsPresent(u8),

    #[error("Malformed part tail: {0}")]
    MalformedPartTail(String),

    #[error("Parts are not available: {0}")]
    PartsUnavailable(Box<SerialError>),

    #[error("Items of type {0} cannot be enchanted")]
    NotEnchantable(String),

    #[error("Unknown {category} part: {name}")]
    UnknownPart { category: String, name: String },

    #[error("{field} value {value} does not fit in {bits} bits")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        bits: u8,
    },
}

impl SerialError {
    /// True when the item is valid but outside what this codec can edit,
    /// as opposed to corrupt or misused
    pub fn is_opaque(&self) -> bool {
        match self {
            Self::UnsupportedFormat(_)
            | Self::UnsupportedSchemaVersion { .. }
            | Self::MissingCategory(_)
            | Self::UnknownPartCategory(_)
            | Self::CustomizationsPresent(_)
            | Self::MalformedPartTail(_)
            | Self::NotEnchantable(_) => true,
            Self::PartsUnavailable(reason) => reason.is_opaque(),
            _ => false,
        }
    }
}

/// An index into a catalog category, with the width it was written at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogIndex {
    pub index: u32,
    pub bits: u8,
}

/// Fields read by [`ItemSerial::decode_header`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub schema_version: u8,
    /// Balance (item archetype)
    pub category: CatalogIndex,
    pub sub_type: CatalogIndex,
    /// Manufacturer
    pub source: CatalogIndex,
    pub level: u8,
}

/// Fields read by [`ItemSerial::decode_parts`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartData {
    /// Catalog category the part indices refer to
    pub part_key: String,
    pub parts: Vec<u32>,
    pub enchantments: Vec<u32>,
    /// Opaque bytes kept as-is
    pub trailer: Vec<u8>,
    /// `None` when the token had no room for the field
    pub reroll_count: Option<u8>,
    pub chaos_tier: u8,
}

#[derive(Debug, Clone)]
struct Layout {
    header: Header,
    /// Payload bits after the header, verbatim
    tail: BitStream,
    /// `None` until parts decoding has been attempted
    parts: Option<Result<PartData, SerialError>>,
}

/// Where a serial is decoding to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SerialState {
    /// Only the raw token is known
    Encoded,
    /// Classification and level are available; parts are not (yet)
    HeaderParsed,
    /// Every field is available
    PartsParsed,
    /// The header could not be decoded
    Unparseable,
}

/// Inputs a serial can be built from
#[derive(Debug, Clone)]
pub enum SerialSource<'a> {
    /// Binary token
    Raw(Vec<u8>),
    /// `PREFIX(base64)` text
    Text(&'a str),
    /// The serial stored in an inventory record
    Record(&'a InventoryItem),
}

impl From<Vec<u8>> for SerialSource<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl<'a> From<&'a str> for SerialSource<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a InventoryItem> for SerialSource<'a> {
    fn from(item: &'a InventoryItem) -> Self {
        Self::Record(item)
    }
}

/// Obfuscation seed to use when encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Seed {
    /// No obfuscation
    #[default]
    Zero,
    /// The seed of the token the serial was created from
    Original,
    Fixed(i32),
    Random,
}

impl From<Option<i32>> for Seed {
    fn from(seed: Option<i32>) -> Self {
        seed.map_or(Seed::Zero, Seed::Fixed)
    }
}

/// A catalog index together with the asset it names, if known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classified<'a> {
    pub index: u32,
    pub name: Option<&'a str>,
}

/// Serializable view of a decoded serial
#[derive(Debug, Clone, Serialize)]
pub struct SerialSummary<'a> {
    pub token: String,
    pub state: SerialState,
    pub schema_version: Option<u8>,
    pub display_name: Option<String>,
    pub balance: Option<Classified<'a>>,
    pub sub_type: Option<Classified<'a>>,
    pub source: Option<Classified<'a>>,
    pub level: Option<u8>,
    pub parts: Option<Vec<Classified<'a>>>,
    pub enchantments: Option<Vec<Classified<'a>>>,
    pub reroll_count: Option<u8>,
    pub chaos_tier: Option<u8>,
    pub parts_unavailable: Option<String>,
}

/// A single item serial bound to the catalog used to interpret it
#[derive(Debug, Clone)]
pub struct ItemSerial {
    catalog: Arc<dyn PartsCatalog>,
    /// Current binary token
    token: Vec<u8>,
    original_seed: i32,
    /// `None` until header decoding has been attempted
    decoded: Option<Result<Layout, SerialError>>,
    parts_dirty: bool,
}

fn seed_of(token: &[u8]) -> Option<i32> {
    token
        .get(1..HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_be_bytes)
}

fn field_width(catalog: &dyn PartsCatalog, category: &str, version: u8) -> Result<u8, SerialError> {
    catalog
        .bits_for(category, version)
        .ok_or_else(|| SerialError::MissingCategory(category.to_string()))
}

fn read_index(
    bits: &mut BitStream,
    catalog: &dyn PartsCatalog,
    category: &str,
    version: u8,
) -> Result<CatalogIndex, SerialError> {
    let width = field_width(catalog, category, version)?;
    let index = bits.eat(width.into())? as u32;
    Ok(CatalogIndex { index, bits: width })
}

fn read_list(bits: &mut BitStream, count_bits: u8, item_bits: u8) -> Result<Vec<u32>, BitstreamError> {
    let count = bits.eat(count_bits.into())?;
    (0..count)
        .map(|_| bits.eat(item_bits.into()).map(|v| v as u32))
        .collect()
}

fn push(stream: &mut BitStream, field: &'static str, value: u64, bits: u8) -> Result<(), SerialError> {
    stream
        .append(value, bits.into())
        .map_err(|_| SerialError::ValueOutOfRange { field, value, bits })
}

fn decode_layout(token: &[u8], catalog: &dyn PartsCatalog) -> Result<Layout, SerialError> {
    let format_version = *token.first().ok_or(SerialError::TooShort {
        expected: HEADER_LEN + CHECKSUM_LEN,
        actual: 0,
    })?;
    if format_version != FORMAT_VERSION {
        return Err(SerialError::UnsupportedFormat(format_version));
    }

    let unsealed = obfuscation::unseal(token)?;
    let mut bits = BitStream::from_bytes(&unsealed.payload);

    let sentinel = bits.eat(SENTINEL_BITS.into())?;
    if sentinel != SENTINEL {
        return Err(SerialError::BadSentinel(sentinel));
    }

    let schema_version = bits.eat(VERSION_BITS.into())? as u8;
    let max = catalog.max_version();
    if schema_version > max {
        return Err(SerialError::UnsupportedSchemaVersion {
            version: schema_version,
            max,
        });
    }

    let category = read_index(&mut bits, catalog, BALANCE_CATEGORY, schema_version)?;
    let sub_type = read_index(&mut bits, catalog, SUB_TYPE_CATEGORY, schema_version)?;
    let source = read_index(&mut bits, catalog, SOURCE_CATEGORY, schema_version)?;
    let level = bits.eat(LEVEL_BITS.into())? as u8;

    Ok(Layout {
        header: Header {
            schema_version,
            category,
            sub_type,
            source,
            level,
        },
        tail: bits,
        parts: None,
    })
}

fn decode_part_data(
    catalog: &dyn PartsCatalog,
    header: &Header,
    tail: &BitStream,
) -> Result<PartData, SerialError> {
    let balance = catalog
        .part_name(BALANCE_CATEGORY, header.category.index)
        .ok_or_else(|| SerialError::UnknownPartCategory(format!("balance #{}", header.category.index)))?;
    let part_key = catalog
        .part_key(balance)
        .ok_or_else(|| SerialError::UnknownPartCategory(balance.to_string()))?;

    let version = header.schema_version;
    let part_bits = field_width(catalog, part_key, version)?;
    let enchantment_bits = field_width(catalog, ENCHANTMENT_CATEGORY, version)?;

    let malformed = |e: BitstreamError| SerialError::MalformedPartTail(e.to_string());
    let mut bits = tail.clone();

    let parts = read_list(&mut bits, PART_COUNT_BITS, part_bits).map_err(malformed)?;
    let enchantments =
        read_list(&mut bits, ENCHANTMENT_COUNT_BITS, enchantment_bits).map_err(malformed)?;
    let trailer = read_list(&mut bits, TRAILER_COUNT_BITS, TRAILER_BYTE_BITS)
        .map_err(malformed)?
        .into_iter()
        .map(|b| b as u8)
        .collect();

    let custom_count = bits.eat(CUSTOM_COUNT_BITS.into()).map_err(malformed)? as u8;
    if custom_count != 0 {
        return Err(SerialError::CustomizationsPresent(custom_count));
    }

    let reroll_count = if bits.len() >= usize::from(REROLL_BITS) {
        Some(bits.eat(REROLL_BITS.into()).map_err(malformed)? as u8)
    } else {
        None
    };
    let chaos_tier = bits.eat(CHAOS_TIER_BITS.into()).map_err(malformed)? as u8;

    if bits.len() > MAX_PADDING_BITS {
        return Err(SerialError::MalformedPartTail(format!(
            "{} bits left after the chaos tier",
            bits.len()
        )));
    }
    if !bits.is_zero() {
        return Err(SerialError::MalformedPartTail(
            "non-zero padding after the chaos tier".to_string(),
        ));
    }

    Ok(PartData {
        part_key: part_key.to_string(),
        parts,
        enchantments,
        trailer,
        reroll_count,
        chaos_tier,
    })
}

fn encode_header(header: &Header) -> Result<BitStream, SerialError> {
    let mut out = BitStream::new();
    push(&mut out, "sentinel", SENTINEL, SENTINEL_BITS)?;
    push(&mut out, "schema version", header.schema_version.into(), VERSION_BITS)?;
    for (field, value) in [
        ("category", header.category),
        ("sub type", header.sub_type),
        ("source", header.source),
    ] {
        push(&mut out, field, value.index.into(), value.bits)?;
    }
    push(&mut out, "level", header.level.into(), LEVEL_BITS)?;
    Ok(out)
}

fn encode_part_data(
    catalog: &dyn PartsCatalog,
    parts: &PartData,
    version: u8,
) -> Result<BitStream, SerialError> {
    let part_bits = field_width(catalog, &parts.part_key, version)?;
    let enchantment_bits = field_width(catalog, ENCHANTMENT_CATEGORY, version)?;

    let mut out = BitStream::new();
    push(&mut out, "part count", parts.parts.len() as u64, PART_COUNT_BITS)?;
    for &part in &parts.parts {
        push(&mut out, "part", part.into(), part_bits)?;
    }
    push(
        &mut out,
        "enchantment count",
        parts.enchantments.len() as u64,
        ENCHANTMENT_COUNT_BITS,
    )?;
    for &enchantment in &parts.enchantments {
        push(&mut out, "enchantment", enchantment.into(), enchantment_bits)?;
    }
    push(&mut out, "trailer length", parts.trailer.len() as u64, TRAILER_COUNT_BITS)?;
    for &byte in &parts.trailer {
        push(&mut out, "trailer byte", byte.into(), TRAILER_BYTE_BITS)?;
    }
    push(&mut out, "customization count", 0, CUSTOM_COUNT_BITS)?;
    push(
        &mut out,
        "reroll count",
        parts.reroll_count.unwrap_or(0).into(),
        REROLL_BITS,
    )?;
    push(&mut out, "chaos tier", parts.chaos_tier.into(), CHAOS_TIER_BITS)?;
    Ok(out)
}

/// Last `.` or `/` separated segment of an asset path
fn short_name(path: &str) -> &str {
    path.rsplit(|c: char| c == '.' || c == '/').next().unwrap_or(path)
}

impl ItemSerial {
    /// Wrap a token without decoding anything yet
    pub fn new<'a>(
        source: impl Into<SerialSource<'a>>,
        catalog: Arc<dyn PartsCatalog>,
    ) -> Result<Self, SerialError> {
        let token = match source.into() {
            SerialSource::Raw(bytes) => bytes,
            SerialSource::Text(text) => text::decode_text(text)?,
            SerialSource::Record(item) => item.serial.clone(),
        };

        Ok(Self {
            original_seed: seed_of(&token).unwrap_or(0),
            catalog,
            token,
            decoded: None,
            parts_dirty: false,
        })
    }

    pub fn from_bytes(bytes: &[u8], catalog: Arc<dyn PartsCatalog>) -> Self {
        Self {
            original_seed: seed_of(bytes).unwrap_or(0),
            catalog,
            token: bytes.to_vec(),
            decoded: None,
            parts_dirty: false,
        }
    }

    pub fn from_text(text: &str, catalog: Arc<dyn PartsCatalog>) -> Result<Self, SerialError> {
        Self::new(text, catalog)
    }

    /// Build a serial and decode as far as possible.
    ///
    /// Fails only if the header cannot be read; an item whose parts are
    /// unavailable is returned in the `HeaderParsed` state.
    pub fn decode<'a>(
        source: impl Into<SerialSource<'a>>,
        catalog: Arc<dyn PartsCatalog>,
    ) -> Result<Self, SerialError> {
        let mut serial = Self::new(source, catalog)?;
        serial.decode_parts()?;
        Ok(serial)
    }

    pub fn catalog(&self) -> &Arc<dyn PartsCatalog> {
        &self.catalog
    }

    pub fn state(&self) -> SerialState {
        match &self.decoded {
            None => SerialState::Encoded,
            Some(Err(_)) => SerialState::Unparseable,
            Some(Ok(layout)) => match &layout.parts {
                Some(Ok(_)) => SerialState::PartsParsed,
                _ => SerialState::HeaderParsed,
            },
        }
    }

    fn layout(&mut self) -> Result<&mut Layout, SerialError> {
        let token = &self.token;
        let catalog = &self.catalog;
        self.decoded
            .get_or_insert_with(|| {
                decode_layout(token, catalog.as_ref()).inspect_err(|e| {
                    if matches!(e, SerialError::ChecksumMismatch { .. }) {
                        tracing::warn!(error = %e, "serial failed checksum verification");
                    } else {
                        tracing::debug!(error = %e, "serial header could not be decoded");
                    }
                })
            })
            .as_mut()
            .map_err(|e| e.clone())
    }

    fn parts_status(&mut self) -> Result<&Result<PartData, SerialError>, SerialError> {
        let catalog = Arc::clone(&self.catalog);
        let layout = self.layout()?;
        let Layout {
            header,
            tail,
            parts,
        } = layout;

        Ok(&*parts.get_or_insert_with(|| {
            decode_part_data(catalog.as_ref(), header, tail).inspect_err(|e| {
                if matches!(e, SerialError::MalformedPartTail(_)) {
                    tracing::warn!(error = %e, "serial is header-only");
                } else {
                    tracing::debug!(error = %e, "serial is header-only");
                }
            })
        }))
    }

    /// Verify the checksum and read the classification fields
    pub fn decode_header(&mut self) -> Result<&Header, SerialError> {
        self.layout().map(|layout| &layout.header)
    }

    /// Read the part lists.
    ///
    /// `Ok(None)` means the item is header-only; see
    /// [`ItemSerial::parts_unavailable_reason`] for why.
    pub fn decode_parts(&mut self) -> Result<Option<&PartData>, SerialError> {
        Ok(self.parts_status()?.as_ref().ok())
    }

    /// Whether part-level fields can be read and edited
    pub fn parts_parseable(&mut self) -> bool {
        matches!(self.decode_parts(), Ok(Some(_)))
    }

    fn header(&self) -> Option<&Header> {
        self.decoded.as_ref()?.as_ref().ok().map(|l| &l.header)
    }

    fn part_data(&self) -> Option<&PartData> {
        self.decoded.as_ref()?.as_ref().ok()?.parts.as_ref()?.as_ref().ok()
    }

    /// Why decoding stopped short of the part lists, once that is known
    pub fn parts_unavailable_reason(&self) -> Option<&SerialError> {
        match self.decoded.as_ref()? {
            Err(e) => Some(e),
            Ok(layout) => layout.parts.as_ref()?.as_ref().err(),
        }
    }

    fn classify(&self, category: &str, index: u32) -> Classified<'_> {
        Classified {
            index,
            name: self.catalog.part_name(category, index),
        }
    }

    /// Current binary token
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn format_version(&self) -> Option<u8> {
        self.token.first().copied()
    }

    /// Seed of the current token; zero after any edit
    pub fn seed(&self) -> Option<i32> {
        seed_of(&self.token)
    }

    /// Seed of the token this serial was created from
    pub fn original_seed(&self) -> i32 {
        self.original_seed
    }

    /// True once an edit has re-encoded the part lists
    pub fn parts_dirty(&self) -> bool {
        self.parts_dirty
    }

    pub fn schema_version(&self) -> Option<u8> {
        self.header().map(|h| h.schema_version)
    }

    /// Balance (item archetype)
    pub fn category(&self) -> Option<Classified<'_>> {
        self.header()
            .map(|h| self.classify(BALANCE_CATEGORY, h.category.index))
    }

    pub fn sub_type(&self) -> Option<Classified<'_>> {
        self.header()
            .map(|h| self.classify(SUB_TYPE_CATEGORY, h.sub_type.index))
    }

    /// Manufacturer
    pub fn source(&self) -> Option<Classified<'_>> {
        self.header()
            .map(|h| self.classify(SOURCE_CATEGORY, h.source.index))
    }

    pub fn level(&self) -> Option<u8> {
        self.header().map(|h| h.level)
    }

    pub fn parts(&self) -> Option<Vec<Classified<'_>>> {
        self.part_data().map(|p| {
            p.parts
                .iter()
                .map(|&index| self.classify(&p.part_key, index))
                .collect()
        })
    }

    pub fn enchantments(&self) -> Option<Vec<Classified<'_>>> {
        self.part_data().map(|p| {
            p.enchantments
                .iter()
                .map(|&index| self.classify(ENCHANTMENT_CATEGORY, index))
                .collect()
        })
    }

    pub fn trailer_bytes(&self) -> Option<&[u8]> {
        self.part_data().map(|p| p.trailer.as_slice())
    }

    /// Reroll count, reading a missing field as zero
    pub fn reroll_count(&self) -> Option<u8> {
        self.part_data().map(|p| p.reroll_count.unwrap_or(0))
    }

    pub fn chaos_tier(&self) -> Option<u8> {
        self.part_data().map(|p| p.chaos_tier)
    }

    pub fn chaos_tier_info(&self) -> Option<&'static ChaosTierInfo> {
        self.chaos_tier().and_then(chaos_tier_by_value)
    }

    /// Payload bits following the header, as decoded
    pub fn raw_tail_bits(&self) -> Option<&BitStream> {
        self.decoded.as_ref()?.as_ref().ok().map(|l| &l.tail)
    }

    /// Object name of the balance, e.g. `Balance_PS_DAL_01_Common`
    pub fn balance_short(&self) -> Option<&str> {
        self.category()?.name.map(short_name)
    }

    /// English item name, falling back to the short balance name
    pub fn display_name(&self) -> Option<String> {
        let balance = self.category()?.name?;
        let name = self
            .catalog
            .display_name(balance)
            .unwrap_or_else(|| short_name(balance));
        Some(name.to_string())
    }

    /// `level 40` or `level 40, Chaotic`
    pub fn level_description(&self) -> Option<String> {
        let level = self.level()?;
        match self.chaos_tier_info() {
            Some(tier) if tier.value > 0 => Some(format!("level {}, {}", level, tier.label)),
            _ => Some(format!("level {}", level)),
        }
    }

    fn ensure_enchantable(&mut self) -> Result<(), SerialError> {
        if let Err(reason) = self.parts_status()? {
            return Err(SerialError::PartsUnavailable(Box::new(reason.clone())));
        }
        let sub_type = self.decode_header()?.sub_type.index;
        match self.catalog.part_name(SUB_TYPE_CATEGORY, sub_type) {
            Some(name) if self.catalog.is_enchantable(name) => Ok(()),
            Some(name) => Err(SerialError::NotEnchantable(name.to_string())),
            None => Err(SerialError::NotEnchantable(format!("#{}", sub_type))),
        }
    }

    pub fn can_have_enchantment(&mut self) -> bool {
        self.ensure_enchantable().is_ok()
    }

    /// Chaos tiers live in the part tail, so any part-parseable item has one
    pub fn can_have_chaos_tier(&mut self) -> bool {
        self.parts_parseable()
    }

    /// Install a re-encoded layout as the current state
    fn commit(&mut self, layout: Layout, rewrote_tail: bool) -> Result<(), SerialError> {
        let mut payload = encode_header(&layout.header)?;
        payload.append_stream(&layout.tail);

        self.token = obfuscation::seal(FORMAT_VERSION, 0, &payload.to_bytes());
        self.parts_dirty |= rewrote_tail;
        tracing::debug!(
            schema_version = layout.header.schema_version,
            full = rewrote_tail,
            "re-encoded serial"
        );
        self.decoded = Some(Ok(layout));
        Ok(())
    }

    fn edit_header(&mut self, apply: impl FnOnce(&mut Header)) -> Result<(), SerialError> {
        let mut layout = self.layout()?.clone();
        let before = layout.header.clone();
        apply(&mut layout.header);
        if layout.header == before {
            return Ok(());
        }
        self.commit(layout, false)
    }

    fn edit_parts(
        &mut self,
        apply: impl FnOnce(&mut PartData, &dyn PartsCatalog) -> Result<(), SerialError>,
    ) -> Result<(), SerialError> {
        let mut parts = match self.parts_status()? {
            Ok(parts) => parts.clone(),
            Err(reason) => return Err(SerialError::PartsUnavailable(Box::new(reason.clone()))),
        };
        let catalog = Arc::clone(&self.catalog);
        let catalog = catalog.as_ref();
        let before = parts.clone();
        apply(&mut parts, catalog)?;
        if parts == before {
            return Ok(());
        }

        // Everything is rewritten at the newest version
        let version = catalog.max_version();
        let mut header = self.decode_header()?.clone();
        header.schema_version = version;
        header.category.bits = field_width(catalog, BALANCE_CATEGORY, version)?;
        header.sub_type.bits = field_width(catalog, SUB_TYPE_CATEGORY, version)?;
        header.source.bits = field_width(catalog, SOURCE_CATEGORY, version)?;
        parts.reroll_count = Some(parts.reroll_count.unwrap_or(0));

        let tail = encode_part_data(catalog, &parts, version)?;
        self.commit(
            Layout {
                header,
                tail,
                parts: Some(Ok(parts)),
            },
            true,
        )
    }

    /// Set the item level, leaving the rest of the payload untouched.
    ///
    /// Like every mutator, setting a value the item already has leaves the
    /// token (and its seed) as it was.
    pub fn set_level(&mut self, level: u8) -> Result<(), SerialError> {
        self.edit_header(|header| header.level = level)
    }

    pub fn set_chaos_tier(&mut self, tier: u8) -> Result<(), SerialError> {
        self.edit_parts(|parts, _| {
            parts.chaos_tier = tier;
            Ok(())
        })
    }

    pub fn set_reroll_count(&mut self, count: u8) -> Result<(), SerialError> {
        self.edit_parts(|parts, _| {
            // An absent field already reads as zero
            if parts.reroll_count.unwrap_or(0) != count {
                parts.reroll_count = Some(count);
            }
            Ok(())
        })
    }

    /// Replace the part list with indices into the item's part category
    pub fn set_parts(&mut self, indices: &[u32]) -> Result<(), SerialError> {
        self.edit_parts(|parts, catalog| {
            if let Some(&bad) = indices
                .iter()
                .find(|&&i| catalog.part_name(&parts.part_key, i).is_none())
            {
                return Err(SerialError::UnknownPart {
                    category: parts.part_key.clone(),
                    name: format!("#{}", bad),
                });
            }
            parts.parts = indices.to_vec();
            Ok(())
        })
    }

    /// Replace the part list by asset name
    pub fn set_part_names<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), SerialError> {
        self.edit_parts(|parts, catalog| {
            parts.parts = names
                .iter()
                .map(|name| {
                    catalog
                        .part_index(&parts.part_key, name.as_ref())
                        .ok_or_else(|| SerialError::UnknownPart {
                            category: parts.part_key.clone(),
                            name: name.as_ref().to_string(),
                        })
                })
                .collect::<Result<_, _>>()?;
            Ok(())
        })
    }

    /// Replace the enchantment list with generic part indices
    pub fn set_enchantments(&mut self, indices: &[u32]) -> Result<(), SerialError> {
        if !indices.is_empty() {
            self.ensure_enchantable()?;
        }
        self.edit_parts(|parts, catalog| {
            if let Some(&bad) = indices
                .iter()
                .find(|&&i| catalog.part_name(ENCHANTMENT_CATEGORY, i).is_none())
            {
                return Err(SerialError::UnknownPart {
                    category: ENCHANTMENT_CATEGORY.to_string(),
                    name: format!("#{}", bad),
                });
            }
            parts.enchantments = indices.to_vec();
            Ok(())
        })
    }

    /// Replace every enchantment with the single named one
    pub fn set_enchantment(&mut self, name: &str) -> Result<(), SerialError> {
        let index = self
            .catalog
            .part_index(ENCHANTMENT_CATEGORY, name)
            .ok_or_else(|| SerialError::UnknownPart {
                category: ENCHANTMENT_CATEGORY.to_string(),
                name: name.to_string(),
            })?;
        self.set_enchantments(&[index])
    }

    /// Binary token sealed with the requested seed.
    ///
    /// The payload is never re-derived here: every edit has already
    /// re-encoded it, so only the seed framing can change.
    pub fn encode(&self, seed: Seed) -> Result<Vec<u8>, SerialError> {
        let seed = match seed {
            Seed::Zero => 0,
            Seed::Original => self.original_seed,
            Seed::Fixed(seed) => seed,
            Seed::Random => rand::random(),
        };
        if self.seed() == Some(seed) {
            return Ok(self.token.clone());
        }

        let unsealed = obfuscation::unseal(&self.token)?;
        Ok(obfuscation::seal(unsealed.format_version, seed, &unsealed.payload))
    }

    /// Textual `WL(...)` token sealed with the requested seed
    pub fn to_text(&self, seed: Seed) -> Result<String, SerialError> {
        self.encode(seed).map(|bytes| text::encode_text(&bytes))
    }

    pub fn summary(&self) -> SerialSummary<'_> {
        SerialSummary {
            token: text::encode_text(&self.token),
            state: self.state(),
            schema_version: self.schema_version(),
            display_name: self.display_name(),
            balance: self.category(),
            sub_type: self.sub_type(),
            source: self.source(),
            level: self.level(),
            parts: self.parts(),
            enchantments: self.enchantments(),
            reroll_count: self.reroll_count(),
            chaos_tier: self.chaos_tier(),
            parts_unavailable: self.parts_unavailable_reason().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::{test_db, DAHL_PISTOL, DAHL_PISTOL_LEGENDARY};
    use crate::catalog::SerialDb;
    use proptest::prelude::*;

    /// Common Dahl pistol, schema 2, seed 0x12345678, reroll 2, Chaotic
    pub(crate) const PISTOL: &str = "WL(BRI0Vnjs9XczQmqr9ShpdD60h2Uh)";
    /// Same item sealed with a negative seed
    const PISTOL_NEGATIVE_SEED: &str = "WL(Bd6tvu+z833sJuutB8oY7JYwr83y)";
    /// Amulet with no registered part category
    pub(crate) const AMULET: &str = "WL(BQAAAADahICDgcgozgI=)";
    /// Pistol carrying three customizations
    const CUSTOMIZED: &str = "WL(BQAAAAAXroCCIIIBAMDU2gM=)";
    /// Legendary pistol, schema 3, seed 77, no reroll field, Primordial
    pub(crate) const LEGENDARY: &str = "WL(BQAAAE2ELiaDNxb61Cb7jhU6AA==)";
    /// Pistol with a stray set bit after the chaos tier
    const STRAY_BIT: &str = "WL(BQAAAAC76YCCIIISBAAAACA=)";
    /// Real weapon serial
    const SAMPLE: &str = "WL(BQAAAABXNIA7ORppgmool0p50WCcRx0zrBU6hAAAAAAAAGdAACAA)";

    pub(crate) fn catalog() -> Arc<dyn PartsCatalog> {
        Arc::new(test_db())
    }

    fn decode(text: &str) -> ItemSerial {
        ItemSerial::decode(text, catalog()).unwrap()
    }

    fn reparse(serial: &ItemSerial) -> ItemSerial {
        ItemSerial::decode(serial.token().to_vec(), Arc::clone(serial.catalog())).unwrap()
    }

    fn indices(parts: Option<Vec<Classified<'_>>>) -> Vec<u32> {
        parts.unwrap().iter().map(|p| p.index).collect()
    }

    /// Catalog with the widths of a current-generation weapon serial
    fn sample_catalog() -> Arc<dyn PartsCatalog> {
        let no_assets: [&str; 0] = [];
        Arc::new(
            SerialDb::builder()
                .category(BALANCE_CATEGORY, &[(59, 9)], no_assets)
                .category(SUB_TYPE_CATEGORY, &[(59, 7)], no_assets)
                .category(SOURCE_CATEGORY, &[(59, 5)], no_assets)
                .category(ENCHANTMENT_CATEGORY, &[(59, 6)], no_assets)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_decode_seeded_pistol() {
        let serial = decode(PISTOL);
        assert_eq!(serial.state(), SerialState::PartsParsed);
        assert_eq!(serial.format_version(), Some(FORMAT_VERSION));
        assert_eq!(serial.seed(), Some(0x1234_5678));
        assert_eq!(serial.schema_version(), Some(2));

        let category = serial.category().unwrap();
        assert_eq!(category.index, 1);
        assert_eq!(category.name, Some(DAHL_PISTOL));
        assert_eq!(serial.sub_type().unwrap().index, 1);
        assert!(serial.source().unwrap().name.unwrap().ends_with("/Dahl"));
        assert_eq!(serial.level(), Some(20));

        assert_eq!(indices(serial.parts()), vec![1, 2, 4, 5]);
        assert!(serial.parts().unwrap()[0]
            .name
            .unwrap()
            .ends_with("Part_PS_DAL_Body"));
        assert_eq!(indices(serial.enchantments()), vec![1]);
        assert_eq!(serial.trailer_bytes(), Some(&[3, 0x7F][..]));
        assert_eq!(serial.reroll_count(), Some(2));
        assert_eq!(serial.chaos_tier(), Some(1));
        assert_eq!(serial.level_description().as_deref(), Some("level 20, Chaotic"));
        assert_eq!(serial.balance_short(), Some("Balance_PS_DAL_01_Common"));
        assert_eq!(serial.display_name().as_deref(), Some("Balance_PS_DAL_01_Common"));
    }

    #[test]
    fn test_negative_seed_decodes_identically() {
        let mut positive = decode(PISTOL);
        let mut negative = decode(PISTOL_NEGATIVE_SEED);
        assert_eq!(negative.seed(), Some(-559_038_737));
        assert_eq!(positive.decode_header().unwrap(), negative.decode_header().unwrap());
        assert_eq!(
            positive.decode_parts().unwrap().cloned(),
            negative.decode_parts().unwrap().cloned()
        );
    }

    #[test]
    fn test_missing_reroll_reads_as_zero() {
        let mut serial = decode(LEGENDARY);
        assert_eq!(serial.schema_version(), Some(3));
        assert_eq!(serial.level(), Some(40));
        assert_eq!(serial.decode_parts().unwrap().unwrap().reroll_count, None);
        assert_eq!(serial.reroll_count(), Some(0));
        assert_eq!(serial.chaos_tier(), Some(3));
        assert_eq!(indices(serial.parts()), vec![1, 2, 3, 4, 5]);
        assert_eq!(indices(serial.enchantments()), vec![2]);
        assert_eq!(serial.trailer_bytes(), Some(&[][..]));
        assert_eq!(serial.category().unwrap().name, Some(DAHL_PISTOL_LEGENDARY));
        assert_eq!(serial.display_name().as_deref(), Some("Hellwalker"));
    }

    #[test]
    fn test_states_advance_lazily() {
        let mut serial = ItemSerial::from_text(PISTOL, catalog()).unwrap();
        assert_eq!(serial.state(), SerialState::Encoded);
        assert_eq!(serial.level(), None);

        assert_eq!(serial.decode_header().unwrap().level, 20);
        assert_eq!(serial.state(), SerialState::HeaderParsed);
        assert_eq!(serial.parts(), None);

        assert!(serial.decode_parts().unwrap().is_some());
        assert_eq!(serial.state(), SerialState::PartsParsed);
    }

    #[test]
    fn test_unknown_part_category_is_header_only() {
        let mut serial = decode(AMULET);
        assert_eq!(serial.state(), SerialState::HeaderParsed);
        assert!(!serial.parts_parseable());
        assert!(!serial.can_have_chaos_tier());
        assert!(!serial.can_have_enchantment());
        assert!(matches!(
            serial.parts_unavailable_reason(),
            Some(SerialError::UnknownPartCategory(balance)) if balance.ends_with("Balance_Amulet_01_Common")
        ));
        assert_eq!(serial.level(), Some(35));
        assert_eq!(serial.schema_version(), Some(3));
        assert_eq!(serial.sub_type().unwrap().index, 2);
        assert_eq!(serial.source().unwrap().index, 2);
        assert_eq!(serial.parts(), None);
        assert_eq!(serial.chaos_tier(), None);
        assert_eq!(serial.level_description().as_deref(), Some("level 35"));

        let err = serial.set_chaos_tier(1).unwrap_err();
        assert!(matches!(err, SerialError::PartsUnavailable(_)));
        assert!(err.is_opaque());
        assert_eq!(serial.to_text(Seed::Zero).unwrap(), AMULET);
    }

    #[test]
    fn test_header_only_encode_is_stable() {
        let mut serial = decode(AMULET);
        serial.set_level(50).unwrap();
        let first = serial.to_text(Seed::Zero).unwrap();
        assert_eq!(first, "WL(BQAAAAC2eICDgYgszgI=)");
        assert_eq!(serial.to_text(Seed::Zero).unwrap(), first);
        assert_eq!(serial.to_text(Seed::Original).unwrap(), first);

        let mut again = reparse(&serial);
        assert_eq!(again.level(), Some(50));
        assert!(!again.parts_parseable());
    }

    #[test]
    fn test_customizations_force_header_only() {
        let mut serial = decode(CUSTOMIZED);
        assert!(!serial.parts_parseable());
        assert_eq!(
            serial.parts_unavailable_reason(),
            Some(&SerialError::CustomizationsPresent(3))
        );
        assert_eq!(serial.level(), Some(12));
        assert_eq!(
            serial.set_enchantments(&[1]),
            Err(SerialError::PartsUnavailable(Box::new(
                SerialError::CustomizationsPresent(3)
            )))
        );
        assert!(serial.set_parts(&[1]).is_err());
        assert!(serial.set_reroll_count(1).is_err());
        assert_eq!(serial.to_text(Seed::Zero).unwrap(), CUSTOMIZED);

        serial.set_level(13).unwrap();
        assert_eq!(reparse(&serial).level(), Some(13));
    }

    #[test]
    fn test_stray_tail_bit_is_malformed() {
        let serial = decode(STRAY_BIT);
        assert_eq!(serial.state(), SerialState::HeaderParsed);
        assert!(matches!(
            serial.parts_unavailable_reason(),
            Some(SerialError::MalformedPartTail(_))
        ));
        assert_eq!(serial.level(), Some(20));
    }

    /// Seal `header` followed by `tail` under seed 0
    fn seal_layout(header: &Header, tail: &BitStream) -> Vec<u8> {
        let mut payload = encode_header(header).unwrap();
        payload.append_stream(tail);
        obfuscation::seal(FORMAT_VERSION, 0, &payload.to_bytes())
    }

    #[test]
    fn test_bad_sentinel_is_unparseable() {
        let token = obfuscation::seal(FORMAT_VERSION, 0, &[0x81, 0x02, 0x04, 0x08, 0x10]);
        let mut serial = ItemSerial::from_bytes(&token, catalog());

        let err = serial.decode_header().unwrap_err();
        assert_eq!(err, SerialError::BadSentinel(0x81));
        assert!(!err.is_opaque());
        assert_eq!(serial.state(), SerialState::Unparseable);
    }

    #[test]
    fn test_unknown_balance_is_header_only() {
        let mut header = decode(PISTOL).decode_header().unwrap().clone();
        header.category.index = 40;
        let mut serial = ItemSerial::from_bytes(&seal_layout(&header, &BitStream::new()), catalog());

        assert_eq!(serial.decode_header().unwrap().category.index, 40);
        assert!(!serial.parts_parseable());
        assert_eq!(serial.state(), SerialState::HeaderParsed);
        assert_eq!(
            serial.parts_unavailable_reason(),
            Some(&SerialError::UnknownPartCategory("balance #40".to_string()))
        );
        assert!(serial.parts_unavailable_reason().unwrap().is_opaque());
        assert_eq!(serial.category().unwrap().name, None);
    }

    #[test]
    fn test_customizations_ignore_following_bits() {
        let header = decode(PISTOL).decode_header().unwrap().clone();
        let mut tail = BitStream::new();
        tail.append(0, PART_COUNT_BITS.into()).unwrap();
        tail.append(0, ENCHANTMENT_COUNT_BITS.into()).unwrap();
        tail.append(0, TRAILER_COUNT_BITS.into()).unwrap();
        tail.append(3, CUSTOM_COUNT_BITS.into()).unwrap();
        tail.append(0xBEEF, 16).unwrap();
        tail.append(0x5A5A, 16).unwrap();
        let token = seal_layout(&header, &tail);

        let mut serial = ItemSerial::from_bytes(&token, catalog());
        assert!(!serial.parts_parseable());
        assert_eq!(
            serial.parts_unavailable_reason(),
            Some(&SerialError::CustomizationsPresent(3))
        );
        assert_eq!(serial.level(), Some(20));
        assert!(serial.set_chaos_tier(2).is_err());
        assert_eq!(serial.token(), token.as_slice());
    }

    #[test]
    fn test_unchanged_values_leave_token_alone() {
        let mut serial = decode(PISTOL);
        let before = serial.token().to_vec();

        serial.set_level(20).unwrap();
        serial.set_chaos_tier(1).unwrap();
        serial.set_reroll_count(2).unwrap();
        serial.set_parts(&[1, 2, 4, 5]).unwrap();
        serial.set_enchantments(&[1]).unwrap();

        assert_eq!(serial.token(), before.as_slice());
        assert_eq!(serial.seed(), Some(0x1234_5678));
        assert_eq!(serial.schema_version(), Some(2));
        assert!(!serial.parts_dirty());

        // A missing reroll field already reads as zero
        let mut legendary = decode(LEGENDARY);
        legendary.set_reroll_count(0).unwrap();
        assert_eq!(legendary.to_text(Seed::Original).unwrap(), LEGENDARY);
        assert_eq!(legendary.seed(), Some(77));
    }

    #[test]
    fn test_set_level_reuses_tail() {
        let mut serial = decode(PISTOL);
        let tail = serial.raw_tail_bits().cloned();
        serial.set_level(40).unwrap();

        assert_eq!(serial.seed(), Some(0));
        assert!(!serial.parts_dirty());
        assert_eq!(serial.raw_tail_bits().cloned(), tail);
        assert_eq!(
            serial.to_text(Seed::Zero).unwrap(),
            "WL(BQAAAABotYCCIAJFhFBFCAz8gUAA)"
        );

        let again = reparse(&serial);
        assert_eq!(again.level(), Some(40));
        assert_eq!(again.schema_version(), Some(2));
        assert_eq!(indices(again.parts()), vec![1, 2, 4, 5]);
        assert_eq!(again.reroll_count(), Some(2));
        assert_eq!(again.chaos_tier(), Some(1));
    }

    #[test]
    fn test_original_seed_survives_edits() {
        let mut serial = decode(LEGENDARY);
        serial.set_level(99).unwrap();
        assert_eq!(serial.original_seed(), 77);
        assert_eq!(
            serial.to_text(Seed::Original).unwrap(),
            "WL(BQAAAE2EnWGDNxY6xib7jhU6AA==)"
        );
        assert_eq!(serial.to_text(Seed::Fixed(77)).unwrap(), serial.to_text(Seed::Original).unwrap());
    }

    #[test]
    fn test_chaos_tier_edit_upgrades_schema() {
        let mut serial = decode(PISTOL);
        serial.set_chaos_tier(3).unwrap();

        assert!(serial.parts_dirty());
        assert_eq!(serial.schema_version(), Some(3));
        assert_eq!(
            serial.to_text(Seed::Zero).unwrap(),
            "WL(BQAAAAAlzICDQASFCIKUCAIDfyAwAA==)"
        );

        let again = reparse(&serial);
        assert_eq!(again.schema_version(), Some(3));
        assert_eq!(again.chaos_tier(), Some(3));
        assert_eq!(again.level(), Some(20));
        assert_eq!(indices(again.parts()), vec![1, 2, 4, 5]);
        assert_eq!(indices(again.enchantments()), vec![1]);
        assert_eq!(again.trailer_bytes(), Some(&[3, 0x7F][..]));
        assert_eq!(again.reroll_count(), Some(2));
    }

    #[test]
    fn test_full_reencode_writes_reroll_field() {
        let mut serial = decode(LEGENDARY);
        serial.set_parts(&[5, 4, 3, 2, 1]).unwrap();
        assert_eq!(
            serial.to_text(Seed::Zero).unwrap(),
            "WL(BQAAAACVwYADQQSqKGSIEAIAAAY=)"
        );

        let mut again = reparse(&serial);
        assert_eq!(again.decode_parts().unwrap().unwrap().reroll_count, Some(0));
        assert_eq!(indices(again.parts()), vec![5, 4, 3, 2, 1]);
        assert_eq!(again.chaos_tier(), Some(3));
    }

    #[test]
    fn test_level_edit_after_parts_edit_keeps_new_layout() {
        let mut serial = decode(PISTOL);
        serial.set_reroll_count(9).unwrap();
        serial.set_level(55).unwrap();

        let again = reparse(&serial);
        assert_eq!(again.schema_version(), Some(3));
        assert_eq!(again.level(), Some(55));
        assert_eq!(again.reroll_count(), Some(9));
        assert_eq!(indices(again.parts()), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_part_names_round_trip() {
        let mut serial = decode(PISTOL);
        let names: Vec<String> = serial
            .parts()
            .unwrap()
            .iter()
            .rev()
            .map(|p| p.name.unwrap().to_string())
            .collect();
        serial.set_part_names(&names).unwrap();
        assert_eq!(indices(reparse(&serial).parts()), vec![5, 4, 2, 1]);

        assert!(matches!(
            serial.set_part_names(&["Part_Missing"]),
            Err(SerialError::UnknownPart { name, .. }) if name == "Part_Missing"
        ));
        assert!(matches!(
            serial.set_parts(&[6]),
            Err(SerialError::UnknownPart { .. })
        ));
        assert!(matches!(
            serial.set_parts(&[0]),
            Err(SerialError::UnknownPart { .. })
        ));
    }

    #[test]
    fn test_enchantment_edits() {
        let mut serial = decode(PISTOL);
        assert!(serial.can_have_enchantment());
        serial
            .set_enchantment("/Game/Gear/_Shared/_Design/Enchantments/Part_Ench_FireDamage")
            .unwrap();
        assert_eq!(indices(reparse(&serial).enchantments()), vec![3]);

        serial.set_enchantments(&[]).unwrap();
        assert!(reparse(&serial).enchantments().unwrap().is_empty());

        assert!(matches!(
            serial.set_enchantment("Part_Ench_Nothing"),
            Err(SerialError::UnknownPart { .. })
        ));
    }

    #[test]
    fn test_enchantments_respect_enchantable_types() {
        let restricted: Arc<dyn PartsCatalog> = Arc::new(
            test_db().with_enchantable(["/Game/Gear/Rings/_Shared/_Design/InvData_Ring"]),
        );
        let mut serial = ItemSerial::decode(PISTOL, restricted).unwrap();
        assert!(!serial.can_have_enchantment());
        assert!(matches!(
            serial.set_enchantments(&[1]),
            Err(SerialError::NotEnchantable(name)) if name.ends_with("WT_PS_DAL")
        ));
        // Clearing is always allowed
        serial.set_enchantments(&[]).unwrap();
    }

    #[test]
    fn test_out_of_range_edits_leave_token_untouched() {
        let mut serial = decode(PISTOL);
        let before = serial.token().to_vec();

        assert_eq!(
            serial.set_level(128),
            Err(SerialError::ValueOutOfRange {
                field: "level",
                value: 128,
                bits: 7
            })
        );
        assert_eq!(
            serial.set_chaos_tier(200),
            Err(SerialError::ValueOutOfRange {
                field: "chaos tier",
                value: 200,
                bits: 7
            })
        );
        assert_eq!(
            serial.set_parts(&[1; 64]),
            Err(SerialError::ValueOutOfRange {
                field: "part count",
                value: 64,
                bits: 6
            })
        );
        assert_eq!(serial.token(), before.as_slice());
        assert!(!serial.parts_dirty());
    }

    #[test]
    fn test_checksum_failure_is_unparseable() {
        let mut token = decode_text(PISTOL).unwrap();
        token[9] ^= 0x10;
        let mut serial = ItemSerial::new(token.clone(), catalog()).unwrap();

        let err = serial.decode_header().unwrap_err();
        assert!(matches!(err, SerialError::ChecksumMismatch { .. }));
        assert!(!err.is_opaque());
        assert_eq!(serial.state(), SerialState::Unparseable);
        assert!(matches!(
            serial.set_level(10),
            Err(SerialError::ChecksumMismatch { .. })
        ));
        assert_eq!(serial.token(), token.as_slice());
    }

    #[test]
    fn test_newer_schema_is_opaque() {
        let old_catalog: Arc<dyn PartsCatalog> = Arc::new(
            SerialDb::builder()
                .category(BALANCE_CATEGORY, &[(1, 6)], [DAHL_PISTOL])
                .category(SUB_TYPE_CATEGORY, &[(1, 4)], ["WT_PS_DAL"])
                .category(SOURCE_CATEGORY, &[(1, 4)], ["Dahl"])
                .build()
                .unwrap(),
        );
        let mut serial = ItemSerial::from_text(PISTOL, old_catalog).unwrap();
        let err = serial.decode_header().unwrap_err();
        assert_eq!(err, SerialError::UnsupportedSchemaVersion { version: 2, max: 1 });
        assert!(err.is_opaque());

        // Opaque items still re-seal
        assert_eq!(serial.to_text(Seed::Original).unwrap(), PISTOL);
        let unsealed = ItemSerial::from_bytes(&serial.encode(Seed::Zero).unwrap(), catalog());
        assert_eq!(unsealed.seed(), Some(0));
        assert_eq!(ItemSerial::decode(unsealed.token().to_vec(), catalog()).unwrap().level(), Some(20));
    }

    #[test]
    fn test_unknown_format_version() {
        let mut token = decode_text(PISTOL).unwrap();
        token[0] = 6;
        let mut serial = ItemSerial::from_bytes(&token, catalog());
        assert_eq!(serial.decode_header().unwrap_err(), SerialError::UnsupportedFormat(6));
        assert!(serial.parts_unavailable_reason().unwrap().is_opaque());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(
            ItemSerial::from_text("not a serial", catalog()),
            Err(SerialError::InvalidToken(_))
        ));
        let mut empty = ItemSerial::from_bytes(&[], catalog());
        assert!(matches!(
            empty.decode_header(),
            Err(SerialError::TooShort { actual: 0, .. })
        ));
        assert!(empty.encode(Seed::Fixed(5)).is_err());
    }

    #[test]
    fn test_sample_weapon_level_edit() {
        let mut serial = ItemSerial::decode(SAMPLE, sample_catalog()).unwrap();
        assert_eq!(serial.format_version(), Some(5));
        assert_eq!(serial.seed(), Some(0));
        assert_eq!(serial.schema_version(), Some(59));
        assert_eq!(serial.level(), Some(38));
        assert!(!serial.parts_parseable());

        serial.set_level(40).unwrap();
        let text = serial.to_text(Seed::Zero).unwrap();
        assert_eq!(text, "WL(BQAAAAC8aoA7ORqJgmool0p50WCcRx0zrBU6hAAAAAAAAGdAACAA)");

        let again = ItemSerial::decode(text.as_str(), sample_catalog()).unwrap();
        assert_eq!(again.level(), Some(40));
        assert_eq!(again.category().unwrap().index, 114);
        assert_eq!(again.sub_type().unwrap().index, 26);
        assert_eq!(again.source().unwrap().index, 18);
    }

    #[test]
    fn test_random_seed_round_trips() {
        let serial = decode(PISTOL);
        let resealed = ItemSerial::decode(serial.encode(Seed::Random).unwrap(), catalog()).unwrap();
        assert_eq!(resealed.level(), Some(20));
        assert_eq!(indices(resealed.parts()), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_seed_from_option() {
        assert_eq!(Seed::from(None), Seed::Zero);
        assert_eq!(Seed::from(Some(-3)), Seed::Fixed(-3));
    }

    #[test]
    fn test_summary_serializes() {
        let serial = decode(LEGENDARY);
        let json = serde_json::to_value(serial.summary()).unwrap();
        assert_eq!(json["level"], 40);
        assert_eq!(json["display_name"], "Hellwalker");
        assert_eq!(json["state"], "PartsParsed");
        assert_eq!(json["parts"].as_array().unwrap().len(), 5);
        assert!(json["parts_unavailable"].is_null());
    }

    proptest! {
        #[test]
        fn prop_reseal_preserves_fields(seed in any::<i32>()) {
            for text in [PISTOL, LEGENDARY, AMULET] {
                let mut original = decode(text);
                let mut resealed = ItemSerial::decode(original.encode(Seed::Fixed(seed)).unwrap(), catalog()).unwrap();
                prop_assert_eq!(resealed.seed(), Some(seed));
                prop_assert_eq!(original.decode_header().unwrap(), resealed.decode_header().unwrap());
                prop_assert_eq!(
                    original.decode_parts().unwrap().cloned(),
                    resealed.decode_parts().unwrap().cloned()
                );
            }
        }

        #[test]
        fn prop_set_level_changes_only_level(level in 0u8..=MAX_LEVEL, seed in any::<i32>()) {
            for text in [PISTOL, LEGENDARY] {
                let mut original = decode(text);
                let mut edited = decode(text);
                edited.set_level(level).unwrap();

                let mut again = ItemSerial::decode(edited.encode(Seed::Fixed(seed)).unwrap(), catalog()).unwrap();
                let mut expected = original.decode_header().unwrap().clone();
                expected.level = level;
                prop_assert_eq!(again.decode_header().unwrap(), &expected);
                prop_assert_eq!(
                    original.decode_parts().unwrap().cloned(),
                    again.decode_parts().unwrap().cloned()
                );
            }
        }
    }
}
