//! Chaos tier definitions

use serde::{Deserialize, Serialize};

/// Chaos tier of an item, stored as the serial's 7-bit trailing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChaosTier {
    Regular,
    Chaotic,
    Volatile,
    Primordial,
    Ascended,
}

/// Chaos tier information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaosTierInfo {
    pub tier: ChaosTier,
    pub label: &'static str,
    /// Value written into the serial
    pub value: u8,
}

/// All chaos tiers in order
pub const CHAOS_TIERS: &[ChaosTierInfo] = &[
    ChaosTierInfo {
        tier: ChaosTier::Regular,
        label: "Regular",
        value: 0,
    },
    ChaosTierInfo {
        tier: ChaosTier::Chaotic,
        label: "Chaotic",
        value: 1,
    },
    ChaosTierInfo {
        tier: ChaosTier::Volatile,
        label: "Volatile",
        value: 2,
    },
    ChaosTierInfo {
        tier: ChaosTier::Primordial,
        label: "Primordial",
        value: 3,
    },
    ChaosTierInfo {
        tier: ChaosTier::Ascended,
        label: "Ascended",
        value: 4,
    },
];

impl ChaosTier {
    /// Table entry for this tier
    pub fn info(self) -> &'static ChaosTierInfo {
        // The table has one entry per variant, in declaration order
        &CHAOS_TIERS[self as usize]
    }

    pub fn value(self) -> u8 {
        self.info().value
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }
}

impl std::fmt::Display for ChaosTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Get chaos tier by its serial value
pub fn chaos_tier_by_value(value: u8) -> Option<&'static ChaosTierInfo> {
    CHAOS_TIERS.iter().find(|t| t.value == value)
}

/// Get chaos tier by label (case-insensitive)
pub fn chaos_tier_by_label(label: &str) -> Option<&'static ChaosTierInfo> {
    CHAOS_TIERS
        .iter()
        .find(|t| t.label.eq_ignore_ascii_case(label))
}
