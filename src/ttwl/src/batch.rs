//! Bulk edits over many serials.
//!
//! Items are independent, so edits run in parallel. An item that cannot
//! take the edit never aborts the batch: opaque items (header-only, newer
//! schema, unknown format) are reported as skipped and corrupt ones as failed.
//! Items that already hold the requested value are left byte-for-byte alone
//! and reported as unchanged.

use rayon::prelude::*;
use std::sync::Arc;

use crate::catalog::PartsCatalog;
use crate::item::InventoryItem;
use crate::serial::{ItemSerial, SerialError};

/// Outcome of a batch edit, by position in the input slice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub updated: Vec<usize>,
    /// Items that already had the requested value
    pub unchanged: Vec<usize>,
    /// Items this codec cannot edit, with the reason
    pub skipped: Vec<(usize, SerialError)>,
    /// Items that are corrupt or rejected the new value
    pub failed: Vec<(usize, SerialError)>,
}

impl BatchReport {
    fn from_results(results: Vec<Result<bool, SerialError>>) -> Self {
        let mut report = Self::default();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(true) => report.updated.push(index),
                Ok(false) => report.unchanged.push(index),
                Err(e) if e.is_opaque() => report.skipped.push((index, e)),
                Err(e) => report.failed.push((index, e)),
            }
        }

        tracing::info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "batch edit finished"
        );
        report
    }

    /// True when nothing failed (skipped items are fine)
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Apply `edit` to every serial in parallel
pub fn apply<F>(serials: &mut [ItemSerial], edit: F) -> BatchReport
where
    F: Fn(&mut ItemSerial) -> Result<(), SerialError> + Sync,
{
    let results: Vec<_> = serials
        .par_iter_mut()
        .map(|serial| -> Result<bool, SerialError> {
            let before = serial.token().to_vec();
            edit(serial)?;
            Ok(serial.token() != before.as_slice())
        })
        .collect();
    BatchReport::from_results(results)
}

/// Apply `edit` to the serial of every inventory record in parallel,
/// writing re-encoded serials back into the records
pub fn apply_to_items<F>(
    items: &mut [InventoryItem],
    catalog: &Arc<dyn PartsCatalog>,
    edit: F,
) -> BatchReport
where
    F: Fn(&mut ItemSerial) -> Result<(), SerialError> + Sync,
{
    let results: Vec<_> = items
        .par_iter_mut()
        .map(|item| -> Result<bool, SerialError> {
            let before = item.serial.clone();
            item.with_serial(Arc::clone(catalog), &edit)?;
            Ok(item.serial != before)
        })
        .collect();
    BatchReport::from_results(results)
}

pub fn set_levels(serials: &mut [ItemSerial], level: u8) -> BatchReport {
    apply(serials, |serial| serial.set_level(level))
}

pub fn set_chaos_tiers(serials: &mut [ItemSerial], tier: u8) -> BatchReport {
    apply(serials, |serial| serial.set_chaos_tier(tier))
}

/// Reset the reroll count of every item to zero
pub fn clear_rerolls(serials: &mut [ItemSerial]) -> BatchReport {
    apply(serials, |serial| serial.set_reroll_count(0))
}

pub fn set_item_levels(
    items: &mut [InventoryItem],
    catalog: &Arc<dyn PartsCatalog>,
    level: u8,
) -> BatchReport {
    apply_to_items(items, catalog, |serial| serial.set_level(level))
}
