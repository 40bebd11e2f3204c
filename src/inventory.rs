//! Inventory ledger
//!
//! Authoritative stock counts per product. Commit/release for a single
//! product are serialized behind a per-product mutex, so concurrent order
//! creation for the last unit yields exactly one success and one
//! `InsufficientStock` failure, never an oversell.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use uuid::Uuid;

use crate::error::{CommerceError, Result};

/// Ceiling applied to stock on release. A release that would exceed it is
/// clamped and logged as an anomaly rather than propagated.
const STOCK_CEILING: i64 = 1_000_000;

#[derive(Clone, Copy, Debug)]
pub struct StockRecord {
    /// May go negative only when backorders are allowed.
    pub stock: i64,
    pub low_stock_threshold: Option<u32>,
    pub backorder_allowed: bool,
}

#[derive(Debug, Default)]
pub struct InventoryLedger {
    records: RwLock<HashMap<Uuid, Arc<Mutex<StockRecord>>>>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Register or replace a product's stock record.
    pub fn upsert(
        &self,
        product_id: Uuid,
        stock: i64,
        low_stock_threshold: Option<u32>,
        backorder_allowed: bool,
    ) {
        let record = StockRecord { stock, low_stock_threshold, backorder_allowed };
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get(&product_id) {
            Some(slot) => {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = record;
            }
            None => {
                records.insert(product_id, Arc::new(Mutex::new(record)));
            }
        }
    }

    fn slot(&self, product_id: Uuid) -> Result<Arc<Mutex<StockRecord>>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&product_id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("stock record", product_id))
    }

    pub fn stock(&self, product_id: Uuid) -> Result<i64> {
        let slot = self.slot(product_id)?;
        let record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(record.stock)
    }

    /// `stock > 0` and (`quantity <= stock` or backorder allowed).
    pub fn check_availability(&self, product_id: Uuid, quantity: u32) -> Result<bool> {
        let slot = self.slot(product_id)?;
        let record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(record.stock > 0 && (i64::from(quantity) <= record.stock || record.backorder_allowed))
    }

    /// Decrement stock. Fails with `InsufficientStock` if the post-condition
    /// would go negative and backorder is disallowed.
    pub fn commit(&self, product_id: Uuid, quantity: u32) -> Result<()> {
        let slot = self.slot(product_id)?;
        let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let requested = i64::from(quantity);
        if !record.backorder_allowed && record.stock < requested {
            return Err(CommerceError::InsufficientStock {
                product_id,
                requested: quantity,
                available: record.stock.max(0),
            });
        }
        record.stock -= requested;
        tracing::debug!(%product_id, quantity, stock = record.stock, "stock committed");
        Ok(())
    }

    /// Increment stock (cancellation, accepted return). Clamped to a sane
    /// ceiling; a clamped release is logged as an anomaly.
    pub fn release(&self, product_id: Uuid, quantity: u32) -> Result<()> {
        let slot = self.slot(product_id)?;
        let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let restored = record.stock + i64::from(quantity);
        if restored > STOCK_CEILING {
            tracing::warn!(
                %product_id,
                quantity,
                stock = record.stock,
                "release would exceed stock ceiling; clamping"
            );
            record.stock = STOCK_CEILING;
        } else {
            record.stock = restored;
        }
        tracing::debug!(%product_id, quantity, stock = record.stock, "stock released");
        Ok(())
    }

    pub fn is_low_stock(&self, product_id: Uuid) -> Result<bool> {
        let slot = self.slot(product_id)?;
        let record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(record
            .low_stock_threshold
            .map_or(false, |threshold| record.stock <= i64::from(threshold)))
    }

    /// Commit every line or none: on the first failure, releases the lines
    /// already committed and returns the failure.
    pub fn commit_all(&self, lines: &[(Uuid, u32)]) -> Result<()> {
        for (index, (product_id, quantity)) in lines.iter().enumerate() {
            if let Err(err) = self.commit(*product_id, *quantity) {
                for (committed_id, committed_qty) in &lines[..index] {
                    // Rollback of our own commit; the record cannot have
                    // vanished, but a failure here must not mask `err`.
                    if let Err(rollback_err) = self.release(*committed_id, *committed_qty) {
                        tracing::error!(
                            product_id = %committed_id,
                            error = %rollback_err,
                            "failed to roll back partial stock commit"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
