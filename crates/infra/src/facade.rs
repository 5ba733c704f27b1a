//! Public inventory API.
//!
//! Every operation runs in exactly one unit of work: it commits when the
//! whole operation succeeded and rolls back otherwise, reads included.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::instrument;

use stockledger_core::PartNo;
use stockledger_inventory::{Movement, MovementRequest, NewPart, Part, PartUpdate, StockDiscrepancy};

use crate::engine::StockEngine;
use crate::error::{InventoryError, InventoryResult};
use crate::store::{Transaction, TransactionalStore};

/// Entry point for callers. Owns the store handle; cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct InventoryFacade<S> {
    store: S,
}

impl<S: TransactionalStore> InventoryFacade<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// All parts with stock, ordered by part number. `None` when there are no parts.
    #[instrument(skip(self), err)]
    pub fn list_all(&self) -> InventoryResult<Option<Vec<Part>>> {
        self.unit_of_work("list_all", |engine| engine.registry().get_all())
    }

    #[instrument(skip(self), err)]
    pub fn get_part(&self, part_no: &str) -> InventoryResult<Part> {
        let part_no = PartNo::parse(part_no)?;
        self.unit_of_work("get_part", |engine| engine.registry().get(&part_no))
    }

    /// Movements of `part_no`, newest first. Unknown parts have an empty history.
    #[instrument(skip(self), err)]
    pub fn get_history(&self, part_no: &str) -> InventoryResult<Vec<Movement>> {
        let part_no = PartNo::parse(part_no)?;
        self.unit_of_work("get_history", |engine| engine.ledger().list_for(&part_no))
    }

    #[instrument(skip(self, name, description), err)]
    pub fn create_part(
        &self,
        part_no: &str,
        name: &str,
        description: &str,
        initial_stock: i64,
    ) -> InventoryResult<Part> {
        let new = NewPart::new(part_no, name, description, initial_stock)?;
        self.unit_of_work("create_part", |engine| engine.create_part(&new, Utc::now()))
    }

    /// Rename `current` to `new_part_no` and replace its name and description.
    /// Passing the same number edits metadata only.
    #[instrument(skip(self, name, description), err)]
    pub fn rename_part(
        &self,
        current: &str,
        new_part_no: &str,
        name: &str,
        description: &str,
    ) -> InventoryResult<Part> {
        let current = PartNo::parse(current)?;
        let update = PartUpdate::new(new_part_no, name, description)?;
        self.unit_of_work("rename_part", |engine| engine.rename_part(&current, &update))
    }

    #[instrument(skip(self), err)]
    pub fn delete_part(&self, part_no: &str) -> InventoryResult<()> {
        let part_no = PartNo::parse(part_no)?;
        self.unit_of_work("delete_part", |engine| engine.delete_part(&part_no))
    }

    /// Record a movement and return the part's new stock.
    ///
    /// The request is validated before the store is touched.
    #[instrument(
        skip(self, request),
        fields(part_no = %request.part_no, kind = %request.kind),
        err
    )]
    pub fn apply_movement(&self, request: &MovementRequest) -> InventoryResult<i64> {
        let movement = request.validate()?;
        let applied = self.unit_of_work("apply_movement", |engine| {
            engine.apply_movement(&movement, Utc::now())
        })?;
        Ok(applied.new_stock)
    }

    /// Part number → current stock.
    #[instrument(skip(self), err)]
    pub fn stock_levels(&self) -> InventoryResult<BTreeMap<PartNo, i64>> {
        self.unit_of_work("stock_levels", |engine| engine.registry().stock_levels())
    }

    /// Parts whose stock snapshot disagrees with their movement history.
    #[instrument(skip(self), err)]
    pub fn audit(&self) -> InventoryResult<Vec<StockDiscrepancy>> {
        let report = self.unit_of_work("audit", |engine| engine.audit())?;
        if !report.is_empty() {
            tracing::warn!(parts = report.len(), "stock snapshot drift detected");
        }
        Ok(report)
    }

    fn unit_of_work<R>(
        &self,
        operation: &'static str,
        work: impl FnOnce(&mut StockEngine<'_, S::Tx>) -> InventoryResult<R>,
    ) -> InventoryResult<R> {
        let mut tx = self.store.begin()?;

        let result = work(&mut StockEngine::new(&mut tx));
        match result {
            Ok(value) => {
                tx.commit()?;
                tracing::debug!(operation, "unit of work committed");
                Ok(value)
            }
            Err(err) => {
                match &err {
                    InventoryError::StoreFailure(source) => {
                        tracing::warn!(operation, error = %source, "rolling back after store failure")
                    }
                    other => {
                        tracing::debug!(operation, kind = %other.kind(), "rolling back")
                    }
                }
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(operation, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
