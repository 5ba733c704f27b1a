//! Part identity and the stock snapshot.

use std::collections::BTreeMap;

use stockledger_core::PartNo;
use stockledger_inventory::{NewPart, Part, PartUpdate};

use crate::error::{InventoryError, InventoryResult};
use crate::store::{Column, FieldValue, Indexed, LockMode, Query, Statement, StoreError, Transaction};

/// Part rows, read and written through the caller's unit of work.
pub struct PartRegistry<'t, T: Transaction> {
    tx: &'t mut T,
}

impl<'t, T: Transaction> PartRegistry<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    /// All parts ordered by part number, or `None` when there are none.
    pub fn get_all(&mut self) -> InventoryResult<Option<Vec<Part>>> {
        let parts = self
            .tx
            .query(&Query::AllParts)?
            .into_iter()
            .map(|record| record.into_part())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(if parts.is_empty() { None } else { Some(parts) })
    }

    pub fn get(&mut self, part_no: &PartNo) -> InventoryResult<Part> {
        self.read(part_no, LockMode::Shared)?
            .ok_or_else(|| InventoryError::NotFound(part_no.clone()))
    }

    /// Read `part_no` and hold its row lock until the unit of work ends.
    pub fn lock(&mut self, part_no: &PartNo) -> InventoryResult<Option<Part>> {
        self.read(part_no, LockMode::ForUpdate)
    }

    /// Insert the part row with its initial stock. The opening movement is the engine's job.
    pub fn create(&mut self, new: &NewPart) -> InventoryResult<Part> {
        let part = new.to_part();
        self.tx
            .execute(&Statement::InsertPart(part.clone()))
            .map_err(|e| duplicate_or_store(e, &part.part_no))?;
        Ok(part)
    }

    /// Rename and/or edit metadata. Stock is left untouched.
    pub fn rename(&mut self, current: &PartNo, update: &PartUpdate) -> InventoryResult<()> {
        let outcome = self
            .tx
            .execute(&Statement::UpdatePart {
                part_no: current.clone(),
                update: update.clone(),
            })
            .map_err(|e| duplicate_or_store(e, &update.part_no))?;

        if outcome.rows_affected == 0 {
            return Err(InventoryError::NotFound(current.clone()));
        }
        Ok(())
    }

    pub fn delete(&mut self, part_no: &PartNo) -> InventoryResult<()> {
        let outcome = self.tx.execute(&Statement::DeletePart {
            part_no: part_no.clone(),
        })?;
        if outcome.rows_affected == 0 {
            return Err(InventoryError::NotFound(part_no.clone()));
        }
        Ok(())
    }

    /// Overwrite the snapshot. Only the stock engine calls this.
    pub(crate) fn set_stock(&mut self, part_no: &PartNo, stock: i64) -> InventoryResult<()> {
        let outcome = self.tx.execute(&Statement::SetStock {
            part_no: part_no.clone(),
            stock,
        })?;
        if outcome.rows_affected == 0 {
            return Err(InventoryError::NotFound(part_no.clone()));
        }
        Ok(())
    }

    /// Part number → current stock, for every part.
    pub fn stock_levels(&mut self) -> InventoryResult<BTreeMap<PartNo, i64>> {
        let indexed = self
            .tx
            .query_indexed(&Query::AllParts, Column::PartNo, Some(Column::Stock))?;

        let mut levels = BTreeMap::new();
        for (key, entry) in indexed {
            match (key, entry) {
                (FieldValue::Text(raw), Indexed::Value(FieldValue::Integer(stock))) => {
                    let part_no = PartNo::parse(&raw).map_err(|e| {
                        StoreError::Backend(format!("stored part_no {raw:?}: {e}"))
                    })?;
                    levels.insert(part_no, stock);
                }
                (key, entry) => {
                    return Err(StoreError::Backend(format!(
                        "unexpected stock projection entry {key:?} => {entry:?}"
                    ))
                    .into());
                }
            }
        }
        Ok(levels)
    }

    fn read(&mut self, part_no: &PartNo, lock: LockMode) -> InventoryResult<Option<Part>> {
        let records = self.tx.query(&Query::Part {
            part_no: part_no.clone(),
            lock,
        })?;
        match records.into_iter().next() {
            Some(record) => Ok(Some(record.into_part()?)),
            None => Ok(None),
        }
    }
}

fn duplicate_or_store(err: StoreError, part_no: &PartNo) -> InventoryError {
    match err {
        StoreError::UniqueViolation(_) => InventoryError::DuplicateKey(part_no.clone()),
        other => InventoryError::StoreFailure(other),
    }
}
