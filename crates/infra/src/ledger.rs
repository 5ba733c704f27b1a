use stockledger_core::{MovementId, PartNo};
use stockledger_inventory::{Movement, NewMovement};

use crate::error::{InventoryError, InventoryResult};
use crate::store::{Query, Statement, StoreError, Transaction};

/// Append-only movement log, keyed by owning part number.
pub struct MovementLedger<'t, T: Transaction> {
    tx: &'t mut T,
}

impl<'t, T: Transaction> MovementLedger<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    /// History of `part_no`, newest first. Empty when there is none.
    pub fn list_for(&mut self, part_no: &PartNo) -> InventoryResult<Vec<Movement>> {
        let movements = self
            .tx
            .query(&Query::MovementsFor {
                part_no: part_no.clone(),
            })?
            .into_iter()
            .map(|record| record.into_movement())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(movements)
    }

    /// Append a movement to its owning part's history.
    ///
    /// A missing owner is reported as `UnknownPart` only by stores that check
    /// the foreign key per statement (the in-memory store). Postgres defers
    /// the check to commit, where it fails the unit as `StoreFailure`. Callers
    /// that need the classification lock the part first, as the engine does.
    pub fn append(&mut self, movement: &NewMovement) -> InventoryResult<MovementId> {
        let outcome = self
            .tx
            .execute(&Statement::InsertMovement(movement.clone()))
            .map_err(|e| match e {
                StoreError::ForeignKeyViolation(_) => {
                    InventoryError::UnknownPart(movement.part_no.clone())
                }
                other => InventoryError::StoreFailure(other),
            })?;

        let id = outcome.last_insert_id.ok_or_else(|| {
            StoreError::Backend("movement insert did not report an id".to_string())
        })?;
        Ok(MovementId::new(id))
    }

    /// Move every movement of `from` onto `to`. Returns how many were moved.
    pub fn rekey(&mut self, from: &PartNo, to: &PartNo) -> InventoryResult<u64> {
        let outcome = self.tx.execute(&Statement::RekeyMovements {
            from: from.clone(),
            to: to.clone(),
        })?;
        Ok(outcome.rows_affected)
    }

    pub fn delete_for(&mut self, part_no: &PartNo) -> InventoryResult<u64> {
        let outcome = self.tx.execute(&Statement::DeleteMovements {
            part_no: part_no.clone(),
        })?;
        Ok(outcome.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stockledger_inventory::{MovementType, NewPart, Part, Quantity};

    use crate::error::ErrorKind;
    use crate::store::{InMemoryStore, TransactionalStore};

    fn part_no(raw: &str) -> PartNo {
        PartNo::parse(raw).unwrap()
    }

    fn seed_part(tx: &mut impl Transaction, raw: &str) {
        let part: Part = NewPart::new(raw, "Bolt", "", 0).unwrap().to_part();
        tx.execute(&Statement::InsertPart(part)).unwrap();
    }

    fn movement(raw: &str, kind: MovementType, qty: i64, offset_secs: i64) -> NewMovement {
        NewMovement::new(
            part_no(raw),
            kind,
            Quantity::new(qty).unwrap(),
            None,
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn history_is_newest_first() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        seed_part(&mut tx, "A1");
        let mut ledger = MovementLedger::new(&mut tx);

        let first = ledger.append(&movement("A1", MovementType::In, 10, 0)).unwrap();
        let second = ledger.append(&movement("A1", MovementType::Out, 3, 60)).unwrap();
        assert!(second > first);

        let history = ledger.list_for(&part_no("A1")).unwrap();
        let ids: Vec<MovementId> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn append_for_missing_part_is_unknown_part() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut ledger = MovementLedger::new(&mut tx);

        let err = ledger.append(&movement("ZZ", MovementType::In, 1, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPart);
        assert!(ledger.list_for(&part_no("ZZ")).unwrap().is_empty());
    }

    #[test]
    fn rekey_and_delete_touch_only_the_named_part() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        seed_part(&mut tx, "A1");
        seed_part(&mut tx, "C3");
        let mut ledger = MovementLedger::new(&mut tx);
        ledger.append(&movement("A1", MovementType::In, 1, 0)).unwrap();
        ledger.append(&movement("A1", MovementType::In, 2, 0)).unwrap();
        ledger.append(&movement("C3", MovementType::In, 3, 0)).unwrap();

        assert_eq!(ledger.rekey(&part_no("A1"), &part_no("B2")).unwrap(), 2);
        assert!(ledger.list_for(&part_no("A1")).unwrap().is_empty());
        assert_eq!(ledger.list_for(&part_no("B2")).unwrap().len(), 2);

        assert_eq!(ledger.delete_for(&part_no("B2")).unwrap(), 2);
        assert_eq!(ledger.list_for(&part_no("C3")).unwrap().len(), 1);
    }
}
