//! Stock engine: the single writer of the stock snapshot.
//!
//! Every path that changes a part's stock goes through here, inside one unit
//! of work, so the snapshot always equals the replay of the part's ledger:
//!
//! 1. lock the part row and read the pre-image
//! 2. compute the new stock from the movement
//! 3. append the movement
//! 4. write the new stock
//!
//! Part lifecycle changes (create, rename, delete) are routed here as well so
//! the ledger follows the part.

use chrono::{DateTime, Utc};
use tracing::debug;

use stockledger_core::{MovementId, PartNo};
use stockledger_inventory::{
    MovementType, NewMovement, NewPart, Part, PartUpdate, StockDiscrepancy, ValidatedMovement,
    replay,
};

use crate::error::{InventoryError, InventoryResult};
use crate::ledger::MovementLedger;
use crate::registry::PartRegistry;
use crate::store::Transaction;

/// Result of [`StockEngine::apply_movement`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AppliedMovement {
    pub movement_id: MovementId,
    pub new_stock: i64,
}

pub struct StockEngine<'t, T: Transaction> {
    tx: &'t mut T,
}

impl<'t, T: Transaction> StockEngine<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    pub fn registry(&mut self) -> PartRegistry<'_, T> {
        PartRegistry::new(&mut *self.tx)
    }

    pub fn ledger(&mut self) -> MovementLedger<'_, T> {
        MovementLedger::new(&mut *self.tx)
    }

    /// Apply an already validated movement and return the new stock.
    pub fn apply_movement(
        &mut self,
        movement: &ValidatedMovement,
        at: DateTime<Utc>,
    ) -> InventoryResult<AppliedMovement> {
        let part = self
            .registry()
            .lock(&movement.part_no)?
            .ok_or_else(|| InventoryError::UnknownPart(movement.part_no.clone()))?;

        let new_stock = movement.kind.apply(part.stock, movement.quantity)?;

        let movement_id = self.ledger().append(&NewMovement::new(
            movement.part_no.clone(),
            movement.kind,
            movement.quantity,
            movement.comment.clone(),
            at,
        ))?;
        self.registry().set_stock(&movement.part_no, new_stock)?;

        debug!(
            part_no = %movement.part_no,
            kind = %movement.kind,
            quantity = movement.quantity.value(),
            from = part.stock,
            to = new_stock,
            "movement applied"
        );

        Ok(AppliedMovement {
            movement_id,
            new_stock,
        })
    }

    /// Register a part and record its initial stock as an IN movement.
    pub fn create_part(&mut self, new: &NewPart, at: DateTime<Utc>) -> InventoryResult<Part> {
        let part = self.registry().create(new)?;
        self.ledger().append(&NewMovement::new(
            new.part_no.clone(),
            MovementType::In,
            new.initial_stock,
            None,
            at,
        ))?;
        Ok(part)
    }

    /// Rename and/or edit a part; its movements follow a rename.
    pub fn rename_part(&mut self, current: &PartNo, update: &PartUpdate) -> InventoryResult<Part> {
        self.lock_existing(current)?;
        self.registry().rename(current, update)?;
        if update.renames(current) {
            let moved = self.ledger().rekey(current, &update.part_no)?;
            debug!(from = %current, to = %update.part_no, moved, "movements re-keyed");
        }
        self.registry().get(&update.part_no)
    }

    /// Remove a part together with its history.
    pub fn delete_part(&mut self, part_no: &PartNo) -> InventoryResult<()> {
        // Waits out in-flight movements so none lands after the history is cleared.
        self.lock_existing(part_no)?;
        let removed = self.ledger().delete_for(part_no)?;
        self.registry().delete(part_no)?;
        debug!(part_no = %part_no, removed, "part deleted");
        Ok(())
    }

    fn lock_existing(&mut self, part_no: &PartNo) -> InventoryResult<Part> {
        self.registry()
            .lock(part_no)?
            .ok_or_else(|| InventoryError::NotFound(part_no.clone()))
    }

    /// Parts whose snapshot disagrees with the replay of their ledger.
    pub fn audit(&mut self) -> InventoryResult<Vec<StockDiscrepancy>> {
        let parts = self.registry().get_all()?.unwrap_or_default();

        let mut discrepancies = Vec::new();
        for part in parts {
            let history = self.ledger().list_for(&part.part_no)?;
            let replayed = replay(&history)?;
            if replayed != part.stock {
                discrepancies.push(StockDiscrepancy {
                    part_no: part.part_no,
                    snapshot: part.stock,
                    replayed,
                });
            }
        }
        Ok(discrepancies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_inventory::MovementRequest;

    use crate::error::ErrorKind;
    use crate::store::{
        ExecOutcome, InMemoryStore, InMemoryTransaction, LockMode, Query, Record, Statement,
        StatementKind, StoreError, TransactionalStore,
    };

    fn part_no(raw: &str) -> PartNo {
        PartNo::parse(raw).unwrap()
    }

    fn validated(part: &str, kind: &str, qty: i64) -> ValidatedMovement {
        MovementRequest::new(part, kind, qty).validate().unwrap()
    }

    #[test]
    fn movements_follow_in_out_stocktake_rules() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut engine = StockEngine::new(&mut tx);
        let now = Utc::now();

        engine
            .create_part(&NewPart::new("A1", "Bolt", "", 10).unwrap(), now)
            .unwrap();

        assert_eq!(engine.apply_movement(&validated("A1", "IN", 5), now).unwrap().new_stock, 15);
        assert_eq!(engine.apply_movement(&validated("A1", "OUT", 3), now).unwrap().new_stock, 12);
        assert_eq!(
            engine.apply_movement(&validated("A1", "STOCKTAKE", 7), now).unwrap().new_stock,
            7
        );
        assert_eq!(engine.registry().get(&part_no("A1")).unwrap().stock, 7);
        assert!(engine.audit().unwrap().is_empty());
    }

    #[test]
    fn out_may_drive_stock_negative() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut engine = StockEngine::new(&mut tx);
        let now = Utc::now();

        engine
            .create_part(&NewPart::new("A1", "Bolt", "", 1).unwrap(), now)
            .unwrap();
        let applied = engine.apply_movement(&validated("A1", "OUT", 4), now).unwrap();
        assert_eq!(applied.new_stock, -3);
    }

    #[test]
    fn unknown_part_writes_nothing() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut engine = StockEngine::new(&mut tx);

        let err = engine
            .apply_movement(&validated("ZZ", "IN", 1), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPart);
        assert!(engine.ledger().list_for(&part_no("ZZ")).unwrap().is_empty());
    }

    #[test]
    fn overflow_is_invalid_quantity() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut engine = StockEngine::new(&mut tx);
        let now = Utc::now();

        engine
            .create_part(&NewPart::new("A1", "Bolt", "", i64::MAX).unwrap(), now)
            .unwrap();
        let err = engine.apply_movement(&validated("A1", "IN", 1), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
        assert_eq!(engine.ledger().list_for(&part_no("A1")).unwrap().len(), 1);
    }

    #[test]
    fn audit_reports_a_drifted_snapshot() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let mut engine = StockEngine::new(&mut tx);

        engine
            .create_part(&NewPart::new("A1", "Bolt", "", 10).unwrap(), Utc::now())
            .unwrap();
        engine.registry().set_stock(&part_no("A1"), 11).unwrap();

        let report = engine.audit().unwrap();
        assert_eq!(
            report,
            vec![StockDiscrepancy {
                part_no: part_no("A1"),
                snapshot: 11,
                replayed: 10,
            }]
        );
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Access {
        Read(Query),
        Write(StatementKind),
    }

    /// Passes everything through to the in-memory store and remembers the order.
    struct Recording {
        inner: InMemoryTransaction,
        log: Vec<Access>,
    }

    impl Recording {
        fn begin(store: &InMemoryStore) -> Self {
            Self {
                inner: store.begin().unwrap(),
                log: Vec::new(),
            }
        }

        fn position(&self, access: &Access) -> usize {
            self.log
                .iter()
                .position(|a| a == access)
                .unwrap_or_else(|| panic!("{access:?} not issued; log: {:?}", self.log))
        }
    }

    impl Transaction for Recording {
        fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, StoreError> {
            self.log.push(Access::Write(statement.kind()));
            self.inner.execute(statement)
        }

        fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError> {
            self.log.push(Access::Read(query.clone()));
            self.inner.query(query)
        }

        fn commit(self) -> Result<(), StoreError> {
            self.inner.commit()
        }

        fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback()
        }
    }

    fn locked_read(raw: &str) -> Access {
        Access::Read(Query::Part {
            part_no: part_no(raw),
            lock: LockMode::ForUpdate,
        })
    }

    #[test]
    fn movement_reads_its_pre_image_under_row_lock() {
        let store = InMemoryStore::new();
        let mut tx = Recording::begin(&store);
        StockEngine::new(&mut tx)
            .create_part(&NewPart::new("A1", "Bolt", "", 1).unwrap(), Utc::now())
            .unwrap();
        tx.log.clear();

        StockEngine::new(&mut tx)
            .apply_movement(&validated("A1", "OUT", 1), Utc::now())
            .unwrap();

        assert_eq!(tx.log.first(), Some(&locked_read("A1")));
        assert!(tx.position(&locked_read("A1")) < tx.position(&Access::Write(StatementKind::SetStock)));
    }

    #[test]
    fn delete_and_rename_lock_the_part_before_touching_movements() {
        let store = InMemoryStore::new();
        let mut tx = Recording::begin(&store);
        let mut engine = StockEngine::new(&mut tx);
        engine
            .create_part(&NewPart::new("A1", "Bolt", "", 1).unwrap(), Utc::now())
            .unwrap();
        engine
            .create_part(&NewPart::new("C3", "Nut", "", 1).unwrap(), Utc::now())
            .unwrap();
        engine
            .rename_part(&part_no("A1"), &PartUpdate::new("B2", "Bolt", "").unwrap())
            .unwrap();
        engine.delete_part(&part_no("C3")).unwrap();

        assert!(
            tx.position(&locked_read("A1")) < tx.position(&Access::Write(StatementKind::UpdatePart))
        );
        assert!(
            tx.position(&locked_read("C3"))
                < tx.position(&Access::Write(StatementKind::DeleteMovements))
        );
    }

    #[test]
    fn delete_and_rename_of_missing_part_write_nothing() {
        let store = InMemoryStore::new();
        let mut tx = Recording::begin(&store);
        let mut engine = StockEngine::new(&mut tx);

        let err = engine.delete_part(&part_no("ZZ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine
            .rename_part(&part_no("ZZ"), &PartUpdate::new("Z2", "x", "").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(tx.log.iter().all(|a| matches!(a, Access::Read(_))));
    }
}
