use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use stockledger_core::{MovementId, PartNo};
use stockledger_inventory::{Movement, Part};

use super::r#trait::{
    ExecOutcome, Query, Record, Statement, StatementKind, StoreError, Transaction,
    TransactionalStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PartRow {
    name: String,
    description: String,
    stock: i64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    parts: BTreeMap<PartNo, PartRow>,
    movements: BTreeMap<MovementId, Movement>,
    last_movement_id: i64,
}

impl Tables {
    fn part(&self, part_no: &PartNo) -> Option<Part> {
        self.parts.get(part_no).map(|row| Part {
            part_no: part_no.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            stock: row.stock,
        })
    }

    fn orphaned_movement(&self) -> Option<&Movement> {
        self.movements
            .values()
            .find(|m| !self.parts.contains_key(&m.part_no))
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    in_flight: Mutex<bool>,
    released: Condvar,
    faults: Mutex<Vec<StatementKind>>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Units of work are serialized store-wide: `begin`
/// waits (up to the lock timeout) for the previous unit to finish, which also
/// satisfies row-lock semantics for `ForUpdate` reads. Rollback restores the
/// tables captured at `begin`.
///
/// Foreign keys (movement → part) are checked on movement insert and again at
/// commit, mirroring a deferred constraint.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Make the next statement of `kind` fail with [`StoreError::Injected`].
    pub fn fail_next(&self, kind: StatementKind) {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for InMemoryStore {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut in_flight = self.shared.in_flight.lock().map_err(poisoned)?;
        while *in_flight {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout(format!(
                    "no unit of work slot within {:?}",
                    self.lock_timeout
                )));
            }
            let (guard, _) = self
                .shared
                .released
                .wait_timeout(in_flight, deadline - now)
                .map_err(poisoned)?;
            in_flight = guard;
        }
        *in_flight = true;
        drop(in_flight);

        let mut tx = InMemoryTransaction {
            shared: self.shared.clone(),
            undo: None,
            finished: false,
        };
        // On failure `tx` is dropped, which releases the slot.
        let snapshot = tx.tables()?.clone();
        tx.undo = Some(snapshot);
        Ok(tx)
    }
}

/// Unit of work on an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    undo: Option<Tables>,
    finished: bool,
}

impl InMemoryTransaction {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.shared.tables.lock().map_err(poisoned)
    }

    fn take_fault(&self, kind: StatementKind) -> Result<(), StoreError> {
        let mut faults = self.shared.faults.lock().map_err(poisoned)?;
        if let Some(pos) = faults.iter().position(|k| *k == kind) {
            faults.remove(pos);
            return Err(StoreError::Injected(kind));
        }
        Ok(())
    }

    /// Restore the snapshot if requested, then free the store for the next unit.
    fn finish(&mut self, restore: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        if restore {
            if let Some(snapshot) = self.undo.take() {
                *self
                    .shared
                    .tables
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = snapshot;
            }
        }
        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_flight = false;
        self.shared.released.notify_one();
    }
}

impl Transaction for InMemoryTransaction {
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, StoreError> {
        self.take_fault(statement.kind())?;
        let mut tables = self.tables()?;

        match statement {
            Statement::InsertPart(part) => {
                if tables.parts.contains_key(&part.part_no) {
                    return Err(StoreError::UniqueViolation(format!(
                        "part_no {} already exists",
                        part.part_no
                    )));
                }
                tables.parts.insert(
                    part.part_no.clone(),
                    PartRow {
                        name: part.name.clone(),
                        description: part.description.clone(),
                        stock: part.stock,
                    },
                );
                Ok(ExecOutcome::rows(1))
            }
            Statement::UpdatePart { part_no, update } => {
                if !tables.parts.contains_key(part_no) {
                    return Ok(ExecOutcome::rows(0));
                }
                if update.renames(part_no) && tables.parts.contains_key(&update.part_no) {
                    return Err(StoreError::UniqueViolation(format!(
                        "part_no {} already exists",
                        update.part_no
                    )));
                }
                if let Some(mut row) = tables.parts.remove(part_no) {
                    row.name = update.name.clone();
                    row.description = update.description.clone();
                    tables.parts.insert(update.part_no.clone(), row);
                }
                Ok(ExecOutcome::rows(1))
            }
            Statement::SetStock { part_no, stock } => match tables.parts.get_mut(part_no) {
                Some(row) => {
                    row.stock = *stock;
                    Ok(ExecOutcome::rows(1))
                }
                None => Ok(ExecOutcome::rows(0)),
            },
            Statement::DeletePart { part_no } => {
                let removed = tables.parts.remove(part_no).is_some();
                Ok(ExecOutcome::rows(u64::from(removed)))
            }
            Statement::InsertMovement(new) => {
                if !tables.parts.contains_key(&new.part_no) {
                    return Err(StoreError::ForeignKeyViolation(format!(
                        "movement references missing part_no {}",
                        new.part_no
                    )));
                }
                tables.last_movement_id += 1;
                let id = MovementId::new(tables.last_movement_id);
                tables.movements.insert(
                    id,
                    Movement {
                        id,
                        part_no: new.part_no.clone(),
                        kind: new.kind,
                        quantity: new.quantity,
                        comment: new.comment.clone(),
                        recorded_at: new.recorded_at,
                    },
                );
                Ok(ExecOutcome {
                    rows_affected: 1,
                    last_insert_id: Some(id.value()),
                })
            }
            Statement::RekeyMovements { from, to } => {
                let mut rows = 0;
                for movement in tables.movements.values_mut().filter(|m| &m.part_no == from) {
                    movement.part_no = to.clone();
                    rows += 1;
                }
                Ok(ExecOutcome::rows(rows))
            }
            Statement::DeleteMovements { part_no } => {
                let before = tables.movements.len();
                tables.movements.retain(|_, m| &m.part_no != part_no);
                Ok(ExecOutcome::rows((before - tables.movements.len()) as u64))
            }
        }
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables()?;

        let records = match query {
            Query::AllParts => tables
                .parts
                .keys()
                .filter_map(|part_no| tables.part(part_no))
                .map(Record::Part)
                .collect(),
            // The whole unit already holds the store, so `ForUpdate` needs no extra lock.
            Query::Part { part_no, .. } => tables.part(part_no).map(Record::Part).into_iter().collect(),
            Query::MovementsFor { part_no } => {
                let mut movements: Vec<Movement> = tables
                    .movements
                    .values()
                    .filter(|m| &m.part_no == part_no)
                    .cloned()
                    .collect();
                movements.sort_by(|a, b| {
                    b.recorded_at
                        .cmp(&a.recorded_at)
                        .then_with(|| b.id.cmp(&a.id))
                });
                movements.into_iter().map(Record::Movement).collect()
            }
        };

        Ok(records)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let orphan = self
            .tables()?
            .orphaned_movement()
            .map(|m| format!("movement {} references missing part_no {}", m.id, m.part_no));

        if let Some(msg) = orphan {
            self.finish(true);
            return Err(StoreError::ForeignKeyViolation(msg));
        }

        self.finish(false);
        Ok(())
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        self.finish(true);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.finish(true);
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}
