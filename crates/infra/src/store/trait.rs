use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_core::PartNo;
use stockledger_inventory::{Movement, NewMovement, Part, PartUpdate};

/// Row lock requested by a part read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read.
    Shared,
    /// Hold a write lock on the row until the unit of work ends.
    ForUpdate,
}

/// A write against the store, with typed parameters.
///
/// Optional values (the movement comment) stay `Option`s; each adapter decides
/// how that maps onto its physical statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Insert a part row, stock included.
    InsertPart(Part),
    /// Rename and/or edit metadata of `part_no`. Stock is preserved.
    UpdatePart { part_no: PartNo, update: PartUpdate },
    SetStock { part_no: PartNo, stock: i64 },
    DeletePart { part_no: PartNo },
    /// Append a movement; reports the assigned id as `last_insert_id`.
    InsertMovement(NewMovement),
    RekeyMovements { from: PartNo, to: PartNo },
    DeleteMovements { part_no: PartNo },
}

/// Discriminant of a [`Statement`], used for logging and fault injection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatementKind {
    InsertPart,
    UpdatePart,
    SetStock,
    DeletePart,
    InsertMovement,
    RekeyMovements,
    DeleteMovements,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::InsertPart(_) => StatementKind::InsertPart,
            Statement::UpdatePart { .. } => StatementKind::UpdatePart,
            Statement::SetStock { .. } => StatementKind::SetStock,
            Statement::DeletePart { .. } => StatementKind::DeletePart,
            Statement::InsertMovement(_) => StatementKind::InsertMovement,
            Statement::RekeyMovements { .. } => StatementKind::RekeyMovements,
            Statement::DeleteMovements { .. } => StatementKind::DeleteMovements,
        }
    }
}

/// A read against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every part, ordered by part number.
    AllParts,
    Part { part_no: PartNo, lock: LockMode },
    /// Movements of one part, newest first (ties broken by id, newest first).
    MovementsFor { part_no: PartNo },
}

/// Result of a [`Statement`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

impl ExecOutcome {
    pub fn rows(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

/// A row returned by a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Part(Part),
    Movement(Movement),
}

/// Addressable column of a [`Record`], for indexed projections.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    PartNo,
    Name,
    Description,
    Stock,
    MovementId,
    MovementType,
    Quantity,
    Comment,
    RecordedAt,
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Entry of an indexed projection: the whole record, or one column of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indexed {
    Record(Record),
    Value(FieldValue),
}

impl Record {
    /// Value of `column`, or `None` when the column does not exist on this record type.
    pub fn field(&self, column: Column) -> Option<FieldValue> {
        match (self, column) {
            (Record::Part(p), Column::PartNo) => Some(FieldValue::Text(p.part_no.to_string())),
            (Record::Part(p), Column::Name) => Some(FieldValue::Text(p.name.clone())),
            (Record::Part(p), Column::Description) => Some(FieldValue::Text(p.description.clone())),
            (Record::Part(p), Column::Stock) => Some(FieldValue::Integer(p.stock)),
            (Record::Movement(m), Column::PartNo) => Some(FieldValue::Text(m.part_no.to_string())),
            (Record::Movement(m), Column::MovementId) => Some(FieldValue::Integer(m.id.value())),
            (Record::Movement(m), Column::MovementType) => {
                Some(FieldValue::Text(m.kind.as_str().to_string()))
            }
            (Record::Movement(m), Column::Quantity) => Some(FieldValue::Integer(m.quantity.value())),
            (Record::Movement(m), Column::Comment) => Some(
                m.comment
                    .clone()
                    .map(FieldValue::Text)
                    .unwrap_or(FieldValue::Null),
            ),
            (Record::Movement(m), Column::RecordedAt) => Some(FieldValue::Timestamp(m.recorded_at)),
            _ => None,
        }
    }

    pub fn into_part(self) -> Result<Part, StoreError> {
        match self {
            Record::Part(p) => Ok(p),
            Record::Movement(m) => Err(StoreError::Backend(format!(
                "expected a part record, got movement {}",
                m.id
            ))),
        }
    }

    pub fn into_movement(self) -> Result<Movement, StoreError> {
        match self {
            Record::Movement(m) => Ok(m),
            Record::Part(p) => Err(StoreError::Backend(format!(
                "expected a movement record, got part {}",
                p.part_no
            ))),
        }
    }
}

/// Store operation error.
///
/// These are **infrastructure errors**. Constraint violations are reported by
/// kind so callers can classify them (e.g. a unique violation on a part insert
/// is a duplicate part number).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// Failure injected by a test double.
    #[error("injected failure on {0:?}")]
    Injected(StatementKind),
}

/// One open unit of work.
///
/// All statements and queries issued through a transaction become visible to
/// other units together on `commit`, or not at all. Dropping an open
/// transaction rolls it back.
pub trait Transaction {
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, StoreError>;

    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Run `query` and index the rows by `key`.
    ///
    /// With `value = None` each entry holds the full record; otherwise only the
    /// named column. Later rows win on duplicate keys.
    fn query_indexed(
        &mut self,
        query: &Query,
        key: Column,
        value: Option<Column>,
    ) -> Result<BTreeMap<FieldValue, Indexed>, StoreError> {
        let mut indexed = BTreeMap::new();
        for record in self.query(query)? {
            let k = record
                .field(key)
                .ok_or_else(|| StoreError::Backend(format!("record has no column {key:?}")))?;
            let entry = match value {
                Some(column) => Indexed::Value(record.field(column).ok_or_else(|| {
                    StoreError::Backend(format!("record has no column {column:?}"))
                })?),
                None => Indexed::Record(record),
            };
            indexed.insert(k, entry);
        }
        Ok(indexed)
    }

    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Transactional store boundary consumed by the inventory core.
///
/// Implementations must:
/// - make each transaction all-or-nothing
/// - honor [`LockMode::ForUpdate`] so that read-modify-write cycles on one part
///   serialize (the second reader observes the first writer's commit)
/// - surface unique and foreign-key violations as the matching [`StoreError`]
/// - bound lock waits instead of blocking forever
pub trait TransactionalStore: Send + Sync {
    type Tx: Transaction;

    fn begin(&self) -> Result<Self::Tx, StoreError>;
}

impl<S> TransactionalStore for Arc<S>
where
    S: TransactionalStore + ?Sized,
{
    type Tx = S::Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }
}
