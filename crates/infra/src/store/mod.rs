//! Transactional store boundary.
//!
//! The inventory components only speak [`Statement`]s and [`Query`]s through a
//! [`Transaction`]; the adapters below decide how those map onto storage.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use r#trait::{
    Column, ExecOutcome, FieldValue, Indexed, LockMode, Query, Record, Statement, StatementKind,
    StoreError, Transaction, TransactionalStore,
};

use crate::config::{StoreBackend, StoreConfig};

/// Store selected at runtime from a [`StoreConfig`].
#[derive(Debug, Clone)]
pub enum AnyStore {
    InMemory(InMemoryStore),
    Postgres(PostgresStore),
}

impl AnyStore {
    /// Open the configured backend. Postgres connects and applies the schema.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        match &config.backend {
            StoreBackend::InMemory => Ok(AnyStore::InMemory(
                InMemoryStore::new().with_lock_timeout(config.lock_timeout),
            )),
            StoreBackend::Postgres { url } => {
                let store = PostgresStore::connect(
                    url,
                    config.max_connections,
                    config.acquire_timeout,
                    config.lock_timeout,
                )?;
                store.migrate()?;
                Ok(AnyStore::Postgres(store))
            }
        }
    }
}

impl TransactionalStore for AnyStore {
    type Tx = AnyTransaction;

    fn begin(&self) -> Result<AnyTransaction, StoreError> {
        match self {
            AnyStore::InMemory(store) => store.begin().map(AnyTransaction::InMemory),
            AnyStore::Postgres(store) => store.begin().map(AnyTransaction::Postgres),
        }
    }
}

pub enum AnyTransaction {
    InMemory(InMemoryTransaction),
    Postgres(PostgresTransaction),
}

impl Transaction for AnyTransaction {
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, StoreError> {
        match self {
            AnyTransaction::InMemory(tx) => tx.execute(statement),
            AnyTransaction::Postgres(tx) => tx.execute(statement),
        }
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError> {
        match self {
            AnyTransaction::InMemory(tx) => tx.query(query),
            AnyTransaction::Postgres(tx) => tx.query(query),
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        match self {
            AnyTransaction::InMemory(tx) => tx.commit(),
            AnyTransaction::Postgres(tx) => tx.commit(),
        }
    }

    fn rollback(self) -> Result<(), StoreError> {
        match self {
            AnyTransaction::InMemory(tx) => tx.rollback(),
            AnyTransaction::Postgres(tx) => tx.rollback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_opens_without_io() {
        let store = AnyStore::open(&StoreConfig::in_memory()).unwrap();
        assert!(matches!(store, AnyStore::InMemory(_)));

        let mut tx = store.begin().unwrap();
        assert!(tx.query(&Query::AllParts).unwrap().is_empty());
        tx.commit().unwrap();
    }
}
