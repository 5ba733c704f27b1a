//! Infrastructure layer: store adapters, the stock ledger components and the
//! inventory facade built on them.

pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod ledger;
pub mod registry;
pub mod store;

pub use config::{ConfigError, StoreBackend, StoreConfig};
pub use engine::{AppliedMovement, StockEngine};
pub use error::{ErrorKind, InventoryError, InventoryResult};
pub use facade::InventoryFacade;
pub use ledger::MovementLedger;
pub use registry::PartRegistry;
