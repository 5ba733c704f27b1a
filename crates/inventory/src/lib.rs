//! Inventory domain module.
//!
//! This crate contains business rules for parts and stock movements,
//! implemented purely as deterministic domain logic (no IO, no storage).
//! Applying movements to a store atomically is the infra crate's job.

pub mod movement;
pub mod part;
pub mod stock;

pub use movement::{
    Movement, MovementRequest, MovementType, NewMovement, Quantity, QuantityInput,
    ValidatedMovement,
};
pub use part::{NewPart, Part, PartUpdate};
pub use stock::{StockDiscrepancy, replay};
