//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic input failures that can be detected
/// before any store is touched. Storage concerns belong to the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Movement type is not one of IN, OUT or STOCKTAKE.
    #[error("invalid movement type: {0:?}")]
    InvalidMovementType(String),

    /// Quantity is negative, non-numeric or out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Part number failed validation (empty, too long).
    #[error("invalid part number: {0}")]
    InvalidPartNumber(String),
}

impl DomainError {
    pub fn invalid_movement_type(raw: impl Into<String>) -> Self {
        Self::InvalidMovementType(raw.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_part_number(msg: impl Into<String>) -> Self {
        Self::InvalidPartNumber(msg.into())
    }
}
