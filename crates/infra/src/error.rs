//! Error returned by every inventory operation.

use thiserror::Error;

use stockledger_core::{DomainError, PartNo};

use crate::store::StoreError;

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Classification of an [`InventoryError`], stable across message changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidMovementType,
    InvalidQuantity,
    InvalidPartNumber,
    UnknownPart,
    DuplicateKey,
    NotFound,
    StoreFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidMovementType => "invalid_movement_type",
            ErrorKind::InvalidQuantity => "invalid_quantity",
            ErrorKind::InvalidPartNumber => "invalid_part_number",
            ErrorKind::UnknownPart => "unknown_part",
            ErrorKind::DuplicateKey => "duplicate_key",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StoreFailure => "store_failure",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid movement type: {0:?}")]
    InvalidMovementType(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid part number: {0}")]
    InvalidPartNumber(String),

    /// A movement referenced a part that does not exist.
    #[error("unknown part {0}")]
    UnknownPart(PartNo),

    #[error("part {0} already exists")]
    DuplicateKey(PartNo),

    #[error("part {0} not found")]
    NotFound(PartNo),

    /// The unit of work was rolled back because the store failed.
    #[error("store failure: {0}")]
    StoreFailure(#[source] StoreError),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::InvalidMovementType(_) => ErrorKind::InvalidMovementType,
            InventoryError::InvalidQuantity(_) => ErrorKind::InvalidQuantity,
            InventoryError::InvalidPartNumber(_) => ErrorKind::InvalidPartNumber,
            InventoryError::UnknownPart(_) => ErrorKind::UnknownPart,
            InventoryError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::StoreFailure(_) => ErrorKind::StoreFailure,
        }
    }
}

impl From<DomainError> for InventoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidMovementType(raw) => InventoryError::InvalidMovementType(raw),
            DomainError::InvalidQuantity(msg) => InventoryError::InvalidQuantity(msg),
            DomainError::InvalidPartNumber(msg) => InventoryError::InvalidPartNumber(msg),
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        InventoryError::StoreFailure(value)
    }
}
