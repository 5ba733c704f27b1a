use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, PartNo};

use crate::movement::Quantity;

/// A part together with its current stock snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_no: PartNo,
    pub name: String,
    pub description: String,
    /// Cached net effect of the part's ledger.
    pub stock: i64,
}

/// Registration data for a new part.
///
/// The initial stock is recorded as an IN movement, so it follows the same
/// rule as any IN quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPart {
    pub part_no: PartNo,
    pub name: String,
    pub description: String,
    pub initial_stock: Quantity,
}

impl NewPart {
    pub fn new(
        part_no: impl AsRef<str>,
        name: impl Into<String>,
        description: impl Into<String>,
        initial_stock: i64,
    ) -> DomainResult<Self> {
        Ok(Self {
            part_no: PartNo::parse(part_no)?,
            name: name.into(),
            description: description.into(),
            initial_stock: Quantity::new(initial_stock)?,
        })
    }

    /// Snapshot row written alongside the opening movement.
    pub fn to_part(&self) -> Part {
        Part {
            part_no: self.part_no.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            stock: self.initial_stock.value(),
        }
    }
}

/// Rename and/or metadata edit of an existing part. Never touches stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUpdate {
    /// Part number after the edit; equal to the current one for metadata-only edits.
    pub part_no: PartNo,
    pub name: String,
    pub description: String,
}

impl PartUpdate {
    pub fn new(
        part_no: impl AsRef<str>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> DomainResult<Self> {
        Ok(Self {
            part_no: PartNo::parse(part_no)?,
            name: name.into(),
            description: description.into(),
        })
    }

    pub fn renames(&self, current: &PartNo) -> bool {
        &self.part_no != current
    }
}
