use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId, PartNo};

/// Kind of stock-changing event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Receipt: adds the quantity to current stock.
    In,
    /// Issue: subtracts the quantity (stock may go negative).
    Out,
    /// Stock-take correction: the quantity becomes the new stock.
    Stocktake,
}

impl MovementType {
    /// Single-letter code persisted in the ledger (`i`, `o`, `s`).
    pub fn code(self) -> &'static str {
        match self {
            MovementType::In => "i",
            MovementType::Out => "o",
            MovementType::Stocktake => "s",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(MovementType::In),
            "o" => Some(MovementType::Out),
            "s" => Some(MovementType::Stocktake),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Stocktake => "STOCKTAKE",
        }
    }

    /// Compute the stock that results from applying this movement to `current`.
    ///
    /// OUT is allowed to take stock below zero. Overflow is reported as an
    /// invalid quantity instead of wrapping.
    pub fn apply(self, current: i64, quantity: Quantity) -> DomainResult<i64> {
        let q = quantity.value();
        let next = match self {
            MovementType::In => current.checked_add(q),
            MovementType::Out => current.checked_sub(q),
            MovementType::Stocktake => Some(q),
        };
        next.ok_or_else(|| {
            DomainError::invalid_quantity(format!(
                "{} {q} on stock {current} overflows",
                self.as_str()
            ))
        })
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    /// Accepts `IN`/`OUT`/`STOCKTAKE` in any case, plus the ledger codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(kind) = MovementType::from_code(trimmed) {
            return Ok(kind);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            "STOCKTAKE" => Ok(MovementType::Stocktake),
            _ => Err(DomainError::invalid_movement_type(s)),
        }
    }
}

/// Non-negative movement quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn new(value: i64) -> DomainResult<Self> {
        if value < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "quantity must be non-negative, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| DomainError::invalid_quantity(format!("{s:?} is not an integer")))?;
        Self::new(value)
    }
}

/// Untrusted quantity as supplied by a caller.
///
/// Callers may send numbers or text; validation happens in [`QuantityInput::resolve`]
/// so the error is classified rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantityInput {
    Integer(i64),
    Fractional(f64),
    Text(String),
}

impl QuantityInput {
    pub fn resolve(&self) -> DomainResult<Quantity> {
        match self {
            QuantityInput::Integer(v) => Quantity::new(*v),
            QuantityInput::Fractional(v) => {
                if v.is_finite() && v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    Quantity::new(*v as i64)
                } else {
                    Err(DomainError::invalid_quantity(format!("{v} is not a whole number")))
                }
            }
            QuantityInput::Text(s) => s.parse(),
        }
    }
}

impl From<i64> for QuantityInput {
    fn from(value: i64) -> Self {
        QuantityInput::Integer(value)
    }
}

impl From<f64> for QuantityInput {
    fn from(value: f64) -> Self {
        QuantityInput::Fractional(value)
    }
}

impl From<&str> for QuantityInput {
    fn from(value: &str) -> Self {
        QuantityInput::Text(value.to_string())
    }
}

impl From<String> for QuantityInput {
    fn from(value: String) -> Self {
        QuantityInput::Text(value)
    }
}

impl From<Quantity> for QuantityInput {
    fn from(value: Quantity) -> Self {
        QuantityInput::Integer(value.value())
    }
}

/// A recorded ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub part_no: PartNo,
    pub kind: MovementType,
    pub quantity: Quantity,
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Movement {
    /// Stock after applying this entry to `current`.
    pub fn apply_to(&self, current: i64) -> DomainResult<i64> {
        self.kind.apply(current, self.quantity)
    }
}

/// A movement ready to be appended (not yet assigned an id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub part_no: PartNo,
    pub kind: MovementType,
    pub quantity: Quantity,
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl NewMovement {
    pub fn new(
        part_no: PartNo,
        kind: MovementType,
        quantity: Quantity,
        comment: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            part_no,
            kind,
            quantity,
            comment: normalize_comment(comment),
            recorded_at,
        }
    }
}

/// Caller-facing request to move stock, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub part_no: String,
    pub kind: String,
    pub quantity: QuantityInput,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Output of [`MovementRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMovement {
    pub part_no: PartNo,
    pub kind: MovementType,
    pub quantity: Quantity,
    pub comment: Option<String>,
}

impl MovementRequest {
    pub fn new(
        part_no: impl Into<String>,
        kind: impl Into<String>,
        quantity: impl Into<QuantityInput>,
    ) -> Self {
        Self {
            part_no: part_no.into(),
            kind: kind.into(),
            quantity: quantity.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Checks type, then quantity, then part-number shape, stopping at the first failure.
    pub fn validate(&self) -> DomainResult<ValidatedMovement> {
        let kind: MovementType = self.kind.parse()?;
        let quantity = self.quantity.resolve()?;
        let part_no = PartNo::parse(&self.part_no)?;
        Ok(ValidatedMovement {
            part_no,
            kind,
            quantity,
            comment: normalize_comment(self.comment.clone()),
        })
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.filter(|c| !c.trim().is_empty())
}
