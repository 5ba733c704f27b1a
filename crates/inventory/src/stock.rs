//! Ledger replay: the stock a part's movement history implies.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, PartNo};

use crate::movement::Movement;

/// Recompute stock from a part's movements.
///
/// Movements are applied in ascending id order regardless of the order they
/// are passed in, so the newest-first history listing can be fed directly.
/// An empty history replays to zero.
pub fn replay<'a, I>(movements: I) -> DomainResult<i64>
where
    I: IntoIterator<Item = &'a Movement>,
{
    let mut ordered: Vec<&Movement> = movements.into_iter().collect();
    ordered.sort_by_key(|m| m.id);
    ordered
        .into_iter()
        .try_fold(0i64, |stock, movement| movement.apply_to(stock))
}

/// A part whose cached stock disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDiscrepancy {
    pub part_no: PartNo,
    pub snapshot: i64,
    pub replayed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use stockledger_core::MovementId;

    use crate::movement::{MovementType, Quantity};

    fn movement(id: i64, kind: MovementType, quantity: i64) -> Movement {
        Movement {
            id: MovementId::new(id),
            part_no: PartNo::parse("A1").unwrap(),
            kind,
            quantity: Quantity::new(quantity).unwrap(),
            comment: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn empty_history_replays_to_zero() {
        assert_eq!(replay(&Vec::<Movement>::new()).unwrap(), 0);
    }

    #[test]
    fn replay_is_order_independent_of_input() {
        let newest_first = vec![
            movement(4, MovementType::Stocktake, 7),
            movement(3, MovementType::Out, 3),
            movement(2, MovementType::In, 5),
            movement(1, MovementType::In, 10),
        ];
        assert_eq!(replay(&newest_first).unwrap(), 7);
        assert_eq!(replay(&newest_first[1..]).unwrap(), 12);
    }

    fn kind_strategy() -> impl Strategy<Value = MovementType> {
        prop_oneof![
            Just(MovementType::In),
            Just(MovementType::Out),
            Just(MovementType::Stocktake),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: folding movements one by one (as the engine does when it
        /// maintains the snapshot) always equals replaying the whole ledger.
        #[test]
        fn incremental_snapshot_matches_replay(
            steps in prop::collection::vec((kind_strategy(), 0i64..1_000_000i64), 0..50)
        ) {
            let mut snapshot = 0i64;
            let mut ledger = Vec::new();

            for (idx, (kind, qty)) in steps.into_iter().enumerate() {
                let m = movement(idx as i64 + 1, kind, qty);
                snapshot = m.apply_to(snapshot).unwrap();
                ledger.push(m);
            }

            ledger.reverse();
            prop_assert_eq!(replay(&ledger).unwrap(), snapshot);
        }
    }
}
