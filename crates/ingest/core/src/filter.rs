//! Transaction filtering.

use crate::{FilteredRecord, TxRecord};
use std::fmt::Debug;

/// Decides whether a fetched transaction is kept, and projects it into the persisted shape.
///
/// Implementations must be pure: the same input always yields the same output.
pub trait TxFilter: Debug + Send + Sync {
    /// Returns the projected record if `tx` should be kept.
    fn filter(&self, tx: &TxRecord) -> Option<FilteredRecord>;
}

/// Keeps every transaction that transfers a nonzero amount of the native token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueTransferFilter;

impl TxFilter for ValueTransferFilter {
    fn filter(&self, tx: &TxRecord) -> Option<FilteredRecord> {
        if tx.value.is_zero() {
            return None;
        }
        Some(FilteredRecord {
            hash: tx.hash,
            data: tx.data.clone(),
            from: tx.from,
            to: tx.to,
            nonce: tx.nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes, U256};
    use rstest::rstest;

    fn tx(value: U256) -> TxRecord {
        TxRecord {
            hash: B256::repeat_byte(0x11),
            value,
            data: Bytes::from_static(b"\xa9\x05\x9c\xbb"),
            from: Address::repeat_byte(0x22),
            to: Some(Address::repeat_byte(0x33)),
            nonce: 7,
        }
    }

    #[rstest]
    #[case(U256::ZERO, false)]
    #[case(U256::from(1), true)]
    #[case(U256::MAX, true)]
    fn test_value_transfer_filter(#[case] value: U256, #[case] kept: bool) {
        assert_eq!(ValueTransferFilter.filter(&tx(value)).is_some(), kept);
    }

    #[test]
    fn test_projection_keeps_identity_fields() {
        let record = ValueTransferFilter.filter(&tx(U256::from(5))).unwrap();
        assert_eq!(record.hash, B256::repeat_byte(0x11));
        assert_eq!(record.from, Address::repeat_byte(0x22));
        assert_eq!(record.to, Some(Address::repeat_byte(0x33)));
        assert_eq!(record.data, Bytes::from_static(b"\xa9\x05\x9c\xbb"));
        assert_eq!(record.nonce, 7);
    }

    #[test]
    fn test_contract_creation_is_kept_with_empty_recipient() {
        let mut creation = tx(U256::from(1));
        creation.to = None;
        assert_eq!(ValueTransferFilter.filter(&creation).unwrap().to, None);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let input = tx(U256::from(42));
        assert_eq!(ValueTransferFilter.filter(&input), ValueTransferFilter.filter(&input));
        let zero = tx(U256::ZERO);
        assert_eq!(ValueTransferFilter.filter(&zero), ValueTransferFilter.filter(&zero));
    }
}
