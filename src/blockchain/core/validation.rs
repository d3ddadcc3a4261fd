use crate::blockchain::core::chain::{Block, BlockRecord};
use std::fmt;

pub const VALID_CHAIN_MESSAGE: &str = "Blockchain is valid!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Stored `data_hash` does not match the payload.
    DataTampering,
    /// Stored `hash` does not match `(data_hash, previous_hash, timestamp)`.
    InvalidHash,
    /// `previous_hash` does not match the predecessor's `hash`.
    InvalidPreviousHash,
}

/// First inconsistency found in a serialized chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub index: usize,
    pub kind: ViolationKind,
}

impl IntegrityViolation {
    fn new(index: usize, kind: ViolationKind) -> Self {
        Self { index, kind }
    }
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ViolationKind::DataTampering => {
                write!(f, "Data tampering detected in block {}", self.index)
            }
            ViolationKind::InvalidHash => write!(f, "Invalid hash at block {}", self.index),
            ViolationKind::InvalidPreviousHash => {
                write!(f, "Invalid previous hash at block {}", self.index)
            }
        }
    }
}

impl std::error::Error for IntegrityViolation {}

/// Re-validate a serialized chain end to end.
///
/// Every block's payload digest and link digest are recomputed from its stored
/// fields, and every block's `previous_hash` is checked against its
/// predecessor. Works on records alone, so a chain reloaded from storage can be
/// checked without an in-memory `Blockchain`. Stops at the first fault.
pub fn verify_chain(records: &[BlockRecord]) -> Result<(), IntegrityViolation> {
    if records.len() < 2 {
        return Ok(());
    }

    let mut previous_link = verify_block(0, &records[0])?;
    for (index, record) in records.iter().enumerate().skip(1) {
        if record.previous_hash != previous_link {
            return Err(IntegrityViolation::new(index, ViolationKind::InvalidPreviousHash));
        }
        previous_link = verify_block(index, record)?;
    }
    Ok(())
}

/// `(is_valid, message)` form of [`verify_chain`].
pub fn verify_report(records: &[BlockRecord]) -> (bool, String) {
    match verify_chain(records) {
        Ok(()) => (true, VALID_CHAIN_MESSAGE.to_string()),
        Err(violation) => (false, violation.to_string()),
    }
}

/// Checks one block's own digests and returns its link digest.
fn verify_block(index: usize, record: &BlockRecord) -> Result<String, IntegrityViolation> {
    // An unencodable payload cannot match any stored digest.
    let data_hash = Block::calculate_data_hash(&record.data)
        .map_err(|_| IntegrityViolation::new(index, ViolationKind::DataTampering))?;
    if data_hash != record.data_hash {
        return Err(IntegrityViolation::new(index, ViolationKind::DataTampering));
    }

    let hash = Block::calculate_hash(&data_hash, &record.previous_hash, &record.timestamp)
        .map_err(|_| IntegrityViolation::new(index, ViolationKind::InvalidHash))?;
    if hash != record.hash {
        return Err(IntegrityViolation::new(index, ViolationKind::InvalidHash));
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use serde_json::json;

    fn chain_with(n: usize) -> Vec<BlockRecord> {
        let mut chain = Blockchain::new().unwrap();
        for i in 0..n {
            let data = json!({"id": format!("threat-{}", i), "ip": "10.0.0.1", "details": {"port": i}});
            chain.add_block(data.as_object().cloned().unwrap()).unwrap();
        }
        chain.to_records()
    }

    #[test]
    fn test_short_chains_are_valid() {
        assert!(verify_chain(&[]).is_ok());
        let mut genesis = chain_with(0);
        genesis[0].hash = "garbage".to_string();
        assert!(verify_chain(&genesis).is_ok());
    }

    #[test]
    fn test_untouched_chain_is_valid() {
        let records = chain_with(4);
        assert_eq!(verify_report(&records), (true, VALID_CHAIN_MESSAGE.to_string()));
    }

    #[test]
    fn test_tampered_data_hash_reports_data_tampering() {
        let mut records = chain_with(1);
        records[1].data_hash = "f".repeat(64);
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(1, ViolationKind::DataTampering));
        assert_eq!(err.to_string(), "Data tampering detected in block 1");
    }

    #[test]
    fn test_tampered_payload_reports_data_tampering() {
        let mut records = chain_with(3);
        records[2].data.insert("ip".to_string(), json!("6.6.6.6"));
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(2, ViolationKind::DataTampering));
    }

    #[test]
    fn test_tampered_genesis_hash() {
        let mut records = chain_with(2);
        records[0].hash = "0".repeat(64);
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(0, ViolationKind::InvalidHash));
        assert_eq!(err.to_string(), "Invalid hash at block 0");
    }

    #[test]
    fn test_tampered_timestamp_reports_invalid_hash() {
        let mut records = chain_with(3);
        records[1].timestamp = "1999-01-01 00:00:00".to_string();
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(1, ViolationKind::InvalidHash));
    }

    #[test]
    fn test_broken_link_reports_invalid_previous_hash() {
        let mut records = chain_with(3);
        records.swap(1, 2);
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(1, ViolationKind::InvalidPreviousHash));
        assert_eq!(err.to_string(), "Invalid previous hash at block 1");
    }

    #[test]
    fn test_rehashed_block_still_breaks_successor_link() {
        // Fully recomputing a tampered block's digests moves the fault to
        // the next block's linkage.
        let mut records = chain_with(3);
        records[1].data.insert("severity".to_string(), json!("Critical"));
        records[1].data_hash = Block::calculate_data_hash(&records[1].data).unwrap();
        records[1].hash =
            Block::calculate_hash(&records[1].data_hash, &records[1].previous_hash, &records[1].timestamp)
                .unwrap();
        let err = verify_chain(&records).unwrap_err();
        assert_eq!(err, IntegrityViolation::new(2, ViolationKind::InvalidPreviousHash));
    }

    #[test]
    fn test_any_single_field_mutation_of_non_tail_block_is_detected() {
        let pristine = chain_with(4);
        for target in 0..pristine.len() - 1 {
            let mutations: Vec<Box<dyn Fn(&mut BlockRecord)>> = vec![
                Box::new(|r: &mut BlockRecord| {
                    r.data.insert("tampered".to_string(), json!(true));
                }),
                Box::new(|r: &mut BlockRecord| r.previous_hash.push('x')),
                Box::new(|r: &mut BlockRecord| r.timestamp = "2000-01-01 00:00:00".to_string()),
                Box::new(|r: &mut BlockRecord| r.data_hash = "a".repeat(64)),
                Box::new(|r: &mut BlockRecord| r.hash = "b".repeat(64)),
            ];
            for mutate in mutations {
                let mut records = pristine.clone();
                mutate(&mut records[target]);
                let err = verify_chain(&records).unwrap_err();
                assert!(
                    err.index == target || err.index == target + 1,
                    "mutation of block {} reported at {}",
                    target,
                    err.index
                );
            }
        }
    }

    #[test]
    fn test_reports_first_fault_only() {
        let mut records = chain_with(4);
        records[3].hash = "c".repeat(64);
        records[1].data_hash = "d".repeat(64);
        let (valid, message) = verify_report(&records);
        assert!(!valid);
        assert_eq!(message, "Data tampering detected in block 1");
    }
}
