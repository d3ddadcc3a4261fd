//! End-to-end integrity tests over the library API and the file backend.

use serde_json::json;
use std::fs;
use std::sync::Arc;
use sentinelchain::blockchain::{verify_chain, verify_report, Blockchain, Payload, ViolationKind};
use sentinelchain::persistence::{JsonFilePersistence, PersistedChain, Persistence};
use tempfile::TempDir;

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_append_dedup_and_tamper() {
    let mut chain = Blockchain::new().unwrap();

    assert!(chain.add_block(payload(json!({"id": "t1", "ip": "1.2.3.4"}))).unwrap());
    assert_eq!(chain.len(), 2);

    assert!(!chain.add_block(payload(json!({"id": "t1", "ip": "1.2.3.4"}))).unwrap());
    assert_eq!(chain.len(), 2);

    // Key order does not make a payload new.
    assert!(!chain.add_block(payload(json!({"ip": "1.2.3.4", "id": "t1"}))).unwrap());

    let mut records = chain.to_records();
    assert_eq!(verify_report(&records), (true, "Blockchain is valid!".to_string()));

    records[1].data_hash = "f".repeat(64);
    assert_eq!(
        verify_report(&records),
        (false, "Data tampering detected in block 1".to_string())
    );
}

#[test]
fn test_links_follow_previous_hash() {
    let mut chain = Blockchain::new().unwrap();
    for i in 0..5 {
        chain.add_block(payload(json!({"id": format!("t{}", i)}))).unwrap();
    }

    let records = chain.to_records();
    assert_eq!(records[0].previous_hash, "0");
    for pair in records.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }
    assert!(verify_chain(&records).is_ok());
}

#[test]
fn test_json_file_round_trip_and_tamper() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blockchain.json");

    let store = Arc::new(JsonFilePersistence::new(&path));
    let mut chain = Blockchain::new_with_persistence(store.clone()).unwrap();
    chain.add_block(payload(json!({"id": "t1", "ip": "1.2.3.4"}))).unwrap();
    chain.add_block(payload(json!({"id": "t2", "ip": "5.6.7.8"}))).unwrap();
    let written = chain.to_records();
    drop(chain);

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["version"], "1.0");
    assert_eq!(raw["chain"].as_array().unwrap().len(), 3);

    let reloaded = Blockchain::new_with_persistence(Arc::new(JsonFilePersistence::new(&path))).unwrap();
    assert_eq!(reloaded.to_records(), written);
    assert!(reloaded.contains_data_hash(&written[2].data_hash));

    // Edit block 1 on disk and fix up its data_hash; the stale link is caught.
    let mut doc: PersistedChain = store.load().unwrap().unwrap();
    doc.chain[1].data.insert("ip".to_string(), json!("9.9.9.9"));
    doc.chain[1].data_hash = sentinelchain::blockchain::Block::calculate_data_hash(&doc.chain[1].data).unwrap();
    store.save(&doc).unwrap();

    let err = verify_chain(&reloaded.stored_records().unwrap()).unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.kind, ViolationKind::InvalidHash);
    assert_eq!(err.to_string(), "Invalid hash at block 1");
}
