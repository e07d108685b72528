#![cfg(feature = "fjall")]

use blockidx_storage::fjall::FjallStore;
use blockidx_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_roundtrip_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = FjallStore::open(dir.path()).expect("open fjall");
        store
            .put(Column::TxHash, &[0xab; 32], &7u32.to_le_bytes())
            .expect("put");

        let mut batch = WriteBatch::new();
        batch.put(Column::PubkeyAddress, [1u8; 20], 1u32.to_le_bytes());
        batch.put(Column::PubkeyAddress, [2u8; 20], 2u32.to_le_bytes());
        batch.put(Column::Meta, b"scratch", b"x");
        batch.delete(Column::Meta, b"scratch");
        store.write_batch(&batch).expect("batch commit");
        store.persist().expect("persist");
    }

    let store = FjallStore::open(dir.path()).expect("reopen fjall");
    assert_eq!(
        store.get(Column::TxHash, &[0xab; 32]).expect("get"),
        Some(7u32.to_le_bytes().to_vec())
    );
    let entries = store
        .scan_prefix(Column::PubkeyAddress, &[])
        .expect("scan");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, vec![1u8; 20]);
    assert!(store.get(Column::Meta, b"scratch").expect("get").is_none());
}
