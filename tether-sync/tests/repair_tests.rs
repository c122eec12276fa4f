mod support;

use pretty_assertions::assert_eq;
use support::{Call, harness};
use tether_sync::{RepairReport, repair_orphans};
use tether_types::{QueueEntry, Record, RecordId, SyncOperation};

fn pending_canonical(id: &str, name: &str) -> Record {
    let mut record = Record::provisional("project", serde_json::json!({ "name": name }));
    record.id = RecordId::canonical(id).unwrap();
    record
}

#[tokio::test]
async fn clean_store_needs_no_repair() {
    let h = harness(true);
    h.queue_create("A");

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn orphaned_entry_rebuilds_record() {
    let h = harness(false);
    let id = RecordId::new_provisional();
    h.queue
        .enqueue(QueueEntry::new(
            id.clone(),
            "project",
            SyncOperation::Create,
            serde_json::json!({ "name": "Lost" }),
        ))
        .unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert_eq!(report.rebuilt_records, 1);

    let record = h.store.get(&id).unwrap().unwrap();
    assert!(record.pending_sync);
    assert_eq!(record.get_str("/name"), Some("Lost"));
}

#[tokio::test]
async fn orphaned_delete_entry_is_kept_as_is() {
    let h = harness(false);
    let id = RecordId::parse("srv-1");
    h.queue
        .enqueue(QueueEntry::new(
            id.clone(),
            "project",
            SyncOperation::Delete,
            serde_json::Value::Null,
        ))
        .unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert!(report.is_clean());
    assert!(h.store.get(&id).unwrap().is_none());
    assert_eq!(h.queue.len().unwrap(), 1);
}

#[tokio::test]
async fn orphaned_provisional_record_requeues_create() {
    let h = harness(false);
    let record = Record::provisional("project", serde_json::json!({ "name": "Stray" }));
    h.store.put(&record).unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert_eq!(report.requeued_creates, 1);

    let entry = h.queue.get(&record.id).unwrap().unwrap();
    assert_eq!(entry.operation, SyncOperation::Create);
    assert_eq!(entry.payload, serde_json::json!({ "name": "Stray" }));
}

#[tokio::test]
async fn orphaned_canonical_record_confirmed_on_server() {
    let h = harness(true);
    h.stub.seed("srv-7", serde_json::json!({ "name": "There" }));
    let record = pending_canonical("srv-7", "There");
    h.store.put(&record).unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert_eq!(
        report,
        RepairReport {
            confirmed: 1,
            ..RepairReport::default()
        }
    );
    assert_eq!(h.stub.calls(), vec![Call::Get("srv-7".into())]);
    assert!(!h.store.get(&record.id).unwrap().unwrap().pending_sync);
    assert!(h.queue.is_empty().unwrap());
}

#[tokio::test]
async fn orphaned_canonical_record_missing_on_server_requeues_update() {
    let h = harness(true);
    let record = pending_canonical("srv-8", "Missing");
    h.store.put(&record).unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert_eq!(report.requeued_updates, 1);
    let entry = h.queue.get(&record.id).unwrap().unwrap();
    assert_eq!(entry.operation, SyncOperation::Update);
}

#[tokio::test]
async fn offline_repair_requeues_without_asking_server() {
    let h = harness(false);
    let record = pending_canonical("srv-9", "Unknown");
    h.store.put(&record).unwrap();

    let report = repair_orphans(&h.store, &h.queue, h.stub.as_ref(), &h.monitor)
        .await
        .unwrap();
    assert_eq!(report.requeued_updates, 1);
    assert!(h.stub.calls().is_empty());
}
