use pretty_assertions::assert_eq;
use tether_types::*;

fn entry(op: SyncOperation, payload: serde_json::Value) -> QueueEntry {
    QueueEntry::new(RecordId::new_provisional(), "project", op, payload)
}

// ── Identifiers ─────────────────────────────────────────────────

#[test]
fn new_provisional_carries_prefix() {
    let id = RecordId::new_provisional();
    assert!(id.is_provisional());
    assert!(id.as_str().starts_with(PROVISIONAL_PREFIX));
}

#[test]
fn provisional_ids_are_unique() {
    let a = RecordId::new_provisional();
    let b = RecordId::new_provisional();
    assert_ne!(a, b);
}

#[test]
fn canonical_rejects_reserved_prefix() {
    let err = RecordId::canonical("local_abc").unwrap_err();
    assert_eq!(err, IdError::ReservedPrefix("local_abc".into()));
}

#[test]
fn canonical_rejects_empty() {
    assert_eq!(RecordId::canonical("").unwrap_err(), IdError::Empty);
}

#[test]
fn parse_classifies_by_prefix() {
    assert!(RecordId::parse("local_123").is_provisional());
    assert!(RecordId::parse("proj-9f2c").is_canonical());
}

#[test]
fn id_serializes_as_plain_string() {
    let id = RecordId::canonical("abc123").unwrap();
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");

    let back: RecordId = serde_json::from_str("\"local_xyz\"").unwrap();
    assert_eq!(back, RecordId::Provisional("local_xyz".into()));
}

// ── Records ─────────────────────────────────────────────────────

#[test]
fn provisional_record_is_pending() {
    let record = Record::provisional("project", serde_json::json!({"name": "Demo"}));
    assert!(record.pending_sync);
    assert!(record.is_provisional());
    assert_eq!(record.state(), RecordState::Provisional);
    assert_eq!(record.get_str("/name"), Some("Demo"));
    assert_eq!(record.created_at, record.updated_at);
}

#[test]
fn canonical_record_is_reconciled() {
    let record = Record::from_canonical(
        "project",
        CanonicalRecord {
            id: "srv-1".into(),
            attributes: serde_json::json!({"name": "Demo"}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        },
    );
    assert!(!record.pending_sync);
    assert_eq!(record.id, RecordId::Canonical("srv-1".into()));
    assert_eq!(record.state(), RecordState::Reconciled);
}

#[test]
fn error_state_means_failed() {
    let mut record = Record::provisional("project", serde_json::json!({}));
    record.pending_sync = false;
    record.error_state = Some(ErrorState::new(ErrorKind::Rejected, "name required"));
    assert_eq!(record.state(), RecordState::Failed);
}

#[test]
fn canonical_record_defaults_missing_fields() {
    let parsed: CanonicalRecord = serde_json::from_str(r#"{"id": "srv-2"}"#).unwrap();
    assert_eq!(parsed.id, "srv-2");
    assert!(parsed.attributes.is_null());
}

#[test]
fn merge_patch_overwrites_and_removes() {
    let mut target = serde_json::json!({"name": "a", "desc": "x", "cfg": {"k": 1, "j": 2}});
    merge_patch(
        &mut target,
        &serde_json::json!({"name": "b", "desc": null, "cfg": {"j": 3}}),
    );
    assert_eq!(target, serde_json::json!({"name": "b", "cfg": {"k": 1, "j": 3}}));
}

// ── Operations & coalescing ─────────────────────────────────────

#[test]
fn operation_string_roundtrip() {
    for op in [SyncOperation::Create, SyncOperation::Update, SyncOperation::Delete] {
        assert_eq!(op.as_str().parse::<SyncOperation>().unwrap(), op);
    }
    assert!("merge".parse::<SyncOperation>().is_err());
}

#[test]
fn create_then_update_stays_create_with_merged_payload() {
    let existing = entry(SyncOperation::Create, serde_json::json!({"name": "a", "desc": "x"}));
    let incoming = entry(SyncOperation::Update, serde_json::json!({"name": "b"}));
    assert_eq!(
        coalesce(&existing, &incoming),
        Coalesced::Replace {
            operation: SyncOperation::Create,
            payload: serde_json::json!({"name": "b", "desc": "x"}),
        }
    );
}

#[test]
fn create_then_delete_cancels_out() {
    let existing = entry(SyncOperation::Create, serde_json::json!({"name": "a"}));
    let incoming = entry(SyncOperation::Delete, serde_json::Value::Null);
    assert_eq!(coalesce(&existing, &incoming), Coalesced::Drop);
}

#[test]
fn update_then_delete_becomes_delete() {
    let existing = entry(SyncOperation::Update, serde_json::json!({"name": "a"}));
    let incoming = entry(SyncOperation::Delete, serde_json::Value::Null);
    assert_eq!(
        coalesce(&existing, &incoming),
        Coalesced::Replace {
            operation: SyncOperation::Delete,
            payload: serde_json::Value::Null,
        }
    );
}

#[test]
fn report_drained_only_when_nothing_pending() {
    assert!(SyncReport::default().is_drained());
    let offline = SyncReport::offline(2);
    assert!(offline.skipped_offline);
    assert!(!offline.is_drained());
}
