use auditrow::AuditError;
use auditrow::events::store::{AuditDataProvider, SqlDataProvider};
use auditrow::events::{AuditEvent, EventId};
use auditrow::hooks::AuditObserver;
use auditrow::mapping::options::SqlProviderOptions;
use auditrow::scope::policy::CreationPolicy;
use auditrow::scope::{Auditor, ScopeOptions, ScopeState};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};

#[derive(Default)]
struct Recorder {
    created: Mutex<Vec<String>>,
    saved: Mutex<Vec<EventId>>,
}

impl AuditObserver for Recorder {
    fn on_scope_created(&self, event: &AuditEvent) {
        self.created.lock().unwrap().push(event.event_type.clone());
    }

    fn on_event_saving(&self, event: &mut AuditEvent) {
        event.comments.push("stamped".to_string());
    }

    fn on_event_saved(&self, id: &EventId, _event: &AuditEvent) {
        self.saved.lock().unwrap().push(id.clone());
    }
}

impl Recorder {
    fn saved(&self) -> Vec<EventId> {
        self.saved.lock().unwrap().clone()
    }
}

struct Harness {
    _tmp: TempDir,
    provider: Arc<SqlDataProvider>,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("audit.db");
        let provider = Arc::new(SqlDataProvider::new(
            SqlProviderOptions::builder()
                .connection_string(path.to_str().unwrap())
                .id_column_name("EventId")
                .json_column_name("Data")
                .last_updated_column_name("LastUpdatedDate")
                .custom_column("Field", |ev| {
                    let value = ev.custom_field("field").cloned().unwrap_or_default();
                    if value == json!("explode") {
                        anyhow::bail!("refusing to store explode");
                    }
                    Ok(value)
                })
                .build(),
        ));
        provider.ensure_table(None).unwrap();
        Self {
            _tmp: tmp,
            provider,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn auditor(&self, policy: CreationPolicy) -> Auditor {
        Auditor::new(self.provider.clone())
            .with_creation_policy(policy)
            .with_observer(self.recorder.clone())
    }

    fn column(&self, id: &EventId) -> Value {
        self.provider.get_row(id).unwrap().unwrap().columns["Field"].clone()
    }
}

#[test]
fn replace_on_end_materializes_start_then_end_values() {
    let h = Harness::new();
    let auditor = h.auditor(CreationPolicy::InsertOnStartReplaceOnEnd);

    let mut scope = auditor
        .create_scope("deploy", json!({"field": "initial"}))
        .unwrap();
    let id = scope.event_id().cloned().unwrap();
    assert_eq!(h.column(&id), json!("initial"));

    scope.set_custom_field("field", "final").unwrap();
    assert_eq!(scope.end().unwrap(), Some(id.clone()));

    assert_eq!(h.column(&id), json!("final"));
    assert_eq!(h.recorder.saved(), vec![id.clone(), id.clone()]);
    assert_eq!(*h.recorder.created.lock().unwrap(), vec!["deploy".to_string()]);

    let stored = h.provider.get_event(&id).unwrap().unwrap();
    assert_eq!(stored.comments, vec!["stamped", "stamped"]);
}

#[test]
fn insert_on_start_writes_once() {
    let h = Harness::new();
    let scope = h
        .auditor(CreationPolicy::InsertOnStart)
        .create_scope("login", Value::Null)
        .unwrap();
    assert!(matches!(scope.state(), ScopeState::Started { id: Some(_) }));
    scope.end().unwrap();
    assert_eq!(h.recorder.saved().len(), 1);
}

#[test]
fn insert_on_start_insert_on_end_writes_two_rows() {
    let h = Harness::new();
    let scope = h
        .auditor(CreationPolicy::InsertOnStartInsertOnEnd)
        .create_scope("batch", Value::Null)
        .unwrap();
    let last = scope.end().unwrap().unwrap();

    let saved = h.recorder.saved();
    assert_eq!(saved.len(), 2);
    assert_ne!(saved[0], saved[1]);
    assert_eq!(saved[1], last);
    assert!(h.provider.get_event(&saved[0]).unwrap().unwrap().end_date.is_none());
    assert!(h.provider.get_event(&saved[1]).unwrap().unwrap().end_date.is_some());
}

#[test]
fn manual_policy_writes_only_on_save() {
    let h = Harness::new();
    let mut scope = h
        .auditor(CreationPolicy::Manual)
        .create_scope("manual", json!({"field": "a"}))
        .unwrap();
    assert_eq!(scope.event_id(), None);

    let id = scope.save().unwrap().unwrap();
    scope.set_custom_field("field", "b").unwrap();
    assert_eq!(scope.save().unwrap(), Some(id.clone()));
    assert_eq!(scope.end().unwrap(), Some(id.clone()));

    assert_eq!(h.recorder.saved(), vec![id.clone(), id.clone()]);
    assert_eq!(h.column(&id), json!("b"));
}

#[test]
fn discarded_scope_writes_nothing() {
    let h = Harness::new();
    let scope = h
        .auditor(CreationPolicy::InsertOnEnd)
        .create_scope("discarded", Value::Null)
        .unwrap();
    scope.discard();
    assert!(h.recorder.saved().is_empty());
}

#[test]
fn dropped_scope_is_ended() {
    let h = Harness::new();
    {
        let mut scope = h
            .auditor(CreationPolicy::InsertOnEnd)
            .create_scope("dropped", Value::Null)
            .unwrap();
        scope.comment("left scope without end").unwrap();
    }
    let saved = h.recorder.saved();
    assert_eq!(saved.len(), 1);
    let stored = h.provider.get_event(&saved[0]).unwrap().unwrap();
    assert!(stored.end_date.is_some());
    assert!(stored.duration_ms.is_some());
}

#[test]
fn failed_insert_on_start_fails_creation_without_notifications() {
    let h = Harness::new();
    let err = h
        .auditor(CreationPolicy::InsertOnStartReplaceOnEnd)
        .create_scope("broken", json!({"field": "explode"}))
        .err()
        .unwrap();
    assert!(matches!(err, AuditError::Mapping { ref column, .. } if column == "Field"));
    assert!(h.recorder.saved().is_empty());
}

#[test]
fn failed_replace_keeps_inserted_row() {
    let h = Harness::new();
    let mut scope = h
        .auditor(CreationPolicy::InsertOnStartReplaceOnEnd)
        .create_scope("partial", json!({"field": "initial"}))
        .unwrap();
    let id = scope.event_id().cloned().unwrap();
    scope.set_custom_field("field", "explode").unwrap();

    let err = scope.end().unwrap_err();
    assert!(matches!(err, AuditError::Mapping { .. }));
    assert_eq!(h.column(&id), json!("initial"));
    let stored = h.provider.get_event(&id).unwrap().unwrap();
    assert_eq!(stored.custom_field("field"), Some(&json!("initial")));
    assert_eq!(h.recorder.saved(), vec![id]);
}

#[test]
fn scope_options_override_auditor_defaults() {
    let h = Harness::new();
    let other = Harness::new();
    let auditor = h.auditor(CreationPolicy::Manual);
    let scope = auditor
        .create_scope_with(
            ScopeOptions::new("routed")
                .creation_policy(CreationPolicy::InsertOnStart)
                .provider(other.provider.clone()),
        )
        .unwrap();
    let id = scope.event_id().cloned().unwrap();
    scope.end().unwrap();

    assert!(other.provider.get_event(&id).unwrap().is_some());
    assert_eq!(h.recorder.saved(), vec![id]);
}

#[test]
fn concurrent_scopes_are_independent() {
    let h = Harness::new();
    let auditor = h.auditor(CreationPolicy::InsertOnStartReplaceOnEnd);
    std::thread::scope(|s| {
        for i in 0..4 {
            let auditor = auditor.clone();
            s.spawn(move || {
                let mut scope = auditor
                    .create_scope("parallel", json!({"field": i}))
                    .unwrap();
                scope.set_custom_field("field", i * 10).unwrap();
                scope.end().unwrap();
            });
        }
    });

    let saved = h.recorder.saved();
    assert_eq!(saved.len(), 8);
    let mut distinct = saved.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 4);
    for id in distinct {
        let field = h.column(&id);
        assert_eq!(field.as_i64().unwrap() % 10, 0);
    }
}

#[test]
fn replace_on_end_guards_against_inserted_snapshot() {
    let tmp = tempdir().unwrap();
    let provider = Arc::new(SqlDataProvider::new(
        SqlProviderOptions::builder()
            .connection_string(tmp.path().join("audit.db").to_str().unwrap())
            .id_column_name("EventId")
            .json_column_name("Data")
            .custom_column_when(
                "Field",
                |ev| Ok(ev.custom_field("field").cloned().unwrap_or_default()),
                |ev| Ok(ev.custom_field("field") == Some(&json!("initial"))),
            )
            .build(),
    ));
    provider.ensure_table(None).unwrap();
    let auditor = Auditor::new(provider.clone())
        .with_creation_policy(CreationPolicy::InsertOnStartReplaceOnEnd);

    let mut scope = auditor
        .create_scope("deploy", json!({"field": "initial"}))
        .unwrap();
    let id = scope.event_id().cloned().unwrap();
    scope.set_custom_field("field", "final").unwrap();
    scope.end().unwrap();

    // the guard still sees "initial", so the value from the live event lands
    let row = provider.get_row(&id).unwrap().unwrap();
    assert_eq!(row.columns["Field"], json!("final"));
    assert_eq!(row.json["field"], json!("final"));
}
