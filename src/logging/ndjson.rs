use crate::events::{AuditEvent, EventId};
use crate::hooks::AuditObserver;
use anyhow::Result;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub fn mirror_event(path: &Path, id: &EventId, ev: &AuditEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let line = json!({
        "id": id,
        "event": ev.event_type,
        "start": ev.start_date.to_rfc3339(),
        "end": ev.end_date.map(|d| d.to_rfc3339()),
        "duration_ms": ev.duration_ms
    });
    writeln!(f, "{}", line)?;
    Ok(())
}

pub struct NdjsonMirror {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NdjsonMirror {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl AuditObserver for NdjsonMirror {
    fn on_event_saved(&self, id: &EventId, event: &AuditEvent) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = mirror_event(&self.path, id, event) {
            warn!(path = %self.path.display(), error = %err, "ndjson mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_line_per_saved_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs").join("audit.ndjson");
        let mirror = NdjsonMirror::new(path.clone());
        let ev = AuditEvent::new("login");
        mirror.on_event_saved(&EventId::Integer(1), &ev);
        mirror.on_event_saved(&EventId::Integer(1), &ev);

        let body = std::fs::read_to_string(&path).unwrap();
        let lines = body.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["event"], "login");
    }
}
