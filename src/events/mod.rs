pub mod connection;
pub mod schema;
pub mod store;

use crate::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const RESERVED_FIELDS: [&str; 6] = [
    "event_type",
    "start_date",
    "end_date",
    "duration_ms",
    "environment",
    "comments",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Integer(i64),
    Text(String),
}

impl EventId {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EventId::Integer),
            Value::String(s) if !s.is_empty() => Some(EventId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Integer(v) => write!(f, "{v}"),
            EventId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        EventId::Integer(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        EventId::Text(value.to_string())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        EventId::Text(value)
    }
}

impl ToSql for EventId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            EventId::Integer(v) => v.to_sql(),
            EventId::Text(s) => s.to_sql(),
        }
    }
}

impl FromSql for EventId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(v) => Ok(EventId::Integer(v)),
            ValueRef::Text(_) => String::column_result(value).map(EventId::Text),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventEnvironment {
    pub user_name: Option<String>,
    pub machine_name: Option<String>,
    pub process_id: u32,
}

impl EventEnvironment {
    pub fn capture() -> Self {
        let var = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| std::env::var(k).ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            user_name: var(&["USER", "USERNAME"]),
            machine_name: var(&["HOSTNAME", "COMPUTERNAME"]),
            process_id: std::process::id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub environment: EventEnvironment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    #[serde(flatten)]
    pub custom_fields: BTreeMap<String, Value>,
}

impl AuditEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            start_date: Utc::now(),
            end_date: None,
            duration_ms: None,
            environment: EventEnvironment::capture(),
            comments: Vec::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    pub fn set_custom_field<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        if RESERVED_FIELDS.contains(&name) {
            return Err(AuditError::ReservedField(name.to_string()));
        }
        let value = serde_json::to_value(value)?;
        self.custom_fields.insert(name.to_string(), value);
        Ok(())
    }

    pub fn merge_custom_fields(&mut self, fields: Value) -> Result<()> {
        match fields {
            Value::Null => Ok(()),
            Value::Object(map) => {
                for (k, v) in map {
                    self.set_custom_field(&k, v)?;
                }
                Ok(())
            }
            other => Err(AuditError::Configuration(format!(
                "extra fields must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn custom_field(&self, name: &str) -> Option<&Value> {
        self.custom_fields.get(name)
    }

    pub fn mark_ended(&mut self, at: DateTime<Utc>) {
        self.end_date = Some(at);
        self.duration_ms = Some((at - self.start_date).num_milliseconds());
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn custom_fields_flatten_into_payload() {
        let mut ev = AuditEvent::new("login");
        ev.set_custom_field("guid", "abc").unwrap();
        ev.set_custom_field("nested", json!({"a": [1, 2, {"b": true}]}))
            .unwrap();

        let payload: Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(payload["event_type"], "login");
        assert_eq!(payload["guid"], "abc");
        assert_eq!(payload["nested"]["a"][2]["b"], true);

        let back = AuditEvent::from_json(&ev.to_json().unwrap()).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn rejects_reserved_custom_field_names() {
        let mut ev = AuditEvent::new("login");
        let err = ev.set_custom_field("event_type", "x").unwrap_err();
        assert!(matches!(err, AuditError::ReservedField(name) if name == "event_type"));
    }

    #[test]
    fn merge_requires_object() {
        let mut ev = AuditEvent::new("login");
        ev.merge_custom_fields(json!({"field": "initial"})).unwrap();
        assert_eq!(ev.custom_field("field"), Some(&json!("initial")));
        assert!(ev.merge_custom_fields(json!([1])).is_err());
    }

    #[test]
    fn event_id_from_json_values() {
        assert_eq!(EventId::from_json(&json!(7)), Some(EventId::Integer(7)));
        assert_eq!(EventId::from_json(&json!("k")), Some(EventId::from("k")));
        assert_eq!(EventId::from_json(&json!("")), None);
        assert_eq!(EventId::from_json(&json!(1.5)), None);
    }
}
