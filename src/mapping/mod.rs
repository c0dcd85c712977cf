pub mod options;

use crate::error::{AuditError, Result};
use crate::events::schema::qualified_table;
use crate::events::{AuditEvent, EventId};
use options::SqlProviderOptions;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub type ValueFn = Arc<dyn Fn(&AuditEvent) -> anyhow::Result<Value> + Send + Sync>;
pub type GuardFn = Arc<dyn Fn(&AuditEvent) -> anyhow::Result<bool> + Send + Sync>;

#[derive(Clone)]
pub enum NameBuilder {
    Constant(String),
    Dynamic(Arc<dyn Fn(Option<&AuditEvent>) -> String + Send + Sync>),
}

impl NameBuilder {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&AuditEvent>) -> String + Send + Sync + 'static,
    {
        NameBuilder::Dynamic(Arc::new(f))
    }

    pub fn invoke(&self, event: Option<&AuditEvent>) -> String {
        match self {
            NameBuilder::Constant(v) => v.clone(),
            NameBuilder::Dynamic(f) => f(event),
        }
    }
}

impl From<&str> for NameBuilder {
    fn from(value: &str) -> Self {
        NameBuilder::Constant(value.to_string())
    }
}

impl From<String> for NameBuilder {
    fn from(value: String) -> Self {
        NameBuilder::Constant(value)
    }
}

impl fmt::Debug for NameBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameBuilder::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            NameBuilder::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Skip,
    Include(Value),
}

#[derive(Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub value: ValueFn,
    pub guard: Option<GuardFn>,
}

impl ColumnSpec {
    pub fn new<F>(name: &str, value: F) -> Self
    where
        F: Fn(&AuditEvent) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            value: Arc::new(value),
            guard: None,
        }
    }

    pub fn with_guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&AuditEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn evaluate(&self, event: &AuditEvent, guard_event: &AuditEvent) -> Result<ColumnValue> {
        if let Some(guard) = &self.guard {
            let include = guard(guard_event).map_err(|e| AuditError::mapping(&self.name, e))?;
            if !include {
                return Ok(ColumnValue::Skip);
            }
        }
        let value = (self.value)(event).map_err(|e| AuditError::mapping(&self.name, e))?;
        Ok(ColumnValue::Include(value))
    }
}

impl fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("name", &self.name)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub connection_string: String,
    // quoted and schema-qualified
    pub table: String,
    pub id_column: String,
    pub json_column: String,
    pub last_updated_column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedRow {
    pub location: TableLocation,
    pub id: Option<EventId>,
    pub json: String,
    pub columns: Vec<(String, SqlValue)>,
}

pub fn resolve_location(
    options: &SqlProviderOptions,
    event: Option<&AuditEvent>,
) -> Result<TableLocation> {
    let connection_string = required_name(
        options.connection_string.as_ref(),
        event,
        "connection string",
    )?;
    let table = non_empty(options.table_name.invoke(event), "table name")?;
    let schema = options
        .schema
        .as_ref()
        .map(|s| s.invoke(event).trim().to_string())
        .filter(|s| !s.is_empty());
    let id_column = required_name(options.id_column_name.as_ref(), event, "id column name")?;
    let json_column = required_name(
        options.json_column_name.as_ref(),
        event,
        "JSON column name",
    )?;
    let last_updated_column = options
        .last_updated_column_name
        .as_ref()
        .map(|b| b.invoke(event).trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(TableLocation {
        connection_string,
        table: qualified_table(schema.as_deref(), &table),
        id_column,
        json_column,
        last_updated_column,
    })
}

pub fn resolve_row(
    options: &SqlProviderOptions,
    event: &AuditEvent,
    guard_event: Option<&AuditEvent>,
) -> Result<ResolvedRow> {
    let location = resolve_location(options, Some(event))?;
    let guard_event = guard_event.unwrap_or(event);

    let id = options
        .id_value
        .as_ref()
        .map(|f| {
            let raw = f(event).map_err(|e| AuditError::mapping(&location.id_column, e))?;
            EventId::from_json(&raw).ok_or_else(|| {
                AuditError::Configuration(format!(
                    "id value for column `{}` must be an integer or non-empty string, got {raw}",
                    location.id_column
                ))
            })
        })
        .transpose()?;

    // SQLite identifiers are case-insensitive
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(location.id_column.to_ascii_lowercase());
    seen.insert(location.json_column.to_ascii_lowercase());
    if let Some(col) = &location.last_updated_column {
        seen.insert(col.to_ascii_lowercase());
    }

    let mut columns = Vec::with_capacity(options.custom_columns.len());
    for spec in &options.custom_columns {
        if !seen.insert(spec.name.to_ascii_lowercase()) {
            return Err(AuditError::Configuration(format!(
                "column `{}` is mapped more than once",
                spec.name
            )));
        }
        match spec.evaluate(event, guard_event)? {
            ColumnValue::Skip => {}
            ColumnValue::Include(value) => columns.push((spec.name.clone(), to_sql_value(&value))),
        }
    }

    Ok(ResolvedRow {
        id,
        json: event.to_json()?,
        columns,
        location,
    })
}

pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) if n.is_f64() => SqlValue::Real(f),
            // u64 above i64::MAX, kept exact
            _ => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

pub fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Value::from(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::from(b),
    }
}

fn required_name(
    builder: Option<&NameBuilder>,
    event: Option<&AuditEvent>,
    what: &str,
) -> Result<String> {
    let builder =
        builder.ok_or_else(|| AuditError::Configuration(format!("{what} is not configured")))?;
    non_empty(builder.invoke(event), what)
}

fn non_empty(value: String, what: &str) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AuditError::Configuration(format!("{what} resolved to empty")));
    }
    Ok(value)
}
