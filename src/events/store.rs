use crate::error::{AuditError, Result};
use crate::events::connection::open_connection;
use crate::events::schema::{IdColumnKind, ensure_table, quote_ident};
use crate::events::{AuditEvent, EventId};
use crate::mapping::options::SqlProviderOptions;
use crate::mapping::{TableLocation, from_sql_value, resolve_location, resolve_row};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub trait AuditDataProvider: Send + Sync {
    fn insert_event(&self, event: &AuditEvent) -> Result<EventId>;

    // guards see `guard_snapshot` when given, values always see `event`
    fn replace_event(
        &self,
        id: &EventId,
        event: &AuditEvent,
        guard_snapshot: Option<&AuditEvent>,
    ) -> Result<()>;

    fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: EventId,
    pub json: Value,
    pub last_updated: Option<String>,
    pub columns: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SqlDataProvider {
    options: SqlProviderOptions,
}

impl SqlDataProvider {
    pub fn new(options: SqlProviderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SqlProviderOptions {
        &self.options
    }

    pub fn ensure_table(&self, event: Option<&AuditEvent>) -> Result<()> {
        let location = resolve_location(&self.options, event)?;
        let conn = open_connection(&location.connection_string, &self.options.driver)?;
        let id_kind = if self.options.id_value.is_some() {
            IdColumnKind::Assigned
        } else {
            IdColumnKind::AutoIncrement
        };
        let custom = self
            .options
            .custom_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>();
        ensure_table(&conn, &location, id_kind, &custom)?;
        Ok(())
    }

    pub fn get_row(&self, id: &EventId) -> Result<Option<StoredRow>> {
        let location = resolve_location(&self.options, None)?;
        let conn = open_connection(&location.connection_string, &self.options.driver)?;

        let mut select = vec![
            quote_ident(&location.id_column),
            quote_ident(&location.json_column),
        ];
        if let Some(last) = &location.last_updated_column {
            select.push(quote_ident(last));
        }
        let custom_names = self
            .options
            .custom_columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>();
        select.extend(custom_names.iter().map(|n| quote_ident(n)));
        let custom_offset = if location.last_updated_column.is_some() { 3 } else { 2 };

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select.join(", "),
            location.table,
            quote_ident(&location.id_column)
        );
        let raw = conn
            .query_row(&sql, params![id], |row| {
                let id: EventId = row.get(0)?;
                let json: String = row.get(1)?;
                let last_updated: Option<String> = if location.last_updated_column.is_some() {
                    row.get(2)?
                } else {
                    None
                };
                let mut columns = BTreeMap::new();
                for (idx, name) in custom_names.iter().enumerate() {
                    let value: SqlValue = row.get(custom_offset + idx)?;
                    columns.insert(name.clone(), from_sql_value(value));
                }
                Ok((id, json, last_updated, columns))
            })
            .optional()?;

        raw.map(|(id, json, last_updated, columns)| {
            Ok::<_, AuditError>(StoredRow {
                id,
                json: serde_json::from_str(&json)?,
                last_updated,
                columns,
            })
        })
        .transpose()
    }
}

impl AuditDataProvider for SqlDataProvider {
    fn insert_event(&self, event: &AuditEvent) -> Result<EventId> {
        let row = resolve_row(&self.options, event, None)?;
        let location = &row.location;

        let mut names = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = &row.id {
            names.push(quote_ident(&location.id_column));
            values.push(id_value(id));
        }
        names.push(quote_ident(&location.json_column));
        values.push(SqlValue::Text(row.json.clone()));
        if let Some(last) = &location.last_updated_column {
            names.push(quote_ident(last));
            values.push(SqlValue::Text(Utc::now().to_rfc3339()));
        }
        for (name, value) in &row.columns {
            names.push(quote_ident(name));
            values.push(value.clone());
        }
        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            location.table,
            names.join(", ")
        );

        let conn = open_connection(&location.connection_string, &self.options.driver)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(&sql, params_from_iter(values.iter()))?;
        let id = match row.id {
            Some(id) => id,
            None => EventId::Integer(tx.last_insert_rowid()),
        };
        tx.commit()?;

        debug!(%id, table = %location.table, event_type = %event.event_type, "audit event inserted");
        Ok(id)
    }

    fn replace_event(
        &self,
        id: &EventId,
        event: &AuditEvent,
        guard_snapshot: Option<&AuditEvent>,
    ) -> Result<()> {
        let row = resolve_row(&self.options, event, guard_snapshot)?;
        let location: &TableLocation = &row.location;
        if let Some(resolved) = &row.id
            && resolved != id
        {
            warn!(%id, %resolved, "resolved id differs from stored id; replacing by stored id");
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();
        sets.push(format!("{} = ?1", quote_ident(&location.json_column)));
        values.push(SqlValue::Text(row.json.clone()));
        if let Some(last) = &location.last_updated_column {
            values.push(SqlValue::Text(Utc::now().to_rfc3339()));
            sets.push(format!("{} = ?{}", quote_ident(last), values.len()));
        }
        for (name, value) in &row.columns {
            values.push(value.clone());
            sets.push(format!("{} = ?{}", quote_ident(name), values.len()));
        }
        values.push(id_value(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            location.table,
            sets.join(", "),
            quote_ident(&location.id_column),
            values.len()
        );

        let conn = open_connection(&location.connection_string, &self.options.driver)?;
        let tx = conn.unchecked_transaction()?;
        let affected = tx.execute(&sql, params_from_iter(values.iter()))?;
        if affected != 1 {
            // dropping the transaction rolls it back
            return Err(AuditError::UnexpectedRowCount {
                id: id.clone(),
                affected,
            });
        }
        tx.commit()?;

        debug!(%id, table = %location.table, event_type = %event.event_type, "audit event replaced");
        Ok(())
    }

    fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>> {
        let location = resolve_location(&self.options, None)?;
        let conn = open_connection(&location.connection_string, &self.options.driver)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            quote_ident(&location.json_column),
            location.table,
            quote_ident(&location.id_column)
        );
        let raw: Option<String> = conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?;
        raw.map(|json| AuditEvent::from_json(&json)).transpose()
    }
}

fn id_value(id: &EventId) -> SqlValue {
    match id {
        EventId::Integer(v) => SqlValue::Integer(*v),
        EventId::Text(s) => SqlValue::Text(s.clone()),
    }
}
