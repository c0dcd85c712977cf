use crate::error::{AuditError, Result};
use crate::hooks::ConnectionEventData;
use crate::mapping::options::DriverOptions;
use chrono::Utc;
use rusqlite::Connection;
use std::ops::Deref;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub struct AcquiredConnection<'a> {
    conn: Connection,
    data: ConnectionEventData,
    driver: &'a DriverOptions,
}

impl AcquiredConnection<'_> {
    pub fn data(&self) -> &ConnectionEventData {
        &self.data
    }
}

impl Deref for AcquiredConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for AcquiredConnection<'_> {
    fn drop(&mut self) {
        for interceptor in &self.driver.interceptors {
            interceptor.connection_closed(&self.data);
        }
        debug!(connection_id = %self.data.connection_id, "audit connection closed");
    }
}

pub fn open_connection<'a>(
    connection_string: &str,
    driver: &'a DriverOptions,
) -> Result<AcquiredConnection<'a>> {
    let data = ConnectionEventData {
        connection_id: Uuid::new_v4(),
        database: connection_string.to_string(),
        opened_at: Utc::now(),
    };
    for interceptor in &driver.interceptors {
        interceptor
            .connection_opening(&data)
            .map_err(|e| AuditError::Interceptor {
                database: connection_string.to_string(),
                source: e.into(),
            })?;
    }

    if is_plain_path(connection_string)
        && let Some(parent) = Path::new(connection_string).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            AuditError::Configuration(format!(
                "create db parent dir {}: {e}",
                parent.display()
            ))
        })?;
    }

    let conn = Connection::open(connection_string)?;
    if let Some(timeout) = driver.busy_timeout {
        conn.busy_timeout(timeout)?;
    }
    if driver.wal {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;

    for interceptor in &driver.interceptors {
        interceptor.connection_opened(&data);
    }
    debug!(connection_id = %data.connection_id, database = connection_string, "audit connection opened");

    Ok(AcquiredConnection { conn, data, driver })
}

fn is_plain_path(connection_string: &str) -> bool {
    connection_string != ":memory:" && !connection_string.starts_with("file:")
}
