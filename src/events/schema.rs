use crate::mapping::TableLocation;
use rusqlite::{Connection, Result};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdColumnKind {
    AutoIncrement,
    // no declared type: integer and text ids keep their storage class
    Assigned,
}

pub fn ensure_table(
    conn: &Connection,
    location: &TableLocation,
    id_kind: IdColumnKind,
    custom_columns: &[&str],
) -> Result<()> {
    let id_decl = match id_kind {
        IdColumnKind::AutoIncrement => "INTEGER PRIMARY KEY AUTOINCREMENT",
        IdColumnKind::Assigned => "PRIMARY KEY",
    };
    let mut cols = vec![
        format!("{} {id_decl}", quote_ident(&location.id_column)),
        format!("{} TEXT NOT NULL", quote_ident(&location.json_column)),
    ];
    if let Some(last) = &location.last_updated_column {
        cols.push(format!("{} TEXT", quote_ident(last)));
    }
    cols.extend(custom_columns.iter().map(|c| quote_ident(c)));

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        location.table,
        cols.join(",\n    ")
    ))
}
