use crate::events::AuditEvent;
use crate::events::store::SqlDataProvider;
use crate::logging::ndjson::NdjsonMirror;
use crate::mapping::ColumnSpec;
use crate::mapping::options::{DriverOptions, SqlProviderOptions};
use crate::scope::Auditor;
use crate::scope::policy::CreationPolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub version: u32,
    pub database: DatabaseConfig,
    pub creation_policy: CreationPolicy,
    pub mirror: Option<PathBuf>,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub table: Option<String>,
    pub schema: Option<String>,
    pub id_column: String,
    pub json_column: String,
    pub last_updated_column: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub wal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnConfig {
    pub name: String,
    pub source: ColumnSource,
    pub when_event_type: Option<String>,
    pub when_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    EventType,
    StartDate,
    EndDate,
    DurationMs,
    UserName,
    MachineName,
    Field(String),
}

impl ColumnSource {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "event_type" => Some(ColumnSource::EventType),
            "start_date" => Some(ColumnSource::StartDate),
            "end_date" => Some(ColumnSource::EndDate),
            "duration_ms" => Some(ColumnSource::DurationMs),
            "user_name" => Some(ColumnSource::UserName),
            "machine_name" => Some(ColumnSource::MachineName),
            other => other
                .strip_prefix("field:")
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| ColumnSource::Field(f.to_string())),
        }
    }

    pub fn extract(&self, ev: &AuditEvent) -> Value {
        match self {
            ColumnSource::EventType => json!(ev.event_type),
            ColumnSource::StartDate => json!(ev.start_date.to_rfc3339()),
            ColumnSource::EndDate => json!(ev.end_date.map(|d| d.to_rfc3339())),
            ColumnSource::DurationMs => json!(ev.duration_ms),
            ColumnSource::UserName => json!(ev.environment.user_name),
            ColumnSource::MachineName => json!(ev.environment.machine_name),
            ColumnSource::Field(name) => ev.custom_field(name).cloned().unwrap_or(Value::Null),
        }
    }
}

impl ColumnConfig {
    pub fn to_spec(&self) -> ColumnSpec {
        let source = self.source.clone();
        let spec = ColumnSpec::new(&self.name, move |ev| Ok(source.extract(ev)));
        let when_event_type = self.when_event_type.clone();
        let when_field = self.when_field.clone();
        if when_event_type.is_none() && when_field.is_none() {
            return spec;
        }
        spec.with_guard(move |ev| {
            let type_ok = when_event_type
                .as_deref()
                .is_none_or(|t| ev.event_type == t);
            let field_ok = when_field
                .as_deref()
                .is_none_or(|f| ev.custom_field(f).is_some_and(|v| !v.is_null()));
            Ok(type_ok && field_ok)
        })
    }
}

impl AuditConfig {
    pub fn provider_options(&self) -> SqlProviderOptions {
        let db = &self.database;
        let mut builder = SqlProviderOptions::builder()
            .connection_string(db.path.as_str())
            .id_column_name(db.id_column.as_str())
            .json_column_name(db.json_column.as_str())
            .driver_options(DriverOptions {
                busy_timeout: db.busy_timeout_ms.map(Duration::from_millis),
                wal: db.wal,
                interceptors: Vec::new(),
            });
        if let Some(table) = &db.table {
            builder = builder.table_name(table.as_str());
        }
        if let Some(schema) = &db.schema {
            builder = builder.schema(schema.as_str());
        }
        if let Some(last) = &db.last_updated_column {
            builder = builder.last_updated_column_name(last.as_str());
        }
        for column in &self.columns {
            builder = builder.column(column.to_spec());
        }
        builder.build()
    }

    pub fn auditor(&self) -> Auditor {
        let provider = SqlDataProvider::new(self.provider_options());
        let mut auditor =
            Auditor::new(Arc::new(provider)).with_creation_policy(self.creation_policy);
        if let Some(path) = &self.mirror {
            auditor = auditor.with_observer(Arc::new(NdjsonMirror::new(path.clone())));
        }
        auditor
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawAuditConfig {
    version: Option<u32>,
    database: Option<RawDatabaseConfig>,
    scope: Option<RawScopeConfig>,
    mirror: Option<RawMirrorConfig>,
    columns: Option<Vec<RawColumnConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDatabaseConfig {
    path: Option<String>,
    table: Option<String>,
    schema: Option<String>,
    id_column: Option<String>,
    json_column: Option<String>,
    last_updated_column: Option<String>,
    busy_timeout_ms: Option<u64>,
    wal: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawScopeConfig {
    creation_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMirrorConfig {
    ndjson: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawColumnConfig {
    name: Option<String>,
    source: Option<String>,
    when_event_type: Option<String>,
    when_field: Option<String>,
}

pub fn load_config(path: &Path) -> Result<AuditConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read audit config {}", path.display()))?;
    parse_config(&raw, path)
}

pub fn parse_config(raw: &str, origin: &Path) -> Result<AuditConfig> {
    let parsed: RawAuditConfig =
        toml::from_str(raw).with_context(|| format!("parse {}", origin.display()))?;
    validate_config(parsed, origin)
}

fn validate_config(raw: RawAuditConfig, path: &Path) -> Result<AuditConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != SUPPORTED_VERSION {
        bail!(
            "{} has unsupported version {version}; expected version = {SUPPORTED_VERSION}",
            path.display()
        );
    }

    let database = raw
        .database
        .ok_or_else(|| anyhow::anyhow!("{} missing `[database]` section", path.display()))?;
    let database = validate_database_config(database, path)?;

    let creation_policy = match raw.scope.and_then(|s| sanitize_optional(s.creation_policy)) {
        None => CreationPolicy::default(),
        Some(policy) => policy
            .parse::<CreationPolicy>()
            .with_context(|| format!("{} invalid `[scope].creation_policy`", path.display()))?,
    };

    let mirror = raw
        .mirror
        .and_then(|m| sanitize_optional(m.ndjson))
        .map(PathBuf::from);

    let mut columns = Vec::new();
    for (idx, column) in raw.columns.unwrap_or_default().into_iter().enumerate() {
        let column = validate_column(column, path, idx)?;
        if column.name == database.id_column
            || column.name == database.json_column
            || columns.iter().any(|c: &ColumnConfig| c.name == column.name)
        {
            bail!(
                "{} maps column `{}` more than once (`[[columns]]` index {idx})",
                path.display(),
                column.name
            );
        }
        columns.push(column);
    }

    Ok(AuditConfig {
        version,
        database,
        creation_policy,
        mirror,
        columns,
    })
}

fn validate_database_config(raw: RawDatabaseConfig, path: &Path) -> Result<DatabaseConfig> {
    let required = |value: Option<String>, key: &str| {
        sanitize_optional(value).ok_or_else(|| {
            anyhow::anyhow!("{} missing `[database].{key}` in config", path.display())
        })
    };
    Ok(DatabaseConfig {
        path: required(raw.path, "path")?,
        table: sanitize_optional(raw.table),
        schema: sanitize_optional(raw.schema),
        id_column: required(raw.id_column, "id_column")?,
        json_column: required(raw.json_column, "json_column")?,
        last_updated_column: sanitize_optional(raw.last_updated_column),
        busy_timeout_ms: raw.busy_timeout_ms,
        wal: raw.wal.unwrap_or(false),
    })
}

fn validate_column(raw: RawColumnConfig, path: &Path, idx: usize) -> Result<ColumnConfig> {
    let name = sanitize_optional(raw.name).ok_or_else(|| {
        anyhow::anyhow!(
            "{} missing `name` for `[[columns]]` at index {idx}",
            path.display()
        )
    })?;
    let source_raw = sanitize_optional(raw.source).ok_or_else(|| {
        anyhow::anyhow!(
            "{} missing `source` for `[[columns]]` at index {idx}",
            path.display()
        )
    })?;
    let source = ColumnSource::parse(&source_raw).ok_or_else(|| {
        anyhow::anyhow!(
            "{} has unsupported `source = \"{source_raw}\"` for `[[columns]]` at index {idx}",
            path.display()
        )
    })?;
    Ok(ColumnConfig {
        name,
        source,
        when_event_type: sanitize_optional(raw.when_event_type),
        when_field: sanitize_optional(raw.when_field),
    })
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
