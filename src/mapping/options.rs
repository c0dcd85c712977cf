use crate::events::AuditEvent;
use crate::hooks::ConnectionInterceptor;
use crate::mapping::{ColumnSpec, NameBuilder, ValueFn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TABLE_NAME: &str = "Event";

#[derive(Clone, Default)]
pub struct DriverOptions {
    pub busy_timeout: Option<Duration>,
    pub wal: bool,
    pub interceptors: Vec<Arc<dyn ConnectionInterceptor>>,
}

impl DriverOptions {
    pub fn with_interceptor(mut self, interceptor: Arc<dyn ConnectionInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

impl fmt::Debug for DriverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverOptions")
            .field("busy_timeout", &self.busy_timeout)
            .field("wal", &self.wal)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct SqlProviderOptions {
    pub connection_string: Option<NameBuilder>,
    pub table_name: NameBuilder,
    pub schema: Option<NameBuilder>,
    pub id_column_name: Option<NameBuilder>,
    pub json_column_name: Option<NameBuilder>,
    pub last_updated_column_name: Option<NameBuilder>,
    pub id_value: Option<ValueFn>,
    pub custom_columns: Vec<ColumnSpec>,
    pub driver: DriverOptions,
}

impl SqlProviderOptions {
    pub fn builder() -> SqlProviderOptionsBuilder {
        SqlProviderOptionsBuilder::default()
    }
}

impl fmt::Debug for SqlProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlProviderOptions")
            .field("connection_string", &self.connection_string)
            .field("table_name", &self.table_name)
            .field("schema", &self.schema)
            .field("id_column_name", &self.id_column_name)
            .field("json_column_name", &self.json_column_name)
            .field("last_updated_column_name", &self.last_updated_column_name)
            .field("id_value", &self.id_value.is_some())
            .field(
                "custom_columns",
                &self
                    .custom_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("driver", &self.driver)
            .finish()
    }
}

#[derive(Default)]
pub struct SqlProviderOptionsBuilder {
    connection_string: Option<NameBuilder>,
    table_name: Option<NameBuilder>,
    schema: Option<NameBuilder>,
    id_column_name: Option<NameBuilder>,
    json_column_name: Option<NameBuilder>,
    last_updated_column_name: Option<NameBuilder>,
    id_value: Option<ValueFn>,
    custom_columns: Vec<ColumnSpec>,
    driver: DriverOptions,
}

impl SqlProviderOptionsBuilder {
    pub fn connection_string(mut self, value: impl Into<NameBuilder>) -> Self {
        self.connection_string = Some(value.into());
        self
    }

    pub fn table_name(mut self, value: impl Into<NameBuilder>) -> Self {
        self.table_name = Some(value.into());
        self
    }

    pub fn schema(mut self, value: impl Into<NameBuilder>) -> Self {
        self.schema = Some(value.into());
        self
    }

    pub fn id_column_name(mut self, value: impl Into<NameBuilder>) -> Self {
        self.id_column_name = Some(value.into());
        self
    }

    pub fn json_column_name(mut self, value: impl Into<NameBuilder>) -> Self {
        self.json_column_name = Some(value.into());
        self
    }

    pub fn last_updated_column_name(mut self, value: impl Into<NameBuilder>) -> Self {
        self.last_updated_column_name = Some(value.into());
        self
    }

    pub fn id_value<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuditEvent) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.id_value = Some(Arc::new(f));
        self
    }

    pub fn custom_column<F>(mut self, name: &str, value: F) -> Self
    where
        F: Fn(&AuditEvent) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.custom_columns.push(ColumnSpec::new(name, value));
        self
    }

    pub fn custom_column_when<F, G>(mut self, name: &str, value: F, guard: G) -> Self
    where
        F: Fn(&AuditEvent) -> anyhow::Result<Value> + Send + Sync + 'static,
        G: Fn(&AuditEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.custom_columns
            .push(ColumnSpec::new(name, value).with_guard(guard));
        self
    }

    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.custom_columns.push(spec);
        self
    }

    pub fn driver_options(mut self, driver: DriverOptions) -> Self {
        self.driver = driver;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn ConnectionInterceptor>) -> Self {
        self.driver.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> SqlProviderOptions {
        SqlProviderOptions {
            connection_string: self.connection_string,
            table_name: self
                .table_name
                .unwrap_or_else(|| NameBuilder::from(DEFAULT_TABLE_NAME)),
            schema: self.schema,
            id_column_name: self.id_column_name,
            json_column_name: self.json_column_name,
            last_updated_column_name: self.last_updated_column_name,
            id_value: self.id_value,
            custom_columns: self.custom_columns,
            driver: self.driver,
        }
    }
}
