use crate::events::EventId;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mapping failed for column `{column}`")]
    Mapping {
        column: String,
        #[source]
        source: BoxError,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection interceptor rejected `{database}`")]
    Interceptor {
        database: String,
        #[source]
        source: BoxError,
    },

    // a replace must touch exactly one row
    #[error("replace of event {id} affected {affected} rows, expected 1")]
    UnexpectedRowCount { id: EventId, affected: usize },

    #[error("invalid scope transition: {0}")]
    InvalidTransition(String),

    #[error("custom field `{0}` collides with a reserved event field")]
    ReservedField(String),
}

impl AuditError {
    pub(crate) fn mapping(column: &str, source: anyhow::Error) -> Self {
        Self::Mapping {
            column: column.to_string(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
