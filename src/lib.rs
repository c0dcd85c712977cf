pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod mapping;
pub mod scope;

pub use error::{AuditError, Result};
