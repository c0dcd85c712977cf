use crate::error::{AuditError, Result};
use crate::events::EventId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    InsertOnStart,
    #[default]
    InsertOnEnd,
    InsertOnStartReplaceOnEnd,
    InsertOnStartInsertOnEnd,
    Manual,
}

impl CreationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationPolicy::InsertOnStart => "insert_on_start",
            CreationPolicy::InsertOnEnd => "insert_on_end",
            CreationPolicy::InsertOnStartReplaceOnEnd => "insert_on_start_replace_on_end",
            CreationPolicy::InsertOnStartInsertOnEnd => "insert_on_start_insert_on_end",
            CreationPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for CreationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreationPolicy {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "insert_on_start" => Ok(CreationPolicy::InsertOnStart),
            "insert_on_end" => Ok(CreationPolicy::InsertOnEnd),
            "insert_on_start_replace_on_end" => Ok(CreationPolicy::InsertOnStartReplaceOnEnd),
            "insert_on_start_insert_on_end" => Ok(CreationPolicy::InsertOnStartInsertOnEnd),
            "manual" => Ok(CreationPolicy::Manual),
            other => Err(AuditError::Configuration(format!(
                "unknown creation policy `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePhase {
    Start,
    End,
    Save,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
    None,
    Insert,
    Replace(EventId),
}

pub fn plan_write(
    policy: CreationPolicy,
    phase: ScopePhase,
    current: Option<&EventId>,
) -> Result<WriteAction> {
    let insert_or_replace = || match current {
        Some(id) => WriteAction::Replace(id.clone()),
        None => WriteAction::Insert,
    };

    let action = match (policy, phase) {
        (_, ScopePhase::Save) => insert_or_replace(),
        (CreationPolicy::Manual, _) => WriteAction::None,
        (CreationPolicy::InsertOnEnd, ScopePhase::Start) => WriteAction::None,
        (CreationPolicy::InsertOnEnd, ScopePhase::End) => insert_or_replace(),
        (CreationPolicy::InsertOnStart, ScopePhase::Start)
        | (CreationPolicy::InsertOnStartReplaceOnEnd, ScopePhase::Start)
        | (CreationPolicy::InsertOnStartInsertOnEnd, ScopePhase::Start) => WriteAction::Insert,
        (CreationPolicy::InsertOnStart, ScopePhase::End) => WriteAction::None,
        (CreationPolicy::InsertOnStartInsertOnEnd, ScopePhase::End) => WriteAction::Insert,
        (CreationPolicy::InsertOnStartReplaceOnEnd, ScopePhase::End) => {
            let id = current.ok_or_else(|| {
                AuditError::InvalidTransition(
                    "replace on end requires the id captured at start".to_string(),
                )
            })?;
            WriteAction::Replace(id.clone())
        }
    };
    Ok(action)
}
