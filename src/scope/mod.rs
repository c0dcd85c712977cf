pub mod policy;

use crate::error::{AuditError, Result};
use crate::events::store::AuditDataProvider;
use crate::events::{AuditEvent, EventId};
use crate::hooks::AuditObserver;
use chrono::Utc;
use policy::{CreationPolicy, ScopePhase, WriteAction, plan_write};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct Auditor {
    provider: Arc<dyn AuditDataProvider>,
    policy: CreationPolicy,
    observers: Vec<Arc<dyn AuditObserver>>,
}

impl Auditor {
    pub fn new(provider: Arc<dyn AuditDataProvider>) -> Self {
        Self {
            provider,
            policy: CreationPolicy::default(),
            observers: Vec::new(),
        }
    }

    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AuditObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn provider(&self) -> &Arc<dyn AuditDataProvider> {
        &self.provider
    }

    pub fn creation_policy(&self) -> CreationPolicy {
        self.policy
    }

    pub fn create_scope(&self, event_type: &str, extra_fields: Value) -> Result<AuditScope> {
        self.create_scope_with(ScopeOptions::new(event_type).extra_fields(extra_fields))
    }

    pub fn create_scope_with(&self, options: ScopeOptions) -> Result<AuditScope> {
        AuditScope::start(
            options,
            self.provider.clone(),
            self.policy,
            self.observers.clone(),
        )
    }

    pub fn log(&self, event_type: &str, extra_fields: Value) -> Result<Option<EventId>> {
        let scope = self.create_scope_with(
            ScopeOptions::new(event_type)
                .extra_fields(extra_fields)
                .creation_policy(CreationPolicy::InsertOnEnd),
        )?;
        scope.end()
    }
}

#[derive(Clone)]
pub struct ScopeOptions {
    pub event_type: String,
    pub extra_fields: Value,
    pub creation_policy: Option<CreationPolicy>,
    pub provider: Option<Arc<dyn AuditDataProvider>>,
}

impl ScopeOptions {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            extra_fields: Value::Null,
            creation_policy: None,
            provider: None,
        }
    }

    pub fn extra_fields(mut self, fields: Value) -> Self {
        self.extra_fields = fields;
        self
    }

    pub fn creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = Some(policy);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn AuditDataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeState {
    NotStarted,
    Started { id: Option<EventId> },
    Ended,
}

pub struct AuditScope {
    event: AuditEvent,
    policy: CreationPolicy,
    provider: Arc<dyn AuditDataProvider>,
    observers: Vec<Arc<dyn AuditObserver>>,
    state: ScopeState,
    // Event as of the last insert; replace-time guards are evaluated against it.
    inserted_snapshot: Option<AuditEvent>,
}

impl AuditScope {
    fn start(
        options: ScopeOptions,
        default_provider: Arc<dyn AuditDataProvider>,
        default_policy: CreationPolicy,
        observers: Vec<Arc<dyn AuditObserver>>,
    ) -> Result<Self> {
        let mut event = AuditEvent::new(&options.event_type);
        event.merge_custom_fields(options.extra_fields)?;

        let mut scope = Self {
            event,
            policy: options.creation_policy.unwrap_or(default_policy),
            provider: options.provider.unwrap_or(default_provider),
            observers,
            state: ScopeState::NotStarted,
            inserted_snapshot: None,
        };
        for observer in &scope.observers {
            observer.on_scope_created(&scope.event);
        }
        debug!(event_type = %scope.event.event_type, policy = %scope.policy, "audit scope created");

        // On failure the scope is still NotStarted, so dropping it writes nothing.
        let id = scope.write(ScopePhase::Start)?;
        scope.state = ScopeState::Started { id };
        Ok(scope)
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn event_id(&self) -> Option<&EventId> {
        match &self.state {
            ScopeState::Started { id } => id.as_ref(),
            _ => None,
        }
    }

    pub fn state(&self) -> &ScopeState {
        &self.state
    }

    pub fn creation_policy(&self) -> CreationPolicy {
        self.policy
    }

    pub fn set_custom_field<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        self.ensure_open()?;
        self.event.set_custom_field(name, value)
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.event.comments.push(text.to_string());
        Ok(())
    }

    pub fn save(&mut self) -> Result<Option<EventId>> {
        self.ensure_open()?;
        let id = self.write(ScopePhase::Save)?;
        if id.is_some() {
            self.state = ScopeState::Started { id: id.clone() };
        }
        Ok(id)
    }

    pub fn end(mut self) -> Result<Option<EventId>> {
        self.finish()
    }

    pub fn discard(mut self) {
        debug!(event_type = %self.event.event_type, "audit scope discarded");
        self.state = ScopeState::Ended;
    }

    fn finish(&mut self) -> Result<Option<EventId>> {
        let ScopeState::Started { id: previous } = &self.state else {
            return Err(AuditError::InvalidTransition(
                "scope is not started".to_string(),
            ));
        };
        let previous = previous.clone();
        self.event.mark_ended(Utc::now());
        let written = self.write(ScopePhase::End);
        self.state = ScopeState::Ended;
        Ok(written?.or(previous))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ScopeState::Ended {
            return Err(AuditError::InvalidTransition(
                "scope already ended".to_string(),
            ));
        }
        Ok(())
    }

    fn write(&mut self, phase: ScopePhase) -> Result<Option<EventId>> {
        let current = match &self.state {
            ScopeState::Started { id } => id.clone(),
            _ => None,
        };
        let action = plan_write(self.policy, phase, current.as_ref())?;
        if action == WriteAction::None {
            return Ok(None);
        }

        for observer in &self.observers {
            observer.on_event_saving(&mut self.event);
        }
        let id = match action {
            WriteAction::None => return Ok(None),
            WriteAction::Insert => {
                let id = self.provider.insert_event(&self.event)?;
                self.inserted_snapshot = Some(self.event.clone());
                id
            }
            WriteAction::Replace(id) => {
                self.provider
                    .replace_event(&id, &self.event, self.inserted_snapshot.as_ref())?;
                id
            }
        };
        for observer in &self.observers {
            observer.on_event_saved(&id, &self.event);
        }
        Ok(Some(id))
    }
}

impl Drop for AuditScope {
    fn drop(&mut self) {
        if matches!(self.state, ScopeState::Started { .. })
            && let Err(err) = self.finish()
        {
            error!(event_type = %self.event.event_type, error = %err, "audit scope end failed on drop");
        }
    }
}
