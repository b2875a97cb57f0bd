//! Capability resolver: intent type → registered step sequence.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use runplane_saga::StepDescriptor;

/// Capability registry error.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A second realm tried to claim an already-registered intent type.
    /// Replacing a registration requires an explicit override.
    #[error("intent type '{intent_type}' is already registered by realm '{owner}'")]
    Conflict { intent_type: String, owner: String },
}

/// One realm's claim on an intent type: the steps to run when an intent of
/// this type is accepted.
///
/// Registered at realm startup, removed on explicit deregistration, never
/// mutated otherwise. The kernel treats the handlers as opaque.
#[derive(Debug, Clone)]
pub struct CapabilityRegistration {
    pub intent_type: String,
    /// The realm that owns this capability, for audit logs.
    pub realm_owner: String,
    pub steps: Vec<StepDescriptor>,
    pub registered_at: DateTime<Utc>,
}

impl CapabilityRegistration {
    pub fn new(
        intent_type: impl Into<String>,
        realm_owner: impl Into<String>,
        steps: Vec<StepDescriptor>,
    ) -> Self {
        Self {
            intent_type: intent_type.into(),
            realm_owner: realm_owner.into(),
            steps,
            registered_at: Utc::now(),
        }
    }
}

/// Pure lookup table from intent type to capability.
///
/// An unresolved intent type is a normal outcome here; the executor turns it
/// into a `NoCapability` rejection.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, CapabilityRegistration>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, rejecting a duplicate intent type.
    pub fn register(&self, registration: CapabilityRegistration) -> Result<(), CapabilityError> {
        let Ok(mut entries) = self.entries.write() else {
            return Ok(());
        };
        if let Some(existing) = entries.get(&registration.intent_type) {
            warn!(
                intent_type = %registration.intent_type,
                claimant = %registration.realm_owner,
                owner = %existing.realm_owner,
                "capability registration conflict"
            );
            return Err(CapabilityError::Conflict {
                intent_type: registration.intent_type,
                owner: existing.realm_owner.clone(),
            });
        }
        info!(
            intent_type = %registration.intent_type,
            realm_owner = %registration.realm_owner,
            steps = registration.steps.len(),
            "capability registered"
        );
        entries.insert(registration.intent_type.clone(), registration);
        Ok(())
    }

    /// Replace any existing registration for the intent type.
    pub fn register_override(&self, registration: CapabilityRegistration) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(previous) = entries.get(&registration.intent_type) {
                info!(
                    intent_type = %registration.intent_type,
                    previous_owner = %previous.realm_owner,
                    new_owner = %registration.realm_owner,
                    "capability registration overridden"
                );
            }
            entries.insert(registration.intent_type.clone(), registration);
        }
    }

    pub fn resolve(&self, intent_type: &str) -> Option<CapabilityRegistration> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(intent_type).cloned())
    }

    /// Remove a registration. Returns whether one existed.
    pub fn deregister(&self, intent_type: &str) -> bool {
        match self.entries.write() {
            Ok(mut entries) => entries.remove(intent_type).is_some(),
            Err(_) => false,
        }
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runplane_saga::StepContext;
    use serde_json::Value as JsonValue;
    use std::sync::Arc;

    fn echo_steps() -> Vec<StepDescriptor> {
        vec![StepDescriptor::new(
            "echo",
            Arc::new(|ctx: &StepContext| -> Result<JsonValue, String> {
                Ok(ctx.intent_payload.clone())
            }),
        )]
    }

    #[test]
    fn resolve_returns_what_was_registered() {
        let registry = CapabilityRegistry::new();
        registry
            .register(CapabilityRegistration::new("noop.echo", "noop-realm", echo_steps()))
            .unwrap();

        let resolved = registry.resolve("noop.echo").unwrap();
        assert_eq!(resolved.realm_owner, "noop-realm");
        assert_eq!(resolved.steps.len(), 1);
        assert!(registry.resolve("ghost.nope").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected_not_replaced() {
        let registry = CapabilityRegistry::new();
        registry
            .register(CapabilityRegistration::new("noop.echo", "first", echo_steps()))
            .unwrap();

        let err = registry
            .register(CapabilityRegistration::new("noop.echo", "second", echo_steps()))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Conflict { .. }));

        // Original owner kept.
        assert_eq!(registry.resolve("noop.echo").unwrap().realm_owner, "first");
    }

    #[test]
    fn override_replaces_the_owner() {
        let registry = CapabilityRegistry::new();
        registry
            .register(CapabilityRegistration::new("noop.echo", "first", echo_steps()))
            .unwrap();
        registry.register_override(CapabilityRegistration::new(
            "noop.echo",
            "second",
            echo_steps(),
        ));

        assert_eq!(registry.resolve("noop.echo").unwrap().realm_owner, "second");
    }

    #[test]
    fn deregistered_type_no_longer_resolves() {
        let registry = CapabilityRegistry::new();
        registry
            .register(CapabilityRegistration::new("noop.echo", "noop-realm", echo_steps()))
            .unwrap();

        assert!(registry.deregister("noop.echo"));
        assert!(!registry.deregister("noop.echo"));
        assert!(registry.resolve("noop.echo").is_none());
    }
}
