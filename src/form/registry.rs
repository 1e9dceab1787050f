use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::definition::ErasedDefinition;
use super::error::{FormError, FormResult};
use super::field::FieldPath;
use super::store::{FieldState, FormStore};
use super::validation::ValidationStatus;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Registration {
    Created,
    /// Re-registered after an unregister that preserved state.
    Restored,
    /// Folded into an existing definition.
    Merged {
        value_changed: bool,
        validators_changed: bool,
    },
    /// Re-registered with `force_reset`.
    Reset,
}

#[derive(Default)]
pub(crate) struct FieldRegistry {
    definitions: BTreeMap<FieldPath, ErasedDefinition>,
    preserved: BTreeMap<FieldPath, FieldState>,
    /// source -> fields revalidated when the source changes. Entries outlive
    /// the fields they point at.
    dependents: BTreeMap<FieldPath, BTreeSet<FieldPath>>,
}

impl FieldRegistry {
    pub(crate) fn definition(&self, path: &FieldPath) -> Option<&ErasedDefinition> {
        self.definitions.get(path)
    }

    pub(crate) fn contains(&self, path: &FieldPath) -> bool {
        self.definitions.contains_key(path)
    }

    pub(crate) fn paths(&self) -> Vec<FieldPath> {
        self.definitions.keys().cloned().collect()
    }

    pub(crate) fn dependents_of(&self, source: &FieldPath) -> Vec<FieldPath> {
        self.dependents
            .get(source)
            .map(|dependents| dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn check_type(&self, path: &FieldPath, requested: &'static str) -> FormResult<()> {
        match self.definitions.get(path).and_then(|def| def.value_type) {
            Some(registered) if registered != requested => {
                tracing::error!(field = %path, registered, requested, "field accessed with a different value type");
                Err(FormError::FieldTypeMismatch {
                    path: path.clone(),
                    registered,
                    requested,
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn clear_preserved(&mut self) {
        self.preserved.clear();
    }

    fn index_dependencies(&mut self, path: &FieldPath) {
        let Some(definition) = self.definitions.get(path) else {
            return;
        };
        for source in &definition.dependencies {
            self.dependents
                .entry(source.clone())
                .or_default()
                .insert(path.clone());
        }
    }
}

impl FormStore {
    pub(crate) fn register(&mut self, incoming: ErasedDefinition) -> FormResult<Registration> {
        let path = incoming.path.clone();
        if let Some(requested) = incoming.value_type {
            self.registry.check_type(&path, requested)?;
        }

        let registration = if let Some(existing) = self.registry.definitions.get_mut(&path) {
            let had_initial = existing.initial.is_some();
            let force_reset = incoming.force_reset;
            let initial = incoming.initial.clone();
            let validators_changed =
                incoming.validator.is_some() || incoming.async_validator.is_some();
            existing.merge(incoming);
            if force_reset {
                let initial = initial.unwrap_or(Value::Null);
                existing.initial = Some(initial.clone());
                self.invalidate(&path);
                self.forget_derivations(&path);
                self.interacted.remove(&path);
                self.insert_field(path.clone(), FieldState::new(initial));
                Registration::Reset
            } else {
                let mut value_changed = false;
                if !had_initial && let Some(initial) = initial {
                    existing.initial = Some(initial.clone());
                    if let Some(state) = self.field_mut(&path) {
                        let before = state.value.clone();
                        state.rebase(initial);
                        value_changed = state.value != before;
                    }
                }
                Registration::Merged {
                    value_changed,
                    validators_changed,
                }
            }
        } else {
            let initial = incoming.initial.clone().unwrap_or(Value::Null);
            self.registry.definitions.insert(path.clone(), incoming);
            match self.registry.preserved.remove(&path) {
                Some(state) => {
                    self.insert_field(path.clone(), state);
                    Registration::Restored
                }
                None => {
                    self.insert_field(path.clone(), FieldState::new(initial));
                    Registration::Created
                }
            }
        };

        self.registry.index_dependencies(&path);
        Ok(registration)
    }

    /// Registers an implicit definition for `path` when it is unknown,
    /// otherwise checks the value type.
    pub(crate) fn ensure_field(
        &mut self,
        path: &FieldPath,
        value_type: Option<&'static str>,
    ) -> FormResult<bool> {
        if self.registry.contains(path) {
            if let Some(requested) = value_type {
                self.registry.check_type(path, requested)?;
                if let Some(definition) = self.registry.definitions.get_mut(path)
                    && definition.value_type.is_none()
                {
                    definition.value_type = Some(requested);
                }
            }
            return Ok(false);
        }
        tracing::debug!(field = %path, "auto-registering field on first use");
        self.register(ErasedDefinition::implicit(path.clone(), value_type))?;
        Ok(true)
    }

    /// Removes the definition of `path`. With `preserve_state` the runtime
    /// state is parked until the field is registered again.
    pub(crate) fn unregister(&mut self, path: &FieldPath, preserve_state: bool) -> bool {
        let existed = self.registry.definitions.remove(path).is_some();
        let state = self.remove_field(path);
        self.invalidate(path);
        self.forget_derivations(path);
        self.interacted.remove(path);
        match state {
            Some(mut state) if preserve_state => {
                state.pending = false;
                if state.validation.is_validating() {
                    state.validation = ValidationStatus::Pristine;
                }
                self.registry.preserved.insert(path.clone(), state);
            }
            _ => {
                self.registry.preserved.remove(path);
            }
        }
        existed
    }
}
