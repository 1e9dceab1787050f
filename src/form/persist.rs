use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::controller::{FormController, SubmitState, read_lock};
use super::definition::ErasedDefinition;
use super::error::{FormError, FormResult};
use super::field::FieldPath;
use super::store::FieldState;
use super::validation::{FieldValidation, ValidationStatus};

/// Serializable form state, keyed by field path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedFormState {
    pub values: BTreeMap<FieldPath, Value>,
    pub validations: BTreeMap<FieldPath, FieldValidation>,
    pub dirty_states: BTreeMap<FieldPath, bool>,
    pub touched_states: BTreeMap<FieldPath, bool>,
    pub pending_states: BTreeMap<FieldPath, bool>,
    pub is_submitting: bool,
    pub reset_count: u64,
    pub current_step: usize,
}

impl PersistedFormState {
    pub fn to_json(&self) -> FormResult<String> {
        serde_json::to_string(self).map_err(|error| FormError::Persistence(error.to_string()))
    }

    pub fn to_json_pretty(&self) -> FormResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|error| FormError::Persistence(error.to_string()))
    }

    pub fn from_json(source: &str) -> FormResult<Self> {
        serde_json::from_str(source).map_err(|error| FormError::Persistence(error.to_string()))
    }
}

impl FormController {
    pub fn persist(&self) -> FormResult<PersistedFormState> {
        let store = read_lock(&self.store, "persisting form state")?;
        let mut state = PersistedFormState {
            is_submitting: store.submit_state.is_active(),
            reset_count: store.reset_count,
            current_step: store.current_step,
            ..PersistedFormState::default()
        };
        for (path, field) in &store.fields {
            state.values.insert(path.clone(), field.value.clone());
            state
                .validations
                .insert(path.clone(), field.validation.projection());
            state.dirty_states.insert(path.clone(), field.dirty);
            state.touched_states.insert(path.clone(), field.touched);
            state.pending_states.insert(path.clone(), field.pending);
        }
        Ok(state)
    }

    /// Loads `state` into this form. Registered fields keep their
    /// definitions and baselines; unknown paths become untyped fields.
    /// Async work in flight is superseded.
    pub fn restore(&self, state: PersistedFormState) -> FormResult<()> {
        let PersistedFormState {
            values,
            validations,
            dirty_states,
            touched_states,
            pending_states,
            is_submitting,
            reset_count,
            current_step,
        } = state;

        self.mutate("restoring form state", |store| {
            for (path, value) in values {
                let persisted_dirty = dirty_states.get(&path).copied().unwrap_or(false);
                let touched = touched_states.get(&path).copied().unwrap_or(false);
                let pending = pending_states.get(&path).copied().unwrap_or(false);
                let validation = validations
                    .get(&path)
                    .cloned()
                    .map(FieldValidation::into_status)
                    .unwrap_or(ValidationStatus::Pristine);

                if !store.registry.contains(&path) {
                    let mut definition = ErasedDefinition::implicit(path.clone(), None);
                    // The baseline is unknown; a dirty field must not compare
                    // equal to it.
                    definition.initial = Some(if persisted_dirty {
                        Value::Null
                    } else {
                        value.clone()
                    });
                    store.register(definition)?;
                }

                let baseline = store
                    .field(&path)
                    .map(|field| field.initial.clone())
                    .unwrap_or(Value::Null);
                // Dirtiness is measured against this form's baseline, not the
                // one the state was persisted from.
                let dirty = value != baseline;
                store.invalidate(&path);
                store.forget_derivations(&path);
                if touched || dirty {
                    store.interacted.insert(path.clone());
                } else {
                    store.interacted.remove(&path);
                }
                store.insert_field(
                    path,
                    FieldState {
                        value,
                        initial: baseline,
                        validation,
                        dirty,
                        touched,
                        pending,
                    },
                );
            }
            store.submit_state = if is_submitting {
                SubmitState::Submitting
            } else {
                SubmitState::Idle
            };
            store.reset_count = reset_count;
            store.current_step = current_step;
            Ok(())
        })?;
        tracing::debug!(form = self.id.0, "form state restored");
        Ok(())
    }
}
