use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use super::error::FormResult;
use super::field::{FieldId, FieldPath, FieldValue, encode_value};
use super::validation::{
    AsyncFieldValidator, AsyncValidatorEntry, FieldValidator, SyncValidatorFn,
    erase_async_validator, erase_validator,
};

/// Declarative description of one field.
///
/// Every property is optional; registering a definition for a field that is
/// already known merges only the properties set here.
pub struct FieldDefinition<V: FieldValue> {
    id: FieldId<V>,
    initial: Option<V>,
    validator: Option<SyncValidatorFn>,
    async_validator: Option<AsyncValidatorEntry>,
    dependencies: BTreeSet<FieldPath>,
    label: Option<String>,
    hint: Option<String>,
    required: Option<bool>,
    force_reset: bool,
}

impl<V: FieldValue> FieldDefinition<V> {
    pub fn new(id: &FieldId<V>) -> Self {
        Self {
            id: id.clone(),
            initial: None,
            validator: None,
            async_validator: None,
            dependencies: BTreeSet::new(),
            label: None,
            hint: None,
            required: None,
            force_reset: false,
        }
    }

    pub fn id(&self) -> &FieldId<V> {
        &self.id
    }

    pub fn initial_value(mut self, value: V) -> Self {
        self.initial = Some(value);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: FieldValidator<V>,
    {
        self.validator = Some(erase_validator(validator));
        self
    }

    pub fn async_validator<F>(self, validator: F) -> Self
    where
        F: AsyncFieldValidator<V>,
    {
        self.async_validator_with_debounce(Duration::ZERO, validator)
    }

    pub fn async_validator_with_debounce<F>(mut self, debounce: Duration, validator: F) -> Self
    where
        F: AsyncFieldValidator<V>,
    {
        self.async_validator = Some(AsyncValidatorEntry {
            debounce,
            validator: erase_async_validator(validator),
        });
        self
    }

    /// Revalidate this field whenever `source` changes.
    pub fn depends_on<W>(mut self, source: &FieldId<W>) -> Self {
        self.dependencies.insert(source.path().clone());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    /// Replace the runtime value and baseline with `initial_value` even when
    /// the field is already registered.
    pub fn force_reset(mut self) -> Self {
        self.force_reset = true;
        self
    }

    pub(crate) fn erase(self) -> FormResult<ErasedDefinition> {
        let path = self.id.path().clone();
        let initial = self
            .initial
            .as_ref()
            .map(|value| encode_value(&path, value))
            .transpose()?;
        Ok(ErasedDefinition {
            value_type: Some(self.id.value_type()),
            path,
            initial,
            validator: self.validator,
            async_validator: self.async_validator,
            dependencies: self.dependencies,
            label: self.label,
            hint: self.hint,
            required: self.required,
            force_reset: self.force_reset,
        })
    }
}

#[derive(Clone)]
pub(crate) struct ErasedDefinition {
    pub(crate) path: FieldPath,
    /// `None` for fields created from persisted state before any typed access.
    pub(crate) value_type: Option<&'static str>,
    pub(crate) initial: Option<Value>,
    pub(crate) validator: Option<SyncValidatorFn>,
    pub(crate) async_validator: Option<AsyncValidatorEntry>,
    pub(crate) dependencies: BTreeSet<FieldPath>,
    pub(crate) label: Option<String>,
    pub(crate) hint: Option<String>,
    pub(crate) required: Option<bool>,
    pub(crate) force_reset: bool,
}

impl ErasedDefinition {
    /// Definition created for a field that was written or bound before any
    /// explicit registration.
    pub(crate) fn implicit(path: FieldPath, value_type: Option<&'static str>) -> Self {
        Self {
            path,
            value_type,
            initial: None,
            validator: None,
            async_validator: None,
            dependencies: BTreeSet::new(),
            label: None,
            hint: None,
            required: None,
            force_reset: false,
        }
    }

    /// Folds the properties `incoming` sets into `self`. The initial value is
    /// only taken over by the registry, which knows the runtime state.
    pub(crate) fn merge(&mut self, incoming: ErasedDefinition) {
        if self.value_type.is_none() {
            self.value_type = incoming.value_type;
        }
        if incoming.validator.is_some() {
            self.validator = incoming.validator;
        }
        if incoming.async_validator.is_some() {
            self.async_validator = incoming.async_validator;
        }
        self.dependencies.extend(incoming.dependencies);
        if incoming.label.is_some() {
            self.label = incoming.label;
        }
        if incoming.hint.is_some() {
            self.hint = incoming.hint;
        }
        if incoming.required.is_some() {
            self.required = incoming.required;
        }
    }
}

/// Read-only metadata of a registered field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldMeta {
    pub label: Option<String>,
    pub hint: Option<String>,
    pub required: bool,
    pub dependencies: BTreeSet<FieldPath>,
    pub has_validator: bool,
    pub has_async_validator: bool,
}

impl From<&ErasedDefinition> for FieldMeta {
    fn from(definition: &ErasedDefinition) -> Self {
        Self {
            label: definition.label.clone(),
            hint: definition.hint.clone(),
            required: definition.required.unwrap_or(false),
            dependencies: definition.dependencies.clone(),
            has_validator: definition.validator.is_some(),
            has_async_validator: definition.async_validator.is_some(),
        }
    }
}
