use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::controller::{AsyncJob, FormController, ValidationTicket, read_lock};
use super::error::{FormError, FormResult};
use super::field::{FieldId, FieldPath, FieldValue, FormValues, decode_value};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ValidationStatus {
    #[default]
    Pristine,
    Valid,
    Invalid(String),
    Validating,
}

impl ValidationStatus {
    /// `Validating` counts as valid until the async validator says otherwise.
    pub fn is_valid(&self) -> bool {
        !matches!(self, ValidationStatus::Invalid(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ValidationStatus::Invalid(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_validating(&self) -> bool {
        matches!(self, ValidationStatus::Validating)
    }

    pub fn projection(&self) -> FieldValidation {
        FieldValidation {
            is_valid: self.is_valid(),
            error_message: self.error_message().map(str::to_owned),
            is_validating: self.is_validating(),
        }
    }
}

/// Persisted view of a field's validation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub is_validating: bool,
}

impl FieldValidation {
    pub(crate) fn into_status(self) -> ValidationStatus {
        if self.is_validating {
            ValidationStatus::Validating
        } else if let Some(message) = self.error_message {
            ValidationStatus::Invalid(message)
        } else if self.is_valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid(String::new())
        }
    }
}

pub trait FieldValidator<V>: Send + Sync + 'static
where
    V: FieldValue,
{
    fn validate(&self, value: &V, values: &FormValues) -> Result<(), String>;
}

impl<V, F> FieldValidator<V> for F
where
    V: FieldValue,
    F: Fn(&V, &FormValues) -> Result<(), String> + Send + Sync + 'static,
{
    fn validate(&self, value: &V, values: &FormValues) -> Result<(), String> {
        (self)(value, values)
    }
}

pub type BoxedValidationFuture =
    Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

pub trait AsyncFieldValidator<V>: Send + Sync + 'static
where
    V: FieldValue,
{
    fn validate(&self, value: V, values: FormValues) -> BoxedValidationFuture;
}

impl<V, F, Fut> AsyncFieldValidator<V> for F
where
    V: FieldValue,
    F: Fn(V, FormValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    fn validate(&self, value: V, values: FormValues) -> BoxedValidationFuture {
        Box::pin((self)(value, values))
    }
}

/// Why an erased validator rejected a value.
pub(crate) enum Rejection {
    Message(String),
    Unreadable(FormError),
}

type ErasedValidationFuture =
    Pin<Box<dyn Future<Output = Result<(), Rejection>> + Send + 'static>>;

pub(crate) type SyncValidatorFn =
    Arc<dyn Fn(&FieldPath, &Value, &FormValues) -> Result<(), Rejection> + Send + Sync>;
pub(crate) type AsyncValidatorFn =
    Arc<dyn Fn(&FieldPath, &Value, FormValues) -> ErasedValidationFuture + Send + Sync>;

#[derive(Clone)]
pub(crate) struct AsyncValidatorEntry {
    pub(crate) debounce: Duration,
    pub(crate) validator: AsyncValidatorFn,
}

pub(crate) fn erase_validator<V, F>(validator: F) -> SyncValidatorFn
where
    V: FieldValue,
    F: FieldValidator<V>,
{
    Arc::new(move |path: &FieldPath, raw: &Value, values: &FormValues| {
        let value = decode_value::<V>(path, raw).map_err(Rejection::Unreadable)?;
        validator.validate(&value, values).map_err(Rejection::Message)
    })
}

pub(crate) fn erase_async_validator<V, F>(validator: F) -> AsyncValidatorFn
where
    V: FieldValue,
    F: AsyncFieldValidator<V>,
{
    Arc::new(move |path: &FieldPath, raw: &Value, values: FormValues| {
        let future: ErasedValidationFuture = match decode_value::<V>(path, raw) {
            Ok(value) => {
                let pending = validator.validate(value, values);
                Box::pin(async move { pending.await.map_err(Rejection::Message) })
            }
            Err(error) => Box::pin(async move { Err(Rejection::Unreadable(error)) }),
        };
        future
    })
}

/// Runs a sync validator, folding panics and unreadable values into
/// `Invalid(fallback)`.
pub(crate) fn run_sync_validator(
    validator: Option<&SyncValidatorFn>,
    path: &FieldPath,
    value: &Value,
    values: &FormValues,
    fallback: &str,
) -> ValidationStatus {
    let Some(validator) = validator else {
        return ValidationStatus::Valid;
    };
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| validator(path, value, values)))
        .map_err(|_| {
            tracing::warn!(field = %path, "validator panicked; marking field invalid");
        });
    settle(outcome, path, fallback)
}

pub(crate) async fn run_async_validator(
    entry: &AsyncValidatorEntry,
    path: &FieldPath,
    value: &Value,
    values: FormValues,
    fallback: &str,
) -> ValidationStatus {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| {
        (entry.validator)(path, value, values)
    })) {
        Ok(future) => future,
        Err(_) => {
            tracing::warn!(field = %path, "async validator panicked before returning a future");
            return ValidationStatus::Invalid(fallback.to_owned());
        }
    };
    let outcome = AssertUnwindSafe(future).catch_unwind().await.map_err(|_| {
        tracing::warn!(field = %path, "async validator panicked; marking field invalid");
    });
    settle(outcome, path, fallback)
}

fn settle(
    outcome: Result<Result<(), Rejection>, ()>,
    path: &FieldPath,
    fallback: &str,
) -> ValidationStatus {
    match outcome {
        Ok(Ok(())) => ValidationStatus::Valid,
        Ok(Err(Rejection::Message(message))) => ValidationStatus::Invalid(message),
        Ok(Err(Rejection::Unreadable(error))) => {
            tracing::warn!(field = %path, %error, "validator could not read field value");
            ValidationStatus::Invalid(fallback.to_owned())
        }
        Err(()) => ValidationStatus::Invalid(fallback.to_owned()),
    }
}

impl FormController {
    /// Runs the field's sync validator and, when it passes, its async
    /// validator on the spawner. Returns the field's validity afterwards.
    pub fn validate_field<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        let jobs = self.revalidate(id.path(), self.spawner.is_some())?;
        self.schedule(jobs);
        self.is_field_valid(id)
    }

    pub async fn validate_field_async<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        let jobs = self.revalidate(id.path(), true)?;
        self.run_jobs(jobs).await?;
        self.is_field_valid(id)
    }

    pub fn validate_form(&self) -> FormResult<bool> {
        let paths = self.prepare_form_validation()?;
        let mut jobs = Vec::new();
        for path in &paths {
            jobs.extend(self.revalidate(path, self.spawner.is_some())?);
        }
        self.schedule(jobs);
        self.is_valid()
    }

    pub async fn validate_form_async(&self) -> FormResult<bool> {
        let paths = self.prepare_form_validation()?;
        let mut jobs = Vec::new();
        for path in &paths {
            jobs.extend(self.revalidate(path, true)?);
        }
        self.run_jobs(jobs).await?;
        self.is_valid()
    }

    fn prepare_form_validation(&self) -> FormResult<Vec<FieldPath>> {
        self.mutate("preparing form validation", |store| {
            let paths = store.registry.paths();
            store.interacted.extend(paths.iter().cloned());
            Ok(paths)
        })
    }

    /// Validates `path` against its current value. The sync validator runs
    /// with no lock held; its result is dropped when the field was written in
    /// the meantime.
    pub(super) fn revalidate(
        &self,
        path: &FieldPath,
        async_work: bool,
    ) -> FormResult<Vec<AsyncJob>> {
        let (validator, async_entry, value, values, revision) = {
            let store = read_lock(&self.store, "reading validation inputs")?;
            let (Some(definition), Some(state)) = (store.registry.definition(path), store.field(path))
            else {
                return Ok(Vec::new());
            };
            (
                definition.validator.clone(),
                definition.async_validator.clone(),
                state.value.clone(),
                store.values(),
                store.revision(path),
            )
        };

        let status = run_sync_validator(
            validator.as_ref(),
            path,
            &value,
            &values,
            &self.options.validator_fallback_message,
        );

        self.mutate("applying validation result", |store| {
            if store.revision(path) != revision || !store.registry.contains(path) {
                tracing::trace!(field = %path, "discarding stale validation result");
                return Ok(Vec::new());
            }
            match async_entry {
                Some(entry) if status.is_valid() && async_work => {
                    let ticket = store.issue_ticket(path);
                    store.set_status(path, ValidationStatus::Validating);
                    Ok(vec![AsyncJob::Validate {
                        path: path.clone(),
                        ticket,
                        entry,
                        value,
                        values,
                    }])
                }
                _ => {
                    let _ = store.issue_ticket(path);
                    store.set_status(path, status);
                    Ok(Vec::new())
                }
            }
        })
    }

    pub(super) fn revalidate_dependents(
        &self,
        source: &FieldPath,
        async_work: bool,
    ) -> FormResult<Vec<AsyncJob>> {
        let dependents = {
            let store = read_lock(&self.store, "collecting dependent fields")?;
            store
                .registry
                .dependents_of(source)
                .into_iter()
                .filter(|dependent| {
                    if !store.registry.contains(dependent) {
                        tracing::warn!(field = %dependent, %source, "dependent field is no longer registered");
                        return false;
                    }
                    store.should_autovalidate(dependent, self.options.autovalidate)
                })
                .collect::<Vec<_>>()
        };

        let mut jobs = Vec::new();
        for dependent in &dependents {
            jobs.extend(self.revalidate(dependent, async_work)?);
        }
        Ok(jobs)
    }

    pub(super) async fn run_async_validation(
        &self,
        path: FieldPath,
        ticket: ValidationTicket,
        entry: AsyncValidatorEntry,
        value: Value,
        values: FormValues,
    ) -> FormResult<()> {
        if !entry.debounce.is_zero() {
            Delay::new(entry.debounce).await;
            if !self.is_latest_ticket(&path, ticket)? {
                tracing::trace!(field = %path, ticket = ticket.0, "async validation superseded during debounce");
                return Ok(());
            }
        }

        let status = run_async_validator(
            &entry,
            &path,
            &value,
            values,
            &self.options.validator_fallback_message,
        )
        .await;

        self.mutate("applying async validation result", |store| {
            if !store.is_latest_ticket(&path, ticket) {
                tracing::trace!(field = %path, ticket = ticket.0, "discarding stale async validation result");
                return Ok(());
            }
            store.set_status(&path, status);
            Ok(())
        })
    }

    fn is_latest_ticket(&self, path: &FieldPath, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(read_lock(&self.store, "checking validation ticket")?.is_latest_ticket(path, ticket))
    }
}
