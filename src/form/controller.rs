use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::task::{Spawn, SpawnExt};
use serde_json::Value;

use super::definition::{FieldDefinition, FieldMeta};
use super::error::{FormError, FormResult};
use super::field::{FieldId, FieldPath, FieldValue, FormValues, decode_value, encode_value};
use super::options::{AutovalidateMode, FormOptions};
use super::propagation::{DerivationId, DerivationTable};
use super::registry::Registration;
use super::store::{FieldState, FormStore};
use super::subscription::{
    FieldAspect, FormAspect, Listener, ListenerTable, Subscription, Topic, dispatch,
};
use super::validation::{AsyncValidatorEntry, FieldValidation, ValidationStatus};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

impl SubmitState {
    pub fn is_active(self) -> bool {
        matches!(self, SubmitState::Validating | SubmitState::Submitting)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    Invalid,
}

/// One page of a multi-step form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormStep {
    name: String,
    fields: Vec<FieldPath>,
}

impl FormStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field<V>(mut self, id: &FieldId<V>) -> Self {
        self.fields.push(id.path().clone());
        self
    }

    pub fn path(mut self, path: impl Into<FieldPath>) -> Self {
        self.fields.push(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldPath] {
        &self.fields
    }
}

pub type FormErrors = BTreeMap<FieldPath, String>;

#[derive(Clone, Debug)]
pub struct FormSnapshot {
    pub fields: BTreeMap<FieldPath, FieldState>,
    pub is_valid: bool,
    pub is_dirty: bool,
    pub is_pending: bool,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub reset_count: u64,
    pub current_step: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum WriteOrigin {
    User,
    Derived,
}

/// Deferred async work produced by a write. Run inline by the `*_async`
/// entry points or handed to the spawner.
pub(super) enum AsyncJob {
    Validate {
        path: FieldPath,
        ticket: ValidationTicket,
        entry: AsyncValidatorEntry,
        value: Value,
        values: FormValues,
    },
    Derive {
        id: DerivationId,
        ticket: u64,
        source_value: Value,
        depth: usize,
    },
}

pub(super) type SharedSpawner = Arc<dyn Spawn + Send + Sync>;

/// Handle to one form. Clones share the same state.
#[derive(Clone)]
pub struct FormController {
    pub(super) id: FormId,
    pub(super) options: Arc<FormOptions>,
    pub(super) store: Arc<RwLock<FormStore>>,
    pub(super) listeners: Arc<RwLock<ListenerTable>>,
    pub(super) derivations: Arc<RwLock<DerivationTable>>,
    pub(super) spawner: Option<SharedSpawner>,
}

impl Default for FormController {
    fn default() -> Self {
        Self::new(FormOptions::default())
    }
}

impl std::fmt::Debug for FormController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormController")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("spawner", &self.spawner.is_some())
            .finish_non_exhaustive()
    }
}

impl FormController {
    pub fn new(options: FormOptions) -> Self {
        Self {
            id: FormId::next(),
            options: Arc::new(options),
            store: Arc::new(RwLock::new(FormStore::new())),
            listeners: Arc::new(RwLock::new(ListenerTable::default())),
            derivations: Arc::new(RwLock::new(DerivationTable::default())),
            spawner: None,
        }
    }

    /// Background executor for async validators and derivations started by
    /// the synchronous write paths. Without one, that work waits for the next
    /// `*_async` call.
    pub fn with_spawner<S>(mut self, spawner: S) -> Self
    where
        S: Spawn + Send + Sync + 'static,
    {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    pub fn form_id(&self) -> FormId {
        self.id
    }

    pub fn options(&self) -> &FormOptions {
        &self.options
    }

    pub fn register<V: FieldValue>(&self, definition: FieldDefinition<V>) -> FormResult<()> {
        let erased = definition.erase()?;
        let path = erased.path.clone();
        let registration = self.mutate("registering field", |store| store.register(erased))?;
        tracing::debug!(field = %path, ?registration, "field registered");

        let async_work = self.spawner.is_some();
        let mut jobs = Vec::new();
        match registration {
            Registration::Created | Registration::Reset => {
                if self.options.autovalidate == AutovalidateMode::Always {
                    jobs.extend(self.revalidate(&path, async_work)?);
                }
            }
            Registration::Merged {
                value_changed,
                validators_changed,
            } => {
                let autovalidate = read_lock(&self.store, "reading autovalidate state")?
                    .should_autovalidate(&path, self.options.autovalidate);
                if autovalidate && (value_changed || validators_changed) {
                    jobs.extend(self.revalidate(&path, async_work)?);
                }
                if value_changed {
                    jobs.extend(self.revalidate_dependents(&path, async_work)?);
                    jobs.extend(self.propagate(&path, 0, async_work)?);
                }
            }
            Registration::Restored => {}
        }
        self.schedule(jobs);
        Ok(())
    }

    /// Returns whether the field was registered.
    pub fn unregister<V>(&self, id: &FieldId<V>, preserve_state: bool) -> FormResult<bool> {
        let path = id.path();
        let existed = self.mutate("unregistering field", |store| {
            Ok(store.unregister(path, preserve_state))
        })?;
        tracing::debug!(field = %path, preserve_state, existed, "field unregistered");
        Ok(existed)
    }

    pub fn is_registered(&self, path: &FieldPath) -> FormResult<bool> {
        Ok(read_lock(&self.store, "checking field registration")?
            .registry
            .contains(path))
    }

    pub fn set_value<V: FieldValue>(&self, id: &FieldId<V>, value: V) -> FormResult<()> {
        let raw = encode_value(id.path(), &value)?;
        let jobs = self.write(
            id.path(),
            raw,
            WriteOrigin::User,
            Some(id.value_type()),
            0,
            self.spawner.is_some(),
        )?;
        self.schedule(jobs);
        Ok(())
    }

    /// Like [`set_value`](Self::set_value), awaiting the async validation and
    /// derivations the write starts.
    pub async fn set_value_async<V: FieldValue>(&self, id: &FieldId<V>, value: V) -> FormResult<()> {
        let raw = encode_value(id.path(), &value)?;
        let jobs = self.write(
            id.path(),
            raw,
            WriteOrigin::User,
            Some(id.value_type()),
            0,
            true,
        )?;
        self.run_jobs(jobs).await
    }

    /// `Ok(None)` when the field is unknown or holds `null`.
    pub fn get_value<V: FieldValue>(&self, id: &FieldId<V>) -> FormResult<Option<V>> {
        let store = read_lock(&self.store, "reading field value")?;
        store.registry.check_type(id.path(), id.value_type())?;
        match store.field(id.path()) {
            Some(state) if !state.value.is_null() => decode_value(id.path(), &state.value).map(Some),
            _ => Ok(None),
        }
    }

    pub fn raw_value(&self, path: &FieldPath) -> FormResult<Option<Value>> {
        Ok(read_lock(&self.store, "reading raw field value")?
            .field(path)
            .map(|state| state.value.clone()))
    }

    pub fn mark_touched<V>(&self, id: &FieldId<V>) -> FormResult<()> {
        let path = id.path();
        let needs_validation = self.mutate("touching field", |store| {
            store.ensure_field(path, Some(id.value_type()))?;
            store.interacted.insert(path.clone());
            let Some(state) = store.field_mut(path) else {
                return Ok(false);
            };
            state.touched = true;
            Ok(state.validation == ValidationStatus::Pristine)
        })?;

        if needs_validation && self.options.autovalidate == AutovalidateMode::OnInteraction {
            let jobs = self.revalidate(path, self.spawner.is_some())?;
            self.schedule(jobs);
        }
        Ok(())
    }

    pub fn validation<V>(&self, id: &FieldId<V>) -> FormResult<Option<FieldValidation>> {
        self.read_field(id.path(), |state| state.validation.projection())
    }

    pub fn validation_status<V>(&self, id: &FieldId<V>) -> FormResult<Option<ValidationStatus>> {
        self.read_field(id.path(), |state| state.validation.clone())
    }

    pub fn is_field_valid<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        Ok(self
            .read_field(id.path(), |state| state.validation.is_valid())?
            .unwrap_or(true))
    }

    pub fn is_dirty<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        Ok(self
            .read_field(id.path(), |state| state.dirty)?
            .unwrap_or(false))
    }

    pub fn is_touched<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        Ok(self
            .read_field(id.path(), |state| state.touched)?
            .unwrap_or(false))
    }

    pub fn is_pending<V>(&self, id: &FieldId<V>) -> FormResult<bool> {
        Ok(self
            .read_field(id.path(), |state| state.pending)?
            .unwrap_or(false))
    }

    pub fn field_state(&self, path: &FieldPath) -> FormResult<Option<FieldState>> {
        self.read_field(path, FieldState::clone)
    }

    pub fn field_meta<V>(&self, id: &FieldId<V>) -> FormResult<Option<FieldMeta>> {
        Ok(read_lock(&self.store, "reading field meta")?
            .registry
            .definition(id.path())
            .map(FieldMeta::from))
    }

    pub fn values(&self) -> FormResult<FormValues> {
        Ok(read_lock(&self.store, "reading form values")?.values())
    }

    pub fn errors(&self) -> FormResult<FormErrors> {
        let store = read_lock(&self.store, "collecting field errors")?;
        Ok(store
            .fields
            .iter()
            .filter_map(|(path, state)| {
                state
                    .validation
                    .error_message()
                    .map(|message| (path.clone(), message.to_owned()))
            })
            .collect())
    }

    /// The field's error once it has been touched or the form submitted.
    pub fn field_error_for_display<V>(&self, id: &FieldId<V>) -> FormResult<Option<String>> {
        let store = read_lock(&self.store, "reading display error message")?;
        let Some(state) = store.field(id.path()) else {
            return Ok(None);
        };
        if !state.touched && store.submit_count == 0 {
            return Ok(None);
        }
        Ok(state.validation.error_message().map(str::to_owned))
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.store, "reading form validity")?.is_valid())
    }

    pub fn is_form_dirty(&self) -> FormResult<bool> {
        Ok(read_lock(&self.store, "reading form dirtiness")?
            .fields
            .values()
            .any(|state| state.dirty))
    }

    pub fn is_form_pending(&self) -> FormResult<bool> {
        Ok(read_lock(&self.store, "reading form pending state")?
            .fields
            .values()
            .any(|state| state.pending))
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.store, "reading submit state")?
            .submit_state
            .is_active())
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        let store = read_lock(&self.store, "creating form snapshot")?;
        Ok(FormSnapshot {
            fields: store.fields.clone(),
            is_valid: store.is_valid(),
            is_dirty: store.fields.values().any(|state| state.dirty),
            is_pending: store.fields.values().any(|state| state.pending),
            submit_state: store.submit_state,
            submit_count: store.submit_count,
            reset_count: store.reset_count,
            current_step: store.current_step,
        })
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        listener: impl Fn(&Topic) + Send + Sync + 'static,
    ) -> FormResult<Subscription> {
        self.subscribe_shared(topic, Arc::new(listener))
    }

    pub fn subscribe_field<V>(
        &self,
        id: &FieldId<V>,
        aspect: FieldAspect,
        listener: impl Fn(&Topic) + Send + Sync + 'static,
    ) -> FormResult<Subscription> {
        self.subscribe(Topic::Field(id.path().clone(), aspect), listener)
    }

    pub fn subscribe_form(
        &self,
        aspect: FormAspect,
        listener: impl Fn(&Topic) + Send + Sync + 'static,
    ) -> FormResult<Subscription> {
        self.subscribe(Topic::Form(aspect), listener)
    }

    pub(super) fn subscribe_shared(
        &self,
        topic: Topic,
        listener: Listener,
    ) -> FormResult<Subscription> {
        let id = write_lock(&self.listeners, "subscribing listener")?.insert(topic.clone(), listener);
        Ok(Subscription::new(&self.listeners, topic, id))
    }

    pub fn listener_count(&self) -> FormResult<usize> {
        Ok(read_lock(&self.listeners, "counting listeners")?.len())
    }

    pub fn reset(&self) -> FormResult<()> {
        let paths = self.mutate("resetting form", |store| {
            store.reset_all();
            Ok(store.registry.paths())
        })?;
        write_lock(&self.derivations, "invalidating derivations on reset")?.invalidate_all();
        tracing::debug!(form = self.id.0, "form reset");

        if self.options.autovalidate == AutovalidateMode::Always {
            let mut jobs = Vec::new();
            for path in &paths {
                jobs.extend(self.revalidate(path, self.spawner.is_some())?);
            }
            self.schedule(jobs);
        }
        Ok(())
    }

    pub fn reset_field<V>(&self, id: &FieldId<V>) -> FormResult<()> {
        let path = id.path();
        self.mutate("resetting field", |store| {
            store.reset_field(path);
            Ok(())
        })?;
        if self.options.autovalidate == AutovalidateMode::Always {
            let jobs = self.revalidate(path, self.spawner.is_some())?;
            self.schedule(jobs);
        }
        Ok(())
    }

    pub fn define_steps(&self, steps: Vec<FormStep>) -> FormResult<()> {
        self.mutate("defining form steps", |store| {
            store.steps = steps;
            if store.current_step >= store.steps.len() {
                store.current_step = 0;
            }
            Ok(())
        })
    }

    pub fn steps(&self) -> FormResult<Vec<FormStep>> {
        Ok(read_lock(&self.store, "reading form steps")?.steps.clone())
    }

    pub fn current_step(&self) -> FormResult<usize> {
        Ok(read_lock(&self.store, "reading current step")?.current_step)
    }

    pub fn go_to_step(&self, index: usize) -> FormResult<()> {
        self.mutate("changing step", |store| {
            let count = store.steps.len();
            if index >= count {
                return Err(FormError::StepOutOfRange { index, count });
            }
            store.current_step = index;
            Ok(())
        })
    }

    pub fn previous_step(&self) -> FormResult<bool> {
        self.mutate("moving to previous step", |store| {
            if store.current_step == 0 {
                return Ok(false);
            }
            store.current_step -= 1;
            Ok(true)
        })
    }

    /// Validates the current step and advances when it is valid. Returns
    /// false on the last step or when the step has errors.
    pub fn next_step(&self) -> FormResult<bool> {
        let (current, fields) = self.current_step_fields()?;
        let mut jobs = Vec::new();
        for path in &fields {
            jobs.extend(self.revalidate(path, self.spawner.is_some())?);
        }
        self.schedule(jobs);
        self.advance_from(current, &fields)
    }

    pub async fn next_step_async(&self) -> FormResult<bool> {
        let (current, fields) = self.current_step_fields()?;
        let mut jobs = Vec::new();
        for path in &fields {
            jobs.extend(self.revalidate(path, true)?);
        }
        self.run_jobs(jobs).await?;
        self.advance_from(current, &fields)
    }

    fn current_step_fields(&self) -> FormResult<(usize, Vec<FieldPath>)> {
        self.mutate("preparing step validation", |store| {
            let count = store.steps.len();
            let current = store.current_step;
            let Some(step) = store.steps.get(current) else {
                return Err(FormError::StepOutOfRange {
                    index: current,
                    count,
                });
            };
            let fields = step
                .fields()
                .iter()
                .filter(|path| store.registry.contains(path))
                .cloned()
                .collect::<Vec<_>>();
            store.interacted.extend(fields.iter().cloned());
            Ok((current, fields))
        })
    }

    fn advance_from(&self, current: usize, fields: &[FieldPath]) -> FormResult<bool> {
        self.mutate("advancing step", |store| {
            let valid = fields.iter().all(|path| {
                store
                    .field(path)
                    .is_none_or(|state| state.validation.is_valid())
            });
            if !valid || store.current_step != current || current + 1 >= store.steps.len() {
                return Ok(false);
            }
            store.current_step = current + 1;
            Ok(true)
        })
    }

    /// Validates every field, then awaits `on_valid` with the current values
    /// or `on_error` with the field errors.
    pub async fn submit<OnValid, ValidFut, OnError, ErrorFut>(
        &self,
        on_valid: OnValid,
        on_error: OnError,
    ) -> FormResult<SubmitOutcome>
    where
        OnValid: FnOnce(FormValues) -> ValidFut,
        ValidFut: Future<Output = FormResult<()>>,
        OnError: FnOnce(FormErrors) -> ErrorFut,
        ErrorFut: Future<Output = ()>,
    {
        self.mutate("preparing submit", |store| {
            if store.submit_in_flight {
                return Err(FormError::AlreadySubmitting);
            }
            if store.submit_state.is_active() {
                tracing::debug!(state = ?store.submit_state, "no submit running; settling stale submit state");
                store.submit_state = SubmitState::Failed;
            }
            transition_submit_state(store, SubmitState::Validating)?;
            store.submit_in_flight = true;
            store.submit_count = store.submit_count.saturating_add(1);
            Ok(())
        })?;
        let _settle = scopeguard::guard(self.clone(), |form| form.end_submit());

        if !self.validate_form_async().await? {
            let errors = self.errors()?;
            on_error(errors).await;
            self.mutate("handling submit validation failure", |store| {
                transition_submit_state(store, SubmitState::Failed)
            })?;
            return Ok(SubmitOutcome::Invalid);
        }

        let values = self.mutate("moving submit state to submitting", |store| {
            transition_submit_state(store, SubmitState::Submitting)?;
            Ok(store.values())
        })?;
        let result = on_valid(values).await;
        let next = if result.is_ok() {
            SubmitState::Succeeded
        } else {
            SubmitState::Failed
        };
        self.mutate("completing submit", |store| {
            transition_submit_state(store, next)
        })?;
        result.map(|()| SubmitOutcome::Submitted)
    }

    fn end_submit(&self) {
        let result = self.mutate("ending submit", |store| {
            store.submit_in_flight = false;
            if store.submit_state.is_active() {
                tracing::warn!("submit ended before completing; marking it failed");
                store.submit_state = SubmitState::Failed;
            }
            Ok(())
        });
        if let Err(error) = result {
            tracing::error!(%error, "failed to settle submit state");
        }
    }

    /// Applies `value` to `path` and everything that follows from it:
    /// validation, dependent revalidation and derivations.
    pub(super) fn write(
        &self,
        path: &FieldPath,
        value: Value,
        origin: WriteOrigin,
        value_type: Option<&'static str>,
        depth: usize,
        async_work: bool,
    ) -> FormResult<Vec<AsyncJob>> {
        let changed = self.mutate("writing field value", |store| {
            store.ensure_field(path, value_type)?;
            if origin == WriteOrigin::User {
                store.interacted.insert(path.clone());
            }
            Ok(store.apply_write(path, value))
        })?;
        if !changed {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let autovalidate = read_lock(&self.store, "reading autovalidate state")?
            .should_autovalidate(path, self.options.autovalidate);
        if autovalidate {
            jobs.extend(self.revalidate(path, async_work)?);
        }
        jobs.extend(self.revalidate_dependents(path, async_work)?);
        jobs.extend(self.propagate(path, depth, async_work)?);
        Ok(jobs)
    }

    pub(super) fn schedule(&self, jobs: Vec<AsyncJob>) {
        if jobs.is_empty() {
            return;
        }
        let Some(spawner) = self.spawner.as_ref() else {
            tracing::debug!(count = jobs.len(), "no spawner configured; dropping async form work");
            return;
        };
        for job in jobs {
            let task = self.run_job(job);
            let spawned = spawner.spawn(async move {
                if let Err(error) = task.await {
                    tracing::warn!(%error, "background form task failed");
                }
            });
            if let Err(error) = spawned {
                tracing::warn!(%error, "failed to spawn async form work");
            }
        }
    }

    pub(super) fn run_job(&self, job: AsyncJob) -> BoxFuture<'static, FormResult<()>> {
        let form = self.clone();
        async move {
            match job {
                AsyncJob::Validate {
                    path,
                    ticket,
                    entry,
                    value,
                    values,
                } => {
                    form.run_async_validation(path, ticket, entry, value, values)
                        .await
                }
                AsyncJob::Derive {
                    id,
                    ticket,
                    source_value,
                    depth,
                } => {
                    form.run_async_derivation(id, ticket, source_value, depth)
                        .await
                }
            }
        }
        .boxed()
    }

    pub(super) async fn run_jobs(&self, jobs: Vec<AsyncJob>) -> FormResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let tasks = jobs.into_iter().map(|job| self.run_job(job));
        futures::future::join_all(tasks)
            .await
            .into_iter()
            .collect()
    }

    /// Runs `apply` against the store under the write lock and notifies the
    /// listeners of every topic it changed once the lock is released.
    pub(super) fn mutate<R>(
        &self,
        context: &'static str,
        apply: impl FnOnce(&mut FormStore) -> FormResult<R>,
    ) -> FormResult<R> {
        let (result, topics) = {
            let mut store = write_lock(&self.store, context)?;
            store.begin();
            let result = apply(&mut store);
            (result, store.commit())
        };
        self.notify(&topics);
        result
    }

    fn notify(&self, topics: &[Topic]) {
        if topics.is_empty() {
            return;
        }
        let listeners = match self.listeners.read() {
            Ok(table) => table.collect(topics),
            Err(poisoned) => poisoned.into_inner().collect(topics),
        };
        dispatch(listeners);
    }

    fn read_field<R>(
        &self,
        path: &FieldPath,
        read: impl FnOnce(&FieldState) -> R,
    ) -> FormResult<Option<R>> {
        Ok(read_lock(&self.store, "reading field state")?
            .field(path)
            .map(read))
    }
}

pub(super) fn transition_submit_state(
    store: &mut FormStore,
    next: SubmitState,
) -> FormResult<()> {
    let current = store.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    store.submit_state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
