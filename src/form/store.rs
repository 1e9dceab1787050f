use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::controller::{FormStep, SubmitState, ValidationTicket};
use super::field::{FieldPath, FormValues};
use super::options::AutovalidateMode;
use super::propagation::DerivationId;
use super::registry::FieldRegistry;
use super::subscription::{FieldAspect, FormAspect, Topic};
use super::validation::ValidationStatus;

#[derive(Clone, Debug, PartialEq)]
pub struct FieldState {
    pub value: Value,
    /// Baseline captured when the field was registered.
    pub initial: Value,
    pub validation: ValidationStatus,
    pub dirty: bool,
    pub touched: bool,
    pub pending: bool,
}

impl FieldState {
    pub(crate) fn new(initial: Value) -> Self {
        Self {
            value: initial.clone(),
            initial,
            validation: ValidationStatus::Pristine,
            dirty: false,
            touched: false,
            pending: false,
        }
    }

    pub(crate) fn rebase(&mut self, initial: Value) {
        if !self.dirty {
            self.value = initial.clone();
        }
        self.initial = initial;
        self.dirty = self.value != self.initial;
    }

    fn diff(path: &FieldPath, before: Option<&FieldState>, after: Option<&FieldState>) -> Vec<Topic> {
        let changed = |aspect: FieldAspect| match (before, after) {
            (None, None) => false,
            (Some(_), None) | (None, Some(_)) => true,
            (Some(old), Some(new)) => match aspect {
                FieldAspect::Value => old.value != new.value,
                FieldAspect::Validation => old.validation != new.validation,
                FieldAspect::Dirty => old.dirty != new.dirty,
                FieldAspect::Touched => old.touched != new.touched,
                FieldAspect::Pending => old.pending != new.pending,
            },
        };
        FieldAspect::ALL
            .into_iter()
            .filter(|aspect| changed(*aspect))
            .map(|aspect| Topic::Field(path.clone(), aspect))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FormAggregate {
    valid: bool,
    dirty: bool,
    pending: bool,
    submitting: bool,
    step: usize,
    reset_count: u64,
}

impl FormAggregate {
    fn diff(&self, after: &FormAggregate) -> Vec<Topic> {
        [
            (self.valid != after.valid, FormAspect::Valid),
            (self.dirty != after.dirty, FormAspect::Dirty),
            (self.pending != after.pending, FormAspect::Pending),
            (self.submitting != after.submitting, FormAspect::Submitting),
            (self.step != after.step, FormAspect::Step),
            (self.reset_count != after.reset_count, FormAspect::Reset),
        ]
        .into_iter()
        .filter_map(|(changed, aspect)| changed.then_some(Topic::Form(aspect)))
        .collect()
    }
}

/// Pre-mutation copies of everything a mutation touched.
struct Journal {
    fields: BTreeMap<FieldPath, Option<FieldState>>,
    aggregate: FormAggregate,
}

pub(crate) struct FormStore {
    pub(crate) fields: BTreeMap<FieldPath, FieldState>,
    pub(crate) registry: FieldRegistry,
    pub(crate) submit_state: SubmitState,
    pub(crate) submit_count: u32,
    /// A `submit` call of this controller is running. A submitting state
    /// restored from persistence has no call behind it.
    pub(crate) submit_in_flight: bool,
    pub(crate) reset_count: u64,
    pub(crate) current_step: usize,
    pub(crate) steps: Vec<FormStep>,
    /// Fields the user changed or touched since the last reset.
    pub(crate) interacted: BTreeSet<FieldPath>,
    next_ticket: u64,
    tickets: BTreeMap<FieldPath, ValidationTicket>,
    revisions: BTreeMap<FieldPath, u64>,
    deriving: BTreeMap<FieldPath, BTreeMap<DerivationId, u64>>,
    journal: Option<Journal>,
}

impl FormStore {
    pub(crate) fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            registry: FieldRegistry::default(),
            submit_state: SubmitState::Idle,
            submit_count: 0,
            submit_in_flight: false,
            reset_count: 0,
            current_step: 0,
            steps: Vec::new(),
            interacted: BTreeSet::new(),
            next_ticket: 0,
            tickets: BTreeMap::new(),
            revisions: BTreeMap::new(),
            deriving: BTreeMap::new(),
            journal: None,
        }
    }

    pub(crate) fn begin(&mut self) {
        if self.journal.is_none() {
            self.journal = Some(Journal {
                fields: BTreeMap::new(),
                aggregate: self.aggregate(),
            });
        }
    }

    /// Closes the journal and returns the topics whose state changed.
    pub(crate) fn commit(&mut self) -> Vec<Topic> {
        let Some(journal) = self.journal.take() else {
            return Vec::new();
        };
        let mut topics = Vec::new();
        for (path, before) in &journal.fields {
            topics.extend(FieldState::diff(
                path,
                before.as_ref(),
                self.fields.get(path),
            ));
        }
        topics.extend(journal.aggregate.diff(&self.aggregate()));
        topics
    }

    fn record(&mut self, path: &FieldPath) {
        if let Some(journal) = self.journal.as_mut() {
            journal
                .fields
                .entry(path.clone())
                .or_insert_with(|| self.fields.get(path).cloned());
        }
    }

    pub(crate) fn field(&self, path: &FieldPath) -> Option<&FieldState> {
        self.fields.get(path)
    }

    pub(crate) fn field_mut(&mut self, path: &FieldPath) -> Option<&mut FieldState> {
        self.record(path);
        self.fields.get_mut(path)
    }

    pub(crate) fn insert_field(&mut self, path: FieldPath, state: FieldState) {
        self.record(&path);
        self.fields.insert(path, state);
    }

    pub(crate) fn remove_field(&mut self, path: &FieldPath) -> Option<FieldState> {
        self.record(path);
        self.fields.remove(path)
    }

    pub(crate) fn aggregate(&self) -> FormAggregate {
        FormAggregate {
            valid: self.is_valid(),
            dirty: self.fields.values().any(|state| state.dirty),
            pending: self.fields.values().any(|state| state.pending),
            submitting: self.submit_state.is_active(),
            step: self.current_step,
            reset_count: self.reset_count,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.fields
            .values()
            .all(|state| state.validation.is_valid())
    }

    pub(crate) fn values(&self) -> FormValues {
        FormValues::from_map(
            self.fields
                .iter()
                .map(|(path, state)| (path.clone(), state.value.clone()))
                .collect(),
        )
    }

    pub(crate) fn should_autovalidate(&self, path: &FieldPath, mode: AutovalidateMode) -> bool {
        match mode {
            AutovalidateMode::Always => true,
            AutovalidateMode::OnInteraction => self.interacted.contains(path),
            AutovalidateMode::Never => false,
        }
    }

    /// Writes `value`; returns false when it equals the current value.
    pub(crate) fn apply_write(&mut self, path: &FieldPath, value: Value) -> bool {
        let unchanged = self
            .fields
            .get(path)
            .is_none_or(|state| state.value == value);
        if unchanged {
            return false;
        }
        self.invalidate(path);
        if let Some(state) = self.field_mut(path) {
            state.dirty = value != state.initial;
            state.value = value;
            if state.validation.is_validating() {
                state.validation = ValidationStatus::Pristine;
            }
        }
        self.refresh_pending(path);
        true
    }

    pub(crate) fn set_status(&mut self, path: &FieldPath, status: ValidationStatus) {
        if let Some(state) = self.field_mut(path) {
            state.validation = status;
        }
        self.refresh_pending(path);
    }

    pub(crate) fn refresh_pending(&mut self, path: &FieldPath) {
        let deriving = self
            .deriving
            .get(path)
            .is_some_and(|derivations| !derivations.is_empty());
        let Some(current) = self.fields.get(path) else {
            return;
        };
        let pending = deriving || current.validation.is_validating();
        if current.pending == pending {
            return;
        }
        if let Some(state) = self.field_mut(path) {
            state.pending = pending;
        }
    }

    fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    pub(crate) fn issue_ticket(&mut self, path: &FieldPath) -> ValidationTicket {
        let ticket = ValidationTicket(self.next_ticket());
        self.tickets.insert(path.clone(), ticket);
        ticket
    }

    pub(crate) fn is_latest_ticket(&self, path: &FieldPath, ticket: ValidationTicket) -> bool {
        self.tickets.get(path).copied() == Some(ticket)
    }

    /// Supersedes in-flight async validation of `path` and any sync
    /// validation computed against its previous value.
    pub(crate) fn invalidate(&mut self, path: &FieldPath) {
        let _ = self.issue_ticket(path);
        let revision = self.next_ticket();
        self.revisions.insert(path.clone(), revision);
    }

    pub(crate) fn revision(&self, path: &FieldPath) -> u64 {
        self.revisions.get(path).copied().unwrap_or(0)
    }

    /// Marks `target` pending for an async derivation. Returns false when the
    /// target is not registered.
    pub(crate) fn begin_derivation(
        &mut self,
        target: &FieldPath,
        id: DerivationId,
        ticket: u64,
    ) -> bool {
        if !self.fields.contains_key(target) {
            return false;
        }
        self.deriving
            .entry(target.clone())
            .or_default()
            .insert(id, ticket);
        self.refresh_pending(target);
        true
    }

    pub(crate) fn end_derivation(&mut self, target: &FieldPath, id: DerivationId, ticket: u64) {
        let Some(derivations) = self.deriving.get_mut(target) else {
            return;
        };
        if derivations.get(&id).copied() == Some(ticket) {
            derivations.remove(&id);
        }
        if derivations.is_empty() {
            self.deriving.remove(target);
        }
        self.refresh_pending(target);
    }

    pub(crate) fn forget_derivations(&mut self, target: &FieldPath) {
        self.deriving.remove(target);
    }

    pub(crate) fn reset_all(&mut self) {
        let paths = self.fields.keys().cloned().collect::<Vec<_>>();
        for path in &paths {
            self.invalidate(path);
            if let Some(state) = self.field_mut(path) {
                *state = FieldState::new(state.initial.clone());
            }
        }
        self.deriving.clear();
        self.interacted.clear();
        self.registry.clear_preserved();
        self.submit_state = SubmitState::Idle;
        self.current_step = 0;
        self.reset_count = self.reset_count.saturating_add(1);
    }

    pub(crate) fn reset_field(&mut self, path: &FieldPath) {
        self.invalidate(path);
        self.deriving.remove(path);
        self.interacted.remove(path);
        if let Some(state) = self.field_mut(path) {
            *state = FieldState::new(state.initial.clone());
        }
    }
}
