use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures_timer::Delay;
use serde_json::Value;

use super::controller::{AsyncJob, FormController, WriteOrigin, read_lock, write_lock};
use super::error::FormResult;
use super::field::{FieldId, FieldPath, FieldValue, FormValues};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DerivationId(u64);

type SyncDeriveFn = Arc<dyn Fn(&FormValues) -> Result<Value, String> + Send + Sync>;
type AsyncDeriveFn =
    Arc<dyn Fn(FormValues) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Clone)]
enum Compute {
    Sync(SyncDeriveFn),
    Async {
        debounce: Duration,
        compute: AsyncDeriveFn,
    },
}

#[derive(Clone)]
pub(crate) struct DerivationEntry {
    source: FieldPath,
    target: FieldPath,
    target_type: &'static str,
    resets: Vec<(FieldPath, &'static str)>,
    compute: Compute,
}

fn encode_derived<T: FieldValue>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|error| error.to_string())
}

/// Keeps `target` computed from the form values whenever `source` changes.
pub struct Derivation<T> {
    entry: DerivationEntry,
    marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FieldValue> Derivation<T> {
    pub fn new<S, F>(source: &FieldId<S>, target: &FieldId<T>, compute: F) -> Self
    where
        F: Fn(&FormValues) -> Result<T, String> + Send + Sync + 'static,
    {
        let compute: SyncDeriveFn = Arc::new(move |values: &FormValues| compute(values).and_then(encode_derived));
        Self {
            entry: DerivationEntry {
                source: source.path().clone(),
                target: target.path().clone(),
                target_type: target.value_type(),
                resets: Vec::new(),
                compute: Compute::Sync(compute),
            },
            marker: std::marker::PhantomData,
        }
    }

    /// Writes `null` into `field` every time the source changes.
    pub fn resets<W>(mut self, field: &FieldId<W>) -> Self {
        self.entry
            .resets
            .push((field.path().clone(), field.value_type()));
        self
    }
}

/// Async counterpart of [`Derivation`]. A newer change of the source
/// supersedes a computation still in flight.
pub struct AsyncDerivation<T> {
    entry: DerivationEntry,
    marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FieldValue> AsyncDerivation<T> {
    pub fn new<S, F, Fut>(source: &FieldId<S>, target: &FieldId<T>, compute: F) -> Self
    where
        F: Fn(FormValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let compute: AsyncDeriveFn = Arc::new(move |values: FormValues| {
            let pending = compute(values);
            async move { pending.await.and_then(encode_derived) }.boxed()
        });
        Self {
            entry: DerivationEntry {
                source: source.path().clone(),
                target: target.path().clone(),
                target_type: target.value_type(),
                resets: Vec::new(),
                compute: Compute::Async {
                    debounce: Duration::ZERO,
                    compute,
                },
            },
            marker: std::marker::PhantomData,
        }
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        if let Compute::Async { debounce, .. } = &mut self.entry.compute {
            *debounce = window;
        }
        self
    }

    pub fn resets<W>(mut self, field: &FieldId<W>) -> Self {
        self.entry
            .resets
            .push((field.path().clone(), field.value_type()));
        self
    }
}

#[derive(Default)]
pub(crate) struct DerivationTable {
    next_id: u64,
    next_ticket: u64,
    entries: BTreeMap<DerivationId, DerivationEntry>,
    tickets: BTreeMap<DerivationId, u64>,
}

impl DerivationTable {
    fn insert(&mut self, entry: DerivationEntry) -> DerivationId {
        self.next_id += 1;
        let id = DerivationId(self.next_id);
        self.entries.insert(id, entry);
        id
    }

    fn remove(&mut self, id: DerivationId) -> Option<(DerivationEntry, Option<u64>)> {
        let entry = self.entries.remove(&id)?;
        Some((entry, self.tickets.remove(&id)))
    }

    fn get(&self, id: DerivationId) -> Option<DerivationEntry> {
        self.entries.get(&id).cloned()
    }

    fn for_source(&self, source: &FieldPath) -> Vec<(DerivationId, DerivationEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| &entry.source == source)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    fn bump(&mut self, id: DerivationId) -> u64 {
        self.next_ticket += 1;
        self.tickets.insert(id, self.next_ticket);
        self.next_ticket
    }

    fn is_latest(&self, id: DerivationId, ticket: u64) -> bool {
        self.tickets.get(&id).copied() == Some(ticket)
    }

    /// Supersedes every computation in flight.
    pub(crate) fn invalidate_all(&mut self) {
        let ids = self.entries.keys().copied().collect::<Vec<_>>();
        for id in ids {
            self.bump(id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FormController {
    pub fn derive<T: FieldValue>(&self, derivation: Derivation<T>) -> FormResult<DerivationId> {
        self.add_derivation(derivation.entry)
    }

    pub fn derive_async<T: FieldValue>(
        &self,
        derivation: AsyncDerivation<T>,
    ) -> FormResult<DerivationId> {
        self.add_derivation(derivation.entry)
    }

    fn add_derivation(&self, entry: DerivationEntry) -> FormResult<DerivationId> {
        let source = entry.source.clone();
        let target = entry.target.clone();
        let id = write_lock(&self.derivations, "adding derivation")?.insert(entry);
        tracing::debug!(derivation = id.0, %source, field = %target, "derivation added");
        Ok(id)
    }

    /// Returns false when `id` was already removed. A computation in flight
    /// for it is discarded.
    pub fn remove_derivation(&self, id: DerivationId) -> FormResult<bool> {
        let Some((entry, ticket)) =
            write_lock(&self.derivations, "removing derivation")?.remove(id)
        else {
            return Ok(false);
        };
        if let Some(ticket) = ticket {
            self.mutate("clearing derivation pending state", |store| {
                store.end_derivation(&entry.target, id, ticket);
                Ok(())
            })?;
        }
        tracing::debug!(derivation = id.0, field = %entry.target, "derivation removed");
        Ok(true)
    }

    pub fn derivation_count(&self) -> FormResult<usize> {
        Ok(read_lock(&self.derivations, "counting derivations")?.len())
    }

    /// Fires every derivation whose source is `source`. Failures are logged
    /// and never reach the write that triggered them.
    pub(super) fn propagate(
        &self,
        source: &FieldPath,
        depth: usize,
        async_work: bool,
    ) -> FormResult<Vec<AsyncJob>> {
        let derivations = read_lock(&self.derivations, "collecting derivations")?.for_source(source);
        if derivations.is_empty() {
            return Ok(Vec::new());
        }
        if depth >= self.options.max_propagation_depth {
            tracing::warn!(
                %source,
                depth,
                "derivation chain reached the maximum propagation depth; stopping"
            );
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        for (id, entry) in derivations {
            for (field, value_type) in &entry.resets {
                jobs.extend(self.write_derived(field, Value::Null, value_type, depth + 1, async_work));
            }

            match &entry.compute {
                Compute::Sync(compute) => {
                    let values = self.values()?;
                    match std::panic::catch_unwind(AssertUnwindSafe(|| compute(&values))) {
                        Ok(Ok(value)) => jobs.extend(self.write_derived(
                            &entry.target,
                            value,
                            entry.target_type,
                            depth + 1,
                            async_work,
                        )),
                        Ok(Err(message)) => {
                            tracing::warn!(derivation = id.0, field = %entry.target, %message, "derivation failed");
                        }
                        Err(_) => {
                            tracing::warn!(derivation = id.0, field = %entry.target, "derivation panicked");
                        }
                    }
                }
                Compute::Async { .. } => {
                    let ticket = write_lock(&self.derivations, "issuing derivation ticket")?.bump(id);
                    if !async_work {
                        continue;
                    }
                    let started = self.mutate("marking derivation pending", |store| {
                        Ok(store.begin_derivation(&entry.target, id, ticket))
                    })?;
                    if !started {
                        tracing::warn!(derivation = id.0, field = %entry.target, "derivation target is not registered; skipping");
                        continue;
                    }
                    let source_value = self.raw_value(source)?.unwrap_or(Value::Null);
                    jobs.push(AsyncJob::Derive {
                        id,
                        ticket,
                        source_value,
                        depth: depth + 1,
                    });
                }
            }
        }
        Ok(jobs)
    }

    pub(super) async fn run_async_derivation(
        &self,
        id: DerivationId,
        ticket: u64,
        source_value: Value,
        depth: usize,
    ) -> FormResult<()> {
        let Some(entry) = read_lock(&self.derivations, "reading derivation")?.get(id) else {
            tracing::trace!(derivation = id.0, "derivation removed before it ran");
            return Ok(());
        };
        let Compute::Async { debounce, compute } = &entry.compute else {
            return Ok(());
        };

        if !debounce.is_zero() {
            Delay::new(*debounce).await;
        }
        if !self.is_latest_derivation(id, ticket)? {
            tracing::trace!(derivation = id.0, ticket, "derivation superseded before it ran");
            self.finish_derivation(&entry.target, id, ticket)?;
            return Ok(());
        }

        let values = self.values()?;
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| compute(values))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await.ok(),
            Err(_) => None,
        };
        self.finish_derivation(&entry.target, id, ticket)?;

        let value = match outcome {
            Some(Ok(value)) => value,
            Some(Err(message)) => {
                tracing::warn!(derivation = id.0, field = %entry.target, %message, "async derivation failed");
                return Ok(());
            }
            None => {
                tracing::warn!(derivation = id.0, field = %entry.target, "async derivation panicked");
                return Ok(());
            }
        };

        let source_now = self.raw_value(&entry.source)?.unwrap_or(Value::Null);
        if !self.is_latest_derivation(id, ticket)? || source_now != source_value {
            tracing::trace!(derivation = id.0, ticket, "discarding stale derivation result");
            return Ok(());
        }

        let jobs = self.write_derived(&entry.target, value, entry.target_type, depth, true);
        self.run_jobs(jobs).await
    }

    fn is_latest_derivation(&self, id: DerivationId, ticket: u64) -> FormResult<bool> {
        Ok(read_lock(&self.derivations, "checking derivation ticket")?.is_latest(id, ticket))
    }

    fn finish_derivation(&self, target: &FieldPath, id: DerivationId, ticket: u64) -> FormResult<()> {
        self.mutate("clearing derivation pending state", |store| {
            store.end_derivation(target, id, ticket);
            Ok(())
        })
    }

    fn write_derived(
        &self,
        target: &FieldPath,
        value: Value,
        value_type: &'static str,
        depth: usize,
        async_work: bool,
    ) -> Vec<AsyncJob> {
        match self.is_registered(target) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(field = %target, "derivation target is not registered; skipping");
                return Vec::new();
            }
            Err(error) => {
                tracing::warn!(field = %target, %error, "failed to write derived value");
                return Vec::new();
            }
        }
        self.write(target, value, WriteOrigin::Derived, Some(value_type), depth, async_work)
            .unwrap_or_else(|error| {
                tracing::warn!(field = %target, %error, "failed to write derived value");
                Vec::new()
            })
    }
}
