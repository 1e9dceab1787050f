use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, Weak};

use super::field::FieldPath;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FieldAspect {
    Value,
    Validation,
    Dirty,
    Touched,
    Pending,
}

impl FieldAspect {
    pub const ALL: [FieldAspect; 5] = [
        FieldAspect::Value,
        FieldAspect::Validation,
        FieldAspect::Dirty,
        FieldAspect::Touched,
        FieldAspect::Pending,
    ];
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FormAspect {
    Valid,
    Dirty,
    Pending,
    Submitting,
    Step,
    Reset,
}

/// A slice of form state a listener can watch.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Topic {
    Field(FieldPath, FieldAspect),
    Form(FormAspect),
}

pub(crate) type Listener = Arc<dyn Fn(&Topic) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerTable {
    next_id: u64,
    entries: BTreeMap<Topic, BTreeMap<u64, Listener>>,
}

impl ListenerTable {
    pub(crate) fn insert(&mut self, topic: Topic, listener: Listener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.entry(topic).or_default().insert(id, listener);
        id
    }

    fn remove(&mut self, topic: &Topic, id: u64) {
        if let Some(listeners) = self.entries.get_mut(topic) {
            listeners.remove(&id);
            if listeners.is_empty() {
                self.entries.remove(topic);
            }
        }
    }

    /// Listeners for `topics`, in topic order then registration order.
    pub(crate) fn collect(&self, topics: &[Topic]) -> Vec<(Topic, Listener)> {
        topics
            .iter()
            .filter_map(|topic| self.entries.get(topic).map(|listeners| (topic, listeners)))
            .flat_map(|(topic, listeners)| {
                listeners
                    .values()
                    .map(move |listener| (topic.clone(), listener.clone()))
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    table: Weak<RwLock<ListenerTable>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(table: &Arc<RwLock<ListenerTable>>, topic: Topic, id: u64) -> Self {
        Self {
            table: Arc::downgrade(table),
            topic,
            id,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = match table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(&self.topic, self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

pub(crate) fn dispatch(listeners: Vec<(Topic, Listener)>) {
    for (topic, listener) in listeners {
        if std::panic::catch_unwind(AssertUnwindSafe(|| listener(&topic))).is_err() {
            tracing::warn!(?topic, "form listener panicked");
        }
    }
}
