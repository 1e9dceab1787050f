use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{FormError, FormResult};

/// Dotted path identifying one field, e.g. `address.city`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Arc<str>);

impl FieldPath {
    pub fn new(path: impl Into<Arc<str>>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn parent(&self) -> Option<FieldPath> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| FieldPath::new(parent))
    }

    pub fn child(&self, name: &str) -> FieldPath {
        FieldPath::new(format!("{}.{name}", self.0))
    }

    /// True when `self` is `group` or lives underneath it.
    pub fn is_within(&self, group: &FieldPath) -> bool {
        match self.0.strip_prefix(group.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

pub trait FieldValue:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> FieldValue for T where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Typed key of a field. The value type travels with the id so reads and
/// writes never go through an untyped `Value` at the call site.
pub struct FieldId<V> {
    path: FieldPath,
    marker: PhantomData<fn() -> V>,
}

impl<V> FieldId<V> {
    pub fn new(path: impl Into<FieldPath>) -> Self {
        Self {
            path: path.into(),
            marker: PhantomData,
        }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn value_type(&self) -> &'static str {
        std::any::type_name::<V>()
    }

    pub fn nested<W>(&self, name: &str) -> FieldId<W> {
        FieldId::new(self.path.child(name))
    }
}

impl<V> Clone for FieldId<V> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            marker: PhantomData,
        }
    }
}

impl<V> PartialEq for FieldId<V> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<V> Eq for FieldId<V> {}

impl<V> Hash for FieldId<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        std::any::type_name::<V>().hash(state);
    }
}

impl<V> Debug for FieldId<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldId")
            .field("path", &self.path)
            .field("type", &std::any::type_name::<V>())
            .finish()
    }
}

impl<V> Display for FieldId<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.path, f)
    }
}

pub(crate) fn encode_value<V: FieldValue>(path: &FieldPath, value: &V) -> FormResult<Value> {
    serde_json::to_value(value).map_err(|error| FormError::ValueEncode {
        path: path.clone(),
        reason: error.to_string(),
    })
}

pub(crate) fn decode_value<V: FieldValue>(path: &FieldPath, value: &Value) -> FormResult<V> {
    V::deserialize(value).map_err(|error| FormError::ValueDecode {
        path: path.clone(),
        requested: std::any::type_name::<V>(),
        reason: error.to_string(),
    })
}

/// Immutable snapshot of every field value, handed to validators and
/// derivations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormValues {
    values: BTreeMap<FieldPath, Value>,
}

impl FormValues {
    pub(crate) fn from_map(values: BTreeMap<FieldPath, Value>) -> Self {
        Self { values }
    }

    /// Typed read; `None` when the field is unknown or holds a value that
    /// does not decode as `V`.
    pub fn get<V: FieldValue>(&self, id: &FieldId<V>) -> Option<V> {
        let raw = self.values.get(id.path())?;
        match decode_value(id.path(), raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::trace!(%error, "form value not readable as requested type");
                None
            }
        }
    }

    pub fn raw(&self, path: &FieldPath) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.values.contains_key(path)
    }

    pub fn group(&self, prefix: &FieldPath) -> FormValues {
        Self {
            values: self
                .values
                .iter()
                .filter(|(path, _)| path.is_within(prefix))
                .map(|(path, value)| (path.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<FieldPath, Value> {
        self.values
    }
}
