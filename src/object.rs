// Dynamic object protocol and the plain string-keyed object bag

use std::any::Any;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::{Value, ValueError};

/// Capability interface for anything that can sit behind [`Value::Object`].
///
/// Keys are enumerated lazily; calling [`DynamicObject::keys`] again walks the
/// backing structures again.
pub trait DynamicObject: Send + Sync {
    /// Display name used by string coercion (`[object TypeName]`).
    fn type_name(&self) -> &str;

    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_>;

    /// `None` means the key was not found (as opposed to an indexing failure).
    fn get_value(&self, key: &str) -> Option<Value>;

    fn set_value(&self, key: &str, value: Value) -> Result<(), ValueError>;

    fn delete_key(&self, key: &str) -> bool;

    /// Number of enumerable entries.
    fn len(&self) -> usize {
        self.keys().count()
    }

    /// The wrapped host object, for adapters over Rust values.
    fn host(&self) -> Option<&dyn Any> {
        None
    }

    /// Address used for identity comparisons.
    fn identity(&self) -> *const () {
        (self as *const Self).cast::<()>()
    }
}

/// A mutable, insertion-ordered bag of named values.
///
/// Used for the per-evaluation globals table and for ad-hoc objects built
/// from Rust code.
pub struct ObjectBag {
    type_name: String,
    entries: RwLock<IndexMap<String, Value>>,
}

impl ObjectBag {
    pub fn new() -> Self {
        Self::named("Object")
    }

    pub fn named(type_name: impl Into<String>) -> Self {
        ObjectBag {
            type_name: type_name.into(),
            entries: RwLock::new(IndexMap::new()),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.write().insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ObjectBag {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ObjectBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let bag = ObjectBag::new();
        {
            let mut entries = bag.entries.write();
            for (k, v) in iter {
                entries.insert(k.into(), v.into());
            }
        }
        bag
    }
}

impl DynamicObject for ObjectBag {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        // Snapshot so no lock is held while the caller iterates
        let keys: Vec<String> = self.entries.read().keys().cloned().collect();
        Box::new(keys.into_iter())
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), ValueError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete_key(&self, key: &str) -> bool {
        self.entries.write().shift_remove(key).is_some()
    }

    fn len(&self) -> usize {
        ObjectBag::len(self)
    }
}
