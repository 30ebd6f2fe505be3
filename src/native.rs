// Native object adapter: exposes Reflect host types through DynamicObject
//
// Lookup order for a key:
//   1. the host's own dynamic-bag hook
//   2. dictionary entry (key parsed to the map's key type, then string match)
//   3. sequence element when the key is an integer
//   4. property
//   5. single-argument indexer (failures fall through)
//   6. field
//   7. methods with that name, bound to the host as a function value

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::object::DynamicObject;
use crate::reflect::{MemberCache, Method, Reflect, TypeMembers};
use crate::signature::{Callable, FunctionSet};
use crate::value::{Value, ValueError};

/// Read-only view of a host collection.
pub enum Collection<'a> {
    Dictionary(&'a dyn Dictionary),
    Sequence(&'a dyn Sequence),
}

/// Dictionary-like hosts: string keys in iteration order.
pub trait Dictionary {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_>;
    fn get(&self, key: &str) -> Option<Value>;
    fn len(&self) -> usize;
}

/// Enumerable hosts addressed by position.
pub trait Sequence {
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Option<Value>;
}

/// Adapter making any [`Reflect`] type a [`DynamicObject`].
///
/// Object- and function-valued lookups are memoized per key, so reading the
/// same key twice yields the same object identity for the adapter's lifetime.
pub struct NativeObject {
    host: Arc<dyn Reflect>,
    any: Arc<dyn Any + Send + Sync>,
    members: Arc<TypeMembers>,
    memo: RwLock<HashMap<String, Value>>,
}

impl NativeObject {
    pub fn new<T: Reflect>(host: T) -> Self {
        Self::from_arc(Arc::new(host))
    }

    pub fn from_arc<T: Reflect>(host: Arc<T>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = host.clone();
        NativeObject {
            host,
            any,
            members: MemberCache::global().members_of::<T>(),
            memo: RwLock::new(HashMap::new()),
        }
    }

    fn host_any(&self) -> &dyn Any {
        &*self.any
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(found) = self.host.get_dynamic(key) {
            return Some(found);
        }

        match self.host.collection() {
            Some(Collection::Dictionary(dict)) => {
                if let Some(found) = dict.get(key) {
                    return Some(found);
                }
            }
            Some(Collection::Sequence(seq)) => {
                if let Some(found) = key.parse::<usize>().ok().and_then(|i| seq.get(i)) {
                    return Some(found);
                }
            }
            None => {}
        }

        let host = self.host_any();
        if let Some(property) = self.members.property(key) {
            return Some(property.get(host));
        }
        // Indexer failures mean "not found" here
        if let Some(Ok(Some(found))) = self.members.index(host, &Value::from(key)) {
            return Some(found);
        }
        if let Some(found) = self.members.field(host, key) {
            return Some(found);
        }
        self.members.methods(key).map(|methods| self.bind(key, methods))
    }

    fn bind(&self, name: &str, methods: &[Method]) -> Value {
        let candidates = methods
            .iter()
            .map(|method| {
                let any = Arc::clone(&self.any);
                let body = Arc::clone(method.body());
                Callable::from_parts(
                    name,
                    method.signature().clone(),
                    Arc::new(move |_this: &Value, args: &[Value]| body(&*any, args)),
                )
            })
            .collect();
        Value::function(FunctionSet::new(name, candidates))
    }
}

impl DynamicObject for NativeObject {
    fn type_name(&self) -> &str {
        self.host.type_name()
    }

    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        let collection: Box<dyn Iterator<Item = String> + '_> = match self.host.collection() {
            Some(Collection::Dictionary(dict)) => dict.keys(),
            Some(Collection::Sequence(seq)) => Box::new((0..seq.len()).map(|i| i.to_string())),
            None => Box::new(std::iter::empty()),
        };
        let members = self.members.names().map(str::to_string);
        Box::new(collection.chain(members).chain(self.host.dynamic_keys()))
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        if let Some(found) = self.memo.read().get(key) {
            return Some(found.clone());
        }
        let found = self.lookup(key)?;
        if found.is_object() || found.is_function() {
            // A racing reader may have memoized first; keep its identity
            let mut memo = self.memo.write();
            return Some(memo.entry(key.to_string()).or_insert(found).clone());
        }
        Some(found)
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), ValueError> {
        self.memo.write().remove(key);
        if self.host.set_dynamic(key, &value)? {
            return Ok(());
        }
        match self.members.property(key) {
            Some(property) => {
                if property.set(self.host_any(), value)? {
                    Ok(())
                } else {
                    Err(ValueError::Index(format!(
                        "property '{}' of {} is read-only",
                        key,
                        self.host.type_name()
                    )))
                }
            }
            None => Err(ValueError::Index(format!(
                "cannot set '{}' on {}",
                key,
                self.host.type_name()
            ))),
        }
    }

    fn delete_key(&self, key: &str) -> bool {
        self.memo.write().remove(key);
        self.host.delete_dynamic(key)
    }

    fn len(&self) -> usize {
        match self.host.collection() {
            Some(Collection::Dictionary(dict)) => dict.len(),
            Some(Collection::Sequence(seq)) => seq.len(),
            None => self.keys().count(),
        }
    }

    fn host(&self) -> Option<&dyn Any> {
        Some(self.host_any())
    }

    fn identity(&self) -> *const () {
        Arc::as_ptr(&self.any).cast::<()>()
    }
}

// ── serde_json ───────────────────────────────────────────────────────────────

impl Reflect for serde_json::Value {
    fn type_name(&self) -> &str {
        match self {
            serde_json::Value::Null => "Null",
            serde_json::Value::Bool(_) => "Boolean",
            serde_json::Value::Number(_) => "Number",
            serde_json::Value::String(_) => "String",
            serde_json::Value::Array(_) => "Array",
            serde_json::Value::Object(_) => "Object",
        }
    }

    fn collection(&self) -> Option<Collection<'_>> {
        match self {
            serde_json::Value::Array(items) => Some(Collection::Sequence(items)),
            serde_json::Value::Object(map) => Some(Collection::Dictionary(map)),
            _ => None,
        }
    }
}

impl Dictionary for serde_json::Map<String, serde_json::Value> {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(serde_json::Map::keys(self).cloned())
    }

    fn get(&self, key: &str) -> Option<Value> {
        serde_json::Map::get(self, key).map(Value::from)
    }

    fn len(&self) -> usize {
        serde_json::Map::len(self)
    }
}

impl Reflect for serde_json::Map<String, serde_json::Value> {
    fn type_name(&self) -> &str {
        "Object"
    }

    fn collection(&self) -> Option<Collection<'_>> {
        Some(Collection::Dictionary(self))
    }
}

// ── std / indexmap collections ───────────────────────────────────────────────

impl<T: Clone + Into<Value>> Sequence for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> Option<Value> {
        <[T]>::get(self, index).cloned().map(Into::into)
    }
}

impl<T> Reflect for Vec<T>
where
    T: Clone + Into<Value> + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        "Array"
    }

    fn collection(&self) -> Option<Collection<'_>> {
        Some(Collection::Sequence(self))
    }
}

/// Best-effort key match: parse into the map's key type, else compare the
/// displayed form of every key.
fn find_entry<'a, K, V, I>(key: &str, typed: Option<&'a V>, mut entries: I) -> Option<Value>
where
    K: Display + 'a,
    V: Clone + Into<Value> + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    typed
        .or_else(|| entries.find(|(k, _)| k.to_string() == key).map(|(_, v)| v))
        .cloned()
        .map(Into::into)
}

impl<K, V> Dictionary for HashMap<K, V>
where
    K: Display + FromStr + Eq + Hash,
    V: Clone + Into<Value>,
{
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(HashMap::keys(self).map(ToString::to_string))
    }

    fn get(&self, key: &str) -> Option<Value> {
        let typed = key.parse::<K>().ok().and_then(|k| HashMap::get(self, &k));
        find_entry(key, typed, self.iter())
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

impl<K, V> Dictionary for BTreeMap<K, V>
where
    K: Display + FromStr + Ord,
    V: Clone + Into<Value>,
{
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(BTreeMap::keys(self).map(ToString::to_string))
    }

    fn get(&self, key: &str) -> Option<Value> {
        let typed = key.parse::<K>().ok().and_then(|k| BTreeMap::get(self, &k));
        find_entry(key, typed, self.iter())
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

impl<K, V> Dictionary for IndexMap<K, V>
where
    K: Display + FromStr + Eq + Hash,
    V: Clone + Into<Value>,
{
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(IndexMap::keys(self).map(ToString::to_string))
    }

    fn get(&self, key: &str) -> Option<Value> {
        let typed = key.parse::<K>().ok().and_then(|k| IndexMap::get(self, &k));
        find_entry(key, typed, self.iter())
    }

    fn len(&self) -> usize {
        IndexMap::len(self)
    }
}

macro_rules! reflect_dictionary {
    ($map:ident, $($key_bound:tt)+) => {
        impl<K, V> Reflect for $map<K, V>
        where
            K: Display + FromStr + $($key_bound)+ + Send + Sync + 'static,
            V: Clone + Into<Value> + Send + Sync + 'static,
        {
            fn type_name(&self) -> &str {
                "Object"
            }

            fn collection(&self) -> Option<Collection<'_>> {
                Some(Collection::Dictionary(self))
            }
        }
    };
}

reflect_dictionary!(HashMap, Eq + Hash);
reflect_dictionary!(BTreeMap, Ord);
reflect_dictionary!(IndexMap, Eq + Hash);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::MemberTable;
    use crate::signature::ParamType;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Account {
        owner: String,
        balance: Mutex<f64>,
        tags: Vec<String>,
        extra: Mutex<IndexMap<String, Value>>,
    }

    impl Reflect for Account {
        fn describe(members: &mut MemberTable<Self>) {
            members
                .property("owner", |a| Value::from(a.owner.as_str()))
                .property_mut(
                    "balance",
                    |a| Value::from(*a.balance.lock()),
                    |a, v| {
                        *a.balance.lock() = v.to_number();
                        Ok(())
                    },
                )
                .property("tags", |a| Value::from_host(a.tags.clone()))
                .indexer(|a, key| {
                    let index = key.to_number();
                    if index.is_nan() {
                        return Err(ValueError::Index("not a position".to_string()));
                    }
                    Ok(a.tags.get(index as usize).map(|t| Value::from(t.as_str())))
                })
                .field("currency", |_| Value::from("EUR"))
                .method("deposit", &[ParamType::Number], |a, args| {
                    let mut balance = a.balance.lock();
                    *balance += args[0].to_number();
                    Ok(Value::from(*balance))
                })
                .method("greet", &[], |a, _| Ok(Value::from(format!("hi {}", a.owner))))
                .method("greet", &[ParamType::String], |a, args| {
                    Ok(Value::from(format!("{} {}", args[0], a.owner)))
                });
        }

        fn dynamic_keys(&self) -> Vec<String> {
            self.extra.lock().keys().cloned().collect()
        }

        fn get_dynamic(&self, key: &str) -> Option<Value> {
            self.extra.lock().get(key).cloned()
        }

        fn set_dynamic(&self, key: &str, value: &Value) -> Result<bool, ValueError> {
            if key.starts_with('x') {
                self.extra.lock().insert(key.to_string(), value.clone());
                return Ok(true);
            }
            Ok(false)
        }

        fn delete_dynamic(&self, key: &str) -> bool {
            self.extra.lock().shift_remove(key).is_some()
        }
    }

    fn account() -> Value {
        Value::from_host(Account {
            owner: "ana".to_string(),
            balance: Mutex::new(10.0),
            tags: vec!["gold".to_string(), "eu".to_string()],
            extra: Mutex::new(IndexMap::new()),
        })
    }

    #[test]
    fn test_json_object() {
        let v = Value::from(json!({"b": 1, "a": [true, "x"]}));
        assert_eq!(v.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(v.get("b").unwrap(), Value::from(1));
        let arr = v.get("a").unwrap();
        assert_eq!(arr.keys().collect::<Vec<_>>(), vec!["0", "1"]);
        assert_eq!(arr.get("1").unwrap(), Value::from("x"));
        assert!(arr.get("2").unwrap().is_undefined());
        assert!(arr.get("-1").unwrap().is_undefined());
        assert_eq!(arr.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_memoized_identity() {
        let v = Value::from(json!({"items": [1, 2]}));
        let first = v.get("items").unwrap();
        let second = v.get("items").unwrap();
        assert!(first.same_object(&second));

        let acct = account();
        assert!(acct.get("deposit").unwrap().same_object(&acct.get("deposit").unwrap()));
    }

    #[test]
    fn test_member_lookup_order() {
        let acct = account();
        assert_eq!(acct.to_string(), "[object Account]");
        assert_eq!(acct.get("owner").unwrap(), Value::from("ana"));
        // Indexer before field
        assert_eq!(acct.get("1").unwrap(), Value::from("eu"));
        assert_eq!(acct.get("currency").unwrap(), Value::from("EUR"));
        assert!(acct.get("nothing").unwrap().is_undefined());
        assert!(acct.lookup("nothing").unwrap().is_none());
        assert_eq!(
            acct.keys().collect::<Vec<_>>(),
            vec!["owner", "balance", "tags", "currency", "deposit", "greet"]
        );
    }

    #[test]
    fn test_bound_methods() {
        let acct = account();
        let deposit = acct.get("deposit").unwrap();
        assert!(deposit.is_function());
        assert_eq!(deposit.invoke(&acct, &[Value::from("5")]).unwrap(), Value::from(15));
        assert_eq!(acct.get("balance").unwrap(), Value::from(15));

        let greet = acct.get("greet").unwrap();
        assert_eq!(greet.to_number(), 1.0);
        assert_eq!(greet.invoke(&acct, &[]).unwrap(), Value::from("hi ana"));
        assert_eq!(greet.invoke(&acct, &[Value::from("yo")]).unwrap(), Value::from("yo ana"));
    }

    #[test]
    fn test_writes() {
        let acct = account();
        acct.set("balance", Value::from(1)).unwrap();
        assert_eq!(acct.get("balance").unwrap(), Value::from(1));
        assert!(matches!(acct.set("owner", Value::from("bo")), Err(ValueError::Index(_))));
        assert!(matches!(acct.set("nope", Value::from(1)), Err(ValueError::Index(_))));

        acct.set("xtra", Value::from("bag")).unwrap();
        assert_eq!(acct.get("xtra").unwrap(), Value::from("bag"));
        assert_eq!(acct.keys().last().as_deref(), Some("xtra"));
        assert!(acct.delete("xtra").unwrap());
        assert!(acct.get("xtra").unwrap().is_undefined());
    }

    #[test]
    fn test_typed_map_keys() {
        let mut map: HashMap<i32, String> = HashMap::new();
        map.insert(7, "seven".to_string());
        let v = Value::from_host(map);
        assert_eq!(v.get("7").unwrap(), Value::from("seven"));
        assert!(v.get("eight").unwrap().is_undefined());
        assert_eq!(v.to_string(), "[object Object]");

        let tree: BTreeMap<String, f64> = [("b".to_string(), 2.0), ("a".to_string(), 1.0)].into();
        let v = Value::from_host(tree);
        assert_eq!(v.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(v.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_host_downcast() {
        let v = Value::from_host(vec![1.0, 2.0]);
        assert_eq!(v.downcast_host::<Vec<f64>>().map(Vec::len), Some(2));
        assert!(v.downcast_host::<String>().is_none());
        assert_eq!(v.to_string(), "[object Array]");
    }
}
