// Per-type member tables for host objects exposed to templates
// Rust has no runtime reflection, so host types describe their members once
// and the table is cached by TypeId for every adapter instance of that type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;
use log::trace;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::native::Collection;
use crate::signature::{ParamType, Signature};
use crate::value::{Value, ValueError};

type Getter = Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>;
type Setter = Arc<dyn Fn(&dyn Any, Value) -> Result<(), ValueError> + Send + Sync>;
type IndexFn = Arc<dyn Fn(&dyn Any, &Value) -> Result<Option<Value>, ValueError> + Send + Sync>;
pub(crate) type MethodFn = Arc<dyn Fn(&dyn Any, &[Value]) -> Result<Value, ValueError> + Send + Sync>;

/// A host type that can be wrapped by [`crate::native::NativeObject`].
///
/// Every hook has a default, so an empty `impl Reflect for T {}` already
/// yields an object with no visible members. Types override:
///
/// - [`Reflect::describe`] to register properties, fields, an indexer and
///   methods (called once per type, results shared through [`MemberCache`])
/// - [`Reflect::collection`] to expose dictionary or sequence contents
/// - the dynamic-bag hooks to answer lookups before any other strategy
pub trait Reflect: Send + Sync + 'static {
    fn describe(members: &mut MemberTable<Self>)
    where
        Self: Sized,
    {
        let _ = members;
    }

    /// Name shown by string coercion; defaults to the bare Rust type name.
    fn type_name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn collection(&self) -> Option<Collection<'_>> {
        None
    }

    /// Extra keys enumerated after collection keys and member names.
    fn dynamic_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_dynamic(&self, key: &str) -> Option<Value> {
        let _ = key;
        None
    }

    /// Returns `Ok(true)` when the write was handled here.
    fn set_dynamic(&self, key: &str, value: &Value) -> Result<bool, ValueError> {
        let _ = (key, value);
        Ok(false)
    }

    fn delete_dynamic(&self, key: &str) -> bool {
        let _ = key;
        false
    }
}

/// `alloc::vec::Vec<i32>` -> `Vec`
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ── Erased members ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Property {
    getter: Getter,
    setter: Option<Setter>,
}

impl Property {
    pub fn get(&self, host: &dyn Any) -> Value {
        (self.getter)(host)
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// Returns `Ok(false)` for read-only properties.
    pub fn set(&self, host: &dyn Any, value: Value) -> Result<bool, ValueError> {
        match &self.setter {
            Some(setter) => setter(host, value).map(|_| true),
            None => Ok(false),
        }
    }
}

#[derive(Clone)]
pub struct Method {
    signature: Signature,
    body: MethodFn,
}

impl Method {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn body(&self) -> &MethodFn {
        &self.body
    }
}

/// Type-erased member table for one host type.
#[derive(Clone, Default)]
pub struct TypeMembers {
    properties: IndexMap<String, Property>,
    fields: IndexMap<String, Getter>,
    indexer: Option<IndexFn>,
    methods: IndexMap<String, Vec<Method>>,
}

impl TypeMembers {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn field(&self, host: &dyn Any, name: &str) -> Option<Value> {
        self.fields.get(name).map(|get| get(host))
    }

    /// `None` when the type has no indexer.
    pub fn index(&self, host: &dyn Any, key: &Value) -> Option<Result<Option<Value>, ValueError>> {
        self.indexer.as_ref().map(|index| index(host, key))
    }

    pub fn methods(&self, name: &str) -> Option<&[Method]> {
        self.methods.get(name).map(Vec::as_slice)
    }

    /// Discoverable member names: properties, fields, then methods.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.properties
            .keys()
            .chain(self.fields.keys())
            .chain(self.methods.keys())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len() + self.fields.len() + self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Typed builder ────────────────────────────────────────────────────────────

/// Builder handed to [`Reflect::describe`]; erases typed closures into
/// [`TypeMembers`].
pub struct MemberTable<T> {
    members: TypeMembers,
    _host: PhantomData<fn(&T)>,
}

impl<T: Reflect> MemberTable<T> {
    fn new() -> Self {
        MemberTable {
            members: TypeMembers::default(),
            _host: PhantomData,
        }
    }

    fn finish(self) -> TypeMembers {
        self.members
    }

    pub fn property<G>(&mut self, name: &str, get: G) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.members.properties.insert(
            name.to_string(),
            Property {
                getter: erase_getter(get),
                setter: None,
            },
        );
        self
    }

    /// A property with a setter. Hosts use interior mutability for the write.
    pub fn property_mut<G, S>(&mut self, name: &str, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&T, Value) -> Result<(), ValueError> + Send + Sync + 'static,
    {
        let setter: Setter = Arc::new(move |host: &dyn Any, value: Value| match host.downcast_ref::<T>() {
            Some(host) => set(host, value),
            None => Err(host_mismatch::<T>()),
        });
        self.members.properties.insert(
            name.to_string(),
            Property {
                getter: erase_getter(get),
                setter: Some(setter),
            },
        );
        self
    }

    pub fn field<G>(&mut self, name: &str, get: G) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.members.fields.insert(name.to_string(), erase_getter(get));
        self
    }

    /// Single-argument indexer consulted after properties. `Ok(None)` and
    /// errors both mean "not found" to the adapter.
    pub fn indexer<I>(&mut self, index: I) -> &mut Self
    where
        I: Fn(&T, &Value) -> Result<Option<Value>, ValueError> + Send + Sync + 'static,
    {
        self.members.indexer = Some(Arc::new(move |host: &dyn Any, key: &Value| {
            match host.downcast_ref::<T>() {
                Some(host) => index(host, key),
                None => Err(host_mismatch::<T>()),
            }
        }));
        self
    }

    /// Register one overload. Registering a name again adds another
    /// candidate; declaration order breaks resolution ties.
    pub fn method<M>(&mut self, name: &str, params: &[ParamType], body: M) -> &mut Self
    where
        M: Fn(&T, &[Value]) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        let body: MethodFn = Arc::new(move |host: &dyn Any, args: &[Value]| match host.downcast_ref::<T>() {
            Some(host) => body(host, args),
            None => Err(host_mismatch::<T>()),
        });
        self.members
            .methods
            .entry(name.to_string())
            .or_default()
            .push(Method {
                signature: Signature::new(params.to_vec()),
                body,
            });
        self
    }
}

fn erase_getter<T, G>(get: G) -> Getter
where
    T: 'static,
    G: Fn(&T) -> Value + Send + Sync + 'static,
{
    Arc::new(move |host: &dyn Any| match host.downcast_ref::<T>() {
        Some(host) => get(host),
        None => Value::Undefined,
    })
}

fn host_mismatch<T>() -> ValueError {
    ValueError::Runtime(format!(
        "member bound to {} called on another type",
        std::any::type_name::<T>()
    ))
}

// ── Cache ────────────────────────────────────────────────────────────────────

static GLOBAL_MEMBERS: Lazy<MemberCache> = Lazy::new(MemberCache::new);

/// Member tables keyed by `TypeId`, computed once per type.
///
/// Concurrent first population may describe a type twice; the tables are
/// identical so the last insert wins.
#[derive(Default)]
pub struct MemberCache {
    types: RwLock<HashMap<TypeId, Arc<TypeMembers>>>,
}

impl MemberCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by [`crate::native::NativeObject`].
    pub fn global() -> &'static MemberCache {
        &GLOBAL_MEMBERS
    }

    pub fn members_of<T: Reflect>(&self) -> Arc<TypeMembers> {
        let id = TypeId::of::<T>();
        if let Some(found) = self.types.read().get(&id) {
            return Arc::clone(found);
        }

        // Describe outside the lock
        let mut table = MemberTable::<T>::new();
        T::describe(&mut table);
        let members = Arc::new(table.finish());
        trace!(
            "described {} ({} members)",
            std::any::type_name::<T>(),
            members.len()
        );

        self.types.write().insert(id, Arc::clone(&members));
        members
    }

    /// Number of types described so far.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Counter {
        label: String,
        count: Mutex<f64>,
    }

    impl Reflect for Counter {
        fn describe(members: &mut MemberTable<Self>) {
            members
                .property("label", |c| Value::from(c.label.as_str()))
                .property_mut(
                    "count",
                    |c| Value::from(*c.count.lock()),
                    |c, v| {
                        *c.count.lock() = v.to_number();
                        Ok(())
                    },
                )
                .field("kind", |_| Value::from("counter"))
                .method("add", &[ParamType::Number], |c, args| {
                    let mut count = c.count.lock();
                    *count += args[0].to_number();
                    Ok(Value::from(*count))
                });
        }
    }

    struct Opaque;

    impl Reflect for Opaque {}

    fn counter() -> Counter {
        Counter {
            label: "clicks".to_string(),
            count: Mutex::new(0.0),
        }
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("alloc::vec::Vec<i32>"), "Vec");
        assert_eq!(short_type_name("my_crate::Thing"), "Thing");
        assert_eq!(short_type_name("Plain"), "Plain");
        assert_eq!(Opaque.type_name(), "Opaque");
    }

    #[test]
    fn test_member_table() {
        let cache = MemberCache::new();
        let members = cache.members_of::<Counter>();
        let host = counter();

        assert_eq!(members.names().collect::<Vec<_>>(), vec!["label", "count", "kind", "add"]);
        assert_eq!(members.property("label").unwrap().get(&host), Value::from("clicks"));
        assert!(!members.property("label").unwrap().is_writable());
        assert_eq!(members.field(&host, "kind"), Some(Value::from("counter")));
        assert!(members.index(&host, &Value::from("x")).is_none());

        let count = members.property("count").unwrap();
        assert!(count.set(&host, Value::from(4)).unwrap());
        assert_eq!(count.get(&host), Value::from(4));

        let add = &members.methods("add").unwrap()[0];
        assert_eq!(add.signature().arity(), 1);
        assert_eq!((add.body())(&host, &[Value::from(2)]).unwrap(), Value::from(6));
    }

    #[test]
    fn test_wrong_host_type() {
        let cache = MemberCache::new();
        let members = cache.members_of::<Counter>();
        assert!(members.property("label").unwrap().get(&Opaque).is_undefined());
        let add = &members.methods("add").unwrap()[0];
        assert!((add.body())(&Opaque, &[]).is_err());
    }

    #[test]
    fn test_cache_populates_once() {
        let cache = MemberCache::new();
        let first = cache.members_of::<Counter>();
        let second = cache.members_of::<Counter>();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.members_of::<Opaque>().is_empty());
        assert_eq!(cache.len(), 2);
    }
}
