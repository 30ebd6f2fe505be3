// Value: Arc-wrapped dynamic value used throughout template evaluation
// Carries JavaScript-like coercions over primitives and duck-typed objects

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::native::NativeObject;
use crate::object::DynamicObject;
use crate::reflect::Reflect;
use crate::signature::FunctionSet;
use crate::utils::format_number;

/// Errors raised while indexing or invoking dynamic values
#[derive(Error, Debug)]
pub enum ValueError {
    #[error("Indexing error: {0}")]
    Index(String),

    #[error("Invocation error: {0} is not a function")]
    NotCallable(String),

    #[error("Invocation error: no overload of '{name}' accepts {argc} argument(s)")]
    NoOverload { name: String, argc: usize },

    #[error("Invocation error: '{name}' failed: {source}")]
    Invocation {
        name: String,
        #[source]
        source: Box<ValueError>,
    },

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<crate::datetime::DateTimeError> for ValueError {
    fn from(e: crate::datetime::DateTimeError) -> Self {
        ValueError::Runtime(e.to_string())
    }
}

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
}

/// A dynamically typed value.
///
/// Strings, objects and functions are wrapped in `Arc` so cloning is O(1) and
/// values can be shared across threads. Values are never mutated in place;
/// writes go through the backing object's [`DynamicObject::set_value`].
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(Arc<dyn DynamicObject>),
    Function(Arc<FunctionSet>),
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn kind(&self) -> Kind {
        match self {
            Value::Undefined => Kind::Undefined,
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Object(_) => Kind::Object,
            Value::Function(_) => Kind::Function,
        }
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A value is evaluable when it is neither `Undefined` nor `Null`.
    #[inline]
    pub fn is_evaluable(&self) -> bool {
        !matches!(self, Value::Undefined | Value::Null)
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Lowercase name of the value's kind, used in error messages and by the `type` pipe.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Function(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Function(f) => format!("function '{}'", f.name()),
            other => format!("{} value", other.type_of()),
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&Arc<dyn DynamicObject>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<&Arc<FunctionSet>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the host object behind a [`NativeObject`] as a concrete type.
    pub fn downcast_host<T: Any>(&self) -> Option<&T> {
        self.as_object()
            .and_then(|obj| obj.host())
            .and_then(|host| host.downcast_ref::<T>())
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Store an object that already implements the dynamic object protocol.
    #[inline]
    pub fn object(obj: impl DynamicObject + 'static) -> Self {
        Value::Object(Arc::new(obj))
    }

    #[inline]
    pub fn function(set: FunctionSet) -> Self {
        Value::Function(Arc::new(set))
    }

    /// Wrap a host object in a [`NativeObject`] adapter.
    pub fn from_host<T: Reflect>(host: T) -> Self {
        Value::Object(Arc::new(NativeObject::new(host)))
    }

    /// Wrap a shared host object without cloning it.
    pub fn from_host_arc<T: Reflect>(host: Arc<T>) -> Self {
        Value::Object(Arc::new(NativeObject::from_arc(host)))
    }

    /// An array value backed by a `Vec<Value>`.
    pub fn array(items: Vec<Value>) -> Self {
        Value::from_host(items)
    }

    /// Snapshot any serializable value through `serde_json`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::from)
    }
}

// ── Coercions ────────────────────────────────────────────────────────────────

impl Value {
    /// Truthiness. Protocol objects are always truthy; `NaN` is truthy since it is
    /// not equal to zero.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// Numeric coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Null => f64::NAN,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            // A function reports the widest arity among its overloads
            Value::Function(f) => f.max_arity() as f64,
            Value::Object(_) => 1.0,
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

// ── Indexing ─────────────────────────────────────────────────────────────────

impl Value {
    /// Look up `key`, distinguishing "not found" (`Ok(None)`) from "not indexable" (`Err`).
    pub fn lookup(&self, key: &str) -> Result<Option<Value>, ValueError> {
        match self {
            Value::Object(obj) => Ok(obj.get_value(key)),
            Value::Undefined | Value::Null => Err(ValueError::Index(format!(
                "cannot index undefined or null with '{}'",
                key
            ))),
            other => Err(ValueError::Index(format!(
                "cannot index {} with '{}'",
                other.describe(),
                key
            ))),
        }
    }

    /// `value[key]`; missing keys yield `Undefined`.
    pub fn get(&self, key: &str) -> Result<Value, ValueError> {
        Ok(self.lookup(key)?.unwrap_or(Value::Undefined))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), ValueError> {
        match self {
            Value::Object(obj) => obj.set_value(key, value),
            other => Err(ValueError::Index(format!(
                "cannot set '{}' on {}",
                key,
                other.describe()
            ))),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, ValueError> {
        match self {
            Value::Object(obj) => Ok(obj.delete_key(key)),
            other => Err(ValueError::Index(format!(
                "cannot delete '{}' from {}",
                key,
                other.describe()
            ))),
        }
    }

    /// Enumerable keys; empty for anything that is not an object.
    pub fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        match self {
            Value::Object(obj) => obj.keys(),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Values reachable through [`Value::keys`], in key order.
    pub fn items(&self) -> Vec<Value> {
        match self {
            Value::Object(obj) => obj.keys().filter_map(|k| obj.get_value(&k)).collect(),
            _ => Vec::new(),
        }
    }
}

// ── Invocation ───────────────────────────────────────────────────────────────

impl Value {
    /// Call a function value with `this` bound to `this_arg`.
    pub fn invoke(&self, this_arg: &Value, args: &[Value]) -> Result<Value, ValueError> {
        match self {
            Value::Function(f) => f.invoke(this_arg, args),
            other => Err(ValueError::NotCallable(other.describe())),
        }
    }
}

// ── Comparison and arithmetic ────────────────────────────────────────────────

impl Value {
    /// Numeric ordering when both sides are numbers, string ordering otherwise.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            _ => Some(self.to_string().cmp(&other.to_string())),
        }
    }

    pub fn less_than(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    pub fn greater_than(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }

    pub fn less_or_equal(&self, other: &Value) -> bool {
        matches!(self.compare(other), Some(Ordering::Less | Ordering::Equal))
    }

    pub fn greater_or_equal(&self, other: &Value) -> bool {
        matches!(self.compare(other), Some(Ordering::Greater | Ordering::Equal))
    }

    /// Numeric addition for two numbers, string concatenation otherwise.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => Value::from(format!("{}{}", self, other)),
        }
    }

    pub fn subtract(&self, other: &Value) -> Value {
        Value::Number(self.to_number() - other.to_number())
    }

    pub fn multiply(&self, other: &Value) -> Value {
        Value::Number(self.to_number() * other.to_number())
    }

    pub fn divide(&self, other: &Value) -> Value {
        Value::Number(self.to_number() / other.to_number())
    }

    pub fn remainder(&self, other: &Value) -> Value {
        Value::Number(self.to_number() % other.to_number())
    }

    pub fn bit_and(&self, other: &Value) -> Value {
        Value::from(self.to_integer() & other.to_integer())
    }

    pub fn bit_or(&self, other: &Value) -> Value {
        Value::from(self.to_integer() | other.to_integer())
    }

    pub fn bit_xor(&self, other: &Value) -> Value {
        Value::from(self.to_integer() ^ other.to_integer())
    }

    pub fn shift_left(&self, other: &Value) -> Value {
        Value::from(self.to_integer().wrapping_shl(other.to_integer() as u32))
    }

    pub fn shift_right(&self, other: &Value) -> Value {
        Value::from(self.to_integer().wrapping_shr(other.to_integer() as u32))
    }

    /// Number truncated to a 64-bit integer (NaN becomes 0, out of range saturates).
    #[inline]
    pub fn to_integer(&self) -> i64 {
        self.to_number() as i64
    }

    /// Equality after string coercion, used by the `equals` family of pipes.
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.to_string() == other.to_string()
    }

    /// Object identity for objects and functions; never true for primitives.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.identity() == b.identity(),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    #[inline]
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    #[inline]
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f32> for Value {
    #[inline]
    fn from(n: f32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Arc<str>> for Value {
    #[inline]
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    #[inline]
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(v: Vec<Value>) -> Self {
        Value::array(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    #[inline]
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::from_host(m)
    }
}

impl From<Arc<dyn DynamicObject>> for Value {
    #[inline]
    fn from(obj: Arc<dyn DynamicObject>) -> Self {
        Value::Object(obj)
    }
}

impl From<FunctionSet> for Value {
    #[inline]
    fn from(set: FunctionSet) -> Self {
        Value::function(set)
    }
}

// ── Conversion from serde_json::Value ────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            // Arrays and objects go through the native adapter
            other => Value::from_host(other),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        Value::from(v.clone())
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

/// Value equality without coercion: `Undefined` and `Null` are equal to each
/// other, primitives compare natively, objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if !a.is_evaluable() && !b.is_evaluable() => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(_), Value::Object(_)) | (Value::Function(_), Value::Function(_)) => {
                self.same_object(other)
            }
            _ => false,
        }
    }
}

// ── Display (string coercion) ────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(true) => f.write_str("true"),
            Value::Bool(false) => f.write_str("false"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Object(obj) => write!(f, "[object {}]", obj.type_name()),
            Value::Function(_) => f.write_str("[object Object]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(&&**s).finish(),
            Value::Object(obj) => write!(f, "Object({})", obj.type_name()),
            Value::Function(func) => write!(f, "Function({})", func.name()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
