// Callable signatures and overload resolution for function values

use std::fmt;
use std::sync::Arc;

use crate::value::{Value, ValueError};

/// Parameter type accepted by a callable member.
///
/// Only these kinds are callable from templates: generic values, a variadic
/// value array, and the scalar primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Any value, passed through unchanged.
    Any,
    /// All remaining arguments, packed into an array value.
    Rest,
    Number,
    String,
    Boolean,
}

impl ParamType {
    /// Value passed when the caller supplies fewer arguments than declared.
    pub fn default_value(self) -> Value {
        match self {
            ParamType::Any => Value::Undefined,
            ParamType::Rest => Value::array(Vec::new()),
            ParamType::Number => Value::Number(0.0),
            ParamType::String => Value::from(""),
            ParamType::Boolean => Value::Bool(false),
        }
    }

    fn coerce(self, value: &Value) -> Value {
        match self {
            ParamType::Any | ParamType::Rest => value.clone(),
            ParamType::Number => Value::Number(value.to_number()),
            ParamType::String => match value {
                Value::String(_) => value.clone(),
                other => Value::from(other.to_string()),
            },
            ParamType::Boolean => Value::Bool(value.to_boolean()),
        }
    }
}

/// Declared parameter list of a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<ParamType>,
}

impl Signature {
    pub fn new(params: Vec<ParamType>) -> Self {
        Signature { params }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// True when the first parameter takes a variadic value array.
    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.params.first() == Some(&ParamType::Rest)
    }

    /// Shape `args` to exactly this signature: coerce typed parameters, fill
    /// missing trailing ones with defaults, pack a `Rest` parameter, drop extras.
    pub fn prepare(&self, args: &[Value]) -> Vec<Value> {
        let mut prepared = Vec::with_capacity(self.params.len());
        for (i, param) in self.params.iter().enumerate() {
            if *param == ParamType::Rest {
                let rest = args.get(i..).map(<[Value]>::to_vec).unwrap_or_default();
                prepared.push(Value::array(rest));
                break;
            }
            prepared.push(match args.get(i) {
                Some(arg) => param.coerce(arg),
                None => param.default_value(),
            });
        }
        prepared
    }
}

type CallFn = dyn Fn(&Value, &[Value]) -> Result<Value, ValueError> + Send + Sync;

/// One concrete overload: a name, a signature and a body taking `this` and
/// the prepared arguments.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    signature: Signature,
    body: Arc<CallFn>,
}

impl Callable {
    pub fn new<F>(name: &str, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, ValueError> + Send + Sync + 'static,
    {
        Callable {
            name: name.into(),
            signature: Signature::new(params.to_vec()),
            body: Arc::new(body),
        }
    }

    pub(crate) fn from_parts(name: &str, signature: Signature, body: Arc<CallFn>) -> Self {
        Callable {
            name: name.into(),
            signature,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.signature.arity()
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, ValueError> {
        let prepared = self.signature.prepare(args);
        (self.body)(this, &prepared)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("params", &self.signature.params)
            .finish()
    }
}

/// The set of candidate overloads a function value dispatches over.
#[derive(Debug, Clone)]
pub struct FunctionSet {
    name: String,
    candidates: Vec<Callable>,
}

impl FunctionSet {
    pub fn new(name: impl Into<String>, candidates: Vec<Callable>) -> Self {
        FunctionSet {
            name: name.into(),
            candidates,
        }
    }

    pub fn single(callable: Callable) -> Self {
        FunctionSet {
            name: callable.name().to_string(),
            candidates: vec![callable],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[Callable] {
        &self.candidates
    }

    pub fn max_arity(&self) -> usize {
        self.candidates.iter().map(Callable::arity).max().unwrap_or(0)
    }

    /// Pick the overload for `argc` arguments. First match wins, in order:
    /// exact arity, variadic, smallest wider arity, largest narrower arity.
    /// Ties go to the earliest declared candidate.
    pub fn resolve(&self, argc: usize) -> Option<&Callable> {
        if let Some(exact) = self.candidates.iter().find(|c| c.arity() == argc) {
            return Some(exact);
        }
        if let Some(variadic) = self.candidates.iter().find(|c| c.signature.is_variadic()) {
            return Some(variadic);
        }

        let mut wider: Option<&Callable> = None;
        let mut narrower: Option<&Callable> = None;
        for candidate in &self.candidates {
            let arity = candidate.arity();
            if arity > argc && wider.map_or(true, |w| arity < w.arity()) {
                wider = Some(candidate);
            }
            if arity < argc && narrower.map_or(true, |n| arity > n.arity()) {
                narrower = Some(candidate);
            }
        }
        wider.or(narrower)
    }

    pub fn invoke(&self, this: &Value, args: &[Value]) -> Result<Value, ValueError> {
        let callable = self.resolve(args.len()).ok_or_else(|| ValueError::NoOverload {
            name: self.name.clone(),
            argc: args.len(),
        })?;
        callable
            .call(this, args)
            .map_err(|source| ValueError::Invocation {
                name: self.name.clone(),
                source: Box::new(source),
            })
    }
}
