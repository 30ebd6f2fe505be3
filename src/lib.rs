// templata - Mustache-like templates over a duck-typed value model
// Copyright (c) 2025 templata contributors
// Licensed under the MIT License

//! # templata
//!
//! A small template engine: `{{ path | pipes }}` expressions, `if`/`foreach`
//! blocks and HTML escaping, evaluated over a dynamic `Value` that can wrap
//! JSON documents, ad-hoc object bags or plain Rust types exposed through
//! [`Reflect`].
//!
//! Templates are compiled once into a flat instruction list and cached by
//! their source text; every later evaluation only runs the program.
//!
//! ## Architecture
//!
//! - `parser` - Tag splitting and pipe/condition parsing
//! - `ast` - Pipe expressions, paths and literals
//! - `compiler` - Lowers tags into jumps and caches compiled programs
//! - `vm` - Instruction set and the interpreter loop
//! - `value` - The dynamic value model and its coercions
//! - `object` - The dynamic object protocol and the `ObjectBag` store
//! - `reflect` / `native` - Exposing host Rust types as objects
//! - `signature` - Overloaded callables and argument coercion
//! - `functions` - Built-in pipes
//! - `datetime` - Date values for the `date` pipe
//! - `utils` - Number formatting, escaping and output post-processing
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//!
//! let out = templata::evaluate(
//!     "{{foreach items}}{{ . }},{{/foreach}}",
//!     json!({"items": [1, 2, 3]}),
//! )
//! .unwrap();
//! assert_eq!(out, "1,2,3,");
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use thiserror::Error;

pub mod ast;
pub mod compiler;
pub mod datetime;
mod evaluator;
pub mod functions;
pub mod native;
pub mod object;
pub mod parser;
pub mod reflect;
pub mod signature;
pub mod utils;
pub mod value;
pub mod vm;

pub use compiler::TemplateCache;
pub use datetime::DateObject;
pub use native::{Collection, NativeObject};
pub use object::{DynamicObject, ObjectBag};
pub use parser::ParseError;
pub use reflect::{MemberCache, MemberTable, Reflect};
pub use signature::{Callable, FunctionSet, ParamType};
pub use value::{Value, ValueError};
pub use vm::CompiledTemplate;

use evaluator::Scope;
use vm::Vm;

/// Anything that can go wrong while rendering a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Per-evaluation settings.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Names visible from any path whose first segment misses in the data.
    pub globals: IndexMap<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a global, replacing any earlier one with the same name.
    pub fn global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Options {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Options {
            globals: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }
}

static GLOBAL_ENGINE: Lazy<Engine> = Lazy::new(Engine::new);

/// Compiles templates through its own cache and renders them.
#[derive(Default)]
pub struct Engine {
    templates: TemplateCache,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide engine used by [`evaluate`] and [`evaluate_with`].
    pub fn global() -> &'static Engine {
        &GLOBAL_ENGINE
    }

    /// Compile `source`, or fetch the program compiled for it earlier.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledTemplate>, ParseError> {
        self.templates.get_or_compile(source)
    }

    pub fn evaluate(&self, source: &str, data: impl Into<Value>) -> Result<String, TemplateError> {
        self.evaluate_with(source, data, &Options::default())
    }

    /// Render `source` against `data`. Globals are copied into a fresh bag
    /// so `as` bindings made by this call stay local to it.
    pub fn evaluate_with(
        &self,
        source: &str,
        data: impl Into<Value>,
        options: &Options,
    ) -> Result<String, TemplateError> {
        let prog = self.compile(source)?;
        self.render(&prog, data.into(), options)
    }

    /// Run an already compiled program.
    pub fn render(
        &self,
        prog: &CompiledTemplate,
        data: Value,
        options: &Options,
    ) -> Result<String, TemplateError> {
        let globals: ObjectBag = options
            .globals
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let mut scope = Scope::new(data, Arc::new(globals));
        Ok(Vm::new(prog).run(&mut scope)?)
    }

    /// Number of distinct template sources compiled so far.
    pub fn cached_templates(&self) -> usize {
        self.templates.len()
    }
}

/// Render `source` against `data` with the global engine.
pub fn evaluate(source: &str, data: impl Into<Value>) -> Result<String, TemplateError> {
    Engine::global().evaluate(source, data)
}

/// Like [`evaluate`], with globals.
pub fn evaluate_with(
    source: &str,
    data: impl Into<Value>,
    options: &Options,
) -> Result<String, TemplateError> {
    Engine::global().evaluate_with(source, data, options)
}
