// Per-evaluation state and pipe expression evaluation
//
// `values[0]` is the root data value; `values[d]` is the collection iterated
// at loop depth `d`, and `iterators[d - 1]` holds the keys it still has to
// visit. The current item at depth `d` is `values[d][iterators[d - 1].front()]`.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::ast::{Argument, Head, ObjectPath, PipeExpr, Segment, Stage};
use crate::functions::Pipes;
use crate::object::ObjectBag;
use crate::value::{Value, ValueError};

pub(crate) struct Scope {
    values: Vec<Value>,
    iterators: Vec<VecDeque<String>>,
    globals: Arc<ObjectBag>,
    pipes: Value,
}

impl Scope {
    pub(crate) fn new(root: Value, globals: Arc<ObjectBag>) -> Self {
        let pipes = Value::from_host(Pipes::new(Arc::clone(&globals)));
        Scope {
            values: vec![root],
            iterators: Vec::new(),
            globals,
            pipes,
        }
    }

    // ── Loop stacks ─────────────────────────────────────────────────────

    pub(crate) fn enter(&mut self, collection: Value, keys: VecDeque<String>) {
        self.values.push(collection);
        self.iterators.push(keys);
    }

    /// Move to the next key of the innermost loop; false on its last key.
    pub(crate) fn next_key(&mut self) -> bool {
        match self.iterators.last_mut() {
            Some(keys) if keys.len() > 1 => {
                keys.pop_front();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn leave(&mut self) {
        self.iterators.pop();
        // The root is never popped
        if self.values.len() > 1 {
            self.values.pop();
        }
    }

    #[inline]
    fn depth(&self) -> usize {
        self.iterators.len()
    }

    fn item_at(&self, depth: usize) -> Result<Value, ValueError> {
        if depth == 0 {
            return Ok(self.values[0].clone());
        }
        match self.iterators[depth - 1].front() {
            Some(key) => self.values[depth].get(key),
            None => Ok(Value::Undefined),
        }
    }

    /// The innermost loop's current item, or the root outside loops.
    fn current(&self) -> Result<Value, ValueError> {
        self.item_at(self.depth())
    }

    /// The enclosing loop's current item, or the root.
    fn outer(&self) -> Result<Value, ValueError> {
        self.item_at(self.depth().saturating_sub(1))
    }

    fn current_key(&self) -> Value {
        self.iterators
            .last()
            .and_then(VecDeque::front)
            .map_or(Value::Undefined, |key| Value::from(key.as_str()))
    }

    // ── Paths ───────────────────────────────────────────────────────────

    fn resolve_path(&self, path: &ObjectPath) -> Result<Value, ValueError> {
        if path.refers_to_index() {
            return Ok(self.current_key());
        }

        let mut value = self.current()?;
        for (i, segment) in path.segments.iter().enumerate() {
            match segment {
                Segment::SelfRef | Segment::Index => {}
                Segment::Outer => value = self.outer()?,
                // Only the leading key falls back to the globals table
                Segment::Key(key) if i == 0 => {
                    value = match value.lookup(key) {
                        Ok(Some(found)) => found,
                        Ok(None) | Err(_) => self.globals.get(key).unwrap_or(Value::Undefined),
                    };
                }
                Segment::Key(key) => value = value.get(key)?,
            }
        }
        Ok(value)
    }

    fn eval_argument(&self, argument: &Argument) -> Result<Value, ValueError> {
        match argument {
            Argument::Path(path) => self.resolve_path(path),
            Argument::Literal(literal) => Ok(literal.to_value()),
        }
    }

    // ── Pipes ───────────────────────────────────────────────────────────

    /// Evaluate a pipe left to right. A stage that names no known function
    /// ends the pipe with `Null`.
    pub(crate) fn eval_pipe(&self, expr: &PipeExpr) -> Result<Value, ValueError> {
        let (mut value, stages) = match &expr.head {
            Head::Path(path) => match self.prefix_call(path, &expr.stages)? {
                Some(Some(value)) => (value, &expr.stages[1..]),
                Some(None) => return Ok(Value::Null),
                None => (self.resolve_path(path)?, &expr.stages[..]),
            },
            Head::Literal(literal) => (literal.to_value(), &expr.stages[..]),
        };
        for stage in stages {
            match self.apply_stage(value, &stage.name, &stage.args)? {
                Some(next) => value = next,
                None => return Ok(Value::Null),
            }
        }
        Ok(value)
    }

    /// `empty items` reads as `items empty`: a leading word that names a
    /// built-in pipe and resolves to nothing is applied to the path after it.
    fn prefix_call(
        &self,
        head: &ObjectPath,
        stages: &[Stage],
    ) -> Result<Option<Option<Value>>, ValueError> {
        let (name, subject) = match (head.segments.as_slice(), stages.first()) {
            ([Segment::Key(name)], Some(subject)) => (name, subject),
            _ => return Ok(None),
        };
        if !self.is_pipe(name)? || !self.resolve_path(head)?.is_undefined() {
            return Ok(None);
        }
        let value = self.resolve_path(&ObjectPath::parse(&subject.name))?;
        self.apply_stage(value, name, &subject.args).map(Some)
    }

    fn is_pipe(&self, name: &str) -> Result<bool, ValueError> {
        Ok(self.pipes.lookup(name)?.map_or(false, |f| f.is_function()))
    }

    /// Built-in pipes receive the upstream value as their first argument;
    /// a same-named method on the value is called with the value as `this`.
    fn apply_stage(
        &self,
        value: Value,
        name: &str,
        arguments: &[Argument],
    ) -> Result<Option<Value>, ValueError> {
        let args = arguments
            .iter()
            .map(|argument| self.eval_argument(argument))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(pipe) = self.pipes.lookup(name)?.filter(Value::is_function) {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(value);
            call_args.extend(args);
            return pipe.invoke(&self.pipes, &call_args).map(Some);
        }

        if value.is_object() {
            if let Some(method) = value.lookup(name)?.filter(Value::is_function) {
                return method.invoke(&value, &args).map(Some);
            }
        }

        debug!(
            "no pipe or method '{}' for {} value; yielding null",
            name,
            value.type_of()
        );
        Ok(None)
    }
}
