//! Flat instruction interpreter for compiled templates.
//!
//! A `CompiledTemplate` is produced by `crate::compiler::TemplateCompiler`.
//! Running it walks the `instrs` vector with a single instruction pointer;
//! `if` and `foreach` blocks are jumps, never nested calls. Loop state lives
//! on two explicit stacks held by the `Scope`: the collection being iterated
//! at each depth and the queue of keys it still has to visit.

use std::collections::VecDeque;

use crate::ast::PipeExpr;
use crate::evaluator::Scope;
use crate::utils::{collapse_tag_whitespace, escape_html};
use crate::value::{Value, ValueError};

// ---------------------------------------------------------------------------
// Instruction set
// ---------------------------------------------------------------------------

/// A single template instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Append literal text.
    Text(String),
    /// Evaluate a pipe and append its string form, HTML-escaped unless `raw`.
    Eval { expr: PipeExpr, raw: bool },
    /// Evaluate the loop source and push it with its key queue. Zero keys jump
    /// to `end` (just past the matching `IterationEnd`) without pushing.
    IterationStart { source: PipeExpr, end: usize },
    /// Advance the innermost queue and jump back to `start + 1`, or pop the
    /// loop once its last key is done.
    IterationEnd { start: usize },
    /// OR across `groups`, XOR `negate`; false jumps to `target`.
    Test {
        groups: Vec<PipeExpr>,
        negate: bool,
        target: usize,
    },
    /// Unconditional jump.
    Jump(usize),
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled template: immutable once built and shared through the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    pub(crate) instrs: Vec<Instr>,
}

impl CompiledTemplate {
    pub fn instructions(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Virtual machine
// ---------------------------------------------------------------------------

pub(crate) struct Vm<'prog> {
    prog: &'prog CompiledTemplate,
    out: String,
}

impl<'prog> Vm<'prog> {
    pub(crate) fn new(prog: &'prog CompiledTemplate) -> Self {
        Vm {
            prog,
            out: String::with_capacity(256),
        }
    }

    /// Walk the program once and return the post-processed output.
    pub(crate) fn run(mut self, scope: &mut Scope) -> Result<String, ValueError> {
        let instrs = &self.prog.instrs;
        let mut ip: usize = 0;

        while let Some(instr) = instrs.get(ip) {
            match instr {
                Instr::Text(text) => {
                    self.out.push_str(text);
                    ip += 1;
                }
                Instr::Eval { expr, raw } => {
                    let value = scope.eval_pipe(expr)?;
                    // Undefined and null render as nothing
                    if value.is_evaluable() {
                        let text = value.to_string();
                        if *raw {
                            self.out.push_str(&text);
                        } else {
                            self.out.push_str(&escape_html(&text));
                        }
                    }
                    ip += 1;
                }
                Instr::IterationStart { source, end } => {
                    let collection = scope.eval_pipe(source)?;
                    let keys: VecDeque<String> = collection.keys().collect();
                    if keys.is_empty() {
                        ip = *end;
                    } else {
                        scope.enter(collection, keys);
                        ip += 1;
                    }
                }
                Instr::IterationEnd { start } => {
                    if scope.next_key() {
                        ip = start + 1;
                    } else {
                        scope.leave();
                        ip += 1;
                    }
                }
                Instr::Test {
                    groups,
                    negate,
                    target,
                } => {
                    let mut passed = false;
                    for group in groups {
                        if is_satisfied(&scope.eval_pipe(group)?) {
                            passed = true;
                            break;
                        }
                    }
                    if passed ^ *negate {
                        ip += 1;
                    } else {
                        ip = *target;
                    }
                }
                Instr::Jump(target) => {
                    ip = *target;
                }
            }
        }

        Ok(collapse_tag_whitespace(&self.out))
    }
}

/// A condition group holds when its value is evaluable and not literally `false`.
#[inline]
fn is_satisfied(value: &Value) -> bool {
    value.is_evaluable() && !matches!(value, Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectBag;
    use crate::parser::parse_pipe;
    use serde_json::json;
    use std::sync::Arc;

    fn pipe(text: &str) -> PipeExpr {
        parse_pipe(text).unwrap()
    }

    fn run(instrs: Vec<Instr>, data: serde_json::Value) -> String {
        let prog = CompiledTemplate { instrs };
        let mut scope = Scope::new(Value::from(data), Arc::new(ObjectBag::new()));
        Vm::new(&prog).run(&mut scope).unwrap()
    }

    #[test]
    fn test_loop_reenters_body() {
        let instrs = vec![
            Instr::IterationStart { source: pipe("items"), end: 4 },
            Instr::Eval { expr: pipe("."), raw: false },
            Instr::Text(";".to_string()),
            Instr::IterationEnd { start: 0 },
            Instr::Text("end".to_string()),
        ];
        assert_eq!(run(instrs.clone(), json!({"items": ["a", "b"]})), "a;b;end");
        assert_eq!(run(instrs, json!({"items": []})), "end");
    }

    #[test]
    fn test_condition_jumps() {
        let instrs = vec![
            Instr::Test { groups: vec![pipe("a"), pipe("b")], negate: false, target: 3 },
            Instr::Text("yes".to_string()),
            Instr::Jump(4),
            Instr::Text("no".to_string()),
        ];
        assert_eq!(run(instrs.clone(), json!({"a": false, "b": 0})), "yes");
        assert_eq!(run(instrs.clone(), json!({"a": false})), "no");
        assert_eq!(run(instrs, json!({"a": null, "b": false})), "no");
    }

    #[test]
    fn test_eval_escapes_and_skips_undefined() {
        let instrs = vec![
            Instr::Eval { expr: pipe("html"), raw: false },
            Instr::Text("|".to_string()),
            Instr::Eval { expr: pipe("html"), raw: true },
            Instr::Eval { expr: pipe("missing"), raw: false },
        ];
        assert_eq!(run(instrs, json!({"html": "<i>"})), "&lt;i&gt;|<i>");
    }
}
