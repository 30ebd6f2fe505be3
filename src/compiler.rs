//! Template compiler: lowers template source into a flat `CompiledTemplate`.
//!
//! Tags are compiled in a single pass. Open blocks sit on a stack; closing a
//! block back-patches the jump targets recorded when it was opened, so every
//! `if`/`foreach` becomes plain jumps and no nesting survives into the VM.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use crate::parser::{parse_tag, split_template, ParseError, Piece, Tag, TagSite};
use crate::vm::{CompiledTemplate, Instr};

// ---------------------------------------------------------------------------
// Compiler state
// ---------------------------------------------------------------------------

/// An open block waiting for its closing tag.
enum Block<'a> {
    Foreach {
        start: usize,
        site: TagSite<'a>,
    },
    If {
        test: usize,
        /// Jump emitted by `else` at the end of the first branch.
        else_jump: Option<usize>,
        site: TagSite<'a>,
    },
}

impl Block<'_> {
    fn name(&self) -> &'static str {
        match self {
            Block::Foreach { .. } => "foreach",
            Block::If { .. } => "if",
        }
    }
}

pub(crate) struct TemplateCompiler<'a> {
    instrs: Vec<Instr>,
    blocks: Vec<Block<'a>>,
    /// Lowest index text may still be merged into.
    label: usize,
}

impl<'a> TemplateCompiler<'a> {
    pub(crate) fn new() -> Self {
        TemplateCompiler {
            instrs: Vec::with_capacity(32),
            blocks: Vec::new(),
            label: 0,
        }
    }

    // ── Internal helpers ────────────────────────────────────────────────

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Index of the next instruction to be emitted.
    fn here(&self) -> usize {
        self.instrs.len()
    }

    /// Point the jump at `pos` to `target`.
    fn patch(&mut self, pos: usize, target: usize) {
        match &mut self.instrs[pos] {
            Instr::IterationStart { end, .. } => *end = target,
            Instr::Test { target: t, .. } => *t = target,
            Instr::Jump(t) => *t = target,
            other => debug_assert!(false, "patch: not a jump instruction at {}: {:?}", pos, other),
        }
    }

    fn push_text(&mut self, text: &str) {
        // Adjacent text runs merge unless a jump lands between them
        if self.here() > self.label {
            if let Some(Instr::Text(prev)) = self.instrs.last_mut() {
                prev.push_str(text);
                return;
            }
        }
        self.emit(Instr::Text(text.to_string()));
    }

    // ── Core compilation ─────────────────────────────────────────────────

    pub(crate) fn compile(mut self, source: &'a str) -> Result<CompiledTemplate, ParseError> {
        for piece in split_template(source) {
            match piece {
                Piece::Text(text) => self.push_text(text),
                Piece::Tag(site) => self.compile_tag(site)?,
            }
        }

        if let Some(block) = self.blocks.pop() {
            let site = match &block {
                Block::Foreach { site, .. } | Block::If { site, .. } => site,
            };
            return Err(ParseError::Unclosed {
                tag: site.text().to_string(),
                context: site.context(),
            });
        }

        Ok(CompiledTemplate {
            instrs: self.instrs,
        })
    }

    fn compile_tag(&mut self, site: TagSite<'a>) -> Result<(), ParseError> {
        match parse_tag(&site)? {
            Tag::Comment => {}
            Tag::Eval { expr, raw } => self.emit(Instr::Eval { expr, raw }),
            Tag::Foreach(source) => {
                let start = self.here();
                self.emit(Instr::IterationStart { source, end: 0 });
                self.blocks.push(Block::Foreach { start, site });
            }
            Tag::If { negate, groups } => {
                let test = self.here();
                self.emit(Instr::Test {
                    groups,
                    negate,
                    target: 0,
                });
                self.blocks.push(Block::If {
                    test,
                    else_jump: None,
                    site,
                });
            }
            Tag::Else => self.compile_else(site)?,
            Tag::Close(name) => self.compile_close(&name, site)?,
        }
        Ok(())
    }

    /// `else` ends the first branch with a jump over the second and sends a
    /// failed test to the instruction after that jump.
    fn compile_else(&mut self, site: TagSite<'a>) -> Result<(), ParseError> {
        let (test, already) = match self.blocks.last() {
            Some(Block::If { test, else_jump, .. }) => (*test, else_jump.is_some()),
            _ => {
                return Err(ParseError::UnexpectedElse {
                    tag: site.text().to_string(),
                    context: site.context(),
                })
            }
        };
        if already {
            return Err(site.syntax_error("second else in the same if block"));
        }

        let jump = self.here();
        self.emit(Instr::Jump(0));
        let target = self.here();
        self.patch(test, target);
        if let Some(Block::If { else_jump, .. }) = self.blocks.last_mut() {
            *else_jump = Some(jump);
        }
        Ok(())
    }

    fn compile_close(&mut self, name: &str, site: TagSite<'a>) -> Result<(), ParseError> {
        if name != "if" && name != "foreach" {
            return Err(site.syntax_error(format!("unknown block '{}'", name)));
        }

        let unbalanced = |expected: String| ParseError::Unbalanced {
            tag: site.text().to_string(),
            expected,
            context: site.context(),
        };
        match self.blocks.last().map(Block::name) {
            Some(open) if open == name => {}
            Some(open) => return Err(unbalanced(format!("{{{{/{}}}}}", open))),
            None => return Err(unbalanced("no closing tag".to_string())),
        }

        match self.blocks.pop() {
            Some(Block::Foreach { start, .. }) => {
                self.emit(Instr::IterationEnd { start });
                let end = self.here();
                self.patch(start, end);
            }
            Some(Block::If { test, else_jump, .. }) => {
                let end = self.here();
                match else_jump {
                    Some(jump) => self.patch(jump, end),
                    None => self.patch(test, end),
                }
                // Text after the block is a jump target; keep it separate
                self.label = end;
            }
            None => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Compiled templates keyed by their exact source text.
///
/// Unbounded and never evicted. Two threads compiling the same source at
/// once both insert an identical program; the later insert wins.
#[derive(Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, source: &str) -> Result<Arc<CompiledTemplate>, ParseError> {
        if let Some(found) = self.entries.read().get(source) {
            trace!("template cache hit ({} bytes)", source.len());
            return Ok(Arc::clone(found));
        }

        // Compile outside the lock
        let compiled = Arc::new(TemplateCompiler::new().compile(source)?);
        debug!(
            "compiled template ({} bytes, {} instructions)",
            source.len(),
            compiled.len()
        );
        self.entries
            .write()
            .insert(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
