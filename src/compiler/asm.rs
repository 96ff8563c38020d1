//! The assembler: builds a code vector and a parallel debug vector.
//!
//! Every word emitted carries a debug tag, the S-expression it was compiled
//! from, so run-time errors can name the source.
//!
//! Branches are emitted against labels and patched by [`Assembler::fix_labels`].
//! The patched operand is the unsigned distance between the branch and its label;
//! the opcode (`BR`/`BRN` forward, `BRB` backward) carries the direction.

use crate::data::{ElementType, RootVec, Storage, TableRoot, Tag, Value};
use crate::error::Result;
use crate::vm::Op;

/// A branch target within one assembler unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

pub struct Assembler<'s> {
    store: &'s Storage,
    code: RootVec,
    debug: RootVec,
    _root: TableRoot<'s>,
    /// Offset of each label, once marked.
    labels: Vec<Option<usize>>,
    /// Branches awaiting their label's offset: (label, offset of the branch).
    replace: Vec<(Label, usize)>,
    fixed: bool,
}

/// A finished unit: code and debug vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub code: Value,
    pub debug: Value,
}

impl<'s> Assembler<'s> {
    pub fn new(store: &'s Storage) -> Self {
        let code = RootVec::new();
        let debug = RootVec::new();
        let _root = store.root_tables(&[&code, &debug]);
        Assembler {
            store,
            code,
            debug,
            _root,
            labels: Vec::new(),
            replace: Vec::new(),
            fixed: false,
        }
    }

    /// Offset of the next word.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Push a pre-built word. In the code stream, a word that is not an
    /// instruction pushes itself (symbols and references push their value).
    pub fn push(&mut self, word: Value, debug: Value) {
        self.code.push(word);
        self.debug.push(debug);
    }

    pub fn op(&mut self, op: Op, debug: Value) {
        self.push(op.word(), debug);
    }

    pub fn op_with(&mut self, op: Op, operand: u64, debug: Value) {
        self.push(op.with(operand), debug);
    }

    /// An instruction followed by its operand word.
    pub fn op_word(&mut self, op: Op, word: Value, debug: Value) {
        self.op(op, debug);
        self.push(word, debug);
    }

    /// Push `v` verbatim at run time.
    pub fn quote(&mut self, v: Value, debug: Value) {
        self.op_word(Op::Quote, v, debug);
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Mark the current offset as `label`'s target.
    pub fn mark(&mut self, label: Label) {
        assert!(
            self.labels[label.0].is_none(),
            "label {} marked twice",
            label.0
        );
        self.labels[label.0] = Some(self.len());
    }

    /// Emit a branch to `label`; the distance is filled in by `fix_labels`.
    pub fn branch(&mut self, op: Op, label: Label, debug: Value) {
        debug_assert!(matches!(op, Op::Br | Op::Brb | Op::Brn));
        self.replace.push((label, self.len()));
        self.op(op, debug);
    }

    /// Resolve every pending branch, then clear the label tables.
    ///
    /// Panics on a branch to a label that was never marked: that is a compiler bug.
    pub fn fix_labels(&mut self) {
        assert!(!self.fixed, "labels fixed twice in one unit");
        for (label, at) in self.replace.drain(..) {
            let target = self.labels[label.0]
                .unwrap_or_else(|| panic!("branch at {at} to label {} that was never marked", label.0));
            let (op, _) = self
                .code
                .get(at)
                .and_then(Op::decode)
                .unwrap_or_else(|| panic!("no branch at offset {at}"));
            self.code.set(at, op.with(target.abs_diff(at) as u64));
        }
        self.labels.clear();
        self.fixed = true;
    }

    /// Fix labels (if not already fixed) and build the code and debug vectors.
    pub fn finish(mut self) -> Result<Unit> {
        if !self.fixed {
            self.fix_labels();
        }
        let code = self
            .store
            .root(self.store.vector_from_table(&self.code, Tag::Vector, ElementType::Any)?);
        let debug = self
            .store
            .vector_from_table(&self.debug, Tag::Vector, ElementType::Any)?;
        Ok(Unit {
            code: code.get(),
            debug,
        })
    }
}
