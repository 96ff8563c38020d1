//! Lambda lists and closure bodies.
//!
//! A closure is the 5-list `(ast ast-env code vm-env debug)`, where `ast` is
//! `(params . body)`. `code` and `debug` start out `NIL`; the first
//! application compiles the body and fills them in.
//!
//! At entry the VM stack holds the argument list. The prologue builds the new
//! frame beneath it, consuming arguments section by section:
//!
//! ```text
//!   FRAME n; SWAP                      frame arglist
//!   ARG p                              (required) bind head, pop it
//!   DUP BRN miss; ARG p; BR done       (&optional)
//!   miss: <default>; BINDARG p; done:
//!   REST p                             (&rest) bind what remains
//!   KEY :k; BRN miss; BINDARG k; BR done
//!   miss: <default>; BINDARG k; done:  (&key)
//!   ARGEND | POP                       frame
//!   PUSHENV
//! ```

use super::{Assembler, Compiler, SpecialForm};
use crate::data::print::pr_str;
use crate::data::{RootVec, TableRoot, Value};
use crate::env;
use crate::error::{Error, ErrorKind, Result};
use crate::vm::Op;
use crate::Runtime;

/// Closure slots.
pub(crate) const AST: usize = 0;
pub(crate) const AST_ENV: usize = 1;
pub(crate) const CODE: usize = 2;
pub(crate) const VM_ENV: usize = 3;
pub(crate) const DEBUG: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Required,
    Optional,
    Rest,
    Key,
}

/// A parsed lambda list. Symbols and default forms are held in a rooted
/// table, two words per parameter.
pub(super) struct Params<'s> {
    sections: Vec<Section>,
    words: RootVec,
    _root: TableRoot<'s>,
}

impl<'s> Params<'s> {
    pub(super) fn parse(rt: &'s Runtime, list: Value) -> Result<Self> {
        let store = rt.store();
        let words = RootVec::new();
        let _root = store.root_table(&words);
        let mut sections = Vec::new();
        let mut section = Section::Required;

        let bad = |msg: String| Error::new(ErrorKind::NotSymbol, msg);
        for item in store.list_items(list)? {
            let next = match SpecialForm::from_value(item) {
                Some(SpecialForm::Optional) => Some(Section::Optional),
                Some(SpecialForm::Rest) => Some(Section::Rest),
                Some(SpecialForm::Key) => Some(Section::Key),
                _ => None,
            };
            if let Some(next) = next {
                if next <= section {
                    return Err(bad(format!("{} out of order", pr_str(store, item))));
                }
                if section == Section::Rest && sections.last() != Some(&Section::Rest) {
                    return Err(bad("&rest needs a parameter".to_owned()));
                }
                section = next;
                continue;
            }
            let (sym, default) = match section {
                Section::Required | Section::Rest => (item, Value::NIL),
                Section::Optional | Section::Key if item.is_pair() => {
                    (store.head(item), store.nth(item, 1))
                }
                Section::Optional | Section::Key => (item, Value::NIL),
            };
            if !sym.is_symbol() {
                return Err(bad(format!(
                    "parameter must be a symbol, got {}",
                    pr_str(store, sym)
                )));
            }
            if section == Section::Rest && sections.last() == Some(&Section::Rest) {
                return Err(bad("&rest takes exactly one parameter".to_owned()));
            }
            sections.push(section);
            words.push(sym);
            words.push(default);
        }
        if section == Section::Rest && sections.last() != Some(&Section::Rest) {
            return Err(bad("&rest needs a parameter".to_owned()));
        }
        Ok(Params {
            sections,
            words,
            _root,
        })
    }

    fn len(&self) -> usize {
        self.sections.len()
    }

    fn symbol(&self, i: usize) -> Value {
        self.words.get(2 * i).unwrap_or_default()
    }

    fn default(&self, i: usize) -> Value {
        self.words.get(2 * i + 1).unwrap_or_default()
    }

    fn takes_any(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s, Section::Rest | Section::Key))
    }
}

impl<'r> Compiler<'r> {
    /// Compile a closure's (or macro's) body and store the code in it.
    pub fn compile_closure(&self, closure: Value) -> Result<()> {
        let store = self.rt.store();
        let closure = store.root(closure);
        let ast = store.root(store.nth(closure.get(), AST));
        let ast_env = store.root(store.nth(closure.get(), AST_ENV));
        let params = Params::parse(self.rt, store.head(ast.get()))?;

        // The body sees a frame shaped like the one the prologue builds.
        let shape = store.root(env::make_frame(store, params.len())?);
        for i in 0..params.len() {
            env::bind(store, shape.get(), params.symbol(i), Value::UNBOUND)?;
        }
        let inner = store.root(store.cons(shape.get(), ast_env.get())?);

        let dbg = store.head(ast.get());
        let mut asm = Assembler::new(store);
        asm.op_with(Op::Frame, params.len() as u64, dbg);
        asm.op(Op::Swap, dbg);
        for i in 0..params.len() {
            let dbg = store.head(ast.get());
            match params.sections[i] {
                Section::Required => asm.op_word(Op::Arg, params.symbol(i), dbg),
                Section::Optional => {
                    let (missing, done) = (asm.label(), asm.label());
                    asm.op(Op::Dup, dbg);
                    asm.branch(Op::Brn, missing, dbg);
                    asm.op_word(Op::Arg, params.symbol(i), dbg);
                    asm.branch(Op::Br, done, dbg);
                    asm.mark(missing);
                    self.compile(&mut asm, params.default(i), ast_env.get())?;
                    asm.op_word(Op::BindArg, params.symbol(i), store.head(ast.get()));
                    asm.mark(done);
                }
                Section::Rest => asm.op_word(Op::Rest, params.symbol(i), dbg),
                Section::Key => {
                    let name = store.string_value(params.symbol(i)).unwrap_or_default();
                    let keyword = self.rt.intern(&format!(":{name}"))?;
                    let dbg = store.head(ast.get());
                    let (missing, done) = (asm.label(), asm.label());
                    asm.op_word(Op::Key, keyword, dbg);
                    asm.branch(Op::Brn, missing, dbg);
                    asm.op_word(Op::BindArg, params.symbol(i), dbg);
                    asm.branch(Op::Br, done, dbg);
                    asm.mark(missing);
                    self.compile(&mut asm, params.default(i), ast_env.get())?;
                    asm.op_word(Op::BindArg, params.symbol(i), store.head(ast.get()));
                    asm.mark(done);
                }
            }
        }
        let dbg = store.head(ast.get());
        asm.op(if params.takes_any() { Op::Pop } else { Op::ArgEnd }, dbg);
        asm.op(Op::PushEnv, dbg);
        self.compile_body(&mut asm, &ast, 0, &inner)?;
        asm.op(Op::Ret, store.head(ast.get()));

        let unit = asm.finish()?;
        let c = closure.get();
        store.rplaca(store.nthcdr(c, CODE), unit.code)?;
        store.rplaca(store.nthcdr(c, DEBUG), unit.debug)?;
        tracing::debug!(params = %pr_str(store, store.head(ast.get())), "compiled closure");
        Ok(())
    }
}
