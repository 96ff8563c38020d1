//! Special forms.
//!
//! The reader replaces each special-form name with an immediate marker word, so
//! the compiler recognizes a special form by the head word alone, whatever
//! symbols happen to be bound.

use super::{Assembler, Compiler};
use crate::data::{Root, Value};
use crate::env;
use crate::error::{Error, ErrorKind, Result};
use crate::vm::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecialForm {
    Setq,
    Progn,
    If,
    Let,
    Lambda,
    Macro,
    Quote,
    Quasiquote,
    Unquote,
    SpliceUnquote,
    Macroexpand,
    Optional,
    Rest,
    Key,
}

impl SpecialForm {
    const ALL: [SpecialForm; 14] = [
        SpecialForm::Setq,
        SpecialForm::Progn,
        SpecialForm::If,
        SpecialForm::Let,
        SpecialForm::Lambda,
        SpecialForm::Macro,
        SpecialForm::Quote,
        SpecialForm::Quasiquote,
        SpecialForm::Unquote,
        SpecialForm::SpliceUnquote,
        SpecialForm::Macroexpand,
        SpecialForm::Optional,
        SpecialForm::Rest,
        SpecialForm::Key,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Setq => "setq",
            SpecialForm::Progn => "progn",
            SpecialForm::If => "if",
            SpecialForm::Let => "let",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Macro => "macro",
            SpecialForm::Quote => "quote",
            SpecialForm::Quasiquote => "quasiquote",
            SpecialForm::Unquote => "unquote",
            SpecialForm::SpliceUnquote => "splice-unquote",
            SpecialForm::Macroexpand => "macroexpand",
            SpecialForm::Optional => "&optional",
            SpecialForm::Rest => "&rest",
            SpecialForm::Key => "&key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|form| form.name() == name)
    }

    pub fn from_value(v: Value) -> Option<Self> {
        Self::ALL.get(v.as_special()? as usize).copied()
    }

    /// The marker word the reader produces for this form.
    pub fn value(self) -> Value {
        Value::special(self as u8)
    }
}

impl<'r> Compiler<'r> {
    pub(super) fn compile_special(
        &self,
        asm: &mut Assembler,
        form: SpecialForm,
        expr: &Root,
        env: &Root,
    ) -> Result<()> {
        match form {
            SpecialForm::Setq => self.compile_setq(asm, expr, env),
            SpecialForm::Progn => self.compile_body(asm, expr, 0, env),
            SpecialForm::If => self.compile_if(asm, expr, env),
            SpecialForm::Let => self.compile_let(asm, expr, env),
            SpecialForm::Lambda => self.compile_lambda(asm, Op::Lambda, expr, env),
            SpecialForm::Macro => self.compile_lambda(asm, Op::Macro, expr, env),
            SpecialForm::Quote => {
                self.expect_args(expr, "quote", 1, 1)?;
                let datum = self.arg(expr, 0);
                asm.quote(datum, expr.get());
                Ok(())
            }
            SpecialForm::Quasiquote => {
                self.expect_args(expr, "quasiquote", 1, 1)?;
                self.compile_quasi(asm, self.arg(expr, 0), env)
            }
            SpecialForm::Macroexpand => self.compile_macroexpand(asm, expr, env),
            SpecialForm::Unquote
            | SpecialForm::SpliceUnquote
            | SpecialForm::Optional
            | SpecialForm::Rest
            | SpecialForm::Key => Err(Error::new(
                ErrorKind::InvalidApplication,
                format!("{} outside its context", form.name()),
            )),
        }
    }

    /// `(setq sym value)`. The value stays on the stack.
    fn compile_setq(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        self.expect_args(expr, "setq", 2, 2)?;
        self.expect_symbol(self.arg(expr, 0))?;
        self.compile(asm, self.arg(expr, 1), env.get())?;
        let sym = self.arg(expr, 0);
        let target = match env::resolve(self.rt.store(), env.get(), sym) {
            Some(r) => Value::reference(r),
            None => sym,
        };
        asm.op_word(Op::Set, target, expr.get());
        Ok(())
    }

    /// `(if test then [else])`.
    fn compile_if(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        let argc = self.expect_args(expr, "if", 2, 3)?;
        let (otherwise, end) = (asm.label(), asm.label());
        self.compile(asm, self.arg(expr, 0), env.get())?;
        asm.branch(Op::Brn, otherwise, expr.get());
        self.compile(asm, self.arg(expr, 1), env.get())?;
        asm.branch(Op::Br, end, expr.get());
        asm.mark(otherwise);
        if argc == 3 {
            self.compile(asm, self.arg(expr, 2), env.get())?;
        } else {
            asm.push(Value::NIL, expr.get());
        }
        asm.mark(end);
        Ok(())
    }

    /// `(let ((sym value) ...) body...)`.
    ///
    /// Bindings are sequential: each value sees the bindings before it.
    fn compile_let(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        let store = self.rt.store();
        self.expect_args(expr, "let", 1, usize::MAX)?;
        let count = store.length(self.arg(expr, 0))?;

        asm.op_with(Op::Frame, count as u64, expr.get());
        asm.op(Op::PushEnv, expr.get());
        let shape = store.root(env::make_frame(store, count)?);
        let inner = store.root(store.cons(shape.get(), env.get())?);

        // A binding is `(sym init)` or a bare `sym`, bound to nil.
        let binding = |i: usize| {
            let b = store.nth(self.arg(expr, 0), i);
            let sym = if b.is_pair() { store.head(b) } else { b };
            (b, sym)
        };
        for i in 0..count {
            let (b, sym) = binding(i);
            self.expect_symbol(sym)?;
            self.compile(asm, store.nth(b, 1), inner.get())?;
            // Compiling may have moved the binding.
            let (b, sym) = binding(i);
            asm.op_word(Op::Bind, sym, b);
            env::bind(store, shape.get(), sym, Value::UNBOUND)?;
        }

        self.compile_body(asm, expr, 1, &inner)?;
        asm.op(Op::PopEnv, expr.get());
        Ok(())
    }

    /// `(lambda params body...)` or `(macro params body...)`.
    ///
    /// The body is compiled on first application; here we only capture the
    /// AST and the static environment it will be compiled against.
    fn compile_lambda(&self, asm: &mut Assembler, op: Op, expr: &Root, env: &Root) -> Result<()> {
        let store = self.rt.store();
        self.expect_args(expr, op.name(), 1, usize::MAX)?;
        // Reject bad lambda lists now rather than at first call.
        super::lambda::Params::parse(self.rt, self.arg(expr, 0))?;
        let literal = store.cons(store.tail(expr.get()), env.get())?;
        asm.op_word(op, literal, expr.get());
        Ok(())
    }

    /// Quasiquote builds its result with `CONS` and `APPEND`, evaluating
    /// only the unquoted parts.
    fn compile_quasi(&self, asm: &mut Assembler, template: Value, env: &Root) -> Result<()> {
        let store = self.rt.store();
        store.ensure_root_headroom()?;
        let template = store.root(template);
        let t = template.get();
        if !t.is_pair() {
            asm.quote(t, t);
            return Ok(());
        }
        let head = store.head(t);
        if head == SpecialForm::Unquote.value() {
            return self.compile(asm, store.nth(t, 1), env.get());
        }
        if head == SpecialForm::SpliceUnquote.value() {
            return Err(Error::new(
                ErrorKind::InvalidApplication,
                "splice-unquote outside a list",
            ));
        }
        let spliced = head.is_pair() && store.head(head) == SpecialForm::SpliceUnquote.value();
        if spliced {
            self.compile(asm, store.nth(head, 1), env.get())?;
        } else {
            self.compile_quasi(asm, head, env)?;
        }
        self.compile_quasi(asm, store.tail(template.get()), env)?;
        asm.op(if spliced { Op::Append } else { Op::Cons }, template.get());
        Ok(())
    }

    /// `(macroexpand form)`: expand the value of `form` until its head is
    /// not bound to a macro.
    fn compile_macroexpand(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        self.expect_args(expr, "macroexpand", 1, 1)?;
        self.compile(asm, self.arg(expr, 0), env.get())?;
        let e = expr.get();
        let (top, not_macro, done) = (asm.label(), asm.label(), asm.label());
        asm.mark(top);
        asm.op(Op::Dup, e);
        asm.op(Op::Consp, e);
        asm.branch(Op::Brn, done, e);
        asm.op(Op::Dup, e);
        asm.op(Op::Car, e);
        asm.op(Op::Lookup, e);
        asm.op(Op::Dup, e);
        asm.op(Op::MacroP, e);
        asm.branch(Op::Brn, not_macro, e);
        asm.op(Op::Swap, e);
        asm.op(Op::Cdr, e);
        asm.op(Op::Expand, e);
        asm.branch(Op::Brb, top, e);
        asm.mark(not_macro);
        asm.op(Op::Pop, e);
        asm.mark(done);
        Ok(())
    }
}
