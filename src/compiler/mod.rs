//! The compiler: lowers S-expressions to bytecode.
//!
//! Compilation is a single recursive pass against a static environment: a
//! chain of frames shaped like the ones the VM will have at run time. Variables
//! found in it compile to [`Ref`](crate::data::Ref) words; anything else stays a
//! symbol, resolved (and cached in place) by the VM on first execution.
//!
//! Lambda and macro bodies are not compiled here: `LAMBDA` captures the AST and
//! the static environment, and the body is compiled on first application
//! (see [`Compiler::compile_closure`]).

mod asm;
mod lambda;
mod special;

pub use asm::{Assembler, Label, Unit};
pub use special::SpecialForm;
pub(crate) use lambda::{CODE, DEBUG, VM_ENV};

use crate::data::print::pr_str;
use crate::data::{Root, Tag, Value};
use crate::env;
use crate::error::{Error, ErrorKind, Result};
use crate::vm::Op;
use crate::Runtime;

pub struct Compiler<'r> {
    rt: &'r Runtime,
}

impl<'r> Compiler<'r> {
    pub fn new(rt: &'r Runtime) -> Self {
        Compiler { rt }
    }

    /// Compile one top-level form against `env`; the unit ends in `HALT`.
    pub fn compile_toplevel(&self, expr: Value, env: Value) -> Result<Unit> {
        let store = self.rt.store();
        let expr = store.root(expr);
        let mut asm = Assembler::new(store);
        self.compile(&mut asm, expr.get(), env)?;
        asm.op(Op::Halt, expr.get());
        tracing::trace!(words = asm.len(), form = %self.rt.fragment(expr.get()), "compiled");
        asm.finish()
    }

    /// Compile `expr`, leaving its value on the stack.
    pub fn compile(&self, asm: &mut Assembler, expr: Value, env: Value) -> Result<()> {
        let store = self.rt.store();
        store.ensure_root_headroom()?;
        let expr = store.root(expr);
        let env = store.root(env);
        self.compile_expr(asm, &expr, &env)
            .map_err(|e| e.at(self.rt.fragment(expr.get())))
    }

    fn compile_expr(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        let e = expr.get();
        match e.tag() {
            Tag::Pair if e.is_nil() => asm.push(Value::NIL, e),
            Tag::Pair => self.compile_form(asm, expr, env)?,
            Tag::Symbol => self.compile_symbol(asm, e, env.get()),
            Tag::Vector => asm.push(e, e),
            Tag::Closure | Tag::Macro | Tag::Error => asm.quote(e, e),
            Tag::Pointer => {
                return Err(Error::new(
                    ErrorKind::InvalidInstruction,
                    "forwarding word in source",
                ))
            }
            Tag::Other => {
                if let Some(form) = SpecialForm::from_value(e) {
                    return Err(Error::new(
                        ErrorKind::InvalidApplication,
                        format!("{} is not a value", form.name()),
                    ));
                }
                if e.as_instr().is_some() || e.is_unbound() {
                    asm.quote(e, e);
                } else {
                    asm.push(e, e);
                }
            }
        }
        Ok(())
    }

    fn compile_symbol(&self, asm: &mut Assembler, sym: Value, env: Value) {
        let store = self.rt.store();
        if self.rt.is_keyword(sym) {
            asm.quote(sym, sym);
            return;
        }
        match env::resolve(store, env, sym) {
            Some(r) => asm.push(Value::reference(r), sym),
            None => match self.rt.builtin_for(sym) {
                // Builtins are values: push the opcode as data.
                Some(op) => asm.quote(op.word(), sym),
                None => asm.push(sym, sym),
            },
        }
    }

    fn compile_form(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        let head = self.rt.store().head(expr.get());
        match SpecialForm::from_value(head) {
            Some(form) => self.compile_special(asm, form, expr, env),
            None => self.compile_application(asm, expr, env),
        }
    }

    /// Number of arguments in a call form, checking it is a proper list.
    fn argc(&self, expr: &Root) -> Result<usize> {
        let store = self.rt.store();
        store.length(store.tail(expr.get()))
    }

    /// The `i`th argument of a call form. Re-read after every allocation.
    fn arg(&self, expr: &Root, i: usize) -> Value {
        self.rt.store().nth(expr.get(), i + 1)
    }

    /// Compile arguments `from..` of a form left to right.
    fn compile_args(&self, asm: &mut Assembler, expr: &Root, from: usize, env: &Root) -> Result<()> {
        for i in from..self.argc(expr)? {
            self.compile(asm, self.arg(expr, i), env.get())?;
        }
        Ok(())
    }

    /// Push each argument unevaluated.
    fn quote_args(&self, asm: &mut Assembler, expr: &Root) -> Result<()> {
        for i in 0..self.argc(expr)? {
            let arg = self.arg(expr, i);
            asm.quote(arg, arg);
        }
        Ok(())
    }

    /// Application, in order of preference:
    /// 1.  a builtin named directly: arguments, then the opcode;
    /// 2.  a symbol statically bound to a closure or macro: a direct call;
    /// 3.  anything else: decide between macro and closure at run time.
    fn compile_application(&self, asm: &mut Assembler, expr: &Root, env: &Root) -> Result<()> {
        let store = self.rt.store();
        let argc = self.argc(expr)?;
        let head = store.head(expr.get());

        if head.is_symbol() && env::resolve(store, env.get(), head).is_none() {
            if let Some(op) = self.rt.builtin_for(head) {
                let arity = op.arity().unwrap_or_default();
                if arity != argc {
                    return Err(Error::arg_count(op.name(), arity, argc));
                }
                self.compile_args(asm, expr, 0, env)?;
                asm.op(op, expr.get());
                return Ok(());
            }
        }

        let known = if head.is_symbol() {
            env::resolve(store, env.get(), head)
                .and_then(|r| env::load(store, env.get(), r).ok())
                .filter(|v| v.is_closure() || v.is_macro())
        } else {
            None
        };
        if let Some(callee) = known {
            let is_macro = callee.is_macro();
            self.compile(asm, head, env.get())?;
            if is_macro {
                self.quote_args(asm, expr)?;
            } else {
                self.compile_args(asm, expr, 0, env)?;
            }
            asm.push(Value::int(argc as i64), expr.get());
            asm.op(Op::Ap, expr.get());
            return Ok(());
        }

        let (evaluated, apply) = (asm.label(), asm.label());
        self.compile(asm, head, env.get())?;
        let e = expr.get();
        asm.op(Op::Dup, e);
        asm.op(Op::MacroP, e);
        asm.branch(Op::Brn, evaluated, e);
        self.quote_args(asm, expr)?;
        asm.branch(Op::Br, apply, expr.get());
        asm.mark(evaluated);
        self.compile_args(asm, expr, 0, env)?;
        asm.mark(apply);
        asm.push(Value::int(argc as i64), expr.get());
        asm.op(Op::Ap, expr.get());
        Ok(())
    }

    /// Compile `expr[from..]` as a sequence, keeping only the last value.
    fn compile_body(&self, asm: &mut Assembler, expr: &Root, from: usize, env: &Root) -> Result<()> {
        let argc = self.argc(expr)?;
        if argc <= from {
            asm.push(Value::NIL, expr.get());
            return Ok(());
        }
        for i in from..argc {
            if i > from {
                asm.op(Op::Pop, expr.get());
            }
            self.compile(asm, self.arg(expr, i), env.get())?;
        }
        Ok(())
    }

    fn expect_args(&self, expr: &Root, name: &str, min: usize, max: usize) -> Result<usize> {
        let argc = self.argc(expr)?;
        if argc < min || argc > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(Error::new(
                ErrorKind::ArgCount,
                format!("{name} takes {expected} arguments, got {argc}"),
            ));
        }
        Ok(argc)
    }

    fn expect_symbol(&self, v: Value) -> Result<Value> {
        if v.is_symbol() {
            Ok(v)
        } else {
            Err(Error::new(
                ErrorKind::NotSymbol,
                format!("expected a symbol, got {}", pr_str(self.rt.store(), v)),
            ))
        }
    }
}
