//! The bytecode virtual machine.
//!
//! This VM has three pieces of state, all rooted for as long as it lives:
//!
//! -   The _operand stack_.
//! -   The _call stack_: one return frame (code, debug, pc, environment) per
//!     active closure call.
//! -   The _registers_: the code and debug vectors being executed, and the
//!     current environment.
//!
//! A word in the code vector is either an instruction, or a datum. Data push
//! themselves, except symbols and references, which push their value. A symbol
//! is resolved on first execution and the code word is overwritten with the
//! resulting reference, so later executions skip the search.
//!
//! Macro application and the `eval`/`exec` builtins run on nested VMs. A VM
//! started by `eval`, `exec`, or [`Runtime::eval`] is a _boundary_: a value
//! thrown anywhere below it, including inside macro expansions, unwinds to
//! the nearest boundary and its handler runs there.

mod builtins;
mod ops;
#[cfg(test)]
mod vm_test;

pub use ops::{Op, BUILTINS};

use crate::compiler::{Compiler, Unit, CODE, DEBUG, VM_ENV};
use crate::data::print::pr_str;
use crate::data::{RootVec, TableRoot, Tag, Value};
use crate::env;
use crate::error::{Error, ErrorKind, Result};
use crate::Runtime;

/// Register slots.
const CODE_REG: usize = 0;
const DEBUG_REG: usize = 1;
const ENV_REG: usize = 2;

/// Words per return frame: code, debug, pc, env.
const FRAME_WORDS: usize = 4;

pub struct Vm<'r> {
    rt: &'r Runtime,
    stack: RootVec,
    calls: RootVec,
    regs: RootVec,
    pc: usize,
    boundary: bool,
    _root: TableRoot<'r>,
}

impl<'r> Vm<'r> {
    pub fn new(rt: &'r Runtime) -> Self {
        let stack = RootVec::new();
        let calls = RootVec::new();
        let regs = RootVec::from_values([Value::NIL; 3]);
        let _root = rt.store().root_tables(&[&stack, &calls, &regs]);
        Vm {
            rt,
            stack,
            calls,
            regs,
            pc: 0,
            boundary: true,
            _root,
        }
    }

    /// A nested VM for a macro expansion (`boundary` false) or an
    /// `eval`/`exec` run (`boundary` true).
    fn child(&self, boundary: bool) -> Result<Vm<'r>> {
        self.rt.store().ensure_root_headroom()?;
        let mut vm = Vm::new(self.rt);
        vm.boundary = boundary;
        Ok(vm)
    }

    /// Run a compiled unit in `env` until it halts.
    pub fn exec(&mut self, unit: Unit, env: Value) -> Result<Value> {
        self.regs.set(CODE_REG, unit.code);
        self.regs.set(DEBUG_REG, unit.debug);
        self.regs.set(ENV_REG, env);
        self.pc = 0;
        self.run()
    }

    /// Apply `f` to the list `args` and run to completion.
    pub fn apply(&mut self, f: Value, args: Value) -> Result<Value> {
        if f.is_closure() || f.is_macro() {
            self.enter(f, args, false)?;
            return self.run();
        }
        match Op::decode(f) {
            Some((Op::Throw, _)) => {
                self.raise(self.rt.store().head(args))?;
                self.run()
            }
            Some((op, _)) if op.is_builtin() => {
                self.push_builtin_args(op, args)?;
                self.builtin(op)?;
                self.pop()
            }
            _ => Err(not_callable(self.rt, f)),
        }
    }

    fn code(&self) -> Value {
        self.regs.get(CODE_REG).unwrap_or_default()
    }

    fn debug(&self) -> Value {
        self.regs.get(DEBUG_REG).unwrap_or_default()
    }

    fn env(&self) -> Value {
        self.regs.get(ENV_REG).unwrap_or_default()
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(underflow)
    }

    fn peek(&self) -> Result<Value> {
        self.stack.peek().ok_or_else(underflow)
    }

    /// The word `n` below the top of the stack.
    fn below(&self, n: usize) -> Result<Value> {
        let len = self.stack.len();
        if n >= len {
            return Err(underflow());
        }
        self.stack.get(len - 1 - n).ok_or_else(underflow)
    }

    fn set_top(&mut self, v: Value) -> Result<()> {
        let len = self.stack.len();
        if len == 0 {
            return Err(underflow());
        }
        self.stack.set(len - 1, v);
        Ok(())
    }

    fn fetch(&self, at: usize) -> Result<Value> {
        self.rt.store().vget(self.code(), at).map_err(|_| {
            Error::new(
                ErrorKind::InvalidInstruction,
                format!("pc {at} is past the end of the code"),
            )
        })
    }

    /// Overwrite a code word: used to cache resolved references.
    fn patch(&self, at: usize, word: Value) -> Result<()> {
        self.rt.store().vset(self.code(), at, word)
    }

    fn run(&mut self) -> Result<Value> {
        loop {
            match self.step() {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(e) if e.kind == ErrorKind::Thrown => {
                    if !self.boundary {
                        return Err(e);
                    }
                    let value = self.rt.take_thrown();
                    self.raise(value)?;
                }
                Err(e) => {
                    let inner = e.positions.len();
                    let store = self.rt.store();
                    let sites = RootVec::new();
                    let _guard = store.root_table(&sites);
                    self.sites(&sites);
                    let e = self.locate(e, &sites);
                    if !self.boundary || e.is_fatal() || !self.rt.exception_handlers().is_pair() {
                        return Err(e);
                    }
                    tracing::debug!(error = %e, "raising runtime error to handler");
                    let value = self.rt.error_value_with_forms(&e, inner, &sites)?;
                    self.raise(value)?;
                }
            }
        }
    }

    /// Execute one word. Returns the result when the run is over.
    fn step(&mut self) -> Result<Option<Value>> {
        let store = self.rt.store();
        let word = self.fetch(self.pc)?;
        let Some((op, operand)) = Op::decode(word) else {
            if word.as_instr().is_some() {
                return Err(Error::new(
                    ErrorKind::InvalidInstruction,
                    format!("unknown opcode in {word}"),
                ));
            }
            self.push_word(word)?;
            self.pc += 1;
            return Ok(None);
        };
        tracing::trace!(pc = self.pc, op = op.name(), operand, depth = self.stack.len(), "step");

        let next = self.pc + 1;
        match op {
            Op::Dup => {
                let v = self.peek()?;
                self.stack.push(v);
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.stack.push(a);
                self.stack.push(b);
            }
            Op::Quote => {
                let v = self.fetch(next)?;
                self.stack.push(v);
                self.pc += 2;
                return Ok(None);
            }
            Op::Frame => {
                let frame = env::make_frame(store, operand as usize)?;
                self.stack.push(frame);
            }
            Op::PushEnv => {
                let frame = self.pop()?;
                let env = store.cons(frame, self.env())?;
                self.regs.set(ENV_REG, env);
            }
            Op::PopEnv => {
                self.regs.set(ENV_REG, store.tail(self.env()));
            }
            Op::Bind => {
                let sym = self.fetch(next)?;
                let v = self.pop()?;
                env::bind(store, store.head(self.env()), sym, v)?;
                self.pc += 2;
                return Ok(None);
            }
            Op::Set => {
                self.set(next)?;
                self.pc += 2;
                return Ok(None);
            }
            Op::Lookup => {
                let sym = self.pop()?;
                let v = if sym.is_symbol() {
                    env::resolve(store, self.env(), sym)
                        .and_then(|r| env::load(store, self.env(), r).ok())
                        .unwrap_or_default()
                } else {
                    Value::NIL
                };
                self.stack.push(v);
            }
            Op::Arg | Op::BindArg | Op::Rest | Op::Key => {
                self.argument(op, next)?;
                self.pc += 2;
                return Ok(None);
            }
            Op::ArgEnd => {
                let rest = self.pop()?;
                if !rest.is_nil() {
                    return Err(Error::new(
                        ErrorKind::ArgCount,
                        format!("too many arguments: {} left over", pr_str(store, rest)),
                    ));
                }
            }
            Op::Br => {
                self.pc += operand as usize;
                return Ok(None);
            }
            Op::Brb => {
                self.pc = self.pc.checked_sub(operand as usize).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidInstruction, "branch before start of code")
                })?;
                return Ok(None);
            }
            Op::Brn => {
                let test = self.pop()?;
                self.pc += if test.is_nil() { operand as usize } else { 1 };
                return Ok(None);
            }
            Op::Ret => {
                let result = self.pop()?;
                if self.calls.is_empty() {
                    return Ok(Some(result));
                }
                self.ret()?;
                self.stack.push(result);
                return Ok(None);
            }
            Op::Halt => return Ok(Some(self.stack.pop().unwrap_or_default())),
            Op::Ap => {
                self.ap()?;
                return Ok(None);
            }
            Op::Expand => {
                let args = self.pop()?;
                let m = self.pop()?;
                let expansion = self.child(false)?.apply(m, args)?;
                self.stack.push(expansion);
            }
            Op::Lambda | Op::Macro => {
                let literal = self.fetch(next)?;
                let (ast, ast_env) = (store.head(literal), store.tail(literal));
                let cell = store.list(&[ast, ast_env, Value::NIL, self.env(), Value::NIL])?;
                let tag = if op == Op::Lambda { Tag::Closure } else { Tag::Macro };
                self.stack.push(cell.retag(tag));
                self.pc += 2;
                return Ok(None);
            }
            Op::MacroP => {
                let v = self.pop()?;
                self.stack.push(self.rt.truth(v.is_macro()));
            }
            Op::Throw => {
                let v = self.pop()?;
                self.raise(v)?;
                return Ok(None);
            }
            _ => self.builtin(op)?,
        }
        self.pc = next;
        Ok(None)
    }

    /// A datum in the code stream.
    fn push_word(&mut self, word: Value) -> Result<()> {
        let store = self.rt.store();
        let value = if word.is_symbol() {
            let r = env::resolve(store, self.env(), word).ok_or_else(|| env::unbound(store, word))?;
            self.patch(self.pc, Value::reference(r))?;
            tracing::trace!(symbol = %pr_str(store, word), %r, "cached reference");
            env::load(store, self.env(), r)?
        } else if let Some(r) = word.as_address() {
            env::load(store, self.env(), r)?
        } else {
            word
        };
        self.stack.push(value);
        Ok(())
    }

    /// `SET target`: store the top of stack, keeping it.
    fn set(&mut self, at: usize) -> Result<()> {
        let store = self.rt.store();
        let target = self.fetch(at)?;
        let v = self.peek()?;
        if let Some(r) = target.as_address() {
            return env::store_ref(store, self.env(), r, v);
        }
        if !target.is_symbol() {
            return Err(Error::type_mismatch("symbol or reference", target));
        }
        let r = env::assign(store, self.env(), target, v)?;
        self.patch(at, Value::reference(r))
    }

    /// Lambda-list instructions. The stack holds `frame arglist` on entry.
    fn argument(&mut self, op: Op, at: usize) -> Result<()> {
        let store = self.rt.store();
        let operand = self.fetch(at)?;
        match op {
            Op::Arg => {
                let args = self.peek()?;
                if !args.is_pair() {
                    return Err(Error::new(
                        ErrorKind::ArgCount,
                        format!("missing argument {}", pr_str(store, operand)),
                    ));
                }
                env::bind(store, self.below(1)?, operand, store.head(args))?;
                let args = self.peek()?;
                self.set_top(store.tail(args))?;
            }
            Op::BindArg => {
                let v = self.pop()?;
                env::bind(store, self.below(1)?, operand, v)?;
            }
            Op::Rest => {
                env::bind(store, self.below(1)?, operand, self.peek()?)?;
            }
            Op::Key => {
                let mut plist = self.peek()?;
                let mut found = None;
                while plist.is_pair() {
                    let rest = store.tail(plist);
                    if store.head(plist) == operand {
                        found = Some(store.head(rest));
                        break;
                    }
                    plist = store.tail(rest);
                }
                match found {
                    Some(v) => {
                        self.stack.push(v);
                        self.stack.push(self.rt.t());
                    }
                    None => self.stack.push(Value::NIL),
                }
            }
            _ => unreachable!("{} is not an argument instruction", op.name()),
        }
        Ok(())
    }

    /// `AP`: the stack holds `callee arg... argc`.
    fn ap(&mut self) -> Result<()> {
        let store = self.rt.store();
        let argc = self
            .pop()?
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInstruction, "bad argument count"))?;
        if self.stack.len() <= argc {
            return Err(underflow());
        }
        let mut args = Value::NIL;
        for _ in 0..argc {
            let v = self.pop()?;
            args = store.cons(v, args)?;
        }
        let callee = self.pop()?;

        if callee.is_closure() {
            return self.enter(callee, args, true);
        }
        if callee.is_macro() {
            let result = self.expand_and_run(callee, args)?;
            self.stack.push(result);
            self.pc += 1;
            return Ok(());
        }
        match Op::decode(callee) {
            Some((Op::Throw, _)) => {
                store.length(args).and_then(|n| check_arity(Op::Throw, n))?;
                self.raise(store.head(args))
            }
            Some((op, _)) if op.is_builtin() => {
                self.push_builtin_args(op, args)?;
                self.builtin(op)?;
                self.pc += 1;
                Ok(())
            }
            _ => Err(not_callable(self.rt, callee)),
        }
    }

    fn push_builtin_args(&mut self, op: Op, args: Value) -> Result<()> {
        let items = self.rt.store().list_items(args)?;
        check_arity(op, items.len())?;
        for item in items {
            self.stack.push(item);
        }
        Ok(())
    }

    /// Switch to a closure's code, compiling it first if needed.
    fn enter(&mut self, callee: Value, args: Value, returning: bool) -> Result<()> {
        let store = self.rt.store();
        let callee = store.root(callee);
        let args = store.root(args);
        if store.nth(callee.get(), CODE).is_nil() {
            Compiler::new(self.rt).compile_closure(callee.get())?;
        }
        if returning {
            self.calls.push(self.code());
            self.calls.push(self.debug());
            self.calls.push(Value::int(self.pc as i64 + 1));
            self.calls.push(self.env());
        }
        let c = callee.get();
        self.regs.set(CODE_REG, store.nth(c, CODE));
        self.regs.set(DEBUG_REG, store.nth(c, DEBUG));
        self.regs.set(ENV_REG, store.nth(c, VM_ENV));
        self.pc = 0;
        self.stack.push(args.get());
        Ok(())
    }

    fn ret(&mut self) -> Result<()> {
        let len = self.calls.len();
        let word = |i: usize| self.calls.get(len - FRAME_WORDS + i).unwrap_or_default();
        let pc = word(2)
            .as_int()
            .and_then(|pc| usize::try_from(pc).ok())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInstruction, "corrupt return frame"))?;
        self.regs.set(CODE_REG, word(0));
        self.regs.set(DEBUG_REG, word(1));
        self.regs.set(ENV_REG, word(3));
        self.pc = pc;
        self.calls.truncate(len - FRAME_WORDS);
        Ok(())
    }

    /// Expand a macro call on a nested VM, then compile and run the
    /// expansion on another, in the current environment.
    fn expand_and_run(&mut self, m: Value, args: Value) -> Result<Value> {
        let store = self.rt.store();
        let expansion = self.child(false)?.apply(m, args)?;
        let expansion = store.root(expansion);
        tracing::debug!(expansion = %self.rt.fragment(expansion.get()), "expanded macro");
        let unit = Compiler::new(self.rt).compile_toplevel(expansion.get(), self.env())?;
        let mut vm = self.child(false)?;
        vm.exec(unit, self.env())
    }

    /// Compile and run `expr` on a nested VM in the current environment.
    fn eval_here(&mut self, expr: Value) -> Result<Value> {
        let expr = self.rt.store().root(expr);
        let unit = Compiler::new(self.rt).compile_toplevel(expr.get(), self.env())?;
        let mut vm = self.child(true)?;
        vm.exec(unit, self.env())
    }

    /// Hand `value` to the innermost exception handler, abandoning this run's
    /// stacks. Without a handler, the run fails with an `Exception` error.
    /// Below a boundary, the value is parked on the runtime and the run ends
    /// with a `Thrown` error that carries it up to the boundary.
    fn raise(&mut self, value: Value) -> Result<()> {
        let store = self.rt.store();
        let value = store.root(value);
        let handlers = self.rt.exception_handlers();
        if !handlers.is_pair() {
            return Err(Error::new(
                ErrorKind::Exception,
                format!("uncaught {}", pr_str(store, value.get())),
            ));
        }
        if !self.boundary {
            self.rt.set_thrown(value.get());
            return Err(Error::new(ErrorKind::Thrown, self.rt.fragment(value.get())));
        }
        let handler = store.root(store.head(handlers));
        if !handler.get().is_closure() {
            return Err(not_callable(self.rt, handler.get()));
        }
        self.rt.set_exception_handlers(store.tail(handlers))?;
        tracing::debug!(value = %self.rt.fragment(value.get()), "throw");
        self.stack.clear();
        self.calls.clear();
        let args = store.list(&[value.get()])?;
        self.enter(handler.get(), args, false)
    }

    /// The source forms of the current instruction and of every caller,
    /// innermost first.
    fn sites(&self, into: &RootVec) {
        let store = self.rt.store();
        let mut at = vec![(self.debug(), self.pc)];
        let frames = self.calls.snapshot();
        for frame in frames.chunks_exact(FRAME_WORDS).rev() {
            if let Some(pc) = frame[2].as_int().and_then(|pc| usize::try_from(pc).ok()) {
                at.push((frame[1], pc.saturating_sub(1)));
            }
        }
        at.into_iter()
            .filter_map(|(debug, pc)| store.vget(debug, pc).ok())
            .filter(|form| !form.is_nil())
            .for_each(|form| into.push(form));
    }

    fn locate(&self, e: Error, sites: &RootVec) -> Error {
        sites
            .snapshot()
            .into_iter()
            .fold(e, |e, form| e.at(self.rt.fragment(form)))
    }
}

fn underflow() -> Error {
    Error::new(ErrorKind::InvalidInstruction, "operand stack underflow")
}

fn check_arity(op: Op, got: usize) -> Result<()> {
    let expected = op.arity().unwrap_or_default();
    if expected != got {
        return Err(Error::arg_count(op.name(), expected, got));
    }
    Ok(())
}

fn not_callable(rt: &Runtime, v: Value) -> Error {
    Error::new(
        ErrorKind::NotCallable,
        format!("{} is not callable", pr_str(rt.store(), v)),
    )
}
