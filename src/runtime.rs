//! The runtime context: storage, symbols, the global environment, and the
//! entry points that read, compile, and run source.

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;

use crate::compiler::Compiler;
use crate::data::print::pr_str;
use crate::data::symbols::Package;
use crate::data::{RootVec, Storage, Tag, Value};
use crate::env;
use crate::error::{Error, Result};
use crate::reader;
use crate::vm::{Op, Vm, BUILTINS};
use crate::Config;

const PRELUDE: &str = include_str!("vm/prelude.lisp");

/// Slots of the global table.
const GLOBAL_ENV: usize = 0;
const T: usize = 1;
const EXCEPTIONS: usize = 2;
const THROWN: usize = 3;

/// Longest source fragment kept in an error position.
const MAX_FRAGMENT: usize = 80;

pub struct Runtime {
    store: Storage,
    config: Config,
    package: RefCell<Package>,
    /// Symbol naming each builtin, in `BUILTINS` order.
    builtins: RootVec,
    globals: RootVec,
    out: RefCell<Box<dyn Write>>,
}

impl Runtime {
    /// A runtime with an empty global environment, plus the prelude if
    /// `config.load_prelude` is set.
    pub fn new(config: Config) -> Result<Self> {
        let store = Storage::new(&config);
        let package = Package::new(&store, "user");
        let builtins = RootVec::new();
        store.root_forever(&builtins);
        let globals = RootVec::from_values([Value::NIL; 4]);
        store.root_forever(&globals);

        let rt = Runtime {
            store,
            config,
            package: RefCell::new(package),
            builtins,
            globals,
            out: RefCell::new(Box::new(std::io::stdout())),
        };
        for (op, _) in BUILTINS {
            let sym = rt.intern(op.name())?;
            rt.builtins.push(sym);
        }

        let frame = env::make_frame(&rt.store, 16)?;
        rt.globals.set(GLOBAL_ENV, rt.store.cons(frame, Value::NIL)?);
        let t = rt.intern("t")?;
        rt.globals.set(T, t);
        env::set(&rt.store, rt.global_frame(), t, t)?;
        let exceptions = rt.intern("*exception-stack*")?;
        rt.globals.set(EXCEPTIONS, exceptions);
        env::set(&rt.store, rt.global_frame(), exceptions, Value::NIL)?;

        if rt.config.load_prelude {
            rt.eval_str(PRELUDE).map_err(|e| e.at("prelude"))?;
        }
        tracing::debug!(
            heap_words = rt.config.heap_words,
            used = rt.store.current_stats().used,
            "runtime ready"
        );
        Ok(rt)
    }

    pub fn store(&self) -> &Storage {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The symbol named `name` in the current package.
    pub fn intern(&self, name: &str) -> Result<Value> {
        self.package.borrow_mut().intern(&self.store, name)
    }

    /// Keywords (`:name`) evaluate to themselves.
    pub fn is_keyword(&self, sym: Value) -> bool {
        sym.is_symbol() && matches!(self.store.vget(sym, 0), Ok(c) if c == Value::char(':'))
    }

    /// The builtin `sym` names, if any.
    pub fn builtin_for(&self, sym: Value) -> Option<Op> {
        if !sym.is_symbol() {
            return None;
        }
        let slot = self.builtins.snapshot().iter().position(|&b| b == sym)?;
        BUILTINS.get(slot).map(|(op, _)| *op)
    }

    pub fn global_env(&self) -> Value {
        self.globals.get(GLOBAL_ENV).unwrap_or_default()
    }

    fn global_frame(&self) -> Value {
        self.store.head(self.global_env())
    }

    /// The canonical true value, the symbol `t`.
    pub fn t(&self) -> Value {
        self.globals.get(T).unwrap_or_default()
    }

    pub fn truth(&self, b: bool) -> Value {
        if b {
            self.t()
        } else {
            Value::NIL
        }
    }

    /// The list of handlers bound to `*exception-stack*`.
    pub fn exception_handlers(&self) -> Value {
        let sym = self.globals.get(EXCEPTIONS).unwrap_or_default();
        env::find_binding(&self.store, self.global_frame(), sym)
            .map(|binding| self.store.tail(binding))
            .unwrap_or_default()
    }

    pub fn set_exception_handlers(&self, handlers: Value) -> Result<()> {
        let sym = self.globals.get(EXCEPTIONS).unwrap_or_default();
        env::set(&self.store, self.global_frame(), sym, handlers)
    }

    /// Park a thrown value while it unwinds to the nearest boundary run.
    pub(crate) fn set_thrown(&self, v: Value) {
        self.globals.set(THROWN, v);
    }

    pub(crate) fn take_thrown(&self) -> Value {
        let v = self.globals.get(THROWN).unwrap_or_default();
        self.globals.set(THROWN, Value::NIL);
        v
    }

    /// Compile and run one form in the global environment.
    pub fn eval(&self, expr: Value) -> Result<Value> {
        let expr = self.store.root(expr);
        let unit = Compiler::new(self).compile_toplevel(expr.get(), self.global_env())?;
        let mut vm = Vm::new(self);
        vm.exec(unit, self.global_env())
    }

    /// Read and evaluate every form in `source`; returns the last value.
    pub fn eval_str(&self, source: &str) -> Result<Value> {
        self.eval_body(reader::read_body(self, source)?)
    }

    /// Evaluate each form of the list `body` in turn; returns the last value.
    pub fn eval_body(&self, body: Value) -> Result<Value> {
        let body = self.store.root(body);
        let mut result = Value::NIL;
        for i in 0..self.store.length(body.get())? {
            result = self.eval(self.store.nth(body.get(), i))?;
        }
        Ok(result)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading");
        let at = |e: Error| e.at(path.display().to_string());
        let source = std::fs::read_to_string(path).map_err(|e| at(e.into()))?;
        self.eval_str(&source).map_err(at)
    }

    /// `v` printed for an error position, shortened if long.
    pub fn fragment(&self, v: Value) -> String {
        let text = pr_str(&self.store, v);
        match text.char_indices().nth(MAX_FRAGMENT) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text,
        }
    }

    /// The heap form of `e`: an `Error` cell holding the message as a string
    /// and the positions as a list of strings.
    pub fn error_value(&self, e: &Error) -> Result<Value> {
        self.error_value_with_forms(e, e.positions.len(), &RootVec::new())
    }

    /// Like [`Runtime::error_value`], but only the first `inner` positions
    /// become strings; the rest of the list is the source forms in `forms`,
    /// which the caller keeps rooted.
    pub fn error_value_with_forms(&self, e: &Error, inner: usize, forms: &RootVec) -> Result<Value> {
        let store = &self.store;
        let positions = RootVec::new();
        let _guard = store.root_table(&positions);
        for p in e.positions.iter().take(inner) {
            positions.push(store.make_string(Tag::Vector, p)?);
        }
        for form in forms.snapshot() {
            positions.push(form);
        }
        let positions = store.root(store.list_from_table(&positions, 0, Value::NIL)?);
        let cause = store.make_string(Tag::Vector, &e.to_string())?;
        store.error_cell(cause, positions.get())
    }

    /// Send `print` output somewhere other than stdout.
    pub fn set_output(&self, out: Box<dyn Write>) {
        *self.out.borrow_mut() = out;
    }

    pub fn write_output(&self, text: &str) -> Result<()> {
        let mut out = self.out.borrow_mut();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}
