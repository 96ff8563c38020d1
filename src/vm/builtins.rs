//! Builtin operations.
//!
//! Each builtin pops its arguments (last argument on top) and pushes one
//! result. Arity has already been checked, by the compiler for direct calls
//! or by `AP` for builtins applied as values.

use super::{Op, Vm};
use crate::compiler::{Compiler, Unit};
use crate::data::print::{display, pr_str};
use crate::data::{ElementType, Storage, SubTag, Tag, Value};
use crate::error::{Error, ErrorKind, Result};
use crate::reader;

impl<'r> Vm<'r> {
    pub(super) fn builtin(&mut self, op: Op) -> Result<()> {
        let store = self.rt.store();
        let result = match op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                Value::int(arithmetic(op, a, b)?)
            }
            Op::Lt | Op::Gt | Op::Le | Op::Ge | Op::NumEq => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                let holds = match op {
                    Op::Lt => a < b,
                    Op::Gt => a > b,
                    Op::Le => a <= b,
                    Op::Ge => a >= b,
                    _ => a == b,
                };
                self.rt.truth(holds)
            }
            Op::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.rt.truth(a == b)
            }
            Op::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.rt.truth(store.equal(a, b))
            }
            Op::Not | Op::Null => {
                let v = self.pop()?;
                self.rt.truth(v.is_nil())
            }
            Op::Consp => {
                let v = self.pop()?;
                self.rt.truth(v.is_pair())
            }
            Op::Cons => {
                let b = self.pop()?;
                let a = self.pop()?;
                store.cons(a, b)?
            }
            Op::Car => {
                let v = self.pop()?;
                store.car(v)?
            }
            Op::Cdr => {
                let v = self.pop()?;
                store.cdr(v)?
            }
            Op::Rplaca | Op::Rplacd => {
                let v = self.pop()?;
                let cell = self.pop()?;
                if !cell.is_pair() || cell.is_nil() {
                    return Err(Error::type_mismatch("pair", cell));
                }
                if op == Op::Rplaca {
                    store.rplaca(cell, v)?;
                } else {
                    store.rplacd(cell, v)?;
                }
                cell
            }
            Op::Append => {
                let b = self.pop()?;
                let a = self.pop()?;
                store.append(a, b)?
            }
            Op::MakeVector => {
                let n = self.pop_index()?;
                store.make_vector(Tag::Vector, ElementType::Any, n)?
            }
            Op::Vget => {
                let i = self.pop_index()?;
                let v = self.pop()?;
                store.vget(v, i)?
            }
            Op::Vset => {
                let x = self.pop()?;
                let i = self.pop_index()?;
                let v = self.pop()?;
                store.vset(mutable_vector(v)?, i, x)?;
                x
            }
            Op::Vpush => {
                // The vector stays on the stack, rooted, while it grows.
                let x = self.pop()?;
                store.vpush(mutable_vector(self.peek()?)?, x)?;
                return Ok(());
            }
            Op::Vpop => {
                let v = self.pop()?;
                store.vpop(mutable_vector(v)?)?
            }
            Op::Vsize => {
                let v = self.pop()?;
                Value::int(store.vsize(v)? as i64)
            }
            Op::Vallocsize => {
                let v = self.pop()?;
                Value::int(store.vallocsize(v)? as i64)
            }
            Op::PrStr => {
                let v = self.pop()?;
                store.make_string(Tag::Vector, &pr_str(store, v))?
            }
            Op::Print => {
                let v = self.peek()?;
                self.rt.write_output(&format!("{}\n", pr_str(store, v)))?;
                return Ok(());
            }
            Op::Princ => {
                let v = self.peek()?;
                self.rt.write_output(&display(store, v))?;
                return Ok(());
            }
            Op::Read => {
                let v = self.pop()?;
                let source = string_arg(store, v)?;
                reader::read_one(self.rt, &source)?
            }
            Op::Intern => {
                let v = self.pop()?;
                let name = string_arg(store, v)?;
                self.rt.intern(&name)?
            }
            Op::SymbolName => {
                let v = self.pop()?;
                if !v.is_symbol() {
                    return Err(Error::new(
                        ErrorKind::NotSymbol,
                        format!("expected a symbol, got {}", pr_str(store, v)),
                    ));
                }
                let name = store.string_value(v).unwrap_or_default();
                store.make_string(Tag::Vector, &name)?
            }
            Op::Eval => {
                let v = self.pop()?;
                self.eval_here(v)?
            }
            Op::Compile => {
                let v = self.pop()?;
                let unit = Compiler::new(self.rt).compile_toplevel(v, self.env())?;
                store.cons(unit.code, unit.debug)?
            }
            Op::Exec => {
                let v = self.pop()?;
                let unit = Unit {
                    code: store.head(v),
                    debug: store.tail(v),
                };
                if !v.is_pair() || !unit.code.is_vector() || !unit.debug.is_vector() {
                    return Err(Error::type_mismatch("compiled unit", v));
                }
                let mut vm = self.child(true)?;
                vm.exec(unit, self.env())?
            }
            Op::TypeOf => {
                let v = self.pop()?;
                self.rt.intern(type_name(store, v))?
            }
            Op::Gc => {
                store.collect();
                Value::int(store.current_stats().used as i64)
            }
            Op::MakeError => {
                let positions = self.pop()?;
                let cause = self.pop()?;
                store.error_cell(cause, positions)?
            }
            Op::ErrorCause | Op::ErrorPositions => {
                let v = self.pop()?;
                if !v.is_error() {
                    return Err(Error::type_mismatch("error", v));
                }
                if op == Op::ErrorCause {
                    store.head(v)
                } else {
                    store.tail(v)
                }
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInstruction,
                    format!("{} is not a builtin", op.name()),
                ))
            }
        };
        self.stack.push(result);
        Ok(())
    }

    fn pop_int(&mut self) -> Result<i64> {
        let v = self.pop()?;
        v.as_int().ok_or_else(|| Error::type_mismatch("integer", v))
    }

    fn pop_index(&mut self) -> Result<usize> {
        let v = self.pop()?;
        v.as_int()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| Error::type_mismatch("non-negative integer", v))
    }
}

fn arithmetic(op: Op, a: i64, b: i64) -> Result<i64> {
    if matches!(op, Op::Div | Op::Mod) && b == 0 {
        return Err(Error::new(ErrorKind::TypeMismatch, "division by zero"));
    }
    Ok(match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => a.wrapping_div(b),
        _ => a.wrapping_rem_euclid(b),
    })
}

/// Symbols are vectors too, but their names are not for changing.
fn mutable_vector(v: Value) -> Result<Value> {
    if v.is_vector() {
        Ok(v)
    } else {
        Err(Error::type_mismatch("vector", v))
    }
}

fn string_arg(store: &Storage, v: Value) -> Result<String> {
    store
        .string_value(v)
        .ok_or_else(|| Error::type_mismatch("string", v))
}

fn type_name(store: &Storage, v: Value) -> &'static str {
    match v.tag() {
        Tag::Pair if v.is_nil() => "null",
        Tag::Pair => "cons",
        Tag::Symbol => "symbol",
        Tag::Closure => "closure",
        Tag::Macro => "macro",
        Tag::Error => "error",
        Tag::Vector if store.is_string(v) => "string",
        Tag::Vector => "vector",
        Tag::Pointer => "pointer",
        Tag::Other => match v.sub_tag() {
            Some(SubTag::Integer) => "integer",
            Some(SubTag::Char) => "character",
            Some(SubTag::Ref) => "reference",
            Some(SubTag::Special) => "special",
            Some(SubTag::Instr) => match Op::decode(v) {
                Some((op, _)) if op.is_builtin() => "builtin",
                _ => "instruction",
            },
            Some(SubTag::Unbound) | None => "unbound",
        },
    }
}
