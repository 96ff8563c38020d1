//! Rendering values as text.

use std::fmt::Write;

use super::{ElementType, Storage, SubTag, Tag, Value};
use crate::compiler::SpecialForm;
use crate::error::ErrorKind;
use crate::vm::Op;

/// Lists longer than this are elided; this also stops cycles.
const MAX_LIST: usize = 1000;
const MAX_DEPTH: usize = 100;

/// Readable form: strings quoted and escaped, characters as `#\c`.
pub fn pr_str(store: &Storage, v: Value) -> String {
    let mut out = String::new();
    Printer {
        store,
        readable: true,
    }
    .write(&mut out, v, 0);
    out
}

/// Display form: strings and characters as their contents.
pub fn display(store: &Storage, v: Value) -> String {
    let mut out = String::new();
    Printer {
        store,
        readable: false,
    }
    .write(&mut out, v, 0);
    out
}

struct Printer<'a> {
    store: &'a Storage,
    readable: bool,
}

impl Printer<'_> {
    fn write(&self, out: &mut String, v: Value, depth: usize) {
        if depth > MAX_DEPTH {
            out.push_str("...");
            return;
        }
        match v.tag() {
            Tag::Pair if v.is_nil() => out.push_str("nil"),
            Tag::Pair => self.write_list(out, v, depth),
            Tag::Symbol => {
                let name = self.store.string_value(v).unwrap_or_default();
                out.push_str(&name);
            }
            Tag::Closure | Tag::Macro => {
                let kind = if v.is_closure() { "closure" } else { "macro" };
                let params = self.store.head(self.store.head(v));
                let _ = write!(out, "#<{kind} ");
                self.write(out, params, depth + 1);
                out.push('>');
            }
            Tag::Error => {
                let cause = self.store.head(v);
                out.push_str("#<error ");
                match cause.as_int().and_then(ErrorKind::from_code) {
                    Some(kind) => {
                        let _ = write!(out, "{kind}");
                    }
                    None => self.write(out, cause, depth + 1),
                }
                let positions = self.store.tail(v);
                if !positions.is_nil() {
                    out.push(' ');
                    self.write(out, positions, depth + 1);
                }
                out.push('>');
            }
            Tag::Vector => self.write_vector(out, v, depth),
            Tag::Pointer => {
                let _ = write!(out, "#<forward {}>", v.idx());
            }
            Tag::Other => self.write_immediate(out, v),
        }
    }

    fn write_list(&self, out: &mut String, v: Value, depth: usize) {
        out.push('(');
        let mut cur = v;
        let mut count = 0;
        loop {
            self.write(out, self.store.head(cur), depth + 1);
            cur = self.store.tail(cur);
            count += 1;
            if cur.is_nil() {
                break;
            }
            if count >= MAX_LIST {
                out.push_str(" ...");
                break;
            }
            if !cur.is_pair() {
                out.push_str(" . ");
                self.write(out, cur, depth + 1);
                break;
            }
            out.push(' ');
        }
        out.push(')');
    }

    fn write_vector(&self, out: &mut String, v: Value, depth: usize) {
        let Ok(header) = self.store.vector_header(v) else {
            out.push_str("#<bad vector>");
            return;
        };
        if header.element == ElementType::Char {
            let s = self.store.string_value(v).unwrap_or_default();
            if self.readable {
                let _ = write!(out, "{s:?}");
            } else {
                out.push_str(&s);
            }
            return;
        }
        out.push_str("#(");
        for i in 0..header.size {
            if i > 0 {
                out.push(' ');
            }
            if i >= MAX_LIST {
                out.push_str("...");
                break;
            }
            self.write(out, self.store.vector_word(&header, i), depth + 1);
        }
        out.push(')');
    }

    fn write_immediate(&self, out: &mut String, v: Value) {
        let _ = match v.sub_tag() {
            Some(SubTag::Integer) => write!(out, "{}", v.as_int().unwrap_or_default()),
            Some(SubTag::Char) => {
                let c = v.as_char().unwrap_or('?');
                if !self.readable {
                    write!(out, "{c}")
                } else {
                    match c {
                        ' ' => write!(out, "#\\space"),
                        '\n' => write!(out, "#\\newline"),
                        '\t' => write!(out, "#\\tab"),
                        c => write!(out, "#\\{c}"),
                    }
                }
            }
            Some(SubTag::Ref) => match v.as_address() {
                Some(r) => write!(out, "{r}"),
                None => write!(out, "{v}"),
            },
            Some(SubTag::Special) => match SpecialForm::from_value(v) {
                Some(form) => write!(out, "{}", form.name()),
                None => write!(out, "{v}"),
            },
            Some(SubTag::Instr) => match Op::decode(v) {
                Some((op, _)) if op.is_builtin() => write!(out, "#<builtin {}>", op.name()),
                Some((op, 0)) => write!(out, "#<op {}>", op.name()),
                Some((op, operand)) => write!(out, "#<op {} {operand}>", op.name()),
                None => write!(out, "{v}"),
            },
            Some(SubTag::Unbound) => write!(out, "#<unbound>"),
            None => write!(out, "{v}"),
        };
    }
}
