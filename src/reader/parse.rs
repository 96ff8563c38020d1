//! Building S-expressions from tokens.
//!
//! Elements under construction live in a rooted table, so the partially built
//! tree survives the allocations made while reading it.

use super::token::{Token, TokenOffset};
use super::ReadErr;
use crate::compiler::SpecialForm;
use crate::data::{RootVec, Tag, Value};
use crate::error::Result;
use crate::Runtime;

enum Frame {
    /// An open list: index of its first element, and of the element after a dot.
    List {
        start: usize,
        dot: Option<usize>,
        line: usize,
        column: usize,
    },
    /// A reader prefix (`'`, `` ` ``, `,`, `,@`) waiting for its datum.
    Prefix(SpecialForm),
}

/// Parse all expressions in `tokens`; returns them as a list.
pub(super) fn parse(rt: &Runtime, tokens: Vec<TokenOffset>) -> Result<Value> {
    let store = rt.store();
    let items = RootVec::new();
    let _guard = store.root_table(&items);
    let mut frames: Vec<Frame> = Vec::new();

    for TokenOffset {
        token,
        line,
        column,
    } in tokens
    {
        let at = |msg: &str| ReadErr::Error(format!("at line {line} column {column}: {msg}"));
        let datum = match token {
            Token::LParen => {
                frames.push(Frame::List {
                    start: items.len(),
                    dot: None,
                    line,
                    column,
                });
                continue;
            }
            Token::Quote => {
                frames.push(Frame::Prefix(SpecialForm::Quote));
                continue;
            }
            Token::Quasiquote => {
                frames.push(Frame::Prefix(SpecialForm::Quasiquote));
                continue;
            }
            Token::Unquote => {
                frames.push(Frame::Prefix(SpecialForm::Unquote));
                continue;
            }
            Token::SpliceUnquote => {
                frames.push(Frame::Prefix(SpecialForm::SpliceUnquote));
                continue;
            }
            Token::Dot => {
                match frames.last_mut() {
                    Some(Frame::List { start, dot, .. }) if dot.is_none() && items.len() > *start => {
                        *dot = Some(items.len());
                    }
                    _ => return Err(at("unexpected '.'").into()),
                }
                continue;
            }
            Token::RParen => match frames.pop() {
                Some(Frame::List { start, dot, .. }) => {
                    let tail = match dot {
                        None => Value::NIL,
                        Some(d) if items.len() == d + 1 => items.pop().unwrap_or_default(),
                        Some(_) => return Err(at("expected exactly one expression after '.'").into()),
                    };
                    let list = store.list_from_table(&items, start, tail)?;
                    items.truncate(start);
                    list
                }
                Some(Frame::Prefix(_)) => return Err(at("quote without an expression").into()),
                None => return Err(at("unexpected ')'").into()),
            },
            Token::Integer(i) => Value::int(i),
            Token::Char(c) => Value::char(c),
            Token::String(s) => store.make_string(Tag::Vector, &s)?,
            Token::Symbol(s) => symbol(rt, &s)?,
        };
        items.push(datum);
        // Close any prefixes waiting on this datum.
        while let Some(Frame::Prefix(form)) = frames.last() {
            let form = *form;
            frames.pop();
            let x = items.pop().unwrap_or_default();
            let wrapped = store.list(&[form.value(), x])?;
            items.push(wrapped);
        }
    }

    match frames.last() {
        Some(Frame::List { line, column, .. }) => Err(ReadErr::Incomplete(format!(
            "list opened at line {line} column {column} is not closed"
        ))
        .into()),
        Some(Frame::Prefix(_)) => {
            Err(ReadErr::Incomplete("quote without an expression".to_owned()).into())
        }
        None => store.list_from_table(&items, 0, Value::NIL),
    }
}

/// A symbol token: `nil`, a special-form marker, or an interned symbol.
fn symbol(rt: &Runtime, name: &str) -> Result<Value> {
    if name == "nil" {
        return Ok(Value::NIL);
    }
    if let Some(form) = SpecialForm::from_name(name) {
        return Ok(form.value());
    }
    rt.intern(name)
}

#[cfg(test)]
mod tests {
    use crate::data::print::pr_str;
    use crate::data::Value;
    use crate::error::ErrorKind;
    use crate::reader::{read_body, read_one};
    use crate::{Config, Runtime};

    fn runtime() -> Runtime {
        Runtime::new(Config::default().with_heap_words(1 << 14).without_prelude())
            .expect("runtime should start")
    }

    fn round_trip(rt: &Runtime, input: &str) -> String {
        let v = read_one(rt, input).unwrap();
        pr_str(rt.store(), v)
    }

    #[test]
    fn reads_nested_lists() {
        let rt = runtime();
        assert_eq!(round_trip(&rt, "(a (b c) () d)"), "(a (b c) nil d)");
        assert_eq!(round_trip(&rt, "(1 . 2)"), "(1 . 2)");
        assert_eq!(round_trip(&rt, "(1 2 . (3))"), "(1 2 3)");
    }

    #[test]
    fn expands_prefixes() {
        let rt = runtime();
        assert_eq!(round_trip(&rt, "'a"), "(quote a)");
        assert_eq!(round_trip(&rt, "''a"), "(quote (quote a))");
        assert_eq!(
            round_trip(&rt, "`(a ,b ,@c)"),
            "(quasiquote (a (unquote b) (splice-unquote c)))"
        );
    }

    #[test]
    fn substitutes_special_forms() {
        let rt = runtime();
        let v = read_one(&rt, "if").unwrap();
        assert!(v.as_special().is_some());
        let v = read_one(&rt, "iffy").unwrap();
        assert!(v.is_symbol());
    }

    #[test]
    fn symbols_are_interned() {
        let rt = runtime();
        let body = read_body(&rt, "foo foo").unwrap();
        let store = rt.store();
        assert_eq!(store.nth(body, 0), store.nth(body, 1));
    }

    #[test]
    fn reads_strings_and_chars() {
        let rt = runtime();
        assert_eq!(round_trip(&rt, r#"("a b" #\c)"#), r#"("a b" #\c)"#);
    }

    #[test]
    fn incomplete_and_bad_input() {
        let rt = runtime();
        for input in ["(a b", "'", "(a (b)"] {
            assert_eq!(
                read_body(&rt, input).unwrap_err().kind,
                ErrorKind::EndOfInput,
                "{input}"
            );
        }
        for input in [")", "(a . )", "(. a)", "(a . b c)"] {
            assert_eq!(
                read_body(&rt, input).unwrap_err().kind,
                ErrorKind::Parse,
                "{input}"
            );
        }
    }

    #[test]
    fn reading_survives_collection() {
        let rt = Runtime::new(Config::default().with_heap_words(4096).without_prelude())
            .expect("runtime should start");
        // Garbage first, so the pool fills up part way through the read.
        for _ in 0..1500 {
            rt.store().cons(Value::NIL, Value::NIL).unwrap();
        }
        let source = format!("({})", "(x 1 \"two\") ".repeat(100));
        let v = read_one(&rt, &source).unwrap();
        assert!(rt.store().current_stats().collections > 0);
        assert_eq!(rt.store().length(v).unwrap(), 100);
        assert_eq!(pr_str(rt.store(), rt.store().nth(v, 99)), "(x 1 \"two\")");
    }
}
