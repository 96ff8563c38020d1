//! Support for reading Lisp expressions from strings.

use crate::data::Value;
use crate::error::Result;
use crate::Runtime;

mod parse;
mod token;

/// Read the input as a list of Lisp expressions (i.e. a body).
pub fn read_body(rt: &Runtime, input: &str) -> Result<Value> {
    let tokens = token::tokenize(input.as_bytes())?;
    parse::parse(rt, tokens)
}

/// Read the first expression of the input; `NIL` if there is none.
pub fn read_one(rt: &Runtime, input: &str) -> Result<Value> {
    let body = read_body(rt, input)?;
    Ok(rt.store().head(body))
}

/// Error type if a read does not complete.
///
/// A reader may experience a true tokenizing/parsing error, e.g. "())", that no additional input can fix.
/// This is distinct from a reader that gets an unexpected end-of-input, e.g. "(()":
/// it may be that more input will fix the issue.
///
/// The REPL keeps reading lines while input is incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadErr {
    Error(String),
    Incomplete(String),
}

impl std::fmt::Display for ReadErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        match self {
            ReadErr::Error(e) => write!(f, "error in input: {e}"),
            ReadErr::Incomplete(e) => write!(f, "incomplete input: {e}"),
        }
    }
}

impl ReadErr {
    /// Add additional context to an error.
    pub fn annotate(self, more: impl AsRef<str>) -> Self {
        match self {
            ReadErr::Error(e) => ReadErr::Error(format!("{}: {}", more.as_ref(), e)),
            ReadErr::Incomplete(e) => ReadErr::Incomplete(format!("{}: {}", more.as_ref(), e)),
        }
    }
}

/// A T (token, expression, etc), or an error, or incomplete.
pub type ReadResult<T> = std::result::Result<T, ReadErr>;
