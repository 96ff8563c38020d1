//! Errors.
//!
//! Rust-side failures are an [`Error`]: a kind, a message, and the source
//! fragments it propagated through (innermost first). Inside the heap an error
//! is a value tagged `Error`, `(cause . positions)`; see `Runtime::error_value`.

use crate::data::Value;
use crate::reader::ReadErr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("type mismatch")]
    TypeMismatch,
    #[error("end of input")]
    EndOfInput,
    #[error("parse error")]
    Parse,
    #[error("unbound variable")]
    Unbound,
    #[error("wrong number of arguments")]
    ArgCount,
    #[error("not callable")]
    NotCallable,
    #[error("not a symbol")]
    NotSymbol,
    #[error("file not found")]
    FileNotFound,
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("not implemented")]
    NotImplemented,
    #[error("out of memory")]
    OutOfMemory,
    #[error("end of sequence")]
    EndOfSequence,
    #[error("invalid instruction")]
    InvalidInstruction,
    #[error("invalid application")]
    InvalidApplication,
    #[error("exception")]
    Exception,
    #[error("nesting too deep")]
    TooDeep,
    /// A thrown value on its way to the run that calls its handler.
    #[error("thrown")]
    Thrown,
}

impl ErrorKind {
    const ALL: [ErrorKind; 17] = [
        ErrorKind::TypeMismatch,
        ErrorKind::EndOfInput,
        ErrorKind::Parse,
        ErrorKind::Unbound,
        ErrorKind::ArgCount,
        ErrorKind::NotCallable,
        ErrorKind::NotSymbol,
        ErrorKind::FileNotFound,
        ErrorKind::IndexOutOfRange,
        ErrorKind::NotImplemented,
        ErrorKind::OutOfMemory,
        ErrorKind::EndOfSequence,
        ErrorKind::InvalidInstruction,
        ErrorKind::InvalidApplication,
        ErrorKind::Exception,
        ErrorKind::TooDeep,
        ErrorKind::Thrown,
    ];

    /// Integer code used as the cause of a heap error value.
    pub fn code(self) -> i64 {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0) as i64 + 1
    }

    pub fn from_code(code: i64) -> Option<Self> {
        let idx = usize::try_from(code.checked_sub(1)?).ok()?;
        Self::ALL.get(idx).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Source fragments, innermost first.
    pub positions: Vec<String>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            positions: Vec::new(),
        }
    }

    /// Record an enclosing source fragment.
    pub fn at(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        if self.positions.last() != Some(&fragment) {
            self.positions.push(fragment);
        }
        self
    }

    pub fn type_mismatch(expected: &str, got: Value) -> Self {
        Error::new(
            ErrorKind::TypeMismatch,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn index_out_of_range(index: usize, size: usize) -> Self {
        Error::new(
            ErrorKind::IndexOutOfRange,
            format!("index {index} out of range for size {size}"),
        )
    }

    pub fn out_of_memory(words: usize) -> Self {
        Error::new(
            ErrorKind::OutOfMemory,
            format!("no space for {words} words"),
        )
    }

    pub fn unbound(name: &str) -> Self {
        Error::new(ErrorKind::Unbound, format!("{name} is not bound"))
    }

    pub fn arg_count(name: &str, expected: usize, got: usize) -> Self {
        Error::new(
            ErrorKind::ArgCount,
            format!("{name} takes {expected} arguments, got {got}"),
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::OutOfMemory
    }

    /// The error followed by its positions, one per line.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for p in &self.positions {
            out.push_str("\n  in ");
            out.push_str(p);
        }
        out
    }
}

impl From<ReadErr> for Error {
    fn from(value: ReadErr) -> Self {
        match value {
            ReadErr::Incomplete(e) => Error::new(ErrorKind::EndOfInput, e),
            ReadErr::Error(e) => Error::new(ErrorKind::Parse, e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        let kind = match value.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            _ => ErrorKind::Exception,
        };
        Error::new(kind, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(99), None);
    }

    #[test]
    fn positions_accumulate_outward() {
        let e = Error::unbound("x").at("x").at("(+ x 1)").at("(+ x 1)");
        assert_eq!(e.positions, vec!["x".to_owned(), "(+ x 1)".to_owned()]);
        assert_eq!(e.to_string(), "unbound variable: x is not bound");
        assert!(e.report().ends_with("in (+ x 1)"));
    }

    #[test]
    fn read_errors_convert() {
        assert_eq!(
            Error::from(ReadErr::Incomplete("unclosed list".to_owned())).kind,
            ErrorKind::EndOfInput
        );
        assert_eq!(
            Error::from(ReadErr::Error("bad".to_owned())).kind,
            ErrorKind::Parse
        );
    }
}
