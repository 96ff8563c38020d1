//! A small Lisp on a bytecode VM.
//!
//! Source is read into heap values (`reader`), compiled to instruction
//! vectors (`compiler`), and run on a stack machine (`vm`). All Lisp data
//! lives in a copying-collected heap of tagged words (`data`).
//!
//! ```
//! use lispvm::{Config, Runtime};
//!
//! let rt = Runtime::new(Config::default()).unwrap();
//! let v = rt.eval_str("(let ((x 20)) (+ x 22))").unwrap();
//! assert_eq!(v.as_int(), Some(42));
//! ```

pub mod compiler;
pub mod config;
pub mod data;
pub mod env;
pub mod error;
pub mod reader;
pub mod runtime;
pub mod vm;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use runtime::Runtime;
