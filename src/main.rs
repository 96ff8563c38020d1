//! Run Lisp files, a single expression, or an interactive session.
//!
//! ```ignore
//! lispvm prog.lisp
//! lispvm -e '(+ 1 2)'
//! lispvm            # REPL
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use lispvm::data::print::pr_str;
use lispvm::data::Value;
use lispvm::{reader, Config, Error, ErrorKind, Runtime};

/// Exit status when the heap is exhausted.
const EXIT_OUT_OF_MEMORY: u8 = 70;

#[derive(Parser)]
#[command(name = "lispvm", about = "A Lisp on a bytecode VM")]
struct Args {
    /// Files to load, in order
    files: Vec<PathBuf>,

    /// Evaluate an expression and print its value
    #[arg(short, long)]
    eval: Option<String>,

    /// Words in each heap pool
    #[arg(long, default_value_t = Config::default().heap_words)]
    heap_words: usize,

    /// Start without the bundled prelude
    #[arg(long)]
    no_prelude: bool,

    /// Log compiler and VM activity to stderr
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.trace { "lispvm=trace" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::default().with_heap_words(args.heap_words);
    if args.no_prelude {
        config = config.without_prelude();
    }
    let rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => return fail(&e),
    };

    for file in &args.files {
        if let Err(e) = rt.load_file(file) {
            return fail(&e);
        }
    }

    if let Some(expr) = &args.eval {
        return match rt.eval_str(expr) {
            Ok(v) => {
                println!("{}", pr_str(rt.store(), v));
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        };
    }

    if args.files.is_empty() {
        repl(&rt)
    } else {
        ExitCode::SUCCESS
    }
}

fn fail(e: &Error) -> ExitCode {
    eprintln!("error: {}", e.report());
    if e.kind == ErrorKind::OutOfMemory {
        ExitCode::from(EXIT_OUT_OF_MEMORY)
    } else {
        ExitCode::FAILURE
    }
}

/// What became of the REPL's buffered input.
enum Entry {
    /// The forms are not closed yet; keep reading lines.
    Incomplete,
    Done(lispvm::Result<Value>),
}

/// Read the whole buffer before evaluating any of it, so only the reader's
/// end of input asks for more lines.
fn submit(rt: &Runtime, buffer: &str) -> Entry {
    match reader::read_body(rt, buffer) {
        Err(e) if e.kind == ErrorKind::EndOfInput => Entry::Incomplete,
        Err(e) => Entry::Done(Err(e)),
        Ok(body) => Entry::Done(rt.eval_body(body)),
    }
}

fn repl(rt: &Runtime) -> ExitCode {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("error: could not start line editor: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { ". " };
        match rl.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                if buffer.trim().is_empty() {
                    buffer.clear();
                    continue;
                }
                match submit(rt, &buffer) {
                    Entry::Incomplete => continue,
                    Entry::Done(Err(e)) if e.is_fatal() => return fail(&e),
                    Entry::Done(Err(e)) => eprintln!("error: {}", e.report()),
                    Entry::Done(Ok(v)) => println!("{}", pr_str(rt.store(), v)),
                }
                let _ = rl.add_history_entry(buffer.trim_end());
                buffer.clear();
            }
            Err(ReadlineError::Interrupted) => {
                if buffer.is_empty() {
                    break;
                }
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
