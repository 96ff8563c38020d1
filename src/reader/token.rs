//! Module for extracting Lisp tokens from an input stream.

use crate::data::{MAX_INTEGER, MIN_INTEGER};
use crate::reader::{ReadErr, ReadResult};

/// A Lisp token.
///
/// Whitespace and comments are ignored.
#[derive(Debug, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Dot,
    Quote,
    Quasiquote,
    Unquote,
    SpliceUnquote,
    String(String),
    Symbol(String),
    Integer(i64),
    Char(char),
}

/// A token along with its starting position in the input stream.
#[derive(Debug, PartialEq, Eq)]
pub struct TokenOffset {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// Split the input into its constituent tokens.
pub fn tokenize(mut input: &[u8]) -> ReadResult<Vec<TokenOffset>> {
    let mut result = Vec::new();

    // Line number from 0; fixed up for output.
    let mut line = 0;
    let mut column = 0;
    while !input.is_empty() {
        let next = get_next_token(input)
            .map_err(|err| err.annotate(format!("at line {} column {}", line + 1, column + 1)))?;

        if let Some(token) = next.token {
            result.push(TokenOffset::new(line, column, token));
        }
        line += next.lines;
        if next.lines > 0 {
            column = next.columns
        } else {
            column += next.columns;
        }

        input = next.remainder;
    }

    Ok(result)
}

impl TokenOffset {
    fn new(line: usize, column: usize, token: Token) -> Self {
        TokenOffset {
            token,
            line: line + 1,
            column: column + 1,
        }
    }
}

#[derive(Default)]
struct NextToken<'a> {
    // None if only whitespace or a comment was consumed.
    token: Option<Token>,
    lines: usize,
    // Columns in the final line traversed.
    columns: usize,
    remainder: &'a [u8],
}

mod regex {
    use regex::bytes::Regex;
    use std::sync::OnceLock;

    pub(super) fn space() -> &'static Regex {
        static SPACE: OnceLock<Regex> = OnceLock::new();
        SPACE.get_or_init(|| {
            Regex::new("\\A[[:space:]]+").expect("could not compile regex for empty space")
        })
    }

    pub(super) fn string() -> &'static Regex {
        static STRING: OnceLock<Regex> = OnceLock::new();
        STRING.get_or_init(|| {
            // Opening quote, then escaped characters or anything but a quote or backslash.
            // The closing quote is checked separately, so an unclosed string is "incomplete".
            Regex::new(r#"\A(?s)"([\\].|[^\\"])*"#).expect("could not compile regex for string")
        })
    }

    pub(super) fn character() -> &'static Regex {
        static MATCH: OnceLock<Regex> = OnceLock::new();
        MATCH.get_or_init(|| {
            Regex::new(r#"\A(?s)#\\(space|newline|tab|.)"#)
                .expect("could not compile regex for character")
        })
    }

    pub(super) fn integer() -> &'static Regex {
        static MATCH: OnceLock<Regex> = OnceLock::new();
        MATCH.get_or_init(|| {
            Regex::new(r#"\A[-+]?[0-9]+\z"#).expect("could not compile regex for integer")
        })
    }

    /// Any atom: integers are atoms that parse as integers.
    pub(super) fn atom() -> &'static Regex {
        static MATCH: OnceLock<Regex> = OnceLock::new();
        MATCH.get_or_init(|| {
            Regex::new(r#"\A[^;[:space:]'`,()"]+"#).expect("could not compile regex for atom")
        })
    }

    pub(super) fn comment() -> &'static Regex {
        static MATCH: OnceLock<Regex> = OnceLock::new();
        MATCH.get_or_init(|| Regex::new(r#"\A;.*"#).expect("could not compile regex for comment"))
    }
}

/// The (line, column) the cursor ends at after `s`, starting from (0, 0).
/// Tabs count as a single column.
fn cursor_distance(s: &[u8]) -> (usize, usize) {
    let lines = s.iter().filter(|&&c| c == b'\n').count();
    let last_line_start = s
        .iter()
        .rposition(|&c| c == b'\n')
        .map(|x| x + 1)
        .unwrap_or(0);
    (lines, s.len() - last_line_start)
}

fn utf8(s: &[u8]) -> ReadResult<&str> {
    std::str::from_utf8(s).map_err(|_| ReadErr::Error("input is not UTF-8".to_owned()))
}

fn unescape(s: &str) -> ReadResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('\\') => '\\',
            Some('"') => '"',
            Some(other) => {
                return Err(ReadErr::Error(format!("unknown escape \\{other} in string")))
            }
            None => return Err(ReadErr::Incomplete("incomplete escape in string".to_owned())),
        });
    }
    Ok(out)
}

/// Get the next token from the input, and return the remainder of the input.
fn get_next_token(input: &[u8]) -> ReadResult<NextToken<'_>> {
    assert!(!input.is_empty());

    let single = |token, len| NextToken {
        token: Some(token),
        lines: 0,
        columns: len,
        remainder: &input[len..],
    };
    match input[0] {
        b'(' => return Ok(single(Token::LParen, 1)),
        b')' => return Ok(single(Token::RParen, 1)),
        b'\'' => return Ok(single(Token::Quote, 1)),
        b'`' => return Ok(single(Token::Quasiquote, 1)),
        b',' if input.get(1) == Some(&b'@') => return Ok(single(Token::SpliceUnquote, 2)),
        b',' => return Ok(single(Token::Unquote, 1)),
        _ => {}
    }

    if let Some(space) = regex::space().find(input) {
        let (lines, columns) = cursor_distance(space.as_bytes());
        return Ok(NextToken {
            token: None,
            lines,
            columns,
            remainder: &input[space.as_bytes().len()..],
        });
    }

    if let Some(s) = regex::comment().find(input) {
        return Ok(NextToken {
            token: None,
            lines: 0,
            columns: s.as_bytes().len(),
            remainder: &input[s.as_bytes().len()..],
        });
    }

    if let Some(s) = regex::string().find(input) {
        let s = s.as_bytes();
        let remainder = &input[s.len()..];
        if remainder.first() != Some(&b'"') {
            return Err(ReadErr::Incomplete("incomplete string".to_owned()));
        }
        let text = unescape(utf8(&s[1..])?)?;
        let (lines, columns) = cursor_distance(&input[..s.len() + 1]);
        return Ok(NextToken {
            token: Some(Token::String(text)),
            lines,
            columns,
            remainder: &remainder[1..],
        });
    }

    if let Some(m) = regex::character().captures(input) {
        let whole = m.get(0).map(|g| g.as_bytes()).unwrap_or_default();
        let name = utf8(m.get(1).map(|g| g.as_bytes()).unwrap_or_default())?;
        let c = match name {
            "space" => ' ',
            "newline" => '\n',
            "tab" => '\t',
            other => other.chars().next().unwrap_or(' '),
        };
        let (lines, columns) = cursor_distance(whole);
        return Ok(NextToken {
            token: Some(Token::Char(c)),
            lines,
            columns,
            remainder: &input[whole.len()..],
        });
    }

    if let Some(s) = regex::atom().find(input) {
        let bytes = s.as_bytes();
        let text = utf8(bytes)?;
        let token = if text == "." {
            Token::Dot
        } else if regex::integer().is_match(bytes) {
            let int: i64 = text.parse().map_err(|e| {
                ReadErr::Error(format!("failed to convert \"{}\" into integer: {}", text, e))
            })?;
            if !(MIN_INTEGER..=MAX_INTEGER).contains(&int) {
                return Err(ReadErr::Error(format!(
                    "integer {text} is outside {MIN_INTEGER}..={MAX_INTEGER}"
                )));
            }
            Token::Integer(int)
        } else {
            Token::Symbol(text.to_owned())
        };
        return Ok(NextToken {
            token: Some(token),
            lines: 0,
            columns: text.chars().count(),
            remainder: &input[bytes.len()..],
        });
    }

    Err(ReadErr::Error(
        "could not parse remainder of input as anything".to_owned(),
    ))
}
