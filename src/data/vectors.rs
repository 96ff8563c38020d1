//! Vectors: a four-word header plus a separately addressed data buffer.
//!
//! Symbols and strings are vectors whose element type is `Char`.

use super::{round_even, ElementType, RootVec, Storage, Tag, Value};
use crate::error::{Error, ErrorKind, Result};

pub(super) const HEADER_WORDS: usize = 4;

const SIZE: usize = 0;
const CAPACITY: usize = 1;
const ELEMENT: usize = 2;
const DATA: usize = 3;

/// Decoded vector header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorHeader {
    pub size: usize,
    pub capacity: usize,
    pub element: ElementType,
    data: usize,
}

impl Storage {
    /// Allocate an empty vector with room for `capacity` elements.
    pub fn make_vector(&self, tag: Tag, element: ElementType, capacity: usize) -> Result<Value> {
        debug_assert!(tag.is_vector());
        let data_words = round_even(capacity);
        let idx = self.alloc(HEADER_WORDS + data_words)?;
        let data = if capacity > 0 { idx + HEADER_WORDS } else { 0 };
        self.set_word(idx + SIZE, Value::int(0));
        self.set_word(idx + CAPACITY, Value::int(capacity as i64));
        self.set_word(idx + ELEMENT, Value::int(element as i64));
        self.set_word(idx + DATA, Value::int(data as i64));
        for i in 0..data_words {
            self.set_word(idx + HEADER_WORDS + i, Value::NIL);
        }
        Ok(Value::heap(tag, idx))
    }

    pub fn vector_header(&self, v: Value) -> Result<VectorHeader> {
        if !(v.is_heap() && v.tag().is_vector()) {
            return Err(Error::type_mismatch("vector", v));
        }
        let idx = v.idx();
        let field = |i| self.word(idx + i).as_int().unwrap_or(0) as usize;
        Ok(VectorHeader {
            size: field(SIZE),
            capacity: field(CAPACITY),
            element: ElementType::from_int(field(ELEMENT) as i64),
            data: field(DATA),
        })
    }

    /// Element `i` of a vector whose header was just read. No bounds check beyond capacity.
    pub fn vector_word(&self, header: &VectorHeader, i: usize) -> Value {
        debug_assert!(i < header.capacity);
        self.word(header.data + i)
    }

    pub fn vsize(&self, v: Value) -> Result<usize> {
        Ok(self.vector_header(v)?.size)
    }

    pub fn vallocsize(&self, v: Value) -> Result<usize> {
        Ok(self.vector_header(v)?.capacity)
    }

    pub fn vget(&self, v: Value, i: usize) -> Result<Value> {
        let header = self.vector_header(v)?;
        if i >= header.size {
            return Err(Error::index_out_of_range(i, header.size));
        }
        Ok(self.vector_word(&header, i))
    }

    pub fn vset(&self, v: Value, i: usize, x: Value) -> Result<()> {
        let header = self.vector_header(v)?;
        if i >= header.size {
            return Err(Error::index_out_of_range(i, header.size));
        }
        check_element(&header, x)?;
        self.set_word(header.data + i, x);
        Ok(())
    }

    /// Append `x`, growing the data buffer if it is full.
    pub fn vpush(&self, v: Value, x: Value) -> Result<()> {
        let mut header = self.vector_header(v)?;
        check_element(&header, x)?;
        let (v, x) = if header.size == header.capacity {
            let v = self.root(v);
            let x = self.root(x);
            self.grow(v.get(), header.capacity.max(2) * 2)?;
            header = self.vector_header(v.get())?;
            (v.get(), x.get())
        } else {
            (v, x)
        };
        self.set_word(header.data + header.size, x);
        self.set_word(v.idx() + SIZE, Value::int(header.size as i64 + 1));
        Ok(())
    }

    pub fn vpop(&self, v: Value) -> Result<Value> {
        let header = self.vector_header(v)?;
        if header.size == 0 {
            return Err(Error::new(ErrorKind::EndOfSequence, "pop from an empty vector"));
        }
        let last = header.data + header.size - 1;
        let x = self.word(last);
        self.set_word(last, Value::NIL);
        self.set_word(v.idx() + SIZE, Value::int(header.size as i64 - 1));
        Ok(x)
    }

    /// Move the contents of `v` into a fresh buffer of `capacity` words.
    fn grow(&self, v: Value, capacity: usize) -> Result<()> {
        let v = self.root(v);
        let words = round_even(capacity);
        let fresh = self.alloc(words)?;
        // No allocation below: `v` and its header are stable.
        let header = self.vector_header(v.get())?;
        for i in 0..words {
            let x = if i < header.size {
                self.vector_word(&header, i)
            } else {
                Value::NIL
            };
            self.set_word(fresh + i, x);
        }
        let idx = v.get().idx();
        self.set_word(idx + CAPACITY, Value::int(capacity as i64));
        self.set_word(idx + DATA, Value::int(fresh as i64));
        tracing::trace!(capacity, "grew vector");
        Ok(())
    }

    /// Elements of a vector. The result is not rooted.
    pub fn vector_items(&self, v: Value) -> Result<Vec<Value>> {
        let header = self.vector_header(v)?;
        Ok((0..header.size)
            .map(|i| self.vector_word(&header, i))
            .collect())
    }

    /// A vector holding the contents of `table`.
    pub fn vector_from_table(&self, table: &RootVec, tag: Tag, element: ElementType) -> Result<Value> {
        let _guard = self.root_table(table);
        let v = self.make_vector(tag, element, table.len())?;
        let header = self.vector_header(v)?;
        for (i, x) in table.snapshot().into_iter().enumerate() {
            self.set_word(header.data + i, x);
        }
        self.set_word(v.idx() + SIZE, Value::int(table.len() as i64));
        Ok(v)
    }

    /// A character vector holding `s`, tagged `tag`.
    pub fn make_string(&self, tag: Tag, s: &str) -> Result<Value> {
        let chars: Vec<char> = s.chars().collect();
        let v = self.make_vector(tag, ElementType::Char, chars.len())?;
        let header = self.vector_header(v)?;
        for (i, c) in chars.iter().enumerate() {
            self.set_word(header.data + i, Value::char(*c));
        }
        self.set_word(v.idx() + SIZE, Value::int(chars.len() as i64));
        Ok(v)
    }

    /// Contents of a character vector (string or symbol).
    pub fn string_value(&self, v: Value) -> Option<String> {
        let header = self.vector_header(v).ok()?;
        if header.element != ElementType::Char {
            return None;
        }
        (0..header.size)
            .map(|i| self.vector_word(&header, i).as_char())
            .collect()
    }

    pub fn is_string(&self, v: Value) -> bool {
        v.is_vector()
            && self
                .vector_header(v)
                .is_ok_and(|h| h.element == ElementType::Char)
    }
}

fn check_element(header: &VectorHeader, x: Value) -> Result<()> {
    if header.element == ElementType::Char && x.as_char().is_none() {
        return Err(Error::type_mismatch("character", x));
    }
    Ok(())
}
