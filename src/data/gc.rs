//! The semi-space copying collector.
//!
//! Copies depth-first from the roots with an explicit work stack. When an
//! object is first reached, its old cell is overwritten with a forwarding word
//! (tag `Pointer`, index of the copy) before any child is visited, so shared
//! substructure and cycles are copied exactly once.

use super::roots::{RootEntry, RootVec};
use super::vectors::HEADER_WORDS;
use super::{round_even, Pools, Tag, Value, RESERVED_WORDS};

/// Collect `pools`, treating `roots` as the live set.
/// Returns the number of words copied.
pub(super) fn collect(pools: &mut Pools, roots: &mut [RootEntry]) -> usize {
    std::mem::swap(&mut pools.active, &mut pools.reserve);
    let mut copier = Copier {
        from: &mut pools.reserve,
        to: &mut pools.active,
        bump: RESERVED_WORDS,
        work: Vec::new(),
    };

    let mut seen: Vec<*const _> = Vec::new();
    for entry in roots.iter() {
        match entry {
            RootEntry::Slot(v) => {
                copier.copy(*v);
            }
            RootEntry::Tables(tables) => {
                for table in fresh_tables(tables, &mut seen) {
                    for v in table.snapshot() {
                        copier.copy(v);
                    }
                }
            }
        }
        copier.drain();
    }

    // Root slots are rewritten once everything has been copied.
    seen.clear();
    for entry in roots.iter_mut() {
        match entry {
            RootEntry::Slot(v) => *v = copier.relocate(*v),
            RootEntry::Tables(tables) => {
                for table in fresh_tables(tables, &mut seen) {
                    table.update(|v| copier.relocate(v));
                }
            }
        }
    }

    let bump = copier.bump;
    pools.bump = bump;
    bump - RESERVED_WORDS
}

/// Tables not already visited in this pass.
/// A table registered twice must only be relocated once.
fn fresh_tables<'a>(
    tables: &'a [RootVec],
    seen: &'a mut Vec<*const core::cell::RefCell<Vec<Value>>>,
) -> impl Iterator<Item = &'a RootVec> + 'a {
    tables.iter().filter(move |t| {
        let id = t.id();
        if seen.contains(&id) {
            false
        } else {
            seen.push(id);
            true
        }
    })
}

struct Copier<'p> {
    from: &'p mut [Value],
    to: &'p mut [Value],
    bump: usize,
    /// Ranges of to-space words whose contents still point into from-space.
    work: Vec<(usize, usize)>,
}

impl Copier<'_> {
    fn reserve(&mut self, words: usize) -> usize {
        let idx = self.bump;
        self.bump += round_even(words);
        assert!(
            self.bump <= self.to.len(),
            "live data exceeds the pool size during collection"
        );
        idx
    }

    /// Copy `v` into to-space (if not already there) and return its new address.
    fn copy(&mut self, v: Value) -> Value {
        if !v.is_heap() {
            return v;
        }
        let tag = v.tag();
        let old = v.idx();
        let first = self.from[old];
        if first.tag() == Tag::Pointer {
            return Value::heap(tag, first.idx());
        }

        let new = if tag.is_cell() {
            let new = self.reserve(2);
            self.to[new] = first;
            self.to[new + 1] = self.from[old + 1];
            self.from[old] = Value::forward(new);
            self.work.push((new, 2));
            new
        } else if tag.is_vector() {
            let new = self.reserve(HEADER_WORDS);
            self.to[new..new + HEADER_WORDS].copy_from_slice(&self.from[old..old + HEADER_WORDS]);
            self.from[old] = Value::forward(new);

            let field = |i: usize| self.to[new + i].as_int().unwrap_or(0) as usize;
            let (size, capacity, data) = (field(0), field(1), field(3));
            if data != 0 && capacity > 0 {
                let fresh = self.reserve(capacity);
                self.to[fresh..fresh + size].copy_from_slice(&self.from[data..data + size]);
                self.to[fresh + size..fresh + round_even(capacity)].fill(Value::NIL);
                self.to[new + 3] = Value::int(fresh as i64);
                self.work.push((fresh, size));
            }
            new
        } else {
            panic!("collector reached a forwarding word through a live reference: {v}");
        };
        Value::heap(tag, new)
    }

    fn drain(&mut self) {
        while let Some((start, len)) = self.work.pop() {
            for i in start..start + len {
                let v = self.to[i];
                self.to[i] = self.copy(v);
            }
        }
    }

    /// New address of a root value, once the traversal is complete.
    fn relocate(&self, v: Value) -> Value {
        if !v.is_heap() {
            return v;
        }
        let forward = self.from[v.idx()];
        debug_assert_eq!(forward.tag(), Tag::Pointer, "root {v} was not copied");
        Value::heap(v.tag(), forward.idx())
    }
}
