//! Lisp data types and the heap.
//!
//! All heap objects live in one of two equal-size pools of [`Value`] words.
//! Allocation bumps a pointer through the active pool:
//! - a pair-shaped cell (pair, closure, macro, error) takes 2 words;
//! - a vector header takes 4 words: size, capacity, element type, data index;
//! - a vector's data buffer takes its capacity, rounded up to an even count.
//!
//! When the active pool is exhausted, the collector swaps the pools and copies
//! everything reachable from the root registry into the fresh one
//! (see [`gc`]). Addresses change across a collection: anything held across
//! an allocation must be rooted, via [`Storage::root`] or a [`RootVec`].
//!
//! Allocating functions root their own arguments, so it is fine to pass an
//! unrooted value straight into one; it is not fine to hold on to a value
//! while calling one.

mod gc;
pub mod print;
mod roots;
pub mod symbols;
mod value;
mod vectors;

use core::cell::{Cell, RefCell};
use std::cmp::max;

pub use roots::{Lock, Root, RootVec, TableRoot};
pub use value::*;
pub use vectors::VectorHeader;

use roots::RootEntry;

use crate::error::{Error, ErrorKind, Result};
use crate::Config;

/// Words at the bottom of each pool that are never handed out.
/// Index 0 would alias `NIL`.
const RESERVED_WORDS: usize = 2;

/// Registry entries kept free for a nested run to finish its own work.
const ROOT_HEADROOM: usize = 32;

/// Storage holds every heap object, plus the root registry that keeps them alive.
pub struct Storage {
    pools: RefCell<Pools>,
    roots: RefCell<Vec<RootEntry>>,
    root_capacity: usize,
    /// Tables rooted for the lifetime of the storage, outside the LIFO stack.
    permanent: RefCell<Vec<RootVec>>,
    locks: Cell<usize>,
    stats: Cell<StorageStats>,
    high_water: Cell<StorageStats>,
}

pub(crate) struct Pools {
    active: Vec<Value>,
    reserve: Vec<Value>,
    bump: usize,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Words handed out from the active pool.
    pub used: usize,
    /// Completed collections.
    pub collections: usize,
    /// Words copied by the most recent collection.
    pub copied: usize,
}

fn round_even(words: usize) -> usize {
    (words + 1) & !1
}

impl Storage {
    pub fn new(config: &Config) -> Self {
        let words = max(config.heap_words, RESERVED_WORDS * 2);
        Storage {
            pools: RefCell::new(Pools {
                active: vec![Value::NIL; words],
                reserve: vec![Value::NIL; words],
                bump: RESERVED_WORDS,
            }),
            roots: RefCell::new(Vec::with_capacity(config.root_capacity)),
            root_capacity: config.root_capacity,
            permanent: Default::default(),
            locks: Default::default(),
            stats: Default::default(),
            high_water: Default::default(),
        }
    }

    pub fn current_stats(&self) -> StorageStats {
        StorageStats {
            used: self.pools.borrow().bump,
            ..self.stats.get()
        }
    }

    pub fn max_stats(&self) -> StorageStats {
        let current = self.current_stats();
        let high = self.high_water.get();
        StorageStats {
            used: max(current.used, high.used),
            ..current
        }
    }

    /// Size of each pool, in words.
    pub fn capacity(&self) -> usize {
        self.pools.borrow().active.len()
    }

    // Root registry.

    fn register(&self, entry: RootEntry) -> usize {
        let mut roots = self.roots.borrow_mut();
        assert!(
            roots.len() < self.root_capacity,
            "root registry overflow ({} entries)",
            self.root_capacity
        );
        roots.push(entry);
        roots.len() - 1
    }

    fn unregister(&self, idx: usize) {
        let mut roots = self.roots.borrow_mut();
        assert_eq!(
            roots.len(),
            idx + 1,
            "root {idx} released out of order ({} registered)",
            roots.len()
        );
        roots.pop();
    }

    /// Root a single value until the guard is dropped.
    pub fn root(&self, v: Value) -> Root<'_> {
        Root::new(self, self.register(RootEntry::Slot(v)))
    }

    /// Root every element of a table until the guard is dropped.
    pub fn root_table(&self, table: &RootVec) -> TableRoot<'_> {
        self.root_tables(&[table])
    }

    pub fn root_tables(&self, tables: &[&RootVec]) -> TableRoot<'_> {
        let entry = RootEntry::Tables(tables.iter().map(|&t| t.clone()).collect());
        TableRoot::new(self, self.register(entry))
    }

    /// Root a table for the lifetime of the storage.
    pub fn root_forever(&self, table: &RootVec) {
        self.permanent.borrow_mut().push(table.clone());
    }

    pub fn root_depth(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Fail with `TooDeep` unless a nested run (a VM, a compiler level)
    /// still has room for its guards.
    pub fn ensure_root_headroom(&self) -> Result<()> {
        let depth = self.root_depth();
        if depth + ROOT_HEADROOM > self.root_capacity {
            return Err(Error::new(
                ErrorKind::TooDeep,
                format!("{depth} of {} roots in use", self.root_capacity),
            ));
        }
        Ok(())
    }

    /// Refuse collection until the guard is dropped.
    pub fn lock(&self) -> Lock<'_> {
        Lock::new(self)
    }

    pub fn is_locked(&self) -> bool {
        self.locks.get() > 0
    }

    // Allocation.

    fn fits(&self, words: usize) -> bool {
        let pools = self.pools.borrow();
        pools.bump + words <= pools.active.len()
    }

    /// Reserve `words` words (rounded up to even) and return the index of the first.
    /// The words are not initialized.
    fn alloc(&self, words: usize) -> Result<usize> {
        let words = round_even(words);
        if !self.fits(words) {
            if self.is_locked() {
                tracing::warn!(words, "heap exhausted while locked; collection refused");
                return Err(Error::out_of_memory(words));
            }
            self.collect();
            if !self.fits(words) {
                return Err(Error::out_of_memory(words));
            }
        }
        let mut pools = self.pools.borrow_mut();
        let idx = pools.bump;
        pools.bump += words;
        Ok(idx)
    }

    /// Run a full collection.
    ///
    /// Every value reachable from a registered root is copied to the other pool,
    /// and the roots are rewritten to point at the copies.
    pub fn collect(&self) {
        if self.is_locked() {
            tracing::warn!("collection refused while locked");
            return;
        }
        let mut pools = self.pools.borrow_mut();
        let mut roots = self.roots.borrow_mut();
        let before = pools.bump;
        let mut high = self.high_water.get();
        high.used = max(high.used, before);
        self.high_water.set(high);

        roots.push(RootEntry::Tables(self.permanent.borrow().clone()));
        let copied = gc::collect(&mut pools, &mut roots);
        roots.pop();

        let mut stats = self.stats.get();
        stats.collections += 1;
        stats.copied = copied;
        self.stats.set(stats);
        tracing::debug!(
            collection = stats.collections,
            before,
            after = pools.bump,
            "collected"
        );
    }

    pub(crate) fn word(&self, idx: usize) -> Value {
        self.pools.borrow().active[idx]
    }

    pub(crate) fn set_word(&self, idx: usize, v: Value) {
        self.pools.borrow_mut().active[idx] = v;
    }

    // Cells.

    /// Allocate a two-word cell with the given tag.
    pub fn cell(&self, tag: Tag, head: Value, tail: Value) -> Result<Value> {
        debug_assert!(tag.is_cell());
        let head = self.root(head);
        let tail = self.root(tail);
        let idx = self.alloc(2)?;
        self.set_word(idx, head.get());
        self.set_word(idx + 1, tail.get());
        Ok(Value::heap(tag, idx))
    }

    pub fn cons(&self, car: Value, cdr: Value) -> Result<Value> {
        self.cell(Tag::Pair, car, cdr)
    }

    fn cell_index(&self, v: Value) -> Result<usize> {
        if v.is_heap() && v.tag().is_cell() {
            Ok(v.idx())
        } else {
            Err(Error::type_mismatch("pair", v))
        }
    }

    /// Head of any pair-shaped cell; `NIL` for `NIL`.
    pub fn car(&self, v: Value) -> Result<Value> {
        if v.is_nil() {
            return Ok(Value::NIL);
        }
        Ok(self.word(self.cell_index(v)?))
    }

    /// Tail of any pair-shaped cell; `NIL` for `NIL`.
    pub fn cdr(&self, v: Value) -> Result<Value> {
        if v.is_nil() {
            return Ok(Value::NIL);
        }
        Ok(self.word(self.cell_index(v)? + 1))
    }

    pub fn rplaca(&self, cell: Value, v: Value) -> Result<()> {
        let idx = self.cell_index(cell)?;
        self.set_word(idx, v);
        Ok(())
    }

    pub fn rplacd(&self, cell: Value, v: Value) -> Result<()> {
        let idx = self.cell_index(cell)?;
        self.set_word(idx + 1, v);
        Ok(())
    }

    /// Head of a value known to be a cell or NIL; anything else reads as NIL.
    pub fn head(&self, v: Value) -> Value {
        self.car(v).unwrap_or(Value::NIL)
    }

    /// Tail of a value known to be a cell or NIL; anything else reads as NIL.
    pub fn tail(&self, v: Value) -> Value {
        self.cdr(v).unwrap_or(Value::NIL)
    }

    /// The `n`th element of a list, or NIL if the list is shorter.
    pub fn nth(&self, list: Value, n: usize) -> Value {
        let mut cur = list;
        for _ in 0..n {
            cur = self.tail(cur);
        }
        self.head(cur)
    }

    /// The `n`th tail of a list.
    pub fn nthcdr(&self, list: Value, n: usize) -> Value {
        (0..n).fold(list, |cur, _| self.tail(cur))
    }

    /// Length of a proper list. Improper tails and cycles are errors.
    pub fn length(&self, list: Value) -> Result<usize> {
        let limit = self.capacity() / 2;
        let mut n = 0;
        let mut cur = list;
        while !cur.is_nil() {
            if !cur.is_pair() {
                return Err(Error::type_mismatch("proper list", list));
            }
            n += 1;
            if n > limit {
                return Err(Error::new(ErrorKind::TypeMismatch, "circular list"));
            }
            cur = self.tail(cur);
        }
        Ok(n)
    }

    /// Elements of a proper list. The result is not rooted.
    pub fn list_items(&self, list: Value) -> Result<Vec<Value>> {
        let n = self.length(list)?;
        let mut out = Vec::with_capacity(n);
        let mut cur = list;
        while cur.is_pair() {
            out.push(self.head(cur));
            cur = self.tail(cur);
        }
        Ok(out)
    }

    /// Build a list from values, ending in `tail`.
    pub fn list_with_tail(&self, items: &[Value], tail: Value) -> Result<Value> {
        let table = RootVec::from_values(items.iter().copied());
        let _guard = self.root_table(&table);
        let acc = self.root(tail);
        for i in (0..table.len()).rev() {
            let item = table.get(i).unwrap_or_default();
            acc.set(self.cons(item, acc.get())?);
        }
        Ok(acc.get())
    }

    pub fn list(&self, items: &[Value]) -> Result<Value> {
        self.list_with_tail(items, Value::NIL)
    }

    /// Build a list from `table[start..]`.
    pub fn list_from_table(&self, table: &RootVec, start: usize, tail: Value) -> Result<Value> {
        let _guard = self.root_table(table);
        let acc = self.root(tail);
        for i in (start..table.len()).rev() {
            let item = table.get(i).unwrap_or_default();
            acc.set(self.cons(item, acc.get())?);
        }
        Ok(acc.get())
    }

    /// Fresh copy of the spine of `list`, ending in `tail`.
    pub fn append(&self, list: Value, tail: Value) -> Result<Value> {
        let items = RootVec::from_values(self.list_items(list)?);
        self.list_from_table(&items, 0, tail)
    }

    /// Structural equality.
    pub fn equal(&self, a: Value, b: Value) -> bool {
        self.equal_depth(a, b, 0)
    }

    fn equal_depth(&self, a: Value, b: Value, depth: usize) -> bool {
        const MAX_DEPTH: usize = 2_000;
        let (mut a, mut b) = (a, b);
        // Walk tails iteratively; recurse only into heads and vector elements.
        loop {
            if a == b {
                return true;
            }
            if depth > MAX_DEPTH || a.tag() != b.tag() || !a.is_heap() || !b.is_heap() {
                return false;
            }
            if !a.tag().is_cell() {
                break;
            }
            if !self.equal_depth(self.head(a), self.head(b), depth + 1) {
                return false;
            }
            a = self.tail(a);
            b = self.tail(b);
        }
        match (self.vector_header(a), self.vector_header(b)) {
            (Ok(ha), Ok(hb)) if ha.size == hb.size => (0..ha.size).all(|i| {
                self.equal_depth(self.vector_word(&ha, i), self.vector_word(&hb, i), depth + 1)
            }),
            _ => false,
        }
    }

    /// A value of kind Error, `(cause . positions)`.
    pub fn error_cell(&self, cause: Value, positions: Value) -> Result<Value> {
        self.cell(Tag::Error, cause, positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Storage {
        Storage::new(&Config::default().with_heap_words(1024))
    }

    #[test]
    fn cons_car_cdr() {
        let store = small();
        let p = store.cons(Value::int(1), Value::int(2)).unwrap();
        assert!(p.is_pair());
        assert_eq!(store.car(p).unwrap(), Value::int(1));
        assert_eq!(store.cdr(p).unwrap(), Value::int(2));
        assert_eq!(store.car(Value::NIL).unwrap(), Value::NIL);
        assert!(store.car(Value::int(3)).is_err());
    }

    #[test]
    fn rplaca_rplacd() {
        let store = small();
        let p = store.cons(Value::int(1), Value::NIL).unwrap();
        store.rplaca(p, Value::int(5)).unwrap();
        store.rplacd(p, Value::char('x')).unwrap();
        assert_eq!(store.car(p).unwrap(), Value::int(5));
        assert_eq!(store.cdr(p).unwrap(), Value::char('x'));
    }

    #[test]
    fn lists() {
        let store = small();
        let l = store
            .list(&[Value::int(1), Value::int(2), Value::int(3)])
            .unwrap();
        assert_eq!(store.length(l).unwrap(), 3);
        assert_eq!(store.nth(l, 2), Value::int(3));
        assert_eq!(store.nth(l, 5), Value::NIL);
        let items = store.list_items(l).unwrap();
        assert_eq!(items, vec![Value::int(1), Value::int(2), Value::int(3)]);
        let dotted = store.cons(Value::int(1), Value::int(2)).unwrap();
        assert!(store.length(dotted).is_err());
    }

    #[test]
    fn append_copies_spine() {
        let store = small();
        let a = store.root(store.list(&[Value::int(1), Value::int(2)]).unwrap());
        let b = store.list(&[Value::int(3)]).unwrap();
        let c = store.append(a.get(), b).unwrap();
        assert_eq!(store.length(c).unwrap(), 3);
        assert_ne!(c, a.get());
        assert_eq!(store.length(a.get()).unwrap(), 2);
    }

    #[test]
    fn collection_preserves_structure_not_identity() {
        let store = small();
        let list = store
            .list(&[Value::int(1), Value::int(2), Value::int(3)])
            .unwrap();
        let root = store.root(list);
        let before = list;
        let expected = store.root(
            store
                .list(&[Value::int(1), Value::int(2), Value::int(3)])
                .unwrap(),
        );
        store.collect();
        let after = root.get();
        assert_ne!(before, after, "collection should move the list");
        assert!(store.equal(after, expected.get()));
        assert_eq!(store.nth(after, 0), Value::int(1));
        assert_eq!(store.nth(after, 1), Value::int(2));
        assert_eq!(store.nth(after, 2), Value::int(3));
        assert_eq!(store.current_stats().collections, 1);
    }

    #[test]
    fn collection_preserves_cycles() {
        let store = small();
        let list = store
            .list(&[Value::int(1), Value::int(2), Value::int(3)])
            .unwrap();
        let last = store.nthcdr(list, 2);
        store.rplacd(last, list).unwrap();
        let root = store.root(list);
        store.collect();
        let after = root.get();
        assert_eq!(store.nth(after, 3), store.nth(after, 0));
        assert_eq!(store.nthcdr(after, 3), after, "cycle should close on the copy");
        // Three cells, two words each.
        assert_eq!(store.current_stats().copied, 6);
    }

    #[test]
    fn shared_structure_is_copied_once() {
        let store = small();
        let shared = store.cons(Value::int(9), Value::NIL).unwrap();
        let pair = store.cons(shared, shared).unwrap();
        let root = store.root(pair);
        store.collect();
        let after = root.get();
        assert_eq!(store.car(after).unwrap(), store.cdr(after).unwrap());
        assert_eq!(store.current_stats().copied, 4);
    }

    #[test]
    fn unrooted_garbage_is_reclaimed() {
        let store = small();
        for i in 0..2000 {
            store.cons(Value::int(i), Value::NIL).unwrap();
        }
        assert!(store.current_stats().collections > 0);
        store.collect();
        assert_eq!(store.current_stats().used, RESERVED_WORDS);
        assert_eq!(store.current_stats().copied, 0);
        assert!(store.max_stats().used > RESERVED_WORDS);
    }

    #[test]
    fn full_heap_reports_out_of_memory() {
        let store = small();
        let keep = store.root(Value::NIL);
        let result = (0..1000).try_for_each(|i| {
            keep.set(store.cons(Value::int(i), keep.get())?);
            Ok::<_, Error>(())
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfMemory);
    }

    #[test]
    fn locked_heap_refuses_collection() {
        let store = small();
        let _lock = store.lock();
        let result = (0..1000).try_for_each(|i| store.cons(Value::int(i), Value::NIL).map(|_| ()));
        assert_eq!(result.unwrap_err().kind, ErrorKind::OutOfMemory);
        store.collect();
        assert_eq!(store.current_stats().collections, 0);
    }

    #[test]
    fn headroom_runs_out_before_the_registry() {
        let store = Storage::new(&Config::default().with_heap_words(256).with_root_capacity(40));
        assert!(store.ensure_root_headroom().is_ok());
        let guards: Vec<_> = (0..8).map(|i| store.root(Value::int(i))).collect();
        assert!(store.ensure_root_headroom().is_ok());
        let more = store.root(Value::NIL);
        assert_eq!(store.ensure_root_headroom().unwrap_err().kind, ErrorKind::TooDeep);
        drop(more);
        for guard in guards.into_iter().rev() {
            drop(guard);
        }
    }

    #[test]
    fn equal_compares_structure() {
        let store = small();
        let a = store.root(store.list(&[Value::int(1), Value::char('a')]).unwrap());
        let b = store.list(&[Value::int(1), Value::char('a')]).unwrap();
        assert!(store.equal(a.get(), b));
        assert_ne!(a.get(), b);
        let c = store.list(&[Value::int(1)]).unwrap();
        assert!(!store.equal(a.get(), c));
    }
}
