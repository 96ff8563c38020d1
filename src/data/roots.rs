//! The root registry.
//!
//! Every value that must survive an allocation has to be reachable from a root.
//! Roots form a bounded LIFO stack inside [`Storage`]:
//! -   a [`Root`] holds a single slot, which the collector rewrites in place;
//! -   a [`TableRoot`] registers one or more [`RootVec`] tables,
//!     every element of which is treated as an independent root.
//!
//! Guards unregister themselves when dropped; dropping out of order is a bug
//! and panics.

use core::cell::RefCell;
use std::rc::Rc;

use super::{Storage, Value};

/// An entry on the root stack.
pub(super) enum RootEntry {
    Slot(Value),
    Tables(Vec<RootVec>),
}

/// A growable table of values, shared between its owner and the root registry.
///
/// Used for anything that lives outside a single Rust stack frame:
/// the VM's operand and call stacks, the assembler's buffers,
/// and the runtime's symbol tables.
#[derive(Clone, Default)]
pub struct RootVec(Rc<RefCell<Vec<Value>>>);

impl RootVec {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        RootVec(Rc::new(RefCell::new(values.into_iter().collect())))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn push(&self, v: Value) {
        self.0.borrow_mut().push(v)
    }

    pub fn pop(&self) -> Option<Value> {
        self.0.borrow_mut().pop()
    }

    pub fn peek(&self) -> Option<Value> {
        self.0.borrow().last().copied()
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        self.0.borrow().get(idx).copied()
    }

    pub fn set(&self, idx: usize, v: Value) {
        self.0.borrow_mut()[idx] = v;
    }

    pub fn truncate(&self, len: usize) {
        self.0.borrow_mut().truncate(len)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear()
    }

    /// Copy of the current contents.
    /// The copy is not a root; don't hold it across allocations.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    /// Identity of the shared table, for telling clones apart from copies.
    pub(super) fn id(&self) -> *const RefCell<Vec<Value>> {
        Rc::as_ptr(&self.0)
    }

    /// Apply `f` to every element in place. Used by the collector.
    pub(super) fn update(&self, mut f: impl FnMut(Value) -> Value) {
        for v in self.0.borrow_mut().iter_mut() {
            *v = f(*v);
        }
    }
}

/// A rooted slot. The collector keeps its value current.
pub struct Root<'s> {
    store: &'s Storage,
    idx: usize,
}

impl<'s> Root<'s> {
    pub(super) fn new(store: &'s Storage, idx: usize) -> Self {
        Root { store, idx }
    }

    /// Current value of the slot.
    pub fn get(&self) -> Value {
        match &self.store.roots.borrow()[self.idx] {
            RootEntry::Slot(v) => *v,
            RootEntry::Tables(_) => unreachable!("root slot {} holds a table", self.idx),
        }
    }

    pub fn set(&self, v: Value) {
        match &mut self.store.roots.borrow_mut()[self.idx] {
            RootEntry::Slot(slot) => *slot = v,
            RootEntry::Tables(_) => unreachable!("root slot {} holds a table", self.idx),
        }
    }
}

impl Drop for Root<'_> {
    fn drop(&mut self) {
        self.store.unregister(self.idx);
    }
}

/// Registration of one or more tables on the root stack.
pub struct TableRoot<'s> {
    store: &'s Storage,
    idx: usize,
}

impl<'s> TableRoot<'s> {
    pub(super) fn new(store: &'s Storage, idx: usize) -> Self {
        TableRoot { store, idx }
    }
}

impl Drop for TableRoot<'_> {
    fn drop(&mut self) {
        self.store.unregister(self.idx);
    }
}

/// While alive, collection is refused.
pub struct Lock<'s> {
    store: &'s Storage,
}

impl<'s> Lock<'s> {
    pub(super) fn new(store: &'s Storage) -> Self {
        store.locks.set(store.locks.get() + 1);
        Lock { store }
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        let locks = self.store.locks.get();
        assert!(locks > 0, "storage lock count underflow");
        self.store.locks.set(locks - 1);
    }
}
