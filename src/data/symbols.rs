//! Packages: name-to-symbol tables.
//!
//! Names are interned with `string-interner`; the interner's symbol index is
//! the slot of the heap symbol in the package's table. The table is rooted
//! for as long as the storage lives, so registered symbols are never freed.

use string_interner::{DefaultStringInterner, Symbol as _};

use super::{RootVec, Storage, Tag, Value};
use crate::error::Result;

pub struct Package {
    name: String,
    names: DefaultStringInterner,
    symbols: RootVec,
}

impl Package {
    /// A new, empty package. Its symbol table is rooted in `store` permanently.
    pub fn new(store: &Storage, name: impl Into<String>) -> Self {
        let symbols = RootVec::new();
        store.root_forever(&symbols);
        Package {
            name: name.into(),
            names: DefaultStringInterner::new(),
            symbols,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The symbol registered under `name`, if any.
    pub fn find(&self, name: &str) -> Option<Value> {
        let sym = self.names.get(name)?;
        self.symbols.get(sym.to_usize())
    }

    /// The symbol registered under `name`, creating it if needed.
    pub fn intern(&mut self, store: &Storage, name: &str) -> Result<Value> {
        if let Some(v) = self.find(name) {
            return Ok(v);
        }
        let v = store.make_string(Tag::Symbol, name)?;
        let sym = self.names.get_or_intern(name);
        debug_assert_eq!(sym.to_usize(), self.symbols.len());
        self.symbols.push(v);
        tracing::trace!(package = self.name, name, "interned");
        Ok(v)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
