//! Runtime configuration.

/// Sizes and switches fixed when a [`crate::Runtime`] starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Words in each of the two heap pools.
    pub heap_words: usize,
    /// Maximum entries on the root registry.
    pub root_capacity: usize,
    /// Evaluate the bundled prelude at startup.
    pub load_prelude: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_words: 1 << 20,
            root_capacity: 512,
            load_prelude: true,
        }
    }
}

impl Config {
    pub fn with_heap_words(self, heap_words: usize) -> Self {
        Config { heap_words, ..self }
    }

    pub fn with_root_capacity(self, root_capacity: usize) -> Self {
        Config {
            root_capacity,
            ..self
        }
    }

    pub fn without_prelude(self) -> Self {
        Config {
            load_prelude: false,
            ..self
        }
    }
}
