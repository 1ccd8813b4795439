//! Engine-wide key sequence

use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out strictly increasing keys shared by all entity kinds
#[derive(Debug)]
pub struct KeyGenerator {
    last: AtomicI64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// A generator whose first key is `last + 1`
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Most recently issued key
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
