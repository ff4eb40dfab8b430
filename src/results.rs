//! # Result Cache
//!
//! Holds rendered transcriptions between the POST that produced them and the
//! GET that displays them. The browser only ever sees an opaque handle (a
//! random UUID) in the redirect URL; the text itself never round-trips
//! through the client.
//!
//! Entries live for the life of the process. Reading an entry does not
//! consume it, so reloading the result page shows the same text again.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<Uuid, Arc<str>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under a fresh handle and return the handle.
    pub fn put(&self, content: String) -> String {
        let handle = Uuid::new_v4();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::from(content));
        handle.to_string()
    }

    /// Look up a handle. Unknown and malformed handles are both misses.
    pub fn get(&self, handle: &str) -> Option<Arc<str>> {
        let key = Uuid::parse_str(handle.trim()).ok()?;
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
