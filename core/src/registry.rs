//! Tag-keyed handler registries.
//!
//! Registration overwrites any earlier entry for the same tag. Lookups of an
//! unknown tag return `None`; callers turn that into the matching
//! configuration error when an operation is dispatched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

pub struct Registry<H: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Arc<H>>,
}

impl<H: ?Sized> Registry<H> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register `handler` under `tag`, returning the handler it replaced.
    pub fn register(&mut self, tag: impl Into<String>, handler: Arc<H>) -> Option<Arc<H>> {
        let tag = tag.into();
        let previous = self.entries.insert(tag.clone(), handler);
        if previous.is_some() {
            debug!(registry = self.kind, %tag, "replaced registered handler");
        } else {
            debug!(registry = self.kind, %tag, "registered handler");
        }
        previous
    }

    pub fn get(&self, tag: &str) -> Option<Arc<H>> {
        self.entries.get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("tags", &self.tags())
            .finish()
    }
}
