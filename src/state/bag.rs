use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Caller-attached data carried verbatim through the crawl pipeline
///
/// Values are opaque to the crawler. Cloning a bag is cheap; the values
/// themselves are shared.
#[derive(Clone, Default)]
pub struct PageBag {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl PageBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `key`, replacing any previous value
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if present and of type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Copies every entry of `other` into this bag
    ///
    /// Keys present in both bags take the value from `other`.
    pub fn merge(&mut self, other: &PageBag) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), Arc::clone(value));
        }
    }
}

impl fmt::Debug for PageBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("PageBag").field("keys", &keys).finish()
    }
}
