use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Bounded translation cache.
///
/// Conversation is repetitive, so identical utterances should not cost a
/// second external call. Keys hash the text to keep long utterances cheap.
/// Eviction is reject-new-when-full: the working set of a meeting fits the
/// default bound comfortably, and stale entries die with the session.
pub struct TranslationCache {
    entries: HashMap<CacheKey, String>,
    capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    text_hash: u64,
    source: String,
    target: String,
}

impl CacheKey {
    fn new(text: &str, source: &str, target: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            text_hash: hasher.finish(),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn get(&self, text: &str, source: &str, target: &str) -> Option<&String> {
        self.entries.get(&CacheKey::new(text, source, target))
    }

    /// Store a translation; rejected when the cache is full
    pub fn insert(&mut self, text: &str, source: &str, target: &str, translated: String) {
        let key = CacheKey::new(text, source, target);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            return;
        }
        self.entries.insert(key, translated);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
