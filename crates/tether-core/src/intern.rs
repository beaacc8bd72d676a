//! Interned names: small integers standing for repeatedly used strings.

use log::warn;
use rustc_hash::FxHashMap;

/// Bidirectional index ↔ text map. Grows monotonically; never evicts.
#[derive(Debug, Default)]
pub struct NameTable {
    by_index: FxHashMap<i32, String>,
    by_text: FxHashMap<String, i32>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce `(index, text)`. Re-registering the same pair is a no-op;
    /// re-registering an index with different text replaces it.
    pub fn register(&mut self, index: i32, text: &str) {
        if let Some(previous) = self.by_index.get(&index) {
            if previous == text {
                return;
            }
            warn!("interned name {index} re-registered: '{previous}' -> '{text}'");
            if self.by_text.get(previous.as_str()) == Some(&index) {
                self.by_text.remove(previous.as_str());
            }
        }
        self.by_index.insert(index, text.to_string());
        self.by_text.insert(text.to_string(), index);
    }

    pub fn lookup_by_index(&self, index: i32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn lookup_by_text(&self, text: &str) -> Option<i32> {
        self.by_text.get(text).copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions() {
        let mut names = NameTable::new();
        names.register(0, "energy");
        names.register(1, "hits");
        assert_eq!(names.lookup_by_index(1), Some("hits"));
        assert_eq!(names.lookup_by_text("energy"), Some(0));
        assert_eq!(names.lookup_by_text("store"), None);
        assert_eq!(names.lookup_by_index(7), None);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_reregister_replaces_text() {
        let mut names = NameTable::new();
        names.register(3, "pos");
        names.register(3, "pos");
        assert_eq!(names.len(), 1);
        names.register(3, "room");
        assert_eq!(names.lookup_by_index(3), Some("room"));
        assert_eq!(names.lookup_by_text("pos"), None);
        assert_eq!(names.lookup_by_text("room"), Some(3));
    }
}
