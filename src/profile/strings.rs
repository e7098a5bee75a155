//! Interned string table for marker names.

use serde::{Serialize, Serializer};

use std::collections::HashMap;

/// Assigns each distinct string the next index on first sight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueStringArray {
    array: Vec<String>,
    index: HashMap<String, usize>,
}

impl UniqueStringArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table. A repeated string keeps its last position.
    pub fn from_strings(strings: Vec<String>) -> Self {
        let index = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        Self {
            array: strings,
            index,
        }
    }

    pub fn index_for_string(&mut self, s: &str) -> usize {
        if let Some(&existing) = self.index.get(s) {
            return existing;
        }
        let next = self.array.len();
        self.array.push(s.to_string());
        self.index.insert(s.to_string(), next);
        next
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.array.get(index).map(String::as_str)
    }

    pub fn has_string(&self, s: &str) -> bool {
        self.index.contains_key(s)
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn serialize_to_array(&self) -> Vec<String> {
        self.array.clone()
    }
}

impl Serialize for UniqueStringArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.array.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_round_trips() {
        let mut table = UniqueStringArray::new();
        let a = table.index_for_string("fetch-corpus");
        let b = table.index_for_string("train");
        assert_eq!(table.index_for_string("fetch-corpus"), a);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        let array = table.serialize_to_array();
        assert_eq!(array[a], "fetch-corpus");
        assert_eq!(table.get_string(b), Some("train"));
        assert_eq!(table.get_string(7), None);
        assert!(table.has_string("train"));
        assert!(!table.has_string("evaluate"));
    }

    #[test]
    fn seeded_table_continues_numbering() {
        let mut table = UniqueStringArray::from_strings(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(table.index_for_string("y"), 1);
        assert_eq!(table.index_for_string("z"), 2);
        assert_eq!(
            serde_json::to_value(&table).expect("serialize"),
            serde_json::json!(["x", "y", "z"])
        );
    }
}
