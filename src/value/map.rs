//! The insertion-ordered association value.

use indexmap::IndexMap;

use super::{StringValue, Value, ValueIterator, VariantValue};

/// A stable, insertion-ordered association from string keys to variants.
/// Members resolve both by name and by position; `key_at` yields the key
/// at a position as a string value.
#[derive(Debug, Clone, Default)]
pub struct MapValue {
    entries: IndexMap<String, VariantValue>,
}

impl MapValue {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a binding; an existing key is overwritten in place.
    pub fn assign(&mut self, key: impl Into<String>, value: impl Into<VariantValue>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Builds a map from prepared entries.
    pub fn from_entries(entries: IndexMap<String, VariantValue>) -> Self {
        Self { entries }
    }
}

impl Value for MapValue {
    fn as_string(&self) -> &str {
        ""
    }

    fn to_numeric(&self) -> i64 {
        0
    }

    fn to_double(&self) -> f64 {
        0.0
    }

    fn to_boolean(&self) -> bool {
        !self.entries.is_empty()
    }

    fn member_count(&self) -> usize {
        self.entries.len()
    }

    fn member(&self, name: &str) -> Option<VariantValue> {
        self.entries.get(name).cloned()
    }

    fn member_at(&self, position: usize) -> Option<VariantValue> {
        self.entries.get_index(position).map(|(_, v)| v.clone())
    }

    fn key_at(&self, position: usize) -> Option<VariantValue> {
        self.entries
            .get_index(position)
            .map(|(k, _)| VariantValue::new(StringValue::new(k.clone())))
    }

    fn iterator(&self) -> Option<Box<dyn ValueIterator>> {
        Some(Box::new(MapIterator {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            position: 0,
        }))
    }
}

/// Cursor over a map's entries in insertion order.
struct MapIterator {
    entries: Vec<(String, VariantValue)>,
    position: usize,
}

impl ValueIterator for MapIterator {
    fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    fn next(&mut self) {
        self.position += 1;
    }

    fn value(&self) -> Option<VariantValue> {
        self.entries.get(self.position).map(|(_, v)| v.clone())
    }

    fn key(&self) -> Option<VariantValue> {
        self.entries
            .get(self.position)
            .map(|(k, _)| VariantValue::new(StringValue::new(k.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_positional_access() {
        let mut map = MapValue::new();
        map.assign("first", 1i64).assign("second", 2i64);
        assert_eq!(map.member("first").unwrap().to_numeric(), 1);
        assert_eq!(map.member_at(1).unwrap().to_numeric(), 2);
        assert_eq!(map.key_at(1).unwrap().as_string(), "second");
        assert!(map.member("missing").is_none());
    }

    #[test]
    fn insertion_order_is_stable() {
        let mut map = MapValue::new();
        map.assign("b", 1i64).assign("a", 2i64);
        let mut it = map.iterator().unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().unwrap().as_string().to_string());
            it.next();
        }
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn assign_is_last_wins() {
        let mut map = MapValue::new();
        map.assign("k", 1i64).assign("k", 2i64);
        assert_eq!(map.member_count(), 1);
        assert_eq!(map.member("k").unwrap().to_numeric(), 2);
    }
}
