//! The data binding a template is rendered against.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::modifier::{self, Modifier};
use crate::value::VariantValue;

/// Variables and modifiers for one or more renders.
///
/// Names are compared as byte strings and assignment is last-wins. The
/// built-in modifiers are registered up front and can be shadowed by name.
/// A `Data` is read-only while a render borrows it.
pub struct Data {
    variables: FxHashMap<String, VariantValue>,
    modifiers: FxHashMap<String, Arc<dyn Modifier>>,
}

impl Data {
    /// Creates a binding with the built-in modifiers registered.
    pub fn new() -> Self {
        let mut modifiers = FxHashMap::default();
        for (name, modifier) in modifier::builtins() {
            modifiers.insert(name.to_string(), modifier);
        }
        Self {
            variables: FxHashMap::default(),
            modifiers,
        }
    }

    /// Assigns a variable; anything convertible into a variant is accepted.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<VariantValue>) -> &mut Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Registers a modifier under a name.
    pub fn modifier(&mut self, name: impl Into<String>, modifier: impl Modifier + 'static) -> &mut Self {
        self.modifiers.insert(name.into(), Arc::new(modifier));
        self
    }

    /// Looks up a variable by name.
    pub(crate) fn value(&self, name: &str) -> Option<&VariantValue> {
        self.variables.get(name)
    }

    /// Looks up a modifier by name.
    pub(crate) fn lookup_modifier(&self, name: &str) -> Option<Arc<dyn Modifier>> {
        self.modifiers.get(name).cloned()
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn assignment_is_last_wins() {
        let mut data = Data::new();
        data.assign("x", 1i64).assign("x", 2i64);
        assert_eq!(data.value("x").unwrap().to_numeric(), 2);
        assert!(data.value("missing").is_none());
    }

    #[test]
    fn builtin_modifiers_are_registered() {
        let data = Data::new();
        assert!(data.lookup_modifier("toupper").is_some());
        assert!(data.lookup_modifier("count_paragraphs").is_some());
        assert!(data.lookup_modifier("nonsense").is_none());
    }
}
