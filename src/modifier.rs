//! Modifiers: the named pipe filters applied with `{$x|name:arg}`.
//!
//! Custom modifiers are registered on a [`Data`](crate::data::Data) by
//! name; the built-in set below is registered on every `Data` at
//! construction and can be shadowed. Parameters are the already-evaluated
//! literal arguments attached to the pipe.

use crate::value::{Value, VariantValue};

/// Ordered, already-evaluated arguments of one modifier application.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: Vec<VariantValue>,
}

impl Parameters {
    /// Creates a parameter list.
    pub fn new(values: Vec<VariantValue>) -> Self {
        Self { values }
    }

    /// The parameter at `index`.
    pub fn get(&self, index: usize) -> Option<&VariantValue> {
        self.values.get(index)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no parameters were given.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A named transformation applied to a value in a filter chain.
///
/// The result may alias the input; the handler keeps every produced value
/// alive until the render completes either way.
pub trait Modifier: Send + Sync {
    /// Transforms `input` into a new value.
    fn apply(&self, input: &VariantValue, params: &Parameters) -> VariantValue;
}

// ============================================================================
// Built-in modifiers
// ============================================================================

/// `|toupper`: uppercases the string form.
pub struct ToUpper;

impl Modifier for ToUpper {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.as_string().to_uppercase())
    }
}

/// `|tolower`: lowercases the string form.
pub struct ToLower;

impl Modifier for ToLower {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.as_string().to_lowercase())
    }
}

/// `|ucfirst`: uppercases the first character of the string form.
pub struct UcFirst;

impl Modifier for UcFirst {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        let text = input.as_string();
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => {
                let mut out = String::with_capacity(text.len());
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
                VariantValue::from(out)
            }
            None => input.clone(),
        }
    }
}

/// `|trim`: strips leading and trailing whitespace from the string form.
pub struct Trim;

impl Modifier for Trim {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.as_string().trim())
    }
}

/// `|count`: the number of members of the value.
pub struct Count;

impl Modifier for Count {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.member_count() as i64)
    }
}

/// `|count_characters`: the number of characters in the string form.
pub struct CountCharacters;

impl Modifier for CountCharacters {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.as_string().chars().count() as i64)
    }
}

/// `|count_paragraphs`: the number of `\n` and `\r` characters in the
/// string form.
pub struct CountParagraphs;

impl Modifier for CountParagraphs {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        let count = input
            .as_string()
            .chars()
            .filter(|&c| c == '\n' || c == '\r')
            .count();
        VariantValue::from(count as i64)
    }
}

/// `|count_words`: the number of whitespace-separated words in the string
/// form.
pub struct CountWords;

impl Modifier for CountWords {
    fn apply(&self, input: &VariantValue, _params: &Parameters) -> VariantValue {
        VariantValue::from(input.as_string().split_whitespace().count() as i64)
    }
}

/// `|default:fallback`: the first parameter when the input's string form is
/// empty, the input otherwise.
pub struct Default_;

impl Modifier for Default_ {
    fn apply(&self, input: &VariantValue, params: &Parameters) -> VariantValue {
        if input.size() == 0 {
            if let Some(fallback) = params.get(0) {
                return fallback.clone();
            }
        }
        input.clone()
    }
}

/// The built-in modifier set registered on every `Data`.
pub(crate) fn builtins() -> Vec<(&'static str, std::sync::Arc<dyn Modifier>)> {
    use std::sync::Arc;
    vec![
        ("toupper", Arc::new(ToUpper) as Arc<dyn Modifier>),
        ("tolower", Arc::new(ToLower)),
        ("ucfirst", Arc::new(UcFirst)),
        ("trim", Arc::new(Trim)),
        ("count", Arc::new(Count)),
        ("count_characters", Arc::new(CountCharacters)),
        ("count_paragraphs", Arc::new(CountParagraphs)),
        ("count_words", Arc::new(CountWords)),
        ("default", Arc::new(Default_)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn apply(modifier: &dyn Modifier, input: &VariantValue) -> String {
        modifier
            .apply(input, &Parameters::default())
            .as_string()
            .to_string()
    }

    #[test]
    fn case_modifiers() {
        let input = VariantValue::from("Hello World");
        assert_eq!(apply(&ToUpper, &input), "HELLO WORLD");
        assert_eq!(apply(&ToLower, &input), "hello world");
        assert_eq!(apply(&UcFirst, &VariantValue::from("hello")), "Hello");
    }

    #[test]
    fn counting_modifiers() {
        assert_eq!(apply(&Count, &VariantValue::from(vec![1i64, 2, 3])), "3");
        assert_eq!(
            apply(&CountParagraphs, &VariantValue::from("a\nb\r\nc")),
            "3"
        );
        assert_eq!(apply(&CountWords, &VariantValue::from(" one  two ")), "2");
        assert_eq!(apply(&CountCharacters, &VariantValue::from("abcd")), "4");
    }

    #[test]
    fn default_falls_back_on_empty() {
        let fallback = Parameters::new(vec![VariantValue::from("n/a")]);
        let out = Default_.apply(&VariantValue::from(""), &fallback);
        assert_eq!(out.as_string(), "n/a");

        let kept = Default_.apply(&VariantValue::from("set"), &fallback);
        assert_eq!(kept.as_string(), "set");
    }
}
