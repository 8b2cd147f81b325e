//! The 64-bit signed integer value.

use std::sync::OnceLock;

use super::Value;

/// A 64-bit signed integer. The decimal string form is rendered once on
/// first use so the buffer stays stable for the rest of the render.
#[derive(Debug, Default)]
pub struct NumericValue {
    value: i64,
    rendered: OnceLock<String>,
}

impl NumericValue {
    /// Creates a numeric value.
    pub fn new(value: i64) -> Self {
        Self {
            value,
            rendered: OnceLock::new(),
        }
    }
}

impl Value for NumericValue {
    fn as_string(&self) -> &str {
        self.rendered.get_or_init(|| self.value.to_string())
    }

    fn to_numeric(&self) -> i64 {
        self.value
    }

    fn to_double(&self) -> f64 {
        self.value as f64
    }

    fn to_boolean(&self) -> bool {
        self.value != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_string_form() {
        assert_eq!(NumericValue::new(-16).as_string(), "-16");
        assert_eq!(
            NumericValue::new(922337203685477580).as_string(),
            "922337203685477580"
        );
    }
}
