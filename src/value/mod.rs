//! The polymorphic value model.
//!
//! Every template variable is a [`Value`]: convertible to string, numeric,
//! double and boolean form, with optional member access and iteration.
//! [`VariantValue`] is the cheaply shareable owning handle the rest of the
//! engine (and generated code) passes around; copies share the referent and
//! equality is identity of the referent.

mod boolean;
mod date;
mod double;
mod iterator;
mod list;
mod map;
mod null;
mod numeric;
mod string;

pub use boolean::BooleanValue;
pub use date::DateValue;
pub use double::DoubleValue;
pub use iterator::ValueIterator;
pub use list::ListValue;
pub use map::MapValue;
pub use null::NullValue;
pub use numeric::NumericValue;
pub use string::StringValue;

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;

/// The capability set every template value answers.
///
/// The string form must be a stable borrow: generated code receives the
/// buffer pointer and asks for the size separately, so both calls have to
/// observe the same bytes. Implementations cache their rendered form.
pub trait Value: Send + Sync {
    /// The string form of this value.
    fn as_string(&self) -> &str;

    /// The numeric (64-bit signed) form of this value.
    fn to_numeric(&self) -> i64;

    /// The floating point form of this value.
    fn to_double(&self) -> f64;

    /// The boolean form of this value.
    fn to_boolean(&self) -> bool;

    /// Length of the string form in bytes.
    fn size(&self) -> usize {
        self.as_string().len()
    }

    /// Number of members; zero for scalars.
    fn member_count(&self) -> usize {
        0
    }

    /// Member access by name.
    fn member(&self, _name: &str) -> Option<VariantValue> {
        None
    }

    /// Member access by position.
    fn member_at(&self, _position: usize) -> Option<VariantValue> {
        None
    }

    /// Key access by position; only meaningful for keyed collections.
    fn key_at(&self, _position: usize) -> Option<VariantValue> {
        None
    }

    /// Creates an iterator over the members. Values whose `member_count`
    /// is zero need not implement this.
    fn iterator(&self) -> Option<Box<dyn ValueIterator>> {
        None
    }
}

/// Shareable owning handle around a value.
#[derive(Clone)]
pub struct VariantValue {
    inner: Arc<dyn Value>,
}

impl VariantValue {
    /// Wraps a concrete value.
    pub fn new<V: Value + 'static>(value: V) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Wraps an already shared value.
    pub fn from_shared(inner: Arc<dyn Value>) -> Self {
        Self { inner }
    }

    /// Whether two variants share the same underlying value.
    pub fn ptr_eq(&self, other: &VariantValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrows the underlying value.
    pub fn value(&self) -> &dyn Value {
        &*self.inner
    }
}

impl Value for VariantValue {
    fn as_string(&self) -> &str {
        self.inner.as_string()
    }

    fn to_numeric(&self) -> i64 {
        self.inner.to_numeric()
    }

    fn to_double(&self) -> f64 {
        self.inner.to_double()
    }

    fn to_boolean(&self) -> bool {
        self.inner.to_boolean()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn member_count(&self) -> usize {
        self.inner.member_count()
    }

    fn member(&self, name: &str) -> Option<VariantValue> {
        self.inner.member(name)
    }

    fn member_at(&self, position: usize) -> Option<VariantValue> {
        self.inner.member_at(position)
    }

    fn key_at(&self, position: usize) -> Option<VariantValue> {
        self.inner.key_at(position)
    }

    fn iterator(&self) -> Option<Box<dyn ValueIterator>> {
        self.inner.iterator()
    }
}

/// Identity comparison, matching the sharing semantics.
impl PartialEq for VariantValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl std::fmt::Debug for VariantValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VariantValue({:?})", self.as_string())
    }
}

/// The shared empty value every missing lookup resolves to.
static EMPTY: LazyLock<VariantValue> = LazyLock::new(|| VariantValue::new(NullValue));

/// The process-wide empty value.
pub fn empty() -> &'static VariantValue {
    &EMPTY
}

impl Default for VariantValue {
    fn default() -> Self {
        empty().clone()
    }
}

// ============================================================================
// Conversions from plain Rust data
// ============================================================================

impl From<()> for VariantValue {
    fn from(_: ()) -> Self {
        empty().clone()
    }
}

impl From<bool> for VariantValue {
    fn from(value: bool) -> Self {
        BooleanValue::get(value).clone()
    }
}

impl From<i32> for VariantValue {
    fn from(value: i32) -> Self {
        VariantValue::new(NumericValue::new(i64::from(value)))
    }
}

impl From<i64> for VariantValue {
    fn from(value: i64) -> Self {
        VariantValue::new(NumericValue::new(value))
    }
}

impl From<f64> for VariantValue {
    fn from(value: f64) -> Self {
        VariantValue::new(DoubleValue::new(value))
    }
}

impl From<&str> for VariantValue {
    fn from(value: &str) -> Self {
        VariantValue::new(StringValue::new(value))
    }
}

impl From<String> for VariantValue {
    fn from(value: String) -> Self {
        VariantValue::new(StringValue::new(value))
    }
}

impl<T: Into<VariantValue>> From<Vec<T>> for VariantValue {
    fn from(items: Vec<T>) -> Self {
        VariantValue::new(ListValue::from_iter(items.into_iter().map(Into::into)))
    }
}

impl From<IndexMap<String, VariantValue>> for VariantValue {
    fn from(entries: IndexMap<String, VariantValue>) -> Self {
        VariantValue::new(MapValue::from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_shared() {
        assert!(empty().ptr_eq(empty()));
        assert_eq!(empty().as_string(), "");
        assert!(!empty().to_boolean());
    }

    #[test]
    fn copies_share_the_referent() {
        let a = VariantValue::from("hello");
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);

        let c = VariantValue::from("hello");
        assert_ne!(a, c);
    }

    #[test]
    fn conversions() {
        assert_eq!(VariantValue::from(42i64).as_string(), "42");
        assert_eq!(VariantValue::from(true).to_numeric(), 1);
        assert_eq!(VariantValue::from("7 days").to_numeric(), 7);
        assert_eq!(VariantValue::from(vec![1i64, 2, 3]).member_count(), 3);
    }
}
