//! The iteration protocol over multi-member values.

use super::VariantValue;

/// A stateful, finite, non-restartable iterator over a value's members.
///
/// Owned by the handler for the duration of its containing foreach frame;
/// destroyed before its source value.
pub trait ValueIterator: Send {
    /// Whether the iterator currently points at a member.
    fn valid(&self) -> bool;

    /// Advances to the next member.
    fn next(&mut self);

    /// The member at the current position.
    fn value(&self) -> Option<VariantValue>;

    /// The key at the current position, for keyed collections.
    fn key(&self) -> Option<VariantValue>;
}
