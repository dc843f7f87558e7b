//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values: two
/// document numbers with the same text are the same number, two balance keys
/// with the same article and warehouse address the same balance.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct BalanceKey {
///     article_id: ArticleId,
///     warehouse_id: WarehouseId,
/// }
///
/// impl ValueObject for BalanceKey {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
