//! Entity trait: records addressed by identity rather than by value.

/// A record whose identity outlives changes to its attributes.
///
/// A document is the same document across every saved snapshot; a ledger
/// movement is the same entry before and after it is retracted. Stores key
/// their relations by this id.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
