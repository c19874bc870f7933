//! Identity of stored records.

/// A record with a store-assigned identity.
///
/// Two snapshots with the same id describe the same record, even when their
/// fields differ (e.g. before and after an update).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
