//! Entity trait: identity + version continuity across state changes.

/// Persisted entity marker + minimal interface.
///
/// Entities start life without an id or version; both are assigned by the
/// repository on first save and the version advances by one per update.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Short kind name used in error messages and sequence names.
    const KIND: &'static str;

    /// Returns the entity identifier, if one has been assigned.
    fn id(&self) -> Option<Self::Id>;

    /// Returns the optimistic concurrency version, if persisted.
    fn version(&self) -> Option<u32>;
}
