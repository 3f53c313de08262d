//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// The store indexes every row by this identifier (the opaque external id) and
/// refuses to write a row whose `tenant_id()` differs from the partition it is
/// written into.
pub trait Entity {
    /// Strongly-typed external identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Owning tenant; `None` only for not-yet-created aggregates.
    fn tenant_id(&self) -> Option<crate::TenantId>;
}
