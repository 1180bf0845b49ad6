//! Identity and value semantics for stock records.

/// A record with a stable identity that survives changes to its attributes.
///
/// Products and stock movements are both entities: two snapshots with the same
/// id describe the same record, even if the quantities on them differ.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// True when both snapshots describe the same stored record.
    fn same_record(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// A value defined entirely by its contents (SKUs, lot codes).
///
/// Value objects are validated once at construction and then never change;
/// "modifying" one means parsing a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {
    /// Borrowed canonical form, used for storage keys and lookups.
    fn as_str(&self) -> &str;
}
