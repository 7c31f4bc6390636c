//! Newtype identifiers for roads, shelters, people and zones.
//!
//! Graph and registry ids are dense: `NodeId`, `EdgeId` and `DestinationId`
//! index straight into the owning `Vec` via `.index()`.  Requester and family
//! ids are opaque caller-supplied numbers.

use std::fmt;

/// Declares an id newtype with a public inner integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// All-ones placeholder for "unset".
            pub const INVALID: $name = $name(<$inner>::MAX);

            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline(always)]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }

        impl Default for $name {
            #[inline(always)]
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<$name> for usize {
            #[inline(always)]
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }

        impl TryFrom<usize> for $name {
            type Error = std::num::TryFromIntError;
            fn try_from(n: usize) -> Result<$name, Self::Error> {
                <$inner>::try_from(n).map($name)
            }
        }
    };
}

typed_id! {
    /// Index of a road-network node.
    pub struct NodeId(u32);
}

typed_id! {
    /// Index of a directed road-network edge.
    pub struct EdgeId(u32);
}

typed_id! {
    /// Index of a capacity-bounded destination (shelter) in the registry.
    pub struct DestinationId(u32);
}

typed_id! {
    /// External identity of a person requesting relocation.
    pub struct RequesterId(u32);
}

typed_id! {
    /// Groups requesters that must be co-located at one destination.
    pub struct FamilyId(u32);
}

typed_id! {
    /// Geographic partition used for parallel solving and completion tracking.
    pub struct ZoneId(u32);
}

typed_id! {
    /// Identifier of an assignment record.  Allocated by the solver.
    pub struct AssignmentId(u64);
}

typed_id! {
    /// Identifier of a computed path.  A new id is issued for every reroute.
    pub struct PathId(u64);
}
