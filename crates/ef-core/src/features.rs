//! Destination capability tags and requester priority tiers.

use std::fmt;
use std::str::FromStr;

use crate::CoreError;

// ── FeatureSet ────────────────────────────────────────────────────────────────

/// Bit set of destination capability tags.
///
/// A destination advertises a set; a requester requires one.  A candidate
/// satisfies the hard constraint when `offered.contains_all(required)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureSet(pub u32);

impl FeatureSet {
    pub const NONE:         FeatureSet = FeatureSet(0);
    pub const MEDICAL:      FeatureSet = FeatureSet(1 << 0);
    pub const WHEELCHAIR:   FeatureSet = FeatureSet(1 << 1);
    pub const PETS:         FeatureSet = FeatureSet(1 << 2);
    pub const FAMILY_ROOMS: FeatureSet = FeatureSet(1 << 3);
    pub const GENERATOR:    FeatureSet = FeatureSet(1 << 4);
    pub const OXYGEN:       FeatureSet = FeatureSet(1 << 5);
    pub const DIALYSIS:     FeatureSet = FeatureSet(1 << 6);
    pub const COOLING:      FeatureSet = FeatureSet(1 << 7);

    const NAMES: [(&'static str, FeatureSet); 8] = [
        ("medical",      Self::MEDICAL),
        ("wheelchair",   Self::WHEELCHAIR),
        ("pets",         Self::PETS),
        ("family_rooms", Self::FAMILY_ROOMS),
        ("generator",    Self::GENERATOR),
        ("oxygen",       Self::OXYGEN),
        ("dialysis",     Self::DIALYSIS),
        ("cooling",      Self::COOLING),
    ];

    #[inline]
    pub fn contains_all(self, required: FeatureSet) -> bool {
        self.0 & required.0 == required.0
    }

    #[inline]
    pub fn union(self, other: FeatureSet) -> FeatureSet {
        FeatureSet(self.0 | other.0)
    }

    #[inline]
    pub fn insert(&mut self, other: FeatureSet) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Tag names present in this set, in declaration order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(_, f)| self.contains_all(*f))
            .map(|(n, _)| n)
    }
}

impl std::ops::BitOr for FeatureSet {
    type Output = FeatureSet;
    fn bitor(self, rhs: FeatureSet) -> FeatureSet {
        self.union(rhs)
    }
}

impl FromStr for FeatureSet {
    type Err = CoreError;

    /// Parse `|`-separated tags, e.g. `"medical|wheelchair"`.  Empty → `NONE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = FeatureSet::NONE;
        for tag in s.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            let found = Self::NAMES
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(tag))
                .ok_or_else(|| CoreError::Parse(format!("unknown feature tag {tag:?}")))?;
            set.insert(found.1);
        }
        Ok(set)
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

// ── PriorityTier ──────────────────────────────────────────────────────────────

/// Service priority of a requester.
///
/// `Ord` follows processing order: `Medical < Vulnerable < Standard`, so a
/// plain ascending sort puts the most urgent tier first.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PriorityTier {
    Medical,
    Vulnerable,
    #[default]
    Standard,
}

impl PriorityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::Medical    => "medical",
            PriorityTier::Vulnerable => "vulnerable",
            PriorityTier::Standard   => "standard",
        }
    }

    /// The more urgent of two tiers.
    #[inline]
    pub fn most_urgent(self, other: PriorityTier) -> PriorityTier {
        self.min(other)
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medical"    => Ok(PriorityTier::Medical),
            "vulnerable" => Ok(PriorityTier::Vulnerable),
            "standard"   => Ok(PriorityTier::Standard),
            other => Err(CoreError::Parse(format!("unknown priority tier {other:?}"))),
        }
    }
}
