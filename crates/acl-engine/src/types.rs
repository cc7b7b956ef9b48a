//! Control-plane identifier types, chip sets, and id-space limits.

use acl_ndi::ChipId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use acl_ndi::{AclStage, ActionType, MatchType, PacketAction, RangeKind, UdfBase};

/// Id-space bounds per object class.
pub const MAX_TABLE_ID: u64 = 500;
pub const MAX_ENTRY_ID: u64 = 65536;
pub const MAX_COUNTER_ID: u64 = 65536;
pub const MAX_RANGE_ID: u64 = 65536;
pub const MAX_UDF_GROUP_ID: u64 = 16;
pub const MAX_UDF_MATCH_ID: u64 = 1024;
pub const MAX_UDF_ID: u64 = 1024;
pub const MAX_TRAP_GROUP_ID: u64 = 256;
pub const MAX_TRAP_ID: u64 = 256;

macro_rules! control_plane_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
            Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

control_plane_id!(
    /// Control-plane id of an ACL table, unique per switch.
    TableId
);
control_plane_id!(
    /// Control-plane id of an entry, unique per table.
    EntryId
);
control_plane_id!(
    /// Control-plane id of a counter, unique per table.
    CounterId
);
control_plane_id!(
    /// Control-plane id of a range object, unique per switch.
    RangeId
);
control_plane_id!(
    /// Control-plane id of a UDF group, unique per switch.
    UdfGroupId
);
control_plane_id!(
    /// Control-plane id of a UDF match, unique per switch.
    UdfMatchId
);
control_plane_id!(
    /// Control-plane id of a UDF object, unique per switch.
    UdfId
);
control_plane_id!(
    /// Control-plane id of a trap group, unique per switch.
    TrapGroupId
);
control_plane_id!(
    /// Control-plane id of a user-defined trap, unique per switch.
    TrapId
);

/// Device-level switch identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct SwitchId(pub u32);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered set of chips. Fan-out across chips always walks this set in
/// ascending chip order so failure/rollback positions are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChipSet {
    chips: BTreeSet<ChipId>,
}

impl ChipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chip: ChipId) -> bool {
        self.chips.insert(chip)
    }

    pub fn remove(&mut self, chip: &ChipId) -> bool {
        self.chips.remove(chip)
    }

    pub fn contains(&self, chip: &ChipId) -> bool {
        self.chips.contains(chip)
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChipId> + '_ {
        self.chips.iter().copied()
    }

    /// True if every chip in `self` is also in `other`.
    pub fn is_subset(&self, other: &ChipSet) -> bool {
        self.chips.is_subset(&other.chips)
    }

    /// Chips present in both sets.
    pub fn intersection(&self, other: &ChipSet) -> ChipSet {
        ChipSet {
            chips: self.chips.intersection(&other.chips).copied().collect(),
        }
    }
}

impl FromIterator<ChipId> for ChipSet {
    fn from_iter<I: IntoIterator<Item = ChipId>>(iter: I) -> Self {
        ChipSet {
            chips: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ChipSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, chip) in self.chips.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", chip)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_set_ordered_iteration() {
        let set: ChipSet = [ChipId(2), ChipId(0), ChipId(1)].into_iter().collect();
        let order: Vec<u32> = set.iter().map(|c| c.0).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_chip_set_subset() {
        let small: ChipSet = [ChipId(1)].into_iter().collect();
        let big: ChipSet = [ChipId(0), ChipId(1)].into_iter().collect();
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
    }

    #[test]
    fn test_chip_set_intersection() {
        let a: ChipSet = [ChipId(0), ChipId(1)].into_iter().collect();
        let b: ChipSet = [ChipId(1), ChipId(2)].into_iter().collect();
        assert_eq!(a.intersection(&b), [ChipId(1)].into_iter().collect());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(TableId(7).to_string(), "7");
        assert_eq!(SwitchId(0).to_string(), "0");
    }
}
