//! Interface-to-chip-port mapping.
//!
//! Control-plane objects are written against OS interface indexes; the
//! hardware wants chip-local ports. The mapper owns that translation and
//! reports remap events when an interface moves between chip ports, so
//! the ACL layer can repush affected entries.

use acl_ndi::{ChipId, ChipPort, NdiObjId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// OS interface index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IfIndex(pub u32);

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Error type for interface mapping lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntfError {
    #[error("Unknown interface {0}")]
    UnknownInterface(IfIndex),

    #[error("Interface {0} is not a link aggregate")]
    NotLinkAggregate(IfIndex),

    #[error("Interface {0} is not mapped to any chip port")]
    NotMapped(IfIndex),

    #[error("No interface at chip {0} port {1}")]
    NoInterfaceAtPort(ChipId, ChipPort),
}

/// Resolves interface indexes to chip-local ports.
pub trait IntfMapper: Send + Sync {
    /// Maps a physical interface to its chip and chip-local port.
    fn to_chip_port(&self, ifindex: IfIndex) -> Result<(ChipId, ChipPort), IntfError>;

    /// Reverse lookup from a chip-local port to its interface.
    fn from_chip_port(&self, chip: ChipId, port: ChipPort) -> Result<IfIndex, IntfError>;

    /// Returns true if the interface is a link aggregate rather than a
    /// physical port.
    fn is_link_aggregate(&self, ifindex: IfIndex) -> bool;

    /// Per-chip hardware handles of a link aggregate. The handle is
    /// stable across membership changes; the chips follow member
    /// placement.
    fn link_aggregate_handles(
        &self,
        ifindex: IfIndex,
    ) -> Result<BTreeMap<ChipId, NdiObjId>, IntfError>;
}

/// Direction of an interface remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingChange {
    /// Interface gained the chip-port mapping.
    Added,
    /// Interface lost the chip-port mapping.
    Removed,
}

/// One interface remap notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEvent {
    pub ifindex: IfIndex,
    pub chip: ChipId,
    pub port: ChipPort,
    pub change: MappingChange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifindex_display() {
        assert_eq!(IfIndex(17).to_string(), "if17");
    }

    #[test]
    fn test_intf_error_display() {
        let err = IntfError::UnknownInterface(IfIndex(5));
        assert_eq!(err.to_string(), "Unknown interface if5");
    }
}
