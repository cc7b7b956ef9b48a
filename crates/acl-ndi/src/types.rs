//! Shared ACL vocabulary and NDI record types.
//!
//! The match/action/stage enums here are the common vocabulary between the
//! control plane and the hardware layer, the way a generated yang-model
//! header would be shared in C. The `Ndi*` structs are the fully-resolved
//! per-chip records handed to the hardware layer: every interface index has
//! already been mapped to a chip-local port and every object reference to a
//! chip-local handle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chip (forwarding pipeline instance) identifier within a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChipId(pub u32);

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chip-local port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChipPort(pub u32);

impl fmt::Display for ChipPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-chip object handle returned by the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NdiObjId(pub u64);

impl NdiObjId {
    /// The null handle.
    pub const NULL: Self = NdiObjId(0);

    /// Returns true if this is the null handle.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NdiObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// ACL pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AclStage {
    /// Ingress ACL (applied to incoming packets).
    #[default]
    Ingress,
    /// Egress ACL (applied to outgoing packets).
    Egress,
}

impl fmt::Display for AclStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "INGRESS"),
            Self::Egress => write!(f, "EGRESS"),
        }
    }
}

impl FromStr for AclStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INGRESS" => Ok(Self::Ingress),
            "EGRESS" => Ok(Self::Egress),
            _ => Err(format!("Unknown ACL stage: {}", s)),
        }
    }
}

/// ACL match field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchType {
    SrcIp,
    DstIp,
    SrcIpv6,
    DstIpv6,
    SrcMac,
    DstMac,
    EtherType,
    VlanId,
    IpProtocol,
    Dscp,
    Ecn,
    Ttl,
    TcpFlags,
    IcmpType,
    IcmpCode,
    L4SrcPort,
    L4DstPort,
    IpFrag,
    // Interface fields (chip-specific)
    InPort,
    InPorts,
    OutPort,
    OutPorts,
    // Shared-object references
    RangeCheck,
    Udf,
}

impl MatchType {
    /// True for field types whose value is a single interface or an
    /// interface list, constraining the entry to the chips those
    /// interfaces live on.
    pub fn is_chip_specific(&self) -> bool {
        matches!(
            self,
            Self::InPort | Self::InPorts | Self::OutPort | Self::OutPorts
        )
    }

    /// True for the single-interface variants of the chip-specific fields.
    pub fn is_single_port(&self) -> bool {
        matches!(self, Self::InPort | Self::OutPort)
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SrcIp => "SRC_IP",
            Self::DstIp => "DST_IP",
            Self::SrcIpv6 => "SRC_IPV6",
            Self::DstIpv6 => "DST_IPV6",
            Self::SrcMac => "SRC_MAC",
            Self::DstMac => "DST_MAC",
            Self::EtherType => "ETHER_TYPE",
            Self::VlanId => "VLAN_ID",
            Self::IpProtocol => "IP_PROTOCOL",
            Self::Dscp => "DSCP",
            Self::Ecn => "ECN",
            Self::Ttl => "TTL",
            Self::TcpFlags => "TCP_FLAGS",
            Self::IcmpType => "ICMP_TYPE",
            Self::IcmpCode => "ICMP_CODE",
            Self::L4SrcPort => "L4_SRC_PORT",
            Self::L4DstPort => "L4_DST_PORT",
            Self::IpFrag => "IP_FRAG",
            Self::InPort => "IN_PORT",
            Self::InPorts => "IN_PORTS",
            Self::OutPort => "OUT_PORT",
            Self::OutPorts => "OUT_PORTS",
            Self::RangeCheck => "RANGE_CHECK",
            Self::Udf => "UDF",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SRC_IP" => Ok(Self::SrcIp),
            "DST_IP" => Ok(Self::DstIp),
            "SRC_IPV6" => Ok(Self::SrcIpv6),
            "DST_IPV6" => Ok(Self::DstIpv6),
            "SRC_MAC" => Ok(Self::SrcMac),
            "DST_MAC" => Ok(Self::DstMac),
            "ETHER_TYPE" => Ok(Self::EtherType),
            "VLAN_ID" => Ok(Self::VlanId),
            "IP_PROTOCOL" => Ok(Self::IpProtocol),
            "DSCP" => Ok(Self::Dscp),
            "ECN" => Ok(Self::Ecn),
            "TTL" => Ok(Self::Ttl),
            "TCP_FLAGS" => Ok(Self::TcpFlags),
            "ICMP_TYPE" => Ok(Self::IcmpType),
            "ICMP_CODE" => Ok(Self::IcmpCode),
            "L4_SRC_PORT" => Ok(Self::L4SrcPort),
            "L4_DST_PORT" => Ok(Self::L4DstPort),
            "IP_FRAG" => Ok(Self::IpFrag),
            "IN_PORT" => Ok(Self::InPort),
            "IN_PORTS" => Ok(Self::InPorts),
            "OUT_PORT" => Ok(Self::OutPort),
            "OUT_PORTS" => Ok(Self::OutPorts),
            "RANGE_CHECK" => Ok(Self::RangeCheck),
            "UDF" => Ok(Self::Udf),
            _ => Err(format!("Unknown ACL match type: {}", s)),
        }
    }
}

/// ACL action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    PacketAction,
    RedirectPort,
    RedirectPortList,
    EgressMask,
    SetCounter,
    SetPolicer,
    SetTc,
    SetDscp,
    SetSrcMac,
    SetDstMac,
    SetInnerVlanId,
    SetOuterVlanId,
    SetCpuQueue,
    SetUserTrapId,
    MirrorIngress,
    MirrorEgress,
}

impl ActionType {
    /// True for action types whose value is an interface or interface
    /// list, constraining the action to the chips those interfaces live on.
    pub fn is_chip_specific(&self) -> bool {
        matches!(
            self,
            Self::RedirectPort | Self::RedirectPortList | Self::EgressMask
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PacketAction => "PACKET_ACTION",
            Self::RedirectPort => "REDIRECT_PORT",
            Self::RedirectPortList => "REDIRECT_PORT_LIST",
            Self::EgressMask => "EGRESS_MASK",
            Self::SetCounter => "SET_COUNTER",
            Self::SetPolicer => "SET_POLICER",
            Self::SetTc => "SET_TC",
            Self::SetDscp => "SET_DSCP",
            Self::SetSrcMac => "SET_SRC_MAC",
            Self::SetDstMac => "SET_DST_MAC",
            Self::SetInnerVlanId => "SET_INNER_VLAN_ID",
            Self::SetOuterVlanId => "SET_OUTER_VLAN_ID",
            Self::SetCpuQueue => "SET_CPU_QUEUE",
            Self::SetUserTrapId => "SET_USER_TRAP_ID",
            Self::MirrorIngress => "MIRROR_INGRESS",
            Self::MirrorEgress => "MIRROR_EGRESS",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PACKET_ACTION" => Ok(Self::PacketAction),
            "REDIRECT_PORT" => Ok(Self::RedirectPort),
            "REDIRECT_PORT_LIST" => Ok(Self::RedirectPortList),
            "EGRESS_MASK" => Ok(Self::EgressMask),
            "SET_COUNTER" => Ok(Self::SetCounter),
            "SET_POLICER" => Ok(Self::SetPolicer),
            "SET_TC" => Ok(Self::SetTc),
            "SET_DSCP" => Ok(Self::SetDscp),
            "SET_SRC_MAC" => Ok(Self::SetSrcMac),
            "SET_DST_MAC" => Ok(Self::SetDstMac),
            "SET_INNER_VLAN_ID" => Ok(Self::SetInnerVlanId),
            "SET_OUTER_VLAN_ID" => Ok(Self::SetOuterVlanId),
            "SET_CPU_QUEUE" => Ok(Self::SetCpuQueue),
            "SET_USER_TRAP_ID" => Ok(Self::SetUserTrapId),
            "MIRROR_INGRESS" => Ok(Self::MirrorIngress),
            "MIRROR_EGRESS" => Ok(Self::MirrorEgress),
            _ => Err(format!("Unknown ACL action type: {}", s)),
        }
    }
}

/// Packet disposition for the PACKET_ACTION action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PacketAction {
    #[default]
    Forward,
    Drop,
    CopyToCpu,
    CopyToCpuCancel,
    TrapToCpu,
    CopyToCpuAndForward,
}

impl fmt::Display for PacketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Forward => "FORWARD",
            Self::Drop => "DROP",
            Self::CopyToCpu => "COPY_TO_CPU",
            Self::CopyToCpuCancel => "COPY_TO_CPU_CANCEL",
            Self::TrapToCpu => "TRAP_TO_CPU",
            Self::CopyToCpuAndForward => "COPY_TO_CPU_AND_FORWARD",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PacketAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FORWARD" => Ok(Self::Forward),
            "DROP" => Ok(Self::Drop),
            "COPY_TO_CPU" => Ok(Self::CopyToCpu),
            "COPY_TO_CPU_CANCEL" => Ok(Self::CopyToCpuCancel),
            "TRAP_TO_CPU" => Ok(Self::TrapToCpu),
            "COPY_TO_CPU_AND_FORWARD" => Ok(Self::CopyToCpuAndForward),
            _ => Err(format!("Unknown packet action: {}", s)),
        }
    }
}

/// Numeric field a range object applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeKind {
    L4SrcPort,
    L4DstPort,
    OuterVlan,
    PacketLength,
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::L4SrcPort => "L4_SRC_PORT",
            Self::L4DstPort => "L4_DST_PORT",
            Self::OuterVlan => "OUTER_VLAN",
            Self::PacketLength => "PACKET_LENGTH",
        };
        write!(f, "{}", s)
    }
}

// ---------------------------------------------------------------------------
// Fully-resolved per-chip records
// ---------------------------------------------------------------------------

/// A match-field value resolved for one chip.
#[derive(Debug, Clone, PartialEq)]
pub enum NdiFilterValue {
    U8 { data: u8, mask: u8 },
    U16 { data: u16, mask: u16 },
    U32 { data: u32, mask: u32 },
    Bytes { data: Vec<u8>, mask: Vec<u8> },
    Port(ChipPort),
    PortList(Vec<ChipPort>),
    ObjId(NdiObjId),
    ObjIdList(Vec<NdiObjId>),
    Bool(bool),
}

/// One match field in a hardware entry record.
#[derive(Debug, Clone, PartialEq)]
pub struct NdiFilter {
    pub match_type: MatchType,
    pub value: NdiFilterValue,
}

/// An action value resolved for one chip.
#[derive(Debug, Clone, PartialEq)]
pub enum NdiActionValue {
    None,
    PacketAction(PacketAction),
    U8(u8),
    U16(u16),
    U32(u32),
    Mac([u8; 6]),
    Port(ChipPort),
    PortList(Vec<ChipPort>),
    ObjId(NdiObjId),
    ObjIdList(Vec<NdiObjId>),
}

/// One action field in a hardware entry record.
#[derive(Debug, Clone, PartialEq)]
pub struct NdiAction {
    pub action_type: ActionType,
    pub value: NdiActionValue,
}

/// Full entry-create record for one chip.
#[derive(Debug, Clone, PartialEq)]
pub struct NdiEntry {
    /// Per-chip handle of the owning table.
    pub table_id: NdiObjId,
    pub priority: u32,
    pub filters: Vec<NdiFilter>,
    pub actions: Vec<NdiAction>,
}

/// Table-create record for one chip.
#[derive(Debug, Clone)]
pub struct NdiTableSpec {
    pub stage: AclStage,
    pub priority: u32,
    /// Requested capacity; None lets the hardware size the table.
    pub size: Option<u32>,
    pub allowed_matches: Vec<MatchType>,
    /// Per-chip handles of referenced UDF groups.
    pub udf_groups: Vec<NdiObjId>,
}

/// Counter-create record for one chip.
#[derive(Debug, Clone)]
pub struct NdiCounterSpec {
    /// Per-chip handle of the owning table.
    pub table_id: NdiObjId,
    pub enable_pkt_count: bool,
    pub enable_byte_count: bool,
}

/// Counter readout from one chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterStats {
    pub pkt_count: u64,
    pub byte_count: u64,
}

/// Range-create record for one chip.
#[derive(Debug, Clone)]
pub struct NdiRangeSpec {
    pub kind: RangeKind,
    pub min: u32,
    pub max: u32,
}

/// UDF group create record.
#[derive(Debug, Clone)]
pub struct NdiUdfGroupSpec {
    /// True for groups feeding the hash computation rather than generic
    /// match extraction.
    pub is_hash: bool,
    /// Extracted field length in bytes.
    pub length: u8,
}

/// UDF match create record.
#[derive(Debug, Clone)]
pub struct NdiUdfMatchSpec {
    pub priority: u8,
    pub ethertype: Option<(u16, u16)>,
    pub ip_protocol: Option<(u8, u8)>,
    pub gre_tunnel: bool,
}

/// Header base a UDF extraction offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UdfBase {
    L2,
    L3,
    L4,
}

/// UDF create record.
#[derive(Debug, Clone)]
pub struct NdiUdfSpec {
    pub group_id: NdiObjId,
    pub match_id: NdiObjId,
    pub base: UdfBase,
    pub offset: u32,
    pub hash_mask: Vec<u8>,
}

/// Trap-group create record.
#[derive(Debug, Clone)]
pub struct NdiTrapGroupSpec {
    pub cpu_queue: u32,
    pub admin_state: bool,
}

/// User-defined trap create record.
#[derive(Debug, Clone)]
pub struct NdiTrapSpec {
    pub trap_group: Option<NdiObjId>,
    pub priority: u32,
}

/// Occupancy snapshot for one table on one chip.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableUsage {
    pub used_entries: u32,
    pub free_entries: u32,
}

/// Capacity of one chip-level ACL pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolCapacity {
    pub pool_id: NdiObjId,
    pub stage: AclStage,
    pub total_entries: u32,
    pub used_entries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parse() {
        assert_eq!("INGRESS".parse::<AclStage>().unwrap(), AclStage::Ingress);
        assert_eq!("egress".parse::<AclStage>().unwrap(), AclStage::Egress);
        assert!("INVALID".parse::<AclStage>().is_err());
    }

    #[test]
    fn test_match_type_parse_display() {
        assert_eq!("SRC_IP".parse::<MatchType>().unwrap(), MatchType::SrcIp);
        assert_eq!(MatchType::InPorts.to_string(), "IN_PORTS");
        assert!("BOGUS".parse::<MatchType>().is_err());
    }

    #[test]
    fn test_match_type_chip_specific() {
        assert!(MatchType::InPort.is_chip_specific());
        assert!(MatchType::OutPorts.is_chip_specific());
        assert!(!MatchType::SrcIp.is_chip_specific());
        assert!(MatchType::InPort.is_single_port());
        assert!(!MatchType::InPorts.is_single_port());
    }

    #[test]
    fn test_action_type_chip_specific() {
        assert!(ActionType::RedirectPort.is_chip_specific());
        assert!(ActionType::EgressMask.is_chip_specific());
        assert!(!ActionType::SetCounter.is_chip_specific());
    }

    #[test]
    fn test_packet_action_parse() {
        assert_eq!("DROP".parse::<PacketAction>().unwrap(), PacketAction::Drop);
        assert_eq!(
            "TRAP_TO_CPU".parse::<PacketAction>().unwrap(),
            PacketAction::TrapToCpu
        );
    }

    #[test]
    fn test_ndi_obj_id() {
        assert!(NdiObjId::NULL.is_null());
        assert!(!NdiObjId(0x1234).is_null());
        assert_eq!(NdiObjId(0x1234).to_string(), "0x1234");
    }
}
