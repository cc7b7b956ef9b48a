//! Typed filter/action value model.
//!
//! Every match and action field carries one [`Value`]. The variant set is
//! closed: scalars with masks, byte buffers with masks, interface index or
//! index list with the resolved per-chip ports riding alongside, object
//! references with their per-chip handle tables, booleans, and the packet
//! disposition enum.
//!
//! Projection to a hardware record is per chip and three-way: a resolved
//! record, "not applicable on this chip" (legitimate for interface kinds
//! whose index does not map to the chip), or an internal error (an object
//! reference must always have a handle for every targeted chip).

use crate::error::{AclError, AclResult};
use crate::types::{ActionType, ChipSet, MatchType, PacketAction};
use acl_common::IfIndex;
use acl_ndi::{ChipId, ChipPort, NdiActionValue, NdiFilterValue, NdiObjId};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};

/// The value shape a field type expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// No payload (flag-style actions).
    None,
    U8,
    U16,
    U32,
    /// Fixed-width byte buffer with mask.
    Bytes(usize),
    /// Variable-width byte buffer (UDF extraction data, width set by the
    /// referenced UDF group).
    UdfBytes,
    PacketAction,
    IfIndex,
    IfIndexList,
    ObjRef,
    ObjRefList,
    Bool,
}

static MATCH_VALUE_KIND: Lazy<HashMap<MatchType, ValueKind>> = Lazy::new(|| {
    use MatchType::*;
    HashMap::from([
        (SrcIp, ValueKind::Bytes(4)),
        (DstIp, ValueKind::Bytes(4)),
        (SrcIpv6, ValueKind::Bytes(16)),
        (DstIpv6, ValueKind::Bytes(16)),
        (SrcMac, ValueKind::Bytes(6)),
        (DstMac, ValueKind::Bytes(6)),
        (EtherType, ValueKind::U16),
        (VlanId, ValueKind::U16),
        (IpProtocol, ValueKind::U8),
        (Dscp, ValueKind::U8),
        (Ecn, ValueKind::U8),
        (Ttl, ValueKind::U8),
        (TcpFlags, ValueKind::U8),
        (IcmpType, ValueKind::U8),
        (IcmpCode, ValueKind::U8),
        (L4SrcPort, ValueKind::U16),
        (L4DstPort, ValueKind::U16),
        (IpFrag, ValueKind::U8),
        (InPort, ValueKind::IfIndex),
        (InPorts, ValueKind::IfIndexList),
        (OutPort, ValueKind::IfIndex),
        (OutPorts, ValueKind::IfIndexList),
        (RangeCheck, ValueKind::ObjRefList),
        (Udf, ValueKind::UdfBytes),
    ])
});

static ACTION_VALUE_KIND: Lazy<HashMap<ActionType, ValueKind>> = Lazy::new(|| {
    use ActionType::*;
    HashMap::from([
        (PacketAction, ValueKind::PacketAction),
        (RedirectPort, ValueKind::IfIndex),
        (RedirectPortList, ValueKind::IfIndexList),
        (EgressMask, ValueKind::IfIndexList),
        (SetCounter, ValueKind::ObjRef),
        (SetPolicer, ValueKind::ObjRef),
        (SetTc, ValueKind::U8),
        (SetDscp, ValueKind::U8),
        (SetSrcMac, ValueKind::Bytes(6)),
        (SetDstMac, ValueKind::Bytes(6)),
        (SetInnerVlanId, ValueKind::U16),
        (SetOuterVlanId, ValueKind::U16),
        (SetCpuQueue, ValueKind::U32),
        (SetUserTrapId, ValueKind::ObjRef),
        (MirrorIngress, ValueKind::ObjRefList),
        (MirrorEgress, ValueKind::ObjRefList),
    ])
});

/// The value shape expected for a match field type.
pub fn match_value_kind(mt: MatchType) -> ValueKind {
    MATCH_VALUE_KIND[&mt]
}

/// The value shape expected for an action type.
pub fn action_value_kind(at: ActionType) -> ValueKind {
    ACTION_VALUE_KIND[&at]
}

/// Per-chip resolution of a single interface index: a physical chip
/// port, or the chip-local handle of a link aggregate. The aggregate
/// handle is stable while members come and go, so the hardware keeps
/// matching the aggregate without any repush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRef {
    Port(ChipPort),
    LinkAggregate(NdiObjId),
}

/// One typed field value.
///
/// Interface variants carry the resolved chip ports (or aggregate
/// handles) next to the configured index list; object-reference variants
/// carry the per-chip handle table. The resolved side is rebuilt by the
/// owning entry before every hardware push and is excluded from
/// equality.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    U8 {
        data: u8,
        mask: u8,
    },
    U16 {
        data: u16,
        mask: u16,
    },
    U32 {
        data: u32,
        mask: u32,
    },
    Bytes {
        data: Vec<u8>,
        mask: Vec<u8>,
    },
    PacketAction(PacketAction),
    IfIndex {
        ifindex: IfIndex,
        ports: BTreeMap<ChipId, PortRef>,
    },
    IfIndexList {
        ifindexes: Vec<IfIndex>,
        ports: BTreeMap<ChipId, Vec<ChipPort>>,
    },
    ObjRef {
        id: u64,
        handles: BTreeMap<ChipId, NdiObjId>,
    },
    ObjRefList {
        ids: Vec<u64>,
        handles: BTreeMap<ChipId, Vec<NdiObjId>>,
    },
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::U8 { .. } => ValueKind::U8,
            Value::U16 { .. } => ValueKind::U16,
            Value::U32 { .. } => ValueKind::U32,
            Value::Bytes { data, .. } => ValueKind::Bytes(data.len()),
            Value::PacketAction(_) => ValueKind::PacketAction,
            Value::IfIndex { .. } => ValueKind::IfIndex,
            Value::IfIndexList { .. } => ValueKind::IfIndexList,
            Value::ObjRef { .. } => ValueKind::ObjRef,
            Value::ObjRefList { .. } => ValueKind::ObjRefList,
            Value::Bool(_) => ValueKind::Bool,
        }
    }

    /// Checks this value against the shape a field type expects.
    pub fn check_kind(&self, expected: ValueKind, field: &str) -> AclResult<()> {
        let ok = match (expected, self) {
            (ValueKind::Bytes(width), Value::Bytes { data, mask }) => {
                if data.len() != width || mask.len() != width {
                    return Err(AclError::LengthMismatch(format!(
                        "{}: expected {} bytes, got {}",
                        field,
                        width,
                        data.len()
                    )));
                }
                true
            }
            (ValueKind::UdfBytes, Value::Bytes { data, mask }) => {
                if data.len() != mask.len() {
                    return Err(AclError::LengthMismatch(format!(
                        "{}: data is {} bytes but mask is {}",
                        field,
                        data.len(),
                        mask.len()
                    )));
                }
                true
            }
            _ => expected == self.kind(),
        };
        if ok {
            Ok(())
        } else {
            Err(AclError::invalid(format!(
                "{}: value kind {:?} does not fit field",
                field,
                self.kind()
            )))
        }
    }

    /// Interface indexes referenced by this value, in configured order.
    pub fn ifindexes(&self) -> &[IfIndex] {
        match self {
            Value::IfIndex { ifindex, .. } => std::slice::from_ref(ifindex),
            Value::IfIndexList { ifindexes, .. } => ifindexes,
            _ => &[],
        }
    }

    /// For interface kinds, the chips the resolved ports live on.
    /// `None` for every other kind.
    pub fn resolved_chips(&self) -> Option<ChipSet> {
        match self {
            Value::IfIndex { ports, .. } => Some(ports.keys().copied().collect()),
            Value::IfIndexList { ports, .. } => Some(ports.keys().copied().collect()),
            _ => None,
        }
    }

    /// Projects to a hardware filter record for one chip.
    ///
    /// `Ok(None)` means the value is legitimately absent on this chip and
    /// the field should be omitted from the chip's record.
    pub fn to_ndi_filter(&self, chip: ChipId) -> AclResult<Option<NdiFilterValue>> {
        let v = match self {
            Value::None => {
                return Err(AclError::internal("empty value in filter projection"));
            }
            Value::U8 { data, mask } => NdiFilterValue::U8 {
                data: *data,
                mask: *mask,
            },
            Value::U16 { data, mask } => NdiFilterValue::U16 {
                data: *data,
                mask: *mask,
            },
            Value::U32 { data, mask } => NdiFilterValue::U32 {
                data: *data,
                mask: *mask,
            },
            Value::Bytes { data, mask } => NdiFilterValue::Bytes {
                data: data.clone(),
                mask: mask.clone(),
            },
            Value::PacketAction(_) => {
                return Err(AclError::internal("packet action used as filter value"));
            }
            Value::IfIndex { ports, .. } => match ports.get(&chip) {
                Some(PortRef::Port(port)) => NdiFilterValue::Port(*port),
                Some(PortRef::LinkAggregate(handle)) => NdiFilterValue::ObjId(*handle),
                None => return Ok(None),
            },
            Value::IfIndexList { ports, .. } => match ports.get(&chip) {
                Some(list) => NdiFilterValue::PortList(list.clone()),
                None => return Ok(None),
            },
            Value::ObjRef { id, handles } => match handles.get(&chip) {
                Some(h) => NdiFilterValue::ObjId(*h),
                None => {
                    return Err(AclError::internal(format!(
                        "object reference {} has no handle on chip {}",
                        id, chip
                    )));
                }
            },
            Value::ObjRefList { ids, handles } => match handles.get(&chip) {
                Some(list) => NdiFilterValue::ObjIdList(list.clone()),
                None => {
                    return Err(AclError::internal(format!(
                        "object reference list {:?} has no handles on chip {}",
                        ids, chip
                    )));
                }
            },
            Value::Bool(b) => NdiFilterValue::Bool(*b),
        };
        Ok(Some(v))
    }

    /// Projects to a hardware action record for one chip.
    pub fn to_ndi_action(&self, chip: ChipId) -> AclResult<Option<NdiActionValue>> {
        let v = match self {
            Value::None => NdiActionValue::None,
            Value::U8 { data, .. } => NdiActionValue::U8(*data),
            Value::U16 { data, .. } => NdiActionValue::U16(*data),
            Value::U32 { data, .. } => NdiActionValue::U32(*data),
            Value::Bytes { data, .. } => {
                let mac: [u8; 6] = data.as_slice().try_into().map_err(|_| {
                    AclError::internal(format!("action byte value of width {}", data.len()))
                })?;
                NdiActionValue::Mac(mac)
            }
            Value::PacketAction(pa) => NdiActionValue::PacketAction(*pa),
            Value::IfIndex { ports, .. } => match ports.get(&chip) {
                Some(PortRef::Port(port)) => NdiActionValue::Port(*port),
                Some(PortRef::LinkAggregate(handle)) => NdiActionValue::ObjId(*handle),
                None => return Ok(None),
            },
            Value::IfIndexList { ports, .. } => match ports.get(&chip) {
                Some(list) => NdiActionValue::PortList(list.clone()),
                None => return Ok(None),
            },
            Value::ObjRef { id, handles } => match handles.get(&chip) {
                Some(h) => NdiActionValue::ObjId(*h),
                None => {
                    return Err(AclError::internal(format!(
                        "object reference {} has no handle on chip {}",
                        id, chip
                    )));
                }
            },
            Value::ObjRefList { ids, handles } => match handles.get(&chip) {
                Some(list) => NdiActionValue::ObjIdList(list.clone()),
                None => {
                    return Err(AclError::internal(format!(
                        "object reference list {:?} has no handles on chip {}",
                        ids, chip
                    )));
                }
            },
            Value::Bool(_) => {
                return Err(AclError::internal("boolean used as action value"));
            }
        };
        Ok(Some(v))
    }
}

/// Equality ignores the resolved side: interface kinds compare the index
/// list only, object references compare ids only.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::U8 { data: d1, mask: m1 }, Value::U8 { data: d2, mask: m2 }) => {
                d1 == d2 && m1 == m2
            }
            (Value::U16 { data: d1, mask: m1 }, Value::U16 { data: d2, mask: m2 }) => {
                d1 == d2 && m1 == m2
            }
            (Value::U32 { data: d1, mask: m1 }, Value::U32 { data: d2, mask: m2 }) => {
                d1 == d2 && m1 == m2
            }
            (Value::Bytes { data: d1, mask: m1 }, Value::Bytes { data: d2, mask: m2 }) => {
                d1 == d2 && m1 == m2
            }
            (Value::PacketAction(a), Value::PacketAction(b)) => a == b,
            (Value::IfIndex { ifindex: a, .. }, Value::IfIndex { ifindex: b, .. }) => a == b,
            (Value::IfIndexList { ifindexes: a, .. }, Value::IfIndexList { ifindexes: b, .. }) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort_unstable();
                b.sort_unstable();
                a == b
            }
            (Value::ObjRef { id: a, .. }, Value::ObjRef { id: b, .. }) => a == b,
            (Value::ObjRefList { ids: a, .. }, Value::ObjRefList { ids: b, .. }) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort_unstable();
                b.sort_unstable();
                a == b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_tables_cover_all_types() {
        assert_eq!(match_value_kind(MatchType::SrcIp), ValueKind::Bytes(4));
        assert_eq!(match_value_kind(MatchType::InPorts), ValueKind::IfIndexList);
        assert_eq!(
            action_value_kind(ActionType::SetCounter),
            ValueKind::ObjRef
        );
        assert_eq!(
            action_value_kind(ActionType::PacketAction),
            ValueKind::PacketAction
        );
    }

    #[test]
    fn test_check_kind_length_mismatch() {
        let v = Value::Bytes {
            data: vec![1, 2, 3],
            mask: vec![0xff, 0xff, 0xff],
        };
        assert!(matches!(
            v.check_kind(ValueKind::Bytes(4), "SRC_IP"),
            Err(AclError::LengthMismatch(_))
        ));
        assert!(v
            .check_kind(ValueKind::Bytes(3), "SRC_MAC_SHORT")
            .is_ok());
    }

    #[test]
    fn test_port_equality_ignores_resolution() {
        let a = Value::IfIndex {
            ifindex: IfIndex(9),
            ports: BTreeMap::new(),
        };
        let b = Value::IfIndex {
            ifindex: IfIndex(9),
            ports: BTreeMap::from([(ChipId(0), PortRef::Port(ChipPort(4)))]),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_port_list_equality_order_insensitive() {
        let a = Value::IfIndexList {
            ifindexes: vec![IfIndex(1), IfIndex(2)],
            ports: BTreeMap::new(),
        };
        let b = Value::IfIndexList {
            ifindexes: vec![IfIndex(2), IfIndex(1)],
            ports: BTreeMap::new(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_projection_port_absent_is_not_applicable() {
        let v = Value::IfIndex {
            ifindex: IfIndex(9),
            ports: BTreeMap::from([(ChipId(0), PortRef::Port(ChipPort(4)))]),
        };
        assert_eq!(
            v.to_ndi_filter(ChipId(0)).unwrap(),
            Some(NdiFilterValue::Port(ChipPort(4)))
        );
        assert_eq!(v.to_ndi_filter(ChipId(1)).unwrap(), None);
    }

    #[test]
    fn test_link_aggregate_projects_as_object_handle() {
        let v = Value::IfIndex {
            ifindex: IfIndex(20),
            ports: BTreeMap::from([(ChipId(0), PortRef::LinkAggregate(NdiObjId(0x50)))]),
        };
        assert_eq!(
            v.to_ndi_filter(ChipId(0)).unwrap(),
            Some(NdiFilterValue::ObjId(NdiObjId(0x50)))
        );
        assert_eq!(
            v.to_ndi_action(ChipId(0)).unwrap(),
            Some(NdiActionValue::ObjId(NdiObjId(0x50)))
        );
        assert_eq!(v.to_ndi_filter(ChipId(1)).unwrap(), None);
    }

    #[test]
    fn test_filter_projection_objref_absent_is_internal_error() {
        let v = Value::ObjRef {
            id: 3,
            handles: BTreeMap::new(),
        };
        assert!(matches!(
            v.to_ndi_filter(ChipId(0)),
            Err(AclError::Internal(_))
        ));
    }

    #[test]
    fn test_action_projection_scalar_drops_mask() {
        let v = Value::U8 { data: 5, mask: 0 };
        assert_eq!(
            v.to_ndi_action(ChipId(0)).unwrap(),
            Some(NdiActionValue::U8(5))
        );
    }

    #[test]
    fn test_resolved_chips() {
        let v = Value::IfIndexList {
            ifindexes: vec![IfIndex(1)],
            ports: BTreeMap::from([(ChipId(2), vec![ChipPort(5)])]),
        };
        let chips = v.resolved_chips().unwrap();
        assert!(chips.contains(&ChipId(2)));
        assert_eq!(chips.len(), 1);

        let scalar = Value::U8 { data: 1, mask: 1 };
        assert!(scalar.resolved_chips().is_none());
    }
}
