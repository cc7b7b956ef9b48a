//! One match field of an entry.

use crate::error::{AclError, AclResult};
use crate::types::{ChipSet, MatchType, UdfGroupId};
use crate::value::{match_value_kind, PortRef, Value};
use acl_common::{IfIndex, IntfMapper};
use acl_ndi::{ChipId, NdiFilter};
use std::fmt;

/// Key of a filter within an entry.
///
/// Non-UDF match types appear at most once, so the group id stays zero.
/// UDF matches share one match type and are told apart by the UDF group
/// they extract through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterKey {
    pub match_type: MatchType,
    pub udf_group_id: UdfGroupId,
}

impl FilterKey {
    pub fn simple(match_type: MatchType) -> Self {
        Self {
            match_type,
            udf_group_id: UdfGroupId(0),
        }
    }

    pub fn udf(udf_group_id: UdfGroupId) -> Self {
        Self {
            match_type: MatchType::Udf,
            udf_group_id,
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.match_type == MatchType::Udf {
            write!(f, "{}(group {})", self.match_type, self.udf_group_id)
        } else {
            write!(f, "{}", self.match_type)
        }
    }
}

/// One typed match field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    key: FilterKey,
    value: Value,
}

impl Filter {
    /// Builds a non-UDF filter, validating the value against the shape the
    /// match type expects.
    pub fn new(match_type: MatchType, value: Value) -> AclResult<Self> {
        if match_type == MatchType::Udf {
            return Err(AclError::invalid(
                "UDF filter requires a UDF group id".to_string(),
            ));
        }
        let key = FilterKey::simple(match_type);
        value.check_kind(match_value_kind(match_type), &key.to_string())?;
        Ok(Self { key, value })
    }

    /// Builds a UDF filter bound to a group.
    pub fn new_udf(udf_group_id: UdfGroupId, value: Value) -> AclResult<Self> {
        let key = FilterKey::udf(udf_group_id);
        value.check_kind(match_value_kind(MatchType::Udf), &key.to_string())?;
        Ok(Self { key, value })
    }

    pub fn key(&self) -> FilterKey {
        self.key
    }

    pub fn match_type(&self) -> MatchType {
        self.key.match_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// True for interface-valued match types, which narrow the chips the
    /// owning entry installs on.
    pub fn is_chip_specific(&self) -> bool {
        self.key.match_type.is_chip_specific()
    }

    /// Interface indexes this filter references, in configured order.
    pub fn ifindexes(&self) -> &[IfIndex] {
        self.value.ifindexes()
    }

    /// For chip-specific filters, the chips the resolved ports require.
    pub fn required_chips(&self) -> Option<ChipSet> {
        if self.is_chip_specific() {
            self.value.resolved_chips()
        } else {
            None
        }
    }

    /// False only for interface kinds whose index resolves to nothing on
    /// this chip; every other kind installs everywhere.
    pub fn is_eligible(&self, chip: ChipId) -> bool {
        match self.value.resolved_chips() {
            Some(chips) => chips.contains(&chip),
            None => true,
        }
    }

    /// Projects to the hardware record for one chip; `Ok(None)` omits the
    /// field from that chip.
    pub fn copy_to_ndi(&self, chip: ChipId) -> AclResult<Option<NdiFilter>> {
        Ok(self.value.to_ndi_filter(chip)?.map(|value| NdiFilter {
            match_type: self.key.match_type,
            value,
        }))
    }

    /// Re-resolves interface indexes to chip ports. A link aggregate
    /// resolves to its per-chip aggregate handle, so the hardware match
    /// tracks membership changes on its own.
    pub fn resolve_ports(&mut self, mapper: &dyn IntfMapper) -> AclResult<()> {
        resolve_value_ports(&mut self.value, mapper)
    }
}

/// Rebuilds the per-chip resolution tables of an interface-valued
/// [`Value`] from the mapper's current state.
pub(crate) fn resolve_value_ports(value: &mut Value, mapper: &dyn IntfMapper) -> AclResult<()> {
    match value {
        Value::IfIndex { ifindex, ports } => {
            ports.clear();
            if mapper.is_link_aggregate(*ifindex) {
                for (chip, handle) in mapper.link_aggregate_handles(*ifindex)? {
                    ports.insert(chip, PortRef::LinkAggregate(handle));
                }
            } else {
                let (chip, port) = mapper.to_chip_port(*ifindex)?;
                ports.insert(chip, PortRef::Port(port));
            }
        }
        Value::IfIndexList { ifindexes, ports } => {
            ports.clear();
            for ifindex in ifindexes.iter() {
                if mapper.is_link_aggregate(*ifindex) {
                    return Err(AclError::Unsupported(format!(
                        "link aggregate {} in an interface list",
                        ifindex
                    )));
                }
                let (chip, port) = mapper.to_chip_port(*ifindex)?;
                ports.entry(chip).or_default().push(port);
            }
        }
        _ => {}
    }
    Ok(())
}
