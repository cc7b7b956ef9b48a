//! One action field of an entry.

use crate::error::{AclError, AclResult};
use crate::filter::resolve_value_ports;
use crate::types::{ActionType, CounterId, TrapId};
use crate::value::{action_value_kind, Value};
use acl_common::{IfIndex, IntfMapper};
use acl_ndi::{ChipId, NdiAction};

/// One typed action field.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    action_type: ActionType,
    value: Value,
}

impl Action {
    /// Builds an action, validating the value against the shape the action
    /// type expects.
    pub fn new(action_type: ActionType, value: Value) -> AclResult<Self> {
        value.check_kind(action_value_kind(action_type), &action_type.to_string())?;
        Ok(Self { action_type, value })
    }

    /// Convenience constructor for SET_COUNTER.
    pub fn set_counter(counter_id: CounterId) -> Self {
        Self {
            action_type: ActionType::SetCounter,
            value: Value::ObjRef {
                id: counter_id.raw(),
                handles: Default::default(),
            },
        }
    }

    /// Convenience constructor for SET_USER_TRAP_ID.
    pub fn set_user_trap(trap_id: TrapId) -> Self {
        Self {
            action_type: ActionType::SetUserTrapId,
            value: Value::ObjRef {
                id: trap_id.raw(),
                handles: Default::default(),
            },
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// The referenced counter id, for SET_COUNTER actions.
    pub fn counter_id(&self) -> Option<CounterId> {
        match (&self.action_type, &self.value) {
            (ActionType::SetCounter, Value::ObjRef { id, .. }) => Some(CounterId(*id)),
            _ => None,
        }
    }

    /// The referenced trap id, for SET_USER_TRAP_ID actions.
    pub fn trap_id(&self) -> Option<TrapId> {
        match (&self.action_type, &self.value) {
            (ActionType::SetUserTrapId, Value::ObjRef { id, .. }) => Some(TrapId(*id)),
            _ => None,
        }
    }

    /// True for interface-valued action types (redirect, egress mask).
    pub fn is_chip_specific(&self) -> bool {
        self.action_type.is_chip_specific()
    }

    /// Interface indexes this action references.
    pub fn ifindexes(&self) -> &[IfIndex] {
        self.value.ifindexes()
    }

    /// False only for interface kinds with no resolved port on this chip.
    pub fn is_eligible(&self, chip: ChipId) -> bool {
        match self.value.resolved_chips() {
            Some(chips) => chips.contains(&chip),
            None => true,
        }
    }

    /// Projects to the hardware record for one chip; `Ok(None)` omits the
    /// action from that chip.
    pub fn copy_to_ndi(&self, chip: ChipId) -> AclResult<Option<NdiAction>> {
        if !self.is_eligible(chip) {
            return Ok(None);
        }
        match self.value.to_ndi_action(chip)? {
            Some(value) => Ok(Some(NdiAction {
                action_type: self.action_type,
                value,
            })),
            None => Ok(None),
        }
    }

    /// Re-resolves interface indexes to chip ports.
    pub fn resolve_ports(&mut self, mapper: &dyn IntfMapper) -> AclResult<()> {
        resolve_value_ports(&mut self.value, mapper)
    }

    /// Installs the per-chip handle table of an object-reference value.
    pub fn set_obj_handles(
        &mut self,
        handles: std::collections::BTreeMap<ChipId, acl_ndi::NdiObjId>,
    ) -> AclResult<()> {
        match &mut self.value {
            Value::ObjRef { handles: h, .. } => {
                *h = handles;
                Ok(())
            }
            _ => Err(AclError::internal(format!(
                "{} does not carry an object reference",
                self.action_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacketAction;
    use acl_ndi::{NdiActionValue, NdiObjId};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_new_validates_kind() {
        let ok = Action::new(
            ActionType::PacketAction,
            Value::PacketAction(PacketAction::Drop),
        );
        assert!(ok.is_ok());
        let wrong = Action::new(ActionType::PacketAction, Value::U8 { data: 1, mask: 0 });
        assert!(wrong.is_err());
    }

    #[test]
    fn test_counter_id_accessor() {
        let a = Action::set_counter(CounterId(42));
        assert_eq!(a.counter_id(), Some(CounterId(42)));
        assert_eq!(a.trap_id(), None);
    }

    #[test]
    fn test_objref_projection_uses_handles() {
        let mut a = Action::set_counter(CounterId(42));
        a.set_obj_handles(BTreeMap::from([(ChipId(0), NdiObjId(0x99))]))
            .unwrap();
        let ndi = a.copy_to_ndi(ChipId(0)).unwrap().unwrap();
        assert_eq!(ndi.value, NdiActionValue::ObjId(NdiObjId(0x99)));
        // unresolved chip is an invariant violation
        assert!(a.copy_to_ndi(ChipId(1)).is_err());
    }

    #[test]
    fn test_redirect_eligibility() {
        let a = Action::new(
            ActionType::RedirectPort,
            Value::IfIndex {
                ifindex: IfIndex(3),
                ports: BTreeMap::from([(ChipId(2), crate::value::PortRef::Port(acl_ndi::ChipPort(11)))]),
            },
        )
        .unwrap();
        assert!(a.is_chip_specific());
        assert!(a.is_eligible(ChipId(2)));
        assert!(!a.is_eligible(ChipId(0)));
        assert!(a.copy_to_ndi(ChipId(0)).unwrap().is_none());
    }
}
