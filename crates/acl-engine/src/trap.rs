//! CPU trap and trap-group objects.
//!
//! A user-defined trap gives SET_USER_TRAP_ID actions a hardware target;
//! a trap group bundles traps onto a CPU queue. Groups are referenced by
//! traps, traps by entries.

use crate::error::{AclError, AclResult};
use crate::types::{ChipSet, TrapGroupId, TrapId};
use acl_common::RefCounted;
use acl_ndi::{AclNdi, ChipId, NdiObjId, NdiTrapGroupSpec, NdiTrapSpec};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration half of a trap group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapGroupSpec {
    pub cpu_queue: u32,
    #[serde(default = "default_admin_state")]
    pub admin_state: bool,
}

fn default_admin_state() -> bool {
    true
}

/// Configuration half of a user-defined trap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapSpec {
    #[serde(default)]
    pub group_id: Option<TrapGroupId>,
    #[serde(default)]
    pub priority: u32,
}

/// One installed trap group.
#[derive(Debug, Clone)]
pub struct TrapGroup {
    group_id: TrapGroupId,
    cpu_queue: u32,
    admin_state: bool,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl TrapGroup {
    pub fn new(group_id: TrapGroupId, spec: &TrapGroupSpec, chips: ChipSet) -> Self {
        Self {
            group_id,
            cpu_queue: spec.cpu_queue,
            admin_state: spec.admin_state,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        }
    }

    pub fn group_id(&self) -> TrapGroupId {
        self.group_id
    }

    pub fn cpu_queue(&self) -> u32 {
        self.cpu_queue
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    pub fn create_in_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        let spec = NdiTrapGroupSpec {
            cpu_queue: self.cpu_queue,
            admin_state: self.admin_state,
        };
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            match ndi.create_trap_group(chip, &spec) {
                Ok(handle) => {
                    debug!(
                        "Created trap group {} on chip {} handle {}",
                        self.group_id, chip, handle
                    );
                    created.push((chip, handle));
                }
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_trap_group(chip, handle) {
                            error!(
                                "Rollback of trap group {} on chip {} failed: {}",
                                self.group_id, chip, undo_err
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        self.ndi_handles = created.into_iter().collect();
        Ok(())
    }

    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_trap_group(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }

    /// Moves the group to a different CPU queue on every chip.
    pub fn set_cpu_queue(&mut self, ndi: &dyn AclNdi, queue: u32) -> AclResult<()> {
        for (&chip, &handle) in &self.ndi_handles {
            ndi.set_trap_group_queue(chip, handle, queue)?;
        }
        self.cpu_queue = queue;
        Ok(())
    }
}

impl RefCounted for TrapGroup {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        if self.ref_count == 0 {
            None
        } else {
            self.ref_count -= 1;
            Some(self.ref_count)
        }
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// One installed user-defined trap.
#[derive(Debug, Clone)]
pub struct Trap {
    trap_id: TrapId,
    group_id: Option<TrapGroupId>,
    priority: u32,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl Trap {
    pub fn new(trap_id: TrapId, spec: &TrapSpec, chips: ChipSet) -> Self {
        Self {
            trap_id,
            group_id: spec.group_id,
            priority: spec.priority,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        }
    }

    pub fn trap_id(&self) -> TrapId {
        self.trap_id
    }

    pub fn group_id(&self) -> Option<TrapGroupId> {
        self.group_id
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    /// Creates the trap on every chip, bound to the group's chip-local
    /// handle where a group is configured.
    pub fn create_in_hw(
        &mut self,
        ndi: &dyn AclNdi,
        group_handles: Option<&BTreeMap<ChipId, NdiObjId>>,
    ) -> AclResult<()> {
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            let trap_group = match (self.group_id, group_handles) {
                (None, _) => None,
                (Some(_), Some(handles)) => Some(handles.get(&chip).copied().ok_or_else(|| {
                    AclError::internal(format!(
                        "trap {} references a group with no handle on chip {}",
                        self.trap_id, chip
                    ))
                })?),
                (Some(group), None) => {
                    return Err(AclError::internal(format!(
                        "trap {} references unresolved group {}",
                        self.trap_id, group
                    )));
                }
            };
            let spec = NdiTrapSpec {
                trap_group,
                priority: self.priority,
            };
            match ndi.create_trap(chip, &spec) {
                Ok(handle) => created.push((chip, handle)),
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_trap(chip, handle) {
                            error!(
                                "Rollback of trap {} on chip {} failed: {}",
                                self.trap_id, chip, undo_err
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        self.ndi_handles = created.into_iter().collect();
        Ok(())
    }

    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_trap(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }

    /// Rebinds the trap to a different group on every chip.
    pub fn set_group(
        &mut self,
        ndi: &dyn AclNdi,
        group_id: Option<TrapGroupId>,
        group_handles: Option<&BTreeMap<ChipId, NdiObjId>>,
    ) -> AclResult<()> {
        for (&chip, &handle) in &self.ndi_handles {
            let group = match group_handles {
                Some(handles) => Some(handles.get(&chip).copied().ok_or_else(|| {
                    AclError::internal(format!(
                        "trap group rebind target has no handle on chip {}",
                        chip
                    ))
                })?),
                None => None,
            };
            ndi.set_trap_group_binding(chip, handle, group)?;
        }
        self.group_id = group_id;
        Ok(())
    }
}

impl RefCounted for Trap {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        if self.ref_count == 0 {
            None
        } else {
            self.ref_count -= 1;
            Some(self.ref_count)
        }
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_group_spec_defaults() {
        let spec: TrapGroupSpec = serde_json::from_str(r#"{"cpu_queue": 7}"#).unwrap();
        assert!(spec.admin_state);
        let g = TrapGroup::new(TrapGroupId(1), &spec, ChipSet::new());
        assert_eq!(g.cpu_queue(), 7);
    }

    #[test]
    fn test_trap_without_group() {
        let spec = TrapSpec {
            group_id: None,
            priority: 0,
        };
        let t = Trap::new(TrapId(1), &spec, ChipSet::new());
        assert!(t.group_id().is_none());
        assert!(t.is_unused());
    }
}
