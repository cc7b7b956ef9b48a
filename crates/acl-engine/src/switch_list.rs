//! Device inventory and the switch container.

use crate::error::{AclError, AclResult};
use crate::switch::Switch;
use crate::types::{ChipSet, SwitchId};
use acl_common::IntfMapper;
use acl_ndi::{AclNdi, ChipId};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static switch-to-chips topology, loaded at startup from platform
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct ChipInventory {
    chips_by_switch: BTreeMap<SwitchId, ChipSet>,
}

impl ChipInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-device topology: one switch owning the given chips.
    pub fn single(switch_id: SwitchId, chips: impl IntoIterator<Item = u32>) -> Self {
        let mut inv = Self::new();
        inv.add_switch(switch_id, chips);
        inv
    }

    pub fn add_switch(&mut self, switch_id: SwitchId, chips: impl IntoIterator<Item = u32>) {
        let set: ChipSet = chips.into_iter().map(ChipId).collect();
        self.chips_by_switch.insert(switch_id, set);
    }

    pub fn chips(&self, switch_id: SwitchId) -> Option<&ChipSet> {
        self.chips_by_switch.get(&switch_id)
    }

    pub fn switch_ids(&self) -> impl Iterator<Item = SwitchId> + '_ {
        self.chips_by_switch.keys().copied()
    }
}

/// All switches under management. Switch state materializes on first
/// touch, validated against the inventory.
pub struct SwitchList {
    inventory: ChipInventory,
    ndi: Arc<dyn AclNdi>,
    mapper: Arc<dyn IntfMapper>,
    switches: BTreeMap<SwitchId, Switch>,
}

impl SwitchList {
    pub fn new(
        inventory: ChipInventory,
        ndi: Arc<dyn AclNdi>,
        mapper: Arc<dyn IntfMapper>,
    ) -> Self {
        Self {
            inventory,
            ndi,
            mapper,
            switches: BTreeMap::new(),
        }
    }

    pub fn inventory(&self) -> &ChipInventory {
        &self.inventory
    }

    /// Returns the switch, creating its state on first use. Unknown
    /// switch ids are rejected against the inventory.
    pub fn get_switch(&mut self, switch_id: SwitchId) -> AclResult<&mut Switch> {
        if !self.switches.contains_key(&switch_id) {
            let chips = self
                .inventory
                .chips(switch_id)
                .cloned()
                .ok_or_else(|| AclError::not_found(format!("switch {}", switch_id)))?;
            debug!("Materializing switch {} with chips {}", switch_id, chips);
            self.switches.insert(
                switch_id,
                Switch::new(
                    switch_id,
                    chips,
                    Arc::clone(&self.ndi),
                    Arc::clone(&self.mapper),
                ),
            );
        }
        self.switches
            .get_mut(&switch_id)
            .ok_or_else(|| AclError::internal("switch vanished after insert"))
    }

    /// Read-only view of an already-materialized switch.
    pub fn find_switch(&self, switch_id: SwitchId) -> Option<&Switch> {
        self.switches.get(&switch_id)
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }
}

impl std::fmt::Debug for SwitchList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchList")
            .field("inventory", &self.inventory)
            .field("materialized", &self.switches.len())
            .finish()
    }
}
