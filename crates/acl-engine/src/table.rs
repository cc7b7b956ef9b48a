//! ACL tables.
//!
//! A table fixes the pipeline stage, lookup priority and allowed match set
//! for the entries it contains, and owns the entry and counter containers
//! together with their id spaces.

use crate::counter::Counter;
use crate::entry::Entry;
use crate::error::{AclError, AclResult};
use crate::types::{
    AclStage, ChipSet, CounterId, EntryId, MatchType, TableId, UdfGroupId, MAX_COUNTER_ID,
    MAX_ENTRY_ID,
};
use acl_common::{IdGenerator, ObjMap};
use acl_ndi::{AclNdi, ChipId, NdiObjId, NdiTableSpec, TableUsage};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Configuration half of a table, as received from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    pub stage: AclStage,
    pub priority: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u32>,
    pub allowed_matches: Vec<MatchType>,
    #[serde(default)]
    pub udf_group_ids: Vec<UdfGroupId>,
    /// Target chips; empty means "follow the switch inventory".
    #[serde(default)]
    pub chips: Vec<u32>,
}

/// One ACL table.
#[derive(Debug, Clone)]
pub struct Table {
    table_id: TableId,
    stage: AclStage,
    priority: u32,
    name: Option<String>,
    size: Option<u32>,
    allowed_matches: BTreeSet<MatchType>,
    udf_group_ids: Vec<UdfGroupId>,
    follows_switch: bool,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
    entries: ObjMap<EntryId, Entry>,
    counters: ObjMap<CounterId, Counter>,
    entry_ids: IdGenerator,
    counter_ids: IdGenerator,
}

impl Table {
    pub fn new(table_id: TableId, spec: &TableSpec, switch_chips: &ChipSet) -> AclResult<Self> {
        if spec.allowed_matches.is_empty() {
            return Err(AclError::MissingKey("allowed_matches"));
        }
        if let Some(size) = spec.size {
            if size == 0 {
                return Err(AclError::invalid("table size must be non-zero"));
            }
        }
        let (follows_switch, chips) = if spec.chips.is_empty() {
            (true, switch_chips.clone())
        } else {
            let chips: ChipSet = spec.chips.iter().map(|&c| ChipId(c)).collect();
            if !chips.is_subset(switch_chips) {
                return Err(AclError::inconsistent(format!(
                    "table chip set {} is not within the switch inventory {}",
                    chips, switch_chips
                )));
            }
            (false, chips)
        };
        Ok(Self {
            table_id,
            stage: spec.stage,
            priority: spec.priority,
            name: spec.name.clone(),
            size: spec.size,
            allowed_matches: spec.allowed_matches.iter().copied().collect(),
            udf_group_ids: spec.udf_group_ids.clone(),
            follows_switch,
            chips,
            ndi_handles: BTreeMap::new(),
            entries: ObjMap::new(),
            counters: ObjMap::new(),
            entry_ids: IdGenerator::new("acl-entry", MAX_ENTRY_ID),
            counter_ids: IdGenerator::new("acl-counter", MAX_COUNTER_ID),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn stage(&self) -> AclStage {
        self.stage
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn chips(&self) -> &ChipSet {
        &self.chips
    }

    pub fn follows_switch(&self) -> bool {
        self.follows_switch
    }

    pub fn udf_group_ids(&self) -> &[UdfGroupId] {
        &self.udf_group_ids
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    pub fn is_match_allowed(&self, mt: MatchType) -> bool {
        self.allowed_matches.contains(&mt)
    }

    pub fn entries(&self) -> &ObjMap<EntryId, Entry> {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut ObjMap<EntryId, Entry> {
        &mut self.entries
    }

    pub fn counters(&self) -> &ObjMap<CounterId, Counter> {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut ObjMap<CounterId, Counter> {
        &mut self.counters
    }

    pub fn entry_ids(&self) -> &IdGenerator {
        &self.entry_ids
    }

    pub fn counter_ids(&self) -> &IdGenerator {
        &self.counter_ids
    }

    /// Finds a counter by its configured name.
    pub fn find_counter_by_name(&self, name: &str) -> Option<&Counter> {
        self.counters.values().find(|c| c.name() == Some(name))
    }

    /// Creates the table on every chip of its set, resolving UDF group
    /// references through the caller-supplied per-group handle tables.
    /// A mid-sequence failure deletes the copies already created.
    pub fn create_in_hw(
        &mut self,
        ndi: &dyn AclNdi,
        udf_group_handles: &BTreeMap<UdfGroupId, BTreeMap<ChipId, NdiObjId>>,
    ) -> AclResult<()> {
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            let mut udf_groups = Vec::with_capacity(self.udf_group_ids.len());
            for group_id in &self.udf_group_ids {
                let handle = udf_group_handles
                    .get(group_id)
                    .and_then(|per_chip| per_chip.get(&chip))
                    .copied()
                    .ok_or_else(|| {
                        AclError::internal(format!(
                            "UDF group {} has no handle on chip {}",
                            group_id, chip
                        ))
                    })?;
                udf_groups.push(handle);
            }
            let spec = NdiTableSpec {
                stage: self.stage,
                priority: self.priority,
                size: self.size,
                allowed_matches: self.allowed_matches.iter().copied().collect(),
                udf_groups,
            };
            match ndi.create_table(chip, &spec) {
                Ok(handle) => {
                    debug!(
                        "Created table {} on chip {} handle {}",
                        self.table_id, chip, handle
                    );
                    created.push((chip, handle));
                }
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_table(chip, handle) {
                            error!(
                                "Rollback of table {} on chip {} failed: {}",
                                self.table_id, chip, undo_err
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

    /// Removes the table from every chip it is installed on. The caller
    /// must have emptied (or be discarding) the entry/counter containers.
    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_table(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }

    /// Changes the lookup priority on every chip. Priority is a leaf
    /// attribute: a mid-sequence failure re-sets the prior value on the
    /// chips already changed, best-effort.
    pub fn set_priority(&mut self, ndi: &dyn AclNdi, priority: u32) -> AclResult<()> {
        let prior = self.priority;
        let mut done: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.ndi_handles.len());
        for (&chip, &handle) in &self.ndi_handles {
            if let Err(e) = ndi.set_table_priority(chip, handle, priority) {
                for (chip, handle) in done.into_iter().rev() {
                    if let Err(undo_err) = ndi.set_table_priority(chip, handle, prior) {
                        error!(
                            "Rollback of table {} priority on chip {} failed: {}",
                            self.table_id, chip, undo_err
                        );
                    }
                }
                return Err(e.into());
            }
            done.push((chip, handle));
        }
        self.priority = priority;
        Ok(())
    }

    /// Reads the current occupancy of this table on one chip.
    pub fn get_usage(&self, ndi: &dyn AclNdi, chip: ChipId) -> AclResult<TableUsage> {
        let handle = self.ndi_handles.get(&chip).copied().ok_or_else(|| {
            AclError::not_found(format!(
                "table {} is not installed on chip {}",
                self.table_id, chip
            ))
        })?;
        Ok(ndi.get_table_usage(chip, handle)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn switch_chips() -> ChipSet {
        [ChipId(0), ChipId(1)].into_iter().collect()
    }

    fn spec() -> TableSpec {
        TableSpec {
            stage: AclStage::Ingress,
            priority: 9,
            name: Some("ifacl".to_string()),
            size: None,
            allowed_matches: vec![MatchType::InPort, MatchType::SrcIp],
            udf_group_ids: vec![],
            chips: vec![],
        }
    }

    #[test]
    fn test_new_follows_switch_by_default() {
        let t = Table::new(TableId(1), &spec(), &switch_chips()).unwrap();
        assert!(t.follows_switch());
        assert_eq!(t.chips(), &switch_chips());
        assert!(t.is_match_allowed(MatchType::SrcIp));
        assert!(!t.is_match_allowed(MatchType::DstIp));
    }

    #[test]
    fn test_new_rejects_empty_match_set() {
        let bad = TableSpec {
            allowed_matches: vec![],
            ..spec()
        };
        assert!(matches!(
            Table::new(TableId(1), &bad, &switch_chips()),
            Err(AclError::MissingKey(_))
        ));
    }

    #[test]
    fn test_new_rejects_chips_outside_inventory() {
        let bad = TableSpec {
            chips: vec![0, 5],
            ..spec()
        };
        assert!(matches!(
            Table::new(TableId(1), &bad, &switch_chips()),
            Err(AclError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_explicit_chip_subset() {
        let s = TableSpec {
            chips: vec![1],
            ..spec()
        };
        let t = Table::new(TableId(1), &s, &switch_chips()).unwrap();
        assert!(!t.follows_switch());
        assert_eq!(t.chips().len(), 1);
        assert!(t.chips().contains(&ChipId(1)));
    }

    #[test]
    fn test_entry_and_counter_id_spaces_are_independent() {
        let t = Table::new(TableId(1), &spec(), &switch_chips()).unwrap();
        assert_eq!(t.entry_ids().alloc().unwrap(), 1);
        assert_eq!(t.counter_ids().alloc().unwrap(), 1);
        assert_eq!(t.entry_ids().alloc().unwrap(), 2);
    }

    #[test]
    fn test_spec_json() {
        let spec: TableSpec = serde_json::from_str(
            r#"{"stage": "Ingress", "priority": 9, "allowed_matches": ["InPort"]}"#,
        )
        .unwrap();
        assert_eq!(spec.priority, 9);
        assert!(spec.chips.is_empty());
    }
}
