//! Shared per-table hit counters.
//!
//! A counter is referenced from entries via the SET_COUNTER action and is
//! deletable only once nothing references it. Statistics reads sum the
//! per-chip values.

use crate::error::{AclError, AclResult};
use crate::types::{ChipSet, CounterId, TableId};
use acl_common::RefCounted;
use acl_ndi::{AclNdi, ChipId, CounterStats, NdiCounterSpec, NdiObjId};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration half of a counter, as received from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSpec {
    pub table_id: TableId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enable_pkt_count: bool,
    #[serde(default)]
    pub enable_byte_count: bool,
}

/// One installed counter.
#[derive(Debug, Clone)]
pub struct Counter {
    counter_id: CounterId,
    table_id: TableId,
    name: Option<String>,
    enable_pkt_count: bool,
    enable_byte_count: bool,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl Counter {
    pub fn new(counter_id: CounterId, spec: &CounterSpec, chips: ChipSet) -> AclResult<Self> {
        if !spec.enable_pkt_count && !spec.enable_byte_count {
            return Err(AclError::invalid(
                "counter must enable at least one statistic kind".to_string(),
            ));
        }
        Ok(Self {
            counter_id,
            table_id: spec.table_id,
            name: spec.name.clone(),
            enable_pkt_count: spec.enable_pkt_count,
            enable_byte_count: spec.enable_byte_count,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        })
    }

    pub fn counter_id(&self) -> CounterId {
        self.counter_id
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn chips(&self) -> &ChipSet {
        &self.chips
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    /// Creates the counter on every chip of its set. A mid-sequence
    /// failure deletes the copies already created and reports the error.
    pub fn create_in_hw(
        &mut self,
        ndi: &dyn AclNdi,
        table_handles: &BTreeMap<ChipId, NdiObjId>,
    ) -> AclResult<()> {
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            let table_id = table_handles.get(&chip).copied().ok_or_else(|| {
                AclError::internal(format!(
                    "table {} has no handle on chip {}",
                    self.table_id, chip
                ))
            })?;
            let spec = NdiCounterSpec {
                table_id,
                enable_pkt_count: self.enable_pkt_count,
                enable_byte_count: self.enable_byte_count,
            };
            match ndi.create_counter(chip, &spec) {
                Ok(handle) => {
                    debug!(
                        "Created counter {} on chip {} handle {}",
                        self.counter_id, chip, handle
                    );
                    created.push((chip, handle));
                }
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_counter(chip, handle) {
                            error!(
                                "Rollback of counter {} on chip {} failed: {}",
                                self.counter_id, chip, undo_err
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

    /// Removes the counter from every chip it is installed on.
    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_counter(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }

    /// Reads the counter, summed across its chips.
    pub fn get_stats(&self, ndi: &dyn AclNdi) -> AclResult<CounterStats> {
        let mut total = CounterStats::default();
        for (&chip, &handle) in &self.ndi_handles {
            let stats = ndi.get_counter_stats(chip, handle)?;
            total.pkt_count += stats.pkt_count;
            total.byte_count += stats.byte_count;
        }
        Ok(total)
    }

    /// Writes the same value to every chip, used to clear the counter.
    pub fn set_stats(&self, ndi: &dyn AclNdi, stats: CounterStats) -> AclResult<()> {
        for (&chip, &handle) in &self.ndi_handles {
            ndi.set_counter_stats(chip, handle, stats)?;
        }
        Ok(())
    }
}

impl RefCounted for Counter {
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

    fn spec() -> CounterSpec {
        CounterSpec {
            table_id: TableId(1),
            name: Some("web-hits".to_string()),
            enable_pkt_count: true,
            enable_byte_count: false,
        }
    }

    #[test]
    fn test_new_requires_a_statistic_kind() {
        let bad = CounterSpec {
            enable_pkt_count: false,
            enable_byte_count: false,
            ..spec()
        };
        assert!(Counter::new(CounterId(1), &bad, ChipSet::new()).is_err());
        assert!(Counter::new(CounterId(1), &spec(), ChipSet::new()).is_ok());
    }

    #[test]
    fn test_ref_count() {
        let mut c = Counter::new(CounterId(1), &spec(), ChipSet::new()).unwrap();
        assert!(c.is_unused());
        assert_eq!(c.increment_ref(), 1);
        assert_eq!(c.increment_ref(), 2);
        assert_eq!(c.decrement_ref(), Some(1));
        assert_eq!(c.decrement_ref(), Some(0));
        assert_eq!(c.decrement_ref(), None);
    }

    #[test]
    fn test_spec_json_defaults() {
        let spec: CounterSpec =
            serde_json::from_str(r#"{"table_id": 3, "enable_pkt_count": true}"#).unwrap();
        assert_eq!(spec.table_id, TableId(3));
        assert!(spec.name.is_none());
        assert!(!spec.enable_byte_count);
    }
}
