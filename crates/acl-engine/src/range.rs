//! Shared numeric-range objects.
//!
//! Ranges are owned by the switch and referenced from entries via
//! RANGE_CHECK filters; the reference count blocks deletion while in use.

use crate::error::{AclError, AclResult};
use crate::types::{ChipSet, RangeId};
use acl_common::RefCounted;
use acl_ndi::{AclNdi, ChipId, NdiObjId, NdiRangeSpec, RangeKind};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration half of a range object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSpec {
    pub kind: RangeKind,
    pub min: u32,
    pub max: u32,
}

/// One installed range object.
#[derive(Debug, Clone)]
pub struct Range {
    range_id: RangeId,
    kind: RangeKind,
    min: u32,
    max: u32,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl Range {
    pub fn new(range_id: RangeId, spec: &RangeSpec, chips: ChipSet) -> AclResult<Self> {
        if spec.min > spec.max {
            return Err(AclError::invalid(format!(
                "range bounds inverted: {} > {}",
                spec.min, spec.max
            )));
        }
        Ok(Self {
            range_id,
            kind: spec.kind,
            min: spec.min,
            max: spec.max,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        })
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    /// Creates the range on every chip; unwinds on mid-sequence failure.
    pub fn create_in_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        let spec = NdiRangeSpec {
            kind: self.kind,
            min: self.min,
            max: self.max,
        };
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            match ndi.create_range(chip, &spec) {
                Ok(handle) => {
                    debug!(
                        "Created range {} on chip {} handle {}",
                        self.range_id, chip, handle
                    );
                    created.push((chip, handle));
                }
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_range(chip, handle) {
                            error!(
                                "Rollback of range {} on chip {} failed: {}",
                                self.range_id, chip, undo_err
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

    /// Removes the range from every chip it is installed on.
    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_range(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }
}

impl RefCounted for Range {
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
    fn test_new_validates_bounds() {
        let bad = RangeSpec {
            kind: RangeKind::L4DstPort,
            min: 2000,
            max: 1000,
        };
        assert!(Range::new(RangeId(1), &bad, ChipSet::new()).is_err());

        let ok = RangeSpec {
            kind: RangeKind::L4DstPort,
            min: 1000,
            max: 2000,
        };
        let r = Range::new(RangeId(1), &ok, ChipSet::new()).unwrap();
        assert_eq!(r.bounds(), (1000, 2000));
        assert_eq!(r.kind(), RangeKind::L4DstPort);
    }

    #[test]
    fn test_ref_count_underflow() {
        let spec = RangeSpec {
            kind: RangeKind::OuterVlan,
            min: 1,
            max: 4094,
        };
        let mut r = Range::new(RangeId(1), &spec, ChipSet::new()).unwrap();
        assert_eq!(r.decrement_ref(), None);
        r.increment_ref();
        assert_eq!(r.decrement_ref(), Some(0));
    }
}
