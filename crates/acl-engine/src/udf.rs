//! User-defined field objects.
//!
//! A UDF group defines an extraction slot (length, generic or hash). UDF
//! matches pick which packets feed a slot, and a UDF binds a group and a
//! match to a concrete header base + offset. Groups are referenced by
//! tables (as extra match capability) and by UDFs; matches are referenced
//! by UDFs. All three are reference counted.

use crate::error::{AclError, AclResult};
use crate::types::{ChipSet, UdfGroupId, UdfId, UdfMatchId};
use acl_common::RefCounted;
use acl_ndi::{
    AclNdi, ChipId, NdiObjId, NdiUdfGroupSpec, NdiUdfMatchSpec, NdiUdfSpec, UdfBase,
};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration half of a UDF group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfGroupSpec {
    #[serde(default)]
    pub is_hash: bool,
    pub length: u8,
}

/// Configuration half of a UDF match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfMatchSpec {
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub ethertype: Option<(u16, u16)>,
    #[serde(default)]
    pub ip_protocol: Option<(u8, u8)>,
    #[serde(default)]
    pub gre_tunnel: bool,
}

/// Configuration half of a UDF object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfSpec {
    pub group_id: UdfGroupId,
    pub match_id: UdfMatchId,
    pub base: UdfBase,
    pub offset: u32,
    #[serde(default)]
    pub hash_mask: Vec<u8>,
}

macro_rules! refcount_impl {
    ($ty:ident) => {
        impl RefCounted for $ty {
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
    };
}

/// One installed UDF group.
#[derive(Debug, Clone)]
pub struct UdfGroup {
    group_id: UdfGroupId,
    is_hash: bool,
    length: u8,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

refcount_impl!(UdfGroup);

impl UdfGroup {
    pub fn new(group_id: UdfGroupId, spec: &UdfGroupSpec, chips: ChipSet) -> AclResult<Self> {
        if spec.length == 0 {
            return Err(AclError::invalid("UDF group length must be non-zero"));
        }
        Ok(Self {
            group_id,
            is_hash: spec.is_hash,
            length: spec.length,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        })
    }

    pub fn group_id(&self) -> UdfGroupId {
        self.group_id
    }

    /// Extracted field width in bytes.
    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn is_hash(&self) -> bool {
        self.is_hash
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    pub fn create_in_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        let spec = NdiUdfGroupSpec {
            is_hash: self.is_hash,
            length: self.length,
        };
        self.ndi_handles = fan_out_create(
            &self.chips,
            |chip| ndi.create_udf_group(chip, &spec),
            |chip, handle| ndi.delete_udf_group(chip, handle),
            &format!("UDF group {}", self.group_id),
        )?;
        Ok(())
    }

    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_udf_group(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }
}

/// One installed UDF match.
#[derive(Debug, Clone)]
pub struct UdfMatch {
    match_id: UdfMatchId,
    spec: UdfMatchSpec,
    ref_count: u32,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

refcount_impl!(UdfMatch);

impl UdfMatch {
    pub fn new(match_id: UdfMatchId, spec: UdfMatchSpec, chips: ChipSet) -> Self {
        Self {
            match_id,
            spec,
            ref_count: 0,
            chips,
            ndi_handles: BTreeMap::new(),
        }
    }

    pub fn match_id(&self) -> UdfMatchId {
        self.match_id
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    pub fn create_in_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        let spec = NdiUdfMatchSpec {
            priority: self.spec.priority,
            ethertype: self.spec.ethertype,
            ip_protocol: self.spec.ip_protocol,
            gre_tunnel: self.spec.gre_tunnel,
        };
        self.ndi_handles = fan_out_create(
            &self.chips,
            |chip| ndi.create_udf_match(chip, &spec),
            |chip, handle| ndi.delete_udf_match(chip, handle),
            &format!("UDF match {}", self.match_id),
        )?;
        Ok(())
    }

    pub fn delete_from_hw(&mut self, ndi: &dyn AclNdi) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ndi.delete_udf_match(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }
}

/// One installed UDF.
#[derive(Debug, Clone)]
pub struct Udf {
    udf_id: UdfId,
    group_id: UdfGroupId,
    match_id: UdfMatchId,
    base: UdfBase,
    offset: u32,
    hash_mask: Vec<u8>,
    chips: ChipSet,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl Udf {
    pub fn new(udf_id: UdfId, spec: &UdfSpec, chips: ChipSet) -> Self {
        Self {
            udf_id,
            group_id: spec.group_id,
            match_id: spec.match_id,
            base: spec.base,
            offset: spec.offset,
            hash_mask: spec.hash_mask.clone(),
            chips,
            ndi_handles: BTreeMap::new(),
        }
    }

    pub fn udf_id(&self) -> UdfId {
        self.udf_id
    }

    pub fn group_id(&self) -> UdfGroupId {
        self.group_id
    }

    pub fn match_id(&self) -> UdfMatchId {
        self.match_id
    }

    /// Creates the UDF on every chip, resolving the group and match to the
    /// chip-local handles the caller looked up.
    pub fn create_in_hw(
        &mut self,
        ndi: &dyn AclNdi,
        group_handles: &BTreeMap<ChipId, NdiObjId>,
        match_handles: &BTreeMap<ChipId, NdiObjId>,
    ) -> AclResult<()> {
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(self.chips.len());
        for chip in self.chips.iter() {
            let (group, matcher) = match (group_handles.get(&chip), match_handles.get(&chip)) {
                (Some(g), Some(m)) => (*g, *m),
                _ => {
                    return Err(AclError::internal(format!(
                        "UDF {} references unresolved group/match on chip {}",
                        self.udf_id, chip
                    )));
                }
            };
            let spec = NdiUdfSpec {
                group_id: group,
                match_id: matcher,
                base: self.base,
                offset: self.offset,
                hash_mask: self.hash_mask.clone(),
            };
            match ndi.create_udf(chip, &spec) {
                Ok(handle) => created.push((chip, handle)),
                Err(e) => {
                    for (chip, handle) in created.into_iter().rev() {
                        if let Err(undo_err) = ndi.delete_udf(chip, handle) {
                            error!(
                                "Rollback of UDF {} on chip {} failed: {}",
                                self.udf_id, chip, undo_err
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
            ndi.delete_udf(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }
}

/// Per-chip create with best-effort unwind of already-created copies.
fn fan_out_create(
    chips: &ChipSet,
    mut create: impl FnMut(ChipId) -> acl_ndi::NdiResult<NdiObjId>,
    mut destroy: impl FnMut(ChipId, NdiObjId) -> acl_ndi::NdiResult<()>,
    what: &str,
) -> AclResult<BTreeMap<ChipId, NdiObjId>> {
    let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(chips.len());
    for chip in chips.iter() {
        match create(chip) {
            Ok(handle) => {
                debug!("Created {} on chip {} handle {}", what, chip, handle);
                created.push((chip, handle));
            }
            Err(e) => {
                for (chip, handle) in created.into_iter().rev() {
                    if let Err(undo_err) = destroy(chip, handle) {
                        error!("Rollback of {} on chip {} failed: {}", what, chip, undo_err);
                    }
                }
                return Err(e.into());
            }
        }
    }
    Ok(created.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_length_validation() {
        let bad = UdfGroupSpec {
            is_hash: false,
            length: 0,
        };
        assert!(UdfGroup::new(UdfGroupId(1), &bad, ChipSet::new()).is_err());

        let ok = UdfGroupSpec {
            is_hash: true,
            length: 2,
        };
        let g = UdfGroup::new(UdfGroupId(1), &ok, ChipSet::new()).unwrap();
        assert_eq!(g.length(), 2);
        assert!(g.is_hash());
    }

    #[test]
    fn test_group_ref_count() {
        let spec = UdfGroupSpec {
            is_hash: false,
            length: 4,
        };
        let mut g = UdfGroup::new(UdfGroupId(1), &spec, ChipSet::new()).unwrap();
        assert!(g.is_unused());
        g.increment_ref();
        g.increment_ref();
        assert_eq!(g.ref_count(), 2);
        assert_eq!(g.decrement_ref(), Some(1));
    }

    #[test]
    fn test_udf_spec_json() {
        let spec: UdfSpec = serde_json::from_str(
            r#"{"group_id": 1, "match_id": 2, "base": "L3", "offset": 8}"#,
        )
        .unwrap();
        assert_eq!(spec.group_id, UdfGroupId(1));
        assert_eq!(spec.offset, 8);
        assert!(spec.hash_mask.is_empty());
    }
}
