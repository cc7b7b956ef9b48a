//! ACL entries and their hardware synchronization protocol.
//!
//! An entry is one rule: priority, match fields, action fields. Installing
//! it fans out across the chips the rule targets; a failure on any chip
//! unwinds the chips already touched so the cache and hardware never
//! disagree. Modification diffs the old and new field sets and pushes the
//! difference per chip, recording an undo step for every successful push
//! in a rollback ledger that is replayed in reverse on mid-sequence
//! failure.

use crate::action::Action;
use crate::error::{AclError, AclResult};
use crate::filter::{Filter, FilterKey};
use crate::types::{ActionType, ChipSet, CounterId, EntryId, MatchType, RangeId, TableId, TrapId};
use crate::value::Value;
use acl_common::{IfIndex, IntfMapper};
use acl_ndi::{AclNdi, ChipId, NdiAction, NdiEntry, NdiFilter, NdiObjId};
use log::{debug, error, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Table-side context an entry needs to talk to hardware.
pub struct EntryCtx<'a> {
    pub ndi: &'a dyn AclNdi,
    pub table_chips: &'a ChipSet,
    pub table_handles: &'a BTreeMap<ChipId, NdiObjId>,
}

impl<'a> EntryCtx<'a> {
    fn table_handle(&self, chip: ChipId) -> AclResult<NdiObjId> {
        self.table_handles.get(&chip).copied().ok_or_else(|| {
            AclError::internal(format!("owning table has no handle on chip {}", chip))
        })
    }
}

/// Addresses one field of an entry, for incremental updates and interface
/// rebinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldRef {
    Match(FilterKey),
    Action(ActionType),
}

/// One reverse operation recorded during a forward modify pass.
#[derive(Debug)]
enum UndoStep {
    SetFilter {
        chip: ChipId,
        handle: NdiObjId,
        filter: NdiFilter,
    },
    DisableFilter {
        chip: ChipId,
        handle: NdiObjId,
        match_type: MatchType,
    },
    SetAction {
        chip: ChipId,
        handle: NdiObjId,
        action: NdiAction,
    },
    DisableAction {
        chip: ChipId,
        handle: NdiObjId,
        action_type: ActionType,
    },
    SetPriority {
        chip: ChipId,
        handle: NdiObjId,
        priority: u32,
    },
    DeleteEntry {
        chip: ChipId,
        handle: NdiObjId,
    },
    RecreateEntry {
        chip: ChipId,
        record: NdiEntry,
    },
}

/// Ordered record of reverse operations for one forward pass.
///
/// Replay is reverse-ordered and best-effort: an undo that fails is
/// logged, never re-raised.
#[derive(Debug, Default)]
struct RollbackLedger {
    steps: Vec<UndoStep>,
}

impl RollbackLedger {
    fn record(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    /// Replays the ledger in reverse. `handles` is the owning entry's
    /// cached handle map; re-creates and failed undo-deletes are
    /// reconciled into it so the cache never points at a dead handle.
    fn rollback(mut self, ndi: &dyn AclNdi, handles: &mut BTreeMap<ChipId, NdiObjId>) {
        for step in self.steps.drain(..).rev() {
            let outcome = match &step {
                UndoStep::SetFilter {
                    chip,
                    handle,
                    filter,
                } => ndi.set_entry_filter(*chip, *handle, filter),
                UndoStep::DisableFilter {
                    chip,
                    handle,
                    match_type,
                } => ndi.disable_entry_filter(*chip, *handle, *match_type),
                UndoStep::SetAction {
                    chip,
                    handle,
                    action,
                } => ndi.set_entry_action(*chip, *handle, action),
                UndoStep::DisableAction {
                    chip,
                    handle,
                    action_type,
                } => ndi.disable_entry_action(*chip, *handle, *action_type),
                UndoStep::SetPriority {
                    chip,
                    handle,
                    priority,
                } => ndi.set_entry_priority(*chip, *handle, *priority),
                UndoStep::DeleteEntry { chip, handle } => {
                    ndi.delete_entry(*chip, *handle).map(|()| {
                        handles.remove(chip);
                    })
                }
                UndoStep::RecreateEntry { chip, record } => {
                    match ndi.create_entry(*chip, record) {
                        Ok(handle) => {
                            warn!(
                                "Rollback re-created an entry on chip {} under new handle {}",
                                chip, handle
                            );
                            handles.insert(*chip, handle);
                            Ok(())
                        }
                        Err(e) => {
                            // The chip's copy is gone for good.
                            handles.remove(chip);
                            Err(e)
                        }
                    }
                }
            };
            if let Err(e) = outcome {
                error!("Rollback step {:?} failed: {}", step, e);
            }
        }
    }
}

/// One ACL rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    entry_id: EntryId,
    table_id: TableId,
    priority: u32,
    filters: BTreeMap<FilterKey, Filter>,
    actions: BTreeMap<ActionType, Action>,
    /// Explicitly configured chip subset; `None` follows the table.
    own_chips: Option<ChipSet>,
    ndi_handles: BTreeMap<ChipId, NdiObjId>,
}

impl Entry {
    pub fn new(entry_id: EntryId, table_id: TableId, priority: u32) -> Self {
        Self {
            entry_id,
            table_id,
            priority,
            filters: BTreeMap::new(),
            actions: BTreeMap::new(),
            own_chips: None,
            ndi_handles: BTreeMap::new(),
        }
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn filters(&self) -> &BTreeMap<FilterKey, Filter> {
        &self.filters
    }

    pub fn actions(&self) -> &BTreeMap<ActionType, Action> {
        &self.actions
    }

    pub fn filter(&self, key: &FilterKey) -> Option<&Filter> {
        self.filters.get(key)
    }

    pub fn action(&self, action_type: ActionType) -> Option<&Action> {
        self.actions.get(&action_type)
    }

    pub fn ndi_handle(&self, chip: ChipId) -> Option<NdiObjId> {
        self.ndi_handles.get(&chip).copied()
    }

    pub fn ndi_handles(&self) -> &BTreeMap<ChipId, NdiObjId> {
        &self.ndi_handles
    }

    pub(crate) fn filters_mut(&mut self) -> impl Iterator<Item = &mut Filter> {
        self.filters.values_mut()
    }

    pub(crate) fn actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.actions.values_mut()
    }

    pub fn set_own_chips(&mut self, chips: ChipSet) {
        self.own_chips = Some(chips);
    }

    /// Adds a match field. A single-port filter and a port-list filter
    /// cannot coexist; duplicate keys are rejected.
    pub fn add_filter(&mut self, filter: Filter) -> AclResult<()> {
        let key = filter.key();
        if self.filters.contains_key(&key) {
            return Err(AclError::Duplicate(format!("filter {}", key)));
        }
        let adds_single = key.match_type.is_single_port();
        let adds_list = key.match_type.is_chip_specific() && !adds_single;
        if adds_single || adds_list {
            for existing in self.filters.keys() {
                let is_single = existing.match_type.is_single_port();
                let is_list = existing.match_type.is_chip_specific() && !is_single;
                if (adds_single && is_list) || (adds_list && is_single) {
                    return Err(AclError::inconsistent(format!(
                        "{} cannot coexist with {} in one entry",
                        key, existing
                    )));
                }
            }
        }
        self.filters.insert(key, filter);
        Ok(())
    }

    /// Adds an action field; duplicate action types are rejected.
    pub fn add_action(&mut self, action: Action) -> AclResult<()> {
        let at = action.action_type();
        if self.actions.contains_key(&at) {
            return Err(AclError::Duplicate(format!("action {}", at)));
        }
        self.actions.insert(at, action);
        Ok(())
    }

    /// The counter referenced via SET_COUNTER, if any.
    pub fn counter_ref(&self) -> Option<CounterId> {
        self.actions.values().find_map(|a| a.counter_id())
    }

    /// The trap referenced via SET_USER_TRAP_ID, if any.
    pub fn trap_ref(&self) -> Option<TrapId> {
        self.actions.values().find_map(|a| a.trap_id())
    }

    /// Ranges referenced via RANGE_CHECK filters.
    pub fn range_refs(&self) -> Vec<RangeId> {
        let mut ids = Vec::new();
        for filter in self.filters.values() {
            if filter.match_type() == MatchType::RangeCheck {
                if let Value::ObjRefList { ids: raw, .. } = filter.value() {
                    ids.extend(raw.iter().map(|&id| RangeId(id)));
                }
            }
        }
        ids
    }

    /// Interface-valued fields and the indexes they reference, for the
    /// rebind index.
    pub fn interface_fields(&self) -> Vec<(FieldRef, Vec<IfIndex>)> {
        let mut out = Vec::new();
        for (key, filter) in &self.filters {
            let ifindexes = filter.ifindexes();
            if !ifindexes.is_empty() {
                out.push((FieldRef::Match(*key), ifindexes.to_vec()));
            }
        }
        for (at, action) in &self.actions {
            let ifindexes = action.ifindexes();
            if !ifindexes.is_empty() {
                out.push((FieldRef::Action(*at), ifindexes.to_vec()));
            }
        }
        out
    }

    /// Re-resolves every interface-valued field against the mapper.
    pub fn resolve_ports(&mut self, mapper: &dyn IntfMapper) -> AclResult<()> {
        for filter in self.filters.values_mut() {
            filter.resolve_ports(mapper)?;
        }
        for action in self.actions.values_mut() {
            action.resolve_ports(mapper)?;
        }
        Ok(())
    }

    /// Re-resolves one interface-valued field against the mapper.
    pub fn resolve_field_ports(
        &mut self,
        field: &FieldRef,
        mapper: &dyn IntfMapper,
    ) -> AclResult<()> {
        match field {
            FieldRef::Match(key) => self
                .filters
                .get_mut(key)
                .ok_or_else(|| AclError::not_found(format!("filter {}", key)))?
                .resolve_ports(mapper),
            FieldRef::Action(at) => self
                .actions
                .get_mut(at)
                .ok_or_else(|| AclError::not_found(format!("action {}", at)))?
                .resolve_ports(mapper),
        }
    }

    /// Resolves the chips this entry installs on.
    ///
    /// Starts from the explicit subset (validated against the table) or the
    /// table's set, then narrows by every chip-specific filter. A filter
    /// requiring chips outside the base set, or a narrowing that leaves
    /// nothing, is an inconsistent configuration.
    pub fn effective_chips(&self, table_chips: &ChipSet) -> AclResult<ChipSet> {
        let base = match &self.own_chips {
            Some(own) => {
                if !own.is_subset(table_chips) {
                    return Err(AclError::inconsistent(format!(
                        "entry chip set {} exceeds table chip set {}",
                        own, table_chips
                    )));
                }
                own.clone()
            }
            None => table_chips.clone(),
        };
        let mut effective = base.clone();
        for (key, filter) in &self.filters {
            if let Some(required) = filter.required_chips() {
                if !required.is_subset(&base) {
                    return Err(AclError::inconsistent(format!(
                        "filter {} requires chips {} outside the entry's chip set {}",
                        key, required, base
                    )));
                }
                effective = effective.intersection(&required);
            }
        }
        if effective.is_empty() {
            return Err(AclError::inconsistent(
                "entry's chip-specific filters leave no chip to install on",
            ));
        }
        Ok(effective)
    }

    /// Builds the full hardware record for one chip. `Ok(None)` means the
    /// entry does not install on this chip (a chip-specific filter has no
    /// port here).
    fn build_record(&self, chip: ChipId, table_handle: NdiObjId) -> AclResult<Option<NdiEntry>> {
        for filter in self.filters.values() {
            if filter.is_chip_specific() && !filter.is_eligible(chip) {
                return Ok(None);
            }
        }
        let mut filters = Vec::with_capacity(self.filters.len());
        for filter in self.filters.values() {
            if let Some(record) = filter.copy_to_ndi(chip)? {
                filters.push(record);
            }
        }
        let mut actions = Vec::with_capacity(self.actions.len());
        for action in self.ordered_actions() {
            if let Some(record) = action.copy_to_ndi(chip)? {
                actions.push(record);
            }
        }
        Ok(Some(NdiEntry {
            table_id: table_handle,
            priority: self.priority,
            filters,
            actions,
        }))
    }

    /// Actions in push order: SET_USER_TRAP_ID strictly last.
    fn ordered_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .values()
            .filter(|a| a.action_type() != ActionType::SetUserTrapId)
            .chain(
                self.actions
                    .values()
                    .filter(|a| a.action_type() == ActionType::SetUserTrapId),
            )
    }

    /// Installs the entry on every eligible chip of its effective set.
    /// All-or-nothing: any chip failure removes the copies already created
    /// and leaves the entry unbound.
    pub fn create_in_hw(&mut self, ctx: &EntryCtx<'_>) -> AclResult<()> {
        let chips = self.effective_chips(ctx.table_chips)?;
        let mut created: Vec<(ChipId, NdiObjId)> = Vec::with_capacity(chips.len());
        for chip in chips.iter() {
            let table_handle = ctx.table_handle(chip)?;
            let record = match self.build_record(chip, table_handle) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    Self::unwind_creates(ctx.ndi, created, self.entry_id);
                    return Err(e);
                }
            };
            match ctx.ndi.create_entry(chip, &record) {
                Ok(handle) => {
                    debug!(
                        "Created entry {} on chip {} handle {} ({} filters, {} actions)",
                        self.entry_id,
                        chip,
                        handle,
                        record.filters.len(),
                        record.actions.len()
                    );
                    created.push((chip, handle));
                }
                Err(e) => {
                    Self::unwind_creates(ctx.ndi, created, self.entry_id);
                    return Err(e.into());
                }
            }
        }
        self.ndi_handles = created.into_iter().collect();
        Ok(())
    }

    fn unwind_creates(ndi: &dyn AclNdi, created: Vec<(ChipId, NdiObjId)>, entry_id: EntryId) {
        for (chip, handle) in created.into_iter().rev() {
            if let Err(e) = ndi.delete_entry(chip, handle) {
                error!(
                    "Unwind of entry {} on chip {} failed: {}",
                    entry_id, chip, e
                );
            }
        }
    }

    /// Removes the entry from every chip it is installed on.
    pub fn delete_from_hw(&mut self, ctx: &EntryCtx<'_>) -> AclResult<()> {
        while let Some((&chip, &handle)) = self.ndi_handles.iter().next() {
            ctx.ndi.delete_entry(chip, handle)?;
            self.ndi_handles.remove(&chip);
        }
        Ok(())
    }

    /// Full-replace modify: makes hardware match `desired`, then commits
    /// it as the new cached state and returns the previous one.
    ///
    /// Per chip, removed fields are disabled before added/changed fields
    /// are set; each push records its reverse in the rollback ledger.
    /// A mid-sequence failure replays the ledger and leaves the cache
    /// untouched.
    pub fn apply_modify(&mut self, mut desired: Entry, ctx: &EntryCtx<'_>) -> AclResult<Entry> {
        if desired.entry_id != self.entry_id || desired.table_id != self.table_id {
            return Err(AclError::internal("modify target identity mismatch"));
        }
        let new_chips = desired.effective_chips(ctx.table_chips)?;

        let removed_filters: Vec<FilterKey> = self
            .filters
            .keys()
            .filter(|k| !desired.filters.contains_key(k))
            .copied()
            .collect();
        let changed_filters: Vec<FilterKey> = desired
            .filters
            .iter()
            .filter(|(k, v)| self.filters.get(k) != Some(v))
            .map(|(k, _)| *k)
            .collect();
        let removed_actions: Vec<ActionType> = self
            .actions
            .keys()
            .filter(|t| !desired.actions.contains_key(t))
            .copied()
            .collect();
        let mut changed_actions: Vec<ActionType> = desired
            .actions
            .iter()
            .filter(|(t, v)| self.actions.get(t) != Some(v))
            .map(|(t, _)| *t)
            .collect();
        // Hardware ordering dependency: the user-trap-id set goes last.
        changed_actions.sort_by_key(|t| *t == ActionType::SetUserTrapId);

        let mut ledger = RollbackLedger::default();
        let mut new_handles: BTreeMap<ChipId, NdiObjId> = BTreeMap::new();

        let all_chips: BTreeSet<ChipId> = self
            .ndi_handles
            .keys()
            .copied()
            .chain(new_chips.iter())
            .collect();

        let mut push = || -> AclResult<()> {
            for &chip in &all_chips {
                let old_handle = self.ndi_handles.get(&chip).copied();
                let table_handle = ctx.table_handle(chip)?;
                let new_record = if new_chips.contains(&chip) {
                    desired.build_record(chip, table_handle)?
                } else {
                    None
                };
                match (old_handle, new_record) {
                    (Some(handle), Some(_)) => {
                        self.push_chip_diff(
                            &desired,
                            chip,
                            handle,
                            &removed_filters,
                            &changed_filters,
                            &removed_actions,
                            &changed_actions,
                            ctx,
                            &mut ledger,
                        )?;
                        new_handles.insert(chip, handle);
                    }
                    (Some(handle), None) => {
                        // Entry no longer targets this chip.
                        let old_record = self
                            .build_record(chip, table_handle)?
                            .ok_or_else(|| AclError::internal("installed entry has no record"))?;
                        ctx.ndi.delete_entry(chip, handle)?;
                        ledger.record(UndoStep::RecreateEntry {
                            chip,
                            record: old_record,
                        });
                    }
                    (None, Some(record)) => {
                        let handle = ctx.ndi.create_entry(chip, &record)?;
                        ledger.record(UndoStep::DeleteEntry { chip, handle });
                        new_handles.insert(chip, handle);
                    }
                    (None, None) => {}
                }
            }
            Ok(())
        };

        match push() {
            Ok(()) => {
                desired.ndi_handles = new_handles;
                Ok(std::mem::replace(self, desired))
            }
            Err(e) => {
                ledger.rollback(ctx.ndi, &mut self.ndi_handles);
                Err(e)
            }
        }
    }

    /// Pushes the field diff to one chip the entry stays installed on.
    #[allow(clippy::too_many_arguments)]
    fn push_chip_diff(
        &self,
        desired: &Entry,
        chip: ChipId,
        handle: NdiObjId,
        removed_filters: &[FilterKey],
        changed_filters: &[FilterKey],
        removed_actions: &[ActionType],
        changed_actions: &[ActionType],
        ctx: &EntryCtx<'_>,
        ledger: &mut RollbackLedger,
    ) -> AclResult<()> {
        let ndi = ctx.ndi;
        if desired.priority != self.priority {
            ndi.set_entry_priority(chip, handle, desired.priority)?;
            ledger.record(UndoStep::SetPriority {
                chip,
                handle,
                priority: self.priority,
            });
        }
        for key in removed_filters {
            let old = &self.filters[key];
            if old.copy_to_ndi(chip)?.is_some() {
                ndi.disable_entry_filter(chip, handle, key.match_type)?;
                ledger.record(UndoStep::SetFilter {
                    chip,
                    handle,
                    filter: old.copy_to_ndi(chip)?.ok_or_else(|| {
                        AclError::internal("filter record vanished during diff")
                    })?,
                });
            }
        }
        for at in removed_actions {
            let old = &self.actions[at];
            if let Some(old_record) = old.copy_to_ndi(chip)? {
                ndi.disable_entry_action(chip, handle, *at)?;
                ledger.record(UndoStep::SetAction {
                    chip,
                    handle,
                    action: old_record,
                });
            }
        }
        for key in changed_filters {
            let new = &desired.filters[key];
            let old_record = match self.filters.get(key) {
                Some(old) => old.copy_to_ndi(chip)?,
                None => None,
            };
            match new.copy_to_ndi(chip)? {
                Some(record) => {
                    ndi.set_entry_filter(chip, handle, &record)?;
                    ledger.record(match old_record {
                        Some(filter) => UndoStep::SetFilter {
                            chip,
                            handle,
                            filter,
                        },
                        None => UndoStep::DisableFilter {
                            chip,
                            handle,
                            match_type: key.match_type,
                        },
                    });
                }
                None => {
                    if let Some(filter) = old_record {
                        ndi.disable_entry_filter(chip, handle, key.match_type)?;
                        ledger.record(UndoStep::SetFilter {
                            chip,
                            handle,
                            filter,
                        });
                    }
                }
            }
        }
        for at in changed_actions {
            let new = &desired.actions[at];
            let old_record = match self.actions.get(at) {
                Some(old) => old.copy_to_ndi(chip)?,
                None => None,
            };
            match new.copy_to_ndi(chip)? {
                Some(record) => {
                    ndi.set_entry_action(chip, handle, &record)?;
                    ledger.record(match old_record {
                        Some(action) => UndoStep::SetAction {
                            chip,
                            handle,
                            action,
                        },
                        None => UndoStep::DisableAction {
                            chip,
                            handle,
                            action_type: *at,
                        },
                    });
                }
                None => {
                    if let Some(action) = old_record {
                        ndi.disable_entry_action(chip, handle, *at)?;
                        ledger.record(UndoStep::SetAction {
                            chip,
                            handle,
                            action,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Incremental update of one filter. `new` of `None` removes the
    /// filter. UDF matches cannot be addressed this way (several share one
    /// match type). Returns the filter's prior value, absent if newly
    /// added.
    pub fn update_filter(
        &mut self,
        key: FilterKey,
        new: Option<Filter>,
        ctx: &EntryCtx<'_>,
    ) -> AclResult<Option<Filter>> {
        if key.match_type == MatchType::Udf {
            return Err(AclError::Unsupported(
                "UDF matches cannot be updated incrementally".to_string(),
            ));
        }
        if new.is_none() && !self.filters.contains_key(&key) {
            return Err(AclError::not_found(format!("filter {}", key)));
        }
        let mut desired = self.clone();
        match new {
            Some(filter) => {
                if filter.key() != key {
                    return Err(AclError::internal("filter key mismatch"));
                }
                desired.filters.insert(key, filter);
            }
            None => {
                desired.filters.remove(&key);
            }
        }
        let previous = self.apply_modify(desired, ctx)?;
        Ok(previous.filters.get(&key).cloned())
    }

    /// Incremental update of one action; same contract as
    /// [`update_filter`](Self::update_filter).
    pub fn update_action(
        &mut self,
        action_type: ActionType,
        new: Option<Action>,
        ctx: &EntryCtx<'_>,
    ) -> AclResult<Option<Action>> {
        if new.is_none() && !self.actions.contains_key(&action_type) {
            return Err(AclError::not_found(format!("action {}", action_type)));
        }
        let mut desired = self.clone();
        match new {
            Some(action) => {
                if action.action_type() != action_type {
                    return Err(AclError::internal("action type mismatch"));
                }
                desired.actions.insert(action_type, action);
            }
            None => {
                desired.actions.remove(&action_type);
            }
        }
        let previous = self.apply_modify(desired, ctx)?;
        Ok(previous.actions.get(&action_type).cloned())
    }

    /// Leaf-attribute update of the priority. Returns the prior value.
    pub fn set_priority(&mut self, priority: u32, ctx: &EntryCtx<'_>) -> AclResult<u32> {
        let mut desired = self.clone();
        desired.priority = priority;
        let previous = self.apply_modify(desired, ctx)?;
        Ok(previous.priority)
    }

    /// Re-pushes one interface-valued field on one chip after a port
    /// remap. Depending on where the field's ports now live, this sets or
    /// disables the field, installs the whole entry on a chip it newly
    /// targets, or removes it from a chip it no longer targets.
    pub fn repush_field(
        &mut self,
        field: &FieldRef,
        chip: ChipId,
        ctx: &EntryCtx<'_>,
    ) -> AclResult<()> {
        let table_handle = ctx.table_handle(chip)?;
        let in_target = self
            .effective_chips(ctx.table_chips)?
            .contains(&chip);
        let record = if in_target {
            self.build_record(chip, table_handle)?
        } else {
            None
        };
        match (self.ndi_handles.get(&chip).copied(), record) {
            (Some(handle), Some(_)) => match field {
                FieldRef::Match(key) => {
                    let filter = self
                        .filters
                        .get(key)
                        .ok_or_else(|| AclError::not_found(format!("filter {}", key)))?;
                    match filter.copy_to_ndi(chip)? {
                        Some(rec) => ctx.ndi.set_entry_filter(chip, handle, &rec)?,
                        None => ctx.ndi.disable_entry_filter(chip, handle, key.match_type)?,
                    }
                }
                FieldRef::Action(at) => {
                    let action = self
                        .actions
                        .get(at)
                        .ok_or_else(|| AclError::not_found(format!("action {}", at)))?;
                    match action.copy_to_ndi(chip)? {
                        Some(rec) => ctx.ndi.set_entry_action(chip, handle, &rec)?,
                        None => ctx.ndi.disable_entry_action(chip, handle, *at)?,
                    }
                }
            },
            (Some(handle), None) => {
                ctx.ndi.delete_entry(chip, handle)?;
                self.ndi_handles.remove(&chip);
            }
            (None, Some(record)) => {
                let handle = ctx.ndi.create_entry(chip, &record)?;
                self.ndi_handles.insert(chip, handle);
            }
            (None, None) => {}
        }
        Ok(())
    }
}
