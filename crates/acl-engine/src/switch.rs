//! Per-device aggregate.
//!
//! A `Switch` owns the table container (each table owning its entries and
//! counters), the switch-scoped range/UDF/trap containers, every id space,
//! the lazily-populated pool-capacity cache, and the interface rebind
//! index. All CRUD dispatch funnels through here so that reference counts
//! and rebind registrations stay in step with hardware state.
//!
//! Callers serialize requests against one switch externally; only the
//! rebind index carries its own lock, because the remap event path can
//! race an in-flight modify.

use crate::action::Action;
use crate::counter::{Counter, CounterSpec};
use crate::entry::{Entry, EntryCtx};
use crate::error::{AclError, AclResult};
use crate::filter::{Filter, FilterKey};
use crate::range::{Range, RangeSpec};
use crate::rebind::{RebindIndex, RuleRef};
use crate::table::{Table, TableSpec};
use crate::trap::{Trap, TrapGroup, TrapGroupSpec, TrapSpec};
use crate::types::{
    ActionType, ChipSet, CounterId, EntryId, MatchType, RangeId, SwitchId, TableId, TrapGroupId,
    TrapId, UdfGroupId, UdfId, UdfMatchId, MAX_RANGE_ID, MAX_TABLE_ID, MAX_TRAP_GROUP_ID,
    MAX_TRAP_ID, MAX_UDF_GROUP_ID, MAX_UDF_ID, MAX_UDF_MATCH_ID,
};
use crate::udf::{Udf, UdfGroup, UdfGroupSpec, UdfMatch, UdfMatchSpec, UdfSpec};
use crate::value::Value;
use acl_common::{IdGenerator, IntfMapper, MappingEvent, ObjMap, RefCounted};
use acl_ndi::{AclNdi, ChipId, CounterStats, NdiObjId, PoolCapacity, TableUsage};
use log::{debug, error, warn};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// The object references one entry holds, used to keep reference counts
/// in step across create/modify/delete.
#[derive(Debug, Default, Clone, PartialEq)]
struct EntryRefs {
    counter: Option<CounterId>,
    ranges: Vec<RangeId>,
    trap: Option<TrapId>,
}

impl EntryRefs {
    fn of(entry: &Entry) -> Self {
        let mut ranges = entry.range_refs();
        ranges.sort_unstable();
        Self {
            counter: entry.counter_ref(),
            ranges,
            trap: entry.trap_ref(),
        }
    }
}

/// One device's ACL state.
pub struct Switch {
    switch_id: SwitchId,
    chips: ChipSet,
    ndi: Arc<dyn AclNdi>,
    mapper: Arc<dyn IntfMapper>,
    tables: ObjMap<TableId, Table>,
    ranges: ObjMap<RangeId, Range>,
    udf_groups: ObjMap<UdfGroupId, UdfGroup>,
    udf_matches: ObjMap<UdfMatchId, UdfMatch>,
    udfs: ObjMap<UdfId, Udf>,
    trap_groups: ObjMap<TrapGroupId, TrapGroup>,
    traps: ObjMap<TrapId, Trap>,
    table_ids: IdGenerator,
    range_ids: IdGenerator,
    udf_group_ids: IdGenerator,
    udf_match_ids: IdGenerator,
    udf_ids: IdGenerator,
    trap_group_ids: IdGenerator,
    trap_ids: IdGenerator,
    pool_cache: OnceCell<BTreeMap<ChipId, Vec<PoolCapacity>>>,
    rebind: Mutex<RebindIndex>,
}

impl Switch {
    pub fn new(
        switch_id: SwitchId,
        chips: ChipSet,
        ndi: Arc<dyn AclNdi>,
        mapper: Arc<dyn IntfMapper>,
    ) -> Self {
        Self {
            switch_id,
            chips,
            ndi,
            mapper,
            tables: ObjMap::new(),
            ranges: ObjMap::new(),
            udf_groups: ObjMap::new(),
            udf_matches: ObjMap::new(),
            udfs: ObjMap::new(),
            trap_groups: ObjMap::new(),
            traps: ObjMap::new(),
            table_ids: IdGenerator::new("acl-table", MAX_TABLE_ID),
            range_ids: IdGenerator::new("acl-range", MAX_RANGE_ID),
            udf_group_ids: IdGenerator::new("udf-group", MAX_UDF_GROUP_ID),
            udf_match_ids: IdGenerator::new("udf-match", MAX_UDF_MATCH_ID),
            udf_ids: IdGenerator::new("udf", MAX_UDF_ID),
            trap_group_ids: IdGenerator::new("trap-group", MAX_TRAP_GROUP_ID),
            trap_ids: IdGenerator::new("trap", MAX_TRAP_ID),
            pool_cache: OnceCell::new(),
            rebind: Mutex::new(RebindIndex::new()),
        }
    }

    pub fn switch_id(&self) -> SwitchId {
        self.switch_id
    }

    pub fn chips(&self) -> &ChipSet {
        &self.chips
    }

    pub fn tables(&self) -> &ObjMap<TableId, Table> {
        &self.tables
    }

    pub fn ranges(&self) -> &ObjMap<RangeId, Range> {
        &self.ranges
    }

    pub fn traps(&self) -> &ObjMap<TrapId, Trap> {
        &self.traps
    }

    pub fn trap_groups(&self) -> &ObjMap<TrapGroupId, TrapGroup> {
        &self.trap_groups
    }

    pub fn udf_groups(&self) -> &ObjMap<UdfGroupId, UdfGroup> {
        &self.udf_groups
    }

    fn rebind_lock(&self) -> MutexGuard<'_, RebindIndex> {
        match self.rebind.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -- Lookup helpers -------------------------------------------------

    pub fn find_table(&self, table_id: TableId) -> AclResult<&Table> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| AclError::not_found(format!("table {}", table_id)))
    }

    pub fn find_table_mut(&mut self, table_id: TableId) -> AclResult<&mut Table> {
        self.tables
            .get_mut(&table_id)
            .ok_or_else(|| AclError::not_found(format!("table {}", table_id)))
    }

    /// Non-throwing table lookup by configured name.
    pub fn find_table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.values().find(|t| t.name() == Some(name))
    }

    pub fn find_entry(&self, table_id: TableId, entry_id: EntryId) -> AclResult<&Entry> {
        self.find_table(table_id)?
            .entries()
            .get(&entry_id)
            .ok_or_else(|| {
                AclError::not_found(format!("entry {} in table {}", entry_id, table_id))
            })
    }

    pub fn find_counter(&self, table_id: TableId, counter_id: CounterId) -> AclResult<&Counter> {
        self.find_table(table_id)?
            .counters()
            .get(&counter_id)
            .ok_or_else(|| {
                AclError::not_found(format!("counter {} in table {}", counter_id, table_id))
            })
    }

    pub fn find_range(&self, range_id: RangeId) -> AclResult<&Range> {
        self.ranges
            .get(&range_id)
            .ok_or_else(|| AclError::not_found(format!("range {}", range_id)))
    }

    // -- Tables ---------------------------------------------------------

    /// Creates a table, programs it on its chips, and returns its id.
    pub fn create_table(&mut self, spec: &TableSpec, reserve: Option<TableId>) -> AclResult<TableId> {
        let guard = match reserve {
            Some(id) => self.table_ids.guard_reserve(id.raw())?,
            None => self.table_ids.guard_alloc()?,
        };
        let table_id = TableId(guard.id());
        let mut table = Table::new(table_id, spec, &self.chips)?;

        let mut group_handles: BTreeMap<UdfGroupId, BTreeMap<ChipId, NdiObjId>> = BTreeMap::new();
        for group_id in table.udf_group_ids() {
            let group = self
                .udf_groups
                .get(group_id)
                .ok_or_else(|| AclError::not_found(format!("UDF group {}", group_id)))?;
            group_handles.insert(*group_id, group.ndi_handles().clone());
        }

        table.create_in_hw(&*self.ndi, &group_handles)?;

        for group_id in table.udf_group_ids().to_vec() {
            if self.udf_groups.increment_ref(&group_id).is_err() {
                error!("UDF group {} vanished while referencing it", group_id);
            }
        }
        debug!("Created table {} on switch {}", table_id, self.switch_id);
        self.tables.insert(table_id, table);
        guard.unguard();
        Ok(table_id)
    }

    /// Deletes a table and discards its entries and counters.
    pub fn delete_table(&mut self, table_id: TableId) -> AclResult<()> {
        let mut table = self
            .tables
            .remove(&table_id)
            .ok_or_else(|| AclError::not_found(format!("table {}", table_id)))?;

        let result = self.teardown_table(&mut table);
        if let Err(e) = result {
            self.tables.insert(table_id, table);
            return Err(e);
        }

        for group_id in table.udf_group_ids().to_vec() {
            if self.udf_groups.decrement_ref(&group_id).is_err() {
                error!("UDF group {} refcount out of step on table delete", group_id);
            }
        }
        self.table_ids.release(table_id.raw());
        debug!("Deleted table {} on switch {}", table_id, self.switch_id);
        Ok(())
    }

    fn teardown_table(&mut self, table: &mut Table) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        let table_id = table.table_id();
        let chips = table.chips().clone();
        let handles = table.ndi_handles().clone();
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        let entry_ids: Vec<EntryId> = table.entries().keys().copied().collect();
        for entry_id in entry_ids {
            let mut entry = match table.entries_mut().remove(&entry_id) {
                Some(e) => e,
                None => continue,
            };
            if let Err(e) = entry.delete_from_hw(&ctx) {
                table.entries_mut().insert(entry_id, entry);
                return Err(e);
            }
            let refs = EntryRefs::of(&entry);
            self.drop_switch_refs(&refs);
            self.rebind_lock().deregister_entry(table_id, entry_id);
        }
        let counter_ids: Vec<CounterId> = table.counters().keys().copied().collect();
        for counter_id in counter_ids {
            let mut counter = match table.counters_mut().remove(&counter_id) {
                Some(c) => c,
                None => continue,
            };
            if let Err(e) = counter.delete_from_hw(&*ndi) {
                table.counters_mut().insert(counter_id, counter);
                return Err(e);
            }
        }
        table.delete_from_hw(&*ndi)
    }

    pub fn set_table_priority(&mut self, table_id: TableId, priority: u32) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        self.find_table_mut(table_id)?.set_priority(&*ndi, priority)
    }

    pub fn get_table_usage(&self, table_id: TableId, chip: ChipId) -> AclResult<TableUsage> {
        self.find_table(table_id)?.get_usage(&*self.ndi, chip)
    }

    /// Per-chip ACL pool capacities, fetched from every chip once and
    /// cached for the switch's lifetime.
    pub fn pool_capacities(&self, chip: ChipId) -> AclResult<Vec<PoolCapacity>> {
        let cache = self.pool_cache.get_or_try_init(|| {
            let mut map = BTreeMap::new();
            for chip in self.chips.iter() {
                map.insert(chip, self.ndi.get_pool_capacities(chip)?);
            }
            Ok::<_, AclError>(map)
        })?;
        cache
            .get(&chip)
            .cloned()
            .ok_or_else(|| AclError::not_found(format!("chip {} pool info", chip)))
    }

    // -- Entries --------------------------------------------------------

    /// Creates an entry from its parts and installs it on every eligible
    /// chip; all-or-nothing across chips.
    pub fn create_entry(
        &mut self,
        table_id: TableId,
        priority: u32,
        own_chips: Option<ChipSet>,
        filters: Vec<Filter>,
        actions: Vec<Action>,
        reserve: Option<EntryId>,
    ) -> AclResult<EntryId> {
        let ndi = Arc::clone(&self.ndi);
        let mapper = Arc::clone(&self.mapper);

        let guard = {
            let table = self.find_table(table_id)?;
            for filter in &filters {
                self.check_filter_against_table(table, filter)?;
            }
            match reserve {
                Some(id) => table.entry_ids().guard_reserve(id.raw())?,
                None => table.entry_ids().guard_alloc()?,
            }
        };
        let entry_id = EntryId(guard.id());

        let mut entry = Entry::new(entry_id, table_id, priority);
        if let Some(chips) = own_chips {
            entry.set_own_chips(chips);
        }
        for filter in filters {
            entry.add_filter(filter)?;
        }
        for action in actions {
            entry.add_action(action)?;
        }
        entry.resolve_ports(&*mapper)?;
        {
            let table = self.find_table(table_id)?;
            self.resolve_entry_refs(table, &mut entry)?;
        }

        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        entry.create_in_hw(&ctx)?;

        // Hardware committed; everything below is bookkeeping and must
        // not fail the request.
        let refs = EntryRefs::of(&entry);
        self.register_entry_rebind(table_id, &entry);
        self.add_refs(table_id, &refs);
        self.find_table_mut(table_id)?
            .entries_mut()
            .insert(entry_id, entry);
        guard.unguard();
        debug!("Created entry {} in table {}", entry_id, table_id);
        Ok(entry_id)
    }

    /// Full-replace modify. Returns the previous entry so the transport
    /// can undo a multi-object transaction later.
    pub fn modify_entry(
        &mut self,
        table_id: TableId,
        entry_id: EntryId,
        priority: u32,
        own_chips: Option<ChipSet>,
        filters: Vec<Filter>,
        actions: Vec<Action>,
    ) -> AclResult<Entry> {
        let ndi = Arc::clone(&self.ndi);
        let mapper = Arc::clone(&self.mapper);

        let mut desired = Entry::new(entry_id, table_id, priority);
        if let Some(chips) = own_chips {
            desired.set_own_chips(chips);
        }
        {
            let table = self.find_table(table_id)?;
            for filter in &filters {
                self.check_filter_against_table(table, filter)?;
            }
        }
        for filter in filters {
            desired.add_filter(filter)?;
        }
        for action in actions {
            desired.add_action(action)?;
        }
        desired.resolve_ports(&*mapper)?;
        {
            let table = self.find_table(table_id)?;
            self.resolve_entry_refs(table, &mut desired)?;
        }

        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        let entry = self.entry_mut(table_id, entry_id)?;
        let old_refs = EntryRefs::of(entry);
        let previous = entry.apply_modify(desired, &ctx)?;

        let new_refs = EntryRefs::of(self.find_entry(table_id, entry_id)?);
        self.sync_refs(table_id, &old_refs, &new_refs);
        let entry_view = self.find_entry(table_id, entry_id)?.clone();
        self.register_entry_rebind(table_id, &entry_view);
        Ok(previous)
    }

    /// Incremental update of one filter; `None` removes it. Returns the
    /// filter's prior value, absent if it was newly added.
    pub fn update_entry_filter(
        &mut self,
        table_id: TableId,
        entry_id: EntryId,
        key: FilterKey,
        mut new: Option<Filter>,
    ) -> AclResult<Option<Filter>> {
        let ndi = Arc::clone(&self.ndi);
        let mapper = Arc::clone(&self.mapper);

        if let Some(filter) = &mut new {
            {
                let table = self.find_table(table_id)?;
                self.check_filter_against_table(table, filter)?;
            }
            filter.resolve_ports(&*mapper)?;
            let table = self.find_table(table_id)?;
            self.resolve_filter_refs(table, filter)?;
        }

        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        let entry = self.entry_mut(table_id, entry_id)?;
        let old_refs = EntryRefs::of(entry);
        let previous = entry.update_filter(key, new, &ctx)?;

        let new_refs = EntryRefs::of(self.find_entry(table_id, entry_id)?);
        self.sync_refs(table_id, &old_refs, &new_refs);
        let entry_view = self.find_entry(table_id, entry_id)?.clone();
        self.register_entry_rebind(table_id, &entry_view);
        Ok(previous)
    }

    /// Incremental update of one action; `None` removes it.
    pub fn update_entry_action(
        &mut self,
        table_id: TableId,
        entry_id: EntryId,
        action_type: ActionType,
        mut new: Option<Action>,
    ) -> AclResult<Option<Action>> {
        let ndi = Arc::clone(&self.ndi);
        let mapper = Arc::clone(&self.mapper);

        if let Some(action) = &mut new {
            action.resolve_ports(&*mapper)?;
            let table = self.find_table(table_id)?;
            self.resolve_action_refs(table, action)?;
        }

        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        let entry = self.entry_mut(table_id, entry_id)?;
        let old_refs = EntryRefs::of(entry);
        let previous = entry.update_action(action_type, new, &ctx)?;

        let new_refs = EntryRefs::of(self.find_entry(table_id, entry_id)?);
        self.sync_refs(table_id, &old_refs, &new_refs);
        let entry_view = self.find_entry(table_id, entry_id)?.clone();
        self.register_entry_rebind(table_id, &entry_view);
        Ok(previous)
    }

    /// Leaf-attribute update of an entry's priority. Returns the prior
    /// value.
    pub fn set_entry_priority(
        &mut self,
        table_id: TableId,
        entry_id: EntryId,
        priority: u32,
    ) -> AclResult<u32> {
        let ndi = Arc::clone(&self.ndi);
        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        self.entry_mut(table_id, entry_id)?.set_priority(priority, &ctx)
    }

    /// Deletes an entry, releasing its object references and rebind
    /// registrations.
    pub fn delete_entry(&mut self, table_id: TableId, entry_id: EntryId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        let (chips, handles) = self.table_ctx(table_id)?;
        let ctx = EntryCtx {
            ndi: &*ndi,
            table_chips: &chips,
            table_handles: &handles,
        };
        let entry = self.entry_mut(table_id, entry_id)?;
        entry.delete_from_hw(&ctx)?;

        let entry = self
            .find_table_mut(table_id)?
            .entries_mut()
            .remove(&entry_id)
            .ok_or_else(|| AclError::internal("entry vanished during delete"))?;
        let refs = EntryRefs::of(&entry);
        self.drop_refs(table_id, &refs);
        self.rebind_lock().deregister_entry(table_id, entry_id);
        self.find_table(table_id)?.entry_ids().release(entry_id.raw());
        debug!("Deleted entry {} from table {}", entry_id, table_id);
        Ok(())
    }

    // -- Counters -------------------------------------------------------

    pub fn create_counter(
        &mut self,
        spec: &CounterSpec,
        reserve: Option<CounterId>,
    ) -> AclResult<CounterId> {
        let ndi = Arc::clone(&self.ndi);
        let (guard, chips, handles) = {
            let table = self.find_table(spec.table_id)?;
            let guard = match reserve {
                Some(id) => table.counter_ids().guard_reserve(id.raw())?,
                None => table.counter_ids().guard_alloc()?,
            };
            (guard, table.chips().clone(), table.ndi_handles().clone())
        };
        let counter_id = CounterId(guard.id());
        let mut counter = Counter::new(counter_id, spec, chips)?;
        counter.create_in_hw(&*ndi, &handles)?;
        self.find_table_mut(spec.table_id)?
            .counters_mut()
            .insert(counter_id, counter);
        guard.unguard();
        debug!("Created counter {} in table {}", counter_id, spec.table_id);
        Ok(counter_id)
    }

    /// Deletes a counter; fails "in use" while entries reference it.
    pub fn delete_counter(&mut self, table_id: TableId, counter_id: CounterId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let counter = self.find_counter(table_id, counter_id)?;
            if !counter.is_unused() {
                return Err(AclError::InUse(format!(
                    "counter {} has {} references",
                    counter_id,
                    counter.ref_count()
                )));
            }
        }
        let table = self.find_table_mut(table_id)?;
        let mut counter = table
            .counters_mut()
            .remove(&counter_id)
            .ok_or_else(|| AclError::internal("counter vanished during delete"))?;
        if let Err(e) = counter.delete_from_hw(&*ndi) {
            self.find_table_mut(table_id)?
                .counters_mut()
                .insert(counter_id, counter);
            return Err(e);
        }
        self.find_table(table_id)?
            .counter_ids()
            .release(counter_id.raw());
        Ok(())
    }

    /// Counter readout, summed across its chips.
    pub fn get_counter_stats(
        &self,
        table_id: TableId,
        counter_id: CounterId,
    ) -> AclResult<CounterStats> {
        self.find_counter(table_id, counter_id)?.get_stats(&*self.ndi)
    }

    /// Zeroes a counter on every chip.
    pub fn clear_counter_stats(&self, table_id: TableId, counter_id: CounterId) -> AclResult<()> {
        self.find_counter(table_id, counter_id)?
            .set_stats(&*self.ndi, CounterStats::default())
    }

    // -- Ranges ---------------------------------------------------------

    pub fn create_range(&mut self, spec: &RangeSpec, reserve: Option<RangeId>) -> AclResult<RangeId> {
        let ndi = Arc::clone(&self.ndi);
        let guard = match reserve {
            Some(id) => self.range_ids.guard_reserve(id.raw())?,
            None => self.range_ids.guard_alloc()?,
        };
        let range_id = RangeId(guard.id());
        let mut range = Range::new(range_id, spec, self.chips.clone())?;
        range.create_in_hw(&*ndi)?;
        self.ranges.insert(range_id, range);
        guard.unguard();
        Ok(range_id)
    }

    /// Deletes a range; fails "in use" while entries reference it.
    pub fn delete_range(&mut self, range_id: RangeId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let range = self.find_range(range_id)?;
            if !range.is_unused() {
                return Err(AclError::InUse(format!(
                    "range {} has {} references",
                    range_id,
                    range.ref_count()
                )));
            }
        }
        let mut range = self
            .ranges
            .remove(&range_id)
            .ok_or_else(|| AclError::internal("range vanished during delete"))?;
        if let Err(e) = range.delete_from_hw(&*ndi) {
            self.ranges.insert(range_id, range);
            return Err(e);
        }
        self.range_ids.release(range_id.raw());
        Ok(())
    }

    // -- UDF objects ----------------------------------------------------

    pub fn create_udf_group(
        &mut self,
        spec: &UdfGroupSpec,
        reserve: Option<UdfGroupId>,
    ) -> AclResult<UdfGroupId> {
        let ndi = Arc::clone(&self.ndi);
        let guard = match reserve {
            Some(id) => self.udf_group_ids.guard_reserve(id.raw())?,
            None => self.udf_group_ids.guard_alloc()?,
        };
        let group_id = UdfGroupId(guard.id());
        let mut group = UdfGroup::new(group_id, spec, self.chips.clone())?;
        group.create_in_hw(&*ndi)?;
        self.udf_groups.insert(group_id, group);
        guard.unguard();
        Ok(group_id)
    }

    pub fn delete_udf_group(&mut self, group_id: UdfGroupId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let group = self
                .udf_groups
                .get(&group_id)
                .ok_or_else(|| AclError::not_found(format!("UDF group {}", group_id)))?;
            if !group.is_unused() {
                return Err(AclError::InUse(format!(
                    "UDF group {} has {} references",
                    group_id,
                    group.ref_count()
                )));
            }
        }
        let mut group = self
            .udf_groups
            .remove(&group_id)
            .ok_or_else(|| AclError::internal("UDF group vanished during delete"))?;
        if let Err(e) = group.delete_from_hw(&*ndi) {
            self.udf_groups.insert(group_id, group);
            return Err(e);
        }
        self.udf_group_ids.release(group_id.raw());
        Ok(())
    }

    pub fn create_udf_match(
        &mut self,
        spec: UdfMatchSpec,
        reserve: Option<UdfMatchId>,
    ) -> AclResult<UdfMatchId> {
        let ndi = Arc::clone(&self.ndi);
        let guard = match reserve {
            Some(id) => self.udf_match_ids.guard_reserve(id.raw())?,
            None => self.udf_match_ids.guard_alloc()?,
        };
        let match_id = UdfMatchId(guard.id());
        let mut udf_match = UdfMatch::new(match_id, spec, self.chips.clone());
        udf_match.create_in_hw(&*ndi)?;
        self.udf_matches.insert(match_id, udf_match);
        guard.unguard();
        Ok(match_id)
    }

    pub fn delete_udf_match(&mut self, match_id: UdfMatchId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let udf_match = self
                .udf_matches
                .get(&match_id)
                .ok_or_else(|| AclError::not_found(format!("UDF match {}", match_id)))?;
            if !udf_match.is_unused() {
                return Err(AclError::InUse(format!(
                    "UDF match {} has {} references",
                    match_id,
                    udf_match.ref_count()
                )));
            }
        }
        let mut udf_match = self
            .udf_matches
            .remove(&match_id)
            .ok_or_else(|| AclError::internal("UDF match vanished during delete"))?;
        if let Err(e) = udf_match.delete_from_hw(&*ndi) {
            self.udf_matches.insert(match_id, udf_match);
            return Err(e);
        }
        self.udf_match_ids.release(match_id.raw());
        Ok(())
    }

    pub fn create_udf(&mut self, spec: &UdfSpec, reserve: Option<UdfId>) -> AclResult<UdfId> {
        let ndi = Arc::clone(&self.ndi);
        let (group_handles, match_handles) = {
            let group = self
                .udf_groups
                .get(&spec.group_id)
                .ok_or_else(|| AclError::not_found(format!("UDF group {}", spec.group_id)))?;
            let udf_match = self
                .udf_matches
                .get(&spec.match_id)
                .ok_or_else(|| AclError::not_found(format!("UDF match {}", spec.match_id)))?;
            (group.ndi_handles().clone(), udf_match.ndi_handles().clone())
        };
        let guard = match reserve {
            Some(id) => self.udf_ids.guard_reserve(id.raw())?,
            None => self.udf_ids.guard_alloc()?,
        };
        let udf_id = UdfId(guard.id());
        let mut udf = Udf::new(udf_id, spec, self.chips.clone());
        udf.create_in_hw(&*ndi, &group_handles, &match_handles)?;
        if self.udf_groups.increment_ref(&spec.group_id).is_err() {
            error!("UDF group {} vanished while referencing it", spec.group_id);
        }
        if self.udf_matches.increment_ref(&spec.match_id).is_err() {
            error!("UDF match {} vanished while referencing it", spec.match_id);
        }
        self.udfs.insert(udf_id, udf);
        guard.unguard();
        Ok(udf_id)
    }

    pub fn delete_udf(&mut self, udf_id: UdfId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        let mut udf = self
            .udfs
            .remove(&udf_id)
            .ok_or_else(|| AclError::not_found(format!("UDF {}", udf_id)))?;
        if let Err(e) = udf.delete_from_hw(&*ndi) {
            self.udfs.insert(udf_id, udf);
            return Err(e);
        }
        if self.udf_groups.decrement_ref(&udf.group_id()).is_err() {
            error!("UDF group {} refcount out of step", udf.group_id());
        }
        if self.udf_matches.decrement_ref(&udf.match_id()).is_err() {
            error!("UDF match {} refcount out of step", udf.match_id());
        }
        self.udf_ids.release(udf_id.raw());
        Ok(())
    }

    // -- Traps ----------------------------------------------------------

    pub fn create_trap_group(
        &mut self,
        spec: &TrapGroupSpec,
        reserve: Option<TrapGroupId>,
    ) -> AclResult<TrapGroupId> {
        let ndi = Arc::clone(&self.ndi);
        let guard = match reserve {
            Some(id) => self.trap_group_ids.guard_reserve(id.raw())?,
            None => self.trap_group_ids.guard_alloc()?,
        };
        let group_id = TrapGroupId(guard.id());
        let mut group = TrapGroup::new(group_id, spec, self.chips.clone());
        group.create_in_hw(&*ndi)?;
        self.trap_groups.insert(group_id, group);
        guard.unguard();
        Ok(group_id)
    }

    pub fn delete_trap_group(&mut self, group_id: TrapGroupId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let group = self
                .trap_groups
                .get(&group_id)
                .ok_or_else(|| AclError::not_found(format!("trap group {}", group_id)))?;
            if !group.is_unused() {
                return Err(AclError::InUse(format!(
                    "trap group {} has {} references",
                    group_id,
                    group.ref_count()
                )));
            }
        }
        let mut group = self
            .trap_groups
            .remove(&group_id)
            .ok_or_else(|| AclError::internal("trap group vanished during delete"))?;
        if let Err(e) = group.delete_from_hw(&*ndi) {
            self.trap_groups.insert(group_id, group);
            return Err(e);
        }
        self.trap_group_ids.release(group_id.raw());
        Ok(())
    }

    pub fn set_trap_group_queue(&mut self, group_id: TrapGroupId, queue: u32) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        self.trap_groups
            .get_mut(&group_id)
            .ok_or_else(|| AclError::not_found(format!("trap group {}", group_id)))?
            .set_cpu_queue(&*ndi, queue)
    }

    pub fn create_trap(&mut self, spec: &TrapSpec, reserve: Option<TrapId>) -> AclResult<TrapId> {
        let ndi = Arc::clone(&self.ndi);
        let group_handles = match spec.group_id {
            Some(group_id) => Some(
                self.trap_groups
                    .get(&group_id)
                    .ok_or_else(|| AclError::not_found(format!("trap group {}", group_id)))?
                    .ndi_handles()
                    .clone(),
            ),
            None => None,
        };
        let guard = match reserve {
            Some(id) => self.trap_ids.guard_reserve(id.raw())?,
            None => self.trap_ids.guard_alloc()?,
        };
        let trap_id = TrapId(guard.id());
        let mut trap = Trap::new(trap_id, spec, self.chips.clone());
        trap.create_in_hw(&*ndi, group_handles.as_ref())?;
        if let Some(group_id) = spec.group_id {
            if self.trap_groups.increment_ref(&group_id).is_err() {
                error!("Trap group {} vanished while referencing it", group_id);
            }
        }
        self.traps.insert(trap_id, trap);
        guard.unguard();
        Ok(trap_id)
    }

    /// Moves a trap to a different group (or detaches it), adjusting the
    /// group reference counts.
    pub fn set_trap_group(
        &mut self,
        trap_id: TrapId,
        group_id: Option<TrapGroupId>,
    ) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        let group_handles = match group_id {
            Some(gid) => Some(
                self.trap_groups
                    .get(&gid)
                    .ok_or_else(|| AclError::not_found(format!("trap group {}", gid)))?
                    .ndi_handles()
                    .clone(),
            ),
            None => None,
        };
        let trap = self
            .traps
            .get_mut(&trap_id)
            .ok_or_else(|| AclError::not_found(format!("trap {}", trap_id)))?;
        let old_group = trap.group_id();
        if old_group == group_id {
            return Ok(());
        }
        trap.set_group(&*ndi, group_id, group_handles.as_ref())?;
        if let Some(gid) = group_id {
            if self.trap_groups.increment_ref(&gid).is_err() {
                error!("Trap group {} vanished while referencing it", gid);
            }
        }
        if let Some(gid) = old_group {
            if self.trap_groups.decrement_ref(&gid).is_err() {
                error!("Trap group {} refcount out of step", gid);
            }
        }
        Ok(())
    }

    pub fn delete_trap(&mut self, trap_id: TrapId) -> AclResult<()> {
        let ndi = Arc::clone(&self.ndi);
        {
            let trap = self
                .traps
                .get(&trap_id)
                .ok_or_else(|| AclError::not_found(format!("trap {}", trap_id)))?;
            if !trap.is_unused() {
                return Err(AclError::InUse(format!(
                    "trap {} has {} references",
                    trap_id,
                    trap.ref_count()
                )));
            }
        }
        let mut trap = self
            .traps
            .remove(&trap_id)
            .ok_or_else(|| AclError::internal("trap vanished during delete"))?;
        if let Err(e) = trap.delete_from_hw(&*ndi) {
            self.traps.insert(trap_id, trap);
            return Err(e);
        }
        if let Some(group_id) = trap.group_id() {
            if self.trap_groups.decrement_ref(&group_id).is_err() {
                error!("Trap group {} refcount out of step", group_id);
            }
        }
        self.trap_ids.release(trap_id.raw());
        Ok(())
    }

    // -- Interface rebinding --------------------------------------------

    /// Reacts to a port remap: every indexed rule field referencing the
    /// interface is re-resolved and re-pushed on the event's chip.
    /// Per-rule failures are logged; the remaining rules still repush.
    pub fn on_mapping_event(&mut self, event: &MappingEvent) {
        let ndi = Arc::clone(&self.ndi);
        let mapper = Arc::clone(&self.mapper);
        let rules = self.rebind_lock().lookup(event.ifindex);
        if rules.is_empty() {
            return;
        }
        debug!(
            "Interface {} remap on chip {} touches {} rule fields",
            event.ifindex,
            event.chip,
            rules.len()
        );
        for rule in rules {
            let (chips, handles) = match self.table_ctx(rule.table_id) {
                Ok(ctx) => ctx,
                Err(_) => {
                    warn!("Rebind skipped vanished table {}", rule.table_id);
                    continue;
                }
            };
            let ctx = EntryCtx {
                ndi: &*ndi,
                table_chips: &chips,
                table_handles: &handles,
            };
            let entry = match self.entry_mut(rule.table_id, rule.entry_id) {
                Ok(e) => e,
                Err(_) => {
                    warn!(
                        "Rebind skipped vanished entry {} in table {}",
                        rule.entry_id, rule.table_id
                    );
                    continue;
                }
            };
            let result = entry
                .resolve_field_ports(&rule.field, &*mapper)
                .and_then(|()| entry.repush_field(&rule.field, event.chip, &ctx));
            if let Err(e) = result {
                error!(
                    "Rebind of entry {} in table {} on chip {} failed: {}",
                    rule.entry_id, rule.table_id, event.chip, e
                );
            }
        }
    }

    // -- Internals ------------------------------------------------------

    fn table_ctx(&self, table_id: TableId) -> AclResult<(ChipSet, BTreeMap<ChipId, NdiObjId>)> {
        let table = self.find_table(table_id)?;
        Ok((table.chips().clone(), table.ndi_handles().clone()))
    }

    fn entry_mut(&mut self, table_id: TableId, entry_id: EntryId) -> AclResult<&mut Entry> {
        self.find_table_mut(table_id)?
            .entries_mut()
            .get_mut(&entry_id)
            .ok_or_else(|| {
                AclError::not_found(format!("entry {} in table {}", entry_id, table_id))
            })
    }

    fn check_filter_against_table(&self, table: &Table, filter: &Filter) -> AclResult<()> {
        if !table.is_match_allowed(filter.match_type()) {
            return Err(AclError::invalid(format!(
                "match type {} is not allowed by table {}",
                filter.match_type(),
                table.table_id()
            )));
        }
        if filter.match_type() == MatchType::Udf {
            let group_id = filter.key().udf_group_id;
            if !table.udf_group_ids().contains(&group_id) {
                return Err(AclError::inconsistent(format!(
                    "table {} does not reference UDF group {}",
                    table.table_id(),
                    group_id
                )));
            }
            let group = self
                .udf_groups
                .get(&group_id)
                .ok_or_else(|| AclError::not_found(format!("UDF group {}", group_id)))?;
            if let Value::Bytes { data, .. } = filter.value() {
                if data.len() != group.length() as usize {
                    return Err(AclError::LengthMismatch(format!(
                        "UDF filter is {} bytes but group {} extracts {}",
                        data.len(),
                        group_id,
                        group.length()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fills per-chip handle tables of every object-reference field,
    /// validating that the referenced objects exist and belong where the
    /// entry expects them.
    fn resolve_entry_refs(&self, table: &Table, entry: &mut Entry) -> AclResult<()> {
        for filter in entry.filters_mut() {
            self.resolve_filter_refs(table, filter)?;
        }
        for action in entry.actions_mut() {
            self.resolve_action_refs(table, action)?;
        }
        Ok(())
    }

    fn resolve_filter_refs(&self, table: &Table, filter: &mut Filter) -> AclResult<()> {
        if filter.match_type() != MatchType::RangeCheck {
            return Ok(());
        }
        let chips = table.chips().clone();
        if let Value::ObjRefList { ids, handles } = filter.value_mut() {
            handles.clear();
            for &id in ids.iter() {
                let range = self
                    .ranges
                    .get(&RangeId(id))
                    .ok_or_else(|| AclError::not_found(format!("range {}", id)))?;
                for chip in chips.iter() {
                    let handle = range.ndi_handle(chip).ok_or_else(|| {
                        AclError::internal(format!("range {} has no handle on chip {}", id, chip))
                    })?;
                    handles.entry(chip).or_default().push(handle);
                }
            }
        }
        Ok(())
    }

    fn resolve_action_refs(&self, table: &Table, action: &mut Action) -> AclResult<()> {
        if let Some(counter_id) = action.counter_id() {
            let counter = table.counters().get(&counter_id).ok_or_else(|| {
                AclError::not_found(format!(
                    "counter {} in table {}",
                    counter_id,
                    table.table_id()
                ))
            })?;
            if !table.chips().is_subset(counter.chips()) {
                return Err(AclError::inconsistent(format!(
                    "counter {} does not cover the table's chip set",
                    counter_id
                )));
            }
            action.set_obj_handles(counter.ndi_handles().clone())?;
        } else if let Some(trap_id) = action.trap_id() {
            let trap = self
                .traps
                .get(&trap_id)
                .ok_or_else(|| AclError::not_found(format!("trap {}", trap_id)))?;
            action.set_obj_handles(trap.ndi_handles().clone())?;
        }
        Ok(())
    }

    /// Registers (or refreshes) the rebind index rows for one entry.
    /// Link-aggregate indexes resolve via their stable aggregate and are
    /// not indexed.
    fn register_entry_rebind(&self, table_id: TableId, entry: &Entry) {
        let mut index = self.rebind_lock();
        index.deregister_entry(table_id, entry.entry_id());
        for (field, ifindexes) in entry.interface_fields() {
            for ifindex in ifindexes {
                if self.mapper.is_link_aggregate(ifindex) {
                    continue;
                }
                index.register(
                    ifindex,
                    RuleRef {
                        table_id,
                        entry_id: entry.entry_id(),
                        field,
                    },
                );
            }
        }
    }

    fn add_refs(&mut self, table_id: TableId, refs: &EntryRefs) {
        self.sync_refs(table_id, &EntryRefs::default(), refs);
    }

    fn drop_refs(&mut self, table_id: TableId, refs: &EntryRefs) {
        self.sync_refs(table_id, refs, &EntryRefs::default());
    }

    fn drop_switch_refs(&mut self, refs: &EntryRefs) {
        for range_id in &refs.ranges {
            if self.ranges.decrement_ref(range_id).is_err() {
                error!("Range {} refcount out of step", range_id);
            }
        }
        if let Some(trap_id) = refs.trap {
            if self.traps.decrement_ref(&trap_id).is_err() {
                error!("Trap {} refcount out of step", trap_id);
            }
        }
    }

    /// Moves reference counts from an entry's old reference set to its new
    /// one. Runs after hardware commit; anomalies are logged, never
    /// surfaced.
    fn sync_refs(&mut self, table_id: TableId, old: &EntryRefs, new: &EntryRefs) {
        if old.counter != new.counter {
            if let Some(counter_id) = new.counter {
                let outcome = self
                    .tables
                    .get_mut(&table_id)
                    .and_then(|t| t.counters_mut().increment_ref(&counter_id).ok());
                if outcome.is_none() {
                    error!("Counter {} refcount out of step", counter_id);
                }
            }
            if let Some(counter_id) = old.counter {
                let outcome = self
                    .tables
                    .get_mut(&table_id)
                    .and_then(|t| t.counters_mut().decrement_ref(&counter_id).ok());
                if outcome.is_none() {
                    error!("Counter {} refcount out of step", counter_id);
                }
            }
        }
        for range_id in new.ranges.iter().filter(|r| !old.ranges.contains(r)) {
            if self.ranges.increment_ref(range_id).is_err() {
                error!("Range {} refcount out of step", range_id);
            }
        }
        for range_id in old.ranges.iter().filter(|r| !new.ranges.contains(r)) {
            if self.ranges.decrement_ref(range_id).is_err() {
                error!("Range {} refcount out of step", range_id);
            }
        }
        if old.trap != new.trap {
            if let Some(trap_id) = new.trap {
                if self.traps.increment_ref(&trap_id).is_err() {
                    error!("Trap {} refcount out of step", trap_id);
                }
            }
            if let Some(trap_id) = old.trap {
                if self.traps.decrement_ref(&trap_id).is_err() {
                    error!("Trap {} refcount out of step", trap_id);
                }
            }
        }
    }
}

impl std::fmt::Debug for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switch")
            .field("switch_id", &self.switch_id)
            .field("chips", &self.chips)
            .field("tables", &self.tables.len())
            .finish()
    }
}
