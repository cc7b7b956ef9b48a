//! Hardware programming interface.
//!
//! Every call targets exactly one chip and either succeeds fully or
//! leaves that chip untouched. Callers are responsible for fan-out
//! across chips and for rollback when a mid-sequence call fails.

use crate::error::NdiResult;
use crate::types::{
    ActionType, ChipId, CounterStats, MatchType, NdiAction, NdiCounterSpec, NdiEntry, NdiFilter,
    NdiObjId, NdiRangeSpec, NdiTableSpec, NdiTrapGroupSpec, NdiTrapSpec, NdiUdfGroupSpec,
    NdiUdfMatchSpec, NdiUdfSpec, PoolCapacity, TableUsage,
};

/// Per-chip ACL programming operations.
///
/// Object handles returned by the `create_*` calls are valid only on the
/// chip they were created on.
pub trait AclNdi: Send + Sync {
    // -- Table ----------------------------------------------------------

    fn create_table(&self, chip: ChipId, spec: &NdiTableSpec) -> NdiResult<NdiObjId>;

    fn delete_table(&self, chip: ChipId, table_id: NdiObjId) -> NdiResult<()>;

    /// Changes the lookup priority of an existing table.
    fn set_table_priority(&self, chip: ChipId, table_id: NdiObjId, priority: u32) -> NdiResult<()>;

    /// Reads the current occupancy of a table.
    fn get_table_usage(&self, chip: ChipId, table_id: NdiObjId) -> NdiResult<TableUsage>;

    /// Reads the chip-level ACL pool capacities.
    fn get_pool_capacities(&self, chip: ChipId) -> NdiResult<Vec<PoolCapacity>>;

    // -- Entry ----------------------------------------------------------

    fn create_entry(&self, chip: ChipId, entry: &NdiEntry) -> NdiResult<NdiObjId>;

    fn delete_entry(&self, chip: ChipId, entry_id: NdiObjId) -> NdiResult<()>;

    fn set_entry_priority(&self, chip: ChipId, entry_id: NdiObjId, priority: u32) -> NdiResult<()>;

    /// Installs or overwrites one match field on an existing entry.
    fn set_entry_filter(&self, chip: ChipId, entry_id: NdiObjId, filter: &NdiFilter)
        -> NdiResult<()>;

    /// Removes one match field from an existing entry.
    fn disable_entry_filter(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        match_type: MatchType,
    ) -> NdiResult<()>;

    /// Installs or overwrites one action on an existing entry.
    fn set_entry_action(&self, chip: ChipId, entry_id: NdiObjId, action: &NdiAction)
        -> NdiResult<()>;

    /// Removes one action from an existing entry.
    fn disable_entry_action(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        action_type: ActionType,
    ) -> NdiResult<()>;

    // -- Counter --------------------------------------------------------

    fn create_counter(&self, chip: ChipId, spec: &NdiCounterSpec) -> NdiResult<NdiObjId>;

    fn delete_counter(&self, chip: ChipId, counter_id: NdiObjId) -> NdiResult<()>;

    fn get_counter_stats(&self, chip: ChipId, counter_id: NdiObjId) -> NdiResult<CounterStats>;

    /// Overwrites the hardware count values, used to clear counters.
    fn set_counter_stats(
        &self,
        chip: ChipId,
        counter_id: NdiObjId,
        stats: CounterStats,
    ) -> NdiResult<()>;

    // -- Range ----------------------------------------------------------

    fn create_range(&self, chip: ChipId, spec: &NdiRangeSpec) -> NdiResult<NdiObjId>;

    fn delete_range(&self, chip: ChipId, range_id: NdiObjId) -> NdiResult<()>;

    // -- UDF ------------------------------------------------------------

    fn create_udf_group(&self, chip: ChipId, spec: &NdiUdfGroupSpec) -> NdiResult<NdiObjId>;

    fn delete_udf_group(&self, chip: ChipId, group_id: NdiObjId) -> NdiResult<()>;

    fn create_udf_match(&self, chip: ChipId, spec: &NdiUdfMatchSpec) -> NdiResult<NdiObjId>;

    fn delete_udf_match(&self, chip: ChipId, match_id: NdiObjId) -> NdiResult<()>;

    fn create_udf(&self, chip: ChipId, spec: &NdiUdfSpec) -> NdiResult<NdiObjId>;

    fn delete_udf(&self, chip: ChipId, udf_id: NdiObjId) -> NdiResult<()>;

    // -- CPU trap -------------------------------------------------------

    fn create_trap_group(&self, chip: ChipId, spec: &NdiTrapGroupSpec) -> NdiResult<NdiObjId>;

    fn delete_trap_group(&self, chip: ChipId, group_id: NdiObjId) -> NdiResult<()>;

    fn set_trap_group_queue(&self, chip: ChipId, group_id: NdiObjId, queue: u32) -> NdiResult<()>;

    fn create_trap(&self, chip: ChipId, spec: &NdiTrapSpec) -> NdiResult<NdiObjId>;

    fn delete_trap(&self, chip: ChipId, trap_id: NdiObjId) -> NdiResult<()>;

    fn set_trap_group_binding(
        &self,
        chip: ChipId,
        trap_id: NdiObjId,
        group_id: Option<NdiObjId>,
    ) -> NdiResult<()>;
}
