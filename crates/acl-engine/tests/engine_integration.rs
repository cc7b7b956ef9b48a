//! End-to-end tests of the ACL engine against a mock hardware layer.
//!
//! The mock NDI keeps a per-chip object store and a call log, and can be
//! told to fail specific operations on specific chips, which is how the
//! all-or-nothing and rollback guarantees are exercised.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use acl_common::{IfIndex, IntfError, IntfMapper, MappingChange, MappingEvent};
use acl_engine::{
    AclError, AclStage, Action, ActionType, ChipInventory, ChipSet, CounterSpec, Filter,
    FilterKey, MatchType, PacketAction, RangeKind, RangeSpec, SwitchId, SwitchList, TableSpec,
    Value,
};
use acl_ndi::{
    AclNdi, ChipId, ChipPort, CounterStats, NdiCounterSpec, NdiEntry, NdiError, NdiFilter,
    NdiFilterValue, NdiObjId, NdiRangeSpec, NdiResult, NdiStatus, NdiTableSpec, NdiTrapGroupSpec,
    NdiTrapSpec,
    NdiUdfGroupSpec, NdiUdfMatchSpec, NdiUdfSpec, PoolCapacity, TableUsage,
};

/// Mock hardware-programming layer.
///
/// Simulates per-chip object stores without real hardware. Objects live
/// in maps keyed by (chip, handle); entry field updates mutate the stored
/// entry record so tests can compare hardware state before and after a
/// failed modify.
#[derive(Default)]
struct HwState {
    next_oid: u64,
    tables: BTreeMap<(ChipId, NdiObjId), NdiTableSpec>,
    entries: BTreeMap<(ChipId, NdiObjId), NdiEntry>,
    counters: BTreeMap<(ChipId, NdiObjId), CounterStats>,
    ranges: BTreeMap<(ChipId, NdiObjId), NdiRangeSpec>,
    udf_groups: BTreeMap<(ChipId, NdiObjId), NdiUdfGroupSpec>,
    udf_matches: BTreeMap<(ChipId, NdiObjId), NdiUdfMatchSpec>,
    udfs: BTreeMap<(ChipId, NdiObjId), NdiUdfSpec>,
    trap_groups: BTreeMap<(ChipId, NdiObjId), NdiTrapGroupSpec>,
    traps: BTreeMap<(ChipId, NdiObjId), NdiTrapSpec>,
    calls: Vec<String>,
    fail_on: HashSet<(String, u32)>,
}

#[derive(Default)]
struct MockNdi {
    state: Mutex<HwState>,
}

impl MockNdi {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every future `op` call on `chip` fail.
    fn fail_on(&self, op: &str, chip: u32) {
        self.state
            .lock()
            .unwrap()
            .fail_on
            .insert((op.to_string(), chip));
    }

    fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    fn table_count(&self) -> usize {
        self.state.lock().unwrap().tables.len()
    }

    fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    fn entry_count_on(&self, chip: u32) -> usize {
        self.state
            .lock()
            .unwrap()
            .entries
            .keys()
            .filter(|(c, _)| c.0 == chip)
            .count()
    }

    fn counter_count(&self) -> usize {
        self.state.lock().unwrap().counters.len()
    }

    fn range_count(&self) -> usize {
        self.state.lock().unwrap().ranges.len()
    }

    fn entries_snapshot(&self) -> BTreeMap<(ChipId, NdiObjId), NdiEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    fn entries_on(&self, chip: u32) -> Vec<NdiEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|((c, _), _)| c.0 == chip)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn set_counter_value(&self, chip: u32, handle: NdiObjId, stats: CounterStats) {
        self.state
            .lock()
            .unwrap()
            .counters
            .insert((ChipId(chip), handle), stats);
    }

    fn calls_matching(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Records the call, applies any programmed failure, and hands the
    /// state to `f`.
    fn step<T>(
        &self,
        op: &str,
        chip: ChipId,
        f: impl FnOnce(&mut HwState) -> T,
    ) -> NdiResult<T> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{}@{}", op, chip.0));
        if state.fail_on.contains(&(op.to_string(), chip.0)) {
            return Err(NdiError::on_chip(chip.0, NdiStatus::Failure));
        }
        Ok(f(&mut state))
    }

    fn alloc_oid(state: &mut HwState) -> NdiObjId {
        state.next_oid += 1;
        NdiObjId(state.next_oid)
    }
}

impl AclNdi for MockNdi {
    fn create_table(&self, chip: ChipId, spec: &NdiTableSpec) -> NdiResult<NdiObjId> {
        self.step("create_table", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.tables.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_table(&self, chip: ChipId, table_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_table", chip, |s| {
            s.tables.remove(&(chip, table_id));
        })
    }

    fn set_table_priority(&self, chip: ChipId, table_id: NdiObjId, priority: u32) -> NdiResult<()> {
        self.step("set_table_priority", chip, |s| {
            if let Some(t) = s.tables.get_mut(&(chip, table_id)) {
                t.priority = priority;
            }
        })
    }

    fn get_table_usage(&self, chip: ChipId, _table_id: NdiObjId) -> NdiResult<TableUsage> {
        self.step("get_table_usage", chip, |s| {
            let used = s.entries.keys().filter(|(c, _)| *c == chip).count() as u32;
            TableUsage {
                used_entries: used,
                free_entries: 1024 - used,
            }
        })
    }

    fn get_pool_capacities(&self, chip: ChipId) -> NdiResult<Vec<PoolCapacity>> {
        self.step("get_pool_capacities", chip, |_| {
            vec![PoolCapacity {
                pool_id: NdiObjId(0xa0),
                stage: AclStage::Ingress,
                total_entries: 2048,
                used_entries: 0,
            }]
        })
    }

    fn create_entry(&self, chip: ChipId, entry: &NdiEntry) -> NdiResult<NdiObjId> {
        self.step("create_entry", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.entries.insert((chip, oid), entry.clone());
            oid
        })
    }

    fn delete_entry(&self, chip: ChipId, entry_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_entry", chip, |s| {
            s.entries.remove(&(chip, entry_id));
        })
    }

    fn set_entry_priority(&self, chip: ChipId, entry_id: NdiObjId, priority: u32) -> NdiResult<()> {
        self.step("set_entry_priority", chip, |s| {
            if let Some(e) = s.entries.get_mut(&(chip, entry_id)) {
                e.priority = priority;
            }
        })
    }

    fn set_entry_filter(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        filter: &NdiFilter,
    ) -> NdiResult<()> {
        self.step("set_entry_filter", chip, |s| {
            if let Some(e) = s.entries.get_mut(&(chip, entry_id)) {
                e.filters.retain(|f| f.match_type != filter.match_type);
                e.filters.push(filter.clone());
            }
        })
    }

    fn disable_entry_filter(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        match_type: MatchType,
    ) -> NdiResult<()> {
        self.step("disable_entry_filter", chip, |s| {
            if let Some(e) = s.entries.get_mut(&(chip, entry_id)) {
                e.filters.retain(|f| f.match_type != match_type);
            }
        })
    }

    fn set_entry_action(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        action: &acl_ndi::NdiAction,
    ) -> NdiResult<()> {
        self.step("set_entry_action", chip, |s| {
            if let Some(e) = s.entries.get_mut(&(chip, entry_id)) {
                e.actions.retain(|a| a.action_type != action.action_type);
                e.actions.push(action.clone());
            }
        })
    }

    fn disable_entry_action(
        &self,
        chip: ChipId,
        entry_id: NdiObjId,
        action_type: ActionType,
    ) -> NdiResult<()> {
        self.step("disable_entry_action", chip, |s| {
            if let Some(e) = s.entries.get_mut(&(chip, entry_id)) {
                e.actions.retain(|a| a.action_type != action_type);
            }
        })
    }

    fn create_counter(&self, chip: ChipId, _spec: &NdiCounterSpec) -> NdiResult<NdiObjId> {
        self.step("create_counter", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.counters.insert((chip, oid), CounterStats::default());
            oid
        })
    }

    fn delete_counter(&self, chip: ChipId, counter_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_counter", chip, |s| {
            s.counters.remove(&(chip, counter_id));
        })
    }

    fn get_counter_stats(&self, chip: ChipId, counter_id: NdiObjId) -> NdiResult<CounterStats> {
        self.step("get_counter_stats", chip, |s| {
            s.counters
                .get(&(chip, counter_id))
                .copied()
                .unwrap_or_default()
        })
    }

    fn set_counter_stats(
        &self,
        chip: ChipId,
        counter_id: NdiObjId,
        stats: CounterStats,
    ) -> NdiResult<()> {
        self.step("set_counter_stats", chip, |s| {
            s.counters.insert((chip, counter_id), stats);
        })
    }

    fn create_range(&self, chip: ChipId, spec: &NdiRangeSpec) -> NdiResult<NdiObjId> {
        self.step("create_range", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.ranges.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_range(&self, chip: ChipId, range_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_range", chip, |s| {
            s.ranges.remove(&(chip, range_id));
        })
    }

    fn create_udf_group(&self, chip: ChipId, spec: &NdiUdfGroupSpec) -> NdiResult<NdiObjId> {
        self.step("create_udf_group", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.udf_groups.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_udf_group(&self, chip: ChipId, group_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_udf_group", chip, |s| {
            s.udf_groups.remove(&(chip, group_id));
        })
    }

    fn create_udf_match(&self, chip: ChipId, spec: &NdiUdfMatchSpec) -> NdiResult<NdiObjId> {
        self.step("create_udf_match", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.udf_matches.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_udf_match(&self, chip: ChipId, match_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_udf_match", chip, |s| {
            s.udf_matches.remove(&(chip, match_id));
        })
    }

    fn create_udf(&self, chip: ChipId, spec: &NdiUdfSpec) -> NdiResult<NdiObjId> {
        self.step("create_udf", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.udfs.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_udf(&self, chip: ChipId, udf_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_udf", chip, |s| {
            s.udfs.remove(&(chip, udf_id));
        })
    }

    fn create_trap_group(&self, chip: ChipId, spec: &NdiTrapGroupSpec) -> NdiResult<NdiObjId> {
        self.step("create_trap_group", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.trap_groups.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_trap_group(&self, chip: ChipId, group_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_trap_group", chip, |s| {
            s.trap_groups.remove(&(chip, group_id));
        })
    }

    fn set_trap_group_queue(&self, chip: ChipId, group_id: NdiObjId, queue: u32) -> NdiResult<()> {
        self.step("set_trap_group_queue", chip, |s| {
            if let Some(g) = s.trap_groups.get_mut(&(chip, group_id)) {
                g.cpu_queue = queue;
            }
        })
    }

    fn create_trap(&self, chip: ChipId, spec: &NdiTrapSpec) -> NdiResult<NdiObjId> {
        self.step("create_trap", chip, |s| {
            let oid = Self::alloc_oid(s);
            s.traps.insert((chip, oid), spec.clone());
            oid
        })
    }

    fn delete_trap(&self, chip: ChipId, trap_id: NdiObjId) -> NdiResult<()> {
        self.step("delete_trap", chip, |s| {
            s.traps.remove(&(chip, trap_id));
        })
    }

    fn set_trap_group_binding(
        &self,
        chip: ChipId,
        trap_id: NdiObjId,
        group_id: Option<NdiObjId>,
    ) -> NdiResult<()> {
        self.step("set_trap_group_binding", chip, |s| {
            if let Some(t) = s.traps.get_mut(&(chip, trap_id)) {
                t.trap_group = group_id;
            }
        })
    }
}

/// Mock interface mapper with a remappable port table. A link aggregate
/// keeps one hardware handle per chip it has members on; the handle
/// survives membership changes.
struct MockMapper {
    ports: Mutex<BTreeMap<u32, (u32, u32)>>,
    lags: Mutex<BTreeMap<u32, BTreeMap<u32, u64>>>,
}

impl MockMapper {
    fn new() -> Arc<Self> {
        let mut ports = BTreeMap::new();
        // if10 on chip 0, if11/if12 on chip 1.
        ports.insert(10, (0, 4));
        ports.insert(11, (1, 4));
        ports.insert(12, (1, 5));
        let mut lags = BTreeMap::new();
        // if20 has members on both chips, two of them on chip 0.
        lags.insert(20, BTreeMap::from([(0, 0x500), (1, 0x501)]));
        Arc::new(Self {
            ports: Mutex::new(ports),
            lags: Mutex::new(lags),
        })
    }

    fn remap(&self, ifindex: u32, chip: u32, port: u32) {
        self.ports.lock().unwrap().insert(ifindex, (chip, port));
    }
}

impl IntfMapper for MockMapper {
    fn to_chip_port(&self, ifindex: IfIndex) -> Result<(ChipId, ChipPort), IntfError> {
        self.ports
            .lock()
            .unwrap()
            .get(&ifindex.0)
            .map(|&(c, p)| (ChipId(c), ChipPort(p)))
            .ok_or(IntfError::UnknownInterface(ifindex))
    }

    fn from_chip_port(&self, chip: ChipId, port: ChipPort) -> Result<IfIndex, IntfError> {
        self.ports
            .lock()
            .unwrap()
            .iter()
            .find(|(_, &(c, p))| c == chip.0 && p == port.0)
            .map(|(&i, _)| IfIndex(i))
            .ok_or(IntfError::NoInterfaceAtPort(chip, port))
    }

    fn is_link_aggregate(&self, ifindex: IfIndex) -> bool {
        self.lags.lock().unwrap().contains_key(&ifindex.0)
    }

    fn link_aggregate_handles(
        &self,
        ifindex: IfIndex,
    ) -> Result<BTreeMap<ChipId, NdiObjId>, IntfError> {
        self.lags
            .lock()
            .unwrap()
            .get(&ifindex.0)
            .map(|m| {
                m.iter()
                    .map(|(&c, &h)| (ChipId(c), NdiObjId(h)))
                    .collect()
            })
            .ok_or(IntfError::NotLinkAggregate(ifindex))
    }
}

fn setup() -> (SwitchList, Arc<MockNdi>, Arc<MockMapper>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ndi = MockNdi::new();
    let mapper = MockMapper::new();
    let inventory = ChipInventory::single(SwitchId(0), [0, 1]);
    let list = SwitchList::new(
        inventory,
        Arc::clone(&ndi) as Arc<dyn AclNdi>,
        Arc::clone(&mapper) as Arc<dyn IntfMapper>,
    );
    (list, ndi, mapper)
}

fn ingress_table_spec() -> TableSpec {
    TableSpec {
        stage: AclStage::Ingress,
        priority: 10,
        name: Some("base-ingress".to_string()),
        size: None,
        allowed_matches: vec![
            MatchType::SrcIp,
            MatchType::DstIp,
            MatchType::L4SrcPort,
            MatchType::InPort,
            MatchType::RangeCheck,
        ],
        udf_group_ids: Vec::new(),
        chips: Vec::new(),
    }
}

fn src_ip_filter(octets: [u8; 4]) -> Filter {
    Filter::new(
        MatchType::SrcIp,
        Value::Bytes {
            data: octets.to_vec(),
            mask: vec![255, 255, 255, 255],
        },
    )
    .unwrap()
}

fn drop_action() -> Action {
    Action::new(
        ActionType::PacketAction,
        Value::PacketAction(PacketAction::Drop),
    )
    .unwrap()
}

fn in_port_filter(ifindex: u32) -> Filter {
    Filter::new(
        MatchType::InPort,
        Value::IfIndex {
            ifindex: IfIndex(ifindex),
            ports: BTreeMap::new(),
        },
    )
    .unwrap()
}

#[test]
fn table_create_fans_out_to_every_chip() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    assert_eq!(ndi.table_count(), 2);
    let table = sw.find_table(table_id).unwrap();
    assert_eq!(table.chips().len(), 2);
    assert!(table.ndi_handle(ChipId(0)).is_some());
    assert!(table.ndi_handle(ChipId(1)).is_some());
}

#[test]
fn table_create_failure_leaves_no_chip_programmed() {
    let (mut list, ndi, _) = setup();
    ndi.fail_on("create_table", 1);
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let err = sw.create_table(&ingress_table_spec(), None);

    assert!(err.is_err());
    assert_eq!(ndi.table_count(), 0);

    // The aborted create must have released its id.
    ndi.clear_failures();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    assert_eq!(table_id.raw(), 1);
}

#[test]
fn unknown_switch_is_rejected() {
    let (mut list, _, _) = setup();
    assert!(matches!(
        list.get_switch(SwitchId(9)),
        Err(AclError::NotFound(_))
    ));
}

#[test]
fn drop_rule_installs_on_all_chips() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 1, 2, 3])],
            vec![drop_action()],
            None,
        )
        .unwrap();

    assert_eq!(ndi.entry_count_on(0), 1);
    assert_eq!(ndi.entry_count_on(1), 1);
    let entry = sw.find_entry(table_id, entry_id).unwrap();
    assert_eq!(entry.ndi_handles().len(), 2);
}

#[test]
fn in_port_rule_narrows_to_owning_chip() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    // if11 lives on chip 1 only.
    sw.create_entry(
        table_id,
        50,
        None,
        vec![in_port_filter(11)],
        vec![drop_action()],
        None,
    )
    .unwrap();

    assert_eq!(ndi.entry_count_on(0), 0);
    assert_eq!(ndi.entry_count_on(1), 1);
}

#[test]
fn entry_create_is_all_or_nothing() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    ndi.fail_on("create_entry", 1);
    let err = sw.create_entry(
        table_id,
        100,
        None,
        vec![src_ip_filter([10, 0, 0, 1])],
        vec![drop_action()],
        None,
    );
    assert!(err.is_err());
    assert_eq!(ndi.entry_count(), 0);
    assert!(sw.find_table(table_id).unwrap().entries().is_empty());

    // Id released by the aborted create is handed out again.
    ndi.clear_failures();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();
    assert_eq!(entry_id.raw(), 1);
}

#[test]
fn modify_failure_rolls_hardware_back() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();

    let before = ndi.entries_snapshot();

    // Chip 0 accepts the new filter, chip 1 rejects it; the chip 0 write
    // must be undone.
    ndi.fail_on("set_entry_filter", 1);
    let err = sw.modify_entry(
        table_id,
        entry_id,
        100,
        None,
        vec![src_ip_filter([192, 168, 0, 9])],
        vec![drop_action()],
    );
    assert!(err.is_err());
    assert_eq!(ndi.entries_snapshot(), before);

    // The control-plane copy is also unchanged.
    let entry = sw.find_entry(table_id, entry_id).unwrap();
    let key = FilterKey::simple(MatchType::SrcIp);
    assert_eq!(
        entry.filter(&key).unwrap().value(),
        src_ip_filter([10, 0, 0, 1]).value()
    );
}

#[test]
fn modify_pushes_only_the_difference() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1]), in_port_filter(10)],
            vec![drop_action()],
            None,
        )
        .unwrap();

    ndi.reset_calls();
    sw.modify_entry(
        table_id,
        entry_id,
        100,
        None,
        vec![src_ip_filter([10, 0, 0, 2]), in_port_filter(10)],
        vec![drop_action()],
    )
    .unwrap();

    // Same chip set and only the source IP changed: one field write on
    // the one chip the entry lives on, no delete/create churn.
    assert_eq!(ndi.calls_matching("set_entry_filter"), 1);
    assert_eq!(ndi.calls_matching("create_entry"), 0);
    assert_eq!(ndi.calls_matching("delete_entry"), 0);
    assert_eq!(ndi.calls_matching("set_entry_priority"), 0);
}

#[test]
fn modify_there_and_back_restores_original_state() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();

    let original_hw = ndi.entries_snapshot();
    let original_handles = sw
        .find_entry(table_id, entry_id)
        .unwrap()
        .ndi_handles()
        .clone();

    sw.modify_entry(
        table_id,
        entry_id,
        200,
        None,
        vec![
            src_ip_filter([172, 16, 0, 1]),
            Filter::new(
                MatchType::L4SrcPort,
                Value::U16 {
                    data: 80,
                    mask: 0xffff,
                },
            )
            .unwrap(),
        ],
        vec![drop_action()],
    )
    .unwrap();

    sw.modify_entry(
        table_id,
        entry_id,
        100,
        None,
        vec![src_ip_filter([10, 0, 0, 1])],
        vec![drop_action()],
    )
    .unwrap();

    assert_eq!(ndi.entries_snapshot(), original_hw);
    let entry = sw.find_entry(table_id, entry_id).unwrap();
    assert_eq!(entry.ndi_handles(), &original_handles);
    assert_eq!(entry.priority(), 100);
    assert_eq!(entry.filters().len(), 1);
}

#[test]
fn delete_after_failed_narrowing_modify_clears_hardware() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();
    assert_eq!(ndi.entry_count(), 2);

    // Narrow the entry to chip 1 while also rewriting a filter, and make
    // the chip-1 write fail. The forward pass has already deleted the
    // chip-0 copy, so rollback re-creates it under a fresh handle.
    ndi.fail_on("set_entry_filter", 1);
    let narrowed: ChipSet = [ChipId(1)].into_iter().collect();
    assert!(sw
        .modify_entry(
            table_id,
            entry_id,
            100,
            Some(narrowed),
            vec![src_ip_filter([10, 0, 0, 9])],
            vec![drop_action()],
        )
        .is_err());
    ndi.clear_failures();
    assert_eq!(ndi.entry_count_on(0), 1);

    // The cached handle map must track the re-created copy, or this
    // delete strands it in hardware.
    sw.delete_entry(table_id, entry_id).unwrap();
    assert_eq!(ndi.entry_count(), 0);
}

#[test]
fn incremental_filter_update_returns_previous_value() {
    let (mut list, _, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();

    let key = FilterKey::simple(MatchType::SrcIp);
    let prev = sw
        .update_entry_filter(table_id, entry_id, key, Some(src_ip_filter([10, 0, 0, 2])))
        .unwrap();
    assert_eq!(
        prev.unwrap().value(),
        src_ip_filter([10, 0, 0, 1]).value()
    );

    // Adding a brand-new field reports no previous value.
    let l4 = Filter::new(
        MatchType::L4SrcPort,
        Value::U16 {
            data: 443,
            mask: 0xffff,
        },
    )
    .unwrap();
    let prev = sw
        .update_entry_filter(table_id, entry_id, FilterKey::simple(MatchType::L4SrcPort), Some(l4))
        .unwrap();
    assert!(prev.is_none());

    // Removing a field reports the removed value.
    let prev = sw
        .update_entry_filter(table_id, entry_id, FilterKey::simple(MatchType::L4SrcPort), None)
        .unwrap();
    assert!(prev.is_some());
}

#[test]
fn entry_priority_update_is_a_leaf_write() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action()],
            None,
        )
        .unwrap();

    ndi.reset_calls();
    let prev = sw.set_entry_priority(table_id, entry_id, 250).unwrap();
    assert_eq!(prev, 100);
    assert_eq!(ndi.calls_matching("set_entry_priority"), 2);
    assert_eq!(sw.find_entry(table_id, entry_id).unwrap().priority(), 250);
}

#[test]
fn disallowed_match_type_is_rejected() {
    let (mut list, _, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let mut spec = ingress_table_spec();
    spec.allowed_matches = vec![MatchType::SrcIp];
    let table_id = sw.create_table(&spec, None).unwrap();

    let dst = Filter::new(
        MatchType::DstIp,
        Value::Bytes {
            data: vec![10, 0, 0, 9],
            mask: vec![255, 255, 255, 255],
        },
    )
    .unwrap();
    let err = sw.create_entry(table_id, 10, None, vec![dst], vec![drop_action()], None);
    assert!(matches!(err, Err(AclError::InvalidValue(_))));
}

#[test]
fn counter_lifecycle_and_reference_protection() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    let counter_id = sw
        .create_counter(
            &CounterSpec {
                table_id,
                name: Some("flow-hits".to_string()),
                enable_pkt_count: true,
                enable_byte_count: true,
            },
            None,
        )
        .unwrap();
    assert_eq!(ndi.counter_count(), 2);

    let entry_id = sw
        .create_entry(
            table_id,
            100,
            None,
            vec![src_ip_filter([10, 0, 0, 1])],
            vec![drop_action(), Action::set_counter(counter_id)],
            None,
        )
        .unwrap();

    // Referenced counters cannot be deleted.
    assert!(matches!(
        sw.delete_counter(table_id, counter_id),
        Err(AclError::InUse(_))
    ));

    sw.delete_entry(table_id, entry_id).unwrap();
    sw.delete_counter(table_id, counter_id).unwrap();
    assert_eq!(ndi.counter_count(), 0);
}

#[test]
fn counter_stats_are_summed_across_chips() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let counter_id = sw
        .create_counter(
            &CounterSpec {
                table_id,
                name: None,
                enable_pkt_count: true,
                enable_byte_count: true,
            },
            None,
        )
        .unwrap();

    let counter = sw.find_counter(table_id, counter_id).unwrap();
    for (chip, handle) in counter.ndi_handles().clone() {
        ndi.set_counter_value(
            chip.0,
            handle,
            CounterStats {
                pkt_count: 10,
                byte_count: 1000,
            },
        );
    }

    let stats = sw.get_counter_stats(table_id, counter_id).unwrap();
    assert_eq!(stats.pkt_count, 20);
    assert_eq!(stats.byte_count, 2000);

    sw.clear_counter_stats(table_id, counter_id).unwrap();
    let stats = sw.get_counter_stats(table_id, counter_id).unwrap();
    assert_eq!(stats.pkt_count, 0);
}

#[test]
fn range_reference_blocks_delete() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let range_id = sw
        .create_range(
            &RangeSpec {
                kind: RangeKind::L4DstPort,
                min: 1000,
                max: 2000,
            },
            None,
        )
        .unwrap();
    assert_eq!(ndi.range_count(), 2);

    let range_filter = Filter::new(
        MatchType::RangeCheck,
        Value::ObjRefList {
            ids: vec![range_id.raw()],
            handles: BTreeMap::new(),
        },
    )
    .unwrap();
    let entry_id = sw
        .create_entry(
            table_id,
            10,
            None,
            vec![range_filter],
            vec![drop_action()],
            None,
        )
        .unwrap();

    assert!(matches!(
        sw.delete_range(range_id),
        Err(AclError::InUse(_))
    ));
    sw.delete_entry(table_id, entry_id).unwrap();
    sw.delete_range(range_id).unwrap();
    assert_eq!(ndi.range_count(), 0);
}

#[test]
fn trap_action_is_pushed_after_other_actions() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let trap_id = sw
        .create_trap(
            &acl_engine::TrapSpec {
                group_id: None,
                priority: 7,
            },
            None,
        )
        .unwrap();

    sw.create_entry(
        table_id,
        10,
        None,
        vec![src_ip_filter([10, 0, 0, 1])],
        vec![Action::set_user_trap(trap_id), drop_action()],
        None,
    )
    .unwrap();

    for entry in ndi.entries_on(0) {
        let last = entry.actions.last().unwrap();
        assert_eq!(last.action_type, ActionType::SetUserTrapId);
    }
}

#[test]
fn table_delete_tears_down_children() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();
    let counter_id = sw
        .create_counter(
            &CounterSpec {
                table_id,
                name: None,
                enable_pkt_count: true,
                enable_byte_count: false,
            },
            None,
        )
        .unwrap();
    sw.create_entry(
        table_id,
        10,
        None,
        vec![src_ip_filter([10, 0, 0, 1])],
        vec![drop_action(), Action::set_counter(counter_id)],
        None,
    )
    .unwrap();

    sw.delete_table(table_id).unwrap();
    assert_eq!(ndi.table_count(), 0);
    assert_eq!(ndi.entry_count(), 0);
    assert_eq!(ndi.counter_count(), 0);
    assert!(sw.find_table(table_id).is_err());
}

#[test]
fn udf_filter_width_must_match_group_length() {
    let (mut list, _, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let group_id = sw
        .create_udf_group(
            &acl_engine::UdfGroupSpec {
                is_hash: false,
                length: 4,
            },
            None,
        )
        .unwrap();
    let mut spec = ingress_table_spec();
    spec.allowed_matches.push(MatchType::Udf);
    spec.udf_group_ids = vec![group_id];
    let table_id = sw.create_table(&spec, None).unwrap();

    let narrow = Filter::new_udf(
        group_id,
        Value::Bytes {
            data: vec![1, 2, 3],
            mask: vec![255, 255, 255],
        },
    )
    .unwrap();
    let err = sw.create_entry(table_id, 10, None, vec![narrow], vec![drop_action()], None);
    assert!(matches!(err, Err(AclError::LengthMismatch(_))));

    let exact = Filter::new_udf(
        group_id,
        Value::Bytes {
            data: vec![1, 2, 3, 4],
            mask: vec![255, 255, 255, 255],
        },
    )
    .unwrap();
    sw.create_entry(table_id, 10, None, vec![exact], vec![drop_action()], None)
        .unwrap();
}

#[test]
fn referenced_udf_group_cannot_be_deleted() {
    let (mut list, _, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let group_id = sw
        .create_udf_group(
            &acl_engine::UdfGroupSpec {
                is_hash: false,
                length: 2,
            },
            None,
        )
        .unwrap();
    let mut spec = ingress_table_spec();
    spec.udf_group_ids = vec![group_id];
    let table_id = sw.create_table(&spec, None).unwrap();

    assert!(matches!(
        sw.delete_udf_group(group_id),
        Err(AclError::InUse(_))
    ));
    sw.delete_table(table_id).unwrap();
    sw.delete_udf_group(group_id).unwrap();
}

#[test]
fn port_remap_moves_entry_between_chips() {
    let (mut list, ndi, mapper) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    // if10 starts on chip 0, so the entry lands there.
    sw.create_entry(
        table_id,
        42,
        None,
        vec![in_port_filter(10)],
        vec![drop_action()],
        None,
    )
    .unwrap();
    assert_eq!(ndi.entry_count_on(0), 1);
    assert_eq!(ndi.entry_count_on(1), 0);

    // The interface migrates to chip 1: one event per affected chip.
    mapper.remap(10, 1, 6);
    sw.on_mapping_event(&MappingEvent {
        ifindex: IfIndex(10),
        chip: ChipId(0),
        port: ChipPort(4),
        change: MappingChange::Removed,
    });
    sw.on_mapping_event(&MappingEvent {
        ifindex: IfIndex(10),
        chip: ChipId(1),
        port: ChipPort(6),
        change: MappingChange::Added,
    });

    assert_eq!(ndi.entry_count_on(0), 0);
    assert_eq!(ndi.entry_count_on(1), 1);
}

#[test]
fn lag_member_change_does_not_index_rules() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    // if20 is a link aggregate spanning both chips.
    sw.create_entry(
        table_id,
        42,
        None,
        vec![in_port_filter(20)],
        vec![drop_action()],
        None,
    )
    .unwrap();

    ndi.reset_calls();
    sw.on_mapping_event(&MappingEvent {
        ifindex: IfIndex(20),
        chip: ChipId(0),
        port: ChipPort(1),
        change: MappingChange::Removed,
    });
    // Aggregates resolve through their stable identity; no repush.
    assert_eq!(ndi.calls_matching("set_entry_filter"), 0);
    assert_eq!(ndi.calls_matching("create_entry"), 0);
}

#[test]
fn lag_rule_matches_the_aggregate_handle() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    // if20 spans both chips. Each chip's record matches the chip-local
    // aggregate handle, covering every member port at once, including
    // two members sharing a chip.
    sw.create_entry(
        table_id,
        42,
        None,
        vec![in_port_filter(20)],
        vec![drop_action()],
        None,
    )
    .unwrap();

    assert_eq!(ndi.entry_count_on(0), 1);
    assert_eq!(ndi.entry_count_on(1), 1);
    for (chip, handle) in [(0, 0x500), (1, 0x501)] {
        let entry = &ndi.entries_on(chip)[0];
        let in_port = entry
            .filters
            .iter()
            .find(|f| f.match_type == MatchType::InPort)
            .unwrap();
        assert_eq!(in_port.value, NdiFilterValue::ObjId(NdiObjId(handle)));
    }
}

#[test]
fn lag_membership_change_keeps_hardware_current() {
    let (mut list, ndi, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let table_id = sw.create_table(&ingress_table_spec(), None).unwrap();

    sw.create_entry(
        table_id,
        42,
        None,
        vec![in_port_filter(20)],
        vec![drop_action()],
        None,
    )
    .unwrap();
    let before = ndi.entries_snapshot();

    // A member of if20 moves from port 1 to port 9 on chip 0. The
    // programmed match is the aggregate's handle, so the record is
    // already current and nothing needs rewriting.
    sw.on_mapping_event(&MappingEvent {
        ifindex: IfIndex(20),
        chip: ChipId(0),
        port: ChipPort(1),
        change: MappingChange::Removed,
    });
    sw.on_mapping_event(&MappingEvent {
        ifindex: IfIndex(20),
        chip: ChipId(0),
        port: ChipPort(9),
        change: MappingChange::Added,
    });

    assert_eq!(ndi.entries_snapshot(), before);
    let entry = &ndi.entries_on(0)[0];
    assert!(entry
        .filters
        .iter()
        .any(|f| f.value == NdiFilterValue::ObjId(NdiObjId(0x500))));
}

#[test]
fn trap_group_binding_and_queue_update() {
    let (mut list, _, _) = setup();
    let sw = list.get_switch(SwitchId(0)).unwrap();
    let group_id = sw
        .create_trap_group(
            &acl_engine::TrapGroupSpec {
                cpu_queue: 3,
                admin_state: true,
            },
            None,
        )
        .unwrap();
    let trap_id = sw
        .create_trap(
            &acl_engine::TrapSpec {
                group_id: Some(group_id),
                priority: 1,
            },
            None,
        )
        .unwrap();

    sw.set_trap_group_queue(group_id, 5).unwrap();

    // The group is pinned by the trap.
    assert!(matches!(
        sw.delete_trap_group(group_id),
        Err(AclError::InUse(_))
    ));

    // Rebinding to another group releases the old pin.
    let other = sw
        .create_trap_group(
            &acl_engine::TrapGroupSpec {
                cpu_queue: 7,
                admin_state: true,
            },
            None,
        )
        .unwrap();
    sw.set_trap_group(trap_id, Some(other)).unwrap();
    sw.delete_trap_group(group_id).unwrap();
    assert!(matches!(
        sw.delete_trap_group(other),
        Err(AclError::InUse(_))
    ));

    sw.delete_trap(trap_id).unwrap();
    sw.delete_trap_group(other).unwrap();
}
