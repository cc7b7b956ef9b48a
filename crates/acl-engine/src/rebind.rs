//! Interface-to-rule reverse index.
//!
//! Every installed entry with an interface-valued field is indexed by the
//! interface indexes it references, so a port remap can find exactly the
//! rules it invalidates. Link-aggregate indexes are not indexed; their
//! members resolve through the aggregate and survive remaps.

use crate::entry::FieldRef;
use crate::types::{EntryId, TableId};
use acl_common::IfIndex;
use std::collections::{BTreeSet, HashMap};

/// One indexed (rule, field) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleRef {
    pub table_id: TableId,
    pub entry_id: EntryId,
    pub field: FieldRef,
}

/// Per-switch interface-index → rule-usage map.
#[derive(Debug, Default)]
pub struct RebindIndex {
    by_ifindex: HashMap<IfIndex, BTreeSet<RuleRef>>,
}

impl RebindIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ifindex: IfIndex, rule: RuleRef) {
        self.by_ifindex.entry(ifindex).or_default().insert(rule);
    }

    /// Drops every registration belonging to one entry.
    pub fn deregister_entry(&mut self, table_id: TableId, entry_id: EntryId) {
        self.by_ifindex.retain(|_, rules| {
            rules.retain(|r| !(r.table_id == table_id && r.entry_id == entry_id));
            !rules.is_empty()
        });
    }

    /// Rules referencing the interface, in (table, entry, field) order.
    pub fn lookup(&self, ifindex: IfIndex) -> Vec<RuleRef> {
        self.by_ifindex
            .get(&ifindex)
            .map(|rules| rules.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ifindex.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKey;
    use crate::types::MatchType;

    fn rule(table: u64, entry: u64) -> RuleRef {
        RuleRef {
            table_id: TableId(table),
            entry_id: EntryId(entry),
            field: FieldRef::Match(FilterKey::simple(MatchType::InPort)),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut idx = RebindIndex::new();
        idx.register(IfIndex(15), rule(1, 1));
        idx.register(IfIndex(15), rule(1, 2));
        idx.register(IfIndex(16), rule(1, 1));

        assert_eq!(idx.lookup(IfIndex(15)).len(), 2);
        assert_eq!(idx.lookup(IfIndex(16)).len(), 1);
        assert!(idx.lookup(IfIndex(99)).is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut idx = RebindIndex::new();
        idx.register(IfIndex(15), rule(1, 1));
        idx.register(IfIndex(15), rule(1, 1));
        assert_eq!(idx.lookup(IfIndex(15)).len(), 1);
    }

    #[test]
    fn test_deregister_entry_removes_all_fields() {
        let mut idx = RebindIndex::new();
        idx.register(IfIndex(15), rule(1, 1));
        idx.register(IfIndex(16), rule(1, 1));
        idx.register(IfIndex(15), rule(1, 2));

        idx.deregister_entry(TableId(1), EntryId(1));
        assert_eq!(idx.lookup(IfIndex(15)), vec![rule(1, 2)]);
        assert!(idx.lookup(IfIndex(16)).is_empty());
    }
}
