//! Control-plane object model for switch ACLs.
//!
//! The engine keeps the authoritative copy of every ACL object (tables,
//! entries, counters, ranges, UDF objects, traps) and mirrors it onto the
//! device's forwarding chips through the [`acl_ndi::AclNdi`] boundary.
//! Multi-chip fan-out is all-or-nothing on create and ledger-rollback on
//! modify, so an error reported to the caller always leaves hardware in
//! the pre-request state.

pub mod action;
pub mod counter;
pub mod entry;
pub mod error;
pub mod filter;
pub mod range;
pub mod rebind;
pub mod switch;
pub mod switch_list;
pub mod table;
pub mod trap;
pub mod types;
pub mod udf;
pub mod value;

pub use action::Action;
pub use counter::{Counter, CounterSpec};
pub use entry::{Entry, FieldRef};
pub use error::{AclError, AclResult};
pub use filter::{Filter, FilterKey};
pub use range::{Range, RangeSpec};
pub use switch::Switch;
pub use switch_list::{ChipInventory, SwitchList};
pub use table::{Table, TableSpec};
pub use trap::{Trap, TrapGroup, TrapGroupSpec, TrapSpec};
pub use types::{
    AclStage, ActionType, ChipSet, CounterId, EntryId, MatchType, PacketAction, RangeId,
    RangeKind, SwitchId, TableId, TrapGroupId, TrapId, UdfBase, UdfGroupId, UdfId, UdfMatchId,
};
pub use udf::{Udf, UdfGroup, UdfGroupSpec, UdfMatch, UdfMatchSpec, UdfSpec};
pub use value::{PortRef, Value};
