//! Network device interface for ACL programming.
//!
//! This crate is the boundary between the ACL control plane and the
//! forwarding chips. It defines the shared match/action vocabulary, the
//! fully-resolved per-chip record types, the status and error model, and
//! the [`AclNdi`] trait implemented by the hardware layer (and by test
//! mocks).

pub mod api;
pub mod error;
pub mod types;

pub use api::AclNdi;
pub use error::{NdiError, NdiResult, NdiStatus};
pub use types::{
    AclStage, ActionType, ChipId, ChipPort, CounterStats, MatchType, NdiAction, NdiActionValue,
    NdiCounterSpec, NdiEntry, NdiFilter, NdiFilterValue, NdiObjId, NdiRangeSpec, NdiTableSpec,
    NdiTrapGroupSpec, NdiTrapSpec, NdiUdfGroupSpec, NdiUdfMatchSpec, NdiUdfSpec, PacketAction,
    PoolCapacity, RangeKind, TableUsage, UdfBase,
};
