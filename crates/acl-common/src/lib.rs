//! Shared plumbing for the ACL control plane.
//!
//! Three pieces live here: the identifier pool with its RAII allocation
//! guard, the refcount-aware object map, and the interface-to-chip-port
//! mapping abstraction.

pub mod idgen;
pub mod ifmap;
pub mod obj_map;

pub use idgen::{IdError, IdGenerator, IdGuard};
pub use ifmap::{IfIndex, IntfError, IntfMapper, MappingChange, MappingEvent};
pub use obj_map::{ObjMap, ObjMapError, RefCounted};
