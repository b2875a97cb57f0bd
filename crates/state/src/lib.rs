//! `runplane-state` — mutable, queryable projection of current state.
//!
//! The State Surface is the only shared mutable resource in the kernel. Keys
//! are always namespaced by tenant (`tenant:entity_type:entity_id`), which
//! makes cross-tenant leakage structurally impossible even under key
//! collisions from different tenants.

pub mod backend;
pub mod in_memory;
pub mod key;
pub mod surface;

pub use backend::{StateBackend, StateError};
pub use in_memory::InMemoryStateBackend;
pub use key::StateKey;
pub use surface::{StateSurface, StateTier};
