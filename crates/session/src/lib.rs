//! `runplane-session` — tenant-scoped session registry.
//!
//! Pure state over the State Surface: create/look up sessions, merge
//! context, track active sagas. The registry is the sole multi-tenancy
//! boundary at this layer: a lookup with the wrong tenant fails with a
//! tenant mismatch, never with another tenant's data.

pub mod registry;
pub mod session;

pub use registry::{SessionError, SessionRegistry};
pub use session::Session;
