//! Tether boundary engine.
//!
//! Lets a compiled guest module exchange calls and values with a host whose
//! objects are recreated every cycle:
//!
//! - [`codec`]: 16-byte tagged slots to and from [`HostValue`]s
//! - [`imports`]: dotted capability paths bound to dense import indices
//! - [`handles`]: stable integer handles, renewed across cycles by domain id
//! - [`intern`]: small integers standing for repeated lookup keys
//! - [`fast`]: fixed call shapes that skip the slot buffer
//! - [`memory`]: bounds-checked guest memory access that survives growth
//!
//! [`BoundaryEngine`] owns all of it and serves the binding entry points.

pub mod builtins;
pub mod codec;
mod config;
mod engine;
pub mod fast;
pub mod handles;
mod host;
pub mod imports;
pub mod intern;
pub mod memory;
mod object;
mod value;

pub use config::EngineConfig;
pub use engine::{BoundaryEngine, EngineStats, INVOKE_FAILED, INVOKE_OK};
pub use fast::FastShape;
pub use host::{CallContext, HostError, HostFn, ImportEntry, ImportTable};
pub use memory::{Guest, MemoryView, VecGuest};
pub use object::{
    identity_of, CycleIndex, EmptyWorld, HostObject, HostWorld, ObjectRef, PlainObject, RootKey,
};
pub use value::HostValue;

pub use tether_types::layout;
pub use tether_types::{
    BridgeError, FunctionSpec, Handle, ParamSpec, RenewOutcome, Result, Severity, ValueKind,
};
