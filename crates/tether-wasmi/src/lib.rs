//! wasmi harness for the Tether boundary engine.
//!
//! [`link`] registers the engine's entry points under the `tether` import
//! module; [`GuestRuntime`] instantiates a guest with them and drives its
//! `init` and `loop` exports.

mod error;
mod guest;
mod link;
mod runtime;

pub use error::{Result, RuntimeError};
pub use guest::WasmiGuest;
pub use link::{link, EngineHost, TETHER_MODULE};
pub use runtime::{GuestRuntime, HostState};
