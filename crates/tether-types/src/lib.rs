//! Shared types for the tether boundary engine.
//!
//! This crate defines the wire vocabulary both sides of the boundary agree
//! on: value kinds and their tag bytes, parameter and function specs, the
//! tagged-slot and call-frame layout, handles, renewal outcomes, and the
//! error type.

mod error;
mod handle;
mod kind;
pub mod layout;
mod spec;

pub use error::{BridgeError, Severity};
pub use handle::{Handle, RenewOutcome};
pub use kind::{tag_name, ValueKind};
pub use spec::{FunctionSpec, ParamSpec};

/// Result type used throughout the boundary engine.
pub type Result<T> = std::result::Result<T, BridgeError>;
