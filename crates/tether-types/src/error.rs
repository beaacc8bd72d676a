use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::handle::Handle;
use crate::kind::{tag_name, ValueKind};

/// How far a failure is allowed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Linkage or programmer error: terminate the current call chain.
    Fatal,
    /// Data error: reported at the call site, the cycle continues.
    Recoverable,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Recoverable => write!(f, "recoverable"),
        }
    }
}

/// Every failure the boundary engine can report.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    // ── Linkage ──────────────────────────────────────────────────────────
    /// A dotted import path did not resolve to a callable.
    #[error("unresolved import '{path}' in module '{module}'")]
    UnresolvedImport { module: String, path: String },

    /// An import index beyond the number of bound imports.
    #[error("attempt to invoke invalid import index {index} ({bound} bound)")]
    InvalidImportIndex { index: i32, bound: usize },

    /// A wire spec that cannot be decoded.
    #[error("malformed function spec: {0}")]
    MalformedSpec(String),

    /// An array spec without an element spec.
    #[error("array spec is missing its element spec")]
    MissingElementSpec,

    /// More than eight parameters declared.
    #[error("function spec declares {0} parameters (max 8)")]
    TooManyParams(usize),

    /// A fast entry point used with an import of a different signature.
    #[error("fast call '{shape}' used on import '{binding}' declared as '{declared}'")]
    FastShapeMismatch {
        shape: String,
        binding: String,
        declared: String,
    },

    // ── Data ─────────────────────────────────────────────────────────────
    /// A slot's tag does not match the consumer's spec.
    #[error("failed to marshal '{expected}' from '{}' in '{binding}'", tag_name(*observed))]
    MarshalMismatch {
        expected: ValueKind,
        observed: u8,
        binding: String,
    },

    /// A handle that is not (or no longer) in the registry.
    #[error("handle {0} is not tracked")]
    HandleNotTracked(Handle),

    /// An intern index that was never registered.
    #[error("interned name {0} is not registered")]
    UnknownName(i32),

    /// A null value for a non-nullable spec.
    #[error("failed to marshal null as '{spec}' in '{binding}'")]
    NullNotAllowed { spec: String, binding: String },

    /// A host value that cannot be represented as the declared kind.
    #[error("failed to marshal {found} as '{spec}' in '{binding}'")]
    Unmarshalable {
        found: String,
        spec: String,
        binding: String,
    },

    /// A guest address range outside linear memory.
    #[error("guest memory access out of bounds: {addr:#x}+{len} (memory size {size})")]
    MemoryOutOfBounds { addr: u32, len: u32, size: usize },

    /// A null-terminated string walk that never found its terminator.
    #[error("string at {addr:#x} is not terminated within {limit} code units")]
    UnterminatedString { addr: u32, limit: u32 },

    // ── Guest ────────────────────────────────────────────────────────────
    /// The guest allocator failed or is unavailable.
    #[error("guest allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: u32, reason: String },

    /// The guest trapped while the host called back into it.
    #[error("guest trapped: {0}")]
    GuestTrap(String),

    /// The guest does not export the requested callback.
    #[error("guest does not export callback '{0}'")]
    NoGuestCallback(String),

    // ── Configuration ────────────────────────────────────────────────────
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Classify the error per the two severity classes.
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnresolvedImport { .. }
            | Self::InvalidImportIndex { .. }
            | Self::MalformedSpec(_)
            | Self::MissingElementSpec
            | Self::TooManyParams(_)
            | Self::FastShapeMismatch { .. }
            | Self::AllocationFailed { .. }
            | Self::GuestTrap(_)
            | Self::Config(_) => Severity::Fatal,
            Self::MarshalMismatch { .. }
            | Self::HandleNotTracked(_)
            | Self::UnknownName(_)
            | Self::NullNotAllowed { .. }
            | Self::Unmarshalable { .. }
            | Self::MemoryOutOfBounds { .. }
            | Self::UnterminatedString { .. }
            | Self::NoGuestCallback(_) => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_names_both_kinds() {
        let err = BridgeError::MarshalMismatch {
            expected: ValueKind::String,
            observed: ValueKind::I32.tag(),
            binding: "game::map.describeExits".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'string'"), "{msg}");
        assert!(msg.contains("'i32'"), "{msg}");
        assert!(msg.contains("game::map.describeExits"), "{msg}");
        assert_eq!(err.severity(), Severity::Recoverable);
    }

    #[test]
    fn test_linkage_errors_are_fatal() {
        let err = BridgeError::UnresolvedImport {
            module: "modA".into(),
            path: "Foo.Missing".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "unresolved import 'Foo.Missing' in module 'modA'");
        assert!(BridgeError::InvalidImportIndex { index: 3, bound: 2 }.is_fatal());
        assert!(BridgeError::MissingElementSpec.is_fatal());
    }

    #[test]
    fn test_data_errors_are_recoverable() {
        assert!(!BridgeError::HandleNotTracked(Handle(4)).is_fatal());
        assert!(!BridgeError::UnknownName(2).is_fatal());
    }
}
