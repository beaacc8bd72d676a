use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer the guest uses to refer to a host object.
///
/// Handles are dense and non-negative; `-1` on the wire means "no handle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// Interpret a raw guest integer, rejecting negative values.
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// The raw guest representation.
    pub fn raw(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of renewing a handle at a cycle boundary.
///
/// Renewal failures are ordinary data: the guest branches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum RenewOutcome {
    /// The handle now refers to the current cycle's object.
    Ok = 0,
    /// The handle is not tracked (already released).
    Disposed = 1,
    /// The object has no domain identity and is not a root; it cannot be renewed.
    Unrenewable = 2,
    /// The entity no longer exists this cycle; the handle has been released.
    Gone = 3,
}

impl RenewOutcome {
    /// Status code returned to the guest.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a status code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Disposed),
            2 => Some(Self::Unrenewable),
            3 => Some(Self::Gone),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for RenewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Disposed => write!(f, "disposed"),
            Self::Unrenewable => write!(f, "unrenewable"),
            Self::Gone => write!(f, "gone"),
        }
    }
}
