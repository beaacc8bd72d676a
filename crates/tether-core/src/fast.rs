//! Fast invocation shapes: fixed signatures called with raw machine values.
//!
//! A fast call targets an import bound through the generic path; it skips
//! the slot buffer but otherwise behaves like the generic call. Failures
//! that the generic path would report through the exception slot surface
//! here as a sentinel return.

use std::cell::RefCell;

use tether_types::{BridgeError, FunctionSpec, Handle, Result, ValueKind};

use crate::codec::{number_of, wrap_to_i64};
use crate::handles::HandleRegistry;
use crate::intern::NameTable;
use crate::value::HostValue;

use ValueKind::{InternedName as N, Object as O, I32 as I};

/// Failure return of the `i32` shapes.
pub const I32_SENTINEL: i32 = i32::MIN;
/// Failure return of the `f64` shapes.
pub const F64_SENTINEL: f64 = f64::NAN;

/// The closed set of fast call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FastShape {
    /// `i32(i32)`
    I32I32,
    /// `i32(i32,i32)`
    I32I32I32,
    /// `i32(object)`
    I32Obj,
    /// `i32(object,i32)`
    I32ObjI32,
    /// `i32(object,name)`
    I32ObjName,
    /// `i32(object,i32,i32)`
    I32ObjI32I32,
    /// `i32(object,object)`
    I32ObjObj,
    /// `i32(object,object,i32)`
    I32ObjObjI32,
    /// `i32(object,object,i32,i32)`
    I32ObjObjI32I32,
    /// `f64()`
    F64,
}

impl FastShape {
    pub const ALL: [FastShape; 10] = [
        Self::I32I32,
        Self::I32I32I32,
        Self::I32Obj,
        Self::I32ObjI32,
        Self::I32ObjName,
        Self::I32ObjI32I32,
        Self::I32ObjObj,
        Self::I32ObjObjI32,
        Self::I32ObjObjI32I32,
        Self::F64,
    ];

    pub fn return_kind(self) -> ValueKind {
        match self {
            Self::F64 => ValueKind::F64,
            _ => ValueKind::I32,
        }
    }

    pub fn param_kinds(self) -> &'static [ValueKind] {
        match self {
            Self::I32I32 => &[I],
            Self::I32I32I32 => &[I, I],
            Self::I32Obj => &[O],
            Self::I32ObjI32 => &[O, I],
            Self::I32ObjName => &[O, N],
            Self::I32ObjI32I32 => &[O, I, I],
            Self::I32ObjObj => &[O, O],
            Self::I32ObjObjI32 => &[O, O, I],
            Self::I32ObjObjI32I32 => &[O, O, I, I],
            Self::F64 => &[],
        }
    }

    /// Signature code in the same form as [`FunctionSpec::code`].
    pub fn code(self) -> String {
        let kinds: Vec<&str> = self.param_kinds().iter().map(|k| k.name()).collect();
        format!("{}({})", self.return_kind().name(), kinds.join(","))
    }

    /// Name of the harness entry point for this shape.
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::I32I32 => "host_invoke_i_i",
            Self::I32I32I32 => "host_invoke_i_ii",
            Self::I32Obj => "host_invoke_i_o",
            Self::I32ObjI32 => "host_invoke_i_oi",
            Self::I32ObjName => "host_invoke_i_on",
            Self::I32ObjI32I32 => "host_invoke_i_oii",
            Self::I32ObjObj => "host_invoke_i_oo",
            Self::I32ObjObjI32 => "host_invoke_i_ooi",
            Self::I32ObjObjI32I32 => "host_invoke_i_ooii",
            Self::F64 => "host_invoke_d_v",
        }
    }

    /// Whether a bound import's spec has this shape. Nullability is ignored.
    pub fn matches(self, spec: &FunctionSpec) -> bool {
        spec.return_spec.kind == self.return_kind()
            && spec.params.len() == self.param_kinds().len()
            && spec
                .params
                .iter()
                .zip(self.param_kinds())
                .all(|(param, kind)| param.kind == *kind)
    }

    /// Fatal unless `spec` has this shape and `args` its arity.
    pub fn check(self, spec: &FunctionSpec, args: &[i32], binding: &str) -> Result<()> {
        if self.matches(spec) && args.len() == self.param_kinds().len() {
            return Ok(());
        }
        Err(BridgeError::FastShapeMismatch {
            shape: self.code(),
            binding: binding.to_string(),
            declared: spec.code(),
        })
    }

    /// Pre-resolve raw arguments: handles to objects, intern indices to text.
    ///
    /// `None` when a handle is not tracked or a name is not registered.
    pub fn resolve_args(
        self,
        args: &[i32],
        handles: &RefCell<HandleRegistry>,
        names: &RefCell<NameTable>,
    ) -> Option<Vec<HostValue>> {
        self.param_kinds()
            .iter()
            .zip(args)
            .map(|(kind, &raw)| match kind {
                ValueKind::Object => {
                    let handle = Handle::from_raw(raw)?;
                    handles.borrow().resolve(handle).map(HostValue::Object)
                }
                ValueKind::InternedName => names
                    .borrow()
                    .lookup_by_index(raw)
                    .map(|text| HostValue::String(text.to_string())),
                _ => Some(HostValue::Number(raw as f64)),
            })
            .collect()
    }
}

/// Convert a host result the way the codec writes an `i32` slot.
pub fn return_i32(value: &HostValue) -> i32 {
    match value {
        HostValue::BigInt(n) => *n as i32,
        other if other.is_nullish() => I32_SENTINEL,
        other => number_of(other).map_or(I32_SENTINEL, |n| wrap_to_i64(n) as i32),
    }
}

/// Convert a host result the way the codec writes an `f64` slot.
pub fn return_f64(value: &HostValue) -> f64 {
    number_of(value).unwrap_or(F64_SENTINEL)
}
