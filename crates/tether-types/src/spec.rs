use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BridgeError;
use crate::kind::ValueKind;
use crate::layout::{
    FLAG_NULLABLE, FLAG_NULL_AS_UNDEFINED, FUNCTION_SPEC_SIZE, MAX_PARAMS, PARAM_SPEC_SIZE,
};
use crate::Result;

/// Declared shape of one parameter or return value.
///
/// `element` is present exactly when `kind` is [`ValueKind::Array`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ValueKind,
    #[serde(default)]
    pub nullable: bool,
    /// Absence decodes as "undefined" (missing) instead of "null" (empty).
    #[serde(default)]
    pub null_as_undefined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<ParamSpec>>,
}

impl ParamSpec {
    /// A non-nullable spec of the given scalar or reference kind.
    pub const fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: false,
            null_as_undefined: false,
            element: None,
        }
    }

    /// An array spec with the given element spec.
    pub fn array(element: ParamSpec) -> Self {
        Self {
            kind: ValueKind::Array,
            nullable: false,
            null_as_undefined: false,
            element: Some(Box::new(element)),
        }
    }

    /// The `void` spec, used for "no return value".
    pub const fn void() -> Self {
        Self::new(ValueKind::Void)
    }

    /// Mark the spec nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the spec nullable, decoding absence as "undefined".
    pub fn null_as_undefined(mut self) -> Self {
        self.nullable = true;
        self.null_as_undefined = true;
        self
    }

    /// Wire flag byte.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.nullable {
            flags |= FLAG_NULLABLE;
        }
        if self.null_as_undefined {
            flags |= FLAG_NULL_AS_UNDEFINED;
        }
        flags
    }

    /// Check the element invariant, recursively.
    pub fn validate(&self) -> Result<()> {
        match (&self.kind, &self.element) {
            (ValueKind::Array, None) => Err(BridgeError::MissingElementSpec),
            (ValueKind::Array, Some(element)) => {
                if element.kind == ValueKind::Void {
                    return Err(BridgeError::MissingElementSpec);
                }
                element.validate()
            }
            (kind, Some(_)) => Err(BridgeError::MalformedSpec(format!(
                "element spec given for non-array kind '{kind}'"
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Decode the 4-byte wire form: kind, flags, element kind, element flags.
    pub fn from_wire(bytes: [u8; 4]) -> Result<Self> {
        let [kind, flags, element_kind, element_flags] = bytes;
        let kind = decode_kind(kind)?;
        let element_kind = decode_kind(element_kind)?;
        let mut spec = Self::with_flags(kind, flags);
        match (kind, element_kind) {
            (ValueKind::Array, ValueKind::Void) => return Err(BridgeError::MissingElementSpec),
            (ValueKind::Array, ValueKind::Array) => return Err(BridgeError::MissingElementSpec),
            (ValueKind::Array, element_kind) => {
                spec.element = Some(Box::new(Self::with_flags(element_kind, element_flags)));
            }
            (_, ValueKind::Void) => {}
            (kind, element_kind) => {
                return Err(BridgeError::MalformedSpec(format!(
                    "element kind '{element_kind}' given for non-array kind '{kind}'"
                )))
            }
        }
        Ok(spec)
    }

    /// Encode to the 4-byte wire form.
    pub fn to_wire(&self) -> [u8; 4] {
        match &self.element {
            Some(element) => [
                self.kind.tag(),
                self.flags(),
                element.kind.tag(),
                element.flags(),
            ],
            None => [self.kind.tag(), self.flags(), 0, 0],
        }
    }

    fn with_flags(kind: ValueKind, flags: u8) -> Self {
        Self {
            kind,
            nullable: flags & FLAG_NULLABLE != 0,
            null_as_undefined: flags & FLAG_NULL_AS_UNDEFINED != 0,
            element: None,
        }
    }
}

fn decode_kind(tag: u8) -> Result<ValueKind> {
    ValueKind::from_tag(tag)
        .ok_or_else(|| BridgeError::MalformedSpec(format!("unknown value kind tag {tag}")))
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.element {
            Some(element) => write!(f, "{element}[]")?,
            None => write!(f, "{}", self.kind)?,
        }
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Signature of a bound import: a return spec and up to eight parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub return_spec: ParamSpec,
    pub params: Vec<ParamSpec>,
}

impl FunctionSpec {
    /// Build and validate a function spec.
    pub fn new(return_spec: ParamSpec, params: Vec<ParamSpec>) -> Result<Self> {
        let spec = Self {
            return_spec,
            params,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the parameter count and every element invariant.
    pub fn validate(&self) -> Result<()> {
        if self.params.len() > MAX_PARAMS {
            return Err(BridgeError::TooManyParams(self.params.len()));
        }
        self.return_spec.validate()?;
        for (i, param) in self.params.iter().enumerate() {
            if param.kind == ValueKind::Void {
                return Err(BridgeError::MalformedSpec(format!(
                    "parameter {i} is declared void"
                )));
            }
            param.validate()?;
        }
        Ok(())
    }

    /// Decode the wire form.
    ///
    /// `bytes` may be shorter than [`FUNCTION_SPEC_SIZE`] as long as the
    /// parameter list is terminated by a `void` entry before it runs out.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let mut entries = bytes.chunks_exact(PARAM_SPEC_SIZE as usize);
        let return_spec = match entries.next() {
            Some(chunk) => ParamSpec::from_wire(wire_entry(chunk))?,
            None => {
                return Err(BridgeError::MalformedSpec(
                    "function spec is missing its return spec".into(),
                ))
            }
        };
        let mut params = Vec::new();
        loop {
            if params.len() == MAX_PARAMS {
                break;
            }
            let Some(chunk) = entries.next() else {
                return Err(BridgeError::MalformedSpec(format!(
                    "function spec truncated after {} parameters",
                    params.len()
                )));
            };
            let entry = wire_entry(chunk);
            if entry[0] == ValueKind::Void.tag() {
                break;
            }
            params.push(ParamSpec::from_wire(entry)?);
        }
        Ok(Self {
            return_spec,
            params,
        })
    }

    /// Encode to the fixed-size wire form, padding unused entries with `void`.
    pub fn to_wire(&self) -> [u8; FUNCTION_SPEC_SIZE as usize] {
        let mut out = [0u8; FUNCTION_SPEC_SIZE as usize];
        out[..4].copy_from_slice(&self.return_spec.to_wire());
        for (i, param) in self.params.iter().take(MAX_PARAMS).enumerate() {
            let at = (i + 1) * PARAM_SPEC_SIZE as usize;
            out[at..at + 4].copy_from_slice(&param.to_wire());
        }
        out
    }

    /// Compact signature code, e.g. `i32(object,name)`.
    pub fn code(&self) -> String {
        let kinds: Vec<&str> = self.params.iter().map(|p| p.kind.name()).collect();
        format!("{}({})", self.return_spec.kind.name(), kinds.join(","))
    }
}

fn wire_entry(chunk: &[u8]) -> [u8; 4] {
    [chunk[0], chunk[1], chunk[2], chunk[3]]
}

impl fmt::Display for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "{} ({})", self.return_spec, params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_json_form() {
        let spec = FunctionSpec::new(
            ParamSpec::new(ValueKind::I32),
            vec![ParamSpec::new(ValueKind::InternedName).nullable()],
        )
        .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""kind":"internedName""#), "{json}");
        let back: FunctionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_param_spec_wire_round_trip() {
        let spec = ParamSpec::array(ParamSpec::new(ValueKind::String).nullable()).nullable();
        let wire = spec.to_wire();
        assert_eq!(wire, [15, 1, 13, 1]);
        assert_eq!(ParamSpec::from_wire(wire).unwrap(), spec);
    }

    #[test]
    fn test_array_without_element_is_rejected() {
        let err = ParamSpec::from_wire([15, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, BridgeError::MissingElementSpec));
        let err = ParamSpec {
            kind: ValueKind::Array,
            nullable: false,
            null_as_undefined: false,
            element: None,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, BridgeError::MissingElementSpec));
    }

    #[test]
    fn test_element_on_scalar_is_malformed() {
        let err = ParamSpec::from_wire([7, 0, 13, 0]).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedSpec(_)));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = ParamSpec::from_wire([99, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedSpec(_)));
    }

    #[test]
    fn test_function_spec_terminates_on_void() {
        let bytes = [7, 0, 0, 0, 14, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0];
        let spec = FunctionSpec::from_wire(&bytes).unwrap();
        assert_eq!(spec.return_spec, ParamSpec::new(ValueKind::I32));
        assert_eq!(spec.params.len(), 2);
        assert_eq!(spec.code(), "i32(object,name)");
    }

    #[test]
    fn test_function_spec_full_width() {
        let spec = FunctionSpec::new(
            ParamSpec::void(),
            vec![ParamSpec::new(ValueKind::I32); MAX_PARAMS],
        )
        .unwrap();
        let decoded = FunctionSpec::from_wire(&spec.to_wire()).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_function_spec_truncated() {
        let err = FunctionSpec::from_wire(&[7, 0, 0, 0, 7, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedSpec(_)));
    }

    #[test]
    fn test_too_many_params() {
        let err = FunctionSpec::new(
            ParamSpec::void(),
            vec![ParamSpec::new(ValueKind::I32); MAX_PARAMS + 1],
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::TooManyParams(9)));
    }

    #[test]
    fn test_display() {
        let spec = FunctionSpec::new(
            ParamSpec::new(ValueKind::Object).nullable(),
            vec![
                ParamSpec::new(ValueKind::String),
                ParamSpec::array(ParamSpec::new(ValueKind::I32)),
            ],
        )
        .unwrap();
        assert_eq!(spec.to_string(), "object? (string, i32[])");
    }
}
