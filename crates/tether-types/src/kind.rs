use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a value crossing the guest/host boundary.
///
/// The discriminant is the tag byte stored at offset 12 of a tagged slot and
/// the first byte of a wire `ParamSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ValueKind {
    Void = 0,
    Bool = 1,
    U8 = 2,
    I8 = 3,
    U16 = 4,
    I16 = 5,
    U32 = 6,
    I32 = 7,
    U64 = 8,
    I64 = 9,
    F32 = 10,
    F64 = 11,
    Pointer = 12,
    String = 13,
    Object = 14,
    Array = 15,
    InternedName = 16,
}

impl ValueKind {
    /// Every kind, in tag order.
    pub const ALL: [ValueKind; 17] = [
        Self::Void,
        Self::Bool,
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::U32,
        Self::I32,
        Self::U64,
        Self::I64,
        Self::F32,
        Self::F64,
        Self::Pointer,
        Self::String,
        Self::Object,
        Self::Array,
        Self::InternedName,
    ];

    /// Decode a tag byte. Returns `None` for bytes outside the closed set.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// The tag byte for this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Short name used in signature codes and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Pointer => "pointer",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::InternedName => "name",
        }
    }

    /// Integer and floating point kinds (everything encoded as a plain number).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::U8
                | Self::I8
                | Self::U16
                | Self::I16
                | Self::U32
                | Self::I32
                | Self::U64
                | Self::I64
                | Self::F32
                | Self::F64
        )
    }

    /// Kinds whose payload refers to guest or host state rather than a value.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Self::Pointer | Self::String | Self::Object | Self::Array | Self::InternedName
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a raw tag byte, including bytes that are not a known kind.
pub fn tag_name(tag: u8) -> String {
    match ValueKind::from_tag(tag) {
        Some(kind) => kind.name().to_string(),
        None => format!("unknown(0x{tag:02x})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_dense() {
        for (i, kind) in ValueKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, i);
            assert_eq!(ValueKind::from_tag(i as u8), Some(*kind));
        }
        assert_eq!(ValueKind::from_tag(17), None);
        assert_eq!(ValueKind::from_tag(0xff), None);
    }

    #[test]
    fn test_tag_name_unknown() {
        assert_eq!(tag_name(7), "i32");
        assert_eq!(tag_name(0x40), "unknown(0x40)");
    }

    #[test]
    fn test_kind_classification() {
        assert!(ValueKind::F64.is_numeric());
        assert!(!ValueKind::Bool.is_numeric());
        assert!(ValueKind::InternedName.is_reference());
        assert!(!ValueKind::I32.is_reference());
    }
}
