//! Tagged value codec: host values to and from 16-byte slots.

use std::cell::RefCell;

use tether_types::layout::{
    CODE_UNIT_SIZE, PRIMARY_OFFSET, SECONDARY_OFFSET, SLOT_SIZE, STRING_ABSENT, STRING_PRESENT,
    TAG_OFFSET,
};
use tether_types::{BridgeError, Handle, ParamSpec, Result, ValueKind};

use crate::handles::{self, HandleRegistry};
use crate::intern::NameTable;
use crate::memory::MemoryView;
use crate::value::HostValue;

/// Convert a number to a 64-bit integer by truncating toward zero and
/// wrapping modulo 2^64. Non-finite values become zero.
pub fn wrap_to_i64(n: f64) -> i64 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    let n = n.trunc();
    if (-TWO_POW_63..TWO_POW_63).contains(&n) {
        return n as i64;
    }
    // Exact: every float this large is a multiple of 2^11.
    (n.rem_euclid(2.0 * TWO_POW_63) as u64) as i64
}

/// Numeric payload for an integer or float kind, or `None` if `value`
/// has no numeric view.
pub(crate) fn number_of(value: &HostValue) -> Option<f64> {
    match value {
        HostValue::String(s) => s.trim().parse().ok(),
        other => other.as_number(),
    }
}

fn integer_of(value: &HostValue) -> Option<i64> {
    match value {
        HostValue::BigInt(n) => Some(*n as i64),
        other => number_of(other).map(wrap_to_i64),
    }
}

/// Reads and writes tagged slots for one binding.
///
/// Holds the shared tables by reference and borrows them only for the
/// duration of a single object or name lookup, so host code running between
/// two codec calls may freely re-enter the engine.
pub struct Marshaler<'e> {
    handles: &'e RefCell<HandleRegistry>,
    names: &'e RefCell<NameTable>,
    binding: &'e str,
}

impl<'e> Marshaler<'e> {
    pub fn new(
        handles: &'e RefCell<HandleRegistry>,
        names: &'e RefCell<NameTable>,
        binding: &'e str,
    ) -> Self {
        Self {
            handles,
            names,
            binding,
        }
    }

    fn mismatch(&self, expected: ValueKind, observed: u8) -> BridgeError {
        BridgeError::MarshalMismatch {
            expected,
            observed,
            binding: self.binding.to_string(),
        }
    }

    fn unmarshalable(&self, value: &HostValue, spec: &ParamSpec) -> BridgeError {
        BridgeError::Unmarshalable {
            found: value.type_name().to_string(),
            spec: spec.to_string(),
            binding: self.binding.to_string(),
        }
    }

    fn absent(&self, spec: &ParamSpec) -> Result<HostValue> {
        if !spec.nullable {
            return Err(BridgeError::NullNotAllowed {
                spec: spec.to_string(),
                binding: self.binding.to_string(),
            });
        }
        Ok(if spec.null_as_undefined {
            HostValue::Undefined
        } else {
            HostValue::Null
        })
    }

    // ══════════════════════════════════════════════════════════════════════
    // Decode
    // ══════════════════════════════════════════════════════════════════════

    /// Read the slot at `slot` as `spec`.
    pub fn decode(&self, view: &MemoryView<'_>, slot: u32, spec: &ParamSpec) -> Result<HostValue> {
        // The tag is the last byte read; once it is in bounds so is the slot.
        let tag = view.read_u8(view.offset(slot, TAG_OFFSET as usize)?)?;
        let observed = ValueKind::from_tag(tag);

        let kind = match (spec.kind, observed) {
            (ValueKind::Void, Some(ValueKind::Void)) => return Ok(HostValue::Undefined),
            (_, Some(ValueKind::Void)) if spec.nullable => return self.absent(spec),
            (expected, Some(observed)) if expected == observed => expected,
            (ValueKind::I32, Some(ValueKind::Pointer)) => ValueKind::Pointer,
            // The demoted form `encode` writes for names not yet interned.
            (ValueKind::InternedName, Some(ValueKind::String)) => ValueKind::String,
            (expected, _) => return Err(self.mismatch(expected, tag)),
        };

        let at = slot + PRIMARY_OFFSET;
        let value = match kind {
            ValueKind::Void => HostValue::Undefined,
            ValueKind::Bool => HostValue::Bool(view.read_u8(at)? != 0),
            ValueKind::U8 => HostValue::Number(view.read_u8(at)? as f64),
            ValueKind::I8 => HostValue::Number(view.read_i8(at)? as f64),
            ValueKind::U16 => HostValue::Number(view.read_u16(at)? as f64),
            ValueKind::I16 => HostValue::Number(view.read_i16(at)? as f64),
            ValueKind::U32 => HostValue::Number(view.read_u32(at)? as f64),
            ValueKind::I32 => HostValue::Number(view.read_i32(at)? as f64),
            ValueKind::U64 => HostValue::BigInt(view.read_u64(at)? as i128),
            ValueKind::I64 => HostValue::BigInt(view.read_i64(at)? as i128),
            ValueKind::F32 => HostValue::Number(view.read_f32(at)? as f64),
            ValueKind::F64 => HostValue::Number(view.read_f64(at)?),
            ValueKind::Pointer if spec.kind == ValueKind::I32 => {
                HostValue::Number(view.read_i32(at)? as f64)
            }
            ValueKind::Pointer => HostValue::Pointer {
                addr: view.read_u32(at)?,
                len: view.read_u32(slot + SECONDARY_OFFSET)?,
            },
            ValueKind::String => {
                let ptr = view.read_u32(at)?;
                if ptr == 0 {
                    return self.absent(spec);
                }
                HostValue::String(view.read_string(ptr)?)
            }
            ValueKind::Object => {
                let handle = Handle(view.read_u32(slot + SECONDARY_OFFSET)?);
                let object = self.handles.borrow().resolve(handle);
                HostValue::Object(object.ok_or(BridgeError::HandleNotTracked(handle))?)
            }
            ValueKind::Array => {
                let element = spec.element.as_deref().ok_or(BridgeError::MissingElementSpec)?;
                let addr = view.read_u32(at)?;
                let len = view.read_u32(slot + SECONDARY_OFFSET)?;
                HostValue::Array(self.decode_array(view, addr, len, element)?)
            }
            ValueKind::InternedName => {
                let index = view.read_i32(at)?;
                let names = self.names.borrow();
                let text = names
                    .lookup_by_index(index)
                    .ok_or(BridgeError::UnknownName(index))?;
                HostValue::String(text.to_string())
            }
        };
        Ok(value)
    }

    fn decode_array(
        &self,
        view: &MemoryView<'_>,
        addr: u32,
        len: u32,
        element: &ParamSpec,
    ) -> Result<Vec<HostValue>> {
        if element.kind == ValueKind::String {
            return self.decode_packed_strings(view, addr, len, element);
        }
        view.check_span(addr, len, SLOT_SIZE)?;
        (0..len)
            .map(|i| self.decode(view, addr + i * SLOT_SIZE, element))
            .collect()
    }

    /// Packed string arrays: per element, an optional presence marker (only
    /// for nullable elements) followed by code units and a terminator. A
    /// null element is the absent marker followed by a terminator.
    fn decode_packed_strings(
        &self,
        view: &MemoryView<'_>,
        addr: u32,
        len: u32,
        element: &ParamSpec,
    ) -> Result<Vec<HostValue>> {
        // Every element takes at least a terminator, plus a marker if nullable.
        let min_element = if element.nullable { 2 } else { 1 } * CODE_UNIT_SIZE;
        view.check_span(addr, len, min_element)?;
        let mut items = Vec::new();
        let mut cursor = addr;
        for _ in 0..len {
            if element.nullable {
                let marker = view.read_u16(cursor)?;
                cursor = view.offset(cursor, CODE_UNIT_SIZE as usize)?;
                if marker == STRING_ABSENT {
                    cursor = view.offset(cursor, CODE_UNIT_SIZE as usize)?;
                    items.push(self.absent(element)?);
                    continue;
                }
            }
            let units = view.read_units(cursor)?;
            cursor = view.offset(cursor, (units.len() + 1) * CODE_UNIT_SIZE as usize)?;
            items.push(HostValue::String(String::from_utf16_lossy(&units)));
        }
        Ok(items)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Encode
    // ══════════════════════════════════════════════════════════════════════

    /// Write `value` into the slot at `slot` as `spec`.
    ///
    /// The tag written always equals `spec.kind`, except that absence is
    /// written as `void` and a name that is not interned yet is demoted to
    /// `string`.
    pub fn encode(
        &self,
        view: &mut MemoryView<'_>,
        slot: u32,
        spec: &ParamSpec,
        value: &HostValue,
    ) -> Result<()> {
        view.fill_zero(slot, SLOT_SIZE)?;
        if spec.kind == ValueKind::Void {
            return Ok(());
        }
        if value.is_nullish() {
            self.absent(spec)?;
            return Ok(());
        }

        let at = slot + PRIMARY_OFFSET;
        let mut tag = spec.kind;
        match spec.kind {
            ValueKind::Void => {}
            ValueKind::Bool => view.write_u8(at, value.truthy() as u8)?,
            ValueKind::U8 => view.write_u8(at, self.integer(value, spec)? as u8)?,
            ValueKind::I8 => view.write_i8(at, self.integer(value, spec)? as i8)?,
            ValueKind::U16 => view.write_u16(at, self.integer(value, spec)? as u16)?,
            ValueKind::I16 => view.write_i16(at, self.integer(value, spec)? as i16)?,
            ValueKind::U32 => view.write_u32(at, self.integer(value, spec)? as u32)?,
            ValueKind::I32 => view.write_i32(at, self.integer(value, spec)? as i32)?,
            ValueKind::U64 => view.write_u64(at, self.integer(value, spec)? as u64)?,
            ValueKind::I64 => view.write_i64(at, self.integer(value, spec)?)?,
            ValueKind::F32 => view.write_f32(at, self.number(value, spec)? as f32)?,
            ValueKind::F64 => view.write_f64(at, self.number(value, spec)?)?,
            ValueKind::Pointer => {
                let (addr, len) = match value {
                    HostValue::Pointer { addr, len } => (*addr, *len),
                    other => (self.integer(other, spec)? as u32, 0),
                };
                view.write_u32(at, addr)?;
                view.write_u32(slot + SECONDARY_OFFSET, len)?;
            }
            ValueKind::String => {
                let ptr = view.alloc_string(&value.to_display_string())?;
                view.write_u32(at, ptr)?;
            }
            ValueKind::Object => {
                let HostValue::Object(obj) = value else {
                    return Err(self.unmarshalable(value, spec));
                };
                let handle = handles::assign(self.handles, obj);
                view.write_u32(slot + SECONDARY_OFFSET, handle.0)?;
            }
            ValueKind::Array => {
                let element = spec.element.as_deref().ok_or(BridgeError::MissingElementSpec)?;
                let HostValue::Array(items) = value else {
                    return Err(self.unmarshalable(value, spec));
                };
                let addr = self.encode_array(view, items, element)?;
                view.write_u32(at, addr)?;
                view.write_u32(slot + SECONDARY_OFFSET, items.len() as u32)?;
            }
            ValueKind::InternedName => {
                let text = value.to_display_string();
                let index = self.names.borrow().lookup_by_text(&text);
                match index {
                    Some(index) => view.write_i32(at, index)?,
                    None => {
                        let ptr = view.alloc_string(&text)?;
                        view.write_u32(at, ptr)?;
                        tag = ValueKind::String;
                    }
                }
            }
        }
        view.write_u8(slot + TAG_OFFSET, tag.tag())
    }

    fn encode_array(
        &self,
        view: &mut MemoryView<'_>,
        items: &[HostValue],
        element: &ParamSpec,
    ) -> Result<u32> {
        if items.is_empty() {
            return Ok(0);
        }
        if element.kind == ValueKind::String {
            return self.encode_packed_strings(view, items, element);
        }
        let addr = view.alloc(items.len() as u32 * SLOT_SIZE)?;
        for (i, item) in items.iter().enumerate() {
            self.encode(view, addr + i as u32 * SLOT_SIZE, element, item)?;
        }
        Ok(addr)
    }

    fn encode_packed_strings(
        &self,
        view: &mut MemoryView<'_>,
        items: &[HostValue],
        element: &ParamSpec,
    ) -> Result<u32> {
        let mut units: Vec<u16> = Vec::new();
        for item in items {
            if item.is_nullish() {
                self.absent(element)?;
                units.extend([STRING_ABSENT, 0]);
                continue;
            }
            if element.nullable {
                units.push(STRING_PRESENT);
            }
            units.extend(item.to_display_string().encode_utf16());
            units.push(0);
        }
        let bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        let addr = view.alloc(bytes.len() as u32)?;
        view.write_bytes(addr, &bytes)?;
        Ok(addr)
    }

    fn number(&self, value: &HostValue, spec: &ParamSpec) -> Result<f64> {
        number_of(value).ok_or_else(|| self.unmarshalable(value, spec))
    }

    fn integer(&self, value: &HostValue, spec: &ParamSpec) -> Result<i64> {
        integer_of(value).ok_or_else(|| self.unmarshalable(value, spec))
    }
}
