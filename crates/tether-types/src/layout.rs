//! Wire layout constants shared by the guest and the host.
//!
//! Every value crossing the boundary travels in a 16-byte tagged slot:
//!
//! ```text
//! offset+0  : 4 bytes : primary payload (number, pointer, name index)
//! offset+4  : 4 bytes : secondary payload (object handle, array/pointer length)
//! offset+8  : 4 bytes : reserved
//! offset+12 : u8      : ValueKind tag
//! offset+13 : 3 bytes : reserved
//! ```
//!
//! 64-bit scalars (`u64`, `i64`, `f64`) occupy bytes 0..8.
//!
//! # Call frame
//!
//! | Offset | Size   | Purpose                                   |
//! |--------|--------|-------------------------------------------|
//! | 0      | 16     | return slot                               |
//! | 16     | 16     | exception slot (`string` on failure)      |
//! | 32     | 16 × N | parameter slots, N ≤ [`MAX_PARAMS`]       |

/// Size of a tagged slot in bytes.
pub const SLOT_SIZE: u32 = 16;

/// Offset of the primary payload within a slot.
pub const PRIMARY_OFFSET: u32 = 0;
/// Offset of the secondary payload within a slot.
pub const SECONDARY_OFFSET: u32 = 4;
/// Offset of the kind tag within a slot.
pub const TAG_OFFSET: u32 = 12;

// ── Call frame ───────────────────────────────────────────────────────────────

/// Offset of the return slot within a call frame.
pub const FRAME_RETURN_OFFSET: u32 = 0;
/// Offset of the exception slot within a call frame.
pub const FRAME_EXCEPTION_OFFSET: u32 = 16;
/// Offset of the first parameter slot within a call frame.
pub const FRAME_PARAMS_OFFSET: u32 = 32;

/// Maximum number of parameters a bound import may declare.
pub const MAX_PARAMS: usize = 8;

/// Offset of parameter slot `index` from the start of a call frame.
pub fn param_offset(index: usize) -> usize {
    FRAME_PARAMS_OFFSET as usize + index * SLOT_SIZE as usize
}

/// Address of parameter slot `index` in the frame at `frame`, or `None`
/// past the end of the address space.
pub fn param_slot(frame: u32, index: usize) -> Option<u32> {
    u32::try_from(param_offset(index))
        .ok()
        .and_then(|offset| frame.checked_add(offset))
}

// ── Spec encoding ────────────────────────────────────────────────────────────

/// Size of one wire `ParamSpec`: kind, flags, element kind, element flags.
pub const PARAM_SPEC_SIZE: u32 = 4;
/// Size of a wire `FunctionSpec`: return spec followed by eight param specs.
pub const FUNCTION_SPEC_SIZE: u32 = PARAM_SPEC_SIZE * (1 + MAX_PARAMS as u32);

/// `ParamSpec` flag: a `void`-tagged slot is accepted as absence.
pub const FLAG_NULLABLE: u8 = 1 << 0;
/// `ParamSpec` flag: absence decodes as "undefined" rather than "null".
pub const FLAG_NULL_AS_UNDEFINED: u8 = 1 << 1;

// ── Strings ──────────────────────────────────────────────────────────────────

/// Size of one UTF-16 code unit.
pub const CODE_UNIT_SIZE: u32 = 2;

/// Packed string arrays: presence marker written before a non-null element.
pub const STRING_PRESENT: u16 = 1;
/// Packed string arrays: presence marker written for a null element.
pub const STRING_ABSENT: u16 = 0;

// ── Guest memory ─────────────────────────────────────────────────────────────

/// WebAssembly page size in bytes.
pub const WASM_PAGE_SIZE: u32 = 65_536;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_param_addresses() {
        assert_eq!(param_slot(1024, 0), Some(1056));
        assert_eq!(param_slot(1024, 7), Some(1024 + 32 + 7 * 16));
        assert_eq!(param_slot(u32::MAX - 16, 0), None);
    }

    #[test]
    fn test_function_spec_size() {
        assert_eq!(FUNCTION_SPEC_SIZE, 36);
    }
}
