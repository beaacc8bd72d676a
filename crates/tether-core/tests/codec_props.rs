//! Property tests for the slot codec.
//!
//! - scalar kinds survive encode then decode unchanged
//! - every encoded slot carries the tag of its declared kind
//! - integer kinds wrap modulo their width

use std::cell::RefCell;

use proptest::prelude::*;

use tether_core::codec::{wrap_to_i64, Marshaler};
use tether_core::handles::HandleRegistry;
use tether_core::intern::NameTable;
use tether_core::layout::TAG_OFFSET;
use tether_core::{HostValue, MemoryView, ParamSpec, ValueKind, VecGuest};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

const SLOT: u32 = 128;

/// Encode `value` as `kind`, then decode it. Returns the decoded value and
/// the tag byte left in the slot.
fn through_slot(kind: ValueKind, value: HostValue) -> (HostValue, u8) {
    let handles = RefCell::new(HandleRegistry::new());
    let names = RefCell::new(NameTable::new());
    let marshaler = Marshaler::new(&handles, &names, "props");
    let mut guest = VecGuest::new(1024);
    let mut view = MemoryView::new(&mut guest, 1 << 12);
    let spec = ParamSpec::new(kind);
    marshaler.encode(&mut view, SLOT, &spec, &value).unwrap();
    let tag = view.read_u8(SLOT + TAG_OFFSET).unwrap();
    (marshaler.decode(&view, SLOT, &spec).unwrap(), tag)
}

proptest! {
    #[test]
    fn prop_small_integers_round_trip(n in any::<i16>(), b in any::<u8>()) {
        for (kind, v) in [
            (ValueKind::I16, n as f64),
            (ValueKind::I32, n as f64),
            (ValueKind::U8, b as f64),
            (ValueKind::U16, b as f64),
            (ValueKind::I8, (b as i8) as f64),
        ] {
            let (decoded, tag) = through_slot(kind, HostValue::Number(v));
            prop_assert_eq!(decoded, HostValue::Number(v));
            prop_assert_eq!(tag, kind.tag());
        }
    }

    #[test]
    fn prop_wide_integers_round_trip(n in any::<i32>(), u in any::<u32>(), w in any::<i64>()) {
        prop_assert_eq!(through_slot(ValueKind::I32, n.into()).0, HostValue::Number(n as f64));
        prop_assert_eq!(through_slot(ValueKind::U32, u.into()).0, HostValue::Number(u as f64));
        prop_assert_eq!(
            through_slot(ValueKind::I64, HostValue::BigInt(w as i128)).0,
            HostValue::BigInt(w as i128)
        );
    }

    #[test]
    fn prop_floats_round_trip(x in any::<f64>(), y in any::<f32>()) {
        prop_assert_eq!(through_slot(ValueKind::F64, x.into()).0, HostValue::Number(x));
        let y = y as f64;
        prop_assert_eq!(through_slot(ValueKind::F32, y.into()).0, HostValue::Number(y));
    }

    #[test]
    fn prop_bool_round_trip(b in any::<bool>()) {
        let (decoded, tag) = through_slot(ValueKind::Bool, b.into());
        prop_assert_eq!(decoded, HostValue::Bool(b));
        prop_assert_eq!(tag, ValueKind::Bool.tag());
    }

    #[test]
    fn prop_strings_round_trip(s in "[^\\x00]{0,40}") {
        let (decoded, tag) = through_slot(ValueKind::String, s.as_str().into());
        prop_assert_eq!(decoded, HostValue::String(s));
        prop_assert_eq!(tag, ValueKind::String.tag());
    }

    #[test]
    fn prop_i32_wraps(n in -(1i64 << 52)..(1i64 << 52)) {
        let (decoded, _) = through_slot(ValueKind::I32, HostValue::Number(n as f64));
        prop_assert_eq!(decoded, HostValue::Number(n as i32 as f64));
    }

    #[test]
    fn prop_wrap_truncates_toward_zero(x in -1.0e15f64..1.0e15) {
        prop_assert_eq!(wrap_to_i64(x), x.trunc() as i64);
    }
}
