//! Guest linear memory access.
//!
//! The guest's memory may be replaced by a larger buffer whenever the guest
//! allocates (growth). [`MemoryView`] therefore never caches a slice: every
//! read and write re-derives it from the [`Guest`], and the view keeps a
//! generation counter that advances whenever it observes a size change.

use log::debug;
use rustc_hash::FxHashMap;

use tether_types::layout::{CODE_UNIT_SIZE, WASM_PAGE_SIZE};
use tether_types::{BridgeError, Result};

// ══════════════════════════════════════════════════════════════════════════════
// Guest
// ══════════════════════════════════════════════════════════════════════════════

/// The guest side of the boundary, as seen by the host.
pub trait Guest {
    /// Current linear memory contents.
    fn memory(&self) -> &[u8];

    /// Current linear memory contents, mutably.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Allocate `size` bytes with the guest's exported allocator.
    ///
    /// May grow (and so replace) linear memory.
    fn malloc(&mut self, size: u32) -> Result<u32>;

    /// Call an exported guest function with `i32` arguments.
    fn call_export(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let _ = args;
        Err(BridgeError::NoGuestCallback(name.to_string()))
    }
}

// ── VecGuest ─────────────────────────────────────────────────────────────────

type Callback = Box<dyn FnMut(&mut [u8], &[i32]) -> i32>;

/// A vector-backed guest: a bump allocator over a `Vec<u8>` that grows in
/// whole pages by replacing its buffer, like a real `memory.grow`.
pub struct VecGuest {
    memory: Vec<u8>,
    heap: u32,
    max_pages: u32,
    callbacks: FxHashMap<String, Callback>,
}

impl VecGuest {
    /// One page of memory with the heap starting at `heap_start`.
    pub fn new(heap_start: u32) -> Self {
        Self::with_pages(1, heap_start)
    }

    pub fn with_pages(pages: u32, heap_start: u32) -> Self {
        Self {
            memory: vec![0; (pages * WASM_PAGE_SIZE) as usize],
            heap: heap_start,
            max_pages: 256,
            callbacks: FxHashMap::default(),
        }
    }

    /// Cap the number of pages; allocations past it fail.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Register an exported callback.
    pub fn with_callback(
        mut self,
        name: &str,
        callback: impl FnMut(&mut [u8], &[i32]) -> i32 + 'static,
    ) -> Self {
        self.callbacks.insert(name.to_string(), Box::new(callback));
        self
    }

    /// Number of whole pages currently allocated.
    pub fn pages(&self) -> u32 {
        self.memory.len() as u32 / WASM_PAGE_SIZE
    }

    /// Next address the allocator will hand out.
    pub fn heap(&self) -> u32 {
        self.heap
    }
}

impl Guest for VecGuest {
    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn malloc(&mut self, size: u32) -> Result<u32> {
        let ptr = self.heap;
        let end = ptr
            .checked_add(size)
            .map(|end| (end + 7) & !7)
            .ok_or_else(|| BridgeError::AllocationFailed {
                size,
                reason: "address space exhausted".into(),
            })?;
        if end as usize > self.memory.len() {
            let pages = end.div_ceil(WASM_PAGE_SIZE);
            if pages > self.max_pages {
                return Err(BridgeError::AllocationFailed {
                    size,
                    reason: format!("would need {pages} pages (max {})", self.max_pages),
                });
            }
            // A fresh buffer, so anything holding the old one is stale.
            let mut grown = vec![0; (pages * WASM_PAGE_SIZE) as usize];
            grown[..self.memory.len()].copy_from_slice(&self.memory);
            self.memory = grown;
        }
        self.heap = end;
        Ok(ptr)
    }

    fn call_export(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let callback = self
            .callbacks
            .get_mut(name)
            .ok_or_else(|| BridgeError::NoGuestCallback(name.to_string()))?;
        Ok(callback(&mut self.memory, args))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// MemoryView
// ══════════════════════════════════════════════════════════════════════════════

/// Typed, bounds-checked access to guest memory for the duration of one call.
pub struct MemoryView<'g> {
    guest: &'g mut dyn Guest,
    observed_len: usize,
    generation: u32,
    max_string_units: u32,
}

macro_rules! typed_access {
    ($($read:ident, $write:ident: $ty:ty;)*) => {
        $(
            pub fn $read(&self, addr: u32) -> Result<$ty> {
                Ok(<$ty>::from_le_bytes(self.read_array(addr)?))
            }

            pub fn $write(&mut self, addr: u32, value: $ty) -> Result<()> {
                self.write_bytes(addr, &value.to_le_bytes())
            }
        )*
    };
}

impl<'g> MemoryView<'g> {
    pub fn new(guest: &'g mut dyn Guest, max_string_units: u32) -> Self {
        let observed_len = guest.memory().len();
        Self {
            guest,
            observed_len,
            generation: 0,
            max_string_units,
        }
    }

    /// Current memory size in bytes.
    pub fn len(&self) -> usize {
        self.guest.memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times this view has observed the memory being replaced.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Compare the current size with the last observed one, advancing the
    /// generation on growth.
    pub fn sync(&mut self) {
        let len = self.guest.memory().len();
        if len != self.observed_len {
            debug!(
                "guest memory grew from {} to {} bytes",
                self.observed_len, len
            );
            self.observed_len = len;
            self.generation += 1;
        }
    }

    fn range(&self, addr: u32, len: u32) -> Result<std::ops::Range<usize>> {
        let size = self.len();
        let start = addr as usize;
        match start.checked_add(len as usize) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(BridgeError::MemoryOutOfBounds { addr, len, size }),
        }
    }

    /// `addr + delta`, or out of bounds when the sum leaves the 32-bit
    /// address space.
    pub fn offset(&self, addr: u32, delta: usize) -> Result<u32> {
        u32::try_from(delta)
            .ok()
            .and_then(|delta| addr.checked_add(delta))
            .ok_or(BridgeError::MemoryOutOfBounds {
                addr,
                len: u32::try_from(delta).unwrap_or(u32::MAX),
                size: self.len(),
            })
    }

    /// Fail unless `count` elements of `stride` bytes starting at `addr`
    /// fit in memory. Element addresses below such a span cannot overflow.
    pub fn check_span(&self, addr: u32, count: u32, stride: u32) -> Result<()> {
        let bytes = u64::from(count) * u64::from(stride);
        if u64::from(addr) + bytes <= self.len() as u64 {
            return Ok(());
        }
        Err(BridgeError::MemoryOutOfBounds {
            addr,
            len: u32::try_from(bytes).unwrap_or(u32::MAX),
            size: self.len(),
        })
    }

    // ── Raw bytes ────────────────────────────────────────────────────────

    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.guest.memory()[range])
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let range = self.range(addr, bytes.len() as u32)?;
        self.guest.memory_mut()[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero `len` bytes at `addr`.
    pub fn fill_zero(&mut self, addr: u32, len: u32) -> Result<()> {
        let range = self.range(addr, len)?;
        self.guest.memory_mut()[range].fill(0);
        Ok(())
    }

    fn read_array<const N: usize>(&self, addr: u32) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(addr, N as u32)?);
        Ok(out)
    }

    // ── Typed overlays ───────────────────────────────────────────────────

    typed_access! {
        read_u8, write_u8: u8;
        read_i8, write_i8: i8;
        read_u16, write_u16: u16;
        read_i16, write_i16: i16;
        read_u32, write_u32: u32;
        read_i32, write_i32: i32;
        read_u64, write_u64: u64;
        read_i64, write_i64: i64;
        read_f32, write_f32: f32;
        read_f64, write_f64: f64;
    }

    // ── UTF-16 strings ───────────────────────────────────────────────────

    /// Read code units up to (not including) the zero terminator.
    pub fn read_units(&self, addr: u32) -> Result<Vec<u16>> {
        let mut units = Vec::new();
        let mut cursor = addr;
        loop {
            if units.len() as u32 >= self.max_string_units {
                return Err(BridgeError::UnterminatedString {
                    addr,
                    limit: self.max_string_units,
                });
            }
            let unit = self.read_u16(cursor)?;
            if unit == 0 {
                return Ok(units);
            }
            units.push(unit);
            cursor = self.offset(cursor, CODE_UNIT_SIZE as usize)?;
        }
    }

    /// Read a null-terminated UTF-16 string.
    pub fn read_string(&self, addr: u32) -> Result<String> {
        Ok(String::from_utf16_lossy(&self.read_units(addr)?))
    }

    /// Write code units followed by a terminator.
    pub fn write_units(&mut self, addr: u32, units: &[u16]) -> Result<()> {
        let mut bytes = Vec::with_capacity((units.len() + 1) * 2);
        for unit in units.iter().chain(std::iter::once(&0)) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        self.write_bytes(addr, &bytes)
    }

    // ── Guest calls ──────────────────────────────────────────────────────

    /// Allocate guest memory. Memory may grow.
    pub fn alloc(&mut self, size: u32) -> Result<u32> {
        let ptr = self.guest.malloc(size)?;
        self.sync();
        self.range(ptr, size)?;
        Ok(ptr)
    }

    /// Allocate and write a null-terminated UTF-16 string.
    pub fn alloc_string(&mut self, text: &str) -> Result<u32> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let ptr = self.alloc((units.len() as u32 + 1) * CODE_UNIT_SIZE)?;
        self.write_units(ptr, &units)?;
        Ok(ptr)
    }

    /// Call back into the guest. Memory may grow.
    pub fn call_export(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let result = self.guest.call_export(name, args);
        self.sync();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access_is_little_endian() {
        let mut guest = VecGuest::new(1024);
        let mut view = MemoryView::new(&mut guest, 64);
        view.write_i32(16, -2).unwrap();
        assert_eq!(view.read_bytes(16, 4).unwrap(), &[0xfe, 0xff, 0xff, 0xff]);
        view.write_f64(32, 1.5).unwrap();
        assert_eq!(view.read_f64(32).unwrap(), 1.5);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut guest = VecGuest::new(1024);
        let view = MemoryView::new(&mut guest, 64);
        let err = view.read_u32(WASM_PAGE_SIZE - 2).unwrap_err();
        assert!(matches!(err, BridgeError::MemoryOutOfBounds { .. }));
        assert!(view.read_u8(u32::MAX).is_err());
    }

    #[test]
    fn test_address_arithmetic_is_checked() {
        let mut guest = VecGuest::new(1024);
        let view = MemoryView::new(&mut guest, 64);
        assert_eq!(view.offset(1024, 16).unwrap(), 1040);
        let err = view.offset(u32::MAX - 7, 16).unwrap_err();
        assert!(matches!(err, BridgeError::MemoryOutOfBounds { addr, .. } if addr == u32::MAX - 7));
        assert!(view.check_span(0, WASM_PAGE_SIZE / 4, 4).is_ok());
        assert!(view.check_span(4, WASM_PAGE_SIZE / 4, 4).is_err());
        assert!(view.check_span(512, u32::MAX, 16).is_err());
    }

    #[test]
    fn test_string_round_trip() {
        let mut guest = VecGuest::new(1024);
        let mut view = MemoryView::new(&mut guest, 64);
        let ptr = view.alloc_string("héllo ✓").unwrap();
        assert_eq!(view.read_string(ptr).unwrap(), "héllo ✓");
        let empty = view.alloc_string("").unwrap();
        assert_eq!(view.read_string(empty).unwrap(), "");
    }

    #[test]
    fn test_unterminated_string() {
        let mut guest = VecGuest::new(1024);
        let mut view = MemoryView::new(&mut guest, 4);
        view.write_bytes(100, &[b'a', 0, b'b', 0, b'c', 0, b'd', 0, b'e', 0])
            .unwrap();
        let err = view.read_string(100).unwrap_err();
        assert!(matches!(err, BridgeError::UnterminatedString { limit: 4, .. }));
    }

    #[test]
    fn test_growth_advances_generation() {
        let mut guest = VecGuest::new(WASM_PAGE_SIZE - 64);
        let mut view = MemoryView::new(&mut guest, 64);
        view.write_u32(128, 7).unwrap();
        assert_eq!(view.generation(), 0);
        let ptr = view.alloc(1024).unwrap();
        assert_eq!(view.generation(), 1);
        assert_eq!(view.len(), 2 * WASM_PAGE_SIZE as usize);
        view.write_u32(ptr + 1000, 9).unwrap();
        assert_eq!(view.read_u32(ptr + 1000).unwrap(), 9);
        assert_eq!(view.read_u32(128).unwrap(), 7);
    }

    #[test]
    fn test_allocation_cap() {
        let mut guest = VecGuest::new(1024).with_max_pages(1);
        let err = guest.malloc(WASM_PAGE_SIZE).unwrap_err();
        assert!(matches!(err, BridgeError::AllocationFailed { .. }));
    }

    #[test]
    fn test_callback() {
        let mut guest = VecGuest::new(1024).with_callback("double", |_, args| args[0] * 2);
        let mut view = MemoryView::new(&mut guest, 64);
        assert_eq!(view.call_export("double", &[21]).unwrap(), 42);
        let err = view.call_export("missing", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::NoGuestCallback(_)));
    }
}
