//! The boundary engine: one context object owning every table, serving the
//! binding entry points the guest calls.
//!
//! All state sits behind `RefCell`s and every entry point takes `&self`, so
//! a host callable may call back into the guest, which may in turn call
//! back into the engine. No borrow is held across a host call or a guest
//! allocation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, error, trace, warn};
use serde::Serialize;

use tether_types::layout::{
    param_offset, FRAME_EXCEPTION_OFFSET, FRAME_RETURN_OFFSET, FUNCTION_SPEC_SIZE, SLOT_SIZE,
};
use tether_types::{BridgeError, FunctionSpec, Handle, ParamSpec, RenewOutcome, Result, ValueKind};

use crate::builtins::{object_module, OBJECT_MODULE};
use crate::codec::Marshaler;
use crate::config::EngineConfig;
use crate::fast::{return_f64, return_i32, FastShape, F64_SENTINEL, I32_SENTINEL};
use crate::handles::{self, HandleRegistry};
use crate::host::{CallContext, HostError, ImportTable};
use crate::imports::{BindingTable, BoundImport, ImportStats};
use crate::intern::NameTable;
use crate::memory::{Guest, MemoryView};
use crate::object::{EmptyWorld, HostWorld, ObjectRef};
use crate::value::HostValue;

/// Status returned by `invokeImport`.
pub const INVOKE_OK: i32 = 1;
/// Status returned by `invokeImport` when the exception slot holds an error.
pub const INVOKE_FAILED: i32 = 0;

/// Size of one handle in a guest handle array.
const HANDLE_SIZE: u32 = 4;

/// Snapshot of the engine's tables.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cycle: u64,
    pub bound_imports: usize,
    pub live_handles: usize,
    pub interned_names: usize,
    pub imports: Vec<ImportStats>,
}

/// Bytes of a wire spec readable at `spec_ptr`; short reads are rejected by
/// the decoder rather than the memory view.
fn spec_window(memory_len: usize, spec_ptr: u32) -> u32 {
    memory_len
        .saturating_sub(spec_ptr as usize)
        .min(FUNCTION_SPEC_SIZE as usize) as u32
}

/// Boundary engine context. One per guest instance.
pub struct BoundaryEngine {
    config: EngineConfig,
    bindings: RefCell<BindingTable>,
    handles: RefCell<HandleRegistry>,
    names: RefCell<NameTable>,
    world: RefCell<Option<Rc<dyn HostWorld>>>,
    cycle: Cell<u64>,
}

impl Default for BoundaryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl BoundaryEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut bindings = BindingTable::new(config.log_bindings);
        if config.builtin_object_module {
            bindings.register_module(OBJECT_MODULE, object_module());
        }
        Self {
            handles: RefCell::new(HandleRegistry::with_capacity(config.handle_capacity)),
            bindings: RefCell::new(bindings),
            names: RefCell::new(NameTable::new()),
            world: RefCell::new(None),
            cycle: Cell::new(0),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn view<'g>(&self, guest: &'g mut dyn Guest) -> MemoryView<'g> {
        MemoryView::new(guest, self.config.max_string_units)
    }

    fn marshaler<'e>(&'e self, binding: &'e str) -> Marshaler<'e> {
        Marshaler::new(&self.handles, &self.names, binding)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Binding
    // ══════════════════════════════════════════════════════════════════════

    /// Publish a capability module the guest can bind imports against.
    pub fn register_module(&self, name: &str, table: ImportTable) {
        self.bindings.borrow_mut().register_module(name, table);
    }

    /// Bind `module`/`path` with an already decoded spec.
    pub fn bind(&self, module: &str, path: &str, spec: FunctionSpec) -> Result<i32> {
        self.bindings.borrow_mut().bind(module, path, spec)
    }

    /// `bindImport(modulePtr, pathPtr, specPtr)`: `-1` if the path does not
    /// resolve; malformed specs are errors.
    pub fn bind_import(
        &self,
        guest: &mut dyn Guest,
        module_ptr: u32,
        path_ptr: u32,
        spec_ptr: u32,
    ) -> Result<i32> {
        let view = self.view(guest);
        let module = view.read_string(module_ptr)?;
        let path = view.read_string(path_ptr)?;
        let spec_bytes = view.read_bytes(spec_ptr, spec_window(view.len(), spec_ptr))?;
        let spec = FunctionSpec::from_wire(spec_bytes)?;
        match self.bind(&module, &path, spec) {
            Ok(index) => Ok(index),
            Err(err @ BridgeError::UnresolvedImport { .. }) => {
                error!("{err}");
                Ok(-1)
            }
            Err(err) => Err(err),
        }
    }

    fn import(&self, index: i32) -> Result<Rc<BoundImport>> {
        self.bindings.borrow().get(index)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Generic invocation
    // ══════════════════════════════════════════════════════════════════════

    /// `invokeImport(index, frame)`: [`INVOKE_OK`], or [`INVOKE_FAILED`] with
    /// the failure text in the exception slot. Fatal errors are returned.
    pub fn invoke_import(&self, guest: &mut dyn Guest, index: i32, frame: u32) -> Result<i32> {
        let import = self.import(index)?;
        let mut view = self.view(guest);
        let ret = view.offset(frame, FRAME_RETURN_OFFSET as usize)?;
        let exception = view.offset(frame, FRAME_EXCEPTION_OFFSET as usize)?;
        view.fill_zero(exception, SLOT_SIZE)?;

        let outcome = self.call_generic(&import, &mut view, frame, ret);
        import.record(outcome.is_ok());
        match outcome {
            Ok(()) => Ok(INVOKE_OK),
            Err(HostError::Bridge(err)) if err.is_fatal() => Err(err),
            Err(err) => {
                let message = err.message();
                debug!("{} failed: {message}", import.label);
                view.fill_zero(ret, SLOT_SIZE)?;
                self.marshaler(&import.label).encode(
                    &mut view,
                    exception,
                    &ParamSpec::new(ValueKind::String),
                    &HostValue::String(message),
                )?;
                Ok(INVOKE_FAILED)
            }
        }
    }

    fn call_generic(
        &self,
        import: &BoundImport,
        view: &mut MemoryView<'_>,
        frame: u32,
        ret: u32,
    ) -> std::result::Result<(), HostError> {
        let marshaler = self.marshaler(&import.label);
        let args = import
            .spec
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| marshaler.decode(view, view.offset(frame, param_offset(i))?, spec))
            .collect::<Result<Vec<_>>>()?;
        trace!("{}({args:?})", import.label);

        let result = {
            let mut ctx = CallContext::new(view, &import.label);
            (import.func())(&mut ctx, &args)?
        };
        marshaler.encode(view, ret, &import.spec.return_spec, &result)?;
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Fast invocation
    // ══════════════════════════════════════════════════════════════════════

    fn call_fast(
        &self,
        guest: &mut dyn Guest,
        shape: FastShape,
        index: i32,
        args: &[i32],
    ) -> Result<Option<HostValue>> {
        let import = self.import(index)?;
        shape.check(&import.spec, args, &import.label)?;
        let Some(values) = shape.resolve_args(args, &self.handles, &self.names) else {
            import.record(false);
            return Ok(None);
        };
        trace!("{} [{}]({values:?})", import.label, shape.code());

        let mut view = self.view(guest);
        let mut ctx = CallContext::new(&mut view, &import.label);
        match (import.func())(&mut ctx, &values) {
            Ok(value) => {
                import.record(true);
                Ok(Some(value))
            }
            Err(HostError::Bridge(err)) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!("{} failed: {}", import.label, err.message());
                import.record(false);
                Ok(None)
            }
        }
    }

    /// Call an `i32`-returning shape. Recoverable failures return
    /// [`I32_SENTINEL`].
    pub fn invoke_fast_i32(
        &self,
        guest: &mut dyn Guest,
        shape: FastShape,
        index: i32,
        args: &[i32],
    ) -> Result<i32> {
        Ok(self
            .call_fast(guest, shape, index, args)?
            .map_or(I32_SENTINEL, |value| return_i32(&value)))
    }

    /// Call the `f64()` shape. Recoverable failures return [`F64_SENTINEL`].
    pub fn invoke_fast_f64(&self, guest: &mut dyn Guest, index: i32) -> Result<f64> {
        Ok(self
            .call_fast(guest, FastShape::F64, index, &[])?
            .map_or(F64_SENTINEL, |value| return_f64(&value)))
    }

    // ══════════════════════════════════════════════════════════════════════
    // Handles
    // ══════════════════════════════════════════════════════════════════════

    /// The handle for a host object, assigning one if needed.
    pub fn handle_for(&self, obj: &ObjectRef) -> Handle {
        handles::assign(&self.handles, obj)
    }

    pub fn resolve(&self, handle: Handle) -> Option<ObjectRef> {
        self.handles.borrow().resolve(handle)
    }

    /// `releaseHandle(handle)`. Unknown and negative handles are ignored.
    pub fn release_handle(&self, raw: i32) {
        if let Some(handle) = Handle::from_raw(raw) {
            self.handles.borrow_mut().release(handle);
        }
    }

    /// `releaseHandles(ptr, count)`.
    pub fn release_handles(&self, guest: &mut dyn Guest, ptr: u32, count: u32) -> Result<()> {
        let view = self.view(guest);
        view.check_span(ptr, count, HANDLE_SIZE)?;
        let raw = (0..count)
            .map(|i| view.read_i32(ptr + i * HANDLE_SIZE))
            .collect::<Result<Vec<_>>>()?;
        let mut registry = self.handles.borrow_mut();
        for handle in raw.into_iter().filter_map(Handle::from_raw) {
            registry.release(handle);
        }
        Ok(())
    }

    /// Release every handle `keep` rejects.
    pub fn sweep_handles(&self, keep: impl FnMut(Handle, &ObjectRef) -> bool) -> usize {
        let removed = handles::sweep(&self.handles, keep);
        if removed > 0 {
            debug!("swept {removed} handles");
        }
        removed
    }

    // ══════════════════════════════════════════════════════════════════════
    // Interned names
    // ══════════════════════════════════════════════════════════════════════

    pub fn register_name(&self, index: i32, text: &str) {
        self.names.borrow_mut().register(index, text);
    }

    /// `registerInternedName(index, textPtr)`.
    pub fn register_interned_name(
        &self,
        guest: &mut dyn Guest,
        index: i32,
        text_ptr: u32,
    ) -> Result<()> {
        let text = self.view(guest).read_string(text_ptr)?;
        self.register_name(index, &text);
        Ok(())
    }

    pub fn name(&self, index: i32) -> Option<String> {
        self.names.borrow().lookup_by_index(index).map(str::to_string)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Cycles and renewal
    // ══════════════════════════════════════════════════════════════════════

    /// Install the world for a new cycle. Returns the new cycle number.
    pub fn begin_cycle(&self, world: Rc<dyn HostWorld>) -> u64 {
        *self.world.borrow_mut() = Some(world);
        let cycle = self.cycle.get() + 1;
        self.cycle.set(cycle);
        debug!(
            "cycle {cycle} begins with {} live handles",
            self.handles.borrow().len()
        );
        cycle
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.get()
    }

    fn world(&self) -> Rc<dyn HostWorld> {
        match self.world.borrow().clone() {
            Some(world) => world,
            None => {
                warn!("renewal requested before any cycle began; treating the world as empty");
                Rc::new(EmptyWorld)
            }
        }
    }

    /// `renewHandle(handle)`.
    pub fn renew_handle(&self, raw: i32) -> RenewOutcome {
        let Some(handle) = Handle::from_raw(raw) else {
            return RenewOutcome::Disposed;
        };
        let world = self.world();
        handles::renew(&self.handles, handle, world.as_ref())
    }

    /// `renewHandles(ptr, count)`: renews in place, writing `-1` over every
    /// handle that did not renew. Returns the success count.
    pub fn renew_handles(&self, guest: &mut dyn Guest, ptr: u32, count: u32) -> Result<u32> {
        let mut view = self.view(guest);
        view.check_span(ptr, count, HANDLE_SIZE)?;
        let mut raw = (0..count)
            .map(|i| view.read_i32(ptr + i * HANDLE_SIZE))
            .collect::<Result<Vec<_>>>()?;
        let world = self.world();
        let renewed = handles::renew_batch(&self.handles, &mut raw, world.as_ref());
        for (i, handle) in (0..count).zip(raw) {
            view.write_i32(ptr + i * HANDLE_SIZE, handle)?;
        }
        Ok(renewed)
    }

    /// The handle of the current instance carrying `id`, if any.
    pub fn object_by_domain_id(&self, id: &str) -> Option<Handle> {
        let obj = self.world().find_by_domain_id(id)?;
        Some(self.handle_for(&obj))
    }

    /// `getObjectByDomainId(idPtr)`: a handle, or `-1`.
    pub fn get_object_by_domain_id(&self, guest: &mut dyn Guest, id_ptr: u32) -> Result<i32> {
        let id = self.view(guest).read_string(id_ptr)?;
        Ok(self.object_by_domain_id(&id).map_or(-1, Handle::raw))
    }

    /// `getObjectDomainId(handle, outPtr, capacity)`: copies the domain id,
    /// truncated to `capacity - 1` code units plus a terminator. Returns the
    /// number of units written; 0 when the object is untracked or has none.
    pub fn get_object_domain_id(
        &self,
        guest: &mut dyn Guest,
        raw: i32,
        out_ptr: u32,
        capacity: u32,
    ) -> Result<i32> {
        let id = Handle::from_raw(raw)
            .and_then(|handle| self.resolve(handle))
            .and_then(|obj| obj.domain_id());
        let Some(id) = id else {
            return Ok(0);
        };
        if capacity == 0 {
            return Ok(0);
        }
        let units: Vec<u16> = id
            .encode_utf16()
            .take(capacity as usize - 1)
            .collect();
        self.view(guest).write_units(out_ptr, &units)?;
        Ok(units.len() as i32)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Stats
    // ══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> EngineStats {
        let bindings = self.bindings.borrow();
        EngineStats {
            cycle: self.cycle.get(),
            bound_imports: bindings.len(),
            live_handles: self.handles.borrow().len(),
            interned_names: self.names.borrow().len(),
            imports: bindings.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecGuest;
    use crate::object::{CycleIndex, PlainObject};

    fn quiet() -> BoundaryEngine {
        BoundaryEngine::new(EngineConfig {
            log_bindings: false,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_builtin_module_is_configurable() {
        let spec = FunctionSpec::new(ParamSpec::new(ValueKind::Object), vec![]).unwrap();
        assert!(quiet().bind(OBJECT_MODULE, "create", spec.clone()).is_ok());
        let bare = BoundaryEngine::new(EngineConfig {
            builtin_object_module: false,
            ..EngineConfig::default()
        });
        assert!(bare.bind(OBJECT_MODULE, "create", spec).is_err());
    }

    #[test]
    fn test_renew_without_world_is_empty() {
        let engine = quiet();
        let obj = PlainObject::new("Creep").with_domain_id("X").into_ref();
        let h = engine.handle_for(&obj);
        assert_eq!(engine.renew_handle(h.raw()), RenewOutcome::Gone);
        assert_eq!(engine.renew_handle(-4), RenewOutcome::Disposed);
    }

    #[test]
    fn test_begin_cycle_counts() {
        let engine = quiet();
        assert_eq!(engine.begin_cycle(Rc::new(CycleIndex::new())), 1);
        assert_eq!(engine.begin_cycle(Rc::new(CycleIndex::new())), 2);
        assert_eq!(engine.stats().cycle, 2);
    }

    #[test]
    fn test_stats_serialize() {
        let engine = quiet();
        let spec = FunctionSpec::new(ParamSpec::new(ValueKind::Object), vec![]).unwrap();
        engine.bind(OBJECT_MODULE, "create", spec).unwrap();
        let json = serde_json::to_value(engine.stats()).unwrap();
        assert_eq!(json["bound_imports"], 1);
        assert_eq!(json["imports"][0]["label"], "__object::create");
    }

    #[test]
    fn test_domain_id_copy_truncates() {
        let engine = quiet();
        let mut guest = VecGuest::new(4096);
        let obj = PlainObject::new("Creep").with_domain_id("abcdef").into_ref();
        let h = engine.handle_for(&obj);
        assert_eq!(engine.get_object_domain_id(&mut guest, h.raw(), 100, 4).unwrap(), 3);
        let view = MemoryView::new(&mut guest, 64);
        assert_eq!(view.read_string(100).unwrap(), "abc");
        drop(view);
        assert_eq!(engine.get_object_domain_id(&mut guest, 99, 100, 4).unwrap(), 0);
    }

    #[test]
    fn test_spec_window_at_full_address_space() {
        const FOUR_GIB: usize = 1 << 32;
        assert_eq!(spec_window(FOUR_GIB, 64), FUNCTION_SPEC_SIZE);
        assert_eq!(spec_window(FOUR_GIB, u32::MAX - 3), 4);
        assert_eq!(spec_window(65_536, 65_530), 6);
        assert_eq!(spec_window(65_536, 70_000), 0);
    }
}
