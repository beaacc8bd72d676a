//! Loads a guest module under wasmi and drives its cycles.

use std::rc::Rc;

use log::{debug, info};
use wasmi::{Engine, Instance, Linker, Memory, Module, Store, Val};

use tether_core::{BoundaryEngine, BridgeError, HostWorld};

use crate::error::{Result, RuntimeError};
use crate::link::{link, EngineHost};

/// Store data of a [`GuestRuntime`].
pub struct HostState {
    engine: Rc<BoundaryEngine>,
}

impl EngineHost for HostState {
    fn engine(&self) -> Rc<BoundaryEngine> {
        Rc::clone(&self.engine)
    }
}

/// One instantiated guest bound to one [`BoundaryEngine`].
pub struct GuestRuntime {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
}

impl GuestRuntime {
    /// Compile and instantiate `wasm_bytes`, linking the entry points.
    pub fn new(wasm_bytes: &[u8], engine: Rc<BoundaryEngine>) -> Result<Self> {
        let wasm_engine = Engine::default();
        let module = Module::new(&wasm_engine, wasm_bytes)?;
        let mut store = Store::new(&wasm_engine, HostState { engine });
        let mut linker = <Linker<HostState>>::new(&wasm_engine);
        link(&mut linker)?;

        let instance = linker.instantiate(&mut store, &module)?.start(&mut store)?;
        let memory = instance
            .get_memory(&store, "memory")
            .ok_or_else(|| RuntimeError::MissingExport("memory".into()))?;
        if instance.get_func(&store, "malloc").is_none() {
            return Err(RuntimeError::MissingExport("malloc".into()));
        }
        info!(
            "guest instantiated with {} bytes of memory",
            memory.data(&store).len()
        );
        Ok(Self {
            store,
            instance,
            memory,
        })
    }

    pub fn engine(&self) -> Rc<BoundaryEngine> {
        self.store.data().engine()
    }

    /// Call the guest's `init()` export.
    pub fn init(&mut self) -> Result<()> {
        let init = self
            .instance
            .get_typed_func::<(), ()>(&self.store, "init")
            .map_err(|_| RuntimeError::MissingExport("init".into()))?;
        init.call(&mut self.store, ())?;
        Ok(())
    }

    /// Install `world` as the current cycle's world, then call the guest's
    /// `loop()` export. Returns the cycle number.
    pub fn run_cycle(&mut self, world: Rc<dyn HostWorld>) -> Result<u64> {
        let cycle = self.store.data().engine.begin_cycle(world);
        let run = self
            .instance
            .get_typed_func::<(), ()>(&self.store, "loop")
            .map_err(|_| RuntimeError::MissingExport("loop".into()))?;
        run.call(&mut self.store, ())?;
        debug!("cycle {cycle} done");
        Ok(cycle)
    }

    /// Call an export taking and returning `i32`s. Returns the first result,
    /// or 0 for a function without results.
    pub fn call(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| RuntimeError::MissingExport(name.to_string()))?;
        let params: Vec<Val> = args.iter().map(|&arg| Val::I32(arg)).collect();
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        func.call(&mut self.store, &params, &mut results)?;
        Ok(results.first().and_then(Val::i32).unwrap_or(0))
    }

    /// Snapshot of the guest's linear memory.
    pub fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let size = self.memory().len();
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(BridgeError::MemoryOutOfBounds {
                addr,
                len: len as u32,
                size,
            }
            .into()),
        }
    }

    /// Copy `bytes` into guest memory at `addr`.
    pub fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let range = self.range(addr, bytes.len())?;
        self.memory.data_mut(&mut self.store)[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32> {
        let range = self.range(addr, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.memory()[range]);
        Ok(i32::from_le_bytes(buf))
    }
}
