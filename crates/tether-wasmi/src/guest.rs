//! [`Guest`] over a wasmi [`Caller`].

use wasmi::{Caller, Extern, Func, Memory, Val};

use tether_core::Guest;
use tether_types::{BridgeError, Result};

use crate::error::RuntimeError;

/// The calling guest instance, seen from inside a host entry point.
///
/// Holds the `Memory` handle rather than a slice, so reads after a guest
/// `malloc` see the grown buffer.
pub struct WasmiGuest<'a, 'c, T> {
    caller: &'a mut Caller<'c, T>,
    memory: Memory,
}

impl<'a, 'c, T> WasmiGuest<'a, 'c, T> {
    pub fn new(caller: &'a mut Caller<'c, T>) -> std::result::Result<Self, RuntimeError> {
        let memory = caller
            .get_export("memory")
            .and_then(Extern::into_memory)
            .ok_or_else(|| RuntimeError::MissingExport("memory".into()))?;
        Ok(Self { caller, memory })
    }

    fn export(&self, name: &str) -> Result<Func> {
        self.caller
            .get_export(name)
            .and_then(Extern::into_func)
            .ok_or_else(|| BridgeError::NoGuestCallback(name.to_string()))
    }
}

impl<T> Guest for WasmiGuest<'_, '_, T> {
    fn memory(&self) -> &[u8] {
        self.memory.data(&*self.caller)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.caller)
    }

    fn malloc(&mut self, size: u32) -> Result<u32> {
        let malloc = self
            .export("malloc")?
            .typed::<i32, i32>(&*self.caller)
            .map_err(|e| BridgeError::AllocationFailed {
                size,
                reason: format!("malloc has the wrong signature: {e}"),
            })?;
        let ptr = malloc
            .call(&mut *self.caller, size as i32)
            .map_err(|e| BridgeError::GuestTrap(e.to_string()))?;
        if ptr <= 0 {
            return Err(BridgeError::AllocationFailed {
                size,
                reason: format!("malloc returned {ptr}"),
            });
        }
        Ok(ptr as u32)
    }

    fn call_export(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let func = self.export(name)?;
        let params: Vec<Val> = args.iter().map(|&arg| Val::I32(arg)).collect();
        let mut results = vec![Val::I32(0); func.ty(&*self.caller).results().len()];
        func.call(&mut *self.caller, &params, &mut results)
            .map_err(|e| BridgeError::GuestTrap(e.to_string()))?;
        Ok(results.first().and_then(Val::i32).unwrap_or(0))
    }
}
