//! Host entry points, registered under the `tether` import module.
//!
//! Every entry point fetches the engine from the store data, wraps the
//! caller as a [`WasmiGuest`] and forwards. Fatal engine errors become
//! wasm traps.

use std::fmt::Display;
use std::rc::Rc;

use log::error;
use wasmi::{Caller, Linker};

use tether_core::{BoundaryEngine, FastShape};

use crate::error::{Result, RuntimeError};
use crate::guest::WasmiGuest;

/// Import module the guest links the entry points from.
pub const TETHER_MODULE: &str = "tether";

/// Store data that can hand out the boundary engine.
pub trait EngineHost {
    fn engine(&self) -> Rc<BoundaryEngine>;
}

fn trap(err: impl Display) -> wasmi::Error {
    error!("trapping guest: {err}");
    wasmi::Error::new(err.to_string())
}

fn link_error<E: Display>(name: &str) -> impl FnOnce(E) -> RuntimeError + '_ {
    move |e| RuntimeError::Link {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Run `body` with the engine and the calling guest.
fn with_guest<T: EngineHost + 'static, R>(
    caller: &mut Caller<'_, T>,
    body: impl FnOnce(&BoundaryEngine, &mut WasmiGuest<'_, '_, T>) -> tether_types::Result<R>,
) -> std::result::Result<R, wasmi::Error> {
    let engine = caller.data().engine();
    let mut guest = WasmiGuest::new(caller).map_err(trap)?;
    body(&engine, &mut guest).map_err(trap)
}

macro_rules! link_fast_i32 {
    ($linker:ident, $shape:expr, $($arg:ident),+) => {
        $linker
            .func_wrap(
                TETHER_MODULE,
                $shape.entry_point(),
                |mut caller: Caller<'_, T>, index: i32, $($arg: i32),+| {
                    with_guest(&mut caller, |engine, guest| {
                        engine.invoke_fast_i32(guest, $shape, index, &[$($arg),+])
                    })
                },
            )
            .map_err(link_error($shape.entry_point()))?;
    };
}

/// Register every entry point with `linker`.
pub fn link<T: EngineHost + 'static>(linker: &mut Linker<T>) -> Result<()> {
    // ── Binding ──────────────────────────────────────────────────────────

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_bind_import",
            |mut caller: Caller<'_, T>, module_ptr: i32, path_ptr: i32, spec_ptr: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.bind_import(guest, module_ptr as u32, path_ptr as u32, spec_ptr as u32)
                })
            },
        )
        .map_err(link_error("host_bind_import"))?;

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_register_name",
            |mut caller: Caller<'_, T>, index: i32, text_ptr: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.register_interned_name(guest, index, text_ptr as u32)
                })
            },
        )
        .map_err(link_error("host_register_name"))?;

    // ── Generic invocation ───────────────────────────────────────────────

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_invoke_import",
            |mut caller: Caller<'_, T>, index: i32, frame: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.invoke_import(guest, index, frame as u32)
                })
            },
        )
        .map_err(link_error("host_invoke_import"))?;

    // ── Fast invocation ──────────────────────────────────────────────────

    link_fast_i32!(linker, FastShape::I32I32, a);
    link_fast_i32!(linker, FastShape::I32I32I32, a, b);
    link_fast_i32!(linker, FastShape::I32Obj, o);
    link_fast_i32!(linker, FastShape::I32ObjI32, o, a);
    link_fast_i32!(linker, FastShape::I32ObjName, o, n);
    link_fast_i32!(linker, FastShape::I32ObjI32I32, o, a, b);
    link_fast_i32!(linker, FastShape::I32ObjObj, o, p);
    link_fast_i32!(linker, FastShape::I32ObjObjI32, o, p, a);
    link_fast_i32!(linker, FastShape::I32ObjObjI32I32, o, p, a, b);

    linker
        .func_wrap(
            TETHER_MODULE,
            FastShape::F64.entry_point(),
            |mut caller: Caller<'_, T>, index: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.invoke_fast_f64(guest, index)
                })
            },
        )
        .map_err(link_error(FastShape::F64.entry_point()))?;

    // ── Handles ──────────────────────────────────────────────────────────

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_release_handle",
            |caller: Caller<'_, T>, handle: i32| {
                caller.data().engine().release_handle(handle);
            },
        )
        .map_err(link_error("host_release_handle"))?;

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_release_handles",
            |mut caller: Caller<'_, T>, ptr: i32, count: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.release_handles(guest, ptr as u32, count.max(0) as u32)
                })
            },
        )
        .map_err(link_error("host_release_handles"))?;

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_renew_handle",
            |caller: Caller<'_, T>, handle: i32| -> i32 {
                caller.data().engine().renew_handle(handle).code()
            },
        )
        .map_err(link_error("host_renew_handle"))?;

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_renew_handles",
            |mut caller: Caller<'_, T>, ptr: i32, count: i32| {
                with_guest(&mut caller, |engine, guest| {
                    let renewed = engine.renew_handles(guest, ptr as u32, count.max(0) as u32)?;
                    Ok(renewed as i32)
                })
            },
        )
        .map_err(link_error("host_renew_handles"))?;

    // ── Domain ids ───────────────────────────────────────────────────────

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_get_object_by_id",
            |mut caller: Caller<'_, T>, id_ptr: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.get_object_by_domain_id(guest, id_ptr as u32)
                })
            },
        )
        .map_err(link_error("host_get_object_by_id"))?;

    linker
        .func_wrap(
            TETHER_MODULE,
            "host_get_object_id",
            |mut caller: Caller<'_, T>, handle: i32, out_ptr: i32, capacity: i32| {
                with_guest(&mut caller, |engine, guest| {
                    engine.get_object_domain_id(
                        guest,
                        handle,
                        out_ptr as u32,
                        capacity.max(0) as u32,
                    )
                })
            },
        )
        .map_err(link_error("host_get_object_id"))?;

    Ok(())
}
