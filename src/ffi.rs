//! C ABI over `HybridSystem` for host simulators.
//!
//! A controller is created from a TOML config path and handed out as an opaque pointer. Every
//! call takes that pointer back; errors are logged and reported as a negative return value.

use std::ffi::CStr;
use std::path::PathBuf;
use std::ptr;

use libc::{c_char, c_int};
use log::error;

use crate::hybrid::{HybridConfig, HybridSystem};

fn create(config_path: *const c_char) -> anyhow::Result<HybridSystem> {
    if config_path.is_null() {
        anyhow::bail!("config path is null");
    }
    let path = unsafe { CStr::from_ptr(config_path) };
    let path = PathBuf::from(path.to_str()?);
    HybridSystem::new(HybridConfig::load(&path)?)
}

fn report(result: anyhow::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => {
            error!("{:#}", err);
            -1
        }
    }
}

/// Returns null if the config cannot be loaded.
#[no_mangle]
pub extern "C" fn hybridmem_new(config_path: *const c_char) -> *mut HybridSystem {
    let _ = env_logger::try_init();
    match create(config_path) {
        Ok(system) => Box::into_raw(Box::new(system)),
        Err(err) => {
            error!("cannot create hybrid controller: {:#}", err);
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_add_transaction(
    handle: *mut HybridSystem,
    is_write: u8,
    addr: u64,
) -> u8 {
    match unsafe { handle.as_mut() } {
        Some(system) => system.add_transaction(is_write != 0, addr) as u8,
        None => 0,
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_add_prefetch(handle: *mut HybridSystem, addr: u64) {
    if let Some(system) = unsafe { handle.as_mut() } {
        system.add_prefetch(addr);
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_add_flush(handle: *mut HybridSystem, addr: u64) {
    if let Some(system) = unsafe { handle.as_mut() } {
        system.add_flush(addr);
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_update(handle: *mut HybridSystem) -> c_int {
    match unsafe { handle.as_mut() } {
        Some(system) => report(system.update()),
        None => -1,
    }
}

/// Pops one finished request into the out-parameters. Returns 1 if one was written, 0 if
/// none is waiting.
///
/// # Safety
/// `handle` must come from `hybridmem_new`; the out-pointers must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_poll_completion(
    handle: *mut HybridSystem,
    addr: *mut u64,
    cycle: *mut u64,
    is_write: *mut u8,
) -> c_int {
    let Some(system) = (unsafe { handle.as_mut() }) else {
        return -1;
    };
    if addr.is_null() || cycle.is_null() || is_write.is_null() {
        return -1;
    }
    match system.poll_completion() {
        Some(done) => {
            unsafe {
                *addr = done.addr;
                *cycle = done.cycle;
                *is_write = done.is_write as u8;
            }
            1
        }
        None => 0,
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_mmio(handle: *mut HybridSystem, op: u64, addr: u64) -> c_int {
    match unsafe { handle.as_mut() } {
        Some(system) => report(system.mmio(op, addr)),
        None => -1,
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_sync_all(handle: *mut HybridSystem) {
    if let Some(system) = unsafe { handle.as_mut() } {
        system.sync_all();
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_print_logfile(handle: *mut HybridSystem) -> c_int {
    match unsafe { handle.as_mut() } {
        Some(system) => report(system.print_logfile()),
        None => -1,
    }
}

/// # Safety
/// `handle` must come from `hybridmem_new`; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn hybridmem_free(handle: *mut HybridSystem) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::fs;

    use super::*;

    const CONFIG: &str = "
[hybrid]
total_pages = 64
cache_pages = 8
set_size = 2
controller_delay = 1

[back_memory]
base_latency = 30
burst_bytes = 4096
bytes_per_cycle = 256
";

    #[test]
    fn read_round_trip_through_c_abi() {
        let path = std::env::temp_dir().join(format!("hybridmem_ffi_{}.toml", std::process::id()));
        fs::write(&path, CONFIG).unwrap();
        let c_path = CString::new(path.to_str().unwrap()).unwrap();

        let handle = hybridmem_new(c_path.as_ptr());
        assert!(!handle.is_null());
        unsafe {
            assert_eq!(hybridmem_add_transaction(handle, 0, 0x1040), 1);
            let (mut addr, mut cycle, mut is_write) = (0u64, 0u64, 9u8);
            let mut found = 0;
            for _ in 0..2_000 {
                assert_eq!(hybridmem_update(handle), 0);
                found = hybridmem_poll_completion(handle, &mut addr, &mut cycle, &mut is_write);
                if found == 1 {
                    break;
                }
            }
            assert_eq!(found, 1);
            assert_eq!(addr, 0x1040);
            assert_eq!(is_write, 0);
            assert!(cycle > 30);
            assert_eq!(hybridmem_mmio(handle, 9, 0), -1);
            hybridmem_free(handle);
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn bad_config_gives_null() {
        let c_path = CString::new("/nonexistent/hybridmem.toml").unwrap();
        assert!(hybridmem_new(c_path.as_ptr()).is_null());
        assert!(hybridmem_new(ptr::null()).is_null());
    }
}
