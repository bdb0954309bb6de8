//! Host capabilities the core linker treats as external collaborators
//! (§2): byte-loading a file, the interrupt-critical region, instruction
//! cache flushing, and the register-save call convention constructors and
//! destructors must be invoked through. None of this is the linker's own
//! logic; it exists so the rest of the crate can stay target-agnostic.

use crate::error::{ErrorCode, Result};
use alloc::vec::Vec;
use core::cell::Cell;

/// Reads a file at `path` into a freshly allocated buffer. Models
/// "platform-specific file I/O" (§2 item 2) as a capability object so
/// [`crate::open`]/[`crate::load_map`] don't have to know whether they're
/// talking to a hosted filesystem or a BIOS-style block device.
pub trait ByteLoader {
    fn load(&self, path: &str) -> Result<Vec<u8>>;
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Hosted byte loader backed by `std::fs::read`.
        pub struct StdByteLoader;

        impl ByteLoader for StdByteLoader {
            fn load(&self, path: &str) -> Result<Vec<u8>> {
                std::fs::read(path).map_err(|_| ErrorCode::File.record())
            }
        }

        fn default_loader() -> &'static dyn ByteLoader {
            &StdByteLoader
        }
    } else {
        /// Baremetal builds have no filesystem of their own; `open` and
        /// `load_map` report [`ErrorCode::NoFileApi`] unless a loader is
        /// installed via [`set_byte_loader`].
        pub struct NullByteLoader;

        impl ByteLoader for NullByteLoader {
            fn load(&self, _path: &str) -> Result<Vec<u8>> {
                Err(ErrorCode::NoFileApi.record())
            }
        }

        fn default_loader() -> &'static dyn ByteLoader {
            &NullByteLoader
        }
    }
}

struct LoaderCell(Cell<Option<&'static dyn ByteLoader>>);
unsafe impl Sync for LoaderCell {}
static LOADER: LoaderCell = LoaderCell(Cell::new(None));

/// Install a custom byte loader, e.g. one backed by a BIOS file API on a
/// target with no hosted filesystem.
pub fn set_byte_loader(loader: &'static dyn ByteLoader) {
    LOADER.0.set(Some(loader));
}

pub(crate) fn load(path: &str) -> Result<Vec<u8>> {
    match LOADER.0.get() {
        Some(loader) => loader.load(path),
        None => default_loader().load(path),
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "mips")] {
        extern "C" {
            // BIOS/SDK-provided primitives (§2 item 3, item 4); not defined
            // by this crate.
            fn EnterCriticalSection();
            fn ExitCriticalSection();
            fn FlushCache();

            /// The architecture-specific call stub (§4.4 Step 8): sets
            /// `$gp` to `got` before jumping to `address`, so the callee
            /// can address its own module's globals.
            fn dl_call_with_got(address: usize, got: usize);
        }

        /// Flush the instruction cache within a critical region (§4.4
        /// Step 7): required because a module's GOT can alias fetched
        /// instruction lines on this architecture family.
        pub(crate) fn flush_icache_in_critical_section() {
            unsafe {
                EnterCriticalSection();
                FlushCache();
                ExitCriticalSection();
            }
        }

        pub(crate) fn call_ctor_or_dtor(address: u32, got: u32) {
            unsafe { dl_call_with_got(address as usize, got as usize) };
        }
    } else {
        /// Hosted builds have no instruction cache to flush and nothing
        /// else runs between "enter" and "exit" on a general-purpose OS
        /// thread, so this is a no-op.
        pub(crate) fn flush_icache_in_critical_section() {}

        /// Off-target: no `$gp` register to juggle, so this just calls
        /// through the function pointer. Only meaningful for hosted tests
        /// that synthesize a module image and its constructors/destructors
        /// as ordinary Rust `extern "C" fn`s.
        pub(crate) fn call_ctor_or_dtor(address: u32, _got: u32) {
            let f: extern "C" fn() = unsafe { core::mem::transmute(address as usize as *const ()) };
            f();
        }
    }
}
