//! Module handles: the `.dynamic`-derived layout, GOT, symbol/string
//! tables, and the init/close lifecycle around them (§4.4, §4.6, §4.7).

use crate::dynamic;
use crate::error::{ErrorCode, Result};
use crate::hash::elf_hash;
use crate::platform;
use crate::resolve;
use crate::sym::Sym;
use crate::view::ModuleView;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "mips")] {
        extern "C" {
            /// Defined in the architecture-specific trampoline (§4.5, out
            /// of scope here): saves registers, recovers the module
            /// handle from `got[1]`, calls
            /// [`crate::resolve::_dl_resolve_helper`], then tail-jumps to
            /// the resolved address.
            fn _dl_resolve_wrapper();
        }
    } else {
        /// Off-target stand-in for the assembly trampoline. Its address
        /// is still installed at `got[0]` (§4.4 Step 3) so the invariant
        /// holds under test, but nothing ever jumps through it here:
        /// hosted tests exercise `resolve_symbol_index` directly instead
        /// of simulating a compiler-generated external-call stub.
        extern "C" fn _dl_resolve_wrapper() {
            unreachable!("the lazy-resolve trampoline is architecture-specific assembly; this stand-in is never invoked off-target")
        }
    }
}

/// Eager vs. lazy external-symbol resolution, selected at `init`/`open`
/// (§4.4 Step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Patch the GOT for every resolvable external symbol before `init`
    /// returns.
    Now,
    /// Leave external GOT slots holding their link-time `st_value`; they
    /// are patched on first use through the lazy-resolve trampoline.
    Lazy,
}

/// A loaded module (`DLL` in the original interface): its GOT, symbol
/// table, string table and own hash table, all resolved to absolute
/// addresses within `base..base+size` (§3).
pub struct Module {
    base_addr: usize,
    size: usize,
    owned_buffer: Option<Vec<u8>>,
    view: ModuleView,
    got_off: u32,
    got_length: u32,
    hash_off: u32,
    symtab_off: u32,
    symbol_count: u32,
    strtab_off: u32,
}

// SAFETY: module state is touched from the single thread of execution the
// linker runs on — see the identical reasoning in `error` and `map`.
unsafe impl Sync for Module {}
unsafe impl Send for Module {}

impl Module {
    /// Initialize a module already resident in memory at `base..base+size`
    /// (`dlinit`, §4.4). The caller retains ownership of the buffer.
    pub(crate) fn init(base: NonNull<u8>, size: usize, mode: ResolveMode) -> Result<Box<Module>> {
        Self::init_impl(base, size, None, mode)
    }

    /// Initialize a module whose buffer the linker itself allocated (via a
    /// [`crate::platform::ByteLoader`]); `close` frees it afterwards.
    pub(crate) fn init_owned(mut buffer: Vec<u8>, mode: ResolveMode) -> Result<Box<Module>> {
        let size = buffer.len();
        let base = NonNull::new(buffer.as_mut_ptr()).ok_or_else(|| ErrorCode::DllNull.record())?;
        Self::init_impl(base, size, Some(buffer), mode)
    }

    fn init_impl(
        base: NonNull<u8>,
        size: usize,
        owned_buffer: Option<Vec<u8>>,
        mode: ResolveMode,
    ) -> Result<Box<Module>> {
        if size == 0 {
            return Err(ErrorCode::DllNull.record());
        }

        #[cfg(feature = "log")]
        log::debug!("initializing module at {:#010x} ({size} bytes)", base.as_ptr() as usize);

        // SAFETY: `base` is valid for `size` bytes for as long as `view` is
        // used; `view` never outlives this function except embedded in the
        // `Module` we return, which also owns (or borrows for its whole
        // lifetime) the same buffer.
        let view = unsafe { ModuleView::new(base, size) };
        let layout = dynamic::walk(view)?;

        let got_length = layout
            .local_got
            .checked_add(layout.symbol_count.wrapping_sub(layout.first_got_sym))
            .and_then(|n| n.checked_sub(2))
            .ok_or_else(|| ErrorCode::DllFormat.record())?;

        let base_addr = base.as_ptr() as usize;

        // Step 3 (part 1) — install the trampoline pointer. got[1] (the
        // module handle's own address) is installed once the handle has a
        // stable heap address, below.
        view.write::<u32>(
            layout.got_off as usize,
            _dl_resolve_wrapper as usize as u32,
        )?;

        // Step 4 — relocate the GOT: link-time offsets become absolute
        // addresses.
        for i in 0..got_length {
            let off = layout.got_off as usize + (2 + i as usize) * 4;
            let value: u32 = view.read(off)?;
            let relocated = value.wrapping_add(base_addr as u32);
            view.write(off, relocated)?;
            #[cfg(feature = "log")]
            log::trace!("got[{}] {:#010x} -> {:#010x}", 2 + i, value, relocated);
        }

        // Step 5 — relocate the symbol table.
        for i in 0..layout.symbol_count {
            let off = layout.symtab_off as usize + i as usize * size_of::<Sym>();
            let mut entry: Sym = view.read(off)?;
            if entry.st_value != 0 {
                entry.st_value = entry.st_value.wrapping_add(base_addr as u32);
                view.write(off, entry)?;
            }
        }

        let mut module = Box::new(Module {
            base_addr,
            size,
            owned_buffer,
            view,
            got_off: layout.got_off,
            got_length,
            hash_off: layout.hash_off,
            symtab_off: layout.symtab_off,
            symbol_count: layout.symbol_count,
            strtab_off: layout.strtab_off,
        });

        // Step 3 (part 2) — got[1] := address of this module handle, so the
        // trampoline can recover it.
        let handle_addr = module.as_mut() as *mut Module as usize;
        module.view.write::<u32>(module.got_off as usize + 4, handle_addr as u32)?;

        // Step 6 — eager resolution.
        if mode == ResolveMode::Now {
            module.resolve_eager(layout.first_got_sym)?;
        }

        // Step 7 — flush the instruction cache inside a critical region.
        platform::flush_icache_in_critical_section();

        // Step 8 — constructors, reverse order.
        module.run_ctor_list()?;

        Ok(module)
    }

    fn got_at(&self, i: u32) -> Result<u32> {
        self.view.read(self.got_off as usize + (2 + i as usize) * 4)
    }

    fn set_got(&self, i: u32, value: u32) -> Result<()> {
        self.view.write(self.got_off as usize + (2 + i as usize) * 4, value)
    }

    fn symbol_at(&self, i: u32) -> Result<Sym> {
        self.view.read(self.symtab_off as usize + i as usize * size_of::<Sym>())
    }

    fn name_of(&self, sym: &Sym) -> Result<&'static [u8]> {
        self.view.cstr_at(self.strtab_off as usize + sym.st_name as usize)
    }

    /// §4.4 Step 6: walk symbols in order with a monotone GOT cursor,
    /// eagerly resolving undefined object/function symbols.
    fn resolve_eager(&mut self, first_got_sym: u32) -> Result<()> {
        let mut got_cursor = first_got_sym;

        for i in 0..self.symbol_count {
            let symbol = self.symbol_at(i)?;
            if symbol.st_value == 0 {
                continue;
            }

            let mut matched = None;
            for j in got_cursor..self.got_length {
                if self.got_at(j)? == symbol.st_value {
                    matched = Some(j);
                    break;
                }
            }
            let Some(j) = matched else { continue };
            got_cursor = j;

            if symbol.is_undefined() && symbol.is_object_or_func() {
                let name = self.name_of(&symbol)?;
                let address = resolve::resolve(self, name).ok_or_else(|| ErrorCode::MapSymbol.record())?;
                self.set_got(j, address)?;
                #[cfg(feature = "log")]
                log::debug!("eagerly resolved symbol {} at got[{}] to {:#010x}", i, j, address);
            }
        }

        Ok(())
    }

    /// §4.5 steps 1–4, invoked by [`crate::resolve::_dl_resolve_helper`].
    pub(crate) fn resolve_symbol_index(&self, index: u32) -> Option<u32> {
        let symbol = self.symbol_at(index).ok()?;
        let name = self.name_of(&symbol).ok()?;
        let address = resolve::resolve(self, name)?;

        for i in 0..self.got_length {
            if self.got_at(i).ok()? == symbol.st_value {
                let _ = self.set_got(i, address);
                break;
            }
        }

        #[cfg(feature = "log")]
        log::trace!("lazily resolved symbol at index {index} to {address:#010x}");

        Some(address)
    }

    /// §4.6: this module's own hash table, comparing **full names** (not
    /// just hashes, unlike the global map — see `DESIGN.md`). Does not
    /// touch the last-error cell; callers that expose failure to the user
    /// (`sym`) record it themselves.
    fn lookup_own_quiet(&self, name: &[u8]) -> Result<u32> {
        let nbucket: u32 = self.view.read(self.hash_off as usize)?;
        if nbucket == 0 {
            return Err(ErrorCode::DllSymbol);
        }

        let hash = elf_hash(name);
        let bucket = hash % nbucket;
        let bucket_head_off = self.hash_off as usize + 8 + bucket as usize * 4;
        let mut i: u32 = self.view.read(bucket_head_off)?;

        loop {
            if i == 0 || i == 0xFFFF_FFFF {
                return Err(ErrorCode::DllSymbol);
            }
            let symbol = self.symbol_at(i)?;
            if self.name_of(&symbol)? == name {
                return Ok(symbol.st_value);
            }
            let chain_off = self.hash_off as usize + 8 + (nbucket as usize + i as usize) * 4;
            i = self.view.read(chain_off)?;
        }
    }

    /// Same as [`Self::lookup_own_quiet`] but records the failure as the
    /// process-wide last error, for the public [`sym`] entry point.
    fn lookup_own(&self, name: &[u8]) -> Result<u32> {
        self.lookup_own_quiet(name).map_err(ErrorCode::record)
    }

    fn offset_of(&self, absolute: u32) -> Option<usize> {
        (absolute as usize).checked_sub(self.base_addr)
    }

    /// §4.4 Step 8: `__CTOR_LIST__ = [count, fn1, .., fn_count]`, invoked
    /// `fn_count, .., fn_1` — reverse order.
    fn run_ctor_list(&self) -> Result<()> {
        let Ok(list_addr) = self.lookup_own_quiet(b"__CTOR_LIST__") else {
            return Ok(());
        };
        let Some(list_off) = self.offset_of(list_addr) else {
            return Err(ErrorCode::DllFormat.record());
        };

        let count: u32 = self.view.read(list_off)?;
        let got = self.base_addr as u32 + self.got_off;
        for i in (1..=count).rev() {
            let fn_addr: u32 = self.view.read(list_off + i as usize * 4)?;
            #[cfg(feature = "log")]
            log::debug!("invoking constructor {} of {} at {:#010x}", i, count, fn_addr);
            platform::call_ctor_or_dtor(fn_addr, got);
        }
        Ok(())
    }

    /// §4.7: `__DTOR_LIST__` invoked `fn_1, .., fn_count` — forward order,
    /// opposite the constructors.
    fn run_dtor_list(&self) -> Result<()> {
        let Ok(list_addr) = self.lookup_own_quiet(b"__DTOR_LIST__") else {
            return Ok(());
        };
        let Some(list_off) = self.offset_of(list_addr) else {
            return Err(ErrorCode::DllFormat.record());
        };

        let count: u32 = self.view.read(list_off)?;
        let got = self.base_addr as u32 + self.got_off;
        for i in 1..=count {
            let fn_addr: u32 = self.view.read(list_off + i as usize * 4)?;
            #[cfg(feature = "log")]
            log::debug!("invoking destructor {} of {} at {:#010x}", i, count, fn_addr);
            platform::call_ctor_or_dtor(fn_addr, got);
        }
        Ok(())
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        let _ = self.size;
    }
}

/// A loaded module handle, or the well-known sentinel denoting the global
/// symbol map (§6.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(*mut Module);

unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

/// The sentinel handle. [`sym`] treats it as "the global map"; [`close`]
/// treats it as a no-op. A failed [`crate::init`]/[`crate::open`] also
/// returns this value — neither denotes a real module, so the overlap is
/// deliberate (see `DESIGN.md`).
pub const DEFAULT: Handle = Handle(core::ptr::null_mut());

impl Handle {
    fn from_box(module: Box<Module>) -> Self {
        Handle(Box::into_raw(module))
    }
}

/// Initialize an already-resident module image at `ptr..ptr+size` (§4.4).
/// Returns [`DEFAULT`] on any failure; call [`crate::error`] to diagnose.
pub fn init(ptr: *mut u8, size: usize, mode: ResolveMode) -> Handle {
    match NonNull::new(ptr) {
        Some(base) => Module::init(base, size, mode)
            .map(Handle::from_box)
            .unwrap_or(DEFAULT),
        None => {
            ErrorCode::DllNull.record();
            DEFAULT
        }
    }
}

/// Byte-load `path` and [`init`] it; the returned handle owns the loaded
/// buffer, freed by [`close`].
pub fn open(path: &str, mode: ResolveMode) -> Handle {
    match platform::load(path) {
        Ok(buffer) => Module::init_owned(buffer, mode)
            .map(Handle::from_box)
            .unwrap_or(DEFAULT),
        Err(_) => DEFAULT,
    }
}

/// §4.7: run destructors, free the owned buffer if any, free the handle.
/// A no-op on [`DEFAULT`].
pub fn close(handle: Handle) {
    if handle == DEFAULT {
        return;
    }
    // SAFETY: every non-DEFAULT handle was produced by `Handle::from_box`
    // in `init`/`open`, and this is the only place that reconstructs the
    // `Box` and consumes it exactly once.
    let module = unsafe { Box::from_raw(handle.0) };
    let _ = module.run_dtor_list();
}

/// §4.6: intra-module symbol lookup, or the global map if `handle ==
/// DEFAULT`.
pub fn sym(handle: Handle, name: &str) -> Option<u32> {
    if handle == DEFAULT {
        return crate::map::get_symbol(name);
    }
    // SAFETY: `handle` is non-null and was produced by `init`/`open`; it
    // remains valid until `close` consumes it.
    let module = unsafe { &*handle.0 };
    module.lookup_own(name.as_bytes()).ok()
}
