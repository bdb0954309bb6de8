//! The lazy-resolution runtime (§4.5): the helper a trampoline calls on
//! first use of an external symbol, and the pluggable resolver behind it.

use crate::module::Module;
use core::cell::Cell;

/// A capability object that turns a symbol name into an address, given the
/// module that referenced it. The default implementation falls back to the
/// global symbol map (§4.3); [`set_resolve_callback`] installs another.
pub trait Resolver {
    fn resolve(&self, module: &Module, name: &[u8]) -> Option<u32>;
}

/// Adapts a bare `fn(&Module, &[u8]) -> Option<u32>` into a [`Resolver`],
/// the direct equivalent of the original C ABI's raw `DL_SetResolveCallback`
/// function pointer (`void *(*)(DLL *, const char *)`) for callers
/// migrating from it without writing a trait impl of their own.
pub struct FnResolver(pub fn(&Module, &[u8]) -> Option<u32>);

impl Resolver for FnResolver {
    fn resolve(&self, module: &Module, name: &[u8]) -> Option<u32> {
        (self.0)(module, name)
    }
}

struct GlobalMapResolver;

impl Resolver for GlobalMapResolver {
    fn resolve(&self, _module: &Module, name: &[u8]) -> Option<u32> {
        core::str::from_utf8(name)
            .ok()
            .and_then(crate::map::get_symbol)
    }
}

struct ResolverCell(Cell<Option<&'static dyn Resolver>>);
unsafe impl Sync for ResolverCell {}
static RESOLVER: ResolverCell = ResolverCell(Cell::new(None));

/// Install a user resolver, overriding the default global-map lookup for
/// every module's lazy and eager resolution from now on.
pub fn set_resolve_callback(resolver: &'static dyn Resolver) {
    RESOLVER.0.set(Some(resolver));
}

pub(crate) fn resolve(module: &Module, name: &[u8]) -> Option<u32> {
    match RESOLVER.0.get() {
        Some(resolver) => resolver.resolve(module, name),
        None => GlobalMapResolver.resolve(module, name),
    }
}

/// Called by `_dl_resolve_wrapper` — the architecture-specific trampoline
/// (§4.5, out of scope here) — with the module handle it recovered from
/// `got[1]` and the symbol index the compiler-generated stub passed in a
/// caller-saved register.
///
/// Never returns on an unresolvable symbol: the trampoline has no sensible
/// way to propagate a failure back to the original caller, so this locks
/// up deliberately (§4.5 step 3) rather than returning garbage.
///
/// # Safety
/// `module` must point at a live [`Module`] previously returned by
/// [`crate::init`] or [`crate::open`].
#[no_mangle]
pub unsafe extern "C" fn _dl_resolve_helper(module: *mut Module, index: u32) -> u32 {
    let module = unsafe { &*module };
    match module.resolve_symbol_index(index) {
        Some(address) => address,
        None => {
            #[cfg(feature = "log")]
            log::error!("unresolvable symbol at index {index}, locking up");
            loop {
                core::hint::spin_loop();
            }
        }
    }
}
