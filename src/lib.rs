//! A minimal dynamic linker for 32-bit MIPS embedded targets.
//!
//! This crate loads relocatable shared objects ("modules") built against a
//! fixed, ELF-derived flat layout, resolves their external references
//! against either a pre-loaded global symbol map or a user-supplied
//! [`Resolver`], and patches each module's global offset table (GOT) so
//! subsequent calls run at native speed.
//!
//! The crate is `no_std` by default (only `alloc` is required); enable the
//! `std` feature for the hosted byte loader used by tests and off-target
//! tooling, and `log` to route diagnostic tracing through the [`log`] facade.
#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

mod dynamic;
pub mod error;
mod hash;
mod map;
mod module;
mod platform;
mod resolve;
mod sym;
mod view;

pub use error::take_last_error as error;
pub use map::{get_symbol, parse_map, unload_map};
pub use module::{close, init, open, sym, Handle, ResolveMode, DEFAULT};
pub use platform::{set_byte_loader, ByteLoader};
pub use resolve::{set_resolve_callback, FnResolver, Resolver};

/// `load_map(path) -> count | -1` (§6.1): byte-load `path` through the
/// installed [`ByteLoader`] and [`parse_map`] it.
pub fn load_map(path: &str) -> i32 {
    match platform::load(path) {
        Ok(bytes) => parse_map(&bytes),
        Err(_) => -1,
    }
}

#[cfg(all(test, feature = "std"))]
mod integration {
    //! End-to-end exercise of `init`/lazy-resolve/`close` against a
    //! synthetic module image, mirroring the teacher's `tests/gen_elf.rs`
    //! approach of hand-assembling a minimal buffer rather than linking a
    //! real toolchain output.
    use crate::module::ResolveMode;
    use crate::{close, get_symbol, init, parse_map};
    use alloc::vec::Vec;

    const DT_PLTGOT: i32 = 3;
    const DT_HASH: i32 = 4;
    const DT_STRTAB: i32 = 5;
    const DT_SYMTAB: i32 = 6;
    const DT_SYMENT: i32 = 11;
    const DT_NULL: i32 = 0;
    const DT_MIPS_RLD_VERSION: i32 = 0x7000_0001u32 as i32;
    const DT_MIPS_FLAGS: i32 = 0x7000_0005u32 as i32;
    const DT_MIPS_BASE_ADDRESS: i32 = 0x7000_0006u32 as i32;
    const DT_MIPS_LOCAL_GOTNO: i32 = 0x7000_000au32 as i32;
    const DT_MIPS_SYMTABNO: i32 = 0x7000_0011u32 as i32;
    const DT_MIPS_GOTSYM: i32 = 0x7000_0013u32 as i32;

    fn push_dyn(buf: &mut Vec<u8>, tag: i32, value: u32) {
        buf.extend_from_slice(&tag.to_ne_bytes());
        buf.extend_from_slice(&value.to_ne_bytes());
    }

    fn push_sym(buf: &mut Vec<u8>, st_name: u32, st_value: u32, st_info: u8, st_shndx: u16) {
        buf.extend_from_slice(&st_name.to_ne_bytes());
        buf.extend_from_slice(&st_value.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // st_size
        buf.push(st_info);
        buf.push(0); // st_other
        buf.extend_from_slice(&st_shndx.to_ne_bytes());
    }

    /// Build a module with one local GOT slot, one external symbol `foo`
    /// referenced through the GOT, no hash section (empty string "foo" is
    /// looked up through the global map, not the module's own table), and
    /// no ctor/dtor lists.
    /// Returns the module image and the byte offset of its GOT within it.
    fn build_module() -> (Vec<u8>, usize) {
        let mut dynsec = Vec::new();
        push_dyn(&mut dynsec, DT_SYMENT, 16);
        push_dyn(&mut dynsec, DT_MIPS_RLD_VERSION, 1);
        push_dyn(&mut dynsec, DT_MIPS_FLAGS, 0);
        push_dyn(&mut dynsec, DT_MIPS_BASE_ADDRESS, 0);
        // local_got = 2 (the two reserved slots), first_got_sym = 1,
        // symbol_count = 2 => got_length = 2 + (2-1) - 2 = 1.
        push_dyn(&mut dynsec, DT_MIPS_LOCAL_GOTNO, 2);
        push_dyn(&mut dynsec, DT_MIPS_SYMTABNO, 2);
        push_dyn(&mut dynsec, DT_MIPS_GOTSYM, 1);
        // Placeholders for PLTGOT/HASH/STRTAB/SYMTAB patched in below, once
        // their offsets are known.
        let pltgot_patch = dynsec.len();
        push_dyn(&mut dynsec, DT_PLTGOT, 0);
        let hash_patch = dynsec.len();
        push_dyn(&mut dynsec, DT_HASH, 0);
        let strtab_patch = dynsec.len();
        push_dyn(&mut dynsec, DT_STRTAB, 0);
        let symtab_patch = dynsec.len();
        push_dyn(&mut dynsec, DT_SYMTAB, 0);
        push_dyn(&mut dynsec, DT_NULL, 0);

        let mut image = dynsec;

        // GOT: 3 entries (2 reserved + 1 external), 4 bytes each.
        let got_off = image.len() as u32;
        image[pltgot_patch + 4..pltgot_patch + 8].copy_from_slice(&got_off.to_ne_bytes());
        image.extend_from_slice(&0u32.to_ne_bytes()); // slot 0: trampoline, overwritten by init
        image.extend_from_slice(&0u32.to_ne_bytes()); // slot 1: handle, overwritten by init
        image.extend_from_slice(&0x8000_0000u32.to_ne_bytes()); // slot 2: st_value for `foo`

        // Hash section: empty (nbucket = 1, nchain = 1, both pointing at
        // sentinel), since this module has no locally defined symbols to
        // expose, only an external reference.
        let hash_off = image.len() as u32;
        image[hash_patch + 4..hash_patch + 8].copy_from_slice(&hash_off.to_ne_bytes());
        image.extend_from_slice(&1u32.to_ne_bytes()); // nbucket
        image.extend_from_slice(&1u32.to_ne_bytes()); // nchain
        image.extend_from_slice(&0xFFFF_FFFFu32.to_ne_bytes()); // bucket[0]
        image.extend_from_slice(&0xFFFF_FFFFu32.to_ne_bytes()); // chain[0]

        // String table: "\0foo\0".
        let strtab_off = image.len() as u32;
        image[strtab_patch + 4..strtab_patch + 8].copy_from_slice(&strtab_off.to_ne_bytes());
        image.push(0);
        image.extend_from_slice(b"foo\0");

        // Symbol table: index 0 is the conventional null entry, index 1 is
        // the undefined external `foo` (STT_OBJECT = 1, STB_GLOBAL << 4).
        let symtab_off = image.len() as u32;
        image[symtab_patch + 4..symtab_patch + 8].copy_from_slice(&symtab_off.to_ne_bytes());
        push_sym(&mut image, 0, 0, 0, 0);
        push_sym(&mut image, 1, 0x8000_0000, (1 << 4) | 1, 0);

        (image, got_off as usize)
    }

    #[test]
    fn lazy_resolution_patches_got_on_first_call() {
        let text = b"foo T 80010000 4\n";
        assert_eq!(parse_map(text), 1);
        assert_eq!(get_symbol("foo"), Some(0x8001_0000));

        let (mut image, got_off) = build_module();
        let size = image.len();
        let handle = init(image.as_mut_ptr(), size, ResolveMode::Lazy);
        assert_ne!(handle, crate::DEFAULT);

        // The external slot still holds the (relocated) link-time
        // st_value, not the resolved address: resolution hasn't happened
        // yet under Lazy mode.
        let base = image.as_ptr() as usize as u32;
        let slot = u32::from_ne_bytes(
            image[got_off + 8..got_off + 12].try_into().unwrap(),
        );
        assert_eq!(slot, base.wrapping_add(0x8000_0000));

        close(handle);
    }

    #[test]
    fn eager_resolution_patches_got_during_init() {
        let text = b"foo T 80010000 4\n";
        assert_eq!(parse_map(text), 1);

        let (mut image, got_off) = build_module();
        let size = image.len();
        let handle = init(image.as_mut_ptr(), size, ResolveMode::Now);
        assert_ne!(handle, crate::DEFAULT);

        let slot = u32::from_ne_bytes(
            image[got_off + 8..got_off + 12].try_into().unwrap(),
        );
        assert_eq!(slot, 0x8001_0000);

        close(handle);
    }

    #[test]
    fn format_rejection_on_bad_syment() {
        let mut image = Vec::new();
        push_dyn(&mut image, DT_SYMENT, 12);
        push_dyn(&mut image, DT_NULL, 0);
        let size = image.len();
        let handle = init(image.as_mut_ptr(), size, ResolveMode::Lazy);
        assert_eq!(handle, crate::DEFAULT);
        assert!(crate::error().is_some());
    }

    #[test]
    fn close_and_sym_on_default_are_no_ops() {
        close(crate::DEFAULT);
        assert_eq!(crate::sym(crate::DEFAULT, "anything"), None);
    }
}
