//! The fixed ELF32 symbol table entry this linker accepts (§3, §4.4
//! `SYMENT`). Any module declaring a different `st_size` fails format
//! validation before this type is ever read.

use elf::abi::{STT_FUNC, STT_OBJECT};
use static_assertions::const_assert_eq;

/// `Elf32_Sym`, read unaligned straight out of a module's `.dynsym`.
///
/// Not reused from the `elf` crate: its `Elf32_Sym::st_shndx` is widened to
/// `u32` there, which would break the exact-16-byte layout this format
/// mandates.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct Sym {
    pub(crate) st_name: u32,
    pub(crate) st_value: u32,
    pub(crate) st_size: u32,
    pub(crate) st_info: u8,
    pub(crate) st_other: u8,
    pub(crate) st_shndx: u16,
}

const_assert_eq!(core::mem::size_of::<Sym>(), 16);

impl Sym {
    pub(crate) fn is_undefined(&self) -> bool {
        self.st_shndx == 0
    }

    fn ty(&self) -> u32 {
        (self.st_info & 0xf) as u32
    }

    pub(crate) fn is_object_or_func(&self) -> bool {
        matches!(self.ty(), STT_OBJECT | STT_FUNC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_sixteen_bytes() {
        assert_eq!(core::mem::size_of::<Sym>(), 16);
    }

    #[test]
    fn classifies_undefined_function() {
        let sym = Sym {
            st_name: 1,
            st_value: 0,
            st_size: 0,
            st_info: (STT_FUNC & 0xf) as u8,
            st_other: 0,
            st_shndx: 0,
        };
        assert!(sym.is_undefined());
        assert!(sym.is_object_or_func());
    }

    #[test]
    fn classifies_defined_section() {
        let sym = Sym {
            st_name: 1,
            st_value: 0x1000,
            st_size: 4,
            st_info: (STT_OBJECT & 0xf) as u8,
            st_other: 0,
            st_shndx: 1,
        };
        assert!(!sym.is_undefined());
    }
}
