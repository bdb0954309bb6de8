//! The `.dynamic` tag walk (§4.4 Step 1): the MIPS-specific subset of
//! dynamic entries this linker needs, plus the handful of generic tags it
//! shares with any ELF consumer. The module image begins with this table
//! directly — there is no ELF file header to locate it through.

use crate::error::{ErrorCode, Result};
use crate::view::ModuleView;
use bitflags::bitflags;
use core::mem::size_of;
use elf::abi::{DT_HASH, DT_NULL, DT_PLTGOT, DT_STRTAB, DT_SYMENT, DT_SYMTAB};

// MIPS ABI Supplement processor-specific tags; not part of the generic tag
// space `elf::abi` carries.
const DT_MIPS_RLD_VERSION: i64 = 0x7000_0001;
const DT_MIPS_FLAGS: i64 = 0x7000_0005;
const DT_MIPS_BASE_ADDRESS: i64 = 0x7000_0006;
const DT_MIPS_LOCAL_GOTNO: i64 = 0x7000_000a;
const DT_MIPS_SYMTABNO: i64 = 0x7000_0011;
const DT_MIPS_GOTSYM: i64 = 0x7000_0013;

bitflags! {
    /// Bits of the `MIPS_FLAGS` dynamic tag this linker cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct MipsFlags: u32 {
        /// Selects GOT "quickstart" pointers, which this linker does not
        /// implement (§4.4's format table).
        const QUICKSTART = 0x0000_0001;
    }
}

/// One `.dynamic` entry: `{ tag, value }`, 8 bytes (§3), terminated by
/// `tag == 0`.
#[derive(Clone, Copy)]
#[repr(C)]
struct DynEntry {
    tag: i32,
    value: u32,
}

/// Offsets and flags recovered from the tag walk, still relative to the
/// module base — `Module::init` turns them into absolute addresses.
#[derive(Debug, Default)]
pub(crate) struct Layout {
    pub(crate) got_off: u32,
    pub(crate) hash_off: u32,
    pub(crate) strtab_off: u32,
    pub(crate) symtab_off: u32,
    pub(crate) local_got: u32,
    pub(crate) symbol_count: u32,
    pub(crate) first_got_sym: u32,
}

/// Walk the dynamic entries starting at offset 0 of `view`, recognizing
/// the tags §4.4 Step 1 lists and ignoring the rest.
pub(crate) fn walk(view: ModuleView) -> Result<Layout> {
    let mut layout = Layout::default();
    let mut offset = 0usize;

    loop {
        let entry: DynEntry = view.read(offset)?;
        if entry.tag == DT_NULL as i32 {
            break;
        }

        #[cfg(feature = "log")]
        log::trace!("dynamic tag {:#x} = {:#x}", entry.tag, entry.value);

        match entry.tag as i64 {
            tag if tag == DT_PLTGOT as i64 => layout.got_off = entry.value,
            tag if tag == DT_HASH as i64 => layout.hash_off = entry.value,
            tag if tag == DT_STRTAB as i64 => layout.strtab_off = entry.value,
            tag if tag == DT_SYMTAB as i64 => layout.symtab_off = entry.value,
            tag if tag == DT_SYMENT as i64 => {
                if entry.value != 16 {
                    #[cfg(feature = "log")]
                    log::warn!("SYMENT {} != 16, rejecting module", entry.value);
                    return Err(ErrorCode::DllFormat.record());
                }
            }
            DT_MIPS_RLD_VERSION => {
                if entry.value != 1 {
                    #[cfg(feature = "log")]
                    log::warn!("MIPS_RLD_VERSION {} != 1, rejecting module", entry.value);
                    return Err(ErrorCode::DllFormat.record());
                }
            }
            DT_MIPS_FLAGS => {
                if MipsFlags::from_bits_retain(entry.value).contains(MipsFlags::QUICKSTART) {
                    #[cfg(feature = "log")]
                    log::warn!("MIPS_FLAGS has QUICKSTART set, rejecting module");
                    return Err(ErrorCode::DllFormat.record());
                }
            }
            DT_MIPS_LOCAL_GOTNO => layout.local_got = entry.value,
            DT_MIPS_BASE_ADDRESS => {
                if entry.value != 0 {
                    #[cfg(feature = "log")]
                    log::warn!("MIPS_BASE_ADDRESS {:#x} != 0, rejecting module", entry.value);
                    return Err(ErrorCode::DllFormat.record());
                }
            }
            DT_MIPS_SYMTABNO => layout.symbol_count = entry.value,
            DT_MIPS_GOTSYM => layout.first_got_sym = entry.value,
            _ => {}
        }

        offset += size_of::<DynEntry>();
    }

    Ok(layout)
}
