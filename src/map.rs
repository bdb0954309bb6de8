//! The global symbol map: a process-wide, flat, read-only directory of
//! names to addresses, parsed from an `nm`-style text dump and looked up
//! through an ELF-style chained hash table.
//!
//! Layout mirrors a module's own `.hash` section (see [`crate::module`]):
//! `hash_table[0]` is the bucket count, `hash_table[1]` the chain
//! (entry) count, followed by `nbucket` bucket heads and then `nchain`
//! chain links, both using `0xFFFF_FFFF` as the empty-slot sentinel.

use crate::error::{ErrorCode, Result};
use crate::hash::elf_hash;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

const EMPTY: u32 = 0xFFFF_FFFF;

/// One parsed symbol: its map-table hash and its address.
#[derive(Debug, Clone, Copy)]
struct SymbolRecord {
    hash: u32,
    address: u32,
}

/// The global symbol map.
///
/// Chain index `0` is never assigned to a real symbol: both `0` and
/// `0xFFFF_FFFF` terminate a chain walk (the empty-bucket and end-of-chain
/// sentinels share the value `0` in the original implementation), so a
/// symbol stored at index `0` could never be found again. We sidestep that
/// by reserving slot `0` as a permanent placeholder — see the `Open
/// question` entry this resolves in `DESIGN.md`.
pub(crate) struct SymbolMap {
    nbucket: u32,
    hash_table: Vec<u32>,
    entries: Vec<SymbolRecord>,
}

impl SymbolMap {
    fn bucket_head(&self, b: u32) -> u32 {
        self.hash_table[2 + b as usize]
    }

    fn chain_next(&self, i: u32) -> u32 {
        self.hash_table[2 + self.nbucket as usize + i as usize]
    }

    /// Look up `name`, comparing **hashes only** — a deliberate,
    /// documented soundness gap shared with the module-local map's bucket
    /// layout; see `DESIGN.md`.
    fn lookup(&self, name: &[u8]) -> Option<u32> {
        let h = elf_hash(name);
        let b = h % self.nbucket;
        let mut i = self.bucket_head(b);
        loop {
            if i == EMPTY || i == 0 {
                return None;
            }
            let entry = &self.entries[i as usize];
            if entry.hash == h {
                return Some(entry.address);
            }
            i = self.chain_next(i);
        }
    }
}

/// Parse a text blob of `name type address [size] ...` lines into a fresh
/// [`SymbolMap`]. Lines whose type isn't one of `T`/`R`/`D`/`B`
/// (case-insensitive) or whose address is zero are silently dropped.
fn parse(text: &[u8]) -> Result<SymbolMap> {
    // `.max(1)` avoids a modulo-by-zero bucket count on empty input; that
    // case still ends up at `NoSymbols` below once no lines parse.
    let newline_count = text.iter().filter(|&&b| b == b'\n').count() as u32;
    let nbucket = newline_count.max(1);
    // Entry index 0 is reserved (see the note on `entries` above), so a
    // valid line's entry index runs from 1 up to `nbucket + 1`: splitting
    // on `\n` always yields `nbucket + 1` lines, trailing newline or not,
    // and every one of them could turn out valid. The chain region needs a
    // real slot for every index in `0..=nbucket + 1` — `nbucket + 2` links,
    // one more than the original C's zero-based `0..entries` range
    // accounted for, since reserving slot 0 shifted every real index up by
    // one without shrinking the top of the range.
    let chain_len = nbucket + 2;
    let mut hash_table = vec![EMPTY; 2 + nbucket as usize + chain_len as usize];
    hash_table[0] = nbucket;
    hash_table[1] = newline_count;
    // Reserve entries[0] as the unreachable placeholder described above.
    let mut entries = Vec::with_capacity(nbucket as usize + 2);
    entries.push(SymbolRecord { hash: 0, address: 0 });

    for line in text.split(|&b| b == b'\n') {
        if let Some((name, address)) = parse_line(line) {
            let h = elf_hash(name);
            let b = h % hash_table[0];

            let index = entries.len() as u32;
            entries.push(SymbolRecord { hash: h, address });

            let mut slot = 2 + b as usize;
            while hash_table[slot] != EMPTY {
                let next = hash_table[slot];
                slot = 2 + hash_table[0] as usize + next as usize;
            }
            hash_table[slot] = index;
        }
    }

    if entries.len() == 1 {
        return Err(ErrorCode::NoSymbols.record());
    }

    Ok(SymbolMap {
        nbucket: hash_table[0],
        hash_table,
        entries,
    })
}

/// Split one `name type address [size]` line and validate it per §4.2.
/// Returns `None` for any line that should be silently dropped.
fn parse_line(line: &[u8]) -> Option<(&[u8], u32)> {
    let mut fields = line
        .split(|&b| b == b' ' || b == b'\t' || b == b'\r')
        .filter(|f| !f.is_empty());

    let name = fields.next()?;
    let ty = fields.next()?;
    let addr_field = fields.next()?;

    let letter = ty.first().copied()?.to_ascii_uppercase();
    if !matches!(letter, b'T' | b'R' | b'D' | b'B') {
        return None;
    }

    // Addresses may be written as (truncated) 64-bit hex; only the low 32
    // bits are kept.
    let hex = core::str::from_utf8(addr_field).ok()?;
    let address64 = u64::from_str_radix(hex, 16).ok()?;
    let address = address64 as u32;
    if address == 0 {
        return None;
    }

    Some((name, address))
}

// The host profile this crate targets is single-threaded with interrupt
// preemption, so a plain `RefCell` behind a `static` is enough — see the
// identical reasoning on `error::LastError`.
struct GlobalMap(RefCell<Option<SymbolMap>>);

// SAFETY: exactly one thread of execution ever touches linker state on
// the target platform.
unsafe impl Sync for GlobalMap {}

static GLOBAL_MAP: GlobalMap = GlobalMap(RefCell::new(None));

/// Rebuild the global symbol map from a text blob. Any previously loaded
/// map is released first. Returns the number of valid entries parsed, or
/// `-1` on failure (with the error recorded — see [`crate::error`]).
pub fn parse_map(bytes: &[u8]) -> i32 {
    unload_map();
    match parse(bytes) {
        Ok(map) => {
            let count = (map.entries.len() - 1) as i32;
            *GLOBAL_MAP.0.borrow_mut() = Some(map);
            count
        }
        Err(_) => -1,
    }
}

/// Release the global symbol map, if one is loaded.
pub fn unload_map() {
    *GLOBAL_MAP.0.borrow_mut() = None;
}

/// Look up `name` in the global symbol map.
pub fn get_symbol(name: &str) -> Option<u32> {
    match GLOBAL_MAP.0.borrow().as_ref() {
        None => {
            ErrorCode::NoMap.record();
            None
        }
        Some(map) => map.lookup(name.as_bytes()).or_else(|| {
            ErrorCode::MapSymbol.record();
            None
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_symbol_map() {
        let text = b"foo T 80010000 4\nbar D 80020000 8\n";
        assert_eq!(parse_map(text), 2);
        assert_eq!(get_symbol("foo"), Some(0x8001_0000));
        assert_eq!(get_symbol("bar"), Some(0x8002_0000));
        assert_eq!(get_symbol("baz"), None);
        unload_map();
    }

    #[test]
    fn drops_invalid_lines() {
        let text = b"foo T 80010000 4\nskip U 80030000\nnull T 0 0\n";
        assert_eq!(parse_map(text), 1);
        assert_eq!(get_symbol("skip"), None);
        assert_eq!(get_symbol("null"), None);
        unload_map();
    }

    #[test]
    fn empty_map_reports_no_symbols() {
        assert_eq!(parse_map(b""), -1);
        assert_eq!(get_symbol("anything"), None);
    }

    #[test]
    fn lookup_without_a_loaded_map_reports_no_map() {
        unload_map();
        assert_eq!(get_symbol("anything"), None);
    }

    #[test]
    fn no_trailing_newline_with_single_bucket_collision_does_not_panic() {
        // One newline => nbucket == 1, so both entries land in the same
        // bucket; no trailing newline pushes valid_count to nbucket + 1,
        // exercising the highest entry index the chain region must hold.
        let text = b"a T 1\nb T 2";
        assert_eq!(parse_map(text), 2);
        assert_eq!(get_symbol("a"), Some(1));
        assert_eq!(get_symbol("b"), Some(2));
        // A miss whose chain walk runs off the tail entry must return
        // `None`, not index out of the chain region.
        assert_eq!(get_symbol("c"), None);
        unload_map();
    }

    #[test]
    fn reload_replaces_previous_map() {
        assert_eq!(parse_map(b"a T 1 0\n"), 1);
        assert_eq!(get_symbol("a"), Some(1));
        assert_eq!(parse_map(b"b T 2 0\n"), 1);
        assert_eq!(get_symbol("a"), None);
        assert_eq!(get_symbol("b"), Some(2));
        unload_map();
    }
}
