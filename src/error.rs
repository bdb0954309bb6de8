//! Error taxonomy and the process-wide last-error channel.
//!
//! The linker exposes two ways to learn about a failure: the idiomatic way,
//! a `Result<T, ErrorCode>` returned from every fallible call, and the
//! legacy-compatible way, a single last-error cell read back through
//! [`take_last_error`]. [`ErrorCode::record`] keeps both in sync so callers
//! ported from the original C API (`dlerror()`) and callers using `?` see
//! the same failure.

use core::cell::Cell;
use core::fmt;

/// Every way a linker operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unable to find the requested file.
    File,
    /// Unable to allocate a buffer to load a file into.
    FileMalloc,
    /// Failed to read a file to completion.
    FileRead,
    /// No symbol map has been loaded yet.
    NoMap,
    /// Unable to allocate symbol map structures.
    MapMalloc,
    /// No valid symbols were found while parsing a symbol map.
    NoSymbols,
    /// Unable to initialize a module from a null pointer.
    DllNull,
    /// Unable to allocate module metadata structures.
    DllMalloc,
    /// Unsupported module type or format.
    DllFormat,
    /// This build has no byte-loader backend configured.
    NoFileApi,
    /// Symbol not found in the global symbol map.
    MapSymbol,
    /// Symbol not found in a module's own symbol table.
    DllSymbol,
}

impl ErrorCode {
    fn message(self) -> &'static str {
        match self {
            ErrorCode::File => "unable to find file",
            ErrorCode::FileMalloc => "unable to allocate buffer to load file into",
            ErrorCode::FileRead => "failed to read file",
            ErrorCode::NoMap => "no symbol map has been loaded yet",
            ErrorCode::MapMalloc => "unable to allocate symbol map structures",
            ErrorCode::NoSymbols => "no symbols found in symbol map",
            ErrorCode::DllNull => "unable to initialize module from null pointer",
            ErrorCode::DllMalloc => "unable to allocate module metadata structures",
            ErrorCode::DllFormat => "unsupported module type or format",
            ErrorCode::NoFileApi => "crate built without a byte-loader backend",
            ErrorCode::MapSymbol => "symbol not found in symbol map",
            ErrorCode::DllSymbol => "symbol not found in module",
        }
    }

    /// Record `self` as the process-wide last error and return it, so a
    /// fallible function can end with `return Err(ErrorCode::DllNull.record())`.
    pub fn record(self) -> Self {
        LAST_ERROR.0.set(Some(self));
        self
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ErrorCode {}

pub(crate) type Result<T> = core::result::Result<T, ErrorCode>;

// The host profile this crate targets is single-threaded with interrupt
// preemption, not multiple OS threads, so a plain `Cell` behind a `static`
// is enough: the only reentrancy hazard is an interrupt handler, and the
// linker is never invoked from one.
struct LastError(Cell<Option<ErrorCode>>);

// SAFETY: see the comment above — exactly one thread of execution ever
// touches linker state on the target platform.
unsafe impl Sync for LastError {}

static LAST_ERROR: LastError = LastError(Cell::new(None));

/// Read and clear the last recorded error, the equivalent of the original
/// `dlerror()`. Returns `None` if no error is pending.
pub fn take_last_error() -> Option<&'static str> {
    LAST_ERROR.0.take().map(ErrorCode::message)
}
