//! # Static ELF Executables
//!
//! Parses a position-dependent (`ET_EXEC`) x86-64 ELF image, validates it,
//! maps its `PT_LOAD` segments at their link-time addresses through an
//! [`AddressSpace`](cm_vmem::AddressSpace), and resolves global symbols.
//!
//! ```no_run
//! # use cm_elf::StaticExecutable;
//! # use cm_vmem::{AddressSpace, HostAddressSpace, Protection};
//! let mut aspace = HostAddressSpace::new()?;
//! let exe = StaticExecutable::open("compartments/server", aspace.page_size())?;
//! aspace.reserve(exe.total_range())?;
//! exe.map(&mut aspace)?;
//! let slot = exe.find_symbol("__compartment_manager_return", 8, Protection::READ_WRITE);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod executable;
pub mod header;
mod symbols;

#[cfg(any(test, feature = "writer"))]
pub mod writer;

pub use executable::{AuxType, LoadSegment, StaticExecutable};

use cm_addresses::Range;
use cm_vmem::MapError;

/// Smallest instruction window that must be executable at the entry point.
pub const ENTRY_WINDOW: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ElfError {
    #[error("failed to read the {what}")]
    Read {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit little-endian ELF file")]
    BadClass,
    #[error("not a static executable (e_type = {0}); PIE and shared objects are not supported")]
    NotExecutable(u16),
    #[error("unexpected machine {0} (must be an x86-64 executable)")]
    BadMachine(u16),
    #[error("unexpected {what} entry size {size}")]
    BadEntrySize { what: &'static str, size: u64 },
    #[error("segment {0}: dynamic segment, only static executables are supported")]
    DynamicSegment(usize),
    #[error("segment {0}: p_filesz > p_memsz")]
    FileSizeExceedsMemorySize(usize),
    #[error("segment {0}: requires zero-fill, but is not writable")]
    ZeroFillNotWritable(usize),
    #[error("segment {0}: virtual address and file offset disagree modulo the page size")]
    MisalignedSegment(usize),
    #[error("segment {index}: {range} overlaps or precedes earlier segments")]
    OverlappingSegment { index: usize, range: Range },
    #[error("segment {0}: address range overflows")]
    SegmentOverflow(usize),
    #[error("no executable segment found")]
    NoExecutableSegment,
    #[error("invalid entry point {0:#x}")]
    InvalidEntryPoint(u64),
    #[error("no symbol table section found, make sure the binary is not stripped")]
    NoSymbolTable,
    #[error("invalid symbol table section")]
    InvalidSymbolTable,
    #[error("invalid string table section")]
    InvalidStringTable,
    #[error("failed to map the {what} section")]
    MapSection {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Map(#[from] MapError),
}
