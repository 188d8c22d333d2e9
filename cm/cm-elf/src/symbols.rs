use crate::ElfError;
use crate::executable::read_at;
use crate::header::{Eh64, SHDR_SIZE, SHT_STRTAB, SHT_SYMTAB, SYM_SIZE, Sh64, Sym64};
use log::trace;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;

/// Read-only view of the `SHT_SYMTAB` section and its linked string table.
pub struct SymbolTable {
    symtab: Mmap,
    strtab: Mmap,
    first_global: usize,
}

impl SymbolTable {
    /// Locates, validates and maps the symbol table of `file`.
    ///
    /// Static executables carry a single symbol table, so the last one in the
    /// section header table is taken.
    pub fn load(file: &File, ehdr: &Eh64) -> Result<Self, ElfError> {
        let shnum = u64::from(ehdr.e_shnum);
        if shnum != 0 && usize::from(ehdr.e_shentsize) != SHDR_SIZE {
            return Err(ElfError::BadEntrySize {
                what: "section header",
                size: u64::from(ehdr.e_shentsize),
            });
        }

        let section = |index: u64| -> Result<Sh64, ElfError> {
            let offset = index
                .checked_mul(SHDR_SIZE as u64)
                .and_then(|o| o.checked_add(ehdr.e_shoff))
                .ok_or(ElfError::InvalidSymbolTable)?;
            Ok(Sh64::parse(&read_at::<SHDR_SIZE>(
                file,
                offset,
                "section header",
            )?))
        };

        let mut symtab_header = None;
        for index in (0..shnum).rev() {
            let sh = section(index)?;
            if sh.sh_type == SHT_SYMTAB {
                symtab_header = Some(sh);
                break;
            }
        }
        let symtab_header = symtab_header.ok_or(ElfError::NoSymbolTable)?;

        let entsize = SYM_SIZE as u64;
        if symtab_header.sh_entsize != entsize {
            return Err(ElfError::BadEntrySize {
                what: "symbol table",
                size: symtab_header.sh_entsize,
            });
        }
        let link = u64::from(symtab_header.sh_link);
        if symtab_header.sh_size == 0
            || !symtab_header.sh_size.is_multiple_of(entsize)
            || u64::from(symtab_header.sh_info) * entsize >= symtab_header.sh_size
            || link == 0
            || link >= shnum
        {
            return Err(ElfError::InvalidSymbolTable);
        }

        let strtab_header = section(link)?;
        if strtab_header.sh_type != SHT_STRTAB || strtab_header.sh_size == 0 {
            return Err(ElfError::InvalidStringTable);
        }

        let file_len = file
            .metadata()
            .map_err(|source| ElfError::Read {
                what: "file size",
                source,
            })?
            .len();
        let symtab = map_section(file, file_len, &symtab_header, "symbol table")
            .map_err(|e| e.unwrap_or(ElfError::InvalidSymbolTable))?;
        let strtab = map_section(file, file_len, &strtab_header, "string table")
            .map_err(|e| e.unwrap_or(ElfError::InvalidStringTable))?;

        trace!(
            "Symbol table: {} entries, first global at {}",
            symtab.len() / SYM_SIZE,
            symtab_header.sh_info
        );

        Ok(Self {
            symtab,
            strtab,
            first_global: symtab_header.sh_info as usize,
        })
    }

    /// Global symbols with their index in the table.
    ///
    /// Locals precede globals in `SHT_SYMTAB`, and `sh_info` is the index of
    /// the first non-local entry.
    pub fn globals(&self) -> impl Iterator<Item = (usize, Sym64)> + '_ {
        self.symtab
            .chunks_exact(SYM_SIZE)
            .enumerate()
            .skip(self.first_global)
            .map(|(index, chunk)| (index, Sym64::parse(chunk)))
    }

    /// The NUL-terminated name of `sym`, without the terminator.
    pub fn name(&self, sym: &Sym64) -> Option<&[u8]> {
        let tail = self.strtab.get(sym.st_name as usize..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    }
}

/// Maps a section read-only. `Err(None)` means the header points outside
/// the file.
fn map_section(
    file: &File,
    file_len: u64,
    sh: &Sh64,
    what: &'static str,
) -> Result<Mmap, Option<ElfError>> {
    let end = sh.sh_offset.checked_add(sh.sh_size).ok_or(None)?;
    if end > file_len {
        return Err(None);
    }
    let len = usize::try_from(sh.sh_size).map_err(|_| None)?;

    // SAFETY: the mapping is private and read-only; the file is opened
    // read-only and is not expected to change while loaded.
    unsafe { MmapOptions::new().offset(sh.sh_offset).len(len).map(file) }
        .map_err(|source| Some(ElfError::MapSection { what, source }))
}
