use crate::ElfError;
use crate::ENTRY_WINDOW;
use crate::header::{
    EHDR_SIZE, ELF_MAGIC, ELFCLASS64, ELFDATA2LSB, EM_X86_64, ET_EXEC, Eh64, PHDR_SIZE,
    PT_DYNAMIC, PT_INTERP, PT_LOAD, Ph64, SHN_UNDEF, STT_FUNC, STT_OBJECT,
};
use crate::symbols::SymbolTable;
use cm_addresses::{PageSize, Range};
use cm_vmem::{AddressSpace, Protection};
use log::{debug, trace, warn};
use std::fs::File;
use std::os::fd::AsFd;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Everything needed to map one `PT_LOAD` segment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LoadSegment {
    /// Address range in memory; the base is page-aligned, the top is exact.
    pub memory: Range,
    /// Page-aligned offset of the segment in the file.
    pub file_offset: u64,
    /// Bytes of the file to map starting at `file_offset`.
    pub file_mapped_size: u64,
    pub protection: Protection,
}

/// Auxiliary vector entry types (`AT_*`) handed to a compartment at start-up.
#[repr(u64)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuxType {
    Null = 0,
    ProgramHeaders = 3,
    ProgramHeaderEntrySize = 4,
    ProgramHeaderCount = 5,
    PageSize = 6,
    Secure = 23,
    Random = 25,
}

/// A parsed static executable, ready to be mapped.
///
/// Owns the file (closed on drop) and read-only mappings of its symbol and
/// string tables (unmapped on drop). A value of this type only exists once
/// parsing succeeded, so every accessor works on a validated image.
pub struct StaticExecutable {
    file: File,
    ehdr: Eh64,
    segments: Vec<LoadSegment>,
    total_range: Range,
    executable_range: Range,
    symbols: SymbolTable,
    page_size: PageSize,
}

impl StaticExecutable {
    /// Opens and parses the executable at `path`.
    ///
    /// # Errors
    /// The file cannot be opened or fails validation, see [`parse`](Self::parse).
    pub fn open(path: impl AsRef<Path>, page_size: PageSize) -> Result<Self, ElfError> {
        let file = File::open(path).map_err(|source| ElfError::Read {
            what: "executable",
            source,
        })?;
        Self::parse(file, page_size)
    }

    /// Validates the ELF header, collects the loadable segments, checks the
    /// entry point and maps the symbol table.
    ///
    /// # Errors
    /// Any structural problem with the image; see [`ElfError`].
    pub fn parse(file: File, page_size: PageSize) -> Result<Self, ElfError> {
        let ehdr = Eh64::parse(&read_at::<EHDR_SIZE>(&file, 0, "ELF header")?);
        check_ident(&ehdr)?;

        let (segments, total_range, executable_range) =
            read_program_headers(&file, &ehdr, page_size)?;

        if executable_range.is_empty() {
            return Err(ElfError::NoExecutableSegment);
        }
        check_entry_point(&segments, ehdr.e_entry)?;

        let symbols = SymbolTable::load(&file, &ehdr)?;

        debug!(
            "Parsed static executable: {} segment(s), total {total_range}, executable {executable_range}, entry {:#x}",
            segments.len(),
            ehdr.e_entry
        );

        Ok(Self {
            file,
            ehdr,
            segments,
            total_range,
            executable_range,
            symbols,
            page_size,
        })
    }

    /// Page-aligned range covering every loadable segment.
    #[must_use]
    pub const fn total_range(&self) -> Range {
        self.total_range
    }

    /// Page-aligned range covering every executable segment.
    #[must_use]
    pub const fn executable_range(&self) -> Range {
        self.executable_range
    }

    #[must_use]
    pub const fn entry_point(&self) -> u64 {
        self.ehdr.e_entry
    }

    #[must_use]
    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }

    /// Maps every segment at its link-time address.
    ///
    /// The destination is expected to be reserved already; existing mappings
    /// in the way are replaced.
    ///
    /// # Errors
    /// A mapping could not be established.
    pub fn map<A: AddressSpace + ?Sized>(&self, aspace: &mut A) -> Result<(), ElfError> {
        for segment in &self.segments {
            let base = segment.memory.base;
            trace!(
                "Mapping segment {} ({:?}) from file offset {:#x}",
                segment.memory, segment.protection, segment.file_offset
            );

            if segment.file_mapped_size != 0 {
                aspace.map_file(
                    Range::new(base, base + segment.file_mapped_size),
                    segment.protection,
                    self.file.as_fd(),
                    segment.file_offset,
                )?;
            }

            let mut zero_fill_size = segment.memory.size() - segment.file_mapped_size;
            if zero_fill_size == 0 {
                continue;
            }

            // Zero the tail of the last file-backed page in place, then map
            // anonymous pages for the remainder.
            let zero_fill_start = base + segment.file_mapped_size;
            let zero_pages_start = self
                .page_size
                .align_up(zero_fill_start)
                .ok_or(ElfError::SegmentOverflow(0))?;
            let memset_size = (zero_pages_start - zero_fill_start).min(zero_fill_size);

            if memset_size != 0 {
                // SAFETY: parsing only accepts zero-fill segments that are
                // writable, and the page was mapped from the file just above.
                unsafe {
                    aspace.zero(Range::new(zero_fill_start, zero_fill_start + memset_size));
                }
            }
            zero_fill_size -= memset_size;

            if zero_fill_size != 0 {
                aspace.map_anonymous(
                    Range::new(zero_pages_start, zero_pages_start + zero_fill_size),
                    segment.protection,
                )?;
            }
        }

        Ok(())
    }

    /// Finds a global `OBJECT` or `FUNC` symbol by exact name.
    ///
    /// - `size`: required symbol size, or `0` for any size.
    /// - `protection`: rights the containing segment must at least grant.
    ///
    /// Returns the symbol's address, or `None` if it is absent or does not
    /// satisfy the requirements. Symbol names are assumed unique, so the
    /// first name match decides the outcome.
    #[must_use]
    pub fn find_symbol(&self, name: &str, size: u64, protection: Protection) -> Option<u64> {
        for (index, sym) in self.symbols.globals() {
            if !matches!(sym.kind(), STT_OBJECT | STT_FUNC) {
                continue;
            }

            let Some(sym_name) = self.symbols.name(&sym) else {
                warn!("Invalid symbol table entry at index {index}");
                continue;
            };
            if sym_name != name.as_bytes() {
                continue;
            }

            // A declaration without a definition.
            if sym.st_shndx == SHN_UNDEF || (size != 0 && sym.st_size != size) {
                return None;
            }

            let sym_range = Range::from_base_len(sym.st_value, sym.st_size)?;
            return self
                .segments
                .iter()
                .find(|segment| segment.memory.contains(&sym_range))
                .filter(|segment| segment.protection.satisfies(protection))
                .map(|_| sym.st_value);
        }

        None
    }

    /// Auxiliary values derived from the image itself.
    ///
    /// Supports [`AuxType::ProgramHeaders`] (the mapped address of the
    /// program header table, or `0` if no segment loads it),
    /// [`AuxType::ProgramHeaderEntrySize`] and [`AuxType::ProgramHeaderCount`].
    /// Every other type yields `0`.
    #[must_use]
    pub fn auxiliary_value(&self, kind: AuxType) -> u64 {
        match kind {
            AuxType::ProgramHeaders => {
                let base_off = self.ehdr.e_phoff;
                let top_off = base_off
                    + u64::from(self.ehdr.e_phnum) * u64::from(self.ehdr.e_phentsize);

                self.segments
                    .iter()
                    .find(|s| {
                        s.file_offset <= base_off && top_off <= s.file_offset + s.file_mapped_size
                    })
                    .map_or(0, |s| s.memory.base + base_off - s.file_offset)
            }
            AuxType::ProgramHeaderEntrySize => u64::from(self.ehdr.e_phentsize),
            AuxType::ProgramHeaderCount => u64::from(self.ehdr.e_phnum),
            _ => 0,
        }
    }
}

impl core::fmt::Debug for StaticExecutable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticExecutable")
            .field("entry", &format_args!("{:#x}", self.ehdr.e_entry))
            .field("total_range", &self.total_range)
            .field("executable_range", &self.executable_range)
            .field("segments", &self.segments)
            .finish_non_exhaustive()
    }
}

pub fn read_at<const N: usize>(
    file: &File,
    offset: u64,
    what: &'static str,
) -> Result<[u8; N], ElfError> {
    let mut buf = [0u8; N];
    file.read_exact_at(&mut buf, offset)
        .map_err(|source| ElfError::Read { what, source })?;
    Ok(buf)
}

fn check_ident(ehdr: &Eh64) -> Result<(), ElfError> {
    if ehdr.e_ident[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if ehdr.e_ident[4] != ELFCLASS64 || ehdr.e_ident[5] != ELFDATA2LSB {
        return Err(ElfError::BadClass);
    }
    // Only position-dependent executables can be loaded at their link address.
    if ehdr.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable(ehdr.e_type));
    }
    if ehdr.e_machine != EM_X86_64 {
        return Err(ElfError::BadMachine(ehdr.e_machine));
    }
    if ehdr.e_phnum != 0 && usize::from(ehdr.e_phentsize) != PHDR_SIZE {
        return Err(ElfError::BadEntrySize {
            what: "program header",
            size: u64::from(ehdr.e_phentsize),
        });
    }
    Ok(())
}

fn read_program_headers(
    file: &File,
    ehdr: &Eh64,
    page_size: PageSize,
) -> Result<(Vec<LoadSegment>, Range, Range), ElfError> {
    let mut segments: Vec<LoadSegment> = Vec::new();
    let mut total_range = Range::EMPTY;
    let mut executable_range = Range::EMPTY;

    for index in 0..usize::from(ehdr.e_phnum) {
        let offset = ehdr
            .e_phoff
            .checked_add((index * PHDR_SIZE) as u64)
            .ok_or(ElfError::SegmentOverflow(index))?;
        let ph = Ph64::parse(&read_at::<PHDR_SIZE>(file, offset, "program header")?);

        // Only segments that need to be loaded in memory matter.
        if ph.p_type != PT_LOAD {
            if ph.p_type == PT_DYNAMIC || ph.p_type == PT_INTERP {
                return Err(ElfError::DynamicSegment(index));
            }
            continue;
        }

        if ph.p_memsz == 0 {
            trace!("Skipping empty segment {index}");
            continue;
        }
        if ph.p_filesz > ph.p_memsz {
            return Err(ElfError::FileSizeExceedsMemorySize(index));
        }
        if ph.p_filesz < ph.p_memsz && !ph.p_flags.write() {
            return Err(ElfError::ZeroFillNotWritable(index));
        }
        if page_size.offset(ph.p_vaddr) != page_size.offset(ph.p_offset) {
            return Err(ElfError::MisalignedSegment(index));
        }

        let top = ph
            .p_vaddr
            .checked_add(ph.p_memsz)
            .ok_or(ElfError::SegmentOverflow(index))?;
        let page_top = page_size
            .align_up(top)
            .ok_or(ElfError::SegmentOverflow(index))?;

        let segment = LoadSegment {
            memory: Range::new(page_size.align_down(ph.p_vaddr), top),
            file_offset: page_size.align_down(ph.p_offset),
            file_mapped_size: ph.p_filesz + page_size.offset(ph.p_offset),
            protection: ph.p_flags.into(),
        };
        let pages = Range::new(segment.memory.base, page_top);

        // PT_LOAD segments are sorted by p_vaddr, so a segment can never fit
        // into a hole of the range built so far.
        if !total_range.is_empty() && pages.base < total_range.top {
            return Err(ElfError::OverlappingSegment {
                index,
                range: pages,
            });
        }

        total_range.enlarge(&pages);
        if ph.p_flags.execute() {
            executable_range.enlarge(&pages);
        }

        trace!("Segment {index}: {} {:?}", segment.memory, segment.protection);
        segments.push(segment);
    }

    Ok((segments, total_range, executable_range))
}

fn check_entry_point(segments: &[LoadSegment], entry: u64) -> Result<(), ElfError> {
    let window = Range::from_base_len(entry, ENTRY_WINDOW).ok_or(ElfError::InvalidEntryPoint(entry))?;

    // Segments do not overlap, so at most one can contain the window.
    match segments.iter().find(|s| s.memory.contains(&window)) {
        Some(segment) if segment.protection.execute() => Ok(()),
        _ => Err(ElfError::InvalidEntryPoint(entry)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{SHDR_SIZE, SYM_SIZE};
    use crate::writer::{ImageBuilder, TEXT_OFFSET};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: u64 = 0x2000_0000;

    fn temp_file(bytes: &[u8]) -> File {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "cm-elf-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        drop(f);
        let file = File::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        file
    }

    fn parse(bytes: &[u8]) -> Result<StaticExecutable, ElfError> {
        StaticExecutable::parse(temp_file(bytes), PageSize::SIZE_4K)
    }

    fn echo_image() -> ImageBuilder {
        ImageBuilder::new(BASE)
            .start(|a| {
                a.xor_edi_edi();
                a.jmp_return();
            })
            .entry(|a| {
                a.mov_rdi_rdx();
                a.jmp_return();
            })
    }

    #[test]
    fn parses_well_formed_image() {
        let exe = parse(&echo_image().bss(0x3000).build()).unwrap();

        assert_eq!(exe.total_range(), Range::new(BASE, BASE + 0x5000));
        assert_eq!(exe.executable_range(), Range::new(BASE, BASE + 0x1000));
        assert_eq!(exe.entry_point(), BASE + TEXT_OFFSET);
        assert!(exe.total_range().contains(&exe.executable_range()));
        assert!(exe
            .executable_range()
            .contains(&Range::new(exe.entry_point(), exe.entry_point() + ENTRY_WINDOW)));

        let segments = exe.segments();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].protection.execute());
        assert_eq!(segments[1].memory, Range::new(BASE + 0x1000, BASE + 0x5000));
        assert_eq!(segments[1].file_mapped_size, 0x1000);
    }

    #[test]
    fn rejects_bad_identification() {
        let good = echo_image().build();

        let mut bad_magic = good.clone();
        bad_magic[1] = b'X';
        assert!(matches!(parse(&bad_magic), Err(ElfError::BadMagic)));

        let mut bad_class = good.clone();
        bad_class[4] = 1;
        assert!(matches!(parse(&bad_class), Err(ElfError::BadClass)));

        let mut pie = good.clone();
        pie[16..18].copy_from_slice(&3u16.to_le_bytes());
        assert!(matches!(parse(&pie), Err(ElfError::NotExecutable(3))));

        let mut aarch64 = good;
        aarch64[18..20].copy_from_slice(&183u16.to_le_bytes());
        assert!(matches!(parse(&aarch64), Err(ElfError::BadMachine(183))));
    }

    #[test]
    fn rejects_truncated_file() {
        assert!(matches!(parse(&[0x7f, b'E']), Err(ElfError::Read { .. })));
    }

    #[test]
    fn rejects_entry_outside_executable_segment() {
        let mut bytes = echo_image().build();
        bytes[24..32].copy_from_slice(&(BASE + 0x1008).to_le_bytes());
        assert!(matches!(
            parse(&bytes),
            Err(ElfError::InvalidEntryPoint(e)) if e == BASE + 0x1008
        ));
    }

    #[test]
    fn rejects_missing_symbol_table() {
        let mut bytes = echo_image().build();
        // e_shnum = 0
        bytes[60..62].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(parse(&bytes), Err(ElfError::NoSymbolTable)));
    }

    fn patch(bytes: &mut [u8], offset: usize, value: &[u8]) {
        bytes[offset..offset + value.len()].copy_from_slice(value);
    }

    /// Byte offset of program header `index`.
    const fn phdr(index: usize) -> usize {
        EHDR_SIZE + index * PHDR_SIZE
    }

    /// Byte offset of section header `index`: 0 null, 1 `.symtab`, 2 `.strtab`.
    fn shdr(bytes: &[u8], index: usize) -> usize {
        let shoff = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        shoff as usize + index * SHDR_SIZE
    }

    #[test]
    fn rejects_overlapping_or_unordered_segments() {
        // Data segment on the text page.
        let mut same_page = echo_image().build();
        patch(&mut same_page, phdr(1) + 8, &0u64.to_le_bytes());
        patch(&mut same_page, phdr(1) + 16, &BASE.to_le_bytes());
        assert!(matches!(
            parse(&same_page),
            Err(ElfError::OverlappingSegment { index: 1, .. })
        ));

        // Data segment below the text segment.
        let mut descending = echo_image().build();
        patch(&mut descending, phdr(1) + 16, &(BASE - 0x1000).to_le_bytes());
        assert!(matches!(
            parse(&descending),
            Err(ElfError::OverlappingSegment { index: 1, range }) if range.base == BASE - 0x1000
        ));
    }

    #[test]
    fn rejects_inconsistent_segment_sizes() {
        let mut read_only_bss = echo_image().bss(0x1000).build();
        patch(&mut read_only_bss, phdr(1) + 4, &4u32.to_le_bytes());
        assert!(matches!(
            parse(&read_only_bss),
            Err(ElfError::ZeroFillNotWritable(1))
        ));

        let mut short_memory = echo_image().build();
        patch(&mut short_memory, phdr(1) + 40, &0x800u64.to_le_bytes());
        assert!(matches!(
            parse(&short_memory),
            Err(ElfError::FileSizeExceedsMemorySize(1))
        ));
    }

    #[test]
    fn rejects_dynamic_executables() {
        for kind in [PT_INTERP, PT_DYNAMIC] {
            let mut bytes = echo_image().build();
            patch(&mut bytes, phdr(0), &kind.to_le_bytes());
            assert!(matches!(parse(&bytes), Err(ElfError::DynamicSegment(0))));
        }
    }

    #[test]
    fn rejects_image_without_executable_segment() {
        let mut bytes = echo_image().build();
        patch(&mut bytes, phdr(0) + 4, &4u32.to_le_bytes());
        assert!(matches!(parse(&bytes), Err(ElfError::NoExecutableSegment)));
    }

    #[test]
    fn rejects_malformed_symbol_tables() {
        let good = echo_image().build();
        let symtab = shdr(&good, 1);
        let strtab = shdr(&good, 2);

        // Local/global split beyond the end of the table.
        let mut split = good.clone();
        patch(&mut split, symtab + 44, &100u32.to_le_bytes());
        assert!(matches!(parse(&split), Err(ElfError::InvalidSymbolTable)));

        // Size not a multiple of the entry size.
        let mut ragged = good.clone();
        let size = u64::from_le_bytes(good[symtab + 32..symtab + 40].try_into().unwrap());
        patch(&mut ragged, symtab + 32, &(size - 1).to_le_bytes());
        assert!(matches!(parse(&ragged), Err(ElfError::InvalidSymbolTable)));

        // String table link to the null section, then past the table.
        for link in [0u32, 7] {
            let mut unlinked = good.clone();
            patch(&mut unlinked, symtab + 40, &link.to_le_bytes());
            assert!(matches!(parse(&unlinked), Err(ElfError::InvalidSymbolTable)));
        }

        let mut entry_size = good.clone();
        patch(&mut entry_size, symtab + 56, &16u64.to_le_bytes());
        assert!(matches!(
            parse(&entry_size),
            Err(ElfError::BadEntrySize { size: 16, .. })
        ));

        // Linked section is not a string table.
        let mut progbits = good.clone();
        patch(&mut progbits, strtab + 4, &1u32.to_le_bytes());
        assert!(matches!(parse(&progbits), Err(ElfError::InvalidStringTable)));

        // String table reaching past the end of the file.
        let mut truncated = good;
        patch(&mut truncated, strtab + 32, &0x10_0000u64.to_le_bytes());
        assert!(matches!(parse(&truncated), Err(ElfError::InvalidStringTable)));
    }

    #[test]
    fn undefined_symbols_do_not_resolve() {
        let mut bytes = echo_image().build();
        // Entry 2 is __compartment_entry; st_shndx sits at byte 6.
        patch(&mut bytes, 0x2000 + 2 * SYM_SIZE + 6, &SHN_UNDEF.to_le_bytes());
        let exe = parse(&bytes).unwrap();
        assert_eq!(exe.find_symbol("__compartment_entry", 0, Protection::new()), None);
        assert!(exe
            .find_symbol("__compartment_manager_call", 8, Protection::READ_WRITE)
            .is_some());
    }

    #[test]
    fn finds_global_symbols_with_constraints() {
        let exe = parse(&echo_image().build()).unwrap();
        let layout = crate::writer::Layout::new(BASE);

        assert_eq!(
            exe.find_symbol("__compartment_manager_return", 8, Protection::READ_WRITE),
            Some(layout.return_slot())
        );
        assert_eq!(
            exe.find_symbol(
                "__compartment_entry",
                0,
                Protection::new().with_execute(true)
            ),
            Some(layout.entry_address())
        );

        // wrong size
        assert_eq!(
            exe.find_symbol("__compartment_manager_return", 16, Protection::READ_WRITE),
            None
        );
        // data symbol is not executable
        assert_eq!(
            exe.find_symbol(
                "__compartment_manager_call",
                8,
                Protection::new().with_execute(true)
            ),
            None
        );
        // code symbol is not writable
        assert_eq!(
            exe.find_symbol("__compartment_entry", 0, Protection::READ_WRITE),
            None
        );
        // local symbols are never visible
        assert_eq!(exe.find_symbol("local_helper", 0, Protection::NONE), None);
        assert_eq!(exe.find_symbol("does_not_exist", 0, Protection::NONE), None);
    }

    #[test]
    fn reports_program_header_auxiliary_values() {
        let exe = parse(&echo_image().build()).unwrap();
        assert_eq!(exe.auxiliary_value(AuxType::ProgramHeaderCount), 2);
        assert_eq!(
            exe.auxiliary_value(AuxType::ProgramHeaderEntrySize),
            PHDR_SIZE as u64
        );
        // the headers live in the first page of the text segment
        assert_eq!(exe.auxiliary_value(AuxType::ProgramHeaders), BASE + 64);
        assert_eq!(exe.auxiliary_value(AuxType::Random), 0);
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        File(Range, Protection, u64),
        Zero(Range),
        Anon(Range, Protection),
    }

    #[derive(Default)]
    struct Recorder(Vec<Op>);

    impl AddressSpace for Recorder {
        fn page_size(&self) -> PageSize {
            PageSize::SIZE_4K
        }

        fn reserve(&mut self, _range: Range) -> Result<(), cm_vmem::MapError> {
            Ok(())
        }

        fn map_anonymous(
            &mut self,
            range: Range,
            protection: Protection,
        ) -> Result<(), cm_vmem::MapError> {
            self.0.push(Op::Anon(range, protection));
            Ok(())
        }

        fn map_file(
            &mut self,
            range: Range,
            protection: Protection,
            _file: std::os::fd::BorrowedFd<'_>,
            offset: u64,
        ) -> Result<(), cm_vmem::MapError> {
            self.0.push(Op::File(range, protection, offset));
            Ok(())
        }

        unsafe fn zero(&mut self, range: Range) {
            self.0.push(Op::Zero(range));
        }
    }

    #[test]
    fn map_plans_file_and_zero_fill_mappings() {
        let exe = parse(&echo_image().data_file_size(0x800).bss(0x2000).build()).unwrap();
        let mut rec = Recorder::default();
        exe.map(&mut rec).unwrap();

        let rx = Protection::new().with_read(true).with_execute(true);
        assert_eq!(
            rec.0,
            vec![
                Op::File(Range::new(BASE, BASE + 0x1000), rx, 0),
                Op::File(
                    Range::new(BASE + 0x1000, BASE + 0x1800),
                    Protection::READ_WRITE,
                    0x1000
                ),
                Op::Zero(Range::new(BASE + 0x1800, BASE + 0x2000)),
                Op::Anon(
                    Range::new(BASE + 0x2000, BASE + 0x3800),
                    Protection::READ_WRITE
                ),
            ]
        );
    }
}
