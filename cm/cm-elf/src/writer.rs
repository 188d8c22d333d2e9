//! # Test Image Writer
//!
//! Emits tiny static x86-64 executables that follow the compartment
//! conventions, so the loader and the manager can be exercised without an
//! external toolchain.
//!
//! | File offset | Contents                                         |
//! |-------------|--------------------------------------------------|
//! | `0x0000`    | ELF header, two program headers                  |
//! | `0x0100`    | start code (`e_entry`)                           |
//! | `0x0200`    | `__compartment_entry`                            |
//! | `0x0300`    | a local helper symbol                            |
//! | `0x1000`    | data page: manager slots, arena bounds, scratch  |
//! | `0x2000`    | `.symtab`, `.strtab`, section headers            |
//!
//! The text page is mapped `R|X` at `base`, the data page `R|W` at
//! `base + 0x1000`, optionally followed by zero-filled memory.

#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use crate::header::{
    EHDR_SIZE, EM_X86_64, ET_EXEC, PHDR_SIZE, PT_LOAD, SHDR_SIZE, SHT_STRTAB, SHT_SYMTAB,
    STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_OBJECT, SYM_SIZE,
};

const PAGE: u64 = 0x1000;

/// Offset of the start code from the image base.
pub const TEXT_OFFSET: u64 = 0x100;
const ENTRY_OFFSET: u64 = 0x200;
const HELPER_OFFSET: u64 = 0x300;
const DATA_OFFSET: u64 = PAGE;
const SYMTAB_OFFSET: u64 = 2 * PAGE;

/// Addresses of the well-known locations in an image linked at `base`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Layout {
    base: u64,
}

impl Layout {
    #[must_use]
    pub const fn new(base: u64) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn start_address(&self) -> u64 {
        self.base + TEXT_OFFSET
    }

    #[must_use]
    pub const fn entry_address(&self) -> u64 {
        self.base + ENTRY_OFFSET
    }

    #[must_use]
    pub const fn call_slot(&self) -> u64 {
        self.base + DATA_OFFSET
    }

    #[must_use]
    pub const fn return_slot(&self) -> u64 {
        self.base + DATA_OFFSET + 8
    }

    #[must_use]
    pub const fn arena_base_slot(&self) -> u64 {
        self.base + DATA_OFFSET + 16
    }

    #[must_use]
    pub const fn arena_top_slot(&self) -> u64 {
        self.base + DATA_OFFSET + 24
    }

    /// Free 8-byte data word `index`, for code that wants to leave a trace.
    #[must_use]
    pub const fn scratch(&self, index: u64) -> u64 {
        self.base + DATA_OFFSET + 32 + index * 8
    }
}

/// Position-aware x86-64 emitter for the handful of instructions the test
/// compartments need.
pub struct Asm {
    layout: Layout,
    address: u64,
    code: Vec<u8>,
}

impl Asm {
    const fn new(layout: Layout, address: u64) -> Self {
        Self {
            layout,
            address,
            code: Vec::new(),
        }
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    fn next_address(&self) -> u64 {
        self.address + self.code.len() as u64
    }

    fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Emits `opcode` followed by a RIP-relative displacement to `target`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn rip_relative(&mut self, opcode: &[u8], target: u64) -> &mut Self {
        let end = self.next_address() + opcode.len() as u64 + 4;
        let disp = target.wrapping_sub(end) as i64;
        assert!(
            i32::try_from(disp).is_ok(),
            "RIP-relative target out of range"
        );
        self.emit(opcode);
        self.emit(&(disp as i32).to_le_bytes())
    }

    /// `xor edi, edi`
    pub fn xor_edi_edi(&mut self) -> &mut Self {
        self.emit(&[0x31, 0xFF])
    }

    /// `mov edi, imm32`
    pub fn mov_edi(&mut self, imm: u32) -> &mut Self {
        self.emit(&[0xBF]);
        self.emit(&imm.to_le_bytes())
    }

    /// `mov rdi, rdx`
    pub fn mov_rdi_rdx(&mut self) -> &mut Self {
        self.emit(&[0x48, 0x89, 0xD7])
    }

    /// `mov eax, imm32`
    pub fn mov_eax(&mut self, imm: u32) -> &mut Self {
        self.emit(&[0xB8]);
        self.emit(&imm.to_le_bytes())
    }

    /// `lea rdi, [rax + disp8]`
    pub fn lea_rdi_rax(&mut self, disp: i8) -> &mut Self {
        self.emit(&[0x48, 0x8D, 0x78]);
        self.emit(&disp.to_le_bytes())
    }

    /// `mov rax, [rsp]`
    pub fn mov_rax_from_stack_top(&mut self) -> &mut Self {
        self.emit(&[0x48, 0x8B, 0x04, 0x24])
    }

    /// `mov [rip + target], rax`
    pub fn store_rax(&mut self, target: u64) -> &mut Self {
        self.rip_relative(&[0x48, 0x89, 0x05], target)
    }

    /// `mov rdi, [rip + target]`
    pub fn load_rdi(&mut self, target: u64) -> &mut Self {
        self.rip_relative(&[0x48, 0x8B, 0x3D], target)
    }

    /// `mov rsi, imm64`
    pub fn mov_rsi(&mut self, imm: u64) -> &mut Self {
        self.emit(&[0x48, 0xBE]);
        self.emit(&imm.to_le_bytes())
    }

    /// `mov [rip + target], rsi`
    pub fn store_rsi(&mut self, target: u64) -> &mut Self {
        self.rip_relative(&[0x48, 0x89, 0x35], target)
    }

    /// `mov rdi, fs:[0]`
    pub fn load_rdi_fs0(&mut self) -> &mut Self {
        self.emit(&[0x64, 0x48, 0x8B, 0x3C, 0x25, 0, 0, 0, 0])
    }

    /// `syscall`
    pub fn syscall(&mut self) -> &mut Self {
        self.emit(&[0x0F, 0x05])
    }

    /// `call [rip + __compartment_manager_call]`
    pub fn call_manager(&mut self) -> &mut Self {
        let slot = self.layout.call_slot();
        self.rip_relative(&[0xFF, 0x15], slot)
    }

    /// `jmp [rip + __compartment_manager_return]`
    pub fn jmp_return(&mut self) -> &mut Self {
        let slot = self.layout.return_slot();
        self.rip_relative(&[0xFF, 0x25], slot)
    }
}

/// Builds an image linked at a fixed base address.
pub struct ImageBuilder {
    layout: Layout,
    start: Vec<u8>,
    entry: Vec<u8>,
    data_file_size: u64,
    bss: u64,
    omitted: Vec<&'static str>,
    sizes: Vec<(&'static str, u64)>,
}

impl ImageBuilder {
    /// `base` must be page-aligned.
    #[must_use]
    pub fn new(base: u64) -> Self {
        assert_eq!(base % PAGE, 0, "image base must be page-aligned");
        Self {
            layout: Layout::new(base),
            start: vec![0xCC],
            entry: vec![0xCC],
            data_file_size: PAGE,
            bss: 0,
            omitted: Vec::new(),
            sizes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Code run by the first call into the compartment.
    #[must_use]
    pub fn start(mut self, f: impl FnOnce(&mut Asm)) -> Self {
        self.start = self.assemble(TEXT_OFFSET, f);
        self
    }

    /// Code behind `__compartment_entry`.
    #[must_use]
    pub fn entry(mut self, f: impl FnOnce(&mut Asm)) -> Self {
        self.entry = self.assemble(ENTRY_OFFSET, f);
        self
    }

    /// Bytes of the data page backed by the file (at most a page).
    #[must_use]
    pub fn data_file_size(mut self, size: u64) -> Self {
        assert!(size <= PAGE);
        self.data_file_size = size;
        self
    }

    /// Zero-filled memory appended to the data segment.
    #[must_use]
    pub const fn bss(mut self, len: u64) -> Self {
        self.bss = len;
        self
    }

    /// Leaves a well-known symbol out of the symbol table.
    #[must_use]
    pub fn omit_symbol(mut self, name: &'static str) -> Self {
        self.omitted.push(name);
        self
    }

    /// Overrides the `st_size` of a well-known symbol.
    #[must_use]
    pub fn symbol_size(mut self, name: &'static str, size: u64) -> Self {
        self.sizes.push((name, size));
        self
    }

    fn assemble(&self, offset: u64, f: impl FnOnce(&mut Asm)) -> Vec<u8> {
        let mut asm = Asm::new(self.layout, self.layout.base + offset);
        f(&mut asm);
        assert!(
            asm.code.len() as u64 <= 0x100,
            "code does not fit its slot"
        );
        asm.code
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let base = self.layout.base;
        let mut out = vec![0u8; (SYMTAB_OFFSET) as usize];

        // code
        put(&mut out, TEXT_OFFSET, &self.start);
        put(&mut out, ENTRY_OFFSET, &self.entry);
        put(&mut out, HELPER_OFFSET, &[0xC3]);

        // symbols: null, one local, then the globals
        let globals: [(&str, u8, u64, u64); 5] = [
            ("__compartment_entry", STT_FUNC, self.layout.entry_address(), 0),
            ("__compartment_manager_call", STT_OBJECT, self.layout.call_slot(), 8),
            ("__compartment_manager_return", STT_OBJECT, self.layout.return_slot(), 8),
            ("__compartment_mmap_range_base", STT_OBJECT, self.layout.arena_base_slot(), 8),
            ("__compartment_mmap_range_top", STT_OBJECT, self.layout.arena_top_slot(), 8),
        ];

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; SYM_SIZE];
        let mut add_symbol = |name: &str, binding: u8, kind: u8, value: u64, size: u64| {
            let name_offset = u32::try_from(strtab.len()).unwrap_or(u32::MAX);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            symtab.extend_from_slice(&name_offset.to_le_bytes());
            symtab.push((binding << 4) | kind);
            symtab.push(0);
            symtab.extend_from_slice(&1u16.to_le_bytes());
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&size.to_le_bytes());
        };

        add_symbol("local_helper", STB_LOCAL, STT_FUNC, base + HELPER_OFFSET, 1);
        let first_global = 2u32;
        for (name, kind, value, size) in globals {
            if self.omitted.contains(&name) {
                continue;
            }
            let size = self
                .sizes
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map_or(size, |(_, s)| *s);
            add_symbol(name, STB_GLOBAL, kind, value, size);
        }

        let strtab_offset = SYMTAB_OFFSET + symtab.len() as u64;
        let shoff = (strtab_offset + strtab.len() as u64).next_multiple_of(8);

        out.extend_from_slice(&symtab);
        out.extend_from_slice(&strtab);
        out.resize(shoff as usize, 0);

        // section headers: null, .symtab, .strtab
        out.extend_from_slice(&[0u8; SHDR_SIZE]);
        out.extend_from_slice(&section_header(
            SHT_SYMTAB,
            SYMTAB_OFFSET,
            symtab.len() as u64,
            2,
            first_global,
            SYM_SIZE as u64,
        ));
        out.extend_from_slice(&section_header(
            SHT_STRTAB,
            strtab_offset,
            strtab.len() as u64,
            0,
            0,
            0,
        ));

        // program headers
        let text = program_header(5, 0, base, PAGE, PAGE);
        let data = program_header(
            6,
            DATA_OFFSET,
            base + DATA_OFFSET,
            self.data_file_size,
            self.data_file_size + self.bss,
        );
        put(&mut out, EHDR_SIZE as u64, &text);
        put(&mut out, (EHDR_SIZE + PHDR_SIZE) as u64, &data);

        // ELF header
        let mut eh = [0u8; EHDR_SIZE];
        eh[0..4].copy_from_slice(b"\x7FELF");
        eh[4] = 2; // ELFCLASS64
        eh[5] = 1; // ELFDATA2LSB
        eh[6] = 1; // EV_CURRENT
        eh[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        eh[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        eh[20..24].copy_from_slice(&1u32.to_le_bytes());
        eh[24..32].copy_from_slice(&self.layout.start_address().to_le_bytes());
        eh[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        eh[40..48].copy_from_slice(&shoff.to_le_bytes());
        eh[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        eh[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        eh[56..58].copy_from_slice(&2u16.to_le_bytes());
        eh[58..60].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        eh[60..62].copy_from_slice(&3u16.to_le_bytes());
        put(&mut out, 0, &eh);

        out
    }
}

fn put(out: &mut [u8], offset: u64, bytes: &[u8]) {
    let offset = offset as usize;
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn program_header(flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64) -> [u8; PHDR_SIZE] {
    let mut ph = [0u8; PHDR_SIZE];
    ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
    ph[4..8].copy_from_slice(&flags.to_le_bytes());
    ph[8..16].copy_from_slice(&offset.to_le_bytes());
    ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
    ph[24..32].copy_from_slice(&vaddr.to_le_bytes());
    ph[32..40].copy_from_slice(&filesz.to_le_bytes());
    ph[40..48].copy_from_slice(&memsz.to_le_bytes());
    ph[48..56].copy_from_slice(&PAGE.to_le_bytes());
    ph
}

fn section_header(
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    entsize: u64,
) -> [u8; SHDR_SIZE] {
    let mut sh = [0u8; SHDR_SIZE];
    sh[4..8].copy_from_slice(&kind.to_le_bytes());
    sh[24..32].copy_from_slice(&offset.to_le_bytes());
    sh[32..40].copy_from_slice(&size.to_le_bytes());
    sh[40..44].copy_from_slice(&link.to_le_bytes());
    sh[44..48].copy_from_slice(&info.to_le_bytes());
    sh[48..56].copy_from_slice(&8u64.to_le_bytes());
    sh[56..64].copy_from_slice(&entsize.to_le_bytes());
    sh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rip_relative_displacement_is_from_instruction_end() {
        let layout = Layout::new(0x1000_0000);
        let mut asm = Asm::new(layout, layout.entry_address());
        asm.jmp_return();
        // jmp [rip+d] is 6 bytes, so d = return_slot - (entry + 6)
        let disp = i32::from_le_bytes(asm.code[2..6].try_into().unwrap());
        assert_eq!(
            i64::from(disp),
            (layout.return_slot() - (layout.entry_address() + 6)) as i64
        );
    }

    #[test]
    fn thread_pointer_instructions_encode() {
        let layout = Layout::new(0x1000_0000);
        let mut asm = Asm::new(layout, layout.start_address());
        asm.mov_rsi(0x1122_3344_5566_7788).syscall().load_rdi_fs0();
        let expected: [u8; 21] = [
            0x48, 0xBE, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, // mov rsi
            0x0F, 0x05, // syscall
            0x64, 0x48, 0x8B, 0x3C, 0x25, 0, 0, 0, 0, // mov rdi, fs:[0]
        ];
        assert_eq!(asm.code, expected);
    }

    #[test]
    fn omitted_symbols_shrink_the_table() {
        let full = ImageBuilder::new(0x1000_0000).build();
        let reduced = ImageBuilder::new(0x1000_0000)
            .omit_symbol("__compartment_mmap_range_top")
            .build();
        assert!(reduced.len() < full.len());
    }
}
