//! Raw ELF64 structures, decoded field by field from little-endian bytes.

use bitfield_struct::bitfield;

pub const EHDR_SIZE: usize = 64;
pub const PHDR_SIZE: usize = 56;
pub const SHDR_SIZE: usize = 64;
pub const SYM_SIZE: usize = 24;

pub const ELF_MAGIC: [u8; 4] = *b"\x7FELF";
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;

pub const ET_EXEC: u16 = 2;
pub const EM_X86_64: u16 = 62;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;

pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHN_UNDEF: u16 = 0;

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Eh64 {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Eh64 {
    #[must_use]
    pub fn parse(b: &[u8; EHDR_SIZE]) -> Self {
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&b[0..16]);
        Self {
            e_ident,
            e_type: le16(&b[16..18]),
            e_machine: le16(&b[18..20]),
            e_version: le32(&b[20..24]),
            e_entry: le64(&b[24..32]),
            e_phoff: le64(&b[32..40]),
            e_shoff: le64(&b[40..48]),
            e_flags: le32(&b[48..52]),
            e_ehsize: le16(&b[52..54]),
            e_phentsize: le16(&b[54..56]),
            e_phnum: le16(&b[56..58]),
            e_shentsize: le16(&b[58..60]),
            e_shnum: le16(&b[60..62]),
            e_shstrndx: le16(&b[62..64]),
        }
    }
}

#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Ph64 {
    pub p_type: u32,
    pub p_flags: PFlags,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Ph64 {
    #[must_use]
    pub fn parse(b: &[u8; PHDR_SIZE]) -> Self {
        Self {
            p_type: le32(&b[0..4]),
            p_flags: PFlags::from_bits(le32(&b[4..8])),
            p_offset: le64(&b[8..16]),
            p_vaddr: le64(&b[16..24]),
            p_paddr: le64(&b[24..32]),
            p_filesz: le64(&b[32..40]),
            p_memsz: le64(&b[40..48]),
            p_align: le64(&b[48..56]),
        }
    }
}

#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Sh64 {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl Sh64 {
    #[must_use]
    pub fn parse(b: &[u8; SHDR_SIZE]) -> Self {
        Self {
            sh_name: le32(&b[0..4]),
            sh_type: le32(&b[4..8]),
            sh_flags: le64(&b[8..16]),
            sh_addr: le64(&b[16..24]),
            sh_offset: le64(&b[24..32]),
            sh_size: le64(&b[32..40]),
            sh_link: le32(&b[40..44]),
            sh_info: le32(&b[44..48]),
            sh_addralign: le64(&b[48..56]),
            sh_entsize: le64(&b[56..64]),
        }
    }
}

#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Sym64 {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Sym64 {
    /// Decodes one entry; `b` must hold at least [`SYM_SIZE`] bytes.
    #[must_use]
    pub fn parse(b: &[u8]) -> Self {
        Self {
            st_name: le32(&b[0..4]),
            st_info: b[4],
            st_other: b[5],
            st_shndx: le16(&b[6..8]),
            st_value: le64(&b[8..16]),
            st_size: le64(&b[16..24]),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> u8 {
        self.st_info & 0xf
    }

    #[must_use]
    pub const fn binding(&self) -> u8 {
        self.st_info >> 4
    }
}

/// `Elf64_Phdr.p_flags` (SVr4): bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool, // PF_X = 1
    #[bits(1)]
    pub write: bool, // PF_W = 2
    #[bits(1)]
    pub read: bool, // PF_R = 4
    #[bits(29)]
    __: u32,
}

impl From<PFlags> for cm_vmem::Protection {
    fn from(value: PFlags) -> Self {
        Self::new()
            .with_read(value.read())
            .with_write(value.write())
            .with_execute(value.execute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_vmem::Protection;

    #[test]
    fn pflags_convert_to_mmap_protection() {
        let rx = PFlags::from_bits(0x5);
        let prot = Protection::from(rx);
        assert!(prot.read() && prot.execute() && !prot.write());

        let rw = PFlags::from_bits(0x6);
        assert_eq!(Protection::from(rw), Protection::READ_WRITE);
    }

    #[test]
    fn symbol_info_split() {
        let mut raw = [0u8; SYM_SIZE];
        raw[4] = (STB_GLOBAL << 4) | STT_FUNC;
        raw[8..16].copy_from_slice(&0x40_1000u64.to_le_bytes());
        let sym = Sym64::parse(&raw);
        assert_eq!(sym.binding(), STB_GLOBAL);
        assert_eq!(sym.kind(), STT_FUNC);
        assert_eq!(sym.st_value, 0x40_1000);
    }
}
