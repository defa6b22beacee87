// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Versioned dynamic-symbol lookup in the kernel-provided VDSO.

/// ELF symbol type of the symbols the unwinder looks for.
pub const STT_FUNC: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum SymbolLookupError {
    #[error("No VDSO is mapped into this process")]
    ObjectNotPresent,
    #[error("Symbol {name}@{version} not found")]
    SymbolNotFound {
        name: &'static str,
        version: &'static str,
    },
    #[error("Malformed VDSO image: {0}")]
    Malformed(&'static str),
}

/// Resolves a versioned symbol of the process's virtual shared object to its address.
pub trait SymbolLookup {
    fn lookup(
        &self,
        name: &'static str,
        version: &'static str,
        kind: u8,
    ) -> Result<usize, SymbolLookupError>;
}

#[cfg(target_os = "linux")]
pub use linux::VdsoImage;

#[cfg(target_os = "linux")]
mod linux {
    use super::{SymbolLookup, SymbolLookupError};
    use goblin::elf::{dynamic, header, program_header, sym};
    use std::mem::size_of;

    #[cfg(target_pointer_width = "32")]
    use goblin::elf::{
        dynamic::dyn32::Dyn, header::header32::Header,
        program_header::program_header32::ProgramHeader, sym::sym32::Sym,
    };
    #[cfg(target_pointer_width = "64")]
    use goblin::elf::{
        dynamic::dyn64::Dyn, header::header64::Header,
        program_header::program_header64::ProgramHeader, sym::sym64::Sym,
    };

    #[cfg(target_pointer_width = "32")]
    const NATIVE_CLASS: u8 = header::ELFCLASS32;
    #[cfg(target_pointer_width = "64")]
    const NATIVE_CLASS: u8 = header::ELFCLASS64;

    const VERSYM_HIDDEN: u16 = 0x8000;
    const VERSYM_VERSION: u16 = 0x7fff;
    // Bounds the walks over kernel-provided linked lists.
    const MAX_DYNAMIC_ENTRIES: usize = 256;
    const MAX_VERSION_DEFINITIONS: usize = 64;

    // Version definition records share one layout across ELF classes.
    #[allow(dead_code)]
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Verdef {
        vd_version: u16,
        vd_flags: u16,
        vd_ndx: u16,
        vd_cnt: u16,
        vd_hash: u32,
        vd_aux: u32,
        vd_next: u32,
    }

    #[allow(dead_code)]
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Verdaux {
        vda_name: u32,
        vda_next: u32,
    }

    /// # Safety
    /// `addr` must be readable for `size_of::<T>()` bytes.
    unsafe fn read<T: Copy>(addr: usize) -> T {
        std::ptr::read_unaligned(addr as *const T)
    }

    /// The VDSO image the kernel maps into every process.
    ///
    /// The dynamic symbol table is located once, straight from the mapped image. Lookups read
    /// the mapping in place and never allocate.
    #[derive(Debug, Clone, Copy)]
    pub struct VdsoImage {
        base: usize,
        // Difference between mapped and link-time addresses.
        bias: usize,
        symtab: usize,
        symbols: usize,
        strtab: usize,
        strsz: usize,
        // 0 when the image carries no symbol versions.
        versym: usize,
        verdef: usize,
    }

    impl VdsoImage {
        /// Locates the VDSO through the `AT_SYSINFO_EHDR` auxiliary vector entry.
        pub fn from_auxv() -> Result<Self, SymbolLookupError> {
            // SAFETY: getauxval has no preconditions.
            let base = unsafe { libc::getauxval(libc::AT_SYSINFO_EHDR) } as usize;
            if base == 0 {
                return Err(SymbolLookupError::ObjectNotPresent);
            }
            // SAFETY: the kernel maps the complete image, headers included, at `base` for the
            // lifetime of the process.
            unsafe { Self::from_base(base) }
        }

        /// # Safety
        /// `base` must be the address of a complete, native-class ELF image that stays mapped
        /// forever.
        pub unsafe fn from_base(base: usize) -> Result<Self, SymbolLookupError> {
            let ehdr: Header = read(base);
            if &ehdr.e_ident[..header::SELFMAG] != header::ELFMAG {
                return Err(SymbolLookupError::Malformed("bad ELF magic"));
            }
            if ehdr.e_ident[header::EI_CLASS] != NATIVE_CLASS {
                return Err(SymbolLookupError::Malformed("foreign ELF class"));
            }
            if usize::from(ehdr.e_phentsize) != size_of::<ProgramHeader>() {
                return Err(SymbolLookupError::Malformed("unexpected program header size"));
            }

            let mut link_base = usize::MAX;
            let mut dynamic_vaddr = None;
            for i in 0..usize::from(ehdr.e_phnum) {
                let phdr: ProgramHeader =
                    read(base + ehdr.e_phoff as usize + i * size_of::<ProgramHeader>());
                match phdr.p_type {
                    program_header::PT_LOAD => link_base = link_base.min(phdr.p_vaddr as usize),
                    program_header::PT_DYNAMIC => dynamic_vaddr = Some(phdr.p_vaddr as usize),
                    _ => {}
                }
            }
            let Some(dynamic_vaddr) = dynamic_vaddr.filter(|_| link_base != usize::MAX) else {
                return Err(SymbolLookupError::Malformed("no dynamic segment"));
            };
            // Symbol values and dynamic pointers are link-time addresses.
            let bias = base.wrapping_sub(link_base);

            let mut image = Self {
                base,
                bias,
                symtab: 0,
                symbols: 0,
                strtab: 0,
                strsz: 0,
                versym: 0,
                verdef: 0,
            };
            let mut hash = 0;
            let dynamic = dynamic_vaddr.wrapping_add(bias);
            for i in 0..MAX_DYNAMIC_ENTRIES {
                let entry: Dyn = read(dynamic + i * size_of::<Dyn>());
                let value = entry.d_val as usize;
                match u64::from(entry.d_tag) {
                    dynamic::DT_NULL => break,
                    dynamic::DT_HASH => hash = value.wrapping_add(bias),
                    dynamic::DT_SYMTAB => image.symtab = value.wrapping_add(bias),
                    dynamic::DT_STRTAB => image.strtab = value.wrapping_add(bias),
                    dynamic::DT_STRSZ => image.strsz = value,
                    dynamic::DT_VERSYM => image.versym = value.wrapping_add(bias),
                    dynamic::DT_VERDEF => image.verdef = value.wrapping_add(bias),
                    _ => {}
                }
            }
            if image.symtab == 0 || image.strtab == 0 || image.strsz == 0 || hash == 0 {
                return Err(SymbolLookupError::Malformed("incomplete dynamic symbol table"));
            }
            // The SysV hash table is `nbucket, nchain, ...`, with one chain entry per symbol.
            image.symbols = read::<u32>(hash + 4) as usize;
            if image.versym == 0 || image.verdef == 0 {
                image.versym = 0;
                image.verdef = 0;
            }
            Ok(image)
        }

        pub fn base(&self) -> usize {
            self.base
        }

        /// Whether the NUL-terminated string at `offset` in the string table equals `s`.
        fn name_is(&self, offset: usize, s: &str) -> bool {
            match offset.checked_add(s.len()) {
                Some(end) if end < self.strsz => {}
                _ => return false,
            }
            // SAFETY: within the string table, terminator included.
            let bytes = unsafe {
                std::slice::from_raw_parts((self.strtab + offset) as *const u8, s.len() + 1)
            };
            bytes[..s.len()] == *s.as_bytes() && bytes[s.len()] == 0
        }

        fn has_version(&self, idx: usize, version: &str) -> bool {
            if self.versym == 0 {
                // Unversioned image: accept any version.
                return true;
            }
            // SAFETY: `.gnu.version` has one entry per dynamic symbol.
            let versym: u16 = unsafe { read(self.versym + idx * size_of::<u16>()) };
            if versym & VERSYM_HIDDEN != 0 {
                return false;
            }
            let index = versym & VERSYM_VERSION;
            let mut addr = self.verdef;
            for _ in 0..MAX_VERSION_DEFINITIONS {
                // SAFETY: version definitions form a list inside the mapped image.
                let def: Verdef = unsafe { read(addr) };
                if def.vd_ndx == index && def.vd_cnt > 0 {
                    // SAFETY: as above. The first auxiliary entry names the version itself.
                    let aux: Verdaux = unsafe { read(addr.wrapping_add(def.vd_aux as usize)) };
                    return self.name_is(aux.vda_name as usize, version);
                }
                if def.vd_next == 0 {
                    break;
                }
                addr = addr.wrapping_add(def.vd_next as usize);
            }
            false
        }
    }

    impl SymbolLookup for VdsoImage {
        fn lookup(
            &self,
            name: &'static str,
            version: &'static str,
            kind: u8,
        ) -> Result<usize, SymbolLookupError> {
            for idx in 0..self.symbols {
                // SAFETY: the symbol table holds `symbols` entries.
                let symbol: Sym = unsafe { read(self.symtab + idx * size_of::<Sym>()) };
                if sym::st_type(symbol.st_info) != kind || symbol.st_value == 0 {
                    continue;
                }
                if !self.name_is(symbol.st_name as usize, name) || !self.has_version(idx, version)
                {
                    continue;
                }
                return Ok((symbol.st_value as usize).wrapping_add(self.bias));
            }
            Err(SymbolLookupError::SymbolNotFound { name, version })
        }
    }

}
