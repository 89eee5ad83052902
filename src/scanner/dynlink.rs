//! Dynamic-link metadata extraction from ELF and PE images.
//!
//! Both walks are strictly bounds-checked: every offset is validated against
//! the buffer before it is read, and any out-of-range value ends the relevant
//! walk with whatever was collected so far. A malformed file can never abort
//! a scan.

/// A required library and the functions imported from it.
/// ELF `DT_NEEDED` entries carry no per-function information, so `funcs`
/// is always empty for ELF images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub lib: String,
    pub funcs: Vec<String>,
}

const ELF_NAME_CAP: usize = 4096;
const PE_DLL_NAME_CAP: usize = 1024;
const PE_FUNC_NAME_CAP: usize = 2048;

fn r16(b: &[u8], off: usize, be: bool) -> Option<u16> {
    let s = b.get(off..off + 2)?;
    Some(if be {
        u16::from_be_bytes([s[0], s[1]])
    } else {
        u16::from_le_bytes([s[0], s[1]])
    })
}

fn r32(b: &[u8], off: usize, be: bool) -> Option<u32> {
    let s = b.get(off..off + 4)?;
    let arr = [s[0], s[1], s[2], s[3]];
    Some(if be {
        u32::from_be_bytes(arr)
    } else {
        u32::from_le_bytes(arr)
    })
}

fn r64(b: &[u8], off: usize, be: bool) -> Option<u64> {
    let s = b.get(off..off + 8)?;
    let arr = [s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]];
    Some(if be {
        u64::from_be_bytes(arr)
    } else {
        u64::from_le_bytes(arr)
    })
}

/// Read a NUL-terminated string at `off`, truncated to `cap` bytes.
fn read_cstr(b: &[u8], off: usize, cap: usize) -> String {
    let mut name = String::new();
    let mut i = off;
    while i < b.len() && name.len() < cap {
        let c = b[i];
        if c == 0 {
            break;
        }
        name.push(c as char);
        i += 1;
    }
    name
}

pub fn is_elf(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0] == 0x7F && buf[1] == b'E' && buf[2] == b'L' && buf[3] == b'F'
}

pub fn is_pe(buf: &[u8]) -> bool {
    if buf.len() < 0x40 || buf[0] != b'M' || buf[1] != b'Z' {
        return false;
    }
    let Some(e_lfanew) = r32(buf, 0x3C, false) else {
        return false;
    };
    let nt = e_lfanew as usize;
    match buf.get(nt..nt + 4) {
        Some(sig) => sig == b"PE\0\0",
        None => false,
    }
}

// ---------------------------------------------------------------------------
// ELF
// ---------------------------------------------------------------------------

/// Map a virtual address to a file offset by scanning PT_LOAD segments.
fn elf_vaddr_to_off(
    b: &[u8],
    be: bool,
    is64: bool,
    va: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> Option<usize> {
    for i in 0..phnum {
        let off = phoff as usize + i as usize * phentsize as usize;
        let (p_type, p_offset, p_vaddr, p_memsz) = if is64 {
            (
                r32(b, off, be)?,
                r64(b, off + 8, be)?,
                r64(b, off + 16, be)?,
                r64(b, off + 40, be)?,
            )
        } else {
            (
                r32(b, off, be)?,
                u64::from(r32(b, off + 4, be)?),
                u64::from(r32(b, off + 8, be)?),
                u64::from(r32(b, off + 20, be)?),
            )
        };
        // PT_LOAD
        if p_type == 1 && va >= p_vaddr && va < p_vaddr.wrapping_add(p_memsz) {
            let foff = p_offset.wrapping_add(va - p_vaddr);
            if (foff as usize) < b.len() {
                return Some(foff as usize);
            }
        }
    }
    None
}

/// Walk program headers for PT_DYNAMIC, then the dynamic table for
/// DT_STRTAB (tag 5) and DT_NEEDED (tag 1), and resolve each needed-library
/// name through the string table.
pub fn parse_elf(buf: &[u8]) -> Vec<Import> {
    let mut out = Vec::new();
    if !is_elf(buf) || buf.len() < 0x40 {
        return out;
    }
    let is64 = buf[4] == 2;
    let is32 = buf[4] == 1;
    if !is64 && !is32 {
        return out;
    }
    let be = buf[5] == 2;

    let (phoff, phentsize, phnum) = if is64 {
        let Some(phoff) = r64(buf, 0x20, be) else {
            return out;
        };
        let (Some(entsize), Some(num)) = (r16(buf, 0x36, be), r16(buf, 0x38, be)) else {
            return out;
        };
        (phoff, entsize, num)
    } else {
        let Some(phoff) = r32(buf, 0x1C, be) else {
            return out;
        };
        let (Some(entsize), Some(num)) = (r16(buf, 0x2A, be), r16(buf, 0x2C, be)) else {
            return out;
        };
        (u64::from(phoff), entsize, num)
    };

    // Locate PT_DYNAMIC.
    let mut dyn_off = 0u64;
    let mut dyn_sz = 0u64;
    for i in 0..phnum {
        let off = phoff as usize + i as usize * phentsize as usize;
        let (p_type, p_offset, p_filesz) = if is64 {
            let (Some(t), Some(o), Some(s)) =
                (r32(buf, off, be), r64(buf, off + 8, be), r64(buf, off + 32, be))
            else {
                break;
            };
            (t, o, s)
        } else {
            let (Some(t), Some(o), Some(s)) =
                (r32(buf, off, be), r32(buf, off + 4, be), r32(buf, off + 16, be))
            else {
                break;
            };
            (t, u64::from(o), u64::from(s))
        };
        if p_type == 2 {
            dyn_off = p_offset;
            dyn_sz = p_filesz;
        }
    }
    if dyn_off == 0 || dyn_sz == 0 {
        return out;
    }

    // Walk the dynamic table.
    let entsize: u64 = if is64 { 16 } else { 8 };
    let mut strtab_va = 0u64;
    let mut needed: Vec<u64> = Vec::new();
    let mut i = 0u64;
    while i + entsize <= dyn_sz {
        let off = (dyn_off + i) as usize;
        let (tag, val) = if is64 {
            let (Some(t), Some(v)) = (r64(buf, off, be), r64(buf, off + 8, be)) else {
                break;
            };
            (t, v)
        } else {
            let (Some(t), Some(v)) = (r32(buf, off, be), r32(buf, off + 4, be)) else {
                break;
            };
            (u64::from(t), u64::from(v))
        };
        if tag == 0 {
            break;
        }
        match tag {
            5 => strtab_va = val,
            1 => needed.push(val),
            _ => {}
        }
        i += entsize;
    }
    if strtab_va == 0 {
        return out;
    }
    let Some(strtab_off) = elf_vaddr_to_off(buf, be, is64, strtab_va, phoff, phentsize, phnum)
    else {
        return out;
    };
    for noff in needed {
        let s = strtab_off.saturating_add(noff as usize);
        if s >= buf.len() {
            continue;
        }
        let name = read_cstr(buf, s, ELF_NAME_CAP);
        if !name.is_empty() {
            out.push(Import {
                lib: name,
                funcs: Vec::new(),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// PE
// ---------------------------------------------------------------------------

struct Section {
    va: u32,
    raw_size: u32,
    raw_ptr: u32,
}

fn rva_to_off(b: &[u8], rva: u32, sections: &[Section]) -> Option<usize> {
    for s in sections {
        let start = s.va;
        let end = s.va.wrapping_add(if s.raw_size != 0 { s.raw_size } else { 1 });
        if rva >= start && rva < end {
            let off = s.raw_ptr as usize + (rva - start) as usize;
            if off < b.len() {
                return Some(off);
            }
        }
    }
    None
}

/// Walk the PE import directory: one 20-byte descriptor per DLL, each with a
/// thunk array of name RVAs. Ordinal imports carry no name and are skipped.
pub fn parse_pe(buf: &[u8]) -> Vec<Import> {
    let mut out = Vec::new();
    if !is_pe(buf) {
        return out;
    }
    let Some(e_lfanew) = r32(buf, 0x3C, false) else {
        return out;
    };
    let nt = e_lfanew as usize;
    let (Some(num_secs), Some(opt_size)) = (r16(buf, nt + 6, false), r16(buf, nt + 20, false))
    else {
        return out;
    };
    let opt = nt + 24;
    if opt + opt_size as usize > buf.len() {
        return out;
    }
    let Some(magic) = r16(buf, opt, false) else {
        return out;
    };
    let pe_plus = magic == 0x20B;
    // Offset of the data directories inside the optional header.
    let dd_off: usize = if pe_plus { 112 } else { 96 };
    if dd_off + 16 > opt_size as usize {
        return out;
    }
    let (Some(imp_rva), Some(imp_size)) =
        (r32(buf, opt + dd_off + 8, false), r32(buf, opt + dd_off + 12, false))
    else {
        return out;
    };

    let sect_hdr = opt + opt_size as usize;
    let mut sections = Vec::with_capacity(num_secs as usize);
    for i in 0..num_secs {
        let sh = sect_hdr + i as usize * 40;
        let (Some(va), Some(raw_size), Some(raw_ptr)) = (
            r32(buf, sh + 12, false),
            r32(buf, sh + 16, false),
            r32(buf, sh + 20, false),
        ) else {
            break;
        };
        sections.push(Section {
            va,
            raw_size,
            raw_ptr,
        });
    }

    if imp_rva == 0 || imp_size == 0 {
        return out;
    }
    let Some(imp_off) = rva_to_off(buf, imp_rva, &sections) else {
        return out;
    };

    let mut cur = imp_off;
    loop {
        let (Some(oft), Some(name_rva), Some(ft)) = (
            r32(buf, cur, false),
            r32(buf, cur + 12, false),
            r32(buf, cur + 16, false),
        ) else {
            break;
        };
        if oft == 0 && name_rva == 0 && ft == 0 {
            break;
        }

        let mut dll = String::new();
        if name_rva != 0 {
            if let Some(name_off) = rva_to_off(buf, name_rva, &sections) {
                dll = read_cstr(buf, name_off, PE_DLL_NAME_CAP);
            }
        }

        let mut funcs = Vec::new();
        let thunk_rva = if oft != 0 { oft } else { ft };
        if thunk_rva != 0 {
            if let Some(mut thunk_off) = rva_to_off(buf, thunk_rva, &sections) {
                loop {
                    let (entry, is_ordinal) = if pe_plus {
                        let Some(ent) = r64(buf, thunk_off, false) else {
                            break;
                        };
                        if ent == 0 {
                            break;
                        }
                        ((ent & 0x7FFF_FFFF) as u32, ent >> 63 != 0)
                    } else {
                        let Some(ent) = r32(buf, thunk_off, false) else {
                            break;
                        };
                        if ent == 0 {
                            break;
                        }
                        (ent & 0x7FFF_FFFF, ent >> 31 != 0)
                    };
                    if !is_ordinal {
                        if let Some(ibn_off) = rva_to_off(buf, entry, &sections) {
                            // IMAGE_IMPORT_BY_NAME: 2-byte hint, then the name.
                            if ibn_off + 2 < buf.len() {
                                let fn_name = read_cstr(buf, ibn_off + 2, PE_FUNC_NAME_CAP);
                                if !fn_name.is_empty() {
                                    funcs.push(fn_name);
                                }
                            }
                        }
                    }
                    thunk_off += if pe_plus { 8 } else { 4 };
                }
            }
        }

        if !dll.is_empty() {
            out.push(Import { lib: dll, funcs });
        }
        cur += 20;
    }
    out
}
