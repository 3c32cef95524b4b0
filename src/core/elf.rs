//! In-place RPATH rewriting
//!
//! Install scripts link binaries with [`RPATH_PLACEHOLDER`] in their
//! RPATH/RUNPATH. After staging, every string of `.dynstr` mentioning the
//! placeholder (or the literal orchestra root) is rewritten to an
//! `$ORIGIN`-relative path and padded with NUL bytes so the string table
//! keeps its size.
//!
//! [`RPATH_PLACEHOLDER`]: crate::config::defaults::RPATH_PLACEHOLDER

use std::path::Path;

use crate::error::InstallError;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Whether `data` starts with the ELF magic
pub fn is_elf(data: &[u8]) -> bool {
    data.starts_with(ELF_MAGIC)
}

/// Byte range of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Section {
    offset: usize,
    size: usize,
}

impl Section {
    /// One past the last byte, `None` on overflow
    fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.size)
    }
}

/// Minimal reader over the fields we need, for both classes and byte orders
struct ElfReader<'a> {
    data: &'a [u8],
    is_64: bool,
    little_endian: bool,
}

impl<'a> ElfReader<'a> {
    fn new(data: &'a [u8]) -> Option<Self> {
        if !is_elf(data) || data.len() < 0x34 {
            return None;
        }
        let is_64 = match data[4] {
            1 => false,
            2 => true,
            _ => return None,
        };
        let little_endian = match data[5] {
            1 => true,
            2 => false,
            _ => return None,
        };
        Some(Self {
            data,
            is_64,
            little_endian,
        })
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.data.get(offset..offset.checked_add(N)?)?.try_into().ok()
    }

    fn u16(&self, offset: usize) -> Option<usize> {
        let b = self.bytes::<2>(offset)?;
        Some(usize::from(if self.little_endian {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        }))
    }

    fn u32(&self, offset: usize) -> Option<usize> {
        let b = self.bytes::<4>(offset)?;
        let v = if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        };
        usize::try_from(v).ok()
    }

    fn u64(&self, offset: usize) -> Option<usize> {
        let b = self.bytes::<8>(offset)?;
        let v = if self.little_endian {
            u64::from_le_bytes(b)
        } else {
            u64::from_be_bytes(b)
        };
        usize::try_from(v).ok()
    }

    /// Address-sized field
    fn word(&self, offset: usize) -> Option<usize> {
        if self.is_64 {
            self.u64(offset)
        } else {
            self.u32(offset)
        }
    }

    /// (name offset, section) of every section header
    fn sections(&self) -> Option<Vec<(usize, Section)>> {
        let (shoff, shentsize, shnum) = if self.is_64 {
            (self.u64(0x28)?, self.u16(0x3a)?, self.u16(0x3c)?)
        } else {
            (self.u32(0x20)?, self.u16(0x2e)?, self.u16(0x30)?)
        };
        let (offset_field, size_field) = if self.is_64 { (0x18, 0x20) } else { (0x10, 0x14) };

        let mut sections = Vec::with_capacity(shnum);
        for index in 0..shnum {
            let header = shoff.checked_add(index.checked_mul(shentsize)?)?;
            let name = self.u32(header)?;
            let section = Section {
                offset: self.word(header.checked_add(offset_field)?)?,
                size: self.word(header.checked_add(size_field)?)?,
            };
            sections.push((name, section));
        }
        Some(sections)
    }

    fn shstrndx(&self) -> Option<usize> {
        self.u16(if self.is_64 { 0x3e } else { 0x32 })
    }

    /// Location of `.dynstr`, `None` for files without one
    fn dynstr(&self) -> Result<Option<Section>, String> {
        let sections = self.sections().ok_or("truncated section headers")?;
        if sections.is_empty() {
            return Ok(None);
        }
        let shstrndx = self.shstrndx().ok_or("truncated header")?;
        let (_, names) = sections
            .get(shstrndx)
            .copied()
            .ok_or("section name table index out of range")?;
        for (name_offset, section) in &sections {
            let start = names
                .offset
                .checked_add(*name_offset)
                .ok_or("section name out of range")?;
            let name = self
                .data
                .get(start..)
                .and_then(|rest| rest.split(|b| *b == 0).next())
                .ok_or("section name out of range")?;
            if name == b".dynstr" {
                if section.end().map_or(true, |end| end > self.data.len()) {
                    return Err(".dynstr out of range".to_string());
                }
                return Ok(Some(*section));
            }
        }
        Ok(None)
    }
}

/// Rewrite the `.dynstr` strings of an ELF image in place.
///
/// Each string mentioning `placeholder` has the placeholder and `root`
/// replaced by `origin`. Strings mentioning only `root` are rewritten when
/// the replacement fits. Returns the number of rewritten strings.
pub fn rewrite_dynstr(
    data: &mut [u8],
    placeholder: &str,
    root: &str,
    origin: &str,
    path: &Path,
) -> Result<usize, InstallError> {
    let malformed = |reason: String| InstallError::MalformedElf {
        path: path.to_path_buf(),
        reason,
    };
    let reader = ElfReader::new(data).ok_or_else(|| malformed("unsupported ELF header".to_string()))?;
    let Some(dynstr) = reader.dynstr().map_err(malformed)? else {
        return Ok(0);
    };

    let table = dynstr
        .end()
        .and_then(|end| data.get_mut(dynstr.offset..end))
        .ok_or_else(|| malformed(".dynstr out of range".to_string()))?;
    let mut rewritten = 0;
    let mut start = 0;
    while start < table.len() {
        let end = table[start..]
            .iter()
            .position(|b| *b == 0)
            .map_or(table.len(), |p| start + p);
        let original = String::from_utf8_lossy(&table[start..end]).into_owned();

        let has_placeholder = original.contains(placeholder);
        let has_root = !root.is_empty() && original.contains(root);
        if has_placeholder || has_root {
            let replacement = original.replace(placeholder, origin).replace(root, origin);
            if replacement.len() > original.len() {
                if has_placeholder {
                    return Err(InstallError::RpathTooLong {
                        path: path.to_path_buf(),
                        original,
                        replacement,
                    });
                }
                tracing::warn!(
                    "Keeping '{original}' in {}: relative replacement does not fit",
                    path.display()
                );
            } else {
                let slot = &mut table[start..end];
                slot.fill(0);
                slot[..replacement.len()].copy_from_slice(replacement.as_bytes());
                rewritten += 1;
            }
        }
        start = end + 1;
    }
    Ok(rewritten)
}
