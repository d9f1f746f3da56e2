//! Support for reading raw values out of a target's memory.
//!
//! The object model never talks to a live process. Everything goes through
//! the `Memory` trait, which a core file, a flat dump, or a test fixture can
//! implement equally well.

use crate::ObjectError;
use gimli::Reader;
use object::{Object, ObjectSegment};
use rangemap::RangeMap;
use std::path::Path;

/// A source of target memory.
pub trait Memory {
    /// Fills `buf` with the bytes at `addr`. Partial reads are errors.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), ObjectError>;

    /// Byte order of the target.
    fn endian(&self) -> gimli::RunTimeEndian;

    /// Reads an integer `width` bytes wide (1, 2, 4 or 8) at `addr`, sign
    /// extending if `signed`.
    fn read_word(&self, addr: u64, width: u64, signed: bool) -> Result<u64, ObjectError> {
        let unavailable = || ObjectError::MemoryUnavailable { addr, len: width };
        let mut buf = [0; 8];
        let n = usize::try_from(width)
            .ok()
            .filter(|n| matches!(n, 1 | 2 | 4 | 8))
            .ok_or_else(unavailable)?;
        self.read_bytes(addr, &mut buf[..n])?;

        let mut r = gimli::EndianSlice::new(&buf[..n], self.endian());
        let v = match (n, signed) {
            (1, false) => r.read_u8().map(u64::from),
            (1, true) => r.read_i8().map(|x| x as i64 as u64),
            (2, false) => r.read_u16().map(u64::from),
            (2, true) => r.read_i16().map(|x| x as i64 as u64),
            (4, false) => r.read_u32().map(u64::from),
            (4, true) => r.read_i32().map(|x| x as i64 as u64),
            (_, false) => r.read_u64(),
            (_, true) => r.read_i64().map(|x| x as u64),
        };
        v.map_err(|_| unavailable())
    }

    /// Reads `len` bytes at `addr` into a fresh buffer.
    fn read_vec(&self, addr: u64, len: u64) -> Result<Vec<u8>, ObjectError> {
        let n = usize::try_from(len)
            .map_err(|_| ObjectError::MemoryUnavailable { addr, len })?;
        let mut buf = vec![0; n];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }
}

macro_rules! fixed_read {
    ($name:ident, $t:ty, $width:expr, $signed:expr) => {
        /// Shorthand for a fixed-width `read_word`.
        fn $name(&self, addr: u64) -> Result<$t, ObjectError> {
            Ok(self.read_word(addr, $width, $signed)? as $t)
        }
    };
}

/// `base + offset`, for offsets into an object whose base came from target
/// memory. A base near the top of the address space is corrupt, not a reason
/// to wrap around.
pub fn displace(base: u64, offset: u64) -> Result<u64, ObjectError> {
    base.checked_add(offset)
        .ok_or_else(|| ObjectError::CorruptObject {
            addr: base,
            reason: format!("offset {:#x} runs off the end of the address space", offset),
        })
}

/// Fixed-width conveniences over `Memory::read_word`.
pub trait MemoryExt: Memory {
    fixed_read!(read_u8, u8, 1, false);
    fixed_read!(read_u16, u16, 2, false);
    fixed_read!(read_u32, u32, 4, false);
    fixed_read!(read_u64, u64, 8, false);
    fixed_read!(read_i32, i32, 4, true);
    fixed_read!(read_i64, i64, 8, true);
}

impl<M: Memory + ?Sized> MemoryExt for M {}

impl<M: Memory + ?Sized> Memory for &M {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), ObjectError> {
        (**self).read_bytes(addr, buf)
    }

    fn endian(&self) -> gimli::RunTimeEndian {
        (**self).endian()
    }
}

/// Target memory held as a set of owned regions.
///
/// Regions added later win where they overlap earlier ones.
#[derive(Clone, Debug)]
pub struct FlatImage {
    endian: gimli::RunTimeEndian,
    /// Address range to index in `regions`.
    index: RangeMap<u64, usize>,
    /// Base address and contents of each region.
    regions: Vec<(u64, Vec<u8>)>,
}

impl FlatImage {
    pub fn new(endian: gimli::RunTimeEndian) -> Self {
        Self {
            endian,
            index: RangeMap::new(),
            regions: vec![],
        }
    }

    /// Adds `bytes` at `base`. Empty regions are ignored.
    pub fn add_region(&mut self, base: u64, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let end = base.saturating_add(bytes.len() as u64);
        self.index.insert(base..end, self.regions.len());
        self.regions.push((base, bytes));
    }

    /// Total number of mapped bytes, not counting overlap.
    pub fn mapped_len(&self) -> u64 {
        self.index.iter().map(|(r, _)| r.end - r.start).sum()
    }
}

impl Memory for FlatImage {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), ObjectError> {
        read_from_index(&self.index, addr, buf, |i, a, out| {
            let (base, data) = &self.regions[i];
            let off = (a - base) as usize;
            out.copy_from_slice(&data[off..off + out.len()]);
        })
    }

    fn endian(&self) -> gimli::RunTimeEndian {
        self.endian
    }
}

/// Copies bytes for `addr..addr+buf.len()` piecewise from whatever regions
/// `index` says back them.
fn read_from_index<V: Eq + Clone>(
    index: &RangeMap<u64, V>,
    addr: u64,
    buf: &mut [u8],
    mut copy: impl FnMut(V, u64, &mut [u8]),
) -> Result<(), ObjectError> {
    let len = buf.len() as u64;
    let unavailable = || ObjectError::MemoryUnavailable { addr, len };
    addr.checked_add(len).ok_or_else(unavailable)?;

    let mut done = 0usize;
    while done < buf.len() {
        let a = addr + done as u64;
        let (range, v) = index.get_key_value(&a).ok_or_else(unavailable)?;
        let n = usize::try_from(range.end - a)
            .unwrap_or(usize::MAX)
            .min(buf.len() - done);
        copy(v.clone(), a, &mut buf[done..done + n]);
        done += n;
    }
    Ok(())
}

/// An ELF core file, mapped read-only, with its `PT_LOAD` segments as target
/// memory.
///
/// Segments whose contents weren't dumped (file size zero) are left out, so
/// reads there fail rather than returning zeros.
#[derive(Debug)]
pub struct CoreImage {
    map: memmap2::Mmap,
    endian: gimli::RunTimeEndian,
    is_64: bool,
    /// Address range to (segment base address, file offset).
    index: RangeMap<u64, (u64, u64)>,
}

impl CoreImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::ImageError> {
        let file = std::fs::File::open(path.as_ref())?;
        // Safety: read-only mapping owned by the returned value.
        let map = unsafe { memmap2::Mmap::map(&file)? };

        let (endian, is_64, index) = {
            let object = object::File::parse(&*map)?;
            let endian = if object.is_little_endian() {
                gimli::RunTimeEndian::Little
            } else {
                gimli::RunTimeEndian::Big
            };
            let mut index = RangeMap::new();
            for segment in object.segments() {
                let (offset, size) = segment.file_range();
                if size == 0 {
                    continue;
                }
                let base = segment.address();
                index.insert(base..base.saturating_add(size), (base, offset));
            }
            (endian, object.is_64(), index)
        };

        tracing::info!(
            path = %path.as_ref().display(),
            segments = index.iter().count(),
            "core file mapped",
        );
        Ok(Self {
            map,
            endian,
            is_64,
            index,
        })
    }

    /// Pointer width of the dumped process, in bytes.
    pub fn word_size(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }
}

impl Memory for CoreImage {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), ObjectError> {
        let mut ok = true;
        read_from_index(&self.index, addr, buf, |(base, file_off), a, out| {
            let range = file_off
                .checked_add(a - base)
                .and_then(|s| usize::try_from(s).ok())
                .and_then(|s| Some(s..s.checked_add(out.len())?));
            match range.and_then(|r| self.map.get(r)) {
                Some(src) => out.copy_from_slice(src),
                None => ok = false,
            }
        })?;
        if ok {
            Ok(())
        } else {
            Err(ObjectError::MemoryUnavailable {
                addr,
                len: buf.len() as u64,
            })
        }
    }

    fn endian(&self) -> gimli::RunTimeEndian {
        self.endian
    }
}
