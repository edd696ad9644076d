use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{FragmentError, Result};

/// On-disk magic: `"JetX"` read little-endian.
pub const FRAGMENT_MAGIC: u32 = 0x5874_654A;

pub const HEADER_SIZE: usize = 128;

/// How many times a short/interrupted header read is retried before giving up.
///
/// Mirrors the original C server's `pread` retry loop, which is bounded and
/// arbitrary (see spec.md §9).
const HEADER_READ_RETRIES: usize = 10;

/// Parsed and validated contents of a fragment's 128-byte header.
///
/// # Binary Layout (Little-Endian, packed)
/// ```text
/// Offset  Size     Field
/// -------------------------------
/// 0       4 B      magic ("JetX")
/// 4       4 B      version
/// 8       8 B      pattern
/// 16      1 B      n_bits
/// 17      1 B      key_size (words)
/// 18      2 B      item_size (words)
/// 20      2 B      max_displacement
/// 22      2 B      padding0
/// 24      8 B      table_size (bytes, header included)
/// 32      8 B      min
/// 40      8 B      max
/// 48      8 B      multiplier
/// 56      8 B      padding1
/// 64      64 B     signature (unverified, see spec.md §9)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FragmentHeader {
    pub pattern: u64,
    pub n_bits: u8,
    pub key_size: u8,
    pub item_size: u16,
    pub max_displacement: u16,
    pub table_size: u64,
    pub min: u64,
    pub max: u64,
    pub multiplier: u64,
}

impl FragmentHeader {
    fn parse(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != FRAGMENT_MAGIC {
            return Err(FragmentError::InvalidMagic.into());
        }

        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != 0 {
            return Err(FragmentError::UnsupportedVersion(version).into());
        }

        let header = FragmentHeader {
            pattern: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            n_bits: buf[16],
            key_size: buf[17],
            item_size: u16::from_le_bytes(buf[18..20].try_into().unwrap()),
            max_displacement: u16::from_le_bytes(buf[20..22].try_into().unwrap()),
            table_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            min: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            max: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            multiplier: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
        };

        header.validate()?;
        Ok(header)
    }

    /// Checks every invariant in spec.md §3.1 that doesn't require knowing
    /// the backing file's actual size (that check happens in [`Fragment::open`]).
    fn validate(&self) -> Result<()> {
        if self.n_bits >= 64 {
            return Err(FragmentError::InvalidNBits(self.n_bits).into());
        }

        if self.n_bits == 0 {
            if self.pattern != 0 {
                return Err(FragmentError::PatternHasLowBits.into());
            }
        } else {
            let mask = u64::MAX << (64 - self.n_bits as u32);
            if self.pattern != (self.pattern & mask) {
                return Err(FragmentError::PatternHasLowBits.into());
            }
        }

        if !matches!(self.key_size, 1 | 2 | 4 | 8) {
            return Err(FragmentError::InvalidKeySize(self.key_size).into());
        }

        if (self.item_size as u64) < self.key_size as u64 {
            return Err(FragmentError::ItemSmallerThanKey.into());
        }

        if self.max < self.min {
            return Err(FragmentError::MaxBelowMin.into());
        }

        let range = self.max - self.min;
        let guess_max = scale(range, self.multiplier);

        let max_index = guess_max
            .checked_add(self.max_displacement as u64)
            .ok_or(FragmentError::DisplacementOverflow)?;

        let max_offset = (max_index as u128)
            .checked_mul(8)
            .and_then(|v| v.checked_mul(self.item_size as u128))
            .ok_or(FragmentError::OffsetOverflow)?;

        let total = max_offset
            .checked_add(HEADER_SIZE as u128)
            .ok_or(FragmentError::OffsetOverflow)?;

        if total > self.table_size as u128 {
            return Err(FragmentError::TableSizeExceedsHeaderBounds.into());
        }

        Ok(())
    }
}

/// The fixed-point map from a key delta to an approximate slot index
/// (spec.md §3.1, GLOSSARY "Scale"): `(delta * multiplier) >> 64`.
#[inline]
pub fn scale(delta: u64, multiplier: u64) -> u64 {
    (((delta as u128) * (multiplier as u128)) >> 64) as u64
}

/// A single memory-mapped, immutable fragment file (spec.md §3.1, §4.1).
///
/// Cheaply cloneable: the underlying mapping is reference counted so that a
/// fragment shared across multiple [`crate::table::Table`] slots is unmapped
/// exactly once, when the last reference is dropped (spec.md §5, "Refcount
/// closure").
#[derive(Clone)]
pub struct Fragment {
    mmap: Arc<Mmap>,
    header: FragmentHeader,
    range: u64,
}

impl Fragment {
    /// Opens, validates, and memory-maps a fragment file.
    ///
    /// Reads the header with a bounded retry on interrupted short reads
    /// (spec.md §9); any other short or failed read is fatal.
    pub fn open(file: &File) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut attempts = 0;

        loop {
            match file.read_at(&mut buf, 0) {
                Ok(n) if n == HEADER_SIZE => break,
                Ok(_) => return Err(FragmentError::HeaderTooShort.into()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    attempts += 1;
                    if attempts >= HEADER_READ_RETRIES {
                        return Err(FragmentError::HeaderTooShort.into());
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let header = FragmentHeader::parse(&buf)?;
        log::debug!("fragment signature not verified - not implemented");

        let file_size = file.metadata()?.len();
        if header.table_size > file_size {
            return Err(FragmentError::TableSizeExceedsFileSize.into());
        }

        let mmap = unsafe { Mmap::map(file)? };
        if (mmap.len() as u64) < header.table_size {
            return Err(FragmentError::TableSizeExceedsFileSize.into());
        }

        let range = header.max - header.min;
        Ok(Fragment { mmap: Arc::new(mmap), header, range })
    }

    pub fn header(&self) -> &FragmentHeader {
        &self.header
    }

    /// Identifies the underlying mapping, for the refcount/shared-base
    /// bookkeeping in [`crate::table::Table::create`] and
    /// [`crate::table::Table::destroy`].
    pub fn mapping_id(&self) -> usize {
        Arc::as_ptr(&self.mmap) as usize
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE..]
    }

    #[inline]
    fn word_at(&self, word_index: u64) -> u64 {
        let byte = word_index as usize * 8;
        let bytes = &self.payload()[byte..byte + 8];
        u64::from_le_bytes(bytes.try_into().unwrap())
    }

    #[inline]
    fn item_value(&self, item_start: u64, key_size: u64, item_size: u64) -> &[u8] {
        let value_start = (item_start + key_size) as usize * 8;
        let value_end = (item_start + item_size) as usize * 8;
        &self.payload()[value_start..value_end]
    }

    /// Looks up an 8-word key (spec.md §4.1 `fragment_lookup`).
    ///
    /// Unused high words of `key` must be zero for logical keys shorter than
    /// 64 bytes (spec.md §3.4).
    pub fn lookup(&self, key: &[u64; 8]) -> Option<&[u8]> {
        let h = &self.header;
        let key0 = key[0];
        let delta = key0.wrapping_sub(h.min);
        if delta > self.range {
            return None;
        }

        let guess = scale(delta, h.multiplier);
        let item_size = h.item_size as u64;
        let key_size = h.key_size as u64;
        let max_displacement = h.max_displacement as u64;

        if key0 == h.min.wrapping_add(self.range) && tail_is_sentinel(key, h.key_size) {
            let item_start = (guess + max_displacement) * item_size;
            return Some(self.item_value(item_start, key_size, item_size));
        }

        for i in 0..=max_displacement {
            let slot = guess + i;
            let item_start = slot * item_size;
            let c0 = self.word_at(item_start);

            let matched = match h.key_size {
                1 => c0 == key0,
                2 => {
                    let c1 = self.word_at(item_start + 1);
                    ((c0 ^ key0) | (c1 & key[1])) == 0
                }
                4 => {
                    let c1 = self.word_at(item_start + 1);
                    ((c0 ^ key0) | (c1 & key[1])) == 0
                        && self.word_at(item_start + 2) == key[2]
                        && self.word_at(item_start + 3) == key[3]
                }
                8 => {
                    let c1 = self.word_at(item_start + 1);
                    ((c0 ^ key0) | (c1 & key[1])) == 0
                        && (2..8).all(|w| self.word_at(item_start + w) == key[w as usize])
                }
                _ => unreachable!("key_size validated to be in {{1,2,4,8}}"),
            };

            if matched {
                return Some(self.item_value(item_start, key_size, item_size));
            }

            if c0 > key0 {
                return None;
            }
        }

        None
    }
}

/// The sentinel condition from spec.md §3.1: `key[0] == min + range` and every
/// remaining key word (up to `key_size`) is `u64::MAX`.
#[inline]
fn tail_is_sentinel(key: &[u64; 8], key_size: u8) -> bool {
    (1..key_size as usize).all(|i| key[i] == u64::MAX)
}
