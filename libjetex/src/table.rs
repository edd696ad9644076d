use uuid::Uuid;

use crate::error::{Result, TableError};
use crate::fragment::Fragment;

/// Dispatches a lookup key to the fragment whose `(pattern, n_bits)` range
/// covers it (spec.md §3.2, §4.2).
///
/// Slot `(key0 >> fragment_shift) - min_fragment` selects the fragment; a
/// fragment may occupy more than one slot when its `n_bits` is smaller than
/// the table's `fragment_shift` implies (it's shared and shadowed by
/// narrower fragments placed after it during [`Table::create`]).
pub struct Table {
    uuid: Uuid,
    fragment_shift: u8,
    min_fragment: u64,
    slots: Vec<Option<Fragment>>,
}

impl Table {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Assembles a table from a set of already-opened, validated fragments
    /// (spec.md §4.2 `table_create`).
    ///
    /// Returns the table plus a per-input refcount array mirroring the
    /// `refcounts[]` output parameter of the original invocation surface
    /// (spec.md §6.3): `refcounts[i]` is the number of slots fragment `i`
    /// ended up occupying. A fragment that ends up fully shadowed by
    /// narrower fragments has a refcount of zero and is dropped (and its
    /// mapping unmapped, via `Arc`/`Drop`) before this function returns.
    pub fn create(uuid: Uuid, fragments: Vec<Fragment>) -> Result<(Table, Vec<u64>)> {
        if fragments.is_empty() {
            return Err(TableError::NoFragments.into());
        }

        let mut min_pattern = u64::MAX;
        let mut max_pattern = 0u64;
        let mut n_bits_max = 0u8;
        let mut tops = Vec::with_capacity(fragments.len());

        for f in &fragments {
            let h = f.header();
            if h.n_bits >= 32 {
                return Err(TableError::NBitsTooLarge(h.n_bits).into());
            }

            let top = top_of(h.pattern, h.n_bits);
            tops.push(top);

            min_pattern = min_pattern.min(h.pattern);
            max_pattern = max_pattern.max(top);
            n_bits_max = n_bits_max.max(h.n_bits);
        }

        let fragment_shift = 64 - n_bits_max as u32;
        let (min_fragment, n_fragment) = if fragment_shift >= 64 {
            // Every fragment is global (`n_bits == 0`); there is exactly one.
            (0u64, 1u64)
        } else {
            let min_fragment = min_pattern >> fragment_shift;
            let span = (max_pattern - min_pattern) >> fragment_shift;
            let n_fragment = span
                .checked_add(1)
                .ok_or(TableError::SlotCountOverflow)?;
            (min_fragment, n_fragment)
        };

        let n_fragment_usize: usize = n_fragment
            .try_into()
            .map_err(|_| TableError::SlotCountOverflow)?;

        let mut slots: Vec<Option<Fragment>> = vec![None; n_fragment_usize];
        let mut slot_owner: Vec<Option<usize>> = vec![None; n_fragment_usize];
        let mut refcounts = vec![0u64; fragments.len()];

        for (i, f) in fragments.iter().enumerate() {
            let h = f.header();
            let (lo, hi) = if fragment_shift >= 64 {
                (0usize, 0usize)
            } else {
                let lo = ((h.pattern >> fragment_shift) - min_fragment) as usize;
                let hi = ((tops[i] >> fragment_shift) - min_fragment) as usize;
                (lo, hi)
            };

            for slot in lo..=hi {
                if let Some(prev) = slot_owner[slot] {
                    refcounts[prev] -= 1;
                }
                slots[slot] = Some(f.clone());
                slot_owner[slot] = Some(i);
                refcounts[i] += 1;
            }
        }

        // Fragments with a zero refcount are fully shadowed; dropping this
        // vector (and with it, any clone not retained by `slots`) unmaps
        // them via `Fragment`'s shared `Arc<Mmap>`.
        drop(fragments);

        let table = Table {
            uuid,
            fragment_shift: fragment_shift.min(64) as u8,
            min_fragment,
            slots,
        };

        Ok((table, refcounts))
    }

    /// Looks up a key, dispatching to the fragment that owns its slot
    /// (spec.md §4.2 `table_lookup`).
    pub fn lookup(&self, key: &[u64; 8]) -> Option<&[u8]> {
        let shift = self.fragment_shift as u32;
        let idx = if shift >= 64 { 0 } else { key[0] >> shift };

        if idx < self.min_fragment {
            return None;
        }

        let slot = (idx - self.min_fragment) as usize;
        let fragment = self.slots.get(slot)?.as_ref()?;
        fragment.lookup(key)
    }

    /// Explicit destructor matching the C invocation surface (spec.md §6.3).
    /// Idiomatically this is just a drop: every slot's `Fragment` unmaps its
    /// mapping automatically once the last `Arc` reference to it is gone.
    pub fn destroy(self) {
        drop(self);
    }
}

/// The inclusive top of a fragment's key range: every low `64 - n_bits` bits
/// set (spec.md §4.2), with the `n_bits == 0` convention that the top is
/// `u64::MAX`.
fn top_of(pattern: u64, n_bits: u8) -> u64 {
    if n_bits == 0 {
        u64::MAX
    } else {
        pattern | (((1u64) << (64 - n_bits as u32)) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn fragment_with_pattern(pattern: u64, n_bits: u8) -> tempfile::NamedTempFile {
        // A single-slot, key_size=1/item_size=1 fragment whose whole range is
        // [pattern, pattern] so table construction only cares about its
        // (pattern, n_bits) placement, not its lookup contents.
        let min = pattern;
        let max = pattern;
        let multiplier = 0u64;
        let table_size = crate::fragment::HEADER_SIZE as u64 + 8;

        let mut header = [0u8; crate::fragment::HEADER_SIZE];
        header[0..4].copy_from_slice(&crate::fragment::FRAGMENT_MAGIC.to_le_bytes());
        header[8..16].copy_from_slice(&pattern.to_le_bytes());
        header[16] = n_bits;
        header[17] = 1; // key_size
        header[18..20].copy_from_slice(&1u16.to_le_bytes()); // item_size
        header[24..32].copy_from_slice(&table_size.to_le_bytes());
        header[32..40].copy_from_slice(&min.to_le_bytes());
        header[40..48].copy_from_slice(&max.to_le_bytes());
        header[48..56].copy_from_slice(&multiplier.to_le_bytes());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.write_all(&pattern.to_le_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn scenario_two_fragments_by_top_byte() {
        // spec.md §8 end-to-end scenario 3.
        let fa = fragment_with_pattern(0x00u64 << 56, 8);
        let fb = fragment_with_pattern(0x01u64 << 56, 8);

        let frag_a = Fragment::open(&File::open(fa.path()).unwrap()).unwrap();
        let frag_b = Fragment::open(&File::open(fb.path()).unwrap()).unwrap();

        let (table, refcounts) =
            Table::create(Uuid::nil(), vec![frag_a, frag_b]).unwrap();
        assert_eq!(refcounts, vec![1, 1]);

        let key = |top_byte: u64| {
            let mut k = [0u64; 8];
            k[0] = top_byte << 56;
            k
        };

        assert!(table.lookup(&key(0x00)).is_some());
        assert!(table.lookup(&key(0x01)).is_some());
        assert!(table.lookup(&key(0x02)).is_none());
    }

    #[test]
    fn scenario_wide_fragment_shadowed_by_narrow() {
        // spec.md §8 end-to-end scenario 4.
        let wide = fragment_with_pattern(0, 0);
        let narrow = fragment_with_pattern(0x05u64 << 56, 8);

        let frag_wide = Fragment::open(&File::open(wide.path()).unwrap()).unwrap();
        let frag_narrow = Fragment::open(&File::open(narrow.path()).unwrap()).unwrap();

        let (_table, refcounts) =
            Table::create(Uuid::nil(), vec![frag_wide, frag_narrow]).unwrap();
        assert_eq!(refcounts[0], 255);
        assert_eq!(refcounts[1], 1);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Table::create(Uuid::nil(), vec![]).is_err());
    }

    #[test]
    fn rejects_n_bits_at_or_above_32() {
        let f = fragment_with_pattern(0, 32);
        let frag = Fragment::open(&File::open(f.path()).unwrap()).unwrap();
        assert!(Table::create(Uuid::nil(), vec![frag]).is_err());
    }
}
