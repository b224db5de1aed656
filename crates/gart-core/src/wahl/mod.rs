//! WAHL: a 31-bit word-aligned hybrid compressed bitmap.
//!
//! A [`Wahl`] is a sequence of 32-bit blocks. The most significant bit of
//! each block selects its kind:
//!
//! ```text
//!  tile   0 | b30 b29 ... b1 b0          31 literal bits
//!  fill   1 | v | r29 ... r0             r × 31 bits, all equal to v
//! ```
//!
//! Bit position `p` lives in group `p / 31` at intra-group offset `p % 31`.
//! A tile covers exactly one group; a fill covers `r ∈ [1, 2^30 − 1]`
//! groups. Longer runs are split across consecutive fills.
//!
//! Tagmaps persist WAHL verbatim (little-endian words, no framing), so the
//! block layout is a file format, not an implementation detail.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`set`](Wahl::set) / [`clear`](Wahl::clear) | Mutate bits, splitting fills as needed |
//! | [`compress`](Wahl::compress) | Fold uniform tiles into fills and merge fills |
//! | [`decompress`](Wahl::decompress) | Expand fills into literal tiles |
//! | [`bitwise`](Wahl::bitwise) | AND / OR / XOR / AND-NOT over compressed form |
//! | [`not`](Wahl::not) | Complement within the covered range |
//! | [`bits`](Wahl::bits) | Ascending iterator over set positions |
//! | [`encode`](Wahl::encode) / [`decode`](Wahl::decode) | Byte codec |
//!
//! # Example
//!
//! ```rust
//! use gart_core::wahl::Wahl;
//!
//! let a = Wahl::from_bits([1, 40, 1000]);
//! let b = Wahl::from_bits([40, 77]);
//! let both: Vec<u64> = (&a & &b).bits().collect();
//! assert_eq!(both, vec![40]);
//! ```

mod bitwise;

pub use bitwise::BitOp;

use thiserror::Error;

/// Bits carried by one group (one tile).
pub const GROUP_BITS: u64 = 31;

/// Longest run a single fill block can encode.
pub const MAX_RUN: u32 = RUN_MASK;

const FILL: u32 = 0x8000_0000;
const FILL_ONE: u32 = 0x4000_0000;
const RUN_MASK: u32 = 0x3FFF_FFFF;
const TILE_MASK: u32 = 0x7FFF_FFFF;

/// Errors from the WAHL byte codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WahlError {
    #[error("wahl decode: {0}")]
    Decode(String),
    #[error("wahl encode: buffer too small (need {need} bytes, have {have})")]
    BufferTooSmall { need: usize, have: usize },
}

#[inline]
fn is_fill(w: u32) -> bool {
    w & FILL != 0
}

#[inline]
fn fill_value(w: u32) -> bool {
    w & FILL_ONE != 0
}

#[inline]
fn run_len(w: u32) -> u32 {
    w & RUN_MASK
}

#[inline]
fn fill(value: bool, run: u32) -> u32 {
    debug_assert!(run >= 1 && run <= MAX_RUN);
    FILL | if value { FILL_ONE } else { 0 } | run
}

/// Number of groups a block covers.
#[inline]
fn span(w: u32) -> u64 {
    if is_fill(w) {
        run_len(w) as u64
    } else {
        1
    }
}

/// The 31-bit literal image of one group of a block.
#[inline]
fn literal(w: u32) -> u32 {
    if !is_fill(w) {
        w
    } else if fill_value(w) {
        TILE_MASK
    } else {
        0
    }
}

/// Append `groups` groups of `value`, splitting at [`MAX_RUN`].
fn push_run(blocks: &mut Vec<u32>, value: bool, mut groups: u64) {
    while groups > 0 {
        let run = groups.min(MAX_RUN as u64) as u32;
        blocks.push(fill(value, run));
        groups -= run as u64;
    }
}

/// Word-aligned hybrid compressed bitmap with 31-bit groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wahl {
    blocks: Vec<u32>,
}

impl Wahl {
    /// An empty bitmap. It covers nothing and reads as all zeros.
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Build a compressed bitmap with exactly `bits` set.
    pub fn from_bits<I: IntoIterator<Item = u64>>(bits: I) -> Self {
        let bits: Vec<u64> = bits.into_iter().collect();
        let mut w = Self::new();
        w.set(&bits);
        w.compress();
        w
    }

    /// A bitmap with bits `0..n_bits` set.
    pub fn ones(n_bits: u64) -> Self {
        let mut blocks = Vec::new();
        push_run(&mut blocks, true, n_bits / GROUP_BITS);
        let rem = n_bits % GROUP_BITS;
        if rem > 0 {
            blocks.push((1u32 << rem) - 1);
        }
        Self { blocks }
    }

    /// Adopt raw blocks, rejecting zero-length fills.
    pub fn from_blocks(blocks: Vec<u32>) -> Result<Self, WahlError> {
        if let Some(pos) = blocks.iter().position(|&w| is_fill(w) && run_len(w) == 0) {
            return Err(WahlError::Decode(format!(
                "zero-length fill at block {}",
                pos
            )));
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[u32] {
        &self.blocks
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of 31-bit groups covered by the blocks.
    pub fn coverage(&self) -> u64 {
        self.blocks.iter().map(|&w| span(w)).sum()
    }

    /// Greatest bit position the bitmap covers, whether or not it is set.
    /// An empty bitmap returns 0.
    pub fn max(&self) -> u64 {
        match self.coverage() {
            0 => 0,
            groups => groups * GROUP_BITS - 1,
        }
    }

    /// Set every position in `bits`. Returns whether anything changed.
    pub fn set(&mut self, bits: &[u64]) -> bool {
        self.update(bits, true)
    }

    /// Clear every position in `bits`. Returns whether anything changed.
    pub fn clear(&mut self, bits: &[u64]) -> bool {
        self.update(bits, false)
    }

    fn update(&mut self, bits: &[u64], value: bool) -> bool {
        let mut bits = bits.to_vec();
        bits.sort_unstable();
        bits.dedup();

        let covered = self.coverage();
        if value {
            let Some(&top) = bits.last() else {
                return false;
            };
            let need = top / GROUP_BITS + 1;
            if need > covered {
                push_run(&mut self.blocks, false, need - covered);
            }
        } else {
            // Positions past the covered range already read as zero.
            let limit = covered * GROUP_BITS;
            let keep = bits.partition_point(|&b| b < limit);
            bits.truncate(keep);
        }

        let mut changed = false;
        let mut i = 0usize;
        let mut g0 = 0u64;

        for bit in bits {
            let g = bit / GROUP_BITS;
            let mask = 1u32 << (bit % GROUP_BITS);
            while g >= g0 + span(self.blocks[i]) {
                g0 += span(self.blocks[i]);
                i += 1;
            }

            let w = self.blocks[i];
            if !is_fill(w) {
                let nw = if value { w | mask } else { w & !mask };
                if nw != w {
                    self.blocks[i] = nw;
                    changed = true;
                }
                continue;
            }
            if fill_value(w) == value {
                continue;
            }

            // Split the fill around group g: prefix fill, one tile, suffix fill.
            let run = run_len(w) as u64;
            let prefix = g - g0;
            let suffix = run - prefix - 1;
            let tile = if value { mask } else { TILE_MASK & !mask };
            let mut parts = Vec::with_capacity(3);
            if prefix > 0 {
                parts.push(fill(!value, prefix as u32));
            }
            parts.push(tile);
            if suffix > 0 {
                parts.push(fill(!value, suffix as u32));
            }
            self.blocks.splice(i..=i, parts);
            if prefix > 0 {
                i += 1;
                g0 += prefix;
            }
            changed = true;
        }
        changed
    }

    /// Whether `bit` is set.
    pub fn get(&self, bit: u64) -> bool {
        let g = bit / GROUP_BITS;
        let mut g0 = 0u64;
        for &w in &self.blocks {
            let s = span(w);
            if g < g0 + s {
                return literal(w) & (1 << (bit % GROUP_BITS)) != 0;
            }
            g0 += s;
        }
        false
    }

    /// Compress in place.
    ///
    /// Pass 1 turns all-zero and all-one tiles into unit fills; pass 2 merges
    /// adjacent fills of equal value. A trailing zero fill is dropped.
    pub fn compress(&mut self) {
        for w in self.blocks.iter_mut() {
            if !is_fill(*w) {
                if *w == 0 {
                    *w = fill(false, 1);
                } else if *w == TILE_MASK {
                    *w = fill(true, 1);
                }
            }
        }

        let mut out = 0usize;
        for r in 0..self.blocks.len() {
            let w = self.blocks[r];
            if out > 0 {
                let prev = self.blocks[out - 1];
                if is_fill(w) && is_fill(prev) && fill_value(w) == fill_value(prev) {
                    let v = fill_value(w);
                    let total = run_len(prev) as u64 + run_len(w) as u64;
                    if total <= MAX_RUN as u64 {
                        self.blocks[out - 1] = fill(v, total as u32);
                    } else {
                        self.blocks[out - 1] = fill(v, MAX_RUN);
                        self.blocks[out] = fill(v, (total - MAX_RUN as u64) as u32);
                        out += 1;
                    }
                    continue;
                }
            }
            self.blocks[out] = w;
            out += 1;
        }
        self.blocks.truncate(out);

        while let Some(&last) = self.blocks.last() {
            if is_fill(last) && !fill_value(last) {
                self.blocks.pop();
            } else {
                break;
            }
        }
    }

    /// Expand every fill into literal tiles.
    pub fn decompress(&mut self) {
        if !self.blocks.iter().any(|&w| is_fill(w)) {
            return;
        }
        let mut out = Vec::with_capacity(self.coverage() as usize);
        for &w in &self.blocks {
            let lit = literal(w);
            for _ in 0..span(w) {
                out.push(lit);
            }
        }
        self.blocks = out;
    }

    /// Complement of the bitmap over its covered range.
    #[allow(clippy::should_implement_trait)]
    pub fn not(&self) -> Wahl {
        let blocks = self
            .blocks
            .iter()
            .map(|&w| if is_fill(w) { w ^ FILL_ONE } else { w ^ TILE_MASK })
            .collect();
        Wahl { blocks }
    }

    /// Combine with `other` without decompressing either operand.
    pub fn bitwise(&self, op: BitOp, other: &Wahl) -> Wahl {
        bitwise::combine(op, &self.blocks, &other.blocks)
    }

    /// Ascending iterator over set bit positions.
    pub fn bits(&self) -> Bits<'_> {
        Bits {
            blocks: self.blocks.iter(),
            next_group: 0,
            cursor: Cursor::Idle,
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u64 {
        self.blocks
            .iter()
            .map(|&w| {
                if !is_fill(w) {
                    w.count_ones() as u64
                } else if fill_value(w) {
                    run_len(w) as u64 * GROUP_BITS
                } else {
                    0
                }
            })
            .sum()
    }

    /// Size of the encoded form in bytes.
    pub fn encoded_len(&self) -> usize {
        self.blocks.len() * 4
    }

    /// Write the blocks as little-endian words into `buf`. Returns the
    /// number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WahlError> {
        let need = self.encoded_len();
        if buf.len() < need {
            return Err(WahlError::BufferTooSmall {
                need,
                have: buf.len(),
            });
        }
        for (chunk, w) in buf.chunks_exact_mut(4).zip(&self.blocks) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        Ok(need)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for w in &self.blocks {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Decode little-endian words. The length must be a multiple of 4.
    pub fn decode(buf: &[u8]) -> Result<Self, WahlError> {
        if buf.len() % 4 != 0 {
            return Err(WahlError::Decode(format!(
                "length {} is not a multiple of 4",
                buf.len()
            )));
        }
        let blocks = buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_blocks(blocks)
    }
}

impl std::ops::BitAnd for &Wahl {
    type Output = Wahl;

    fn bitand(self, rhs: &Wahl) -> Wahl {
        self.bitwise(BitOp::And, rhs)
    }
}

impl std::ops::BitOr for &Wahl {
    type Output = Wahl;

    fn bitor(self, rhs: &Wahl) -> Wahl {
        self.bitwise(BitOp::Or, rhs)
    }
}

impl std::ops::BitXor for &Wahl {
    type Output = Wahl;

    fn bitxor(self, rhs: &Wahl) -> Wahl {
        self.bitwise(BitOp::Xor, rhs)
    }
}

impl std::ops::Not for &Wahl {
    type Output = Wahl;

    fn not(self) -> Wahl {
        Wahl::not(self)
    }
}

enum Cursor {
    Idle,
    Tile { base: u64, mask: u32 },
    Ones { next: u64, end: u64 },
}

/// Iterator over set positions of a [`Wahl`], in ascending order.
///
/// Fills of ones are walked lazily, so iterating a long run never
/// materializes it.
pub struct Bits<'a> {
    blocks: std::slice::Iter<'a, u32>,
    next_group: u64,
    cursor: Cursor,
}

impl Iterator for Bits<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            match &mut self.cursor {
                Cursor::Tile { base, mask } if *mask != 0 => {
                    let tz = mask.trailing_zeros() as u64;
                    *mask &= *mask - 1;
                    return Some(*base + tz);
                }
                Cursor::Ones { next, end } if *next < *end => {
                    let bit = *next;
                    *next += 1;
                    return Some(bit);
                }
                _ => {}
            }

            let &w = self.blocks.next()?;
            let base = self.next_group * GROUP_BITS;
            let s = span(w);
            self.next_group += s;
            self.cursor = if !is_fill(w) {
                Cursor::Tile { base, mask: w }
            } else if fill_value(w) {
                Cursor::Ones {
                    next: base,
                    end: base + s * GROUP_BITS,
                }
            } else {
                Cursor::Idle
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn sorted(bits: &[u64]) -> Vec<u64> {
        bits.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    #[test]
    fn test_empty_bitmap() {
        let w = Wahl::new();
        assert!(w.is_empty());
        assert_eq!(w.max(), 0);
        assert_eq!(w.bits().count(), 0);
        assert!(!w.get(0));
    }

    #[test]
    fn test_set_unsorted_with_duplicates() {
        let mut w = Wahl::new();
        assert!(w.set(&[500, 3, 62, 3, 0]));
        assert_eq!(w.bits().collect::<Vec<_>>(), vec![0, 3, 62, 500]);
        assert!(!w.set(&[3, 500]));
    }

    #[test]
    fn test_set_splits_zero_fill() {
        let mut w = Wahl::new();
        w.set(&[31 * 10 + 4]);
        // 10 groups of padding then one tile.
        assert_eq!(w.blocks(), &[fill(false, 10), 1 << 4]);

        w.set(&[31 * 4 + 1]);
        assert_eq!(
            w.blocks(),
            &[fill(false, 4), 1 << 1, fill(false, 5), 1 << 4]
        );
        assert_eq!(w.bits().collect::<Vec<_>>(), vec![125, 314]);
    }

    #[test]
    fn test_clear_splits_one_fill() {
        let mut w = Wahl::ones(31 * 3);
        assert_eq!(w.blocks(), &[fill(true, 3)]);
        assert!(w.clear(&[31 + 30]));
        assert_eq!(
            w.blocks(),
            &[fill(true, 1), TILE_MASK & !(1 << 30), fill(true, 1)]
        );
        assert_eq!(w.count_ones(), 92);
        assert!(!w.get(61));
        assert!(w.get(60));
    }

    #[test]
    fn test_clear_past_coverage_is_noop() {
        let mut w = Wahl::from_bits([1, 2]);
        let before = w.clone();
        assert!(!w.clear(&[10_000]));
        assert_eq!(w, before);
    }

    #[test]
    fn test_clear_first_group_of_fill() {
        let mut w = Wahl::ones(31 * 2);
        assert!(w.clear(&[0]));
        assert_eq!(w.blocks(), &[TILE_MASK & !1, fill(true, 1)]);
    }

    #[test]
    fn test_compress_folds_uniform_tiles() {
        let mut w = Wahl::from_blocks(vec![0, 0, TILE_MASK, TILE_MASK, 5, 0, 0]).unwrap();
        w.compress();
        assert_eq!(w.blocks(), &[fill(false, 2), fill(true, 2), 5]);
    }

    #[test]
    fn test_compress_trims_trailing_zero_fill() {
        let mut w = Wahl::from_blocks(vec![7, fill(false, 9)]).unwrap();
        w.compress();
        assert_eq!(w.blocks(), &[7]);

        let mut all_zero = Wahl::from_blocks(vec![0, fill(false, 3), 0]).unwrap();
        all_zero.compress();
        assert!(all_zero.is_empty());
    }

    #[test]
    fn test_compress_splits_overlong_runs() {
        let mut w = Wahl::from_blocks(vec![fill(true, MAX_RUN), fill(true, 10)]).unwrap();
        w.compress();
        assert_eq!(w.blocks(), &[fill(true, MAX_RUN), fill(true, 10)]);
    }

    #[test]
    fn test_ones_splits_across_fills() {
        let groups = MAX_RUN as u64 + 5;
        let w = Wahl::ones(groups * GROUP_BITS);
        assert_eq!(w.blocks(), &[fill(true, MAX_RUN), fill(true, 5)]);
        assert_eq!(w.count_ones(), groups * GROUP_BITS);
    }

    #[test]
    fn test_decompress_expands_fills() {
        let mut w = Wahl::from_blocks(vec![fill(true, 2), 9, fill(false, 1)]).unwrap();
        let bits: Vec<u64> = w.bits().collect();
        w.decompress();
        assert_eq!(w.blocks(), &[TILE_MASK, TILE_MASK, 9, 0]);
        assert_eq!(w.bits().collect::<Vec<_>>(), bits);
    }

    #[test]
    fn test_not_flips_covered_range() {
        let w = Wahl::from_blocks(vec![fill(false, 1), 0b101]).unwrap();
        let n = w.not();
        assert_eq!(n.blocks(), &[fill(true, 1), TILE_MASK ^ 0b101]);
        assert_eq!(n.count_ones(), 31 + 29);
        assert_eq!((!&n).blocks(), w.blocks());
    }

    #[test]
    fn test_max_is_coverage_based() {
        assert_eq!(Wahl::from_bits([0]).max(), 30);
        assert_eq!(Wahl::from_bits([31]).max(), 61);
        assert_eq!(Wahl::ones(31 * 4).max(), 123);
    }

    #[test]
    fn test_decode_rejects_ragged_length() {
        assert!(matches!(Wahl::decode(&[1, 2, 3]), Err(WahlError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_zero_fill() {
        let bytes = FILL.to_le_bytes();
        assert!(matches!(Wahl::decode(&bytes), Err(WahlError::Decode(_))));
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let w = Wahl::from_bits([1, 100]);
        let mut buf = vec![0u8; w.encoded_len() - 1];
        assert_eq!(
            w.encode(&mut buf),
            Err(WahlError::BufferTooSmall {
                need: w.encoded_len(),
                have: w.encoded_len() - 1
            })
        );
    }

    #[test]
    fn test_encode_is_little_endian() {
        let w = Wahl::from_blocks(vec![0x0102_0304]).unwrap();
        assert_eq!(w.to_bytes(), vec![4, 3, 2, 1]);
        let mut buf = [0u8; 8];
        assert_eq!(w.encode(&mut buf), Ok(4));
        assert_eq!(&buf[..4], &[4, 3, 2, 1]);
    }

    fn bit_sets() -> impl Strategy<Value = Vec<u64>> {
        prop_oneof![
            prop::collection::vec(0u64..400, 0..60),
            prop::collection::vec(0u64..50_000, 0..200),
            // Dense runs so fills of ones show up.
            (0u64..5_000, 0u64..2_000).prop_map(|(start, len)| (start..start + len).collect::<Vec<u64>>()),
        ]
    }

    proptest! {
        #[test]
        fn prop_codec_preserves_bits(bits in bit_sets()) {
            let w = Wahl::from_bits(bits.iter().copied());
            let decoded = Wahl::decode(&w.to_bytes()).unwrap();
            prop_assert_eq!(decoded.bits().collect::<Vec<_>>(), sorted(&bits));
        }

        #[test]
        fn prop_compress_idempotent(bits in bit_sets()) {
            let mut raw = Wahl::new();
            raw.set(&bits);
            let mut once = raw.clone();
            once.compress();
            let mut twice = once.clone();
            twice.compress();
            prop_assert_eq!(&once, &twice);

            let mut expanded = once.clone();
            expanded.decompress();
            prop_assert_eq!(expanded.bits().collect::<Vec<_>>(), raw.bits().collect::<Vec<_>>());
        }

        #[test]
        fn prop_not_is_involution(bits in bit_sets()) {
            let w = Wahl::from_bits(bits.iter().copied());
            prop_assert_eq!(w.not().not().bits().collect::<Vec<_>>(), sorted(&bits));
        }

        #[test]
        fn prop_set_then_clear(bits in bit_sets(), drop in bit_sets()) {
            let mut w = Wahl::from_bits(bits.iter().copied());
            w.clear(&drop);
            let drop: BTreeSet<u64> = drop.into_iter().collect();
            let expected: Vec<u64> = sorted(&bits).into_iter().filter(|b| !drop.contains(b)).collect();
            prop_assert_eq!(w.bits().collect::<Vec<_>>(), expected);
        }
    }
}
