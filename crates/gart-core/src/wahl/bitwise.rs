//! Stream engine for bitwise operations over compressed WAHL blocks.
//!
//! Each operand is read as a stream of `(literal, run)` pairs, where a tile
//! yields `(tile, 1)` and a fill yields `(0 or 0x7FFFFFFF, remaining run)`.
//! Every step consumes `min(run_a, run_b)` groups from both streams and
//! emits one output run. The writer folds uniform output into fills as it
//! goes, so the result is never materialized in decompressed form.
//!
//! When one operand runs out, the rest of the other is copied for OR and
//! XOR (the exhausted side reads as zero), copied for AND-NOT only when the
//! left side remains, and dropped for AND.

use super::{
    fill_value, is_fill, literal, push_run, run_len, span, Wahl, MAX_RUN, TILE_MASK,
};

/// Binary operation applied by [`Wahl::bitwise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    /// `a & !b`: bits of the left operand not present in the right.
    AndNot,
}

impl BitOp {
    #[inline]
    fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            BitOp::And => a & b,
            BitOp::Or => a | b,
            BitOp::Xor => a ^ b,
            BitOp::AndNot => a & !b & TILE_MASK,
        }
    }
}

struct RunReader<'a> {
    blocks: &'a [u32],
    pos: usize,
    left: u64,
}

impl<'a> RunReader<'a> {
    fn new(blocks: &'a [u32]) -> Self {
        let left = blocks.first().map(|&w| span(w)).unwrap_or(0);
        Self {
            blocks,
            pos: 0,
            left,
        }
    }

    fn current(&self) -> Option<(u32, u64)> {
        let &w = self.blocks.get(self.pos)?;
        Some((literal(w), self.left))
    }

    fn advance(&mut self, n: u64) {
        self.left -= n;
        if self.left == 0 {
            self.pos += 1;
            self.left = self.blocks.get(self.pos).map(|&w| span(w)).unwrap_or(0);
        }
    }
}

#[derive(Default)]
struct RunWriter {
    blocks: Vec<u32>,
}

impl RunWriter {
    fn push(&mut self, lit: u32, n: u64) {
        if lit != 0 && lit != TILE_MASK {
            // Mixed literals only ever come from a tile, which spans one group.
            debug_assert_eq!(n, 1);
            self.blocks.extend(std::iter::repeat(lit).take(n as usize));
            return;
        }

        let value = lit == TILE_MASK;
        let mut n = n;
        if let Some(last) = self.blocks.last_mut() {
            if is_fill(*last) && fill_value(*last) == value {
                let room = (MAX_RUN - run_len(*last)) as u64;
                let take = room.min(n);
                *last += take as u32;
                n -= take;
            }
        }
        push_run(&mut self.blocks, value, n);
    }

    fn drain(&mut self, reader: &mut RunReader<'_>) {
        while let Some((lit, n)) = reader.current() {
            self.push(lit, n);
            reader.advance(n);
        }
    }
}

pub(super) fn combine(op: BitOp, a: &[u32], b: &[u32]) -> Wahl {
    let mut ra = RunReader::new(a);
    let mut rb = RunReader::new(b);
    let mut out = RunWriter::default();

    while let (Some((la, na)), Some((lb, nb))) = (ra.current(), rb.current()) {
        let n = na.min(nb);
        out.push(op.apply(la, lb), n);
        ra.advance(n);
        rb.advance(n);
    }

    match op {
        BitOp::And => {}
        BitOp::Or | BitOp::Xor => {
            out.drain(&mut ra);
            out.drain(&mut rb);
        }
        BitOp::AndNot => out.drain(&mut ra),
    }

    Wahl { blocks: out.blocks }
}
