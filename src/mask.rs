//! Suppression bit-matrix and the sequential keep/discard reducer
//!
//! The matrix packs the N×N pairwise overlap decisions into N rows of
//! `ceil(N/64)` 64-bit words, flat row-major (`row * col_blocks + block`),
//! so that the kernel's concurrent writers each own one disjoint word and
//! the memory layout stays contiguous. The reducer that resolves the matrix
//! into the kept set is a pure sequential fold: each box's decision depends
//! on the cumulative suppression rows of every earlier kept box, so it is
//! never parallelized.

/// Width in bits of one suppression word; also the kernel tile size T.
pub const BLOCK_SIZE: usize = 64;

/// Number of 64-bit words needed to cover `n` columns.
#[must_use]
pub fn col_blocks(n: usize) -> usize {
    (n + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Packed pairwise-suppression matrix for boxes in priority order.
///
/// Bit `j mod 64` of word `(i, j / 64)` is set iff box `j` overlaps box `i`
/// at or above the threshold and `j` is "later" than `i` under the tiling
/// comparison order: within a diagonal 64-box block only strictly greater
/// local indices are compared, so no box ever marks itself.
#[derive(Debug, Clone)]
pub struct SuppressionMatrix {
    words: Vec<u64>,
    n: usize,
    col_blocks: usize,
}

impl SuppressionMatrix {
    /// Create an all-zero matrix for `n` boxes.
    #[must_use]
    pub fn zeroed(n: usize) -> Self {
        let col_blocks = col_blocks(n);
        Self {
            words: vec![0u64; n * col_blocks],
            n,
            col_blocks,
        }
    }

    /// Wrap a device-produced flat word buffer.
    ///
    /// `words.len()` must equal `n * col_blocks(n)`.
    pub(crate) fn from_words(words: Vec<u64>, n: usize) -> Self {
        let col_blocks = col_blocks(n);
        debug_assert_eq!(words.len(), n * col_blocks);
        Self {
            words,
            n,
            col_blocks,
        }
    }

    /// Number of boxes (rows).
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of 64-bit words per row.
    #[must_use]
    pub fn col_blocks(&self) -> usize {
        self.col_blocks
    }

    /// The suppression row for box `i`.
    #[must_use]
    pub fn row(&self, i: usize) -> &[u64] {
        &self.words[i * self.col_blocks..(i + 1) * self.col_blocks]
    }

    pub(crate) fn row_mut(&mut self, i: usize) -> &mut [u64] {
        &mut self.words[i * self.col_blocks..(i + 1) * self.col_blocks]
    }

    /// Whether the bit for ordered pair `(i, j)` is set.
    #[must_use]
    pub fn bit(&self, i: usize, j: usize) -> bool {
        let word = self.words[i * self.col_blocks + j / BLOCK_SIZE];
        (word >> (j % BLOCK_SIZE)) & 1 == 1
    }

    /// Resolve the matrix into the kept set of local (priority-order)
    /// indices.
    ///
    /// Walks boxes in priority order with a running accumulator of already
    /// suppressed columns: box `i` is kept iff its own bit is still clear,
    /// and keeping it ORs its suppression row into the accumulator. Strictly
    /// sequential — every step depends on all prior kept boxes.
    #[must_use]
    pub fn reduce(&self) -> Vec<u32> {
        let mut suppressed = vec![0u64; self.col_blocks];
        let mut keep = Vec::new();
        for i in 0..self.n {
            if (suppressed[i / BLOCK_SIZE] >> (i % BLOCK_SIZE)) & 1 == 1 {
                continue;
            }
            keep.push(i as u32);
            for (acc, &word) in suppressed.iter_mut().zip(self.row(i)) {
                *acc |= word;
            }
        }
        keep
    }
}
