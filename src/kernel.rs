//! Pairwise IoU and the CPU suppression-matrix kernel
//!
//! The CPU kernel is a serial mirror of the CUDA kernel: the same 64×64
//! tiling over the pairwise comparison grid, the same staged column tile,
//! and the same strictly-greater rule inside diagonal tiles. Both backends
//! therefore produce bit-identical matrices and the CPU path doubles as the
//! test oracle for the GPU path.

use crate::mask::{col_blocks, SuppressionMatrix, BLOCK_SIZE};

/// Intersection-over-union of two axis-aligned boxes.
///
/// Both arguments are (top, left, bottom, right) coordinate arrays.
/// The formula carries no epsilon guard: two zero-area boxes divide 0 by 0
/// and yield NaN, and NaN compares false against any threshold, so
/// degenerate pairs never suppress each other — a degenerate box is always
/// kept. This matches the CUDA kernel bit for bit.
#[must_use]
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let top = a[0].max(b[0]);
    let bottom = a[2].min(b[2]);
    let left = a[1].max(b[1]);
    let right = a[3].min(b[3]);
    let height = (bottom - top).max(0.0);
    let width = (right - left).max(0.0);
    let inter = height * width;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// View of box `i` within a flat N×4 array.
pub(crate) fn box_at(boxes: &[f32], i: usize) -> &[f32; 4] {
    boxes[i * 4..i * 4 + 4]
        .try_into()
        .expect("4-element box slice")
}

/// Build the suppression matrix for boxes already in priority order.
///
/// `sorted_boxes` is an N×4 flat slice. For every ordered pair `(i, j)` the
/// bit for `j` in row `i` is set iff `iou >= threshold` and, within a
/// diagonal tile, `j`'s local index is strictly greater than `i`'s —
/// off-diagonal tiles compare all pairs in both directions, which is
/// harmless because the reducer walks rows in ascending order and bits for
/// already-decided columns have no effect.
#[must_use]
pub fn build_matrix(sorted_boxes: &[f32], threshold: f32) -> SuppressionMatrix {
    let n = sorted_boxes.len() / 4;
    let tiles = col_blocks(n);
    let mut matrix = SuppressionMatrix::zeroed(n);

    for row_tile in 0..tiles {
        let row_size = (n - row_tile * BLOCK_SIZE).min(BLOCK_SIZE);
        for col_tile in 0..tiles {
            let col_size = (n - col_tile * BLOCK_SIZE).min(BLOCK_SIZE);
            // Staged column tile — the shared-memory copy of the CUDA kernel.
            let col_base = col_tile * BLOCK_SIZE * 4;
            let tile = &sorted_boxes[col_base..col_base + col_size * 4];

            for local_row in 0..row_size {
                let i = row_tile * BLOCK_SIZE + local_row;
                let cur = box_at(sorted_boxes, i);
                let start = if row_tile == col_tile {
                    local_row + 1
                } else {
                    0
                };
                let mut bits = 0u64;
                for j in start..col_size {
                    if iou(cur, box_at(tile, j)) >= threshold {
                        bits |= 1u64 << j;
                    }
                }
                matrix.row_mut(i)[col_tile] = bits;
            }
        }
    }
    matrix
}
