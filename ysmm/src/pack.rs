//! Host side layout transformations of the stationary operand

use crate::error::SmmError;

/// Rows of one packed tile
pub const TILE_ROWS: usize = 8;
/// Columns of one packed tile
pub const TILE_DEPTH: usize = 4;

/// Rounds `x` up to the nearest multiple of `multiple`
///
/// # Panics
/// Panics if `multiple` is zero.
#[must_use]
pub const fn round_up(x: usize, multiple: usize) -> usize {
    assert!(multiple > 0, "round_up to multiple of zero");
    x.div_ceil(multiple) * multiple
}

/// Matrix stored as row major grid of `trows × tcols` tiles,
/// each tile column major, padding is zero filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedMatrix {
    pub data: Vec<f32>,
    /// Rows after padding to multiple of tile rows
    pub rows: usize,
    /// Columns after padding to multiple of tile columns
    pub cols: usize,
}

/// Packs `rows × cols` matrix whose elements are given by `f(row, col)`.
///
/// Element `(i, j)` is stored at
/// `(i / trows)·trows·cols + (j / tcols)·trows·tcols + (j % tcols)·trows + i % trows`
/// where `cols` is the padded column count.
pub fn tile_matrix(
    rows: usize,
    cols: usize,
    trows: usize,
    tcols: usize,
    f: impl Fn(usize, usize) -> f32,
) -> Result<PackedMatrix, SmmError> {
    let padded_cols = round_up(cols, tcols);
    let padded_rows = round_up(rows, trows);
    let mut data = Vec::new();
    data.try_reserve_exact(padded_rows * padded_cols)?;
    data.resize(padded_rows * padded_cols, 0.0);
    for i in 0..rows {
        let (tr, trr) = (i / trows, i % trows);
        for j in 0..cols {
            let (tc, tcc) = (j / tcols, j % tcols);
            data[tr * trows * padded_cols + tc * trows * tcols + tcc * trows + trr] = f(i, j);
        }
    }
    Ok(PackedMatrix { data, rows: padded_rows, cols: padded_cols })
}

/// Packs `A` of shape `m × k` with stride `lda` into 8 × 4 tiles, scaled by `alpha`
pub fn pack_a(a: &[f32], m: usize, k: usize, lda: usize, alpha: f64) -> Result<PackedMatrix, SmmError> {
    tile_matrix(m, k, TILE_ROWS, TILE_DEPTH, |i, j| (alpha * f64::from(a[i * lda + j])) as f32)
}

/// Copies `A` of shape `m × k` into `m × lda` row major buffer scaled by `alpha`,
/// columns beyond `k` are zero.
pub fn scale_a(a: &[f32], m: usize, k: usize, lda: usize, alpha: f64) -> Result<Vec<f32>, SmmError> {
    let mut data = Vec::new();
    data.try_reserve_exact(m * lda)?;
    data.resize(m * lda, 0.0);
    for i in 0..m {
        for j in 0..k {
            data[i * lda + j] = (alpha * f64::from(a[i * lda + j])) as f32;
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::{pack_a, round_up, scale_a, tile_matrix};
    use crate::error::SmmError;

    #[test]
    fn rounding() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(33, 32), 64);
    }

    #[test]
    #[should_panic(expected = "multiple of zero")]
    fn rounding_zero() {
        let _ = round_up(3, 0);
    }

    #[test]
    fn tile_layout() {
        // 3 × 5 into 2 × 2 tiles gives 4 × 6
        let p = tile_matrix(3, 5, 2, 2, |i, j| (10 * i + j) as f32 + 1.0).unwrap();
        assert_eq!((p.rows, p.cols), (4, 6));
        assert_eq!(p.data.len(), 24);
        // First tile, column major
        assert_eq!(&p.data[..4], &[1.0, 11.0, 2.0, 12.0]);
        // Second tile of first row of tiles
        assert_eq!(&p.data[4..8], &[3.0, 13.0, 4.0, 14.0]);
        // Padding column of last tile in first row
        assert_eq!(&p.data[8..12], &[5.0, 15.0, 0.0, 0.0]);
        // Second row of tiles, padded row is zero
        assert_eq!(&p.data[12..16], &[21.0, 0.0, 22.0, 0.0]);
        assert_eq!(&p.data[20..24], &[25.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn packed_a_is_scaled() {
        let a: Vec<f32> = (0..3 * 5).map(|x| x as f32).collect();
        let p = pack_a(&a, 2, 3, 5, 2.0).unwrap();
        assert_eq!((p.rows, p.cols), (8, 4));
        // Element (1, 2) is a[7] at tile column 2, row 1
        assert_eq!(p.data[2 * 8 + 1], 14.0);
        assert_eq!(p.data.iter().filter(|&&x| x != 0.0).count(), 5);
    }

    #[test]
    fn scaled_a_keeps_stride() {
        let a = [1.0, 2.0, 9.0, 3.0, 4.0, 9.0];
        let s = scale_a(&a, 2, 2, 3, -1.0).unwrap();
        assert_eq!(s, vec![-1.0, -2.0, 0.0, -3.0, -4.0, 0.0]);
    }

    #[test]
    fn failed_reserve_is_host_oom() {
        let err = Vec::<f32>::new().try_reserve_exact(usize::MAX).unwrap_err();
        let err = SmmError::from(err);
        assert!(matches!(err, SmmError::OutOfHostMemory));
        // CL_OUT_OF_HOST_MEMORY
        assert_eq!(err.code(), -6);
    }
}
