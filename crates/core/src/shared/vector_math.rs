//! Vector helpers for face embeddings.
//!
//! Sums are accumulated in `f64` so results stay stable for 512-d vectors.
//! Any comparison involving a zero-norm vector yields
//! [`DEGENERATE_SIMILARITY`] (`-1.0`) instead of an error, so degenerate
//! embeddings can never clear a join threshold.

use ndarray::{Array1, Array2, ArrayView1};

use crate::shared::constants::DEGENERATE_SIMILARITY;

pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

pub fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// Cosine similarity in `[-1, 1]`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let denom = norm(a) * norm(b);
    if !is_usable_norm(denom) {
        return DEGENERATE_SIMILARITY;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0)
}

/// Scales `v` to unit length in place. Returns `false` (leaving `v`
/// untouched) when the vector has zero or non-finite norm.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let n = norm(v);
    if !is_usable_norm(n) {
        return false;
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / n) as f32;
    }
    true
}

/// L2-normalised mean of the given vectors, or `None` if there are none or
/// they cancel out.
pub fn centroid<'a, I>(vectors: I, dimension: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum = Array1::<f64>::zeros(dimension);
    let mut count = 0usize;
    for v in vectors {
        if v.len() != dimension {
            continue;
        }
        sum += &ArrayView1::from(v).mapv(|x| x as f64);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mut mean: Vec<f32> = sum.iter().map(|x| (x / count as f64) as f32).collect();
    l2_normalize(&mut mean).then_some(mean)
}

fn is_usable_norm(n: f64) -> bool {
    n.is_finite() && n > 0.0
}

/// Row-major batch of unit-length embeddings.
///
/// Rows are normalised once at construction so the hot similarity loop is a
/// plain dot product over contiguous memory with no allocation.
pub struct EmbeddingMatrix {
    rows: Array2<f32>,
    degenerate: Vec<bool>,
}

impl EmbeddingMatrix {
    /// Builds the matrix from rows that are all exactly `dimension` long.
    /// Rows of any other length are stored as degenerate.
    pub fn from_rows<'a, I>(rows: I, dimension: usize) -> Self
    where
        I: IntoIterator<Item = &'a [f32]>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = rows.into_iter();
        let mut matrix = Array2::<f32>::zeros((iter.len(), dimension));
        let mut degenerate = Vec::with_capacity(iter.len());

        for (i, row) in iter.enumerate() {
            if row.len() != dimension {
                degenerate.push(true);
                continue;
            }
            let n = norm(row);
            if !is_usable_norm(n) {
                degenerate.push(true);
                continue;
            }
            let mut target = matrix.row_mut(i);
            for (dst, src) in target.iter_mut().zip(row.iter()) {
                *dst = (*src as f64 / n) as f32;
            }
            degenerate.push(false);
        }

        Self {
            rows: matrix,
            degenerate,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn dimension(&self) -> usize {
        self.rows.ncols()
    }

    pub fn is_degenerate(&self, i: usize) -> bool {
        self.degenerate[i]
    }

    pub fn degenerate_count(&self) -> usize {
        self.degenerate.iter().filter(|d| **d).count()
    }

    /// Cosine similarity between rows `i` and `j`.
    pub fn similarity(&self, i: usize, j: usize) -> f64 {
        if self.degenerate[i] || self.degenerate[j] {
            return DEGENERATE_SIMILARITY;
        }
        let a = self.rows.row(i);
        let b = self.rows.row(j);
        (a.dot(&b) as f64).clamp(-1.0, 1.0)
    }
}
