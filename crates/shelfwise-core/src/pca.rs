//! Per-family principal component reduction of the feature matrix.
//!
//! Each sales family is reduced independently (SPU, subcategory, category
//! blocks carry different component budgets); attribute families pass
//! through unchanged. Components are sign-normalized so the decomposition is
//! deterministic.

use crate::config::PcaConfig;
use crate::features::{FeatureFamily, FeatureMatrix};
use nalgebra::{DMatrix, SymmetricEigen};
use std::ops::Range;
use tracing::debug;

/// Project one column block onto its top principal components.
///
/// The effective component count is min(requested, rows, cols); a zero-width
/// block stays zero-width.
pub fn reduce_block(block: &DMatrix<f64>, n_components: usize) -> DMatrix<f64> {
    let n = block.nrows();
    let d = block.ncols();
    let k = n_components.min(n).min(d);
    if k == 0 || d == 0 {
        return DMatrix::zeros(n, 0);
    }
    if k == d {
        // Nothing to reduce; keep the centered block so downstream distance
        // computations match the reduced families' scale conventions.
        return center_columns(block);
    }

    let centered = center_columns(block);
    let cov = if n > 1 {
        centered.transpose() * &centered / (n as f64 - 1.0)
    } else {
        DMatrix::zeros(d, d)
    };

    let eigen = SymmetricEigen::new(cov);
    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let mut projection = DMatrix::zeros(d, k);
    for (c, &src) in order.iter().take(k).enumerate() {
        let column = eigen.eigenvectors.column(src);
        // Deterministic sign: the largest-magnitude loading is positive.
        let mut dominant = 0.0_f64;
        for r in 0..d {
            if column[r].abs() > dominant.abs() {
                dominant = column[r];
            }
        }
        let sign = if dominant < 0.0 { -1.0 } else { 1.0 };
        for r in 0..d {
            projection[(r, c)] = column[r] * sign;
        }
    }

    centered * projection
}

fn center_columns(block: &DMatrix<f64>) -> DMatrix<f64> {
    let n = block.nrows();
    let mut out = block.clone();
    if n == 0 {
        return out;
    }
    for j in 0..block.ncols() {
        let mean: f64 = (0..n).map(|i| block[(i, j)]).sum::<f64>() / n as f64;
        for i in 0..n {
            out[(i, j)] -= mean;
        }
    }
    out
}

/// Reduce the three sales families of a feature matrix, leaving attribute
/// families untouched, and rebuild the column group index.
pub fn reduce_feature_matrix(matrix: &FeatureMatrix, cfg: &PcaConfig) -> FeatureMatrix {
    let component_budget = |family: FeatureFamily| -> Option<usize> {
        match family {
            FeatureFamily::SpuSales => Some(cfg.spu_components),
            FeatureFamily::SubcategorySales => Some(cfg.subcategory_components),
            FeatureFamily::CategorySales => Some(cfg.category_components),
            _ => None,
        }
    };

    let n = matrix.data.nrows();
    let mut blocks: Vec<(FeatureFamily, DMatrix<f64>)> = Vec::new();
    for (family, range) in &matrix.column_groups {
        let block = slice_columns(&matrix.data, range.clone());
        let reduced = match component_budget(*family) {
            Some(k) => {
                let before = block.ncols();
                let out = reduce_block(&block, k);
                debug!(
                    family = ?family,
                    from = before,
                    to = out.ncols(),
                    "reduced feature family"
                );
                out
            }
            None => block,
        };
        blocks.push((*family, reduced));
    }

    let total: usize = blocks.iter().map(|(_, b)| b.ncols()).sum();
    let mut data = DMatrix::zeros(n, total);
    let mut column_groups = Vec::with_capacity(blocks.len());
    let mut offset = 0;
    for (family, block) in blocks {
        for j in 0..block.ncols() {
            for i in 0..n {
                data[(i, offset + j)] = block[(i, j)];
            }
        }
        column_groups.push((family, offset..offset + block.ncols()));
        offset += block.ncols();
    }

    FeatureMatrix {
        store_ids: matrix.store_ids.clone(),
        data,
        column_groups,
    }
}

fn slice_columns(data: &DMatrix<f64>, range: Range<usize>) -> DMatrix<f64> {
    let n = data.nrows();
    let width = range.len();
    DMatrix::from_fn(n, width, |i, j| data[(i, range.start + j)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reduce_block_caps_components() {
        let block = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let reduced = reduce_block(&block, 10);
        // min(10, 3 rows, 2 cols) = 2 -> centered pass-through.
        assert_eq!(reduced.ncols(), 2);
        let col_mean: f64 = (0..3).map(|i| reduced[(i, 0)]).sum::<f64>() / 3.0;
        assert_relative_eq!(col_mean, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_first_component_captures_dominant_direction() {
        // Points along y = x with tiny orthogonal noise: PC1 scores must
        // preserve the spread, PC2 nearly nothing.
        let block = DMatrix::from_row_slice(
            4,
            3,
            &[
                0.0, 0.0, 0.01, //
                1.0, 1.0, -0.01, //
                2.0, 2.0, 0.01, //
                3.0, 3.0, -0.01,
            ],
        );
        let reduced = reduce_block(&block, 1);
        assert_eq!(reduced.ncols(), 1);
        let spread = (0..4).map(|i| reduced[(i, 0)]).fold(f64::NEG_INFINITY, f64::max)
            - (0..4).map(|i| reduced[(i, 0)]).fold(f64::INFINITY, f64::min);
        assert!(spread > 3.0, "PC1 spread {spread} too small");
    }

    #[test]
    fn test_reduction_is_deterministic() {
        let block = DMatrix::from_row_slice(
            4,
            3,
            &[1.0, 0.5, 0.2, 0.3, 2.0, 0.7, 0.9, 0.1, 1.5, 2.2, 0.4, 0.8],
        );
        let a = reduce_block(&block, 2);
        let b = reduce_block(&block, 2);
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_relative_eq!(a[(i, j)], b[(i, j)]);
            }
        }
    }

    #[test]
    fn test_reduce_feature_matrix_rebuilds_groups() {
        use crate::features::FeatureFamily::*;
        let data = DMatrix::from_fn(5, 8, |i, j| ((i * 7 + j * 3) % 11) as f64);
        let fm = FeatureMatrix {
            store_ids: (0..5).map(|i| format!("S{i}")).collect(),
            data,
            column_groups: vec![(SpuSales, 0..5), (SubcategorySales, 5..7), (Capacity, 7..8)],
        };
        let cfg = PcaConfig {
            spu_components: 2,
            subcategory_components: 1,
            category_components: 1,
        };
        let reduced = reduce_feature_matrix(&fm, &cfg);
        assert_eq!(reduced.column_groups.len(), 3);
        assert_eq!(reduced.family_range(SpuSales).unwrap(), 0..2);
        assert_eq!(reduced.family_range(SubcategorySales).unwrap(), 2..3);
        // Capacity passes through unreduced.
        assert_eq!(reduced.family_range(Capacity).unwrap(), 3..4);
        assert_eq!(reduced.data.ncols(), 4);
    }
}
