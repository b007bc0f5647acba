//! Cluster quality metrics.
//!
//! All metrics are computed here by the producing component; the clustering
//! engine's validator only compares them to thresholds. Silhouette follows
//! the standard per-sample definition with singleton clusters scored 0.

use crate::types::{SizeTier, StoreStyle};
use crate::weather::TempBand;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Quality summary for one clustering result.
#[derive(Debug, Clone)]
pub struct ClusterQuality {
    pub overall_silhouette: f64,
    pub per_cluster_silhouette: Vec<f64>,
    pub calinski_harabasz: f64,
    pub davies_bouldin: f64,
    /// Store-weighted merchandising coherence in [0, 1].
    pub coherence: f64,
    /// Fraction of clusters whose members share one temperature band.
    pub band_compliance: f64,
}

/// Rating bucket derived from a silhouette score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityRating {
    pub fn from_silhouette(s: f64) -> Self {
        if s >= 0.7 {
            QualityRating::Excellent
        } else if s >= 0.5 {
            QualityRating::Good
        } else if s >= 0.3 {
            QualityRating::Fair
        } else {
            QualityRating::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Excellent => "Excellent",
            QualityRating::Good => "Good",
            QualityRating::Fair => "Fair",
            QualityRating::Poor => "Poor",
        }
    }
}

fn row_distance(data: &DMatrix<f64>, a: usize, b: usize) -> f64 {
    let mut sum = 0.0;
    for j in 0..data.ncols() {
        let d = data[(a, j)] - data[(b, j)];
        sum += d * d;
    }
    sum.sqrt()
}

fn row_to_centroid(data: &DMatrix<f64>, row: usize, centroid: &DVector<f64>) -> f64 {
    let mut sum = 0.0;
    for j in 0..data.ncols() {
        let d = data[(row, j)] - centroid[j];
        sum += d * d;
    }
    sum.sqrt()
}

/// Mean position of a set of rows.
pub fn centroid_of(data: &DMatrix<f64>, rows: &[usize]) -> DVector<f64> {
    let mut c = DVector::zeros(data.ncols());
    if rows.is_empty() {
        return c;
    }
    for &r in rows {
        for j in 0..data.ncols() {
            c[j] += data[(r, j)];
        }
    }
    c / rows.len() as f64
}

/// Per-sample silhouette scores for a membership partition.
///
/// `membership[i]` is the cluster ordinal of row `i`. With a single cluster
/// every score is 0.
pub fn silhouette_samples(data: &DMatrix<f64>, membership: &[usize]) -> Vec<f64> {
    let n = membership.len();
    let n_clusters = membership.iter().copied().max().map_or(0, |m| m + 1);
    if n_clusters < 2 {
        return vec![0.0; n];
    }

    let mut by_cluster: Vec<Vec<usize>> = vec![Vec::new(); n_clusters];
    for (i, &c) in membership.iter().enumerate() {
        by_cluster[c].push(i);
    }

    let mut scores = vec![0.0; n];
    for i in 0..n {
        let own = membership[i];
        if by_cluster[own].len() < 2 {
            scores[i] = 0.0;
            continue;
        }
        let a: f64 = by_cluster[own]
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| row_distance(data, i, j))
            .sum::<f64>()
            / (by_cluster[own].len() - 1) as f64;

        let mut b = f64::INFINITY;
        for (c, members) in by_cluster.iter().enumerate() {
            if c == own || members.is_empty() {
                continue;
            }
            let mean: f64 = members
                .iter()
                .map(|&j| row_distance(data, i, j))
                .sum::<f64>()
                / members.len() as f64;
            b = b.min(mean);
        }

        let denom = a.max(b);
        scores[i] = if denom > f64::EPSILON {
            (b - a) / denom
        } else {
            0.0
        };
    }
    scores
}

/// Calinski-Harabasz index (higher is better). 0 for degenerate partitions.
pub fn calinski_harabasz(data: &DMatrix<f64>, clusters: &[Vec<usize>]) -> f64 {
    let n: usize = clusters.iter().map(|c| c.len()).sum();
    let k = clusters.iter().filter(|c| !c.is_empty()).count();
    if k < 2 || n <= k {
        return 0.0;
    }

    let all_rows: Vec<usize> = clusters.iter().flatten().copied().collect();
    let grand = centroid_of(data, &all_rows);

    let mut between = 0.0;
    let mut within = 0.0;
    for members in clusters {
        if members.is_empty() {
            continue;
        }
        let c = centroid_of(data, members);
        let mut sep = 0.0;
        for j in 0..data.ncols() {
            let d = c[j] - grand[j];
            sep += d * d;
        }
        between += members.len() as f64 * sep;
        for &r in members {
            let d = row_to_centroid(data, r, &c);
            within += d * d;
        }
    }

    if within < f64::EPSILON {
        return 0.0;
    }
    (between / (k - 1) as f64) / (within / (n - k) as f64)
}

/// Davies-Bouldin index (lower is better). 0 for degenerate partitions.
pub fn davies_bouldin(data: &DMatrix<f64>, clusters: &[Vec<usize>]) -> f64 {
    let live: Vec<&Vec<usize>> = clusters.iter().filter(|c| !c.is_empty()).collect();
    let k = live.len();
    if k < 2 {
        return 0.0;
    }

    let centroids: Vec<DVector<f64>> = live.iter().map(|m| centroid_of(data, m)).collect();
    let scatter: Vec<f64> = live
        .iter()
        .zip(&centroids)
        .map(|(members, c)| {
            members
                .iter()
                .map(|&r| row_to_centroid(data, r, c))
                .sum::<f64>()
                / members.len() as f64
        })
        .collect();

    let mut total = 0.0;
    for i in 0..k {
        let mut worst = 0.0_f64;
        for j in 0..k {
            if i == j {
                continue;
            }
            let mut sep = 0.0;
            for d in 0..data.ncols() {
                let diff = centroids[i][d] - centroids[j][d];
                sep += diff * diff;
            }
            let sep = sep.sqrt();
            if sep > f64::EPSILON {
                worst = worst.max((scatter[i] + scatter[j]) / sep);
            }
        }
        total += worst;
    }
    total / k as f64
}

/// Store-weighted merchandising coherence: for each cluster, the mean of the
/// fraction of members matching the modal style and the fraction matching the
/// modal size tier.
pub fn merchandising_coherence(
    clusters: &[Vec<usize>],
    attrs: &[(StoreStyle, SizeTier)],
) -> f64 {
    let total: usize = clusters.iter().map(|c| c.len()).sum();
    if total == 0 {
        return 0.0;
    }

    let mut weighted = 0.0;
    for members in clusters {
        if members.is_empty() {
            continue;
        }
        let mut style_counts: BTreeMap<StoreStyle, usize> = BTreeMap::new();
        let mut tier_counts: BTreeMap<SizeTier, usize> = BTreeMap::new();
        for &r in members {
            *style_counts.entry(attrs[r].0).or_insert(0) += 1;
            *tier_counts.entry(attrs[r].1).or_insert(0) += 1;
        }
        let style_modal = style_counts.values().copied().max().unwrap_or(0);
        let tier_modal = tier_counts.values().copied().max().unwrap_or(0);
        let n = members.len() as f64;
        let score = (style_modal as f64 / n + tier_modal as f64 / n) / 2.0;
        weighted += score * n;
    }
    weighted / total as f64
}

/// Fraction of clusters whose members all share one temperature band.
pub fn band_compliance(clusters: &[Vec<usize>], bands: &[TempBand]) -> f64 {
    if clusters.is_empty() {
        return 1.0;
    }
    let compliant = clusters
        .iter()
        .filter(|members| {
            members
                .windows(2)
                .all(|w| bands[w[0]] == bands[w[1]])
        })
        .count();
    compliant as f64 / clusters.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_blobs() -> (DMatrix<f64>, Vec<usize>) {
        // Two tight, well-separated groups of three points each.
        let data = DMatrix::from_row_slice(
            6,
            2,
            &[
                0.0, 0.0, 0.1, 0.0, 0.0, 0.1, //
                10.0, 10.0, 10.1, 10.0, 10.0, 10.1,
            ],
        );
        (data, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_silhouette_separated_blobs() {
        let (data, membership) = two_blobs();
        let scores = silhouette_samples(&data, &membership);
        let mean: f64 = scores.iter().sum::<f64>() / scores.len() as f64;
        assert!(mean > 0.95, "mean silhouette {mean} should be near 1");
    }

    #[test]
    fn test_silhouette_single_cluster_is_zero() {
        let (data, _) = two_blobs();
        let scores = silhouette_samples(&data, &[0; 6]);
        assert!(scores.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_calinski_harabasz_prefers_separation() {
        let (data, _) = two_blobs();
        let good = calinski_harabasz(&data, &[vec![0, 1, 2], vec![3, 4, 5]]);
        let bad = calinski_harabasz(&data, &[vec![0, 3, 4], vec![1, 2, 5]]);
        assert!(good > bad);
        assert!(good > 100.0);
    }

    #[test]
    fn test_davies_bouldin_prefers_separation() {
        let (data, _) = two_blobs();
        let good = davies_bouldin(&data, &[vec![0, 1, 2], vec![3, 4, 5]]);
        let bad = davies_bouldin(&data, &[vec![0, 3, 4], vec![1, 2, 5]]);
        assert!(good < bad);
        assert!(good < 0.1);
    }

    #[test]
    fn test_coherence_uniform_cluster() {
        let attrs = vec![
            (StoreStyle::Fashion, SizeTier::Large),
            (StoreStyle::Fashion, SizeTier::Large),
            (StoreStyle::Basic, SizeTier::Small),
            (StoreStyle::Fashion, SizeTier::Large),
        ];
        let perfect = merchandising_coherence(&[vec![0, 1], vec![2]], &attrs);
        assert_relative_eq!(perfect, 1.0);
        // Mixed cluster: modal style 2/3, modal tier 2/3 -> (2/3 + 2/3)/2.
        let mixed = merchandising_coherence(&[vec![0, 1, 2]], &attrs);
        assert_relative_eq!(mixed, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_band_compliance() {
        let bands = vec![
            TempBand { index: 1 },
            TempBand { index: 1 },
            TempBand { index: 2 },
        ];
        assert_relative_eq!(band_compliance(&[vec![0, 1], vec![2]], &bands), 1.0);
        assert_relative_eq!(band_compliance(&[vec![0, 2], vec![1]], &bands), 0.5);
    }

    #[test]
    fn test_quality_rating_buckets() {
        assert_eq!(QualityRating::from_silhouette(0.7), QualityRating::Excellent);
        assert_eq!(QualityRating::from_silhouette(0.5), QualityRating::Good);
        assert_eq!(QualityRating::from_silhouette(0.3), QualityRating::Fair);
        assert_eq!(QualityRating::from_silhouette(0.29), QualityRating::Poor);
    }
}
