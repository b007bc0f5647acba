//! Largest-remainder apportionment of integer units.
//!
//! The single apportionment primitive behind the allocator: split `total`
//! units across items proportionally to `weights`, clipped to per-item
//! `caps`, with leftover units reported rather than silently dropped.

/// Result of one apportionment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apportionment {
    /// Integer share per item, `0 <= shares[i] <= caps[i]`.
    pub shares: Vec<i64>,
    /// Units that no item could absorb; nonzero only when every cap is
    /// saturated.
    pub leftover: i64,
}

impl Apportionment {
    pub fn allocated(&self) -> i64 {
        self.shares.iter().sum()
    }
}

/// Largest-remainder method with caps.
///
/// Each item starts at `min(cap, floor(total * w / sum_w))`; residual units
/// go one at a time to uncapped items ranked by fractional remainder
/// (ties broken by index). Non-finite or negative weights count as zero; if
/// every weight is zero the split is uniform.
pub fn largest_remainder(total: i64, weights: &[f64], caps: &[i64]) -> Apportionment {
    assert_eq!(
        weights.len(),
        caps.len(),
        "weights and caps must be the same length"
    );
    let n = weights.len();
    if n == 0 || total <= 0 {
        return Apportionment {
            shares: vec![0; n],
            leftover: total.max(0),
        };
    }

    let mut sanitized: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let sum: f64 = sanitized.iter().sum();
    if sum <= f64::EPSILON {
        sanitized = vec![1.0; n];
    }
    let sum: f64 = sanitized.iter().sum();

    let caps: Vec<i64> = caps.iter().map(|c| (*c).max(0)).collect();
    let mut shares = vec![0i64; n];
    let mut remainders = vec![0.0f64; n];
    for i in 0..n {
        let ideal = total as f64 * sanitized[i] / sum;
        let floor = ideal.floor() as i64;
        shares[i] = floor.min(caps[i]);
        remainders[i] = ideal - floor as f64;
    }

    let mut residual = total - shares.iter().sum::<i64>();

    // First pass honors the remainder ranking; subsequent passes sweep
    // whatever headroom is left.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        remainders[b]
            .partial_cmp(&remainders[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    while residual > 0 {
        let mut placed = false;
        for &i in &order {
            if residual == 0 {
                break;
            }
            if shares[i] < caps[i] {
                shares[i] += 1;
                residual -= 1;
                placed = true;
            }
        }
        if !placed {
            break;
        }
    }

    Apportionment {
        shares,
        leftover: residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_apportionment() {
        // Weights {0.5, 0.3, 0.2} over 10 units split exactly.
        let a = largest_remainder(10, &[0.5, 0.3, 0.2], &[10, 10, 10]);
        assert_eq!(a.shares, vec![5, 3, 2]);
        assert_eq!(a.leftover, 0);
    }

    #[test]
    fn test_cap_clipping_redistributes() {
        // The capped item's surplus flows to the other store.
        let a = largest_remainder(10, &[0.8, 0.2], &[4, 10]);
        assert_eq!(a.shares, vec![4, 6]);
        assert_eq!(a.leftover, 0);
    }

    #[test]
    fn test_saturated_caps_report_leftover() {
        let a = largest_remainder(10, &[0.5, 0.5], &[3, 3]);
        assert_eq!(a.shares, vec![3, 3]);
        assert_eq!(a.leftover, 4);
    }

    #[test]
    fn test_remainder_ranking_breaks_near_ties() {
        // Ideals 3.4 / 3.3 / 3.3: the largest remainder gets the spare unit.
        let a = largest_remainder(10, &[0.34, 0.33, 0.33], &[10, 10, 10]);
        assert_eq!(a.shares, vec![4, 3, 3]);
        assert_eq!(a.leftover, 0);
    }

    #[test]
    fn test_zero_and_invalid_weights_fall_back_to_uniform() {
        let a = largest_remainder(6, &[0.0, 0.0, 0.0], &[10, 10, 10]);
        assert_eq!(a.shares, vec![2, 2, 2]);

        let b = largest_remainder(4, &[f64::NAN, -1.0], &[10, 10]);
        assert_eq!(b.shares, vec![2, 2]);
    }

    #[test]
    fn test_zero_total_and_empty_inputs() {
        let a = largest_remainder(0, &[0.5, 0.5], &[3, 3]);
        assert_eq!(a.shares, vec![0, 0]);
        assert_eq!(a.leftover, 0);

        let b = largest_remainder(5, &[], &[]);
        assert_eq!(b.shares, Vec::<i64>::new());
        assert_eq!(b.leftover, 5);
    }

    #[test]
    fn test_shares_respect_bounds_property() {
        let weights = [0.9, 0.05, 0.05, 0.0];
        let caps = [2, 1, 5, 3];
        for total in 0..=15 {
            let a = largest_remainder(total, &weights, &caps);
            assert_eq!(a.allocated() + a.leftover, total.max(0));
            for (share, cap) in a.shares.iter().zip(caps.iter()) {
                assert!(*share >= 0 && share <= cap);
            }
        }
    }
}
