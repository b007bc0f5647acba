//! Sell-through model: proxy rate, role derivation, and the validator gate.
//!
//! The input tables carry no inventory-day ledger, so the rate is proxied by
//! `sales_qty / (sales_qty + stock_qty)` over the analysis window. Role
//! multipliers are heuristic constants; the gate only compares predictions to
//! thresholds.

use crate::config::SellThroughConfig;
use crate::types::{ProductRole, SalesFact};
use std::collections::BTreeMap;
use std::fmt;

/// Sell-through proxy for a sales/stock aggregate. Zero when nothing was
/// available to sell.
pub fn sell_through(sales_qty: f64, stock_qty: f64) -> f64 {
    let available = sales_qty + stock_qty;
    if available > f64::EPSILON {
        (sales_qty / available).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Derive each SPU's lifecycle role from its observed sell-through across all
/// stores in the window.
pub fn derive_roles(
    facts: &[SalesFact],
    cfg: &SellThroughConfig,
) -> BTreeMap<String, ProductRole> {
    let mut totals: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for f in facts {
        let entry = totals.entry(f.spu_id.clone()).or_insert((0.0, 0.0));
        entry.0 += f.sales_qty;
        entry.1 += f.stock_qty;
    }
    totals
        .into_iter()
        .map(|(spu, (qty, stock))| {
            let st = sell_through(qty, stock);
            let role = if st >= cfg.core_threshold {
                ProductRole::Core
            } else if st >= cfg.seasonal_threshold {
                ProductRole::Seasonal
            } else if st >= cfg.filler_threshold {
                ProductRole::Filler
            } else {
                ProductRole::Clearance
            };
            (spu, role)
        })
        .collect()
}

/// Multiplier applied to predicted sell-through when adding a product of the
/// given role; removals apply the inverse.
pub fn role_multiplier(role: ProductRole) -> f64 {
    match role {
        ProductRole::Core => 1.15,
        ProductRole::Seasonal => 1.10,
        ProductRole::Filler => 1.05,
        ProductRole::Clearance => 0.95,
    }
}

/// Why the gate rejected a recommendation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    BelowMinimum { predicted: f64, min: f64 },
    InsufficientImprovement { improvement: f64, min: f64 },
    StockOutRisk { predicted: f64, max: f64 },
}

impl GateRejection {
    /// The configuration key of the failing constraint, for diagnostics.
    pub fn constraint(&self) -> &'static str {
        match self {
            GateRejection::BelowMinimum { .. } => "min_predicted_sell_through",
            GateRejection::InsufficientImprovement { .. } => "min_sell_through_improvement",
            GateRejection::StockOutRisk { .. } => "max_sell_through_risk",
        }
    }
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::BelowMinimum { predicted, min } => {
                write!(f, "predicted sell-through {predicted:.2} below minimum {min:.2}")
            }
            GateRejection::InsufficientImprovement { improvement, min } => {
                write!(f, "improvement {improvement:.2} below minimum {min:.2}")
            }
            GateRejection::StockOutRisk { predicted, max } => {
                write!(f, "predicted sell-through {predicted:.2} above risk limit {max:.2}")
            }
        }
    }
}

/// Pre-optimization gate over predicted sell-through.
#[derive(Debug, Clone)]
pub struct SellThroughValidator {
    cfg: SellThroughConfig,
}

impl SellThroughValidator {
    pub fn new(cfg: SellThroughConfig) -> Self {
        Self { cfg }
    }

    /// Predicted sell-through after applying a signed quantity change for a
    /// product of the given role.
    pub fn predict(&self, current: f64, role: ProductRole, delta_qty: i64) -> f64 {
        let m = role_multiplier(role);
        let predicted = match delta_qty.cmp(&0) {
            std::cmp::Ordering::Greater => current * m,
            std::cmp::Ordering::Less => current / m,
            std::cmp::Ordering::Equal => current,
        };
        predicted.clamp(0.0, 1.0)
    }

    /// Accept or reject a recommendation. Ok carries the predicted rate.
    pub fn check(
        &self,
        current: f64,
        role: ProductRole,
        delta_qty: i64,
    ) -> std::result::Result<f64, GateRejection> {
        let predicted = self.predict(current, role, delta_qty);
        if predicted < self.cfg.min_predicted_sell_through {
            return Err(GateRejection::BelowMinimum {
                predicted,
                min: self.cfg.min_predicted_sell_through,
            });
        }
        let improvement = predicted - current;
        if improvement < self.cfg.min_sell_through_improvement {
            return Err(GateRejection::InsufficientImprovement {
                improvement,
                min: self.cfg.min_sell_through_improvement,
            });
        }
        if predicted > self.cfg.max_sell_through_risk {
            return Err(GateRejection::StockOutRisk {
                predicted,
                max: self.cfg.max_sell_through_risk,
            });
        }
        Ok(predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fact(spu: &str, qty: f64, stock: f64) -> SalesFact {
        SalesFact {
            store_id: "S1".to_string(),
            spu_id: spu.to_string(),
            period: "202406A".parse().unwrap(),
            sales_amt: qty * 100.0,
            sales_qty: qty,
            stock_qty: stock,
        }
    }

    #[test]
    fn test_sell_through_proxy() {
        assert_relative_eq!(sell_through(8.0, 2.0), 0.8);
        assert_relative_eq!(sell_through(0.0, 10.0), 0.0);
        assert_relative_eq!(sell_through(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_role_boundaries() {
        let cfg = SellThroughConfig::default();
        let facts = vec![
            fact("CORE", 80.0, 20.0),      // 0.80
            fact("SEASONAL", 40.0, 60.0),  // 0.40
            fact("FILLER", 20.0, 80.0),    // 0.20
            fact("CLEAR", 19.0, 81.0),     // 0.19
        ];
        let roles = derive_roles(&facts, &cfg);
        assert_eq!(roles["CORE"], ProductRole::Core);
        assert_eq!(roles["SEASONAL"], ProductRole::Seasonal);
        assert_eq!(roles["FILLER"], ProductRole::Filler);
        assert_eq!(roles["CLEAR"], ProductRole::Clearance);
    }

    #[test]
    fn test_prediction_applies_multiplier_and_inverse() {
        let v = SellThroughValidator::new(SellThroughConfig::default());
        assert_relative_eq!(v.predict(0.5, ProductRole::Core, 3), 0.575);
        assert_relative_eq!(v.predict(0.575, ProductRole::Core, -3), 0.5);
        assert_relative_eq!(v.predict(0.5, ProductRole::Clearance, 3), 0.475);
        assert_relative_eq!(v.predict(0.6, ProductRole::Seasonal, 0), 0.6);
    }

    #[test]
    fn test_gate_accepts_healthy_addition() {
        let v = SellThroughValidator::new(SellThroughConfig::default());
        let predicted = v.check(0.55, ProductRole::Core, 2).unwrap();
        assert_relative_eq!(predicted, 0.6325, epsilon = 1e-12);
    }

    #[test]
    fn test_gate_rejects_each_constraint() {
        let v = SellThroughValidator::new(SellThroughConfig::default());
        // Too low after the change.
        let err = v.check(0.30, ProductRole::Filler, 2).unwrap_err();
        assert_eq!(err.constraint(), "min_predicted_sell_through");
        // Improvement under 5 points.
        let err = v.check(0.60, ProductRole::Filler, 2).unwrap_err();
        assert_eq!(err.constraint(), "min_sell_through_improvement");
        // Stock-out territory.
        let err = v.check(0.75, ProductRole::Core, 2).unwrap_err();
        assert_eq!(err.constraint(), "max_sell_through_risk");
    }
}
