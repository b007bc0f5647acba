//! Store x feature matrix assembly.
//!
//! Converts sales facts, weather profiles, and store attributes into one
//! numeric matrix with semantically weighted column groups. Sales mix
//! columns are row-normalized (each store row sums to 1, capturing mix
//! rather than volume); attribute columns are min-max normalized.

use crate::config::{FeatureConfig, FeatureWeights};
use crate::error::{PipelineError, Result};
use crate::report::DroppedStore;
use crate::types::{SalesFact, Spu, SpuStyle, Store};
use crate::weather::StoreWeatherProfile;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::{debug, warn};

/// Semantic family of a column group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFamily {
    SpuSales,
    SubcategorySales,
    CategorySales,
    StoreStyle,
    Capacity,
    Temperature,
    Geography,
}

/// A store x column sales-mix matrix, row-normalized.
#[derive(Debug, Clone)]
pub struct SalesMatrix {
    pub store_ids: Vec<String>,
    pub column_ids: Vec<String>,
    pub data: DMatrix<f64>,
}

/// The assembled store x feature matrix with its column group index.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub store_ids: Vec<String>,
    pub data: DMatrix<f64>,
    pub column_groups: Vec<(FeatureFamily, Range<usize>)>,
}

impl FeatureMatrix {
    /// Columns belonging to a family, if present.
    pub fn family_range(&self, family: FeatureFamily) -> Option<Range<usize>> {
        self.column_groups
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, r)| r.clone())
    }

    /// Multiply every column of a family by a factor. Used for the
    /// merchandising-coherence re-fit.
    pub fn scale_family(&mut self, family: FeatureFamily, factor: f64) {
        if let Some(range) = self.family_range(family) {
            for j in range {
                for i in 0..self.data.nrows() {
                    self.data[(i, j)] *= factor;
                }
            }
        }
    }
}

/// Keep the top-N SPUs by total sales and aggregate quantities per
/// (store, SPU); rows are normalized to sum to 1.
pub fn build_sales_matrix(
    facts: &[SalesFact],
    store_ids: &[String],
    top_n: usize,
) -> SalesMatrix {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for f in facts {
        *totals.entry(f.spu_id.as_str()).or_insert(0.0) += f.sales_amt;
    }
    let mut ranked: Vec<(&str, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    let kept: Vec<String> = ranked
        .into_iter()
        .take(top_n)
        .map(|(id, _)| id.to_string())
        .collect();

    build_mix_matrix(facts, store_ids, &kept, |f| Some(f.spu_id.as_str()))
}

/// Aggregate sales quantities per (store, subcategory); rows normalized.
pub fn build_subcategory_matrix(
    facts: &[SalesFact],
    store_ids: &[String],
    spus: &BTreeMap<String, &Spu>,
) -> SalesMatrix {
    let columns: BTreeSet<String> = spus.values().map(|s| s.subcategory.clone()).collect();
    let columns: Vec<String> = columns.into_iter().collect();
    build_mix_matrix(facts, store_ids, &columns, |f| {
        spus.get(&f.spu_id).map(|s| s.subcategory.as_str())
    })
}

/// Aggregate sales quantities per (store, category); rows normalized.
pub fn build_category_matrix(
    facts: &[SalesFact],
    store_ids: &[String],
    spus: &BTreeMap<String, &Spu>,
) -> SalesMatrix {
    let columns: BTreeSet<String> = spus.values().map(|s| s.category.clone()).collect();
    let columns: Vec<String> = columns.into_iter().collect();
    build_mix_matrix(facts, store_ids, &columns, |f| {
        spus.get(&f.spu_id).map(|s| s.category.as_str())
    })
}

fn build_mix_matrix<'a, F>(
    facts: &'a [SalesFact],
    store_ids: &[String],
    column_ids: &[String],
    column_of: F,
) -> SalesMatrix
where
    F: Fn(&'a SalesFact) -> Option<&'a str>,
{
    let store_index: BTreeMap<&str, usize> = store_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let column_index: BTreeMap<&str, usize> = column_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut data = DMatrix::zeros(store_ids.len(), column_ids.len());
    for f in facts {
        let (Some(&i), Some(&j)) = (
            store_index.get(f.store_id.as_str()),
            column_of(f).and_then(|c| column_index.get(c)),
        ) else {
            continue;
        };
        data[(i, j)] += f.sales_qty;
    }
    normalize_rows(&mut data);

    SalesMatrix {
        store_ids: store_ids.to_vec(),
        column_ids: column_ids.to_vec(),
        data,
    }
}

/// Scale each row to sum to 1; all-zero rows are left untouched.
fn normalize_rows(data: &mut DMatrix<f64>) {
    for i in 0..data.nrows() {
        let sum: f64 = (0..data.ncols()).map(|j| data[(i, j)]).sum();
        if sum > f64::EPSILON {
            for j in 0..data.ncols() {
                data[(i, j)] /= sum;
            }
        }
    }
}

/// Min-max normalize one column in place; constant columns become zero.
fn normalize_column(data: &mut DMatrix<f64>, j: usize) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for i in 0..data.nrows() {
        min = min.min(data[(i, j)]);
        max = max.max(data[(i, j)]);
    }
    let range = max - min;
    for i in 0..data.nrows() {
        data[(i, j)] = if range > f64::EPSILON {
            (data[(i, j)] - min) / range
        } else {
            0.0
        };
    }
}

/// Per-store fashion and basic sales shares.
pub fn store_style_ratios(
    facts: &[SalesFact],
    spus: &BTreeMap<String, &Spu>,
) -> BTreeMap<String, (f64, f64)> {
    let mut totals: BTreeMap<String, (f64, f64, f64)> = BTreeMap::new();
    for f in facts {
        let Some(spu) = spus.get(&f.spu_id) else {
            continue;
        };
        let entry = totals.entry(f.store_id.clone()).or_insert((0.0, 0.0, 0.0));
        entry.2 += f.sales_amt;
        match spu.style {
            SpuStyle::Fashion => entry.0 += f.sales_amt,
            SpuStyle::Basic => entry.1 += f.sales_amt,
        }
    }
    totals
        .into_iter()
        .map(|(store, (fashion, basic, total))| {
            if total > f64::EPSILON {
                (store, (fashion / total, basic / total))
            } else {
                (store, (0.0, 0.0))
            }
        })
        .collect()
}

/// Split stores into eligible and dropped per the C1 data requirements:
/// a usable weather profile, at least `min_skus` distinct SPUs with sales,
/// and nonzero total sales.
pub fn eligible_stores(
    stores: &[Store],
    profiles: &BTreeMap<String, StoreWeatherProfile>,
    facts: &[SalesFact],
    cfg: &FeatureConfig,
) -> Result<(Vec<Store>, Vec<DroppedStore>)> {
    let mut skus: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut sales: BTreeMap<&str, f64> = BTreeMap::new();
    for f in facts {
        if f.sales_qty > 0.0 || f.sales_amt > 0.0 {
            skus.entry(f.store_id.as_str())
                .or_default()
                .insert(f.spu_id.as_str());
            *sales.entry(f.store_id.as_str()).or_insert(0.0) += f.sales_amt;
        }
    }

    let mut eligible = Vec::new();
    let mut dropped = Vec::new();
    for store in stores {
        let id = store.store_id.as_str();
        let reason = if !profiles.contains_key(id) {
            Some("insufficient weather history".to_string())
        } else {
            let n_skus = skus.get(id).map_or(0, |s| s.len());
            if n_skus < cfg.min_skus {
                Some(format!("only {n_skus} SKUs with sales (need {})", cfg.min_skus))
            } else if sales.get(id).copied().unwrap_or(0.0) <= f64::EPSILON {
                Some("all-zero sales".to_string())
            } else {
                None
            }
        };
        match reason {
            None => eligible.push(store.clone()),
            Some(reason) => {
                warn!(store_id = id, %reason, "dropping store");
                dropped.push(DroppedStore {
                    store_id: store.store_id.clone(),
                    reason,
                });
            }
        }
    }

    let drop_ratio = dropped.len() as f64 / stores.len().max(1) as f64;
    if drop_ratio > cfg.max_drop_ratio {
        return Err(PipelineError::InsufficientData {
            entity: format!(
                "store population ({} of {} stores dropped)",
                dropped.len(),
                stores.len()
            ),
            needed: ((1.0 - cfg.max_drop_ratio) * stores.len() as f64).ceil() as usize,
            got: eligible.len(),
        });
    }
    Ok((eligible, dropped))
}

/// Concatenate the normalized sub-matrices into one weighted feature matrix.
///
/// Stores must already be eligible and ordered; every sales matrix must share
/// that order.
pub fn assemble_features(
    stores: &[Store],
    spu_sales: &SalesMatrix,
    subcat_sales: &SalesMatrix,
    cat_sales: &SalesMatrix,
    profiles: &BTreeMap<String, StoreWeatherProfile>,
    style_ratios: &BTreeMap<String, (f64, f64)>,
    weights: &FeatureWeights,
) -> Result<FeatureMatrix> {
    let n = stores.len();
    for m in [spu_sales, subcat_sales, cat_sales] {
        if m.data.nrows() != n {
            return Err(PipelineError::Internal(format!(
                "sales matrix has {} rows for {} stores",
                m.data.nrows(),
                n
            )));
        }
    }

    // Store-attribute block: ratios + style one-hot.
    let mut style_block = DMatrix::zeros(n, 5);
    // Capacity block: rack capacity + size-tier one-hot.
    let mut capacity_block = DMatrix::zeros(n, 4);
    // Temperature block: avg/min/max feels-like + hour counts.
    let mut temp_block = DMatrix::zeros(n, 7);
    // Geography block: latitude, longitude, elevation.
    let mut geo_block = DMatrix::zeros(n, 3);

    for (i, store) in stores.iter().enumerate() {
        let profile = profiles
            .get(&store.store_id)
            .ok_or_else(|| PipelineError::Internal(format!(
                "no weather profile for eligible store {}",
                store.store_id
            )))?;
        let (fashion, basic) = style_ratios
            .get(&store.store_id)
            .copied()
            .unwrap_or((0.0, 0.0));

        style_block[(i, 0)] = fashion;
        style_block[(i, 1)] = basic;
        style_block[(i, 2 + store.style as usize)] = 1.0;

        capacity_block[(i, 0)] = store.rack_capacity as f64;
        capacity_block[(i, 1 + store.size_tier as usize)] = 1.0;

        temp_block[(i, 0)] = profile.avg_feels_like;
        temp_block[(i, 1)] = profile.min_feels_like;
        temp_block[(i, 2)] = profile.max_feels_like;
        temp_block[(i, 3)] = profile.hours_cold as f64;
        temp_block[(i, 4)] = profile.hours_cool as f64;
        temp_block[(i, 5)] = profile.hours_moderate as f64;
        temp_block[(i, 6)] = profile.hours_hot as f64;

        geo_block[(i, 0)] = store.latitude;
        geo_block[(i, 1)] = store.longitude;
        geo_block[(i, 2)] = store.elevation;
    }

    // Min-max normalize the non-mix columns (one-hot columns are unaffected).
    for j in 0..capacity_block.ncols() {
        normalize_column(&mut capacity_block, j);
    }
    for j in 0..temp_block.ncols() {
        normalize_column(&mut temp_block, j);
    }
    for j in 0..geo_block.ncols() {
        normalize_column(&mut geo_block, j);
    }

    let blocks: Vec<(FeatureFamily, &DMatrix<f64>, f64)> = vec![
        (FeatureFamily::SpuSales, &spu_sales.data, weights.sales),
        (FeatureFamily::SubcategorySales, &subcat_sales.data, weights.sales),
        (FeatureFamily::CategorySales, &cat_sales.data, weights.sales),
        (FeatureFamily::StoreStyle, &style_block, weights.style),
        (FeatureFamily::Capacity, &capacity_block, weights.capacity),
        (FeatureFamily::Temperature, &temp_block, weights.temperature),
        (FeatureFamily::Geography, &geo_block, weights.geography),
    ];

    let total_cols: usize = blocks.iter().map(|(_, b, _)| b.ncols()).sum();
    let mut data = DMatrix::zeros(n, total_cols);
    let mut column_groups = Vec::with_capacity(blocks.len());
    let mut offset = 0;
    for (family, block, weight) in blocks {
        for j in 0..block.ncols() {
            for i in 0..n {
                data[(i, offset + j)] = block[(i, j)] * weight;
            }
        }
        column_groups.push((family, offset..offset + block.ncols()));
        offset += block.ncols();
    }

    debug!(
        stores = n,
        columns = total_cols,
        "assembled feature matrix"
    );

    Ok(FeatureMatrix {
        store_ids: stores.iter().map(|s| s.store_id.clone()).collect(),
        data,
        column_groups,
    })
}

/// Convenience path: eligibility, sub-matrices, ratios, and assembly in one
/// call. Returns the matrix plus the dropped-store report.
pub fn build_feature_matrix(
    stores: &[Store],
    facts: &[SalesFact],
    spus: &[Spu],
    profiles: &BTreeMap<String, StoreWeatherProfile>,
    cfg: &FeatureConfig,
) -> Result<(FeatureMatrix, Vec<Store>, Vec<DroppedStore>)> {
    let (mut eligible, dropped) = eligible_stores(stores, profiles, facts, cfg)?;
    eligible.sort_by(|a, b| a.store_id.cmp(&b.store_id));
    let store_ids: Vec<String> = eligible.iter().map(|s| s.store_id.clone()).collect();

    let spu_index: BTreeMap<String, &Spu> =
        spus.iter().map(|s| (s.spu_id.clone(), s)).collect();

    let spu_sales = build_sales_matrix(facts, &store_ids, cfg.top_n_spus);
    let subcat_sales = build_subcategory_matrix(facts, &store_ids, &spu_index);
    let cat_sales = build_category_matrix(facts, &store_ids, &spu_index);
    let ratios = store_style_ratios(facts, &spu_index);

    let matrix = assemble_features(
        &eligible,
        &spu_sales,
        &subcat_sales,
        &cat_sales,
        profiles,
        &ratios,
        &cfg.weights,
    )?;
    Ok((matrix, eligible, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SizeTier, StoreStyle, StyleTags};
    use approx::assert_relative_eq;

    fn store(id: &str) -> Store {
        Store {
            store_id: id.to_string(),
            latitude: 30.0,
            longitude: 114.0,
            elevation: 10.0,
            size_tier: SizeTier::Medium,
            style: StoreStyle::Balanced,
            rack_capacity: 300,
        }
    }

    fn spu(id: &str, category: &str, subcategory: &str, style: SpuStyle) -> Spu {
        Spu {
            spu_id: id.to_string(),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            tags: StyleTags::default(),
            style,
            price: 100.0,
        }
    }

    fn fact(store_id: &str, spu_id: &str, qty: f64, amt: f64) -> SalesFact {
        SalesFact {
            store_id: store_id.to_string(),
            spu_id: spu_id.to_string(),
            period: "202406A".parse().unwrap(),
            sales_amt: amt,
            sales_qty: qty,
            stock_qty: 10.0,
        }
    }

    #[test]
    fn test_sales_matrix_rows_sum_to_one() {
        let store_ids = vec!["S1".to_string(), "S2".to_string()];
        let facts = vec![
            fact("S1", "P1", 6.0, 600.0),
            fact("S1", "P2", 4.0, 400.0),
            fact("S2", "P1", 10.0, 1000.0),
        ];
        let m = build_sales_matrix(&facts, &store_ids, 10);
        for i in 0..2 {
            let sum: f64 = (0..m.data.ncols()).map(|j| m.data[(i, j)]).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
        // S1 row captures mix: 0.6 / 0.4.
        let p1 = m.column_ids.iter().position(|c| c == "P1").unwrap();
        assert_relative_eq!(m.data[(0, p1)], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_top_n_cutoff_by_total_sales() {
        let store_ids = vec!["S1".to_string()];
        let facts = vec![
            fact("S1", "P1", 1.0, 100.0),
            fact("S1", "P2", 1.0, 900.0),
            fact("S1", "P3", 1.0, 500.0),
        ];
        let m = build_sales_matrix(&facts, &store_ids, 2);
        assert_eq!(m.column_ids, vec!["P2".to_string(), "P3".to_string()]);
    }

    #[test]
    fn test_style_ratios() {
        let spus = vec![
            spu("P1", "C1", "SC1", SpuStyle::Fashion),
            spu("P2", "C1", "SC2", SpuStyle::Basic),
        ];
        let index: BTreeMap<String, &Spu> =
            spus.iter().map(|s| (s.spu_id.clone(), s)).collect();
        let facts = vec![fact("S1", "P1", 3.0, 300.0), fact("S1", "P2", 1.0, 100.0)];
        let ratios = store_style_ratios(&facts, &index);
        let (fashion, basic) = ratios["S1"];
        assert_relative_eq!(fashion, 0.75, epsilon = 1e-12);
        assert_relative_eq!(basic, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_eligibility_drops_sparse_stores() {
        let stores = vec![store("S1"), store("S2"), store("S3"), store("S4"), store("S5")];
        let mut profiles = BTreeMap::new();
        for s in &stores {
            if s.store_id != "S3" {
                profiles.insert(
                    s.store_id.clone(),
                    crate::weather::StoreWeatherProfile {
                        store_id: s.store_id.clone(),
                        avg_feels_like: 20.0,
                        min_feels_like: 10.0,
                        max_feels_like: 30.0,
                        hours_cold: 0,
                        hours_cool: 0,
                        hours_moderate: 10,
                        hours_hot: 0,
                        temperature_band: crate::weather::TempBand { index: 4 },
                        temperature_band_q3q4: None,
                        days_observed: 30,
                    },
                );
            }
        }
        let mut facts = Vec::new();
        for sid in ["S1", "S2", "S3", "S5"] {
            for p in 0..12 {
                facts.push(fact(sid, &format!("P{p}"), 1.0, 100.0));
            }
        }
        // S4 has too few SKUs.
        facts.push(fact("S4", "P0", 1.0, 100.0));

        let mut cfg = FeatureConfig::default();
        cfg.min_skus = 10;
        cfg.max_drop_ratio = 0.5;
        let (eligible, dropped) = eligible_stores(&stores, &profiles, &facts, &cfg).unwrap();
        assert_eq!(eligible.len(), 3);
        let dropped_ids: Vec<&str> =
            dropped.iter().map(|d| d.store_id.as_str()).collect();
        assert_eq!(dropped_ids, vec!["S3", "S4"]);
    }

    #[test]
    fn test_catastrophic_dropout_is_fatal() {
        let stores = vec![store("S1"), store("S2")];
        let profiles = BTreeMap::new(); // nobody has weather
        let cfg = FeatureConfig::default();
        let err = eligible_stores(&stores, &profiles, &[], &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { .. }));
    }

    #[test]
    fn test_feature_matrix_groups_and_weights() {
        let stores = vec![store("S1"), store("S2")];
        let spus = vec![
            spu("P1", "C1", "SC1", SpuStyle::Fashion),
            spu("P2", "C2", "SC2", SpuStyle::Basic),
        ];
        let mut profiles = BTreeMap::new();
        for s in &stores {
            profiles.insert(
                s.store_id.clone(),
                crate::weather::StoreWeatherProfile {
                    store_id: s.store_id.clone(),
                    avg_feels_like: 20.0,
                    min_feels_like: 10.0,
                    max_feels_like: 30.0,
                    hours_cold: 0,
                    hours_cool: 0,
                    hours_moderate: 10,
                    hours_hot: 0,
                    temperature_band: crate::weather::TempBand { index: 4 },
                    temperature_band_q3q4: None,
                    days_observed: 30,
                },
            );
        }
        let store_ids: Vec<String> = stores.iter().map(|s| s.store_id.clone()).collect();
        let index: BTreeMap<String, &Spu> =
            spus.iter().map(|s| (s.spu_id.clone(), s)).collect();
        let facts = vec![
            fact("S1", "P1", 3.0, 300.0),
            fact("S1", "P2", 1.0, 100.0),
            fact("S2", "P2", 2.0, 200.0),
        ];
        let spu_m = build_sales_matrix(&facts, &store_ids, 100);
        let sub_m = build_subcategory_matrix(&facts, &store_ids, &index);
        let cat_m = build_category_matrix(&facts, &store_ids, &index);
        let ratios = store_style_ratios(&facts, &index);

        let fm = assemble_features(
            &stores,
            &spu_m,
            &sub_m,
            &cat_m,
            &profiles,
            &ratios,
            &FeatureWeights::default(),
        )
        .unwrap();

        assert_eq!(fm.data.nrows(), 2);
        assert_eq!(fm.column_groups.len(), 7);
        // Sales mix cell carries the 0.4 family weight: S1's P1 share is 0.75.
        let spu_range = fm.family_range(FeatureFamily::SpuSales).unwrap();
        let p1 = spu_m.column_ids.iter().position(|c| c == "P1").unwrap();
        assert_relative_eq!(fm.data[(0, spu_range.start + p1)], 0.3, epsilon = 1e-12);
        // Style one-hot carries the 0.2 weight.
        let style_range = fm.family_range(FeatureFamily::StoreStyle).unwrap();
        let balanced_col = style_range.start + 2 + StoreStyle::Balanced as usize;
        assert_relative_eq!(fm.data[(0, balanced_col)], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_family() {
        let mut fm = FeatureMatrix {
            store_ids: vec!["S1".to_string()],
            data: DMatrix::from_row_slice(1, 2, &[1.0, 2.0]),
            column_groups: vec![
                (FeatureFamily::StoreStyle, 0..1),
                (FeatureFamily::Capacity, 1..2),
            ],
        };
        fm.scale_family(FeatureFamily::Capacity, 1.5);
        assert_relative_eq!(fm.data[(0, 0)], 1.0);
        assert_relative_eq!(fm.data[(0, 1)], 3.0);
    }
}
