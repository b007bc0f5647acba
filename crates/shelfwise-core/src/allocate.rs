//! Group-to-store allocation.
//!
//! Subcategory-level recommendations arrive aggregated per cluster; the
//! allocator decomposes each group's ΔQty into per-store integer quantities
//! by largest-remainder apportionment over composite weights, and reconciles
//! every group: allocated units plus unallocatable units always equal the
//! group delta.

use crate::apportion::largest_remainder;
use crate::config::AllocatorConfig;
use crate::report::{AllocatedStoreRow, ReconciliationRow};
use crate::rules::{Recommendation, RecommendationTarget, RuleContext, RuleId};
use crate::types::{Season, SpuStyle, StoreStyle, StyleTags};
use crate::weather::TempClass;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One cluster-level pool of units to distribute.
#[derive(Debug, Clone)]
pub struct AllocationGroup {
    pub group_id: String,
    pub cluster_id: usize,
    pub category: String,
    pub subcategory: String,
    pub tags: StyleTags,
    pub delta_qty: i64,
    pub rule_ids: Vec<RuleId>,
    pub confidence: f64,
}

/// Split consolidated rows into allocation groups (subcategory-level rows,
/// aggregated per cluster and dimension) and pass-through rows (concrete SPU
/// targets).
pub fn build_allocation_groups(
    rows: &[Recommendation],
) -> (Vec<AllocationGroup>, Vec<Recommendation>) {
    let mut groups: BTreeMap<(usize, String, String, String), AllocationGroup> =
        BTreeMap::new();
    let mut direct = Vec::new();

    for rec in rows {
        match &rec.target {
            RecommendationTarget::Spu(_) => direct.push(rec.clone()),
            RecommendationTarget::Subcategory(subcat) => {
                if rec.delta_qty <= 0 {
                    // Negative pools have nothing to distribute.
                    direct.push(rec.clone());
                    continue;
                }
                let key = (
                    rec.cluster_id,
                    rec.category.clone(),
                    subcat.clone(),
                    rec.tags.legacy_string(),
                );
                let entry = groups.entry(key).or_insert_with(|| AllocationGroup {
                    group_id: group_id(rec.cluster_id, subcat, &rec.tags),
                    cluster_id: rec.cluster_id,
                    category: rec.category.clone(),
                    subcategory: subcat.clone(),
                    tags: rec.tags,
                    delta_qty: 0,
                    rule_ids: Vec::new(),
                    confidence: 0.0,
                });
                entry.delta_qty += rec.delta_qty;
                entry.confidence = entry.confidence.max(rec.confidence);
                for rule in &rec.rule_ids {
                    if !entry.rule_ids.contains(rule) {
                        entry.rule_ids.push(*rule);
                    }
                }
                entry.rule_ids.sort();
            }
        }
    }

    (groups.into_values().collect(), direct)
}

fn group_id(cluster_id: usize, subcat: &str, tags: &StyleTags) -> String {
    let tag_part = match tags.season {
        Some(season) => season.legacy_str().to_string(),
        None => "-".to_string(),
    };
    format!("C{cluster_id}:{subcat}:{tag_part}")
}

/// Temperature-season fit factor.
fn temp_season_factor(class: TempClass, season: Option<Season>) -> f64 {
    let Some(season) = season else {
        return 1.0;
    };
    match (class, season) {
        (TempClass::Hot | TempClass::Moderate, Season::Summer | Season::AllSeason) => 1.0,
        (TempClass::Cool | TempClass::Moderate, Season::Autumn | Season::Spring) => 0.8,
        (TempClass::Cool | TempClass::Cold, Season::Winter) => 1.0,
        _ => 0.7,
    }
}

/// Store-type alignment factor.
fn style_alignment_factor(spu_style: Option<SpuStyle>, store_style: StoreStyle) -> f64 {
    match (spu_style, store_style) {
        (Some(style), store) if style.aligned_with(store) => 1.0,
        (_, StoreStyle::Balanced) => 0.9,
        _ => 0.7,
    }
}

/// Decompose every group into per-store allocations plus the reconciliation
/// report.
pub fn allocate_groups(
    groups: &[AllocationGroup],
    ctx: &RuleContext,
    cfg: &AllocatorConfig,
) -> (Vec<AllocatedStoreRow>, Vec<ReconciliationRow>) {
    let mut rows = Vec::new();
    let mut reconciliation = Vec::new();

    for group in groups {
        let Some(cluster) = ctx
            .clusters()
            .iter()
            .find(|c| c.cluster_id == group.cluster_id)
        else {
            warn!(group = %group.group_id, "allocation group references unknown cluster");
            continue;
        };
        let members = &cluster.store_ids;
        if members.is_empty() {
            continue;
        }

        // Sales shares within the group's subcategory.
        let sales: Vec<f64> = members
            .iter()
            .map(|s| {
                ctx.subcat_position(s, &group.subcategory)
                    .map_or(0.0, |p| p.sales_amt)
            })
            .collect();
        let sales_total: f64 = sales.iter().sum();
        let uniform = 1.0 / members.len() as f64;
        let group_style = ctx.subcat_style(&group.subcategory);

        let mut weights = Vec::with_capacity(members.len());
        let mut caps = Vec::with_capacity(members.len());
        let mut factors = Vec::with_capacity(members.len());
        for (i, store_id) in members.iter().enumerate() {
            let share = if sales_total > f64::EPSILON {
                sales[i] / sales_total
            } else {
                uniform
            };
            let util = ctx.capacity_utilization(store_id);
            let headroom = (1.0 - util).max(0.0);
            let temp = ctx
                .temp_class(store_id)
                .map_or(1.0, |c| temp_season_factor(c, group.tags.season));
            let style = ctx
                .store(store_id)
                .map_or(0.7, |s| style_alignment_factor(group_style, s.style));
            let suitability = temp * style;

            let weight = share.powf(cfg.alpha_sales)
                * headroom.powf(cfg.beta_cap)
                * suitability.powf(cfg.gamma_fit);
            let cap = if util >= cfg.capacity_max_util {
                0
            } else {
                cfg.max_per_store
                    .min((headroom * cfg.headroom_unit_scale).round() as i64)
            };
            weights.push(weight);
            caps.push(cap);
            factors.push((share, headroom, suitability, temp, style));
        }

        let apportionment = largest_remainder(group.delta_qty, &weights, &caps);
        let allocated = apportionment.allocated();
        let stores_at_cap = apportionment
            .shares
            .iter()
            .zip(&caps)
            .filter(|(share, cap)| *share == *cap)
            .count();

        let rule_codes = group
            .rule_ids
            .iter()
            .map(|r| r.code())
            .collect::<Vec<_>>()
            .join(",");
        for (i, store_id) in members.iter().enumerate() {
            let share = apportionment.shares[i];
            if share == 0 {
                continue;
            }
            let (sales_w, headroom, suitability, temp, style) = factors[i];
            rows.push(AllocatedStoreRow {
                group_id: group.group_id.clone(),
                store_id: store_id.clone(),
                cluster_id: group.cluster_id,
                category: group.category.clone(),
                subcategory: group.subcategory.clone(),
                season: group
                    .tags
                    .season
                    .map_or(String::new(), |s| s.legacy_str().to_string()),
                gender: group
                    .tags
                    .gender
                    .map_or(String::new(), |g| g.legacy_str().to_string()),
                location: group
                    .tags
                    .location
                    .map_or(String::new(), |l| l.legacy_str().to_string()),
                delta_qty_store: share,
                delta_qty_group: group.delta_qty,
                sales_weight: sales_w,
                capacity_weight: headroom,
                suitability_weight: suitability,
                composite_weight: weights[i],
                cap: caps[i],
                temp_season_factor: temp,
                style_alignment_factor: style,
                rationale: format!(
                    "rules {rule_codes}; confidence {:.2}; season fit {temp:.1}, style fit {style:.1}",
                    group.confidence
                ),
            });
        }

        if apportionment.leftover > 0 {
            warn!(
                group = %group.group_id,
                leftover = apportionment.leftover,
                "caps saturated, units left unallocated"
            );
        }
        debug!(group = %group.group_id, allocated, "allocated group");
        reconciliation.push(ReconciliationRow {
            group_id: group.group_id.clone(),
            cluster_id: group.cluster_id,
            expected_delta_qty: group.delta_qty,
            allocated_delta_qty: allocated,
            unallocatable_units: apportionment.leftover,
            stores_at_cap,
        });
    }

    rows.sort_by(|a, b| {
        a.group_id
            .cmp(&b.group_id)
            .then_with(|| a.store_id.cmp(&b.store_id))
    });
    reconciliation.sort_by(|a, b| a.group_id.cmp(&b.group_id));
    (rows, reconciliation)
}
