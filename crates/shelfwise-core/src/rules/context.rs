//! Shared, precomputed aggregates for the six rules.
//!
//! Every rule reads the same joined view of cluster assignments and sales,
//! built once per run. Cluster-level statistics use population standard
//! deviation over all members, with zero quantities for members that do not
//! stock the SPU.

use super::RecommendationTarget;
use crate::cluster::Cluster;
use crate::config::SellThroughConfig;
use crate::sellthrough::{derive_roles, sell_through};
use crate::types::{ProductRole, SalesFact, Spu, SpuStyle, Store};
use crate::weather::{StoreWeatherProfile, TempBand, TempClass};
use statrs::statistics::{Data, OrderStatistics};
use std::collections::{BTreeMap, BTreeSet};

/// A store's position in one SPU.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpuPosition {
    pub sales_qty: f64,
    pub sales_amt: f64,
    pub stock_qty: f64,
}

impl SpuPosition {
    pub fn sell_through(&self) -> f64 {
        sell_through(self.sales_qty, self.stock_qty)
    }
}

/// A store's position in one subcategory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubcatPosition {
    /// Distinct SPUs with sales or stock.
    pub distinct_spus: usize,
    pub sales_qty: f64,
    pub sales_amt: f64,
    pub stock_qty: f64,
}

/// Cluster-level statistics for one SPU.
#[derive(Debug, Clone)]
pub struct ClusterSpuStats {
    pub n_members: usize,
    /// Members with any sales or stock in the SPU.
    pub stocked_count: usize,
    /// Mean/std of sales quantity over all members (zeros included,
    /// population std).
    pub mean_qty: f64,
    pub std_qty: f64,
    pub mean_amt: f64,
    pub std_amt: f64,
    /// Means over stocking members only.
    pub mean_qty_stocked: f64,
    pub mean_amt_stocked: f64,
    pub total_amt: f64,
}

impl ClusterSpuStats {
    pub fn adoption(&self) -> f64 {
        if self.n_members == 0 {
            0.0
        } else {
            self.stocked_count as f64 / self.n_members as f64
        }
    }
}

/// Membership view of one validated cluster.
#[derive(Debug, Clone)]
pub struct ClusterMembers {
    pub cluster_id: usize,
    pub band: TempBand,
    pub store_ids: Vec<String>,
}

/// Joined, precomputed inputs common to every rule.
pub struct RuleContext {
    stores: BTreeMap<String, Store>,
    spus: BTreeMap<String, Spu>,
    clusters: Vec<ClusterMembers>,
    assignment: BTreeMap<String, usize>,
    store_spu: BTreeMap<(String, String), SpuPosition>,
    cluster_spu: BTreeMap<(usize, String), ClusterSpuStats>,
    store_subcat: BTreeMap<(String, String), SubcatPosition>,
    /// Mean distinct-SPU count among cluster members carrying the subcategory.
    cluster_subcat_benchmark: BTreeMap<(usize, String), f64>,
    /// Mean sales quantity per carried SPU in the subcategory.
    cluster_subcat_qty_per_style: BTreeMap<(usize, String), f64>,
    store_sales_per_unit: BTreeMap<String, f64>,
    store_velocity: BTreeMap<String, f64>,
    store_stock: BTreeMap<String, f64>,
    store_util: BTreeMap<String, f64>,
    store_sell_through: BTreeMap<String, f64>,
    roles: BTreeMap<String, ProductRole>,
    subcat_roles: BTreeMap<String, ProductRole>,
    temp_class: BTreeMap<String, TempClass>,
    fallback_unit_price: f64,
}

impl RuleContext {
    /// Join stores, SPUs, window sales, and validated clusters into the
    /// aggregate view.
    pub fn build(
        stores: &[Store],
        spus: &[Spu],
        facts: &[SalesFact],
        clusters: &[Cluster],
        cluster_store_ids: &[String],
        profiles: &BTreeMap<String, StoreWeatherProfile>,
        st_cfg: &SellThroughConfig,
    ) -> Self {
        let store_map: BTreeMap<String, Store> = stores
            .iter()
            .map(|s| (s.store_id.clone(), s.clone()))
            .collect();
        let spu_map: BTreeMap<String, Spu> =
            spus.iter().map(|s| (s.spu_id.clone(), s.clone())).collect();

        let members: Vec<ClusterMembers> = clusters
            .iter()
            .map(|c| ClusterMembers {
                cluster_id: c.cluster_id,
                band: c.band,
                store_ids: c
                    .members
                    .iter()
                    .map(|&row| cluster_store_ids[row].clone())
                    .collect(),
            })
            .collect();
        let assignment: BTreeMap<String, usize> = members
            .iter()
            .flat_map(|c| {
                c.store_ids
                    .iter()
                    .map(move |s| (s.clone(), c.cluster_id))
            })
            .collect();

        // Per-store and per-(store, SPU/subcategory) aggregates.
        let mut store_spu: BTreeMap<(String, String), SpuPosition> = BTreeMap::new();
        let mut store_subcat_spus: BTreeMap<(String, String), BTreeSet<String>> =
            BTreeMap::new();
        let mut store_subcat: BTreeMap<(String, String), SubcatPosition> = BTreeMap::new();
        let mut store_totals: BTreeMap<String, (f64, f64, f64)> = BTreeMap::new();
        let mut total_amt = 0.0;
        let mut total_qty = 0.0;
        for f in facts {
            if !assignment.contains_key(&f.store_id) {
                continue;
            }
            let pos = store_spu
                .entry((f.store_id.clone(), f.spu_id.clone()))
                .or_default();
            pos.sales_qty += f.sales_qty;
            pos.sales_amt += f.sales_amt;
            pos.stock_qty += f.stock_qty;

            let totals = store_totals.entry(f.store_id.clone()).or_insert((0.0, 0.0, 0.0));
            totals.0 += f.sales_qty;
            totals.1 += f.sales_amt;
            totals.2 += f.stock_qty;
            total_amt += f.sales_amt;
            total_qty += f.sales_qty;

            if let Some(spu) = spu_map.get(&f.spu_id) {
                let key = (f.store_id.clone(), spu.subcategory.clone());
                let sub = store_subcat.entry(key.clone()).or_default();
                sub.sales_qty += f.sales_qty;
                sub.sales_amt += f.sales_amt;
                sub.stock_qty += f.stock_qty;
                if f.sales_qty > 0.0 || f.stock_qty > 0.0 {
                    store_subcat_spus.entry(key).or_default().insert(f.spu_id.clone());
                }
            }
        }
        for (key, spu_set) in &store_subcat_spus {
            if let Some(sub) = store_subcat.get_mut(key) {
                sub.distinct_spus = spu_set.len();
            }
        }

        // Cluster x SPU statistics over all members.
        let mut cluster_spu: BTreeMap<(usize, String), ClusterSpuStats> = BTreeMap::new();
        for cluster in &members {
            let n = cluster.store_ids.len();
            let mut spu_ids: BTreeSet<&String> = BTreeSet::new();
            for store_id in &cluster.store_ids {
                for ((sid, spu_id), _) in
                    store_spu.range((store_id.clone(), String::new())..)
                {
                    if sid != store_id {
                        break;
                    }
                    spu_ids.insert(spu_id);
                }
            }
            for spu_id in spu_ids {
                let mut qtys = Vec::with_capacity(n);
                let mut amts = Vec::with_capacity(n);
                let mut stocked = 0usize;
                for store_id in &cluster.store_ids {
                    let pos = store_spu.get(&(store_id.clone(), spu_id.clone()));
                    let (q, a) = pos.map_or((0.0, 0.0), |p| (p.sales_qty, p.sales_amt));
                    let has = pos.map_or(false, |p| {
                        p.sales_qty > 0.0 || p.stock_qty > 0.0
                    });
                    if has {
                        stocked += 1;
                    }
                    qtys.push(q);
                    amts.push(a);
                }
                let (mean_qty, std_qty) = mean_and_population_std(&qtys);
                let (mean_amt, std_amt) = mean_and_population_std(&amts);
                let total: f64 = amts.iter().sum();
                let (mean_qty_stocked, mean_amt_stocked) = if stocked > 0 {
                    (
                        qtys.iter().sum::<f64>() / stocked as f64,
                        total / stocked as f64,
                    )
                } else {
                    (0.0, 0.0)
                };
                cluster_spu.insert(
                    (cluster.cluster_id, spu_id.clone()),
                    ClusterSpuStats {
                        n_members: n,
                        stocked_count: stocked,
                        mean_qty,
                        std_qty,
                        mean_amt,
                        std_amt,
                        mean_qty_stocked,
                        mean_amt_stocked,
                        total_amt: total,
                    },
                );
            }
        }

        // Cluster x subcategory benchmarks among carriers.
        let mut subcat_accum: BTreeMap<(usize, String), (f64, usize, usize)> = BTreeMap::new();
        for ((store_id, subcat), pos) in &store_subcat {
            let Some(&cluster_id) = assignment.get(store_id) else {
                continue;
            };
            if pos.distinct_spus == 0 {
                continue;
            }
            let entry = subcat_accum
                .entry((cluster_id, subcat.clone()))
                .or_insert((0.0, 0, 0));
            entry.0 += pos.sales_qty;
            entry.1 += pos.distinct_spus;
            entry.2 += 1;
        }
        let mut cluster_subcat_benchmark: BTreeMap<(usize, String), f64> = BTreeMap::new();
        let mut cluster_subcat_qty_per_style: BTreeMap<(usize, String), f64> = BTreeMap::new();
        for (key, (qty, styles, carriers)) in subcat_accum {
            cluster_subcat_benchmark
                .insert(key.clone(), styles as f64 / carriers.max(1) as f64);
            cluster_subcat_qty_per_style.insert(key, qty / styles.max(1) as f64);
        }

        // Per-store derived values.
        let fallback_unit_price = if total_qty > f64::EPSILON {
            total_amt / total_qty
        } else {
            1.0
        };
        let mut store_sales_per_unit = BTreeMap::new();
        let mut store_velocity = BTreeMap::new();
        let mut store_stock = BTreeMap::new();
        let mut store_util = BTreeMap::new();
        let mut store_sell_through = BTreeMap::new();
        for (store_id, (qty, amt, stock)) in &store_totals {
            let per_unit = if *qty > f64::EPSILON {
                amt / qty
            } else {
                fallback_unit_price
            };
            store_sales_per_unit.insert(store_id.clone(), per_unit);
            store_velocity.insert(store_id.clone(), *qty);
            store_stock.insert(store_id.clone(), *stock);
            store_sell_through.insert(store_id.clone(), sell_through(*qty, *stock));
            let capacity = store_map
                .get(store_id)
                .map_or(0.0, |s| s.rack_capacity as f64);
            let util = if capacity > f64::EPSILON {
                stock / capacity
            } else {
                1.0
            };
            store_util.insert(store_id.clone(), util);
        }

        // Roles: per SPU from observed sell-through, per subcategory from the
        // subcategory aggregate.
        let roles = derive_roles(facts, st_cfg);
        let mut subcat_totals: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for f in facts {
            if let Some(spu) = spu_map.get(&f.spu_id) {
                let entry = subcat_totals.entry(spu.subcategory.clone()).or_insert((0.0, 0.0));
                entry.0 += f.sales_qty;
                entry.1 += f.stock_qty;
            }
        }
        let subcat_roles: BTreeMap<String, ProductRole> = subcat_totals
            .into_iter()
            .map(|(subcat, (qty, stock))| {
                let st = sell_through(qty, stock);
                let role = if st >= st_cfg.core_threshold {
                    ProductRole::Core
                } else if st >= st_cfg.seasonal_threshold {
                    ProductRole::Seasonal
                } else if st >= st_cfg.filler_threshold {
                    ProductRole::Filler
                } else {
                    ProductRole::Clearance
                };
                (subcat, role)
            })
            .collect();

        let temp_class = profiles
            .iter()
            .map(|(store_id, p)| (store_id.clone(), p.temp_class()))
            .collect();

        Self {
            stores: store_map,
            spus: spu_map,
            clusters: members,
            assignment,
            store_spu,
            cluster_spu,
            store_subcat,
            cluster_subcat_benchmark,
            cluster_subcat_qty_per_style,
            store_sales_per_unit,
            store_velocity,
            store_stock,
            store_util,
            store_sell_through,
            roles,
            subcat_roles,
            temp_class,
            fallback_unit_price,
        }
    }

    pub fn clusters(&self) -> &[ClusterMembers] {
        &self.clusters
    }

    pub fn cluster_of(&self, store_id: &str) -> Option<usize> {
        self.assignment.get(store_id).copied()
    }

    pub fn store(&self, store_id: &str) -> Option<&Store> {
        self.stores.get(store_id)
    }

    pub fn spu(&self, spu_id: &str) -> Option<&Spu> {
        self.spus.get(spu_id)
    }

    pub fn has_sales(&self) -> bool {
        !self.store_spu.is_empty()
    }

    pub fn position(&self, store_id: &str, spu_id: &str) -> Option<&SpuPosition> {
        self.store_spu
            .get(&(store_id.to_string(), spu_id.to_string()))
    }

    pub fn subcat_position(&self, store_id: &str, subcat: &str) -> Option<&SubcatPosition> {
        self.store_subcat
            .get(&(store_id.to_string(), subcat.to_string()))
    }

    pub fn cluster_spu_stats(&self, cluster_id: usize, spu_id: &str) -> Option<&ClusterSpuStats> {
        self.cluster_spu.get(&(cluster_id, spu_id.to_string()))
    }

    /// SPUs observed anywhere in a cluster.
    pub fn spus_in_cluster(&self, cluster_id: usize) -> Vec<&str> {
        self.cluster_spu
            .range((cluster_id, String::new())..(cluster_id + 1, String::new()))
            .map(|((_, spu), _)| spu.as_str())
            .collect()
    }

    /// Subcategories observed anywhere in a cluster.
    pub fn subcats_in_cluster(&self, cluster_id: usize) -> Vec<&str> {
        self.cluster_subcat_benchmark
            .range((cluster_id, String::new())..(cluster_id + 1, String::new()))
            .map(|((_, sc), _)| sc.as_str())
            .collect()
    }

    pub fn subcat_benchmark(&self, cluster_id: usize, subcat: &str) -> Option<f64> {
        self.cluster_subcat_benchmark
            .get(&(cluster_id, subcat.to_string()))
            .copied()
    }

    pub fn subcat_qty_per_style(&self, cluster_id: usize, subcat: &str) -> Option<f64> {
        self.cluster_subcat_qty_per_style
            .get(&(cluster_id, subcat.to_string()))
            .copied()
    }

    /// Average realized unit price for a store, falling back to the run-wide
    /// average.
    pub fn sales_per_unit(&self, store_id: &str) -> f64 {
        self.store_sales_per_unit
            .get(store_id)
            .copied()
            .unwrap_or(self.fallback_unit_price)
    }

    pub fn velocity(&self, store_id: &str) -> f64 {
        self.store_velocity.get(store_id).copied().unwrap_or(0.0)
    }

    pub fn total_stock(&self, store_id: &str) -> f64 {
        self.store_stock.get(store_id).copied().unwrap_or(0.0)
    }

    pub fn capacity_utilization(&self, store_id: &str) -> f64 {
        self.store_util.get(store_id).copied().unwrap_or(1.0)
    }

    pub fn store_sell_through(&self, store_id: &str) -> f64 {
        self.store_sell_through
            .get(store_id)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn temp_class(&self, store_id: &str) -> Option<TempClass> {
        self.temp_class.get(store_id).copied()
    }

    pub fn role_of_spu(&self, spu_id: &str) -> ProductRole {
        self.roles
            .get(spu_id)
            .copied()
            .unwrap_or(ProductRole::Seasonal)
    }

    /// Role backing a recommendation target, for the sell-through gate.
    pub fn role_for(&self, target: &RecommendationTarget) -> ProductRole {
        match target {
            RecommendationTarget::Spu(spu_id) => self.role_of_spu(spu_id),
            RecommendationTarget::Subcategory(subcat) => self
                .subcat_roles
                .get(subcat)
                .copied()
                .unwrap_or(ProductRole::Seasonal),
        }
    }

    /// Current sell-through backing a recommendation target, falling back to
    /// the store-level rate for positions the store does not hold.
    pub fn sell_through_for(&self, store_id: &str, target: &RecommendationTarget) -> f64 {
        match target {
            RecommendationTarget::Spu(spu_id) => self
                .position(store_id, spu_id)
                .map(|p| p.sell_through())
                .unwrap_or_else(|| self.store_sell_through(store_id)),
            RecommendationTarget::Subcategory(subcat) => self
                .subcat_position(store_id, subcat)
                .map(|p| sell_through(p.sales_qty, p.stock_qty))
                .unwrap_or_else(|| self.store_sell_through(store_id)),
        }
    }

    /// Dominant merchandising orientation of a subcategory, by SPU count.
    /// None when the split is even or the subcategory is unknown.
    pub fn subcat_style(&self, subcat: &str) -> Option<SpuStyle> {
        let mut fashion = 0usize;
        let mut basic = 0usize;
        for spu in self.spus.values() {
            if spu.subcategory == subcat {
                match spu.style {
                    SpuStyle::Fashion => fashion += 1,
                    SpuStyle::Basic => basic += 1,
                }
            }
        }
        match fashion.cmp(&basic) {
            std::cmp::Ordering::Greater => Some(SpuStyle::Fashion),
            std::cmp::Ordering::Less => Some(SpuStyle::Basic),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Percentile of member velocities within a cluster.
    pub fn cluster_velocity_percentile(&self, cluster_id: usize, pct: usize) -> Option<f64> {
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)?;
        let velocities: Vec<f64> = cluster
            .store_ids
            .iter()
            .map(|s| self.velocity(s))
            .collect();
        if velocities.is_empty() {
            return None;
        }
        let mut data = Data::new(velocities);
        Some(data.percentile(pct))
    }

    /// Percentile of member sales amounts for one SPU within a cluster.
    pub fn cluster_spu_amt_percentile(
        &self,
        cluster_id: usize,
        spu_id: &str,
        pct: usize,
    ) -> Option<f64> {
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)?;
        let amts: Vec<f64> = cluster
            .store_ids
            .iter()
            .map(|s| self.position(s, spu_id).map_or(0.0, |p| p.sales_amt))
            .collect();
        if amts.is_empty() {
            return None;
        }
        let mut data = Data::new(amts);
        Some(data.percentile(pct))
    }
}

fn mean_and_population_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared fixture builder for the rule tests.

    use super::*;
    use crate::cluster::Cluster;
    use crate::types::{SizeTier, SpuStyle, StoreStyle, StyleTags};
    use crate::weather::TempBand;
    use nalgebra::DVector;

    pub struct Fixture {
        pub stores: Vec<Store>,
        pub spus: Vec<Spu>,
        pub facts: Vec<SalesFact>,
        pub clusters: Vec<Cluster>,
        pub store_ids: Vec<String>,
        pub profiles: BTreeMap<String, StoreWeatherProfile>,
    }

    impl Fixture {
        /// One cluster holding every listed store.
        pub fn single_cluster(store_ids: &[&str]) -> Self {
            let stores: Vec<Store> = store_ids
                .iter()
                .map(|id| Store {
                    store_id: id.to_string(),
                    latitude: 30.0,
                    longitude: 114.0,
                    elevation: 0.0,
                    size_tier: SizeTier::Medium,
                    style: StoreStyle::Balanced,
                    rack_capacity: 200,
                })
                .collect();
            let profiles = stores
                .iter()
                .map(|s| {
                    (
                        s.store_id.clone(),
                        StoreWeatherProfile {
                            store_id: s.store_id.clone(),
                            avg_feels_like: 18.0,
                            min_feels_like: 10.0,
                            max_feels_like: 26.0,
                            hours_cold: 0,
                            hours_cool: 0,
                            hours_moderate: 10,
                            hours_hot: 0,
                            temperature_band: TempBand { index: 3 },
                            temperature_band_q3q4: None,
                            days_observed: 30,
                        },
                    )
                })
                .collect();
            let clusters = vec![Cluster {
                cluster_id: 0,
                band: TempBand { index: 3 },
                members: (0..store_ids.len()).collect(),
                centroid: DVector::zeros(1),
                silhouette: 0.5,
            }];
            Self {
                store_ids: stores.iter().map(|s| s.store_id.clone()).collect(),
                stores,
                spus: Vec::new(),
                facts: Vec::new(),
                clusters,
                profiles,
            }
        }

        pub fn spu(&mut self, spu_id: &str, subcategory: &str, price: f64) -> &mut Self {
            self.spus.push(Spu {
                spu_id: spu_id.to_string(),
                category: "Apparel".to_string(),
                subcategory: subcategory.to_string(),
                tags: StyleTags::default(),
                style: SpuStyle::Basic,
                price,
            });
            self
        }

        pub fn fact(&mut self, store: &str, spu: &str, qty: f64, amt: f64, stock: f64) -> &mut Self {
            self.facts.push(SalesFact {
                store_id: store.to_string(),
                spu_id: spu.to_string(),
                period: "202406A".parse().unwrap(),
                sales_amt: amt,
                sales_qty: qty,
                stock_qty: stock,
            });
            self
        }

        pub fn context(&self) -> RuleContext {
            RuleContext::build(
                &self.stores,
                &self.spus,
                &self.facts,
                &self.clusters,
                &self.store_ids,
                &self.profiles,
                &SellThroughConfig::default(),
            )
        }
    }
}
