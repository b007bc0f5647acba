//! Temperature-banded constrained K-means.
//!
//! Stores are partitioned by feels-like temperature band and clustered
//! independently within each band, so no cluster ever spans bands. After the
//! initial fit, clusters are rebalanced toward the configured size bounds and
//! checked for merchandising coherence; a low coherence score triggers a
//! re-fit with the style/capacity feature groups upweighted.
//!
//! The engine moves through `Unfitted -> Fitted -> Balanced -> Validated`;
//! only validated clusters are visible to downstream components.

use crate::config::ClusteringConfig;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureFamily, FeatureMatrix};
use crate::quality::{
    band_compliance, calinski_harabasz, centroid_of, davies_bouldin,
    merchandising_coherence, silhouette_samples, ClusterQuality,
};
use crate::types::{SizeTier, Store, StoreStyle};
use crate::weather::{StoreWeatherProfile, TempBand};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const STYLE_WEIGHT_STEP: f64 = 1.5;
const MAX_STYLE_WEIGHT: f64 = 3.0;

/// Lifecycle of the engine. Downstream components may only consume
/// `Validated` clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringState {
    Unfitted,
    Fitted,
    Balanced,
    Validated,
}

/// One cluster of stores within a single temperature band.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub cluster_id: usize,
    pub band: TempBand,
    /// Row indices into the fitted feature matrix.
    pub members: Vec<usize>,
    pub centroid: DVector<f64>,
    /// Mean member silhouette, filled during validation.
    pub silhouette: f64,
}

/// Banded, balanced, coherence-aware K-means engine.
pub struct ClusteringEngine {
    cfg: ClusteringConfig,
    seed: u64,
    state: ClusteringState,
    clusters: Vec<Cluster>,
    data: DMatrix<f64>,
    store_ids: Vec<String>,
    attrs: Vec<(StoreStyle, SizeTier)>,
    bands: Vec<TempBand>,
    quality: Option<ClusterQuality>,
}

impl ClusteringEngine {
    pub fn new(cfg: ClusteringConfig, seed: u64) -> Self {
        Self {
            cfg,
            seed,
            state: ClusteringState::Unfitted,
            clusters: Vec::new(),
            data: DMatrix::zeros(0, 0),
            store_ids: Vec::new(),
            attrs: Vec::new(),
            bands: Vec::new(),
            quality: None,
        }
    }

    pub fn state(&self) -> ClusteringState {
        self.state
    }

    /// Quality metrics from the last validation attempt, if any.
    pub fn quality(&self) -> Option<&ClusterQuality> {
        self.quality.as_ref()
    }

    /// Fit per-band K-means, re-weighting style/capacity features while the
    /// merchandising coherence stays under the configured threshold.
    pub fn fit(
        &mut self,
        features: &FeatureMatrix,
        profiles: &BTreeMap<String, StoreWeatherProfile>,
        stores: &[Store],
    ) -> Result<()> {
        if features.store_ids.len() != stores.len() {
            return Err(PipelineError::Internal(format!(
                "feature matrix has {} rows for {} stores",
                features.store_ids.len(),
                stores.len()
            )));
        }

        let mut bands = Vec::with_capacity(stores.len());
        let mut attrs = Vec::with_capacity(stores.len());
        for (row, store) in stores.iter().enumerate() {
            if features.store_ids[row] != store.store_id {
                return Err(PipelineError::Internal(format!(
                    "feature row {row} is {} but store list has {}",
                    features.store_ids[row], store.store_id
                )));
            }
            let profile = profiles.get(&store.store_id).ok_or_else(|| {
                PipelineError::Internal(format!(
                    "no weather profile for clustered store {}",
                    store.store_id
                ))
            })?;
            bands.push(profile.temperature_band);
            attrs.push((store.style, store.size_tier));
        }

        let mut multiplier = 1.0_f64;
        let (data, clusters) = loop {
            let mut working = features.clone();
            if multiplier > 1.0 {
                working.scale_family(FeatureFamily::StoreStyle, multiplier);
                working.scale_family(FeatureFamily::Capacity, multiplier);
            }

            let mut rng = StdRng::seed_from_u64(self.seed);
            let clusters = self.fit_bands(&working.data, &bands, &mut rng);
            let membership: Vec<Vec<usize>> =
                clusters.iter().map(|c| c.members.clone()).collect();
            let coherence = merchandising_coherence(&membership, &attrs);
            debug!(multiplier, coherence, "clustering fit attempt");

            if coherence >= self.cfg.coherence_threshold {
                break (working, clusters);
            }
            if multiplier >= MAX_STYLE_WEIGHT {
                warn!(
                    coherence,
                    threshold = self.cfg.coherence_threshold,
                    "coherence below threshold at maximum style weight"
                );
                break (working, clusters);
            }
            multiplier = (multiplier * STYLE_WEIGHT_STEP).min(MAX_STYLE_WEIGHT);
        };

        info!(
            stores = stores.len(),
            clusters = clusters.len(),
            "fitted banded clusters"
        );
        self.data = data.data;
        self.store_ids = features.store_ids.clone();
        self.bands = bands;
        self.attrs = attrs;
        self.clusters = clusters;
        self.quality = None;
        self.state = ClusteringState::Fitted;
        Ok(())
    }

    fn fit_bands(
        &self,
        data: &DMatrix<f64>,
        bands: &[TempBand],
        rng: &mut StdRng,
    ) -> Vec<Cluster> {
        let mut by_band: BTreeMap<TempBand, Vec<usize>> = BTreeMap::new();
        for (row, band) in bands.iter().enumerate() {
            by_band.entry(*band).or_default().push(row);
        }

        let mut clusters = Vec::new();
        let mut next_id = 0;
        for (band, rows) in by_band {
            let k = ((rows.len() as f64 / self.cfg.target_cluster_size as f64).round()
                as usize)
                .max(1)
                .min(rows.len());
            let memberships = kmeans(data, &rows, k, rng, self.cfg.max_iterations);
            for members in memberships {
                let centroid = centroid_of(data, &members);
                clusters.push(Cluster {
                    cluster_id: next_id,
                    band,
                    members,
                    centroid,
                    silhouette: 0.0,
                });
                next_id += 1;
            }
        }
        clusters
    }

    /// Iteratively move members from oversized to undersized clusters within
    /// each band until sizes settle inside the configured bounds or the pass
    /// limit is reached. Idempotent at the fixed point.
    pub fn balance(&mut self) -> Result<()> {
        match self.state {
            ClusteringState::Fitted | ClusteringState::Balanced => {}
            other => {
                return Err(PipelineError::Internal(format!(
                    "balance called in state {other:?}"
                )))
            }
        }

        let mut total_moves = 0;
        for _pass in 0..self.cfg.max_balance_iterations {
            let moves = self.balance_pass();
            total_moves += moves;
            if moves == 0 {
                break;
            }
        }
        debug!(moves = total_moves, "rebalanced clusters");
        self.state = ClusteringState::Balanced;
        Ok(())
    }

    fn balance_pass(&mut self) -> usize {
        let mut moves = 0;
        let cluster_ids: Vec<usize> = (0..self.clusters.len()).collect();
        for &o in &cluster_ids {
            for &u in &cluster_ids {
                if o == u || self.clusters[o].band != self.clusters[u].band {
                    continue;
                }
                loop {
                    let oversized = self.clusters[o].members.len() > self.cfg.max_cluster_size;
                    let undersized = self.clusters[u].members.len() < self.cfg.min_cluster_size;
                    if !(oversized && undersized) {
                        break;
                    }
                    // Donating below the minimum would just move the violation.
                    if self.clusters[o].members.len() <= self.cfg.min_cluster_size {
                        break;
                    }
                    let Some(best) = self.nearest_member_to(o, u) else {
                        break;
                    };
                    let row = self.clusters[o].members.remove(best);
                    self.clusters[u].members.push(row);
                    moves += 1;
                }
            }
        }
        if moves > 0 {
            for c in &mut self.clusters {
                c.centroid = centroid_of(&self.data, &c.members);
            }
        }
        moves
    }

    /// Index (within the donor's member list) of the member nearest to the
    /// receiver's centroid.
    fn nearest_member_to(&self, donor: usize, receiver: usize) -> Option<usize> {
        let target = &self.clusters[receiver].centroid;
        let mut best: Option<(usize, f64)> = None;
        for (pos, &row) in self.clusters[donor].members.iter().enumerate() {
            let mut dist = 0.0;
            for j in 0..self.data.ncols() {
                let d = self.data[(row, j)] - target[j];
                dist += d * d;
            }
            if best.map_or(true, |(_, b)| dist < b) {
                best = Some((pos, dist));
            }
        }
        best.map(|(pos, _)| pos)
    }

    /// Compute quality metrics and promote to `Validated`, or fail with
    /// `ClusteringQuality` and stay `Balanced`. Validating an already
    /// validated engine is a no-op; validating earlier states is a misuse.
    pub fn validate(&mut self) -> Result<()> {
        match self.state {
            ClusteringState::Validated => return Ok(()),
            ClusteringState::Balanced => {}
            other => {
                return Err(PipelineError::Internal(format!(
                    "validate called in state {other:?}"
                )))
            }
        }

        let n = self.store_ids.len();
        let mut membership = vec![usize::MAX; n];
        for (ordinal, cluster) in self.clusters.iter().enumerate() {
            for &row in &cluster.members {
                membership[row] = ordinal;
            }
        }
        if membership.iter().any(|&m| m == usize::MAX) {
            return Err(PipelineError::Internal(
                "store left unassigned after balancing".to_string(),
            ));
        }

        let samples = silhouette_samples(&self.data, &membership);
        let member_lists: Vec<Vec<usize>> =
            self.clusters.iter().map(|c| c.members.clone()).collect();
        let per_cluster: Vec<f64> = member_lists
            .iter()
            .map(|members| {
                members.iter().map(|&r| samples[r]).sum::<f64>() / members.len().max(1) as f64
            })
            .collect();
        let overall = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };

        let quality = ClusterQuality {
            overall_silhouette: overall,
            per_cluster_silhouette: per_cluster.clone(),
            calinski_harabasz: calinski_harabasz(&self.data, &member_lists),
            davies_bouldin: davies_bouldin(&self.data, &member_lists),
            coherence: merchandising_coherence(&member_lists, &self.attrs),
            band_compliance: band_compliance(&member_lists, &self.bands),
        };
        self.quality = Some(quality.clone());

        if quality.band_compliance < 1.0 {
            return Err(PipelineError::ClusteringQuality(format!(
                "temperature band compliance {:.1}% below 100%",
                quality.band_compliance * 100.0
            )));
        }
        if let Some(small) = self
            .clusters
            .iter()
            .find(|c| c.members.len() < self.cfg.min_cluster_size)
        {
            return Err(PipelineError::ClusteringQuality(format!(
                "cluster {} has {} members, below minimum {}",
                small.cluster_id,
                small.members.len(),
                self.cfg.min_cluster_size
            )));
        }
        if quality.overall_silhouette < self.cfg.min_silhouette {
            return Err(PipelineError::ClusteringQuality(format!(
                "overall silhouette {:.3} below {:.3}",
                quality.overall_silhouette, self.cfg.min_silhouette
            )));
        }

        for (cluster, s) in self.clusters.iter_mut().zip(per_cluster) {
            cluster.silhouette = s;
        }
        info!(
            silhouette = quality.overall_silhouette,
            coherence = quality.coherence,
            "clusters validated"
        );
        self.state = ClusteringState::Validated;
        Ok(())
    }

    /// Validated clusters. Fails before validation.
    pub fn clusters(&self) -> Result<&[Cluster]> {
        if self.state != ClusteringState::Validated {
            return Err(PipelineError::Internal(format!(
                "clusters requested in state {:?}",
                self.state
            )));
        }
        Ok(&self.clusters)
    }

    /// store_id -> cluster_id for validated clusters.
    pub fn assignments(&self) -> Result<BTreeMap<String, usize>> {
        let clusters = self.clusters()?;
        let mut out = BTreeMap::new();
        for cluster in clusters {
            for &row in &cluster.members {
                out.insert(self.store_ids[row].clone(), cluster.cluster_id);
            }
        }
        Ok(out)
    }

    pub fn store_ids(&self) -> &[String] {
        &self.store_ids
    }
}

/// Standard K-means++ / Lloyd over a subset of rows. Returns `k` member
/// lists; empty clusters are refilled with the farthest assigned point.
fn kmeans(
    data: &DMatrix<f64>,
    rows: &[usize],
    k: usize,
    rng: &mut StdRng,
    max_iterations: usize,
) -> Vec<Vec<usize>> {
    let n = rows.len();
    if k >= n {
        return rows.iter().map(|&r| vec![r]).collect();
    }

    let dist2 = |row: usize, c: &DVector<f64>| -> f64 {
        let mut sum = 0.0;
        for j in 0..data.ncols() {
            let d = data[(row, j)] - c[j];
            sum += d * d;
        }
        sum
    };

    // K-means++ seeding.
    let mut centroids: Vec<DVector<f64>> = Vec::with_capacity(k);
    let first = rows[rng.gen_range(0..n)];
    centroids.push(data.row(first).transpose());
    while centroids.len() < k {
        let weights: Vec<f64> = rows
            .iter()
            .map(|&r| {
                centroids
                    .iter()
                    .map(|c| dist2(r, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        let chosen = if total > f64::EPSILON {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, w) in weights.iter().enumerate() {
                target -= w;
                if target <= 0.0 {
                    pick = i;
                    break;
                }
            }
            rows[pick]
        } else {
            rows[rng.gen_range(0..n)]
        };
        centroids.push(data.row(chosen).transpose());
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..max_iterations {
        // Assignment step; ties go to the lowest centroid index.
        let mut changed = false;
        for (i, &row) in rows.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = dist2(row, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }

        // Refill empty clusters with the farthest point from its centroid.
        for c in 0..k {
            if assignment.iter().any(|&a| a == c) {
                continue;
            }
            let farthest = (0..n)
                .max_by(|&a, &b| {
                    let da = dist2(rows[a], &centroids[assignment[a]]);
                    let db = dist2(rows[b], &centroids[assignment[b]]);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            assignment[farthest] = c;
            changed = true;
        }

        // Update step.
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(i, _)| assignment[*i] == c)
                .map(|(_, &r)| r)
                .collect();
            if !members.is_empty() {
                *centroid = centroid_of(data, &members);
            }
        }

        if !changed {
            break;
        }
    }

    let mut out = vec![Vec::new(); k];
    for (i, &row) in rows.iter().enumerate() {
        out[assignment[i]].push(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMatrix;

    fn profile(store_id: &str, avg: f64) -> StoreWeatherProfile {
        StoreWeatherProfile {
            store_id: store_id.to_string(),
            avg_feels_like: avg,
            min_feels_like: avg - 5.0,
            max_feels_like: avg + 5.0,
            hours_cold: 0,
            hours_cool: 0,
            hours_moderate: 10,
            hours_hot: 0,
            temperature_band: TempBand::containing(avg, 5.0),
            temperature_band_q3q4: None,
            days_observed: 30,
        }
    }

    fn store(id: &str, style: StoreStyle, tier: SizeTier) -> Store {
        Store {
            store_id: id.to_string(),
            latitude: 30.0,
            longitude: 114.0,
            elevation: 0.0,
            size_tier: tier,
            style,
            rack_capacity: 300,
        }
    }

    /// Stores in two temperature bands with two obvious blobs per band.
    fn fixture() -> (FeatureMatrix, BTreeMap<String, StoreWeatherProfile>, Vec<Store>) {
        let mut stores = Vec::new();
        let mut profiles = BTreeMap::new();
        let mut rows = Vec::new();
        for i in 0..12 {
            let id = format!("S{i:02}");
            let warm = i < 6;
            let blob = (i % 6) < 3;
            stores.push(store(&id, StoreStyle::Balanced, SizeTier::Medium));
            profiles.insert(id.clone(), profile(&id, if warm { 22.0 } else { 8.0 }));
            let x = if blob { 0.0 } else { 5.0 };
            rows.push(vec![x + (i % 3) as f64 * 0.01, x]);
        }
        let n = rows.len();
        let data = DMatrix::from_fn(n, 2, |i, j| rows[i][j]);
        let fm = FeatureMatrix {
            store_ids: stores.iter().map(|s| s.store_id.clone()).collect(),
            data,
            column_groups: vec![(FeatureFamily::SpuSales, 0..2)],
        };
        (fm, profiles, stores)
    }

    fn small_cfg() -> ClusteringConfig {
        ClusteringConfig {
            target_cluster_size: 3,
            min_cluster_size: 2,
            max_cluster_size: 4,
            ..ClusteringConfig::default()
        }
    }

    #[test]
    fn test_clusters_never_span_bands() {
        let (fm, profiles, stores) = fixture();
        let mut engine = ClusteringEngine::new(small_cfg(), 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        engine.validate().unwrap();

        for cluster in engine.clusters().unwrap() {
            for &row in &cluster.members {
                assert_eq!(
                    profiles[&stores[row].store_id].temperature_band,
                    cluster.band
                );
            }
        }
    }

    #[test]
    fn test_every_store_assigned_once() {
        let (fm, profiles, stores) = fixture();
        let mut engine = ClusteringEngine::new(small_cfg(), 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        engine.validate().unwrap();
        let assignments = engine.assignments().unwrap();
        assert_eq!(assignments.len(), stores.len());
    }

    #[test]
    fn test_blobs_recovered_within_band() {
        let (fm, profiles, stores) = fixture();
        let mut engine = ClusteringEngine::new(small_cfg(), 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        engine.validate().unwrap();
        // 12 stores, 2 bands, target 3 -> 2 clusters per band, and the
        // blobs are far enough apart that K-means must split on them.
        let assignments = engine.assignments().unwrap();
        assert_eq!(assignments["S00"], assignments["S01"]);
        assert_eq!(assignments["S00"], assignments["S02"]);
        assert_ne!(assignments["S00"], assignments["S03"]);
    }

    #[test]
    fn test_state_machine_enforced() {
        let (fm, profiles, stores) = fixture();
        let mut engine = ClusteringEngine::new(small_cfg(), 42);
        assert!(engine.balance().is_err());
        engine.fit(&fm, &profiles, &stores).unwrap();
        assert!(engine.validate().is_err(), "validate before balance");
        assert!(engine.clusters().is_err(), "clusters before validate");
        engine.balance().unwrap();
        engine.balance().unwrap(); // idempotent at the fixed point
        engine.validate().unwrap();
        engine.validate().unwrap(); // no-op once validated
        assert!(engine.clusters().is_ok());
    }

    #[test]
    fn test_below_minimum_cluster_fails_validation() {
        let (fm, profiles, stores) = fixture();
        let cfg = ClusteringConfig {
            target_cluster_size: 3,
            min_cluster_size: 7, // a 6-store band can never satisfy this
            max_cluster_size: 7,
            ..ClusteringConfig::default()
        };
        let mut engine = ClusteringEngine::new(cfg, 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        let err = engine.validate().unwrap_err();
        assert!(matches!(err, PipelineError::ClusteringQuality(_)));
        assert_eq!(engine.state(), ClusteringState::Balanced);
    }

    #[test]
    fn test_balancing_moves_into_bounds() {
        let (fm, profiles, stores) = fixture();
        let cfg = ClusteringConfig {
            target_cluster_size: 3,
            min_cluster_size: 3,
            max_cluster_size: 3,
            ..ClusteringConfig::default()
        };
        let mut engine = ClusteringEngine::new(cfg, 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        engine.validate().unwrap();
        for cluster in engine.clusters().unwrap() {
            assert_eq!(cluster.members.len(), 3);
        }
    }

    #[test]
    fn test_balancing_redistributes_skewed_blobs() {
        // One band, a 4-store blob and a 2-store blob; exact bounds of 3
        // force one member across.
        let mut stores = Vec::new();
        let mut profiles = BTreeMap::new();
        let mut rows = Vec::new();
        for i in 0..6 {
            let id = format!("S{i}");
            stores.push(store(&id, StoreStyle::Balanced, SizeTier::Medium));
            profiles.insert(id.clone(), profile(&id, 18.0));
            let x = if i < 4 { 0.0 } else { 5.0 };
            rows.push(vec![x + i as f64 * 0.01, x]);
        }
        let data = DMatrix::from_fn(6, 2, |i, j| rows[i][j]);
        let fm = FeatureMatrix {
            store_ids: stores.iter().map(|s| s.store_id.clone()).collect(),
            data,
            column_groups: vec![(FeatureFamily::SpuSales, 0..2)],
        };
        let cfg = ClusteringConfig {
            target_cluster_size: 3,
            min_cluster_size: 3,
            max_cluster_size: 3,
            ..ClusteringConfig::default()
        };
        let mut engine = ClusteringEngine::new(cfg, 42);
        engine.fit(&fm, &profiles, &stores).unwrap();
        engine.balance().unwrap();
        engine.validate().unwrap();
        for cluster in engine.clusters().unwrap() {
            assert_eq!(cluster.members.len(), 3);
        }
    }

    #[test]
    fn test_determinism_across_runs() {
        let (fm, profiles, stores) = fixture();
        let run = || {
            let mut engine = ClusteringEngine::new(small_cfg(), 7);
            engine.fit(&fm, &profiles, &stores).unwrap();
            engine.balance().unwrap();
            engine.validate().unwrap();
            engine.assignments().unwrap()
        };
        assert_eq!(run(), run());
    }
}
