//! Cluster profiling: operational tags and plain-language narratives.
//!
//! Profiles are pure functions of cluster statistics; identical inputs yield
//! identical output within a run, which keeps regression diffs stable.

use crate::cluster::Cluster;
use crate::quality::QualityRating;
use crate::types::Store;
use crate::weather::StoreWeatherProfile;
use std::collections::BTreeMap;
use std::fmt;

/// Style orientation of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleClassification {
    FashionFocused,
    BasicFocused,
    Balanced,
}

impl StyleClassification {
    pub fn classify(fashion_ratio: f64, basic_ratio: f64) -> Self {
        if fashion_ratio >= 0.60 {
            StyleClassification::FashionFocused
        } else if basic_ratio >= 0.60 {
            StyleClassification::BasicFocused
        } else {
            StyleClassification::Balanced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StyleClassification::FashionFocused => "Fashion-Focused",
            StyleClassification::BasicFocused => "Basic-Focused",
            StyleClassification::Balanced => "Balanced",
        }
    }
}

/// Capacity tier from the average estimated rack capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityTier {
    Large,
    Medium,
    Small,
}

impl CapacityTier {
    pub fn classify(avg_rack_capacity: f64) -> Self {
        if avg_rack_capacity >= 500.0 {
            CapacityTier::Large
        } else if avg_rack_capacity >= 200.0 {
            CapacityTier::Medium
        } else {
            CapacityTier::Small
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityTier::Large => "Large",
            CapacityTier::Medium => "Medium",
            CapacityTier::Small => "Small",
        }
    }
}

/// Geographic leg of the operational tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoTag {
    WarmSouth,
    ModerateCentral,
    CoolNorth,
}

impl GeoTag {
    pub fn classify(avg_feels_like: f64) -> Self {
        if avg_feels_like >= 20.0 {
            GeoTag::WarmSouth
        } else if avg_feels_like >= 10.0 {
            GeoTag::ModerateCentral
        } else {
            GeoTag::CoolNorth
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeoTag::WarmSouth => "Warm-South",
            GeoTag::ModerateCentral => "Moderate-Central",
            GeoTag::CoolNorth => "Cool-North",
        }
    }
}

/// Business leg of the operational tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessTag {
    FashionHeavy,
    BasicFocus,
    BalancedMix,
}

impl BusinessTag {
    pub fn from_style(style: StyleClassification) -> Self {
        match style {
            StyleClassification::FashionFocused => BusinessTag::FashionHeavy,
            StyleClassification::BasicFocused => BusinessTag::BasicFocus,
            StyleClassification::Balanced => BusinessTag::BalancedMix,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessTag::FashionHeavy => "Fashion-Heavy",
            BusinessTag::BasicFocus => "Basic-Focus",
            BusinessTag::BalancedMix => "Balanced-Mix",
        }
    }
}

/// Capacity leg of the operational tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityTag {
    LargeVolume,
    HighCapacity,
    EfficientSize,
}

impl CapacityTag {
    pub fn from_tier(tier: CapacityTier) -> Self {
        match tier {
            CapacityTier::Large => CapacityTag::LargeVolume,
            CapacityTier::Medium => CapacityTag::HighCapacity,
            CapacityTier::Small => CapacityTag::EfficientSize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityTag::LargeVolume => "Large-Volume",
            CapacityTag::HighCapacity => "High-Capacity",
            CapacityTag::EfficientSize => "Efficient-Size",
        }
    }
}

/// The human-readable tag triple, e.g. "Warm-South, Fashion-Heavy,
/// High-Capacity".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalTag {
    pub geo: GeoTag,
    pub business: BusinessTag,
    pub capacity: CapacityTag,
}

impl fmt::Display for OperationalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}",
            self.geo.as_str(),
            self.business.as_str(),
            self.capacity.as_str()
        )
    }
}

/// Plain-language narrative for merchandising teams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNarrative {
    pub title: String,
    pub who: String,
    pub why_grouped: String,
    pub business_value: String,
    pub actions: String,
    pub success_metrics: String,
}

/// Full profile of one validated cluster.
#[derive(Debug, Clone)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub member_count: usize,
    pub fashion_ratio: f64,
    pub basic_ratio: f64,
    pub avg_feels_like: f64,
    pub avg_rack_capacity: f64,
    pub silhouette: f64,
    pub style: StyleClassification,
    pub capacity_tier: CapacityTier,
    pub quality: QualityRating,
    pub tag: OperationalTag,
    pub narrative: ClusterNarrative,
}

/// Profile every cluster. `stores` must be row-aligned with the member
/// indices carried by the clusters; `style_ratios` maps store_id to its
/// (fashion, basic) sales shares.
pub fn profile_clusters(
    clusters: &[Cluster],
    stores: &[Store],
    profiles: &BTreeMap<String, StoreWeatherProfile>,
    style_ratios: &BTreeMap<String, (f64, f64)>,
) -> Vec<ClusterProfile> {
    clusters
        .iter()
        .map(|cluster| {
            let n = cluster.members.len().max(1) as f64;
            let mut fashion = 0.0;
            let mut basic = 0.0;
            let mut feels = 0.0;
            let mut capacity = 0.0;
            for &row in &cluster.members {
                let store = &stores[row];
                if let Some((f, b)) = style_ratios.get(&store.store_id) {
                    fashion += f;
                    basic += b;
                }
                if let Some(p) = profiles.get(&store.store_id) {
                    feels += p.avg_feels_like;
                }
                capacity += store.rack_capacity as f64;
            }
            let fashion_ratio = fashion / n;
            let basic_ratio = basic / n;
            let avg_feels_like = feels / n;
            let avg_rack_capacity = capacity / n;

            let style = StyleClassification::classify(fashion_ratio, basic_ratio);
            let capacity_tier = CapacityTier::classify(avg_rack_capacity);
            let tag = OperationalTag {
                geo: GeoTag::classify(avg_feels_like),
                business: BusinessTag::from_style(style),
                capacity: CapacityTag::from_tier(capacity_tier),
            };
            let narrative = build_narrative(
                style,
                capacity_tier,
                cluster.members.len(),
                avg_rack_capacity,
                fashion_ratio,
                basic_ratio,
            );

            ClusterProfile {
                cluster_id: cluster.cluster_id,
                member_count: cluster.members.len(),
                fashion_ratio,
                basic_ratio,
                avg_feels_like,
                avg_rack_capacity,
                silhouette: cluster.silhouette,
                style,
                capacity_tier,
                quality: QualityRating::from_silhouette(cluster.silhouette),
                tag,
                narrative,
            }
        })
        .collect()
}

/// Template selection is a pure match on (style, capacity); the nine
/// combinations each get their own voice.
fn build_narrative(
    style: StyleClassification,
    tier: CapacityTier,
    members: usize,
    avg_capacity: f64,
    fashion_ratio: f64,
    basic_ratio: f64,
) -> ClusterNarrative {
    use CapacityTier as T;
    use StyleClassification as S;

    let (title, value, actions) = match (style, tier) {
        (S::FashionFocused, T::Large) => (
            "Fashion flagships",
            "High-visibility stores that set the fashion tone for the region",
            "Prioritize new seasonal drops; refresh front-of-store displays every period",
        ),
        (S::FashionFocused, T::Medium) => (
            "Fashion mainstays",
            "Dependable fashion sellers with room to trade up",
            "Push best-selling fashion SPUs; test premium price bands",
        ),
        (S::FashionFocused, T::Small) => (
            "Fashion boutiques",
            "Compact stores that convert fashion traffic efficiently",
            "Keep depth shallow and rotate styles quickly",
        ),
        (S::BasicFocused, T::Large) => (
            "Basics warehouses",
            "Volume engines for core replenishment programs",
            "Protect stock of core basics; automate replenishment",
        ),
        (S::BasicFocused, T::Medium) => (
            "Basics workhorses",
            "Steady basic demand with predictable sell-through",
            "Hold core coverage; trim slow seasonal experiments",
        ),
        (S::BasicFocused, T::Small) => (
            "Basics essentials",
            "Small-format stores serving everyday needs",
            "Stock only proven basics; avoid wide assortments",
        ),
        (S::Balanced, T::Large) => (
            "Full-range anchors",
            "Large stores able to carry the complete assortment",
            "Use as test beds for new categories before wider rollout",
        ),
        (S::Balanced, T::Medium) => (
            "Balanced core stores",
            "Representative demand mix, useful as benchmark stores",
            "Track against cluster benchmarks; correct outliers first",
        ),
        (S::Balanced, T::Small) => (
            "Balanced neighborhood stores",
            "Small stores with a broad, shallow mix",
            "Curate a best-of assortment; cap SPU count per subcategory",
        ),
    };

    ClusterNarrative {
        title: title.to_string(),
        who: format!(
            "{members} {} stores averaging {:.0} rack units",
            tier.as_str().to_lowercase(),
            avg_capacity
        ),
        why_grouped: format!(
            "Similar sales mix ({:.0}% fashion / {:.0}% basic), shared temperature band, and comparable capacity",
            fashion_ratio * 100.0,
            basic_ratio * 100.0
        ),
        business_value: value.to_string(),
        actions: actions.to_string(),
        success_metrics: "Sell-through rate, flagged-store rate, benchmark gap closure"
            .to_string(),
    }
}
