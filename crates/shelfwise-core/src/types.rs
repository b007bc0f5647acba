//! Core entities shared across pipeline components.
//!
//! Stores, SPUs, sales facts, and weather samples are materialized once per
//! run by the input collaborators and consumed read-only afterwards. Legacy
//! free-form tag strings ("夏 | 前台 | 男") exist only at the external
//! boundary; internally every tag is a typed enum.

use crate::error::{PipelineError, Result};
use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store size classification from the master-data collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Small => "Small",
            SizeTier::Medium => "Medium",
            SizeTier::Large => "Large",
        }
    }
}

impl FromStr for SizeTier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "small" | "s" => Ok(SizeTier::Small),
            "medium" | "m" => Ok(SizeTier::Medium),
            "large" | "l" => Ok(SizeTier::Large),
            _ => Err(PipelineError::InputError {
                table: "store_config".to_string(),
                column: format!("unknown size tier '{s}'"),
            }),
        }
    }
}

/// Merchandising orientation of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreStyle {
    Fashion,
    Basic,
    Balanced,
}

impl StoreStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStyle::Fashion => "Fashion",
            StoreStyle::Basic => "Basic",
            StoreStyle::Balanced => "Balanced",
        }
    }
}

impl FromStr for StoreStyle {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fashion" => Ok(StoreStyle::Fashion),
            "basic" => Ok(StoreStyle::Basic),
            "balanced" | "mixed" => Ok(StoreStyle::Balanced),
            _ => Err(PipelineError::InputError {
                table: "store_config".to_string(),
                column: format!("unknown store style '{s}'"),
            }),
        }
    }
}

/// Merchandising orientation of an SPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpuStyle {
    Fashion,
    Basic,
}

impl SpuStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpuStyle::Fashion => "Fashion",
            SpuStyle::Basic => "Basic",
        }
    }

    /// Whether this SPU orientation matches a store's orientation.
    pub fn aligned_with(&self, store: StoreStyle) -> bool {
        matches!(
            (self, store),
            (SpuStyle::Fashion, StoreStyle::Fashion) | (SpuStyle::Basic, StoreStyle::Basic)
        )
    }
}

/// Price bucket, derived from unit price via configurable boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriceBand {
    Economy,
    Value,
    Standard,
    Premium,
    Luxury,
}

impl PriceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceBand::Economy => "Economy",
            PriceBand::Value => "Value",
            PriceBand::Standard => "Standard",
            PriceBand::Premium => "Premium",
            PriceBand::Luxury => "Luxury",
        }
    }
}

/// Product lifecycle class, derived from observed sell-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductRole {
    /// Sell-through >= 80%
    Core,
    /// Sell-through 40-80%
    Seasonal,
    /// Sell-through 20-40%
    Filler,
    /// Sell-through < 20%
    Clearance,
}

impl ProductRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductRole::Core => "Core",
            ProductRole::Seasonal => "Seasonal",
            ProductRole::Filler => "Filler",
            ProductRole::Clearance => "Clearance",
        }
    }
}

/// Selling season tag. The legacy boundary writes these as 春/夏/秋/冬/四季.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
    AllSeason,
}

impl Season {
    pub fn legacy_str(&self) -> &'static str {
        match self {
            Season::Spring => "春",
            Season::Summer => "夏",
            Season::Autumn => "秋",
            Season::Winter => "冬",
            Season::AllSeason => "四季",
        }
    }
}

impl FromStr for Season {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "春" | "spring" => Ok(Season::Spring),
            "夏" | "summer" => Ok(Season::Summer),
            "秋" | "autumn" | "fall" => Ok(Season::Autumn),
            "冬" | "winter" => Ok(Season::Winter),
            "四季" | "all" | "all-season" => Ok(Season::AllSeason),
            _ => Err(PipelineError::InputError {
                table: "spu".to_string(),
                column: format!("unknown season tag '{s}'"),
            }),
        }
    }
}

/// Target gender tag. The legacy boundary writes 男/女/中性.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Men,
    Women,
    Unisex,
}

impl Gender {
    pub fn legacy_str(&self) -> &'static str {
        match self {
            Gender::Men => "男",
            Gender::Women => "女",
            Gender::Unisex => "中性",
        }
    }
}

impl FromStr for Gender {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "男" | "men" | "male" => Ok(Gender::Men),
            "女" | "women" | "female" => Ok(Gender::Women),
            "中性" | "unisex" => Ok(Gender::Unisex),
            _ => Err(PipelineError::InputError {
                table: "spu".to_string(),
                column: format!("unknown gender tag '{s}'"),
            }),
        }
    }
}

/// In-store display location tag. The legacy boundary writes 前台/中场/后场.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayLocation {
    Front,
    Middle,
    Back,
}

impl DisplayLocation {
    pub fn legacy_str(&self) -> &'static str {
        match self {
            DisplayLocation::Front => "前台",
            DisplayLocation::Middle => "中场",
            DisplayLocation::Back => "后场",
        }
    }
}

impl FromStr for DisplayLocation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "前台" | "front" => Ok(DisplayLocation::Front),
            "中场" | "middle" => Ok(DisplayLocation::Middle),
            "后场" | "back" => Ok(DisplayLocation::Back),
            _ => Err(PipelineError::InputError {
                table: "spu".to_string(),
                column: format!("unknown display location tag '{s}'"),
            }),
        }
    }
}

/// Typed replacement for the legacy pipe-joined tag string.
///
/// Fields are optional because upstream data leaves tags blank for some SPUs;
/// a missing tag is not an input error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleTags {
    pub season: Option<Season>,
    pub location: Option<DisplayLocation>,
    pub gender: Option<Gender>,
}

impl StyleTags {
    pub fn new(
        season: Option<Season>,
        location: Option<DisplayLocation>,
        gender: Option<Gender>,
    ) -> Self {
        Self {
            season,
            location,
            gender,
        }
    }

    /// Parse the legacy "夏 | 前台 | 男" form. Unrecognized segments are
    /// dropped rather than rejected; segment order does not matter.
    pub fn parse_legacy(s: &str) -> Self {
        let mut tags = StyleTags::default();
        for part in s.split('|') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(season) = part.parse::<Season>() {
                tags.season = Some(season);
            } else if let Ok(location) = part.parse::<DisplayLocation>() {
                tags.location = Some(location);
            } else if let Ok(gender) = part.parse::<Gender>() {
                tags.gender = Some(gender);
            }
        }
        tags
    }

    /// Render the legacy pipe-joined form for the external boundary.
    pub fn legacy_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(season) = self.season {
            parts.push(season.legacy_str());
        }
        if let Some(location) = self.location {
            parts.push(location.legacy_str());
        }
        if let Some(gender) = self.gender {
            parts.push(gender.legacy_str());
        }
        parts.join(" | ")
    }
}

impl fmt::Display for StyleTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.legacy_string())
    }
}

/// A retail store with geographic and merchandising attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub store_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level, used for the lapse-rate temperature correction.
    pub elevation: f64,
    pub size_tier: SizeTier,
    pub style: StoreStyle,
    /// Estimated rack capacity in units.
    pub rack_capacity: u32,
}

/// A stock-keeping planning unit (coarser than SKU).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spu {
    pub spu_id: String,
    pub category: String,
    pub subcategory: String,
    pub tags: StyleTags,
    pub style: SpuStyle,
    /// Unit list price; the price band is derived from this.
    pub price: f64,
}

/// One sales observation, keyed by (store, SPU, period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesFact {
    pub store_id: String,
    pub spu_id: String,
    pub period: Period,
    pub sales_amt: f64,
    pub sales_qty: f64,
    /// Units currently allocated to the store for this SPU.
    pub stock_qty: f64,
}

/// One hourly weather observation for a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSample {
    pub store_id: String,
    pub timestamp: DateTime<Utc>,
    /// Air temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent (0-100).
    pub humidity: f64,
    /// Wind speed in km/h.
    pub wind_speed: f64,
    /// Pressure in hPa.
    pub pressure: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_tag_round_trip() {
        let tags = StyleTags::parse_legacy("夏 | 前台 | 男");
        assert_eq!(tags.season, Some(Season::Summer));
        assert_eq!(tags.location, Some(DisplayLocation::Front));
        assert_eq!(tags.gender, Some(Gender::Men));
        assert_eq!(tags.legacy_string(), "夏 | 前台 | 男");
    }

    #[test]
    fn test_legacy_tag_partial_and_unknown_segments() {
        let tags = StyleTags::parse_legacy("四季 | ??? | 女");
        assert_eq!(tags.season, Some(Season::AllSeason));
        assert_eq!(tags.location, None);
        assert_eq!(tags.gender, Some(Gender::Women));

        let empty = StyleTags::parse_legacy("");
        assert_eq!(empty, StyleTags::default());
        assert_eq!(empty.legacy_string(), "");
    }

    #[test]
    fn test_spu_style_alignment() {
        assert!(SpuStyle::Fashion.aligned_with(StoreStyle::Fashion));
        assert!(!SpuStyle::Fashion.aligned_with(StoreStyle::Basic));
        assert!(!SpuStyle::Basic.aligned_with(StoreStyle::Balanced));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("large".parse::<SizeTier>().unwrap(), SizeTier::Large);
        assert_eq!("秋".parse::<Season>().unwrap(), Season::Autumn);
        assert!("xl".parse::<SizeTier>().is_err());
    }
}
