//! Feels-like temperature and per-store weather profiles.
//!
//! Apparent temperature combines wind chill (cold side), heat index (hot
//! side), and a lapse-rate elevation correction. Each store's hourly history
//! reduces to a [`StoreWeatherProfile`] carrying the 5°C temperature band
//! that later acts as a hard clustering constraint.

use crate::error::{PipelineError, Result};
use crate::types::{Store, WeatherSample};
use chrono::Datelike;
use std::collections::BTreeSet;

/// Temperature classification of a single feels-like reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempClass {
    /// >= 25°C
    Hot,
    /// 15-25°C
    Moderate,
    /// 10-15°C
    Cool,
    /// <= 10°C
    Cold,
}

impl TempClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempClass::Hot => "Hot",
            TempClass::Moderate => "Moderate",
            TempClass::Cool => "Cool",
            TempClass::Cold => "Cold",
        }
    }
}

/// Classify a feels-like temperature in degrees Celsius.
pub fn classify_temperature(feels_like: f64) -> TempClass {
    if feels_like >= 25.0 {
        TempClass::Hot
    } else if feels_like >= 15.0 {
        TempClass::Moderate
    } else if feels_like > 10.0 {
        TempClass::Cool
    } else {
        TempClass::Cold
    }
}

/// A fixed-width feels-like temperature band, identified by its index:
/// band `i` covers `[i * width, (i + 1) * width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempBand {
    pub index: i32,
}

impl TempBand {
    /// The band containing `feels_like` for the given width.
    pub fn containing(feels_like: f64, width: f64) -> TempBand {
        TempBand {
            index: (feels_like / width).floor() as i32,
        }
    }

    /// Lower bound in degrees Celsius.
    pub fn lower(&self, width: f64) -> f64 {
        self.index as f64 * width
    }

    /// Render as the half-open interval, e.g. `[10,15)`.
    pub fn label(&self, width: f64) -> String {
        format!("[{},{})", self.lower(width), self.lower(width) + width)
    }
}

/// Derived weather summary for one store.
#[derive(Debug, Clone)]
pub struct StoreWeatherProfile {
    pub store_id: String,
    pub avg_feels_like: f64,
    pub min_feels_like: f64,
    pub max_feels_like: f64,
    pub hours_cold: usize,
    pub hours_cool: usize,
    pub hours_moderate: usize,
    pub hours_hot: usize,
    /// Band containing the average feels-like temperature.
    pub temperature_band: TempBand,
    /// Band over September-November hours only; None when no such hours exist.
    pub temperature_band_q3q4: Option<TempBand>,
    /// Distinct observation days backing this profile.
    pub days_observed: usize,
}

impl StoreWeatherProfile {
    /// Dominant classification of the store's average conditions.
    pub fn temp_class(&self) -> TempClass {
        classify_temperature(self.avg_feels_like)
    }
}

/// Apparent temperature for one observation.
///
/// Wind chill applies at or below 10°C with wind above 4.8 km/h; the Rothfusz
/// heat index applies at or above 27°C; in between the air temperature stands.
pub fn apparent_temperature(temp_c: f64, humidity_pct: f64, wind_kmh: f64) -> f64 {
    if temp_c <= 10.0 {
        if wind_kmh > 4.8 {
            wind_chill(temp_c, wind_kmh)
        } else {
            temp_c
        }
    } else if temp_c >= 27.0 {
        heat_index(temp_c, humidity_pct)
    } else {
        temp_c
    }
}

/// Metric wind chill formula (Environment Canada).
fn wind_chill(temp_c: f64, wind_kmh: f64) -> f64 {
    let v = wind_kmh.powf(0.16);
    13.12 + 0.6215 * temp_c - 11.37 * v + 0.3965 * temp_c * v
}

/// Rothfusz heat index regression, computed in Fahrenheit.
fn heat_index(temp_c: f64, humidity_pct: f64) -> f64 {
    let t = temp_c * 9.0 / 5.0 + 32.0;
    let r = humidity_pct.clamp(0.0, 100.0);
    let hi = -42.379 + 2.04901523 * t + 10.14333127 * r
        - 0.22475541 * t * r
        - 6.83783e-3 * t * t
        - 5.481717e-2 * r * r
        + 1.22874e-3 * t * t * r
        + 8.5282e-4 * t * r * r
        - 1.99e-6 * t * t * r * r;
    (hi - 32.0) * 5.0 / 9.0
}

/// Lapse-rate elevation correction in degrees Celsius.
fn elevation_correction(elevation_m: f64) -> f64 {
    -0.0065 * elevation_m
}

/// Reduce a store's hourly samples to its weather profile.
///
/// Fails with `InsufficientData` when fewer than `min_days` distinct
/// observation days are present; the caller drops the store and continues.
pub fn compute_feels_like(
    store: &Store,
    samples: &[WeatherSample],
    band_width: f64,
    min_days: usize,
) -> Result<StoreWeatherProfile> {
    let days: BTreeSet<_> = samples.iter().map(|s| s.timestamp.date_naive()).collect();
    if days.len() < min_days {
        return Err(PipelineError::InsufficientData {
            entity: format!("weather for store {}", store.store_id),
            needed: min_days,
            got: days.len(),
        });
    }

    let correction = elevation_correction(store.elevation);
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut hours = [0usize; 4];
    let mut seasonal_sum = 0.0;
    let mut seasonal_count = 0usize;

    for sample in samples {
        let feels =
            apparent_temperature(sample.temperature, sample.humidity, sample.wind_speed)
                + correction;
        sum += feels;
        min = min.min(feels);
        max = max.max(feels);
        match classify_temperature(feels) {
            TempClass::Cold => hours[0] += 1,
            TempClass::Cool => hours[1] += 1,
            TempClass::Moderate => hours[2] += 1,
            TempClass::Hot => hours[3] += 1,
        }
        if (9..=11).contains(&sample.timestamp.month()) {
            seasonal_sum += feels;
            seasonal_count += 1;
        }
    }

    let avg = sum / samples.len() as f64;
    let seasonal_band = if seasonal_count > 0 {
        Some(TempBand::containing(
            seasonal_sum / seasonal_count as f64,
            band_width,
        ))
    } else {
        None
    };

    Ok(StoreWeatherProfile {
        store_id: store.store_id.clone(),
        avg_feels_like: avg,
        min_feels_like: min,
        max_feels_like: max,
        hours_cold: hours[0],
        hours_cool: hours[1],
        hours_moderate: hours[2],
        hours_hot: hours[3],
        temperature_band: TempBand::containing(avg, band_width),
        temperature_band_q3q4: seasonal_band,
        days_observed: days.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn store(id: &str, elevation: f64) -> Store {
        Store {
            store_id: id.to_string(),
            latitude: 30.0,
            longitude: 114.0,
            elevation,
            size_tier: crate::types::SizeTier::Medium,
            style: crate::types::StoreStyle::Balanced,
            rack_capacity: 300,
        }
    }

    fn sample(store_id: &str, day: u32, hour: u32, temp: f64) -> WeatherSample {
        WeatherSample {
            store_id: store_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap(),
            temperature: temp,
            humidity: 50.0,
            wind_speed: 0.0,
            pressure: 1013.0,
        }
    }

    #[test]
    fn test_wind_chill_reference_value() {
        // Environment Canada table: -5°C at 20 km/h feels like about -12°C.
        let wc = apparent_temperature(-5.0, 50.0, 20.0);
        assert_relative_eq!(wc, -11.6, epsilon = 0.5);
    }

    #[test]
    fn test_heat_index_reference_value() {
        // NWS table: 32°C (90°F) at 70% RH is about 41°C (105°F).
        let hi = apparent_temperature(32.0, 70.0, 0.0);
        assert_relative_eq!(hi, 40.6, epsilon = 0.5);
    }

    #[test]
    fn test_identity_in_moderate_range() {
        assert_relative_eq!(apparent_temperature(18.0, 60.0, 15.0), 18.0);
    }

    #[test]
    fn test_calm_cold_air_uncorrected() {
        // Wind chill is undefined below 4.8 km/h.
        assert_relative_eq!(apparent_temperature(5.0, 50.0, 3.0), 5.0);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify_temperature(25.0), TempClass::Hot);
        assert_eq!(classify_temperature(24.9), TempClass::Moderate);
        assert_eq!(classify_temperature(15.0), TempClass::Moderate);
        assert_eq!(classify_temperature(14.9), TempClass::Cool);
        assert_eq!(classify_temperature(10.1), TempClass::Cool);
        assert_eq!(classify_temperature(10.0), TempClass::Cold);
    }

    #[test]
    fn test_band_containment() {
        // Scenario: avg feels-like {8.0, 9.9, 10.0, 14.9, 15.0, 21.0} must
        // land in [5,10) [5,10) [10,15) [10,15) [15,20) [20,25).
        let bands: Vec<i32> = [8.0, 9.9, 10.0, 14.9, 15.0, 21.0]
            .iter()
            .map(|t| TempBand::containing(*t, 5.0).index)
            .collect();
        assert_eq!(bands, vec![1, 1, 2, 2, 3, 4]);
        assert_eq!(TempBand { index: 2 }.label(5.0), "[10,15)");
    }

    #[test]
    fn test_elevation_correction_shifts_band() {
        // 1000 m of elevation cools the profile by 6.5°C.
        let s = store("S1", 1000.0);
        let samples: Vec<_> = (1..=30).map(|d| sample("S1", d, 12, 18.0)).collect();
        let profile = compute_feels_like(&s, &samples, 5.0, 30).unwrap();
        assert_relative_eq!(profile.avg_feels_like, 11.5, epsilon = 1e-9);
        assert_eq!(profile.temperature_band.index, 2);
    }

    #[test]
    fn test_thirty_day_boundary() {
        let s = store("S1", 0.0);
        let exactly: Vec<_> = (1..=30).map(|d| sample("S1", d, 12, 20.0)).collect();
        assert!(compute_feels_like(&s, &exactly, 5.0, 30).is_ok());

        let short: Vec<_> = (1..=29).map(|d| sample("S1", d, 12, 20.0)).collect();
        let err = compute_feels_like(&s, &short, 5.0, 30).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData { needed: 30, got: 29, .. }
        ));
    }

    #[test]
    fn test_seasonal_band_only_from_autumn_hours() {
        let s = store("S1", 0.0);
        let mut samples: Vec<_> = (1..=30).map(|d| sample("S1", d, 12, 28.0)).collect();
        // Add cooler September observations.
        for d in 1..=10 {
            let mut w = sample("S1", d, 12, 12.0);
            w.timestamp = Utc.with_ymd_and_hms(2024, 9, d, 12, 0, 0).unwrap();
            samples.push(w);
        }
        let profile = compute_feels_like(&s, &samples, 5.0, 30).unwrap();
        let q3q4 = profile.temperature_band_q3q4.unwrap();
        assert_eq!(q3q4.index, 2); // 12°C -> [10,15)
        assert!(profile.temperature_band.index > q3q4.index);
    }

    #[test]
    fn test_hour_counters() {
        let s = store("S1", 0.0);
        let mut samples: Vec<_> = (1..=30).map(|d| sample("S1", d, 12, 30.0)).collect();
        samples.push(sample("S1", 1, 2, 5.0));
        samples.push(sample("S1", 2, 2, 12.0));
        let profile = compute_feels_like(&s, &samples, 5.0, 30).unwrap();
        assert_eq!(profile.hours_cold, 1);
        assert_eq!(profile.hours_cool, 1);
        assert_eq!(profile.hours_hot, 30);
    }
}
