//! Positions, distances and the geolocation collaborator

use crate::error::{Result, TrackerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Earth diameter used by the haversine formula, in metres
pub const EARTH_DIAMETER_M: f64 = 12_742_000.0;

pub const ADDRESS_UNAVAILABLE: &str = "Endereço próximo à coordenada não disponível.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Cell lookups answer with out-of-range values when the tower is unknown
    pub fn is_plausible(&self) -> bool {
        self.latitude.abs() < 90.0 && self.longitude.abs() < 90.0
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let p = std::f64::consts::PI / 180.0;
        let a = 0.5 - ((other.latitude - self.latitude) * p).cos() / 2.0
            + (self.latitude * p).cos()
                * (other.latitude * p).cos()
                * (1.0 - ((other.longitude - self.longitude) * p).cos())
                / 2.0;
        EARTH_DIAMETER_M * a.sqrt().asin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTower {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
    pub cid: u32,
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn resolve_cell_tower(&self, tower: CellTower) -> Result<GeoPoint>;

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<String>;
}

/// Fails every lookup; fixes are stored with the fallback address
#[derive(Debug, Default)]
pub struct OfflineGeolocator;

#[async_trait]
impl Geolocator for OfflineGeolocator {
    async fn resolve_cell_tower(&self, tower: CellTower) -> Result<GeoPoint> {
        Err(TrackerError::geolocation(format!(
            "no cell database for {}/{}/{:X}/{:X}",
            tower.mcc, tower.mnc, tower.lac, tower.cid
        )))
    }

    async fn reverse_geocode(&self, _point: GeoPoint) -> Result<String> {
        Err(TrackerError::geolocation("no geocoding service"))
    }
}

/// NMEA `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed degrees
pub fn parse_nmea_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    let decimal = degrees + minutes / 60.0;
    match hemisphere.trim().to_ascii_uppercase().as_str() {
        "S" | "W" => Some(-decimal),
        "N" | "E" => Some(decimal),
        _ => None,
    }
}

/// Brazilian network code from the operator name stored on the device
pub fn mnc_for_operator(operator: &str) -> Option<u16> {
    let operator = operator.trim().to_lowercase();
    if operator.contains("vivo") {
        Some(6)
    } else if operator.contains("claro") {
        Some(5)
    } else if operator.contains("tim") {
        Some(2)
    } else if operator == "oi" || operator.starts_with("oi ") || operator.contains("brasil telecom")
    {
        Some(31)
    } else if operator.contains("nextel") {
        Some(39)
    } else {
        operator.parse().ok()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_distance_threshold_scale() {
        let a = GeoPoint::new(-20.4697, -54.6201);
        assert!(a.distance_m(&a) < 0.001);
        // 0.001 degree of latitude is about 111 m
        let b = GeoPoint::new(-20.4707, -54.6201);
        let d = a.distance_m(&b);
        assert!((105.0..118.0).contains(&d), "distance {}", d);
        let c = GeoPoint::new(-20.4699, -54.6201);
        assert!(a.distance_m(&c) < 50.0);
    }

    #[test]
    fn test_parse_nmea_coordinate() {
        let lat = parse_nmea_coordinate("2234.4669", "N").unwrap();
        assert!((lat - 22.574448).abs() < 1e-5);
        let lon = parse_nmea_coordinate("05437.2060", "W").unwrap();
        assert!((lon + 54.62010).abs() < 1e-5);
        assert!(parse_nmea_coordinate("2270.0", "N").is_none());
        assert!(parse_nmea_coordinate("abc", "N").is_none());
        assert!(parse_nmea_coordinate("2234.4669", "X").is_none());
    }

    #[test]
    fn test_mnc_for_operator() {
        assert_eq!(mnc_for_operator("VIVO"), Some(6));
        assert_eq!(mnc_for_operator("TIM BRASIL"), Some(2));
        assert_eq!(mnc_for_operator("Oi"), Some(31));
        assert_eq!(mnc_for_operator("10"), Some(10));
        assert_eq!(mnc_for_operator("unknown"), None);
    }

    #[test]
    fn test_plausibility() {
        assert!(GeoPoint::new(-20.0, -54.0).is_plausible());
        assert!(!GeoPoint::new(90.0, 0.0).is_plausible());
    }
}
