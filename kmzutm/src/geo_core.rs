use anyhow::{Context, Result};
use geo::{Coord, Point};
use proj::Proj;
use serde::Serialize;
use std::fmt;

/// EPSG code of WGS84, the CRS every KML coordinate is expressed in
pub const WGS84_EPSG: u32 = 4326;

/// Base struct for CRS handling
/// Holds the EPSG code a dataset is tagged with and where it gets written
#[derive(Clone, Debug)]
pub struct GeoCore {
    /// EPSG code of the dataset
    pub epsg: u32,
    /// Output directory for written datasets
    pub output_path: Option<String>,
}

impl GeoCore {
    /// Create a new GeoCore with EPSG
    pub fn new(epsg: u32) -> Self {
        GeoCore {
            epsg,
            output_path: None,
        }
    }

    /// GeoCore tagged with WGS84, the CRS of freshly parsed KML
    pub fn wgs84() -> Self {
        GeoCore::new(WGS84_EPSG)
    }

    /// Get output path
    pub fn get_output_path(&self) -> Option<&String> {
        self.output_path.as_ref()
    }

    /// Set output path
    pub fn set_output_path(&mut self, output_path: Option<String>) {
        self.output_path = output_path;
    }

    /// Build a reusable transformation from this CRS to `to_epsg`.
    /// Axis order is normalized, so inputs are always (x, y) = (lon, lat) for geographic CRSs.
    pub fn transformer_to(&self, to_epsg: u32) -> Result<Proj> {
        let from_crs = format!("EPSG:{}", self.epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        Proj::new_known_crs(&from_crs, &to_crs, None).with_context(|| {
            format!(
                "Failed to create Proj transformation {} -> {}",
                from_crs, to_crs
            )
        })
    }
}

/// Convert a single coordinate with an already built transformation
pub fn convert_coord(proj: &Proj, coord: Coord<f64>) -> Result<Coord<f64>, proj::ProjError> {
    let (x, y) = proj.convert((coord.x, coord.y))?;
    Ok(Coord { x, y })
}

/// A UTM zone with its hemisphere.
///
/// The zone is `floor((lon + 180) / 6) + 1`. Longitude is first wrapped into
/// [-180, 180), so the antimeridian (+180) lands in zone 1 together with -180.
/// Latitude 0 counts as northern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UtmZone {
    pub zone: u8,
    pub north: bool,
}

impl UtmZone {
    /// Resolve the zone containing (lon, lat). Returns None for non-finite input.
    pub fn from_lon_lat(lon: f64, lat: f64) -> Option<Self> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }

        let wrapped = (lon + 180.0).rem_euclid(360.0);
        let zone = ((wrapped / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;

        Some(UtmZone {
            zone,
            north: lat >= 0.0,
        })
    }

    /// Resolve the zone of a point expressed in WGS84
    pub fn from_point(point: Point<f64>) -> Option<Self> {
        Self::from_lon_lat(point.x(), point.y())
    }

    /// WGS84 / UTM EPSG code: 326xx in the north, 327xx in the south
    pub fn epsg(&self) -> u32 {
        let base = if self.north { 32600 } else { 32700 };
        base + self.zone as u32
    }
}

impl fmt::Display for UtmZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}
