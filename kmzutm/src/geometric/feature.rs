use anyhow::{Context, Result};
use geo::{Centroid, Coord, LineString, MultiPoint, Point, Polygon};
use proj::Proj;
use serde::Serialize;
use std::collections::HashMap;

use crate::geo_core::convert_coord;

/// Geometry kinds a placemark can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeometryKind {
    Point,
    Polygon,
}

/// Geometry of a placemark, in WGS84 until reprojected
#[derive(Debug, Clone, PartialEq)]
pub enum KmlGeometry {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
}

impl KmlGeometry {
    /// Point at the first coordinate pair. None when there are no pairs.
    pub fn point_from(coords: &[(f64, f64)]) -> Option<Self> {
        coords
            .first()
            .map(|&(lon, lat)| KmlGeometry::Point(Point::new(lon, lat)))
    }

    /// Polygon from an outer ring and optional holes. None when the outer ring is empty.
    pub fn polygon_from(exterior: &[(f64, f64)], interiors: &[Vec<(f64, f64)>]) -> Option<Self> {
        if exterior.is_empty() {
            return None;
        }
        let holes = interiors
            .iter()
            .filter(|ring| !ring.is_empty())
            .map(|ring| LineString::from(ring.clone()))
            .collect();
        Some(KmlGeometry::Polygon(Polygon::new(
            LineString::from(exterior.to_vec()),
            holes,
        )))
    }

    /// Kind of the geometry, which decides the shapefile layer it lands in
    pub fn kind(&self) -> GeometryKind {
        match self {
            KmlGeometry::Point(_) => GeometryKind::Point,
            KmlGeometry::Polygon(_) => GeometryKind::Polygon,
        }
    }

    /// Centroid of a usable geometry.
    /// None when a coordinate is outside the WGS84 range (or not finite) or
    /// when the outer ring has fewer than three distinct positions.
    pub fn centroid(&self) -> Option<Point<f64>> {
        match self {
            KmlGeometry::Point(p) => in_wgs84_range(&p.0).then_some(*p),
            KmlGeometry::Polygon(poly) => {
                let all_in_range = std::iter::once(poly.exterior())
                    .chain(poly.interiors())
                    .flat_map(|ring| ring.coords())
                    .all(in_wgs84_range);
                if !all_in_range {
                    return None;
                }

                let mut distinct: Vec<&Coord<f64>> = Vec::new();
                for c in poly.exterior().coords() {
                    if !distinct.contains(&c) {
                        distinct.push(c);
                    }
                }
                if distinct.len() < 3 {
                    return None;
                }

                poly.centroid()
            }
        }
    }

    /// Reproject every coordinate with an already built transformation
    pub fn reproject(&self, proj: &Proj) -> Result<KmlGeometry> {
        match self {
            KmlGeometry::Point(p) => {
                let c = convert_coord(proj, p.0).context("Failed to reproject point")?;
                Ok(KmlGeometry::Point(Point(c)))
            }
            KmlGeometry::Polygon(poly) => {
                let exterior = reproject_ring(proj, poly.exterior())?;
                let interiors = poly
                    .interiors()
                    .iter()
                    .map(|ring| reproject_ring(proj, ring))
                    .collect::<Result<Vec<_>>>()?;
                Ok(KmlGeometry::Polygon(Polygon::new(exterior, interiors)))
            }
        }
    }

    /// Convert into a plain `geo` geometry, as expected by the GDAL writer
    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            KmlGeometry::Point(p) => geo::Geometry::Point(*p),
            KmlGeometry::Polygon(poly) => geo::Geometry::Polygon(poly.clone()),
        }
    }
}

/// Longitude in [-180, 180] and latitude in [-90, 90]; NaN fails both
fn in_wgs84_range(c: &Coord<f64>) -> bool {
    (-180.0..=180.0).contains(&c.x) && (-90.0..=90.0).contains(&c.y)
}

fn reproject_ring(proj: &Proj, ring: &LineString<f64>) -> Result<LineString<f64>> {
    let coords = ring
        .coords()
        .map(|c| convert_coord(proj, *c))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to reproject polygon ring")?;
    Ok(LineString::from(coords))
}

/// A placemark turned into a feature
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub geometry: KmlGeometry,
}

/// Mean of the centroids of every usable geometry, or None if there is none
pub fn centroid_of_centroids<'a, I>(features: I) -> Option<Point<f64>>
where
    I: IntoIterator<Item = &'a Feature>,
{
    let centroids: Vec<Point<f64>> = features
        .into_iter()
        .filter_map(|f| f.geometry.centroid())
        .collect();
    if centroids.is_empty() {
        return None;
    }
    MultiPoint::from(centroids).centroid()
}

/// Features grouped by folder name.
/// Categories keep the order in which their name first appeared; a name seen
/// again (at any depth) appends to the existing bucket.
#[derive(Debug, Default)]
pub struct Categories {
    order: Vec<String>,
    buckets: HashMap<String, Vec<Feature>>,
}

impl Categories {
    /// Create an empty set of categories
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a feature to `category`, creating the bucket on first use
    pub fn push(&mut self, category: &str, feature: Feature) {
        match self.buckets.get_mut(category) {
            Some(bucket) => bucket.push(feature),
            None => {
                self.order.push(category.to_string());
                self.buckets.insert(category.to_string(), vec![feature]);
            }
        }
    }

    /// Features of a category, None when the name was never seen
    pub fn get(&self, category: &str) -> Option<&[Feature]> {
        self.buckets.get(category).map(|v| v.as_slice())
    }

    /// Category names in document order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Number of categories
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no feature was collected
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total number of features over every category
    pub fn feature_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Iterate (name, features) in document order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Feature])> {
        self.order.iter().map(move |name| {
            let features = self
                .buckets
                .get(name)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            (name.as_str(), features)
        })
    }
}
