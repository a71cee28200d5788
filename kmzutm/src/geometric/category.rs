use anyhow::{Context, Result};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldDefn, FieldValue, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType, ToGdal,
};
use gdal::DriverManager;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::collect::global_variables::OUTPUT_DRIVER;
use crate::commons::basic_functions::{output_stem, truncate_field_name};
use crate::geo_core::{GeoCore, UtmZone};
use crate::geometric::feature::{centroid_of_centroids, Feature, GeometryKind, KmlGeometry};

/// Attribute columns written for every feature, in order
pub const SOURCE_FIELDS: [&str; 2] = ["Name", "Description"];

/// Sidecar files of a shapefile, removed before it is rewritten
const SHAPEFILE_EXTENSIONS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

/// Why a category produced no output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The folder holds no feature
    Empty,
    /// No feature has a usable centroid, so no UTM zone can be chosen
    NoValidGeometry,
}

/// What happened to one category
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryOutcome {
    Saved { epsg: u32, files: Vec<PathBuf> },
    /// Dry run: what would have been written
    Planned { epsg: u32, files: Vec<PathBuf> },
    Skipped { reason: SkipReason },
}

/// Outcome of one category, as listed in the run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryReport {
    pub category: String,
    /// Features found in the folder
    pub features: usize,
    /// Features dropped for an unusable geometry
    pub dropped: usize,
    #[serde(flatten)]
    pub outcome: CategoryOutcome,
}

/// Output column: the attribute it comes from and its (possibly truncated) name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputField {
    pub source: &'static str,
    pub name: String,
}

/// Output column names, cut to the shapefile limit.
/// Each truncation is logged.
pub fn output_fields() -> Vec<OutputField> {
    SOURCE_FIELDS
        .iter()
        .map(|&source| match truncate_field_name(source) {
            Some(name) => {
                info!("Truncating field name '{}' to '{}'", source, name);
                OutputField { source, name }
            }
            None => OutputField {
                source,
                name: source.to_string(),
            },
        })
        .collect()
}

/// One shapefile to write: a single geometry kind of a category.
///
/// A shapefile holds one geometry type, so a category mixing Points and
/// Polygons gets two layers, `reference_{year}_{name}_points.shp` and
/// `reference_{year}_{name}_polygons.shp`. Single-kind categories keep the
/// plain `reference_{year}_{name}.shp`.
#[derive(Debug)]
pub struct LayerPlan<'a> {
    pub kind: GeometryKind,
    pub path: PathBuf,
    pub features: Vec<&'a Feature>,
}

/// Everything decided about a category before touching the disk
#[derive(Debug)]
pub struct CategoryPlan<'a> {
    pub zone: UtmZone,
    pub layers: Vec<LayerPlan<'a>>,
    pub dropped: usize,
}

impl CategoryPlan<'_> {
    /// Shapefile paths, one per layer
    pub fn files(&self) -> Vec<PathBuf> {
        self.layers.iter().map(|l| l.path.clone()).collect()
    }

    /// Features that will be written, dropped ones excluded
    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }
}

/// Writes each category as UTM shapefiles
pub struct CategoryExporter {
    /// CRS of the input features (WGS84) and output directory
    pub geo_core: GeoCore,
    /// Reference year used as file name prefix
    pub year: i32,
    /// Plan only, write nothing
    pub dry_run: bool,
}

impl CategoryExporter {
    /// Create an exporter writing into `output_path` with `year` as file prefix
    pub fn new<P: AsRef<Path>>(output_path: P, year: i32) -> Self {
        let mut geo_core = GeoCore::wgs84();
        geo_core.set_output_path(Some(output_path.as_ref().to_string_lossy().to_string()));
        CategoryExporter {
            geo_core,
            year,
            dry_run: false,
        }
    }

    /// Directory the shapefiles are written to
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.geo_core.get_output_path().cloned().unwrap_or_default())
    }

    /// Choose the UTM zone, split by geometry kind and name the output files.
    /// Returns Err(reason) when the category has to be skipped.
    pub fn plan<'a>(
        &self,
        category: &str,
        features: &'a [Feature],
    ) -> std::result::Result<CategoryPlan<'a>, SkipReason> {
        if features.is_empty() {
            return Err(SkipReason::Empty);
        }

        let valid: Vec<&Feature> = features
            .iter()
            .filter(|f| f.geometry.centroid().is_some())
            .collect();
        let dropped = features.len() - valid.len();

        let zone = centroid_of_centroids(valid.iter().copied())
            .and_then(UtmZone::from_point)
            .ok_or(SkipReason::NoValidGeometry)?;

        // Shapefiles hold a single geometry type
        let mut groups: Vec<(GeometryKind, Vec<&Feature>)> = Vec::new();
        for feature in valid {
            let kind = feature.geometry.kind();
            match groups.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, group)) => group.push(feature),
                None => groups.push((kind, vec![feature])),
            }
        }

        let stem = output_stem(self.year, category);
        let mixed = groups.len() > 1;
        let dir = self.output_dir();
        let layers = groups
            .into_iter()
            .map(|(kind, features)| {
                let name = match (mixed, kind) {
                    (false, _) => stem.clone(),
                    (true, GeometryKind::Point) => format!("{}_points", stem),
                    (true, GeometryKind::Polygon) => format!("{}_polygons", stem),
                };
                LayerPlan {
                    kind,
                    path: dir.join(format!("{}.shp", name)),
                    features,
                }
            })
            .collect();

        Ok(CategoryPlan {
            zone,
            layers,
            dropped,
        })
    }

    /// Export one category. Skips are reported, write failures are errors.
    pub fn export(&self, category: &str, features: &[Feature]) -> Result<CategoryReport> {
        let report = |dropped: usize, outcome: CategoryOutcome| CategoryReport {
            category: category.to_string(),
            features: features.len(),
            dropped,
            outcome,
        };

        if !features.is_empty() {
            info!("Category '{}': Found {} features", category, features.len());
        }

        let plan = match self.plan(category, features) {
            Ok(plan) => plan,
            Err(reason) => {
                match reason {
                    SkipReason::Empty => info!("Skipping empty category: {}", category),
                    SkipReason::NoValidGeometry => {
                        warn!("Skipping category with no valid geometries: {}", category)
                    }
                }
                return Ok(report(features.len(), CategoryOutcome::Skipped { reason }));
            }
        };

        if plan.dropped > 0 {
            warn!(
                "Category '{}': dropping {} features without a usable geometry",
                category, plan.dropped
            );
        }

        let epsg = plan.zone.epsg();
        if self.dry_run {
            info!(
                "Category '{}' would be written to {:?} ({})",
                category,
                plan.files(),
                plan.zone
            );
            return Ok(report(
                plan.dropped,
                CategoryOutcome::Planned {
                    epsg,
                    files: plan.files(),
                },
            ));
        }

        let dir = self.output_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

        let proj = self.geo_core.transformer_to(epsg)?;
        let fields = output_fields();
        for layer in &plan.layers {
            write_shapefile(&layer.path, epsg, &fields, &layer.features, |f| {
                f.geometry.reproject(&proj)
            })
            .with_context(|| format!("Failed to write category '{}'", category))?;
            info!(
                "Saved category '{}' with {} features → {:?} (CRS: {})",
                category,
                layer.features.len(),
                layer.path,
                plan.zone
            );
        }

        Ok(report(
            plan.dropped,
            CategoryOutcome::Saved {
                epsg,
                files: plan.files(),
            },
        ))
    }
}

/// Write features as an ESRI Shapefile tagged with `epsg`
fn write_shapefile<F>(
    path: &Path,
    epsg: u32,
    fields: &[OutputField],
    features: &[&Feature],
    reproject: F,
) -> Result<()>
where
    F: Fn(&Feature) -> Result<KmlGeometry>,
{
    remove_shapefile(path)?;

    let kind = features
        .first()
        .map(|f| f.geometry.kind())
        .context("Refusing to write an empty layer")?;
    let geom_type = match kind {
        GeometryKind::Point => OGRwkbGeometryType::wkbPoint,
        GeometryKind::Polygon => OGRwkbGeometryType::wkbPolygon,
    };

    let driver = DriverManager::get_driver_by_name(OUTPUT_DRIVER)
        .with_context(|| format!("{} driver not available", OUTPUT_DRIVER))?;
    let mut dataset = driver
        .create_vector_only(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    let srs = SpatialRef::from_epsg(epsg)
        .with_context(|| format!("Failed to create spatial reference EPSG:{}", epsg))?;
    let layer_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_string();
    let mut layer = dataset
        .create_layer(LayerOptions {
            name: &layer_name,
            srs: Some(&srs),
            ty: geom_type,
            options: None,
        })
        .context("Failed to create layer")?;

    for field in fields {
        let defn = FieldDefn::new(&field.name, OGRFieldType::OFTString)
            .with_context(|| format!("Failed to create {} field", field.name))?;
        defn.set_width(254);
        defn.add_to_layer(&layer)
            .with_context(|| format!("Failed to add {} field", field.name))?;
    }

    let field_names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    for feature in features {
        let geometry = reproject(*feature)?.to_geo();
        let gdal_geometry = geometry
            .to_gdal()
            .context("Failed to convert geometry to GDAL")?;

        let values: Vec<FieldValue> = fields
            .iter()
            .map(|field| {
                let value = match field.source {
                    "Name" => feature.name.clone(),
                    _ => feature.description.clone(),
                };
                FieldValue::StringValue(value)
            })
            .collect();

        layer
            .create_feature_fields(gdal_geometry, &field_names, &values)
            .with_context(|| format!("Failed to write feature '{}'", feature.name))?;
    }

    Ok(())
}

/// Remove a previous shapefile and its sidecars
fn remove_shapefile(path: &Path) -> Result<()> {
    for ext in SHAPEFILE_EXTENSIONS {
        let sidecar = path.with_extension(ext);
        if sidecar.exists() {
            fs::remove_file(&sidecar)
                .with_context(|| format!("Failed to remove existing file: {:?}", sidecar))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use geo::Point;

    fn point(name: &str, lon: f64, lat: f64) -> Feature {
        Feature {
            name: name.to_string(),
            description: String::new(),
            geometry: KmlGeometry::Point(Point::new(lon, lat)),
        }
    }

    fn square(name: &str, lon: f64, lat: f64) -> Feature {
        let ring = [
            (lon, lat),
            (lon + 0.01, lat),
            (lon + 0.01, lat + 0.01),
            (lon, lat + 0.01),
        ];
        Feature {
            name: name.to_string(),
            description: "a square".to_string(),
            geometry: KmlGeometry::polygon_from(&ring, &[]).unwrap(),
        }
    }

    #[test]
    fn test_output_fields_truncated() {
        let names: Vec<String> = output_fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Name", "Descriptio"]);
        assert!(names.iter().all(|n| n.len() <= 10));
    }

    #[test]
    fn test_plan_single_kind() {
        let exporter = CategoryExporter::new("out", 2000);
        let features = vec![point("a", 73.6, 34.5), point("b", 73.7, 34.6)];
        let plan = exporter.plan("Glacial Lakes", &features).unwrap();

        assert_eq!(plan.zone.epsg(), 32643);
        assert_eq!(plan.dropped, 0);
        assert_eq!(
            plan.files(),
            vec![PathBuf::from("out").join("reference_2000_glacial_lakes.shp")]
        );
        assert_eq!(plan.feature_count(), 2);
    }

    #[test]
    fn test_plan_mixed_kinds_split() {
        let exporter = CategoryExporter::new("out", 1990);
        let features = vec![
            square("poly", -70.0, -33.0),
            point("pt", -70.1, -33.1),
            square("poly2", -70.2, -33.2),
        ];
        let plan = exporter.plan("Lakes", &features).unwrap();

        assert_eq!(plan.zone.epsg(), 32719);
        assert_eq!(plan.layers.len(), 2);
        assert_eq!(plan.layers[0].kind, GeometryKind::Polygon);
        assert_eq!(plan.layers[0].features.len(), 2);
        assert!(plan.layers[0]
            .path
            .ends_with("reference_1990_lakes_polygons.shp"));
        assert!(plan.layers[1].path.ends_with("reference_1990_lakes_points.shp"));
    }

    #[test]
    fn test_plan_skips() {
        let exporter = CategoryExporter::new("out", 2000);
        assert_eq!(exporter.plan("Empty", &[]).unwrap_err(), SkipReason::Empty);

        let invalid = vec![
            point("nan", f64::NAN, 10.0),
            Feature {
                name: "flat".to_string(),
                description: String::new(),
                geometry: KmlGeometry::polygon_from(&[(1.0, 1.0), (2.0, 2.0)], &[]).unwrap(),
            },
        ];
        assert_eq!(
            exporter.plan("Broken", &invalid).unwrap_err(),
            SkipReason::NoValidGeometry
        );
    }

    #[test]
    fn test_plan_drops_invalid_features() {
        let exporter = CategoryExporter::new("out", 2000);
        let features = vec![point("ok", 10.0, 50.0), point("nan", f64::NAN, 50.0)];
        let plan = exporter.plan("Mixed", &features).unwrap();
        assert_eq!(plan.dropped, 1);
        assert_eq!(plan.feature_count(), 1);
    }

    #[test]
    fn test_plan_drops_out_of_range_coordinates() {
        let exporter = CategoryExporter::new("out", 2000);
        let features = vec![point("ok", 73.6, 34.5), point("polar", 10.0, 100.0)];
        let plan = exporter.plan("Lakes", &features).unwrap();
        assert_eq!(plan.zone.epsg(), 32643);
        assert_eq!(plan.dropped, 1);
        assert_eq!(plan.feature_count(), 1);

        let only_bad = vec![point("polar", 10.0, 100.0), point("east", 200.0, 10.0)];
        assert_eq!(
            exporter.plan("Polar", &only_bad).unwrap_err(),
            SkipReason::NoValidGeometry
        );
    }

    #[test]
    fn test_export_out_of_range_category_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let exporter = CategoryExporter::new(dir.path(), 2000);
        let features = vec![point("polar", 10.0, 100.0)];

        let report = exporter.export("Polar", &features).unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(
            report.outcome,
            CategoryOutcome::Skipped {
                reason: SkipReason::NoValidGeometry
            }
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_export_all_invalid_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let exporter = CategoryExporter::new(dir.path(), 2000);
        let features = vec![point("nan", f64::NAN, f64::NAN)];

        let report = exporter.export("Broken", &features).unwrap();

        assert_eq!(
            report.outcome,
            CategoryOutcome::Skipped {
                reason: SkipReason::NoValidGeometry
            }
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_export_dry_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut exporter = CategoryExporter::new(dir.path().join("never"), 2000);
        exporter.dry_run = true;

        let report = exporter
            .export("Lakes", &[point("a", 73.6, 34.5)])
            .unwrap();

        match report.outcome {
            CategoryOutcome::Planned { epsg, files } => {
                assert_eq!(epsg, 32643);
                assert_eq!(files.len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!dir.path().join("never").exists());
    }

    #[test]
    fn test_report_serializes() {
        let report = CategoryReport {
            category: "Lakes".to_string(),
            features: 3,
            dropped: 0,
            outcome: CategoryOutcome::Skipped {
                reason: SkipReason::Empty,
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "empty");
        assert_eq!(json["category"], "Lakes");
    }
}
