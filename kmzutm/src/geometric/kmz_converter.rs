use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::collect::global_variables::DEFAULT_OUTPUT_PATH;
use crate::collect::kmz::kmz_collect::KmzCollect;
use crate::geometric::category::{CategoryExporter, CategoryOutcome, CategoryReport};
use crate::geometric::kml::extract_features;

/// Converts a KMZ archive into one UTM shapefile per folder
pub struct KmzConverter {
    /// Path to the .kmz (or .kml) input
    input_path: PathBuf,
    /// Directory receiving the shapefiles
    output_path: PathBuf,
    /// Year used as output file prefix
    reference_year: i32,
    /// Keep the extracted KML next to the shapefiles
    keep_kml: bool,
    /// Only report what would be written
    dry_run: bool,
}

/// Summary of a conversion run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub reference_year: i32,
    pub output_path: PathBuf,
    /// Archive entry the KML came from, None for bare .kml input
    pub kml_entry: Option<String>,
    /// Folder names in document order
    pub folders: Vec<String>,
    pub categories: Vec<CategoryReport>,
}

impl RunReport {
    /// Every shapefile written during the run
    pub fn saved_files(&self) -> Vec<&PathBuf> {
        self.categories
            .iter()
            .filter_map(|c| match &c.outcome {
                CategoryOutcome::Saved { files, .. } => Some(files),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Number of categories that were skipped
    pub fn skipped(&self) -> usize {
        self.categories
            .iter()
            .filter(|c| matches!(c.outcome, CategoryOutcome::Skipped { .. }))
            .count()
    }

    /// Write the report as pretty JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
        Ok(())
    }
}

impl KmzConverter {
    /// Create a new converter; `output_path` defaults to `shapefiles_output`
    pub fn new<P: AsRef<Path>>(
        input_path: P,
        output_path: Option<String>,
        reference_year: i32,
    ) -> Self {
        let output_path = PathBuf::from(
            output_path
                .as_deref()
                .unwrap_or(DEFAULT_OUTPUT_PATH),
        );

        KmzConverter {
            input_path: input_path.as_ref().to_path_buf(),
            output_path,
            reference_year,
            keep_kml: false,
            dry_run: false,
        }
    }

    /// Keep the extracted KML in the output directory
    pub fn set_keep_kml(&mut self, keep_kml: bool) {
        self.keep_kml = keep_kml;
    }

    /// Plan the export without writing any file
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Directory receiving the shapefiles
    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }

    /// Run the conversion
    pub fn run(&self) -> Result<RunReport> {
        self.run_with_progress(|_, _, _| {})
    }

    /// Run the conversion, calling `on_category(done, total, report)` after each category
    pub fn run_with_progress<F>(&self, mut on_category: F) -> Result<RunReport>
    where
        F: FnMut(usize, usize, &CategoryReport),
    {
        let mut collect = KmzCollect::new(&self.input_path);
        if self.keep_kml && !self.dry_run {
            collect.set_keep_dir(Some(self.output_path.clone()));
        }
        collect.execute()?;

        let content = collect.get_content().context("No KML content was read")?;
        let categories = extract_features(content)
            .with_context(|| format!("Error processing KML file {:?}", self.input_path))?;
        info!("Found folders: {:?}", categories.names());
        debug!(
            "{} features in {} folders",
            categories.feature_count(),
            categories.len()
        );

        let mut exporter = CategoryExporter::new(&self.output_path, self.reference_year);
        exporter.dry_run = self.dry_run;

        let total = categories.len();
        let mut reports = Vec::with_capacity(total);
        for (idx, (name, features)) in categories.iter().enumerate() {
            let report = exporter.export(name, features)?;
            on_category(idx + 1, total, &report);
            reports.push(report);
        }

        Ok(RunReport {
            input: self.input_path.clone(),
            reference_year: self.reference_year,
            output_path: self.output_path.clone(),
            kml_entry: collect.kml_entry.clone(),
            folders: categories.names().to_vec(),
            categories: reports,
        })
    }
}
