use anyhow::Result;
use kmzutm::geometric::category::CategoryOutcome;
use kmzutm::KmzConverter;

/// Example: Splitting a KMZ into one UTM shapefile per folder
/// Usage: cargo run --example kmz_to_shapefiles -- path/to/2000.kmz
fn main() -> Result<()> {
    println!("=== Example: KMZ to UTM shapefiles ===\n");

    let kmz_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/2000.kmz".to_string());

    // Create converter, reference year 2000, output in ./output
    let mut converter = KmzConverter::new(&kmz_path, Some("./output".to_string()), 2000);
    converter.set_keep_kml(false);

    println!("Converting {}...", kmz_path);
    let report = converter.run()?;

    println!("\nFolders found: {:?}", report.folders);
    for category in &report.categories {
        match &category.outcome {
            CategoryOutcome::Saved { epsg, files } => {
                println!(
                    "  - {} ({} features) -> EPSG:{} {:?}",
                    category.category, category.features, epsg, files
                );
            }
            CategoryOutcome::Planned { .. } => {}
            CategoryOutcome::Skipped { reason } => {
                println!("  - {} skipped: {:?}", category.category, reason);
            }
        }
    }

    println!("\n✅ Processing complete!");
    println!("  - Output directory: {:?}", converter.get_output_path());

    Ok(())
}
