/// Default output directory for written shapefiles
pub const DEFAULT_OUTPUT_PATH: &str = "shapefiles_output";

/// Category of placemarks that are not inside any named folder
pub const DEFAULT_CATEGORY: &str = "Unknown";

/// Name given to placemarks without a <name> element
pub const UNNAMED_FEATURE: &str = "Unnamed";

/// Maximum field name length of the dBASE table behind a shapefile
pub const SHAPEFILE_FIELD_NAME_LIMIT: usize = 10;

/// GDAL driver used for output datasets
pub const OUTPUT_DRIVER: &str = "ESRI Shapefile";

/// File prefix of every output dataset
pub const OUTPUT_PREFIX: &str = "reference";
