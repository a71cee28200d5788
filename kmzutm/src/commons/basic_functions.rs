use crate::collect::global_variables::{OUTPUT_PREFIX, SHAPEFILE_FIELD_NAME_LIMIT};

/// Make a category name usable inside a file name:
/// lowercase, with spaces and path separators replaced by `_`
pub fn sanitize_category_name(category: &str) -> String {
    category
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// File stem of the dataset written for a category: `reference_{year}_{category}`
pub fn output_stem(year: i32, category: &str) -> String {
    format!(
        "{}_{}_{}",
        OUTPUT_PREFIX,
        year,
        sanitize_category_name(category)
    )
}

/// Cut a field name down to the shapefile limit.
/// Returns None when the name already fits.
pub fn truncate_field_name(name: &str) -> Option<String> {
    if name.chars().count() <= SHAPEFILE_FIELD_NAME_LIMIT {
        return None;
    }
    Some(name.chars().take(SHAPEFILE_FIELD_NAME_LIMIT).collect())
}
