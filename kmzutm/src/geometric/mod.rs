pub mod category;
pub mod feature;
pub mod kml;
pub mod kmz_converter;
