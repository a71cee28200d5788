pub mod collect;
pub mod commons;
pub mod error;
pub mod geo_core;
pub mod geometric;

pub use error::KmzError;
pub use geo_core::UtmZone;
pub use geometric::kmz_converter::{KmzConverter, RunReport};
