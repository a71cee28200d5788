//! Error types for kmzutm

use thiserror::Error;

/// Domain failures that abort a conversion run
#[derive(Error, Debug)]
pub enum KmzError {
    #[error("No KML found inside KMZ: {archive}")]
    NoKmlEntry { archive: String },

    #[error("XML error at position {position}: {source}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Unbalanced KML document: {0}")]
    UnbalancedXml(String),
}
