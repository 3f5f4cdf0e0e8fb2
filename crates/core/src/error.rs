//! Error types for table initialization and the microphysics driver.
//!
//! Everything here is fatal at initialization: a driver cannot run without
//! valid lookup tables, so nothing is retried.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building lookup tables or marshaling driver state.
#[derive(Error, Debug)]
pub enum MicroError {
    #[error("Failed to read lookup table {}: {source}", path.display())]
    TableIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Bad {source_name}, expected VERSION X.Y.Z header, found '{found}'")]
    MissingVersionHeader { source_name: String, found: String },
    #[error("Bad {source_name}, expected version {expected}, but got {found}")]
    VersionMismatch {
        source_name: String,
        expected: String,
        found: String,
    },
    #[error("Bad {source_name}, data ended after {consumed} tokens")]
    UnexpectedEof { source_name: String, consumed: usize },
    #[error("Bad {source_name}, token {position} ('{token}') is not a number")]
    InvalidNumber {
        source_name: String,
        position: usize,
        token: String,
    },
    #[error("Rain tables are configured as precomputed but no provider was registered")]
    MissingRainProvider,
    #[error("Precomputed rain table '{table}' has {found} values, expected {expected}")]
    RainTableShape {
        table: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Unknown cloud fraction method '{0}', expected constant, in_cloud or max_overlap")]
    UnknownCloudFractionMethod(String),
    #[error("Field '{field}' has {found} values, expected {expected} for this grid")]
    GridMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Layer thickness dz for CRM {icrm} must be positive, got {dz}")]
    NonPositiveLayerThickness { icrm: usize, dz: f64 },
    #[error("Microphysics scheme '{scheme}' failed: {message}")]
    Scheme { scheme: String, message: String },
}

/// Convenience type for `Result<T, MicroError>`.
pub type MicroResult<T> = Result<T, MicroError>;
