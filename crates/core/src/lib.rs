//! P3 microphysics driver for cloud-resolving models
//!
//! Couples a cloud-resolving model's moisture and thermodynamic state to the
//! P3 (Predicted Particle Properties) bulk microphysics scheme:
//!
//! - lookup tables for rain fallspeeds and ice growth/collection, built once
//!   and shared read-only ([`tables`])
//! - a bisection saturation adjustment ([`saturation`])
//! - cloud and precipitation fraction strategies ([`cloud_fraction`])
//! - the driver that packs host state into columns, calls the scheme and
//!   writes results back ([`driver`], [`scheme`])
//!
//! The scheme's process rates are not part of this crate; they sit behind
//! the [`MicrophysicsScheme`] trait.

pub mod cloud_fraction;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod grid;
pub mod saturation;
pub mod scheme;
pub mod tables;
pub mod timing;

pub use cloud_fraction::{CloudFractionEstimator, CloudFractionMethod, CloudFractions, Condensate};
pub use config::MicroConfig;
pub use constants::Real;
pub use driver::{
    diagnose, CrmLocation, CrmState, LevelDiagnostics, LevelProfiles, MicroBudgets, MicroField,
    MicroFields, P3Driver,
};
pub use error::{MicroError, MicroResult};
pub use grid::{CellField, ColumnField, HostGrid, LevelField, SurfaceField};
pub use saturation::{compute_adjusted_state, AdjustedState, EvaporationNarrowing};
pub use scheme::{
    DiagnosticInputs, DiagnosticOutputs, HistoryOnly, Infrastructure, MicrophysicsScheme,
    NullScheme, PrognosticState,
};
pub use tables::{
    LookupTables, RainTableProvider, RainTableSource, RainTables, SharedTables, TableBuilder,
};
pub use timing::{StepStats, StepTimer};
