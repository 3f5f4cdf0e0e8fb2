//! Microphysics lookup tables
//!
//! Tables are built once, before the first microphysics step, and never
//! change afterwards. [`TableBuilder::build`] returns them behind an `Arc`
//! so the driver and any scheme threads can read them without locking.
//!
//! # Example
//!
//! ```rust,ignore
//! use crm_p3_core::{MicroConfig, TableBuilder};
//!
//! let config = MicroConfig::default().with_lookup_base("/data/p3_lookup_table_1.dat-v");
//! let tables = TableBuilder::new(&config).build()?;
//! let vn = tables.rain.fallspeed.get(120, 3).vn;
//! ```

pub mod ice;
pub mod rain;

pub use ice::{IceCollectionTable, IceGrowthTable, IceTables};
pub use rain::{
    rain_fallspeed, RainFallspeedEntry, RainFallspeedTable, RainTableProvider, RainTables,
    ShapeParameterTable,
};

use crate::config::MicroConfig;
use crate::constants::{Real, DNU_SIZE};
use crate::error::{MicroError, MicroResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Where the rain fallspeed tables come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RainTableSource {
    /// Take tables from a registered [`RainTableProvider`]
    #[default]
    Precomputed,
    /// Integrate the size distribution in-process
    Integrate,
}

/// Cloud droplet distribution width adjustment (`dnu`)
const DNU_VALUES: [Real; DNU_SIZE] = [
    0.000, -0.557, -0.430, -0.307, -0.186, -0.067, -0.050, -0.167, -0.282, -0.397, -0.512, -0.626,
    -0.739, -0.853, -0.966, -0.966,
];

/// Droplet distribution width table
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionWidthTable([Real; DNU_SIZE]);

impl DistributionWidthTable {
    /// Entry `i`
    #[must_use]
    pub fn get(&self, i: usize) -> Real {
        self.0[i]
    }

    /// All entries
    #[must_use]
    pub fn as_slice(&self) -> &[Real] {
        &self.0
    }
}

impl Default for DistributionWidthTable {
    fn default() -> Self {
        Self(DNU_VALUES)
    }
}

/// Every table the microphysics scheme reads.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTables {
    /// Rain shape parameter and fallspeed tables
    pub rain: RainTables,
    /// Droplet distribution width adjustments
    pub dnu: DistributionWidthTable,
    /// Ice growth and collection tables
    pub ice: IceTables,
}

/// Read-only handle to the built tables
pub type SharedTables = Arc<LookupTables>;

/// Builds [`LookupTables`] from a configuration.
pub struct TableBuilder<'a> {
    config: &'a MicroConfig,
    rain_provider: Option<&'a dyn RainTableProvider>,
}

impl<'a> TableBuilder<'a> {
    /// Start a builder for the given configuration
    #[must_use]
    pub fn new(config: &'a MicroConfig) -> Self {
        Self {
            config,
            rain_provider: None,
        }
    }

    /// Register the initializer used when rain tables are precomputed
    #[must_use]
    pub fn with_rain_provider(mut self, provider: &'a dyn RainTableProvider) -> Self {
        self.rain_provider = Some(provider);
        self
    }

    /// Build rain tables according to the configured source
    fn build_rain(&self) -> MicroResult<RainTables> {
        match self.config.rain_table_source {
            RainTableSource::Integrate => Ok(RainTables::integrated()),
            RainTableSource::Precomputed => self
                .rain_provider
                .ok_or(MicroError::MissingRainProvider)?
                .provide(),
        }
    }

    /// Populate all tables and hand them out as shared, immutable data.
    ///
    /// The ice file is read before any rain integration so a bad path
    /// fails quickly.
    ///
    /// # Errors
    ///
    /// Returns the first error from loading the ice file or producing the
    /// rain tables
    pub fn build(self) -> MicroResult<SharedTables> {
        let start = Instant::now();
        let path = self.config.lookup_path();
        info!(
            "Building microphysics tables (ice: {}, rain: {:?})",
            path.display(),
            self.config.rain_table_source
        );

        let ice = IceTables::load(&path, &self.config.version)?;
        let rain = self.build_rain()?;

        info!(
            "Microphysics tables ready in {:.1} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Arc::new(LookupTables {
            rain,
            dnu: DistributionWidthTable::default(),
            ice,
        }))
    }
}
