//! Driver configuration
//!
//! `MicroConfig` collects the switches that the host model sets once at
//! start-up. It is serde-enabled so a host can embed it in its own run
//! configuration; loading that configuration is the host's job.

use crate::cloud_fraction::CloudFractionMethod;
use crate::constants::{Real, MIN_CLOUD_FRACTION, P3_LOOKUP_BASE, P3_VERSION, Q_SMALL};
use crate::saturation::EvaporationNarrowing;
use crate::tables::RainTableSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for table initialization and the per-step driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroConfig {
    /// Base path of the ice lookup table; the version string is appended
    pub lookup_base: PathBuf,
    /// Expected ice lookup table version
    pub version: String,
    /// How the rain fallspeed tables are produced
    pub rain_table_source: RainTableSource,
    /// Cloud/precipitation fraction strategy
    pub cloud_fraction_method: CloudFractionMethod,
    /// Run the saturation adjustment before each microphysics call.
    ///
    /// Needed when no higher-order turbulence scheme supplies cloud water.
    pub saturation_adjustment: bool,
    /// Bound narrowing used by the evaporation branch of the adjustment
    pub evaporation_narrowing: EvaporationNarrowing,
    /// Predict cloud droplet number in the scheme
    pub predict_nc: bool,
    /// Use prescribed CCN concentrations in the scheme
    pub prescribed_ccn: bool,
    /// Condensate threshold used by the fraction estimator (kg/kg)
    pub q_small: Real,
    /// Floor applied to cloud fractions by the overlap strategies
    pub min_cloud_fraction: Real,
}

impl Default for MicroConfig {
    fn default() -> Self {
        Self {
            lookup_base: PathBuf::from(P3_LOOKUP_BASE),
            version: P3_VERSION.to_string(),
            rain_table_source: RainTableSource::default(),
            cloud_fraction_method: CloudFractionMethod::default(),
            saturation_adjustment: true,
            evaporation_narrowing: EvaporationNarrowing::default(),
            predict_nc: true,
            prescribed_ccn: false,
            q_small: Q_SMALL,
            min_cloud_fraction: MIN_CLOUD_FRACTION,
        }
    }
}

impl MicroConfig {
    /// Full path of the ice lookup table: base path followed by the version.
    ///
    /// The version is appended to the file name, not joined as a directory.
    #[must_use]
    pub fn lookup_path(&self) -> PathBuf {
        let mut path = self.lookup_base.clone().into_os_string();
        path.push(&self.version);
        PathBuf::from(path)
    }

    /// Point the configuration at a different lookup table base path.
    pub fn with_lookup_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.lookup_base = base.into();
        self
    }

    /// Select a cloud fraction strategy.
    pub fn with_cloud_fraction_method(mut self, method: CloudFractionMethod) -> Self {
        self.cloud_fraction_method = method;
        self
    }

    /// Select how rain tables are produced.
    pub fn with_rain_table_source(mut self, source: RainTableSource) -> Self {
        self.rain_table_source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_path_appends_version() {
        let config = MicroConfig::default();
        assert_eq!(
            config.lookup_path(),
            PathBuf::from("p3_lookup_table_1.dat-v4.1.1")
        );

        let config = config.with_lookup_base("/data/tables/p3_lookup_table_1.dat-v");
        assert_eq!(
            config.lookup_path(),
            PathBuf::from("/data/tables/p3_lookup_table_1.dat-v4.1.1")
        );
    }

    #[test]
    fn test_defaults() {
        let config = MicroConfig::default();
        assert_eq!(config.cloud_fraction_method, CloudFractionMethod::Constant);
        assert_eq!(config.rain_table_source, RainTableSource::Precomputed);
        assert_eq!(config.evaporation_narrowing, EvaporationNarrowing::Candidate);
        assert!(config.saturation_adjustment);
        assert!(config.predict_nc);
        assert!(!config.prescribed_ccn);
        assert_eq!(config.q_small, 1.0e-14);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "cloud_fraction_method": "max_overlap", "version": "4.0.0" }"#;
        let config: MicroConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cloud_fraction_method, CloudFractionMethod::MaxOverlap);
        assert_eq!(config.version, "4.0.0");
        assert_eq!(config.rain_table_source, RainTableSource::Precomputed);
    }

    #[test]
    fn test_json_round_trip() {
        let config = MicroConfig::default()
            .with_rain_table_source(RainTableSource::Integrate)
            .with_cloud_fraction_method(CloudFractionMethod::InCloud);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"integrate\""), "{json}");
        assert!(json.contains("\"in_cloud\""), "{json}");
        let back: MicroConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
