//! Cloud and precipitation area fractions
//!
//! The scheme needs three fractions per cell: liquid cloud, ice cloud and
//! precipitation. The default strategy treats every cell as fully cloudy.
//! The overlap strategies start from the host cloud fraction and carry
//! precipitation fraction downward from the level above, so rain falling
//! out of a cloud keeps covering the area it fell from.
//!
//! Levels are indexed upward: `k = 0` is the lowest level and `k + 1` is the
//! level above it.

use crate::config::MicroConfig;
use crate::constants::Real;
use crate::error::MicroError;
use crate::grid::ColumnField;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strategy used to estimate cloud and precipitation fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudFractionMethod {
    /// Every fraction is 1
    #[default]
    Constant,
    /// Cloud-free levels inherit precipitation fraction from above
    InCloud,
    /// Levels below rain or ice inherit precipitation fraction from above
    MaxOverlap,
}

impl CloudFractionMethod {
    /// Configuration name of the method
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::InCloud => "in_cloud",
            Self::MaxOverlap => "max_overlap",
        }
    }
}

impl fmt::Display for CloudFractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CloudFractionMethod {
    type Err = MicroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(Self::Constant),
            "in_cloud" => Ok(Self::InCloud),
            "max_overlap" => Ok(Self::MaxOverlap),
            other => Err(MicroError::UnknownCloudFractionMethod(other.to_string())),
        }
    }
}

/// Liquid, ice and precipitation fractions in column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFractions {
    /// Liquid cloud fraction
    pub liquid: ColumnField,
    /// Ice cloud fraction
    pub ice: ColumnField,
    /// Precipitation fraction
    pub precip: ColumnField,
}

/// Condensate fields the overlap strategies look at
#[derive(Debug, Clone, Copy)]
pub struct Condensate<'a> {
    /// Cloud liquid mixing ratio
    pub qc: &'a ColumnField,
    /// Rain mixing ratio
    pub qr: &'a ColumnField,
    /// Ice mixing ratio
    pub qi: &'a ColumnField,
}

/// Configured fraction estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudFractionEstimator {
    /// Strategy
    pub method: CloudFractionMethod,
    /// Mixing ratio below which a species counts as absent
    pub q_small: Real,
    /// Floor applied to the host cloud fraction
    pub min_cloud_fraction: Real,
}

impl CloudFractionEstimator {
    /// Estimator using the configured strategy and thresholds
    #[must_use]
    pub fn from_config(config: &MicroConfig) -> Self {
        Self {
            method: config.cloud_fraction_method,
            q_small: config.q_small,
            min_cloud_fraction: config.min_cloud_fraction,
        }
    }

    /// Estimate fractions for every column.
    ///
    /// `cloud_fraction` is the host cloud fraction; it is only read by the
    /// overlap strategies. Columns are processed in parallel, each one
    /// scanned from the top level down.
    ///
    /// # Panics
    ///
    /// Panics if the condensate fields are not shaped like `cloud_fraction`
    #[must_use]
    pub fn estimate(&self, cloud_fraction: &ColumnField, condensate: Condensate<'_>) -> CloudFractions {
        let (ncol, nlev) = (cloud_fraction.ncol, cloud_fraction.nlev);

        if self.method == CloudFractionMethod::Constant {
            return CloudFractions {
                liquid: ColumnField::with_value(ncol, nlev, 1.0),
                ice: ColumnField::with_value(ncol, nlev, 1.0),
                precip: ColumnField::with_value(ncol, nlev, 1.0),
            };
        }

        for field in [condensate.qc, condensate.qr, condensate.qi] {
            assert!(
                field.ncol == ncol && field.nlev == nlev,
                "Condensate field shape does not match cloud fraction"
            );
        }

        let mut floored = cloud_fraction.clone();
        let floor = self.min_cloud_fraction;
        floored.data.par_iter_mut().for_each(|f| *f = f.max(floor));

        let mut precip = floored.clone();
        if nlev > 0 {
            precip
                .data
                .par_chunks_mut(nlev)
                .enumerate()
                .for_each(|(icol, frac_r)| {
                    self.propagate_column(
                        frac_r,
                        condensate.qc.column(icol),
                        condensate.qr.column(icol),
                        condensate.qi.column(icol),
                    );
                });
        }

        CloudFractions {
            liquid: floored.clone(),
            ice: floored,
            precip,
        }
    }

    /// Top-down scan of one column. The top level has nothing above it.
    fn propagate_column(&self, frac_r: &mut [Real], qc: &[Real], qr: &[Real], qi: &[Real]) {
        let q_small = self.q_small;
        for k in (0..frac_r.len().saturating_sub(1)).rev() {
            let above = k + 1;
            let inherit = match self.method {
                CloudFractionMethod::InCloud => qc[k] < q_small && qi[k] < q_small,
                CloudFractionMethod::MaxOverlap => qr[above] >= q_small || qi[above] >= q_small,
                CloudFractionMethod::Constant => false,
            };
            if inherit {
                frac_r[k] = frac_r[above].max(frac_r[k]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MIN_CLOUD_FRACTION, Q_SMALL};

    fn estimator(method: CloudFractionMethod) -> CloudFractionEstimator {
        CloudFractionEstimator {
            method,
            q_small: Q_SMALL,
            min_cloud_fraction: MIN_CLOUD_FRACTION,
        }
    }

    fn single_column(values: &[Real]) -> ColumnField {
        ColumnField {
            data: values.to_vec(),
            ncol: 1,
            nlev: values.len(),
        }
    }

    #[test]
    fn test_method_names_parse() {
        for method in [
            CloudFractionMethod::Constant,
            CloudFractionMethod::InCloud,
            CloudFractionMethod::MaxOverlap,
        ] {
            assert_eq!(method.to_string().parse::<CloudFractionMethod>().unwrap(), method);
        }
        let err = "random_overlap".parse::<CloudFractionMethod>().unwrap_err();
        assert!(matches!(err, MicroError::UnknownCloudFractionMethod(ref s) if s == "random_overlap"));
    }

    #[test]
    fn test_constant_is_one_everywhere() {
        let cf = ColumnField::new(3, 5);
        let zeros = ColumnField::new(3, 5);
        let out = estimator(CloudFractionMethod::Constant).estimate(
            &cf,
            Condensate {
                qc: &zeros,
                qr: &zeros,
                qi: &zeros,
            },
        );
        for field in [&out.liquid, &out.ice, &out.precip] {
            assert_eq!(field.data.len(), 15);
            assert!(field.data.iter().all(|&f| f == 1.0));
        }
    }

    #[test]
    fn test_in_cloud_propagates_from_level_above() {
        // Level 0 is clear with a small precip fraction; level 1 above has more
        let cf = single_column(&[0.2, 0.6]);
        let qc = single_column(&[0.0, 1.0e-3]);
        let zeros = single_column(&[0.0, 0.0]);
        let out = estimator(CloudFractionMethod::InCloud).estimate(
            &cf,
            Condensate {
                qc: &qc,
                qr: &zeros,
                qi: &zeros,
            },
        );
        assert_eq!(out.precip.get(0, 0), 0.6);
        assert_eq!(out.precip.get(0, 1), 0.6);
        assert_eq!(out.liquid.get(0, 0), 0.2);
    }

    #[test]
    fn test_in_cloud_keeps_cloudy_levels() {
        let cf = single_column(&[0.1, 0.3, 0.9]);
        let qc = single_column(&[0.0, 2.0e-4, 0.0]);
        let zeros = single_column(&[0.0; 3]);
        let out = estimator(CloudFractionMethod::InCloud).estimate(
            &cf,
            Condensate {
                qc: &qc,
                qr: &zeros,
                qi: &zeros,
            },
        );
        // Level 1 has cloud water so does not inherit 0.9; level 0 inherits 0.3
        assert_eq!(out.precip.column(0), &[0.3, 0.3, 0.9]);
    }

    #[test]
    fn test_in_cloud_cascades_through_clear_levels() {
        let cf = single_column(&[0.0, 0.0, 0.0, 0.7]);
        let zeros = single_column(&[0.0; 4]);
        let out = estimator(CloudFractionMethod::InCloud).estimate(
            &cf,
            Condensate {
                qc: &zeros,
                qr: &zeros,
                qi: &zeros,
            },
        );
        assert_eq!(out.precip.column(0), &[0.7, 0.7, 0.7, 0.7]);
    }

    #[test]
    fn test_max_overlap_follows_precipitation_above() {
        let cf = single_column(&[0.05, 0.1, 0.4, 0.8]);
        let qr = single_column(&[0.0, 0.0, 1.0e-5, 0.0]);
        let qi = single_column(&[0.0, 0.0, 0.0, 3.0e-6]);
        let zeros = single_column(&[0.0; 4]);
        let out = estimator(CloudFractionMethod::MaxOverlap).estimate(
            &cf,
            Condensate {
                qc: &zeros,
                qr: &qr,
                qi: &qi,
            },
        );
        // Ice at level 3 pulls 0.8 into level 2; rain at level 2 pulls it into
        // level 1; level 1 has no precipitation so level 0 keeps its own value
        assert_eq!(out.precip.column(0), &[0.05, 0.8, 0.8, 0.8]);
    }

    #[test]
    fn test_overlap_floors_host_fraction() {
        let cf = ColumnField::new(2, 3);
        let zeros = ColumnField::new(2, 3);
        let out = estimator(CloudFractionMethod::MaxOverlap).estimate(
            &cf,
            Condensate {
                qc: &zeros,
                qr: &zeros,
                qi: &zeros,
            },
        );
        for field in [&out.liquid, &out.ice, &out.precip] {
            assert!(field.data.iter().all(|&f| f == MIN_CLOUD_FRACTION));
        }
    }

    #[test]
    fn test_columns_are_independent() {
        let cf = ColumnField {
            data: vec![0.0, 0.9, 0.0, 0.1],
            ncol: 2,
            nlev: 2,
        };
        let zeros = ColumnField::new(2, 2);
        let out = estimator(CloudFractionMethod::InCloud).estimate(
            &cf,
            Condensate {
                qc: &zeros,
                qr: &zeros,
                qi: &zeros,
            },
        );
        assert_eq!(out.precip.column(0), &[0.9, 0.9]);
        assert_eq!(out.precip.column(1), &[0.1, 0.1]);
    }
}
