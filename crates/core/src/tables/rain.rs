//! Rain fallspeed and evaporation-ventilation tables
//!
//! For a gamma raindrop size distribution `N(D) ∝ D^μ exp(-λD)` the scheme
//! needs the number-weighted fallspeed `vn`, the mass-weighted fallspeed `vm`
//! and the ventilation factor `revap` used by rain evaporation. They are
//! tabulated against mean drop size (300 bins) and shape parameter μ
//! (10 bins) either by integrating the distribution here or by taking arrays
//! from an external initializer. In-process integration uses a single μ for
//! every shape bin.
//!
//! # References
//! - Morrison, H. & Milbrandt, J.A. (2015). "Parameterization of cloud
//!   microphysics based on the prediction of bulk ice particle properties.
//!   Part I." J. Atmos. Sci., 72, 287-311.
//! - Gunn, R. & Kinzer, G.D. (1949). "The terminal velocity of fall for water
//!   droplets in stagnant air." J. Meteor., 6, 243-248.

use crate::constants::{Real, MU_R_CONST, MU_R_TABLE_DIM, VTABLE_DIM0, VTABLE_DIM1};
use crate::error::{MicroError, MicroResult};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Drop diameter separating the first two fallspeed regimes (µm)
pub const FALLSPEED_BREAK_SMALL_UM: Real = 134.43;
/// Drop diameter separating the middle fallspeed regimes (µm)
pub const FALLSPEED_BREAK_MEDIUM_UM: Real = 1511.64;
/// Drop diameter above which fallspeed is capped (µm)
pub const FALLSPEED_BREAK_LARGE_UM: Real = 3477.84;
/// Terminal fallspeed of the largest drops (m/s)
pub const FALLSPEED_CAP: Real = 9.17;

/// Sub-bins used to integrate over the size distribution
pub const PSD_SUB_BINS: usize = 10_000;
/// Width of one integration sub-bin (µm)
pub const PSD_SUB_BIN_WIDTH_UM: Real = 2.0;

/// Density of liquid water used for drop mass (g/m³)
const RHO_WATER_G: Real = 997_000.0;
/// Floor applied to the integral denominators and the evaporation sum
const INTEGRAL_FLOOR: Real = 1.0e-30;

/// Terminal fallspeed of a single raindrop.
///
/// Three power laws in drop mass fitted to Gunn & Kinzer (1949), capped at
/// 9.17 m/s for drops larger than 3477.84 µm.
///
/// # Arguments
/// * `diameter` - Drop diameter (m)
///
/// # Returns
/// Terminal fallspeed (m/s)
#[inline]
pub fn rain_fallspeed(diameter: Real) -> Real {
    let d_um = diameter * 1.0e6;
    let mass = PI / 6.0 * RHO_WATER_G * diameter.powi(3);
    if d_um <= FALLSPEED_BREAK_SMALL_UM {
        4.5795e3 * mass.powf(2.0 / 3.0)
    } else if d_um < FALLSPEED_BREAK_MEDIUM_UM {
        4.962e1 * mass.powf(1.0 / 3.0)
    } else if d_um < FALLSPEED_BREAK_LARGE_UM {
        1.732e1 * mass.powf(1.0 / 6.0)
    } else {
        FALLSPEED_CAP
    }
}

/// Mean drop size represented by a diameter bin.
///
/// 10 µm steps for the first 20 bins, 30 µm steps after that.
///
/// # Returns
/// Mean size (m)
#[inline]
pub fn mean_diameter(bin: usize) -> Real {
    let um = if bin < 20 {
        (bin + 1) as Real * 10.0 - 5.0
    } else {
        (bin - 19) as Real * 30.0 + 195.0
    };
    um * 1.0e-6
}

/// Shape parameter μ used to integrate a shape bin.
///
/// Every bin is integrated with [`MU_R_CONST`]; the shape dimension is kept
/// so externally supplied tables can vary along it.
#[inline]
pub fn shape_parameter(_bin: usize) -> Real {
    MU_R_CONST
}

/// One tabulated rain entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainFallspeedEntry {
    /// Number-weighted fallspeed (m/s)
    pub vn: Real,
    /// Mass-weighted fallspeed (m/s)
    pub vm: Real,
    /// Ventilation factor for rain evaporation
    pub revap: Real,
}

/// Integrate the size distribution for one (mean size, μ) pair.
///
/// The integrands carry extra `10^(4μ)` and `10^(3μ)` factors to keep the
/// sums inside floating point range; they cancel in the ratios and are
/// removed again from `revap`.
pub fn integrate_bin(dm: Real, mu_r: Real) -> RainFallspeedEntry {
    let lamr = (mu_r + 1.0) / dm;
    let dd = PSD_SUB_BIN_WIDTH_UM;

    let mut num_n = 0.0;
    let mut den_n = 0.0;
    let mut num_m = 0.0;
    let mut den_m = 0.0;
    let mut evap = 0.0;

    for kk in 0..PSD_SUB_BINS {
        let dia = ((kk + 1) as Real * dd - dd * 0.5) * 1.0e-6;
        let vt = rain_fallspeed(dia);
        let log_dia = dia.log10();
        let weight = (-lamr * dia).exp() * dd * 1.0e-6;

        let number = Real::powf(10.0, mu_r * log_dia + 4.0 * mu_r) * weight;
        let mass = Real::powf(10.0, (mu_r + 3.0) * log_dia + 4.0 * mu_r) * weight;
        let vent = Real::powf(10.0, (mu_r + 1.0) * log_dia + 3.0 * mu_r) * weight;

        num_n += vt * number;
        den_n += number;
        num_m += vt * mass;
        den_m += mass;
        evap += (vt * dia).sqrt() * vent;
    }

    let den_n = den_n.max(INTEGRAL_FLOOR);
    let den_m = den_m.max(INTEGRAL_FLOOR);
    let evap = evap.max(INTEGRAL_FLOOR);

    RainFallspeedEntry {
        vn: num_n / den_n,
        vm: num_m / den_m,
        revap: Real::powf(10.0, evap.log10() + (mu_r + 1.0) * lamr.log10() - 3.0 * mu_r),
    }
}

/// Fallspeed/evaporation table indexed `(diameter bin, shape bin)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RainFallspeedTable {
    vn: Vec<Real>,
    vm: Vec<Real>,
    revap: Vec<Real>,
}

impl RainFallspeedTable {
    /// Wrap arrays produced elsewhere, each in `(diameter, shape)` row-major
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `RainTableShape` if any array has the wrong length
    pub fn from_arrays(vn: Vec<Real>, vm: Vec<Real>, revap: Vec<Real>) -> MicroResult<Self> {
        let expected = VTABLE_DIM0 * VTABLE_DIM1;
        for (table, values) in [("vn", &vn), ("vm", &vm), ("revap", &revap)] {
            if values.len() != expected {
                return Err(MicroError::RainTableShape {
                    table,
                    expected,
                    found: values.len(),
                });
            }
        }
        Ok(Self { vn, vm, revap })
    }

    /// Build the table by integrating over the size distribution.
    ///
    /// Diameter bins are integrated in parallel; each bin is independent.
    #[must_use]
    pub fn integrate() -> Self {
        let entries: Vec<RainFallspeedEntry> = (0..VTABLE_DIM0 * VTABLE_DIM1)
            .into_par_iter()
            .map(|flat| {
                let (jj, ii) = (flat / VTABLE_DIM1, flat % VTABLE_DIM1);
                integrate_bin(mean_diameter(jj), shape_parameter(ii))
            })
            .collect();

        Self {
            vn: entries.iter().map(|e| e.vn).collect(),
            vm: entries.iter().map(|e| e.vm).collect(),
            revap: entries.iter().map(|e| e.revap).collect(),
        }
    }

    #[inline]
    fn offset(diameter_bin: usize, shape_bin: usize) -> usize {
        assert!(
            diameter_bin < VTABLE_DIM0 && shape_bin < VTABLE_DIM1,
            "Rain table index out of bounds"
        );
        diameter_bin * VTABLE_DIM1 + shape_bin
    }

    /// Entry for a diameter bin and shape bin
    #[must_use]
    pub fn get(&self, diameter_bin: usize, shape_bin: usize) -> RainFallspeedEntry {
        let idx = Self::offset(diameter_bin, shape_bin);
        RainFallspeedEntry {
            vn: self.vn[idx],
            vm: self.vm[idx],
            revap: self.revap[idx],
        }
    }

    /// Number-weighted fallspeeds in `(diameter, shape)` order
    #[must_use]
    pub fn vn(&self) -> &[Real] {
        &self.vn
    }

    /// Mass-weighted fallspeeds in `(diameter, shape)` order
    #[must_use]
    pub fn vm(&self) -> &[Real] {
        &self.vm
    }

    /// Ventilation factors in `(diameter, shape)` order
    #[must_use]
    pub fn revap(&self) -> &[Real] {
        &self.revap
    }
}

/// Rain shape parameter lookup (`mu_r`)
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeParameterTable(Vec<Real>);

impl ShapeParameterTable {
    /// Table with every entry set to `value`
    #[must_use]
    pub fn constant(value: Real) -> Self {
        Self(vec![value; MU_R_TABLE_DIM])
    }

    /// Wrap values produced elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `RainTableShape` unless exactly 150 values are given
    pub fn from_vec(values: Vec<Real>) -> MicroResult<Self> {
        if values.len() != MU_R_TABLE_DIM {
            return Err(MicroError::RainTableShape {
                table: "mu_r",
                expected: MU_R_TABLE_DIM,
                found: values.len(),
            });
        }
        Ok(Self(values))
    }

    /// All entries
    #[must_use]
    pub fn as_slice(&self) -> &[Real] {
        &self.0
    }
}

/// Rain tables as one unit: the shape parameter table plus fallspeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct RainTables {
    /// Shape parameter lookup
    pub mu_r: ShapeParameterTable,
    /// Fallspeed and ventilation table
    pub fallspeed: RainFallspeedTable,
}

impl RainTables {
    /// Compute rain tables in-process.
    #[must_use]
    pub fn integrated() -> Self {
        Self {
            mu_r: ShapeParameterTable::constant(MU_R_CONST),
            fallspeed: RainFallspeedTable::integrate(),
        }
    }
}

/// External initializer that supplies fully computed rain tables.
pub trait RainTableProvider: Send + Sync {
    /// Produce the rain tables.
    ///
    /// # Errors
    ///
    /// Implementations report their own failures as `MicroError`
    fn provide(&self) -> MicroResult<RainTables>;
}

impl<F> RainTableProvider for F
where
    F: Fn() -> MicroResult<RainTables> + Send + Sync,
{
    fn provide(&self) -> MicroResult<RainTables> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn jump_across(boundary_um: Real) -> Real {
        let below = rain_fallspeed((boundary_um - 1.0e-6) * 1.0e-6);
        let above = rain_fallspeed((boundary_um + 1.0e-6) * 1.0e-6);
        (above - below).abs() / below
    }

    #[test]
    fn test_fallspeed_is_continuous_across_regimes() {
        // Coefficients are given to four significant figures, so the fits
        // meet to within a fraction of a percent
        for boundary in [
            FALLSPEED_BREAK_SMALL_UM,
            FALLSPEED_BREAK_MEDIUM_UM,
            FALLSPEED_BREAK_LARGE_UM,
        ] {
            let jump = jump_across(boundary);
            assert!(jump < 5.0e-3, "fallspeed jumps by {jump} at {boundary} µm");
        }
    }

    #[test]
    fn test_fallspeed_reference_values() {
        // 1 mm drop falls at about 4 m/s
        let v = rain_fallspeed(1.0e-3);
        assert!((3.5..4.5).contains(&v), "1 mm drop speed was {v}");
        assert_eq!(rain_fallspeed(5.0e-3), FALLSPEED_CAP);
        assert!(rain_fallspeed(10.0e-6) < 0.01);
    }

    #[test]
    fn test_fallspeed_is_monotonic() {
        let mut prev = 0.0;
        for um in 1..5000 {
            let v = rain_fallspeed(Real::from(um) * 1.0e-6);
            assert!(v >= prev * (1.0 - 5.0e-3), "fallspeed dropped at {um} µm");
            prev = v;
        }
    }

    #[test]
    fn test_mean_diameter_bins() {
        assert_relative_eq!(mean_diameter(0), 5.0e-6);
        assert_relative_eq!(mean_diameter(19), 195.0e-6);
        assert_relative_eq!(mean_diameter(20), 225.0e-6);
        assert_relative_eq!(mean_diameter(299), 8595.0e-6);
    }

    #[test]
    fn test_integrated_bin_is_finite_and_ordered() {
        for (jj, ii) in [(0, 0), (0, 9), (150, 3), (299, 0), (299, 9)] {
            let entry = integrate_bin(mean_diameter(jj), shape_parameter(ii));
            for value in [entry.vn, entry.vm, entry.revap] {
                assert!(value.is_finite() && value >= 0.0, "bad value at ({jj},{ii}): {entry:?}");
            }
            // Large drops carry the mass, so mass weighting falls faster
            assert!(entry.vm >= entry.vn * (1.0 - 1e-9), "vm < vn at ({jj},{ii})");
            assert!(entry.vm <= FALLSPEED_CAP + 1e-9);
        }
    }

    #[test]
    fn test_smallest_drops_stay_above_integral_floor() {
        // Large μ at the smallest mean sizes pushed the sums under the floor
        for ii in 0..VTABLE_DIM1 {
            assert_eq!(shape_parameter(ii), MU_R_CONST);
        }
        for jj in 0..3 {
            let entry = integrate_bin(mean_diameter(jj), shape_parameter(VTABLE_DIM1 - 1));
            assert!(entry.vm > entry.vn, "vm <= vn at ({jj},9): {entry:?}");
            assert!(entry.revap < 1.0, "revap blew up at ({jj},9): {entry:?}");
        }
    }

    #[test]
    fn test_fallspeed_grows_with_mean_size() {
        let small = integrate_bin(mean_diameter(5), 1.0);
        let large = integrate_bin(mean_diameter(100), 1.0);
        assert!(large.vm > small.vm);
        assert!(large.vn > small.vn);
    }

    #[test]
    fn test_from_arrays_rejects_wrong_shape() {
        let n = VTABLE_DIM0 * VTABLE_DIM1;
        assert!(RainFallspeedTable::from_arrays(vec![1.0; n], vec![1.0; n], vec![1.0; n]).is_ok());
        let err = RainFallspeedTable::from_arrays(vec![1.0; n], vec![1.0; n - 1], vec![1.0; n])
            .unwrap_err();
        assert!(matches!(err, MicroError::RainTableShape { table: "vm", .. }));
    }

    #[test]
    fn test_shape_parameter_table() {
        let table = ShapeParameterTable::constant(MU_R_CONST);
        assert_eq!(table.as_slice().len(), MU_R_TABLE_DIM);
        assert!(ShapeParameterTable::from_vec(vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_closure_provider() {
        let provider = || -> MicroResult<RainTables> {
            let n = VTABLE_DIM0 * VTABLE_DIM1;
            Ok(RainTables {
                mu_r: ShapeParameterTable::constant(2.0),
                fallspeed: RainFallspeedTable::from_arrays(vec![1.0; n], vec![2.0; n], vec![3.0; n])?,
            })
        };
        let tables = provider.provide().unwrap();
        assert_eq!(tables.fallspeed.get(10, 3).vm, 2.0);
        assert_eq!(tables.mu_r.as_slice()[0], 2.0);
    }
}
