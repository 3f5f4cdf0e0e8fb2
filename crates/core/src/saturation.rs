//! Saturation adjustment
//!
//! Instantaneous enforcement of vapor/liquid equilibrium for a single grid
//! cell. Saturation specific humidity comes from the August–Roche–Magnus
//! approximation and the condensed (or evaporated) amount is found by
//! bisection, warming (or cooling) the cell by the latent heat released.
//!
//! The solver never fails: if the bracket has not shrunk below
//! [`ADJUSTMENT_TOLERANCE`] after [`MAX_ITERATIONS`] steps, the last midpoint
//! is accepted.
//!
//! # References
//! - Alduchov, O.A. & Eskridge, R.E. (1996). "Improved Magnus form
//!   approximation of saturation vapor pressure." J. Appl. Meteor., 35, 601-609.

use crate::constants::{Real, FAC_COND};
use serde::{Deserialize, Serialize};

/// Bisection stops once the bracket is narrower than this (kg/kg)
pub const ADJUSTMENT_TOLERANCE: Real = 1.0e-6;
/// Vapor floor applied after every iteration (kg/kg)
pub const MIN_VAPOR: Real = 1.0e-10;
/// Condensate floor applied after every iteration (kg/kg)
pub const MIN_CONDENSATE: Real = 0.0;
/// Iteration cap for both bisection branches
pub const MAX_ITERATIONS: usize = 10;

/// How the evaporation branch tightens its bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaporationNarrowing {
    /// Move the bound to the candidate evaporation amount
    #[default]
    Candidate,
    /// Move the bound to the whole input condensate.
    ///
    /// Reproduces the legacy driver, which always ends up evaporating half
    /// of the input condensate.
    FullCondensate,
}

/// Result of adjusting one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedState {
    /// Total water, recomputed as `qv + qc` (kg/kg)
    pub qt: Real,
    /// Cloud condensate (kg/kg)
    pub qc: Real,
    /// Water vapor (kg/kg)
    pub qv: Real,
    /// Absolute temperature (K)
    pub tabs: Real,
    /// Bisection iterations performed (0 when no adjustment was needed)
    pub iterations: usize,
}

/// Saturation vapor pressure over liquid water.
///
/// # Arguments
/// * `tabs` - Absolute temperature (K)
///
/// # Returns
/// Saturation vapor pressure (Pa)
#[inline]
pub fn saturation_vapor_pressure(tabs: Real) -> Real {
    let tc = tabs - 273.15;
    610.94 * (17.625 * tc / (243.04 + tc)).exp()
}

/// Saturation specific humidity.
///
/// # Arguments
/// * `tabs` - Absolute temperature (K)
/// * `pressure` - Air pressure (Pa)
///
/// # Returns
/// Saturation specific humidity (kg/kg)
#[inline]
pub fn saturation_specific_humidity(tabs: Real, pressure: Real) -> Real {
    let esat = saturation_vapor_pressure(tabs);
    let wsat = 0.622 * esat / (pressure - esat);
    wsat / (1.0 + wsat)
}

/// Apply the vapor and condensate floors, moving any deficit to the other
/// quantity so their sum is unchanged.
#[inline]
fn clamp_partition(mut qv: Real, mut qc: Real) -> (Real, Real) {
    if qv < MIN_VAPOR {
        qc += qv - MIN_VAPOR;
        qv = MIN_VAPOR;
    }
    if qc < MIN_CONDENSATE {
        qv += qc - MIN_CONDENSATE;
        qc = MIN_CONDENSATE;
    }
    (qv, qc)
}

/// Adjust one cell to saturation equilibrium.
///
/// Vapor is diagnosed as `qt - qc`. A supersaturated cell condenses, an
/// unsaturated cell with condensate evaporates, anything else is returned
/// unchanged. Total water is conserved to rounding.
///
/// # Arguments
/// * `qt` - Total water mixing ratio (kg/kg)
/// * `qc` - Cloud condensate mixing ratio (kg/kg)
/// * `tabs` - Absolute temperature (K)
/// * `pressure` - Air pressure (Pa)
/// * `narrowing` - Bracket update rule for the evaporation branch
pub fn compute_adjusted_state(
    qt: Real,
    qc: Real,
    tabs: Real,
    pressure: Real,
    narrowing: EvaporationNarrowing,
) -> AdjustedState {
    let qsat = saturation_specific_humidity(tabs, pressure);
    let qv = qt - qc;

    let mut state = AdjustedState {
        qt,
        qc,
        qv,
        tabs,
        iterations: 0,
    };

    if qv > qsat {
        // Condense: bracket the amount of vapor turned into cloud
        let mut cond_lo = 0.0;
        let mut cond_hi = qv;
        loop {
            let cond = 0.5 * (cond_lo + cond_hi);
            let (qv_loc, qc_loc) = clamp_partition(qv - cond, qc + cond);
            let tabs_loc = tabs + FAC_COND * cond;
            if qv_loc > saturation_specific_humidity(tabs_loc, pressure) {
                cond_lo = cond;
            } else {
                cond_hi = cond;
            }
            state.iterations += 1;
            if (cond_hi - cond_lo).abs() <= ADJUSTMENT_TOLERANCE
                || state.iterations >= MAX_ITERATIONS
            {
                state.qv = qv_loc;
                state.qc = qc_loc;
                state.tabs = tabs_loc;
                break;
            }
        }
    } else if qv < qsat && qc > 0.0 {
        // Evaporate: bracket the amount of cloud returned to vapor
        let mut evap_lo = 0.0;
        let mut evap_hi = qc;
        loop {
            let evap = 0.5 * (evap_lo + evap_hi);
            let (qv_loc, qc_loc) = clamp_partition(qv + evap, qc - evap);
            let tabs_loc = tabs - FAC_COND * evap;
            let bound = match narrowing {
                EvaporationNarrowing::Candidate => evap,
                EvaporationNarrowing::FullCondensate => qc,
            };
            if qv_loc < saturation_specific_humidity(tabs_loc, pressure) {
                evap_lo = bound;
            } else {
                evap_hi = bound;
            }
            state.iterations += 1;
            if (evap_hi - evap_lo).abs() <= ADJUSTMENT_TOLERANCE
                || state.iterations >= MAX_ITERATIONS
            {
                state.qv = qv_loc;
                state.qc = qc_loc;
                state.tabs = tabs_loc;
                break;
            }
        }
    }

    state.qt = state.qv + state.qc;
    state
}
