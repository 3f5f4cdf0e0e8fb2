//! Boundary between the driver and the bulk microphysics scheme
//!
//! The scheme itself lives outside this crate. The driver fills the bundles
//! below in column layout (`ncol` columns of `nlev` levels, level 0 lowest)
//! and hands them to a [`MicrophysicsScheme`] together with the lookup
//! tables.

use crate::constants::Real;
use crate::error::MicroResult;
use crate::grid::ColumnField;
use crate::tables::LookupTables;

/// Prognostic fields, updated in place by the scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct PrognosticState {
    /// Cloud liquid mixing ratio (kg/kg)
    pub qc: ColumnField,
    /// Cloud droplet number (1/kg)
    pub nc: ColumnField,
    /// Rain mixing ratio (kg/kg)
    pub qr: ColumnField,
    /// Rain drop number (1/kg)
    pub nr: ColumnField,
    /// Total ice mixing ratio (kg/kg)
    pub qi: ColumnField,
    /// Rime ice mixing ratio (kg/kg)
    pub qm: ColumnField,
    /// Ice number (1/kg)
    pub ni: ColumnField,
    /// Rime volume (m3/kg)
    pub bm: ColumnField,
    /// Water vapor mixing ratio (kg/kg)
    pub qv: ColumnField,
    /// Potential temperature (K)
    pub th: ColumnField,
}

impl PrognosticState {
    /// Zeroed state
    #[must_use]
    pub fn new(ncol: usize, nlev: usize) -> Self {
        Self {
            qc: ColumnField::new(ncol, nlev),
            nc: ColumnField::new(ncol, nlev),
            qr: ColumnField::new(ncol, nlev),
            nr: ColumnField::new(ncol, nlev),
            qi: ColumnField::new(ncol, nlev),
            qm: ColumnField::new(ncol, nlev),
            ni: ColumnField::new(ncol, nlev),
            bm: ColumnField::new(ncol, nlev),
            qv: ColumnField::new(ncol, nlev),
            th: ColumnField::new(ncol, nlev),
        }
    }
}

/// Read-only inputs to the scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticInputs {
    /// Droplet nucleation tendency (1/kg/s)
    pub nc_nuceat_tend: ColumnField,
    /// CCN concentration (1/kg)
    pub nccn: ColumnField,
    /// Activated ice nuclei (1/kg)
    pub ni_activated: ColumnField,
    /// Inverse relative variance of cloud water
    pub inv_qc_relvar: ColumnField,
    /// Ice cloud fraction
    pub cld_frac_i: ColumnField,
    /// Liquid cloud fraction
    pub cld_frac_l: ColumnField,
    /// Precipitation fraction
    pub cld_frac_r: ColumnField,
    /// Mid-level pressure (Pa)
    pub pmid: ColumnField,
    /// Layer thickness (m)
    pub dz: ColumnField,
    /// Layer pressure thickness (Pa)
    pub pdel: ColumnField,
    /// Inverse Exner function
    pub inv_exner: ColumnField,
    /// Vapor from the previous step (kg/kg)
    pub q_prev: ColumnField,
    /// Temperature from the previous step (K)
    pub t_prev: ColumnField,
}

impl DiagnosticInputs {
    /// Zeroed inputs
    #[must_use]
    pub fn new(ncol: usize, nlev: usize) -> Self {
        Self {
            nc_nuceat_tend: ColumnField::new(ncol, nlev),
            nccn: ColumnField::new(ncol, nlev),
            ni_activated: ColumnField::new(ncol, nlev),
            inv_qc_relvar: ColumnField::new(ncol, nlev),
            cld_frac_i: ColumnField::new(ncol, nlev),
            cld_frac_l: ColumnField::new(ncol, nlev),
            cld_frac_r: ColumnField::new(ncol, nlev),
            pmid: ColumnField::new(ncol, nlev),
            dz: ColumnField::new(ncol, nlev),
            pdel: ColumnField::new(ncol, nlev),
            inv_exner: ColumnField::new(ncol, nlev),
            q_prev: ColumnField::new(ncol, nlev),
            t_prev: ColumnField::new(ncol, nlev),
        }
    }
}

/// Diagnostics written by the scheme. Zeroed before every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticOutputs {
    /// Vapor deposition onto ice (kg/kg/s)
    pub qv2qi_depos_tend: ColumnField,
    /// Surface liquid precipitation rate per column (m/s)
    pub precip_liq_surf: Vec<Real>,
    /// Surface ice precipitation rate per column (m/s)
    pub precip_ice_surf: Vec<Real>,
    /// Cloud droplet effective radius (m)
    pub diag_eff_radius_qc: ColumnField,
    /// Ice effective radius (m)
    pub diag_eff_radius_qi: ColumnField,
    /// Bulk ice density (kg/m3)
    pub rho_qi: ColumnField,
    /// Liquid precipitation flux on level interfaces (`nlev + 1`)
    pub precip_liq_flux: ColumnField,
    /// Ice precipitation flux on level interfaces (`nlev + 1`)
    pub precip_ice_flux: ColumnField,
}

impl DiagnosticOutputs {
    /// Zeroed outputs
    #[must_use]
    pub fn new(ncol: usize, nlev: usize) -> Self {
        Self {
            qv2qi_depos_tend: ColumnField::new(ncol, nlev),
            precip_liq_surf: vec![0.0; ncol],
            precip_ice_surf: vec![0.0; ncol],
            diag_eff_radius_qc: ColumnField::new(ncol, nlev),
            diag_eff_radius_qi: ColumnField::new(ncol, nlev),
            rho_qi: ColumnField::new(ncol, nlev),
            precip_liq_flux: ColumnField::new(ncol, nlev + 1),
            precip_ice_flux: ColumnField::new(ncol, nlev + 1),
        }
    }
}

/// Loop bounds, switches and column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Infrastructure {
    /// Timestep (s)
    pub dt: Real,
    /// Step counter passed to the scheme
    pub it: i32,
    /// First column
    pub its: usize,
    /// One past the last column
    pub ite: usize,
    /// First level
    pub kts: usize,
    /// One past the last level
    pub kte: usize,
    /// Predict droplet number
    pub predict_nc: bool,
    /// Use prescribed CCN
    pub prescribed_ccn: bool,
    /// `[z0, longitude, latitude]` of each column's CRM
    pub col_location: Vec<[Real; 3]>,
}

/// Process exchange rates kept for history output only.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOnly {
    /// Liquid to ice exchange (kg/kg/s)
    pub liq_ice_exchange: ColumnField,
    /// Vapor to liquid exchange (kg/kg/s)
    pub vap_liq_exchange: ColumnField,
    /// Vapor to ice exchange (kg/kg/s)
    pub vap_ice_exchange: ColumnField,
}

impl HistoryOnly {
    /// Zeroed history
    #[must_use]
    pub fn new(ncol: usize, nlev: usize) -> Self {
        Self {
            liq_ice_exchange: ColumnField::new(ncol, nlev),
            vap_liq_exchange: ColumnField::new(ncol, nlev),
            vap_ice_exchange: ColumnField::new(ncol, nlev),
        }
    }
}

/// A bulk microphysics scheme operating on packed columns.
pub trait MicrophysicsScheme: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Advance the microphysics by `infrastructure.dt`.
    ///
    /// # Arguments
    ///
    /// * `tables` - Lookup tables built at start-up
    /// * `state` - Prognostic fields, updated in place
    /// * `inputs` - Diagnostic inputs
    /// * `outputs` - Diagnostic outputs, zeroed on entry
    /// * `infrastructure` - Loop bounds and switches
    /// * `history` - Exchange rates, zeroed on entry
    ///
    /// # Errors
    ///
    /// Implementations report failures as `MicroError::Scheme`
    fn run(
        &mut self,
        tables: &LookupTables,
        state: &mut PrognosticState,
        inputs: &DiagnosticInputs,
        outputs: &mut DiagnosticOutputs,
        infrastructure: &Infrastructure,
        history: &mut HistoryOnly,
    ) -> MicroResult<()>;
}

/// Scheme that changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScheme;

impl MicrophysicsScheme for NullScheme {
    fn name(&self) -> &str {
        "null"
    }

    fn run(
        &mut self,
        _tables: &LookupTables,
        _state: &mut PrognosticState,
        _inputs: &DiagnosticInputs,
        _outputs: &mut DiagnosticOutputs,
        _infrastructure: &Infrastructure,
        _history: &mut HistoryOnly,
    ) -> MicroResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flux_fields_live_on_interfaces() {
        let outputs = DiagnosticOutputs::new(4, 10);
        assert_eq!(outputs.precip_liq_flux.nlev, 11);
        assert_eq!(outputs.precip_ice_flux.data.len(), 44);
        assert_eq!(outputs.precip_liq_surf.len(), 4);
        assert_eq!(outputs.rho_qi.nlev, 10);
    }

    #[test]
    fn test_bundles_start_zeroed() {
        let state = PrognosticState::new(2, 3);
        let inputs = DiagnosticInputs::new(2, 3);
        let history = HistoryOnly::new(2, 3);
        for field in [&state.qc, &state.th, &inputs.pmid, &inputs.t_prev, &history.vap_ice_exchange] {
            assert_eq!(field.data.len(), 6);
            assert!(field.data.iter().all(|&v| v == 0.0));
        }
    }
}
