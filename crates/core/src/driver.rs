//! Host-side P3 driver
//!
//! [`P3Driver`] owns the lookup tables and the microphysics scheme. Each
//! call to [`P3Driver::step`] moves the host state into column layout, runs
//! the scheme and writes the results back:
//!
//! 1. Diagnose vapor and condensate species from the prognostic fields
//! 2. Optionally relax every cell to saturation
//! 3. Convert liquid/ice static energy to potential temperature
//! 4. Pack prognostics, inputs, outputs and infrastructure; call the scheme
//! 5. Accumulate surface precipitation, unpack, re-diagnose temperature
//! 6. Export per-level diagnostics as horizontal means over each CRM

use crate::cloud_fraction::{CloudFractionEstimator, Condensate};
use crate::config::MicroConfig;
use crate::constants::{Real, CP, FAC_COND, FAC_SUB, NMICRO_FIELDS, RGAS, RHO_WATER};
use crate::error::{MicroError, MicroResult};
use crate::grid::{cell_coords, CellField, ColumnField, Field, HostGrid, LevelField, SurfaceField};
use crate::saturation::compute_adjusted_state;
use crate::scheme::{
    DiagnosticInputs, DiagnosticOutputs, HistoryOnly, Infrastructure, MicrophysicsScheme,
    PrognosticState,
};
use crate::tables::{RainTableProvider, RainTableSource, SharedTables, TableBuilder};
use crate::timing::{StepStats, StepTimer};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Prognostic microphysics field index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicroField {
    /// Total water (vapor + cloud liquid)
    Qt,
    /// Cloud liquid
    Qc,
    /// Cloud droplet number
    Nc,
    /// Rain
    Qr,
    /// Rain drop number
    Nr,
    /// Total ice
    Qi,
    /// Rime ice
    Qm,
    /// Ice number
    Ni,
    /// Rime volume
    Bm,
}

impl MicroField {
    /// Every field in host storage order
    pub const ALL: [Self; NMICRO_FIELDS] = [
        Self::Qt,
        Self::Qc,
        Self::Nc,
        Self::Qr,
        Self::Nr,
        Self::Qi,
        Self::Qm,
        Self::Ni,
        Self::Bm,
    ];

    /// Position in host storage order
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The nine prognostic microphysics fields on the host grid.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroFields {
    pub qt: CellField,
    pub qc: CellField,
    pub nc: CellField,
    pub qr: CellField,
    pub nr: CellField,
    pub qi: CellField,
    pub qm: CellField,
    pub ni: CellField,
    pub bm: CellField,
}

impl MicroFields {
    /// Zeroed fields for a grid
    #[must_use]
    pub fn new(grid: &HostGrid) -> Self {
        Self {
            qt: CellField::cells(grid),
            qc: CellField::cells(grid),
            nc: CellField::cells(grid),
            qr: CellField::cells(grid),
            nr: CellField::cells(grid),
            qi: CellField::cells(grid),
            qm: CellField::cells(grid),
            ni: CellField::cells(grid),
            bm: CellField::cells(grid),
        }
    }

    /// Field by index
    #[must_use]
    pub const fn get(&self, field: MicroField) -> &CellField {
        match field {
            MicroField::Qt => &self.qt,
            MicroField::Qc => &self.qc,
            MicroField::Nc => &self.nc,
            MicroField::Qr => &self.qr,
            MicroField::Nr => &self.nr,
            MicroField::Qi => &self.qi,
            MicroField::Qm => &self.qm,
            MicroField::Ni => &self.ni,
            MicroField::Bm => &self.bm,
        }
    }

    /// Mutable field by index
    pub fn get_mut(&mut self, field: MicroField) -> &mut CellField {
        match field {
            MicroField::Qt => &mut self.qt,
            MicroField::Qc => &mut self.qc,
            MicroField::Nc => &mut self.nc,
            MicroField::Qr => &mut self.qr,
            MicroField::Nr => &mut self.nr,
            MicroField::Qi => &mut self.qi,
            MicroField::Qm => &mut self.qm,
            MicroField::Ni => &mut self.ni,
            MicroField::Bm => &mut self.bm,
        }
    }
}

/// Reference profiles, one value per (level, CRM).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelProfiles {
    /// Pressure (hPa)
    pub pres: LevelField,
    /// Pressure thickness (hPa)
    pub pdel: LevelField,
    /// Geopotential term of the static energy (K)
    pub gamaz: LevelField,
    /// Layer thickness relative to `dz`
    pub adz: LevelField,
    /// CCN concentration
    pub nccn: LevelField,
    /// Droplet nucleation tendency
    pub nc_nuceat_tend: LevelField,
    /// Activated ice nuclei
    pub ni_activated: LevelField,
}

impl LevelProfiles {
    /// Zeroed profiles with `adz = 1`
    #[must_use]
    pub fn new(grid: &HostGrid) -> Self {
        let shape = grid.level_shape();
        Self {
            pres: LevelField::new(shape),
            pdel: LevelField::new(shape),
            gamaz: LevelField::new(shape),
            adz: LevelField::with_value(shape, 1.0),
            nccn: LevelField::new(shape),
            nc_nuceat_tend: LevelField::new(shape),
            ni_activated: LevelField::new(shape),
        }
    }
}

/// Per-level diagnostics exported after each step.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDiagnostics {
    pub qv2qi_depos_tend: LevelField,
    pub diag_eff_radius_qc: LevelField,
    pub diag_eff_radius_qi: LevelField,
    pub rho_qi: LevelField,
    pub precip_liq_flux: LevelField,
    pub precip_ice_flux: LevelField,
    pub liq_ice_exchange: LevelField,
    pub vap_liq_exchange: LevelField,
    pub vap_ice_exchange: LevelField,
}

impl LevelDiagnostics {
    /// Zeroed diagnostics
    #[must_use]
    pub fn new(grid: &HostGrid) -> Self {
        let shape = grid.level_shape();
        Self {
            qv2qi_depos_tend: LevelField::new(shape),
            diag_eff_radius_qc: LevelField::new(shape),
            diag_eff_radius_qi: LevelField::new(shape),
            rho_qi: LevelField::new(shape),
            precip_liq_flux: LevelField::new(shape),
            precip_ice_flux: LevelField::new(shape),
            liq_ice_exchange: LevelField::new(shape),
            vap_liq_exchange: LevelField::new(shape),
            vap_ice_exchange: LevelField::new(shape),
        }
    }
}

/// Where a CRM sits in the host model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrmLocation {
    /// Surface height (m)
    pub z0: Real,
    /// Longitude (degrees)
    pub longitude: Real,
    /// Latitude (degrees)
    pub latitude: Real,
}

/// Host CRM state read and written by the driver.
///
/// Fields are public so the host can fill them directly; the driver checks
/// their shapes against the grid before every step.
#[derive(Debug, Clone, PartialEq)]
pub struct CrmState {
    pub grid: HostGrid,
    /// Prognostic microphysics fields
    pub micro: MicroFields,
    /// Liquid/ice static energy (K)
    pub t: CellField,
    /// Absolute temperature (K)
    pub tabs: CellField,
    /// Water vapor
    pub qv: CellField,
    /// Cloud liquid
    pub qcl: CellField,
    /// Cloud ice
    pub qci: CellField,
    /// Precipitating liquid
    pub qpl: CellField,
    /// Precipitating ice (always zero with P3)
    pub qpi: CellField,
    /// Host cloud fraction
    pub cf3d: CellField,
    /// Temperature after the previous step
    pub t_prev: CellField,
    /// Vapor after the previous step
    pub q_prev: CellField,
    pub profiles: LevelProfiles,
    /// Reference grid spacing per CRM (m)
    pub dz: Vec<Real>,
    pub locations: Vec<CrmLocation>,
    /// Accumulated surface precipitation
    pub precsfc: SurfaceField,
    /// Accumulated surface snow
    pub precssfc: SurfaceField,
    pub diagnostics: LevelDiagnostics,
}

impl CrmState {
    /// Zeroed state for a grid. The host fills profiles, `dz` and the
    /// prognostic fields before the first step.
    #[must_use]
    pub fn new(grid: HostGrid) -> Self {
        Self {
            grid,
            micro: MicroFields::new(&grid),
            t: CellField::cells(&grid),
            tabs: CellField::cells(&grid),
            qv: CellField::cells(&grid),
            qcl: CellField::cells(&grid),
            qci: CellField::cells(&grid),
            qpl: CellField::cells(&grid),
            qpi: CellField::cells(&grid),
            cf3d: CellField::cells(&grid),
            t_prev: CellField::cells(&grid),
            q_prev: CellField::cells(&grid),
            profiles: LevelProfiles::new(&grid),
            dz: vec![0.0; grid.ncrms],
            locations: vec![CrmLocation::default(); grid.ncrms],
            precsfc: SurfaceField::new(grid.surface_shape()),
            precssfc: SurfaceField::new(grid.surface_shape()),
            diagnostics: LevelDiagnostics::new(&grid),
        }
    }

    /// Check every field against the grid.
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` naming the first field with the wrong shape,
    /// or `NonPositiveLayerThickness` if any `dz` is not strictly positive
    pub fn validate(&self) -> MicroResult<()> {
        let grid = &self.grid;
        for field in MicroField::ALL {
            check_shape("micro_field", self.micro.get(field), grid.cell_shape())?;
        }
        for (name, field) in [
            ("t", &self.t),
            ("tabs", &self.tabs),
            ("qv", &self.qv),
            ("qcl", &self.qcl),
            ("qci", &self.qci),
            ("qpl", &self.qpl),
            ("qpi", &self.qpi),
            ("cf3d", &self.cf3d),
            ("t_prev", &self.t_prev),
            ("q_prev", &self.q_prev),
        ] {
            check_shape(name, field, grid.cell_shape())?;
        }

        let p = &self.profiles;
        let d = &self.diagnostics;
        for (name, field) in [
            ("pres", &p.pres),
            ("pdel", &p.pdel),
            ("gamaz", &p.gamaz),
            ("adz", &p.adz),
            ("nccn", &p.nccn),
            ("nc_nuceat_tend", &p.nc_nuceat_tend),
            ("ni_activated", &p.ni_activated),
            ("qv2qi_depos_tend", &d.qv2qi_depos_tend),
            ("diag_eff_radius_qc", &d.diag_eff_radius_qc),
            ("diag_eff_radius_qi", &d.diag_eff_radius_qi),
            ("rho_qi", &d.rho_qi),
            ("precip_liq_flux", &d.precip_liq_flux),
            ("precip_ice_flux", &d.precip_ice_flux),
            ("liq_ice_exchange", &d.liq_ice_exchange),
            ("vap_liq_exchange", &d.vap_liq_exchange),
            ("vap_ice_exchange", &d.vap_ice_exchange),
        ] {
            check_shape(name, field, grid.level_shape())?;
        }

        check_shape("precsfc", &self.precsfc, grid.surface_shape())?;
        check_shape("precssfc", &self.precssfc, grid.surface_shape())?;
        check_len("dz", self.dz.len(), grid.ncrms)?;
        check_len("locations", self.locations.len(), grid.ncrms)?;

        // Surface precipitation is scaled by 1/dz
        let bad = self
            .dz
            .iter()
            .enumerate()
            .find(|&(_, &dz)| dz.is_nan() || dz <= 0.0);
        if let Some((icrm, &dz)) = bad {
            return Err(MicroError::NonPositiveLayerThickness { icrm, dz });
        }
        Ok(())
    }
}

fn check_len(field: &'static str, found: usize, expected: usize) -> MicroResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(MicroError::GridMismatch {
            field,
            expected,
            found,
        })
    }
}

fn check_shape<const N: usize>(
    field: &'static str,
    values: &Field<N>,
    shape: [usize; N],
) -> MicroResult<()> {
    let expected = shape.iter().product();
    if values.shape() != shape {
        return Err(MicroError::GridMismatch {
            field,
            expected,
            found: values.data.len(),
        });
    }
    check_len(field, values.data.len(), expected)
}

/// Microphysics budget accumulators owned by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroBudgets {
    /// Surface fluxes, `(field, j, i, icrm)`
    pub fluxbmk: Field<4>,
    /// Top fluxes, `(field, j, i, icrm)`
    pub fluxtmk: Field<4>,
    /// Resolved vertical flux, `(field, k, icrm)` on interfaces
    pub mkwle: Field<3>,
    /// Subgrid vertical flux
    pub mkwsb: Field<3>,
    /// Advective tendency
    pub mkadv: Field<3>,
    /// Diffusive tendency
    pub mkdiff: Field<3>,
    /// Precipitation source, `(k, icrm)` on interfaces
    pub qpsrc: LevelField,
    /// Precipitation evaporation
    pub qpevp: LevelField,
}

impl MicroBudgets {
    /// Zeroed budgets
    #[must_use]
    pub fn new(grid: &HostGrid) -> Self {
        let surface = [NMICRO_FIELDS, grid.ny, grid.nx, grid.ncrms];
        let profile = [NMICRO_FIELDS, grid.nz(), grid.ncrms];
        Self {
            fluxbmk: Field::new(surface),
            fluxtmk: Field::new(surface),
            mkwle: Field::new(profile),
            mkwsb: Field::new(profile),
            mkadv: Field::new(profile),
            mkdiff: Field::new(profile),
            qpsrc: LevelField::new([grid.nz(), grid.ncrms]),
            qpevp: LevelField::new([grid.nz(), grid.ncrms]),
        }
    }

    /// Zero every accumulator
    pub fn reset(&mut self) {
        for field in [&mut self.fluxbmk, &mut self.fluxtmk] {
            field.fill(0.0);
        }
        for field in [
            &mut self.mkwle,
            &mut self.mkwsb,
            &mut self.mkadv,
            &mut self.mkdiff,
        ] {
            field.fill(0.0);
        }
        self.qpsrc.fill(0.0);
        self.qpevp.fill(0.0);
    }
}

/// Absolute temperature from liquid/ice static energy
#[inline]
#[must_use]
pub fn absolute_temperature(t: Real, gamaz: Real, liquid: Real, ice: Real) -> Real {
    t - gamaz + FAC_COND * liquid + FAC_SUB * ice
}

/// Liquid/ice static energy from absolute temperature
#[inline]
#[must_use]
pub fn static_energy(tabs: Real, gamaz: Real, liquid: Real, ice: Real) -> Real {
    tabs + gamaz - FAC_COND * liquid - FAC_SUB * ice
}

/// Inverse Exner function for a pressure in hPa
#[inline]
#[must_use]
pub fn inverse_exner(pres_hpa: Real) -> Real {
    1.0 / (pres_hpa * 1.0e-3).powf(RGAS / CP)
}

/// Diagnose vapor and condensate species from the prognostic fields.
///
/// P3 has no separate precipitating ice, so all ice is cloud ice.
pub fn diagnose(state: &mut CrmState) {
    let micro = &state.micro;
    (
        state.qv.data.par_iter_mut(),
        state.qcl.data.par_iter_mut(),
        state.qci.data.par_iter_mut(),
        state.qpl.data.par_iter_mut(),
        state.qpi.data.par_iter_mut(),
        micro.qt.data.par_iter(),
        micro.qc.data.par_iter(),
        micro.qr.data.par_iter(),
        micro.qi.data.par_iter(),
    )
        .into_par_iter()
        .for_each(|(qv, qcl, qci, qpl, qpi, &qt, &qc, &qr, &qi)| {
            *qv = qt - qc;
            *qcl = qc;
            *qpl = qr;
            *qci = qi;
            *qpi = 0.0;
        });
}

/// Build a column field from a function of host position `(k, j, i, icrm)`
fn to_columns<F>(grid: &HostGrid, value: F) -> ColumnField
where
    F: Fn(usize, usize, usize, usize) -> Real + Sync,
{
    let mut field = ColumnField::for_grid(grid);
    field
        .data
        .par_chunks_mut(grid.nzm)
        .enumerate()
        .for_each(|(icol, column)| {
            let (i, j, icrm) = grid.column_coords(icol);
            for (k, v) in column.iter_mut().enumerate() {
                *v = value(k, j, i, icrm);
            }
        });
    field
}

/// Overwrite a host field from a function of `(icol, k)`
fn from_columns<F>(grid: &HostGrid, field: &mut CellField, value: F)
where
    F: Fn(usize, usize) -> Real + Sync,
{
    field.data.par_iter_mut().enumerate().for_each(|(offset, v)| {
        let (k, j, i, icrm) = cell_coords(grid, offset);
        *v = value(grid.column_index(i, j, icrm), k);
    });
}

/// Horizontal mean of a column field over each CRM, per level
fn level_mean(grid: &HostGrid, columns: &ColumnField, out: &mut LevelField) {
    let norm = (grid.nx * grid.ny) as Real;
    out.data.par_iter_mut().enumerate().for_each(|(offset, v)| {
        let (k, icrm) = (offset / grid.ncrms, offset % grid.ncrms);
        let mut sum = 0.0;
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                sum += columns.get(grid.column_index(i, j, icrm), k);
            }
        }
        *v = sum / norm;
    });
}

/// Drives a bulk microphysics scheme from host CRM state.
pub struct P3Driver {
    config: MicroConfig,
    grid: HostGrid,
    tables: SharedTables,
    scheme: Box<dyn MicrophysicsScheme>,
    estimator: CloudFractionEstimator,
    budgets: MicroBudgets,
    stats: StepStats,
}

impl P3Driver {
    /// Initialize the driver: zero budgets, diagnose `state` and build the
    /// lookup tables.
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` for a malformed state and any table build error
    pub fn new(
        config: MicroConfig,
        state: &mut CrmState,
        scheme: Box<dyn MicrophysicsScheme>,
    ) -> MicroResult<Self> {
        Self::init(config, state, scheme, None)
    }

    /// Like [`P3Driver::new`], with an initializer for precomputed rain tables.
    ///
    /// # Errors
    ///
    /// Same as [`P3Driver::new`]
    pub fn with_rain_provider(
        config: MicroConfig,
        state: &mut CrmState,
        scheme: Box<dyn MicrophysicsScheme>,
        provider: &dyn RainTableProvider,
    ) -> MicroResult<Self> {
        if config.rain_table_source == RainTableSource::Integrate {
            warn!("Rain table provider ignored, rain tables are integrated in-process");
        }
        Self::init(config, state, scheme, Some(provider))
    }

    /// Initialize with tables that were already built, e.g. shared between
    /// several drivers.
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` for a malformed state
    pub fn with_tables(
        config: MicroConfig,
        state: &mut CrmState,
        scheme: Box<dyn MicrophysicsScheme>,
        tables: SharedTables,
    ) -> MicroResult<Self> {
        state.validate()?;
        let budgets = MicroBudgets::new(&state.grid);
        diagnose(state);
        Ok(Self::assemble(config, state.grid, scheme, tables, budgets))
    }

    fn init(
        config: MicroConfig,
        state: &mut CrmState,
        scheme: Box<dyn MicrophysicsScheme>,
        provider: Option<&dyn RainTableProvider>,
    ) -> MicroResult<Self> {
        state.validate()?;
        let budgets = MicroBudgets::new(&state.grid);
        diagnose(state);

        let mut builder = TableBuilder::new(&config);
        if let Some(provider) = provider {
            builder = builder.with_rain_provider(provider);
        }
        let tables = builder.build()?;

        Ok(Self::assemble(config, state.grid, scheme, tables, budgets))
    }

    fn assemble(
        config: MicroConfig,
        grid: HostGrid,
        scheme: Box<dyn MicrophysicsScheme>,
        tables: SharedTables,
        budgets: MicroBudgets,
    ) -> Self {
        info!(
            "P3 driver ready: {} columns x {} levels, scheme '{}', cloud fraction '{}', saturation adjustment {}",
            grid.ncol(),
            grid.nzm,
            scheme.name(),
            config.cloud_fraction_method,
            if config.saturation_adjustment { "on" } else { "off" }
        );
        Self {
            estimator: CloudFractionEstimator::from_config(&config),
            config,
            grid,
            tables,
            scheme,
            budgets,
            stats: StepStats::default(),
        }
    }

    /// Shared lookup tables
    #[must_use]
    pub fn tables(&self) -> &SharedTables {
        &self.tables
    }

    /// Budget accumulators
    #[must_use]
    pub fn budgets(&self) -> &MicroBudgets {
        &self.budgets
    }

    /// Step timing statistics
    #[must_use]
    pub const fn stats(&self) -> &StepStats {
        &self.stats
    }

    #[must_use]
    pub const fn config(&self) -> &MicroConfig {
        &self.config
    }

    #[must_use]
    pub const fn grid(&self) -> &HostGrid {
        &self.grid
    }

    /// Advance the microphysics by `dt` seconds.
    ///
    /// # Errors
    ///
    /// Returns `GridMismatch` if `state` does not match the driver's grid,
    /// or the scheme's error. A scheme error leaves the host prognostic
    /// fields as they were after the saturation adjustment.
    pub fn step(&mut self, state: &mut CrmState, dt: Real) -> MicroResult<()> {
        let timer = StepTimer::new("p3 step");
        if state.grid != self.grid {
            return Err(MicroError::GridMismatch {
                field: "grid",
                expected: self.grid.ncells(),
                found: state.grid.ncells(),
            });
        }
        state.validate()?;

        diagnose(state);
        if self.config.saturation_adjustment {
            let _adjust = StepTimer::new("saturation adjustment");
            self.adjust_saturation(state);
        }

        let grid = self.grid;
        let (ncol, nlev) = (grid.ncol(), grid.nzm);

        // Potential temperature from static energy
        update_temperature(state);
        let inv_exner = {
            let pres = &state.profiles.pres;
            to_columns(&grid, |k, _, _, icrm| inverse_exner(pres.get([k, icrm])))
        };

        let mut prognostic = self.pack_prognostic(state, &inv_exner);
        let inputs = self.pack_inputs(state, &prognostic, inv_exner);
        let mut outputs = DiagnosticOutputs::new(ncol, nlev);
        let mut history = HistoryOnly::new(ncol, nlev);
        let infrastructure = Infrastructure {
            dt,
            it: 1,
            its: 0,
            ite: ncol,
            kts: 0,
            kte: nlev,
            predict_nc: self.config.predict_nc,
            prescribed_ccn: self.config.prescribed_ccn,
            col_location: (0..ncol)
                .map(|icol| {
                    let loc = state.locations[grid.column_coords(icol).2];
                    [loc.z0, loc.longitude, loc.latitude]
                })
                .collect(),
        };

        {
            let _scheme = StepTimer::new("microphysics scheme");
            self.scheme.run(
                &self.tables,
                &mut prognostic,
                &inputs,
                &mut outputs,
                &infrastructure,
                &mut history,
            )?;
        }

        accumulate_precipitation(state, &outputs, dt);
        unpack_prognostic(state, &prognostic);
        diagnose(state);
        finish_temperature(state, &prognostic.th, &inputs.inv_exner);
        export_diagnostics(state, &outputs, &history);

        let elapsed = timer.elapsed_ms();
        self.stats.record(elapsed);
        debug!(
            "P3 step {} done: dt = {dt} s, {ncol} columns",
            self.stats.steps()
        );
        Ok(())
    }

    /// Relax every cell to saturation and refresh static energy
    fn adjust_saturation(&self, state: &mut CrmState) {
        let grid = self.grid;
        let narrowing = self.config.evaporation_narrowing;
        {
            let pres = &state.profiles.pres;
            let gamaz = &state.profiles.gamaz;
            (
                state.micro.qt.data.par_iter_mut(),
                state.micro.qc.data.par_iter_mut(),
                state.qv.data.par_iter_mut(),
                state.tabs.data.par_iter_mut(),
                state.t.data.par_iter(),
                state.qcl.data.par_iter(),
                state.qpl.data.par_iter(),
                state.qci.data.par_iter(),
                state.qpi.data.par_iter(),
            )
                .into_par_iter()
                .enumerate()
                .for_each(|(offset, (qt, qc, qv, tabs, &t, &qcl, &qpl, &qci, &qpi))| {
                    let (k, _, _, icrm) = cell_coords(&grid, offset);
                    let start = absolute_temperature(t, gamaz.get([k, icrm]), qcl + qpl, qci + qpi);
                    let adjusted = compute_adjusted_state(
                        *qt,
                        *qc,
                        start,
                        pres.get([k, icrm]) * 100.0,
                        narrowing,
                    );
                    *qt = adjusted.qt;
                    *qc = adjusted.qc;
                    *qv = adjusted.qv;
                    *tabs = adjusted.tabs;
                });
        }

        diagnose(state);

        let gamaz = &state.profiles.gamaz;
        (
            state.t.data.par_iter_mut(),
            state.tabs.data.par_iter(),
            state.qcl.data.par_iter(),
            state.qpl.data.par_iter(),
            state.qci.data.par_iter(),
            state.qpi.data.par_iter(),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(offset, (t, &tabs, &qcl, &qpl, &qci, &qpi))| {
                let (k, _, _, icrm) = cell_coords(&grid, offset);
                *t = static_energy(tabs, gamaz.get([k, icrm]), qcl + qpl, qci + qpi);
            });
    }

    fn pack_prognostic(&self, state: &CrmState, inv_exner: &ColumnField) -> PrognosticState {
        let grid = &self.grid;
        let micro = &state.micro;
        let pack = |field: &CellField| to_columns(grid, |k, j, i, icrm| field.get([k, j, i, icrm]));

        let tabs = pack(&state.tabs);
        let mut th = tabs;
        th.data
            .par_iter_mut()
            .zip(inv_exner.data.par_iter())
            .for_each(|(th, &inv)| *th *= inv);

        PrognosticState {
            qc: pack(&micro.qc),
            nc: pack(&micro.nc),
            qr: pack(&micro.qr),
            nr: pack(&micro.nr),
            qi: pack(&micro.qi),
            qm: pack(&micro.qm),
            ni: pack(&micro.ni),
            bm: pack(&micro.bm),
            qv: to_columns(grid, |k, j, i, icrm| {
                micro.qt.get([k, j, i, icrm]) - micro.qc.get([k, j, i, icrm])
            }),
            th,
        }
    }

    fn pack_inputs(
        &self,
        state: &CrmState,
        prognostic: &PrognosticState,
        inv_exner: ColumnField,
    ) -> DiagnosticInputs {
        let grid = &self.grid;
        let profiles = &state.profiles;
        let level = |field: &LevelField| to_columns(grid, |k, _, _, icrm| field.get([k, icrm]));
        let cell = |field: &CellField| to_columns(grid, |k, j, i, icrm| field.get([k, j, i, icrm]));

        let cloud_fraction = cell(&state.cf3d);
        let fractions = self.estimator.estimate(
            &cloud_fraction,
            Condensate {
                qc: &prognostic.qc,
                qr: &prognostic.qr,
                qi: &prognostic.qi,
            },
        );

        DiagnosticInputs {
            nc_nuceat_tend: level(&profiles.nc_nuceat_tend),
            nccn: level(&profiles.nccn),
            ni_activated: level(&profiles.ni_activated),
            inv_qc_relvar: ColumnField::with_value(grid.ncol(), grid.nzm, 1.0),
            cld_frac_i: fractions.ice,
            cld_frac_l: fractions.liquid,
            cld_frac_r: fractions.precip,
            pmid: to_columns(grid, |k, _, _, icrm| profiles.pres.get([k, icrm]) * 100.0),
            dz: to_columns(grid, |k, _, _, icrm| {
                profiles.adz.get([k, icrm]) * state.dz[icrm]
            }),
            pdel: to_columns(grid, |k, _, _, icrm| profiles.pdel.get([k, icrm]) * 100.0),
            inv_exner,
            q_prev: cell(&state.q_prev),
            t_prev: cell(&state.t_prev),
        }
    }
}

/// Absolute temperature from static energy and the current diagnosed species
fn update_temperature(state: &mut CrmState) {
    let grid = state.grid;
    let gamaz = &state.profiles.gamaz;
    (
        state.tabs.data.par_iter_mut(),
        state.t.data.par_iter(),
        state.qcl.data.par_iter(),
        state.qpl.data.par_iter(),
        state.qci.data.par_iter(),
        state.qpi.data.par_iter(),
    )
        .into_par_iter()
        .enumerate()
        .for_each(|(offset, (tabs, &t, &qcl, &qpl, &qci, &qpi))| {
            let (k, _, _, icrm) = cell_coords(&grid, offset);
            *tabs = absolute_temperature(t, gamaz.get([k, icrm]), qcl + qpl, qci + qpi);
        });
}

/// Add this step's surface precipitation to the host accumulators
fn accumulate_precipitation(state: &mut CrmState, outputs: &DiagnosticOutputs, dt: Real) {
    let grid = state.grid;
    let dz = &state.dz;
    (
        state.precsfc.data.par_iter_mut(),
        state.precssfc.data.par_iter_mut(),
    )
        .into_par_iter()
        .enumerate()
        .for_each(|(offset, (precsfc, precssfc))| {
            let icrm = offset % grid.ncrms;
            let i = (offset / grid.ncrms) % grid.nx;
            let j = offset / grid.ncrms / grid.nx;
            let icol = grid.column_index(i, j, icrm);
            let scale = RHO_WATER * dt / dz[icrm];
            let liq = outputs.precip_liq_surf[icol];
            let ice = outputs.precip_ice_surf[icol];
            *precsfc += (liq + ice) * scale;
            *precssfc += ice * scale;
        });
}

fn unpack_prognostic(state: &mut CrmState, prognostic: &PrognosticState) {
    let grid = state.grid;
    let micro = &mut state.micro;
    from_columns(&grid, &mut micro.qt, |icol, k| {
        prognostic.qv.get(icol, k) + prognostic.qc.get(icol, k)
    });
    for (field, columns) in [
        (&mut micro.qc, &prognostic.qc),
        (&mut micro.nc, &prognostic.nc),
        (&mut micro.qr, &prognostic.qr),
        (&mut micro.nr, &prognostic.nr),
        (&mut micro.qi, &prognostic.qi),
        (&mut micro.qm, &prognostic.qm),
        (&mut micro.ni, &prognostic.ni),
        (&mut micro.bm, &prognostic.bm),
    ] {
        from_columns(&grid, field, |icol, k| columns.get(icol, k));
    }
}

/// Temperature and static energy from the scheme's potential temperature;
/// records `t_prev` and `q_prev` for the next step
fn finish_temperature(state: &mut CrmState, th: &ColumnField, inv_exner: &ColumnField) {
    let grid = state.grid;
    let gamaz = &state.profiles.gamaz;
    (
        state.tabs.data.par_iter_mut(),
        state.t.data.par_iter_mut(),
        state.t_prev.data.par_iter_mut(),
        state.q_prev.data.par_iter_mut(),
        state.qv.data.par_iter(),
        state.qcl.data.par_iter(),
        state.qpl.data.par_iter(),
        state.qci.data.par_iter(),
        state.qpi.data.par_iter(),
    )
        .into_par_iter()
        .enumerate()
        .for_each(
            |(offset, (tabs, t, t_prev, q_prev, &qv, &qcl, &qpl, &qci, &qpi))| {
                let (k, j, i, icrm) = cell_coords(&grid, offset);
                let icol = grid.column_index(i, j, icrm);
                *tabs = th.get(icol, k) / inv_exner.get(icol, k);
                *t = static_energy(*tabs, gamaz.get([k, icrm]), qcl + qpl, qci + qpi);
                *t_prev = *tabs;
                *q_prev = qv;
            },
        );
}

fn export_diagnostics(state: &mut CrmState, outputs: &DiagnosticOutputs, history: &HistoryOnly) {
    let grid = state.grid;
    let d = &mut state.diagnostics;
    for (columns, level) in [
        (&outputs.qv2qi_depos_tend, &mut d.qv2qi_depos_tend),
        (&outputs.diag_eff_radius_qc, &mut d.diag_eff_radius_qc),
        (&outputs.diag_eff_radius_qi, &mut d.diag_eff_radius_qi),
        (&outputs.rho_qi, &mut d.rho_qi),
        (&outputs.precip_liq_flux, &mut d.precip_liq_flux),
        (&outputs.precip_ice_flux, &mut d.precip_ice_flux),
        (&history.liq_ice_exchange, &mut d.liq_ice_exchange),
        (&history.vap_liq_exchange, &mut d.vap_liq_exchange),
        (&history.vap_ice_exchange, &mut d.vap_ice_exchange),
    ] {
        level_mean(&grid, columns, level);
    }
}
