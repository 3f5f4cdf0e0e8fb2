//! Physical constants and fixed lookup-table dimensions.

/// Floating point type used for all thermodynamic state and tables.
pub type Real = f64;

/// Specific heat of dry air at constant pressure (J/(kg·K))
pub const CP: Real = 1004.0;
/// Gas constant for dry air (J/(kg·K))
pub const RGAS: Real = 287.0;
/// Latent heat of condensation (J/kg)
pub const LCOND: Real = 2.5104e6;
/// Latent heat of sublimation (J/kg)
pub const LSUB: Real = 2.8440e6;
/// Temperature change per unit condensed mixing ratio (K)
pub const FAC_COND: Real = LCOND / CP;
/// Temperature change per unit deposited mixing ratio (K)
pub const FAC_SUB: Real = LSUB / CP;
/// Liquid water density used for precipitation depth (kg/m³)
pub const RHO_WATER: Real = 1000.0;

/// Prognostic microphysics fields carried by the host (`qt, qc, nc, qr, nr, qi, qm, ni, bm`)
pub const NMICRO_FIELDS: usize = 9;

/// Smallest mixing ratio treated as non-zero condensate (kg/kg)
pub const Q_SMALL: Real = 1.0e-14;
/// Floor for cloud and precipitation area fractions
pub const MIN_CLOUD_FRACTION: Real = 1.0e-4;

// Lookup table dimensions

/// Entries in the rain shape parameter table
pub const MU_R_TABLE_DIM: usize = 150;
/// Rain fallspeed table: mean diameter bins
pub const VTABLE_DIM0: usize = 300;
/// Rain fallspeed table: shape parameter bins
pub const VTABLE_DIM1: usize = 10;
/// Entries in the droplet distribution width table
pub const DNU_SIZE: usize = 16;
/// Ice tables: bulk rime density bins
pub const DENSIZE: usize = 5;
/// Ice tables: rime fraction bins
pub const RIMSIZE: usize = 4;
/// Ice tables: normalized ice size bins
pub const ISIZE: usize = 50;
/// Collection table: rain collector size bins
pub const RCOLLSIZE: usize = 30;
/// Stored properties per ice growth record
pub const ICE_TABLE_SIZE: usize = 12;
/// Stored properties per collection record
pub const COLLECT_TABLE_SIZE: usize = 2;

/// Shape parameter used to fill the `mu_r` table when integrating in-process
pub const MU_R_CONST: Real = 1.0;

/// Default lookup table base path; the version string is appended to it
pub const P3_LOOKUP_BASE: &str = "p3_lookup_table_1.dat-v";
/// Ice table version this build expects
pub const P3_VERSION: &str = "4.1.1";
