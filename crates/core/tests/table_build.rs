//! Table construction from a lookup file plus in-process rain integration
mod common;

use approx::assert_relative_eq;
use crm_p3_core::constants::{
    COLLECT_TABLE_SIZE, DENSIZE, ICE_TABLE_SIZE, ISIZE, MU_R_TABLE_DIM, RCOLLSIZE, RIMSIZE,
    VTABLE_DIM0, VTABLE_DIM1,
};
use crm_p3_core::tables::rain::FALLSPEED_CAP;
use crm_p3_core::tables::{RainFallspeedTable, ShapeParameterTable};
use crm_p3_core::{MicroConfig, MicroError, MicroResult, RainTableSource, RainTables, TableBuilder};

#[test]
fn test_integrated_tables_are_finite_and_non_negative() {
    let table = common::write_table("4.1.1", "4.1.1");
    let config = MicroConfig::default()
        .with_lookup_base(table.base.clone())
        .with_rain_table_source(RainTableSource::Integrate);
    let tables = TableBuilder::new(&config).build().unwrap();

    let fallspeed = &tables.rain.fallspeed;
    for (name, values) in [
        ("vn", fallspeed.vn()),
        ("vm", fallspeed.vm()),
        ("revap", fallspeed.revap()),
    ] {
        assert_eq!(values.len(), VTABLE_DIM0 * VTABLE_DIM1);
        for (idx, &v) in values.iter().enumerate() {
            assert!(v.is_finite() && v >= 0.0, "{name}[{idx}] = {v}");
        }
    }

    // Weighted means of a capped fallspeed never exceed the cap
    for d_bin in 0..VTABLE_DIM0 {
        for s_bin in 0..VTABLE_DIM1 {
            let entry = fallspeed.get(d_bin, s_bin);
            assert!(entry.vn <= FALLSPEED_CAP + 1e-9, "vn({d_bin},{s_bin}) = {}", entry.vn);
            assert!(entry.vm <= FALLSPEED_CAP + 1e-9, "vm({d_bin},{s_bin}) = {}", entry.vm);
            assert!(entry.vm >= entry.vn * (1.0 - 1e-9), "vm < vn at ({d_bin},{s_bin}): {entry:?}");
            // Every shape bin integrates the same distribution
            assert_eq!(entry, fallspeed.get(d_bin, 0), "shape bin {s_bin} differs at {d_bin}");
        }
    }

    // Bigger drops fall faster
    assert!(fallspeed.get(250, 1).vm > fallspeed.get(10, 1).vm);

    assert_eq!(tables.rain.mu_r.as_slice().len(), MU_R_TABLE_DIM);
    assert!(tables.rain.mu_r.as_slice().iter().all(|&mu| mu == 1.0));
}

#[test]
fn test_ice_tables_fully_populated_from_file() {
    let table = common::write_table("4.1.1", "4.1.1");
    let config = MicroConfig::default()
        .with_lookup_base(table.base.clone())
        .with_rain_table_source(RainTableSource::Precomputed);
    let provider = || -> MicroResult<RainTables> {
        Ok(RainTables {
            mu_r: ShapeParameterTable::constant(1.0),
            fallspeed: RainFallspeedTable::from_arrays(
                vec![0.5; VTABLE_DIM0 * VTABLE_DIM1],
                vec![0.7; VTABLE_DIM0 * VTABLE_DIM1],
                vec![0.9; VTABLE_DIM0 * VTABLE_DIM1],
            )?,
        })
    };
    let tables = TableBuilder::new(&config)
        .with_rain_provider(&provider)
        .build()
        .unwrap();

    let growth = &tables.ice.growth;
    assert_eq!(growth.as_slice().len(), DENSIZE * RIMSIZE * ISIZE * ICE_TABLE_SIZE);
    for dens in 0..DENSIZE {
        for rime in 0..RIMSIZE {
            for size in 0..ISIZE {
                // First stored property is file column 2, last is column 14
                assert_eq!(growth.get(dens, rime, size, 0), common::ice_value(dens, rime, size, 2));
                assert_eq!(growth.get(dens, rime, size, 11), common::ice_value(dens, rime, size, 14));
            }
        }
    }

    let collection = &tables.ice.collection;
    assert_eq!(
        collection.as_slice().len(),
        DENSIZE * RIMSIZE * ISIZE * RCOLLSIZE * COLLECT_TABLE_SIZE
    );
    for collector in 0..RCOLLSIZE {
        assert_relative_eq!(
            collection.get(3, 2, 40, collector, 0),
            common::collect_value(3, collector).log10(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            collection.get(3, 2, 40, collector, 1),
            common::collect_value(4, collector).log10(),
            epsilon = 1e-12
        );
    }
    assert_eq!(tables.rain.fallspeed.get(0, 0).vm, 0.7);
}

#[test]
fn test_version_mismatch_fails_initialization() {
    let table = common::write_table("4.1.1", "3.9.0");
    let config = MicroConfig::default().with_lookup_base(table.base.clone());
    let err = TableBuilder::new(&config).build().unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, MicroError::VersionMismatch { .. }), "{msg}");
    assert!(msg.contains("4.1.1") && msg.contains("3.9.0"), "{msg}");
}

#[test]
fn test_missing_table_file_fails_initialization() {
    let config = MicroConfig::default().with_lookup_base("/no/such/dir/p3_lookup_table_1.dat-v");
    let err = TableBuilder::new(&config).build().unwrap_err();
    assert!(err.to_string().contains("p3_lookup_table_1.dat-v4.1.1"), "{err}");
}
