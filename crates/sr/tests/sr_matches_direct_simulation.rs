//! `SR(grid, src)` and a direct single-source simulation on the same
//! grid must produce identical receptor concentrations to within 1e-6
//! relative.

use inmap_core::cell::CellId;
use inmap_core::config::{ConvergenceConfig, MutationSchedule, NestSchedule, RunConfig};
use inmap_core::ctmdata::CtmData;
use inmap_core::geom::rect;
use inmap_core::grid::build::build_grid;
use inmap_core::mechanism::TrivialChem;
use inmap_core::runner::{CancellationToken, Runner};
use inmap_core::units::EmissionRate;
use inmap_sr::{BuilderConfig, MechanismFactory, SrBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

fn sr_config() -> RunConfig {
    let mut output_vars = BTreeMap::new();
    output_vars.insert("Tracer".to_string(), "Tracer".to_string());
    RunConfig {
        grid_proj: Some("lcc".to_string()),
        nx: 4,
        ny: 1,
        nz: 1,
        dx: 1000.0,
        dy: 1000.0,
        cfl_safety_factor: 0.9,
        nests: NestSchedule::default(),
        mutation: MutationSchedule { interval_seconds: 1e12, ..MutationSchedule::default() },
        convergence: ConvergenceConfig { num_iterations: 5, ..ConvergenceConfig::default() },
        output_vars,
        output_all_layers: false,
    }
}

#[test]
fn sr_row_matches_direct_single_source_run() {
    let ctm = CtmData::uniform(4, 1, 1, 1000.0, 1000.0, 100.0, 2.0, 0.0);
    let grid = build_grid(&ctm, &TrivialChem::new(), vec![], vec![], &[], &[], &NestSchedule::default()).unwrap();
    let receptor_ids: Vec<CellId> = grid.layer_cells(0).to_vec();
    let factory: MechanismFactory = Arc::new(|| Box::new(TrivialChem::new()));
    let config = sr_config();

    let builder = SrBuilder::new(BuilderConfig { n_workers: 1, ..BuilderConfig::default() });
    let result = builder.build(
        &grid,
        &ctm,
        factory,
        &config,
        &[0],
        1, // a single source column (ix=0): this is the source under test
        receptor_ids.clone(),
        "ug/s",
        &CancellationToken::new(),
    );
    assert!(result.missing.is_empty());
    let sr_row = result.matrix.row(0, 0).to_vec();

    // Direct simulation: the exact same unit (1 ug/s) source injected at
    // the column-0 footprint, run with the same config.
    let source_footprint = rect(0.0, 0.0, 1000.0, 1000.0);
    let mut runner = Runner::init(grid.clone(), ctm, Box::new(TrivialChem::new()), config).unwrap();
    runner.inject_emissions(&source_footprint, &[(0, EmissionRate::new(1.0))]);
    runner.run();

    for (i, &receptor) in receptor_ids.iter().enumerate() {
        let direct = runner.grid().cell(receptor).unwrap().cf[0].value();
        let from_sr = sr_row[i];
        let scale = direct.abs().max(1e-12);
        assert!(
            (from_sr - direct).abs() / scale < 1e-6,
            "receptor {i}: SR={from_sr}, direct={direct}"
        );
    }
}
