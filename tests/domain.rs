use phonon_sim::core::{
    DispersionData, Material, Model, ModelBuilder, ModelSimulator, Point, RelaxationData,
    SimulatorConfig, SurfaceKind,
};
use phonon_sim::error::Result;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn gray(rate: f64) -> Result<Material> {
    Material::new(
        "gray",
        DispersionData::debye(6000.0, 1e13),
        RelaxationData::constant(rate),
        300.0,
    )
}

fn config(seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        seed: Some(seed),
        step_time: 0.005,
        initial_phonons: 500,
        life_steps: 10_000,
        parallel: false,
        ..SimulatorConfig::default()
    }
}

fn assert_all_located(model: &Model, sim: &ModelSimulator<'_>) {
    for p in sim.live_phonons() {
        assert_eq!(
            model.locate(&p.position),
            Some(p.cell),
            "phonon {} at ({}, {}) escaped cell {}",
            p.id,
            p.position.x,
            p.position.y,
            p.cell.0
        );
    }
}

/// Ballistic phonons in a non-convex cell bounce off the re-entrant corner and never leave.
#[test]
fn ballistic_phonons_stay_inside_l_shaped_cell() -> Result<()> {
    init_logging();
    let mut b = ModelBuilder::new(300.0);
    let m = b.add_material(gray(0.0)?)?;
    let cell = b.add_cell(
        vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 40.0),
            Point::new(40.0, 40.0),
            Point::new(40.0, 100.0),
            Point::new(0.0, 100.0),
        ],
        m,
        0.3,
    )?;
    b.set_initial_temperature(cell, 305.0)?;
    let model = b.build()?;

    let mut sim = ModelSimulator::new(&model, config(101))?;
    let n = sim.live_phonons().count();
    for _ in 0..60 {
        sim.step()?;
        assert_all_located(&model, &sim);
    }
    assert_eq!(sim.live_phonons().count(), n, "nothing can absorb or retire here");
    assert!(sim.ledger().imbalance().abs() <= 1e-9 * sim.ledger().throughput);
    Ok(())
}

/// Phonons cross a T-junction in both directions and always land in the cell holding them.
#[test]
fn t_junction_transport_keeps_cells_consistent() -> Result<()> {
    init_logging();
    let mut b = ModelBuilder::new(300.0);
    let m = b.add_material(gray(5e11)?)?;
    let a = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(100.0, 100.0), m, 0.0)?;
    b.add_rect_cell(Point::new(100.0, 0.0), Point::new(200.0, 50.0), m, 0.0)?;
    b.add_rect_cell(Point::new(100.0, 50.0), Point::new(200.0, 100.0), m, 0.0)?;
    b.set_initial_temperature(a, 310.0)?;
    let model = b.build()?;

    let transitions = model.cells()[a.0]
        .boundary()
        .surfaces()
        .iter()
        .filter(|s| matches!(s.kind(), SurfaceKind::Transition { .. }))
        .count();
    assert_eq!(transitions, 2, "right edge of A is split at the junction");

    let mut sim = ModelSimulator::new(&model, config(202))?;
    for _ in 0..100 {
        sim.step()?;
        assert_all_located(&model, &sim);
    }
    let mut per_cell = [0usize; 3];
    for p in sim.live_phonons() {
        per_cell[p.cell.0] += 1;
    }
    assert!(per_cell.iter().all(|&n| n > 0), "population {per_cell:?}");
    Ok(())
}
