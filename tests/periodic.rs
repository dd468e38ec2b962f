use phonon_sim::core::{
    DispersionData, EmitSource, Material, Model, ModelBuilder, ModelSimulator, PeriodicConfig,
    Point, RelaxationData, RunStatus, SensorSpec, SimulationMode, SimulationReport,
    SimulatorConfig,
};
use phonon_sim::error::Result;
use std::f64::consts::PI;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A ballistic strip driven from the left by a wall 10 K above equilibrium and drained on the
/// right. Sensors: the left cell as a region, and the edge between the two cells.
fn strip(phasor: bool) -> Result<(Model, f64)> {
    let material = Material::new(
        "debye",
        DispersionData::debye(6000.0, 1e13),
        RelaxationData::default(),
        300.0,
    )?;
    let source = EmitSource::from_temperature(&material, 310.0, 300.0)?.absorbing(false);
    let flux = source.flux;

    let mut b = ModelBuilder::new(300.0);
    b.set_mode(SimulationMode::Periodic(PeriodicConfig {
        warmup_steps: 40,
        period_steps: 20,
        periods: 3,
        bins: 4,
        phasor,
    }));
    let m = b.add_material(material)?;
    let left = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(100.0, 50.0), m, 1.0)?;
    b.add_rect_cell(Point::new(100.0, 0.0), Point::new(200.0, 50.0), m, 1.0)?;
    b.set_emit_surface(Point::new(0.0, 0.0), Point::new(0.0, 50.0), source)?;
    b.set_emit_surface(
        Point::new(200.0, 0.0),
        Point::new(200.0, 50.0),
        EmitSource::sink(),
    )?;
    b.add_sensor(SensorSpec::Cells(vec![left]))?;
    b.add_sensor(SensorSpec::Edge(
        Point::new(100.0, 0.0),
        Point::new(100.0, 50.0),
    ))?;
    Ok((b.build()?, flux))
}

fn run(model: &Model, seed: u64) -> Result<SimulationReport> {
    ModelSimulator::new(
        model,
        SimulatorConfig {
            seed: Some(seed),
            step_time: 0.01,
            phonons_per_step: 300,
            ..SimulatorConfig::default()
        },
    )?
    .run()
}

fn check_response(report: &SimulationReport, flux: f64) {
    assert_eq!(report.status, RunStatus::Converged);
    assert_eq!(report.steps, 40 + 3 * 20);

    let region = &report.readings[0];
    let h = region.harmonic.expect("region harmonic");
    assert!(h.amplitude > 0.0 && h.amplitude.is_finite(), "{h:?}");
    assert_eq!(region.flagged, 0);

    let edge = &report.readings[1];
    let h = edge.harmonic.expect("edge harmonic");
    let ratio = h.amplitude / flux;
    assert!(ratio > 0.3 && ratio < 1.2, "flux amplitude ratio {ratio}");
    // The response trails the forcing by the transit time.
    assert!(h.phase > 0.0 && h.phase < PI / 2.0, "phase lag {}", h.phase);
}

#[test]
fn modulated_emission_produces_lagging_harmonic() -> Result<()> {
    init_logging();
    let (model, flux) = strip(false)?;
    let report = run(&model, 31)?;
    check_response(&report, flux);
    assert_eq!(report.readings[1].series.len(), 60);
    Ok(())
}

#[test]
fn phasor_emission_produces_lagging_harmonic() -> Result<()> {
    init_logging();
    let (model, flux) = strip(true)?;
    let report = run(&model, 32)?;
    check_response(&report, flux);
    Ok(())
}
