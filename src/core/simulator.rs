//! Step-driven phonon transport over a [`Model`].

use crate::core::builder::{
    Builder, CellOriginBuilder, PhasorBuilder, PhononBuilder, SurfaceOriginBuilder,
};
use crate::core::cell::Advance;
use crate::core::controller::{
    Controller, PeriodicController, SensorController, SteadyStateController, StepClock,
    TransientController,
};
use crate::core::event::{Event, EventKind};
use crate::core::interpreter::{Calibration, SensorInterpreter, SensorReading};
use crate::core::model::{Model, SimulationMode};
use crate::core::phonon::Phonon;
use crate::core::sensor::SensorId;
use crate::core::surface::SurfaceOutcome;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use rand::{rng, rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

/// Events a single phonon may take part in during one step before the run is aborted.
pub const MAX_EVENTS_PER_STEP: u64 = 10_000;

/// Relative tolerance of the per-step energy balance.
const LEDGER_TOLERANCE: f64 = 1e-9;

/// Adaptive step-size policy.
///
/// Fields:
/// - `interval`: steps between adjustments; 0 disables adaptation
/// - `target_flights`: desired step length in units of the mean free-flight time
/// - `min_step`, `max_step`: bounds on the step length (ns)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveStep {
    pub interval: u64,
    pub target_flights: f64,
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for AdaptiveStep {
    fn default() -> Self {
        Self {
            interval: 0,
            target_flights: 1.0,
            min_step: 1e-6,
            max_step: 1e3,
        }
    }
}

impl AdaptiveStep {
    pub fn validate(&self) -> Result<()> {
        if !self.target_flights.is_finite() || self.target_flights <= 0.0 {
            return Err(Error::InvalidParam(
                "adaptive target_flights must be finite and > 0".into(),
            ));
        }
        if !self.min_step.is_finite()
            || !self.max_step.is_finite()
            || self.min_step <= 0.0
            || self.min_step > self.max_step
        {
            return Err(Error::InvalidParam(
                "adaptive step bounds need 0 < min_step <= max_step".into(),
            ));
        }
        Ok(())
    }
}

/// Run configuration.
///
/// Fields:
/// - `seed`: master seed; drawn from the OS when `None`
/// - `step_time`: initial step length (ns)
/// - `max_steps`: step ceiling
/// - `phonons_per_step`: emission quota that sets the bundle energy when sources exist
/// - `initial_phonons`: initial population size when there are no sources
/// - `life_steps`: steps a phonon lives before it is retired
/// - `parallel`: trace phonons on the rayon pool
/// - `adaptive`: step-size adaptation
/// - `calibration`: sensor interpretation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    pub seed: Option<u64>,
    pub step_time: f64,
    pub max_steps: u64,
    pub phonons_per_step: usize,
    pub initial_phonons: usize,
    pub life_steps: u32,
    pub parallel: bool,
    pub adaptive: AdaptiveStep,
    pub calibration: Calibration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            step_time: 0.01,
            max_steps: 10_000,
            phonons_per_step: 1000,
            initial_phonons: 10_000,
            life_steps: 1000,
            parallel: true,
            adaptive: AdaptiveStep::default(),
            calibration: Calibration::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.step_time.is_finite() || self.step_time <= 0.0 {
            return Err(Error::InvalidParam("step_time must be finite and > 0".into()));
        }
        if self.max_steps == 0 {
            return Err(Error::InvalidParam("max_steps must be > 0".into()));
        }
        if self.phonons_per_step == 0 || self.initial_phonons == 0 {
            return Err(Error::InvalidParam(
                "phonons_per_step and initial_phonons must be > 0".into(),
            ));
        }
        if self.life_steps == 0 {
            return Err(Error::InvalidParam("life_steps must be > 0".into()));
        }
        self.adaptive.validate()?;
        self.calibration.validate()
    }
}

/// Repeated runs that rebuild each region sensor's tables at the temperature it measured.
///
/// Fields:
/// - `max_iterations`: run ceiling; 1 disables rebuilding
/// - `tolerance`: relative change of every region temperature below which the solve stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureIteration {
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for TemperatureIteration {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tolerance: 1e-3,
        }
    }
}

impl TemperatureIteration {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParam("max_iterations must be > 0".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(Error::InvalidParam(
                "iteration tolerance must be finite and > 0".into(),
            ));
        }
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every controller reached `Done`.
    Converged,
    /// The step ceiling was hit first.
    StepCeiling,
    /// The caller asked to stop.
    Aborted,
}

/// Energy bookkeeping (J), signed.
///
/// `injected` covers the initial population and every emission; `throughput` is the sum of
/// their magnitudes and scales the balance tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyLedger {
    pub injected: f64,
    pub absorbed: f64,
    pub retired: f64,
    pub live: f64,
    pub throughput: f64,
}

impl EnergyLedger {
    /// Injected energy not accounted for by absorption, retirement or live phonons.
    #[inline]
    pub fn imbalance(&self) -> f64 {
        self.injected - self.absorbed - self.retired - self.live
    }

    /// Errors:
    /// - `Error::Physics` if the imbalance exceeds the relative tolerance.
    pub fn check(&self) -> Result<()> {
        let scale = self.throughput.max(f64::MIN_POSITIVE);
        let imbalance = self.imbalance();
        if imbalance.abs() > LEDGER_TOLERANCE * scale {
            return Err(Error::Physics(format!(
                "energy imbalance {imbalance:e} J (injected {:e}, absorbed {:e}, retired {:e}, live {:e})",
                self.injected, self.absorbed, self.retired, self.live
            )));
        }
        Ok(())
    }

    fn inject(&mut self, energy: f64) {
        self.injected += energy;
        self.throughput += energy.abs();
    }
}

/// Result payload of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub status: RunStatus,
    pub steps: u64,
    /// Simulated time (ns).
    pub time: f64,
    pub bundle_energy: f64,
    pub seed: u64,
    pub ledger: EnergyLedger,
    pub readings: Vec<SensorReading>,
    /// Runs behind this report; more than one only from [`run_iterative`].
    pub iterations: u32,
}

/// A live phonon with its private random stream.
#[derive(Debug, Clone)]
struct LivePhonon {
    phonon: Phonon,
    rng: StdRng,
    /// Offset into the current step at which tracing starts (ns).
    start: f64,
}

/// Outcome of tracing one phonon through one step.
#[derive(Debug, Default)]
struct Trace {
    events: Vec<Event>,
    absorbed: bool,
    flight_sum: f64,
    flights: u64,
}

/// The stepping engine.
#[derive(Debug)]
pub struct ModelSimulator<'m> {
    model: &'m Model,
    config: SimulatorConfig,
    seed: u64,
    rng: StdRng,
    live: Vec<LivePhonon>,
    controllers: Vec<Controller<'m>>,
    interpreters: Vec<SensorInterpreter<'m>>,
    step: u64,
    time: f64,
    dt: f64,
    next_id: u64,
    bundle: f64,
    ledger: EnergyLedger,
    flight_sum: f64,
    flights: u64,
}

impl<'m> ModelSimulator<'m> {
    /// Prepare a run: controllers and interpreters per sensor, bundle energy, and the initial
    /// population of every cell that starts away from `t_eq`.
    ///
    /// Errors:
    /// - `Error::InvalidParam` for an invalid configuration, or a model with neither sources
    ///   nor an initial temperature deviation.
    pub fn new(model: &'m Model, config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(|| rng().random());
        let rng: StdRng = SeedableRng::seed_from_u64(seed);
        let t_eq = model.t_eq();

        let mut controllers = Vec::with_capacity(model.sensors().len());
        let mut interpreters = Vec::with_capacity(model.sensors().len());
        for sensor in model.sensors() {
            let material = model.material(sensor.material())?;
            let sensor = sensor.clone();
            controllers.push(match *model.mode() {
                SimulationMode::SteadyState(c) => {
                    Controller::SteadyState(SteadyStateController::new(sensor, material, t_eq, c)?)
                }
                SimulationMode::Periodic(c) => {
                    Controller::Periodic(PeriodicController::new(sensor, material, t_eq, c)?)
                }
                SimulationMode::Transient(c) => {
                    Controller::Transient(TransientController::new(sensor, material, t_eq, c)?)
                }
            });
            interpreters.push(SensorInterpreter::new(material, t_eq, config.calibration)?);
        }

        let mut sim = Self {
            model,
            config,
            seed,
            rng,
            live: Vec::new(),
            controllers,
            interpreters,
            step: 0,
            time: 0.0,
            dt: config.step_time,
            next_id: 0,
            bundle: 0.0,
            ledger: EnergyLedger::default(),
            flight_sum: 0.0,
            flights: 0,
        };
        sim.bundle = sim.bundle_energy_for_model()?;
        sim.populate()?;
        sim.ledger.live = sim.live_energy();
        sim.ledger.check()?;
        Ok(sim)
    }

    #[inline]
    pub fn model(&self) -> &'m Model {
        self.model
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Steps taken so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Simulated time (ns).
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Current step length (ns).
    #[inline]
    pub fn step_time(&self) -> f64 {
        self.dt
    }

    #[inline]
    pub fn bundle_energy(&self) -> f64 {
        self.bundle
    }

    #[inline]
    pub fn ledger(&self) -> &EnergyLedger {
        &self.ledger
    }

    pub fn live_phonons(&self) -> impl Iterator<Item = &Phonon> + '_ {
        self.live.iter().map(|lp| &lp.phonon)
    }

    #[inline]
    pub fn controllers(&self) -> &[Controller<'m>] {
        &self.controllers
    }

    /// True once every controller is done. A model without sensors never finishes early.
    pub fn is_done(&self) -> bool {
        !self.controllers.is_empty() && self.controllers.iter().all(|c| c.is_done())
    }

    /// Run until every controller is done or the step ceiling is reached.
    pub fn run(&mut self) -> Result<SimulationReport> {
        self.run_with_abort(&AtomicBool::new(false))
    }

    /// Like [`run`](Self::run), checking `abort` between steps.
    ///
    /// Errors:
    /// - `Error::Physics` if a step breaks a physical invariant; the run cannot continue.
    pub fn run_with_abort(&mut self, abort: &AtomicBool) -> Result<SimulationReport> {
        info!(
            "run start: mode {:?}, seed {}, step {:e} ns, bundle {:e} J, {} phonons, {} sensors",
            self.model.mode(),
            self.seed,
            self.dt,
            self.bundle,
            self.live.len(),
            self.controllers.len()
        );
        let status = loop {
            if self.is_done() {
                break RunStatus::Converged;
            }
            if abort.load(Ordering::Relaxed) {
                break RunStatus::Aborted;
            }
            if self.step >= self.config.max_steps {
                warn!(
                    "step ceiling {} reached before every sensor finished",
                    self.config.max_steps
                );
                break RunStatus::StepCeiling;
            }
            self.step()?;
        };
        info!(
            "run end: {:?} after {} steps, t = {:e} ns, energy imbalance {:e} J",
            status,
            self.step,
            self.time,
            self.ledger.imbalance()
        );
        Ok(self.report(status))
    }

    /// Advance the whole population by one step.
    ///
    /// Errors:
    /// - `Error::Physics` if a phonon cannot be traced or energy is not conserved.
    pub fn step(&mut self) -> Result<()> {
        let (t0, dt) = (self.time, self.dt);
        let mut events = self.emit(t0, dt)?;
        let emitted = events.len();

        let model = self.model;
        let traces: Vec<Trace> = if self.config.parallel {
            self.live
                .par_iter_mut()
                .map(|lp| trace_phonon(model, lp, t0, dt))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.live
                .iter_mut()
                .map(|lp| trace_phonon(model, lp, t0, dt))
                .collect::<Result<Vec<_>>>()?
        };

        let mut absorbed = Vec::with_capacity(traces.len());
        for (lp, tr) in self.live.iter().zip(traces) {
            if tr.absorbed {
                self.ledger.absorbed += lp.phonon.energy();
            }
            absorbed.push(tr.absorbed);
            self.flight_sum += tr.flight_sum;
            self.flights += tr.flights;
            events.extend(tr.events);
        }
        let mut flags = absorbed.into_iter();
        self.live.retain(|_| !flags.next().unwrap_or(false));

        let t1 = t0 + dt;
        let mut retired = 0usize;
        for lp in &mut self.live {
            lp.phonon.life_steps = lp.phonon.life_steps.saturating_sub(1);
            if lp.phonon.life_steps == 0 {
                events.push(Event::new(t1, EventKind::Retire, &lp.phonon)?);
                self.ledger.retired += lp.phonon.energy();
                retired += 1;
            }
        }
        self.live.retain(|lp| lp.phonon.life_steps > 0);
        for lp in &self.live {
            events.push(Event::new(t1, EventKind::Census, &lp.phonon)?);
        }

        events.sort();
        for c in &mut self.controllers {
            for e in &events {
                c.scatter_update(e);
            }
        }
        let clock = StepClock {
            step: self.step,
            time: t0,
            dt,
        };
        for c in &mut self.controllers {
            c.end_step(&clock);
        }

        self.ledger.live = self.live_energy();
        self.ledger.check()?;
        debug!(
            "step {}: t = {:e} ns, {} live, {} emitted, {} retired, {} events",
            self.step,
            t1,
            self.live.len(),
            emitted,
            retired,
            events.len()
        );

        self.step += 1;
        self.time = t1;
        self.adapt_step();
        Ok(())
    }

    /// Interpret every sensor's current measurements.
    pub fn report(&self, status: RunStatus) -> SimulationReport {
        let readings = self
            .controllers
            .iter()
            .zip(&self.interpreters)
            .map(|(c, interp)| interp.interpret(c.sensor(), c.measurements()))
            .collect();
        SimulationReport {
            status,
            steps: self.step,
            time: self.time,
            bundle_energy: self.bundle,
            seed: self.seed,
            ledger: self.ledger,
            readings,
            iterations: 1,
        }
    }

    // ============ Internal helpers ============

    fn live_energy(&self) -> f64 {
        self.live.iter().map(|lp| lp.phonon.energy()).sum()
    }

    /// Energy per phonon: a share of one step's emission, or of the initial deviation.
    fn bundle_energy_for_model(&self) -> Result<f64> {
        let mut emission = 0.0;
        for &sid in self.model.sources() {
            let surface = self.model.surface(sid)?;
            if let Some(src) = surface.emit_source() {
                emission += src.flux.abs() * surface.length() * self.dt;
            }
        }
        if emission > 0.0 {
            return Ok(emission / self.config.phonons_per_step as f64);
        }
        let deviation: f64 = self
            .initial_deviations()?
            .iter()
            .map(|(_, e)| e.abs())
            .sum();
        if deviation > 0.0 {
            return Ok(deviation / self.config.initial_phonons as f64);
        }
        Err(Error::InvalidParam(
            "model has no emitting surface and no cell away from t_eq; nothing to simulate".into(),
        ))
    }

    /// Signed deviational energy of every cell whose initial temperature differs from `t_eq`.
    fn initial_deviations(&self) -> Result<Vec<(usize, f64)>> {
        let t_eq = self.model.t_eq();
        let mut out = Vec::new();
        for (i, cell) in self.model.cells().iter().enumerate() {
            let dt = cell.initial_temperature() - t_eq;
            if dt != 0.0 {
                let material = self.model.material(cell.material())?;
                out.push((i, material.heat_capacity() * cell.area() * dt));
            }
        }
        Ok(out)
    }

    fn populate(&mut self) -> Result<()> {
        let model = self.model;
        for (i, energy) in self.initial_deviations()? {
            let cell = &model.cells()[i];
            let material = model.material(cell.material())?;
            let count = stochastic_round(energy.abs() / self.bundle, &mut self.rng);
            let builder = CellOriginBuilder::new(cell, material, self.bundle.copysign(energy))?;
            let phonons = builder.build(count, &mut self.rng).collect::<Result<Vec<_>>>()?;
            debug!("cell {i}: {count} initial phonons for {energy:e} J");
            for p in phonons {
                self.admit(p, 0.0, 0.0);
            }
        }
        Ok(())
    }

    /// Register a new phonon born `offset` ns into the step starting at `t0`.
    fn admit(&mut self, mut phonon: Phonon, t0: f64, offset: f64) -> Phonon {
        phonon.id = self.next_id;
        self.next_id += 1;
        phonon.birth_time = t0 + offset;
        phonon.life_steps = self.config.life_steps;
        self.ledger.inject(phonon.energy());
        let rng = StdRng::seed_from_u64(stream_seed(self.seed, phonon.id));
        self.live.push(LivePhonon {
            phonon: phonon.clone(),
            rng,
            start: offset,
        });
        phonon
    }

    /// Emission from every source for the step `[t0, t0 + dt)`.
    fn emit(&mut self, t0: f64, dt: f64) -> Result<Vec<Event>> {
        let model = self.model;
        let mut events = Vec::new();
        let (modulation, phasor) = match *model.mode() {
            SimulationMode::Periodic(c) if c.phasor => (1.0, Some(c.period(dt))),
            SimulationMode::Periodic(c) => {
                let phase = c.phase_of(self.step) + 0.5 / c.period_steps as f64;
                ((2.0 * PI * phase).cos(), None)
            }
            _ => (1.0, None),
        };
        for &sid in model.sources() {
            let surface = model.surface(sid)?;
            let Some(src) = surface.emit_source() else {
                continue;
            };
            let energy = src.emission_energy(surface.length(), t0, dt) * modulation;
            if energy == 0.0 {
                continue;
            }
            let count = stochastic_round(energy.abs() / self.bundle, &mut self.rng);
            let material = model.material_of(sid.cell)?;
            let origin =
                SurfaceOriginBuilder::new(surface, material, self.bundle.copysign(energy))?;
            let builder = match phasor {
                Some(period) => Builder::Phasor(PhasorBuilder::new(origin, period)?),
                None => Builder::SurfaceOrigin(origin),
            };
            let phonons = builder.build(count, &mut self.rng).collect::<Result<Vec<_>>>()?;

            let (lo, hi) = match src.window {
                Some((start, duration)) => ((start - t0).max(0.0), (start + duration - t0).min(dt)),
                None => (0.0, dt),
            };
            for p in phonons {
                let offset = lo + (hi - lo) * self.rng.random::<f64>();
                let p = self.admit(p, t0, offset);
                events.push(Event::new(t0 + offset, EventKind::Emit, &p)?.at_surface(sid));
            }
        }
        Ok(events)
    }

    fn adapt_step(&mut self) {
        let a = self.config.adaptive;
        if a.interval == 0
            || matches!(self.model.mode(), SimulationMode::Periodic(_))
            || self.step % a.interval != 0
        {
            return;
        }
        let (sum, n) = (self.flight_sum, self.flights);
        self.flight_sum = 0.0;
        self.flights = 0;
        if n == 0 {
            return;
        }
        let target = (a.target_flights * sum / n as f64).clamp(a.min_step, a.max_step);
        let next = target.clamp(0.5 * self.dt, 2.0 * self.dt);
        if next != self.dt {
            debug!(
                "step {}: step time {:e} -> {:e} ns (mean flight {:e} ns)",
                self.step,
                self.dt,
                next,
                sum / n as f64
            );
            self.dt = next;
        }
    }
}

/// Run `model` until its region temperatures settle.
///
/// After each run every region sensor's calibration and scattering tables are rebuilt at the
/// mean temperature it measured, and the model runs again from scratch with the same seed.
/// The loop ends once no region temperature moves by more than the relative tolerance, or at
/// the iteration ceiling. Phasor runs are linear in the forcing and run once.
///
/// Errors:
/// - as for [`ModelSimulator::new`] and [`ModelSimulator::run`], and `Error::InvalidParam`
///   for an invalid iteration policy.
pub fn run_iterative(
    model: &Model,
    config: SimulatorConfig,
    iteration: TemperatureIteration,
) -> Result<SimulationReport> {
    iteration.validate()?;
    let config = SimulatorConfig {
        seed: Some(config.seed.unwrap_or_else(|| rng().random())),
        ..config
    };
    let max_iterations = match *model.mode() {
        SimulationMode::Periodic(c) if c.phasor => 1,
        _ => iteration.max_iterations,
    };

    // Tables start at the reference temperature.
    let mut tabulated: Vec<(SensorId, f64)> = Vec::new();
    let mut retabulated: Option<Model> = None;
    let mut iterations = 0;
    loop {
        iterations += 1;
        let current = retabulated.as_ref().unwrap_or(model);
        let mut report = ModelSimulator::new(current, config)?.run()?;
        report.iterations = iterations;

        let measured: Vec<(SensorId, f64)> = report
            .readings
            .iter()
            .filter_map(|r| r.temperature.map(|t| (r.sensor, t.mean)))
            .collect();
        let moved = measured
            .iter()
            .map(|&(id, t)| {
                let before = tabulated
                    .iter()
                    .find(|(j, _)| *j == id)
                    .map_or(model.t_eq(), |&(_, b)| b);
                (t - before).abs() / before
            })
            .fold(0.0, f64::max);
        info!("iteration {iterations}: largest relative temperature change {moved:e}");
        if moved <= iteration.tolerance || measured.is_empty() {
            return Ok(report);
        }
        if iterations >= max_iterations {
            if max_iterations > 1 {
                warn!(
                    "region temperatures still moving by {moved:e} after {iterations} iterations"
                );
            }
            return Ok(report);
        }
        retabulated = Some(model.retabulated(&measured)?);
        tabulated = measured;
    }
}

/// Follow one phonon through the rest of the step.
fn trace_phonon(model: &Model, lp: &mut LivePhonon, t0: f64, dt: f64) -> Result<Trace> {
    let mut out = Trace::default();
    let mut elapsed = lp.start;
    lp.start = 0.0;
    let mut seq = 1u32;
    let mut count = 0u64;
    let p = &mut lp.phonon;

    while elapsed < dt {
        let cell = model.cell(p.cell)?;
        let advance = cell.advance(model, p, dt - elapsed, &mut lp.rng)?;
        elapsed += advance.elapsed();
        let t = t0 + elapsed.min(dt);
        let event = match advance {
            Advance::Drift { .. } => break,
            Advance::Scatter { mechanism, .. } => {
                if let Some(f) = p.flight_remaining.filter(|f| f.is_finite()) {
                    out.flight_sum += f;
                    out.flights += 1;
                }
                Event::new(t, EventKind::Scatter(mechanism), p)?
            }
            Advance::Surface {
                surface, outcome, ..
            } => {
                let kind = match outcome {
                    SurfaceOutcome::SpecularReflect => EventKind::Reflect { specular: true },
                    SurfaceOutcome::DiffuseReflect => EventKind::Reflect { specular: false },
                    SurfaceOutcome::Transmit { neighbor } => EventKind::Transmit { to: neighbor },
                    SurfaceOutcome::Absorb => EventKind::Absorb,
                };
                Event::new(t, kind, p)?
                    .at_surface(surface)
                    .in_cell(surface.cell)
            }
        };
        let absorbed = matches!(event.kind, EventKind::Absorb);
        out.events.push(Event { seq, ..event });
        seq += 1;
        p.bump_event_count();
        count += 1;
        if absorbed {
            out.absorbed = true;
            break;
        }
        if count > MAX_EVENTS_PER_STEP {
            return Err(Error::Physics(format!(
                "phonon {} exceeded {MAX_EVENTS_PER_STEP} events in one step at ({}, {}) in cell {}",
                p.id, p.position.x, p.position.y, p.cell.0
            )));
        }
    }
    Ok(out)
}

/// `floor(x)` plus one with probability `fract(x)`. Values within rounding noise of an
/// integer are taken as that integer.
fn stochastic_round<R: Rng + ?Sized>(x: f64, rng: &mut R) -> usize {
    let nearest = x.round();
    if (x - nearest).abs() <= 1e-9 * nearest.max(1.0) {
        return nearest as usize;
    }
    let whole = x.floor();
    let extra = if rng.random::<f64>() < x - whole { 1 } else { 0 };
    whole as usize + extra
}

/// Independent, reproducible stream seed for phonon `id` of a run seeded with `seed`.
#[inline]
fn stream_seed(seed: u64, id: u64) -> u64 {
    let mut z = seed ^ id.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::TransientConfig;
    use crate::core::geometry::Point;
    use crate::core::material::{DispersionData, Material, RelaxationData};
    use crate::core::model::ModelBuilder;
    use crate::core::model::SensorSpec;
    use crate::core::sensor::SensorLocation;
    use crate::core::surface::EmitSource;
    use approx::assert_relative_eq;

    fn debye(rate: f64) -> Result<Material> {
        Material::new(
            "debye",
            DispersionData::debye(5000.0, 1e13),
            RelaxationData::constant(rate),
            300.0,
        )
    }

    fn config(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed: Some(seed),
            step_time: 0.01,
            max_steps: 50,
            phonons_per_step: 50,
            initial_phonons: 200,
            life_steps: 20,
            parallel: false,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn bundle_from_emission_quota() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(0.0)?)?;
        b.add_rect_cell(Point::new(0.0, 0.0), Point::new(10.0, 10.0), m, 1.0)?;
        b.set_emit_surface(Point::new(0.0, 0.0), Point::new(0.0, 10.0), EmitSource::new(2.0)?)?;
        let model = b.build()?;
        let sim = ModelSimulator::new(&model, config(1))?;
        assert_relative_eq!(sim.bundle_energy(), 2.0 * 10.0 * 0.01 / 50.0, max_relative = 1e-12);
        assert_eq!(sim.live_phonons().count(), 0);
        Ok(())
    }

    #[test]
    fn initial_population_matches_deviation() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(1e11)?)?;
        let hot = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(10.0, 10.0), m, 1.0)?;
        let cold = b.add_rect_cell(Point::new(10.0, 0.0), Point::new(20.0, 10.0), m, 1.0)?;
        b.set_initial_temperature(hot, 310.0)?;
        b.set_initial_temperature(cold, 295.0)?;
        let model = b.build()?;
        let sim = ModelSimulator::new(&model, config(2))?;
        let n = sim.live_phonons().count() as f64;
        assert!((n - 200.0).abs() <= 2.0, "population {n}");
        let negatives = sim.live_phonons().filter(|p| p.energy() < 0.0).count() as f64;
        assert!((negatives - 200.0 / 3.0).abs() <= 1.0, "negatives {negatives}");
        assert!(sim.live_phonons().all(|p| model.cell(p.cell).unwrap().contains(&p.position)));
        Ok(())
    }

    #[test]
    fn nothing_to_simulate_rejected() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(0.0)?)?;
        b.add_rect_cell(Point::new(0.0, 0.0), Point::new(10.0, 10.0), m, 1.0)?;
        let model = b.build()?;
        let err = ModelSimulator::new(&model, config(3)).unwrap_err();
        assert!(err.is_construction_fault());
        Ok(())
    }

    #[test]
    fn transient_run_records_exact_count_and_conserves_energy() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        b.set_mode(SimulationMode::Transient(TransientConfig {
            measurements: 7,
            time_offset: 0.0,
        }));
        let m = b.add_material(debye(1e11)?)?;
        let c = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(50.0, 50.0), m, 0.5)?;
        b.set_initial_temperature(c, 320.0)?;
        b.add_sensor(SensorSpec::Cells(vec![c]))?;
        let model = b.build()?;
        let mut sim = ModelSimulator::new(&model, config(4))?;
        let report = sim.run()?;
        assert_eq!(report.status, RunStatus::Converged);
        assert_eq!(report.steps, 7);
        assert_eq!(sim.controllers()[0].measurements().len(), 7);
        assert!(report.ledger.imbalance().abs() <= 1e-9 * report.ledger.throughput);
        let t = report.readings[0].temperature.unwrap();
        assert!(t.mean > 300.0, "hot cell read {t:?}");
        Ok(())
    }

    #[test]
    fn step_ceiling_is_reported_not_fatal() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(0.0)?)?;
        b.add_rect_cell(Point::new(0.0, 0.0), Point::new(10.0, 10.0), m, 1.0)?;
        b.set_emit_surface(Point::new(0.0, 0.0), Point::new(0.0, 10.0), EmitSource::new(1.0)?)?;
        b.add_sensor(SensorSpec::Edge(Point::new(0.0, 0.0), Point::new(0.0, 10.0)))?;
        let model = b.build()?;
        let mut cfg = config(5);
        cfg.max_steps = 5;
        let mut sim = ModelSimulator::new(&model, cfg)?;
        let report = sim.run()?;
        assert_eq!(report.status, RunStatus::StepCeiling);
        assert_eq!(report.steps, 5);
        assert!(matches!(
            model.sensors()[0].location(),
            SensorLocation::Surface { .. }
        ));
        Ok(())
    }

    #[test]
    fn abort_flag_stops_between_steps() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(0.0)?)?;
        let c = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(10.0, 10.0), m, 1.0)?;
        b.set_initial_temperature(c, 301.0)?;
        let model = b.build()?;
        let mut sim = ModelSimulator::new(&model, config(6))?;
        sim.step()?;
        let report = sim.run_with_abort(&AtomicBool::new(true))?;
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.steps, 1);
        Ok(())
    }

    #[test]
    fn adaptive_step_tracks_free_flight() -> Result<()> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(debye(1e12)?)?;
        let c = b.add_rect_cell(Point::new(0.0, 0.0), Point::new(1e3, 1e3), m, 1.0)?;
        b.set_initial_temperature(c, 301.0)?;
        let model = b.build()?;
        let mut cfg = config(7);
        cfg.step_time = 0.1;
        cfg.adaptive = AdaptiveStep {
            interval: 1,
            target_flights: 1.0,
            min_step: 1e-4,
            max_step: 1.0,
        };
        let mut sim = ModelSimulator::new(&model, cfg)?;
        sim.step()?;
        // Mean flight is 1e-3 ns; one adjustment may at most halve the step.
        assert_relative_eq!(sim.step_time(), 0.05, max_relative = 1e-12);
        for _ in 0..10 {
            sim.step()?;
        }
        assert!(sim.step_time() < 2e-3, "step {}", sim.step_time());
        Ok(())
    }

    #[test]
    fn stochastic_round_keeps_whole_quotas() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..1000 {
            assert_eq!(stochastic_round(400.0 - 1e-11, &mut rng), 400);
            assert_eq!(stochastic_round(400.0 + 1e-11, &mut rng), 400);
        }
        let n: usize = (0..10_000).map(|_| stochastic_round(2.25, &mut rng)).sum();
        assert!((n as f64 / 10_000.0 - 2.25).abs() < 0.02, "mean {}", n as f64 / 10_000.0);
    }

    #[test]
    fn stream_seeds_differ_per_phonon() {
        let a = stream_seed(42, 0);
        let b = stream_seed(42, 1);
        let c = stream_seed(43, 0);
        assert!(a != b && a != c && b != c);
        assert_eq!(stream_seed(42, 0), a);
    }
}
