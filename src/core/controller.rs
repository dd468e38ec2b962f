//! Sampling cadence and stopping policy for sensors.
//!
//! Every controller owns one [`Sensor`], sees every event of every step through
//! [`SensorController::scatter_update`], and decides at [`SensorController::end_step`] whether
//! the step's tally is committed, discarded or ignored.

use crate::core::event::Event;
use crate::core::material::Material;
use crate::core::sensor::{Measurement, PhaseBin, Sensor, SensorMeasurements, Tally};
use crate::error::{Error, Result};
use log::trace;

/// Controller life cycle. Every controller starts in `Warmup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Warmup,
    Measuring,
    Done,
}

/// Timing of the step being closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepClock {
    /// Zero-based step index.
    pub step: u64,
    /// Simulation time at the start of the step (ns).
    pub time: f64,
    /// Step length (ns).
    pub dt: f64,
}

impl StepClock {
    #[inline]
    pub fn end(&self) -> f64 {
        self.time + self.dt
    }
}

/// Steady-state convergence policy.
///
/// Fields:
/// - `warmup_steps`: steps discarded before measuring
/// - `window`: committed steps per averaging window
/// - `tolerance`: relative change between consecutive windows counted as converged
/// - `min_consecutive`: converged window pairs needed in a row
/// - `max_measurements`: optional hard cap on committed steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteadyStateConfig {
    pub warmup_steps: u64,
    pub window: usize,
    pub tolerance: f64,
    pub min_consecutive: usize,
    pub max_measurements: Option<usize>,
}

impl Default for SteadyStateConfig {
    fn default() -> Self {
        Self {
            warmup_steps: 100,
            window: 50,
            tolerance: 0.02,
            min_consecutive: 3,
            max_measurements: None,
        }
    }
}

impl SteadyStateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::InvalidParam("steady-state window must be > 0".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(Error::InvalidParam(
                "steady-state tolerance must be finite and > 0".into(),
            ));
        }
        if self.min_consecutive == 0 {
            return Err(Error::InvalidParam(
                "steady-state min_consecutive must be > 0".into(),
            ));
        }
        if self.max_measurements == Some(0) {
            return Err(Error::InvalidParam(
                "steady-state max_measurements must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Periodic forcing policy.
///
/// Fields:
/// - `warmup_steps`: steps discarded before measuring
/// - `period_steps`: steps per forcing period
/// - `periods`: whole periods to measure
/// - `bins`: phase bins per period
/// - `phasor`: bin by each phonon's phase stamp instead of by the step's position in the period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicConfig {
    pub warmup_steps: u64,
    pub period_steps: u64,
    pub periods: u64,
    pub bins: usize,
    pub phasor: bool,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            warmup_steps: 100,
            period_steps: 20,
            periods: 10,
            bins: 20,
            phasor: false,
        }
    }
}

impl PeriodicConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period_steps == 0 || self.periods == 0 {
            return Err(Error::InvalidParam(
                "periodic period_steps and periods must be > 0".into(),
            ));
        }
        if self.bins == 0 {
            return Err(Error::InvalidParam("periodic bins must be > 0".into()));
        }
        if !self.phasor && self.bins as u64 > self.period_steps {
            return Err(Error::InvalidParam(format!(
                "periodic bins ({}) cannot exceed period_steps ({}) without phasor binning",
                self.bins, self.period_steps
            )));
        }
        Ok(())
    }

    /// Forcing period for a step length `dt` (ns).
    #[inline]
    pub fn period(&self, dt: f64) -> f64 {
        self.period_steps as f64 * dt
    }

    /// Position of the start of `step` in the forcing period, in `[0, 1)`.
    #[inline]
    pub fn phase_of(&self, step: u64) -> f64 {
        (step % self.period_steps) as f64 / self.period_steps as f64
    }
}

/// Fixed-count transient policy.
///
/// `time_offset` shifts the recorded measurement times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientConfig {
    pub measurements: usize,
    pub time_offset: f64,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            measurements: 100,
            time_offset: 0.0,
        }
    }
}

impl TransientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.measurements == 0 {
            return Err(Error::InvalidParam(
                "transient measurements must be > 0".into(),
            ));
        }
        if !self.time_offset.is_finite() {
            return Err(Error::InvalidParam(
                "transient time_offset must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Behavioral contract shared by all controllers.
pub trait SensorController {
    fn state(&self) -> ControllerState;

    fn sensor(&self) -> &Sensor;

    /// Offer one event. Events outside the sensor's domain are ignored.
    fn scatter_update(&mut self, event: &Event);

    /// Close the step: commit or discard its tally and advance the state machine.
    fn end_step(&mut self, clock: &StepClock) -> ControllerState;

    fn measurements(&self) -> &SensorMeasurements;

    #[inline]
    fn is_done(&self) -> bool {
        self.state() == ControllerState::Done
    }
}

/// State common to all controllers.
#[derive(Debug, Clone)]
struct Core<'m> {
    sensor: Sensor,
    material: &'m Material,
    t_eq: f64,
    time_offset: f64,
    state: ControllerState,
    discarded: u64,
    measurements: SensorMeasurements,
}

impl<'m> Core<'m> {
    fn new(sensor: Sensor, material: &'m Material, t_eq: f64, time_offset: f64) -> Self {
        let measurements = SensorMeasurements::new(sensor.id());
        Self {
            sensor,
            material,
            t_eq,
            time_offset,
            state: ControllerState::Warmup,
            discarded: 0,
            measurements,
        }
    }

    fn set_state(&mut self, state: ControllerState) {
        if state != self.state {
            trace!(
                "sensor {} controller: {:?} -> {:?}",
                self.sensor.id().0,
                self.state,
                state
            );
            self.state = state;
        }
    }

    /// Returns true if the current step is part of the warmup and must be discarded.
    fn in_warmup(&mut self, warmup_steps: u64) -> bool {
        if self.state != ControllerState::Warmup {
            return false;
        }
        if self.discarded < warmup_steps {
            self.discarded += 1;
            if self.discarded == warmup_steps {
                self.set_state(ControllerState::Measuring);
            }
            return true;
        }
        self.set_state(ControllerState::Measuring);
        false
    }

    fn commit(&mut self, clock: &StepClock, phase: Option<f64>, tally: Tally) {
        self.measurements.records.push(Measurement {
            step: clock.step,
            time: clock.end() - self.time_offset,
            dt: clock.dt,
            phase,
            tally,
        });
    }

    /// Quantity watched for convergence: temperature rise for regions, net flux for surfaces.
    fn monitored(&self, m: &Measurement) -> f64 {
        let measure = self.sensor.measure();
        if self.sensor.is_region() {
            m.tally.energy / (measure * self.material.heat_capacity())
        } else {
            m.tally.crossed / (measure * m.dt)
        }
    }
}

// ============ Steady state ============

/// Warmup, then rolling windows until consecutive windows agree within tolerance.
#[derive(Debug, Clone)]
pub struct SteadyStateController<'m> {
    core: Core<'m>,
    config: SteadyStateConfig,
    previous: Option<f64>,
    consecutive: usize,
}

impl<'m> SteadyStateController<'m> {
    pub fn new(
        sensor: Sensor,
        material: &'m Material,
        t_eq: f64,
        config: SteadyStateConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            core: Core::new(sensor, material, t_eq, 0.0),
            config,
            previous: None,
            consecutive: 0,
        })
    }

    /// Mean of the last complete window, if one just closed.
    fn window_average(&self) -> Option<f64> {
        let records = &self.core.measurements.records;
        let w = self.config.window;
        if records.is_empty() || records.len() % w != 0 {
            return None;
        }
        let sum: f64 = records[records.len() - w..]
            .iter()
            .map(|m| self.core.monitored(m))
            .sum();
        Some(sum / w as f64)
    }
}

impl SensorController for SteadyStateController<'_> {
    fn state(&self) -> ControllerState {
        self.core.state
    }

    fn sensor(&self) -> &Sensor {
        &self.core.sensor
    }

    fn scatter_update(&mut self, event: &Event) {
        self.core.sensor.observe(event);
    }

    fn end_step(&mut self, clock: &StepClock) -> ControllerState {
        let tally = self.core.sensor.take_pending();
        if self.core.state == ControllerState::Done || self.core.in_warmup(self.config.warmup_steps)
        {
            return self.core.state;
        }
        self.core.commit(clock, None, tally);

        if let Some(avg) = self.window_average() {
            if let Some(prev) = self.previous {
                let scale = prev.abs().max(avg.abs());
                let change = if scale > 0.0 {
                    (avg - prev).abs() / scale
                } else {
                    0.0
                };
                if change < self.config.tolerance {
                    self.consecutive += 1;
                } else {
                    self.consecutive = 0;
                }
                trace!(
                    "sensor {} window average {avg:e}, change {change:.4}, streak {}",
                    self.core.sensor.id().0,
                    self.consecutive
                );
            }
            self.previous = Some(avg);
        }
        let capped = self
            .config
            .max_measurements
            .is_some_and(|n| self.core.measurements.len() >= n);
        if self.consecutive >= self.config.min_consecutive || capped {
            self.core.set_state(ControllerState::Done);
        }
        self.core.state
    }

    fn measurements(&self) -> &SensorMeasurements {
        &self.core.measurements
    }
}

// ============ Periodic ============

/// Warmup, then exactly `periods` forcing periods binned by phase.
#[derive(Debug, Clone)]
pub struct PeriodicController<'m> {
    core: Core<'m>,
    config: PeriodicConfig,
    measured: u64,
    step_bins: Vec<Tally>,
}

impl<'m> PeriodicController<'m> {
    pub fn new(
        sensor: Sensor,
        material: &'m Material,
        t_eq: f64,
        config: PeriodicConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut core = Core::new(sensor, material, t_eq, 0.0);
        core.measurements.bins = vec![PhaseBin::default(); config.bins];
        Ok(Self {
            core,
            config,
            measured: 0,
            step_bins: vec![Tally::default(); config.bins],
        })
    }

    #[inline]
    fn bin_of(&self, phase: f64) -> usize {
        ((phase * self.config.bins as f64) as usize).min(self.config.bins - 1)
    }
}

impl SensorController for PeriodicController<'_> {
    fn state(&self) -> ControllerState {
        self.core.state
    }

    fn sensor(&self) -> &Sensor {
        &self.core.sensor
    }

    fn scatter_update(&mut self, event: &Event) {
        let Some(t) = self.core.sensor.observe(event) else {
            return;
        };
        if self.config.phasor {
            if let Some(phase) = event.phase {
                let b = self.bin_of(phase);
                self.step_bins[b] += t;
            }
        }
    }

    fn end_step(&mut self, clock: &StepClock) -> ControllerState {
        let tally = self.core.sensor.take_pending();
        let fresh = vec![Tally::default(); self.config.bins];
        let step_bins = std::mem::replace(&mut self.step_bins, fresh);
        if self.core.state == ControllerState::Done || self.core.in_warmup(self.config.warmup_steps)
        {
            return self.core.state;
        }

        let phase = self.config.phase_of(clock.step);
        self.measured += 1;
        self.core.commit(clock, Some(phase), tally);

        if self.config.phasor {
            let share = 1.0 / self.config.bins as f64;
            for (bin, t) in self.core.measurements.bins.iter_mut().zip(step_bins) {
                bin.tally += t;
                bin.time += clock.dt * share;
                bin.snapshots += share;
            }
        } else {
            let b = self.bin_of(phase);
            let bin = &mut self.core.measurements.bins[b];
            bin.tally += tally;
            bin.time += clock.dt;
            bin.snapshots += 1.0;
        }

        if self.measured >= self.config.periods * self.config.period_steps {
            self.core.set_state(ControllerState::Done);
        }
        self.core.state
    }

    fn measurements(&self) -> &SensorMeasurements {
        &self.core.measurements
    }
}

// ============ Transient ============

/// Measures from the first step until a fixed number of records exist.
#[derive(Debug, Clone)]
pub struct TransientController<'m> {
    core: Core<'m>,
    config: TransientConfig,
}

impl<'m> TransientController<'m> {
    pub fn new(
        sensor: Sensor,
        material: &'m Material,
        t_eq: f64,
        config: TransientConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            core: Core::new(sensor, material, t_eq, config.time_offset),
            config,
        })
    }
}

impl SensorController for TransientController<'_> {
    fn state(&self) -> ControllerState {
        self.core.state
    }

    fn sensor(&self) -> &Sensor {
        &self.core.sensor
    }

    fn scatter_update(&mut self, event: &Event) {
        self.core.sensor.observe(event);
    }

    fn end_step(&mut self, clock: &StepClock) -> ControllerState {
        let tally = self.core.sensor.take_pending();
        if self.core.state == ControllerState::Done || self.core.in_warmup(0) {
            return self.core.state;
        }
        self.core.commit(clock, None, tally);
        if self.core.measurements.len() >= self.config.measurements {
            self.core.set_state(ControllerState::Done);
        }
        self.core.state
    }

    fn measurements(&self) -> &SensorMeasurements {
        &self.core.measurements
    }
}

// ============ Closed family ============

/// One controller of any policy.
#[derive(Debug, Clone)]
pub enum Controller<'m> {
    SteadyState(SteadyStateController<'m>),
    Periodic(PeriodicController<'m>),
    Transient(TransientController<'m>),
}

impl Controller<'_> {
    fn inner(&self) -> &dyn SensorController {
        match self {
            Controller::SteadyState(c) => c,
            Controller::Periodic(c) => c,
            Controller::Transient(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SensorController {
        match self {
            Controller::SteadyState(c) => c,
            Controller::Periodic(c) => c,
            Controller::Transient(c) => c,
        }
    }

    /// Equilibrium temperature the controller calibrates against.
    pub fn t_eq(&self) -> f64 {
        match self {
            Controller::SteadyState(c) => c.core.t_eq,
            Controller::Periodic(c) => c.core.t_eq,
            Controller::Transient(c) => c.core.t_eq,
        }
    }
}

impl SensorController for Controller<'_> {
    fn state(&self) -> ControllerState {
        self.inner().state()
    }

    fn sensor(&self) -> &Sensor {
        self.inner().sensor()
    }

    fn scatter_update(&mut self, event: &Event) {
        self.inner_mut().scatter_update(event);
    }

    fn end_step(&mut self, clock: &StepClock) -> ControllerState {
        self.inner_mut().end_step(clock)
    }

    fn measurements(&self) -> &SensorMeasurements {
        self.inner().measurements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cell::CellId;
    use crate::core::event::EventKind;
    use crate::core::geometry::{Point, Vector2D};
    use crate::core::material::{DispersionData, MaterialId, RelaxationData};
    use crate::core::phonon::{PhaseStamp, Phonon};
    use crate::core::sensor::{SensorId, SensorLocation};
    use rand::{rngs::StdRng, SeedableRng};

    fn material() -> Material {
        Material::new(
            "debye",
            DispersionData::debye(5000.0, 1e13),
            RelaxationData::default(),
            300.0,
        )
        .unwrap()
    }

    fn region_sensor() -> Sensor {
        Sensor::new(
            SensorId(0),
            SensorLocation::Region(vec![CellId(0)]),
            MaterialId(0),
            100.0,
        )
    }

    fn census(material: &Material, time: f64, energy: f64) -> Event {
        let mut rng = StdRng::seed_from_u64(1);
        let state = material.sample_equilibrium(&mut rng);
        let p = Phonon::new(
            Point::new(1.0, 1.0),
            Vector2D::new(1.0, 0.0),
            state,
            energy,
            CellId(0),
        )
        .unwrap();
        Event::new(time, EventKind::Census, &p).unwrap()
    }

    fn clock(step: u64) -> StepClock {
        StepClock {
            step,
            time: step as f64 * 0.1,
            dt: 0.1,
        }
    }

    #[test]
    fn steady_state_waits_for_warmup_on_converged_input() -> Result<()> {
        let m = material();
        let config = SteadyStateConfig {
            warmup_steps: 40,
            window: 2,
            tolerance: 0.5,
            min_consecutive: 1,
            max_measurements: None,
        };
        let mut c = SteadyStateController::new(region_sensor(), &m, 300.0, config)?;
        let mut done_at = None;
        for step in 0..100 {
            c.scatter_update(&census(&m, clock(step).end(), 1e-18));
            if c.end_step(&clock(step)) == ControllerState::Done {
                done_at = Some(step);
                break;
            }
            if step < 40 {
                assert_ne!(c.state(), ControllerState::Done, "done during warmup at {step}");
            }
        }
        // Two windows of two committed steps after 40 discarded ones.
        assert_eq!(done_at, Some(43));
        assert_eq!(c.measurements().len(), 4);
        assert_eq!(c.measurements().records[0].step, 40);
        Ok(())
    }

    #[test]
    fn steady_state_resets_streak_on_jump() -> Result<()> {
        let m = material();
        let config = SteadyStateConfig {
            warmup_steps: 0,
            window: 1,
            tolerance: 0.01,
            min_consecutive: 2,
            max_measurements: None,
        };
        let mut c = SteadyStateController::new(region_sensor(), &m, 300.0, config)?;
        let energies = [1.0, 1.0, 2.0, 2.0, 2.0];
        let mut states = Vec::new();
        for (step, e) in energies.iter().enumerate() {
            c.scatter_update(&census(&m, clock(step as u64).end(), e * 1e-18));
            states.push(c.end_step(&clock(step as u64)));
        }
        assert_eq!(states[3], ControllerState::Measuring);
        assert_eq!(states[4], ControllerState::Done);
        Ok(())
    }

    #[test]
    fn steady_state_cap_stops_run() -> Result<()> {
        let m = material();
        let config = SteadyStateConfig {
            warmup_steps: 0,
            max_measurements: Some(3),
            ..SteadyStateConfig::default()
        };
        let mut c = SteadyStateController::new(region_sensor(), &m, 300.0, config)?;
        for step in 0..3 {
            c.end_step(&clock(step));
        }
        assert!(c.is_done());
        Ok(())
    }

    #[test]
    fn transient_records_exactly_k() -> Result<()> {
        let m = material();
        let config = TransientConfig {
            measurements: 5,
            time_offset: 0.05,
        };
        let mut c = TransientController::new(region_sensor(), &m, 300.0, config)?;
        assert_eq!(c.state(), ControllerState::Warmup);
        for step in 0..12 {
            c.scatter_update(&census(&m, clock(step).end(), 1e-18));
            c.end_step(&clock(step));
            if step == 0 {
                assert_eq!(c.state(), ControllerState::Measuring);
            }
        }
        assert!(c.is_done());
        assert_eq!(c.measurements().len(), 5);
        assert_eq!(c.measurements().records[0].step, 0);
        assert!((c.measurements().records[0].time - 0.05).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn periodic_runs_whole_periods_and_bins_by_step_phase() -> Result<()> {
        let m = material();
        let config = PeriodicConfig {
            warmup_steps: 3,
            period_steps: 4,
            periods: 2,
            bins: 4,
            phasor: false,
        };
        let mut c = PeriodicController::new(region_sensor(), &m, 300.0, config)?;
        let mut steps = 0;
        while !c.is_done() {
            c.scatter_update(&census(&m, clock(steps).end(), 1e-18));
            c.end_step(&clock(steps));
            steps += 1;
            assert!(steps < 100);
        }
        assert_eq!(steps, 3 + 8);
        let ms = c.measurements();
        assert_eq!(ms.len(), 8);
        // Phase follows the global step index, not the count of measured steps.
        assert_eq!(ms.records[0].step, 3);
        assert_eq!(ms.records[0].phase, Some(0.75));
        assert_eq!(ms.records[6].phase, Some(0.25));
        for bin in &ms.bins {
            assert_eq!(bin.snapshots, 2.0);
            assert_eq!(bin.tally.events, 2);
        }
        Ok(())
    }

    #[test]
    fn periodic_phasor_bins_by_stamp() -> Result<()> {
        let m = material();
        let config = PeriodicConfig {
            warmup_steps: 0,
            period_steps: 10,
            periods: 1,
            bins: 2,
            phasor: true,
        };
        let mut c = PeriodicController::new(region_sensor(), &m, 300.0, config)?;
        let mut rng = StdRng::seed_from_u64(2);
        let state = m.sample_equilibrium(&mut rng);
        let mut p = Phonon::new(
            Point::new(1.0, 1.0),
            Vector2D::new(1.0, 0.0),
            state,
            1e-18,
            CellId(0),
        )?;
        p.phase = Some(PhaseStamp {
            offset: 0.75,
            period: 1.0,
        });
        c.scatter_update(&Event::new(0.0, EventKind::Census, &p)?);
        c.end_step(&clock(0));
        let bins = &c.measurements().bins;
        assert_eq!(bins[0].tally.events, 0);
        assert_eq!(bins[1].tally.events, 1);
        assert!((bins[0].snapshots - 0.5).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn invalid_configs_rejected() {
        let m = material();
        let bad = SteadyStateConfig {
            window: 0,
            ..SteadyStateConfig::default()
        };
        assert!(SteadyStateController::new(region_sensor(), &m, 300.0, bad).is_err());
        let bad = PeriodicConfig {
            bins: 50,
            period_steps: 10,
            ..PeriodicConfig::default()
        };
        assert!(PeriodicController::new(region_sensor(), &m, 300.0, bad).is_err());
        let bad = TransientConfig {
            measurements: 0,
            time_offset: 0.0,
        };
        assert!(TransientController::new(region_sensor(), &m, 300.0, bad).is_err());
    }
}
