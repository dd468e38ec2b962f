//! Conversion of raw sensor tallies into temperatures and fluxes.

use crate::core::material::Material;
use crate::core::sensor::{Sensor, SensorId, SensorMeasurements};
use crate::error::{Error, Result};
use log::warn;
use std::f64::consts::PI;

const INVERSION_TOLERANCE: f64 = 1e-4;
const INVERSION_MAX_ITER: usize = 40;

/// What happens to a temperature sample outside the calibration bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Replace it with the nearest bound.
    #[default]
    Clamp,
    /// Leave it out of the estimates.
    Flag,
}

/// How deviational energy maps to temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureFit {
    /// `T = T_eq + E / (A * C)`.
    #[default]
    Linear,
    /// Solve `u(T) - u(T_eq) = E / A` on the full Bose-Einstein energy density by bisection.
    Inversion,
}

/// Calibration bounds (K) and fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub lower: f64,
    pub upper: f64,
    pub policy: BoundsPolicy,
    pub fit: TemperatureFit,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            lower: 1.0,
            upper: 2000.0,
            policy: BoundsPolicy::default(),
            fit: TemperatureFit::default(),
        }
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower <= 0.0 {
            return Err(Error::InvalidParam(
                "calibration bounds must be finite and > 0".into(),
            ));
        }
        if self.lower >= self.upper {
            return Err(Error::InvalidParam(format!(
                "calibration lower bound {} must be below upper bound {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Sample mean and its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    pub std_error: f64,
    pub samples: usize,
}

impl Estimate {
    /// `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let n = samples.len();
        if n == 0 {
            return None;
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let std_error = if n > 1 {
            let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (var / n as f64).sqrt()
        } else {
            0.0
        };
        Some(Self {
            mean,
            std_error,
            samples: n,
        })
    }
}

/// First harmonic of a phase-binned signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Harmonic {
    pub amplitude: f64,
    /// Phase (rad) of the fundamental relative to `cos(2 pi t / P)`.
    pub phase: f64,
}

/// Interpreted output of one sensor.
///
/// Fields:
/// - `temperature`, `flux_x`, `flux_y`: region sensors only (K, J/(nm ns))
/// - `net_flux`: surface sensors only, along the owning cell's outward normal
/// - `series`: per-record temperature (regions) or net flux (surfaces), aligned with the
///   measurement records; a dropped temperature sample is `NaN`
/// - `harmonic`: first harmonic of the phase bins, for periodic runs
/// - `flagged`: temperature samples outside the calibration bounds
/// - `collected`: energy absorbed or retired at the sensor over the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorId,
    pub temperature: Option<Estimate>,
    pub flux_x: Option<Estimate>,
    pub flux_y: Option<Estimate>,
    pub net_flux: Option<Estimate>,
    pub series: Vec<f64>,
    pub harmonic: Option<Harmonic>,
    pub flagged: usize,
    pub collected: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fit {
    Inside(f64),
    Below,
    Above,
}

/// Maps measurements to physical quantities using one material's properties.
#[derive(Debug, Clone, Copy)]
pub struct SensorInterpreter<'m> {
    material: &'m Material,
    t_eq: f64,
    calibration: Calibration,
}

impl<'m> SensorInterpreter<'m> {
    /// Errors:
    /// - `Error::InvalidParam` for invalid bounds or a `t_eq` outside them.
    pub fn new(material: &'m Material, t_eq: f64, calibration: Calibration) -> Result<Self> {
        calibration.validate()?;
        if !(calibration.lower..=calibration.upper).contains(&t_eq) {
            return Err(Error::InvalidParam(format!(
                "t_eq {t_eq} K lies outside calibration bounds [{}, {}]",
                calibration.lower, calibration.upper
            )));
        }
        Ok(Self {
            material,
            t_eq,
            calibration,
        })
    }

    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Temperature for deviational energy per unit area `e` (J/nm^2), after the bounds policy.
    /// `None` when the sample is flagged and dropped.
    pub fn temperature(&self, e: f64) -> Option<f64> {
        self.bounded(self.fit(e)).0
    }

    /// Interpret everything `measurements` holds for `sensor`.
    pub fn interpret(&self, sensor: &Sensor, measurements: &SensorMeasurements) -> SensorReading {
        let measure = sensor.measure();
        let mut reading = SensorReading {
            sensor: sensor.id(),
            temperature: None,
            flux_x: None,
            flux_y: None,
            net_flux: None,
            series: Vec::with_capacity(measurements.len()),
            harmonic: None,
            flagged: 0,
            collected: sensor.collected_total(),
        };

        if sensor.is_region() {
            let mut temps = Vec::with_capacity(measurements.len());
            let mut fx = Vec::with_capacity(measurements.len());
            let mut fy = Vec::with_capacity(measurements.len());
            for m in &measurements.records {
                let (t, flagged) = self.bounded(self.fit(m.tally.energy / measure));
                if flagged {
                    reading.flagged += 1;
                }
                if let Some(t) = t {
                    temps.push(t);
                }
                reading.series.push(t.unwrap_or(f64::NAN));
                fx.push(m.tally.flux.dx / measure);
                fy.push(m.tally.flux.dy / measure);
            }
            reading.temperature = Estimate::from_samples(&temps);
            reading.flux_x = Estimate::from_samples(&fx);
            reading.flux_y = Estimate::from_samples(&fy);
        } else {
            reading.series = measurements
                .records
                .iter()
                .map(|m| m.tally.crossed / (measure * m.dt))
                .collect();
            reading.net_flux = Estimate::from_samples(&reading.series);
        }

        reading.harmonic = self.harmonic(sensor, measurements, &mut reading.flagged);
        if reading.flagged > 0 {
            warn!(
                "sensor {}: {} temperature samples outside [{}, {}] K ({:?})",
                sensor.id().0,
                reading.flagged,
                self.calibration.lower,
                self.calibration.upper,
                self.calibration.policy
            );
        }
        reading
    }

    // ============ Internal helpers ============

    fn fit(&self, e: f64) -> Fit {
        let Calibration { lower, upper, .. } = self.calibration;
        match self.calibration.fit {
            TemperatureFit::Linear => {
                let t = self.t_eq + e / self.material.heat_capacity();
                if t < lower {
                    Fit::Below
                } else if t > upper {
                    Fit::Above
                } else {
                    Fit::Inside(t)
                }
            }
            TemperatureFit::Inversion => {
                let target = self.material.energy_density(self.t_eq) + e;
                if target < self.material.energy_density(lower) {
                    return Fit::Below;
                }
                if target > self.material.energy_density(upper) {
                    return Fit::Above;
                }
                let (mut lo, mut hi) = (lower, upper);
                for _ in 0..INVERSION_MAX_ITER {
                    if hi - lo < INVERSION_TOLERANCE {
                        break;
                    }
                    let mid = 0.5 * (lo + hi);
                    if self.material.energy_density(mid) < target {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                Fit::Inside(0.5 * (lo + hi))
            }
        }
    }

    /// Apply the bounds policy. Returns the usable value and whether the sample was out of bounds.
    fn bounded(&self, fit: Fit) -> (Option<f64>, bool) {
        let clamp = self.calibration.policy == BoundsPolicy::Clamp;
        match fit {
            Fit::Inside(t) => (Some(t), false),
            Fit::Below => (clamp.then_some(self.calibration.lower), true),
            Fit::Above => (clamp.then_some(self.calibration.upper), true),
        }
    }

    fn harmonic(
        &self,
        sensor: &Sensor,
        measurements: &SensorMeasurements,
        flagged: &mut usize,
    ) -> Option<Harmonic> {
        let bins = &measurements.bins;
        if bins.is_empty() || bins.iter().any(|b| b.snapshots <= 0.0) {
            return None;
        }
        let measure = sensor.measure();
        let mut values = Vec::with_capacity(bins.len());
        for bin in bins {
            let v = if sensor.is_region() {
                let (t, out) = self.bounded(self.fit(bin.tally.energy / (bin.snapshots * measure)));
                if out {
                    *flagged += 1;
                }
                t?
            } else {
                bin.tally.crossed / (measure * bin.time)
            };
            values.push(v);
        }
        let n = values.len() as f64;
        let (mut c, mut s) = (0.0, 0.0);
        for (b, v) in values.iter().enumerate() {
            let theta = 2.0 * PI * (b as f64 + 0.5) / n;
            c += v * theta.cos();
            s += v * theta.sin();
        }
        c *= 2.0 / n;
        s *= 2.0 / n;
        Some(Harmonic {
            amplitude: c.hypot(s),
            phase: s.atan2(c),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cell::CellId;
    use crate::core::geometry::Vector2D;
    use crate::core::material::{DispersionData, MaterialId, RelaxationData};
    use crate::core::sensor::{Measurement, PhaseBin, SensorLocation, Tally};
    use crate::core::surface::SurfaceId;
    use approx::assert_relative_eq;

    fn material() -> Material {
        Material::new(
            "debye",
            DispersionData::debye(5000.0, 3e13),
            RelaxationData::default(),
            300.0,
        )
        .unwrap()
    }

    fn region() -> Sensor {
        Sensor::new(
            SensorId(0),
            SensorLocation::Region(vec![CellId(0)]),
            MaterialId(0),
            10.0,
        )
    }

    fn record(step: u64, tally: Tally) -> Measurement {
        Measurement {
            step,
            time: (step + 1) as f64 * 0.5,
            dt: 0.5,
            phase: None,
            tally,
        }
    }

    #[test]
    fn estimate_mean_and_std_error() {
        let e = Estimate::from_samples(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(e.mean, 2.5);
        assert_relative_eq!(e.std_error, (5.0f64 / 3.0 / 4.0).sqrt(), epsilon = 1e-12);
        assert!(Estimate::from_samples(&[]).is_none());
    }

    #[test]
    fn linear_fit_recovers_temperature_rise() -> Result<()> {
        let m = material();
        let c = m.heat_capacity();
        let interp = SensorInterpreter::new(&m, 300.0, Calibration::default())?;
        let mut ms = SensorMeasurements::new(SensorId(0));
        for (i, dt) in [1.0, 3.0].iter().enumerate() {
            ms.records.push(record(
                i as u64,
                Tally {
                    energy: dt * c * 10.0,
                    flux: Vector2D::new(20.0, 0.0),
                    ..Tally::default()
                },
            ));
        }
        let r = interp.interpret(&region(), &ms);
        let t = r.temperature.unwrap();
        assert_relative_eq!(t.mean, 302.0, epsilon = 1e-9);
        assert_relative_eq!(t.std_error, 1.0, epsilon = 1e-9);
        assert_relative_eq!(r.flux_x.unwrap().mean, 2.0);
        assert_eq!(r.series.len(), 2);
        assert!(r.net_flux.is_none());
        Ok(())
    }

    #[test]
    fn inversion_agrees_with_linear_for_small_deviation() -> Result<()> {
        let m = material();
        let e = 0.01 * m.heat_capacity();
        let linear = SensorInterpreter::new(&m, 300.0, Calibration::default())?;
        let inversion = SensorInterpreter::new(
            &m,
            300.0,
            Calibration {
                fit: TemperatureFit::Inversion,
                ..Calibration::default()
            },
        )?;
        let a = linear.temperature(e).unwrap();
        let b = inversion.temperature(e).unwrap();
        assert_relative_eq!(a, 300.01, epsilon = 1e-9);
        assert!((a - b).abs() < 2e-3, "linear {a} vs inversion {b}");
        Ok(())
    }

    #[test]
    fn bounds_policy_clamps_or_flags() -> Result<()> {
        let m = material();
        let hot = 1e3 * m.heat_capacity();
        let bounds = Calibration {
            lower: 250.0,
            upper: 350.0,
            ..Calibration::default()
        };
        let clamp = SensorInterpreter::new(&m, 300.0, bounds)?;
        assert_eq!(clamp.temperature(hot), Some(350.0));
        let flag = SensorInterpreter::new(
            &m,
            300.0,
            Calibration {
                policy: BoundsPolicy::Flag,
                ..bounds
            },
        )?;
        assert_eq!(flag.temperature(hot), None);

        let mut ms = SensorMeasurements::new(SensorId(0));
        ms.records.push(record(0, Tally { energy: hot * 10.0, ..Tally::default() }));
        ms.records.push(record(1, Tally::default()));
        let r = flag.interpret(&region(), &ms);
        assert_eq!(r.flagged, 1);
        assert_eq!(r.temperature.unwrap().samples, 1);
        assert_eq!(r.series.len(), ms.records.len());
        assert!(r.series[0].is_nan());
        assert_relative_eq!(r.series[1], 300.0, max_relative = 1e-12);

        let r = clamp.interpret(&region(), &ms);
        assert_eq!(r.series.len(), 2);
        assert_eq!(r.series[0], 350.0);
        Ok(())
    }

    #[test]
    fn surface_net_flux_and_harmonic() -> Result<()> {
        let m = material();
        let interp = SensorInterpreter::new(&m, 300.0, Calibration::default())?;
        let sensor = Sensor::new(
            SensorId(1),
            SensorLocation::Surface {
                surface: SurfaceId {
                    cell: CellId(0),
                    index: 2,
                },
                twin: None,
            },
            MaterialId(0),
            4.0,
        );
        let mut ms = SensorMeasurements::new(SensorId(1));
        ms.records.push(record(0, Tally { crossed: 6.0, ..Tally::default() }));
        ms.records.push(record(1, Tally { crossed: 2.0, ..Tally::default() }));
        let bins = 8;
        for b in 0..bins {
            let theta = 2.0 * PI * (b as f64 + 0.5) / bins as f64;
            ms.bins.push(PhaseBin {
                tally: Tally {
                    crossed: 4.0 * (1.0 + 0.5 * (theta - 0.3).cos()),
                    ..Tally::default()
                },
                time: 1.0,
                snapshots: 1.0,
            });
        }
        let r = interp.interpret(&sensor, &ms);
        let f = r.net_flux.unwrap();
        assert_relative_eq!(f.mean, 2.0);
        assert_relative_eq!(f.std_error, 1.0, epsilon = 1e-12);
        let h = r.harmonic.unwrap();
        assert_relative_eq!(h.amplitude, 0.5, epsilon = 1e-12);
        assert_relative_eq!(h.phase, 0.3, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn t_eq_outside_bounds_rejected() {
        let m = material();
        let bad = Calibration {
            lower: 10.0,
            upper: 100.0,
            ..Calibration::default()
        };
        assert!(SensorInterpreter::new(&m, 300.0, bad).is_err());
    }
}
