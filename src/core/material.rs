//! Material physics: dispersion, relaxation rates and the cumulative sampling tables.
//!
//! Tables are built once, at the material's reference temperature, over a grid of
//! [`NUM_FREQ_BINS`] frequency bins shared by both polarization branches. Weights are
//! deviational: each bin carries the derivative of its Bose-Einstein energy with respect to
//! temperature, so the base table sums to the heat capacity.

use crate::core::geometry::{random_direction, Vector2D};
use crate::core::phonon::{Phonon, Polarization, SpectralState};
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Number of frequency bins.
pub const NUM_FREQ_BINS: usize = 1000;
/// Reduced Planck constant (J s).
pub const HBAR: f64 = 1.054517e-34;
/// Boltzmann constant (J/K).
pub const BOLTZ: f64 = 1.38065e-23;
/// Converts relaxation times in seconds to simulation time.
pub const NS_PER_S: f64 = 1e9;

/// Handle of a material inside a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

/// Quadratic dispersion `omega = c0 k^2 + c1 k + c2` per branch, with a cutoff frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionData {
    pub la: [f64; 3],
    pub max_freq_la: f64,
    pub ta: [f64; 3],
    pub max_freq_ta: f64,
}

impl DispersionData {
    pub fn new(la: [f64; 3], max_freq_la: f64, ta: [f64; 3], max_freq_ta: f64) -> Self {
        Self {
            la,
            max_freq_la,
            ta,
            max_freq_ta,
        }
    }

    /// Linear branches with a single sound velocity (m/s) up to `max_freq`.
    pub fn debye(velocity: f64, max_freq: f64) -> Self {
        Self::new([0.0, velocity, 0.0], max_freq, [0.0, velocity, 0.0], max_freq)
    }

    #[inline]
    pub fn coefficients(&self, pol: Polarization) -> [f64; 3] {
        match pol {
            Polarization::LA => self.la,
            Polarization::TA => self.ta,
        }
    }

    #[inline]
    pub fn max_freq(&self, pol: Polarization) -> f64 {
        match pol {
            Polarization::LA => self.max_freq_la,
            Polarization::TA => self.max_freq_ta,
        }
    }

    /// Wave number and group velocity at angular frequency `omega`, or `None` when the branch
    /// has no real solution there.
    pub fn wave_number(&self, pol: Polarization, omega: f64) -> Option<(f64, f64)> {
        let [c0, c1, c2] = self.coefficients(pol);
        if c0 == 0.0 {
            if c1 <= 0.0 {
                return None;
            }
            return Some(((omega - c2) / c1, c1));
        }
        let disc = c1 * c1 - 4.0 * c0 * (c2 - omega);
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        let r1 = (-c1 + sq) / (2.0 * c0);
        let r2 = (-c1 - sq) / (2.0 * c0);
        let k = [r1, r2]
            .into_iter()
            .filter(|k| *k >= 0.0)
            .fold(f64::INFINITY, f64::min);
        if !k.is_finite() {
            return None;
        }
        Some((k, 2.0 * c0 * k + c1))
    }
}

/// Holland-type relaxation parameters, plus a frequency-independent rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelaxationData {
    pub b_l: f64,
    pub b_tn: f64,
    pub b_tu: f64,
    pub b_i: f64,
    /// Frequency splitting normal and Umklapp TA processes (rad/s).
    pub w: f64,
    /// Constant scattering rate (1/s), e.g. grain boundaries.
    pub boundary_rate: f64,
}

impl RelaxationData {
    pub fn new(b_l: f64, b_tn: f64, b_tu: f64, b_i: f64, w: f64) -> Self {
        Self {
            b_l,
            b_tn,
            b_tu,
            b_i,
            w,
            boundary_rate: 0.0,
        }
    }

    /// Gray medium: every phonon scatters at `rate` (1/s).
    pub fn constant(rate: f64) -> Self {
        Self {
            boundary_rate: rate,
            ..Self::default()
        }
    }

    pub fn with_boundary_rate(mut self, rate: f64) -> Self {
        self.boundary_rate = rate;
        self
    }

    /// Scattering rates (1/s) of a phonon at angular frequency `omega` and temperature `t`.
    pub fn rates(&self, pol: Polarization, omega: f64, t: f64) -> Rates {
        let (normal, umklapp) = match pol {
            Polarization::LA => {
                let r = self.b_l * omega * omega * t.powi(3);
                (r, r)
            }
            Polarization::TA => {
                if omega < self.w {
                    (self.b_tn * omega * t.powi(4), 0.0)
                } else {
                    let x = HBAR * omega / (BOLTZ * t);
                    (0.0, self.b_tu * omega * omega / x.sinh())
                }
            }
        };
        Rates {
            normal,
            umklapp,
            impurity: self.b_i * omega.powi(4),
            boundary: self.boundary_rate,
        }
    }
}

/// Per-mechanism scattering rates (1/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rates {
    pub normal: f64,
    pub umklapp: f64,
    pub impurity: f64,
    pub boundary: f64,
}

impl Rates {
    #[inline]
    pub fn total(&self) -> f64 {
        self.normal + self.umklapp + self.impurity + self.boundary
    }
}

/// Scattering process selected at a free-flight expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMechanism {
    /// New frequency and branch, direction kept.
    Normal,
    /// New frequency, branch and direction.
    Umklapp,
    /// New direction only.
    Impurity,
    /// New direction only.
    Boundary,
}

/// Outcome of [`Material::scatter_sample`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterSample {
    pub mechanism: ScatterMechanism,
    /// Post-scatter spectral state.
    pub state: SpectralState,
    /// New travel direction, when the mechanism randomizes it.
    pub direction: Option<Vector2D>,
    /// Free-flight time of the post-scatter state (ns); infinite if it does not scatter.
    pub free_flight_time: f64,
}

/// Normalized cumulative distribution over frequency bins, with the LA share per bin.
#[derive(Debug, Clone)]
struct CumulativeTable {
    cumulative: Vec<f64>,
    la_fraction: Vec<f64>,
    total: f64,
}

impl CumulativeTable {
    fn from_weights(la: &[f64], ta: &[f64]) -> Option<Self> {
        let total: f64 = la.iter().chain(ta).sum();
        if !total.is_finite() || total <= 0.0 {
            return None;
        }
        let mut acc = 0.0;
        let mut cumulative = Vec::with_capacity(la.len());
        let mut la_fraction = Vec::with_capacity(la.len());
        for (&l, &t) in la.iter().zip(ta) {
            acc += l + t;
            cumulative.push(acc / total);
            la_fraction.push(if l + t > 0.0 { l / (l + t) } else { 0.0 });
        }
        Some(Self {
            cumulative,
            la_fraction,
            total,
        })
    }

    /// Bisection on the cumulative distribution, then a branch draw.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (usize, Polarization) {
        let u = 1.0 - rng.random::<f64>();
        let idx = self
            .cumulative
            .partition_point(|&c| c < u)
            .min(self.cumulative.len() - 1);
        let pol = if rng.random::<f64>() < self.la_fraction[idx] {
            Polarization::LA
        } else {
            Polarization::TA
        };
        (idx, pol)
    }
}

/// Immutable physical description of a medium.
#[derive(Debug, Clone)]
pub struct Material {
    name: String,
    dispersion: DispersionData,
    relaxation: RelaxationData,
    temperature: f64,
    freq_width: f64,
    velocities: [Vec<f64>; 2],
    dos: [Vec<f64>; 2],
    base: CumulativeTable,
    emit: CumulativeTable,
    scatter: Option<CumulativeTable>,
}

impl Material {
    /// Build a material and its sampling tables at reference temperature `temperature` (K).
    ///
    /// Errors:
    /// - `Error::InvalidParam` for a non-positive temperature or cutoff frequency, negative
    ///   relaxation parameters, a branch whose group velocity is not positive below its cutoff,
    ///   or a distribution with no weight at this temperature.
    pub fn new(
        name: impl Into<String>,
        dispersion: DispersionData,
        relaxation: RelaxationData,
        temperature: f64,
    ) -> Result<Self> {
        let name = name.into();
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "material '{name}': temperature must be finite and > 0"
            )));
        }
        for (label, f) in [
            ("max_freq_la", dispersion.max_freq_la),
            ("max_freq_ta", dispersion.max_freq_ta),
        ] {
            if !f.is_finite() || f <= 0.0 {
                return Err(Error::InvalidParam(format!(
                    "material '{name}': {label} must be finite and > 0"
                )));
            }
        }
        let r = relaxation;
        if ![r.b_l, r.b_tn, r.b_tu, r.b_i, r.w, r.boundary_rate]
            .iter()
            .all(|x| x.is_finite() && *x >= 0.0)
        {
            return Err(Error::InvalidParam(format!(
                "material '{name}': relaxation parameters must be finite and >= 0"
            )));
        }

        let freq_width = dispersion.max_freq_la.max(dispersion.max_freq_ta) / NUM_FREQ_BINS as f64;
        let mut velocities = [vec![0.0; NUM_FREQ_BINS], vec![0.0; NUM_FREQ_BINS]];
        let mut dos = [vec![0.0; NUM_FREQ_BINS], vec![0.0; NUM_FREQ_BINS]];
        for pol in [Polarization::LA, Polarization::TA] {
            let degeneracy = match pol {
                Polarization::LA => 2.0 * PI * PI,
                Polarization::TA => PI * PI,
            };
            for i in 0..NUM_FREQ_BINS {
                let omega = bin_center(i, freq_width);
                if omega > dispersion.max_freq(pol) {
                    continue;
                }
                let (k, v) = dispersion
                    .wave_number(pol, omega)
                    .filter(|(_, v)| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| {
                        Error::InvalidParam(format!(
                            "material '{name}': {pol:?} group velocity is not positive at omega = {omega:e}"
                        ))
                    })?;
                velocities[pol.index()][i] = v;
                dos[pol.index()][i] = k * k / (degeneracy * v);
            }
        }

        let mut base_w = [vec![0.0; NUM_FREQ_BINS], vec![0.0; NUM_FREQ_BINS]];
        let mut emit_w = [vec![0.0; NUM_FREQ_BINS], vec![0.0; NUM_FREQ_BINS]];
        let mut scatter_w = [vec![0.0; NUM_FREQ_BINS], vec![0.0; NUM_FREQ_BINS]];
        for pol in [Polarization::LA, Polarization::TA] {
            let p = pol.index();
            for i in 0..NUM_FREQ_BINS {
                if dos[p][i] == 0.0 {
                    continue;
                }
                let omega = bin_center(i, freq_width);
                let w = deviational_energy(omega, temperature) * freq_width * dos[p][i];
                base_w[p][i] = w;
                emit_w[p][i] = w * velocities[p][i];
                scatter_w[p][i] = w * relaxation.rates(pol, omega, temperature).total();
            }
        }

        let no_weight = || {
            Error::InvalidParam(format!(
                "material '{name}': phonon distribution has no weight at {temperature} K"
            ))
        };
        let base = CumulativeTable::from_weights(&base_w[0], &base_w[1]).ok_or_else(no_weight)?;
        let emit = CumulativeTable::from_weights(&emit_w[0], &emit_w[1]).ok_or_else(no_weight)?;
        let scatter = CumulativeTable::from_weights(&scatter_w[0], &scatter_w[1]);

        Ok(Self {
            name,
            dispersion,
            relaxation,
            temperature,
            freq_width,
            velocities,
            dos,
            base,
            emit,
            scatter,
        })
    }

    /// Silicon (Jean et al. 2014 fit) at reference temperature `temperature`.
    pub fn silicon(temperature: f64) -> Result<Self> {
        Self::new(
            "Silicon",
            DispersionData::new(
                [-2.22e-7, 9.26e3, 0.0],
                7.63916048e13,
                [-2.28e-7, 5.24e3, 0.0],
                3.0100793072e13,
            ),
            RelaxationData::new(1.3e-24, 9.0e-13, 1.9e-18, 1.2e-45, 2.42e13),
            temperature,
        )
    }

    /// Germanium at reference temperature `temperature`.
    pub fn germanium(temperature: f64) -> Result<Self> {
        Self::new(
            "Germanium",
            DispersionData::new(
                [-1.50e-7, 5.63e3, 0.0],
                4.45236386e13,
                [-1.13e-7, 2.60e3, 0.0],
                1.4937724175e13,
            ),
            RelaxationData::new(2.3e-24, 30.0e-13, 1.5e-18, 24.0e-45, 1.23e13),
            temperature,
        )
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same medium with its tables rebuilt at `temperature` (K).
    ///
    /// Errors:
    /// - `Error::InvalidParam` as for [`Material::new`].
    pub fn at_temperature(&self, temperature: f64) -> Result<Self> {
        Self::new(self.name.clone(), self.dispersion, self.relaxation, temperature)
    }

    #[inline]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    #[inline]
    pub fn dispersion(&self) -> &DispersionData {
        &self.dispersion
    }

    #[inline]
    pub fn relaxation(&self) -> &RelaxationData {
        &self.relaxation
    }

    #[inline]
    pub fn freq_width(&self) -> f64 {
        self.freq_width
    }

    /// Deviational energy per unit area per kelvin at the reference temperature.
    #[inline]
    pub fn heat_capacity(&self) -> f64 {
        self.base.total
    }

    /// Velocity-weighted heat capacity; sets the flux emitted by a wall per kelvin.
    #[inline]
    pub fn emit_power(&self) -> f64 {
        self.emit.total
    }

    /// Group velocity of bin `freq_index` on branch `pol`; zero above the branch cutoff.
    #[inline]
    pub fn velocity(&self, freq_index: usize, pol: Polarization) -> f64 {
        self.velocities[pol.index()]
            .get(freq_index)
            .copied()
            .unwrap_or(0.0)
    }

    /// Spectral state for angular frequency `omega` on `pol`, or `None` if this material
    /// has no such mode.
    pub fn state_at(&self, omega: f64, pol: Polarization) -> Option<SpectralState> {
        if !omega.is_finite() || omega <= 0.0 || omega > self.dispersion.max_freq(pol) {
            return None;
        }
        let freq_index = ((omega / self.freq_width) as usize).min(NUM_FREQ_BINS - 1);
        let velocity = self.velocity(freq_index, pol);
        (velocity > 0.0).then_some(SpectralState {
            freq_index,
            frequency: omega,
            polarization: pol,
            velocity,
        })
    }

    /// Scattering rates of a phonon in state `state` at the reference temperature.
    pub fn rates(&self, state: &SpectralState) -> Rates {
        self.relaxation
            .rates(state.polarization, state.frequency, self.temperature)
    }

    /// Draw a state from the equilibrium (energy-weighted) distribution.
    pub fn sample_equilibrium<R: Rng + ?Sized>(&self, rng: &mut R) -> SpectralState {
        self.state_from(&self.base, rng)
    }

    /// Draw a state from the distribution of phonons crossing a wall (velocity-weighted).
    pub fn sample_emission<R: Rng + ?Sized>(&self, rng: &mut R) -> SpectralState {
        self.state_from(&self.emit, rng)
    }

    /// Exponentially distributed time to the next scatter (ns); infinite for a zero rate.
    pub fn free_flight_time<R: Rng + ?Sized>(&self, state: &SpectralState, rng: &mut R) -> f64 {
        let rate = self.rates(state).total();
        if rate <= 0.0 {
            return f64::INFINITY;
        }
        let u = 1.0 - rng.random::<f64>();
        -u.ln() / rate * NS_PER_S
    }

    /// Resolve a scatter of `phonon`: choose the mechanism in proportion to its rates, draw the
    /// post-scatter state from the scatter table when the mechanism changes it, and draw the
    /// next free-flight time.
    ///
    /// Errors:
    /// - `Error::Physics` if the phonon's current state has zero scattering rate.
    pub fn scatter_sample<R: Rng + ?Sized>(
        &self,
        phonon: &Phonon,
        rng: &mut R,
    ) -> Result<ScatterSample> {
        let rates = self.rates(&phonon.state);
        let total = rates.total();
        if !total.is_finite() || total <= 0.0 {
            return Err(Error::Physics(format!(
                "phonon {} scattered in '{}' with zero relaxation rate",
                phonon.id, self.name
            )));
        }
        let u = rng.random::<f64>() * total;
        let mechanism = if u < rates.normal {
            ScatterMechanism::Normal
        } else if u < rates.normal + rates.umklapp {
            ScatterMechanism::Umklapp
        } else if u < rates.normal + rates.umklapp + rates.impurity {
            ScatterMechanism::Impurity
        } else {
            ScatterMechanism::Boundary
        };
        let state = match mechanism {
            ScatterMechanism::Normal | ScatterMechanism::Umklapp => {
                let table = self.scatter.as_ref().ok_or_else(|| {
                    Error::Physics(format!("material '{}' has no scatter table", self.name))
                })?;
                self.state_from(table, rng)
            }
            ScatterMechanism::Impurity | ScatterMechanism::Boundary => phonon.state,
        };
        let direction = match mechanism {
            ScatterMechanism::Normal => None,
            _ => Some(random_direction(rng)),
        };
        let free_flight_time = self.free_flight_time(&state, rng);
        Ok(ScatterSample {
            mechanism,
            state,
            direction,
            free_flight_time,
        })
    }

    /// Signed energy of `phonon` (J), from its occupancy and frequency.
    #[inline]
    pub fn energy(&self, phonon: &Phonon) -> f64 {
        phonon.energy()
    }

    /// Full Bose-Einstein energy per unit area at temperature `t`.
    pub fn energy_density(&self, t: f64) -> f64 {
        let mut total = 0.0;
        for pol in [Polarization::LA, Polarization::TA] {
            let p = pol.index();
            for i in 0..NUM_FREQ_BINS {
                if self.dos[p][i] == 0.0 {
                    continue;
                }
                let omega = bin_center(i, self.freq_width);
                let x = HBAR * omega / (BOLTZ * t);
                total += HBAR * omega / x.exp_m1() * self.freq_width * self.dos[p][i];
            }
        }
        total
    }

    fn state_from<R: Rng + ?Sized>(&self, table: &CumulativeTable, rng: &mut R) -> SpectralState {
        let (freq_index, polarization) = table.sample(rng);
        // Uniform over the part of the bin below the branch cutoff, excluding zero.
        let lo = freq_index as f64 * self.freq_width;
        let hi = (lo + self.freq_width).min(self.dispersion.max_freq(polarization));
        let frequency = hi - (hi - lo) * rng.random::<f64>();
        SpectralState {
            freq_index,
            frequency,
            polarization,
            velocity: self.velocity(freq_index, polarization),
        }
    }
}

#[inline]
fn bin_center(i: usize, width: f64) -> f64 {
    (2 * i + 1) as f64 * width / 2.0
}

/// d/dT of hbar*omega*n(omega, T), written to avoid overflow at large hbar*omega/kT.
fn deviational_energy(omega: f64, t: f64) -> f64 {
    let x = HBAR * omega / (BOLTZ * t);
    let em = (-x).exp();
    let denom = (-x).exp_m1();
    HBAR * omega * (x / t) * em / (denom * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cell::CellId;
    use crate::core::geometry::Point;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn silicon_tables_are_consistent() -> Result<()> {
        let si = Material::silicon(300.0)?;
        assert!(si.heat_capacity() > 0.0);
        assert!(si.emit_power() > 0.0);
        // LA exists up to its cutoff; TA stops earlier.
        let top = NUM_FREQ_BINS - 1;
        assert!(si.velocity(top, Polarization::LA) > 0.0);
        assert_eq!(si.velocity(top, Polarization::TA), 0.0);
        assert!(si.velocity(10, Polarization::TA) > 0.0);
        Ok(())
    }

    #[test]
    fn sampled_states_have_positive_velocity() -> Result<()> {
        let si = Material::silicon(300.0)?;
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            for s in [si.sample_equilibrium(&mut rng), si.sample_emission(&mut rng)] {
                assert!(s.velocity > 0.0, "zero velocity state {s:?}");
                assert!(s.frequency > 0.0);
                assert!(s.frequency <= si.dispersion().max_freq(s.polarization));
            }
        }
        Ok(())
    }

    #[test]
    fn sampled_states_exist_in_same_material() -> Result<()> {
        // Germanium's TA cutoff splits a frequency bin, so that bin is only partly valid.
        let ge = Material::germanium(300.0)?;
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..20_000 {
            let s = ge.sample_emission(&mut rng);
            let found = ge.state_at(s.frequency, s.polarization);
            assert!(found.is_some(), "sampled state {s:?} has no mode");
            assert_eq!(found.map(|f| f.polarization), Some(s.polarization));
        }
        Ok(())
    }

    #[test]
    fn debye_branch_has_constant_velocity() -> Result<()> {
        let m = Material::new(
            "gray",
            DispersionData::debye(6000.0, 1e13),
            RelaxationData::constant(1e10),
            300.0,
        )?;
        assert_relative_eq!(m.velocity(0, Polarization::LA), 6000.0);
        assert_relative_eq!(m.velocity(NUM_FREQ_BINS - 1, Polarization::TA), 6000.0);
        Ok(())
    }

    #[test]
    fn free_flight_is_exponential_with_rate() -> Result<()> {
        let rate = 2e10;
        let m = Material::new(
            "gray",
            DispersionData::debye(6000.0, 1e13),
            RelaxationData::constant(rate),
            300.0,
        )?;
        let mut rng = StdRng::seed_from_u64(3);
        let state = m.sample_equilibrium(&mut rng);
        let n = 200_000;
        let mean: f64 = (0..n)
            .map(|_| m.free_flight_time(&state, &mut rng))
            .sum::<f64>()
            / n as f64;
        assert_relative_eq!(mean, NS_PER_S / rate, max_relative = 0.02);
        Ok(())
    }

    #[test]
    fn zero_rate_never_scatters() -> Result<()> {
        let m = Material::new(
            "ballistic",
            DispersionData::debye(6000.0, 1e13),
            RelaxationData::default(),
            300.0,
        )?;
        let mut rng = StdRng::seed_from_u64(4);
        let state = m.sample_equilibrium(&mut rng);
        assert!(m.free_flight_time(&state, &mut rng).is_infinite());

        let p = Phonon::new(Point::new(0.0, 0.0), Vector2D::new(1.0, 0.0), state, 1e-20, CellId(0))?;
        assert!(matches!(m.scatter_sample(&p, &mut rng), Err(Error::Physics(_))));
        Ok(())
    }

    #[test]
    fn scatter_mechanisms_follow_rates() -> Result<()> {
        let si = Material::silicon(300.0)?;
        let mut rng = StdRng::seed_from_u64(21);
        let state = si
            .state_at(2.0e13, Polarization::LA)
            .ok_or_else(|| Error::InvalidParam("no LA mode".into()))?;
        let rates = si.rates(&state);
        let p = Phonon::new(Point::new(0.0, 0.0), Vector2D::new(1.0, 0.0), state, 1e-20, CellId(0))?;
        let n = 50_000;
        let mut normal = 0usize;
        for _ in 0..n {
            let s = si.scatter_sample(&p, &mut rng)?;
            match s.mechanism {
                ScatterMechanism::Normal => {
                    normal += 1;
                    assert!(s.direction.is_none());
                }
                ScatterMechanism::Impurity | ScatterMechanism::Boundary => {
                    assert_eq!(s.state, state);
                    assert!(s.direction.is_some());
                }
                ScatterMechanism::Umklapp => assert!(s.direction.is_some()),
            }
        }
        let expected = rates.normal / rates.total();
        assert_relative_eq!(normal as f64 / n as f64, expected, epsilon = 0.01);
        Ok(())
    }

    #[test]
    fn energy_density_increases_with_temperature() -> Result<()> {
        let si = Material::silicon(300.0)?;
        let (lo, mid, hi) = (si.energy_density(290.0), si.energy_density(300.0), si.energy_density(310.0));
        assert!(lo < mid && mid < hi);
        // Finite difference agrees with the deviational heat capacity.
        let c = (hi - lo) / 20.0;
        assert_relative_eq!(c, si.heat_capacity(), max_relative = 1e-2);
        Ok(())
    }

    #[test]
    fn invalid_temperature_rejected() {
        let err = Material::silicon(0.0).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn branch_above_peak_frequency_rejected() {
        // Quadratic LA branch peaks well below the requested cutoff.
        let err = Material::new(
            "bad",
            DispersionData::new([-1e-6, 1e3, 0.0], 1e13, [0.0, 1e3, 0.0], 1e12),
            RelaxationData::default(),
            300.0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("group velocity"));
    }
}
