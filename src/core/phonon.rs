use crate::core::cell::CellId;
use crate::core::geometry::{Point, Vector2D};
use crate::core::material::HBAR;
use crate::error::{Error, Result};

/// Acoustic polarization branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarization {
    /// Longitudinal acoustic.
    LA,
    /// Transverse acoustic (doubly degenerate).
    TA,
}

impl Polarization {
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Polarization::LA => 0,
            Polarization::TA => 1,
        }
    }
}

/// Frequency bin, exact angular frequency, branch and group velocity of a phonon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralState {
    pub freq_index: usize,
    /// Angular frequency (rad/s).
    pub frequency: f64,
    pub polarization: Polarization,
    /// Group velocity (m/s, equivalently nm/ns).
    pub velocity: f64,
}

/// Oscillation phase carried by phonons emitted under periodic forcing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStamp {
    /// Phase at birth, in `[0, period)` (ns).
    pub offset: f64,
    /// Forcing period (ns).
    pub period: f64,
}

/// A simulated phonon bundle.
///
/// Fields:
/// - `id`: stable identifier, also selects the phonon's random stream
/// - `position`: current location (nm)
/// - `direction`: unit travel direction
/// - `state`: frequency bin, frequency, branch and group velocity
/// - `sign`: deviational sign, +1 or -1
/// - `occupancy`: number of physical phonons in the bundle (> 0)
/// - `cell`: cell currently containing the phonon
/// - `life_steps`: remaining step budget; the phonon retires when it reaches zero
/// - `flight_remaining`: time left until the next scatter (ns), `None` when not yet drawn
/// - `birth_time`: simulation time at creation (ns)
/// - `phase`: periodic forcing stamp, if any
/// - `event_count`: number of events the phonon has taken part in
#[derive(Debug, Clone)]
pub struct Phonon {
    pub id: u64,
    pub position: Point,
    pub direction: Vector2D,
    pub state: SpectralState,
    pub sign: f64,
    pub occupancy: f64,
    pub cell: CellId,
    pub life_steps: u32,
    pub flight_remaining: Option<f64>,
    pub birth_time: f64,
    pub phase: Option<PhaseStamp>,
    pub event_count: u64,
}

impl Phonon {
    /// Create a phonon carrying the signed energy `energy` (J).
    ///
    /// The direction is normalized. The id, birth time and life budget are assigned by the
    /// simulator.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if the position or energy is NaN/inf, or the state has a
    ///   non-positive frequency or velocity.
    /// - `Error::Physics` if `direction` has zero length.
    pub fn new(
        position: Point,
        direction: Vector2D,
        state: SpectralState,
        energy: f64,
        cell: CellId,
    ) -> Result<Self> {
        if !position.is_finite() {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !energy.is_finite() {
            return Err(Error::InvalidParam("energy must be finite".into()));
        }
        validate_state(&state)?;
        let direction = direction.normalized()?;
        Ok(Self {
            id: 0,
            position,
            direction,
            state,
            sign: if energy < 0.0 { -1.0 } else { 1.0 },
            occupancy: energy.abs() / (HBAR * state.frequency),
            cell,
            life_steps: 0,
            flight_remaining: None,
            birth_time: 0.0,
            phase: None,
            event_count: 0,
        })
    }

    /// Signed bundle energy: sign * occupancy * hbar * omega.
    #[inline]
    pub fn energy(&self) -> f64 {
        self.sign * self.occupancy * HBAR * self.state.frequency
    }

    #[inline]
    pub fn velocity(&self) -> f64 {
        self.state.velocity
    }

    /// Velocity vector (nm/ns).
    #[inline]
    pub fn velocity_vector(&self) -> Vector2D {
        self.direction * self.state.velocity
    }

    /// Move in a straight line for `time` ns.
    #[inline]
    pub fn drift(&mut self, time: f64) {
        self.position = self.position + self.velocity_vector() * time;
    }

    /// Set the travel direction (normalized).
    pub fn set_direction(&mut self, direction: Vector2D) -> Result<()> {
        self.direction = direction.normalized()?;
        Ok(())
    }

    /// Replace the spectral state, rescaling the occupancy so that the bundle energy is unchanged.
    pub fn set_state(&mut self, state: SpectralState) -> Result<()> {
        validate_state(&state)?;
        self.occupancy *= self.state.frequency / state.frequency;
        self.state = state;
        Ok(())
    }

    /// Phase within the forcing period at simulation time `time`, as a fraction in `[0, 1)`.
    pub fn phase_at(&self, time: f64) -> Option<f64> {
        self.phase.map(|stamp| {
            let t = (stamp.offset + (time - self.birth_time)).rem_euclid(stamp.period);
            (t / stamp.period).min(1.0 - f64::EPSILON)
        })
    }

    #[inline]
    pub fn bump_event_count(&mut self) {
        self.event_count = self.event_count.saturating_add(1);
    }
}

fn validate_state(state: &SpectralState) -> Result<()> {
    if !state.frequency.is_finite() || state.frequency <= 0.0 {
        return Err(Error::InvalidParam("frequency must be finite and > 0".into()));
    }
    if !state.velocity.is_finite() || state.velocity <= 0.0 {
        return Err(Error::InvalidParam("velocity must be finite and > 0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn state(frequency: f64, velocity: f64) -> SpectralState {
        SpectralState {
            freq_index: 0,
            frequency,
            polarization: Polarization::LA,
            velocity,
        }
    }

    #[test]
    fn new_phonon_ok() -> Result<()> {
        let p = Phonon::new(
            Point::new(1.0, 2.0),
            Vector2D::new(3.0, 4.0),
            state(1e13, 6000.0),
            -2e-20,
            CellId(3),
        )?;
        assert_eq!(p.cell, CellId(3));
        assert_relative_eq!(p.direction.dx, 0.6);
        assert_relative_eq!(p.direction.dy, 0.8);
        assert_eq!(p.sign, -1.0);
        assert_relative_eq!(p.energy(), -2e-20, max_relative = 1e-12);
        assert_eq!(p.event_count, 0);
        Ok(())
    }

    #[test]
    fn zero_direction_is_physics_fault() {
        let err = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::ZERO,
            state(1e13, 6000.0),
            1e-20,
            CellId(0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Physics(_)));
    }

    #[test]
    fn invalid_velocity_rejected() {
        let err = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::new(1.0, 0.0),
            state(1e13, 0.0),
            1e-20,
            CellId(0),
        )
        .unwrap_err();
        assert!(err.to_string().contains("velocity"));
    }

    #[test]
    fn state_change_conserves_energy() -> Result<()> {
        let mut p = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::new(1.0, 0.0),
            state(1e13, 6000.0),
            3e-20,
            CellId(0),
        )?;
        p.set_state(state(4.7e13, 3500.0))?;
        assert_relative_eq!(p.energy(), 3e-20, max_relative = 1e-12);
        assert_relative_eq!(p.velocity(), 3500.0);
        Ok(())
    }

    #[test]
    fn drift_moves_along_direction() -> Result<()> {
        let mut p = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::new(0.0, 1.0),
            state(1e13, 100.0),
            1e-20,
            CellId(0),
        )?;
        p.drift(0.5);
        assert_relative_eq!(p.position.y, 50.0);
        assert_relative_eq!(p.position.x, 0.0);
        Ok(())
    }

    #[test]
    fn phase_advances_with_age() -> Result<()> {
        let mut p = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::new(1.0, 0.0),
            state(1e13, 100.0),
            1e-20,
            CellId(0),
        )?;
        assert!(p.phase_at(1.0).is_none());
        p.birth_time = 2.0;
        p.phase = Some(PhaseStamp {
            offset: 0.25,
            period: 1.0,
        });
        assert_relative_eq!(p.phase_at(2.0).unwrap(), 0.25);
        assert_relative_eq!(p.phase_at(3.5).unwrap(), 0.75);
        Ok(())
    }
}
