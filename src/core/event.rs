use crate::core::cell::CellId;
use crate::core::geometry::{Point, Vector2D};
use crate::core::material::ScatterMechanism;
use crate::core::phonon::Phonon;
use crate::core::surface::SurfaceId;
use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::cmp::Ordering;

/// Kinds of events in a phonon's trail.
///
/// Tie-breaking at equal times follows declaration order, so a phonon is emitted before it
/// moves and counted in the end-of-step census after everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Phonon created at an emitting surface.
    Emit,
    /// Free flight expired inside a cell.
    Scatter(ScatterMechanism),
    /// Reflection at a surface.
    Reflect { specular: bool },
    /// Crossing into `to` through a transition surface.
    Transmit { to: CellId },
    /// Phonon left the system at an absorbing surface.
    Absorb,
    /// Phonon removed after exhausting its life-step budget.
    Retire,
    /// Snapshot of a live phonon at the end of a step.
    Census,
}

impl EventKind {
    #[inline]
    fn order_key(&self) -> u8 {
        match self {
            EventKind::Emit => 0,
            EventKind::Scatter(_) => 1,
            EventKind::Reflect { .. } => 2,
            EventKind::Transmit { .. } => 3,
            EventKind::Absorb => 4,
            EventKind::Retire => 5,
            EventKind::Census => 6,
        }
    }
}

/// A phonon event with deterministic ordering.
///
/// - `time`: occurrence time (finite, non-NaN).
/// - `kind`: what happened.
/// - `phonon`, `seq`: phonon id and position in that phonon's trail.
/// - `cell`: cell the phonon was in when the event happened (the cell being left for
///   `Transmit`).
/// - `surface`: surface involved, for surface events.
/// - `energy`: signed bundle energy.
/// - `phase`: forcing phase in `[0, 1)` for phase-stamped phonons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: NotNan<f64>,
    pub kind: EventKind,
    pub phonon: u64,
    pub seq: u32,
    pub cell: CellId,
    pub surface: Option<SurfaceId>,
    pub position: Point,
    pub velocity: Vector2D,
    pub energy: f64,
    pub phase: Option<f64>,
}

impl Event {
    /// Snapshot `phonon` into an event, validating that time is finite and non-NaN.
    pub fn new(time: f64, kind: EventKind, phonon: &Phonon) -> Result<Self> {
        if time.is_nan() {
            return Err(Error::Physics("event time cannot be NaN".into()));
        }
        if !time.is_finite() {
            return Err(Error::Physics("event time must be finite".into()));
        }
        let time =
            NotNan::new(time).map_err(|_| Error::Physics("event time cannot be NaN".into()))?;
        Ok(Self {
            time,
            kind,
            phonon: phonon.id,
            seq: 0,
            cell: phonon.cell,
            surface: None,
            position: phonon.position,
            velocity: phonon.velocity_vector(),
            energy: phonon.energy(),
            phase: phonon.phase_at(time.into_inner()),
        })
    }

    pub fn at_surface(mut self, surface: SurfaceId) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn in_cell(mut self, cell: CellId) -> Self {
        self.cell = cell;
        self
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.kind.order_key().cmp(&other.kind.order_key()))
            .then_with(|| self.phonon.cmp(&other.phonon))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phonon::{Polarization, SpectralState};

    fn phonon(id: u64) -> Phonon {
        let state = SpectralState {
            freq_index: 0,
            frequency: 1e13,
            polarization: Polarization::TA,
            velocity: 5000.0,
        };
        let mut p = Phonon::new(
            Point::new(0.0, 0.0),
            Vector2D::new(1.0, 0.0),
            state,
            1e-20,
            CellId(0),
        )
        .unwrap();
        p.id = id;
        p
    }

    #[test]
    fn new_event_rejects_nan_time() {
        let err = Event::new(f64::NAN, EventKind::Census, &phonon(1)).unwrap_err();
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn ordering_by_time() -> Result<()> {
        let e1 = Event::new(1.0, EventKind::Census, &phonon(0))?;
        let e2 = Event::new(2.0, EventKind::Emit, &phonon(0))?;
        assert!(e1 < e2);
        Ok(())
    }

    #[test]
    fn tie_breaker_uses_kind_then_phonon() -> Result<()> {
        let t = 5.0;
        let emit = Event::new(t, EventKind::Emit, &phonon(9))?;
        let census = Event::new(t, EventKind::Census, &phonon(1))?;
        assert!(emit < census);

        let a = Event::new(t, EventKind::Absorb, &phonon(1))?;
        let b = Event::new(t, EventKind::Absorb, &phonon(2))?;
        assert!(a < b);
        Ok(())
    }

    #[test]
    fn snapshot_copies_phonon_state() -> Result<()> {
        let p = phonon(4);
        let e = Event::new(0.5, EventKind::Retire, &p)?.in_cell(CellId(2));
        assert_eq!(e.phonon, 4);
        assert_eq!(e.cell, CellId(2));
        assert_eq!(e.energy, p.energy());
        assert_eq!(e.velocity.dx, 5000.0);
        assert!(e.phase.is_none());
        Ok(())
    }
}
