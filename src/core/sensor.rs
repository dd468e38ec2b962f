//! Passive measurement points and their raw tallies.

use crate::core::cell::CellId;
use crate::core::event::{Event, EventKind};
use crate::core::geometry::Vector2D;
use crate::core::material::MaterialId;
use crate::core::surface::SurfaceId;
use std::ops::AddAssign;

/// Index of a sensor in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(pub usize);

/// Where a sensor looks.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorLocation {
    /// Area-weighted region made of whole cells.
    Region(Vec<CellId>),
    /// A surface; crossings are counted along the owning cell's outward normal, so the twin
    /// surface of a transition counts with the opposite sign.
    Surface {
        surface: SurfaceId,
        twin: Option<SurfaceId>,
    },
}

/// Raw per-step accumulation.
///
/// Fields:
/// - `energy`: census energy inside a region
/// - `flux`: census sum of `energy * velocity` inside a region
/// - `crossed`: net energy through a surface along its outward normal
/// - `collected`: energy absorbed or retired
/// - `events`: number of events observed
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tally {
    pub energy: f64,
    pub flux: Vector2D,
    pub crossed: f64,
    pub collected: f64,
    pub events: u64,
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.energy += rhs.energy;
        self.flux = self.flux + rhs.flux;
        self.crossed += rhs.crossed;
        self.collected += rhs.collected;
        self.events += rhs.events;
    }
}

/// A sensor bound to a location.
#[derive(Debug, Clone)]
pub struct Sensor {
    id: SensorId,
    location: SensorLocation,
    material: MaterialId,
    measure: f64,
    pending: Tally,
    collected_total: f64,
}

impl Sensor {
    /// `measure` is the region area or the surface length.
    pub(crate) fn new(
        id: SensorId,
        location: SensorLocation,
        material: MaterialId,
        measure: f64,
    ) -> Self {
        Self {
            id,
            location,
            material,
            measure,
            pending: Tally::default(),
            collected_total: 0.0,
        }
    }

    #[inline]
    pub fn id(&self) -> SensorId {
        self.id
    }

    #[inline]
    pub fn location(&self) -> &SensorLocation {
        &self.location
    }

    /// Material used for calibration.
    #[inline]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub(crate) fn set_material(&mut self, material: MaterialId) {
        self.material = material;
    }

    /// Region area (nm^2) or surface length (nm).
    #[inline]
    pub fn measure(&self) -> f64 {
        self.measure
    }

    #[inline]
    pub fn is_region(&self) -> bool {
        matches!(self.location, SensorLocation::Region(_))
    }

    /// Energy absorbed or retired here since the run began.
    #[inline]
    pub fn collected_total(&self) -> f64 {
        self.collected_total
    }

    /// Contribution of `event` to this sensor, or `None` outside its domain.
    pub fn contribution(&self, event: &Event) -> Option<Tally> {
        let e = event.energy;
        let mut t = Tally {
            events: 1,
            ..Tally::default()
        };
        match &self.location {
            SensorLocation::Region(cells) => {
                if !cells.contains(&event.cell) {
                    return None;
                }
                match event.kind {
                    EventKind::Census => {
                        t.energy = e;
                        t.flux = event.velocity * e;
                    }
                    EventKind::Absorb | EventKind::Retire => t.collected = e,
                    _ => {}
                }
            }
            SensorLocation::Surface { surface, twin } => {
                let sign = match event.surface {
                    Some(s) if s == *surface => 1.0,
                    Some(s) if Some(s) == *twin => -1.0,
                    _ => return None,
                };
                match event.kind {
                    EventKind::Transmit { .. } => t.crossed = sign * e,
                    EventKind::Absorb => {
                        t.crossed = sign * e;
                        t.collected = e;
                    }
                    EventKind::Emit => t.crossed = -sign * e,
                    _ => {}
                }
            }
        }
        Some(t)
    }

    /// Add `event` to the pending tally. Returns its contribution, if any.
    pub fn observe(&mut self, event: &Event) -> Option<Tally> {
        let t = self.contribution(event)?;
        self.pending += t;
        self.collected_total += t.collected;
        Some(t)
    }

    /// Hand over the pending tally and start a new one.
    pub fn take_pending(&mut self) -> Tally {
        std::mem::take(&mut self.pending)
    }
}

/// A committed step of sensor output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub step: u64,
    /// End of the step, relative to the controller's time offset (ns).
    pub time: f64,
    pub dt: f64,
    /// Position in the forcing period, in `[0, 1)`, for periodic runs.
    pub phase: Option<f64>,
    pub tally: Tally,
}

/// Accumulation for one phase bin of a periodic run.
///
/// `time` is the measuring time attributed to the bin and `snapshots` the number of census
/// snapshots it represents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseBin {
    pub tally: Tally,
    pub time: f64,
    pub snapshots: f64,
}

/// Everything a controller committed for one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorMeasurements {
    pub sensor: SensorId,
    pub records: Vec<Measurement>,
    pub bins: Vec<PhaseBin>,
}

impl SensorMeasurements {
    pub fn new(sensor: SensorId) -> Self {
        Self {
            sensor,
            records: Vec::new(),
            bins: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of all committed tallies.
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        for r in &self.records {
            total += r.tally;
        }
        total
    }
}
