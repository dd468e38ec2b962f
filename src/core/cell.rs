use crate::core::composite::CompositeSurface;
use crate::core::geometry::{Point, Polygon, GEO_EPS};
use crate::core::material::{MaterialId, ScatterMechanism};
use crate::core::model::Model;
use crate::core::phonon::Phonon;
use crate::core::surface::{Surface, SurfaceId, SurfaceOutcome};
use crate::error::{Error, Result};
use ordered_float::NotNan;
use rand::Rng;

/// Distance a phonon is moved off a surface after interacting with it.
pub const NUDGE: f64 = 10.0 * GEO_EPS;

const MAX_SAMPLE_ATTEMPTS: usize = 10_000;

/// Index of a cell in the model's cell arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub usize);

/// What a single call to [`Cell::advance`] did to a phonon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advance {
    /// Flew for the whole budget without meeting anything.
    Drift { elapsed: f64 },
    /// Free flight expired inside the cell.
    Scatter {
        elapsed: f64,
        mechanism: ScatterMechanism,
    },
    /// Reached `surface` and was resolved there.
    Surface {
        elapsed: f64,
        surface: SurfaceId,
        outcome: SurfaceOutcome,
    },
}

impl Advance {
    #[inline]
    pub fn elapsed(&self) -> f64 {
        match *self {
            Advance::Drift { elapsed }
            | Advance::Scatter { elapsed, .. }
            | Advance::Surface { elapsed, .. } => elapsed,
        }
    }
}

/// A bounded region of one material.
#[derive(Debug, Clone)]
pub struct Cell {
    id: CellId,
    boundary: CompositeSurface,
    material: MaterialId,
    /// Material whose tables drive free flights and scattering; `material` unless retabulated.
    tables: MaterialId,
    initial_temperature: f64,
}

impl Cell {
    /// Errors:
    /// - `Error::InvalidParam` if a boundary surface belongs to another cell or the initial
    ///   temperature is not finite and > 0.
    pub fn new(
        id: CellId,
        boundary: CompositeSurface,
        material: MaterialId,
        initial_temperature: f64,
    ) -> Result<Self> {
        if let Some(s) = boundary.surfaces().iter().find(|s| s.cell() != id) {
            return Err(Error::InvalidParam(format!(
                "surface owned by cell {} placed in boundary of cell {}",
                s.cell().0,
                id.0
            )));
        }
        if !initial_temperature.is_finite() || initial_temperature <= 0.0 {
            return Err(Error::InvalidParam(
                "initial temperature must be finite and > 0".into(),
            ));
        }
        Ok(Self {
            id,
            boundary,
            material,
            tables: material,
            initial_temperature,
        })
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.id
    }

    #[inline]
    pub fn boundary(&self) -> &CompositeSurface {
        &self.boundary
    }

    #[inline]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    #[inline]
    pub fn tables(&self) -> MaterialId {
        self.tables
    }

    pub(crate) fn set_tables(&mut self, tables: MaterialId) {
        self.tables = tables;
    }

    #[inline]
    pub fn initial_temperature(&self) -> f64 {
        self.initial_temperature
    }

    #[inline]
    pub fn polygon(&self) -> &Polygon {
        self.boundary.polygon()
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.polygon().area()
    }

    /// Edge points count as inside.
    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        self.polygon().contains(p)
    }

    pub fn surface(&self, index: usize) -> Option<&Surface> {
        self.boundary.surface(index)
    }

    /// Uniform interior point, by rejection against the bounding box.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if no interior point is found within the attempt limit.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Point> {
        let bbox = self.polygon().bounding_box();
        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let p = bbox.random_point(rng);
            if self.polygon().strictly_contains(&p) {
                return Ok(p);
            }
        }
        Err(Error::InvalidParam(format!(
            "failed to sample an interior point of cell {} after {MAX_SAMPLE_ATTEMPTS} attempts",
            self.id.0
        )))
    }

    /// Move `phonon` until its free flight expires, it meets a surface, or `budget` ns pass.
    ///
    /// The free-flight clock is carried across calls in `phonon.flight_remaining`. After a
    /// surface event the phonon is nudged off the surface, into the neighbor for a
    /// transmission.
    ///
    /// Errors:
    /// - `Error::Physics` if the phonon is not in this cell, would fly forever without meeting
    ///   a surface, or ends up with an invalid direction or state.
    pub fn advance<R: Rng + ?Sized>(
        &self,
        model: &Model,
        phonon: &mut Phonon,
        budget: f64,
        rng: &mut R,
    ) -> Result<Advance> {
        if phonon.cell != self.id {
            return Err(Error::Physics(format!(
                "phonon {} is in cell {} but was advanced by cell {}",
                phonon.id, phonon.cell.0, self.id.0
            )));
        }
        let material = model.material(self.tables)?;
        let flight = match phonon.flight_remaining {
            Some(f) => f,
            None => material.free_flight_time(&phonon.state, rng),
        };
        let horizon = flight.min(budget);
        let reach = horizon * phonon.velocity();

        let Some(hit) = self.nearest_hit(phonon, reach) else {
            if !horizon.is_finite() {
                return Err(Error::Physics(format!(
                    "phonon {} in cell {} has an unbounded flight and no surface ahead",
                    phonon.id, self.id.0
                )));
            }
            phonon.drift(horizon);
            if flight <= budget {
                let sample = material.scatter_sample(phonon, rng)?;
                phonon.set_state(sample.state)?;
                if let Some(direction) = sample.direction {
                    phonon.set_direction(direction)?;
                }
                phonon.flight_remaining = Some(sample.free_flight_time);
                return Ok(Advance::Scatter {
                    elapsed: horizon,
                    mechanism: sample.mechanism,
                });
            }
            phonon.flight_remaining = Some(flight - horizon);
            return Ok(Advance::Drift { elapsed: horizon });
        };

        let elapsed = hit.distance / phonon.velocity();
        phonon.position = phonon.position + phonon.direction * hit.distance;
        phonon.flight_remaining = Some((flight - elapsed).max(0.0));

        let surface = &self.boundary.surfaces()[hit.index];
        let neighbor_material = match surface.neighbor() {
            Some(n) => {
                let other = model.cell(n)?.material();
                if other != self.material {
                    Some(model.material(other)?)
                } else {
                    None
                }
            }
            None => None,
        };
        let outcome = surface.resolve(phonon, neighbor_material, rng)?;
        match outcome {
            SurfaceOutcome::SpecularReflect | SurfaceOutcome::DiffuseReflect => {
                // Corner hits: fold the direction back in for every other surface met there.
                let mut push = surface.inward_normal();
                for &j in &hit.ties {
                    let n = self.boundary.surfaces()[j].inward_normal();
                    if phonon.direction.dot(&n) < 0.0 {
                        let mirrored = phonon.direction.mirror(&n);
                        phonon.set_direction(mirrored)?;
                    }
                    push = push + n;
                }
                phonon.position = phonon.position + push * NUDGE;
            }
            SurfaceOutcome::Transmit { neighbor } => {
                phonon.cell = neighbor;
                phonon.position = phonon.position + surface.outward_normal() * NUDGE;
            }
            SurfaceOutcome::Absorb => {}
        }
        Ok(Advance::Surface {
            elapsed,
            surface: SurfaceId {
                cell: self.id,
                index: hit.index,
            },
            outcome,
        })
    }

    // ============ Internal helpers ============

    /// Nearest surface ahead within `reach`, ignoring surfaces the phonon is moving away from.
    fn nearest_hit(&self, phonon: &Phonon, reach: f64) -> Option<Hit> {
        let mut candidates: Vec<(NotNan<f64>, usize)> = Vec::new();
        for (index, surface) in self.boundary.surfaces().iter().enumerate() {
            if phonon.direction.dot(&surface.inward_normal()) >= 0.0 {
                continue;
            }
            let Some(ray) = surface.line().ray_hit(&phonon.position, &phonon.direction) else {
                continue;
            };
            if ray.distance < -GEO_EPS {
                continue;
            }
            let distance = ray.distance.max(0.0);
            if distance > reach {
                continue;
            }
            if let Ok(d) = NotNan::new(distance) {
                candidates.push((d, index));
            }
        }
        let &(best, index) = candidates.iter().min()?;
        let ties = candidates
            .iter()
            .filter(|(d, j)| *j != index && (d.into_inner() - best.into_inner()) <= GEO_EPS)
            .map(|&(_, j)| j)
            .collect();
        Some(Hit {
            index,
            distance: best.into_inner(),
            ties,
        })
    }
}

#[derive(Debug)]
struct Hit {
    index: usize,
    distance: f64,
    ties: Vec<usize>,
}
