//! Cell boundary segments and their interaction with arriving phonons.

use crate::core::cell::CellId;
use crate::core::geometry::{Line, Vector2D};
use crate::core::material::Material;
use crate::core::phonon::Phonon;
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Handle of a surface: owning cell and position in its boundary loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId {
    pub cell: CellId,
    pub index: usize,
}

/// Sampling law for diffuse reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffuseLaw {
    /// In-plane cosine law: `p(theta) = cos(theta) / 2` about the normal.
    #[default]
    Lambertian,
    /// In-plane projection of a 3D cosine-weighted direction.
    Projected,
}

/// Emission configuration of an emitting wall.
///
/// `flux` is signed energy per unit length per unit time; a negative flux emits
/// negative-sign (cold) deviational phonons. An absorbing source also removes every phonon
/// that reaches it, like an isothermal wall; a non-absorbing source reflects them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitSource {
    pub flux: f64,
    pub absorbing: bool,
    /// Emission window `(start, duration)` in ns; always on when `None`.
    pub window: Option<(f64, f64)>,
}

impl EmitSource {
    /// A reflecting wall that emits `flux` at all times.
    pub fn new(flux: f64) -> Result<Self> {
        if !flux.is_finite() {
            return Err(Error::InvalidParam("emission flux must be finite".into()));
        }
        Ok(Self {
            flux,
            absorbing: false,
            window: None,
        })
    }

    /// An absorbing wall that emits nothing.
    pub fn sink() -> Self {
        Self {
            flux: 0.0,
            absorbing: true,
            window: None,
        }
    }

    /// An isothermal wall at `temperature`: absorbing, with the deviational flux a wall at that
    /// temperature emits into `material` linearized about `t_eq`.
    pub fn from_temperature(material: &Material, temperature: f64, t_eq: f64) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::InvalidParam(
                "wall temperature must be finite and > 0".into(),
            ));
        }
        Ok(Self {
            flux: material.emit_power() * (temperature - t_eq) / 4.0,
            absorbing: true,
            window: None,
        })
    }

    pub fn absorbing(mut self, absorbing: bool) -> Self {
        self.absorbing = absorbing;
        self
    }

    /// Restrict emission to `[start, start + duration)`.
    pub fn with_window(mut self, start: f64, duration: f64) -> Result<Self> {
        if !start.is_finite() || start < 0.0 || !duration.is_finite() || duration <= 0.0 {
            return Err(Error::InvalidParam(
                "emission window needs start >= 0 and duration > 0".into(),
            ));
        }
        self.window = Some((start, duration));
        Ok(self)
    }

    /// Signed energy leaving a wall of length `length` during `[t, t + dt)`.
    pub fn emission_energy(&self, length: f64, t: f64, dt: f64) -> f64 {
        let active = match self.window {
            None => dt,
            Some((start, duration)) => {
                let lo = t.max(start);
                let hi = (t + dt).min(start + duration);
                (hi - lo).max(0.0)
            }
        };
        self.flux * length * active
    }
}

/// Behavior of a surface beyond reflection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceKind {
    /// Plain reflecting wall.
    Boundary,
    /// Emitting wall.
    Emit(EmitSource),
    /// Interface to `neighbor`; `twin` is the neighbor's surface on the same segment.
    Transition {
        neighbor: CellId,
        twin: Option<SurfaceId>,
    },
}

/// What happened to a phonon at a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOutcome {
    SpecularReflect,
    DiffuseReflect,
    /// The phonon now belongs to `neighbor`.
    Transmit { neighbor: CellId },
    /// The phonon left the system.
    Absorb,
}

/// A boundary segment of a cell.
#[derive(Debug, Clone)]
pub struct Surface {
    line: Line,
    cell: CellId,
    specularity: f64,
    norm_sign: f64,
    diffuse: DiffuseLaw,
    kind: SurfaceKind,
}

impl Surface {
    /// Errors:
    /// - `Error::InvalidParam` if `specularity` is outside `[0, 1]`.
    pub fn new(line: Line, cell: CellId, specularity: f64, kind: SurfaceKind) -> Result<Self> {
        if !(0.0..=1.0).contains(&specularity) {
            return Err(Error::InvalidParam(format!(
                "specularity must be in [0, 1], got {specularity}"
            )));
        }
        Ok(Self {
            line,
            cell,
            specularity,
            norm_sign: 1.0,
            diffuse: DiffuseLaw::default(),
            kind,
        })
    }

    pub fn boundary(line: Line, cell: CellId, specularity: f64) -> Result<Self> {
        Self::new(line, cell, specularity, SurfaceKind::Boundary)
    }

    pub fn with_diffuse_law(mut self, law: DiffuseLaw) -> Self {
        self.diffuse = law;
        self
    }

    #[inline]
    pub fn line(&self) -> &Line {
        &self.line
    }

    #[inline]
    pub fn cell(&self) -> CellId {
        self.cell
    }

    #[inline]
    pub fn specularity(&self) -> f64 {
        self.specularity
    }

    #[inline]
    pub fn kind(&self) -> &SurfaceKind {
        &self.kind
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.line.length()
    }

    /// Neighbor cell of a transition surface.
    pub fn neighbor(&self) -> Option<CellId> {
        match self.kind {
            SurfaceKind::Transition { neighbor, .. } => Some(neighbor),
            _ => None,
        }
    }

    /// The neighbor's surface on the same segment, for transition surfaces.
    pub fn twin(&self) -> Option<SurfaceId> {
        match self.kind {
            SurfaceKind::Transition { twin, .. } => twin,
            _ => None,
        }
    }

    pub fn emit_source(&self) -> Option<&EmitSource> {
        match &self.kind {
            SurfaceKind::Emit(src) => Some(src),
            _ => None,
        }
    }

    /// +1 when the outward normal is the left normal of the segment, -1 otherwise.
    #[inline]
    pub fn norm_sign(&self) -> f64 {
        self.norm_sign
    }

    pub(crate) fn set_norm_sign(&mut self, sign: f64) {
        self.norm_sign = sign;
    }

    /// Unit normal pointing out of the owning cell.
    #[inline]
    pub fn outward_normal(&self) -> Vector2D {
        self.line.left_normal() * self.norm_sign
    }

    /// Unit normal pointing into the owning cell.
    #[inline]
    pub fn inward_normal(&self) -> Vector2D {
        -self.outward_normal()
    }

    /// Resolve a phonon that has reached this surface travelling along `phonon.direction`.
    ///
    /// For transition surfaces, `neighbor_material` is the neighbor's material when it differs
    /// from the current one. The phonon keeps its frequency and takes the neighbor's group
    /// velocity; if the neighbor has no mode at that frequency the phonon is reflected
    /// diffusely instead.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        phonon: &mut Phonon,
        neighbor_material: Option<&Material>,
        rng: &mut R,
    ) -> Result<SurfaceOutcome> {
        match self.kind {
            SurfaceKind::Transition { neighbor, .. } => {
                if let Some(material) = neighbor_material {
                    match material.state_at(phonon.state.frequency, phonon.state.polarization) {
                        Some(state) => phonon.set_state(state)?,
                        None => {
                            phonon.set_direction(self.diffuse_direction(rng)?)?;
                            return Ok(SurfaceOutcome::DiffuseReflect);
                        }
                    }
                }
                Ok(SurfaceOutcome::Transmit { neighbor })
            }
            SurfaceKind::Emit(src) if src.absorbing => Ok(SurfaceOutcome::Absorb),
            _ => self.reflect(phonon, rng),
        }
    }

    /// Specular with probability `specularity`, otherwise diffuse.
    pub fn reflect<R: Rng + ?Sized>(
        &self,
        phonon: &mut Phonon,
        rng: &mut R,
    ) -> Result<SurfaceOutcome> {
        let u: f64 = rng.random();
        if u < self.specularity {
            let mirrored = phonon.direction.mirror(&self.inward_normal());
            phonon.set_direction(mirrored)?;
            Ok(SurfaceOutcome::SpecularReflect)
        } else {
            phonon.set_direction(self.diffuse_direction(rng)?)?;
            Ok(SurfaceOutcome::DiffuseReflect)
        }
    }

    /// Direction drawn from this surface's diffuse law over the inward half-space.
    ///
    /// Errors:
    /// - `Error::Physics` if the sampled direction has zero length.
    pub fn diffuse_direction<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vector2D> {
        let n = self.inward_normal();
        match self.diffuse {
            DiffuseLaw::Lambertian => Ok(cosine_weighted(&n, rng)),
            DiffuseLaw::Projected => {
                let r: f64 = rng.random();
                let c = (2.0 * PI * rng.random::<f64>()).cos();
                let d = n * r.sqrt() + n.perp() * ((1.0 - r).sqrt() * c);
                d.normalized()
            }
        }
    }
}

/// Unit direction about `normal` with in-plane density `cos(theta) / 2`.
pub fn cosine_weighted<R: Rng + ?Sized>(normal: &Vector2D, rng: &mut R) -> Vector2D {
    let s = 2.0 * rng.random::<f64>() - 1.0;
    let c = (1.0 - s * s).max(0.0).sqrt();
    *normal * c + normal.perp() * s
}
