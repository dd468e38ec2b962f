//! Factories for new phonons.
//!
//! Builders are stateless: the same builder and an identically seeded random stream produce
//! the same sequence.

use crate::core::cell::{Cell, NUDGE};
use crate::core::geometry::random_direction;
use crate::core::material::Material;
use crate::core::phonon::{PhaseStamp, Phonon};
use crate::core::surface::{cosine_weighted, Surface};
use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;

/// Construction contract shared by all builders.
pub trait PhononBuilder {
    /// One new phonon. Id, birth time and life budget are left to the caller.
    fn make<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Phonon>;

    /// Lazy sequence of `count` new phonons drawn from `rng`.
    fn build<'b, R: Rng + ?Sized>(&'b self, count: usize, rng: &'b mut R) -> Build<'b, Self, R>
    where
        Self: Sized,
    {
        Build {
            builder: self,
            rng,
            remaining: count,
        }
    }
}

/// Iterator returned by [`PhononBuilder::build`].
pub struct Build<'b, B, R: ?Sized> {
    builder: &'b B,
    rng: &'b mut R,
    remaining: usize,
}

impl<B: PhononBuilder, R: Rng + ?Sized> Iterator for Build<'_, B, R> {
    type Item = Result<Phonon>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.builder.make(self.rng))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<B: PhononBuilder, R: Rng + ?Sized> ExactSizeIterator for Build<'_, B, R> {}

fn check_energy(energy: f64) -> Result<()> {
    if !energy.is_finite() || energy == 0.0 {
        return Err(Error::InvalidParam(
            "bundle energy must be finite and non-zero".into(),
        ));
    }
    Ok(())
}

/// Phonons placed uniformly inside a cell with equilibrium spectral states and isotropic
/// directions.
#[derive(Debug, Clone, Copy)]
pub struct CellOriginBuilder<'m> {
    cell: &'m Cell,
    material: &'m Material,
    energy: f64,
}

impl<'m> CellOriginBuilder<'m> {
    /// `energy` is the signed bundle energy of every phonon.
    pub fn new(cell: &'m Cell, material: &'m Material, energy: f64) -> Result<Self> {
        check_energy(energy)?;
        Ok(Self {
            cell,
            material,
            energy,
        })
    }
}

impl PhononBuilder for CellOriginBuilder<'_> {
    fn make<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Phonon> {
        let position = self.cell.random_point(rng)?;
        let state = self.material.sample_equilibrium(rng);
        let direction = random_direction(rng);
        Phonon::new(position, direction, state, self.energy, self.cell.id())
    }
}

/// Phonons leaving a surface: uniform along its length, cosine-weighted about the inward
/// normal, with spectral states drawn from the wall-crossing distribution.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceOriginBuilder<'m> {
    surface: &'m Surface,
    material: &'m Material,
    energy: f64,
}

impl<'m> SurfaceOriginBuilder<'m> {
    pub fn new(surface: &'m Surface, material: &'m Material, energy: f64) -> Result<Self> {
        check_energy(energy)?;
        Ok(Self {
            surface,
            material,
            energy,
        })
    }
}

impl PhononBuilder for SurfaceOriginBuilder<'_> {
    fn make<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Phonon> {
        let line = self.surface.line();
        // Keep clear of the corners so the nudge cannot cross a neighboring wall.
        let margin = (2.0 * NUDGE / line.length()).min(0.5);
        let t = margin + (1.0 - 2.0 * margin) * rng.random::<f64>();
        let inward = self.surface.inward_normal();
        let position = line.point_at(t) + inward * NUDGE;
        let direction = cosine_weighted(&inward, rng);
        let state = self.material.sample_emission(rng);
        Phonon::new(position, direction, state, self.energy, self.surface.cell())
    }
}

/// Surface-origin phonons stamped with a forcing phase.
///
/// The phase `phi` is uniform over one period and the bundle energy is weighted by
/// `cos(2 pi phi / period)`, so the emitted population carries the first harmonic of the
/// forcing.
#[derive(Debug, Clone, Copy)]
pub struct PhasorBuilder<'m> {
    origin: SurfaceOriginBuilder<'m>,
    period: f64,
}

impl<'m> PhasorBuilder<'m> {
    /// Errors:
    /// - `Error::InvalidParam` if `period` is not finite and > 0.
    pub fn new(origin: SurfaceOriginBuilder<'m>, period: f64) -> Result<Self> {
        if !period.is_finite() || period <= 0.0 {
            return Err(Error::InvalidParam(
                "phasor period must be finite and > 0".into(),
            ));
        }
        Ok(Self { origin, period })
    }

    #[inline]
    pub fn period(&self) -> f64 {
        self.period
    }
}

impl PhononBuilder for PhasorBuilder<'_> {
    fn make<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Phonon> {
        let mut phonon = self.origin.make(rng)?;
        let offset = self.period * rng.random::<f64>();
        let weight = (2.0 * PI * offset / self.period).cos();
        if weight < 0.0 {
            phonon.sign = -phonon.sign;
        }
        phonon.occupancy *= weight.abs();
        phonon.phase = Some(PhaseStamp {
            offset,
            period: self.period,
        });
        Ok(phonon)
    }
}

/// The closed family of builders.
#[derive(Debug, Clone, Copy)]
pub enum Builder<'m> {
    CellOrigin(CellOriginBuilder<'m>),
    SurfaceOrigin(SurfaceOriginBuilder<'m>),
    Phasor(PhasorBuilder<'m>),
}

impl PhononBuilder for Builder<'_> {
    fn make<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Phonon> {
        match self {
            Builder::CellOrigin(b) => b.make(rng),
            Builder::SurfaceOrigin(b) => b.make(rng),
            Builder::Phasor(b) => b.make(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cell::CellId;
    use crate::core::geometry::Point;
    use crate::core::material::{DispersionData, RelaxationData};
    use crate::core::model::ModelBuilder;
    use crate::core::surface::{EmitSource, SurfaceKind};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn model() -> Result<crate::core::model::Model> {
        let mut b = ModelBuilder::new(300.0);
        let m = b.add_material(Material::new(
            "debye",
            DispersionData::debye(5000.0, 1e13),
            RelaxationData::default(),
            300.0,
        )?)?;
        b.add_triangle_cell(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
            m,
            0.5,
        )?;
        b.set_emit_surface(Point::new(0.0, 0.0), Point::new(10.0, 0.0), EmitSource::new(1.0)?)?;
        b.build()
    }

    fn emitter(model: &crate::core::model::Model) -> Result<&Surface> {
        let id = model.sources()[0];
        model.surface(id)
    }

    #[test]
    fn cell_origin_phonons_are_inside() -> Result<()> {
        let model = model()?;
        let cell = model.cell(CellId(0))?;
        let b = CellOriginBuilder::new(cell, model.material_of(CellId(0))?, 2e-20)?;
        let mut rng = StdRng::seed_from_u64(11);
        let phonons = b.build(500, &mut rng).collect::<Result<Vec<_>>>()?;
        assert_eq!(phonons.len(), 500);
        for p in &phonons {
            assert!(cell.polygon().strictly_contains(&p.position));
            assert_relative_eq!(p.energy(), 2e-20, max_relative = 1e-12);
            assert_relative_eq!(p.direction.norm(), 1.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn build_is_restartable() -> Result<()> {
        let model = model()?;
        let b = CellOriginBuilder::new(model.cell(CellId(0))?, model.material_of(CellId(0))?, 1e-20)?;
        let first = b
            .build(20, &mut StdRng::seed_from_u64(5))
            .collect::<Result<Vec<_>>>()?;
        let second = b
            .build(20, &mut StdRng::seed_from_u64(5))
            .collect::<Result<Vec<_>>>()?;
        for (a, c) in first.iter().zip(&second) {
            assert_eq!(a.position, c.position);
            assert_eq!(a.state, c.state);
        }
        Ok(())
    }

    #[test]
    fn surface_origin_leaves_into_cell() -> Result<()> {
        let model = model()?;
        let surface = emitter(&model)?;
        assert!(matches!(surface.kind(), SurfaceKind::Emit(_)));
        let b = SurfaceOriginBuilder::new(surface, model.material_of(CellId(0))?, -1e-20)?;
        let mut rng = StdRng::seed_from_u64(12);
        let n = surface.inward_normal();
        for p in b.build(500, &mut rng) {
            let p = p?;
            assert!(p.direction.dot(&n) >= 0.0);
            assert!(p.position.y > 0.0 && p.position.x > 0.0 && p.position.x < 10.0);
            assert!(p.energy() < 0.0);
        }
        Ok(())
    }

    #[test]
    fn phasor_weights_by_phase() -> Result<()> {
        let model = model()?;
        let origin =
            SurfaceOriginBuilder::new(emitter(&model)?, model.material_of(CellId(0))?, 1e-20)?;
        let b = Builder::Phasor(PhasorBuilder::new(origin, 4.0)?);
        let mut rng = StdRng::seed_from_u64(13);
        let mut net = 0.0;
        for p in b.build(2000, &mut rng) {
            let p = p?;
            let stamp = p.phase.unwrap();
            assert!((0.0..4.0).contains(&stamp.offset));
            let expected = 1e-20 * (2.0 * PI * stamp.offset / 4.0).cos();
            assert_relative_eq!(p.energy(), expected, epsilon = 1e-30, max_relative = 1e-9);
            net += p.energy();
        }
        // Cosine weights average out over a period.
        assert!(net.abs() < 2000.0 * 1e-20 * 0.1, "net {net}");
        assert!(PhasorBuilder::new(origin, 0.0).is_err());
        Ok(())
    }
}
