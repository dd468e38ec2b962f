//! Domain assembly: materials, cells, emitters, sensors and the simulation mode.

use crate::core::cell::{Cell, CellId};
use crate::core::composite::CompositeSurface;
use crate::core::controller::{PeriodicConfig, SteadyStateConfig, TransientConfig};
use crate::core::geometry::{Line, Point, Polygon, SegmentIntersection, Triangle, GEO_EPS};
use crate::core::material::{Material, MaterialId};
use crate::core::sensor::{Sensor, SensorId, SensorLocation};
use crate::core::surface::{DiffuseLaw, EmitSource, Surface, SurfaceId, SurfaceKind};
use crate::error::{Error, Result};
use ordered_float::NotNan;

/// Run mode, with the policy its controllers follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulationMode {
    SteadyState(SteadyStateConfig),
    Periodic(PeriodicConfig),
    Transient(TransientConfig),
}

impl Default for SimulationMode {
    fn default() -> Self {
        SimulationMode::SteadyState(SteadyStateConfig::default())
    }
}

impl SimulationMode {
    pub fn validate(&self) -> Result<()> {
        match self {
            SimulationMode::SteadyState(c) => c.validate(),
            SimulationMode::Periodic(c) => c.validate(),
            SimulationMode::Transient(c) => c.validate(),
        }
    }
}

/// Where a sensor is placed.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorSpec {
    /// A region made of whole cells sharing one material.
    Cells(Vec<CellId>),
    /// A segment that coincides with a cell surface after splitting.
    Edge(Point, Point),
}

#[derive(Debug, Clone)]
struct CellSpec {
    vertices: Vec<Point>,
    material: MaterialId,
    specularity: f64,
    initial_temperature: Option<f64>,
}

/// Collects the domain description and validates it into a [`Model`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    t_eq: f64,
    mode: SimulationMode,
    diffuse: DiffuseLaw,
    materials: Vec<Material>,
    cells: Vec<CellSpec>,
    emitters: Vec<(Line, EmitSource)>,
    sensors: Vec<SensorSpec>,
}

impl ModelBuilder {
    /// New domain at equilibrium temperature `t_eq` (K).
    pub fn new(t_eq: f64) -> Self {
        Self {
            t_eq,
            mode: SimulationMode::default(),
            diffuse: DiffuseLaw::default(),
            materials: Vec::new(),
            cells: Vec::new(),
            emitters: Vec::new(),
            sensors: Vec::new(),
        }
    }

    pub fn set_mode(&mut self, mode: SimulationMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Diffuse reflection law applied to every surface.
    pub fn set_diffuse_law(&mut self, law: DiffuseLaw) -> &mut Self {
        self.diffuse = law;
        self
    }

    /// Errors:
    /// - `Error::InvalidParam` if a material of the same name exists.
    pub fn add_material(&mut self, material: Material) -> Result<MaterialId> {
        if self.materials.iter().any(|m| m.name() == material.name()) {
            return Err(Error::InvalidParam(format!(
                "material '{}' already added",
                material.name()
            )));
        }
        self.materials.push(material);
        Ok(MaterialId(self.materials.len() - 1))
    }

    /// Add a simple polygonal cell, vertices in either orientation.
    ///
    /// Errors:
    /// - `Error::InvalidParam` for an unknown material or a specularity outside `[0, 1]`.
    /// - `Error::DegenerateShape` for a zero-area polygon or a zero-length edge.
    pub fn add_cell(
        &mut self,
        vertices: Vec<Point>,
        material: MaterialId,
        specularity: f64,
    ) -> Result<CellId> {
        if material.0 >= self.materials.len() {
            return Err(Error::InvalidParam(format!(
                "unknown material id {}",
                material.0
            )));
        }
        if !(0.0..=1.0).contains(&specularity) {
            return Err(Error::InvalidParam(format!(
                "specularity must be in [0, 1], got {specularity}"
            )));
        }
        Polygon::new(vertices.clone())?;
        let n = vertices.len();
        for i in 0..n {
            Line::new(vertices[i], vertices[(i + 1) % n])?;
        }
        self.cells.push(CellSpec {
            vertices,
            material,
            specularity,
            initial_temperature: None,
        });
        Ok(CellId(self.cells.len() - 1))
    }

    pub fn add_triangle_cell(
        &mut self,
        p1: Point,
        p2: Point,
        p3: Point,
        material: MaterialId,
        specularity: f64,
    ) -> Result<CellId> {
        let tri = Triangle::new(p1, p2, p3)?;
        self.add_cell(tri.points().to_vec(), material, specularity)
    }

    /// Axis-aligned rectangle with opposite corners `p1` and `p2`.
    pub fn add_rect_cell(
        &mut self,
        p1: Point,
        p2: Point,
        material: MaterialId,
        specularity: f64,
    ) -> Result<CellId> {
        let (x0, x1) = (p1.x.min(p2.x), p1.x.max(p2.x));
        let (y0, y1) = (p1.y.min(p2.y), p1.y.max(p2.y));
        if x1 - x0 <= GEO_EPS || y1 - y0 <= GEO_EPS {
            return Err(Error::DegenerateShape(format!(
                "rectangle ({}, {}) - ({}, {}) has zero area",
                p1.x, p1.y, p2.x, p2.y
            )));
        }
        let vertices = vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ];
        self.add_cell(vertices, material, specularity)
    }

    /// Starting temperature of `cell`; cells default to `t_eq`.
    pub fn set_initial_temperature(&mut self, cell: CellId, temperature: f64) -> Result<()> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::InvalidParam(
                "initial temperature must be finite and > 0".into(),
            ));
        }
        let spec = self
            .cells
            .get_mut(cell.0)
            .ok_or_else(|| Error::InvalidParam(format!("unknown cell id {}", cell.0)))?;
        spec.initial_temperature = Some(temperature);
        Ok(())
    }

    /// Mark the boundary segment `p1`-`p2` as an emitter. It is split out of the cell edge it
    /// lies on when the model is built.
    pub fn set_emit_surface(&mut self, p1: Point, p2: Point, source: EmitSource) -> Result<()> {
        let line = Line::new(p1, p2)?;
        self.emitters.push((line, source));
        Ok(())
    }

    pub fn add_sensor(&mut self, spec: SensorSpec) -> Result<SensorId> {
        match &spec {
            SensorSpec::Cells(cells) => {
                if cells.is_empty() {
                    return Err(Error::InvalidParam(
                        "region sensor needs at least one cell".into(),
                    ));
                }
                if let Some(c) = cells.iter().find(|c| c.0 >= self.cells.len()) {
                    return Err(Error::InvalidParam(format!("unknown cell id {}", c.0)));
                }
            }
            SensorSpec::Edge(p1, p2) => {
                Line::new(*p1, *p2)?;
            }
        }
        self.sensors.push(spec);
        Ok(SensorId(self.sensors.len() - 1))
    }

    /// Validate everything and assemble the model.
    ///
    /// Errors:
    /// - `Error::InvalidParam` for an invalid mode or `t_eq`, no cells, a material whose
    ///   reference temperature differs from `t_eq`, an emitter or edge sensor that does not lie
    ///   on cell edges, or a region sensor mixing materials.
    /// - `Error::Intersection` if edges of two cells cross.
    /// - `Error::Overlap` if cells overlap or an emitter lies on a shared edge.
    pub fn build(self) -> Result<Model> {
        if !self.t_eq.is_finite() || self.t_eq <= 0.0 {
            return Err(Error::InvalidParam("t_eq must be finite and > 0".into()));
        }
        self.mode.validate()?;
        if self.cells.is_empty() {
            return Err(Error::InvalidParam("model has no cells".into()));
        }
        for m in &self.materials {
            if (m.temperature() - self.t_eq).abs() > 1e-9 * self.t_eq {
                return Err(Error::InvalidParam(format!(
                    "material '{}' is tabulated at {} K but the model runs at t_eq = {} K",
                    m.name(),
                    m.temperature(),
                    self.t_eq
                )));
            }
        }

        let polygons = self
            .cells
            .iter()
            .map(|c| Polygon::new(c.vertices.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.check_cell_pairs(&polygons)?;

        let pieces = self.split_edges()?;
        let mut loops: Vec<Vec<Surface>> = Vec::with_capacity(pieces.len());
        let mut emitter_cover = vec![0.0; self.emitters.len()];
        for (i, cell_pieces) in pieces.iter().enumerate() {
            let spec = &self.cells[i];
            let orientation = orientation_of(&polygons[i]);
            let mut surfaces = Vec::with_capacity(cell_pieces.len());
            for piece in cell_pieces {
                let twin = find_twin(&pieces, i, piece);
                let emitter = self
                    .emitters
                    .iter()
                    .position(|(l, _)| l.contains(&piece.p1()) && l.contains(&piece.p2()));
                let kind = match (twin, emitter) {
                    (Some(_), Some(_)) => {
                        return Err(Error::Overlap(format!(
                            "emitter lies on the edge shared by cell {i} and another cell"
                        )));
                    }
                    (Some(twin), None) => {
                        let other = orientation_of(&polygons[twin.cell.0]);
                        let n_self = piece.left_normal() * orientation;
                        let n_other = pieces[twin.cell.0][twin.index].left_normal() * other;
                        if n_self.dot(&n_other) > 0.0 {
                            return Err(Error::Overlap(format!(
                                "cells {i} and {} lie on the same side of a shared edge",
                                twin.cell.0
                            )));
                        }
                        SurfaceKind::Transition {
                            neighbor: twin.cell,
                            twin: Some(twin),
                        }
                    }
                    (None, Some(e)) => {
                        emitter_cover[e] += piece.length();
                        SurfaceKind::Emit(self.emitters[e].1)
                    }
                    (None, None) => SurfaceKind::Boundary,
                };
                surfaces.push(
                    Surface::new(*piece, CellId(i), spec.specularity, kind)?
                        .with_diffuse_law(self.diffuse),
                );
            }
            loops.push(surfaces);
        }
        for (e, (line, _)) in self.emitters.iter().enumerate() {
            if (emitter_cover[e] - line.length()).abs() > GEO_EPS * line.length().max(1.0) {
                return Err(Error::InvalidParam(format!(
                    "emitter ({}, {}) - ({}, {}) does not lie on an outer cell edge",
                    line.p1().x,
                    line.p1().y,
                    line.p2().x,
                    line.p2().y
                )));
            }
        }

        let mut cells = Vec::with_capacity(loops.len());
        for (i, surfaces) in loops.into_iter().enumerate() {
            let spec = &self.cells[i];
            let boundary = CompositeSurface::new(surfaces)?;
            cells.push(Cell::new(
                CellId(i),
                boundary,
                spec.material,
                spec.initial_temperature.unwrap_or(self.t_eq),
            )?);
        }

        let sources = cells
            .iter()
            .flat_map(|c| {
                c.boundary()
                    .surfaces()
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.emit_source().is_some_and(|src| src.flux != 0.0))
                    .map(move |(index, _)| SurfaceId {
                        cell: c.id(),
                        index,
                    })
            })
            .collect();

        let mut sensors = Vec::with_capacity(self.sensors.len());
        for (k, spec) in self.sensors.iter().enumerate() {
            sensors.push(make_sensor(SensorId(k), spec, &cells)?);
        }

        Ok(Model {
            t_eq: self.t_eq,
            mode: self.mode,
            cells,
            materials: self.materials,
            sensors,
            sources,
        })
    }

    // ============ Internal helpers ============

    fn check_cell_pairs(&self, polygons: &[Polygon]) -> Result<()> {
        for i in 0..polygons.len() {
            for j in (i + 1)..polygons.len() {
                for a in edges(&self.cells[i].vertices) {
                    for b in edges(&self.cells[j].vertices) {
                        if let SegmentIntersection::Proper(p) = a.intersect(&b) {
                            return Err(Error::Intersection(format!(
                                "edges of cells {i} and {j} cross at ({}, {})",
                                p.x, p.y
                            )));
                        }
                    }
                }
                // Vertices alone miss cells whose corners all sit on the other's boundary.
                let inside = |a: usize, b: usize| {
                    self.cells[a]
                        .vertices
                        .iter()
                        .copied()
                        .chain(edge_samples(&self.cells[a].vertices, &polygons[a]))
                        .any(|v| polygons[b].strictly_contains(&v))
                };
                if inside(i, j) || inside(j, i) {
                    return Err(Error::Overlap(format!("cells {i} and {j} overlap")));
                }
            }
        }
        Ok(())
    }

    /// Every cell edge split at the vertices of other cells and at emitter endpoints lying
    /// strictly inside it.
    fn split_edges(&self) -> Result<Vec<Vec<Line>>> {
        let mut cuts: Vec<Point> = self
            .emitters
            .iter()
            .flat_map(|(l, _)| [l.p1(), l.p2()])
            .collect();
        cuts.extend(self.cells.iter().flat_map(|c| c.vertices.iter().copied()));

        let mut pieces = Vec::with_capacity(self.cells.len());
        for spec in &self.cells {
            let mut cell_pieces = Vec::new();
            for edge in edges(&spec.vertices) {
                let mut params: Vec<NotNan<f64>> = cuts
                    .iter()
                    .filter(|p| {
                        edge.contains(p) && !p.approx_eq(&edge.p1()) && !p.approx_eq(&edge.p2())
                    })
                    .filter_map(|p| NotNan::new(edge.project(p)).ok())
                    .collect();
                params.sort();
                params.dedup_by(|a, b| {
                    edge.point_at(a.into_inner())
                        .approx_eq(&edge.point_at(b.into_inner()))
                });
                let mut start = edge.p1();
                for t in params {
                    let p = edge.point_at(t.into_inner());
                    cell_pieces.push(Line::new(start, p)?);
                    start = p;
                }
                cell_pieces.push(Line::new(start, edge.p2())?);
            }
            pieces.push(cell_pieces);
        }
        Ok(pieces)
    }
}

fn edges(vertices: &[Point]) -> impl Iterator<Item = Line> + '_ {
    let n = vertices.len();
    (0..n).filter_map(move |i| Line::new(vertices[i], vertices[(i + 1) % n]).ok())
}

/// Edge midpoints of a cell plus points just inside each midpoint.
fn edge_samples(vertices: &[Point], polygon: &Polygon) -> Vec<Point> {
    let inward = -orientation_of(polygon);
    let mut out = Vec::with_capacity(2 * vertices.len());
    for edge in edges(vertices) {
        let mid = edge.midpoint();
        out.push(mid);
        let inner = mid + edge.left_normal() * (inward * 1e-3 * edge.length());
        if polygon.strictly_contains(&inner) {
            out.push(inner);
        }
    }
    out
}

#[inline]
fn orientation_of(polygon: &Polygon) -> f64 {
    if polygon.is_clockwise() {
        1.0
    } else {
        -1.0
    }
}

fn find_twin(pieces: &[Vec<Line>], cell: usize, piece: &Line) -> Option<SurfaceId> {
    pieces.iter().enumerate().find_map(|(j, other)| {
        if j == cell {
            return None;
        }
        other
            .iter()
            .position(|l| l.same_segment(piece))
            .map(|index| SurfaceId {
                cell: CellId(j),
                index,
            })
    })
}

fn make_sensor(id: SensorId, spec: &SensorSpec, cells: &[Cell]) -> Result<Sensor> {
    match spec {
        SensorSpec::Cells(ids) => {
            let mut ids = ids.clone();
            ids.sort();
            ids.dedup();
            let material = cells[ids[0].0].material();
            if ids.iter().any(|c| cells[c.0].material() != material) {
                return Err(Error::InvalidParam(format!(
                    "region sensor {} spans cells of different materials",
                    id.0
                )));
            }
            let area = ids.iter().map(|c| cells[c.0].area()).sum();
            Ok(Sensor::new(id, SensorLocation::Region(ids), material, area))
        }
        SensorSpec::Edge(p1, p2) => {
            let line = Line::new(*p1, *p2)?;
            for cell in cells {
                if let Some((index, surface)) = cell
                    .boundary()
                    .surfaces()
                    .iter()
                    .enumerate()
                    .find(|(_, s)| s.line().same_segment(&line))
                {
                    return Ok(Sensor::new(
                        id,
                        SensorLocation::Surface {
                            surface: SurfaceId {
                                cell: cell.id(),
                                index,
                            },
                            twin: surface.twin(),
                        },
                        cell.material(),
                        surface.length(),
                    ));
                }
            }
            Err(Error::InvalidParam(format!(
                "sensor {} edge ({}, {}) - ({}, {}) does not match a cell surface",
                id.0, p1.x, p1.y, p2.x, p2.y
            )))
        }
    }
}

/// A validated, immutable simulation domain.
#[derive(Debug, Clone)]
pub struct Model {
    t_eq: f64,
    mode: SimulationMode,
    cells: Vec<Cell>,
    materials: Vec<Material>,
    sensors: Vec<Sensor>,
    sources: Vec<SurfaceId>,
}

impl Model {
    #[inline]
    pub fn t_eq(&self) -> f64 {
        self.t_eq
    }

    #[inline]
    pub fn mode(&self) -> &SimulationMode {
        &self.mode
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[inline]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[inline]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Emitting surfaces with non-zero flux.
    #[inline]
    pub fn sources(&self) -> &[SurfaceId] {
        &self.sources
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell> {
        self.cells
            .get(id.0)
            .ok_or_else(|| Error::InvalidParam(format!("unknown cell id {}", id.0)))
    }

    pub fn material(&self, id: MaterialId) -> Result<&Material> {
        self.materials
            .get(id.0)
            .ok_or_else(|| Error::InvalidParam(format!("unknown material id {}", id.0)))
    }

    pub fn material_of(&self, cell: CellId) -> Result<&Material> {
        self.material(self.cell(cell)?.material())
    }

    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.cell(id.cell)?.surface(id.index).ok_or_else(|| {
            Error::InvalidParam(format!(
                "cell {} has no surface {}",
                id.cell.0, id.index
            ))
        })
    }

    /// Lowest-index cell containing `p`, edges included.
    pub fn locate(&self, p: &Point) -> Option<CellId> {
        self.cells.iter().find(|c| c.contains(p)).map(Cell::id)
    }

    /// Total domain area (nm^2).
    pub fn area(&self) -> f64 {
        self.cells.iter().map(Cell::area).sum()
    }

    /// A copy whose region sensors calibrate, and whose sensor cells scatter, with tables
    /// rebuilt at the given temperature (K). Interfaces, emission and initial energy keep the
    /// reference materials. Surface sensors are left unchanged.
    ///
    /// Errors:
    /// - `Error::InvalidParam` for an unknown sensor or a temperature a material rejects.
    pub fn retabulated(&self, temperatures: &[(SensorId, f64)]) -> Result<Model> {
        let mut out = self.clone();
        for &(id, t) in temperatures {
            let sensor = self
                .sensors
                .get(id.0)
                .ok_or_else(|| Error::InvalidParam(format!("unknown sensor id {}", id.0)))?;
            let SensorLocation::Region(cells) = sensor.location() else {
                continue;
            };
            let reference = self.cell(cells[0])?.material();
            let tables = self.material(reference)?.at_temperature(t)?;
            let tables_id = MaterialId(out.materials.len());
            out.materials.push(tables);
            for c in cells {
                out.cells[c.0].set_tables(tables_id);
            }
            out.sensors[id.0].set_material(tables_id);
        }
        Ok(out)
    }
}
