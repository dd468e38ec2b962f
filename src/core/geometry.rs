//! Planar geometry primitives: points, vectors, segments, triangles and simple polygons.
//!
//! All predicates share one absolute tolerance, [`GEO_EPS`]. Two points closer than `GEO_EPS`
//! are the same point, and a point within `GEO_EPS` of a line lies on it.

use crate::error::{Error, Result};
use rand::Rng;
use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

/// Absolute geometric tolerance (nm).
pub const GEO_EPS: f64 = f64::EPSILON * 1e9;

/// A location in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        (*other - *self).norm()
    }

    /// True when the two points coincide within [`GEO_EPS`].
    #[inline]
    pub fn approx_eq(&self, other: &Point) -> bool {
        self.distance(other) <= GEO_EPS
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A displacement or direction in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    pub dx: f64,
    pub dy: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { dx: 0.0, dy: 0.0 };

    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Unit vector at angle `theta` (radians) from the +x axis.
    #[inline]
    pub fn from_angle(theta: f64) -> Self {
        Self::new(theta.cos(), theta.sin())
    }

    #[inline]
    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.dx * other.dx + self.dy * other.dy
    }

    /// z-component of the 3D cross product.
    #[inline]
    pub fn cross(&self, other: &Vector2D) -> f64 {
        self.dx * other.dy - self.dy * other.dx
    }

    #[inline]
    pub fn norm(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    /// Counter-clockwise perpendicular.
    #[inline]
    pub fn perp(&self) -> Vector2D {
        Vector2D::new(-self.dy, self.dx)
    }

    /// Returns the unit vector along `self`.
    ///
    /// Errors:
    /// - `Error::Physics` if the vector has zero (or non-finite) length.
    pub fn normalized(&self) -> Result<Vector2D> {
        let n = self.norm();
        if !n.is_finite() || n <= f64::EPSILON {
            return Err(Error::Physics(format!(
                "cannot normalize direction of length {n}"
            )));
        }
        Ok(Vector2D::new(self.dx / n, self.dy / n))
    }

    /// Mirror image of `self` about a line with unit normal `normal`.
    #[inline]
    pub fn mirror(&self, normal: &Vector2D) -> Vector2D {
        *self - *normal * (2.0 * self.dot(normal))
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }
}

impl Sub for Point {
    type Output = Vector2D;
    fn sub(self, rhs: Point) -> Vector2D {
        Vector2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Add<Vector2D> for Point {
    type Output = Point;
    fn add(self, rhs: Vector2D) -> Point {
        Point::new(self.x + rhs.dx, self.y + rhs.dy)
    }
}

impl Add for Vector2D {
    type Output = Vector2D;
    fn add(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.dx + rhs.dx, self.dy + rhs.dy)
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;
    fn sub(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.dx - rhs.dx, self.dy - rhs.dy)
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;
    fn mul(self, rhs: f64) -> Vector2D {
        Vector2D::new(self.dx * rhs, self.dy * rhs)
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;
    fn neg(self) -> Vector2D {
        Vector2D::new(-self.dx, -self.dy)
    }
}

/// Uniformly distributed unit direction.
pub fn random_direction<R: Rng + ?Sized>(rng: &mut R) -> Vector2D {
    Vector2D::from_angle(2.0 * PI * rng.random::<f64>())
}

/// Classification of a pair of segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentIntersection {
    /// The segments share no point.
    Disjoint,
    /// The segments cross at a single point interior to both.
    Proper(Point),
    /// The segments meet at a point that is an endpoint of at least one of them.
    Touching(Point),
    /// The segments are collinear and share a sub-segment of positive length.
    Overlapping,
}

impl SegmentIntersection {
    /// True unless the segments are disjoint.
    pub fn intersects(&self) -> bool {
        !matches!(self, SegmentIntersection::Disjoint)
    }
}

/// Where a ray meets a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Signed distance along the (unit) ray direction.
    pub distance: f64,
    /// Fractional position along the segment, in `[0, 1]` up to tolerance.
    pub param: f64,
}

/// An oriented segment from `p1` to `p2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    p1: Point,
    p2: Point,
}

impl Line {
    /// Create a segment.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if a coordinate is NaN/inf.
    /// - `Error::DegenerateShape` if the endpoints coincide.
    pub fn new(p1: Point, p2: Point) -> Result<Self> {
        if !p1.is_finite() || !p2.is_finite() {
            return Err(Error::InvalidParam("line endpoints must be finite".into()));
        }
        if p1.approx_eq(&p2) {
            return Err(Error::DegenerateShape(format!(
                "line from ({}, {}) to ({}, {}) has zero length",
                p1.x, p1.y, p2.x, p2.y
            )));
        }
        Ok(Self { p1, p2 })
    }

    #[inline]
    pub fn p1(&self) -> Point {
        self.p1
    }

    #[inline]
    pub fn p2(&self) -> Point {
        self.p2
    }

    #[inline]
    pub fn vector(&self) -> Vector2D {
        self.p2 - self.p1
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.vector().norm()
    }

    /// Unit vector from `p1` to `p2`.
    #[inline]
    pub fn direction(&self) -> Vector2D {
        self.vector() * (1.0 / self.length())
    }

    /// Unit normal on the left of the travel direction.
    #[inline]
    pub fn left_normal(&self) -> Vector2D {
        self.direction().perp()
    }

    #[inline]
    pub fn point_at(&self, t: f64) -> Point {
        self.p1 + self.vector() * t
    }

    pub fn midpoint(&self) -> Point {
        self.point_at(0.5)
    }

    /// Same segment with endpoints swapped.
    pub fn reversed(&self) -> Line {
        Line {
            p1: self.p2,
            p2: self.p1,
        }
    }

    /// True when both segments have the same endpoints, in either order.
    pub fn same_segment(&self, other: &Line) -> bool {
        (self.p1.approx_eq(&other.p1) && self.p2.approx_eq(&other.p2))
            || (self.p1.approx_eq(&other.p2) && self.p2.approx_eq(&other.p1))
    }

    /// Signed perpendicular distance from the infinite line to `p` (positive on the left).
    #[inline]
    pub fn side_distance(&self, p: &Point) -> f64 {
        self.vector().cross(&(*p - self.p1)) / self.length()
    }

    /// Fraction of the way along the segment of the projection of `p`.
    #[inline]
    pub fn project(&self, p: &Point) -> f64 {
        let v = self.vector();
        v.dot(&(*p - self.p1)) / v.dot(&v)
    }

    /// True when `p` lies on the segment within tolerance.
    pub fn contains(&self, p: &Point) -> bool {
        if self.side_distance(p).abs() > GEO_EPS {
            return false;
        }
        let slack = GEO_EPS / self.length();
        let t = self.project(p);
        (-slack..=1.0 + slack).contains(&t)
    }

    /// Classify how `self` and `other` meet.
    ///
    /// The result does not depend on argument order: every decision below is taken on
    /// quantities that are symmetric under swapping the two segments.
    pub fn intersect(&self, other: &Line) -> SegmentIntersection {
        let (a, b, c, d) = (self.p1, self.p2, other.p1, other.p2);
        let o1 = side(self, &c);
        let o2 = side(self, &d);
        let o3 = side(other, &a);
        let o4 = side(other, &b);

        if o1 == 0 && o2 == 0 && o3 == 0 && o4 == 0 {
            return self.collinear_overlap(other);
        }

        if o1 != 0 && o2 != 0 && o1 != o2 && o3 != 0 && o4 != 0 && o3 != o4 {
            let r = self.vector();
            let s = other.vector();
            let t = (c - a).cross(&s) / r.cross(&s);
            return SegmentIntersection::Proper(self.point_at(t));
        }

        if o1 == 0 && self.contains(&c) {
            return SegmentIntersection::Touching(c);
        }
        if o2 == 0 && self.contains(&d) {
            return SegmentIntersection::Touching(d);
        }
        if o3 == 0 && other.contains(&a) {
            return SegmentIntersection::Touching(a);
        }
        if o4 == 0 && other.contains(&b) {
            return SegmentIntersection::Touching(b);
        }
        SegmentIntersection::Disjoint
    }

    fn collinear_overlap(&self, other: &Line) -> SegmentIntersection {
        let len = self.length();
        let tc = self.project(&other.p1) * len;
        let td = self.project(&other.p2) * len;
        let lo = tc.min(td).max(0.0);
        let hi = tc.max(td).min(len);
        let overlap = hi - lo;
        if overlap > GEO_EPS {
            SegmentIntersection::Overlapping
        } else if overlap >= -GEO_EPS {
            SegmentIntersection::Touching(self.point_at(lo / len))
        } else {
            SegmentIntersection::Disjoint
        }
    }

    /// Intersect the ray `origin + s * dir` (unit `dir`) with this segment.
    ///
    /// Returns `None` for rays parallel to the segment or passing beside it. The distance
    /// may be negative; callers decide which hits lie ahead.
    pub fn ray_hit(&self, origin: &Point, dir: &Vector2D) -> Option<RayHit> {
        let s = self.vector();
        let denom = dir.cross(&s);
        if denom.abs() <= 1e-12 * s.norm() {
            return None;
        }
        let w = self.p1 - *origin;
        let distance = w.cross(&s) / denom;
        let param = w.cross(dir) / denom;
        let slack = GEO_EPS / s.norm();
        if param < -slack || param > 1.0 + slack {
            return None;
        }
        Some(RayHit {
            distance,
            param: param.clamp(0.0, 1.0),
        })
    }
}

/// Orientation of `p` relative to `line`: -1 (right), 0 (on the line), 1 (left).
#[inline]
fn side(line: &Line, p: &Point) -> i8 {
    let d = line.side_distance(p);
    if d.abs() <= GEO_EPS {
        0
    } else if d > 0.0 {
        1
    } else {
        -1
    }
}

/// Signed area of a closed vertex loop; positive when counter-clockwise.
pub fn signed_area(vertices: &[Point]) -> f64 {
    let n = vertices.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

/// Three non-collinear points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    points: [Point; 3],
}

impl Triangle {
    /// Errors:
    /// - `Error::InvalidParam` if a coordinate is NaN/inf.
    /// - `Error::DegenerateShape` if the points are collinear.
    pub fn new(p1: Point, p2: Point, p3: Point) -> Result<Self> {
        let points = [p1, p2, p3];
        if !points.iter().all(Point::is_finite) {
            return Err(Error::InvalidParam("triangle vertices must be finite".into()));
        }
        let tri = Self { points };
        if tri.area() <= GEO_EPS {
            return Err(Error::DegenerateShape(format!(
                "triangle ({}, {}), ({}, {}), ({}, {}) has zero area",
                p1.x, p1.y, p2.x, p2.y, p3.x, p3.y
            )));
        }
        Ok(tri)
    }

    #[inline]
    pub fn points(&self) -> [Point; 3] {
        self.points
    }

    pub fn signed_area(&self) -> f64 {
        signed_area(&self.points)
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn is_clockwise(&self) -> bool {
        self.signed_area() < 0.0
    }

    /// True when `p` is inside or on the boundary.
    pub fn contains(&self, p: &Point) -> bool {
        let [a, b, c] = self.points;
        let d1 = (b - a).cross(&(*p - a));
        let d2 = (c - b).cross(&(*p - b));
        let d3 = (a - c).cross(&(*p - c));
        let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
        let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
        !(has_neg && has_pos)
    }

    /// Uniform sample over the triangle's area.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let [a, b, c] = self.points;
        let mut r1: f64 = rng.random();
        let mut r2: f64 = rng.random();
        if r1 + r2 > 1.0 {
            r1 = 1.0 - r1;
            r2 = 1.0 - r2;
        }
        a + (b - a) * r1 + (c - a) * r2
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    /// Smallest box containing `points`; `None` for an empty input.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let (mut min, mut max) = (first, first);
        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Self { min, max })
    }

    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        Point::new(
            self.min.x + (self.max.x - self.min.x) * rng.random::<f64>(),
            self.min.y + (self.max.y - self.min.y) * rng.random::<f64>(),
        )
    }
}

/// A simple polygon given by its vertex loop (either orientation).
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point>,
    bbox: BoundingBox,
}

impl Polygon {
    /// Errors:
    /// - `Error::InvalidParam` for fewer than three vertices or non-finite coordinates.
    /// - `Error::DegenerateShape` if the enclosed area is zero.
    pub fn new(vertices: Vec<Point>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidParam(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if !vertices.iter().all(Point::is_finite) {
            return Err(Error::InvalidParam("polygon vertices must be finite".into()));
        }
        if signed_area(&vertices).abs() <= GEO_EPS {
            return Err(Error::DegenerateShape("polygon has zero area".into()));
        }
        let bbox = BoundingBox::from_points(&vertices)
            .ok_or_else(|| Error::InvalidParam("polygon has no vertices".into()))?;
        Ok(Self { vertices, bbox })
    }

    #[inline]
    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    #[inline]
    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.vertices).abs()
    }

    pub fn is_clockwise(&self) -> bool {
        signed_area(&self.vertices) < 0.0
    }

    /// Even-odd containment test; points on an edge count as inside.
    pub fn contains(&self, p: &Point) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            if let Ok(edge) = Line::new(a, b) {
                if edge.contains(p) {
                    return true;
                }
            }
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// True when `p` is inside and farther than [`GEO_EPS`] from every edge.
    pub fn strictly_contains(&self, p: &Point) -> bool {
        let n = self.vertices.len();
        for i in 0..n {
            if let Ok(edge) = Line::new(self.vertices[i], self.vertices[(i + 1) % n]) {
                if edge.contains(p) {
                    return false;
                }
            }
        }
        self.contains(p)
    }
}
