use crate::core::geometry::{Point, Polygon, SegmentIntersection, GEO_EPS};
use crate::core::surface::Surface;
use crate::error::{Error, Result};

/// Closed, validated loop of surfaces bounding one cell.
///
/// Construction checks every pair of segments. Adjacent segments may only touch at their
/// shared vertex; any coincident sub-segment is an overlap fault and any other contact is an
/// intersection fault. The outward-normal sign of every surface is set from the loop
/// orientation.
#[derive(Debug, Clone)]
pub struct CompositeSurface {
    surfaces: Vec<Surface>,
    polygon: Polygon,
}

impl CompositeSurface {
    /// Errors:
    /// - `Error::InvalidParam` for fewer than three surfaces, surfaces owned by different cells,
    ///   or a loop that is not closed.
    /// - `Error::Overlap` if two segments share more than an endpoint.
    /// - `Error::Intersection` if two segments cross or touch away from a shared vertex.
    /// - `Error::DegenerateShape` if the loop encloses no area.
    pub fn new(mut surfaces: Vec<Surface>) -> Result<Self> {
        let n = surfaces.len();
        if n < 3 {
            return Err(Error::InvalidParam(format!(
                "a boundary loop needs at least 3 surfaces, got {n}"
            )));
        }
        let cell = surfaces[0].cell();
        if surfaces.iter().any(|s| s.cell() != cell) {
            return Err(Error::InvalidParam(
                "all surfaces of a boundary loop must belong to one cell".into(),
            ));
        }
        for i in 0..n {
            let end = surfaces[i].line().p2();
            let next = surfaces[(i + 1) % n].line().p1();
            if !end.approx_eq(&next) {
                return Err(Error::InvalidParam(format!(
                    "boundary loop of cell {} is open between surfaces {i} and {}: ({}, {}) vs ({}, {})",
                    cell.0,
                    (i + 1) % n,
                    end.x,
                    end.y,
                    next.x,
                    next.y
                )));
            }
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (surfaces[i].line(), surfaces[j].line());
                let shared: Option<Point> = if j == i + 1 {
                    Some(a.p2())
                } else if i == 0 && j == n - 1 {
                    Some(a.p1())
                } else {
                    None
                };
                match a.intersect(b) {
                    SegmentIntersection::Disjoint => {}
                    SegmentIntersection::Overlapping => {
                        return Err(Error::Overlap(format!(
                            "surfaces {i} and {j} of cell {} share a sub-segment",
                            cell.0
                        )));
                    }
                    SegmentIntersection::Proper(p) => {
                        return Err(Error::Intersection(format!(
                            "surfaces {i} and {j} of cell {} cross at ({}, {})",
                            cell.0, p.x, p.y
                        )));
                    }
                    SegmentIntersection::Touching(p) => {
                        if !shared.is_some_and(|v| v.approx_eq(&p)) {
                            return Err(Error::Intersection(format!(
                                "surfaces {i} and {j} of cell {} touch at ({}, {})",
                                cell.0, p.x, p.y
                            )));
                        }
                    }
                }
            }
        }

        let polygon = Polygon::new(surfaces.iter().map(|s| s.line().p1()).collect())?;
        if polygon.area() <= GEO_EPS {
            return Err(Error::DegenerateShape(format!(
                "boundary loop of cell {} encloses no area",
                cell.0
            )));
        }
        // Counter-clockwise loops keep their interior on the left of each segment.
        let sign = if polygon.is_clockwise() { 1.0 } else { -1.0 };
        for s in &mut surfaces {
            s.set_norm_sign(sign);
        }
        Ok(Self { surfaces, polygon })
    }

    #[inline]
    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    #[inline]
    pub fn surface(&self, index: usize) -> Option<&Surface> {
        self.surfaces.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// The enclosed polygon.
    #[inline]
    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }
}
