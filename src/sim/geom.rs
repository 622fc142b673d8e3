//! Polygon geometry for bodies
//!
//! Convex polygons in world space, their bounding boxes, and the
//! separating-axis test used by the narrowphase. The SAT variant here also
//! sweeps the first polygon by a relative velocity so it can report whether
//! the pair will be overlapping after one step.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec2,
    pub max: DVec2,
}

impl Aabb {
    pub fn from_points(points: &[DVec2]) -> Self {
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn center(&self) -> DVec2 {
        (self.min + self.max) * 0.5
    }

    /// Strict overlap (touching edges do not count)
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }
}

/// An edge of a polygon with its unit normal pointing away from the polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: DVec2,
    pub b: DVec2,
    pub normal: DVec2,
}

/// A closed convex polygon (last vertex connects back to the first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<DVec2>,
}

impl Polygon {
    /// Panics on fewer than three vertices: a degenerate shape is a bug in the caller
    pub fn new(vertices: Vec<DVec2>) -> Self {
        assert!(
            vertices.len() >= 3,
            "polygon needs at least 3 vertices, got {}",
            vertices.len()
        );
        Self { vertices }
    }

    /// Axis-aligned rectangle, counter-clockwise
    pub fn rect(center: DVec2, size: DVec2) -> Self {
        let h = size * 0.5;
        Self::new(vec![
            DVec2::new(center.x - h.x, center.y - h.y),
            DVec2::new(center.x + h.x, center.y - h.y),
            DVec2::new(center.x + h.x, center.y + h.y),
            DVec2::new(center.x - h.x, center.y + h.y),
        ])
    }

    pub fn vertices(&self) -> &[DVec2] {
        &self.vertices
    }

    /// Area-weighted centroid; falls back to the vertex mean for zero-area shapes
    pub fn centroid(&self) -> DVec2 {
        let mut area = 0.0;
        let mut acc = DVec2::ZERO;
        let n = self.vertices.len();
        for i in 0..n {
            let p = self.vertices[i];
            let q = self.vertices[(i + 1) % n];
            let cross = p.perp_dot(q);
            area += cross;
            acc += (p + q) * cross;
        }
        if area.abs() < 1e-12 {
            let sum: DVec2 = self.vertices.iter().copied().sum();
            return sum / n as f64;
        }
        acc / (3.0 * area)
    }

    pub fn translate(&mut self, delta: DVec2) {
        for v in &mut self.vertices {
            *v += delta;
        }
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&self.vertices)
    }

    /// Largest distance from `center` to a vertex
    pub fn radius_from(&self, center: DVec2) -> f64 {
        self.vertices
            .iter()
            .map(|v| v.distance(center))
            .fold(0.0, f64::max)
    }

    /// Projection interval `(min, max)` onto `axis`
    pub fn project(&self, axis: DVec2) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in &self.vertices {
            let d = v.dot(axis);
            min = min.min(d);
            max = max.max(d);
        }
        (min, max)
    }

    /// Edges with outward unit normals; zero-length edges are skipped
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        let centroid = self.centroid();
        let n = self.vertices.len();
        (0..n).filter_map(move |i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let normal = (b - a).perp().try_normalize()?;
            // Orientation-agnostic: flip toward the outside
            let normal = if normal.dot((a + b) * 0.5 - centroid) < 0.0 {
                -normal
            } else {
                normal
            };
            Some(Edge { a, b, normal })
        })
    }

    /// Point containment (boundary counts as inside)
    pub fn contains_point(&self, point: DVec2) -> bool {
        self.edges()
            .all(|edge| (point - edge.a).dot(edge.normal) <= 1e-9)
    }

    /// First edge crossed by a ray, as `(distance, edge)`
    pub fn raycast(&self, origin: DVec2, dir: DVec2) -> Option<(f64, Edge)> {
        let dir = dir.try_normalize()?;
        let mut best: Option<(f64, Edge)> = None;
        for edge in self.edges() {
            let seg = edge.b - edge.a;
            let denom = dir.perp_dot(seg);
            if denom.abs() < 1e-12 {
                continue;
            }
            let rel = edge.a - origin;
            let t = rel.perp_dot(seg) / denom;
            let u = rel.perp_dot(dir) / denom;
            if t >= 0.0 && (0.0..=1.0).contains(&u) && best.is_none_or(|(bt, _)| t < bt) {
                best = Some((t, edge));
            }
        }
        best
    }
}

/// Distance between two projection intervals (negative when overlapping)
#[inline]
pub fn interval_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    if a.0 < b.0 { b.0 - a.1 } else { a.0 - b.1 }
}

/// Result of a swept separating-axis test
#[derive(Debug, Clone, PartialEq)]
pub struct SatResult {
    /// Polygons overlap right now
    pub intersect: bool,
    /// Polygons overlap after `a` moves by the relative velocity
    pub will_intersect: bool,
    /// Translation that pushes `a` out of `b` (zero unless `intersect`)
    pub mtv: DVec2,
    /// Unit collision normal pointing from `b` toward `a`
    pub normal: DVec2,
    /// Edge of `b` facing the collision normal
    pub edge: Option<Edge>,
}

/// Separating-axis test between `a` and `b`, sweeping `a` by `rel_vel`
pub fn sat(a: &Polygon, b: &Polygon, rel_vel: DVec2) -> SatResult {
    let mut intersect = true;
    let mut will_intersect = true;
    let mut min_now = f64::INFINITY;
    let mut axis_now = DVec2::ZERO;
    let mut min_after = f64::INFINITY;
    let mut axis_after = DVec2::ZERO;

    for edge in a.edges().chain(b.edges()) {
        let axis = edge.normal;
        let pa = a.project(axis);
        let pb = b.project(axis);

        let now = interval_distance(pa, pb);
        if now > 0.0 {
            intersect = false;
        } else if -now < min_now {
            min_now = -now;
            axis_now = axis;
        }

        let vp = axis.dot(rel_vel);
        let swept = if vp < 0.0 {
            (pa.0 + vp, pa.1)
        } else {
            (pa.0, pa.1 + vp)
        };
        let after = interval_distance(swept, pb);
        if after > 0.0 {
            will_intersect = false;
        }

        if !intersect && !will_intersect {
            break;
        }

        if after.abs() < min_after {
            min_after = after.abs();
            axis_after = axis;
        }
    }

    let offset = a.centroid() - b.centroid();
    let orient = |axis: DVec2| if offset.dot(axis) < 0.0 { -axis } else { axis };
    let normal = orient(axis_after);
    let edge = b
        .edges()
        .max_by(|e1, e2| e1.normal.dot(normal).total_cmp(&e2.normal.dot(normal)));

    SatResult {
        intersect,
        will_intersect,
        mtv: if intersect {
            orient(axis_now) * min_now
        } else {
            DVec2::ZERO
        },
        normal,
        edge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Polygon {
        Polygon::rect(DVec2::new(x, y), DVec2::splat(size))
    }

    #[test]
    #[should_panic]
    fn test_degenerate_polygon_panics() {
        Polygon::new(vec![DVec2::ZERO, DVec2::X]);
    }

    #[test]
    fn test_centroid_of_rect() {
        let rect = Polygon::rect(DVec2::new(10.0, -4.0), DVec2::new(6.0, 2.0));
        assert!(rect.centroid().distance(DVec2::new(10.0, -4.0)) < 1e-9);
    }

    #[test]
    fn test_centroid_of_triangle() {
        let tri = Polygon::new(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(3.0, 0.0),
            DVec2::new(0.0, 3.0),
        ]);
        assert!(tri.centroid().distance(DVec2::new(1.0, 1.0)) < 1e-9);
    }

    #[test]
    fn test_edges_point_outward_for_clockwise_winding() {
        let cw = Polygon::new(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(0.0, 2.0),
            DVec2::new(2.0, 2.0),
            DVec2::new(2.0, 0.0),
        ]);
        let center = cw.centroid();
        for edge in cw.edges() {
            assert!(edge.normal.dot((edge.a + edge.b) * 0.5 - center) > 0.0);
        }
    }

    #[test]
    fn test_contains_point() {
        let sq = square(0.0, 0.0, 2.0);
        assert!(sq.contains_point(DVec2::ZERO));
        assert!(sq.contains_point(DVec2::new(1.0, 0.0)));
        assert!(!sq.contains_point(DVec2::new(1.5, 0.0)));
    }

    #[test]
    fn test_sat_separated_pair() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(10.0, 0.0, 2.0);
        let result = sat(&a, &b, DVec2::ZERO);
        assert!(!result.intersect);
        assert!(!result.will_intersect);
        assert_eq!(result.mtv, DVec2::ZERO);
    }

    #[test]
    fn test_sat_overlap_mtv_pushes_a_out() {
        let a = square(1.5, 0.0, 2.0);
        let b = square(0.0, 0.0, 2.0);
        let result = sat(&a, &b, DVec2::ZERO);
        assert!(result.intersect);
        assert!((result.mtv - DVec2::new(0.5, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_sat_sweep_detects_next_step_hit() {
        // 15 units apart, closing at 20 per step
        let a = square(50.0, 40.0, 10.0);
        let b = Polygon::rect(DVec2::new(50.0, 10.0), DVec2::new(100.0, 20.0));
        let result = sat(&a, &b, DVec2::new(0.0, -20.0));
        assert!(!result.intersect);
        assert!(result.will_intersect);
        assert!((result.normal - DVec2::Y).length() < 1e-9);
        let edge = result.edge.expect("edge of the struck body");
        assert!((edge.normal - DVec2::Y).length() < 1e-9);
    }

    #[test]
    fn test_raycast_hits_nearest_edge() {
        let sq = square(0.0, 0.0, 2.0);
        let (t, edge) = sq.raycast(DVec2::new(0.0, 5.0), -DVec2::Y).unwrap();
        assert!((t - 4.0).abs() < 1e-9);
        assert!((edge.normal - DVec2::Y).length() < 1e-9);
        assert!(sq.raycast(DVec2::new(5.0, 5.0), DVec2::Y).is_none());
    }

    #[test]
    fn test_aabb_overlap_is_strict() {
        let a = square(0.0, 0.0, 2.0).aabb();
        let b = square(2.0, 0.0, 2.0).aabb();
        assert!(!a.overlaps(&b));
        let c = square(1.9, 0.0, 2.0).aabb();
        assert!(a.overlaps(&c));
    }
}
