//! Collision detection and response for polygon bodies
//!
//! Broadphase is a conservative velocity-extended circle test. Narrowphase is
//! the swept SAT from `geom`. Response separates overlapping pairs and then
//! reflects the mover using the struck body's bounce model.

use glam::DVec2;

use super::body::{Body, BounceModel};
use super::geom::{SatResult, sat};
use crate::settings::Settings;

/// Velocity-extended proximity test
///
/// A pair is a candidate when the distance between centers is smaller than
/// both radii grown by this step's displacement.
pub fn broadphase(a: &Body, b: &Body) -> bool {
    let distance = a.current.distance(b.current);
    distance - (a.radius + a.displacement() + b.radius + b.displacement()) < 0.0
}

/// Swept SAT between `a` (the mover) and `b`
pub fn narrowphase(a: &Body, b: &Body) -> SatResult {
    sat(&a.shape, &b.shape, a.velocity - b.velocity)
}

/// Position corrections `(for a, for b)` that remove the current overlap
///
/// The correction is split evenly unless one side is immovable.
pub fn separation(a: &Body, b: &Body, mtv: DVec2) -> (DVec2, DVec2) {
    match (a.immovable(), b.immovable()) {
        (false, true) => (mtv, DVec2::ZERO),
        (true, false) => (DVec2::ZERO, -mtv),
        (true, true) => (DVec2::ZERO, DVec2::ZERO),
        (false, false) => (mtv * 0.5, -mtv * 0.5),
    }
}

/// Standard reflection: v' = v - 2(v·n)n
#[inline]
pub fn reflect_velocity(velocity: DVec2, normal: DVec2) -> DVec2 {
    velocity - 2.0 * velocity.dot(normal) * normal
}

/// Collision normal for `mover` striking `struck`
///
/// SAT picks whichever axis has the smallest overlap, which flickers between
/// edges near corners. Casting a ray from the mover's center through the
/// struck body's center gives a steadier edge; it is used when it faces the
/// incoming direction closely enough.
pub fn contact_normal(mover: &Body, struck: &Body, sat: &SatResult, settings: &Settings) -> DVec2 {
    if !settings.improved_normal {
        return sat.normal;
    }
    let Some(incoming) = mover.velocity.try_normalize() else {
        return sat.normal;
    };
    match struck
        .shape
        .raycast(mover.current, struck.current - mover.current)
    {
        Some((_, edge)) if -incoming.dot(edge.normal) >= settings.improved_normal_min_cos => {
            edge.normal
        }
        _ => sat.normal,
    }
}

/// Where along the struck body's width the mover hit: -1 left edge, +1 right edge
pub fn impact_offset(mover: &Body, struck: &Body) -> f64 {
    let half = struck.aabb.width() * 0.5;
    if half <= f64::EPSILON {
        return 0.0;
    }
    ((mover.current.x - struck.aabb.center().x) / half).clamp(-1.0, 1.0)
}

/// Momentum the struck body transfers to the mover under `model`
pub fn momentum(model: BounceModel, struck_velocity: DVec2, settings: &Settings) -> DVec2 {
    match model {
        BounceModel::Reflect => DVec2::ZERO,
        BounceModel::Steer => DVec2::new(struck_velocity.x * settings.steer_momentum, 0.0),
        BounceModel::Direct => struck_velocity / settings.direct_divisor,
    }
}

/// Outgoing velocity for a mover with `velocity` hitting a surface with `normal`
///
/// Speed is preserved except for the additive momentum term, so
/// `| |out| - |in| | <= |momentum(model, ..)|`.
pub fn bounce(
    model: BounceModel,
    velocity: DVec2,
    normal: DVec2,
    offset: f64,
    struck_velocity: DVec2,
    settings: &Settings,
) -> DVec2 {
    let reflected = reflect_velocity(velocity, normal);
    if model == BounceModel::Reflect {
        return reflected;
    }

    let speed = velocity.length();
    // Horizontal-ish tangent so a positive offset always bends to +x
    let tangent = normal.perp();
    let tangent = if tangent.x < 0.0 { -tangent } else { tangent };
    let deflection = tangent * offset * settings.steer_bias * speed;
    let direction = (reflected + deflection)
        .try_normalize()
        .unwrap_or(reflected.normalize_or_zero());

    direction * speed + momentum(model, struck_velocity, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::body::{BodyFlags, BodyKind};
    use crate::sim::geom::Polygon;

    fn body(kind: BodyKind, center: DVec2, size: DVec2, flags: BodyFlags) -> Body {
        Body::new(kind, Polygon::rect(center, size), flags)
    }

    #[test]
    fn test_reflect_velocity() {
        let reflected = reflect_velocity(DVec2::new(100.0, 0.0), DVec2::new(-1.0, 0.0));
        assert!((reflected.x + 100.0).abs() < 1e-9);
        assert!(reflected.y.abs() < 1e-9);
    }

    #[test]
    fn test_broadphase_uses_displacement() {
        let a = body(
            BodyKind::Puck,
            DVec2::new(0.0, 0.0),
            DVec2::splat(2.0),
            BodyFlags::DYNAMIC,
        );
        let b = body(
            BodyKind::Obstacle,
            DVec2::new(10.0, 0.0),
            DVec2::splat(2.0),
            BodyFlags::STATIC,
        );
        assert!(!broadphase(&a, &b));
        let a = a.with_velocity(DVec2::new(8.0, 0.0));
        assert!(broadphase(&a, &b));
    }

    #[test]
    fn test_separation_respects_immovable() {
        let puck = body(
            BodyKind::Puck,
            DVec2::ZERO,
            DVec2::splat(2.0),
            BodyFlags::DYNAMIC,
        );
        let wall = body(
            BodyKind::Obstacle,
            DVec2::ZERO,
            DVec2::splat(2.0),
            BodyFlags::STATIC,
        );
        let other = body(
            BodyKind::Puck,
            DVec2::ZERO,
            DVec2::splat(2.0),
            BodyFlags::DYNAMIC,
        );
        let mtv = DVec2::new(1.0, 0.0);
        assert_eq!(separation(&puck, &wall, mtv), (mtv, DVec2::ZERO));
        assert_eq!(
            separation(&puck, &other, mtv),
            (DVec2::new(0.5, 0.0), DVec2::new(-0.5, 0.0))
        );
    }

    #[test]
    fn test_reflect_preserves_speed() {
        let settings = Settings::default();
        let v = DVec2::new(3.0, -7.0);
        let n = DVec2::new(0.3, 1.0).normalize();
        let out = bounce(BounceModel::Reflect, v, n, 0.8, DVec2::new(5.0, 0.0), &settings);
        assert!((out.length() - v.length()).abs() < 1e-9);
    }

    #[test]
    fn test_steer_and_direct_change_speed_only_by_momentum() {
        let settings = Settings::default();
        let v = DVec2::new(2.0, -9.0);
        let struck_velocity = DVec2::new(4.0, 1.0);
        for model in [BounceModel::Steer, BounceModel::Direct] {
            for offset in [-1.0, -0.3, 0.0, 0.5, 1.0] {
                let out = bounce(model, v, DVec2::Y, offset, struck_velocity, &settings);
                let limit = momentum(model, struck_velocity, &settings).length();
                assert!((out.length() - v.length()).abs() <= limit + 1e-9);
                assert!(out.y > 0.0, "bounce must leave the surface");
            }
        }
    }

    #[test]
    fn test_steer_offset_bends_outgoing_direction() {
        let settings = Settings::default();
        let v = DVec2::new(0.0, -10.0);
        let left = bounce(BounceModel::Steer, v, DVec2::Y, -1.0, DVec2::ZERO, &settings);
        let right = bounce(BounceModel::Steer, v, DVec2::Y, 1.0, DVec2::ZERO, &settings);
        assert!(left.x < 0.0);
        assert!(right.x > 0.0);
        assert!((left.length() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_impact_offset_clamps() {
        let paddle = body(
            BodyKind::Paddle,
            DVec2::new(100.0, 30.0),
            DVec2::new(80.0, 12.0),
            BodyFlags::DYNAMIC,
        );
        let puck = body(
            BodyKind::Puck,
            DVec2::new(120.0, 50.0),
            DVec2::splat(14.0),
            BodyFlags::DYNAMIC,
        );
        assert!((impact_offset(&puck, &paddle) - 0.5).abs() < 1e-9);
        let far = body(
            BodyKind::Puck,
            DVec2::new(300.0, 50.0),
            DVec2::splat(14.0),
            BodyFlags::DYNAMIC,
        );
        assert_eq!(impact_offset(&far, &paddle), 1.0);
    }

    #[test]
    fn test_contact_normal_prefers_ray_cast_edge() {
        let settings = Settings::default();
        let wall = body(
            BodyKind::Obstacle,
            DVec2::new(0.0, 0.0),
            DVec2::new(100.0, 20.0),
            BodyFlags::STATIC,
        );
        let puck = body(
            BodyKind::Puck,
            DVec2::new(0.0, 30.0),
            DVec2::splat(10.0),
            BodyFlags::DYNAMIC,
        )
        .with_velocity(DVec2::new(0.0, -20.0));
        let mut result = narrowphase(&puck, &wall);
        // Pretend SAT picked a side axis
        result.normal = DVec2::X;
        let normal = contact_normal(&puck, &wall, &result, &settings);
        assert!((normal - DVec2::Y).length() < 1e-9);
    }
}
