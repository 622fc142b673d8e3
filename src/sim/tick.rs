//! Fixed timestep simulation tick
//!
//! Advances a [`World`] by exactly one step. Everything here is deterministic:
//! bodies are visited in key order and randomness only comes from the world's
//! seeded RNG.

use glam::DVec2;

use super::arena::{Arena, Key};
use super::body::{Body, BodyFlags, BodyKind, BounceModel, ExtraKind};
use super::collision::{
    bounce, broadphase, contact_normal, impact_offset, narrowphase, separation,
};
use super::geom::SatResult;
use super::state::{GameAction, GameEvent, GamePhase, World};
use crate::net::input::Input;

/// Whether presentation events survive the step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    #[default]
    Normal,
    /// Replay extrapolation: same physics, events discarded
    Extrapolate,
}

/// Advance the world by one fixed timestep
pub fn step(world: &mut World, dt: f64) {
    step_with(world, dt, StepMode::Normal);
}

pub fn step_with(world: &mut World, dt: f64, mode: StepMode) {
    let events_before = world.events.len();

    if world.phase != GamePhase::Paused {
        run_actions(world);
    }

    let mut goal = None;
    if world.phase.runs_physics() {
        apply_forces(world);
        collide(world);
        sweep(world);
        goal = bounds(world);
        integrate(world, dt);
    }
    decay_smoothing(world);

    if let Some((loser, x)) = goal {
        score_goal(world, loser, x);
    }

    if mode == StepMode::Extrapolate {
        world.events.truncate(events_before);
    }
    world.frame += 1;
}

/// Apply one recorded input to the world
///
/// Ping and Pong are transport-level probes and are ignored here.
pub fn apply_input(world: &mut World, input: &Input) {
    match *input {
        Input::Move { player, dx } => {
            let width = world.settings.arena_width;
            let Some(key) = world.paddle_of(player) else {
                return;
            };
            let Ok(paddle) = world.paddles.get_mut(key) else {
                return;
            };
            let half = paddle.aabb.width() * 0.5;
            let base = paddle.seek.map_or(paddle.current, |s| s.target);
            // A paddle wider than the field stays centered
            let x = (base.x + dx).clamp(half.min(width * 0.5), (width - half).max(width * 0.5));
            paddle.seek_to(DVec2::new(x, base.y), 1);
        }
        Input::Died { player, x } => {
            if !world.phase.runs_physics() {
                return;
            }
            if let Some(key) = world.primary_puck() {
                world.remove(key);
            }
            score_goal(world, player, x);
        }
        Input::Hit { x, velocity } => {
            if let Some(puck) = primary_puck_mut(world) {
                puck.move_to(DVec2::new(x, puck.current.y));
                let vy = puck.velocity.y;
                puck.set_velocity(DVec2::new(velocity, vy));
            }
        }
        Input::Miss { x } => {
            if let Some(puck) = primary_puck_mut(world) {
                puck.move_to(DVec2::new(x, puck.current.y));
            }
        }
        Input::Ping { .. } | Input::Pong { .. } => {}
    }
}

fn primary_puck_mut(world: &mut World) -> Option<&mut Body> {
    let key = world.primary_puck()?;
    world.pucks.get_mut(key).ok()
}

fn sorted_keys(arena: &Arena<Body>) -> Vec<Key> {
    let mut keys = arena.keys().to_vec();
    keys.sort_unstable();
    keys
}

fn score_goal(world: &mut World, loser: u8, x: f64) {
    world.events.push(GameEvent::Goal { loser, x });
    world.concede(loser);
}

fn run_actions(world: &mut World) {
    for action in world.actions.due(world.frame) {
        match action {
            GameAction::Serve => {
                if world.phase == GamePhase::Starting
                    && let Err(err) = world.transition(GamePhase::Playing)
                {
                    log::warn!("serve: {}", err);
                }
                if world.phase.runs_physics() {
                    world.serve();
                }
            }
            GameAction::BeginRound => world.begin_round(),
            GameAction::SpawnExtra => {
                if world.phase == GamePhase::Playing {
                    world.spawn_extra();
                }
            }
            GameAction::Expire(key) => {
                if world.remove(key).is_some() {
                    world.events.push(GameEvent::Destroyed { key });
                }
            }
        }
    }
}

/// Force emitters pull (or push) pucks inside their reach, fading with distance
fn apply_forces(world: &mut World) {
    let emitters: Vec<(DVec2, f64, f64)> = sorted_keys(&world.forces)
        .into_iter()
        .filter_map(|key| world.forces.get(key).ok())
        .filter(|force| !force.removed)
        .map(|force| (force.current, force.data("strength"), force.data("reach")))
        .collect();
    if emitters.is_empty() {
        return;
    }

    for (_, puck) in world.pucks.iter_mut() {
        if puck.removed {
            continue;
        }
        for &(center, strength, reach) in &emitters {
            let toward = center - puck.current;
            let distance = toward.length();
            if distance < reach && distance > f64::EPSILON {
                puck.acceleration += toward / distance * strength * (1.0 - distance / reach);
            }
        }
    }
}

/// Ghost bodies pass through anything else that can move
fn ghost_skips(a: &Body, b: &Body) -> bool {
    let ghost = a.flags.contains(BodyFlags::GHOST) || b.flags.contains(BodyFlags::GHOST);
    let movable = |body: &Body| body.flags.is_dynamic() && !body.immovable();
    ghost && movable(a) && movable(b)
}

fn collide(world: &mut World) {
    let pucks = sorted_keys(&world.pucks);

    let mut others: Vec<Key> = Vec::new();
    for kind in [
        BodyKind::Paddle,
        BodyKind::Obstacle,
        BodyKind::Extra(ExtraKind::Shield),
        BodyKind::Shield,
    ] {
        others.extend(world.store(kind).keys());
    }
    others.sort_unstable();

    for (i, &puck_key) in pucks.iter().enumerate() {
        let candidates = pucks[i + 1..].iter().chain(others.iter());
        for &other_key in candidates {
            let Ok(puck) = world.pucks.get(puck_key) else {
                break;
            };
            let Ok(other) = world.body(other_key) else {
                continue;
            };
            if puck.removed || other.removed || ghost_skips(puck, other) {
                continue;
            }
            if !broadphase(puck, other) {
                continue;
            }
            let result = narrowphase(puck, other);
            if !result.will_intersect {
                continue;
            }
            let kinds = (puck.kind, other.kind);
            resolve(world, puck_key, other_key, kinds, &result);
        }
    }
}

fn resolve(
    world: &mut World,
    puck: Key,
    other: Key,
    kinds: (BodyKind, BodyKind),
    sat: &SatResult,
) {
    match kinds {
        (BodyKind::Puck, BodyKind::Puck) => puck_vs_puck(world, puck, other, sat),
        (BodyKind::Puck, BodyKind::Paddle) => puck_vs_surface(world, puck, other, sat, true),
        (BodyKind::Puck, BodyKind::Obstacle | BodyKind::Shield) => {
            puck_vs_surface(world, puck, other, sat, false)
        }
        (BodyKind::Puck, BodyKind::Extra(extra)) => collect(world, puck, other, extra),
        // Emitters never collide
        (BodyKind::Puck, BodyKind::Force) => {}
        (a, b) => log::warn!("no resolution for {:?} vs {:?}", a, b),
    }
}

/// Push an overlapping pair apart along the MTV
fn separate(world: &mut World, a: Key, b: Key, sat: &SatResult) {
    if !sat.intersect {
        return;
    }
    let (Ok(body_a), Ok(body_b)) = (world.body(a), world.body(b)) else {
        return;
    };
    let (move_a, move_b) = separation(body_a, body_b, sat.mtv);
    if move_a != DVec2::ZERO
        && let Ok(body) = world.body_mut(a)
    {
        body.translate(move_a);
    }
    if move_b != DVec2::ZERO
        && let Ok(body) = world.body_mut(b)
    {
        body.translate(move_b);
    }
}

fn record_bounce(world: &mut World, puck: Key, other: Key, kind: BodyKind) {
    *world.bounces.entry(puck).or_insert(0) += 1;
    world.events.push(GameEvent::Bounce { puck, other, kind });
}

fn puck_vs_surface(world: &mut World, puck: Key, other: Key, sat: &SatResult, paddle: bool) {
    separate(world, puck, other, sat);

    let (Ok(mover), Ok(struck)) = (world.pucks.get(puck), world.body(other)) else {
        return;
    };
    let normal = contact_normal(mover, struck, sat, &world.settings);
    // Already leaving the surface
    if (mover.velocity - struck.velocity).dot(normal) >= 0.0 {
        return;
    }
    let model = struck.flags.bounce().unwrap_or(BounceModel::Reflect);
    let offset = impact_offset(mover, struck);
    let incoming = mover.velocity;
    let mut outgoing = bounce(
        model,
        incoming,
        normal,
        offset,
        struck.effective_velocity(),
        &world.settings,
    );
    let destroy = struck.flags.contains(BodyFlags::DESTROY);
    let struck_kind = struck.kind;

    if paddle {
        let cap = world.settings.max_speed_for_level(world.level);
        let boost = outgoing.normalize_or_zero() * world.settings.speed_increment;
        outgoing = (outgoing + boost).clamp_length_max(cap);
        world.last_hit.insert(puck, other);
        if world.primary_puck() == Some(puck) {
            world.puck_speed = outgoing.length();
        }
    }

    if let Ok(mover) = world.pucks.get_mut(puck) {
        mover.set_velocity(outgoing);
    }
    if destroy && let Ok(struck) = world.body_mut(other) {
        struck.removed = true;
    }
    if destroy {
        world.events.push(GameEvent::Destroyed { key: other });
    }
    record_bounce(world, puck, other, struck_kind);
}

/// Equal-mass elastic exchange along the contact normal
fn puck_vs_puck(world: &mut World, a: Key, b: Key, sat: &SatResult) {
    separate(world, a, b, sat);

    let (Ok(first), Ok(second)) = (world.pucks.get(a), world.pucks.get(b)) else {
        return;
    };
    let closing = (first.velocity - second.velocity).dot(sat.normal);
    if closing >= 0.0 {
        return;
    }
    let impulse = sat.normal * closing;
    let (va, vb) = (first.velocity - impulse, second.velocity + impulse);

    if let Ok(body) = world.pucks.get_mut(a) {
        body.set_velocity(va);
    }
    if let Ok(body) = world.pucks.get_mut(b) {
        body.set_velocity(vb);
    }
    record_bounce(world, a, b, BodyKind::Puck);
}

fn collect(world: &mut World, puck: Key, extra: Key, kind: ExtraKind) {
    let Ok(body) = world.extras.get_mut(extra) else {
        return;
    };
    body.removed = true;
    let position = body.current;

    let player = world
        .last_hit
        .get(&puck)
        .and_then(|paddle| world.paddles.get(*paddle).ok())
        .and_then(|paddle| paddle.owner);
    world.events.push(GameEvent::Collected { kind, player });
    log::debug!("extra {:?} collected by {:?}", kind, player);

    match kind {
        ExtraKind::Shield => {
            if let Some(player) = player {
                world.spawn_shield(player);
            }
        }
        ExtraKind::MultiPuck => {
            let Ok(source) = world.pucks.get(puck) else {
                return;
            };
            let velocity = DVec2::from_angle(0.5).rotate(source.velocity);
            world.spawn_ghost_puck(position, velocity);
        }
    }
}

/// Delete every soft-removed body
fn sweep(world: &mut World) {
    let mut doomed = Vec::new();
    for kind in [
        BodyKind::Puck,
        BodyKind::Paddle,
        BodyKind::Obstacle,
        BodyKind::Extra(ExtraKind::Shield),
        BodyKind::Shield,
    ] {
        doomed.extend(
            world
                .store(kind)
                .iter()
                .filter(|(_, body)| body.removed)
                .map(|(key, _)| key),
        );
    }
    for key in doomed {
        world.remove(key);
    }
}

/// Keep bodies on the field; returns the first goal as `(loser, x)`
fn bounds(world: &mut World) -> Option<(u8, f64)> {
    let (width, height) = (world.settings.arena_width, world.settings.arena_height);
    let mut goal = None;
    let mut gone = Vec::new();

    for key in sorted_keys(&world.pucks) {
        let Ok(puck) = world.pucks.get_mut(key) else {
            continue;
        };
        let mut velocity = puck.velocity;
        let push = if puck.aabb.min.x < 0.0 {
            velocity.x = velocity.x.abs();
            -puck.aabb.min.x
        } else if puck.aabb.max.x > width {
            velocity.x = -velocity.x.abs();
            width - puck.aabb.max.x
        } else {
            0.0
        };
        if push != 0.0 {
            puck.translate(DVec2::new(push, 0.0));
            puck.set_velocity(velocity);
        }

        let loser = if puck.current.y < 0.0 {
            Some(0)
        } else if puck.current.y > height {
            Some(1)
        } else {
            None
        };
        if let Some(loser) = loser {
            if !puck.flags.contains(BodyFlags::PASS_THROUGH) && goal.is_none() {
                goal = Some((loser, puck.current.x));
            }
            gone.push(key);
        }
    }

    for (_, paddle) in world.paddles.iter_mut() {
        let shift = if paddle.aabb.width() >= width {
            width * 0.5 - paddle.aabb.center().x
        } else if paddle.aabb.min.x < 0.0 {
            -paddle.aabb.min.x
        } else if paddle.aabb.max.x > width {
            width - paddle.aabb.max.x
        } else {
            0.0
        };
        if shift == 0.0 {
            continue;
        }
        paddle.translate(DVec2::new(shift, 0.0));
        paddle.seek = None;
        paddle.set_velocity(DVec2::ZERO);
    }

    gone.extend(world.extras.iter().filter_map(|(key, extra)| {
        let b = &extra.aabb;
        (b.max.x < 0.0 || b.min.x > width || b.max.y < 0.0 || b.min.y > height).then_some(key)
    }));

    for key in gone {
        world.remove(key);
    }
    goal
}

fn integrate_body(body: &mut Body, dt: f64, damping_floor: f64) {
    if body.removed || !body.flags.is_dynamic() {
        return;
    }

    let arrived = match body.seek {
        Some(mut seek) => {
            body.velocity = (seek.target - body.current) / seek.frames as f64;
            seek.frames -= 1;
            body.seek = (seek.frames > 0).then_some(seek);
            seek.frames == 0
        }
        None => false,
    };

    if body.damping != 1.0 {
        body.velocity *= body.damping;
        if body.velocity.length_squared() < damping_floor {
            body.damping = 1.0;
        }
    }

    let start = body.current;
    let next = start + body.velocity + 0.5 * body.acceleration * dt * dt;
    body.translate(next - start);
    body.previous = start;
    // A finished seek leaves the body at rest
    body.velocity = if arrived { DVec2::ZERO } else { next - start };
    body.acceleration = DVec2::ZERO;
}

fn integrate(world: &mut World, dt: f64) {
    let floor = world.settings.damping_floor;
    for (_, body) in world.pucks.iter_mut() {
        integrate_body(body, dt, floor);
    }
    for (_, body) in world.paddles.iter_mut() {
        integrate_body(body, dt, floor);
    }
    for (_, body) in world.extras.iter_mut() {
        integrate_body(body, dt, floor);
    }
    for (_, body) in world.obstacles.iter_mut() {
        integrate_body(body, dt, floor);
    }
}

fn decay_smoothing(world: &mut World) {
    for (_, body) in world.bodies_mut() {
        if let Some(smoothing) = body.smoothing.as_mut()
            && !smoothing.advance()
        {
            body.smoothing = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::settings::Settings;
    use crate::sim::geom::Polygon;

    fn preview_world() -> World {
        let mut world = World::new(7, Settings::default());
        world.transition(GamePhase::Preview).unwrap();
        world
    }

    fn playing_world(seed: u64) -> World {
        let mut world = World::new(seed, Settings::default());
        world.start().unwrap();
        world.transition(GamePhase::Playing).unwrap();
        world
    }

    fn rect(center: DVec2, size: DVec2) -> Polygon {
        Polygon::rect(center, size)
    }

    #[test]
    fn test_puck_bounces_off_static_wall() {
        let mut world = preview_world();
        let puck = world.add(
            Body::new(
                BodyKind::Puck,
                rect(DVec2::new(50.0, 40.0), DVec2::splat(10.0)),
                BodyFlags::DYNAMIC,
            )
            .with_velocity(DVec2::new(0.0, -20.0)),
        );
        let wall = world.add_obstacle(
            rect(DVec2::new(50.0, 10.0), DVec2::new(100.0, 20.0)),
            BounceModel::Reflect,
            false,
        );

        step(&mut world, SIM_DT);

        let puck = world.pucks.get(puck).unwrap();
        assert!((puck.velocity - DVec2::new(0.0, 20.0)).length() < 1e-9);
        let wall = world.obstacles.get(wall).unwrap();
        assert!(!puck.aabb.overlaps(&wall.aabb));
    }

    #[test]
    fn test_frame_advances_in_frozen_phases() {
        let mut world = World::new(1, Settings::default());
        step(&mut world, SIM_DT);
        assert_eq!(world.frame, 1);

        let mut world = playing_world(1);
        world.transition(GamePhase::Paused).unwrap();
        let puck = world.primary_puck().unwrap();
        world.pucks.get_mut(puck).unwrap().set_velocity(DVec2::new(3.0, 0.0));
        let before = world.pucks.get(puck).unwrap().current;
        step(&mut world, SIM_DT);
        assert_eq!(world.frame, 1);
        assert_eq!(world.pucks.get(puck).unwrap().current, before);
    }

    #[test]
    fn test_serve_launches_puck() {
        let mut world = World::new(99, Settings::default());
        world.start().unwrap();
        for _ in 0..=world.settings.serve_delay_frames {
            step(&mut world, SIM_DT);
        }
        assert_eq!(world.phase, GamePhase::Playing);
        let puck = world.pucks.get(world.primary_puck().unwrap()).unwrap();
        assert!((puck.velocity.length() - world.settings.puck_start_speed).abs() < 1e-9);
    }

    #[test]
    fn test_goal_concludes_round() {
        let mut world = playing_world(3);
        for player in 0..2 {
            let paddle = world.paddle_of(player).unwrap();
            world.remove(paddle);
        }
        let puck = world.primary_puck().unwrap();
        world
            .pucks
            .get_mut(puck)
            .unwrap()
            .set_velocity(DVec2::new(0.0, -20.0));

        for _ in 0..30 {
            step(&mut world, SIM_DT);
        }
        assert_eq!(world.score, [0, 1]);
        assert_eq!(world.phase, GamePhase::NextRound);
        assert!(world.pucks.is_empty());
        assert!(
            world
                .take_events()
                .iter()
                .any(|e| matches!(e, GameEvent::Goal { loser: 0, .. }))
        );

        for _ in 0..=world.settings.round_pause_frames {
            step(&mut world, SIM_DT);
        }
        assert_eq!(world.phase, GamePhase::Starting);
        assert_eq!(world.round, 1);
        assert_eq!(world.pucks.len(), 1);
    }

    #[test]
    fn test_pass_through_puck_leaves_silently() {
        let mut world = playing_world(4);
        let ghost = world.spawn_ghost_puck(DVec2::new(100.0, 10.0), DVec2::new(0.0, -20.0));
        step(&mut world, SIM_DT);
        step(&mut world, SIM_DT);
        assert!(world.pucks.get(ghost).is_err());
        assert_eq!(world.score, [0, 0]);
        assert_eq!(world.phase, GamePhase::Playing);
    }

    #[test]
    fn test_ghost_ignores_other_pucks() {
        let mut world = preview_world();
        let a = world.add(
            Body::new(
                BodyKind::Puck,
                rect(DVec2::new(100.0, 100.0), DVec2::splat(10.0)),
                BodyFlags::DYNAMIC,
            )
            .with_velocity(DVec2::new(5.0, 0.0)),
        );
        world.spawn_ghost_puck(DVec2::new(112.0, 100.0), DVec2::new(-5.0, 0.0));
        step(&mut world, SIM_DT);
        let a = world.pucks.get(a).unwrap();
        assert!((a.velocity - DVec2::new(5.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_pucks_exchange_velocity() {
        let mut world = preview_world();
        let shape = |x| rect(DVec2::new(x, 100.0), DVec2::splat(10.0));
        let a = world.add(
            Body::new(BodyKind::Puck, shape(100.0), BodyFlags::DYNAMIC)
                .with_velocity(DVec2::new(5.0, 0.0)),
        );
        let b = world.add(
            Body::new(BodyKind::Puck, shape(115.0), BodyFlags::DYNAMIC)
                .with_velocity(DVec2::new(-5.0, 0.0)),
        );
        step(&mut world, SIM_DT);
        assert!(world.pucks.get(a).unwrap().velocity.x < 0.0);
        assert!(world.pucks.get(b).unwrap().velocity.x > 0.0);
    }

    #[test]
    fn test_destroy_obstacle_is_removed() {
        let mut world = preview_world();
        world.add(
            Body::new(
                BodyKind::Puck,
                rect(DVec2::new(200.0, 40.0), DVec2::splat(10.0)),
                BodyFlags::DYNAMIC,
            )
            .with_velocity(DVec2::new(0.0, -20.0)),
        );
        let brick = world.add_obstacle(
            rect(DVec2::new(200.0, 10.0), DVec2::new(60.0, 20.0)),
            BounceModel::Reflect,
            true,
        );
        step(&mut world, SIM_DT);
        assert!(!world.obstacles.has(brick));
        assert!(
            world
                .take_events()
                .contains(&GameEvent::Destroyed { key: brick })
        );
    }

    #[test]
    fn test_move_seeks_paddle_then_rests() {
        let mut world = playing_world(5);
        let paddle = world.paddle_of(0).unwrap();
        let start = world.paddles.get(paddle).unwrap().current;

        apply_input(&mut world, &Input::Move { player: 0, dx: 6.0 });
        apply_input(&mut world, &Input::Move { player: 0, dx: 4.0 });
        step(&mut world, SIM_DT);

        let body = world.paddles.get(paddle).unwrap();
        assert!((body.current.x - (start.x + 10.0)).abs() < 1e-9);
        assert!((body.effective_velocity().x - 10.0).abs() < 1e-9);
        assert_eq!(body.velocity, DVec2::ZERO);

        step(&mut world, SIM_DT);
        let body = world.paddles.get(paddle).unwrap();
        assert!((body.current.x - (start.x + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_move_with_paddle_wider_than_arena_stays_centered() {
        let settings = Settings {
            paddle_width: 600.0,
            ..Settings::default()
        };
        let mut world = World::new(5, settings);
        world.start().unwrap();
        apply_input(&mut world, &Input::Move { player: 0, dx: 1.0 });
        step(&mut world, SIM_DT);

        let center = world.settings.arena_width * 0.5;
        let paddle = world.paddles.get(world.paddle_of(0).unwrap()).unwrap();
        assert!((paddle.current.x - center).abs() < 1e-9);
    }

    #[test]
    fn test_damping_resets_at_floor() {
        let settings = Settings {
            damping_floor: 1.0,
            ..Settings::default()
        };
        let mut world = World::new(7, settings);
        world.transition(GamePhase::Preview).unwrap();
        let mut body = Body::new(
            BodyKind::Puck,
            rect(DVec2::new(200.0, 400.0), DVec2::splat(10.0)),
            BodyFlags::DYNAMIC,
        )
        .with_velocity(DVec2::new(4.0, 0.0));
        body.damping = 0.5;
        let key = world.add(body);

        // 4 -> 2 -> 1 -> 0.5: the third step drops below the floor
        let expected = [(2.0, 0.5), (1.0, 0.5), (0.5, 1.0), (0.5, 1.0)];
        for (vx, damping) in expected {
            step(&mut world, SIM_DT);
            let body = world.pucks.get(key).unwrap();
            assert!((body.velocity.x - vx).abs() < 1e-12, "vx {}", body.velocity.x);
            assert_eq!(body.damping, damping);
        }
    }

    #[test]
    fn test_seek_over_n_frames_reaches_target() {
        let mut world = preview_world();
        let key = world.add(Body::new(
            BodyKind::Paddle,
            rect(DVec2::new(200.0, 300.0), DVec2::new(80.0, 12.0)),
            BodyFlags::DYNAMIC,
        ));
        world
            .paddles
            .get_mut(key)
            .unwrap()
            .seek_to(DVec2::new(240.0, 300.0), 4);

        for frame in 1..=4u32 {
            step(&mut world, SIM_DT);
            let body = world.paddles.get(key).unwrap();
            assert!((body.current.x - (200.0 + 10.0 * frame as f64)).abs() < 1e-9);
            assert!((body.effective_velocity().x - 10.0).abs() < 1e-9);
            let remaining = body.seek.map_or(0, |s| s.frames);
            assert_eq!(remaining, 4 - frame);
        }

        let body = world.paddles.get(key).unwrap();
        assert_eq!(body.velocity, DVec2::ZERO);
        step(&mut world, SIM_DT);
        assert!((world.paddles.get(key).unwrap().current.x - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_died_input_concedes() {
        let mut world = playing_world(6);
        apply_input(&mut world, &Input::Died { player: 1, x: 42.0 });
        assert_eq!(world.score, [1, 0]);
        assert_eq!(world.phase, GamePhase::NextRound);
        assert!(world.primary_puck().is_none());
    }

    #[test]
    fn test_hit_snaps_primary_puck() {
        let mut world = playing_world(6);
        apply_input(
            &mut world,
            &Input::Hit {
                x: 120.0,
                velocity: -3.0,
            },
        );
        let puck = world.pucks.get(world.primary_puck().unwrap()).unwrap();
        assert_eq!(puck.current.x, 120.0);
        assert_eq!(puck.velocity.x, -3.0);
    }

    #[test]
    fn test_force_pulls_puck() {
        let mut world = preview_world();
        let puck = world.add(Body::new(
            BodyKind::Puck,
            rect(DVec2::new(100.0, 100.0), DVec2::splat(10.0)),
            BodyFlags::DYNAMIC,
        ));
        world.add_force(DVec2::new(200.0, 100.0), 3600.0, 300.0);
        step(&mut world, SIM_DT);
        assert!(world.pucks.get(puck).unwrap().velocity.x > 0.0);
    }

    #[test]
    fn test_extrapolate_discards_events() {
        let mut world = preview_world();
        world.add(
            Body::new(
                BodyKind::Puck,
                rect(DVec2::new(50.0, 40.0), DVec2::splat(10.0)),
                BodyFlags::DYNAMIC,
            )
            .with_velocity(DVec2::new(0.0, -20.0)),
        );
        world.add_obstacle(
            rect(DVec2::new(50.0, 10.0), DVec2::new(100.0, 20.0)),
            BounceModel::Reflect,
            false,
        );
        world.take_events();
        let mut ghost = world.clone();

        step(&mut world, SIM_DT);
        step_with(&mut ghost, SIM_DT, StepMode::Extrapolate);
        assert!(!world.events.is_empty());
        assert!(ghost.events.is_empty());
        assert_eq!(ghost.hash(), world.hash());
    }

    #[test]
    fn test_same_seed_and_inputs_stay_identical() {
        let script = |frame: u64| -> Vec<Input> {
            match frame % 7 {
                0 => vec![Input::Move { player: 0, dx: 3.0 }],
                3 => vec![Input::Move { player: 1, dx: -5.0 }],
                5 => vec![
                    Input::Move { player: 0, dx: -2.0 },
                    Input::Move { player: 1, dx: 4.0 },
                ],
                _ => Vec::new(),
            }
        };
        let mut a = World::new(2024, Settings::default());
        let mut b = World::new(2024, Settings::default());
        a.start().unwrap();
        b.start().unwrap();

        for frame in 0..900 {
            for input in script(frame) {
                apply_input(&mut a, &input);
                apply_input(&mut b, &input);
            }
            step(&mut a, SIM_DT);
            step(&mut b, SIM_DT);
            assert_eq!(a.hash(), b.hash(), "diverged at frame {}", frame);
        }
        assert_eq!(a.frame, 900);
    }
}
