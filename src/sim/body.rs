//! Physical bodies and their collision flags
//!
//! A body is a convex polygon moved by Verlet-style integration: the
//! difference between `current` and `previous` is the effective velocity,
//! while `velocity` holds the displacement that will be applied next step
//! (collision response overrides it for discrete bounces).

use std::collections::BTreeMap;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::geom::{Aabb, Polygon};

/// Closed set of body categories; resolution matches on pairs of these
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    /// Primary mover, scores when it leaves past a goal line
    Puck,
    /// Player control surface
    Paddle,
    /// Static level geometry
    Obstacle,
    /// Collectible pickup
    Extra(ExtraKind),
    /// Attracts or repels pucks, never collides
    Force,
    /// Temporary goal cover
    Shield,
}

impl BodyKind {
    /// Stable small integer used by the world hash
    pub fn tag(self) -> u64 {
        match self {
            BodyKind::Puck => 1,
            BodyKind::Paddle => 2,
            BodyKind::Obstacle => 3,
            BodyKind::Extra(ExtraKind::Shield) => 4,
            BodyKind::Extra(ExtraKind::MultiPuck) => 5,
            BodyKind::Force => 6,
            BodyKind::Shield => 7,
        }
    }
}

/// Pickup effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtraKind {
    /// Covers the collector's goal for a while
    Shield,
    /// Adds a short-lived ghost puck
    MultiPuck,
}

/// Velocity reflection model used when a body is struck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BounceModel {
    /// Specular reflection about the struck edge normal
    Reflect,
    /// Reflection bent by the impact offset plus a small momentum transfer
    Steer,
    /// Steer where the struck body's own velocity dominates
    Direct,
}

/// Collision behaviour bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BodyFlags(u16);

impl BodyFlags {
    /// Immovable body (no bits set)
    pub const STATIC: Self = Self(0);
    /// Integrated every step
    pub const DYNAMIC: Self = Self(1 << 0);
    /// Removed after being struck
    pub const DESTROY: Self = Self(1 << 1);
    /// Ignores collisions with other movable bodies
    pub const GHOST: Self = Self(1 << 2);
    /// Leaves through goal lines without scoring
    pub const PASS_THROUGH: Self = Self(1 << 3);
    pub const REFLECT: Self = Self(1 << 4);
    pub const STEER: Self = Self(1 << 5);
    pub const DIRECT: Self = Self(1 << 6);

    const BOUNCE_MASK: u16 = Self::REFLECT.0 | Self::STEER.0 | Self::DIRECT.0;

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn is_dynamic(self) -> bool {
        self.contains(Self::DYNAMIC)
    }

    #[inline]
    pub fn is_static(self) -> bool {
        !self.is_dynamic()
    }

    /// The reflection model, if any
    pub fn bounce(self) -> Option<BounceModel> {
        if self.contains(Self::DIRECT) {
            Some(BounceModel::Direct)
        } else if self.contains(Self::STEER) {
            Some(BounceModel::Steer)
        } else if self.contains(Self::REFLECT) {
            Some(BounceModel::Reflect)
        } else {
            None
        }
    }

    /// Select a reflection model, clearing the other two
    pub fn set_bounce(&mut self, model: BounceModel) {
        self.0 &= !Self::BOUNCE_MASK;
        self.insert(match model {
            BounceModel::Reflect => Self::REFLECT,
            BounceModel::Steer => Self::STEER,
            BounceModel::Direct => Self::DIRECT,
        });
    }
}

impl std::ops::BitOr for BodyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// Programmatic movement toward a point over a number of frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekTarget {
    pub target: DVec2,
    pub frames: u32,
}

/// Presentation-only offset easing a corrected body to its new position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Smoothing {
    pub initial: DVec2,
    pub offset: DVec2,
    pub remaining: u32,
    pub total: u32,
}

impl Smoothing {
    pub fn new(offset: DVec2, frames: u32) -> Self {
        let frames = frames.max(1);
        Self {
            initial: offset,
            offset,
            remaining: frames,
            total: frames,
        }
    }

    /// Decay one frame; returns false once fully eased
    pub fn advance(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.offset = self.initial * (self.remaining as f64 / self.total as f64);
        self.remaining > 0
    }
}

/// A simulated entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub kind: BodyKind,
    pub shape: Polygon,
    pub current: DVec2,
    pub previous: DVec2,
    pub velocity: DVec2,
    pub acceleration: DVec2,
    pub aabb: Aabb,
    pub radius: f64,
    pub mass: f64,
    /// Velocity multiplier per step (1.0 is neutral)
    pub damping: f64,
    pub flags: BodyFlags,
    /// Player index for paddles and shields
    pub owner: Option<u8>,
    /// Gameplay timers and effect state
    pub data: BTreeMap<String, f64>,
    pub seek: Option<SeekTarget>,
    pub smoothing: Option<Smoothing>,
    /// Soft delete, swept after collision resolution
    pub removed: bool,
}

impl Body {
    pub fn new(kind: BodyKind, shape: Polygon, flags: BodyFlags) -> Self {
        let current = shape.centroid();
        let aabb = shape.aabb();
        let radius = shape.radius_from(current);
        Self {
            kind,
            shape,
            current,
            previous: current,
            velocity: DVec2::ZERO,
            acceleration: DVec2::ZERO,
            aabb,
            radius,
            mass: 1.0,
            damping: 1.0,
            flags,
            owner: None,
            data: BTreeMap::new(),
            seek: None,
            smoothing: None,
            removed: false,
        }
    }

    pub fn with_owner(mut self, owner: u8) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_velocity(mut self, velocity: DVec2) -> Self {
        self.set_velocity(velocity);
        self
    }

    /// Move the shape and keep the derived bounds in sync
    pub fn translate(&mut self, delta: DVec2) {
        self.shape.translate(delta);
        self.current += delta;
        self.refresh_bounds();
    }

    /// Teleport without introducing velocity
    pub fn move_to(&mut self, position: DVec2) {
        let delta = position - self.current;
        self.translate(delta);
        self.previous += delta;
    }

    /// Override velocity, keeping the Verlet pair consistent
    pub fn set_velocity(&mut self, velocity: DVec2) {
        self.velocity = velocity;
        self.previous = self.current - velocity;
    }

    pub fn refresh_bounds(&mut self) {
        self.aabb = self.shape.aabb();
        self.radius = self.shape.radius_from(self.current);
    }

    /// Distance this body will travel this step
    #[inline]
    pub fn displacement(&self) -> f64 {
        self.velocity.length()
    }

    /// Displacement over the last completed step
    #[inline]
    pub fn effective_velocity(&self) -> DVec2 {
        self.current - self.previous
    }

    /// Static bodies, paddles and shields are never pushed by a collision
    pub fn immovable(&self) -> bool {
        self.flags.is_static() || matches!(self.kind, BodyKind::Paddle | BodyKind::Shield)
    }

    pub fn seek_to(&mut self, target: DVec2, frames: u32) {
        self.seek = Some(SeekTarget {
            target,
            frames: frames.max(1),
        });
    }

    /// Where rendering should draw the body
    pub fn render_position(&self) -> DVec2 {
        match self.smoothing {
            Some(s) => self.current + s.offset,
            None => self.current,
        }
    }

    pub fn data(&self, key: &str) -> f64 {
        self.data.get(key).copied().unwrap_or(0.0)
    }

    pub fn set_data(&mut self, key: &str, value: f64) {
        self.data.insert(key.to_string(), value);
    }
}
