//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only
//! - Stable iteration order (by entity key)
//! - No rendering, audio or I/O

pub mod arena;
pub mod body;
pub mod collision;
pub mod geom;
pub mod schedule;
pub mod state;
pub mod tick;

pub use arena::{Arena, ArenaError, Key};
pub use body::{Body, BodyFlags, BodyKind, BounceModel, ExtraKind, SeekTarget, Smoothing};
pub use geom::{Aabb, Edge, Polygon, SatResult, sat};
pub use schedule::{Actions, FixedStep, Steps};
pub use state::{GameAction, GameEvent, GamePhase, PhaseError, World};
pub use tick::{StepMode, apply_input, step, step_with};
