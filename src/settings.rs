//! Simulation and network tuning
//!
//! Every gameplay constant that has no derivation beyond "it felt right"
//! lives here so both peers can agree on one JSON document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::*;

/// Failure loading a settings document
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Tuning constants shared by both peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Timing ===
    /// Fixed step length in seconds
    pub sim_dt: f64,
    /// Catch-up cap per real frame
    pub max_substeps: u32,

    // === Playfield ===
    pub arena_width: f64,
    pub arena_height: f64,
    pub paddle_width: f64,
    pub paddle_height: f64,
    pub paddle_margin: f64,
    pub puck_size: f64,

    // === Puck speed (units per step) ===
    pub puck_start_speed: f64,
    /// Added on every paddle hit
    pub speed_increment: f64,
    /// Round maximum at level 0
    pub max_speed: f64,
    /// Extra maximum per level
    pub max_speed_per_level: f64,

    // === Bounce models ===
    /// Replace SAT normals with ray-cast normals when available
    pub improved_normal: bool,
    /// Minimum cosine between the incoming direction and a ray-cast normal
    pub improved_normal_min_cos: f64,
    /// Steer: how much the impact offset bends the outgoing direction
    pub steer_bias: f64,
    /// Steer: fraction of the struck body's horizontal velocity transferred
    pub steer_momentum: f64,
    /// Direct: struck body velocity is divided by this before transfer
    pub direct_divisor: f64,

    // === Integration ===
    /// Damping stops once |v|² drops below this
    pub damping_floor: f64,
    /// Frames a replay correction takes to ease out
    pub interpolation_frames: u32,
    /// Corrections longer than this snap instead of easing
    pub snap_distance: f64,

    // === Rounds ===
    /// Frames between Starting and the serve
    pub serve_delay_frames: u64,
    /// Frames between a goal and the next round
    pub round_pause_frames: u64,
    /// Points needed to take a level
    pub winning_score: u32,
    /// Levels in a match
    pub levels: u32,

    // === Extras ===
    /// Frames between extra spawns (0 disables extras)
    pub extra_interval_frames: u64,
    pub extra_lifetime_frames: u64,
    pub shield_frames: u64,
    pub multi_puck_frames: u64,

    // === Network ===
    /// Frame envelopes batched into one transmission envelope
    pub frames_per_packet: usize,
    /// Largest frame envelope accepted for sending (fits the u8 length prefix)
    pub max_frame_envelope: usize,

    // === Latency probe ===
    pub probe_burst: u16,
    pub probe_min_samples: usize,
    pub probe_buffer: usize,
    pub probe_timeout_ms: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sim_dt: SIM_DT,
            max_substeps: MAX_SUBSTEPS,

            arena_width: ARENA_WIDTH,
            arena_height: ARENA_HEIGHT,
            paddle_width: PADDLE_WIDTH,
            paddle_height: PADDLE_HEIGHT,
            paddle_margin: PADDLE_MARGIN,
            puck_size: PUCK_SIZE,

            puck_start_speed: PUCK_START_SPEED,
            speed_increment: 0.4,
            max_speed: PUCK_MAX_SPEED,
            max_speed_per_level: 1.0,

            improved_normal: true,
            improved_normal_min_cos: 0.2,
            steer_bias: 0.6,
            steer_momentum: 0.25,
            direct_divisor: 2.0,

            damping_floor: 0.01,
            interpolation_frames: 12,
            snap_distance: 120.0,

            serve_delay_frames: 60,
            round_pause_frames: 90,
            winning_score: 3,
            levels: 3,

            extra_interval_frames: 600,
            extra_lifetime_frames: 900,
            shield_frames: 600,
            multi_puck_frames: 600,

            frames_per_packet: 1,
            max_frame_envelope: u8::MAX as usize,

            probe_burst: 8,
            probe_min_samples: 6,
            probe_buffer: 32,
            probe_timeout_ms: 2000.0,
        }
    }
}

impl Settings {
    /// Parse and validate a JSON settings document (missing fields use defaults)
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the simulation cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sim_dt <= 0.0 {
            return Err(SettingsError::Invalid {
                field: "sim_dt",
                reason: "must be positive",
            });
        }
        if self.max_substeps == 0 {
            return Err(SettingsError::Invalid {
                field: "max_substeps",
                reason: "must be at least 1",
            });
        }
        if self.direct_divisor <= 0.0 {
            return Err(SettingsError::Invalid {
                field: "direct_divisor",
                reason: "must be positive",
            });
        }
        if self.frames_per_packet == 0 {
            return Err(SettingsError::Invalid {
                field: "frames_per_packet",
                reason: "must be at least 1",
            });
        }
        if !(self.arena_width > 0.0 && self.arena_height > 0.0) {
            return Err(SettingsError::Invalid {
                field: "arena_width",
                reason: "playfield must have a positive size",
            });
        }
        if !(self.paddle_width > 0.0 && self.paddle_width < self.arena_width) {
            return Err(SettingsError::Invalid {
                field: "paddle_width",
                reason: "must be positive and narrower than the arena",
            });
        }
        if !(self.puck_size > 0.0
            && self.puck_size < self.arena_width
            && self.puck_size < self.arena_height)
        {
            return Err(SettingsError::Invalid {
                field: "puck_size",
                reason: "must be positive and smaller than the arena",
            });
        }
        if self.max_frame_envelope > u8::MAX as usize {
            return Err(SettingsError::Invalid {
                field: "max_frame_envelope",
                reason: "must fit the u8 length prefix",
            });
        }
        // Frame number plus one PING/PONG record
        if self.max_frame_envelope < 5 {
            return Err(SettingsError::Invalid {
                field: "max_frame_envelope",
                reason: "must hold at least one control record",
            });
        }
        if self.probe_buffer == 0 || self.probe_min_samples > self.probe_buffer {
            return Err(SettingsError::Invalid {
                field: "probe_buffer",
                reason: "must hold at least probe_min_samples samples",
            });
        }
        Ok(())
    }

    /// Puck speed cap for a level
    pub fn max_speed_for_level(&self, level: u32) -> f64 {
        self.max_speed + level as f64 * self.max_speed_per_level
    }
}
