//! Live per-character avatar state.
//!
//! An `AvatarInstance` binds one chat participant to one loaded humanoid
//! rig: container transform, interaction volumes, expression and motion
//! state, and the talk/blink deadlines driven by the frame tick.

use glam::Vec3;
use rand::Rng;
use std::collections::HashMap;

use crate::config::{ModelSettings, MAX_SCALE, MIN_SCALE};
use crate::rig::HumanoidRig;
use crate::stage::hitbox::{BodyPart, HitVolume};
use crate::stage::mixer::{ActionId, MotionMixer};

/// Expression applied when "none" is requested
pub const FALLBACK_EXPRESSION: &str = "neutral";
/// Expression blend target driven by mouth animation
pub const MOUTH_EXPRESSION: &str = "aa";
/// Expression blend target driven by the blink loop
pub const BLINK_EXPRESSION: &str = "blink";
/// Cap applied to every expression while a talk override is active
pub const TALK_EXPRESSION_CAP: f32 = 0.25;

/// Mouth flap oscillation rate while text-talking, radians per second
const TALK_MOUTH_RATE: f64 = 15.0;
/// Talk duration contributed by each character of message text, seconds
pub const TALK_SECONDS_PER_CHAR: f64 = 0.05;

/// Container transform for a placed avatar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Vec3,
    pub position: Vec3,
    /// Euler rotation, radians; only x and y are ever non-zero
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }
}

/// Current motion descriptor
#[derive(Debug, Clone, Default)]
pub struct MotionState {
    /// Resolved file currently playing, or "none"
    pub name: String,
    /// Mixer action backing the motion
    pub action: Option<ActionId>,
}

/// Deferred fall-back to the default motion after a one-shot clip
#[derive(Debug, Clone, Copy)]
pub struct MotionFallback {
    /// Stage-clock deadline, seconds
    pub due: f64,
    /// Action that scheduled the fallback; a mismatch with the current
    /// motion action means the clip was superseded and the fallback is dead
    pub action: ActionId,
}

#[derive(Debug, Clone, Copy)]
struct BlinkTimer {
    next_at: f64,
    close_until: Option<f64>,
}

/// A parsed, initialized model detached from any character. This is what
/// the model cache stores and what attachment consumes.
pub struct ModelShell {
    pub rig: Box<dyn HumanoidRig>,
    pub hips_height: f32,
    pub collider: HitVolume,
    pub hitboxes: HashMap<BodyPart, HitVolume>,
}

impl ModelShell {
    /// Build a shell around a freshly-parsed rig. Hit volumes are created
    /// here, at load time, one per body part whose bone the rig carries.
    pub fn new(rig: Box<dyn HumanoidRig>, build_hitboxes: bool) -> Self {
        let hips_height = rig.hips_height();
        let hitboxes = if build_hitboxes {
            BodyPart::all()
                .into_iter()
                .filter(|part| rig.has_bone(part.bone()))
                .map(|part| (part, HitVolume::for_part(part, hips_height)))
                .collect()
        } else {
            HashMap::new()
        };

        Self {
            rig,
            hips_height,
            collider: HitVolume::body_collider(),
            hitboxes,
        }
    }
}

/// Live avatar bound to one chat participant
pub struct AvatarInstance {
    pub character: String,
    pub model_path: String,
    /// Monotonic instance id; timers check it to detect replacement
    pub id: u64,
    pub rig: Box<dyn HumanoidRig>,
    pub hips_height: f32,
    pub container: Transform,
    pub collider: HitVolume,
    pub hitboxes: HashMap<BodyPart, HitVolume>,
    /// Active expression name, `FALLBACK_EXPRESSION` initially
    pub expression: String,
    pub motion: MotionState,
    pub mixer: MotionMixer,
    /// Stage-clock deadline until which the mouth is text-driven
    pub talk_end: f64,
    pub fallback: Option<MotionFallback>,
    blink: BlinkTimer,
}

impl AvatarInstance {
    pub fn from_shell(character: &str, model_path: &str, id: u64, shell: ModelShell) -> Self {
        Self {
            character: character.to_string(),
            model_path: model_path.to_string(),
            id,
            rig: shell.rig,
            hips_height: shell.hips_height,
            container: Transform::default(),
            collider: shell.collider,
            hitboxes: shell.hitboxes,
            expression: FALLBACK_EXPRESSION.to_string(),
            motion: MotionState {
                name: "none".to_string(),
                action: None,
            },
            mixer: MotionMixer::new(),
            talk_end: 0.0,
            fallback: None,
            blink: BlinkTimer {
                next_at: 0.0,
                close_until: None,
            },
        }
    }

    /// Detach back into a cacheable shell, stopping all playback
    pub fn into_shell(mut self) -> ModelShell {
        self.mixer.stop_all();
        ModelShell {
            rig: self.rig,
            hips_height: self.hips_height,
            collider: self.collider,
            hitboxes: self.hitboxes,
        }
    }

    /// Apply persisted transform settings to the container
    pub fn apply_transform(&mut self, settings: &ModelSettings) {
        self.container.scale = Vec3::splat(settings.scale);
        self.container.position = Vec3::new(settings.x, settings.y, 0.0);
        self.container.rotation = Vec3::new(settings.rx, settings.ry, 0.0);
    }

    /// Multiply the container scale, clamped per axis. Returns the new
    /// uniform scale (the x axis, which all interactive paths keep uniform).
    pub fn rescale(&mut self, factor: f32) -> f32 {
        let scaled = self.container.scale * factor;
        self.container.scale = scaled.clamp(Vec3::splat(MIN_SCALE), Vec3::splat(MAX_SCALE));
        self.container.scale.x
    }

    /// Whether a text-talk override is currently active
    pub fn is_talking(&self, now: f64) -> bool {
        self.talk_end > now
    }

    /// Extend the mouth animation deadline from a message's length
    pub fn talk_for_text(&mut self, now: f64, text_len: usize) {
        self.talk_end = now + text_len as f64 * TALK_SECONDS_PER_CHAR;
    }

    /// Switch the active expression: zero every known expression, then set
    /// the target to full weight (capped while a talk override is active).
    /// "none" is normalized to the fallback expression.
    pub fn set_expression(&mut self, value: &str, talking: bool) {
        let value = if value == "none" {
            FALLBACK_EXPRESSION
        } else {
            value
        };

        for name in self.rig.expression_names() {
            self.rig.set_expression_weight(&name, 0.0);
        }

        let weight = if talking { TALK_EXPRESSION_CAP } else { 1.0 };
        self.rig.set_expression_weight(value, weight);
        self.expression = value.to_string();
    }

    /// Text-driven mouth tick: while the talk deadline is in the future a
    /// sine flap drives the mouth and every other expression is capped;
    /// afterwards the active expression is restored to full weight.
    pub fn drive_mouth_text(&mut self, now: f64) {
        if self.is_talking(now) {
            let phase = ((self.talk_end - now) * TALK_MOUTH_RATE).sin();
            let mouth = ((phase + 1.0) / 2.0) as f32;
            self.cap_expressions();
            self.rig.set_expression_weight(MOUTH_EXPRESSION, mouth);
        } else {
            self.release_mouth();
        }
    }

    /// Amplitude-driven mouth tick used by TTS lip sync
    pub fn drive_mouth_level(&mut self, level: f32) {
        self.cap_expressions();
        self.rig
            .set_expression_weight(MOUTH_EXPRESSION, level.clamp(0.0, 1.0));
    }

    /// Zero the mouth and restore the active expression to full weight
    pub fn release_mouth(&mut self) {
        let expression = self.expression.clone();
        self.rig.set_expression_weight(&expression, 1.0);
        self.rig.set_expression_weight(MOUTH_EXPRESSION, 0.0);
    }

    fn cap_expressions(&mut self) {
        for name in self.rig.expression_names() {
            let current = self.rig.expression_weight(&name);
            self.rig
                .set_expression_weight(&name, current.min(TALK_EXPRESSION_CAP));
        }
    }

    /// Self-rescheduling blink: eyes close, hold for a short random time,
    /// reopen, and the next blink lands one to eleven seconds out.
    pub fn update_blink<R: Rng>(&mut self, now: f64, rng: &mut R) {
        if let Some(close_until) = self.blink.close_until {
            if now >= close_until {
                self.rig.set_expression_weight(BLINK_EXPRESSION, 0.0);
                self.blink.close_until = None;
            }
        }

        if now >= self.blink.next_at {
            self.rig.set_expression_weight(BLINK_EXPRESSION, 1.0);
            self.blink.close_until = Some(now + rng.gen_range(0.05..0.30));
            self.blink.next_at = now + rng.gen_range(1.0..11.0);
        }
    }

    /// Re-anchor the collider and hit volumes to their bones
    pub fn update_volumes(&mut self, show_grid: bool) {
        let scale = self.container.scale;

        if let Some((pos, rot)) = self.rig.bone_world_transform("hips") {
            self.collider.follow(pos, rot, scale);
        }
        self.collider.visible = show_grid;

        for (part, volume) in &mut self.hitboxes {
            if let Some((pos, rot)) = self.rig.bone_world_transform(part.bone()) {
                volume.follow(pos, rot, scale);
            }
            volume.visible = show_grid;
        }
    }
}
