//! Seams to the external 3D toolkit.
//!
//! Model parsing, skeletal math and rendering are collaborators, not part of
//! this crate. `ModelSource` parses model and animation files, `HumanoidRig`
//! is the live handle the orchestration layer drives: expression weights,
//! bone transforms, clip sampling and gaze target.

use glam::{Quat, Vec3};
use std::sync::Arc;

use crate::error::Result;

/// A parsed skeletal animation resource. The payload lives inside the
/// toolkit; this handle carries what the orchestration layer needs to
/// schedule playback and crossfades.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    /// Source file path, lowercased at ingestion
    pub name: String,
    /// Clip length in seconds
    pub duration: f32,
    /// Opaque toolkit-side identifier
    pub handle: u64,
}

/// Live handle to a loaded humanoid model.
pub trait HumanoidRig: Send + Sync {
    /// Names of every expression blend target the model supports
    fn expression_names(&self) -> Vec<String>;

    /// Current weight of an expression, 0.0 for unknown names
    fn expression_weight(&self, name: &str) -> f32;

    /// Set the weight of an expression; unknown names are ignored
    fn set_expression_weight(&mut self, name: &str, weight: f32);

    /// Whether the humanoid carries the named bone
    fn has_bone(&self, bone: &str) -> bool;

    /// World-space position and orientation of the named bone
    fn bone_world_transform(&self, bone: &str) -> Option<(Vec3, Quat)>;

    /// Height of the hips bone above the model root, used for animation
    /// retargeting and hit-volume offsets
    fn hips_height(&self) -> f32;

    /// Point the gaze at a world-space target, or clear it
    fn set_look_at(&mut self, target: Option<Vec3>);

    /// Apply a clip pose at the given time with the given blend weight
    fn sample_clip(&mut self, clip: &AnimationClip, time: f32, weight: f32);

    /// Advance internal systems (spring bones, gaze) by the elapsed time
    fn update(&mut self, dt: f32);

    /// Release toolkit-side resources; the rig is unusable afterwards
    fn dispose(&mut self);
}

/// Parser boundary: loads model files into rigs and animation files into clips.
pub trait ModelSource: Send + Sync {
    /// Parse a model file into a live rig
    fn load_model(&self, path: &str) -> Result<Box<dyn HumanoidRig>>;

    /// Parse an animation file, retargeted to the given rig
    fn load_clip(&self, rig: &dyn HumanoidRig, path: &str) -> Result<Arc<AnimationClip>>;
}
