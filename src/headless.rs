//! Headless toolkit stand-in.
//!
//! The real rendering toolkit lives in the host; when the service runs
//! standalone there is still a need to drive the full orchestration state
//! machine against actual asset files. The headless source validates model
//! files, exposes the standard VRM expression presets and humanoid bones,
//! and reads real clip durations out of BVH headers so one-shot motions
//! fall back to the idle loop on schedule.

use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{AnimationError, Result, StageError};
use crate::rig::{AnimationClip, HumanoidRig, ModelSource};

/// VRM 1.0 expression presets
const EXPRESSION_PRESETS: [&str; 18] = [
    "neutral", "happy", "angry", "sad", "relaxed", "surprised", "aa", "ih", "ou", "ee", "oh",
    "blink", "blinkLeft", "blinkRight", "lookUp", "lookDown", "lookLeft", "lookRight",
];

/// Humanoid bones a conforming VRM rig carries
const HUMANOID_BONES: [&str; 20] = [
    "hips",
    "spine",
    "chest",
    "upperChest",
    "neck",
    "head",
    "leftShoulder",
    "leftUpperArm",
    "leftLowerArm",
    "leftHand",
    "rightShoulder",
    "rightUpperArm",
    "rightLowerArm",
    "rightHand",
    "leftUpperLeg",
    "leftLowerLeg",
    "leftFoot",
    "rightUpperLeg",
    "rightLowerLeg",
    "rightFoot",
];

/// Rig tracking orchestration state without rendering anything
pub struct HeadlessRig {
    weights: HashMap<String, f32>,
    look_at: Option<Vec3>,
    disposed: bool,
}

impl HeadlessRig {
    fn new() -> Self {
        Self {
            weights: EXPRESSION_PRESETS
                .iter()
                .map(|name| (name.to_string(), 0.0))
                .collect(),
            look_at: None,
            disposed: false,
        }
    }

    pub fn look_target(&self) -> Option<Vec3> {
        self.look_at
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl HumanoidRig for HeadlessRig {
    fn expression_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.weights.keys().cloned().collect();
        names.sort();
        names
    }

    fn expression_weight(&self, name: &str) -> f32 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }

    fn set_expression_weight(&mut self, name: &str, weight: f32) {
        if let Some(value) = self.weights.get_mut(name) {
            *value = weight.clamp(0.0, 1.0);
        }
    }

    fn has_bone(&self, bone: &str) -> bool {
        HUMANOID_BONES.contains(&bone)
    }

    fn bone_world_transform(&self, bone: &str) -> Option<(Vec3, Quat)> {
        if !self.has_bone(bone) {
            return None;
        }
        // Nominal T-pose heights keep hit volumes in a plausible layout
        let height = match bone {
            "head" | "neck" => 1.5,
            "chest" | "upperChest" => 1.2,
            "spine" => 1.05,
            "leftHand" | "rightHand" => 0.8,
            "leftUpperLeg" | "rightUpperLeg" => 0.8,
            "leftFoot" | "rightFoot" => 0.1,
            _ => 0.9,
        };
        Some((Vec3::new(0.0, height, 0.0), Quat::IDENTITY))
    }

    fn hips_height(&self) -> f32 {
        0.9
    }

    fn set_look_at(&mut self, target: Option<Vec3>) {
        self.look_at = target;
    }

    fn sample_clip(&mut self, _clip: &AnimationClip, _time: f32, _weight: f32) {}

    fn update(&mut self, _dt: f32) {}

    fn dispose(&mut self) {
        self.disposed = true;
        self.weights.clear();
    }
}

fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let wanted = name.to_lowercase();
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_lowercase() == wanted)
                .unwrap_or(false)
        })
}

/// Parse the total duration of a BVH file from its MOTION header
/// (`Frames:` count times `Frame Time:`).
pub fn bvh_duration(contents: &str) -> Option<f32> {
    let mut frames: Option<f32> = None;
    let mut frame_time: Option<f32> = None;

    for line in contents.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Frames:") {
            frames = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("Frame Time:") {
            frame_time = rest.trim().parse().ok();
        }
        if frames.is_some() && frame_time.is_some() {
            break;
        }
    }

    Some(frames? * frame_time?)
}

/// `ModelSource` over plain asset folders
pub struct HeadlessSource {
    model_dir: PathBuf,
    animation_dir: PathBuf,
    next_handle: AtomicU64,
}

impl HeadlessSource {
    pub fn new<P: AsRef<Path>>(assets_dir: P) -> Self {
        let base = assets_dir.as_ref();
        Self {
            model_dir: base.join("model"),
            animation_dir: base.join("animation"),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl ModelSource for HeadlessSource {
    fn load_model(&self, path: &str) -> Result<Box<dyn HumanoidRig>> {
        let full = self.model_dir.join(path);
        if !full.exists() {
            return Err(StageError::ModelLoad {
                path: path.to_string(),
                message: "file not found".to_string(),
            }
            .into());
        }
        let extension = full
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if extension != "vrm" && extension != "glb" {
            return Err(StageError::ModelLoad {
                path: path.to_string(),
                message: format!("unsupported model format: {}", extension),
            }
            .into());
        }
        Ok(Box::new(HeadlessRig::new()))
    }

    fn load_clip(&self, _rig: &dyn HumanoidRig, path: &str) -> Result<Arc<AnimationClip>> {
        if !path.to_lowercase().ends_with(".bvh") {
            return Err(AnimationError::UnsupportedFormat(path.to_string()).into());
        }
        // Clip names are lowercased at ingestion; fall back to a
        // case-insensitive lookup for the on-disk name
        let mut full = self.animation_dir.join(path);
        if !full.exists() {
            if let Some(actual) = find_case_insensitive(&self.animation_dir, path) {
                full = actual;
            }
        }
        let contents = std::fs::read_to_string(&full).map_err(|e| AnimationError::ClipLoad {
            file: path.to_string(),
            message: e.to_string(),
        })?;
        let duration = bvh_duration(&contents).ok_or_else(|| AnimationError::ClipLoad {
            file: path.to_string(),
            message: "missing MOTION header".to_string(),
        })?;

        Ok(Arc::new(AnimationClip {
            name: path.to_lowercase(),
            duration,
            handle: self.next_handle.fetch_add(1, Ordering::SeqCst),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BVH: &str = "HIERARCHY\nROOT Hips\n{\n}\nMOTION\nFrames: 120\nFrame Time: 0.0333333\n0.0 0.0 0.0\n";

    #[test]
    fn test_bvh_duration() {
        let duration = bvh_duration(BVH).unwrap();
        assert!((duration - 4.0).abs() < 0.01);
        assert!(bvh_duration("HIERARCHY only").is_none());
    }

    #[test]
    fn test_load_model_checks_format() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("model")).unwrap();
        std::fs::write(dir.path().join("model/a.vrm"), b"x").unwrap();
        std::fs::write(dir.path().join("model/a.txt"), b"x").unwrap();

        let source = HeadlessSource::new(dir.path());
        assert!(source.load_model("a.vrm").is_ok());
        assert!(source.load_model("a.txt").is_err());
        assert!(source.load_model("missing.vrm").is_err());
    }

    #[test]
    fn test_load_clip_reads_duration() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("animation")).unwrap();
        std::fs::write(dir.path().join("animation/idle1.bvh"), BVH).unwrap();

        let source = HeadlessSource::new(dir.path());
        let rig = HeadlessRig::new();
        let clip = source.load_clip(&rig, "idle1.bvh").unwrap();
        assert!((clip.duration - 4.0).abs() < 0.01);
        assert_eq!(clip.name, "idle1.bvh");

        assert!(source.load_clip(&rig, "missing.bvh").is_err());
        assert!(source.load_clip(&rig, "dance.fbx").is_err());

        // Lowercased ingestion names still find mixed-case files
        std::fs::write(dir.path().join("animation/Wave9.BVH"), BVH).unwrap();
        assert!(source.load_clip(&rig, "wave9.bvh").is_ok());
    }

    #[test]
    fn test_headless_rig_expressions() {
        let mut rig = HeadlessRig::new();
        rig.set_expression_weight("happy", 2.0);
        assert_eq!(rig.expression_weight("happy"), 1.0);
        rig.set_expression_weight("unknown", 1.0);
        assert_eq!(rig.expression_weight("unknown"), 0.0);
        assert!(rig.has_bone("hips"));
        assert!(!rig.has_bone("tail"));

        rig.set_look_at(Some(Vec3::new(0.0, 1.0, 5.0)));
        assert!(rig.look_target().is_some());

        rig.dispose();
        assert!(rig.is_disposed());
        assert_eq!(rig.expression_weight("happy"), 0.0);
    }
}
