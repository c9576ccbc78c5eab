//! Clip playback and crossfading.
//!
//! Every motion transition fades the outgoing clip out and the incoming
//! clip in over the same fixed duration. The mixer owns the per-action
//! timing and weights; skeletal sampling is delegated to the rig.

use std::sync::Arc;

use crate::rig::{AnimationClip, HumanoidRig};

/// Fixed crossfade time applied to every motion transition, seconds
pub const ANIMATION_FADE_TIME: f32 = 0.5;

/// Identifier of a playing clip action, unique per mixer
pub type ActionId = u64;

#[derive(Debug, Clone, Copy)]
struct Fade {
    target: f32,
    /// Weight change per second
    rate: f32,
}

/// One scheduled clip with its own clock and blend weight
pub struct ClipAction {
    pub id: ActionId,
    pub clip: Arc<AnimationClip>,
    pub time: f32,
    pub time_scale: f32,
    weight: f32,
    fade: Option<Fade>,
    fading_out: bool,
}

impl ClipAction {
    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// Blend engine bound to one rig
pub struct MotionMixer {
    actions: Vec<ClipAction>,
    next_id: ActionId,
}

impl MotionMixer {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            next_id: 1,
        }
    }

    /// Start a clip from position zero at full target weight, fading in
    /// over `fade_in` seconds (immediately at weight 1 when zero).
    pub fn play(&mut self, clip: Arc<AnimationClip>, fade_in: f32) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;

        let (weight, fade) = if fade_in > 0.0 {
            (
                0.0,
                Some(Fade {
                    target: 1.0,
                    rate: 1.0 / fade_in,
                }),
            )
        } else {
            (1.0, None)
        };

        self.actions.push(ClipAction {
            id,
            clip,
            time: 0.0,
            time_scale: 1.0,
            weight,
            fade,
            fading_out: false,
        });
        id
    }

    /// Fade an action out over `fade_out` seconds; it is removed once its
    /// weight reaches zero. Unknown ids are ignored.
    pub fn fade_out(&mut self, id: ActionId, fade_out: f32) {
        if let Some(action) = self.actions.iter_mut().find(|a| a.id == id) {
            action.fading_out = true;
            if fade_out > 0.0 {
                action.fade = Some(Fade {
                    target: 0.0,
                    rate: 1.0 / fade_out,
                });
            } else {
                action.weight = 0.0;
                action.fade = None;
            }
        }
    }

    /// Immediately stop every action
    pub fn stop_all(&mut self) {
        self.actions.clear();
    }

    /// Advance clocks and fades, sample every live action on the rig, and
    /// drop actions whose fade-out completed.
    pub fn update(&mut self, dt: f32, rig: &mut dyn HumanoidRig) {
        for action in &mut self.actions {
            action.time += dt * action.time_scale;

            if let Some(fade) = action.fade {
                let step = fade.rate * dt;
                if action.weight < fade.target {
                    action.weight = (action.weight + step).min(fade.target);
                } else {
                    action.weight = (action.weight - step).max(fade.target);
                }
                if (action.weight - fade.target).abs() < f32::EPSILON {
                    action.fade = None;
                }
            }

            if action.weight > 0.0 && action.clip.duration > 0.0 {
                let t = action.time % action.clip.duration;
                rig.sample_clip(&action.clip, t, action.weight);
            }
        }

        self.actions.retain(|a| !(a.fading_out && a.weight <= 0.0));
    }

    /// Whether the action is still scheduled
    pub fn is_active(&self, id: ActionId) -> bool {
        self.actions.iter().any(|a| a.id == id)
    }

    /// Number of scheduled actions (fading ones included)
    pub fn active_count(&self) -> usize {
        self.actions.len()
    }

    /// Current weight of an action, zero when gone
    pub fn weight_of(&self, id: ActionId) -> f32 {
        self.actions
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.weight)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::testing::MockRig;

    fn clip(name: &str, duration: f32) -> Arc<AnimationClip> {
        Arc::new(AnimationClip {
            name: name.to_string(),
            duration,
            handle: 0,
        })
    }

    #[test]
    fn test_fade_in_reaches_full_weight() {
        let mut mixer = MotionMixer::new();
        let mut rig = MockRig::new();
        let id = mixer.play(clip("idle1.bvh", 3.0), ANIMATION_FADE_TIME);

        assert_eq!(mixer.weight_of(id), 0.0);
        mixer.update(ANIMATION_FADE_TIME / 2.0, &mut rig);
        let halfway = mixer.weight_of(id);
        assert!(halfway > 0.4 && halfway < 0.6, "halfway weight {halfway}");

        mixer.update(ANIMATION_FADE_TIME, &mut rig);
        assert_eq!(mixer.weight_of(id), 1.0);
    }

    #[test]
    fn test_crossfade_overlap_then_removal() {
        let mut mixer = MotionMixer::new();
        let mut rig = MockRig::new();

        let old = mixer.play(clip("idle1.bvh", 3.0), 0.0);
        mixer.update(0.1, &mut rig);

        mixer.fade_out(old, ANIMATION_FADE_TIME);
        let new = mixer.play(clip("wave.bvh", 3.0), ANIMATION_FADE_TIME);

        // During the crossfade both actions are live
        mixer.update(ANIMATION_FADE_TIME / 2.0, &mut rig);
        assert_eq!(mixer.active_count(), 2);
        assert!(mixer.weight_of(old) < 1.0);
        assert!(mixer.weight_of(new) > 0.0);

        // After the fade the outgoing action is gone
        mixer.update(ANIMATION_FADE_TIME, &mut rig);
        assert_eq!(mixer.active_count(), 1);
        assert!(!mixer.is_active(old));
        assert_eq!(mixer.weight_of(new), 1.0);
    }

    #[test]
    fn test_sampling_wraps_clip_time() {
        let mut mixer = MotionMixer::new();
        let mut rig = MockRig::new();
        mixer.play(clip("idle1.bvh", 1.0), 0.0);

        mixer.update(2.5, &mut rig);
        let (_, t, w) = rig.sampled.last().unwrap();
        assert!((t - 0.5).abs() < 1e-5);
        assert_eq!(*w, 1.0);
    }

    #[test]
    fn test_stop_all_clears_actions() {
        let mut mixer = MotionMixer::new();
        let mut rig = MockRig::new();
        mixer.play(clip("a.bvh", 1.0), 0.0);
        mixer.play(clip("b.bvh", 1.0), 0.0);

        mixer.stop_all();
        mixer.update(0.1, &mut rig);
        assert_eq!(mixer.active_count(), 0);
        assert!(rig.sampled.is_empty());
    }

    #[test]
    fn test_faded_out_action_not_sampled() {
        let mut mixer = MotionMixer::new();
        let mut rig = MockRig::new();
        let id = mixer.play(clip("a.bvh", 1.0), 0.0);
        mixer.fade_out(id, 0.0);

        mixer.update(0.1, &mut rig);
        assert!(rig.sampled.is_empty());
        assert!(!mixer.is_active(id));
    }
}
